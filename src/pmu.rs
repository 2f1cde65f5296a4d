//! # PMU Orchestration Adapter
//!
//! Boundary between the ranging engine and the phase measurement unit.
//!
//! ## Architecture
//!
//! The raw phase sampling and the phase to distance math live outside of this
//! crate, behind the [`PmuAdapter`] trait. This module owns everything the
//! engine needs to drive that adapter:
//!
//! - **FrequencySweep**: Start, step and stop of the measured frequency band
//! - **Capabilities**: Antenna diversity bits negotiated between both nodes
//! - **AntennaAssignment**: Ordered list of antenna pairs implied by the capabilities
//! - **RangeParams**: Per-transaction parameters handed to the distance math
//! - **RemoteResults**: Per-frequency averages received from the Reflector
//! - **ValidityBitmap**: Which frequencies of one antenna pair yielded usable samples

use crate::confirm::MeasurementPair;
use crate::status::RtbStatus;
use crate::{MAX_ANTENNA_PAIRS, MAX_PMU_FREQUENCIES};

/// Method identifier of phase measurement based ranging
pub const RANGING_METHOD_PMU: u8 = 0x01;

/// Lowest frequency (MHz) accepted for a sweep boundary
pub const PMU_MIN_FREQ_MHZ: u16 = 2324;

/// Highest frequency (MHz) accepted for a sweep boundary
pub const PMU_MAX_FREQ_MHZ: u16 = 2527;

/// Start and stop must be more than this many MHz apart
pub const PMU_MIN_SWEEP_SPAN_MHZ: u16 = 4;

/// Highest legal step code (4 MHz)
pub const PMU_MAX_STEP_CODE: u8 = 3;

const VALIDITY_BITMAP_LEN: usize = MAX_PMU_FREQUENCIES.div_ceil(8);

/// Error type for PMU adapter operations
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum PmuError {
    /// Measurement requested before `configure`
    NotConfigured,

    /// The two transceivers lost their common time base
    SyncLost,

    /// The sweep did not produce usable samples
    MeasurementFailed,
}

#[cfg(feature = "std")]
impl core::fmt::Display for PmuError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PmuError::NotConfigured => write!(f, "PMU is not configured"),
            PmuError::SyncLost => write!(f, "PMU time synchronization lost"),
            PmuError::MeasurementFailed => write!(f, "PMU measurement failed"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for PmuError {}

/// Frequency band swept by one measurement
///
/// Values are kept in their wire representation so that a request with an
/// illegal sweep can still be decoded and answered with `InvalidParameter`.
///
/// # Step Codes
/// - 0: 500 kHz
/// - 1: 1 MHz
/// - 2: 2 MHz
/// - 3: 4 MHz
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct FrequencySweep {
    pub start_mhz: u16,
    pub step: u8,
    pub stop_mhz: u16,
}

impl FrequencySweep {
    pub const fn with(start_mhz: u16, step: u8, stop_mhz: u16) -> Self {
        Self { start_mhz, step, stop_mhz }
    }

    /// Checks the sweep boundaries and the step code
    ///
    /// # Returns
    /// `Ok(())` for a legal sweep, `Err(RtbStatus::InvalidParameter)` otherwise
    pub fn validate(&self) -> Result<(), RtbStatus> {
        let in_band = |f: u16| (PMU_MIN_FREQ_MHZ..=PMU_MAX_FREQ_MHZ).contains(&f);
        if !in_band(self.start_mhz) || !in_band(self.stop_mhz) {
            return Err(RtbStatus::InvalidParameter);
        }
        if self.stop_mhz <= self.start_mhz + PMU_MIN_SWEEP_SPAN_MHZ {
            return Err(RtbStatus::InvalidParameter);
        }
        if self.step > PMU_MAX_STEP_CODE {
            return Err(RtbStatus::InvalidParameter);
        }
        Ok(())
    }

    /// Step width in 500 kHz units (1, 2, 4 or 8)
    pub fn step_half_mhz(&self) -> u16 {
        1 << self.step.min(PMU_MAX_STEP_CODE)
    }

    /// Step width in kHz
    pub fn step_khz(&self) -> u32 {
        self.step_half_mhz() as u32 * 500
    }

    /// Number of measured frequencies including both boundaries
    ///
    /// Only meaningful for a sweep that passed [`FrequencySweep::validate`].
    pub fn frequency_count(&self) -> usize {
        let span_half_mhz = self.stop_mhz.saturating_sub(self.start_mhz) as usize * 2;
        (span_half_mhz / self.step_half_mhz() as usize + 1).min(MAX_PMU_FREQUENCIES)
    }
}

/// Antenna diversity capability bits of a ranging transaction
///
/// # Bits
/// - bit 0: Initiator measures with antenna diversity
/// - bit 1: Reflector measures with antenna diversity
///
/// The Initiator proposes its own bit and sets the Reflector bit; the Reflector
/// clears the Reflector bit when it has no diversity and echoes the result in
/// its Range-Accept.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct Capabilities(pub u8);

impl Capabilities {
    pub const INITIATOR_ANTENNA_DIV: u8 = 1 << 0;
    pub const REFLECTOR_ANTENNA_DIV: u8 = 1 << 1;

    /// Capabilities proposed by an Initiator in its Range-Request
    pub fn proposed_by_initiator(antenna_diversity: bool) -> Self {
        let mut caps = Self::REFLECTOR_ANTENNA_DIV;
        if antenna_diversity {
            caps |= Self::INITIATOR_ANTENNA_DIV;
        }
        Capabilities(caps)
    }

    /// Capabilities after the Reflector merged in its own diversity support
    pub fn accepted_by_reflector(self, antenna_diversity: bool) -> Self {
        if antenna_diversity {
            self
        } else {
            Capabilities(self.0 & !Self::REFLECTOR_ANTENNA_DIV)
        }
    }

    pub fn initiator_diversity(&self) -> bool {
        self.0 & Self::INITIATOR_ANTENNA_DIV != 0
    }

    pub fn reflector_diversity(&self) -> bool {
        self.0 & Self::REFLECTOR_ANTENNA_DIV != 0
    }

    /// Number of antenna pairs measured: 1, 2 or 4
    pub fn antenna_pair_count(&self) -> usize {
        match (self.initiator_diversity(), self.reflector_diversity()) {
            (false, false) => 1,
            (true, true) => 4,
            _ => 2,
        }
    }
}

/// Capability bits sent by a Coordinator in a Remote-Range-Request
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct RemoteCapabilities(pub u8);

impl RemoteCapabilities {
    pub const PROVIDE_ANTENNA_DIV_RESULTS: u8 = 1 << 0;
    pub const APPLY_MIN_DIST_THRESHOLD: u8 = 1 << 1;

    pub fn with(provide_antenna_div_results: bool, apply_min_dist_threshold: bool) -> Self {
        let mut caps = 0;
        if provide_antenna_div_results {
            caps |= Self::PROVIDE_ANTENNA_DIV_RESULTS;
        }
        if apply_min_dist_threshold {
            caps |= Self::APPLY_MIN_DIST_THRESHOLD;
        }
        RemoteCapabilities(caps)
    }

    pub fn provide_antenna_div_results(&self) -> bool {
        self.0 & Self::PROVIDE_ANTENNA_DIV_RESULTS != 0
    }

    pub fn apply_min_dist_threshold(&self) -> bool {
        self.0 & Self::APPLY_MIN_DIST_THRESHOLD != 0
    }
}

/// Side of the measurement a node is on
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum MeasurementSide {
    Initiator,
    Reflector,
}

/// One antenna combination (antenna index at the Initiator, at the Reflector)
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct AntennaPair {
    pub initiator_antenna: u8,
    pub reflector_antenna: u8,
}

/// Canonical enumeration order of antenna pairs
const ANTENNA_PAIR_ORDER: [(u8, u8); MAX_ANTENNA_PAIRS] = [(0, 0), (0, 1), (1, 1), (1, 0)];

/// Ordered antenna pairs measured in one transaction
///
/// Pairs follow the order (0,0), (0,1), (1,1), (1,0) restricted to the sides
/// that actually use diversity. A side without diversity measures on its
/// default antenna, which is substituted for this node's own side.
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct AntennaAssignment {
    pairs: [AntennaPair; MAX_ANTENNA_PAIRS],
    count: usize,
}

impl AntennaAssignment {
    /// Computes the assignment from the negotiated capabilities
    ///
    /// # Arguments
    /// * `caps` - Capabilities agreed in the Range-Accept
    /// * `side` - Which side of the measurement this node is
    /// * `default_antenna` - Antenna used by this node when it has no diversity
    pub fn with(caps: Capabilities, side: MeasurementSide, default_antenna: u8) -> Self {
        let mut pairs = [AntennaPair::default(); MAX_ANTENNA_PAIRS];
        let mut count = 0;
        for (init, refl) in ANTENNA_PAIR_ORDER {
            if (!caps.initiator_diversity() && init != 0) || (!caps.reflector_diversity() && refl != 0) {
                continue;
            }
            let mut pair = AntennaPair {
                initiator_antenna: init,
                reflector_antenna: refl,
            };
            match side {
                MeasurementSide::Initiator if !caps.initiator_diversity() => pair.initiator_antenna = default_antenna,
                MeasurementSide::Reflector if !caps.reflector_diversity() => pair.reflector_antenna = default_antenna,
                _ => {}
            }
            pairs[count] = pair;
            count += 1;
        }
        Self { pairs, count }
    }

    pub fn pairs(&self) -> &[AntennaPair] {
        &self.pairs[..self.count]
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Antenna this node switches to for the given pair
    pub fn own_antenna(&self, index: usize, side: MeasurementSide) -> u8 {
        let pair = self.pairs[index.min(MAX_ANTENNA_PAIRS - 1)];
        match side {
            MeasurementSide::Initiator => pair.initiator_antenna,
            MeasurementSide::Reflector => pair.reflector_antenna,
        }
    }
}

/// Parameters of one ranging transaction as seen by the distance math
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct RangeParams {
    pub sweep: FrequencySweep,
    pub apply_min_dist_threshold: bool,
    pub antennas: AntennaAssignment,
}

/// Bitset of frequencies that produced usable samples for one antenna pair
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct ValidityBitmap {
    bits: [u8; VALIDITY_BITMAP_LEN],
    len: usize,
}

impl ValidityBitmap {
    /// Bitmap of `len` frequencies, all marked invalid
    pub fn with_len(len: usize) -> Self {
        Self {
            bits: [0; VALIDITY_BITMAP_LEN],
            len: len.min(MAX_PMU_FREQUENCIES),
        }
    }

    pub fn set(&mut self, index: usize, valid: bool) {
        if index >= self.len {
            return;
        }
        if valid {
            self.bits[index / 8] |= 1 << (index % 8);
        } else {
            self.bits[index / 8] &= !(1 << (index % 8));
        }
    }

    pub fn is_valid(&self, index: usize) -> bool {
        index < self.len && self.bits[index / 8] & (1 << (index % 8)) != 0
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn valid_count(&self) -> usize {
        (0..self.len).filter(|&i| self.is_valid(i)).count()
    }

    /// Raw bitmap octets, LSB first
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits[..self.len.div_ceil(8)]
    }
}

/// Per-frequency averages received from the Reflector, one array per antenna pair
pub struct RemoteResults {
    values: [[u8; MAX_PMU_FREQUENCIES]; MAX_ANTENNA_PAIRS],
    received: [usize; MAX_ANTENNA_PAIRS],
}

impl RemoteResults {
    pub const fn new() -> Self {
        Self {
            values: [[0; MAX_PMU_FREQUENCIES]; MAX_ANTENNA_PAIRS],
            received: [0; MAX_ANTENNA_PAIRS],
        }
    }

    pub fn reset(&mut self) {
        self.received = [0; MAX_ANTENNA_PAIRS];
    }

    /// Stores a received chunk at `offset` of the given pair's array
    ///
    /// # Returns
    /// Number of values actually stored (chunks beyond the array are cut off)
    pub fn store(&mut self, pair: usize, offset: usize, chunk: &[u8]) -> usize {
        if pair >= MAX_ANTENNA_PAIRS || offset >= MAX_PMU_FREQUENCIES {
            return 0;
        }
        let n = chunk.len().min(MAX_PMU_FREQUENCIES - offset);
        self.values[pair][offset..offset + n].copy_from_slice(&chunk[..n]);
        self.received[pair] = self.received[pair].max(offset + n);
        n
    }

    pub fn received(&self, pair: usize) -> usize {
        self.received.get(pair).copied().unwrap_or(0)
    }

    pub fn values(&self, pair: usize) -> &[u8] {
        match self.values.get(pair) {
            Some(values) => &values[..self.received[pair]],
            None => &[],
        }
    }
}

impl Default for RemoteResults {
    fn default() -> Self {
        Self::new()
    }
}

/// Phase measurement unit driven by the ranging engine
///
/// # Lifecycle
/// 1. `configure` once the antenna pairs are known (Range-Accept)
/// 2. `run_measurement` right after the PMU-Start frame, on both nodes
/// 3. `averages` / `validity` read the per-pair results
/// 4. `pair_distance` (Initiator only) combines local and remote averages
/// 5. `reset` when the transaction ends
///
/// All methods are synchronous. The measurement itself is time critical and
/// runs to completion inside `run_measurement`.
pub trait PmuAdapter {
    /// Prepares the sweep and antenna switching for the next measurement
    fn configure(&mut self, params: &RangeParams, side: MeasurementSide) -> Result<(), PmuError>;

    /// Runs the synchronized sweep over all configured antenna pairs
    fn run_measurement(&mut self) -> Result<(), PmuError>;

    /// Per-frequency averaged phase values of one antenna pair
    ///
    /// Returns an empty slice for pairs that were not measured.
    fn averages(&self, pair: usize) -> &[u8];

    /// Which frequencies of one antenna pair yielded usable samples
    fn validity(&self, pair: usize) -> ValidityBitmap;

    /// Converts local and remote averages of one antenna pair into a distance
    ///
    /// Returns `INVALID_DISTANCE` with DQF 0 when no distance can be derived.
    fn pair_distance(&mut self, params: &RangeParams, pair: usize, local: &[u8], remote: &[u8]) -> MeasurementPair;

    /// Drops all measurement data
    fn reset(&mut self);
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    // ====== Frequency Sweep ======

    #[test]
    fn default_sweep_is_valid() {
        let sweep = FrequencySweep::with(2403, 2, 2443);
        assert_eq!(sweep.validate(), Ok(()));
        assert_eq!(sweep.frequency_count(), 21);
        assert_eq!(sweep.step_khz(), 2000);
    }

    #[test]
    fn widest_sweep_has_maximum_frequency_count() {
        let sweep = FrequencySweep::with(PMU_MIN_FREQ_MHZ, 0, PMU_MAX_FREQ_MHZ);
        assert_eq!(sweep.validate(), Ok(()));
        assert_eq!(sweep.frequency_count(), MAX_PMU_FREQUENCIES);
    }

    #[test]
    fn illegal_sweeps_are_rejected() {
        let cases = [
            FrequencySweep::with(2323, 2, 2443),
            FrequencySweep::with(2403, 2, 2528),
            FrequencySweep::with(2403, 2, 2407),
            FrequencySweep::with(2443, 2, 2403),
            FrequencySweep::with(2403, 4, 2443),
        ];
        for sweep in cases {
            assert_eq!(sweep.validate(), Err(RtbStatus::InvalidParameter));
        }
        assert_eq!(FrequencySweep::with(2403, 2, 2408).validate(), Ok(()));
    }

    // ====== Antenna Assignment ======

    #[test]
    fn pair_count_follows_capabilities() {
        assert_eq!(Capabilities(0).antenna_pair_count(), 1);
        assert_eq!(Capabilities(1).antenna_pair_count(), 2);
        assert_eq!(Capabilities(2).antenna_pair_count(), 2);
        assert_eq!(Capabilities(3).antenna_pair_count(), 4);
    }

    #[test]
    fn reflector_without_diversity_clears_its_bit() {
        let proposed = Capabilities::proposed_by_initiator(true);
        assert_eq!(proposed.0, 0b11);
        assert_eq!(proposed.accepted_by_reflector(false).0, 0b01);
        assert_eq!(Capabilities::proposed_by_initiator(false).accepted_by_reflector(true).0, 0b10);
    }

    #[test]
    fn full_diversity_uses_canonical_order() {
        let assignment = AntennaAssignment::with(Capabilities(3), MeasurementSide::Initiator, 0);
        let pairs: Vec<(u8, u8)> = assignment.pairs().iter().map(|p| (p.initiator_antenna, p.reflector_antenna)).collect();
        assert_eq!(pairs, vec![(0, 0), (0, 1), (1, 1), (1, 0)]);
    }

    #[test]
    fn non_diverse_side_uses_default_antenna() {
        let assignment = AntennaAssignment::with(Capabilities(Capabilities::INITIATOR_ANTENNA_DIV), MeasurementSide::Reflector, 1);
        assert_eq!(assignment.len(), 2);
        assert_eq!(assignment.own_antenna(0, MeasurementSide::Reflector), 1);
        assert_eq!(assignment.own_antenna(1, MeasurementSide::Reflector), 1);
        assert_eq!(assignment.pairs()[1].initiator_antenna, 1);
    }

    // ====== Result Buffers ======

    #[test]
    fn validity_bitmap_counts_set_bits() {
        let mut bitmap = ValidityBitmap::with_len(10);
        bitmap.set(0, true);
        bitmap.set(9, true);
        bitmap.set(10, true);
        assert_eq!(bitmap.valid_count(), 2);
        assert_eq!(bitmap.as_bytes(), &[0x01, 0x02]);
    }

    #[test]
    fn remote_results_are_stored_at_offset() {
        let mut results = RemoteResults::new();
        assert_eq!(results.store(1, 0, &[1, 2, 3]), 3);
        assert_eq!(results.store(1, 3, &[4, 5]), 2);
        assert_eq!(results.values(1), &[1, 2, 3, 4, 5]);
        assert_eq!(results.received(0), 0);
        assert_eq!(results.store(1, MAX_PMU_FREQUENCIES - 1, &[9, 9]), 1);
        results.reset();
        assert!(results.values(1).is_empty());
    }
}
