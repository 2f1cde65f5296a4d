//! # Continuous Ranging
//!
//! Application side post-processing of a stream of single-shot measurements
//! between the same two nodes.
//!
//! ## Pipeline
//!
//! Each new measurement runs through three steps, in this order:
//!
//! 1. **Sanity check**: The raw distance may move at most 200 cm/s away from the
//!    current filtered distance. Implausible values are clamped to that bound,
//!    failed or low quality measurements are replaced by the filtered distance.
//! 2. **Window filter**: The checked value enters a sliding window whose newest
//!    `filter_len` entries are reduced by the configured [`FilterPolicy`].
//! 3. **Speed estimate**: Two averaged distance deltas over the elapsed time,
//!    smoothed over the last four samples, give speed in km/h and a direction.
//!
//! The first successful measurement seeds every window slot, so the filter
//! output is meaningful from the first sample on. Failures before that are
//! reported without filter output.

use embassy_time::Instant;

use crate::confirm::{MeasurementPair, MeasurementResult};
use crate::filters::{self, FilterPolicy, MAX_FILTER_LEN};
use crate::ring_buffer::RingBuffer;
use crate::status::RtbStatus;

/// Longest supported sliding window
pub const MAX_WINDOW_LEN: usize = MAX_FILTER_LEN;

/// Samples with a lower DQF (percent) are not trusted
pub const DQF_THRESHOLD: u8 = 10;

/// Highest plausible relative speed of the two nodes
pub const MAX_SPEED_CM_PER_S: u64 = 200;

/// Speeds within ±1 km/h count as stationary
pub const STATIONARY_SPEED_KMH: i32 = 1;

const SPEED_HISTORY_LEN: usize = 4;

/// cm/ms to km/h is ×36; speeds are kept in 1/1000 km/h
const CM_PER_MS_TO_MILLI_KMH: i64 = 36_000;

/// Classification of one sample by the sanity check
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum DistanceCheck {
    Ok,
    /// The ranging transaction failed
    TransactionError,
    /// DQF below [`DQF_THRESHOLD`]
    DqfTooLow,
    /// Closer than plausible, clamped to the lower bound
    TooShort,
    /// Farther than plausible, clamped to the upper bound
    TooLong,
}

#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum Direction {
    Approaching,
    Stationary,
    Leaving,
}

impl Direction {
    pub fn from_speed(speed_kmh: i32) -> Self {
        if speed_kmh < -STATIONARY_SPEED_KMH {
            Direction::Approaching
        } else if speed_kmh > STATIONARY_SPEED_KMH {
            Direction::Leaving
        } else {
            Direction::Stationary
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct ContinuousRangingConfig {
    /// Slots of the sliding window (1..=16)
    pub window_len: usize,
    /// Newest entries reduced by the filter (1..=window_len)
    pub filter_len: usize,
    pub policy: FilterPolicy,
}

impl ContinuousRangingConfig {
    pub fn validate(&self) -> Result<(), RtbStatus> {
        if self.window_len == 0 || self.window_len > MAX_WINDOW_LEN {
            return Err(RtbStatus::InvalidParameter);
        }
        if self.filter_len == 0 || self.filter_len > self.window_len {
            return Err(RtbStatus::InvalidParameter);
        }
        Ok(())
    }
}

impl Default for ContinuousRangingConfig {
    fn default() -> Self {
        Self {
            window_len: 8,
            filter_len: 8,
            policy: FilterPolicy::MinVariance,
        }
    }
}

/// Filter output for one sample
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct FilteredDistance {
    pub distance_cm: u32,
    pub dqf: u8,
    /// Positive when the nodes move apart
    pub speed_kmh: i32,
    pub direction: Direction,
}

/// Annotated result of one measurement
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct ContinuousSample {
    pub raw: MeasurementResult,
    pub check: DistanceCheck,
    /// Time since the previous measurement started
    pub elapsed_ms: u64,
    /// Value that entered the window, after the sanity check
    pub window_value: Option<MeasurementPair>,
    pub filtered: Option<FilteredDistance>,
}

/// Rounds `numerator / denominator` half away from zero
fn div_round(numerator: i64, denominator: i64) -> i64 {
    if numerator >= 0 {
        (numerator + denominator / 2) / denominator
    } else {
        (numerator - denominator / 2) / denominator
    }
}

/// Mean speed over the last four distance deltas
pub struct SpeedEstimator {
    history: RingBuffer<i64, SPEED_HISTORY_LEN>,
}

impl SpeedEstimator {
    pub fn new() -> Self {
        Self {
            history: RingBuffer::with_capacity(SPEED_HISTORY_LEN, 0),
        }
    }

    /// Pushes one speed sample and returns the smoothed speed
    ///
    /// # Arguments
    /// * `newer_cm` - Averaged distance of the two newest samples
    /// * `older_cm` - Averaged distance of the two samples before them
    /// * `elapsed_ms` - Time between the two newest measurements
    ///
    /// # Returns
    /// Speed in km/h, 0 when no time elapsed
    pub fn update(&mut self, newer_cm: u32, older_cm: u32, elapsed_ms: u64) -> i32 {
        if elapsed_ms == 0 {
            return 0;
        }
        let delta_cm = newer_cm as i64 - older_cm as i64;
        self.history.push(delta_cm * CM_PER_MS_TO_MILLI_KMH / elapsed_ms as i64);
        let sum: i64 = self.history.iter_latest(SPEED_HISTORY_LEN).sum();
        div_round(sum, SPEED_HISTORY_LEN as i64 * 1000) as i32
    }

    pub fn reset(&mut self) {
        self.history.fill(0);
    }
}

impl Default for SpeedEstimator {
    fn default() -> Self {
        Self::new()
    }
}

/// Sanity check of a raw measurement against the filtered distance
///
/// # Returns
/// The classification and the distance that may enter the window
pub fn check_distance(raw: &MeasurementResult, filtered_cm: u32, elapsed_ms: u64) -> (DistanceCheck, u32) {
    let limit = (elapsed_ms * MAX_SPEED_CM_PER_S / 1000).min(u32::MAX as u64) as u32;
    let distance = raw.distance_cm();
    if !raw.is_success() {
        (DistanceCheck::TransactionError, filtered_cm)
    } else if raw.dqf() < DQF_THRESHOLD {
        (DistanceCheck::DqfTooLow, filtered_cm)
    } else if distance > filtered_cm.saturating_add(limit) {
        (DistanceCheck::TooLong, filtered_cm.saturating_add(limit))
    } else if filtered_cm > limit && filtered_cm - limit > distance {
        (DistanceCheck::TooShort, filtered_cm - limit)
    } else {
        (DistanceCheck::Ok, distance)
    }
}

/// Sliding window filter over consecutive measurements
pub struct ContinuousRanging {
    config: ContinuousRangingConfig,
    window: RingBuffer<MeasurementPair, MAX_WINDOW_LEN>,
    filled: bool,
    filtered: MeasurementPair,
    /// Start times of the two newest measurements
    started: RingBuffer<Instant, 2>,
    /// Distances that entered the window, independent of its length
    recent_cm: RingBuffer<u32, SPEED_HISTORY_LEN>,
    speed: SpeedEstimator,
    last_check: DistanceCheck,
}

impl ContinuousRanging {
    /// Creates an empty window
    ///
    /// # Returns
    /// `Err(RtbStatus::InvalidParameter)` for window or filter lengths out of range
    pub fn with(config: ContinuousRangingConfig) -> Result<Self, RtbStatus> {
        config.validate()?;
        Ok(Self {
            config,
            window: RingBuffer::with_capacity(config.window_len, MeasurementPair::INVALID),
            filled: false,
            filtered: MeasurementPair::INVALID,
            started: RingBuffer::with_capacity(2, Instant::from_ticks(0)),
            recent_cm: RingBuffer::with_capacity(SPEED_HISTORY_LEN, 0),
            speed: SpeedEstimator::new(),
            last_check: DistanceCheck::Ok,
        })
    }

    pub fn config(&self) -> &ContinuousRangingConfig {
        &self.config
    }

    /// True once a successful measurement seeded the window
    pub fn is_filled(&self) -> bool {
        self.filled
    }

    pub fn last_check(&self) -> DistanceCheck {
        self.last_check
    }

    /// Drops the window; the next success seeds it again
    pub fn reset(&mut self) {
        self.filled = false;
        self.filtered = MeasurementPair::INVALID;
        self.window.fill(MeasurementPair::INVALID);
        self.recent_cm.fill(0);
        self.speed.reset();
        self.last_check = DistanceCheck::Ok;
    }

    /// Runs one measurement through the pipeline
    ///
    /// # Arguments
    /// * `raw` - Result of the single-shot ranging
    /// * `started_at` - When that ranging was requested
    pub fn process(&mut self, raw: &MeasurementResult, started_at: Instant) -> ContinuousSample {
        if !self.filled {
            return self.seed(raw, started_at);
        }

        self.started.push(started_at);
        let elapsed_ms = self.started.latest(0).saturating_duration_since(self.started.latest(1)).as_millis();

        let (check, distance_cm) = check_distance(raw, self.filtered.distance_cm, elapsed_ms);
        self.last_check = check;
        let entered = MeasurementPair {
            distance_cm,
            dqf: raw.dqf(),
        };
        self.window.push(entered);
        self.recent_cm.push(distance_cm);

        let mut recent = [MeasurementPair::INVALID; MAX_WINDOW_LEN];
        let n = self.config.filter_len;
        for (slot, sample) in recent.iter_mut().zip(self.window.iter_latest(n)) {
            *slot = sample;
        }
        if let Some(filtered) = filters::apply(self.config.policy, &recent[..n]) {
            self.filtered = filtered;
        }

        let newer = (self.recent_cm.latest(0) as u64 + self.recent_cm.latest(1) as u64) / 2;
        let older = (self.recent_cm.latest(2) as u64 + self.recent_cm.latest(3) as u64) / 2;
        let speed_kmh = self.speed.update(newer as u32, older as u32, elapsed_ms);

        if check != DistanceCheck::Ok {
            log::debug!("Continuous sample {} cm replaced by {} cm", raw.distance_cm(), distance_cm);
        }

        ContinuousSample {
            raw: *raw,
            check,
            elapsed_ms,
            window_value: Some(entered),
            filtered: Some(FilteredDistance {
                distance_cm: self.filtered.distance_cm,
                dqf: self.filtered.dqf,
                speed_kmh,
                direction: Direction::from_speed(speed_kmh),
            }),
        }
    }

    fn seed(&mut self, raw: &MeasurementResult, started_at: Instant) -> ContinuousSample {
        if !raw.is_success() {
            self.last_check = DistanceCheck::TransactionError;
            return ContinuousSample {
                raw: *raw,
                check: DistanceCheck::TransactionError,
                elapsed_ms: 0,
                window_value: None,
                filtered: None,
            };
        }

        let first = MeasurementPair {
            distance_cm: raw.distance_cm(),
            dqf: raw.dqf(),
        };
        self.window.fill(first);
        self.recent_cm.fill(first.distance_cm);
        self.started.fill(started_at);
        self.filtered = first;
        self.filled = true;
        self.last_check = DistanceCheck::Ok;
        log::debug!("Continuous ranging window seeded with {} cm", first.distance_cm);

        ContinuousSample {
            raw: *raw,
            check: DistanceCheck::Ok,
            elapsed_ms: 0,
            window_value: Some(first),
            filtered: Some(FilteredDistance {
                distance_cm: first.distance_cm,
                dqf: first.dqf,
                speed_kmh: 0,
                direction: Direction::Stationary,
            }),
        }
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    fn config(window_len: usize, filter_len: usize, policy: FilterPolicy) -> ContinuousRangingConfig {
        ContinuousRangingConfig {
            window_len,
            filter_len,
            policy,
        }
    }

    fn filtered(sample: &ContinuousSample) -> FilteredDistance {
        match sample.filtered {
            Some(filtered) => filtered,
            None => panic!("Expected filter output for check {:?}", sample.check),
        }
    }

    // ====== Configuration ======

    #[test]
    fn window_and_filter_lengths_are_validated() {
        assert!(ContinuousRanging::with(config(16, 16, FilterPolicy::Average)).is_ok());
        assert_eq!(ContinuousRanging::with(config(17, 4, FilterPolicy::Average)).err(), Some(RtbStatus::InvalidParameter));
        assert_eq!(ContinuousRanging::with(config(4, 5, FilterPolicy::Average)).err(), Some(RtbStatus::InvalidParameter));
        assert_eq!(ContinuousRanging::with(config(4, 0, FilterPolicy::Average)).err(), Some(RtbStatus::InvalidParameter));
    }

    // ====== Sanity Check ======

    #[test]
    fn sanity_bounds_scale_with_elapsed_time() {
        let ok = MeasurementResult::success(115, 90);
        assert_eq!(check_distance(&ok, 100, 100), (DistanceCheck::Ok, 115));

        let far = MeasurementResult::success(250, 90);
        assert_eq!(check_distance(&far, 100, 100), (DistanceCheck::TooLong, 120));
        assert_eq!(check_distance(&far, 100, 1000), (DistanceCheck::Ok, 250));

        let near = MeasurementResult::success(10, 90);
        assert_eq!(check_distance(&near, 100, 100), (DistanceCheck::TooShort, 80));
        assert_eq!(check_distance(&near, 15, 100), (DistanceCheck::Ok, 10));
    }

    #[test]
    fn failed_and_low_quality_samples_keep_filtered_distance() {
        let failed = MeasurementResult::failure(RtbStatus::Timeout);
        assert_eq!(check_distance(&failed, 300, 100), (DistanceCheck::TransactionError, 300));
        let weak = MeasurementResult::success(900, DQF_THRESHOLD - 1);
        assert_eq!(check_distance(&weak, 300, 100), (DistanceCheck::DqfTooLow, 300));
    }

    // ====== Window ======

    #[test]
    fn failures_before_first_success_have_no_output() {
        let mut ranging = ContinuousRanging::with(config(4, 4, FilterPolicy::Average)).unwrap();
        let sample = ranging.process(&MeasurementResult::failure(RtbStatus::NoAck), Instant::from_millis(0));
        assert_eq!(sample.check, DistanceCheck::TransactionError);
        assert!(sample.filtered.is_none());
        assert!(!ranging.is_filled());

        let sample = ranging.process(&MeasurementResult::success(250, 70), Instant::from_millis(100));
        assert!(ranging.is_filled());
        assert_eq!(filtered(&sample).distance_cm, 250);
        assert_eq!(filtered(&sample).direction, Direction::Stationary);
    }

    #[test]
    fn sanity_check_runs_before_the_average() {
        let mut ranging = ContinuousRanging::with(config(5, 5, FilterPolicy::Average)).unwrap();
        let inputs = [(100, 80), (102, 82), (98, 79), (250, 5), (101, 81)];
        let mut samples = Vec::new();
        for (i, (distance, dqf)) in inputs.iter().enumerate() {
            let t = Instant::from_millis(100 * i as u64);
            samples.push(ranging.process(&MeasurementResult::success(*distance, *dqf), t));
        }

        assert_eq!(samples[3].check, DistanceCheck::DqfTooLow);
        assert_eq!(samples[3].window_value.map(|v| v.distance_cm), Some(100));
        let last = filtered(&samples[4]);
        // window 101, 100, 98, 102, 100
        assert_eq!(last.distance_cm, 100);
        // 81 + 5 + 79 + 82 + 80 = 327
        assert_eq!(last.dqf, 65);

        let jump = ranging.process(&MeasurementResult::success(250, 90), Instant::from_millis(500));
        assert_eq!(jump.check, DistanceCheck::TooLong);
        assert_eq!(jump.window_value.map(|v| v.distance_cm), Some(120));
        // 120 + 101 + 100 + 98 + 102 = 521
        assert_eq!(filtered(&jump).distance_cm, 104);
        assert_eq!(ranging.last_check(), DistanceCheck::TooLong);
    }

    #[test]
    fn filter_uses_only_newest_entries() {
        let mut ranging = ContinuousRanging::with(config(8, 2, FilterPolicy::Max)).unwrap();
        ranging.process(&MeasurementResult::success(400, 50), Instant::from_millis(0));
        ranging.process(&MeasurementResult::success(390, 60), Instant::from_millis(1000));
        let sample = ranging.process(&MeasurementResult::success(380, 70), Instant::from_millis(2000));
        let out = filtered(&sample);
        assert_eq!((out.distance_cm, out.dqf), (390, 60));
    }

    #[test]
    fn reset_requires_new_seed() {
        let mut ranging = ContinuousRanging::with(config(4, 4, FilterPolicy::Median)).unwrap();
        ranging.process(&MeasurementResult::success(300, 90), Instant::from_millis(0));
        ranging.reset();
        assert!(!ranging.is_filled());
        let sample = ranging.process(&MeasurementResult::success(50, 90), Instant::from_millis(100));
        assert_eq!(sample.check, DistanceCheck::Ok);
        assert_eq!(filtered(&sample).distance_cm, 50);
    }

    // ====== Speed ======

    #[test]
    fn twenty_centimeters_in_hundred_milliseconds_is_leaving() {
        let mut speed = SpeedEstimator::new();
        // 7.2 km/h averaged with three empty slots
        assert_eq!(speed.update(300, 280, 100), 2);
        speed.update(300, 280, 100);
        speed.update(300, 280, 100);
        let kmh = speed.update(300, 280, 100);
        assert_eq!(kmh, 7);
        assert_eq!(Direction::from_speed(kmh), Direction::Leaving);
    }

    #[test]
    fn decreasing_distance_is_approaching() {
        let mut speed = SpeedEstimator::new();
        for _ in 0..4 {
            speed.update(280, 300, 100);
        }
        let kmh = speed.update(280, 300, 100);
        assert_eq!(kmh, -7);
        assert_eq!(Direction::from_speed(kmh), Direction::Approaching);
        assert_eq!(Direction::from_speed(1), Direction::Stationary);
        assert_eq!(Direction::from_speed(-1), Direction::Stationary);
    }

    #[test]
    fn zero_elapsed_time_reports_no_speed() {
        let mut speed = SpeedEstimator::new();
        assert_eq!(speed.update(500, 100, 0), 0);
    }

    #[test]
    fn window_tracks_approaching_node() {
        let mut ranging = ContinuousRanging::with(config(4, 1, FilterPolicy::Average)).unwrap();
        ranging.process(&MeasurementResult::success(500, 90), Instant::from_millis(0));

        // -3.6 km/h averaged over four slots
        let second = ranging.process(&MeasurementResult::success(480, 90), Instant::from_millis(100));
        assert_eq!(second.check, DistanceCheck::Ok);
        assert_eq!(filtered(&second).speed_kmh, -1);
        assert_eq!(filtered(&second).direction, Direction::Stationary);

        // (-3.6 - 10.8) / 4
        let third = ranging.process(&MeasurementResult::success(460, 90), Instant::from_millis(200));
        assert_eq!(third.elapsed_ms, 100);
        assert_eq!(filtered(&third).speed_kmh, -4);
        assert_eq!(filtered(&third).direction, Direction::Approaching);
    }

    #[test]
    fn speed_does_not_depend_on_window_length() {
        // closing in by 15 cm every 100 ms
        let distances = [485, 470, 455, 440, 425];
        for window_len in 1..=4 {
            let mut ranging = ContinuousRanging::with(config(window_len, 1, FilterPolicy::Average)).unwrap();
            ranging.process(&MeasurementResult::success(500, 90), Instant::from_millis(0));
            let speeds: Vec<i32> = distances
                .iter()
                .enumerate()
                .map(|(i, &d)| {
                    let t = Instant::from_millis(100 * (i as u64 + 1));
                    filtered(&ranging.process(&MeasurementResult::success(d, 90), t)).speed_kmh
                })
                .collect();
            assert_eq!(speeds, vec![-1, -3, -5, -8, -10], "window_len {}", window_len);
        }
    }
}
