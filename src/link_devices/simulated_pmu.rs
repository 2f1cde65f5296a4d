//! # Simulated PMU
//!
//! Deterministic phase measurement unit for host tests.
//!
//! Every node produces the same per-frequency pattern, so the Initiator can
//! verify that the values it received from the Reflector arrived complete and
//! in order. When they do, the pair distance is the configured distance plus
//! two centimeters per antenna pair index; otherwise the pair is invalid.

use crate::confirm::MeasurementPair;
use crate::pmu::{MeasurementSide, PmuAdapter, PmuError, RangeParams, ValidityBitmap};
use crate::{MAX_ANTENNA_PAIRS, MAX_PMU_FREQUENCIES};

pub struct SimulatedPmu {
    distance_cm: u32,
    dqf: u8,
    params: Option<RangeParams>,
    side: MeasurementSide,
    averages: [[u8; MAX_PMU_FREQUENCIES]; MAX_ANTENNA_PAIRS],
    frequencies: usize,
    pairs: usize,
    fail_next: bool,
    measurement_count: usize,
}

impl SimulatedPmu {
    /// PMU reporting `distance_cm` with quality `dqf` for antenna pair 0
    pub fn with(distance_cm: u32, dqf: u8) -> Self {
        Self {
            distance_cm,
            dqf,
            params: None,
            side: MeasurementSide::Initiator,
            averages: [[0; MAX_PMU_FREQUENCIES]; MAX_ANTENNA_PAIRS],
            frequencies: 0,
            pairs: 0,
            fail_next: false,
            measurement_count: 0,
        }
    }

    /// Value measured at `index` of antenna pair `pair`
    pub fn sample(pair: usize, index: usize) -> u8 {
        (index * 3 + pair * 17) as u8
    }

    /// Lets the next `run_measurement` fail with a lost time synchronization
    pub fn fail_next_measurement(&mut self) {
        self.fail_next = true;
    }

    pub fn measurement_count(&self) -> usize {
        self.measurement_count
    }

    /// Side of the last configuration
    pub fn side(&self) -> MeasurementSide {
        self.side
    }

    pub fn is_configured(&self) -> bool {
        self.params.is_some()
    }
}

impl PmuAdapter for SimulatedPmu {
    fn configure(&mut self, params: &RangeParams, side: MeasurementSide) -> Result<(), PmuError> {
        self.params = Some(*params);
        self.side = side;
        Ok(())
    }

    fn run_measurement(&mut self) -> Result<(), PmuError> {
        if self.fail_next {
            self.fail_next = false;
            return Err(PmuError::SyncLost);
        }
        let params = self.params.ok_or(PmuError::NotConfigured)?;
        self.frequencies = params.sweep.frequency_count();
        self.pairs = params.antennas.len();
        for pair in 0..self.pairs {
            for index in 0..self.frequencies {
                self.averages[pair][index] = Self::sample(pair, index);
            }
        }
        self.measurement_count += 1;
        Ok(())
    }

    fn averages(&self, pair: usize) -> &[u8] {
        if pair < self.pairs {
            &self.averages[pair][..self.frequencies]
        } else {
            &[]
        }
    }

    fn validity(&self, pair: usize) -> ValidityBitmap {
        let mut bitmap = ValidityBitmap::with_len(self.averages(pair).len());
        for index in 0..bitmap.len() {
            bitmap.set(index, true);
        }
        bitmap
    }

    fn pair_distance(&mut self, _params: &RangeParams, pair: usize, local: &[u8], remote: &[u8]) -> MeasurementPair {
        let complete = !remote.is_empty()
            && remote.len() == local.len()
            && remote.iter().enumerate().all(|(index, &value)| value == Self::sample(pair, index));
        if complete {
            MeasurementPair {
                distance_cm: self.distance_cm + pair as u32 * 2,
                dqf: self.dqf,
            }
        } else {
            MeasurementPair::INVALID
        }
    }

    fn reset(&mut self) {
        self.params = None;
        self.frequencies = 0;
        self.pairs = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmu::{AntennaAssignment, Capabilities, FrequencySweep};

    fn params(caps: u8) -> RangeParams {
        RangeParams {
            sweep: FrequencySweep::with(2403, 2, 2443),
            apply_min_dist_threshold: true,
            antennas: AntennaAssignment::with(Capabilities(caps), MeasurementSide::Initiator, 0),
        }
    }

    #[test]
    fn measurement_requires_configuration() {
        let mut pmu = SimulatedPmu::with(100, 80);
        assert_eq!(pmu.run_measurement(), Err(PmuError::NotConfigured));
        pmu.configure(&params(0), MeasurementSide::Initiator).unwrap();
        pmu.run_measurement().unwrap();
        assert_eq!(pmu.averages(0).len(), 21);
        assert!(pmu.averages(1).is_empty());
        assert_eq!(pmu.validity(0).valid_count(), 21);
    }

    #[test]
    fn complete_remote_values_yield_distance() {
        let mut pmu = SimulatedPmu::with(100, 80);
        let p = params(3);
        pmu.configure(&p, MeasurementSide::Initiator).unwrap();
        pmu.run_measurement().unwrap();

        let local: Vec<u8> = pmu.averages(2).to_vec();
        let result = pmu.pair_distance(&p, 2, &local, &local);
        assert_eq!(result, MeasurementPair { distance_cm: 104, dqf: 80 });

        let truncated = &local[..10];
        assert!(!pmu.pair_distance(&p, 2, &local, truncated).is_valid());
    }

    #[test]
    fn injected_failure_hits_once() {
        let mut pmu = SimulatedPmu::with(100, 80);
        pmu.configure(&params(0), MeasurementSide::Reflector).unwrap();
        pmu.fail_next_measurement();
        assert_eq!(pmu.run_measurement(), Err(PmuError::SyncLost));
        assert_eq!(pmu.run_measurement(), Ok(()));
        assert_eq!(pmu.measurement_count(), 1);
    }
}
