//! Single-shot result calculation: one distance per antenna pair, combined
//! into the reported distance.

use crate::confirm::{AntennaPairResults, MeasurementPair, MeasurementResult};
use crate::filters::{self, FilterPolicy};
use crate::pmu::{PmuAdapter, RangeParams, RemoteResults};
use crate::{MAX_ANTENNA_PAIRS, MAX_PMU_FREQUENCIES};

/// Distance of every measured antenna pair
///
/// # Arguments
/// * `pmu` - Adapter holding the local averages
/// * `params` - Parameters of the finished transaction
/// * `remote` - Averages received from the Reflector
pub fn pair_distances<P: PmuAdapter>(pmu: &mut P, params: &RangeParams, remote: &RemoteResults) -> AntennaPairResults {
    let mut pairs = AntennaPairResults::new();
    for pair in 0..params.antennas.len() {
        // averages borrow the adapter, pair_distance needs it mutably
        let mut local = [0u8; MAX_PMU_FREQUENCIES];
        let averages = pmu.averages(pair);
        let n = averages.len().min(local.len());
        local[..n].copy_from_slice(&averages[..n]);
        pairs.push(pmu.pair_distance(params, pair, &local[..n], remote.values(pair)));
    }
    pairs
}

/// Combines per-pair results into the reported measurement
///
/// Invalid pairs are ignored. Without any valid pair the measurement fails.
/// The pairs are attached when `provide_pairs` is set and more than one pair
/// was measured.
pub fn combine(policy: FilterPolicy, pairs: &AntennaPairResults, provide_pairs: bool) -> MeasurementResult {
    let mut valid = [MeasurementPair::INVALID; MAX_ANTENNA_PAIRS];
    let mut count = 0;
    for pair in pairs.as_slice().iter().filter(|p| p.is_valid()) {
        valid[count] = *pair;
        count += 1;
    }

    let combined = match filters::apply(policy, &valid[..count]) {
        Some(combined) => combined,
        None => MeasurementPair::INVALID,
    };
    let result = MeasurementResult::success(combined.distance_cm, combined.dqf);
    if provide_pairs && pairs.len() > 1 {
        result.with_pairs(*pairs)
    } else {
        result
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::status::RtbStatus;

    fn results(values: &[(u32, u8)]) -> AntennaPairResults {
        let mut pairs = AntennaPairResults::new();
        for &(distance_cm, dqf) in values {
            pairs.push(MeasurementPair { distance_cm, dqf });
        }
        pairs
    }

    #[test]
    fn single_pair_is_reported_as_is() {
        let result = combine(FilterPolicy::MinVariance, &results(&[(321, 77)]), true);
        assert_eq!(result.distance_cm(), 321);
        assert_eq!(result.dqf(), 77);
        assert!(result.pairs().is_empty());
    }

    #[test]
    fn invalid_pairs_are_skipped() {
        let pairs = results(&[(200, 80), (crate::confirm::INVALID_DISTANCE, 0), (220, 60)]);
        let result = combine(FilterPolicy::Average, &pairs, false);
        assert_eq!(result.distance_cm(), 210);
        assert_eq!(result.dqf(), 70);
    }

    #[test]
    fn no_valid_pair_fails() {
        let pairs = results(&[(crate::confirm::INVALID_DISTANCE, 0)]);
        let result = combine(FilterPolicy::Average, &pairs, true);
        assert_eq!(result.status(), RtbStatus::Reject);
        assert_eq!(result.distance_cm(), crate::confirm::INVALID_DISTANCE);
    }

    #[test]
    fn pairs_attached_only_when_requested() {
        let pairs = results(&[(150, 90), (170, 40)]);
        assert_eq!(combine(FilterPolicy::Min, &pairs, true).pairs().len(), 2);
        assert!(combine(FilterPolicy::Min, &pairs, false).pairs().is_empty());
        assert_eq!(combine(FilterPolicy::Min, &pairs, false).dqf(), 90);
    }
}
