//! # Distance Filters
//!
//! Statistical reduction of several (distance, DQF) samples into one. Used for
//! the continuous ranging window and for combining antenna pairs of a single
//! measurement.
//!
//! All arithmetic is integer: results are truncated like the fixed-point
//! integer conversions they replace, except the DQF mean of [`FilterPolicy::Average`],
//! which is rounded to the nearest percent.

use crate::confirm::MeasurementPair;

/// Largest number of samples a filter reduces at once
pub const MAX_FILTER_LEN: usize = 16;

/// Variance scale of the minimum-variance blend
///
/// Applied to distance variance (cm²) and DQF variance (%²) alike.
pub const MIN_VARIANCE_THRESHOLD: u64 = 100;

#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum FilterPolicy {
    /// Mean distance and rounded mean DQF
    Average,
    /// Median of distances and of DQFs
    Median,
    /// Smallest distance with the DQF of that sample
    Min,
    /// Largest distance with the DQF of that sample
    Max,
    /// Blend of mean and minimum weighted by the sample variance
    MinVariance,
}

/// Reduces `samples` with the given policy
///
/// # Returns
/// `None` for an empty slice. At most [`MAX_FILTER_LEN`] samples are used.
pub fn apply(policy: FilterPolicy, samples: &[MeasurementPair]) -> Option<MeasurementPair> {
    let samples = &samples[..samples.len().min(MAX_FILTER_LEN)];
    if samples.is_empty() {
        return None;
    }
    Some(match policy {
        FilterPolicy::Average => average(samples),
        FilterPolicy::Median => median(samples),
        FilterPolicy::Min => extremum(samples, |candidate, best| candidate < best),
        FilterPolicy::Max => extremum(samples, |candidate, best| candidate > best),
        FilterPolicy::MinVariance => min_variance(samples),
    })
}

fn average(samples: &[MeasurementPair]) -> MeasurementPair {
    let n = samples.len() as u64;
    let distance_sum: u64 = samples.iter().map(|s| s.distance_cm as u64).sum();
    let dqf_sum: u64 = samples.iter().map(|s| s.dqf as u64).sum();
    MeasurementPair {
        distance_cm: (distance_sum / n) as u32,
        dqf: ((dqf_sum + n / 2) / n) as u8,
    }
}

fn median_of(values: &mut [u32]) -> u32 {
    values.sort_unstable();
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        ((values[mid - 1] as u64 + values[mid] as u64) / 2) as u32
    }
}

fn median(samples: &[MeasurementPair]) -> MeasurementPair {
    let mut distances = [0u32; MAX_FILTER_LEN];
    let mut dqfs = [0u32; MAX_FILTER_LEN];
    for (i, sample) in samples.iter().enumerate() {
        distances[i] = sample.distance_cm;
        dqfs[i] = sample.dqf as u32;
    }
    let n = samples.len();
    MeasurementPair {
        distance_cm: median_of(&mut distances[..n]),
        dqf: median_of(&mut dqfs[..n]) as u8,
    }
}

/// First sample whose distance beats all others by `better`
fn extremum(samples: &[MeasurementPair], better: impl Fn(u32, u32) -> bool) -> MeasurementPair {
    let mut best = samples[0];
    for sample in &samples[1..] {
        if better(sample.distance_cm, best.distance_cm) {
            best = *sample;
        }
    }
    best
}

/// Mean, population variance and minimum of a value series
fn statistics(values: impl Iterator<Item = u64> + Clone) -> (u64, u64, u64) {
    let (n, sum, min) = values.clone().fold((0u64, 0u64, u64::MAX), |(n, sum, min), v| (n + 1, sum + v, min.min(v)));
    let mean = sum / n;
    let sum_sqr: u64 = values
        .map(|v| {
            let deviation = v as i64 - mean as i64;
            (deviation * deviation) as u64
        })
        .sum();
    (mean, sum_sqr / n, min)
}

/// `w·mean + (1 − w)·min` with `w = T / (T + variance)`
fn blend(mean: u64, variance: u64, min: u64) -> u64 {
    (MIN_VARIANCE_THRESHOLD * mean + variance * min) / (MIN_VARIANCE_THRESHOLD + variance)
}

fn min_variance(samples: &[MeasurementPair]) -> MeasurementPair {
    let (distance_mean, distance_var, distance_min) = statistics(samples.iter().map(|s| s.distance_cm as u64));
    let (dqf_mean, dqf_var, dqf_min) = statistics(samples.iter().map(|s| s.dqf as u64));
    MeasurementPair {
        distance_cm: blend(distance_mean, distance_var, distance_min) as u32,
        dqf: blend(dqf_mean, dqf_var, dqf_min) as u8,
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    fn samples(distances: &[u32], dqfs: &[u8]) -> Vec<MeasurementPair> {
        distances
            .iter()
            .zip(dqfs)
            .map(|(&distance_cm, &dqf)| MeasurementPair { distance_cm, dqf })
            .collect()
    }

    #[test]
    fn average_of_unfiltered_window() {
        let window = samples(&[100, 102, 98, 250, 101], &[80, 82, 79, 5, 81]);
        let result = apply(FilterPolicy::Average, &window).unwrap();
        assert_eq!(result.distance_cm, 130);
        // 327 / 5 = 65.4
        assert_eq!(result.dqf, 65);
    }

    #[test]
    fn average_dqf_is_rounded() {
        let window = samples(&[10, 10], &[50, 51]);
        assert_eq!(apply(FilterPolicy::Average, &window).unwrap().dqf, 51);
    }

    #[test]
    fn median_even_and_odd() {
        let even = samples(&[40, 10, 30, 20], &[1, 2, 3, 4]);
        assert_eq!(apply(FilterPolicy::Median, &even).unwrap().distance_cm, 25);
        let odd = samples(&[30, 10, 20], &[1, 2, 3]);
        assert_eq!(apply(FilterPolicy::Median, &odd).unwrap().distance_cm, 20);
        assert_eq!(apply(FilterPolicy::Median, &odd).unwrap().dqf, 2);
    }

    #[test]
    fn min_and_max_keep_dqf_of_that_sample() {
        let window = samples(&[120, 95, 130, 101], &[90, 20, 40, 99]);
        let min = apply(FilterPolicy::Min, &window).unwrap();
        assert_eq!((min.distance_cm, min.dqf), (95, 20));
        let max = apply(FilterPolicy::Max, &window).unwrap();
        assert_eq!((max.distance_cm, max.dqf), (130, 40));
    }

    #[test]
    fn min_variance_without_spread_is_the_mean() {
        let window = samples(&[200, 200, 200], &[70, 70, 70]);
        let result = apply(FilterPolicy::MinVariance, &window).unwrap();
        assert_eq!((result.distance_cm, result.dqf), (200, 70));
    }

    #[test]
    fn min_variance_leans_towards_minimum_with_spread() {
        // mean 110, variance 100 (deviations -10, +10), min 100
        let window = samples(&[100, 120], &[80, 80]);
        let result = apply(FilterPolicy::MinVariance, &window).unwrap();
        // w = 0.5: 0.5 * 110 + 0.5 * 100
        assert_eq!(result.distance_cm, 105);
        assert_eq!(result.dqf, 80);
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(apply(FilterPolicy::Average, &[]).is_none());
    }
}
