use crate::error::{PhysioError, PhysioResult};
use crate::signal::{PhysioRecord, ProcessingStep};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Parameters for threshold-relative peak detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakFindConfig {
    /// Fraction of the dynamic range a maximum must rise above the minimum.
    pub thresh: f64,
    /// Minimum physiological distance between two peaks (seconds).
    #[serde(default = "default_min_interval_s")]
    pub min_interval_s: f64,
}

fn default_min_interval_s() -> f64 {
    0.25
}

impl Default for PeakFindConfig {
    fn default() -> Self {
        Self {
            thresh: 0.2,
            min_interval_s: default_min_interval_s(),
        }
    }
}

impl PeakFindConfig {
    pub fn validate(&self) -> PhysioResult<()> {
        if !(0.0..=1.0).contains(&self.thresh) {
            return Err(PhysioError::invalid_parameter(format!(
                "thresh must lie in [0, 1], got {}",
                self.thresh
            )));
        }
        if !self.min_interval_s.is_finite() || self.min_interval_s < 0.0 {
            return Err(PhysioError::invalid_parameter(format!(
                "min_interval_s must be a non-negative number, got {}",
                self.min_interval_s
            )));
        }
        Ok(())
    }

    /// Refractory distance in samples for a given sampling rate.
    pub fn refractory_samples(&self, fs: f64) -> usize {
        (self.min_interval_s * fs).round().max(1.0) as usize
    }
}

/// Detect peaks and return a record whose `peaks`/`detected` hold the result.
pub fn peakfind_physio(record: &PhysioRecord, cfg: &PeakFindConfig) -> PhysioResult<PhysioRecord> {
    cfg.validate()?;
    let peaks = find_peaks(record.samples(), cfg.thresh, cfg.refractory_samples(record.fs()));
    log::debug!(
        "detected {} peak(s) with thresh={} over {} samples",
        peaks.len(),
        cfg.thresh,
        record.len()
    );
    let mut out = record.derive(
        record.samples().to_vec(),
        ProcessingStep::PeakFind {
            thresh: cfg.thresh,
            min_interval_s: cfg.min_interval_s,
        },
    );
    out.detected = peaks.clone();
    out.peaks = peaks;
    Ok(out)
}

/// Threshold-relative local maxima with refractory suppression.
pub fn find_peaks(data: &[f64], thresh: f64, refractory: usize) -> Vec<usize> {
    if data.len() < 3 {
        return Vec::new();
    }
    let min = data.iter().copied().fold(f64::INFINITY, f64::min);
    let max = data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let height = min + thresh * (max - min);

    let mut candidates: Vec<usize> = local_maxima(data)
        .into_iter()
        .filter(|&i| data[i] > height)
        .collect();
    candidates.sort_by(|&a, &b| data[b].total_cmp(&data[a]).then(a.cmp(&b)));

    let reach = refractory.max(1) - 1;
    let mut accepted = BTreeSet::new();
    for idx in candidates {
        let lower = idx.saturating_sub(reach);
        let upper = idx.saturating_add(reach);
        if accepted.range(lower..=upper).next().is_none() {
            accepted.insert(idx);
        }
    }
    accepted.into_iter().collect()
}

fn local_maxima(data: &[f64]) -> Vec<usize> {
    let mut out = Vec::new();
    for i in 1..data.len() - 1 {
        if data[i - 1] < data[i] && data[i] >= data[i + 1] {
            out.push(i);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn beats(fs: f64, times: &[f64], seconds: f64) -> Vec<f64> {
        let n = (fs * seconds) as usize;
        (0..n)
            .map(|i| {
                let t = i as f64 / fs;
                times
                    .iter()
                    .map(|bt| (-0.5 * ((t - bt) / 0.02).powi(2)).exp())
                    .sum::<f64>()
                    + 0.05 * (2.0 * std::f64::consts::PI * 0.3 * t).sin()
            })
            .collect()
    }

    #[test]
    fn detects_each_synthetic_beat() {
        let fs = 250.0;
        let times = [0.5, 1.3, 2.1, 2.95, 3.7];
        let record = PhysioRecord::new(beats(fs, &times, 4.5), fs).unwrap();
        let out = peakfind_physio(&record, &PeakFindConfig::default()).unwrap();
        let expected: Vec<usize> = times.iter().map(|t| (t * fs) as usize).collect();
        assert_eq!(out.peaks().len(), expected.len());
        for (got, want) in out.peaks().iter().zip(expected) {
            assert!(got.abs_diff(want) <= 1, "{got} vs {want}");
        }
        assert_eq!(out.detected(), out.peaks());
        assert!(out.rejected().is_empty());
    }

    #[test]
    fn refractory_keeps_taller_then_earlier() {
        let data = [0.0, 1.0, 0.0, 2.0, 0.0, 0.0, 0.0, 3.0, 0.0, 3.0, 0.0];
        assert_eq!(find_peaks(&data, 0.0, 3), vec![3, 7]);
        assert_eq!(find_peaks(&data, 0.0, 1), vec![1, 3, 7, 9]);
    }

    #[test]
    fn plateau_reports_first_sample() {
        let data = [0.0, 1.0, 1.0, 1.0, 0.0];
        assert_eq!(find_peaks(&data, 0.0, 1), vec![1]);
    }

    #[test]
    fn flat_signal_has_no_peaks() {
        assert!(find_peaks(&[1.0; 20], 0.2, 2).is_empty());
    }

    #[test]
    fn invalid_thresh_is_rejected() {
        let record = PhysioRecord::new(vec![0.0; 8], 10.0).unwrap();
        for thresh in [-0.1, 1.5, f64::NAN] {
            let cfg = PeakFindConfig {
                thresh,
                ..PeakFindConfig::default()
            };
            assert!(matches!(
                peakfind_physio(&record, &cfg),
                Err(PhysioError::InvalidParameter(_))
            ));
        }
    }

    #[test]
    fn random_signals_yield_sorted_in_range_peaks() {
        let mut rng = StdRng::seed_from_u64(7);
        for round in 0..50 {
            let n = rng.gen_range(3..400);
            let data: Vec<f64> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let thresh = round as f64 / 49.0;
            let refractory = rng.gen_range(1..20);
            let peaks = find_peaks(&data, thresh, refractory);
            assert!(peaks.windows(2).all(|w| w[1] - w[0] >= refractory));
            assert!(peaks.iter().all(|&p| p < n));
            let again = find_peaks(&data, thresh, refractory);
            assert_eq!(peaks, again);
        }
    }
}
