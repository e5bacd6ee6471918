use crate::error::{PhysioError, PhysioResult};
use crate::signal::{IbiSeries, PhysioRecord};
use realfft::RealFftPlanner;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

/// Rate of the uniform grid the IBI series is resampled onto (Hz).
pub const RESAMPLE_FS: f64 = 4.0;
pub const VLF_BAND: (f64, f64) = (0.0033, 0.04);
pub const LF_BAND: (f64, f64) = (0.04, 0.15);
pub const HF_BAND: (f64, f64) = (0.15, 0.4);
/// Shortest resampled series for which a spectrum is attempted.
pub const MIN_PSD_SAMPLES: usize = 16;
const MAX_SEGMENT: usize = 256;

/// Reportable HRV measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Avgnn,
    Rmssd,
    Sdnn,
    Sdsd,
    Nn50,
    Pnn50,
    Nn20,
    Pnn20,
    Hf,
    HfLog,
    Lf,
    LfLog,
    Vlf,
    VlfLog,
    Lftohf,
    HfPeak,
    LfPeak,
}

impl Metric {
    pub const ALL: [Metric; 17] = [
        Metric::Avgnn,
        Metric::Rmssd,
        Metric::Sdnn,
        Metric::Sdsd,
        Metric::Nn50,
        Metric::Pnn50,
        Metric::Nn20,
        Metric::Pnn20,
        Metric::Hf,
        Metric::HfLog,
        Metric::Lf,
        Metric::LfLog,
        Metric::Vlf,
        Metric::VlfLog,
        Metric::Lftohf,
        Metric::HfPeak,
        Metric::LfPeak,
    ];

    /// Column name used in reports.
    pub fn name(self) -> &'static str {
        match self {
            Metric::Avgnn => "avgnn",
            Metric::Rmssd => "rmssd",
            Metric::Sdnn => "sdnn",
            Metric::Sdsd => "sdsd",
            Metric::Nn50 => "nn50",
            Metric::Pnn50 => "pnn50",
            Metric::Nn20 => "nn20",
            Metric::Pnn20 => "pnn20",
            Metric::Hf => "hf",
            Metric::HfLog => "hf_log",
            Metric::Lf => "lf",
            Metric::LfLog => "lf_log",
            Metric::Vlf => "vlf",
            Metric::VlfLog => "vlf_log",
            Metric::Lftohf => "lftohf",
            Metric::HfPeak => "hf_peak",
            Metric::LfPeak => "lf_peak",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Metric::Avgnn => "Average NN intervals",
            Metric::Rmssd => "Root mean square of successive differences",
            Metric::Sdnn => "Standard deviation of NN intervals",
            Metric::Sdsd => "Standard deviation of successive differences",
            Metric::Nn50 => "Number of successive differences >50 ms",
            Metric::Pnn50 => "Percent of successive differences >50 ms",
            Metric::Nn20 => "Number of successive differences >20 ms",
            Metric::Pnn20 => "Percent of successive differences >20 ms",
            Metric::Hf => "High frequency HRV hfHRV",
            Metric::HfLog => "Log of high frequency HRV, log(hfHRV)",
            Metric::Lf => "Low frequency HRV, lfHRV",
            Metric::LfLog => "Log of low frequency HRV, log(lfHRV)",
            Metric::Vlf => "Very low frequency HRV, vlfHRV",
            Metric::VlfLog => "Log of very low frequency HRV, log(vlfHRV)",
            Metric::Lftohf => "Ratio of lfHRV : hfHRV",
            Metric::HfPeak => "Peak frequency of hfHRV",
            Metric::LfPeak => "Peak frequency of lfHRV",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = PhysioError;

    /// Accepts either the short column name or the long description.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Metric::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(needle) || m.description() == needle)
            .ok_or_else(|| PhysioError::Config(format!("unknown HRV metric '{needle}'")))
    }
}

/// HRV summary of one record. `None` marks a metric the data cannot define.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HrvMetrics {
    /// Number of inter-beat intervals
    pub n: usize,
    pub avgnn: f64,
    pub sdnn: f64,
    pub rmssd: Option<f64>,
    pub sdsd: Option<f64>,
    pub nn50: Option<f64>,
    pub pnn50: Option<f64>,
    pub nn20: Option<f64>,
    pub pnn20: Option<f64>,
    pub vlf: Option<f64>,
    pub vlf_log: Option<f64>,
    pub lf: Option<f64>,
    pub lf_log: Option<f64>,
    pub hf: Option<f64>,
    pub hf_log: Option<f64>,
    pub lftohf: Option<f64>,
    pub lf_peak: Option<f64>,
    pub hf_peak: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default)]
struct BandPower {
    power: f64,
    peak: f64,
}

impl HrvMetrics {
    /// Metrics from the active peaks of `record`; rejected indices never count.
    pub fn compute(record: &PhysioRecord) -> PhysioResult<Self> {
        let peaks = record.peaks();
        if peaks.len() < 2 {
            return Err(PhysioError::InsufficientData { peaks: peaks.len() });
        }
        let ibi = IbiSeries::from_peaks(peaks, record.fs());
        Ok(Self::from_ibi(&ibi))
    }

    pub fn from_ibi(ibi: &IbiSeries) -> Self {
        let rr = &ibi.ibi;
        let n = rr.len();
        let avgnn = mean(rr);
        let sdnn = std_dev(rr);

        let diffs: Vec<f64> = rr.windows(2).map(|w| w[1] - w[0]).collect();
        let defined = !diffs.is_empty();
        let when = |value: f64| defined.then_some(value);
        let count_over = |limit: f64| diffs.iter().filter(|d| d.abs() > limit).count() as f64;
        let nn50 = count_over(50.0);
        let nn20 = count_over(20.0);
        let rmssd = (diffs.iter().map(|d| d * d).sum::<f64>() / diffs.len().max(1) as f64).sqrt();

        let (freqs, psd) = welch_psd(&resample_ibi(ibi, RESAMPLE_FS), RESAMPLE_FS);
        let vlf = band_power(&freqs, &psd, VLF_BAND);
        let lf = band_power(&freqs, &psd, LF_BAND);
        let hf = band_power(&freqs, &psd, HF_BAND);

        Self {
            n,
            avgnn,
            sdnn,
            rmssd: when(rmssd),
            sdsd: when(std_dev(&diffs)),
            nn50: when(nn50),
            pnn50: when(nn50 / n as f64 * 100.0),
            nn20: when(nn20),
            pnn20: when(nn20 / n as f64 * 100.0),
            vlf: vlf.map(|b| b.power),
            vlf_log: vlf.map(|b| log_or_sentinel(b.power)),
            lf: lf.map(|b| b.power),
            lf_log: lf.map(|b| log_or_sentinel(b.power)),
            hf: hf.map(|b| b.power),
            hf_log: hf.map(|b| log_or_sentinel(b.power)),
            lftohf: match (lf, hf) {
                (Some(lf), Some(hf)) if hf.power > 0.0 => Some(lf.power / hf.power),
                _ => None,
            },
            lf_peak: lf.map(|b| b.peak),
            hf_peak: hf.map(|b| b.peak),
        }
    }

    pub fn get(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Avgnn => Some(self.avgnn),
            Metric::Sdnn => Some(self.sdnn),
            Metric::Rmssd => self.rmssd,
            Metric::Sdsd => self.sdsd,
            Metric::Nn50 => self.nn50,
            Metric::Pnn50 => self.pnn50,
            Metric::Nn20 => self.nn20,
            Metric::Pnn20 => self.pnn20,
            Metric::Hf => self.hf,
            Metric::HfLog => self.hf_log,
            Metric::Lf => self.lf,
            Metric::LfLog => self.lf_log,
            Metric::Vlf => self.vlf,
            Metric::VlfLog => self.vlf_log,
            Metric::Lftohf => self.lftohf,
            Metric::HfPeak => self.hf_peak,
            Metric::LfPeak => self.lf_peak,
        }
    }
}

/// `ln(x)`, with `ln(0)` reported as negative infinity instead of failing.
fn log_or_sentinel(value: f64) -> f64 {
    if value > 0.0 {
        value.ln()
    } else {
        f64::NEG_INFINITY
    }
}

fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Population standard deviation.
fn std_dev(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let m = mean(data);
    (data.iter().map(|x| (x - m).powi(2)).sum::<f64>() / data.len() as f64).sqrt()
}

/// Linear interpolation of the IBI series onto a uniform grid starting at the first beat.
fn resample_ibi(ibi: &IbiSeries, fs: f64) -> Vec<f64> {
    let (times, values) = (&ibi.times, &ibi.ibi);
    if times.len() < 2 {
        return Vec::new();
    }
    let t0 = times[0];
    let span = times[times.len() - 1] - t0;
    let n = (span * fs).floor() as usize + 1;
    let mut out = Vec::with_capacity(n);
    let mut idx = 0;
    for i in 0..n {
        let t = t0 + i as f64 / fs;
        while idx + 2 < times.len() && times[idx + 1] < t {
            idx += 1;
        }
        let (ta, tb) = (times[idx], times[idx + 1]);
        let frac = if tb > ta {
            ((t - ta) / (tb - ta)).clamp(0.0, 1.0)
        } else {
            0.0
        };
        out.push(values[idx] + frac * (values[idx + 1] - values[idx]));
    }
    out
}

/// Welch power spectral density (Hann window, 50% overlap, density scaling).
fn welch_psd(signal: &[f64], fs: f64) -> (Vec<f64>, Vec<f64>) {
    let n = signal.len();
    if n < MIN_PSD_SAMPLES {
        return (Vec::new(), Vec::new());
    }
    let centre = mean(signal);
    let detrended: Vec<f64> = signal.iter().map(|x| x - centre).collect();

    let window = n.min(MAX_SEGMENT);
    let step = (window / 2).max(1);
    let window_func = hann(window);
    let scale = 1.0 / (fs * window_func.iter().map(|w| w * w).sum::<f64>());
    let mut planner = RealFftPlanner::<f64>::new();
    let r2c = planner.plan_fft_forward(window);
    let mut spectrum = r2c.make_output_vec();
    let freqs: Vec<f64> = (0..spectrum.len())
        .map(|k| k as f64 * fs / window as f64)
        .collect();
    let mut powers = vec![0.0; spectrum.len()];

    let mut pos = 0;
    let mut segments = 0;
    while pos + window <= n {
        let mut frame: Vec<f64> = detrended[pos..pos + window]
            .iter()
            .zip(window_func.iter())
            .map(|(x, w)| x * w)
            .collect();
        if r2c.process(&mut frame, &mut spectrum).is_err() {
            return (Vec::new(), Vec::new());
        }
        for (k, val) in spectrum.iter().enumerate() {
            let one_sided = if k == 0 || (window % 2 == 0 && k == window / 2) {
                1.0
            } else {
                2.0
            };
            powers[k] += one_sided * val.norm_sqr() * scale;
        }
        segments += 1;
        pos += step;
    }
    for p in powers.iter_mut() {
        *p /= segments as f64;
    }
    (freqs, powers)
}

fn hann(size: usize) -> Vec<f64> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / (size as f64)).cos()))
        .collect()
}

/// Rectangle-rule power over `[lo, hi)`; `None` when no bin falls in the band.
fn band_power(freqs: &[f64], powers: &[f64], band: (f64, f64)) -> Option<BandPower> {
    let df = freqs.get(1).copied()?;
    let mut total = 0.0;
    let mut best: Option<(f64, f64)> = None;
    for (&f, &p) in freqs.iter().zip(powers) {
        if f < band.0 || f >= band.1 {
            continue;
        }
        total += p * df;
        if best.map_or(true, |(_, bp)| p > bp) {
            best = Some((f, p));
        }
    }
    best.map(|(peak, _)| BandPower { power: total, peak })
}
