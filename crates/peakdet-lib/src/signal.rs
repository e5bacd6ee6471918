use crate::editor::EditOp;
use crate::error::{PhysioError, PhysioResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Basic typed time series, as produced by the loaders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeries {
    /// Uniform sampling frequency in Hz
    pub fs: f64,
    /// Samples
    pub data: Vec<f64>,
}

impl TimeSeries {
    pub fn len(&self) -> usize {
        self.data.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMethod {
    Lowpass,
    Highpass,
    Bandpass,
}

impl fmt::Display for FilterMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FilterMethod::Lowpass => "lowpass",
            FilterMethod::Highpass => "highpass",
            FilterMethod::Bandpass => "bandpass",
        };
        f.write_str(name)
    }
}

/// Filter corner frequency (low/highpass) or band edges (bandpass), in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cutoffs {
    Single(f64),
    Band([f64; 2]),
}

impl Cutoffs {
    pub fn values(&self) -> Vec<f64> {
        match *self {
            Cutoffs::Single(f) => vec![f],
            Cutoffs::Band([lo, hi]) => vec![lo, hi],
        }
    }
}

impl fmt::Display for Cutoffs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cutoffs::Single(c) => write!(f, "{c} Hz"),
            Cutoffs::Band([lo, hi]) => write!(f, "[{lo}, {hi}] Hz"),
        }
    }
}

/// One entry of a record's provenance trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ProcessingStep {
    Load {
        source: String,
        #[serde(default)]
        channel: Option<String>,
    },
    Filter {
        cutoffs: Cutoffs,
        method: FilterMethod,
        order: usize,
    },
    PeakFind {
        thresh: f64,
        min_interval_s: f64,
    },
}

/// A single physiological channel together with its peak annotations.
///
/// `peaks` and `rejected` are strictly increasing and disjoint. `history`
/// replayed from `detected` reproduces both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysioRecord {
    pub(crate) samples: Vec<f64>,
    pub(crate) fs: f64,
    pub(crate) peaks: Vec<usize>,
    pub(crate) rejected: Vec<usize>,
    pub(crate) detected: Vec<usize>,
    pub(crate) history: Vec<EditOp>,
    pub(crate) provenance: Vec<ProcessingStep>,
}

impl PhysioRecord {
    pub fn new(samples: Vec<f64>, fs: f64) -> PhysioResult<Self> {
        if !fs.is_finite() || fs <= 0.0 {
            return Err(PhysioError::invalid_parameter(format!(
                "sampling rate must be positive, got {fs}"
            )));
        }
        if let Some(i) = samples.iter().position(|v| !v.is_finite()) {
            return Err(PhysioError::invalid_parameter(format!(
                "sample {i} is not finite ({})",
                samples[i]
            )));
        }
        Ok(Self {
            samples,
            fs,
            peaks: Vec::new(),
            rejected: Vec::new(),
            detected: Vec::new(),
            history: Vec::new(),
            provenance: Vec::new(),
        })
    }

    /// Wrap a loaded series, recording where it came from.
    pub fn from_series(ts: TimeSeries, load: ProcessingStep) -> PhysioResult<Self> {
        let mut record = Self::new(ts.data, ts.fs)?;
        record.provenance.push(load);
        Ok(record)
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }
    pub fn fs(&self) -> f64 {
        self.fs
    }
    pub fn len(&self) -> usize {
        self.samples.len()
    }
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
    pub fn peaks(&self) -> &[usize] {
        &self.peaks
    }
    pub fn rejected(&self) -> &[usize] {
        &self.rejected
    }
    /// Peak set as it was right after detection, before any edit.
    pub fn detected(&self) -> &[usize] {
        &self.detected
    }
    pub fn history(&self) -> &[EditOp] {
        &self.history
    }
    pub fn provenance(&self) -> &[ProcessingStep] {
        &self.provenance
    }

    /// Copy of this record carrying new samples and no annotations.
    pub(crate) fn derive(&self, samples: Vec<f64>, step: ProcessingStep) -> Self {
        let mut provenance = self.provenance.clone();
        provenance.push(step);
        Self {
            samples,
            fs: self.fs,
            peaks: Vec::new(),
            rejected: Vec::new(),
            detected: Vec::new(),
            history: Vec::new(),
            provenance,
        }
    }

    /// Check the ordering/range invariants of the annotation sets.
    pub fn validate(&self) -> PhysioResult<()> {
        let n = self.samples.len();
        for (name, set) in [
            ("peaks", &self.peaks),
            ("rejected", &self.rejected),
            ("detected", &self.detected),
        ] {
            if set.windows(2).any(|w| w[0] >= w[1]) {
                return Err(PhysioError::invalid_parameter(format!(
                    "{name} must be strictly increasing"
                )));
            }
            if let Some(&last) = set.last() {
                if last >= n {
                    return Err(PhysioError::invalid_index(
                        last,
                        format!("{name} index outside record of {n} samples"),
                    ));
                }
            }
        }
        if let Some(&dup) = self
            .rejected
            .iter()
            .find(|idx| self.peaks.binary_search(idx).is_ok())
        {
            return Err(PhysioError::invalid_index(
                dup,
                "index is both active and rejected",
            ));
        }
        Ok(())
    }
}

/// Inter-beat intervals derived from the active peaks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IbiSeries {
    /// Time of the beat closing each interval (seconds)
    pub times: Vec<f64>,
    /// Interval lengths (milliseconds)
    pub ibi: Vec<f64>,
}

impl IbiSeries {
    pub fn from_peaks(peaks: &[usize], fs: f64) -> Self {
        let mut times = Vec::with_capacity(peaks.len().saturating_sub(1));
        let mut ibi = Vec::with_capacity(peaks.len().saturating_sub(1));
        for w in peaks.windows(2) {
            let dt = (w[1] as f64 - w[0] as f64) / fs;
            times.push(w[1] as f64 / fs);
            ibi.push(dt * 1000.0);
        }
        Self { times, ibi }
    }

    pub fn len(&self) -> usize {
        self.ibi.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ibi.is_empty()
    }
}
