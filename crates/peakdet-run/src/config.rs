use anyhow::{Context, Result};
use peakdet_lib::detectors::peaks::{peakfind_physio, PeakFindConfig};
use peakdet_lib::filter::{filter_physio, DEFAULT_ORDER};
use peakdet_lib::{Cutoffs, FilterMethod, PhysioError, PhysioRecord, PhysioResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Config key whose plan applies to every channel without its own entry.
pub const ANY_CHANNEL: &str = "*";

fn default_order() -> usize {
    DEFAULT_ORDER
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterStep {
    pub cutoffs: Cutoffs,
    pub method: FilterMethod,
    #[serde(default = "default_order")]
    pub order: usize,
}

/// One processing step, written `{"filter": {...}}` or `{"peakfind": {...}}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Filter(FilterStep),
    Peakfind(PeakFindConfig),
}

impl Step {
    fn kind(&self) -> &'static str {
        match self {
            Step::Filter(_) => "filter",
            Step::Peakfind(_) => "peakfind",
        }
    }

    pub fn apply(&self, record: &PhysioRecord) -> PhysioResult<PhysioRecord> {
        match self {
            Step::Filter(f) => filter_physio(record, f.cutoffs, f.method, f.order),
            Step::Peakfind(cfg) => peakfind_physio(record, cfg),
        }
    }
}

/// Built-in plans for the supported recording modalities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    Ecg,
    Ppg,
    Resp,
}

impl Modality {
    pub const ALL: [Modality; 3] = [Modality::Ecg, Modality::Ppg, Modality::Resp];

    pub fn name(self) -> &'static str {
        match self {
            Modality::Ecg => "ECG",
            Modality::Ppg => "PPG",
            Modality::Resp => "RESP",
        }
    }

    pub fn filter(self) -> FilterStep {
        let (cutoffs, method) = match self {
            Modality::Ecg => (Cutoffs::Band([5.0, 15.0]), FilterMethod::Bandpass),
            Modality::Ppg => (Cutoffs::Single(2.0), FilterMethod::Lowpass),
            Modality::Resp => (Cutoffs::Band([0.05, 0.5]), FilterMethod::Bandpass),
        };
        FilterStep {
            cutoffs,
            method,
            order: DEFAULT_ORDER,
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Modality {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Modality::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown modality '{s}', expected ECG, PPG or RESP"))
    }
}

/// Per-channel processing plans keyed by channel (column) name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessingConfig {
    pub channels: BTreeMap<String, Vec<Step>>,
}

impl ProcessingConfig {
    /// Read and validate a JSON config, or TOML when the extension is `.toml`.
    pub fn read(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = if path.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str(&contents)
                .with_context(|| format!("parsing config {}", path.display()))?
        } else {
            serde_json::from_str(&contents)
                .with_context(|| format!("parsing config {}", path.display()))?
        };
        config
            .validate()
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    /// Filter preset for `modality` followed by detection at `thresh`.
    pub fn from_modality(modality: Modality, thresh: f64) -> Self {
        let steps = vec![
            Step::Filter(modality.filter()),
            Step::Peakfind(PeakFindConfig {
                thresh,
                ..PeakFindConfig::default()
            }),
        ];
        Self {
            channels: BTreeMap::from([(ANY_CHANNEL.to_string(), steps)]),
        }
    }

    pub fn validate(&self) -> PhysioResult<()> {
        if self.channels.is_empty() {
            return Err(PhysioError::Config("config defines no channels".into()));
        }
        for (channel, steps) in &self.channels {
            validate_plan(channel, steps)?;
        }
        Ok(())
    }

    /// Plan for `channel`, falling back to the catch-all entry.
    pub fn plan_for(&self, channel: Option<&str>) -> Option<&[Step]> {
        channel
            .and_then(|name| self.channels.get(name))
            .or_else(|| self.channels.get(ANY_CHANNEL))
            .map(Vec::as_slice)
    }
}

fn validate_plan(channel: &str, steps: &[Step]) -> PhysioResult<()> {
    let fail = |idx: usize, step: &Step, msg: String| {
        PhysioError::Config(format!(
            "channel '{channel}' step {} ({}): {msg}",
            idx + 1,
            step.kind()
        ))
    };
    if steps.is_empty() {
        return Err(PhysioError::Config(format!(
            "channel '{channel}' has no processing steps"
        )));
    }
    let detections = steps.iter().filter(|s| matches!(s, Step::Peakfind(_))).count();
    if detections != 1 || !matches!(steps.last(), Some(Step::Peakfind(_))) {
        return Err(PhysioError::Config(format!(
            "channel '{channel}' must end with exactly one peakfind step"
        )));
    }
    for (idx, step) in steps.iter().enumerate() {
        match step {
            Step::Filter(f) => {
                let values = f.cutoffs.values();
                if values.iter().any(|c| !c.is_finite() || *c <= 0.0) {
                    return Err(fail(idx, step, format!("cutoffs must be positive, got {}", f.cutoffs)));
                }
                match (f.method, f.cutoffs) {
                    (FilterMethod::Bandpass, Cutoffs::Band([lo, hi])) if lo < hi => {}
                    (FilterMethod::Bandpass, _) => {
                        return Err(fail(
                            idx,
                            step,
                            "bandpass needs two increasing cutoffs".into(),
                        ))
                    }
                    (_, Cutoffs::Single(_)) => {}
                    (method, _) => {
                        return Err(fail(idx, step, format!("{method} needs exactly one cutoff")))
                    }
                }
                if f.order == 0 {
                    return Err(fail(idx, step, "order must be at least 1".into()));
                }
            }
            Step::Peakfind(cfg) => cfg.validate().map_err(|e| fail(idx, step, e.to_string()))?,
        }
    }
    Ok(())
}

/// Run every step of `plan` in order.
pub fn run_plan(record: &PhysioRecord, plan: &[Step]) -> PhysioResult<PhysioRecord> {
    let mut current = record.clone();
    for step in plan {
        current = step.apply(&current)?;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn reads_json_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        fs::write(
            &path,
            r#"{"cardiac": [
                {"filter": {"cutoffs": [5, 15], "method": "bandpass"}},
                {"peakfind": {"thresh": 0.3}}
            ]}"#,
        )
        .unwrap();
        let cfg = ProcessingConfig::read(&path).unwrap();
        let plan = cfg.plan_for(Some("cardiac")).unwrap();
        assert_eq!(plan.len(), 2);
        match plan[0] {
            Step::Filter(f) => {
                assert_eq!(f.cutoffs, Cutoffs::Band([5.0, 15.0]));
                assert_eq!(f.order, DEFAULT_ORDER);
            }
            other => panic!("unexpected step {other:?}"),
        }
        assert!(cfg.plan_for(Some("respiratory")).is_none());
    }

    #[test]
    fn reads_toml_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        fs::write(
            &path,
            r#"
[[respiratory]]
filter = { cutoffs = 0.5, method = "lowpass", order = 3 }

[[respiratory]]
peakfind = { thresh = 0.1, min_interval_s = 1.5 }
"#,
        )
        .unwrap();
        let cfg = ProcessingConfig::read(&path).unwrap();
        let plan = cfg.plan_for(Some("respiratory")).unwrap();
        assert_eq!(
            plan[1],
            Step::Peakfind(PeakFindConfig {
                thresh: 0.1,
                min_interval_s: 1.5
            })
        );
    }

    #[test]
    fn rejects_missing_peakfind() {
        let cfg = ProcessingConfig {
            channels: BTreeMap::from([(
                "ecg".to_string(),
                vec![Step::Filter(Modality::Ecg.filter())],
            )]),
        };
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("ecg"), "{err}");
        assert!(err.contains("peakfind"), "{err}");
    }

    #[test]
    fn rejects_bad_filter_steps() {
        let plan = |filter: FilterStep| ProcessingConfig {
            channels: BTreeMap::from([(
                "x".to_string(),
                vec![
                    Step::Filter(filter),
                    Step::Peakfind(PeakFindConfig::default()),
                ],
            )]),
        };
        let reversed = plan(FilterStep {
            cutoffs: Cutoffs::Band([15.0, 5.0]),
            method: FilterMethod::Bandpass,
            order: 2,
        });
        assert!(reversed.validate().unwrap_err().to_string().contains("step 1"));
        let single_band = plan(FilterStep {
            cutoffs: Cutoffs::Single(5.0),
            method: FilterMethod::Bandpass,
            order: 2,
        });
        assert!(single_band.validate().is_err());
        let two_lowpass = plan(FilterStep {
            cutoffs: Cutoffs::Band([1.0, 2.0]),
            method: FilterMethod::Lowpass,
            order: 2,
        });
        assert!(two_lowpass.validate().is_err());
        let negative = plan(FilterStep {
            cutoffs: Cutoffs::Single(-1.0),
            method: FilterMethod::Highpass,
            order: 2,
        });
        assert!(negative.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let cfg = ProcessingConfig::from_modality(Modality::Ppg, 1.5);
        assert!(cfg.validate().is_err());
        assert!(ProcessingConfig::from_modality(Modality::Ppg, 0.2).validate().is_ok());
    }

    #[test]
    fn modality_preset_applies_to_any_channel() {
        let cfg = ProcessingConfig::from_modality(Modality::Resp, 0.2);
        let plan = cfg.plan_for(Some("whatever")).unwrap();
        assert_eq!(plan[0], Step::Filter(Modality::Resp.filter()));
        assert_eq!(cfg.plan_for(None), Some(plan));
        assert_eq!("ecg".parse::<Modality>().unwrap(), Modality::Ecg);
    }

    #[test]
    fn plan_runs_filter_then_detection() {
        let fs = 100.0;
        let samples: Vec<f64> = (0..1000)
            .map(|i| (2.0 * std::f64::consts::PI * 1.0 * i as f64 / fs).sin())
            .collect();
        let record = PhysioRecord::new(samples, fs).unwrap();
        let cfg = ProcessingConfig::from_modality(Modality::Ppg, 0.5);
        let out = run_plan(&record, cfg.plan_for(None).unwrap()).unwrap();
        assert_eq!(out.provenance().len(), 2);
        assert!((8..=11).contains(&out.peaks().len()), "{:?}", out.peaks());
        assert_eq!(out.peaks(), out.detected());
    }
}
