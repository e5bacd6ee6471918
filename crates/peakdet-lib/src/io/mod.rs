pub mod rtpeaks;
pub mod tabular;
pub mod text;

use crate::signal::{PhysioRecord, ProcessingStep, TimeSeries};
use anyhow::{bail, Context, Result};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Raw input layouts understood by the loaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Tab-separated columns plus a JSON sidecar.
    Tabular,
    Rtpeaks,
    Text,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::Tabular, Source::Rtpeaks, Source::Text];

    pub fn name(self) -> &'static str {
        match self {
            Source::Tabular => "tabular",
            Source::Rtpeaks => "rtpeaks",
            Source::Text => "text",
        }
    }

    /// Whether the source needs an explicit sampling rate.
    pub fn needs_fs(self) -> bool {
        !matches!(self, Source::Tabular)
    }

    /// Load every channel `path` contributes under `opts`.
    pub fn load(self, path: &Path, opts: &LoadOptions) -> Result<Vec<Channel>> {
        let single = |ts: TimeSeries| -> Result<Vec<Channel>> {
            let load = ProcessingStep::Load {
                source: self.name().to_string(),
                channel: None,
            };
            Ok(vec![Channel {
                column: None,
                record: PhysioRecord::from_series(ts, load)?,
            }])
        };
        match self {
            Source::Text => single(text::load_text(path, self.required_fs(opts)?)?),
            Source::Rtpeaks => single(rtpeaks::load_rtpeaks(
                path,
                self.required_fs(opts)?,
                opts.channel,
            )?),
            Source::Tabular => load_tabular_channels(path, opts),
        }
    }

    fn required_fs(self, opts: &LoadOptions) -> Result<f64> {
        opts.fs
            .with_context(|| format!("a sampling rate is required for {} input", self.name()))
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let needle = s.trim();
        // "MRI" is the historical name of the tabular layout.
        if needle.eq_ignore_ascii_case("mri") {
            return Ok(Source::Tabular);
        }
        Source::ALL
            .into_iter()
            .find(|src| src.name().eq_ignore_ascii_case(needle))
            .ok_or_else(|| {
                let names: Vec<_> = Source::ALL.iter().map(|s| s.name()).collect();
                format!("unknown source '{needle}', expected one of {}", names.join(", "))
            })
    }
}

/// Loader parameters; each source reads the fields it needs.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOptions {
    pub fs: Option<f64>,
    /// rtpeaks analog channel
    pub channel: usize,
    /// Tabular columns to keep; disables time/trigger dropping.
    pub phys_idx: Option<Vec<usize>>,
    /// Tabular trigger column; `None` searches by column name.
    pub chtrig: Option<usize>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            fs: None,
            channel: 1,
            phys_idx: None,
            chtrig: None,
        }
    }
}

/// One loaded channel. `column` is set for tabular inputs.
#[derive(Debug, Clone)]
pub struct Channel {
    pub column: Option<String>,
    pub record: PhysioRecord,
}

fn load_tabular_channels(path: &Path, opts: &LoadOptions) -> Result<Vec<Channel>> {
    let recording = tabular::load_tabular(path)?;
    let recording = match &opts.phys_idx {
        Some(indices) => recording.select(indices)?,
        None => {
            let trigger = match opts.chtrig {
                Some(idx) if idx >= recording.columns.len() => bail!(
                    "trigger column {} out of range for {} columns",
                    idx,
                    recording.columns.len()
                ),
                Some(idx) => Some(idx),
                None => {
                    log::info!("running automatic trigger detection on {}", path.display());
                    let found = recording.find_trigger();
                    if found.is_none() {
                        log::warn!(
                            "no trigger channel given or found in {}; keeping all non-time columns",
                            path.display()
                        );
                    }
                    found
                }
            };
            recording.drop_time_and_trigger(trigger)
        }
    };
    if recording.columns.is_empty() {
        bail!("{} has no signal columns left to process", path.display());
    }
    recording
        .into_series()
        .into_iter()
        .map(|(name, ts)| {
            let load = ProcessingStep::Load {
                source: Source::Tabular.name().to_string(),
                channel: Some(name.clone()),
            };
            let record = PhysioRecord::from_series(ts, load)
                .with_context(|| format!("column '{name}' of {}", path.display()))?;
            Ok(Channel {
                column: Some(name),
                record,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn parses_source_names() {
        assert_eq!("rtpeaks".parse::<Source>().unwrap(), Source::Rtpeaks);
        assert_eq!("MRI".parse::<Source>().unwrap(), Source::Tabular);
        assert!("edf".parse::<Source>().is_err());
    }

    #[test]
    fn text_requires_sampling_rate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sig.txt");
        fs::write(&path, "1\n2\n3\n").unwrap();
        assert!(Source::Text.load(&path, &LoadOptions::default()).is_err());
        let opts = LoadOptions {
            fs: Some(50.0),
            ..LoadOptions::default()
        };
        let channels = Source::Text.load(&path, &opts).unwrap();
        assert_eq!(channels.len(), 1);
        assert!(channels[0].column.is_none());
        assert_eq!(channels[0].record.fs(), 50.0);
        assert_eq!(channels[0].record.provenance().len(), 1);
    }

    #[test]
    fn tabular_drops_time_and_detected_trigger() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.tsv");
        fs::write(&path, "0\t0\t1\n0.5\t1\t2\n").unwrap();
        fs::write(
            dir.path().join("run.json"),
            r#"{"Columns": ["time", "trigger", "cardiac"], "SamplingFrequency": 2}"#,
        )
        .unwrap();
        let channels = Source::Tabular.load(&path, &LoadOptions::default()).unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].column.as_deref(), Some("cardiac"));
        assert_eq!(channels[0].record.samples(), &[1.0, 2.0]);

        let opts = LoadOptions {
            phys_idx: Some(vec![1, 2]),
            ..LoadOptions::default()
        };
        let picked = Source::Tabular.load(&path, &opts).unwrap();
        assert_eq!(picked.len(), 2);

        let bad = LoadOptions {
            chtrig: Some(9),
            ..LoadOptions::default()
        };
        assert!(Source::Tabular.load(&path, &bad).is_err());
    }
}
