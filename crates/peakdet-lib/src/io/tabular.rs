//! Column-oriented recordings with a JSON sidecar (phys2bids layout).

use crate::signal::TimeSeries;
use anyhow::{bail, Context, Result};
use csv::{ReaderBuilder, Trim};
use serde::Deserialize;
use std::fs::File;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum SamplingFrequency {
    Scalar(f64),
    PerColumn(Vec<f64>),
}

#[derive(Debug, Clone, Deserialize)]
struct Sidecar {
    #[serde(rename = "Columns")]
    columns: Vec<String>,
    #[serde(rename = "SamplingFrequency")]
    sampling_frequency: SamplingFrequency,
}

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub fs: f64,
    pub data: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct TabularRecording {
    pub columns: Vec<Column>,
}

const TRIGGER_NAMES: [&str; 3] = ["trigger", "trig", "ttl"];

/// `<dir>/<name up to the first dot>.json`.
pub fn sidecar_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name.split('.').next().unwrap_or_default();
    path.with_file_name(format!("{stem}.json"))
}

fn read_sidecar(path: &Path) -> Result<Sidecar> {
    let file = File::open(path).with_context(|| format!("opening sidecar {}", path.display()))?;
    let sidecar: Sidecar = serde_json::from_reader(file)
        .with_context(|| format!("parsing sidecar {}", path.display()))?;
    if sidecar.columns.is_empty() {
        bail!("sidecar {} lists no columns", path.display());
    }
    if let SamplingFrequency::PerColumn(rates) = &sidecar.sampling_frequency {
        if rates.len() != sidecar.columns.len() {
            bail!(
                "sidecar {} lists {} sampling rates for {} columns",
                path.display(),
                rates.len(),
                sidecar.columns.len()
            );
        }
    }
    Ok(sidecar)
}

/// Load every column of a tab-separated recording described by its sidecar.
pub fn load_tabular(path: &Path) -> Result<TabularRecording> {
    let sidecar = read_sidecar(&sidecar_path(path))?;
    let width = sidecar.columns.len();
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .trim(Trim::All)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let mut data = vec![Vec::new(); width];
    for (row, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("reading row {}", row + 1))?;
        if record.len() != width {
            bail!(
                "row {} of {} has {} fields, sidecar lists {} columns",
                row + 1,
                path.display(),
                record.len(),
                width
            );
        }
        for (col, raw) in record.iter().enumerate() {
            let value = raw.parse::<f64>().with_context(|| {
                format!("row {} column '{}': '{}'", row + 1, sidecar.columns[col], raw)
            })?;
            data[col].push(value);
        }
    }
    let columns = sidecar
        .columns
        .into_iter()
        .zip(data)
        .enumerate()
        .map(|(idx, (name, data))| {
            let fs = match &sidecar.sampling_frequency {
                SamplingFrequency::Scalar(fs) => *fs,
                SamplingFrequency::PerColumn(rates) => rates[idx],
            };
            Column { name, fs, data }
        })
        .collect();
    Ok(TabularRecording { columns })
}

impl TabularRecording {
    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Keep only the columns at `indices`, in the given order.
    pub fn select(self, indices: &[usize]) -> Result<Self> {
        let width = self.columns.len();
        if let Some(bad) = indices.iter().find(|&&i| i >= width) {
            bail!("column index {} out of range for {} columns", bad, width);
        }
        let columns = indices.iter().map(|&i| self.columns[i].clone()).collect();
        Ok(Self { columns })
    }

    /// Guess the trigger channel from column names.
    pub fn find_trigger(&self) -> Option<usize> {
        self.columns.iter().position(|c| {
            let name = c.name.to_ascii_lowercase();
            TRIGGER_NAMES.iter().any(|t| name.contains(t))
        })
    }

    /// Drop the `time` column and, if given, the trigger column.
    pub fn drop_time_and_trigger(self, trigger: Option<usize>) -> Self {
        let columns = self
            .columns
            .into_iter()
            .enumerate()
            .filter(|(idx, c)| Some(*idx) != trigger && !c.name.eq_ignore_ascii_case("time"))
            .map(|(_, c)| c)
            .collect();
        Self { columns }
    }

    pub fn into_series(self) -> Vec<(String, TimeSeries)> {
        self.columns
            .into_iter()
            .map(|c| {
                (
                    c.name,
                    TimeSeries {
                        fs: c.fs,
                        data: c.data,
                    },
                )
            })
            .collect()
    }
}
