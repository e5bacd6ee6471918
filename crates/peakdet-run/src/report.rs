use anyhow::{bail, Context, Result};
use csv::{ReaderBuilder, Trim, Writer, WriterBuilder};
use peakdet_lib::metrics::hrv::{HrvMetrics, Metric};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LABEL_COLUMN: &str = "filename";

/// Render a metric cell: five decimals, empty when undefined.
pub fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{v:.5}"),
        _ => String::new(),
    }
}

/// Append-only CSV of one HRV row per processed channel.
pub struct ReportWriter {
    path: PathBuf,
    metrics: Vec<Metric>,
    writer: Writer<File>,
}

fn read_existing_header(path: &Path) -> Result<Option<Vec<Metric>>> {
    if fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true) {
        return Ok(None);
    }
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_path(path)
        .with_context(|| format!("opening report {}", path.display()))?;
    let Some(first) = reader.records().next() else {
        return Ok(None);
    };
    let header = first.with_context(|| format!("reading header of {}", path.display()))?;
    let mut fields = header.iter();
    if fields.next() != Some(LABEL_COLUMN) {
        bail!(
            "{} does not look like a peakdet report (first column is not '{}')",
            path.display(),
            LABEL_COLUMN
        );
    }
    let metrics = fields
        .map(|name| {
            name.parse::<Metric>()
                .with_context(|| format!("header of {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Some(metrics))
}

impl ReportWriter {
    /// Open `path` for appending. An existing header wins over `requested`.
    pub fn open(path: &Path, requested: &[Metric]) -> Result<Self> {
        if requested.is_empty() {
            bail!("no HRV measurements selected; pick at least one");
        }
        let existing = read_existing_header(path)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating report directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening report {}", path.display()))?;
        let mut writer = WriterBuilder::new().from_writer(file);
        let metrics = match existing {
            Some(existing) => {
                if existing != requested {
                    log::warn!(
                        "{} already exists with different measurements; keeping its columns ({})",
                        path.display(),
                        names(&existing).join(", ")
                    );
                }
                existing
            }
            None => {
                let mut header = vec![LABEL_COLUMN.to_string()];
                header.extend(names(requested));
                writer.write_record(&header)?;
                writer.flush()?;
                requested.to_vec()
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            metrics,
            writer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Columns rows are written with.
    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    /// Write and flush one row. `None` writes empty metric cells.
    pub fn append(&mut self, label: &str, hrv: Option<&HrvMetrics>) -> Result<()> {
        let mut row = Vec::with_capacity(self.metrics.len() + 1);
        row.push(label.to_string());
        row.extend(
            self.metrics
                .iter()
                .map(|&metric| format_value(hrv.and_then(|h| h.get(metric)))),
        );
        self.writer
            .write_record(&row)
            .with_context(|| format!("writing row for {label}"))?;
        self.writer
            .flush()
            .with_context(|| format!("flushing {}", self.path.display()))?;
        Ok(())
    }
}

fn names(metrics: &[Metric]) -> Vec<String> {
    metrics.iter().map(|m| m.name().to_string()).collect()
}
