use crate::config::{run_plan, ProcessingConfig};
use crate::report::ReportWriter;
use anyhow::{bail, Context, Result};
use peakdet_lib::editor::console::PeakReviewer;
use peakdet_lib::editor::{EditOutcome, Editor};
use peakdet_lib::history::{history_path_for, load_history, save_history};
use peakdet_lib::io::{Channel, LoadOptions, Source};
use peakdet_lib::metrics::hrv::{HrvMetrics, Metric};
use peakdet_lib::{PhysioError, PhysioRecord};
use std::path::{Path, PathBuf};

/// Where a channel's peaks came from in this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Loaded, filtered and detected from the raw input.
    Fresh,
    /// Restored from a previously saved history artifact.
    Resumed,
}

#[derive(Debug, Clone)]
pub struct ChannelOutcome {
    pub label: String,
    pub state: SessionState,
    /// False when the review was discarded.
    pub written: bool,
}

#[derive(Debug, Clone)]
pub struct Failure {
    pub label: String,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub channels: Vec<ChannelOutcome>,
    pub failures: Vec<Failure>,
}

impl RunSummary {
    pub fn rows_written(&self) -> usize {
        self.channels.iter().filter(|c| c.written).count()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Batch driver: load, process or resume, review, persist, report.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub indir: PathBuf,
    pub source: Source,
    pub load: LoadOptions,
    pub config: ProcessingConfig,
    pub report: PathBuf,
    pub measurements: Vec<Metric>,
    pub save_history: bool,
    /// Output prefix, e.g. `out/session`; committed channels are also saved
    /// as `out/<rel dir>/session_<stem>[_<column>].json`.
    pub export: Option<PathBuf>,
}

/// Files under `indir` matching `template`, sorted.
pub fn expand_inputs(indir: &Path, template: &str) -> Result<Vec<PathBuf>> {
    let pattern = indir.join(template);
    let pattern = pattern.to_string_lossy();
    let mut files = glob::glob(&pattern)
        .with_context(|| format!("invalid input pattern {pattern}"))?
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(err) => {
                log::warn!("skipping unreadable path: {err}");
                None
            }
        })
        .filter(|path| path.is_file() && !is_history_artifact(path))
        .collect::<Vec<_>>();
    files.sort();
    if files.is_empty() {
        bail!("no input files match {pattern}");
    }
    Ok(files)
}

fn is_history_artifact(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

impl Workflow {
    fn relative_label(&self, path: &Path) -> String {
        path.strip_prefix(&self.indir)
            .unwrap_or(path)
            .display()
            .to_string()
    }

    fn export_path(&self, prefix: &Path, path: &Path, column: Option<&str>) -> PathBuf {
        let prefix_name = prefix
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = file_name.split('.').next().unwrap_or_default();
        let mut name = format!("{prefix_name}_{stem}");
        if let Some(column) = column {
            name.push('_');
            name.push_str(column);
        }
        let mut dir = prefix.parent().map(Path::to_path_buf).unwrap_or_default();
        if let Some(rel_dir) = path
            .strip_prefix(&self.indir)
            .ok()
            .and_then(Path::parent)
            .filter(|d| !d.as_os_str().is_empty())
        {
            dir.push(rel_dir);
        }
        dir.join(format!("{name}.json"))
    }

    /// Process every file in order. Per-file and per-channel failures are
    /// logged and collected; only report setup errors abort the batch.
    pub fn run(
        &self,
        files: &[PathBuf],
        mut reviewer: Option<&mut dyn PeakReviewer>,
    ) -> Result<RunSummary> {
        let mut report = ReportWriter::open(&self.report, &self.measurements)?;
        log::info!(
            "writing {} to {}",
            report
                .metrics()
                .iter()
                .map(|m| m.name())
                .collect::<Vec<_>>()
                .join(", "),
            report.path().display()
        );
        let mut summary = RunSummary::default();
        for path in files {
            let label = self.relative_label(path);
            log::info!("processing {label}");
            let channels = match self
                .source
                .load(path, &self.load)
                .with_context(|| format!("loading {label}"))
            {
                Ok(channels) => channels,
                Err(err) => {
                    log::error!("{err:#}");
                    summary.failures.push(Failure {
                        label,
                        error: format!("{err:#}"),
                    });
                    continue;
                }
            };
            for channel in channels {
                let channel_label = match &channel.column {
                    Some(column) => format!("{label}[{column}]"),
                    None => label.clone(),
                };
                let outcome = self
                    .process_channel(
                        path,
                        &channel_label,
                        channel,
                        &mut report,
                        reviewer.as_deref_mut(),
                    )
                    .with_context(|| format!("processing {channel_label}"));
                match outcome {
                    Ok(outcome) => summary.channels.push(outcome),
                    Err(err) => {
                        log::error!("{err:#}");
                        summary.failures.push(Failure {
                            label: channel_label,
                            error: format!("{err:#}"),
                        });
                    }
                }
            }
        }
        log::info!(
            "finished: {} row(s) written, {} failure(s)",
            summary.rows_written(),
            summary.failures.len()
        );
        Ok(summary)
    }

    /// Decide once whether this channel resumes from history or starts fresh.
    fn prepare(&self, history: &Path, channel: Channel) -> Result<(SessionState, PhysioRecord)> {
        if history.exists() {
            log::info!("resuming from {}", history.display());
            let record = load_history(history)?;
            return Ok((SessionState::Resumed, record));
        }
        let plan = self
            .config
            .plan_for(channel.column.as_deref())
            .with_context(|| {
                format!(
                    "no processing plan for channel '{}'",
                    channel.column.as_deref().unwrap_or("*")
                )
            })?;
        let record = run_plan(&channel.record, plan)?;
        Ok((SessionState::Fresh, record))
    }

    fn process_channel(
        &self,
        path: &Path,
        label: &str,
        channel: Channel,
        report: &mut ReportWriter,
        reviewer: Option<&mut (dyn PeakReviewer + '_)>,
    ) -> Result<ChannelOutcome> {
        let history = history_path_for(path, channel.column.as_deref());
        let export = self
            .export
            .as_deref()
            .map(|prefix| self.export_path(prefix, path, channel.column.as_deref()));
        let (state, record) = self.prepare(&history, channel)?;
        let record = match reviewer {
            Some(reviewer) => {
                let mut editor = Editor::open(record);
                reviewer.review(label, &mut editor)?;
                match editor.finish() {
                    EditOutcome::Committed(record) => record,
                    EditOutcome::Discarded(_) => {
                        log::warn!("review of {label} discarded; no row written");
                        return Ok(ChannelOutcome {
                            label: label.to_string(),
                            state,
                            written: false,
                        });
                    }
                }
            }
            None => record,
        };
        if self.save_history {
            save_history(&history, &record)?;
        }
        let hrv = match HrvMetrics::compute(&record) {
            Ok(hrv) => Some(hrv),
            Err(PhysioError::InsufficientData { peaks }) => {
                log::warn!("{label}: only {peaks} peak(s); writing empty metrics");
                None
            }
            Err(err) => return Err(err.into()),
        };
        report.append(label, hrv.as_ref())?;
        if let Some(export) = export {
            save_history(&export, &record)
                .with_context(|| format!("exporting to {}", export.display()))?;
            log::info!("saved {label} to {}", export.display());
        }
        Ok(ChannelOutcome {
            label: label.to_string(),
            state,
            written: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Modality, ProcessingConfig};
    use anyhow::Result as AnyResult;
    use std::f64::consts::PI;
    use std::fs;
    use tempfile::tempdir;

    fn write_signal(path: &Path, fs_hz: f64, secs: f64, hz: f64) {
        let n = (fs_hz * secs) as usize;
        let body: String = (0..n)
            .map(|i| format!("{}\n", (2.0 * PI * hz * i as f64 / fs_hz).sin()))
            .collect();
        fs::write(path, body).unwrap();
    }

    fn workflow(dir: &Path) -> Workflow {
        Workflow {
            indir: dir.to_path_buf(),
            source: Source::Text,
            load: LoadOptions {
                fs: Some(40.0),
                ..LoadOptions::default()
            },
            config: ProcessingConfig::from_modality(Modality::Ppg, 0.5),
            report: dir.join("out").join("peakdet.csv"),
            measurements: vec![Metric::Avgnn, Metric::Sdnn],
            save_history: true,
            export: None,
        }
    }

    /// Deletes the first peak, then commits.
    struct DeleteFirst;

    impl PeakReviewer for DeleteFirst {
        fn review(&mut self, _label: &str, editor: &mut Editor) -> AnyResult<()> {
            let first = editor.peaks()[0];
            editor.delete_peak(first)?;
            editor.commit()?;
            Ok(())
        }
    }

    /// Makes an edit and walks away without committing.
    struct Abandon;

    impl PeakReviewer for Abandon {
        fn review(&mut self, _label: &str, editor: &mut Editor) -> AnyResult<()> {
            let first = editor.peaks()[0];
            editor.delete_peak(first)?;
            Ok(())
        }
    }

    #[test]
    fn expands_sorted_inputs_and_skips_history() {
        let dir = tempdir().unwrap();
        write_signal(&dir.path().join("b.txt"), 50.0, 1.0, 1.0);
        write_signal(&dir.path().join("a.txt"), 50.0, 1.0, 1.0);
        fs::write(dir.path().join(".a.txt.json"), "{}").unwrap();
        let files = expand_inputs(dir.path(), "*.txt").unwrap();
        assert_eq!(files, vec![dir.path().join("a.txt"), dir.path().join("b.txt")]);
        assert!(expand_inputs(dir.path(), "*.edf").is_err());
    }

    #[test]
    fn fresh_run_writes_rows_and_history() {
        let dir = tempdir().unwrap();
        write_signal(&dir.path().join("a.txt"), 40.0, 20.0, 1.0);
        let wf = workflow(dir.path());
        let files = expand_inputs(dir.path(), "*.txt").unwrap();
        let summary = wf.run(&files, None).unwrap();
        assert!(summary.is_success());
        assert_eq!(summary.rows_written(), 1);
        assert_eq!(summary.channels[0].state, SessionState::Fresh);
        assert!(dir.path().join(".a.txt.json").exists());
        let report = fs::read_to_string(&wf.report).unwrap();
        let mut lines = report.lines();
        assert_eq!(lines.next(), Some("filename,avgnn,sdnn"));
        let row: Vec<&str> = lines.next().unwrap().split(',').collect();
        assert_eq!(row[0], "a.txt");
        let avgnn: f64 = row[1].parse().unwrap();
        assert!((avgnn - 1000.0).abs() < 30.0, "{avgnn}");
    }

    #[test]
    fn second_run_resumes_from_history() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        write_signal(&path, 40.0, 20.0, 1.0);
        let wf = workflow(dir.path());
        let files = vec![path.clone()];
        let mut reviewer = DeleteFirst;
        let first = wf.run(&files, Some(&mut reviewer)).unwrap();
        assert_eq!(first.channels[0].state, SessionState::Fresh);
        let saved = load_history(&dir.path().join(".a.txt.json")).unwrap();
        assert_eq!(saved.history().len(), 1);

        // Replace the raw input; a resumed channel must not re-detect.
        write_signal(&path, 40.0, 20.0, 2.0);
        let second = wf.run(&files, None).unwrap();
        assert_eq!(second.channels[0].state, SessionState::Resumed);
        let resumed = load_history(&dir.path().join(".a.txt.json")).unwrap();
        assert_eq!(resumed.peaks(), saved.peaks());
        assert_eq!(resumed.history(), saved.history());

        let report = fs::read_to_string(&wf.report).unwrap();
        let rows: Vec<&str> = report.lines().skip(1).collect();
        assert_eq!(rows.len(), 2, "{report}");
        assert!(rows[0].starts_with("a.txt,"), "{report}");
        assert_eq!(rows[0], rows[1]);
    }

    #[test]
    fn non_finite_sample_fails_without_artifact() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        write_signal(&path, 40.0, 20.0, 1.0);
        let mut body = fs::read_to_string(&path).unwrap();
        body.push_str("nan\n");
        fs::write(&path, body).unwrap();
        let wf = workflow(dir.path());
        let summary = wf.run(&[path], None).unwrap();
        assert_eq!(summary.rows_written(), 0);
        assert_eq!(summary.failures[0].label, "a.txt");
        assert!(summary.failures[0].error.contains("not finite"));
        assert!(!dir.path().join(".a.txt.json").exists());
    }

    #[test]
    fn export_prefix_saves_committed_channels() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub-01")).unwrap();
        let input = dir.path().join("sub-01").join("a.txt");
        write_signal(&input, 40.0, 20.0, 1.0);
        let mut wf = workflow(dir.path());
        wf.save_history = false;
        wf.export = Some(dir.path().join("out").join("session"));
        let files = expand_inputs(dir.path(), "*/*.txt").unwrap();
        let mut reviewer = DeleteFirst;
        let summary = wf.run(&files, Some(&mut reviewer)).unwrap();
        assert!(summary.is_success(), "{:?}", summary.failures);

        let exported = dir.path().join("out").join("sub-01").join("session_a.json");
        let record = load_history(&exported).unwrap();
        assert_eq!(record.history().len(), 1);
        assert_eq!(record.peaks().len() + 1, record.detected().len());
        assert!(!dir.path().join("sub-01").join(".a.txt.json").exists());
    }

    #[test]
    fn export_is_skipped_for_discarded_review() {
        let dir = tempdir().unwrap();
        write_signal(&dir.path().join("a.txt"), 40.0, 20.0, 1.0);
        let mut wf = workflow(dir.path());
        wf.export = Some(dir.path().join("out").join("session"));
        let files = expand_inputs(dir.path(), "*.txt").unwrap();
        let mut reviewer = Abandon;
        wf.run(&files, Some(&mut reviewer)).unwrap();
        assert!(!dir.path().join("out").join("session_a.json").exists());
    }

    #[test]
    fn abandoned_review_writes_nothing() {
        let dir = tempdir().unwrap();
        write_signal(&dir.path().join("a.txt"), 40.0, 20.0, 1.0);
        let wf = workflow(dir.path());
        let files = expand_inputs(dir.path(), "*.txt").unwrap();
        let mut reviewer = Abandon;
        let summary = wf.run(&files, Some(&mut reviewer)).unwrap();
        assert!(summary.is_success());
        assert_eq!(summary.rows_written(), 0);
        assert!(!dir.path().join(".a.txt.json").exists());
        let report = fs::read_to_string(&wf.report).unwrap();
        assert_eq!(report, "filename,avgnn,sdnn\n");
    }

    #[test]
    fn failing_file_does_not_stop_batch() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "not a number\n").unwrap();
        write_signal(&dir.path().join("b.txt"), 40.0, 20.0, 1.0);
        let mut wf = workflow(dir.path());
        wf.save_history = false;
        let files = expand_inputs(dir.path(), "*.txt").unwrap();
        let summary = wf.run(&files, None).unwrap();
        assert!(!summary.is_success());
        assert_eq!(summary.failures[0].label, "a.txt");
        assert_eq!(summary.rows_written(), 1);
        assert!(!dir.path().join(".b.txt.json").exists());
    }

    #[test]
    fn flat_signal_writes_empty_metrics() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("flat.txt"), "0\n".repeat(500)).unwrap();
        let wf = workflow(dir.path());
        let files = expand_inputs(dir.path(), "*.txt").unwrap();
        let summary = wf.run(&files, None).unwrap();
        assert!(summary.is_success());
        let report = fs::read_to_string(&wf.report).unwrap();
        assert!(report.ends_with("flat.txt,,\n"), "{report}");
    }

    #[test]
    fn tabular_channels_are_labelled_by_column() {
        let dir = tempdir().unwrap();
        let fs_hz = 50.0;
        let rows: String = (0..1000)
            .map(|i| {
                let t = i as f64 / fs_hz;
                format!("{t}\t0\t{}\n", (2.0 * PI * t).sin())
            })
            .collect();
        fs::write(dir.path().join("sub-01_physio.tsv"), rows).unwrap();
        fs::write(
            dir.path().join("sub-01_physio.json"),
            r#"{"Columns": ["time", "trigger", "cardiac"], "SamplingFrequency": 50}"#,
        )
        .unwrap();
        let mut wf = workflow(dir.path());
        wf.source = Source::Tabular;
        wf.load = LoadOptions::default();
        let files = expand_inputs(dir.path(), "*.tsv").unwrap();
        let summary = wf.run(&files, None).unwrap();
        assert!(summary.is_success(), "{:?}", summary.failures);
        assert_eq!(summary.channels[0].label, "sub-01_physio.tsv[cardiac]");
        assert!(dir.path().join(".sub-01_physio.tsv.cardiac.json").exists());

        let prefix = Path::new("/data/out/run1");
        let path = dir.path().join("sub-01_physio.tsv");
        assert_eq!(
            wf.export_path(prefix, &path, Some("cardiac")),
            PathBuf::from("/data/out/run1_sub-01_physio_cardiac.json")
        );
    }
}
