use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use env_logger::{Env, Target};
use peakdet_lib::{
    editor::console::ConsoleReviewer,
    history::load_history,
    io::{LoadOptions, Source},
    metrics::hrv::{HrvMetrics, Metric},
};
use peakdet_run::{config::run_plan, expand_inputs, Modality, ProcessingConfig, Workflow};
use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
    process::ExitCode,
};

#[derive(Parser)]
#[command(
    name = "peakdet",
    version,
    about = "Peak detection, manual correction and HRV for physiological recordings"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum LgrDegree {
    Quiet,
    Info,
    Debug,
}

impl LgrDegree {
    fn filter(self) -> &'static str {
        match self {
            LgrDegree::Quiet => "warn",
            LgrDegree::Info => "info",
            LgrDegree::Debug => "debug",
        }
    }
}

#[derive(Args, Debug)]
struct LoadArgs {
    /// Input layout
    #[arg(long, default_value = "tabular")]
    source: Source,
    /// Sampling rate in Hz (rtpeaks and text inputs)
    #[arg(long)]
    fs: Option<f64>,
    /// rtpeaks analog channel
    #[arg(long, default_value_t = 1)]
    channel: usize,
    /// Tabular columns to process, e.g. --phys-idx 2,3
    #[arg(long, value_delimiter = ',')]
    phys_idx: Option<Vec<usize>>,
    /// Tabular trigger column; searched by name when omitted
    #[arg(long)]
    chtrig: Option<usize>,
}

impl LoadArgs {
    fn options(&self) -> Result<LoadOptions> {
        if self.source.needs_fs() && self.fs.is_none() {
            bail!("--fs is required for {} input", self.source);
        }
        Ok(LoadOptions {
            fs: self.fs,
            channel: self.channel,
            phys_idx: self.phys_idx.clone(),
            chtrig: self.chtrig,
        })
    }
}

#[derive(Args, Debug)]
struct PlanArgs {
    /// JSON or TOML file with per-channel processing steps
    #[arg(long, conflicts_with = "modality")]
    config: Option<PathBuf>,
    /// Built-in filter preset (ECG, PPG, RESP)
    #[arg(long)]
    modality: Option<Modality>,
    /// Peak detection threshold used with --modality
    #[arg(long, default_value_t = 0.2)]
    thresh: f64,
}

impl PlanArgs {
    fn config(&self) -> Result<ProcessingConfig> {
        match (&self.config, self.modality) {
            (Some(path), _) => ProcessingConfig::read(path),
            (None, Some(modality)) => {
                let config = ProcessingConfig::from_modality(modality, self.thresh);
                config
                    .validate()
                    .with_context(|| format!("invalid settings for {modality}"))?;
                Ok(config)
            }
            (None, None) => bail!("either --config or --modality is required"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Detect, review and report HRV for every file matching a pattern
    Run {
        /// Glob pattern relative to --indir, e.g. "sub-*/*.tsv"
        template: String,
        #[command(flatten)]
        plan: PlanArgs,
        #[command(flatten)]
        load: LoadArgs,
        #[arg(long, default_value = ".")]
        indir: PathBuf,
        /// Folder for the report (when relative) and logs
        #[arg(long, default_value = ".")]
        outdir: PathBuf,
        #[arg(long, default_value = "peakdet.csv")]
        output: PathBuf,
        /// Also save each committed channel under --outdir as <OUTFILE>_<stem>[_<column>].json
        #[arg(long)]
        outfile: Option<String>,
        /// Review detected peaks interactively on stdin
        #[arg(long)]
        manual_edit: bool,
        /// Do not write history artifacts
        #[arg(long)]
        no_history: bool,
        /// Metrics to report, by short name or description; all by default
        #[arg(long, num_args = 1..)]
        measurements: Option<Vec<Metric>>,
        #[arg(long, value_enum, default_value = "info")]
        lgr_degree: LgrDegree,
    },
    /// Filter and detect peaks in one file, printing JSON per channel
    Detect {
        input: PathBuf,
        #[command(flatten)]
        plan: PlanArgs,
        #[command(flatten)]
        load: LoadArgs,
    },
    /// Print HRV metrics of a saved history artifact as JSON
    Hrv {
        history: PathBuf,
        #[arg(long, num_args = 1..)]
        measurements: Option<Vec<Metric>>,
    },
    /// List the available HRV metrics
    Metrics,
}

/// Duplicates log output to stderr and the run's log file.
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

fn init_logging(level: &str, log_file: Option<File>) {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or(level));
    if let Some(file) = log_file {
        builder
            .format(|buf, record| {
                writeln!(
                    buf,
                    "{}\t{}\t{}\t{}",
                    chrono::Local::now().format("%Y-%m-%dT%H:%M:%S"),
                    record.target(),
                    record.level(),
                    record.args()
                )
            })
            .target(Target::Pipe(Box::new(Tee { file })));
    }
    builder.init();
}

fn open_log_file(outdir: &Path) -> Result<(PathBuf, File)> {
    let log_dir = outdir.join("logs");
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;
    let stamp = chrono::Local::now().format("%Y-%m-%dT%H%M%S");
    let path = log_dir.join(format!("peakdet_{stamp}.tsv"));
    let file = File::options()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("opening log file {}", path.display()))?;
    Ok((path, file))
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            template,
            plan,
            load,
            indir,
            outdir,
            output,
            outfile,
            manual_edit,
            no_history,
            measurements,
            lgr_degree,
        } => {
            let (log_path, log_file) = open_log_file(&outdir)?;
            init_logging(lgr_degree.filter(), Some(log_file));
            log::info!(
                "peakdet {} logging to {}",
                env!("CARGO_PKG_VERSION"),
                log_path.display()
            );
            let report = if output.is_absolute() {
                output
            } else {
                outdir.join(output)
            };
            let workflow = Workflow {
                config: plan.config()?,
                load: load.options()?,
                source: load.source,
                report,
                measurements: measurements.unwrap_or_else(|| Metric::ALL.to_vec()),
                save_history: !no_history,
                export: outfile.map(|prefix| outdir.join(prefix)),
                indir,
            };
            cmd_run(&workflow, &template, manual_edit)
        }
        Commands::Detect { input, plan, load } => {
            init_logging("warn", None);
            cmd_detect(&input, &plan, &load)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Hrv {
            history,
            measurements,
        } => {
            init_logging("warn", None);
            cmd_hrv(&history, measurements.as_deref())?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Metrics => {
            cmd_metrics()?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn cmd_run(workflow: &Workflow, template: &str, manual_edit: bool) -> Result<ExitCode> {
    let files = expand_inputs(&workflow.indir, template)?;
    log::info!("{} file(s) match {}", files.len(), template);
    let summary = if manual_edit {
        let stdin = io::stdin();
        let mut reviewer = ConsoleReviewer::new(stdin.lock(), io::stdout());
        workflow.run(&files, Some(&mut reviewer))?
    } else {
        workflow.run(&files, None)?
    };
    if summary.is_success() {
        log::info!("results in {}", workflow.report.display());
        return Ok(ExitCode::SUCCESS);
    }
    for failure in &summary.failures {
        log::error!("failed: {}: {}", failure.label, failure.error);
    }
    Ok(ExitCode::FAILURE)
}

fn cmd_detect(input: &Path, plan: &PlanArgs, load: &LoadArgs) -> Result<()> {
    let config = plan.config()?;
    let channels = load.source.load(input, &load.options()?)?;
    for channel in channels {
        let steps = config
            .plan_for(channel.column.as_deref())
            .with_context(|| {
                format!(
                    "no processing plan for channel '{}'",
                    channel.column.as_deref().unwrap_or("*")
                )
            })?;
        let record = run_plan(&channel.record, steps)?;
        let js = serde_json::json!({
            "channel": channel.column,
            "fs": record.fs(),
            "peaks": record.peaks(),
            "provenance": record.provenance(),
        });
        println!("{}", serde_json::to_string(&js)?);
    }
    Ok(())
}

fn cmd_hrv(history: &Path, measurements: Option<&[Metric]>) -> Result<()> {
    let record = load_history(history)?;
    let hrv = HrvMetrics::compute(&record)
        .with_context(|| format!("computing HRV for {}", history.display()))?;
    let selected = measurements.unwrap_or(&Metric::ALL[..]);
    let mut out = serde_json::Map::new();
    for &metric in selected {
        let value = hrv
            .get(metric)
            .filter(|v| v.is_finite())
            .map_or(serde_json::Value::Null, serde_json::Value::from);
        out.insert(metric.name().to_string(), value);
    }
    println!("{}", serde_json::to_string(&out)?);
    Ok(())
}

fn cmd_metrics() -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for metric in Metric::ALL {
        writeln!(out, "{}\t{}", metric.name(), metric.description())?;
    }
    Ok(())
}
