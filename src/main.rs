//! rowscript - Command line runner
//!
//! Runs a script step over a JSON Lines file, or checks a step definition
//! against its declared input fields.
//!
//! # Usage
//!
//! ```bash
//! # Transform rows with two step copies
//! rowscript run --config step.toml --input rows.jsonl --output out.jsonl --copies 2
//!
//! # Validate a step definition without processing data
//! rowscript check --config step.toml
//! ```

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use rowscript::config::StageConfig;
use rowscript::jsonl::{read_rows, JsonlWriter};
use rowscript::pipeline::{
    check_stage, spawn_stage_copies, RunControl, StageMessage, Termination,
    OUTPUT_CHANNEL_CAPACITY,
};
use rowscript::types::StepStats;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "rowscript")]
#[command(about = "Run scripted row transforms over JSON Lines")]
#[command(version)]
struct Cli {
    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Transform a JSON Lines file
    Run(RunArgs),
    /// Check a step definition against its declared input fields
    Check {
        /// Step definition (.toml or .json)
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Step definition (.toml or .json)
    #[arg(short, long)]
    config: PathBuf,

    /// Input rows, one JSON object per line
    #[arg(short, long)]
    input: PathBuf,

    /// Output file, stdout when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of step copies
    #[arg(long, default_value_t = 1)]
    copies: usize,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let _guard = init_logging(cli.log_file.as_deref())?;

    match cli.command {
        Command::Run(args) => run(args),
        Command::Check { config } => check(&config),
    }
}

fn init_logging(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .context("Log file path has no file name")?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,rowscript=debug")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(guard)
}

fn run(args: RunArgs) -> Result<ExitCode> {
    let config = StageConfig::load(&args.config)
        .with_context(|| format!("Failed to load step {:?}", args.config))?;
    config.validate()?;

    let schema = Arc::new(config.input_schema());
    if schema.is_empty() {
        bail!("Step {:?} declares no input_fields", args.config);
    }

    let input = File::open(&args.input)
        .with_context(|| format!("Failed to open input {:?}", args.input))?;
    let output: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create output {:?}", path))?,
        )),
        None => Box::new(BufWriter::new(std::io::stdout().lock())),
    };
    let mut writer = JsonlWriter::new(output);

    tracing::info!(
        "Running step '{}' with {} copies over {:?}",
        config.step_name,
        args.copies,
        args.input
    );

    let control = RunControl::new();
    let (tx, rx) = crossbeam_channel::bounded(OUTPUT_CHANNEL_CAPACITY);
    let mut copies = spawn_stage_copies(Arc::new(config), args.copies, control.clone(), tx)?;

    // Rows are fed from a separate thread so results can be drained here
    let feeder = {
        let control = control.clone();
        let schema = schema.clone();
        std::thread::Builder::new()
            .name("feeder".to_string())
            .spawn(move || -> rowscript::Result<Termination> {
                for row in read_rows(BufReader::new(input), &schema) {
                    match row {
                        Ok(row) => {
                            if !copies.dispatch(row, schema.clone()) {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::error!("Failed to read input: {}", e);
                            control.increment_errors();
                            control.request_stop(false);
                            break;
                        }
                    }
                }
                copies.join()
            })?
    };

    let mut stats = StepStats::default();
    let mut redirected = 0u64;
    for message in rx {
        match message {
            StageMessage::Row { row, schema, .. } => writer.write_row(&row, &schema)?,
            StageMessage::RowError {
                copy_nr,
                code,
                message,
                ..
            } => {
                redirected += 1;
                tracing::warn!("Copy {} redirected a row [{}]: {}", copy_nr, code, message);
            }
            StageMessage::Finished(report) => {
                if let Some(error) = &report.error {
                    tracing::error!("Copy {} failed: {}", report.copy_nr, error);
                }
                stats.merge(&report.stats);
            }
        }
    }
    writer.flush()?;

    let termination = feeder
        .join()
        .map_err(|_| anyhow::anyhow!("Feeder thread panicked"))??;

    eprintln!(
        "read={} written={} skipped={} redirected={} errors={} termination={}",
        stats.lines_read,
        stats.lines_written,
        stats.lines_skipped,
        redirected,
        control.errors().max(stats.errors),
        termination
    );

    Ok(if termination.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn check(path: &Path) -> Result<ExitCode> {
    let config =
        StageConfig::load(path).with_context(|| format!("Failed to load step {:?}", path))?;
    let remarks = check_stage(&config, &config.input_schema());

    for remark in &remarks {
        println!("{}", remark);
    }

    Ok(if remarks.iter().any(|r| r.is_error()) {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
