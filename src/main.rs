use std::{path::PathBuf, process::ExitCode};

use anyhow::Context;
use clap::Parser;
use dicom_segmentation::{
    OutputFormat, Pipeline, PipelineConfig, RunSummary, parse_fast_flag, segmenter::DEFAULT_PROGRAM,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "dicom-segment")]
#[command(about = "Segment the organs of a DICOM series and export one mask per organ")]
struct Cli {
    /// Directory holding the DICOM slices
    input_dicom_dir: PathBuf,

    /// Directory the organ masks are written to
    output_dir: PathBuf,

    /// Output format: `nrrd` or `nifti` (default)
    output_format: Option<String>,

    /// Fast mode; disabled only by `false`
    fast: Option<String>,

    /// Segmentation tool to run
    #[arg(long, env = "SEGMENTATION_TOOL", default_value = DEFAULT_PROGRAM)]
    tool: PathBuf,

    /// Parent directory for the temporary staging area
    #[arg(long, env = "SEGMENTATION_WORK_DIR")]
    work_dir: Option<PathBuf>,
}

fn run(cli: Cli) -> anyhow::Result<RunSummary> {
    let mut config = PipelineConfig::new(cli.input_dicom_dir, cli.output_dir);
    config.output_format = cli
        .output_format
        .as_deref()
        .map(OutputFormat::from_token)
        .unwrap_or_default();
    config.fast_mode = parse_fast_flag(cli.fast.as_deref());
    config.segmenter_program = cli.tool;
    config.staging_root = cli.work_dir;

    info!("Input: {}", config.input_dicom_dir.display());
    info!("Output: {}", config.output_dir.display());
    info!("Output format: {}", config.output_format.name());
    info!("Fast mode: {}", if config.fast_mode { "on" } else { "off" });

    Pipeline::new(config)
        .run()
        .context("Segmentation pipeline failed")
}

/// Usage errors exit with 1 like any other failure; `--help` and
/// `--version` exit with 0.
fn usage_status(err: &clap::Error) -> u8 {
    if err.use_stderr() { 1 } else { 0 }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(usage_status(&err));
        }
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dicom_segmentation=info,dicom_segment=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(cli) {
        Ok(summary) => {
            if summary.is_degraded() {
                info!("Finished without segmentation output");
            } else {
                info!("Finished successfully");
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}
