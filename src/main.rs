//! statcore JSON-lines driver
//!
//! Usage:
//!   statcore < requests.jsonl                       - one envelope per request
//!   statcore --session alice --correct holm         - record, then correct
//!   statcore --session alice --bundle out.json      - gated bundle export
//!
//! Each input line is a TestRequest; each output line is either a response
//! envelope or an error response with a stable code. Logs go to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use statcore::config::{print_env_help, EngineConfig};
use statcore::registry::{CorrectionMethod, ExportIntent};
use statcore::{metrics, tracing_setup, EngineError, StatisticsService, TestRequest, TestResult};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "statcore")]
#[command(about = "High-precision hypothesis tests over JSON lines")]
#[command(version)]
struct Cli {
    /// Print configuration environment variables and exit
    #[arg(long)]
    help_env: bool,

    /// Record every successful result in a session owned by OWNER
    #[arg(long, value_name = "OWNER")]
    session: Option<String>,

    /// Correction applied to the session at end of input
    /// (bonferroni, holm, benjamini_hochberg)
    #[arg(long, value_name = "METHOD", requires = "session")]
    correct: Option<String>,

    /// Family-wise alpha, or FDR level for benjamini_hochberg
    #[arg(long, default_value_t = 0.05)]
    alpha: f64,

    /// Write a reproducibility bundle at end of input
    #[arg(long, value_name = "PATH")]
    bundle: Option<PathBuf>,

    /// Export past uncorrected hypotheses, recording this justification
    #[arg(long, value_name = "JUSTIFICATION", requires = "bundle")]
    force_export: Option<String>,

    /// Dump Prometheus metrics to stderr on exit
    #[arg(long)]
    metrics: bool,
}

fn write_line<T: serde::Serialize>(out: &mut impl Write, value: &T) -> Result<()> {
    serde_json::to_writer(&mut *out, value).context("failed to encode output line")?;
    writeln!(out).context("failed to write output line")?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.help_env {
        print_env_help();
        return Ok(());
    }

    tracing_setup::init_tracing();
    metrics::register_metrics().context("failed to register metrics")?;

    let config = EngineConfig::from_env();
    config.log();

    let correction = cli
        .correct
        .as_deref()
        .map(str::parse::<CorrectionMethod>)
        .transpose()
        .map_err(|e| anyhow::anyhow!(e.message()))?;

    let service = StatisticsService::new(config);
    let session = cli
        .session
        .as_deref()
        .map(|owner| service.open_session(owner))
        .transpose()
        .map_err(|e| anyhow::anyhow!(e.message()))?;

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut evaluations: Vec<(TestRequest, TestResult)> = Vec::new();
    let mut succeeded = 0usize;
    let mut failures = 0usize;

    for (line_no, line) in stdin.lock().lines().enumerate() {
        let line = line.context("failed to read stdin")?;
        if line.trim().is_empty() {
            continue;
        }

        let outcome = serde_json::from_str::<TestRequest>(&line)
            .map_err(EngineError::from)
            .and_then(|request| {
                let envelope = match &session {
                    Some(handle) => service.evaluate_in_session(handle, &request)?.0,
                    None => service.evaluate(&request)?,
                };
                Ok((request, envelope))
            });

        match outcome {
            Ok((request, envelope)) => {
                succeeded += 1;
                write_line(&mut out, &envelope)?;
                if cli.bundle.is_some() {
                    evaluations.push((request, envelope.high_precision_result));
                }
            }
            Err(e) => {
                failures += 1;
                error!(line = line_no + 1, code = e.code(), "{}", e.message());
                write_line(&mut out, &e.to_response())?;
            }
        }
    }

    if let (Some(handle), Some(method)) = (&session, correction) {
        match service.correct(handle, method, cli.alpha) {
            Ok(report) => write_line(&mut out, &serde_json::json!({ "correction": report }))?,
            Err(e) => write_line(&mut out, &e.to_response())?,
        }
    }

    if let Some(path) = &cli.bundle {
        let intent = cli.force_export.clone().map(ExportIntent::forced).unwrap_or_default();
        match service.bundle(session.as_ref().map(|h| (h, &intent)), &evaluations) {
            Ok(bundle) => {
                bundle.write_to(path).map_err(|e| anyhow::anyhow!(e.message()))?;
                info!(path = %path.display(), checksum = %bundle.checksum, "bundle written");
            }
            Err(e) => {
                error!(code = e.code(), "{}", e.message());
                write_line(&mut out, &e.to_response())?;
                out.flush()?;
                std::process::exit(2);
            }
        }
    }

    out.flush()?;
    let stats = service.cache_stats();
    info!(
        evaluated = succeeded,
        failures = failures,
        cache_hits = stats.hits,
        cache_misses = stats.misses,
        "input exhausted"
    );
    if cli.metrics {
        eprintln!("{}", metrics::gather_text());
    }
    Ok(())
}
