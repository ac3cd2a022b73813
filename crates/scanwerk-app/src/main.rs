// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanwerk: drive simulated scan sessions from the command line.
//
// Wires scripted readers into the engine so timing scenarios (slow barcode,
// unreadable barcode, hung decoder) can be replayed and their telemetry
// inspected without a camera.

mod config_dir;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use clap::Parser;
use serde_json::json;
use tracing::{error, info};

use scanwerk_bridge::simulated::ScriptedReader;
use scanwerk_core::error::{FailureKind, Result};
use scanwerk_core::human_errors::humanize_error;
use scanwerk_core::types::{LicenseData, ScanInput, ScanStrategy, TextObservation};
use scanwerk_engine::ScanEngine;

#[derive(Debug, Parser)]
#[command(name = "scanwerk", version, about = "Replay simulated identity-card scan sessions")]
struct Args {
    /// Reader strategy: structured, text or automatic.
    #[arg(short, long, default_value = "automatic")]
    strategy: ScanStrategy,

    /// Settings file. Defaults to the per-user config directory.
    #[arg(short, long, env = "SCANWERK_CONFIG")]
    config: Option<PathBuf>,

    /// Write the effective settings back to the settings file.
    #[arg(long)]
    save_config: bool,

    /// Number of sessions to run back to back.
    #[arg(short = 'n', long, default_value_t = 3)]
    sessions: usize,

    /// Delay before the barcode reader answers.
    #[arg(long, default_value_t = 250)]
    structured_latency_ms: u64,

    /// Make every barcode attempt fail with this kind.
    #[arg(long, value_parser = parse_failure)]
    structured_failure: Option<FailureKind>,

    /// Make the barcode reader never answer.
    #[arg(long, conflicts_with = "structured_failure")]
    structured_hangs: bool,

    /// Delay before the text reader answers.
    #[arg(long, default_value_t = 400)]
    text_latency_ms: u64,

    /// Time the text reader needs to get ready.
    #[arg(long, default_value_t = 40)]
    warm_up_ms: u64,

    /// Print outcomes and the summary as JSON.
    #[arg(long)]
    json: bool,
}

fn parse_failure(s: &str) -> std::result::Result<FailureKind, String> {
    match s.to_ascii_lowercase().replace('-', "_").as_str() {
        "bad_format" => Ok(FailureKind::BadFormat),
        "not_found" => Ok(FailureKind::NotFound),
        "poor_quality" => Ok(FailureKind::PoorQuality),
        "decode_error" => Ok(FailureKind::DecodeError),
        "unclassified" => Ok(FailureKind::Unclassified),
        other => Err(format!("unknown failure kind `{other}`")),
    }
}

fn sample_license(confidence: f64) -> LicenseData {
    LicenseData {
        document_number: Some("D1234567".into()),
        first_name: Some("Alex".into()),
        last_name: Some("Example".into()),
        date_of_birth: NaiveDate::from_ymd_opt(1990, 4, 12),
        expiry_date: NaiveDate::from_ymd_opt(2030, 4, 12),
        jurisdiction: Some("CA".into()),
        reader_confidence: Some(confidence),
        ..Default::default()
    }
}

fn sample_input() -> ScanInput {
    ScanInput::payload("@\nANSI 636014080002DL00410288ZC03290024DLDAQD1234567")
        .with_observations(vec![
            TextObservation::new("DL D1234567", 0.91),
            TextObservation::new("EXAMPLE ALEX", 0.88),
            TextObservation::new("DOB 04/12/1990", 0.86),
        ])
}

fn build_engine(args: &Args, config: scanwerk_core::config::EngineConfig) -> Result<ScanEngine> {
    let structured = if args.structured_hangs {
        ScriptedReader::never()
    } else if let Some(kind) = args.structured_failure {
        ScriptedReader::failing(kind)
    } else {
        ScriptedReader::succeeding(sample_license(0.98))
    }
    .with_latency(Duration::from_millis(args.structured_latency_ms));

    let text = ScriptedReader::succeeding(sample_license(0.85))
        .with_latency(Duration::from_millis(args.text_latency_ms))
        .with_warm_up(Duration::from_millis(args.warm_up_ms));

    ScanEngine::builder()
        .structured_reader(Arc::new(structured))
        .text_reader(Arc::new(text))
        .config(config)
        .build()
}

async fn run(args: Args) -> Result<bool> {
    let path = args.config.clone().unwrap_or_else(config_dir::config_path);
    let config = config_dir::load_config(&path);
    if args.save_config {
        config_dir::persist_config(&path, &config)?;
        info!(path = %path.display(), "settings saved");
    }

    let engine = build_engine(&args, config)?;
    let mut all_ok = true;

    for n in 1..=args.sessions {
        match engine.scan(sample_input(), args.strategy).await {
            Ok(outcome) => {
                if args.json {
                    let line = json!({
                        "session": n,
                        "ok": true,
                        "reader": outcome.final_strategy,
                        "fallback": outcome.fallback,
                        "total_ms": outcome.total_time.as_millis() as u64,
                        "attempts": outcome.attempts,
                        "confidence": outcome.confidence(),
                        "data": outcome.data,
                    });
                    println!("{line}");
                } else {
                    println!(
                        "session {n}: read by {} in {} ms ({} barcode attempts{})",
                        outcome.final_strategy.label(),
                        outcome.total_time.as_millis(),
                        outcome.attempts,
                        outcome
                            .fallback
                            .map(|r| format!(", fell back: {r}"))
                            .unwrap_or_default(),
                    );
                }
            }
            Err(e) => {
                all_ok = false;
                let human = humanize_error(&e);
                error!(session = n, error = %e, "scan failed");
                if args.json {
                    let line = json!({
                        "session": n,
                        "ok": false,
                        "error": e.kind(),
                        "message": human.message,
                        "suggestion": human.suggestion,
                    });
                    println!("{line}");
                } else {
                    println!("session {n}: {} {}", human.message, human.suggestion);
                }
            }
        }
    }

    if let Some(summary) = engine.performance_summary() {
        if args.json {
            println!("{}", serde_json::to_string(&summary)?);
        } else {
            println!(
                "{} sessions: p50 {} ms, p95 {} ms, p99 {} ms, mean {:.1} ms",
                summary.count, summary.p50_ms, summary.p95_ms, summary.p99_ms, summary.mean_ms
            );
        }
    }

    engine.shutdown();
    Ok(all_ok)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!(strategy = ?args.strategy, sessions = args.sessions, "Scanwerk starting");

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!(error = %e, "scanwerk aborted");
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_kinds_parse_in_either_spelling() {
        assert_eq!(parse_failure("not_found"), Ok(FailureKind::NotFound));
        assert_eq!(parse_failure("Decode-Error"), Ok(FailureKind::DecodeError));
        assert!(parse_failure("melted").is_err());
    }

    #[test]
    fn args_parse_with_defaults() {
        let args = Args::try_parse_from(["scanwerk"]).unwrap();
        assert_eq!(args.strategy, ScanStrategy::Automatic);
        assert_eq!(args.sessions, 3);
        assert!(args.structured_failure.is_none());
    }

    #[test]
    fn hang_and_failure_flags_conflict() {
        let parsed = Args::try_parse_from([
            "scanwerk",
            "--structured-hangs",
            "--structured-failure",
            "not_found",
        ]);
        assert!(parsed.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_barcode_falls_back_to_text() {
        let args = Args::try_parse_from([
            "scanwerk",
            "--structured-failure",
            "not_found",
            "--structured-latency-ms",
            "50",
        ])
        .unwrap();
        let engine = build_engine(&args, Default::default()).unwrap();
        let outcome = engine
            .scan(sample_input(), ScanStrategy::Automatic)
            .await
            .unwrap();
        assert_eq!(
            outcome.final_strategy,
            scanwerk_core::types::ReaderKind::Text
        );
        assert!(outcome.fallback_triggered());
        engine.shutdown();
    }
}
