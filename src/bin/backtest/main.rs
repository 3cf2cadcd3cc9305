//! Grid backtest driver: loads recorded ticks, replays the strategy kernel
//! over them, prints a summary report, and dumps fills/stats CSVs.
//!
//! Usage: cargo run --bin backtest
//!
//! Configuration via environment (or .env):
//!   TICKS_CSV         recorded trades, header ts_ms,qty,price
//!   PARAMS_JSON       strategy parameter file (defaults when unset)
//!   STARTING_BALANCE  initial account balance (default 1000)
//!   SAMPLE_MS         resample bucket, 0 = raw ticks (default 1000)
//!   OUT_DIR           output directory for CSVs (default runs/)
//!   QUIET             1 = suppress kernel diagnostics

mod report;

use anyhow::{bail, Context, Result};

use perpgrid::config::{Settings, StrategyParams};
use perpgrid::engine::backtest::run_backtest;
use perpgrid::feeds::ticks::{load_ticks_csv, resample};
use perpgrid::telemetry::diag::{DiagnosticSink, NullSink, StderrSink};
use perpgrid::telemetry::writer::{write_fills_csv, write_stats_csv};

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let settings = Settings::from_env();

    let params = match &settings.params_path {
        Some(path) => StrategyParams::load(path)
            .with_context(|| format!("loading strategy params from {}", path))?,
        None => {
            eprintln!("PARAMS_JSON not set, using default parameters");
            StrategyParams::default()
        }
    };

    eprintln!("Loading ticks from {}...", settings.ticks_path);
    let raw = load_ticks_csv(&settings.ticks_path);
    if raw.is_empty() {
        bail!(
            "no ticks loaded from {} (expected CSV with header ts_ms,qty,price)",
            settings.ticks_path
        );
    }
    eprintln!("{} raw trades", raw.len());

    let ticks = if settings.sample_ms > 0 {
        let sampled = resample(&raw, settings.sample_ms);
        eprintln!(
            "Resampled to {} ticks at {}ms",
            sampled.len(),
            settings.sample_ms
        );
        sampled
    } else {
        raw
    };

    let sink: &dyn DiagnosticSink = if settings.quiet { &NullSink } else { &StderrSink };

    eprintln!("Running backtest...");
    let result = run_backtest(&ticks, &params, settings.starting_balance, sink)
        .context("backtest rejected its inputs")?;
    eprintln!(
        "Done: {} fills, {} stats snapshots",
        result.fills.len(),
        result.stats.len()
    );

    report::print_summary(&result, settings.starting_balance, &ticks);

    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let run_dir = format!("{}/{}", settings.out_dir, stamp);
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("creating output directory {}", run_dir))?;
    write_fills_csv(&format!("{}/fills.csv", run_dir), &result.fills)?;
    write_stats_csv(&format!("{}/stats.csv", run_dir), &result.stats)?;
    eprintln!("Results written to {}/", run_dir);

    Ok(())
}
