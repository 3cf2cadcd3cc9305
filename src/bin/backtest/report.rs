//! Plain-text run report: portfolio summary, per-tag fill breakdown,
//! and a text equity sparkline.

use perpgrid::engine::backtest::BacktestReport;
use perpgrid::types::{OrderTag, Tick};

fn fmt_ts(ts_ms: f64) -> String {
    match chrono::DateTime::from_timestamp_millis(ts_ms as i64) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => format!("{}", ts_ms),
    }
}

pub fn print_summary(result: &BacktestReport, starting_balance: f64, ticks: &[Tick]) {
    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║  GRID BACKTEST RESULTS                                           ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();

    let (final_balance, final_equity) = result
        .fills
        .last()
        .map(|f| (f.balance, f.equity))
        .unwrap_or((starting_balance, starting_balance));
    let realized_pnl: f64 = result.fills.iter().map(|f| f.pnl).sum();
    let fees: f64 = result.fills.iter().map(|f| f.fee_paid).sum();
    let bankrupt = result
        .fills
        .iter()
        .any(|f| matches!(f.tag, OrderTag::Bankruptcy(_)));

    println!("─── PORTFOLIO SUMMARY ─────────────────────────────────────────────");
    if let (Some(first), Some(last)) = (ticks.first(), ticks.last()) {
        let hours = (last.ts - first.ts) / 3_600_000.0;
        println!("  Period           {} .. {}", fmt_ts(first.ts), fmt_ts(last.ts));
        println!("  Duration         {:.1}h over {} ticks", hours, ticks.len());
    }
    println!("  Start Balance    ${:.2}", starting_balance);
    println!("  Final Balance    ${:.2}", final_balance);
    println!("  Final Equity     ${:.2}", final_equity);
    println!("  Realized PnL     ${:+.2}", realized_pnl);
    println!("  Fees Paid        ${:.2}", -fees);
    println!(
        "  Gain             {:+.2}%",
        (final_balance / starting_balance - 1.0) * 100.0
    );
    println!("  Fills            {}", result.fills.len());
    if bankrupt {
        println!("  Outcome          LIQUIDATED");
    } else if let Some(s) = result.stats.last() {
        println!("  Closest Bkr      {:.1}%", s.closest_bkr * 100.0);
    }
    println!();

    // ── Per-tag breakdown ──
    println!("─── FILL BREAKDOWN ────────────────────────────────────────────────");
    println!(
        "{:<24} {:>6} {:>12} {:>10} {:>10}",
        "Tag", "Count", "Qty", "PnL", "Fees"
    );
    println!("{:-<66}", "");
    let mut tags: Vec<&'static str> = Vec::new();
    for f in &result.fills {
        if !tags.contains(&f.tag.as_str()) {
            tags.push(f.tag.as_str());
        }
    }
    for tag in tags {
        let matching: Vec<_> = result
            .fills
            .iter()
            .filter(|f| f.tag.as_str() == tag)
            .collect();
        let qty: f64 = matching.iter().map(|f| f.qty.abs()).sum();
        let pnl: f64 = matching.iter().map(|f| f.pnl).sum();
        let fee: f64 = matching.iter().map(|f| f.fee_paid).sum();
        println!(
            "{:<24} {:>6} {:>12.4} {:>+10.2} {:>10.4}",
            tag,
            matching.len(),
            qty,
            pnl,
            fee
        );
    }
    println!();

    // ── Equity curve (text sparkline) ──
    if result.stats.len() > 1 {
        println!("─── EQUITY CURVE ──────────────────────────────────────────────────");
        let width = 66usize;
        let stride = (result.stats.len() as f64 / width as f64).max(1.0);
        let sampled: Vec<f64> = (0..result.stats.len().min(width))
            .map(|i| result.stats[(i as f64 * stride) as usize].equity)
            .collect();
        let max_eq = sampled.iter().copied().fold(f64::MIN, f64::max);
        let min_eq = sampled.iter().copied().fold(f64::MAX, f64::min);
        let range = (max_eq - min_eq).max(1e-9);
        let bars = [
            ' ', '\u{2581}', '\u{2582}', '\u{2583}', '\u{2584}', '\u{2585}', '\u{2586}',
            '\u{2587}', '\u{2588}',
        ];
        let curve: String = sampled
            .iter()
            .map(|&eq| {
                let normalized = ((eq - min_eq) / range * 8.0).round() as usize;
                bars[normalized.min(8)]
            })
            .collect();
        println!("  ${:>10.2} max", max_eq);
        println!("  |{}|", curve);
        println!("  ${:>10.2} min", min_eq);
        println!();
    }
}
