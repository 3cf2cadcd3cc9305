use serde::Deserialize;

use crate::types::ExchangeParams;

/// Full per-side strategy parameter vector. Long and short carry
/// independent copies of this record.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SideParams {
    pub enabled: bool,

    /// Hard cap on position notional / balance.
    pub wallet_exposure_limit: f64,

    // Ladder shape
    pub max_n_entry_orders: usize,
    pub grid_span: f64,
    pub eprice_exp_base: f64,

    // First-order placement
    pub initial_qty_pct: f64,
    pub initial_eprice_ema_dist: f64,

    /// Per-step average-price drift target; the weighting solver scales it.
    pub eprice_pprice_diff: f64,

    // Tail tranche
    pub secondary_allocation: f64,
    pub secondary_pprice_diff: f64,

    // Close ladder
    pub min_markup: f64,
    pub markup_range: f64,
    /// Kept as a float (optimizer legacy), rounded at use.
    pub n_close_orders: f64,

    // Auto-unstuck
    pub auto_unstuck_wallet_exposure_threshold: f64,
    pub auto_unstuck_ema_dist: f64,

    // EMA band bounds, in minutes
    pub ema_span_min: f64,
    pub ema_span_max: f64,
}

impl Default for SideParams {
    fn default() -> Self {
        Self {
            enabled: true,
            wallet_exposure_limit: 1.0,
            max_n_entry_orders: 10,
            grid_span: 0.3,
            eprice_exp_base: 1.618034,
            initial_qty_pct: 0.01,
            initial_eprice_ema_dist: 0.0,
            eprice_pprice_diff: 0.0025,
            secondary_allocation: 0.0,
            secondary_pprice_diff: 0.05,
            min_markup: 0.0045,
            markup_range: 0.0075,
            n_close_orders: 7.0,
            auto_unstuck_wallet_exposure_threshold: 0.0,
            auto_unstuck_ema_dist: 0.0,
            ema_span_min: 240.0,
            ema_span_max: 1440.0,
        }
    }
}

/// The two parallel per-side vectors plus the instrument descriptor,
/// loaded together from one JSON document.
#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct StrategyParams {
    pub long: SideParams,
    pub short: SideParams,
    pub exchange: ExchangeParams,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

impl StrategyParams {
    /// Load from a JSON file; absent fields fall back to defaults.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }
}

/// Backtest driver settings, loaded from environment variables.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Path to the recorded-tick CSV.
    pub ticks_path: String,
    /// Optional strategy parameter JSON; defaults apply when unset.
    pub params_path: Option<String>,
    /// Output directory for fills.csv / stats.csv.
    pub out_dir: String,
    pub starting_balance: f64,
    /// Resample bucket in ms; 0 disables resampling.
    pub sample_ms: i64,
    /// Suppress kernel diagnostics.
    pub quiet: bool,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            ticks_path: std::env::var("TICKS_CSV").unwrap_or_else(|_| "ticks.csv".into()),
            params_path: std::env::var("PARAMS_JSON").ok(),
            out_dir: std::env::var("OUT_DIR").unwrap_or_else(|_| "runs".into()),
            starting_balance: std::env::var("STARTING_BALANCE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000.0),
            sample_ms: std::env::var("SAMPLE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
            quiet: std::env::var("QUIET")
                .map(|v| v == "1" || v.to_lowercase() == "true")
                .unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_parse_partial_json() {
        let params: StrategyParams = serde_json::from_str(
            r#"{"long": {"wallet_exposure_limit": 0.3, "initial_qty_pct": 0.05},
                "short": {"enabled": false},
                "exchange": {"min_cost": 1.0}}"#,
        )
        .expect("partial json should parse with defaults");
        assert_eq!(params.long.wallet_exposure_limit, 0.3);
        assert_eq!(params.long.initial_qty_pct, 0.05);
        // untouched fields keep defaults
        assert_eq!(params.long.max_n_entry_orders, 10);
        assert!(!params.short.enabled);
        assert_eq!(params.exchange.min_cost, 1.0);
        assert_eq!(params.exchange.qty_step, 0.001);
    }

    #[test]
    fn test_params_default_roundtrip() {
        let params: StrategyParams = serde_json::from_str("{}").expect("empty json");
        assert!(params.long.enabled);
        assert_eq!(params.long.eprice_exp_base, 1.618034);
        assert_eq!(params.exchange.maker_fee, 0.0002);
    }
}
