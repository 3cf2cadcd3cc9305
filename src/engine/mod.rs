pub mod backtest;
pub mod close;
pub mod entry;
pub mod position;
pub mod solvers;

/// Caller bugs. These fail fast before or at simulation start; once the
/// tick loop is running no error crosses the tick boundary.
#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("secondary_allocation must be < 1.0, got {0}")]
    SecondaryAllocation(f64),
    #[error("cannot build an entry grid for a position without an average price")]
    MissingPositionPrice,
    #[error("ema span of {span} ticks exceeds the {n_ticks} ticks supplied")]
    EmaSpanTooLong { span: usize, n_ticks: usize },
    #[error("starting balance must be positive, got {0}")]
    NonPositiveBalance(f64),
    #[error("tick {index} contains a non-finite value")]
    NonFiniteTick { index: usize },
}
