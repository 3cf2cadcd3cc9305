pub mod contract;
pub mod ema;
pub mod interp;
pub mod round;
