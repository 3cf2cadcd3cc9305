//! Diagnostic sink for the strategy kernel.
//!
//! Solver divergence and defensive clamps report here; correctness never
//! depends on whether anything is emitted.

pub trait DiagnosticSink {
    fn warn(&self, msg: &str);
}

/// Default sink: prefixed stderr lines.
pub struct StderrSink;

impl DiagnosticSink for StderrSink {
    fn warn(&self, msg: &str) {
        eprintln!("[WARN] {}", msg);
    }
}

/// No-op sink for quiet runs and tests.
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn warn(&self, _msg: &str) {}
}
