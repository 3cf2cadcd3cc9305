//! EMA band: three exponential moving averages per side.
//!
//! Given span s, alpha = 2 / (s + 1) and each price updates
//! ema <- ema * (1 - alpha) + price * alpha, seeded from the first price.
//! The band extrema bound initial-entry and unstuck prices.

/// Span triple (min, sqrt(min*max), max) scaled from minutes to ticks.
/// Disabled sides get a unit triple so the burn-in window stays defined.
pub fn span_triple(span_min_minutes: f64, span_max_minutes: f64, enabled: bool) -> [f64; 3] {
    if !enabled {
        return [1.0, 1.0, 1.0];
    }
    let spans = [
        span_min_minutes * 60.0,
        (span_min_minutes * span_max_minutes).sqrt() * 60.0,
        span_max_minutes * 60.0,
    ];
    spans.map(|s| if s < 1.0 { 1.0 } else { s })
}

#[derive(Clone, Debug)]
pub struct EmaBand {
    alphas: [f64; 3],
    emas: [f64; 3],
}

impl EmaBand {
    /// Collapse the recurrence over a burn-in price window into the final
    /// EMA state, without materialising the intermediate values.
    pub fn seed(prices: &[f64], spans: [f64; 3]) -> Self {
        let alphas = spans.map(|s| 2.0 / (s + 1.0));
        let mut emas = [prices[0]; 3];
        for &price in &prices[1..] {
            for (ema, alpha) in emas.iter_mut().zip(alphas) {
                *ema = *ema * (1.0 - alpha) + price * alpha;
            }
        }
        Self { alphas, emas }
    }

    #[inline]
    pub fn update(&mut self, price: f64) {
        for (ema, alpha) in self.emas.iter_mut().zip(self.alphas) {
            *ema = *ema * (1.0 - alpha) + price * alpha;
        }
    }

    /// Band minimum, bounds long initial-entry and unstuck prices.
    #[inline]
    pub fn lower(&self) -> f64 {
        self.emas.iter().copied().fold(f64::INFINITY, f64::min)
    }

    /// Band maximum, bounds short initial-entry and unstuck prices.
    #[inline]
    pub fn upper(&self) -> f64 {
        self.emas.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }
}
