//! Recorded-trade tick feed: CSV loading and uniform resampling.

use crate::types::Tick;

/// Load recorded trades from CSV with a `ts_ms,qty,price` header.
/// Malformed rows and non-positive timestamps are skipped.
pub fn load_ticks_csv(path: &str) -> Vec<Tick> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return vec![],
    };
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let f: Vec<&str> = line.split(',').collect();
            if f.len() < 3 {
                return None;
            }
            let ts = f[0].trim().parse::<f64>().ok()?;
            let qty = f[1].trim().parse::<f64>().ok()?;
            let price = f[2].trim().parse::<f64>().ok()?;
            if ts <= 0.0 || price <= 0.0 {
                return None;
            }
            Some(Tick { ts, qty, price })
        })
        .collect()
}

/// Resample raw trades onto a uniform `sample_ms` grid. Each bucket
/// accumulates total traded size and carries the last traded price;
/// empty buckets inherit the previous bucket's price with zero size.
pub fn resample(ticks: &[Tick], sample_ms: i64) -> Vec<Tick> {
    if ticks.is_empty() {
        return vec![];
    }
    let step = sample_ms as f64;
    let bucket_of = |ts: f64| (ts / step).floor() * step;
    let first = bucket_of(ticks[0].ts);
    let last = bucket_of(ticks[ticks.len() - 1].ts);
    let n = ((last - first) / step) as usize + 1;
    let mut samples: Vec<Tick> = (0..n)
        .map(|i| Tick {
            ts: first + i as f64 * step,
            qty: 0.0,
            price: 0.0,
        })
        .collect();

    let mut i = 0;
    let mut k = 0;
    let mut ts = first;
    loop {
        if ts == samples[k].ts {
            samples[k].qty += ticks[i].qty;
            samples[k].price = ticks[i].price;
            i += 1;
            if i >= ticks.len() {
                break;
            }
            ts = bucket_of(ticks[i].ts);
        } else {
            k += 1;
            if k >= samples.len() {
                break;
            }
            samples[k].price = samples[k - 1].price;
        }
    }
    samples
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(ts: f64, qty: f64, price: f64) -> Tick {
        Tick { ts, qty, price }
    }

    /// Two trades inside one second merge: sizes add, last price wins.
    #[test]
    fn test_resample_accumulates_within_bucket() {
        let ticks = vec![
            tick(1000.0, 1.0, 100.0),
            tick(1300.0, 2.0, 101.0),
            tick(1900.0, 0.5, 99.0),
        ];
        let samples = resample(&ticks, 1000);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].ts, 1000.0);
        assert_eq!(samples[0].qty, 3.5);
        assert_eq!(samples[0].price, 99.0);
    }

    /// Empty buckets inherit the previous price with zero size.
    #[test]
    fn test_resample_fills_gaps() {
        let ticks = vec![tick(1000.0, 1.0, 100.0), tick(4500.0, 2.0, 105.0)];
        let samples = resample(&ticks, 1000);
        assert_eq!(samples.len(), 4);
        let ts: Vec<f64> = samples.iter().map(|s| s.ts).collect();
        assert_eq!(ts, vec![1000.0, 2000.0, 3000.0, 4000.0]);
        assert_eq!(samples[1].qty, 0.0);
        assert_eq!(samples[1].price, 100.0);
        assert_eq!(samples[2].price, 100.0);
        assert_eq!(samples[3].qty, 2.0);
        assert_eq!(samples[3].price, 105.0);
    }

    /// The grid is uniform regardless of irregular trade spacing.
    #[test]
    fn test_resample_uniform_step() {
        let ticks = vec![
            tick(1234.0, 1.0, 100.0),
            tick(1250.0, 1.0, 100.5),
            tick(7777.0, 1.0, 103.0),
            tick(9001.0, 1.0, 104.0),
        ];
        let samples = resample(&ticks, 1000);
        for w in samples.windows(2) {
            assert_eq!(w[1].ts - w[0].ts, 1000.0);
        }
        assert_eq!(samples[0].ts, 1000.0);
        assert_eq!(samples[samples.len() - 1].ts, 9000.0);
    }

    #[test]
    fn test_resample_empty_input() {
        assert!(resample(&[], 1000).is_empty());
    }
}
