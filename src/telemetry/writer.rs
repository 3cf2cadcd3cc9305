//! CSV output for simulation results.
//!
//! One file per record stream, header row first, explicit flush at the end.
//! All I/O happens after the run; nothing here touches the hot path.

use std::fs::File;
use std::io::Write;

use crate::types::{Fill, StatsSnapshot};

/// Simple CSV writer that buffers writes.
struct CsvWriter {
    file: File,
}

impl CsvWriter {
    fn create(path: &str, header: &str) -> std::io::Result<Self> {
        let mut file = File::create(path)?;
        writeln!(file, "{}", header).ok();
        Ok(Self { file })
    }

    fn flush(&mut self) {
        self.file.flush().ok();
    }
}

pub fn write_fills_csv(path: &str, fills: &[Fill]) -> std::io::Result<()> {
    let mut csv = CsvWriter::create(
        path,
        "index,timestamp,pnl,fee_paid,balance,equity,qty,price,psize,pprice,tag",
    )?;
    for f in fills {
        writeln!(
            csv.file,
            "{},{},{},{},{},{},{},{},{},{},{}",
            f.index,
            f.timestamp,
            f.pnl,
            f.fee_paid,
            f.balance,
            f.equity,
            f.qty,
            f.price,
            f.psize,
            f.pprice,
            f.tag,
        )
        .ok();
    }
    csv.flush();
    Ok(())
}

pub fn write_stats_csv(path: &str, stats: &[StatsSnapshot]) -> std::io::Result<()> {
    let mut csv = CsvWriter::create(
        path,
        "timestamp,balance,equity,bkr_price,long_psize,long_pprice,short_psize,short_pprice,\
         price,closest_bkr,balance_long,balance_short,equity_long,equity_short",
    )?;
    for s in stats {
        writeln!(
            csv.file,
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            s.timestamp,
            s.balance,
            s.equity,
            s.bkr_price,
            s.long_psize,
            s.long_pprice,
            s.short_psize,
            s.short_pprice,
            s.price,
            s.closest_bkr,
            s.balance_long,
            s.balance_short,
            s.equity_long,
            s.equity_short,
        )
        .ok();
    }
    csv.flush();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderTag, Side};

    #[test]
    fn test_fills_csv_round_trip() {
        let dir = std::env::temp_dir().join("perpgrid_writer_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("fills.csv");
        let path = path.to_str().unwrap();

        let fills = vec![Fill {
            index: 7,
            timestamp: 61_000.0,
            pnl: 0.0,
            fee_paid: -0.003,
            balance: 999.997,
            equity: 1000.1,
            qty: 0.15,
            price: 100.0,
            psize: 0.15,
            pprice: 100.0,
            tag: OrderTag::InitialEntry(Side::Long),
        }];
        write_fills_csv(path, &fills).unwrap();

        let content = std::fs::read_to_string(path).unwrap();
        let mut lines = content.lines();
        assert!(lines.next().unwrap().starts_with("index,timestamp"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("7,61000,"));
        assert!(row.ends_with(",long_ientry"));
        assert_eq!(lines.next(), None);
    }
}
