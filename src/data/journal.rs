//! Append-only closed trade journal (JSON lines)

use crate::risk::ClosedTrade;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// One JSON object per closed trade, appended in close order
#[derive(Debug)]
pub struct TradeJournal {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl TradeJournal {
    /// Open for appending, creating parent directories and the file as needed.
    ///
    /// A torn final write is cut back to the last complete line first.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        if path.exists() {
            truncate_torn_tail(&path)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append and flush one trade
    pub fn append(&mut self, trade: &ClosedTrade) -> anyhow::Result<()> {
        serde_json::to_writer(&mut self.writer, trade)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Every trade in the journal; a missing file is an empty history.
    ///
    /// An unreadable final line is a torn write and skipped. Any earlier
    /// unreadable line fails the load.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Vec<ClosedTrade>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(path)?);
        let mut trades = Vec::new();
        let mut torn: Option<(usize, serde_json::Error)> = None;
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Some((bad_line, e)) = torn.take() {
                anyhow::bail!("corrupt journal {:?} at line {}: {}", path, bad_line, e);
            }
            match serde_json::from_str::<ClosedTrade>(&line) {
                Ok(trade) => trades.push(trade),
                Err(e) => torn = Some((line_no + 1, e)),
            }
        }
        if let Some((line, e)) = torn {
            tracing::warn!(path = ?path, line, error = %e, "Skipping torn final journal line");
        }

        tracing::debug!(path = ?path, count = trades.len(), "Loaded trade journal");
        Ok(trades)
    }

    /// Trades for one symbol
    pub fn load_symbol(path: impl AsRef<Path>, symbol: &str) -> anyhow::Result<Vec<ClosedTrade>> {
        Ok(Self::load(path)?
            .into_iter()
            .filter(|t| t.symbol == symbol)
            .collect())
    }
}

/// Drop bytes after the last newline
fn truncate_torn_tail(path: &Path) -> anyhow::Result<()> {
    let data = fs::read(path)?;
    if data.last().map_or(true, |b| *b == b'\n') {
        return Ok(());
    }
    let keep = data.iter().rposition(|b| *b == b'\n').map_or(0, |p| p + 1);
    tracing::warn!(path = ?path, dropped = data.len() - keep, "Truncating torn journal tail");
    OpenOptions::new().write(true).open(path)?.set_len(keep as u64)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::position::tests::{open_position, t0};
    use crate::risk::{CloseReason, PositionSide, StopPolicy};
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn trade(symbol: &str, exit: rust_decimal::Decimal) -> ClosedTrade {
        let mut position = open_position(
            PositionSide::Long,
            StopPolicy::Static {
                stop_rate: dec!(0.02),
            },
        );
        position.symbol = symbol.to_string();
        position.close(exit, t0(), CloseReason::Signal).unwrap()
    }

    #[test]
    fn test_append_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("journal/trades.jsonl");

        let mut journal = TradeJournal::open(&path).unwrap();
        let first = trade("BTCUSDT", dec!(110));
        let second = trade("ETHUSDT", dec!(95));
        journal.append(&first).unwrap();
        journal.append(&second).unwrap();
        drop(journal);

        let loaded = TradeJournal::load(&path).unwrap();
        assert_eq!(loaded, vec![first.clone(), second]);

        let btc = TradeJournal::load_symbol(&path, "BTCUSDT").unwrap();
        assert_eq!(btc, vec![first]);
    }

    #[test]
    fn test_reopen_appends() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("trades.jsonl");

        TradeJournal::open(&path)
            .unwrap()
            .append(&trade("BTCUSDT", dec!(101)))
            .unwrap();
        TradeJournal::open(&path)
            .unwrap()
            .append(&trade("BTCUSDT", dec!(102)))
            .unwrap();

        assert_eq!(TradeJournal::load(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_load_missing_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        assert!(TradeJournal::load(temp_dir.path().join("none.jsonl"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_torn_line_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("trades.jsonl");

        let mut journal = TradeJournal::open(&path).unwrap();
        journal.append(&trade("BTCUSDT", dec!(101))).unwrap();
        drop(journal);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"id\":").unwrap();

        assert_eq!(TradeJournal::load(&path).unwrap().len(), 1);
    }

    #[test]
    fn test_reopen_after_torn_write_keeps_next_trade() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("trades.jsonl");

        let first = trade("BTCUSDT", dec!(101));
        let second = trade("BTCUSDT", dec!(102));
        TradeJournal::open(&path).unwrap().append(&first).unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"id\":").unwrap();
        drop(file);

        TradeJournal::open(&path).unwrap().append(&second).unwrap();

        assert_eq!(TradeJournal::load(&path).unwrap(), vec![first, second]);
    }

    #[test]
    fn test_corrupt_middle_line_fails_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("trades.jsonl");

        let mut journal = TradeJournal::open(&path).unwrap();
        journal.append(&trade("BTCUSDT", dec!(101))).unwrap();
        drop(journal);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"not json\n").unwrap();
        drop(file);
        TradeJournal::open(&path)
            .unwrap()
            .append(&trade("BTCUSDT", dec!(102)))
            .unwrap();

        assert!(TradeJournal::load(&path).is_err());
    }
}
