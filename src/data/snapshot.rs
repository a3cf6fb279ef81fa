//! Ledger snapshot persistence

use crate::risk::LedgerSnapshot;
use std::fs;
use std::path::Path;

/// Write the ledger as pretty JSON, replacing the file atomically
pub fn write_snapshot(path: impl AsRef<Path>, snapshot: &LedgerSnapshot) -> anyhow::Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?)?;
    fs::rename(&tmp, path)?;

    tracing::debug!(path = ?path, open = snapshot.open_positions.len(), "Wrote ledger snapshot");
    Ok(())
}

/// Read a snapshot, `None` when the file does not exist
pub fn read_snapshot(path: impl AsRef<Path>) -> anyhow::Result<Option<LedgerSnapshot>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&content)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::risk::position::tests::open_position;
    use crate::risk::{PortfolioLedger, PositionSide, StopPolicy};
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    #[test]
    fn test_snapshot_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state/ledger.json");

        let mut ledger = PortfolioLedger::new(
            &LedgerConfig {
                initial_balance: dec!(1000),
                sweep_threshold: dec!(0),
            },
            false,
        );
        ledger
            .apply_open(open_position(
                PositionSide::Short,
                StopPolicy::Static {
                    stop_rate: dec!(0.02),
                },
            ))
            .unwrap();

        write_snapshot(&path, &ledger.snapshot()).unwrap();
        let read = read_snapshot(&path).unwrap().unwrap();
        assert_eq!(read, ledger.snapshot());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_read_missing_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        assert!(read_snapshot(temp_dir.path().join("none.json"))
            .unwrap()
            .is_none());
    }
}
