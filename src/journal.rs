// =============================================================================
// Journals — append-only JSON-lines event logs
// =============================================================================
//
// Two files:
//   - signal journal:   one row at creation and one at terminal transition,
//     with full pricing, partial-exit state, MFE/MAE, and exit reason
//   - decision journal: one row per scored proposal, accepted or rejected
//
// Rows are serde-serialized structs, one per line; writes append under a
// mutex so concurrent tasks never interleave partial lines.
// =============================================================================

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

use crate::scoring::DecisionRecord;
use crate::tracker::types::Signal;

/// Phase of a signal's life an event row describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalPhase {
    Created,
    Closed,
}

/// One signal journal row: the phase tag plus the full signal state.
#[derive(Debug, Clone, Serialize)]
pub struct SignalEvent {
    pub phase: SignalPhase,
    #[serde(flatten)]
    pub signal: Signal,
}

impl SignalEvent {
    pub fn created(signal: &Signal) -> Self {
        Self {
            phase: SignalPhase::Created,
            signal: signal.clone(),
        }
    }

    pub fn closed(signal: &Signal) -> Self {
        Self {
            phase: SignalPhase::Closed,
            signal: signal.clone(),
        }
    }
}

pub struct Journal {
    signal_path: PathBuf,
    decision_path: PathBuf,
    write_lock: Mutex<()>,
}

impl Journal {
    /// Open (creating parent directories) the journal files.
    pub fn open(signal_path: impl Into<PathBuf>, decision_path: impl Into<PathBuf>) -> Result<Self> {
        let journal = Self {
            signal_path: signal_path.into(),
            decision_path: decision_path.into(),
            write_lock: Mutex::new(()),
        };
        for path in [&journal.signal_path, &journal.decision_path] {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create journal dir {}", parent.display()))?;
            }
        }
        Ok(journal)
    }

    pub fn record_signal(&self, event: &SignalEvent) {
        self.append(&self.signal_path, event);
    }

    pub fn record_decision(&self, record: &DecisionRecord) {
        self.append(&self.decision_path, record);
    }

    /// Serialize one row and append it. Journal failures are logged, never
    /// propagated — observability must not take the engine down.
    fn append<T: Serialize>(&self, path: &Path, row: &T) {
        let line = match serde_json::to_string(row) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "failed to serialize journal row");
                return;
            }
        };

        let _guard = self.write_lock.lock();
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| writeln!(file, "{line}"));

        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "failed to append journal row");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::candle::Timeframe;
    use crate::tracker::types::{Direction, ExitReason, SignalStatus};

    fn sample_signal() -> Signal {
        Signal::new(
            "BTCUSDT",
            "break_retest",
            Direction::Long,
            Timeframe::M15,
            100.0,
            98.0,
            102.0,
            Some(104.0),
            None,
            0.5,
        )
        .unwrap()
    }

    #[test]
    fn signal_events_append_one_line_each() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(
            dir.path().join("signals.jsonl"),
            dir.path().join("decisions.jsonl"),
        )
        .unwrap();

        let mut signal = sample_signal();
        journal.record_signal(&SignalEvent::created(&signal));

        signal.status = SignalStatus::Closed;
        signal.exit_reason = Some(ExitReason::Tp2);
        signal.final_pnl_pct = Some(1.8);
        journal.record_signal(&SignalEvent::closed(&signal));

        let content = std::fs::read_to_string(dir.path().join("signals.jsonl")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["phase"], "CREATED");
        assert_eq!(first["symbol"], "BTCUSDT");

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["phase"], "CLOSED");
        assert_eq!(second["exit_reason"], "TP2");
        assert!((second["final_pnl_pct"].as_f64().unwrap() - 1.8).abs() < 1e-12);
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("deep/nested/signals.jsonl");
        let journal = Journal::open(nested.clone(), dir.path().join("deep/decisions.jsonl")).unwrap();

        journal.record_signal(&SignalEvent::created(&sample_signal()));
        assert!(nested.exists());
    }
}
