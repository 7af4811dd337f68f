// =============================================================================
// Signal Locks — at most one non-terminal signal per (symbol, direction,
// strategy)
// =============================================================================
//
// The lock table is the serialization point for signal creation: a strategy
// may not re-emit on the same (symbol, direction) while its previous signal
// is still open. Acquisition is an atomic conditional insert in the store;
// release happens strictly when the tracker closes the signal; TTL expiry is
// the safety valve for locks orphaned by a crash between acquire and
// persist.
//
// On process start, locks are rebuilt from the surviving ACTIVE signals so a
// restart never duplicate-emits.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::market_data::store::Store;
use crate::tracker::types::{LockKey, Signal};

/// Lock lifetime: generous enough to outlive any signal (the longest-lived
/// runner is bounded by the post-TP2 time stop at 72h).
const LOCK_TTL_MS: i64 = 7 * 24 * 3_600_000;

pub struct SignalLockTable {
    store: Arc<Store>,
}

impl SignalLockTable {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Atomically acquire the key. Returns false when a non-expired lock is
    /// already held.
    pub async fn try_acquire(&self, key: &LockKey) -> Result<bool, EngineError> {
        let acquired = self
            .store
            .try_acquire_lock(key, LOCK_TTL_MS, Utc::now().timestamp_millis())
            .await?;
        if acquired {
            debug!(key = %key, "signal lock acquired");
        } else {
            debug!(key = %key, "signal lock busy");
        }
        Ok(acquired)
    }

    pub async fn release(&self, key: &LockKey) -> Result<(), EngineError> {
        self.store.release_lock(key).await?;
        debug!(key = %key, "signal lock released");
        Ok(())
    }

    pub async fn is_held(&self, key: &LockKey) -> Result<bool, EngineError> {
        self.store
            .lock_held(key, Utc::now().timestamp_millis())
            .await
    }

    /// Recreate missing locks for the given (reloaded) active signals.
    /// Called once at startup before the first cycle runs.
    pub async fn rebuild(&self, active: &[Signal]) -> Result<(), EngineError> {
        let mut recreated = 0u32;
        for signal in active {
            let key = signal.lock_key();
            if !self.is_held(&key).await? {
                if self.try_acquire(&key).await? {
                    recreated += 1;
                } else {
                    warn!(key = %key, "lock rebuild raced with another acquirer");
                }
            }
        }
        info!(
            active = active.len(),
            recreated, "signal locks rebuilt from active signals"
        );
        Ok(())
    }
}
