// =============================================================================
// Rate Budget — sliding-minute weight ledger mirroring the exchange counter
// =============================================================================
//
// Binance enforces a per-minute request-weight limit (2400/min on futures).
// The engine caps itself at a configurable fraction of that limit (default
// 55%) so that bursts from other consumers of the same key never push the
// account into a ban.
//
// The ledger reads `X-MBX-USED-WEIGHT-1M` after every response and reconciles
// its local counter with the server's; when the server rolls into a new
// minute before we do, the local bucket resyncs instead of accumulating
// drift.
//
// `reserve` is the single entry point for all outbound requests: it either
// grants a permit immediately, suspends the caller until the bucket resets,
// or fails fast when the caller's deadline cannot be met. Bypassing it is a
// programming error — no request leaves the process without a permit.
// =============================================================================

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use crate::config::RateConfig;
use crate::error::EngineError;

/// Proof that weight was reserved for one outbound request.
#[derive(Debug)]
pub struct Permit {
    pub weight: u32,
}

/// Immutable snapshot of the current ledger state, used by the health
/// command and the status snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateSnapshot {
    pub weight_used: u32,
    pub threshold_weight: u32,
    pub bucket_resets_in_ms: i64,
    pub banned_until_ms: Option<i64>,
}

/// Internal mutable ledger, guarded by a single mutex. Callers arrive from
/// many workers; every decision is an atomic read-modify-write under the
/// lock, with all sleeping done outside it.
#[derive(Debug)]
struct Ledger {
    /// Open of the current accounting window (epoch ms, window-aligned).
    bucket_start_ms: i64,
    /// Weight reserved or observed within the current window.
    weight_used: u32,
    /// Ban deadline (epoch ms) when the exchange returned 418/429.
    ban_until_ms: Option<i64>,
    /// Whether the current ban episode has already been announced.
    ban_notified: bool,
}

/// Outcome of a single reservation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Granted,
    /// Banned; retry no earlier than the contained epoch ms.
    BannedUntil(i64),
    /// Bucket full; resets at the contained epoch ms.
    BucketFullUntil(i64),
}

pub struct RateBudget {
    config: RateConfig,
    ledger: Mutex<Ledger>,
}

impl RateBudget {
    pub fn new(config: RateConfig) -> Self {
        let now = Utc::now().timestamp_millis();
        let bucket_start_ms = now - now.rem_euclid(config.minute_window_ms);
        Self {
            config,
            ledger: Mutex::new(Ledger {
                bucket_start_ms,
                weight_used: 0,
                ban_until_ms: None,
                ban_notified: false,
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Reservation
    // -------------------------------------------------------------------------

    /// Reserve `weight` for one request, suspending until the bucket resets
    /// if necessary. `deadline_ms` is the caller's absolute deadline (epoch
    /// ms); if the budget cannot be granted before it, the call fails fast
    /// with `RateCapped` or `Banned` instead of waiting out the clock.
    pub async fn reserve(&self, weight: u32, deadline_ms: i64) -> Result<Permit, EngineError> {
        loop {
            let now = Utc::now().timestamp_millis();
            let decision = self.decide(now, weight);

            match decision {
                Decision::Granted => return Ok(Permit { weight }),
                Decision::BannedUntil(until) => {
                    if until > deadline_ms {
                        return Err(EngineError::Banned {
                            until: chrono::DateTime::from_timestamp_millis(until)
                                .unwrap_or_else(Utc::now),
                        });
                    }
                    let wait = (until - now).max(0) as u64;
                    debug!(wait_ms = wait, "reserve deferred by active ban");
                    sleep(Duration::from_millis(wait)).await;
                }
                Decision::BucketFullUntil(resets_at) => {
                    if resets_at > deadline_ms {
                        return Err(EngineError::RateCapped {
                            resets_at: chrono::DateTime::from_timestamp_millis(resets_at)
                                .unwrap_or_else(Utc::now),
                        });
                    }
                    let wait = (resets_at - now).max(0) as u64;
                    debug!(weight, wait_ms = wait, "reserve deferred until bucket reset");
                    sleep(Duration::from_millis(wait)).await;
                }
            }
        }
    }

    /// One reservation attempt at time `now_ms`. Grants and records the
    /// weight, or reports when a retry could succeed. Split out from
    /// [`reserve`] so the decision logic is testable with synthetic clocks.
    fn decide(&self, now_ms: i64, weight: u32) -> Decision {
        let mut ledger = self.ledger.lock();
        self.roll_bucket(&mut ledger, now_ms);

        if let Some(until) = ledger.ban_until_ms {
            if now_ms < until {
                return Decision::BannedUntil(until);
            }
            // Ban expired; clear it and allow the next episode to notify.
            ledger.ban_until_ms = None;
            ledger.ban_notified = false;
            warn!("exchange ban cleared — resuming requests");
        }

        let threshold = self.config.threshold_weight();
        if ledger.weight_used + weight <= threshold {
            ledger.weight_used += weight;
            Decision::Granted
        } else {
            Decision::BucketFullUntil(ledger.bucket_start_ms + self.config.minute_window_ms)
        }
    }

    /// Advance the bucket when `now_ms` has moved past the current window.
    fn roll_bucket(&self, ledger: &mut Ledger, now_ms: i64) {
        let window = self.config.minute_window_ms;
        if now_ms >= ledger.bucket_start_ms + window {
            ledger.bucket_start_ms = now_ms - now_ms.rem_euclid(window);
            ledger.weight_used = 0;
        }
    }

    // -------------------------------------------------------------------------
    // Reconciliation
    // -------------------------------------------------------------------------

    /// Reconcile the local counter with the server-reported used weight from
    /// a response header. A server value below ours means the exchange has
    /// already rolled into a new minute: resync the bucket to the server
    /// instead of carrying stale local weight forward.
    pub fn observe_used(&self, server_used: u32) {
        let now = Utc::now().timestamp_millis();
        let mut ledger = self.ledger.lock();
        self.roll_bucket(&mut ledger, now);

        if server_used >= ledger.weight_used {
            ledger.weight_used = server_used;
        } else {
            let window = self.config.minute_window_ms;
            ledger.bucket_start_ms = now - now.rem_euclid(window);
            ledger.weight_used = server_used;
            debug!(server_used, "server rolled to a new minute — ledger resynced");
        }
    }

    // -------------------------------------------------------------------------
    // Bans
    // -------------------------------------------------------------------------

    /// Record an exchange-reported ban (418/429). All reservations block
    /// until `until_ms` plus the configured grace. Exactly one notification
    /// is emitted per ban episode; repeated trips while banned only extend
    /// the deadline.
    pub fn trip_ban(&self, until_ms: i64) {
        let effective = until_ms + self.config.ban_grace_ms;
        let mut ledger = self.ledger.lock();

        let extended = ledger
            .ban_until_ms
            .map(|existing| effective.max(existing))
            .unwrap_or(effective);
        ledger.ban_until_ms = Some(extended);

        if !ledger.ban_notified {
            ledger.ban_notified = true;
            warn!(
                until_ms = extended,
                "EXCHANGE BAN — all requests suspended until the deadline passes"
            );
        }
    }

    /// Whether a ban is active right now.
    pub fn is_banned(&self) -> bool {
        let now = Utc::now().timestamp_millis();
        self.ledger
            .lock()
            .ban_until_ms
            .map(|until| now < until)
            .unwrap_or(false)
    }

    // -------------------------------------------------------------------------
    // Snapshot
    // -------------------------------------------------------------------------

    pub fn snapshot(&self) -> RateSnapshot {
        let now = Utc::now().timestamp_millis();
        let ledger = self.ledger.lock();
        RateSnapshot {
            weight_used: ledger.weight_used,
            threshold_weight: self.config.threshold_weight(),
            bucket_resets_in_ms: (ledger.bucket_start_ms + self.config.minute_window_ms - now)
                .max(0),
            banned_until_ms: ledger.ban_until_ms.filter(|until| now < *until),
        }
    }
}

impl std::fmt::Debug for RateBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ledger = self.ledger.lock();
        f.debug_struct("RateBudget")
            .field("weight_used", &ledger.weight_used)
            .field("threshold_weight", &self.config.threshold_weight())
            .field("ban_until_ms", &ledger.ban_until_ms)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn budget() -> RateBudget {
        RateBudget::new(RateConfig::default())
    }

    /// Seed the ledger at a known bucket and usage.
    fn seed(b: &RateBudget, bucket_start_ms: i64, used: u32) {
        let mut ledger = b.ledger.lock();
        ledger.bucket_start_ms = bucket_start_ms;
        ledger.weight_used = used;
    }

    #[test]
    fn grants_within_threshold() {
        let b = budget();
        seed(&b, 0, 0);
        assert_eq!(b.decide(10, 50), Decision::Granted);
        assert_eq!(b.ledger.lock().weight_used, 50);
    }

    #[test]
    fn refuses_at_threshold_boundary() {
        // threshold = 0.55 * 2400 = 1320; Reserve(50) must be refused once
        // used >= 1270.
        let b = budget();

        seed(&b, 0, 1270);
        assert_eq!(b.decide(10, 50), Decision::Granted); // 1270 + 50 == 1320

        seed(&b, 0, 1271);
        assert_eq!(b.decide(10, 50), Decision::BucketFullUntil(60_000));
    }

    #[test]
    fn bucket_rolls_after_window() {
        let b = budget();
        seed(&b, 0, 1320);
        // Inside the window: full.
        assert_eq!(b.decide(59_999, 1), Decision::BucketFullUntil(60_000));
        // One ms later the bucket has reset.
        assert_eq!(b.decide(60_000, 1), Decision::Granted);
        assert_eq!(b.ledger.lock().weight_used, 1);
    }

    #[test]
    fn observe_used_takes_server_maximum() {
        let b = budget();
        seed(&b, Utc::now().timestamp_millis(), 100);
        b.observe_used(250);
        assert_eq!(b.ledger.lock().weight_used, 250);
    }

    #[test]
    fn observe_used_resyncs_on_server_rollover() {
        let b = budget();
        seed(&b, Utc::now().timestamp_millis(), 900);
        // Server reports less than local: it already rolled to a new minute.
        b.observe_used(12);
        let ledger = b.ledger.lock();
        assert_eq!(ledger.weight_used, 12);
    }

    #[test]
    fn ban_blocks_then_clears() {
        let b = budget();
        let now = Utc::now().timestamp_millis();
        seed(&b, now, 0);

        b.trip_ban(now + 10_000);
        match b.decide(now, 1) {
            Decision::BannedUntil(until) => {
                assert_eq!(until, now + 10_000 + RateConfig::default().ban_grace_ms)
            }
            other => panic!("expected BannedUntil, got {other:?}"),
        }
        assert!(b.is_banned());

        // Past the deadline the ban clears and the request is granted.
        let after = now + 10_000 + RateConfig::default().ban_grace_ms + 1;
        assert_eq!(b.decide(after, 1), Decision::Granted);
    }

    #[test]
    fn ban_notification_is_suppressed_until_cleared() {
        let b = budget();
        let now = Utc::now().timestamp_millis();

        b.trip_ban(now + 5_000);
        assert!(b.ledger.lock().ban_notified);

        // A second trip during the same episode keeps the flag set and
        // extends the deadline.
        b.trip_ban(now + 20_000);
        let ledger = b.ledger.lock();
        assert!(ledger.ban_notified);
        assert_eq!(
            ledger.ban_until_ms,
            Some(now + 20_000 + RateConfig::default().ban_grace_ms)
        );
    }

    #[tokio::test]
    async fn reserve_fails_fast_when_deadline_precedes_reset() {
        let b = budget();
        let now = Utc::now().timestamp_millis();
        let bucket_start = now - now.rem_euclid(60_000);
        seed(&b, bucket_start, 1320);

        // Deadline before the bucket reset: must not sleep it out.
        let err = b.reserve(50, now + 10).await.unwrap_err();
        assert!(matches!(err, EngineError::RateCapped { .. }));
    }

    #[tokio::test]
    async fn reserve_fails_fast_when_banned_past_deadline() {
        let b = budget();
        let now = Utc::now().timestamp_millis();
        b.trip_ban(now + 120_000);

        let err = b.reserve(1, now + 1_000).await.unwrap_err();
        assert!(matches!(err, EngineError::Banned { .. }));
    }

    #[test]
    fn snapshot_reports_usage() {
        let b = budget();
        let now = Utc::now().timestamp_millis();
        seed(&b, now - now.rem_euclid(60_000), 333);

        let snap = b.snapshot();
        assert_eq!(snap.weight_used, 333);
        assert_eq!(snap.threshold_weight, 1320);
        assert!(snap.bucket_resets_in_ms <= 60_000);
        assert!(snap.banned_until_ms.is_none());
    }
}
