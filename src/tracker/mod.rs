// =============================================================================
// Signal lifecycle
// =============================================================================
//
// - `types`   — Signal model, directions, statuses, exit reasons, AP extras
// - `locks`   — keyed (symbol, direction, strategy) locks with ttl
// - `tracker` — exit resolution, partial accounting, trailing, time stops

pub mod locks;
pub mod tracker;
pub mod types;

pub use locks::SignalLockTable;
pub use tracker::{step, Observation, PerformanceTracker, StepOutcome};
pub use types::{ApDetails, ApMode, Direction, ExitReason, LockKey, Signal, SignalStatus};
