//! Idle connection timeout sweep.
//!
//! The sweep runs on a keepalive worker and only ever touches connections
//! that are checked in to the idle pool. A connection mid-action is never
//! force-closed from outside; in-flight I/O enforces `connection_timeout`
//! locally on its own worker.

use std::time::{Duration, Instant};

use crate::engine::EngineShared;
use crate::engine::pool::PoolEntry;

/// Sweep cadence: half the keepalive window, clamped so a short timeout
/// still gets swept promptly and a long one does not spin.
pub fn sweep_interval(keepalive: Duration) -> Duration {
    (keepalive / 2).clamp(Duration::from_millis(100), Duration::from_secs(5))
}

/// Claim, close, and free every idle connection whose last activity
/// predates the keepalive window.
pub fn run_sweep(shared: &EngineShared) {
    let Some(cutoff) = Instant::now().checked_sub(shared.cfg.keepalive_duration()) else {
        return;
    };
    let expired = shared.pool.sweep_idle_expired(cutoff);
    for mut conn in expired {
        let id = conn.id();
        tracing::debug!(conn_id = id, "closing idle connection past keepalive timeout");
        conn.close();
        shared.pool.free_slot(id);
    }
}
