//! Wall-clock milliseconds anchored to the tokio clock.
//!
//! Deadlines written to the store are epoch milliseconds, while local timers run on
//! tokio's clock. Anchoring one to the other keeps both consistent, including when
//! tests pause and advance tokio time.

use tokio::time::Instant;

/// Epoch milliseconds, `0` meaning "unset"
pub type Millis = i64;

#[derive(Debug, Clone, Copy)]
pub struct Clock {
    base_ms: Millis,
    base_instant: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self::starting_at(chrono::Utc::now().timestamp_millis())
    }

    /// Clock whose `now_ms()` reads `base_ms` at the moment of creation
    pub fn starting_at(base_ms: Millis) -> Self {
        Self {
            base_ms,
            base_instant: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> Millis {
        let elapsed = self.base_instant.elapsed().as_millis() as Millis;
        self.base_ms + elapsed
    }

    /// RFC 3339 rendering of `now_ms()` for protocol messages
    pub fn now_rfc3339(&self) -> String {
        chrono::DateTime::from_timestamp_millis(self.now_ms())
            .unwrap_or_default()
            .to_rfc3339()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
