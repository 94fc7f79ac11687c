use tracing::warn;

/// Idle timeouts below this are allowed but likely to stop workspaces that
/// are still in use.
pub const MINIMUM_RECOMMENDED_IDLE_TIMEOUT_MS: i64 = 5 * 60 * 1000;

/// Process-wide expiration settings. A value of zero or less disables the
/// corresponding timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirationPolicy {
    idle_timeout_ms: i64,
    run_timeout_ms: i64,
}

impl ExpirationPolicy {
    pub fn new(idle_timeout_ms: i64, run_timeout_ms: i64) -> Self {
        if idle_timeout_ms > 0 && idle_timeout_ms < MINIMUM_RECOMMENDED_IDLE_TIMEOUT_MS {
            warn!(
                "Idle timeout is set to {}ms, which is less than the recommended minimum of {}ms. \
                 Workspaces may be stopped while they are still in use.",
                idle_timeout_ms, MINIMUM_RECOMMENDED_IDLE_TIMEOUT_MS
            );
        }
        Self {
            idle_timeout_ms,
            run_timeout_ms,
        }
    }

    pub fn disabled() -> Self {
        Self::new(0, 0)
    }

    pub fn idle_timeout_ms(&self) -> i64 {
        self.idle_timeout_ms
    }

    pub fn run_timeout_ms(&self) -> i64 {
        self.run_timeout_ms
    }

    pub fn idle_enabled(&self) -> bool {
        self.idle_timeout_ms > 0
    }

    pub fn run_enabled(&self) -> bool {
        self.run_timeout_ms > 0
    }

    /// Expiration for activity seen at `activity_time`, if idle expiry is on.
    pub fn expiration_after(&self, activity_time: i64) -> Option<i64> {
        self.idle_enabled()
            .then(|| activity_time.saturating_add(self.idle_timeout_ms))
    }
}
