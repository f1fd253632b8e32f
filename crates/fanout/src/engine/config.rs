use core::time::Duration;

/// Tunables for a [`FanoutEngine`](crate::FanoutEngine).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound on how long a send waits for the allocator to issue an ID.
    ///
    /// A send that cannot get an ID within this budget fails with
    /// [`AllocError::Stalled`](crate::AllocError::Stalled) before touching the
    /// store.
    pub max_id_wait: Duration,
}

impl EngineConfig {
    pub const DEFAULT_MAX_ID_WAIT: Duration = Duration::from_millis(100);

    pub const fn with_max_id_wait(mut self, max_id_wait: Duration) -> Self {
        self.max_id_wait = max_id_wait;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_id_wait: Self::DEFAULT_MAX_ID_WAIT,
        }
    }
}
