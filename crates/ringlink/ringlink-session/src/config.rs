use ringlink_ring::DEFAULT_CAPACITY;
use std::time::Duration;

/// Runtime knobs for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Size of each ring in bytes, header included.
    pub capacity: usize,
    /// How long the drain loop sleeps when no write notification arrives.
    pub drain_idle_poll: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            drain_idle_poll: Duration::from_millis(1),
        }
    }
}
