use std::time;

pub const DEFAULT_MIN_DURATION: time::Duration = time::Duration::from_millis(100);

/// Bookkeeping for how many attempts a unit of work has used and how long
/// to wait before the next one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryState {
    pub wait: Option<time::Duration>,
    pub total_allowed: u32,
    pub attempt: u32,
}

impl RetryState {
    #[must_use]
    pub fn new(attempt: u32, total_allowed: u32, wait: Option<time::Duration>) -> Self {
        Self {
            wait,
            total_allowed,
            attempt,
        }
    }

    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.total_allowed.saturating_sub(self.attempt)
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.total_allowed
    }
}

/// `RetryDecider` decides the parameters of the next attempt from the
/// current state, returning `None` once no attempts remain.
pub trait RetryDecider {
    fn decide(&self, state: RetryState) -> Option<RetryState>;
}
