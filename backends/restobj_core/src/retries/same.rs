use std::time;

use super::{RetryDecider, RetryState, DEFAULT_MIN_DURATION};

/// Waits the same fixed duration before every attempt.
#[derive(Clone, Debug)]
pub struct SameBackoffDecider(time::Duration);

impl Default for SameBackoffDecider {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_DURATION)
    }
}

impl SameBackoffDecider {
    pub fn new(duration: impl Into<time::Duration>) -> Self {
        Self(duration.into())
    }
}

impl RetryDecider for SameBackoffDecider {
    fn decide(&self, state: RetryState) -> Option<RetryState> {
        let last_attempt = state.attempt;
        if last_attempt >= state.total_allowed {
            return None;
        }

        let next_attempt = last_attempt.saturating_add(1);
        Some(RetryState {
            wait: Some(self.0),
            attempt: next_attempt,
            total_allowed: state.total_allowed,
        })
    }
}

#[cfg(test)]
mod same_retry_test {
    use super::RetryDecider;
    use super::RetryState;
    use super::SameBackoffDecider;
    use super::DEFAULT_MIN_DURATION;

    #[test]
    fn can_generate_same_backoff_until_exhausted() {
        let decider = SameBackoffDecider::default();

        let base = RetryState::new(0, 2, None);
        assert_eq!(base.remaining(), 2);

        let first = decider.decide(base).expect("should get returned");
        assert_eq!(first.wait, Some(DEFAULT_MIN_DURATION));
        assert_eq!(first.attempt, 1);

        let second = decider.decide(first).expect("should get returned");
        assert_eq!(second.attempt, 2);
        assert!(second.is_exhausted());

        assert!(decider.decide(second).is_none());
    }
}
