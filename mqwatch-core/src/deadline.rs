//! Deadline tracking for timeout-bounded operations.
//!
//! A [`Deadline`] is created once at the start of a logical operation and
//! threaded through every blocking call that operation makes, so sequential
//! waits (connect, then wait-for-receipts, then wait-for-arrival) share one
//! budget instead of each getting a fresh allowance.

use std::time::{Duration, Instant};

/// Stopwatch with a fixed total timeout budget.
///
/// The clock starts at construction and never resets; `elapsed()` grows
/// monotonically and `remaining()` floors at zero. A new logical operation
/// creates a new clock.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use mqwatch_core::Deadline;
///
/// let deadline = Deadline::new(Duration::from_secs(5));
/// assert!(!deadline.is_expired());
/// assert!(deadline.remaining() <= Duration::from_secs(5));
/// ```
///
/// Chaining sequential waits against one budget:
///
/// ```
/// use std::time::Duration;
/// use mqwatch_core::Deadline;
///
/// let deadline = Deadline::new(Duration::from_secs(10));
/// let first_slice = deadline.remaining();
/// // ... perform a bounded wait with `first_slice` ...
/// let second_slice = deadline.remaining();
/// assert!(second_slice <= first_slice);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    /// Default operation budget, matching the engine's default timeout
    pub const DEFAULT_BUDGET: Duration = Duration::from_secs(5);

    /// Start a new deadline clock with the given total budget
    #[must_use]
    pub fn new(budget: Duration) -> Self {
        Self { started: Instant::now(), budget }
    }

    /// Total budget this clock was created with
    #[must_use]
    pub const fn budget(&self) -> Duration {
        self.budget
    }

    /// Time elapsed since the clock was created
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Budget not yet consumed, floored at zero
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.elapsed())
    }

    /// Whether the budget is fully consumed
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Sleep for `amount`, capped by the remaining budget.
    ///
    /// Returns immediately when the budget is already consumed, which is what
    /// lets a poll loop on an expired deadline perform its single immediate
    /// check without sleeping.
    pub async fn sleep(&self, amount: Duration) {
        let capped = amount.min(self.remaining());
        if capped.is_zero() {
            return;
        }
        tokio::time::sleep(capped).await;
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BUDGET)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_never_goes_negative() {
        let deadline = Deadline::new(Duration::ZERO);
        assert_eq!(deadline.remaining(), Duration::ZERO);
        assert!(deadline.is_expired());
    }

    #[test]
    fn elapsed_is_monotonic() {
        let deadline = Deadline::new(Duration::from_secs(1));
        let first = deadline.elapsed();
        let second = deadline.elapsed();
        assert!(second >= first);
    }

    #[tokio::test]
    async fn sleep_is_capped_by_remaining_budget() {
        let deadline = Deadline::new(Duration::from_millis(30));
        deadline.sleep(Duration::from_secs(10)).await;
        assert!(deadline.is_expired());
        // The sleep must not have lasted anywhere near the requested amount.
        assert!(deadline.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn sleep_on_expired_deadline_returns_immediately() {
        let deadline = Deadline::new(Duration::ZERO);
        let before = Instant::now();
        deadline.sleep(Duration::from_secs(5)).await;
        assert!(before.elapsed() < Duration::from_millis(50));
    }
}
