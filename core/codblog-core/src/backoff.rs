use std::cmp;
use std::time::Duration;

const DEFAULT_DELAY: Duration = Duration::from_secs(3);
const MAX_DOUBLINGS: u32 = 16;

/// Delay before the notification channel retries after a close.
///
/// `Fixed` retries forever at the same interval. `Exponential` doubles the
/// delay per consecutive failure and caps it at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    Fixed(Duration),
    Exponential { base: Duration, max: Duration },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Fixed(DEFAULT_DELAY)
    }
}

impl ReconnectPolicy {
    /// `failures` counts consecutive closes since the last successful open,
    /// starting at 1.
    pub fn delay_for(&self, failures: u32) -> Duration {
        match *self {
            ReconnectPolicy::Fixed(delay) => delay,
            ReconnectPolicy::Exponential { base, max } => {
                let doublings = cmp::min(failures.saturating_sub(1), MAX_DOUBLINGS);
                let delay = base.saturating_mul(1u32 << doublings);
                cmp::min(delay, max)
            }
        }
    }
}
