use std::thread;
use std::time::Duration;

const DEFAULT_WARM_UP: Duration = Duration::from_secs(20);
const MAX_WARM_UP: Duration = Duration::from_secs(120);

/// What the provider said about the failed call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ProviderHint {
    /// Ordinary failure; consumes an attempt.
    None,
    /// Cold model with an optional estimate of when it will be ready.
    WarmingUp { estimated: Option<Duration> },
}

impl ProviderHint {
    pub fn warming_up(estimated_secs: Option<f64>) -> Self {
        let estimated = estimated_secs
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(|secs| Duration::from_secs_f64(secs.min(MAX_WARM_UP.as_secs_f64())));
        Self::WarmingUp { estimated }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    base: Duration,
    multiplier: u32,
    default_warm_up: Duration,
    max_warm_up: Duration,
}

impl BackoffPolicy {
    pub const fn fixed(base: Duration) -> Self {
        Self {
            base,
            multiplier: 1,
            default_warm_up: DEFAULT_WARM_UP,
            max_warm_up: MAX_WARM_UP,
        }
    }

    /// 2s between failed inference attempts.
    pub const fn inference() -> Self {
        Self::fixed(Duration::from_secs(2))
    }

    /// 1s between multimodal generation attempts.
    pub const fn vision() -> Self {
        Self::fixed(Duration::from_secs(1))
    }

    pub fn with_multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = multiplier.max(1);
        self
    }

    pub fn with_default_warm_up(mut self, wait: Duration) -> Self {
        self.default_warm_up = wait;
        self
    }

    /// Wait before the next call after `attempt` (1-based) ended with `hint`.
    pub fn delay(&self, attempt: u32, hint: ProviderHint) -> Duration {
        match hint {
            ProviderHint::WarmingUp { estimated } => estimated
                .unwrap_or(self.default_warm_up)
                .min(self.max_warm_up),
            ProviderHint::None => {
                let exponent = attempt.saturating_sub(1);
                let factor = self.multiplier.checked_pow(exponent).unwrap_or(u32::MAX);
                self.base.checked_mul(factor).unwrap_or(self.max_warm_up)
            }
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::inference()
    }
}

/// Every wait in the image chain goes through this, so tests can swap in a
/// fake clock.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}
