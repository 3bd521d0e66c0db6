use core::num::NonZeroU32;
use embassy_time::Duration;

/// How a connectivity loop waits between attempts and when it gives up.
///
/// The default for both the WiFi join and the broker reconnect is
/// [`RetryPolicy::unbounded`]: the node keeps trying forever and sensor
/// sampling stalls meanwhile. A bound is opt-in through the configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub max_attempts: Option<NonZeroU32>,
}

impl RetryPolicy {
    pub const fn unbounded(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    pub const fn bounded(delay: Duration, max_attempts: NonZeroU32) -> Self {
        Self {
            delay,
            max_attempts: Some(max_attempts),
        }
    }

    pub fn is_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts
            .is_some_and(|max_attempts| attempts >= max_attempts.get())
    }
}

/// The only way the control loop suspends. On the device this is an
/// `embassy_time::Timer`; tests substitute a recorder.
#[allow(async_fn_in_trait)]
pub trait Sleeper {
    async fn sleep(&mut self, duration: Duration);
}

#[cfg(target_os = "espidf")]
pub struct EmbassySleeper;

#[cfg(target_os = "espidf")]
impl Sleeper for EmbassySleeper {
    async fn sleep(&mut self, duration: Duration) {
        embassy_time::Timer::after(duration).await;
    }
}
