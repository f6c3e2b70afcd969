use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

/// Bounded exponential-backoff policy for a fallible async operation.
///
/// All but the last attempt are guarded: a failure logs a warning, waits the
/// current delay, doubles (or whatever `factor` says) and tries again. The
/// final attempt's outcome is handed back to the caller as-is, so exhaustion
/// surfaces the last error instead of swallowing it. No jitter.
#[derive(Clone, Copy, Debug)]
pub struct Backoff {
    pub attempts: u32,
    pub initial_delay: Duration,
    pub factor: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            attempts: 4,
            initial_delay: Duration::from_secs(3),
            factor: 2,
        }
    }
}

impl Backoff {
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut remaining = self.attempts;
        let mut delay = self.initial_delay;
        while remaining > 1 {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    tracing::warn!("{err}, retrying in {delay:?}");
                    sleep(delay).await;
                    delay *= self.factor;
                    remaining -= 1;
                }
            }
        }
        op().await
    }
}
