//! Fixed-interval retry policies and cooperative cancellation for the polling loops
//! (change status, DNS propagation).

use std::time::{Duration, Instant};

use tokio::sync::watch;

/// How long a polling loop may keep going.
///
/// Both bounds are optional. With neither set the loop only ends on success or
/// cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RetryPolicy {
    /// Pause between two attempts
    pub interval: Duration,
    /// Maximum number of attempts, including the first one
    pub max_attempts: Option<u32>,
    /// Maximum wall-clock time since the first attempt
    pub max_elapsed: Option<Duration>,
}

impl RetryPolicy {
    /// Retry at a fixed interval without any bound
    pub fn fixed(interval: Duration) -> Self {
        RetryPolicy {
            interval,
            max_attempts: None,
            max_elapsed: None,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Bound the total wall-clock time. A zero duration means unbounded.
    pub fn with_max_elapsed(mut self, elapsed: Duration) -> Self {
        self.max_elapsed = if elapsed.is_zero() { None } else { Some(elapsed) };
        self
    }

    pub fn start(&self) -> Attempts {
        Attempts {
            policy: *self,
            started: Instant::now(),
            attempts: 1,
        }
    }
}

/// Why a polling loop stopped before succeeding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    Exhausted { attempts: u32, elapsed: Duration },
    Cancelled,
}

/// Progress of one polling loop under a [`RetryPolicy`]
#[derive(Debug)]
pub struct Attempts {
    policy: RetryPolicy,
    started: Instant,
    attempts: u32,
}

impl Attempts {
    /// Number of attempts made so far
    pub fn count(&self) -> u32 {
        self.attempts
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn exhausted(&self) -> bool {
        let too_many = self
            .policy
            .max_attempts
            .is_some_and(|max| self.attempts >= max);
        let too_long = self
            .policy
            .max_elapsed
            .is_some_and(|max| self.elapsed() + self.policy.interval > max);
        too_many || too_long
    }

    /// Wait for the next attempt. Fails if the policy is exhausted or shutdown was requested.
    pub async fn next(&mut self, shutdown: &Shutdown) -> Result<(), Interrupted> {
        if self.exhausted() {
            return Err(Interrupted::Exhausted {
                attempts: self.attempts,
                elapsed: self.elapsed(),
            });
        }
        shutdown.sleep(self.policy.interval).await?;
        self.attempts += 1;
        Ok(())
    }
}

/// Triggers a [`Shutdown`]
#[derive(Debug)]
pub struct ShutdownTrigger(watch::Sender<bool>);

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }
}

/// Cancellation signal observed by every waiting operation.
///
/// Cloning is cheap, all clones observe the same trigger.
#[derive(Debug, Clone)]
pub struct Shutdown(watch::Receiver<bool>);

impl Shutdown {
    pub fn channel() -> (ShutdownTrigger, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (ShutdownTrigger(tx), Shutdown(rx))
    }

    /// A shutdown that never fires
    pub fn never() -> Shutdown {
        Shutdown::channel().1
    }

    /// Resolves once shutdown is requested
    pub async fn triggered(&self) {
        let mut rx = self.0.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Trigger dropped without firing
                std::future::pending::<()>().await;
            }
        }
    }

    /// Sleep for `duration` unless shutdown is requested first
    pub async fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.triggered() => Err(Interrupted::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(1);

    #[tokio::test]
    async fn should_stop_after_max_attempts() {
        let policy = RetryPolicy::fixed(TICK).with_max_attempts(3);
        let shutdown = Shutdown::never();
        let mut attempts = policy.start();

        assert_eq!(attempts.next(&shutdown).await, Ok(()));
        assert_eq!(attempts.next(&shutdown).await, Ok(()));
        assert!(matches!(
            attempts.next(&shutdown).await,
            Err(Interrupted::Exhausted { attempts: 3, .. })
        ));
    }

    #[tokio::test]
    async fn should_stop_after_max_elapsed() {
        let policy = RetryPolicy::fixed(Duration::from_millis(20))
            .with_max_elapsed(Duration::from_millis(30));
        let shutdown = Shutdown::never();
        let mut attempts = policy.start();

        assert_eq!(attempts.next(&shutdown).await, Ok(()));
        assert!(matches!(
            attempts.next(&shutdown).await,
            Err(Interrupted::Exhausted { .. })
        ));
    }

    #[test]
    fn zero_elapsed_should_mean_unbounded() {
        let policy = RetryPolicy::fixed(TICK).with_max_elapsed(Duration::ZERO);
        assert_eq!(policy.max_elapsed, None);
    }

    #[tokio::test]
    async fn should_cancel_pending_sleep() {
        let (trigger, shutdown) = Shutdown::channel();
        let mut attempts = RetryPolicy::fixed(Duration::from_secs(3600)).start();

        let waiter = tokio::spawn(async move { attempts.next(&shutdown).await });
        trigger.trigger();

        assert_eq!(waiter.await.unwrap(), Err(Interrupted::Cancelled));
    }

    #[tokio::test]
    async fn never_should_not_fire() {
        let shutdown = Shutdown::never();
        assert_eq!(shutdown.sleep(TICK).await, Ok(()));
    }
}
