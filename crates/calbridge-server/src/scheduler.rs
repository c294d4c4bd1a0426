//! Background renewal of watch channels.
//!
//! Provider channels expire, so every connected user gets a job that
//! periodically re-runs watch setup:
//! - Configurable interval with jitter to avoid thundering herd
//! - Exponential backoff on errors
//! - Gives up after too many consecutive failures

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use calbridge_core::UserId;
use calbridge_providers::BoxFuture;

use crate::error::{ServerError, ServerResult};

/// Renewal configuration.
#[derive(Debug, Clone)]
pub struct RenewalConfig {
    /// Base interval between renewals.
    pub interval: Duration,
    /// Maximum jitter to add to the interval (as fraction 0.0-1.0).
    pub jitter_fraction: f64,
    /// Initial backoff duration on error.
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Backoff multiplier.
    pub backoff_multiplier: f64,
    /// Maximum consecutive failures before giving up.
    pub max_consecutive_failures: u32,
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(6 * 24 * 3600), // channels live about a week
            jitter_fraction: 0.05,
            initial_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(3600),
            backoff_multiplier: 2.0,
            max_consecutive_failures: 10,
        }
    }
}

impl RenewalConfig {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    /// Builder: set jitter fraction.
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    /// Builder: set backoff parameters.
    pub fn with_backoff(mut self, initial: Duration, max: Duration, multiplier: f64) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_max_failures(mut self, max: u32) -> Self {
        self.max_consecutive_failures = max;
        self
    }

    /// Calculates the next renewal delay with jitter.
    pub fn next_delay(&self) -> Duration {
        let base = self.interval.as_secs_f64();
        let range = base * self.jitter_fraction;
        let jitter = if range > 0.0 {
            rand::rng().random_range(-range..=range)
        } else {
            0.0
        };
        Duration::from_secs_f64((base + jitter).max(0.0))
    }

    /// Calculates backoff delay based on consecutive failures.
    pub fn backoff_delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }

        let base = self.initial_backoff.as_secs_f64();
        let multiplier = self
            .backoff_multiplier
            .powi(consecutive_failures as i32 - 1);
        let delay = base * multiplier;
        let max = self.max_backoff.as_secs_f64();

        Duration::from_secs_f64(delay.min(max))
    }
}

/// Schedules recurring watch renewal per user.
pub trait RenewalScheduler: Send + Sync {
    /// Starts (or restarts) the job for `user`.
    fn schedule(&self, user: &UserId) -> ServerResult<()>;

    /// Stops the job for `user`, if any.
    fn cancel(&self, user: &UserId);
}

/// The renewal step run by each job.
pub type RenewFn = Arc<dyn Fn(UserId) -> BoxFuture<'static, ServerResult<()>> + Send + Sync>;

/// Runs one tokio task per scheduled user.
pub struct TokioRenewalScheduler {
    config: RenewalConfig,
    renew: RenewFn,
    jobs: Mutex<HashMap<UserId, JoinHandle<()>>>,
}

impl TokioRenewalScheduler {
    pub fn new(config: RenewalConfig, renew: RenewFn) -> Self {
        Self {
            config,
            renew,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Number of users with a running job.
    pub fn active_jobs(&self) -> usize {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.retain(|_, handle| !handle.is_finished());
        jobs.len()
    }

    /// Aborts every job.
    pub fn shutdown(&self) {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        for (_, handle) in jobs.drain() {
            handle.abort();
        }
        info!("renewal scheduler stopped");
    }
}

impl RenewalScheduler for TokioRenewalScheduler {
    fn schedule(&self, user: &UserId) -> ServerResult<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ServerError::config(format!("no async runtime for renewal: {}", e)))?;

        let handle = runtime.spawn(run_job(
            user.clone(),
            self.config.clone(),
            self.renew.clone(),
        ));

        let previous = self
            .jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user.clone(), handle);
        if let Some(previous) = previous {
            debug!(user_id = %user, "replacing renewal job");
            previous.abort();
        }

        info!(
            user_id = %user,
            interval_secs = self.config.interval.as_secs(),
            "renewal scheduled"
        );
        Ok(())
    }

    fn cancel(&self, user: &UserId) {
        let removed = self
            .jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(user);
        if let Some(handle) = removed {
            handle.abort();
            info!(user_id = %user, "renewal cancelled");
        }
    }
}

async fn run_job(user: UserId, config: RenewalConfig, renew: RenewFn) {
    let mut consecutive_failures = 0u32;

    loop {
        let delay = if consecutive_failures > 0 {
            config.backoff_delay(consecutive_failures)
        } else {
            config.next_delay()
        };
        debug!(user_id = %user, delay_secs = delay.as_secs(), "next renewal");
        tokio::time::sleep(delay).await;

        match renew(user.clone()).await {
            Ok(()) => {
                info!(user_id = %user, "watch renewed");
                consecutive_failures = 0;
            }
            Err(ServerError::NotConnected(_)) => {
                info!(user_id = %user, "user disconnected, stopping renewal");
                return;
            }
            Err(e) => {
                consecutive_failures += 1;
                warn!(user_id = %user, error = %e, failures = consecutive_failures, "renewal failed");
                if consecutive_failures >= config.max_consecutive_failures {
                    error!(
                        user_id = %user,
                        failures = consecutive_failures,
                        "max consecutive failures reached, giving up"
                    );
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    fn counting(count: Arc<AtomicU32>, fail_first: u32) -> RenewFn {
        Arc::new(move |_user| {
            let count = count.clone();
            Box::pin(async move {
                let n = count.fetch_add(1, Ordering::SeqCst);
                if n < fail_first {
                    Err(ServerError::watch_setup(format!("failure {}", n)))
                } else {
                    Ok(())
                }
            })
        })
    }

    #[test]
    fn next_delay_within_jitter() {
        let config = RenewalConfig::new(Duration::from_secs(60)).with_jitter(0.1);
        let delay = config.next_delay();
        assert!(delay.as_secs_f64() >= 54.0);
        assert!(delay.as_secs_f64() <= 66.0);

        let exact = RenewalConfig::new(Duration::from_secs(60)).with_jitter(0.0);
        assert_eq!(exact.next_delay(), Duration::from_secs(60));
    }

    #[test]
    fn backoff_is_capped() {
        let config = RenewalConfig::default().with_backoff(
            Duration::from_secs(5),
            Duration::from_secs(300),
            2.0,
        );

        assert_eq!(config.backoff_delay(0), Duration::ZERO);
        assert_eq!(config.backoff_delay(1), Duration::from_secs(5));
        assert_eq!(config.backoff_delay(3), Duration::from_secs(20));
        assert_eq!(config.backoff_delay(10), Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn job_renews_on_interval() {
        let count = Arc::new(AtomicU32::new(0));
        let scheduler = TokioRenewalScheduler::new(
            RenewalConfig::new(Duration::from_secs(60)).with_jitter(0.0),
            counting(count.clone(), 0),
        );

        scheduler.schedule(&user("U1")).unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);

        scheduler.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_job() {
        let count = Arc::new(AtomicU32::new(0));
        let scheduler = TokioRenewalScheduler::new(
            RenewalConfig::new(Duration::from_secs(60)).with_jitter(0.0),
            counting(count.clone(), 0),
        );

        scheduler.schedule(&user("U1")).unwrap();
        scheduler.schedule(&user("U1")).unwrap();
        assert_eq!(scheduler.active_jobs(), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        scheduler.cancel(&user("U1"));
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.active_jobs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_back_off_then_give_up() {
        let count = Arc::new(AtomicU32::new(0));
        let config = RenewalConfig::new(Duration::from_secs(60))
            .with_jitter(0.0)
            .with_backoff(Duration::from_secs(1), Duration::from_secs(4), 2.0)
            .with_max_failures(3);
        let scheduler = TokioRenewalScheduler::new(config, counting(count.clone(), u32::MAX));

        scheduler.schedule(&user("U1")).unwrap();
        // 60s, then +1s, then +2s: three failures.
        tokio::time::sleep(Duration::from_secs(64)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.active_jobs(), 0);
    }
}
