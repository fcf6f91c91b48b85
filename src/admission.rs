//! Gate applied to every proxied request: rate limit first, then (optionally)
//! operator approval.

use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::RuntimeConfig;
use crate::error::{GatewayError, Result};

/// Minimum spacing between admitted requests.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Option<Duration>,
    wait: bool,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Option<Duration>, wait: bool) -> Self {
        Self {
            interval,
            wait,
            last: Mutex::new(None),
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(
            config.rate_limit_seconds.map(Duration::from_secs),
            config.rate_limit_wait,
        )
    }

    /// Admit or refuse one request.
    ///
    /// In wait mode a request that arrives too early sleeps for the shortfall
    /// and is recorded at the time it arrived, not the time it was released.
    pub async fn check(&self) -> Result<()> {
        let Some(interval) = self.interval else {
            return Ok(());
        };

        let now = Instant::now();
        let shortfall = {
            let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
            match *last {
                None => {
                    *last = Some(now);
                    return Ok(());
                }
                Some(prev) => {
                    let elapsed = now.saturating_duration_since(prev);
                    if elapsed > interval {
                        *last = Some(now);
                        return Ok(());
                    }
                    interval - elapsed
                }
            }
        };

        let wait_secs = shortfall.as_secs_f64().ceil() as u64;
        if !self.wait {
            warn!("Rate limit exceeded. Need to wait {wait_secs} more seconds.");
            return Err(GatewayError::RateLimited {
                retry_after_secs: wait_secs,
            });
        }

        warn!("Rate limit reached. Waiting {wait_secs} seconds before proceeding...");
        tokio::time::sleep(shortfall).await;
        {
            let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
            *last = Some(last.map_or(now, |prev| prev.max(now)));
        }
        info!("Rate limit wait completed, proceeding with request");
        Ok(())
    }
}

/// Something that can hold a request until an operator decides on it.
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn await_approval(&self) -> Result<()>;
}

/// Asks on the controlling terminal, one request at a time.
#[derive(Debug, Default)]
pub struct TerminalApproval {
    prompt_lock: tokio::sync::Mutex<()>,
}

#[async_trait]
impl ApprovalGate for TerminalApproval {
    async fn await_approval(&self) -> Result<()> {
        let _guard = self.prompt_lock.lock().await;

        let accepted = tokio::task::spawn_blocking(|| -> std::io::Result<bool> {
            let mut stdout = std::io::stdout();
            write!(stdout, "Accept incoming request? [y/N] ")?;
            stdout.flush()?;
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            Ok(is_affirmative(&line))
        })
        .await
        .map_err(std::io::Error::other)??;

        if accepted {
            Ok(())
        } else {
            warn!("Request rejected by operator");
            Err(GatewayError::ApprovalRejected)
        }
    }
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Rate limit plus optional manual approval, applied in that order.
pub struct Admission {
    limiter: RateLimiter,
    approval: Option<Arc<dyn ApprovalGate>>,
}

impl Admission {
    pub fn new(limiter: RateLimiter, approval: Option<Arc<dyn ApprovalGate>>) -> Self {
        Self { limiter, approval }
    }

    /// Build from the runtime switches; the gate is only consulted in manual mode.
    pub fn from_config(config: &RuntimeConfig, gate: Arc<dyn ApprovalGate>) -> Self {
        Self::new(
            RateLimiter::from_config(config),
            config.manual_approve.then_some(gate),
        )
    }

    pub async fn admit(&self) -> Result<()> {
        self.limiter.check().await?;
        if let Some(ref gate) = self.approval {
            gate.await_approval().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::advance;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_refuses_without_moving_timestamp() {
        let limiter = RateLimiter::new(Some(Duration::from_secs(10)), false);

        assert_ok!(limiter.check().await);
        advance(Duration::from_secs(3)).await;
        let err = limiter.check().await.unwrap_err();
        assert!(matches!(err, GatewayError::RateLimited { retry_after_secs: 7 }));

        advance(Duration::from_secs(5)).await;
        assert_err!(limiter.check().await);

        advance(Duration::from_secs(3)).await;
        assert_ok!(limiter.check().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_mode_sleeps_exact_shortfall() {
        let limiter = RateLimiter::new(Some(Duration::from_secs(10)), true);

        assert_ok!(limiter.check().await);
        advance(Duration::from_secs(3)).await;

        let started = Instant::now();
        assert_ok!(limiter.check().await);
        assert_eq!(started.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_mode_stamps_arrival_time() {
        let limiter = RateLimiter::new(Some(Duration::from_secs(10)), true);

        assert_ok!(limiter.check().await);
        advance(Duration::from_secs(3)).await;
        assert_ok!(limiter.check().await); // released at t=10, recorded at t=3

        advance(Duration::from_secs(2)).await; // t=12, 9 s after the recorded t=3
        let started = Instant::now();
        assert_ok!(limiter.check().await);
        assert_eq!(started.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_no_interval_is_noop() {
        let limiter = RateLimiter::new(None, false);
        for _ in 0..5 {
            assert_ok!(limiter.check().await);
        }
    }

    struct CountingGate {
        calls: AtomicUsize,
        approve: bool,
    }

    #[async_trait]
    impl ApprovalGate for CountingGate {
        async fn await_approval(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.approve {
                Ok(())
            } else {
                Err(GatewayError::ApprovalRejected)
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_approval_runs_after_rate_limit() {
        let gate = Arc::new(CountingGate {
            calls: AtomicUsize::new(0),
            approve: true,
        });
        let config = RuntimeConfig {
            manual_approve: true,
            rate_limit_seconds: Some(10),
            ..Default::default()
        };
        let admission = Admission::from_config(&config, gate.clone());

        assert_ok!(admission.admit().await);
        assert_eq!(gate.calls.load(Ordering::SeqCst), 1);

        // Refused by the limiter, so the operator is never asked.
        assert_err!(admission.admit().await);
        assert_eq!(gate.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejection_and_disabled_gate() {
        let gate = Arc::new(CountingGate {
            calls: AtomicUsize::new(0),
            approve: false,
        });

        let manual = RuntimeConfig {
            manual_approve: true,
            ..Default::default()
        };
        let err = Admission::from_config(&manual, gate.clone())
            .admit()
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::ApprovalRejected));

        let automatic = Admission::from_config(&RuntimeConfig::default(), gate.clone());
        assert_ok!(automatic.admit().await);
        assert_eq!(gate.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_affirmative_answers() {
        assert!(is_affirmative("y\n"));
        assert!(is_affirmative(" YES "));
        assert!(!is_affirmative("\n"));
        assert!(!is_affirmative("nope"));
    }
}
