//! Retry Policy
//!
//! Runs an operation up to `max + 1` times with a fixed delay between
//! attempts. Errors rejected by the predicate are returned at once, even if
//! attempts remain.

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::collector::{PolicyResult, ResultCollector, ResultData, RetryData};
use crate::context::Context;
use crate::error::{PolicyError, Result};
use crate::policy::{Operation, Policy, ResultAware};

/// Collector key used by [`RetryPolicy`].
pub const RETRY_POLICY_NAME: &str = "retry";

pub type RetryIf = Arc<dyn Fn(&PolicyError) -> bool + Send + Sync>;

/// Build a retryability predicate.
pub fn retry_if<F>(f: F) -> RetryIf
where
    F: Fn(&PolicyError) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

pub struct RetryPolicy {
    max: u32,
    delay: Duration,
    retry_if: Option<RetryIf>,
    collector: RwLock<Option<Arc<ResultCollector>>>,
}

impl RetryPolicy {
    /// `retry_if = None` never retries.
    pub fn new(max: u32, delay: Duration, retry_if: Option<RetryIf>) -> Self {
        Self {
            max,
            delay,
            retry_if,
            collector: RwLock::new(None),
        }
    }

    /// Retry every error.
    pub fn always(max: u32, delay: Duration) -> Self {
        Self::new(max, delay, Some(retry_if(|_| true)))
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    fn should_retry(&self, err: &PolicyError) -> bool {
        self.retry_if.as_ref().map(|f| f(err)).unwrap_or(false)
    }

    fn record(&self, attempts: u32) {
        if let Some(collector) = self.collector.read().as_ref() {
            collector.add(PolicyResult::new(
                RETRY_POLICY_NAME,
                ResultData::Retry(RetryData {
                    attempts,
                    max: self.max,
                }),
            ));
        }
    }

    async fn run_attempts(&self, ctx: &Context, op: &Operation, attempt: &mut u32) -> Result<()> {
        let mut i = 0;
        loop {
            *attempt = i;

            if let Some(err) = ctx.err() {
                return Err(err);
            }

            let err = match op(ctx.clone()).await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };

            if !self.should_retry(&err) {
                debug!(attempt = i, error = %err, "Non-retryable error");
                return Err(err);
            }
            if i >= self.max {
                debug!(attempt = i, max = self.max, error = %err, "Retry budget exhausted");
                return Err(err);
            }

            debug!(attempt = i, max = self.max, delay_ms = self.delay.as_millis() as u64, error = %err, "Retrying operation");

            tokio::select! {
                biased;
                ctx_err = ctx.done() => return Err(ctx_err),
                _ = tokio::time::sleep(self.delay) => {}
            }

            i += 1;
        }
    }
}

#[async_trait]
impl Policy for RetryPolicy {
    fn name(&self) -> &str {
        RETRY_POLICY_NAME
    }

    async fn execute(&self, ctx: Context, op: Operation) -> Result<()> {
        let mut attempt = 0;
        let result = self.run_attempts(&ctx, &op, &mut attempt).await;
        self.record(attempt);
        result
    }

    fn as_result_aware(&self) -> Option<&dyn ResultAware> {
        Some(self)
    }
}

impl ResultAware for RetryPolicy {
    fn init(&self) {
        self.record(0);
    }

    fn set_collector(&self, collector: Arc<ResultCollector>) {
        *self.collector.write() = Some(collector);
    }
}
