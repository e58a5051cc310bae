//! Timeout Policy
//!
//! Runs one attempt of an operation on its own task, bounded by a deadline
//! derived from the caller's context.

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::collector::{PolicyResult, ResultCollector, ResultData, TimeoutData};
use crate::context::Context;
use crate::error::{PolicyError, Result};
use crate::policy::{Operation, Policy, ResultAware};

/// Collector key used by [`TimeoutPolicy`].
pub const TIMEOUT_POLICY_NAME: &str = "timeout";

pub struct TimeoutPolicy {
    delay: Duration,
    collector: RwLock<Option<Arc<ResultCollector>>>,
}

impl TimeoutPolicy {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            collector: RwLock::new(None),
        }
    }

    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    fn record(&self, timed_out: bool) {
        if let Some(collector) = self.collector.read().as_ref() {
            collector.add(PolicyResult::new(
                TIMEOUT_POLICY_NAME,
                ResultData::Timeout(TimeoutData {
                    limit_ms: self.delay.as_millis() as u64,
                    timed_out,
                }),
            ));
        }
    }
}

#[async_trait]
impl Policy for TimeoutPolicy {
    fn name(&self) -> &str {
        TIMEOUT_POLICY_NAME
    }

    async fn execute(&self, ctx: Context, op: Operation) -> Result<()> {
        let child = ctx.with_timeout(self.delay);

        // The join handle is the single-slot result buffer: a late result is
        // stored in the task and dropped with it, never blocking the worker.
        let task_ctx = child.clone();
        let mut handle = tokio::spawn(async move { op(task_ctx).await });

        let outcome = tokio::select! {
            biased;
            err = ctx.done() => Err(err),
            err = child.done() => {
                debug!(timeout_ms = self.delay.as_millis() as u64, "Operation exceeded deadline");
                Err(err)
            }
            joined = &mut handle => match joined {
                Ok(result) => result,
                Err(join_err) if join_err.is_panic() => {
                    std::panic::resume_unwind(join_err.into_panic())
                }
                Err(join_err) => Err(PolicyError::Operation(join_err.into())),
            },
        };

        // Signal a still-running operation that nobody is waiting any more.
        child.cancel();

        self.record(matches!(outcome, Err(PolicyError::DeadlineExceeded)));
        outcome
    }

    fn as_result_aware(&self) -> Option<&dyn ResultAware> {
        Some(self)
    }
}

impl ResultAware for TimeoutPolicy {
    fn init(&self) {}

    fn set_collector(&self, collector: Arc<ResultCollector>) {
        *self.collector.write() = Some(collector);
    }
}
