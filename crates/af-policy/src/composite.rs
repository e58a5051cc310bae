//! Composite Policy
//!
//! Nests an ordered list of policies around an operation. The first policy in
//! the list is the outermost wrapper:
//!
//! ```text
//! [Timeout, Retry]  ->  Timeout( Retry( op ) )   one deadline for all attempts
//! [Retry, Timeout]  ->  Retry( Timeout( op ) )   one deadline per attempt
//! ```
//!
//! The shared collector is reset at the start of every execution, so a single
//! instance must not run overlapping executions. Build one per call, or give
//! each concurrent caller its own collector.

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use tokio::time::Instant;

use crate::collector::ResultCollector;
use crate::context::Context;
use crate::error::{PolicyError, Result};
use crate::policy::{Operation, OperationFuture, Policy};
use crate::retry::{RetryIf, RetryPolicy};
use crate::timeout::TimeoutPolicy;

pub const COMPOSITE_POLICY_NAME: &str = "composite";

pub type BeforeExecute = Arc<dyn Fn(&Context) + Send + Sync>;
pub type OnError = Arc<dyn Fn(&Context, &PolicyError) + Send + Sync>;
pub type AfterExecute = Arc<dyn Fn(&Context, &ResultCollector) + Send + Sync>;

pub struct CompositePolicy {
    policies: Vec<Arc<dyn Policy>>,
    collector: Arc<ResultCollector>,
    fail_fast: bool,
    before_execute: Option<BeforeExecute>,
    on_error: Option<OnError>,
    after_execute: Option<AfterExecute>,
}

impl CompositePolicy {
    pub fn builder() -> CompositePolicyBuilder {
        CompositePolicyBuilder::default()
    }

    pub fn collector(&self) -> &Arc<ResultCollector> {
        &self.collector
    }

    pub fn policies(&self) -> &[Arc<dyn Policy>] {
        &self.policies
    }

    /// Informational; execution does not branch on it.
    pub fn fail_fast(&self) -> bool {
        self.fail_fast
    }

    fn chain(&self, op: Operation) -> Operation {
        self.policies.iter().rev().fold(op, |inner, policy| {
            let policy = policy.clone();
            let wrapped: Operation = Arc::new(move |ctx: Context| -> OperationFuture {
                let policy = policy.clone();
                let inner = inner.clone();
                Box::pin(async move { policy.execute(ctx, inner).await })
            });
            wrapped
        })
    }
}

#[async_trait]
impl Policy for CompositePolicy {
    fn name(&self) -> &str {
        COMPOSITE_POLICY_NAME
    }

    async fn execute(&self, ctx: Context, op: Operation) -> Result<()> {
        self.collector.reset();

        for policy in &self.policies {
            if let Some(aware) = policy.as_result_aware() {
                aware.set_collector(self.collector.clone());
                aware.init();
            }
        }

        if let Some(hook) = &self.before_execute {
            hook(&ctx);
        }

        let started = Instant::now();
        let result = self.chain(op)(ctx.clone()).await;
        self.collector
            .set_duration_ms(started.elapsed().as_millis() as u64);

        if let (Err(err), Some(hook)) = (&result, &self.on_error) {
            hook(&ctx, err);
        }

        if let Some(hook) = &self.after_execute {
            hook(&ctx, &self.collector);
        }

        result
    }
}

/// Builder mirroring the option helpers callers use to assemble a chain.
#[derive(Default)]
pub struct CompositePolicyBuilder {
    policies: Vec<Arc<dyn Policy>>,
    collector: Option<Arc<ResultCollector>>,
    fail_fast: bool,
    before_execute: Option<BeforeExecute>,
    on_error: Option<OnError>,
    after_execute: Option<AfterExecute>,
}

impl CompositePolicyBuilder {
    pub fn policy(mut self, policy: Arc<dyn Policy>) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn timeout(self, delay: Duration) -> Self {
        self.policy(Arc::new(TimeoutPolicy::new(delay)))
    }

    pub fn retry(self, max: u32, delay: Duration, retry_if: Option<RetryIf>) -> Self {
        self.policy(Arc::new(RetryPolicy::new(max, delay, retry_if)))
    }

    /// Share an existing collector instead of allocating one.
    pub fn collector(mut self, collector: Arc<ResultCollector>) -> Self {
        self.collector = Some(collector);
        self
    }

    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn before_execute<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context) + Send + Sync + 'static,
    {
        self.before_execute = Some(Arc::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context, &PolicyError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn after_execute<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context, &ResultCollector) + Send + Sync + 'static,
    {
        self.after_execute = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> CompositePolicy {
        CompositePolicy {
            policies: self.policies,
            collector: self.collector.unwrap_or_default(),
            fail_fast: self.fail_fast,
            before_execute: self.before_execute,
            on_error: self.on_error,
            after_execute: self.after_execute,
        }
    }
}
