//! Policy contract shared by retry, timeout and composite policies.

use std::future::Future;
use std::sync::Arc;
use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::collector::ResultCollector;
use crate::context::Context;
use crate::error::Result;

pub type OperationFuture = BoxFuture<'static, Result<()>>;

/// A unit of work that can be invoked repeatedly, each time with its own context.
pub type Operation = Arc<dyn Fn(Context) -> OperationFuture + Send + Sync>;

/// Box an async closure into an [`Operation`].
pub fn operation<F, Fut>(f: F) -> Operation
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |ctx: Context| -> OperationFuture { Box::pin(f(ctx)) })
}

/// A resilience behaviour wrapped around an operation.
#[async_trait]
pub trait Policy: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, ctx: Context, op: Operation) -> Result<()>;

    /// Policies that publish records into a collector return themselves here.
    fn as_result_aware(&self) -> Option<&dyn ResultAware> {
        None
    }
}

/// A policy that publishes execution records into a shared collector.
pub trait ResultAware: Send + Sync {
    /// Called once per composite execution, after the collector is attached.
    fn init(&self);

    fn set_collector(&self, collector: Arc<ResultCollector>);
}

type PolicyFn = dyn Fn(Context, Operation) -> OperationFuture + Send + Sync;

/// An arbitrary callback placed in a policy chain.
///
/// The callback receives the inner operation and decides whether (and how
/// often) to call it.
pub struct FnPolicy {
    name: String,
    f: Arc<PolicyFn>,
}

impl FnPolicy {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Context, Operation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            f: Arc::new(move |ctx: Context, op: Operation| -> OperationFuture {
                Box::pin(f(ctx, op))
            }),
        }
    }
}

#[async_trait]
impl Policy for FnPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: Context, op: Operation) -> Result<()> {
        (self.f)(ctx, op).await
    }
}
