//! Policy Engine
//!
//! Composable resilience wrappers for unreliable calls:
//! - [`RetryPolicy`]: bounded attempts, predicate-driven, cancellable delay
//! - [`TimeoutPolicy`]: one attempt raced against a deadline
//! - [`CompositePolicy`]: ordered nesting of policies with execution hooks
//! - [`ResultCollector`]: typed records published by policies for introspection
//!
//! ```ignore
//! let policy = CompositePolicy::builder()
//!     .timeout(Duration::from_secs(30 * 60))
//!     .retry(3, Duration::from_secs(3), Some(retry_if(|err| !err.is_context_error())))
//!     .on_error(|_, err| warn!(error = %err, "action failed"))
//!     .build();
//!
//! policy.execute(Context::background(), operation(|ctx| async move { run(ctx).await })).await?;
//! ```

pub mod collector;
pub mod composite;
pub mod context;
pub mod error;
pub mod policy;
pub mod retry;
pub mod timeout;

pub use collector::{
    LookupError, PolicyResult, ResultCollector, ResultData, ResultKind, RetryData, TimeoutData,
};
pub use composite::{CompositePolicy, CompositePolicyBuilder, COMPOSITE_POLICY_NAME};
pub use context::Context;
pub use error::{PolicyError, Result};
pub use policy::{operation, FnPolicy, Operation, OperationFuture, Policy, ResultAware};
pub use retry::{retry_if, RetryIf, RetryPolicy, RETRY_POLICY_NAME};
pub use timeout::{TimeoutPolicy, TIMEOUT_POLICY_NAME};
