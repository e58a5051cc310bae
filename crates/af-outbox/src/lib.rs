pub mod repository;
pub mod bus;
pub mod http_client;
pub mod notifier;
pub mod retry_tracker;
pub mod supervisor;
pub mod stats;
pub mod dispatcher;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "mongo")]
pub mod mongo;

// Re-export key types
pub use repository::OutboxStore;
pub use bus::MessageBus;
#[cfg(feature = "redis")]
pub use bus::RedisMessageBus;
pub use http_client::{HttpClient, HttpClientConfig, HttpResponse, ReqwestHttpClient};
pub use notifier::{NotifyError, TaskNotifier};
pub use retry_tracker::{backoff_delay, RetryTracker};
pub use supervisor::{RestartDecision, RestartPolicy, Supervisor, SupervisorEvent};
pub use stats::{DispatcherStats, StatsSnapshot};
pub use dispatcher::{DispatcherConfig, DispatcherState, OutboxDispatcher, TickReport};
