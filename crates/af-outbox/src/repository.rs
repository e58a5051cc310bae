use async_trait::async_trait;
use af_common::{ListOutboxInput, OutboxMessage};
use anyhow::Result;

/// Persistence for outbox rows.
///
/// There is no update-in-place: rescheduling a row is a delete followed by a
/// bulk insert, which is not atomic across the two calls.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Rows with `created_at <= input.created_before`, at most `input.limit`.
    async fn list_outbox_messages(&self, input: ListOutboxInput) -> Result<Vec<OutboxMessage>>;
    async fn delete_outbox_messages(&self, ids: &[String]) -> Result<()>;
    async fn batch_create_outbox_messages(&self, messages: &[OutboxMessage]) -> Result<()>;
}
