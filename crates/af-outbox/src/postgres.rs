use async_trait::async_trait;
use af_common::{ListOutboxInput, OutboxMessage};
use crate::repository::OutboxStore;
use anyhow::Result;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

pub struct PostgresOutboxStore {
    pool: PgPool,
    table: String,
}

impl PostgresOutboxStore {
    /// `table` is interpolated into SQL, so only `[A-Za-z0-9_]` is accepted.
    pub fn new(pool: PgPool, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        if !is_valid_table_name(&table) {
            anyhow::bail!("Invalid outbox table name: {:?}", table);
        }
        Ok(Self { pool, table })
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                topic TEXT NOT NULL,
                msg BYTEA NOT NULL,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL
            )
            "#,
            table = self.table
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_created_at ON {table}(created_at)",
            table = self.table
        ))
        .execute(&self.pool)
        .await?;

        info!(table = %self.table, "Outbox schema ready (PostgreSQL)");
        Ok(())
    }
}

fn is_valid_table_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn timestamp(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| anyhow::anyhow!("Invalid timestamp"))
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    async fn list_outbox_messages(&self, input: ListOutboxInput) -> Result<Vec<OutboxMessage>> {
        let rows = sqlx::query(&format!(
            "SELECT id, topic, msg, created_at, updated_at FROM {} WHERE created_at <= $1 ORDER BY created_at LIMIT $2",
            self.table
        ))
        .bind(input.created_before.timestamp_millis())
        .bind(input.limit)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            messages.push(OutboxMessage {
                id: row.get("id"),
                topic: row.get("topic"),
                msg: row.get("msg"),
                created_at: timestamp(row.get("created_at"))?,
                updated_at: timestamp(row.get("updated_at"))?,
            });
        }
        Ok(messages)
    }

    async fn delete_outbox_messages(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() { return Ok(()); }

        let result = sqlx::query(&format!("DELETE FROM {} WHERE id = ANY($1)", self.table))
            .bind(ids)
            .execute(&self.pool)
            .await?;
        debug!(deleted = result.rows_affected(), "Deleted outbox messages (PostgreSQL)");
        Ok(())
    }

    async fn batch_create_outbox_messages(&self, messages: &[OutboxMessage]) -> Result<()> {
        if messages.is_empty() { return Ok(()); }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {} (id, topic, msg, created_at, updated_at) ",
            self.table
        ));
        builder.push_values(messages, |mut row, message| {
            row.push_bind(&message.id)
                .push_bind(&message.topic)
                .push_bind(&message.msg)
                .push_bind(message.created_at.timestamp_millis())
                .push_bind(message.updated_at.timestamp_millis());
        });

        builder.build().execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_validation() {
        assert!(is_valid_table_name("outbox"));
        assert!(is_valid_table_name("automation_outbox_2"));
        assert!(!is_valid_table_name(""));
        assert!(!is_valid_table_name("outbox; DROP TABLE x"));
        assert!(!is_valid_table_name("public.outbox"));
    }

    #[test]
    fn test_timestamp_conversion() {
        assert_eq!(timestamp(0).unwrap().timestamp_millis(), 0);
        assert!(timestamp(i64::MAX).is_err());
    }
}
