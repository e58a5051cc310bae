use async_trait::async_trait;
use af_common::{ListOutboxInput, OutboxMessage};
use crate::repository::OutboxStore;
use anyhow::Result;
use mongodb::{Client, Collection, IndexModel};
use mongodb::bson::{doc, Binary, Document, spec::BinarySubtype};
use mongodb::options::FindOptions;
use chrono::{DateTime, Utc};
use futures::stream::TryStreamExt;
use tracing::{debug, info};

pub struct MongoOutboxStore {
    collection: Collection<Document>,
}

impl MongoOutboxStore {
    pub fn new(client: Client, db_name: &str, collection_name: &str) -> Self {
        let db = client.database(db_name);
        let collection = db.collection(collection_name);
        Self { collection }
    }

    pub async fn init_indexes(&self) -> Result<()> {
        let index = IndexModel::builder().keys(doc! { "createdAt": 1 }).build();
        self.collection.create_index(index).await?;
        info!("Ensured outbox createdAt index (MongoDB)");
        Ok(())
    }
}

fn to_document(message: &OutboxMessage) -> Document {
    doc! {
        "_id": message.id.as_str(),
        "topic": message.topic.as_str(),
        "msg": Binary { subtype: BinarySubtype::Generic, bytes: message.msg.clone() },
        "createdAt": mongodb::bson::DateTime::from_millis(message.created_at.timestamp_millis()),
        "updatedAt": mongodb::bson::DateTime::from_millis(message.updated_at.timestamp_millis()),
    }
}

fn from_document(doc: &Document) -> Result<OutboxMessage> {
    let millis = |key: &str| -> Result<DateTime<Utc>> {
        let ts = doc.get_datetime(key)?.timestamp_millis();
        DateTime::from_timestamp_millis(ts).ok_or_else(|| anyhow::anyhow!("Invalid timestamp in {}", key))
    };

    Ok(OutboxMessage {
        id: doc.get_str("_id")?.to_string(),
        topic: doc.get_str("topic")?.to_string(),
        msg: doc.get_binary_generic("msg")?.clone(),
        created_at: millis("createdAt")?,
        updated_at: millis("updatedAt")?,
    })
}

#[async_trait]
impl OutboxStore for MongoOutboxStore {
    async fn list_outbox_messages(&self, input: ListOutboxInput) -> Result<Vec<OutboxMessage>> {
        let filter = doc! {
            "createdAt": { "$lte": mongodb::bson::DateTime::from_millis(input.created_before.timestamp_millis()) }
        };
        let options = FindOptions::builder()
            .sort(doc! { "createdAt": 1 })
            .limit(input.limit)
            .build();

        let mut cursor = self.collection.find(filter).with_options(options).await?;
        let mut messages = Vec::new();
        while let Some(doc) = cursor.try_next().await? {
            messages.push(from_document(&doc)?);
        }
        Ok(messages)
    }

    async fn delete_outbox_messages(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() { return Ok(()); }

        let result = self.collection.delete_many(doc! { "_id": { "$in": ids.to_vec() } }).await?;
        debug!(deleted = result.deleted_count, "Deleted outbox messages (MongoDB)");
        Ok(())
    }

    async fn batch_create_outbox_messages(&self, messages: &[OutboxMessage]) -> Result<()> {
        if messages.is_empty() { return Ok(()); }

        let docs: Vec<Document> = messages.iter().map(to_document).collect();
        self.collection.insert_many(docs).ordered(false).await?;
        Ok(())
    }
}
