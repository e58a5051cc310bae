use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Outbox Types
// ============================================================================

/// A persisted outbox row waiting to be republished to the message bus.
///
/// `msg` is opaque to the dispatcher except for the owning-task lookup
/// performed when the message is dead-lettered (see [`owning_task_id`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: String,
    pub topic: String,
    pub msg: Vec<u8>,
    /// Earliest time the message is eligible for delivery.
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboxMessage {
    pub fn new(topic: impl Into<String>, msg: impl Into<Vec<u8>>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            topic: topic.into(),
            msg: msg.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Move the eligibility time forward, stamping the update time with `now`.
    pub fn reschedule(&mut self, not_before: DateTime<Utc>, now: DateTime<Utc>) {
        self.created_at = not_before;
        self.updated_at = now;
    }
}

/// Filter for listing outbox rows that are due.
#[derive(Debug, Clone, Copy)]
pub struct ListOutboxInput {
    pub created_before: DateTime<Utc>,
    pub limit: i64,
}

// ============================================================================
// Dead-letter Types
// ============================================================================

/// Find the task that owns an outbox payload.
///
/// Producers write either a top-level `apply_id` or a nested
/// `process.apply_id`; the top-level key wins when both are present.
/// Anything that is not a JSON object, or carries no non-empty string id,
/// yields `None`.
pub fn owning_task_id(msg: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(msg).ok()?;

    let top_level = value.get("apply_id").and_then(|v| v.as_str());
    let nested = value
        .get("process")
        .and_then(|p| p.get("apply_id"))
        .and_then(|v| v.as_str());

    top_level
        .filter(|id| !id.is_empty())
        .or(nested.filter(|id| !id.is_empty()))
        .map(str::to_string)
}

/// A message that exhausted its delivery budget and was removed from the outbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub message_id: String,
    pub topic: String,
    pub apply_id: Option<String>,
    pub attempts: u32,
    pub last_error: String,
}

impl DeadLetter {
    pub fn from_message(message: &OutboxMessage, attempts: u32, last_error: String) -> Self {
        Self {
            message_id: message.id.clone(),
            topic: message.topic.clone(),
            apply_id: owning_task_id(&message.msg),
            attempts,
            last_error,
        }
    }
}

/// Body posted to the owning task when its outbound message is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailureNotice {
    pub status: String,
    pub result: TaskFailureDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailureDetail {
    pub reason: String,
    pub message_id: String,
    pub topic: String,
    pub attempts: u32,
}

impl TaskFailureNotice {
    pub fn for_dead_letter(letter: &DeadLetter) -> Self {
        Self {
            status: "failed".to_string(),
            result: TaskFailureDetail {
                reason: format!(
                    "outbox message dropped after {} failed deliveries: {}",
                    letter.attempts, letter.last_error
                ),
                message_id: letter.message_id.clone(),
                topic: letter.topic.clone(),
                attempts: letter.attempts,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owning_task_id_top_level() {
        let msg = br#"{"apply_id": "task-1", "payload": {"k": 1}}"#;
        assert_eq!(owning_task_id(msg), Some("task-1".to_string()));
    }

    #[test]
    fn test_owning_task_id_nested_process() {
        let msg = br#"{"process": {"apply_id": "task-2"}}"#;
        assert_eq!(owning_task_id(msg), Some("task-2".to_string()));
    }

    #[test]
    fn test_owning_task_id_prefers_top_level() {
        let msg = br#"{"apply_id": "outer", "process": {"apply_id": "inner"}}"#;
        assert_eq!(owning_task_id(msg), Some("outer".to_string()));
    }

    #[test]
    fn test_owning_task_id_falls_back_when_top_level_empty() {
        let msg = br#"{"apply_id": "", "process": {"apply_id": "inner"}}"#;
        assert_eq!(owning_task_id(msg), Some("inner".to_string()));
    }

    #[test]
    fn test_owning_task_id_missing_or_invalid() {
        assert_eq!(owning_task_id(br#"{"other": "x"}"#), None);
        assert_eq!(owning_task_id(br#"{"apply_id": 42}"#), None);
        assert_eq!(owning_task_id(b"not json"), None);
        assert_eq!(owning_task_id(br#"["apply_id"]"#), None);
    }

    #[test]
    fn test_failure_notice_from_dead_letter() {
        let message = OutboxMessage::new("flow.events", br#"{"apply_id": "t-9"}"#.to_vec());
        let letter = DeadLetter::from_message(&message, 5, "bus down".to_string());
        assert_eq!(letter.apply_id.as_deref(), Some("t-9"));

        let notice = TaskFailureNotice::for_dead_letter(&letter);
        assert_eq!(notice.status, "failed");
        assert_eq!(notice.result.message_id, message.id);
        assert_eq!(notice.result.attempts, 5);
        assert!(notice.result.reason.contains("bus down"));
    }

    #[test]
    fn test_reschedule_moves_eligibility() {
        let mut message = OutboxMessage::new("t", Vec::new());
        let now = Utc::now();
        let later = now + chrono::Duration::minutes(4);
        message.reschedule(later, now);
        assert_eq!(message.created_at, later);
        assert_eq!(message.updated_at, now);
    }
}
