//! Dead-letter notification
//!
//! Tells the task that owns a dropped outbox message that its dependent step
//! failed. Calls go out one at a time, throttled by a governor rate limiter.

use std::num::NonZeroU32;
use std::sync::Arc;
use governor::{Quota, RateLimiter, state::{NotKeyed, InMemoryState}, clock::DefaultClock};
use thiserror::Error;
use tracing::info;

use af_common::{DeadLetter, TaskFailureNotice};
use crate::http_client::HttpClient;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Failed to encode failure notice: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Callback request failed: {0}")]
    Transport(#[source] anyhow::Error),

    #[error("Callback rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

pub struct TaskNotifier {
    client: Arc<dyn HttpClient>,
    base_url: String,
    path_template: String,
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl TaskNotifier {
    /// `path_template` must contain `{apply_id}`.
    pub fn new(
        client: Arc<dyn HttpClient>,
        base_url: impl Into<String>,
        path_template: impl Into<String>,
        per_second: NonZeroU32,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            path_template: path_template.into(),
            limiter: RateLimiter::direct(Quota::per_second(per_second)),
        }
    }

    pub fn callback_url(&self, apply_id: &str) -> String {
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            self.path_template.replace("{apply_id}", apply_id)
        )
    }

    /// Post the failure notice for `letter` to its owning task.
    pub async fn notify(&self, apply_id: &str, letter: &DeadLetter) -> Result<(), NotifyError> {
        self.limiter.until_ready().await;

        let body = serde_json::to_vec(&TaskFailureNotice::for_dead_letter(letter))?;
        let headers = [("Content-Type".to_string(), "application/json".to_string())];
        let url = self.callback_url(apply_id);

        let response = self
            .client
            .post(&url, &headers, body)
            .await
            .map_err(NotifyError::Transport)?;

        if !response.is_success() {
            return Err(NotifyError::Rejected {
                status: response.status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }

        info!(
            apply_id = %apply_id,
            message_id = %letter.message_id,
            "Notified owning task of dropped outbox message"
        );
        Ok(())
    }
}
