//! Outbox Dispatcher
//!
//! Periodically drains due rows from the outbox table and republishes them to
//! the message bus. Each tick:
//!
//! 1. Lists up to `batch_size` rows whose `created_at` is not in the future.
//! 2. Publishes them in fetch order.
//! 3. Reschedules failures with exponential backoff (`backoff_base * 2^attempts`)
//!    by deleting and re-inserting them.
//! 4. Drops messages that already failed `max_attempts` times.
//! 5. Deletes delivered and dropped rows in one batch.
//! 6. Notifies the owning task of every dropped message.
//!
//! Delivery is at-least-once: if the final delete fails the tick is abandoned
//! and the same rows are published again on the next tick.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use af_common::{DeadLetter, ListOutboxInput, OutboxMessage};
use crate::bus::MessageBus;
use crate::notifier::TaskNotifier;
use crate::repository::OutboxStore;
use crate::retry_tracker::{backoff_delay, RetryTracker};
use crate::stats::DispatcherStats;
use crate::supervisor::{panic_message, RestartDecision, RestartPolicy, Supervisor, SupervisorEvent};

/// Configuration for the outbox dispatcher
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub tick_interval: Duration,
    /// Maximum rows fetched per tick
    pub batch_size: u32,
    /// Failed deliveries tolerated before a message is dropped
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(30),
            batch_size: 1000,
            max_attempts: 5,
            backoff_base: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// Waiting for the next tick
    Idle,
    /// Publishing a fetched batch
    Draining,
    /// Cooling down after a panic
    Recovering,
    Stopped,
}

/// What a single tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub fetched: usize,
    pub delivered: usize,
    pub requeued: usize,
    pub dropped: usize,
    pub notified: usize,
    /// Requeued rows deleted but not re-inserted.
    pub lost: usize,
    /// Set when a store failure cut the tick short.
    pub abandoned: bool,
}

pub struct OutboxDispatcher {
    store: Arc<dyn OutboxStore>,
    bus: Arc<dyn MessageBus>,
    notifier: Arc<TaskNotifier>,
    config: DispatcherConfig,
    retries: RetryTracker,
    supervisor: Supervisor,
    state_tx: watch::Sender<DispatcherState>,
    stats: Arc<DispatcherStats>,
}

impl OutboxDispatcher {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        bus: Arc<dyn MessageBus>,
        notifier: Arc<TaskNotifier>,
        config: DispatcherConfig,
        restart_policy: RestartPolicy,
    ) -> Self {
        let (state_tx, _) = watch::channel(DispatcherState::Idle);
        Self {
            store,
            bus,
            notifier,
            config,
            retries: RetryTracker::new(),
            supervisor: Supervisor::new("outbox-dispatcher", restart_policy),
            state_tx,
            stats: Arc::new(DispatcherStats::new()),
        }
    }

    pub fn state(&self) -> watch::Receiver<DispatcherState> {
        self.state_tx.subscribe()
    }

    /// Totals across all ticks; the handle stays valid after the loop is spawned.
    pub fn stats(&self) -> Arc<DispatcherStats> {
        Arc::clone(&self.stats)
    }

    pub fn supervisor_events(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.supervisor.subscribe()
    }

    /// Failed deliveries recorded for a message id.
    pub fn retry_attempts(&self, id: &str) -> u32 {
        self.retries.attempts(id)
    }

    pub fn pending_retries(&self) -> usize {
        self.retries.len()
    }

    /// Spawn the dispatch loop. It runs until `shutdown` is cancelled or the
    /// supervisor gives up after repeated panics.
    pub fn start_push_message(self, shutdown: CancellationToken) -> JoinHandle<()> {
        info!(
            tick_interval_secs = self.config.tick_interval.as_secs(),
            batch_size = self.config.batch_size,
            max_attempts = self.config.max_attempts,
            "Starting outbox dispatcher"
        );
        tokio::spawn(self.run(shutdown))
    }

    async fn run(mut self, shutdown: CancellationToken) {
        loop {
            let outcome = AssertUnwindSafe(self.run_loop(&shutdown)).catch_unwind().await;

            match outcome {
                Ok(()) => break,
                Err(payload) => {
                    self.set_state(DispatcherState::Recovering);
                    let message = panic_message(&*payload);
                    match self.supervisor.on_panic(&message, &shutdown).await {
                        RestartDecision::Restart => {
                            info!(
                                pending_retries = self.retries.len(),
                                "Relaunching outbox dispatcher"
                            );
                            self.set_state(DispatcherState::Idle);
                        }
                        RestartDecision::Stop => break,
                    }
                }
            }
        }

        self.set_state(DispatcherState::Stopped);
        info!("Outbox dispatcher stopped");
    }

    async fn run_loop(&mut self, shutdown: &CancellationToken) {
        let period = self.config.tick_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Outbox dispatcher shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    if report.fetched > 0 {
                        info!(
                            fetched = report.fetched,
                            delivered = report.delivered,
                            requeued = report.requeued,
                            dropped = report.dropped,
                            notified = report.notified,
                            lost = report.lost,
                            abandoned = report.abandoned,
                            "Outbox tick complete"
                        );
                    }
                    self.supervisor.record_healthy();
                }
            }
        }
    }

    /// Run one drain pass.
    pub async fn tick(&mut self) -> TickReport {
        let report = self.drain().await;
        self.stats.record(&report);
        report
    }

    async fn drain(&mut self) -> TickReport {
        let mut report = TickReport::default();
        let now = Utc::now();

        let input = ListOutboxInput {
            created_before: now,
            limit: i64::from(self.config.batch_size),
        };
        let messages = match self.store.list_outbox_messages(input).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!(error = %e, "Failed to list outbox messages, skipping tick");
                report.abandoned = true;
                return report;
            }
        };

        report.fetched = messages.len();
        if messages.is_empty() {
            debug!("No due outbox messages");
            return report;
        }

        self.set_state(DispatcherState::Draining);

        let mut finished_ids: Vec<String> = Vec::new();
        let mut requeue: Vec<OutboxMessage> = Vec::new();
        let mut dropped: Vec<DeadLetter> = Vec::new();

        for mut message in messages {
            match self.bus.publish(&message.topic, &message.msg).await {
                Ok(()) => {
                    debug!(message_id = %message.id, topic = %message.topic, "Published outbox message");
                    self.retries.clear(&message.id);
                    report.delivered += 1;
                    finished_ids.push(message.id);
                }
                Err(e) => {
                    let attempts = self.retries.attempts(&message.id);
                    if attempts >= self.config.max_attempts {
                        self.retries.clear(&message.id);
                        warn!(
                            message_id = %message.id,
                            topic = %message.topic,
                            attempts = attempts + 1,
                            error = %e,
                            "Dropping outbox message after repeated failures"
                        );
                        dropped.push(DeadLetter::from_message(&message, attempts + 1, e.to_string()));
                        finished_ids.push(message.id);
                    } else {
                        let not_before = self.next_attempt_at(now, attempts);
                        message.reschedule(not_before, now);
                        let recorded = self.retries.record_failure(&message.id);
                        debug!(
                            message_id = %message.id,
                            attempts = recorded,
                            not_before = %not_before,
                            error = %e,
                            "Publish failed, rescheduling outbox message"
                        );
                        requeue.push(message);
                    }
                }
            }
        }

        report.requeued = requeue.len();
        report.dropped = dropped.len();

        if !requeue.is_empty() {
            report.lost = self.requeue(&requeue).await;
        }

        if !finished_ids.is_empty() {
            if let Err(e) = self.store.delete_outbox_messages(&finished_ids).await {
                warn!(
                    error = %e,
                    count = finished_ids.len(),
                    "Failed to delete finished outbox messages, abandoning tick"
                );
                report.abandoned = true;
                self.set_state(DispatcherState::Idle);
                return report;
            }
        }

        for letter in &dropped {
            let Some(apply_id) = letter.apply_id.as_deref() else {
                warn!(message_id = %letter.message_id, "Dropped outbox message has no owning task");
                continue;
            };
            match self.notifier.notify(apply_id, letter).await {
                Ok(()) => report.notified += 1,
                Err(e) => warn!(
                    apply_id = %apply_id,
                    message_id = %letter.message_id,
                    error = %e,
                    "Failed to notify owning task"
                ),
            }
        }

        self.set_state(DispatcherState::Idle);
        report
    }

    /// Returns how many rows were lost between the delete and the re-insert.
    async fn requeue(&mut self, messages: &[OutboxMessage]) -> usize {
        let ids: Vec<String> = messages.iter().map(|m| m.id.clone()).collect();

        if let Err(e) = self.store.delete_outbox_messages(&ids).await {
            warn!(error = %e, count = ids.len(), "Failed to remove outbox messages for requeue");
            return 0;
        }

        if let Err(e) = self.store.batch_create_outbox_messages(messages).await {
            // Rows are gone from the store and will never be fetched again.
            for id in &ids {
                self.retries.clear(id);
            }
            error!(
                error = %e,
                message_ids = ?ids,
                "Failed to re-insert requeued outbox messages, messages lost"
            );
            return ids.len();
        }

        0
    }

    fn next_attempt_at(&self, now: DateTime<Utc>, attempts: u32) -> DateTime<Utc> {
        let delay = chrono::Duration::from_std(backoff_delay(self.config.backoff_base, attempts))
            .unwrap_or_else(|_| chrono::Duration::days(365));
        now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn set_state(&self, state: DispatcherState) {
        self.state_tx.send_replace(state);
    }
}
