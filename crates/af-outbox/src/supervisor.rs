//! Restart supervision for the dispatcher loop.
//!
//! The dispatcher catches panics raised inside a tick and asks its
//! [`Supervisor`] whether to relaunch. Restarts wait out a cooldown that
//! doubles with each consecutive panic, and stop altogether once the
//! consecutive budget is spent. A tick that completes normally resets the
//! streak.

use std::any::Any;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Wait before the first restart of a streak.
    pub cooldown: Duration,
    pub max_cooldown: Duration,
    pub max_consecutive_restarts: u32,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(1),
            max_cooldown: Duration::from_secs(60),
            max_consecutive_restarts: 10,
        }
    }
}

impl RestartPolicy {
    /// Cooldown before restart number `restart` (1-based) of a streak.
    pub fn cooldown_for(&self, restart: u32) -> Duration {
        let factor = 2u32.saturating_pow(restart.saturating_sub(1));
        self.cooldown.saturating_mul(factor).min(self.max_cooldown)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    Panicked { restarts: u32, message: String },
    Restarted { restarts: u32 },
    GaveUp { restarts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    Restart,
    Stop,
}

pub struct Supervisor {
    name: String,
    policy: RestartPolicy,
    consecutive: u32,
    events: broadcast::Sender<SupervisorEvent>,
}

impl Supervisor {
    pub fn new(name: impl Into<String>, policy: RestartPolicy) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            name: name.into(),
            policy,
            consecutive: 0,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    pub fn consecutive_restarts(&self) -> u32 {
        self.consecutive
    }

    pub fn record_healthy(&mut self) {
        if self.consecutive > 0 {
            info!(supervisor = %self.name, restarts = self.consecutive, "Loop healthy again, restart streak reset");
            self.consecutive = 0;
        }
    }

    /// Handle a caught panic. Sleeps through the cooldown unless `shutdown`
    /// fires first, in which case the loop is not relaunched.
    pub async fn on_panic(&mut self, message: &str, shutdown: &CancellationToken) -> RestartDecision {
        error!(supervisor = %self.name, panic = %message, "Loop panicked");
        let _ = self.events.send(SupervisorEvent::Panicked {
            restarts: self.consecutive,
            message: message.to_string(),
        });

        if self.consecutive >= self.policy.max_consecutive_restarts {
            error!(
                supervisor = %self.name,
                restarts = self.consecutive,
                "Restart budget exhausted, giving up"
            );
            let _ = self.events.send(SupervisorEvent::GaveUp { restarts: self.consecutive });
            return RestartDecision::Stop;
        }

        self.consecutive += 1;
        let cooldown = self.policy.cooldown_for(self.consecutive);
        warn!(
            supervisor = %self.name,
            restart = self.consecutive,
            cooldown_ms = cooldown.as_millis() as u64,
            "Restarting loop after cooldown"
        );

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!(supervisor = %self.name, "Shutdown during restart cooldown");
                return RestartDecision::Stop;
            }
            _ = tokio::time::sleep(cooldown) => {}
        }

        let _ = self.events.send(SupervisorEvent::Restarted { restarts: self.consecutive });
        RestartDecision::Restart
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
