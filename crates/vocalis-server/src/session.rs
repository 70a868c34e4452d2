//! Registry of live websocket sessions.
//!
//! Each session owns its conversation; the registry only holds the control
//! channel used to reach it from HTTP handlers.

use crate::config::Config;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, RwLock};
use uuid::Uuid;

/// Longest wait for one session to acknowledge a reset. A session finishing
/// a tool call acknowledges only once the call returns.
const RESET_ACK_TIMEOUT: Duration = Duration::from_secs(15);

/// Commands delivered to a session's event loop.
#[derive(Debug)]
pub enum SessionCommand {
    /// Cancel the in-flight turn and clear the history. `ack` fires once done.
    Reset { ack: oneshot::Sender<()> },
}

/// Per-connection limits and conversation defaults.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub system_prompt: String,
    pub max_history: usize,
    pub keepalive_interval: Duration,
    pub max_missed_keepalives: u32,
    pub max_message_bytes: usize,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            system_prompt: config.llm.system_prompt.clone(),
            max_history: config.llm.max_history,
            keepalive_interval: Duration::from_secs(config.session.keepalive_interval_secs.max(1)),
            max_missed_keepalives: config.session.max_missed_keepalives.max(1),
            max_message_bytes: config.session.max_message_bytes,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("no active session with id {0}")]
pub struct UnknownSession(pub Uuid);

#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<Uuid, mpsc::Sender<SessionCommand>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, id: Uuid, control: mpsc::Sender<SessionCommand>) {
        self.sessions.write().await.insert(id, control);
        tracing::debug!(session = %id, "session registered");
    }

    pub async fn remove(&self, id: Uuid) {
        if self.sessions.write().await.remove(&id).is_some() {
            tracing::debug!(session = %id, "session removed");
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn contains(&self, id: Uuid) -> bool {
        self.sessions.read().await.contains_key(&id)
    }

    /// Resets one session, or every session when `target` is `None`.
    ///
    /// Returns the number of sessions that acknowledged the reset.
    pub async fn reset(&self, target: Option<Uuid>) -> Result<usize, UnknownSession> {
        let controls: Vec<(Uuid, mpsc::Sender<SessionCommand>)> = {
            let sessions = self.sessions.read().await;
            match target {
                Some(id) => {
                    let control = sessions.get(&id).ok_or(UnknownSession(id))?;
                    vec![(id, control.clone())]
                }
                None => sessions.iter().map(|(id, c)| (*id, c.clone())).collect(),
            }
        };

        let mut pending = Vec::with_capacity(controls.len());
        for (id, control) in controls {
            let (ack, done) = oneshot::channel();
            if control.send(SessionCommand::Reset { ack }).await.is_ok() {
                pending.push((id, done));
            }
        }

        let mut acknowledged = 0;
        for (id, done) in pending {
            match tokio::time::timeout(RESET_ACK_TIMEOUT, done).await {
                Ok(Ok(())) => acknowledged += 1,
                Ok(Err(_)) => tracing::debug!(session = %id, "session closed during reset"),
                Err(_) => tracing::warn!(session = %id, "session did not acknowledge reset in time"),
            }
        }
        Ok(acknowledged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acknowledging_session() -> mpsc::Sender<SessionCommand> {
        let (tx, mut rx) = mpsc::channel(4);
        tokio::spawn(async move {
            while let Some(SessionCommand::Reset { ack }) = rx.recv().await {
                let _ = ack.send(());
            }
        });
        tx
    }

    #[tokio::test]
    async fn reset_all_counts_acknowledgements() {
        let registry = SessionRegistry::new();
        registry.register(Uuid::new_v4(), acknowledging_session()).await;
        registry.register(Uuid::new_v4(), acknowledging_session()).await;
        assert_eq!(registry.reset(None).await, Ok(2));
    }

    #[tokio::test]
    async fn reset_unknown_session_fails() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        assert_eq!(registry.reset(Some(id)).await, Err(UnknownSession(id)));
    }

    #[tokio::test]
    async fn closed_session_is_not_counted() {
        let registry = SessionRegistry::new();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let id = Uuid::new_v4();
        registry.register(id, tx).await;
        assert_eq!(registry.reset(Some(id)).await, Ok(0));
        registry.remove(id).await;
        assert!(registry.is_empty().await);
    }
}
