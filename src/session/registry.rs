//! Session registry: identifier → live session

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use super::orchestrator::{SessionSettings, VoiceSession};
use crate::providers::SessionFactory;
use crate::{Error, Result};

#[derive(Default)]
struct Slots {
    live: HashMap<String, Arc<VoiceSession>>,
    /// Identifiers reserved by a `start` that has not finished initializing
    starting: HashSet<String>,
    draining: bool,
}

/// Owns every live session of the process
///
/// All map mutation happens under one lock. Provider I/O (initialize,
/// shutdown) always runs with the lock released.
pub struct SessionRegistry {
    factory: Arc<dyn SessionFactory>,
    settings: SessionSettings,
    slots: RwLock<Slots>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(factory: Arc<dyn SessionFactory>, settings: SessionSettings) -> Self {
        Self {
            factory,
            settings,
            slots: RwLock::new(Slots::default()),
        }
    }

    /// Create, initialize, and register a session
    ///
    /// # Errors
    ///
    /// Returns `DuplicateSession` if the identifier is live or starting,
    /// or the provider error if initialization fails
    pub async fn start(&self, id: &str) -> Result<Arc<VoiceSession>> {
        {
            let mut slots = self.slots.write().await;
            if slots.draining {
                return Err(Error::SessionClosed(id.to_string()));
            }
            if slots.live.contains_key(id) || slots.starting.contains(id) {
                return Err(Error::DuplicateSession(id.to_string()));
            }
            slots.starting.insert(id.to_string());
        }

        let started = self.build(id).await;

        let mut slots = self.slots.write().await;
        slots.starting.remove(id);

        let session = match started {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(session_id = id, error = %e, "session start failed");
                return Err(e);
            }
        };

        if slots.draining {
            drop(slots);
            tracing::info!(session_id = id, "registry shutting down, discarding new session");
            let _ = session.shutdown().await;
            return Err(Error::SessionClosed(id.to_string()));
        }

        slots.live.insert(id.to_string(), Arc::clone(&session));
        tracing::info!(session_id = id, active = slots.live.len(), "session registered");
        Ok(session)
    }

    async fn build(&self, id: &str) -> Result<Arc<VoiceSession>> {
        let providers = self.factory.create(id)?;
        let session = VoiceSession::new(id, providers, self.settings.clone());
        session.initialize().await?;
        Ok(session)
    }

    /// Look up a live session
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` if no session has this identifier
    pub async fn get(&self, id: &str) -> Result<Arc<VoiceSession>> {
        self.slots
            .read()
            .await
            .live
            .get(id)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))
    }

    /// Shut a session down and remove it
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` if no session has this identifier
    pub async fn end(&self, id: &str) -> Result<()> {
        let session = self
            .slots
            .write()
            .await
            .live
            .remove(id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;

        if let Err(e) = session.shutdown().await {
            tracing::warn!(session_id = id, error = %e, "session shutdown reported an error");
        }
        tracing::info!(session_id = id, "session ended");
        Ok(())
    }

    /// Shut down every session and refuse new ones
    pub async fn shutdown_all(&self) {
        let sessions: Vec<_> = {
            let mut slots = self.slots.write().await;
            slots.draining = true;
            slots.live.drain().map(|(_, s)| s).collect()
        };

        tracing::info!(count = sessions.len(), "shutting down all sessions");

        let results =
            futures::future::join_all(sessions.iter().map(|session| session.shutdown())).await;
        for (session, result) in sessions.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(session_id = session.id(), error = %e, "session shutdown reported an error");
            }
        }
    }

    /// Number of live sessions
    pub async fn len(&self) -> usize {
        self.slots.read().await.live.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
