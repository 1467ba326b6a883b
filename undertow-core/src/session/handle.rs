//! Handle for communicating with the session registry actor.

use tokio::sync::{mpsc, oneshot};

use super::commands::RegistryCommand;
use super::{SessionError, SessionRef, SessionStatus};
use crate::swarm::{ContentLocator, InfoHash};

/// Cloneable entry point to the session registry.
///
/// Every operation is a message to the actor; once the actor has stopped
/// all calls fail with `SessionError::RegistryShutdown`.
#[derive(Clone)]
pub struct SessionRegistryHandle {
    sender: mpsc::Sender<RegistryCommand>,
}

impl SessionRegistryHandle {
    pub(super) fn new(sender: mpsc::Sender<RegistryCommand>) -> Self {
        Self { sender }
    }

    /// Parses `locator` and adds the session it names.
    ///
    /// Validation happens before any message is sent, so malformed input
    /// never reaches the swarm.
    ///
    /// # Errors
    /// - `SessionError::InvalidIdentifier` - Locator is not a magnet URI or info hash
    /// - `SessionError::SwarmUnavailable` - No metadata within the join timeout
    pub async fn add(&self, locator: &str) -> Result<SessionRef, SessionError> {
        let locator = ContentLocator::parse(locator).map_err(SessionError::from_locator_error)?;
        self.add_locator(locator).await
    }

    /// Returns the existing session for the locator's hash or creates one.
    ///
    /// Concurrent calls for the same hash share a single swarm join and
    /// observe the same session.
    ///
    /// # Errors
    /// - `SessionError::SwarmUnavailable` - No metadata within the join timeout
    pub async fn add_locator(&self, locator: ContentLocator) -> Result<SessionRef, SessionError> {
        let (responder, rx) = oneshot::channel();
        self.send(RegistryCommand::Add { locator, responder })
            .await?;
        rx.await.map_err(|_| SessionError::RegistryShutdown)?
    }

    /// Looks up a session.
    ///
    /// # Errors
    /// - `SessionError::NotFound` - No session for this hash
    pub async fn get(&self, info_hash: InfoHash) -> Result<SessionRef, SessionError> {
        let (responder, rx) = oneshot::channel();
        self.send(RegistryCommand::Get {
            info_hash,
            responder,
        })
        .await?;
        rx.await.map_err(|_| SessionError::RegistryShutdown)?
    }

    /// Session metadata combined with live swarm counters.
    ///
    /// # Errors
    /// - `SessionError::NotFound` - No session for this hash
    pub async fn status(&self, info_hash: InfoHash) -> Result<SessionStatus, SessionError> {
        let (responder, rx) = oneshot::channel();
        self.send(RegistryCommand::Status {
            info_hash,
            responder,
        })
        .await?;
        rx.await.map_err(|_| SessionError::RegistryShutdown)?
    }

    /// Status of every session, oldest first.
    pub async fn list(&self) -> Result<Vec<SessionStatus>, SessionError> {
        let (responder, rx) = oneshot::channel();
        self.send(RegistryCommand::List { responder }).await?;
        rx.await.map_err(|_| SessionError::RegistryShutdown)
    }

    /// Tears down a session, its swarm download and its cached state.
    ///
    /// A session still joining the swarm is not yet registered and reports
    /// `NotFound`.
    ///
    /// # Errors
    /// - `SessionError::NotFound` - No session for this hash
    pub async fn remove(&self, info_hash: InfoHash) -> Result<(), SessionError> {
        let (responder, rx) = oneshot::channel();
        self.send(RegistryCommand::Remove {
            info_hash,
            responder,
        })
        .await?;
        rx.await.map_err(|_| SessionError::RegistryShutdown)?
    }

    /// Tears down every session and stops the actor.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        let (responder, rx) = oneshot::channel();
        self.send(RegistryCommand::Shutdown { responder }).await?;
        rx.await.map_err(|_| SessionError::RegistryShutdown)
    }

    /// Checks if the registry actor is still running.
    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }

    async fn send(&self, command: RegistryCommand) -> Result<(), SessionError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| SessionError::RegistryShutdown)
    }
}
