//! Command definitions for the session registry actor.

use tokio::sync::oneshot;

use super::{SessionError, SessionRef, SessionStatus};
use crate::swarm::{ContentLocator, InfoHash, TorrentMetadata};

pub(super) type SessionResponder = oneshot::Sender<Result<SessionRef, SessionError>>;

/// Messages processed sequentially by the registry actor.
pub(super) enum RegistryCommand {
    /// Create a session, or join the one already present or resolving.
    Add {
        locator: ContentLocator,
        responder: SessionResponder,
    },
    /// Look up a registered session.
    Get {
        info_hash: InfoHash,
        responder: SessionResponder,
    },
    /// Session plus live transfer counters.
    Status {
        info_hash: InfoHash,
        responder: oneshot::Sender<Result<SessionStatus, SessionError>>,
    },
    /// Status of every registered session.
    List {
        responder: oneshot::Sender<Vec<SessionStatus>>,
    },
    /// Tear down a session and evict its keyed state.
    Remove {
        info_hash: InfoHash,
        responder: oneshot::Sender<Result<(), SessionError>>,
    },
    /// Tear down everything and stop the actor.
    Shutdown { responder: oneshot::Sender<()> },
}

/// Outcome of a background swarm join, reported back to the actor.
pub(super) struct JoinFinished {
    pub info_hash: InfoHash,
    pub result: Result<TorrentMetadata, JoinFailure>,
}

/// Why a join produced no session.
///
/// Cloned out to every caller waiting on the same identifier.
#[derive(Debug, Clone)]
pub(super) enum JoinFailure {
    TimedOut { seconds: u64 },
    Rejected { reason: String },
}

impl JoinFailure {
    pub fn into_error(self, info_hash: InfoHash) -> SessionError {
        let reason = match self {
            JoinFailure::TimedOut { seconds } => {
                format!("no metadata from the swarm within {seconds}s")
            }
            JoinFailure::Rejected { reason } => reason,
        };
        SessionError::SwarmUnavailable { info_hash, reason }
    }
}
