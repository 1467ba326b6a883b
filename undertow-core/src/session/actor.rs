//! Actor implementation for the session registry.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::commands::{JoinFailure, JoinFinished, RegistryCommand, SessionResponder};
use super::handle::SessionRegistryHandle;
use super::{SessionError, SessionEvictor, SessionRef, SessionStatus, TorrentSession};
use crate::config::SessionConfig;
use crate::swarm::{ContentLocator, InfoHash, PiecePriority, SwarmEngine};

/// Spawns the session registry actor and returns its handle.
///
/// `evictors` are told about every removed session so caches and stream
/// cursors keyed by the identifier are dropped with it.
pub fn spawn_session_registry(
    swarm: Arc<dyn SwarmEngine>,
    config: SessionConfig,
    evictors: Vec<Arc<dyn SessionEvictor>>,
) -> SessionRegistryHandle {
    let (sender, receiver) = mpsc::channel(100);
    let (join_sender, join_receiver) = mpsc::unbounded_channel();

    let registry = SessionRegistry {
        swarm,
        config,
        evictors,
        sessions: HashMap::new(),
        pending: HashMap::new(),
        join_sender,
    };

    tokio::spawn(run_actor_loop(registry, receiver, join_receiver));

    SessionRegistryHandle::new(sender)
}

struct SessionRegistry {
    swarm: Arc<dyn SwarmEngine>,
    config: SessionConfig,
    evictors: Vec<Arc<dyn SessionEvictor>>,
    sessions: HashMap<InfoHash, SessionRef>,
    pending: HashMap<InfoHash, PendingJoin>,
    join_sender: mpsc::UnboundedSender<JoinFinished>,
}

/// Join in progress and the callers waiting on it.
struct PendingJoin {
    waiters: Vec<SessionResponder>,
    task: JoinHandle<()>,
}

async fn run_actor_loop(
    mut registry: SessionRegistry,
    mut receiver: mpsc::Receiver<RegistryCommand>,
    mut join_receiver: mpsc::UnboundedReceiver<JoinFinished>,
) {
    tracing::debug!("Session registry actor started");

    loop {
        tokio::select! {
            command = receiver.recv() => {
                // Every handle dropped
                let Some(command) = command else { break };
                if !registry.handle_command(command).await {
                    break;
                }
            }
            Some(finished) = join_receiver.recv() => {
                registry.complete_join(finished);
            }
        }
    }

    tracing::debug!("Session registry actor stopped");
}

impl SessionRegistry {
    /// Handles a single command. Returns false once the actor should stop.
    async fn handle_command(&mut self, command: RegistryCommand) -> bool {
        match command {
            RegistryCommand::Add { locator, responder } => self.add(locator, responder),

            RegistryCommand::Get {
                info_hash,
                responder,
            } => {
                let result = self
                    .sessions
                    .get(&info_hash)
                    .cloned()
                    .ok_or(SessionError::NotFound { info_hash });
                let _ = responder.send(result);
            }

            RegistryCommand::Status {
                info_hash,
                responder,
            } => {
                let _ = responder.send(self.status(info_hash));
            }

            RegistryCommand::List { responder } => {
                let _ = responder.send(self.list());
            }

            RegistryCommand::Remove {
                info_hash,
                responder,
            } => {
                let result = self.remove(info_hash).await;
                let _ = responder.send(result);
            }

            RegistryCommand::Shutdown { responder } => {
                self.teardown_all().await;
                let _ = responder.send(());
                return false;
            }
        }
        true
    }

    fn add(&mut self, locator: ContentLocator, responder: SessionResponder) {
        let info_hash = locator.info_hash;

        if let Some(session) = self.sessions.get(&info_hash) {
            tracing::debug!(%info_hash, "Add joined existing session");
            let _ = responder.send(Ok(Arc::clone(session)));
            return;
        }

        if let Some(join) = self.pending.get_mut(&info_hash) {
            tracing::debug!(%info_hash, "Add joined in-progress swarm join");
            join.waiters.push(responder);
            return;
        }

        let task = self.spawn_join(locator);
        self.pending.insert(
            info_hash,
            PendingJoin {
                waiters: vec![responder],
                task,
            },
        );
    }

    /// Resolves metadata off the actor task, bounded by the join timeout.
    fn spawn_join(&self, locator: ContentLocator) -> JoinHandle<()> {
        let swarm = Arc::clone(&self.swarm);
        let finished = self.join_sender.clone();
        let join_timeout = self.config.join_timeout;
        let info_hash = locator.info_hash;

        tracing::info!(%info_hash, timeout_secs = join_timeout.as_secs(), "Joining swarm");

        tokio::spawn(async move {
            let result = match tokio::time::timeout(join_timeout, swarm.add_torrent(&locator)).await
            {
                Ok(Ok(metadata)) => Ok(metadata),
                Ok(Err(e)) => Err(JoinFailure::Rejected {
                    reason: e.to_string(),
                }),
                Err(_) => {
                    if let Err(e) = swarm.remove_torrent(info_hash).await {
                        tracing::debug!(%info_hash, error = %e, "Nothing to clean up after join timeout");
                    }
                    Err(JoinFailure::TimedOut {
                        seconds: join_timeout.as_secs(),
                    })
                }
            };
            let _ = finished.send(JoinFinished { info_hash, result });
        })
    }

    fn complete_join(&mut self, finished: JoinFinished) {
        let JoinFinished { info_hash, result } = finished;
        let waiters = self
            .pending
            .remove(&info_hash)
            .map(|join| join.waiters)
            .unwrap_or_default();

        match result {
            Ok(metadata) => {
                let session = Arc::new(TorrentSession::from_metadata(&metadata));

                // Every file is selected; the scheduler raises pieces above this floor.
                if let Err(e) = self.swarm.set_priority(
                    info_hash,
                    0..metadata.piece_count(),
                    PiecePriority::Normal,
                ) {
                    tracing::warn!(%info_hash, error = %e, "Failed to select all pieces");
                }

                tracing::info!(
                    %info_hash,
                    name = %session.name,
                    files = session.files.len(),
                    waiters = waiters.len(),
                    "Session created"
                );
                self.sessions.insert(info_hash, Arc::clone(&session));
                for waiter in waiters {
                    let _ = waiter.send(Ok(Arc::clone(&session)));
                }
            }
            Err(failure) => {
                tracing::warn!(%info_hash, ?failure, "Swarm join failed");
                for waiter in waiters {
                    let _ = waiter.send(Err(failure.clone().into_error(info_hash)));
                }
            }
        }
    }

    fn status(&self, info_hash: InfoHash) -> Result<SessionStatus, SessionError> {
        let session = self
            .sessions
            .get(&info_hash)
            .ok_or(SessionError::NotFound { info_hash })?;
        let stats = self.swarm.stats(info_hash)?;
        Ok(SessionStatus::new(session, stats))
    }

    fn list(&self) -> Vec<SessionStatus> {
        let mut statuses: Vec<SessionStatus> = self
            .sessions
            .values()
            .map(|session| {
                let stats = self.swarm.stats(session.info_hash).unwrap_or_default();
                SessionStatus::new(session, stats)
            })
            .collect();
        statuses.sort_by(|a, b| {
            a.added_at
                .cmp(&b.added_at)
                .then_with(|| a.info_hash.cmp(&b.info_hash))
        });
        statuses
    }

    async fn remove(&mut self, info_hash: InfoHash) -> Result<(), SessionError> {
        if self.sessions.remove(&info_hash).is_none() {
            return Err(SessionError::NotFound { info_hash });
        }
        self.release(info_hash).await;
        tracing::info!(%info_hash, "Session removed");
        Ok(())
    }

    /// Releases swarm resources and keyed state for a removed session.
    async fn release(&self, info_hash: InfoHash) {
        if let Err(e) = self.swarm.remove_torrent(info_hash).await {
            tracing::warn!(%info_hash, error = %e, "Swarm teardown failed");
        }
        for evictor in &self.evictors {
            evictor.evict(info_hash);
        }
    }

    async fn teardown_all(&mut self) {
        let info_hashes: Vec<InfoHash> = self
            .sessions
            .drain()
            .map(|(info_hash, _)| info_hash)
            .chain(self.pending.drain().map(|(info_hash, join)| {
                // A join finishing after teardown would leave an unowned download
                join.task.abort();
                info_hash
            }))
            .collect();

        tracing::info!(sessions = info_hashes.len(), "Tearing down all sessions");
        for info_hash in info_hashes {
            self.release(info_hash).await;
        }
    }
}
