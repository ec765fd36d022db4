//! Handle for communicating with the engine registry actor.

use tokio::sync::{broadcast, mpsc, oneshot};

use super::commands::RegistryCommand;
use super::{RegistryError, RegistryEvent, SessionSettings, StreamKey};
use crate::addressing::{ResourceId, ResourcePath};
use crate::backend::FileEntry;
use crate::options::EngineOverrides;
use crate::session::Session;
use crate::stats::StatsSnapshot;

/// Session and file resolved from a stream path.
#[derive(Debug, Clone)]
pub struct OpenedFile {
    pub session: Session,
    pub file_index: usize,
    pub file: FileEntry,
}

/// Handle for communicating with the engine registry actor.
///
/// Cheap to clone; every clone talks to the same actor.
#[derive(Clone)]
pub struct RegistryHandle {
    sender: mpsc::Sender<RegistryCommand>,
    events: broadcast::Sender<RegistryEvent>,
}

impl RegistryHandle {
    pub(crate) fn new(
        sender: mpsc::Sender<RegistryCommand>,
        events: broadcast::Sender<RegistryEvent>,
    ) -> Self {
        Self { sender, events }
    }

    /// Returns the session for `id` once its backend is ready.
    ///
    /// Creates the session on first use. Overrides only apply to a newly
    /// created session; an existing one is returned as-is with its swarm
    /// resumed.
    ///
    /// # Errors
    /// - `RegistryError::BackendUnavailable` - No backend factory configured
    /// - `RegistryError::Config` - Merged options failed validation
    /// - `RegistryError::Backend` - Backend could not be built or never became ready
    /// - `RegistryError::SessionDestroyed` - Removed before it became ready
    pub async fn create(
        &self,
        id: ResourceId,
        overrides: EngineOverrides,
    ) -> Result<Session, RegistryError> {
        let (responder, rx) = oneshot::channel();
        let cmd = RegistryCommand::Create {
            id,
            overrides,
            responder,
        };

        self.sender
            .send(cmd)
            .await
            .map_err(|_| RegistryError::RegistryShutdown)?;

        rx.await.map_err(|_| RegistryError::RegistryShutdown)?
    }

    /// Resolves an `{id}/{fileIndex}` path to its session and file.
    ///
    /// # Errors
    /// - `RegistryError::InvalidPath` - Id segment is not 40 hex characters
    /// - `RegistryError::NotImplementedAddressing` - Reserved 64-character id
    /// - `RegistryError::InvalidFileIndex` - Index is not a non-negative integer
    /// - `RegistryError::FileNotFound` - Index beyond the torrent's file list
    /// - Any error of [`RegistryHandle::create`]
    pub async fn open_path(&self, path: &str) -> Result<OpenedFile, RegistryError> {
        let ResourcePath { id, file_index } = ResourcePath::parse(path)?;
        let session = self.create(id, EngineOverrides::default()).await?;
        let file = session
            .file(file_index)
            .cloned()
            .ok_or(RegistryError::FileNotFound { index: file_index })?;

        Ok(OpenedFile {
            session,
            file_index,
            file,
        })
    }

    /// Destroys the session for `id`. Unknown ids are ignored.
    pub async fn remove(&self, id: ResourceId) -> Result<(), RegistryError> {
        let (responder, rx) = oneshot::channel();
        self.send(RegistryCommand::Remove { id, responder }).await?;
        rx.await.map_err(|_| RegistryError::RegistryShutdown)
    }

    /// Applies swarm and write-queue settings. Unknown ids are ignored.
    pub async fn settings(
        &self,
        id: ResourceId,
        settings: SessionSettings,
    ) -> Result<(), RegistryError> {
        let (responder, rx) = oneshot::channel();
        self.send(RegistryCommand::Settings {
            id,
            settings,
            responder,
        })
        .await?;
        rx.await.map_err(|_| RegistryError::RegistryShutdown)
    }

    /// Statistics snapshot, `None` when no ready session exists for `id`.
    pub async fn stats(
        &self,
        id: ResourceId,
        file_index: Option<usize>,
    ) -> Result<Option<StatsSnapshot>, RegistryError> {
        let (responder, rx) = oneshot::channel();
        self.send(RegistryCommand::Stats {
            id,
            file_index,
            responder,
        })
        .await?;
        rx.await.map_err(|_| RegistryError::RegistryShutdown)
    }

    /// Ids of all ready sessions.
    pub async fn list(&self) -> Result<Vec<ResourceId>, RegistryError> {
        let (responder, rx) = oneshot::channel();
        self.send(RegistryCommand::List { responder }).await?;
        rx.await.map_err(|_| RegistryError::RegistryShutdown)
    }

    /// Registers an open transfer of one file.
    ///
    /// Returns once both reference scopes counted it, so a close sent
    /// afterwards can never overtake it.
    pub async fn stream_open(&self, id: ResourceId, file_index: usize) -> Result<(), RegistryError> {
        let (responder, rx) = oneshot::channel();
        let key = StreamKey::new(id, file_index);
        self.send(RegistryCommand::StreamOpen { key, responder })
            .await?;
        rx.await.map_err(|_| RegistryError::RegistryShutdown)
    }

    /// Registers the end of a transfer.
    ///
    /// Never blocks, so it can be called from `Drop`. When the mailbox is
    /// full the close is delivered from a spawned task.
    pub fn stream_close(&self, id: ResourceId, file_index: usize) {
        let cmd = RegistryCommand::StreamClose {
            key: StreamKey::new(id, file_index),
        };

        match self.sender.try_send(cmd) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(cmd)) => {
                let sender = self.sender.clone();
                match tokio::runtime::Handle::try_current() {
                    Ok(runtime) => {
                        runtime.spawn(async move {
                            let _ = sender.send(cmd).await;
                        });
                    }
                    Err(_) => tracing::warn!("Stream close dropped outside of a runtime"),
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Stream close after registry shutdown ignored");
            }
        }
    }

    /// Subscribes to registry lifecycle and progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Destroys every session and stops the actor.
    pub async fn shutdown(&self) -> Result<(), RegistryError> {
        let (responder, rx) = oneshot::channel();
        self.send(RegistryCommand::Shutdown { responder }).await?;
        rx.await.map_err(|_| RegistryError::RegistryShutdown)
    }

    /// Checks if the registry actor is still running.
    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }

    async fn send(&self, cmd: RegistryCommand) -> Result<(), RegistryError> {
        self.sender
            .send(cmd)
            .await
            .map_err(|_| RegistryError::RegistryShutdown)
    }
}
