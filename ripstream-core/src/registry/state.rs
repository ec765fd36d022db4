//! Registry state owned by the actor task.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use super::commands::InternalMessage;
use super::{RegistryError, RegistryEvent, SessionSettings, StreamKey, Toggle};
use crate::addressing::ResourceId;
use crate::backend::{
    BackendError, BackendEvent, BackendFactory, DiscoveryHandle, PeerDiscovery, TorrentBackend,
    TorrentInfo,
};
use crate::config::RegistryConfig;
use crate::options::{EngineOptions, EngineOverrides};
use crate::refcount::{DebouncedRefCounter, Expiry, Release};
use crate::session::Session;
use crate::stats::{self, StatsSnapshot};
use crate::throttle;
use crate::window::{StreamWindowTracker, WindowUpdate, verification_selection};

pub type Waiter = oneshot::Sender<Result<Session, RegistryError>>;

enum EntryState {
    /// Backend constructed, waiting for metadata
    Creating { waiters: Vec<Waiter> },
    Ready {
        session: Session,
        windows: StreamWindowTracker,
    },
}

struct SessionEntry {
    epoch: u64,
    backend: Arc<dyn TorrentBackend>,
    options: Arc<EngineOptions>,
    created_at: DateTime<Utc>,
    state: EntryState,
    /// Event pump and readiness wait
    tasks: Vec<JoinHandle<()>>,
    discovery: Option<Box<dyn DiscoveryHandle>>,
    write_queue_timer: Option<JoinHandle<()>>,
}

impl SessionEntry {
    fn session(&self) -> Option<&Session> {
        match &self.state {
            EntryState::Ready { session, .. } => Some(session),
            EntryState::Creating { .. } => None,
        }
    }

    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(timer) = self.write_queue_timer.take() {
            timer.abort();
        }
    }
}

/// Grace-period expiry channels of the reference scopes.
pub struct ExpiryReceivers {
    pub streams: mpsc::UnboundedReceiver<Expiry<StreamKey>>,
    pub resources: mpsc::UnboundedReceiver<Expiry<ResourceId>>,
    pub downloads: mpsc::UnboundedReceiver<Expiry<ResourceId>>,
}

/// Sessions, reference counters and readiness trackers of one registry.
///
/// Only ever touched from the actor task.
pub struct EngineRegistry {
    config: RegistryConfig,
    factory: Option<Arc<dyn BackendFactory>>,
    discovery: Option<Arc<dyn PeerDiscovery>>,
    entries: HashMap<ResourceId, SessionEntry>,
    streams: DebouncedRefCounter<StreamKey>,
    resources: DebouncedRefCounter<ResourceId>,
    /// Tracked files still waiting on pieces, per resource
    downloads: DebouncedRefCounter<ResourceId>,
    internal_sender: mpsc::UnboundedSender<InternalMessage>,
    events: broadcast::Sender<RegistryEvent>,
    next_epoch: u64,
}

impl EngineRegistry {
    pub fn new(
        config: RegistryConfig,
        factory: Option<Arc<dyn BackendFactory>>,
        discovery: Option<Arc<dyn PeerDiscovery>>,
        internal_sender: mpsc::UnboundedSender<InternalMessage>,
        events: broadcast::Sender<RegistryEvent>,
    ) -> (Self, ExpiryReceivers) {
        let (streams, stream_expiries) = DebouncedRefCounter::new("stream", config.stream_grace);
        let (resources, resource_expiries) =
            DebouncedRefCounter::new("resource", config.session_grace);
        let (downloads, download_expiries) =
            DebouncedRefCounter::new("download", config.stream_grace);

        let registry = Self {
            config,
            factory,
            discovery,
            entries: HashMap::new(),
            streams,
            resources,
            downloads,
            internal_sender,
            events,
            next_epoch: 0,
        };
        let receivers = ExpiryReceivers {
            streams: stream_expiries,
            resources: resource_expiries,
            downloads: download_expiries,
        };
        (registry, receivers)
    }

    /// Resolves `responder` with the session for `id`, creating it if needed.
    ///
    /// Concurrent creations of one id share a single readiness wait.
    pub fn create(&mut self, id: ResourceId, overrides: EngineOverrides, responder: Waiter) {
        if let Some(entry) = self.entries.get_mut(&id) {
            match &mut entry.state {
                EntryState::Ready { session, .. } => {
                    entry.backend.resume_swarm();
                    let _ = responder.send(Ok(session.clone()));
                }
                EntryState::Creating { waiters } => {
                    tracing::debug!("Joining in-flight creation of {}", id);
                    waiters.push(responder);
                }
            }
            return;
        }

        let mut entry = match self.start_session(&id, overrides) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!("Failed to create session {}: {}", id, err);
                let _ = responder.send(Err(err));
                return;
            }
        };

        if let EntryState::Creating { waiters } = &mut entry.state {
            waiters.push(responder);
        }
        self.entries.insert(id.clone(), entry);
        self.emit(RegistryEvent::SessionCreated { id });
    }

    fn start_session(
        &mut self,
        id: &ResourceId,
        overrides: EngineOverrides,
    ) -> Result<SessionEntry, RegistryError> {
        let factory = self
            .factory
            .as_ref()
            .ok_or(RegistryError::BackendUnavailable)?;
        let options = self.config.engine_defaults(id).merge(overrides);
        options.validate()?;
        let backend = factory.spawn(id, &options)?;

        self.next_epoch += 1;
        let epoch = self.next_epoch;
        let pump = spawn_event_pump(
            id.clone(),
            epoch,
            backend.subscribe(),
            self.internal_sender.clone(),
        );
        let ready = spawn_ready_wait(
            id.clone(),
            epoch,
            Arc::clone(&backend),
            self.internal_sender.clone(),
        );

        let discovery = match (&self.discovery, &options.peer_search) {
            (Some(discovery), Some(search)) => Some(discovery.attach(Arc::clone(&backend), search)),
            _ => None,
        };

        if let Some(pacing) = options.flood_pulse {
            if !backend.set_flood_pulse(pacing.flood, pacing.pulse) {
                tracing::trace!("Backend for {} has no flood/pulse pacing", id);
            }
        }

        Ok(SessionEntry {
            epoch,
            backend,
            options: Arc::new(options),
            created_at: Utc::now(),
            state: EntryState::Creating {
                waiters: Vec::new(),
            },
            tasks: vec![pump, ready],
            discovery,
            write_queue_timer: None,
        })
    }

    /// Destroys the session for `id`. Unknown ids are ignored.
    ///
    /// The map entry goes away immediately; the backend is destroyed in the
    /// background and `SessionDestroyed` follows once that completes.
    pub fn remove(&mut self, id: &ResourceId) {
        let Some(entry) = self.entries.remove(id) else {
            tracing::trace!("Remove of unknown session {} ignored", id);
            return;
        };

        tracing::info!("Removing session {}", id);
        self.forget_references(id);
        self.teardown(
            id.clone(),
            entry,
            RegistryError::SessionDestroyed { id: id.clone() },
        );
    }

    fn forget_references(&mut self, id: &ResourceId) {
        let streams = self.streams.forget_where(|key| key.id == *id);
        let resources = self.resources.forget_where(|key| key == id);
        let downloads = self.downloads.forget_where(|key| key == id);
        if streams + resources + downloads > 0 {
            tracing::debug!(
                "Dropped {} stream, {} resource and {} download references of {}",
                streams,
                resources,
                downloads,
                id
            );
        }
    }

    fn teardown(&self, id: ResourceId, mut entry: SessionEntry, reason: RegistryError) {
        entry.abort_tasks();
        if let Some(discovery) = entry.discovery.take() {
            discovery.stop();
        }
        if let EntryState::Creating { waiters } = entry.state {
            for waiter in waiters {
                let _ = waiter.send(Err(reason.clone()));
            }
        }

        let backend = entry.backend;
        let sender = self.internal_sender.clone();
        tokio::spawn(async move {
            backend.destroy().await;
            let _ = sender.send(InternalMessage::Destroyed { id });
        });
    }

    /// Applies runtime settings. Unknown ids are ignored.
    pub fn settings(&mut self, id: &ResourceId, settings: SessionSettings) {
        let safety_window = self.config.write_queue_safety_window;
        let Some(entry) = self.entries.get_mut(id) else {
            return;
        };

        match settings.swarm {
            Some(Toggle::Pause) => entry.backend.pause_swarm(),
            Some(Toggle::Resume) => entry.backend.resume_swarm(),
            None => {}
        }

        match settings.write_queue {
            Some(Toggle::Pause) => {
                if !entry.backend.pause_write_queue() {
                    tracing::debug!("Backend for {} has no write queue", id);
                    return;
                }
                if let Some(timer) = entry.write_queue_timer.take() {
                    timer.abort();
                }
                let backend = Arc::clone(&entry.backend);
                let id = id.clone();
                entry.write_queue_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(safety_window).await;
                    tracing::debug!("Write queue safety window elapsed for {}", id);
                    backend.resume_write_queue();
                }));
            }
            Some(Toggle::Resume) => entry.backend.resume_write_queue(),
            None => {}
        }
    }

    /// Snapshot of a ready session, `None` for unknown or unready ids.
    pub fn stats(&self, id: &ResourceId, file_index: Option<usize>) -> Option<StatsSnapshot> {
        let entry = self.entries.get(id)?;
        let session = entry.session()?;
        Some(stats::snapshot(
            session,
            file_index,
            entry.discovery.as_deref(),
        ))
    }

    /// Ids of all ready sessions, sorted.
    pub fn list(&self) -> Vec<ResourceId> {
        let mut ids: Vec<ResourceId> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.session().is_some())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn stream_open(&mut self, key: StreamKey) {
        if self.streams.acquire(key.clone()) {
            self.emit(RegistryEvent::StreamActive { key: key.clone() });
        }
        if self.resources.acquire(key.id.clone()) {
            self.emit(RegistryEvent::SessionActive { id: key.id.clone() });
        }
        self.attach_window(&key);
    }

    /// Starts readiness tracking of a file, once per session lifetime.
    fn attach_window(&mut self, key: &StreamKey) {
        let Some(entry) = self.entries.get_mut(&key.id) else {
            return;
        };
        let EntryState::Ready { session, windows } = &mut entry.state else {
            return;
        };
        let Some(file) = session.file(key.file_index) else {
            tracing::warn!("Stream {} opened for a file outside the torrent", key);
            return;
        };

        let backend = session.backend();
        let piece_length = session.piece_length();
        let Some(update) = windows.attach(key.file_index, file, piece_length, |piece| {
            backend.has_piece(piece)
        }) else {
            return;
        };

        // Without partial flush only whole verification units reach disk.
        if !backend.supports_partial_flush() {
            if let Some(selection) =
                verification_selection(file, piece_length, session.verification_unit_length())
            {
                tracing::debug!(
                    "Selecting pieces {}..{} for stream {}",
                    selection.start,
                    selection.end,
                    key
                );
                backend.select_pieces(selection.start, selection.end, false);
            }
        }

        let path = backend.destination(key.file_index);
        if self.downloads.acquire(key.id.clone()) {
            tracing::debug!("Session {} downloading for streams", key.id);
        }
        self.publish_window(&key.id, update, path);
    }

    pub fn stream_close(&mut self, key: StreamKey) {
        if self.streams.release(&key) == Release::Scheduled {
            self.emit(RegistryEvent::StreamIdle { key: key.clone() });
        }
        if self.resources.release(&key.id) == Release::Scheduled {
            self.emit(RegistryEvent::SessionIdle { id: key.id });
        }
    }

    pub fn on_stream_expiry(&mut self, expiry: Expiry<StreamKey>) {
        if let Some(key) = self.streams.expire(expiry) {
            self.emit(RegistryEvent::StreamInactive { key });
        }
    }

    pub fn on_resource_expiry(&mut self, expiry: Expiry<ResourceId>) {
        if let Some(id) = self.resources.expire(expiry) {
            self.emit(RegistryEvent::SessionInactive { id: id.clone() });
            self.remove(&id);
        }
    }

    /// Pauses the swarm of a session whose tracked files all completed.
    pub fn on_download_expiry(&mut self, expiry: Expiry<ResourceId>) {
        let Some(id) = self.downloads.expire(expiry) else {
            return;
        };
        let Some(entry) = self.entries.get(&id) else {
            return;
        };
        entry.backend.pause_swarm();
        self.emit(RegistryEvent::DownloadIdle { id });
    }

    pub fn handle_internal(&mut self, message: InternalMessage) {
        match message {
            InternalMessage::BackendReady { id, epoch, result } => {
                if self.is_current(&id, epoch) {
                    self.on_backend_ready(id, result);
                }
            }
            InternalMessage::Backend { id, epoch, event } => {
                if self.is_current(&id, epoch) {
                    self.on_backend_event(id, event);
                }
            }
            InternalMessage::Resync { id, epoch } => {
                if self.is_current(&id, epoch) {
                    self.resync(&id);
                }
            }
            InternalMessage::Destroyed { id } => {
                self.emit(RegistryEvent::SessionDestroyed { id });
            }
        }
    }

    fn is_current(&self, id: &ResourceId, epoch: u64) -> bool {
        self.entries
            .get(id)
            .is_some_and(|entry| entry.epoch == epoch)
    }

    fn on_backend_ready(&mut self, id: ResourceId, result: Result<TorrentInfo, BackendError>) {
        let info = match result {
            Ok(info) => info,
            Err(err) => {
                self.emit(RegistryEvent::BackendError {
                    id: id.clone(),
                    message: err.to_string(),
                });
                if let Some(entry) = self.entries.remove(&id) {
                    self.forget_references(&id);
                    self.teardown(id, entry, RegistryError::Backend(err));
                }
                return;
            }
        };

        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        let session = Session::new(
            id.clone(),
            Arc::clone(&entry.backend),
            info,
            Arc::clone(&entry.options),
            entry.created_at,
        );
        let previous = std::mem::replace(
            &mut entry.state,
            EntryState::Ready {
                session: session.clone(),
                windows: StreamWindowTracker::new(),
            },
        );

        self.emit(RegistryEvent::SessionReady { id });
        if let EntryState::Creating { waiters } = previous {
            for waiter in waiters {
                let _ = waiter.send(Ok(session.clone()));
            }
        }
    }

    fn on_backend_event(&mut self, id: ResourceId, event: BackendEvent) {
        match event {
            BackendEvent::PieceVerified(piece) => self.on_piece_verified(&id, piece),
            BackendEvent::PieceDownloaded(_)
            | BackendEvent::PeerConnected(_)
            | BackendEvent::PeerDisconnected(_) => self.apply_swarm_cap(&id),
            BackendEvent::InvalidPiece(piece) => {
                self.emit(RegistryEvent::InvalidPiece { id, piece });
            }
            BackendEvent::Error(message) => {
                self.emit(RegistryEvent::BackendError { id, message });
            }
            BackendEvent::Closed => {
                tracing::info!("Backend for {} closed", id);
                self.remove(&id);
            }
        }
    }

    fn on_piece_verified(&mut self, id: &ResourceId, piece: u32) {
        let Some(entry) = self.entries.get_mut(id) else {
            return;
        };
        let EntryState::Ready { session, windows } = &mut entry.state else {
            return;
        };

        let updates = windows.on_piece_available(piece);
        if updates.is_empty() {
            return;
        }

        let backend = Arc::clone(session.backend());
        for update in updates {
            let path = backend.destination(update.file_index);
            self.publish_window(id, update, path);
        }
    }

    /// Catches readiness and throttling up after dropped backend events.
    fn resync(&mut self, id: &ResourceId) {
        self.apply_swarm_cap(id);

        let Some(entry) = self.entries.get_mut(id) else {
            return;
        };
        let EntryState::Ready { session, windows } = &mut entry.state else {
            return;
        };

        let backend = Arc::clone(session.backend());
        let updates = windows.resync(|piece| backend.has_piece(piece));
        tracing::debug!(
            "Resynced {} stream windows of {} after dropped events",
            updates.len(),
            id
        );
        for update in updates {
            let path = backend.destination(update.file_index);
            self.publish_window(id, update, path);
        }
    }

    fn apply_swarm_cap(&self, id: &ResourceId) {
        let Some(entry) = self.entries.get(id) else {
            return;
        };
        if let Some(policy) = &entry.options.swarm_cap {
            throttle::apply(entry.backend.as_ref(), policy);
        }
    }

    fn publish_window(&mut self, id: &ResourceId, update: WindowUpdate, path: Option<PathBuf>) {
        let key = StreamKey::new(id.clone(), update.file_index);
        self.emit(RegistryEvent::StreamProgress {
            key: key.clone(),
            progress: update.progress,
            path: path.clone(),
        });
        if update.ready {
            self.emit(RegistryEvent::StreamReady { key, path });
            if self.downloads.release(id) == Release::Scheduled {
                tracing::debug!("Session {} has no pending streams", id);
            }
        }
    }

    /// Destroys every session.
    pub fn shutdown(&mut self) {
        let ids: Vec<ResourceId> = self.entries.keys().cloned().collect();
        for id in ids {
            self.remove(&id);
        }
    }

    fn emit(&self, event: RegistryEvent) {
        log_event(&event);
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn log_event(event: &RegistryEvent) {
    match event {
        RegistryEvent::SessionCreated { id } => tracing::info!("Session {} created", id),
        RegistryEvent::SessionReady { id } => tracing::info!("Session {} ready", id),
        RegistryEvent::SessionDestroyed { id } => tracing::info!("Session {} destroyed", id),
        RegistryEvent::SessionActive { id } => tracing::info!("Session {} active", id),
        RegistryEvent::SessionIdle { id } => tracing::info!("Session {} idle", id),
        RegistryEvent::SessionInactive { id } => tracing::info!("Session {} inactive", id),
        RegistryEvent::DownloadIdle { id } => {
            tracing::info!("Session {} idle, swarm paused", id)
        }
        RegistryEvent::StreamActive { key } => tracing::debug!("Stream {} active", key),
        RegistryEvent::StreamIdle { key } => tracing::debug!("Stream {} idle", key),
        RegistryEvent::StreamInactive { key } => tracing::debug!("Stream {} inactive", key),
        RegistryEvent::StreamProgress { key, progress, .. } => {
            tracing::trace!("Stream {} progress {:.3}", key, progress)
        }
        RegistryEvent::StreamReady { key, path } => {
            tracing::debug!("Stream {} ready at {:?}", key, path)
        }
        RegistryEvent::BackendError { id, message } => {
            tracing::warn!("Backend error for {}: {}", id, message)
        }
        RegistryEvent::InvalidPiece { id, piece } => {
            tracing::warn!("Invalid piece {} for {}", piece, id)
        }
    }
}

/// Forwards backend events into the registry mailbox.
fn spawn_event_pump(
    id: ResourceId,
    epoch: u64,
    mut receiver: broadcast::Receiver<BackendEvent>,
    sender: mpsc::UnboundedSender<InternalMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let message = InternalMessage::Backend {
                        id: id.clone(),
                        epoch,
                        event,
                    };
                    if sender.send(message).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Dropped {} backend events for {}", skipped, id);
                    let message = InternalMessage::Resync {
                        id: id.clone(),
                        epoch,
                    };
                    if sender.send(message).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn spawn_ready_wait(
    id: ResourceId,
    epoch: u64,
    backend: Arc<dyn TorrentBackend>,
    sender: mpsc::UnboundedSender<InternalMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let result = backend.ready().await;
        let _ = sender.send(InternalMessage::BackendReady { id, epoch, result });
    })
}
