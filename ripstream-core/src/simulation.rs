//! Deterministic in-process download backend.
//!
//! Torrents are generated from a [`SimulatedTorrent`] template. File content
//! is a byte pattern derived from the absolute torrent offset, so any range
//! can be verified without storing data. Pieces arrive either on explicit
//! [`SimulatedBackend::complete_piece`] calls or from a pacing task.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::addressing::ResourceId;
use crate::backend::{
    BackendError, BackendEvent, BackendFactory, ByteStream, DiscoveryHandle, FileEntry,
    PeerDiscovery, ReadOptions, SourceStats, SwarmTelemetry, TorrentBackend, TorrentInfo,
    WireInfo,
};
use crate::options::{EngineOptions, PeerSearchOptions};

/// Size of the chunks produced by simulated reads.
pub const READ_CHUNK_SIZE: u64 = 64 * 1024;

/// Content byte at an absolute torrent offset.
pub fn pattern_byte(offset: u64) -> u8 {
    (offset % 251) as u8
}

/// Shape of a generated torrent.
#[derive(Debug, Clone)]
pub struct SimulatedTorrent {
    pub name: String,
    pub file_sizes: Vec<u64>,
    pub piece_length: u64,
    /// Clamped to at least `piece_length`
    pub verification_unit_length: u64,
    pub partial_flush: bool,
    pub write_queue: bool,
}

impl Default for SimulatedTorrent {
    fn default() -> Self {
        Self {
            name: "Sintel".to_string(),
            file_sizes: vec![4 * 65_536, 65_536],
            piece_length: 16_384,
            verification_unit_length: 16_384,
            partial_flush: true,
            write_queue: true,
        }
    }
}

impl SimulatedTorrent {
    /// Metadata as a backend would report it once ready.
    pub fn info(&self) -> TorrentInfo {
        let mut offset = 0;
        let files = self
            .file_sizes
            .iter()
            .enumerate()
            .map(|(index, &length)| {
                let name = format!("episode-{:02}.mp4", index + 1);
                let entry = FileEntry {
                    path: format!("{}/{}", self.name, name),
                    name,
                    offset,
                    length,
                };
                offset += length;
                entry
            })
            .collect();

        let piece_length = self.piece_length.max(1);
        let total: u64 = self.file_sizes.iter().sum();
        TorrentInfo {
            name: self.name.clone(),
            files,
            piece_length,
            verification_unit_length: self.verification_unit_length.max(piece_length),
            piece_count: total.div_ceil(piece_length) as u32,
        }
    }
}

/// Recorded `select_pieces` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceSelection {
    pub start: u32,
    pub end: u32,
    pub priority: bool,
}

#[derive(Debug, Clone)]
enum ReadyState {
    Pending,
    Ready,
    Failed(BackendError),
}

#[derive(Default)]
struct SimState {
    have: Vec<bool>,
    wires: Vec<WireInfo>,
    swarm_paused: bool,
    write_queue_paused: bool,
    selections: Vec<PieceSelection>,
    download_speed: u64,
    buffered_ahead: u64,
    downloaded: u64,
    flood_pulse: Option<(u64, u64)>,
    destroyed: bool,
    pacer: Option<JoinHandle<()>>,
}

/// In-memory backend with scriptable readiness, pieces and peers.
pub struct SimulatedBackend {
    info: TorrentInfo,
    partial_flush: bool,
    write_queue: bool,
    destination_root: Option<PathBuf>,
    events: broadcast::Sender<BackendEvent>,
    ready: watch::Sender<ReadyState>,
    state: Mutex<SimState>,
}

impl SimulatedBackend {
    /// Creates a backend that is not ready yet and has no pieces.
    pub fn new(torrent: SimulatedTorrent) -> Self {
        let info = torrent.info();
        let (events, _) = broadcast::channel(4096);
        let (ready, _) = watch::channel(ReadyState::Pending);
        let state = SimState {
            have: vec![false; info.piece_count as usize],
            ..Default::default()
        };

        Self {
            info,
            partial_flush: torrent.partial_flush,
            write_queue: torrent.write_queue,
            destination_root: None,
            events,
            ready,
            state: Mutex::new(state),
        }
    }

    /// Reports file destinations below `root`.
    pub fn with_destination(mut self, root: PathBuf) -> Self {
        self.destination_root = Some(root);
        self
    }

    pub fn info(&self) -> &TorrentInfo {
        &self.info
    }

    pub fn mark_ready(&self) {
        if self.is_destroyed() {
            return;
        }
        self.ready.send_replace(ReadyState::Ready);
    }

    pub fn fail_ready(&self, reason: &str) {
        self.ready.send_replace(ReadyState::Failed(BackendError::NotReady {
            reason: reason.to_string(),
        }));
    }

    /// Marks a piece downloaded and verified. Returns false if it already was.
    pub fn complete_piece(&self, piece: u32) -> bool {
        {
            let mut state = self.state.lock();
            if state.destroyed {
                return false;
            }
            let Some(slot) = state.have.get_mut(piece as usize) else {
                return false;
            };
            if *slot {
                return false;
            }
            *slot = true;
            state.downloaded += self.info.piece_length;
        }

        let _ = self.events.send(BackendEvent::PieceDownloaded(piece));
        let _ = self.events.send(BackendEvent::PieceVerified(piece));
        true
    }

    pub fn complete_all(&self) {
        for piece in 0..self.info.piece_count {
            self.complete_piece(piece);
        }
    }

    pub fn connect_peer(&self, wire: WireInfo) {
        let address = wire.address;
        self.state.lock().wires.push(wire);
        let _ = self.events.send(BackendEvent::PeerConnected(address));
    }

    pub fn disconnect_peer(&self, address: SocketAddr) {
        self.state.lock().wires.retain(|wire| wire.address != address);
        let _ = self.events.send(BackendEvent::PeerDisconnected(address));
    }

    pub fn set_download_speed(&self, speed: u64) {
        self.state.lock().download_speed = speed;
    }

    pub fn set_buffered_ahead(&self, bytes: u64) {
        self.state.lock().buffered_ahead = bytes;
    }

    /// Publishes an arbitrary backend event.
    pub fn emit(&self, event: BackendEvent) {
        let _ = self.events.send(event);
    }

    pub fn selections(&self) -> Vec<PieceSelection> {
        self.state.lock().selections.clone()
    }

    pub fn is_swarm_paused(&self) -> bool {
        self.state.lock().swarm_paused
    }

    pub fn is_write_queue_paused(&self) -> bool {
        self.state.lock().write_queue_paused
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    pub fn flood_pulse(&self) -> Option<(u64, u64)> {
        self.state.lock().flood_pulse
    }

    /// Lowest missing piece, preferring the most recent selection.
    fn next_missing_piece(&self) -> Option<u32> {
        let state = self.state.lock();
        let missing = |piece: &u32| !state.have.get(*piece as usize).copied().unwrap_or(true);

        state
            .selections
            .iter()
            .rev()
            .find_map(|selection| (selection.start..selection.end).find(missing))
            .or_else(|| (0..self.info.piece_count).find(missing))
    }

    fn set_pacer(&self, pacer: JoinHandle<()>) {
        self.state.lock().pacer = Some(pacer);
    }
}

#[async_trait]
impl TorrentBackend for SimulatedBackend {
    async fn ready(&self) -> Result<TorrentInfo, BackendError> {
        let mut receiver = self.ready.subscribe();
        loop {
            let state = receiver.borrow_and_update().clone();
            match state {
                ReadyState::Ready => return Ok(self.info.clone()),
                ReadyState::Failed(err) => return Err(err),
                ReadyState::Pending => {}
            }
            if receiver.changed().await.is_err() {
                return Err(BackendError::Destroyed);
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<BackendEvent> {
        self.events.subscribe()
    }

    fn has_piece(&self, piece: u32) -> bool {
        self.state
            .lock()
            .have
            .get(piece as usize)
            .copied()
            .unwrap_or(false)
    }

    fn select_pieces(&self, start: u32, end: u32, priority: bool) {
        self.state.lock().selections.push(PieceSelection {
            start,
            end,
            priority,
        });
    }

    fn supports_partial_flush(&self) -> bool {
        self.partial_flush
    }

    fn destination(&self, file_index: usize) -> Option<PathBuf> {
        let root = self.destination_root.as_ref()?;
        let file = self.info.files.get(file_index)?;
        Some(root.join(&file.path))
    }

    fn pause_swarm(&self) {
        self.state.lock().swarm_paused = true;
    }

    fn resume_swarm(&self) {
        self.state.lock().swarm_paused = false;
    }

    fn pause_write_queue(&self) -> bool {
        if !self.write_queue {
            return false;
        }
        self.state.lock().write_queue_paused = true;
        true
    }

    fn resume_write_queue(&self) {
        self.state.lock().write_queue_paused = false;
    }

    fn set_flood_pulse(&self, flood: u64, pulse: u64) -> bool {
        self.state.lock().flood_pulse = Some((flood, pulse));
        true
    }

    fn swarm(&self) -> SwarmTelemetry {
        let state = self.state.lock();
        let peers = state.wires.len();
        SwarmTelemetry {
            wires: state.wires.clone(),
            queued: 0,
            unique_peers: peers,
            connection_tries: peers as u64,
            paused: state.swarm_paused,
            connections: peers,
            size: peers,
            downloaded: state.downloaded,
            uploaded: 0,
            download_speed: state.download_speed,
            upload_speed: 0,
            buffered_ahead: state.buffered_ahead,
        }
    }

    fn read_file(&self, file_index: usize, options: ReadOptions) -> Result<ByteStream, BackendError> {
        if self.is_destroyed() {
            return Err(BackendError::Destroyed);
        }
        let file = self
            .info
            .files
            .get(file_index)
            .ok_or(BackendError::UnknownFile { index: file_index })?;

        if file.length == 0 || options.start > options.end || options.start >= file.length {
            return Ok(stream::empty().boxed());
        }

        let start = file.offset + options.start;
        let end = file.offset + options.end.min(file.length - 1) + 1;
        let chunks = stream::unfold(start, move |position| async move {
            if position >= end {
                return None;
            }
            let chunk_end = (position + READ_CHUNK_SIZE).min(end);
            let chunk: Bytes = (position..chunk_end).map(pattern_byte).collect();
            Some((Ok(chunk), chunk_end))
        });

        Ok(chunks.boxed())
    }

    async fn destroy(&self) {
        let pacer = {
            let mut state = self.state.lock();
            state.destroyed = true;
            state.pacer.take()
        };
        if let Some(pacer) = pacer {
            pacer.abort();
        }

        if matches!(*self.ready.borrow(), ReadyState::Pending) {
            self.ready
                .send_replace(ReadyState::Failed(BackendError::Destroyed));
        }
        tracing::debug!("Simulated backend for {} destroyed", self.info.name);
    }
}

/// How spawned backends become ready and receive pieces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Readiness and pieces are driven by the caller
    Manual,
    /// Ready at once, pieces driven by the caller
    Instant,
    /// Ready at once, one piece per interval (with jitter)
    Paced { piece_interval: Duration },
}

/// Factory building [`SimulatedBackend`]s from one template.
pub struct SimulatedBackendFactory {
    template: SimulatedTorrent,
    pacing: Pacing,
    backends: Mutex<HashMap<ResourceId, Arc<SimulatedBackend>>>,
    spawned: AtomicUsize,
}

impl SimulatedBackendFactory {
    pub fn new(template: SimulatedTorrent, pacing: Pacing) -> Self {
        Self {
            template,
            pacing,
            backends: Mutex::new(HashMap::new()),
            spawned: AtomicUsize::new(0),
        }
    }

    pub fn manual(template: SimulatedTorrent) -> Self {
        Self::new(template, Pacing::Manual)
    }

    pub fn instant(template: SimulatedTorrent) -> Self {
        Self::new(template, Pacing::Instant)
    }

    pub fn paced(template: SimulatedTorrent, piece_interval: Duration) -> Self {
        Self::new(template, Pacing::Paced { piece_interval })
    }

    /// Most recently spawned backend for `id`.
    pub fn backend(&self, id: &ResourceId) -> Option<Arc<SimulatedBackend>> {
        self.backends.lock().get(id).cloned()
    }

    /// Number of backends built so far.
    pub fn spawn_count(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }
}

impl BackendFactory for SimulatedBackendFactory {
    fn spawn(
        &self,
        id: &ResourceId,
        options: &EngineOptions,
    ) -> Result<Arc<dyn TorrentBackend>, BackendError> {
        let backend = Arc::new(
            SimulatedBackend::new(self.template.clone()).with_destination(options.path.clone()),
        );

        match self.pacing {
            Pacing::Manual => {}
            Pacing::Instant => backend.mark_ready(),
            Pacing::Paced { piece_interval } => {
                backend.mark_ready();
                for port in 0..8 {
                    backend.connect_peer(simulated_wire(port));
                }
                backend.set_pacer(spawn_pacer(Arc::downgrade(&backend), piece_interval));
            }
        }

        tracing::debug!("Spawned simulated backend for {} ({:?})", id, self.pacing);
        self.backends.lock().insert(id.clone(), Arc::clone(&backend));
        self.spawned.fetch_add(1, Ordering::SeqCst);
        Ok(backend as Arc<dyn TorrentBackend>)
    }
}

fn simulated_wire(index: u16) -> WireInfo {
    WireInfo {
        address: SocketAddr::from(([10, 0, 0, 1 + index as u8], 6881 + index)),
        peer_choking: false,
        am_interested: true,
        is_seeder: index % 3 == 0,
        requests: 4,
        download_speed: 0,
        upload_speed: 0,
    }
}

/// Completes one missing piece per interval until the torrent is whole.
fn spawn_pacer(backend: Weak<SimulatedBackend>, piece_interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let delay = piece_interval + piece_interval.mul_f64(rand::random::<f64>() * 0.5);
            tokio::time::sleep(delay).await;

            let Some(backend) = backend.upgrade() else {
                break;
            };
            if backend.is_destroyed() {
                break;
            }
            if backend.is_swarm_paused() {
                backend.set_download_speed(0);
                continue;
            }

            match backend.next_missing_piece() {
                Some(piece) => {
                    backend.complete_piece(piece);
                    let speed = backend.info.piece_length as f64 / delay.as_secs_f64();
                    backend.set_download_speed(speed as u64);
                }
                None => {
                    backend.set_download_speed(0);
                    tracing::debug!("Simulated download of {} complete", backend.info.name);
                    break;
                }
            }
        }
    })
}

/// Peer discovery stand-in that reports its configured sources.
#[derive(Debug, Default)]
pub struct SimulatedDiscovery {
    attached: AtomicUsize,
}

impl SimulatedDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach_count(&self) -> usize {
        self.attached.load(Ordering::SeqCst)
    }
}

impl PeerDiscovery for SimulatedDiscovery {
    fn attach(
        &self,
        _backend: Arc<dyn TorrentBackend>,
        options: &PeerSearchOptions,
    ) -> Box<dyn DiscoveryHandle> {
        self.attached.fetch_add(1, Ordering::SeqCst);
        Box::new(SimulatedDiscoveryHandle {
            sources: options.sources.clone(),
            running: AtomicBool::new(true),
        })
    }
}

struct SimulatedDiscoveryHandle {
    sources: Vec<String>,
    running: AtomicBool,
}

impl DiscoveryHandle for SimulatedDiscoveryHandle {
    fn stats(&self) -> Vec<SourceStats> {
        self.sources
            .iter()
            .map(|source| SourceStats {
                source: source.clone(),
                peers_found: 0,
                last_error: None,
            })
            .collect()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
