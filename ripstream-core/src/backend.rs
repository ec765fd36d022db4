//! Capability surface of the download backend.
//!
//! The registry never speaks a wire protocol itself. Everything it needs from
//! the swarm (readiness, piece bitfield, pause/resume, telemetry, file reads)
//! goes through [`TorrentBackend`], and new backends are built through an
//! injected [`BackendFactory`].

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::addressing::ResourceId;
use crate::options::{EngineOptions, PeerSearchOptions};

/// Byte stream handed from the backend to the transport layer.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Metadata the backend reports once it is ready.
#[derive(Debug, Clone)]
pub struct TorrentInfo {
    /// Display name of the torrent
    pub name: String,
    /// Files in torrent order
    pub files: Vec<FileEntry>,
    /// Logical piece length in bytes
    pub piece_length: u64,
    /// Minimal durably flushed unit; equal to or coarser than `piece_length`
    pub verification_unit_length: u64,
    /// Number of logical pieces
    pub piece_count: u32,
}

/// A single file inside a torrent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub offset: u64,
    pub length: u64,
}

/// Events published by a backend on its broadcast channel.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// Piece was verified and is durably readable
    PieceVerified(u32),
    /// Piece data arrived from the swarm (not necessarily verified yet)
    PieceDownloaded(u32),
    PeerConnected(SocketAddr),
    PeerDisconnected(SocketAddr),
    /// Piece failed hash verification
    InvalidPiece(u32),
    /// Swarm or storage failure not tied to any request
    Error(String),
    /// Backend terminated on its own
    Closed,
}

/// Summary of one connected peer.
#[derive(Debug, Clone, PartialEq)]
pub struct WireInfo {
    pub address: SocketAddr,
    /// Remote side is choking us
    pub peer_choking: bool,
    pub am_interested: bool,
    pub is_seeder: bool,
    /// Outstanding block requests on this wire
    pub requests: usize,
    pub download_speed: u64,
    pub upload_speed: u64,
}

/// Point-in-time swarm telemetry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SwarmTelemetry {
    pub wires: Vec<WireInfo>,
    pub queued: usize,
    pub unique_peers: usize,
    pub connection_tries: u64,
    pub paused: bool,
    pub connections: usize,
    pub size: usize,
    pub downloaded: u64,
    pub uploaded: u64,
    pub download_speed: u64,
    pub upload_speed: u64,
    /// Bytes buffered ahead of the current read positions
    pub buffered_ahead: u64,
}

impl SwarmTelemetry {
    /// Number of peers not currently choking the local side.
    pub fn unchoked(&self) -> usize {
        self.wires.iter().filter(|wire| !wire.peer_choking).count()
    }
}

/// Parameters of a single file read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    pub start: u64,
    /// Inclusive end offset
    pub end: u64,
    /// Priority hint forwarded from the client
    pub priority: Option<u32>,
}

/// Errors surfaced by a download backend.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    #[error("backend failed to become ready: {reason}")]
    NotReady { reason: String },

    #[error("backend has been destroyed")]
    Destroyed,

    #[error("file index {index} is not part of this torrent")]
    UnknownFile { index: usize },

    #[error("backend failure: {reason}")]
    Failure { reason: String },
}

/// One managed download for a single resource.
#[async_trait]
pub trait TorrentBackend: Send + Sync {
    /// Resolves once metadata is known and files can be addressed.
    ///
    /// # Errors
    ///
    /// - `BackendError::NotReady` - Metadata could not be obtained
    /// - `BackendError::Destroyed` - Backend was destroyed while waiting
    async fn ready(&self) -> Result<TorrentInfo, BackendError>;

    /// Subscribes to the backend's event stream.
    fn subscribe(&self) -> broadcast::Receiver<BackendEvent>;

    /// Whether the piece is present in the local bitfield.
    fn has_piece(&self, piece: u32) -> bool;

    /// Prioritizes pieces in `[start, end)` for download.
    fn select_pieces(&self, start: u32, end: u32, priority: bool);

    /// Whether unverified ("virtual") pieces can already be served.
    fn supports_partial_flush(&self) -> bool;

    /// Resolved on-disk destination of a file, if exposed.
    fn destination(&self, file_index: usize) -> Option<PathBuf>;

    fn pause_swarm(&self);

    fn resume_swarm(&self);

    /// Pauses write buffering. Returns false when the backend has no write queue.
    fn pause_write_queue(&self) -> bool;

    fn resume_write_queue(&self);

    /// Applies flood/pulse pacing. Returns false when unsupported.
    fn set_flood_pulse(&self, _flood: u64, _pulse: u64) -> bool {
        false
    }

    fn swarm(&self) -> SwarmTelemetry;

    /// Opens a byte stream over part of a file.
    ///
    /// # Errors
    ///
    /// - `BackendError::UnknownFile` - Index out of range
    /// - `BackendError::Destroyed` - Backend no longer usable
    fn read_file(&self, file_index: usize, options: ReadOptions) -> Result<ByteStream, BackendError>;

    /// Tears the backend down and releases its resources.
    async fn destroy(&self);
}

/// Builds backends for new sessions.
pub trait BackendFactory: Send + Sync {
    /// # Errors
    ///
    /// - `BackendError::Failure` - Backend could not be constructed
    fn spawn(
        &self,
        id: &ResourceId,
        options: &EngineOptions,
    ) -> Result<Arc<dyn TorrentBackend>, BackendError>;
}

/// Statistics of a single peer-discovery source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStats {
    pub source: String,
    pub peers_found: usize,
    pub last_error: Option<String>,
}

/// Running peer-discovery helper bound to one backend.
pub trait DiscoveryHandle: Send + Sync {
    fn stats(&self) -> Vec<SourceStats>;

    fn is_running(&self) -> bool;

    fn stop(&self);
}

/// Attaches peer discovery to a freshly created backend.
pub trait PeerDiscovery: Send + Sync {
    fn attach(
        &self,
        backend: Arc<dyn TorrentBackend>,
        options: &PeerSearchOptions,
    ) -> Box<dyn DiscoveryHandle>;
}
