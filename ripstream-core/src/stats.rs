//! Read-only statistics snapshots of a session.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::addressing::ResourceId;
use crate::backend::{DiscoveryHandle, FileEntry, SourceStats, SwarmTelemetry, WireInfo};
use crate::options::EngineOptions;
use crate::session::Session;
use crate::window::piece_span;

/// Wire summary of one unchoked peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireSummary {
    pub requests: usize,
    pub address: String,
    pub am_interested: bool,
    pub is_seeder: bool,
    pub down_speed: u64,
    pub up_speed: u64,
}

impl From<&WireInfo> for WireSummary {
    fn from(wire: &WireInfo) -> Self {
        Self {
            requests: wire.requests,
            address: wire.address.to_string(),
            am_interested: wire.am_interested,
            is_seeder: wire.is_seeder,
            down_speed: wire.download_speed,
            up_speed: wire.upload_speed,
        }
    }
}

/// File-scoped progress merged into a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStats {
    pub stream_len: u64,
    pub stream_name: String,
    pub stream_progress: f64,
}

/// Immutable statistics record for one session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub info_hash: ResourceId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub cache_path: PathBuf,

    pub peers: usize,
    pub unchoked: usize,
    pub queued: usize,
    pub unique: usize,
    pub connection_tries: u64,
    pub swarm_paused: bool,
    pub swarm_connections: usize,
    pub swarm_size: usize,

    /// Per-peer summaries, omitted for file-scoped snapshots
    pub wires: Option<Vec<WireSummary>>,
    pub files: Vec<FileEntry>,

    pub downloaded: u64,
    pub uploaded: u64,
    pub download_speed: u64,
    pub upload_speed: u64,

    pub sources: Option<Vec<SourceStats>>,
    pub peer_search_running: Option<bool>,
    pub opts: EngineOptions,

    #[serde(flatten)]
    pub stream: Option<StreamStats>,
}

/// Builds a snapshot from backend telemetry without touching any state.
///
/// Unresolvable file indices yield a session-wide snapshot.
pub fn snapshot(
    session: &Session,
    file_index: Option<usize>,
    discovery: Option<&dyn DiscoveryHandle>,
) -> StatsSnapshot {
    let telemetry = session.backend().swarm();
    let stream = file_index
        .and_then(|index| session.file(index))
        .map(|file| stream_stats(session, file));

    StatsSnapshot {
        info_hash: session.id().clone(),
        name: session.name().to_string(),
        created_at: session.created_at(),
        cache_path: session.cache_path().to_path_buf(),
        peers: telemetry.wires.len(),
        unchoked: telemetry.unchoked(),
        queued: telemetry.queued,
        unique: telemetry.unique_peers,
        connection_tries: telemetry.connection_tries,
        swarm_paused: telemetry.paused,
        swarm_connections: telemetry.connections,
        swarm_size: telemetry.size,
        wires: file_index.is_none().then(|| unchoked_wires(&telemetry)),
        files: session.files().to_vec(),
        downloaded: telemetry.downloaded,
        uploaded: telemetry.uploaded,
        download_speed: telemetry.download_speed,
        upload_speed: telemetry.upload_speed,
        sources: discovery.map(|handle| handle.stats()),
        peer_search_running: discovery.map(|handle| handle.is_running()),
        opts: session.options().clone(),
        stream,
    }
}

/// Available pieces over the file's piece range, using the same range as
/// the readiness tracker.
pub fn stream_stats(session: &Session, file: &FileEntry) -> StreamStats {
    let backend = session.backend();
    let progress = match piece_span(file.offset, file.length, session.piece_length()) {
        Some(span) => {
            let total = f64::from(span.end() - span.start() + 1);
            let available = span.filter(|&piece| backend.has_piece(piece)).count();
            available as f64 / total
        }
        None => 1.0,
    };

    StreamStats {
        stream_len: file.length,
        stream_name: file.name.clone(),
        stream_progress: progress,
    }
}

fn unchoked_wires(telemetry: &SwarmTelemetry) -> Vec<WireSummary> {
    telemetry
        .wires
        .iter()
        .filter(|wire| !wire.peer_choking)
        .map(WireSummary::from)
        .collect()
}
