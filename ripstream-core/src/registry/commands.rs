//! Command definitions for the engine registry actor.

use tokio::sync::oneshot;

use super::{RegistryError, SessionSettings, StreamKey};
use crate::addressing::ResourceId;
use crate::backend::{BackendError, BackendEvent, TorrentInfo};
use crate::options::EngineOverrides;
use crate::session::Session;
use crate::stats::StatsSnapshot;

/// Commands that can be sent to the registry actor.
///
/// Each request carries a response channel; fire-and-forget notifications
/// such as stream closes do not.
pub enum RegistryCommand {
    /// Create a session or join the one already in flight.
    Create {
        id: ResourceId,
        overrides: EngineOverrides,
        responder: oneshot::Sender<Result<Session, RegistryError>>,
    },
    /// Destroy a session. Unknown ids are ignored.
    Remove {
        id: ResourceId,
        responder: oneshot::Sender<()>,
    },
    /// Apply swarm or write-queue settings.
    Settings {
        id: ResourceId,
        settings: SessionSettings,
        responder: oneshot::Sender<()>,
    },
    /// Read-only statistics snapshot.
    Stats {
        id: ResourceId,
        file_index: Option<usize>,
        responder: oneshot::Sender<Option<StatsSnapshot>>,
    },
    /// Ids of all ready sessions.
    List {
        responder: oneshot::Sender<Vec<ResourceId>>,
    },
    /// A transfer of one file started.
    StreamOpen {
        key: StreamKey,
        responder: oneshot::Sender<()>,
    },
    /// A transfer of one file ended.
    StreamClose { key: StreamKey },
    /// Destroy every session and stop the actor.
    Shutdown { responder: oneshot::Sender<()> },
}

/// Notifications from tasks spawned by the registry itself.
///
/// Session-scoped messages carry the epoch of the session that produced
/// them so messages from a removed session never reach its successor.
pub enum InternalMessage {
    BackendReady {
        id: ResourceId,
        epoch: u64,
        result: Result<TorrentInfo, BackendError>,
    },
    Backend {
        id: ResourceId,
        epoch: u64,
        event: BackendEvent,
    },
    /// The backend event subscription lagged and dropped events.
    Resync {
        id: ResourceId,
        epoch: u64,
    },
    Destroyed {
        id: ResourceId,
    },
}
