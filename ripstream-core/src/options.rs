//! Per-session engine options.
//!
//! Every recognized option is enumerated here with its default. Per-call
//! overrides are merged field by field on top of the defaults and the result
//! is validated before a backend is constructed.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::addressing::ResourceId;
use crate::config::ConfigError;
use crate::throttle::SwarmCapPolicy;

/// Trackers queried by default peer discovery.
pub const DEFAULT_TRACKERS: &[&str] = &[
    "tracker:udp://tracker.opentrackr.org:1337/announce",
    "tracker:udp://tracker.coppersurfer.tk:6969/announce",
    "tracker:udp://tracker.leechers-paradise.org:6969",
    "tracker:udp://tracker.zer0day.to:1337/announce",
    "tracker:udp://9.rarbg.me:2710",
];

/// Peer discovery limits and sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerSearchOptions {
    pub min: usize,
    pub max: usize,
    pub sources: Vec<String>,
}

impl PeerSearchOptions {
    /// Default trackers plus the DHT source for `id`.
    pub fn defaults_for(id: &ResourceId) -> Self {
        let mut sources: Vec<String> = DEFAULT_TRACKERS.iter().map(|s| s.to_string()).collect();
        sources.push(format!("dht:{id}"));
        Self {
            min: 40,
            max: 150,
            sources,
        }
    }
}

/// Flood/pulse download pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FloodPulse {
    pub flood: u64,
    pub pulse: u64,
}

impl Default for FloodPulse {
    fn default() -> Self {
        Self {
            flood: 0,
            pulse: 2_621_440, // 2.5 MiB
        }
    }
}

/// Fully merged options for one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineOptions {
    /// Storage location of downloaded data
    pub path: PathBuf,
    /// Torrent source handed to the backend
    pub source: String,
    pub peer_search: Option<PeerSearchOptions>,
    /// Legacy switches, off because peer search replaces them
    pub dht: bool,
    pub tracker: bool,
    pub connections: usize,
    #[serde(serialize_with = "serialize_millis")]
    pub handshake_timeout: Duration,
    #[serde(serialize_with = "serialize_millis")]
    pub timeout: Duration,
    /// Serve unverified pieces when the backend supports it
    pub virtual_delivery: bool,
    pub swarm_cap: Option<SwarmCapPolicy>,
    pub flood_pulse: Option<FloodPulse>,
}

impl EngineOptions {
    /// Defaults for `id`, storing data under `path`.
    pub fn defaults_for(id: &ResourceId, path: PathBuf) -> Self {
        Self {
            path,
            source: id.magnet_uri(),
            peer_search: Some(PeerSearchOptions::defaults_for(id)),
            dht: false,
            tracker: false,
            connections: 35,
            handshake_timeout: Duration::from_secs(20),
            timeout: Duration::from_secs(4),
            virtual_delivery: true,
            swarm_cap: Some(SwarmCapPolicy::default()),
            flood_pulse: Some(FloodPulse::default()),
        }
    }

    /// Applies per-call overrides on top of these options.
    pub fn merge(mut self, overrides: EngineOverrides) -> Self {
        if let Some(path) = overrides.path {
            self.path = path;
        }
        if let Some(source) = overrides.source {
            self.source = source;
        }
        if let Some(peer_search) = overrides.peer_search {
            self.peer_search = peer_search;
        }
        if let Some(connections) = overrides.connections {
            self.connections = connections;
        }
        if let Some(handshake_timeout) = overrides.handshake_timeout {
            self.handshake_timeout = handshake_timeout;
        }
        if let Some(timeout) = overrides.timeout {
            self.timeout = timeout;
        }
        if let Some(virtual_delivery) = overrides.virtual_delivery {
            self.virtual_delivery = virtual_delivery;
        }
        if let Some(swarm_cap) = overrides.swarm_cap {
            self.swarm_cap = swarm_cap;
        }
        if let Some(flood_pulse) = overrides.flood_pulse {
            self.flood_pulse = flood_pulse;
        }
        self
    }

    /// Checks the merged options for values no backend can honor.
    ///
    /// # Errors
    ///
    /// - `ConfigError::InvalidOption` - Names the first offending field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connections == 0 {
            return Err(ConfigError::invalid("connections", "must be at least 1"));
        }
        if self.handshake_timeout.is_zero() {
            return Err(ConfigError::invalid("handshake_timeout", "must be non-zero"));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::invalid("timeout", "must be non-zero"));
        }
        if self.source.trim().is_empty() {
            return Err(ConfigError::invalid("source", "must not be empty"));
        }
        if let Some(search) = &self.peer_search {
            if search.min > search.max {
                return Err(ConfigError::invalid(
                    "peer_search",
                    format!("min {} exceeds max {}", search.min, search.max),
                ));
            }
        }
        Ok(())
    }
}

/// Per-call overrides; `None` keeps the default.
///
/// Nested `Option`s distinguish "keep default" from "disable".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineOverrides {
    pub path: Option<PathBuf>,
    pub source: Option<String>,
    pub peer_search: Option<Option<PeerSearchOptions>>,
    pub connections: Option<usize>,
    pub handshake_timeout: Option<Duration>,
    pub timeout: Option<Duration>,
    pub virtual_delivery: Option<bool>,
    pub swarm_cap: Option<Option<SwarmCapPolicy>>,
    pub flood_pulse: Option<Option<FloodPulse>>,
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}
