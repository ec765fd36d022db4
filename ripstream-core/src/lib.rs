//! Ripstream Core - engine lifecycle and streaming-readiness core
//!
//! Manages per-resource download sessions behind an actor-based registry:
//! idempotent creation, debounced eviction of idle streams and sessions,
//! piece-window readiness tracking and swarm throttling. The download backend
//! itself is injected through the traits in [`backend`].

pub mod addressing;
pub mod backend;
pub mod config;
pub mod options;
pub mod probe;
pub mod refcount;
pub mod registry;
pub mod session;
#[cfg(any(test, feature = "simulation"))]
pub mod simulation;
pub mod stats;
pub mod throttle;
pub mod tracing_setup;
pub mod window;

pub use addressing::{ResourceId, ResourcePath};
pub use backend::{BackendError, BackendFactory, TorrentBackend};
pub use config::{ConfigError, RipstreamConfig};
pub use options::{EngineOptions, EngineOverrides};
pub use probe::{FfprobeProber, MediaProber, ProbeError};
pub use registry::{
    RegistryError, RegistryEvent, RegistryHandle, SessionSettings, Toggle, spawn_engine_registry,
};
pub use session::Session;
pub use stats::StatsSnapshot;
