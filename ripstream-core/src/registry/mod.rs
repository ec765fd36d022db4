//! Engine registry: per-resource session lifecycle as an actor.
//!
//! The registry owns every session, both reference-count scopes and the
//! stream readiness trackers. All mutation happens on the actor task, so
//! callers only ever see sessions that are fully ready.

pub mod actor;
pub mod commands;
pub mod handle;
pub mod state;

#[cfg(test)]
mod integration_tests;

use std::fmt;
use std::path::PathBuf;

pub use actor::spawn_engine_registry;
pub use commands::RegistryCommand;
pub use handle::{OpenedFile, RegistryHandle};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::addressing::ResourceId;
use crate::backend::BackendError;
use crate::config::ConfigError;

/// Errors returned to callers of the registry.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RegistryError {
    #[error("Invalid path: {path}")]
    InvalidPath { path: String },

    #[error("Invalid file index: {segment}")]
    InvalidFileIndex { segment: String },

    #[error("File {index} not found")]
    FileNotFound { index: usize },

    #[error("No backend configured")]
    BackendUnavailable,

    #[error("Not available yet: {id}")]
    NotImplementedAddressing { id: String },

    #[error("Session {id} was destroyed")]
    SessionDestroyed { id: ResourceId },

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Registry has shut down")]
    RegistryShutdown,
}

/// Stream-scope reference key: one file of one resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub id: ResourceId,
    pub file_index: usize,
}

impl StreamKey {
    pub fn new(id: ResourceId, file_index: usize) -> Self {
        Self { id, file_index }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.id, self.file_index)
    }
}

/// Pause/resume switch used by session settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Toggle {
    Pause,
    Resume,
}

/// Runtime settings applied to a live session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettings {
    pub swarm: Option<Toggle>,
    pub write_queue: Option<Toggle>,
}

/// Lifecycle and progress notifications published by the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    SessionCreated {
        id: ResourceId,
    },
    SessionReady {
        id: ResourceId,
    },
    SessionDestroyed {
        id: ResourceId,
    },
    /// First open reference to the resource
    SessionActive {
        id: ResourceId,
    },
    /// Last reference closed, grace period running
    SessionIdle {
        id: ResourceId,
    },
    /// Grace period elapsed without new references
    SessionInactive {
        id: ResourceId,
    },
    /// Every tracked file stayed complete for the grace period; swarm paused
    DownloadIdle {
        id: ResourceId,
    },
    StreamActive {
        key: StreamKey,
    },
    StreamIdle {
        key: StreamKey,
    },
    StreamInactive {
        key: StreamKey,
    },
    StreamProgress {
        key: StreamKey,
        progress: f64,
        path: Option<PathBuf>,
    },
    StreamReady {
        key: StreamKey,
        path: Option<PathBuf>,
    },
    BackendError {
        id: ResourceId,
        message: String,
    },
    InvalidPiece {
        id: ResourceId,
        piece: u32,
    },
}
