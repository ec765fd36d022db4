//! Ready session handle shared with callers of the registry.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::addressing::ResourceId;
use crate::backend::{FileEntry, TorrentBackend, TorrentInfo};
use crate::options::EngineOptions;

/// One managed download backend for a single resource id.
///
/// Only handed out once the backend reported ready, so file metadata is
/// always present. Cloning is cheap.
#[derive(Clone)]
pub struct Session {
    id: ResourceId,
    backend: Arc<dyn TorrentBackend>,
    info: Arc<TorrentInfo>,
    options: Arc<EngineOptions>,
    created_at: DateTime<Utc>,
}

impl Session {
    pub(crate) fn new(
        id: ResourceId,
        backend: Arc<dyn TorrentBackend>,
        info: TorrentInfo,
        options: Arc<EngineOptions>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            backend,
            info: Arc::new(info),
            options,
            created_at,
        }
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    pub fn backend(&self) -> &Arc<dyn TorrentBackend> {
        &self.backend
    }

    pub fn info(&self) -> &TorrentInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn files(&self) -> &[FileEntry] {
        &self.info.files
    }

    pub fn file(&self, index: usize) -> Option<&FileEntry> {
        self.info.files.get(index)
    }

    pub fn piece_length(&self) -> u64 {
        self.info.piece_length
    }

    pub fn verification_unit_length(&self) -> u64 {
        self.info.verification_unit_length
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Where the backend stores this session's data.
    pub fn cache_path(&self) -> &Path {
        &self.options.path
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("name", &self.info.name)
            .field("files", &self.info.files.len())
            .field("piece_length", &self.info.piece_length)
            .field("created_at", &self.created_at)
            .finish()
    }
}
