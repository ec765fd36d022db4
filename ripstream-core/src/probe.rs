//! Media probing through an external `ffprobe` process.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use url::Url;

use crate::config::ProbeConfig;

/// Errors that can occur while probing a media URL.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("Invalid probe URL: {url}")]
    InvalidUrl { url: String },

    #[error("Probe timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Probe process failed: {reason}")]
    ProcessFailure { reason: String },

    #[error("Executable {name} not found")]
    ExecutableNotFound { name: String },
}

/// Extracts container and stream metadata from a media URL.
#[async_trait]
pub trait MediaProber: Send + Sync {
    /// # Errors
    ///
    /// - `ProbeError::InvalidUrl` - URL could not be parsed
    /// - `ProbeError::Timeout` - Probe did not finish within its bound
    /// - `ProbeError::ProcessFailure` - Process failed to run, exited non-zero or printed garbage
    /// - `ProbeError::ExecutableNotFound` - No prober executable available
    async fn probe(&self, url: &str) -> Result<serde_json::Value, ProbeError>;
}

/// [`MediaProber`] backed by `ffprobe` JSON output.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    executable: Option<PathBuf>,
    timeout: Duration,
}

impl FfprobeProber {
    /// Locates `ffprobe` among the configured search paths, then `$PATH`.
    pub fn new(config: &ProbeConfig) -> Self {
        let executable = locate_executable("ffprobe", &config.search_paths);
        match &executable {
            Some(path) => tracing::debug!("Using ffprobe at {}", path.display()),
            None => tracing::warn!("ffprobe not found, probing disabled"),
        }
        Self {
            executable,
            timeout: config.timeout,
        }
    }

    pub fn with_executable(executable: PathBuf, timeout: Duration) -> Self {
        Self {
            executable: Some(executable),
            timeout,
        }
    }

    pub fn executable(&self) -> Option<&Path> {
        self.executable.as_deref()
    }
}

#[async_trait]
impl MediaProber for FfprobeProber {
    async fn probe(&self, url: &str) -> Result<serde_json::Value, ProbeError> {
        let url = Url::parse(url).map_err(|_| ProbeError::InvalidUrl {
            url: url.to_string(),
        })?;
        let executable = self
            .executable
            .as_ref()
            .ok_or_else(|| ProbeError::ExecutableNotFound {
                name: "ffprobe".to_string(),
            })?;

        let mut command = Command::new(executable);
        command
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(url.as_str())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        tracing::debug!("Probing {}", url);
        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| ProbeError::Timeout {
                timeout: self.timeout,
            })?
            .map_err(|err| ProbeError::ProcessFailure {
                reason: format!("failed to run {}: {err}", executable.display()),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::ProcessFailure {
                reason: format!("exited with {}: {}", output.status, stderr.trim()),
            });
        }

        serde_json::from_slice(&output.stdout).map_err(|err| ProbeError::ProcessFailure {
            reason: format!("unreadable output: {err}"),
        })
    }
}

/// First executable named `name` among `search_paths` and then `$PATH`.
pub fn locate_executable(name: &str, search_paths: &[PathBuf]) -> Option<PathBuf> {
    let system_paths: Vec<PathBuf> = std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths)
                .map(|dir| dir.join(name))
                .collect()
        })
        .unwrap_or_default();

    search_paths
        .iter()
        .cloned()
        .chain(system_paths)
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Whether a probed stream can be passed through to HLS without re-encoding.
pub fn should_transmux(codec_type: &str, codec_name: &str, supports_hevc: bool) -> bool {
    let name = codec_name.to_ascii_lowercase();
    match codec_type {
        "video" => name.contains("h264") || (supports_hevc && name.contains("hevc")),
        // AC3 is not universally supported by players
        "audio" => name.contains("aac"),
        _ => false,
    }
}
