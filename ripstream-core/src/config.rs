//! Centralized configuration for Ripstream.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::addressing::ResourceId;
use crate::options::EngineOptions;

/// Errors raised while validating configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid option {field}: {reason}")]
    InvalidOption { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            field,
            reason: reason.into(),
        }
    }
}

/// Central configuration for all Ripstream components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct RipstreamConfig {
    pub registry: RegistryConfig,
    pub server: ServerConfig,
    pub probe: ProbeConfig,
}

/// Engine registry lifecycle configuration.
///
/// Controls grace periods before idle streams and sessions are evicted,
/// the write-queue safety window, and where session data is cached.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Delay between a file's last close and its inactive notification
    pub stream_grace: Duration,
    /// Delay between a session's last close and its destruction
    pub session_grace: Duration,
    /// Paused write queues are resumed after this window regardless
    pub write_queue_safety_window: Duration,
    /// Root directory for per-session cache paths
    pub cache_root: PathBuf,
    /// Capacity of the registry command mailbox
    pub command_capacity: usize,
    /// Capacity of the registry event broadcast channel
    pub event_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            stream_grace: Duration::from_secs(30),
            session_grace: Duration::from_secs(60),
            write_queue_safety_window: Duration::from_secs(50),
            cache_root: std::env::temp_dir(),
            command_capacity: 100,
            event_capacity: 256,
        }
    }
}

impl RegistryConfig {
    /// Cache location for a resource, derived deterministically from its id.
    pub fn cache_path(&self, id: &ResourceId) -> PathBuf {
        self.cache_root.join(id.as_str())
    }

    /// Default engine options for a resource.
    pub fn engine_defaults(&self, id: &ResourceId) -> EngineOptions {
        EngineOptions::defaults_for(id, self.cache_path(id))
    }

    /// Validates registry-level settings.
    ///
    /// # Errors
    ///
    /// - `ConfigError::InvalidOption` - A capacity is zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command_capacity == 0 {
            return Err(ConfigError::invalid("command_capacity", "must be at least 1"));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::invalid("event_capacity", "must be at least 1"));
        }
        Ok(())
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

/// Media prober configuration.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Upper bound on a single probe run
    pub timeout: Duration,
    /// Candidate executable paths checked before `$PATH`
    pub search_paths: Vec<PathBuf>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        let mut search_paths = Vec::new();
        if let Some(exe_dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(PathBuf::from))
        {
            search_paths.push(exe_dir.join("ffprobe"));
            search_paths.push(exe_dir.join("bin").join("ffprobe"));
        }

        Self {
            timeout: Duration::from_secs(30),
            search_paths,
        }
    }
}

impl RipstreamConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(seconds) = env_u64("RIPSTREAM_STREAM_GRACE_SECS") {
            config.registry.stream_grace = Duration::from_secs(seconds);
        }

        if let Some(seconds) = env_u64("RIPSTREAM_SESSION_GRACE_SECS") {
            config.registry.session_grace = Duration::from_secs(seconds);
        }

        if let Ok(root) = std::env::var("RIPSTREAM_CACHE_ROOT") {
            config.registry.cache_root = PathBuf::from(root);
        }

        if let Some(seconds) = env_u64("RIPSTREAM_PROBE_TIMEOUT_SECS") {
            config.probe.timeout = Duration::from_secs(seconds);
        }

        if let Ok(host) = std::env::var("RIPSTREAM_HOST") {
            config.server.host = host;
        }

        if let Ok(port) = std::env::var("PORT") {
            if let Ok(port) = port.parse::<u16>() {
                config.server.port = port;
            }
        }

        config
    }

    /// Creates a configuration with short grace periods for tests.
    pub fn for_testing() -> Self {
        Self {
            registry: RegistryConfig {
                stream_grace: Duration::from_millis(100),
                session_grace: Duration::from_millis(200),
                write_queue_safety_window: Duration::from_millis(500),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = RipstreamConfig::default();

        assert_eq!(config.registry.stream_grace, Duration::from_secs(30));
        assert_eq!(config.registry.session_grace, Duration::from_secs(60));
        assert_eq!(
            config.registry.write_queue_safety_window,
            Duration::from_secs(50)
        );
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.probe.timeout, Duration::from_secs(30));
        assert!(config.registry.validate().is_ok());
    }

    #[test]
    fn test_cache_path_is_derived_from_id() {
        let config = RegistryConfig {
            cache_root: PathBuf::from("/var/cache/ripstream"),
            ..Default::default()
        };
        let id = ResourceId::parse("c9e15763f722f23e98a29decdfae341b98d53056").unwrap();

        assert_eq!(
            config.cache_path(&id),
            PathBuf::from("/var/cache/ripstream/c9e15763f722f23e98a29decdfae341b98d53056")
        );
        assert_eq!(config.engine_defaults(&id).path, config.cache_path(&id));
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let config = RegistryConfig {
            command_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("RIPSTREAM_STREAM_GRACE_SECS", "5");
            std::env::set_var("RIPSTREAM_SESSION_GRACE_SECS", "7");
            std::env::set_var("RIPSTREAM_CACHE_ROOT", "/srv/cache");
            std::env::set_var("PORT", "8089");
        }

        let config = RipstreamConfig::from_env();

        assert_eq!(config.registry.stream_grace, Duration::from_secs(5));
        assert_eq!(config.registry.session_grace, Duration::from_secs(7));
        assert_eq!(config.registry.cache_root, PathBuf::from("/srv/cache"));
        assert_eq!(config.server.port, 8089);

        // Cleanup
        unsafe {
            std::env::remove_var("RIPSTREAM_STREAM_GRACE_SECS");
            std::env::remove_var("RIPSTREAM_SESSION_GRACE_SECS");
            std::env::remove_var("RIPSTREAM_CACHE_ROOT");
            std::env::remove_var("PORT");
        }
    }
}
