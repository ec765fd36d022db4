//! Swarm speed/buffer throttle.
//!
//! Re-evaluated on every peer connect/disconnect and download event, so the
//! evaluation is a pure function of one telemetry snapshot.

use serde::Serialize;

use crate::backend::{SwarmTelemetry, TorrentBackend};

/// Pause policy applied to a session's swarm.
///
/// When both limits are set, `max_buffer` wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwarmCapPolicy {
    /// Unchoked peers that must remain above this count before pausing
    pub min_peers: usize,
    /// Download speed ceiling in bytes per second
    pub max_speed: Option<u64>,
    /// Buffered-ahead ceiling in bytes
    pub max_buffer: Option<u64>,
}

impl Default for SwarmCapPolicy {
    fn default() -> Self {
        Self {
            min_peers: 5,
            max_speed: Some(10 * 1024 * 1024),
            max_buffer: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwarmDecision {
    Pause,
    Resume,
}

impl SwarmCapPolicy {
    pub fn evaluate(&self, telemetry: &SwarmTelemetry) -> SwarmDecision {
        let over_limit = match (self.max_buffer, self.max_speed) {
            (Some(max_buffer), _) => telemetry.buffered_ahead > max_buffer,
            (None, Some(max_speed)) => telemetry.download_speed > max_speed,
            (None, None) => true,
        };

        if over_limit && telemetry.unchoked() > self.min_peers {
            SwarmDecision::Pause
        } else {
            SwarmDecision::Resume
        }
    }
}

/// Evaluates `policy` against the backend's current telemetry and acts on it.
///
/// Only issues a pause or resume when the swarm is not already in that state.
pub fn apply(backend: &dyn TorrentBackend, policy: &SwarmCapPolicy) -> SwarmDecision {
    let telemetry = backend.swarm();
    let decision = policy.evaluate(&telemetry);

    match decision {
        SwarmDecision::Pause if !telemetry.paused => {
            tracing::debug!(
                "Pausing swarm: speed={} buffered={} unchoked={}",
                telemetry.download_speed,
                telemetry.buffered_ahead,
                telemetry.unchoked()
            );
            backend.pause_swarm();
        }
        SwarmDecision::Resume if telemetry.paused => {
            tracing::debug!("Resuming swarm");
            backend.resume_swarm();
        }
        _ => {}
    }

    decision
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;
    use crate::backend::WireInfo;

    fn telemetry(unchoked: usize, choked: usize, speed: u64, buffered: u64) -> SwarmTelemetry {
        let wire = |port: u16, peer_choking: bool| WireInfo {
            address: SocketAddr::from(([10, 0, 0, 1], port)),
            peer_choking,
            am_interested: true,
            is_seeder: false,
            requests: 0,
            download_speed: 0,
            upload_speed: 0,
        };
        let mut wires: Vec<WireInfo> = (0..unchoked).map(|i| wire(i as u16, false)).collect();
        wires.extend((0..choked).map(|i| wire(1000 + i as u16, true)));
        SwarmTelemetry {
            wires,
            download_speed: speed,
            buffered_ahead: buffered,
            ..Default::default()
        }
    }

    #[test]
    fn test_pause_when_fast_and_well_connected() {
        let policy = SwarmCapPolicy {
            min_peers: 5,
            max_speed: Some(1000),
            max_buffer: None,
        };
        assert_eq!(policy.evaluate(&telemetry(6, 0, 1001, 0)), SwarmDecision::Pause);
    }

    #[test]
    fn test_resume_when_too_few_unchoked_peers() {
        let policy = SwarmCapPolicy {
            min_peers: 5,
            max_speed: Some(1000),
            max_buffer: None,
        };
        // Choked peers do not count towards the minimum.
        assert_eq!(policy.evaluate(&telemetry(5, 10, 5000, 0)), SwarmDecision::Resume);
    }

    #[test]
    fn test_resume_when_under_speed_limit() {
        let policy = SwarmCapPolicy {
            min_peers: 1,
            max_speed: Some(1000),
            max_buffer: None,
        };
        assert_eq!(policy.evaluate(&telemetry(6, 0, 1000, 0)), SwarmDecision::Resume);
    }

    #[test]
    fn test_buffer_limit_overrides_speed_limit() {
        let policy = SwarmCapPolicy {
            min_peers: 1,
            max_speed: Some(1000),
            max_buffer: Some(50_000),
        };
        // Fast, but little buffered: keep downloading.
        assert_eq!(policy.evaluate(&telemetry(3, 0, 9000, 10)), SwarmDecision::Resume);
        // Slow, but plenty buffered: pause.
        assert_eq!(policy.evaluate(&telemetry(3, 0, 10, 60_000)), SwarmDecision::Pause);
    }

    #[test]
    fn test_no_limits_pauses_on_peer_count_alone() {
        let policy = SwarmCapPolicy {
            min_peers: 2,
            max_speed: None,
            max_buffer: None,
        };
        assert_eq!(policy.evaluate(&telemetry(3, 0, 0, 0)), SwarmDecision::Pause);
        assert_eq!(policy.evaluate(&telemetry(2, 0, 0, 0)), SwarmDecision::Resume);
    }
}
