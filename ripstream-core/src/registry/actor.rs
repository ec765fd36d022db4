//! Actor implementation for the engine registry.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use super::commands::{InternalMessage, RegistryCommand};
use super::handle::RegistryHandle;
use super::state::{EngineRegistry, ExpiryReceivers};
use crate::backend::{BackendFactory, PeerDiscovery};
use crate::config::RegistryConfig;

/// Spawns the registry actor and returns its handle.
///
/// Without a backend factory every `create` fails with
/// `RegistryError::BackendUnavailable`. Peer discovery is optional and only
/// attached to sessions whose options carry a peer search.
///
/// # Examples
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() {
/// use ripstream_core::config::RegistryConfig;
/// use ripstream_core::registry::spawn_engine_registry;
///
/// let registry = spawn_engine_registry(RegistryConfig::default(), None, None);
/// let ids = registry.list().await.unwrap();
/// assert!(ids.is_empty());
/// # }
/// ```
pub fn spawn_engine_registry(
    config: RegistryConfig,
    factory: Option<Arc<dyn BackendFactory>>,
    discovery: Option<Arc<dyn PeerDiscovery>>,
) -> RegistryHandle {
    let (sender, receiver) = mpsc::channel(config.command_capacity.max(1));
    let (internal_sender, internal_receiver) = mpsc::unbounded_channel();
    let (events, _) = broadcast::channel(config.event_capacity.max(1));

    let (registry, expiries) =
        EngineRegistry::new(config, factory, discovery, internal_sender, events.clone());

    tokio::spawn(async move {
        run_actor_loop(registry, receiver, internal_receiver, expiries).await;
    });

    RegistryHandle::new(sender, events)
}

/// Runs the registry message loop.
///
/// Commands, backend notifications and grace-period expiries are processed
/// one at a time, so no two state transitions ever interleave. The loop
/// ends on `Shutdown` or once every handle has been dropped.
async fn run_actor_loop(
    mut registry: EngineRegistry,
    mut receiver: mpsc::Receiver<RegistryCommand>,
    mut internal_receiver: mpsc::UnboundedReceiver<InternalMessage>,
    mut expiries: ExpiryReceivers,
) {
    tracing::debug!("Engine registry actor started");

    loop {
        tokio::select! {
            command = receiver.recv() => {
                let Some(command) = command else {
                    registry.shutdown();
                    break;
                };
                if !handle_command(&mut registry, command) {
                    break;
                }
            }
            Some(message) = internal_receiver.recv() => {
                registry.handle_internal(message);
            }
            Some(expiry) = expiries.streams.recv() => {
                registry.on_stream_expiry(expiry);
            }
            Some(expiry) = expiries.resources.recv() => {
                registry.on_resource_expiry(expiry);
            }
            Some(expiry) = expiries.downloads.recv() => {
                registry.on_download_expiry(expiry);
            }
        }
    }

    tracing::debug!("Engine registry actor stopped");
}

/// Handles a single command for the registry.
/// Returns true to continue processing, false to shutdown.
fn handle_command(registry: &mut EngineRegistry, command: RegistryCommand) -> bool {
    match command {
        RegistryCommand::Create {
            id,
            overrides,
            responder,
        } => {
            registry.create(id, overrides, responder);
        }

        RegistryCommand::Remove { id, responder } => {
            registry.remove(&id);
            let _ = responder.send(());
        }

        RegistryCommand::Settings {
            id,
            settings,
            responder,
        } => {
            registry.settings(&id, settings);
            let _ = responder.send(());
        }

        RegistryCommand::Stats {
            id,
            file_index,
            responder,
        } => {
            let _ = responder.send(registry.stats(&id, file_index));
        }

        RegistryCommand::List { responder } => {
            let _ = responder.send(registry.list());
        }

        RegistryCommand::StreamOpen { key, responder } => {
            registry.stream_open(key);
            let _ = responder.send(());
        }

        RegistryCommand::StreamClose { key } => {
            registry.stream_close(key);
        }

        RegistryCommand::Shutdown { responder } => {
            tracing::debug!("Engine registry actor shutting down");
            registry.shutdown();
            let _ = responder.send(());
            return false;
        }
    }

    true
}
