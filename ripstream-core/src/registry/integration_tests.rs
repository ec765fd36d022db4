//! Integration tests for the engine registry against the simulated backend.

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::broadcast;
    use tokio::time::advance;

    use crate::addressing::ResourceId;
    use crate::backend::{BackendError, BackendEvent, BackendFactory, TorrentBackend, WireInfo};
    use crate::config::RegistryConfig;
    use crate::options::EngineOverrides;
    use crate::registry::{
        RegistryError, RegistryEvent, RegistryHandle, SessionSettings, StreamKey, Toggle,
        spawn_engine_registry,
    };
    use crate::simulation::{
        PieceSelection, SimulatedBackend, SimulatedBackendFactory, SimulatedDiscovery,
        SimulatedTorrent,
    };
    use crate::throttle::SwarmCapPolicy;

    const INFO_HASH: &str = "c9e15763f722f23e98a29decdfae341b98d53056";
    const STREAM_GRACE: Duration = Duration::from_secs(30);
    const SESSION_GRACE: Duration = Duration::from_secs(60);
    const SAFETY_WINDOW: Duration = Duration::from_secs(50);

    fn id() -> ResourceId {
        ResourceId::parse(INFO_HASH).unwrap()
    }

    fn key(file_index: usize) -> StreamKey {
        StreamKey::new(id(), file_index)
    }

    fn config() -> RegistryConfig {
        RegistryConfig {
            stream_grace: STREAM_GRACE,
            session_grace: SESSION_GRACE,
            write_queue_safety_window: SAFETY_WINDOW,
            cache_root: PathBuf::from("/tmp/ripstream-tests"),
            ..Default::default()
        }
    }

    /// Two files over five 1000-byte pieces.
    fn small_torrent() -> SimulatedTorrent {
        SimulatedTorrent {
            file_sizes: vec![3000, 2000],
            piece_length: 1000,
            verification_unit_length: 1000,
            ..Default::default()
        }
    }

    /// Lets spawned tasks and the actor drain their queues.
    async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    fn wire(port: u16) -> WireInfo {
        WireInfo {
            address: SocketAddr::from(([10, 1, 1, 1], port)),
            peer_choking: false,
            am_interested: true,
            is_seeder: false,
            requests: 1,
            download_speed: 0,
            upload_speed: 0,
        }
    }

    struct Fixture {
        factory: Arc<SimulatedBackendFactory>,
        registry: RegistryHandle,
        events: broadcast::Receiver<RegistryEvent>,
    }

    impl Fixture {
        fn new(factory: SimulatedBackendFactory) -> Self {
            let factory = Arc::new(factory);
            let registry = spawn_engine_registry(
                config(),
                Some(Arc::clone(&factory) as Arc<dyn BackendFactory>),
                None,
            );
            let events = registry.subscribe();
            Self {
                factory,
                registry,
                events,
            }
        }

        fn instant() -> Self {
            Self::new(SimulatedBackendFactory::instant(small_torrent()))
        }

        fn backend(&self) -> Arc<SimulatedBackend> {
            self.factory.backend(&id()).unwrap()
        }

        fn drain(&mut self) -> Vec<RegistryEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                events.push(event);
            }
            events
        }

        async fn next_event(&mut self) -> RegistryEvent {
            tokio::time::timeout(Duration::from_secs(2), self.events.recv())
                .await
                .expect("timed out waiting for a registry event")
                .expect("registry event channel closed")
        }

        /// Next event matching `predicate`, skipping others.
        async fn expect(&mut self, predicate: impl Fn(&RegistryEvent) -> bool) -> RegistryEvent {
            loop {
                let event = self.next_event().await;
                if predicate(&event) {
                    return event;
                }
            }
        }

        /// Every event published before a marker sent through the backend's
        /// own event stream, which is processed strictly in order.
        async fn events_until_marker(&mut self) -> Vec<RegistryEvent> {
            self.backend()
                .emit(BackendEvent::Error("marker".to_string()));
            let mut seen = Vec::new();
            loop {
                let event = self.next_event().await;
                if matches!(&event, RegistryEvent::BackendError { message, .. } if message == "marker")
                {
                    return seen;
                }
                seen.push(event);
            }
        }
    }

    fn progress_of(event: &RegistryEvent) -> Option<f64> {
        match event {
            RegistryEvent::StreamProgress { progress, .. } => Some(*progress),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_concurrent_create_shares_one_backend() {
        let mut fixture = Fixture::new(SimulatedBackendFactory::manual(small_torrent()));

        let first = {
            let registry = fixture.registry.clone();
            tokio::spawn(async move { registry.create(id(), EngineOverrides::default()).await })
        };
        let second = {
            let registry = fixture.registry.clone();
            tokio::spawn(async move { registry.create(id(), EngineOverrides::default()).await })
        };

        settle().await;
        assert_eq!(fixture.factory.spawn_count(), 1);
        assert!(fixture.registry.list().await.unwrap().is_empty());
        fixture.backend().mark_ready();

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert!(Arc::ptr_eq(first.backend(), second.backend()));
        assert_eq!(fixture.factory.spawn_count(), 1);

        let created = fixture
            .drain()
            .into_iter()
            .filter(|event| matches!(event, RegistryEvent::SessionCreated { .. }))
            .count();
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn test_create_without_backend_factory_fails() {
        let registry = spawn_engine_registry(config(), None, None);
        let err = registry
            .create(id(), EngineOverrides::default())
            .await
            .unwrap_err();
        assert_eq!(err, RegistryError::BackendUnavailable);
    }

    #[tokio::test]
    async fn test_invalid_overrides_rejected() {
        let fixture = Fixture::instant();
        let overrides = EngineOverrides {
            connections: Some(0),
            ..Default::default()
        };

        let err = fixture.registry.create(id(), overrides).await.unwrap_err();
        assert!(matches!(err, RegistryError::Config(_)));
        assert_eq!(fixture.factory.spawn_count(), 0);
    }

    #[tokio::test]
    async fn test_open_path_errors() {
        let fixture = Fixture::instant();
        let registry = &fixture.registry;

        assert!(matches!(
            registry.open_path("zzzz/0").await.unwrap_err(),
            RegistryError::InvalidPath { .. }
        ));
        assert!(matches!(
            registry.open_path(&format!("{INFO_HASH}/abc")).await.unwrap_err(),
            RegistryError::InvalidFileIndex { .. }
        ));
        assert!(matches!(
            registry.open_path(&"a".repeat(64)).await.unwrap_err(),
            RegistryError::NotImplementedAddressing { .. }
        ));
        assert_eq!(
            registry
                .open_path(&format!("{INFO_HASH}/99"))
                .await
                .unwrap_err(),
            RegistryError::FileNotFound { index: 99 }
        );
    }

    #[tokio::test]
    async fn test_open_path_normalizes_id() {
        let fixture = Fixture::instant();

        let opened = fixture
            .registry
            .open_path(&format!("/{}/1", INFO_HASH.to_uppercase()))
            .await
            .unwrap();
        assert_eq!(opened.session.id(), &id());
        assert_eq!(opened.file.length, 2000);

        fixture.registry.open_path(&format!("{INFO_HASH}/0")).await.unwrap();
        assert_eq!(fixture.factory.spawn_count(), 1);
        assert_eq!(fixture.registry.list().await.unwrap(), vec![id()]);
    }

    #[tokio::test]
    async fn test_window_progress_and_single_ready() {
        let mut fixture = Fixture::instant();
        fixture.registry.open_path(&format!("{INFO_HASH}/0")).await.unwrap();
        fixture.drain();

        fixture.registry.stream_open(id(), 0).await.unwrap();
        let opened = fixture.drain();
        assert_eq!(opened[0], RegistryEvent::StreamActive { key: key(0) });
        assert_eq!(opened[1], RegistryEvent::SessionActive { id: id() });
        assert_eq!(progress_of(&opened[2]), Some(0.0));

        let backend = fixture.backend();
        backend.complete_piece(1);
        let event = fixture.expect(|event| progress_of(event).is_some()).await;
        assert!((progress_of(&event).unwrap() - 1.0 / 3.0).abs() < f64::EPSILON);

        backend.complete_piece(0);
        backend.complete_piece(2);
        let ready = fixture
            .expect(|event| matches!(event, RegistryEvent::StreamReady { .. }))
            .await;
        let RegistryEvent::StreamReady { key: ready_key, path } = ready else {
            unreachable!()
        };
        assert_eq!(ready_key, key(0));
        assert_eq!(
            path,
            Some(PathBuf::from(format!(
                "/tmp/ripstream-tests/{INFO_HASH}/Sintel/episode-01.mp4"
            )))
        );

        // Duplicate availability after completion stays silent.
        backend.emit(BackendEvent::PieceVerified(2));
        let later = fixture.events_until_marker().await;
        assert!(
            later
                .iter()
                .all(|event| progress_of(event).is_none()
                    && !matches!(event, RegistryEvent::StreamReady { .. }))
        );
    }

    #[tokio::test]
    async fn test_dropped_piece_events_still_reach_ready() {
        let torrent = SimulatedTorrent {
            file_sizes: vec![3_000_000],
            piece_length: 1000,
            verification_unit_length: 1000,
            ..Default::default()
        };
        let mut fixture = Fixture::new(SimulatedBackendFactory::instant(torrent));
        fixture.registry.open_path(&format!("{INFO_HASH}/0")).await.unwrap();
        fixture.registry.stream_open(id(), 0).await.unwrap();
        fixture.drain();

        // Two events per piece overrun the backend's event buffer.
        fixture.backend().complete_all();

        let ready = fixture
            .expect(|event| matches!(event, RegistryEvent::StreamReady { .. }))
            .await;
        assert!(matches!(ready, RegistryEvent::StreamReady { key: ready_key, .. } if ready_key == key(0)));

        let later = fixture.events_until_marker().await;
        assert!(
            !later
                .iter()
                .any(|event| matches!(event, RegistryEvent::StreamReady { .. }))
        );
        let stats = fixture.registry.stats(id(), Some(0)).await.unwrap().unwrap();
        assert_eq!(stats.stream.unwrap().stream_progress, 1.0);
    }

    #[tokio::test]
    async fn test_complete_file_ready_on_open_and_tracked_once() {
        let mut fixture = Fixture::instant();
        fixture.registry.open_path(&format!("{INFO_HASH}/1")).await.unwrap();
        fixture.backend().complete_all();

        fixture.registry.stream_open(id(), 1).await.unwrap();
        let events = fixture.events_until_marker().await;
        let ready = events
            .iter()
            .filter(|event| matches!(event, RegistryEvent::StreamReady { .. }))
            .count();
        assert_eq!(ready, 1);

        // A second viewer of the same file does not restart tracking.
        fixture.registry.stream_open(id(), 1).await.unwrap();
        let again = fixture.events_until_marker().await;
        assert!(again.iter().all(|event| progress_of(event).is_none()));
    }

    #[tokio::test]
    async fn test_whole_verification_units_selected_without_partial_flush() {
        let torrent = SimulatedTorrent {
            file_sizes: vec![5000, 3000],
            piece_length: 1000,
            verification_unit_length: 4000,
            partial_flush: false,
            ..Default::default()
        };
        let fixture = Fixture::new(SimulatedBackendFactory::instant(torrent));
        fixture.registry.open_path(&format!("{INFO_HASH}/1")).await.unwrap();

        fixture.registry.stream_open(id(), 1).await.unwrap();
        fixture.registry.stream_open(id(), 1).await.unwrap();

        assert_eq!(
            fixture.backend().selections(),
            vec![PieceSelection {
                start: 4,
                end: 8,
                priority: false
            }]
        );
    }

    #[tokio::test]
    async fn test_partial_flush_skips_reselection() {
        let fixture = Fixture::instant();
        fixture.registry.open_path(&format!("{INFO_HASH}/0")).await.unwrap();
        fixture.registry.stream_open(id(), 0).await.unwrap();

        assert!(fixture.backend().selections().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_session_evicted_after_grace() {
        let mut fixture = Fixture::instant();
        fixture.registry.open_path(&format!("{INFO_HASH}/0")).await.unwrap();
        fixture.registry.stream_open(id(), 0).await.unwrap();
        fixture.registry.stream_close(id(), 0);
        settle().await;

        let events = fixture.drain();
        assert!(events.contains(&RegistryEvent::StreamIdle { key: key(0) }));
        assert!(events.contains(&RegistryEvent::SessionIdle { id: id() }));

        advance(STREAM_GRACE + Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(
            fixture.drain(),
            vec![RegistryEvent::StreamInactive { key: key(0) }]
        );
        assert_eq!(fixture.registry.list().await.unwrap(), vec![id()]);

        advance(SESSION_GRACE - STREAM_GRACE).await;
        settle().await;
        let events = fixture.drain();
        assert_eq!(events[0], RegistryEvent::SessionInactive { id: id() });
        assert!(events.contains(&RegistryEvent::SessionDestroyed { id: id() }));
        assert!(fixture.registry.list().await.unwrap().is_empty());
        assert!(fixture.backend().is_destroyed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reopen_during_grace_keeps_session() {
        let mut fixture = Fixture::instant();
        fixture.registry.open_path(&format!("{INFO_HASH}/0")).await.unwrap();
        fixture.registry.stream_open(id(), 0).await.unwrap();
        fixture.registry.stream_close(id(), 0);
        settle().await;
        fixture.drain();

        advance(Duration::from_secs(20)).await;
        fixture.registry.stream_open(id(), 0).await.unwrap();
        let reopened = fixture.drain();
        assert!(
            !reopened
                .iter()
                .any(|event| matches!(event, RegistryEvent::SessionActive { .. })),
            "count was still tracked during grace"
        );

        advance(SESSION_GRACE * 2).await;
        settle().await;
        assert!(fixture.drain().is_empty());
        assert_eq!(fixture.registry.list().await.unwrap(), vec![id()]);
        assert!(!fixture.backend().is_destroyed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_cancels_pending_timers() {
        let mut fixture = Fixture::instant();
        fixture.registry.open_path(&format!("{INFO_HASH}/0")).await.unwrap();
        fixture.registry.stream_open(id(), 0).await.unwrap();
        fixture.registry.stream_close(id(), 0);
        settle().await;
        fixture.drain();

        fixture.registry.remove(id()).await.unwrap();
        settle().await;
        assert_eq!(
            fixture.drain(),
            vec![RegistryEvent::SessionDestroyed { id: id() }]
        );

        advance(SESSION_GRACE * 2).await;
        settle().await;
        assert!(fixture.drain().is_empty());

        // Removing again and closing a forgotten stream are harmless.
        fixture.registry.remove(id()).await.unwrap();
        fixture.registry.stream_close(id(), 0);
        settle().await;
        assert!(fixture.drain().is_empty());
    }

    #[tokio::test]
    async fn test_remove_during_create_rejects_waiters() {
        let fixture = Fixture::new(SimulatedBackendFactory::manual(small_torrent()));

        let pending = {
            let registry = fixture.registry.clone();
            tokio::spawn(async move { registry.create(id(), EngineOverrides::default()).await })
        };
        settle().await;
        let stale = fixture.backend();

        fixture.registry.remove(id()).await.unwrap();
        assert_eq!(
            pending.await.unwrap().unwrap_err(),
            RegistryError::SessionDestroyed { id: id() }
        );

        // A fresh create builds a new backend rather than reviving the old one.
        let fresh = {
            let registry = fixture.registry.clone();
            tokio::spawn(async move { registry.create(id(), EngineOverrides::default()).await })
        };
        settle().await;
        assert_eq!(fixture.factory.spawn_count(), 2);
        stale.mark_ready();
        fixture.backend().mark_ready();

        let session = fresh.await.unwrap().unwrap();
        assert!(!Arc::ptr_eq(
            session.backend(),
            &(stale as Arc<dyn TorrentBackend>)
        ));
    }

    #[tokio::test]
    async fn test_ready_failure_rejects_creators() {
        let fixture = Fixture::new(SimulatedBackendFactory::manual(small_torrent()));

        let pending = {
            let registry = fixture.registry.clone();
            tokio::spawn(async move { registry.create(id(), EngineOverrides::default()).await })
        };
        settle().await;
        fixture.backend().fail_ready("no metadata");

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(
            err,
            RegistryError::Backend(BackendError::NotReady {
                reason: "no metadata".to_string()
            })
        );
        assert!(fixture.registry.list().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_queue_resumes_after_safety_window() {
        let fixture = Fixture::instant();
        fixture.registry.create(id(), EngineOverrides::default()).await.unwrap();
        let backend = fixture.backend();

        let pause = SessionSettings {
            write_queue: Some(Toggle::Pause),
            ..Default::default()
        };
        fixture.registry.settings(id(), pause).await.unwrap();
        assert!(backend.is_write_queue_paused());

        advance(SAFETY_WINDOW - Duration::from_secs(1)).await;
        settle().await;
        assert!(backend.is_write_queue_paused());

        advance(Duration::from_secs(2)).await;
        settle().await;
        assert!(!backend.is_write_queue_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_write_queue_resume_keeps_safety_timer() {
        let fixture = Fixture::instant();
        fixture.registry.create(id(), EngineOverrides::default()).await.unwrap();
        let backend = fixture.backend();

        let pause = SessionSettings {
            write_queue: Some(Toggle::Pause),
            ..Default::default()
        };
        let resume = SessionSettings {
            write_queue: Some(Toggle::Resume),
            ..Default::default()
        };
        fixture.registry.settings(id(), pause).await.unwrap();
        fixture.registry.settings(id(), resume).await.unwrap();
        assert!(!backend.is_write_queue_paused());

        // Paused again directly on the backend; the first timer still runs.
        assert!(backend.pause_write_queue());
        advance(SAFETY_WINDOW + Duration::from_secs(1)).await;
        settle().await;
        assert!(!backend.is_write_queue_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_write_queue_pause_restarts_safety_window() {
        let fixture = Fixture::instant();
        fixture.registry.create(id(), EngineOverrides::default()).await.unwrap();
        let backend = fixture.backend();

        let pause = SessionSettings {
            write_queue: Some(Toggle::Pause),
            ..Default::default()
        };
        fixture.registry.settings(id(), pause).await.unwrap();
        advance(Duration::from_secs(30)).await;
        fixture.registry.settings(id(), pause).await.unwrap();

        // Past the first window, inside the second.
        advance(Duration::from_secs(25)).await;
        settle().await;
        assert!(backend.is_write_queue_paused());

        advance(Duration::from_secs(26)).await;
        settle().await;
        assert!(!backend.is_write_queue_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_swarm_paused_once_tracked_files_complete() {
        let mut fixture = Fixture::instant();
        fixture.registry.open_path(&format!("{INFO_HASH}/1")).await.unwrap();
        fixture.registry.stream_open(id(), 1).await.unwrap();
        let backend = fixture.backend();

        backend.complete_piece(3);
        backend.complete_piece(4);
        settle().await;
        assert!(
            fixture
                .drain()
                .contains(&RegistryEvent::StreamReady {
                    key: key(1),
                    path: backend.destination(1),
                })
        );

        advance(STREAM_GRACE - Duration::from_secs(1)).await;
        settle().await;
        assert!(!backend.is_swarm_paused());
        assert!(fixture.drain().is_empty());

        advance(Duration::from_secs(2)).await;
        settle().await;
        assert!(backend.is_swarm_paused());
        assert_eq!(fixture.drain(), vec![RegistryEvent::DownloadIdle { id: id() }]);

        fixture.registry.create(id(), EngineOverrides::default()).await.unwrap();
        assert!(!backend.is_swarm_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_tracked_file_cancels_download_idle() {
        let mut fixture = Fixture::instant();
        fixture.registry.open_path(&format!("{INFO_HASH}/1")).await.unwrap();
        fixture.registry.stream_open(id(), 1).await.unwrap();
        let backend = fixture.backend();
        backend.complete_piece(3);
        backend.complete_piece(4);
        settle().await;

        advance(Duration::from_secs(20)).await;
        fixture.registry.stream_open(id(), 0).await.unwrap();
        advance(STREAM_GRACE * 2).await;
        settle().await;
        assert!(!backend.is_swarm_paused());

        for piece in 0..3 {
            backend.complete_piece(piece);
        }
        settle().await;
        fixture.drain();

        advance(STREAM_GRACE + Duration::from_millis(1)).await;
        settle().await;
        assert!(backend.is_swarm_paused());
        assert_eq!(fixture.drain(), vec![RegistryEvent::DownloadIdle { id: id() }]);
    }

    #[tokio::test]
    async fn test_swarm_settings_and_resume_on_recreate() {
        let fixture = Fixture::instant();
        fixture.registry.create(id(), EngineOverrides::default()).await.unwrap();
        let backend = fixture.backend();

        let pause = SessionSettings {
            swarm: Some(Toggle::Pause),
            ..Default::default()
        };
        fixture.registry.settings(id(), pause).await.unwrap();
        assert!(backend.is_swarm_paused());

        fixture.registry.create(id(), EngineOverrides::default()).await.unwrap();
        assert!(!backend.is_swarm_paused());

        // Unknown ids are ignored.
        let other = ResourceId::parse(&"b".repeat(40)).unwrap();
        fixture.registry.settings(other, pause).await.unwrap();
    }

    #[tokio::test]
    async fn test_swarm_cap_follows_peer_events() {
        let mut fixture = Fixture::instant();
        let overrides = EngineOverrides {
            swarm_cap: Some(Some(SwarmCapPolicy {
                min_peers: 2,
                max_speed: Some(1000),
                max_buffer: None,
            })),
            ..Default::default()
        };
        fixture.registry.create(id(), overrides).await.unwrap();
        let backend = fixture.backend();
        backend.set_download_speed(5000);

        backend.connect_peer(wire(1));
        backend.connect_peer(wire(2));
        fixture.events_until_marker().await;
        assert!(!backend.is_swarm_paused());

        backend.connect_peer(wire(3));
        fixture.events_until_marker().await;
        assert!(backend.is_swarm_paused());

        backend.disconnect_peer(wire(3).address);
        fixture.events_until_marker().await;
        assert!(!backend.is_swarm_paused());
    }

    #[tokio::test]
    async fn test_stats_only_for_ready_sessions() {
        let fixture = Fixture::new(SimulatedBackendFactory::manual(small_torrent()));

        let pending = {
            let registry = fixture.registry.clone();
            tokio::spawn(async move { registry.create(id(), EngineOverrides::default()).await })
        };
        settle().await;
        assert!(fixture.registry.stats(id(), None).await.unwrap().is_none());
        assert!(fixture.registry.list().await.unwrap().is_empty());

        fixture.backend().mark_ready();
        pending.await.unwrap().unwrap();

        let stats = fixture.registry.stats(id(), Some(0)).await.unwrap().unwrap();
        assert_eq!(stats.files.len(), 2);
        assert_eq!(stats.stream.unwrap().stream_len, 3000);
        assert_eq!(
            stats.cache_path,
            PathBuf::from(format!("/tmp/ripstream-tests/{INFO_HASH}"))
        );
        assert_eq!(stats.opts.connections, 35);
    }

    #[tokio::test]
    async fn test_backend_errors_published_and_close_removes() {
        let mut fixture = Fixture::instant();
        fixture.registry.create(id(), EngineOverrides::default()).await.unwrap();
        let backend = fixture.backend();

        backend.emit(BackendEvent::InvalidPiece(3));
        backend.emit(BackendEvent::Error("disk full".to_string()));
        assert_eq!(
            fixture.expect(|event| matches!(event, RegistryEvent::InvalidPiece { .. })).await,
            RegistryEvent::InvalidPiece { id: id(), piece: 3 }
        );
        assert_eq!(
            fixture.next_event().await,
            RegistryEvent::BackendError {
                id: id(),
                message: "disk full".to_string()
            }
        );
        assert_eq!(fixture.registry.list().await.unwrap(), vec![id()]);

        backend.emit(BackendEvent::Closed);
        fixture
            .expect(|event| matches!(event, RegistryEvent::SessionDestroyed { .. }))
            .await;
        assert!(fixture.registry.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_flood_pulse_and_discovery_attached() {
        let factory = Arc::new(SimulatedBackendFactory::instant(small_torrent()));
        let discovery = Arc::new(SimulatedDiscovery::new());
        let registry = spawn_engine_registry(
            config(),
            Some(Arc::clone(&factory) as Arc<dyn BackendFactory>),
            Some(Arc::clone(&discovery) as Arc<dyn crate::backend::PeerDiscovery>),
        );

        registry.create(id(), EngineOverrides::default()).await.unwrap();
        assert_eq!(
            factory.backend(&id()).unwrap().flood_pulse(),
            Some((0, 2_621_440))
        );
        assert_eq!(discovery.attach_count(), 1);

        let stats = registry.stats(id(), None).await.unwrap().unwrap();
        assert_eq!(stats.peer_search_running, Some(true));
        let sources = stats.sources.unwrap();
        assert_eq!(sources.last().unwrap().source, format!("dht:{INFO_HASH}"));
    }

    #[tokio::test]
    async fn test_shutdown_destroys_sessions() {
        let fixture = Fixture::instant();
        fixture.registry.create(id(), EngineOverrides::default()).await.unwrap();

        fixture.registry.shutdown().await.unwrap();
        settle().await;

        assert!(fixture.backend().is_destroyed());
        assert!(!fixture.registry.is_running());
        assert_eq!(
            fixture.registry.list().await.unwrap_err(),
            RegistryError::RegistryShutdown
        );
    }
}
