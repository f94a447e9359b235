use lastmile::diagnostics::{DeliveryEvent, Diagnostics, MemorySink};
use lastmile::store::{DurableQueueStore, MemoryBackend};
use lastmile::testing::{sample_event, FakeReachability, ScriptedTransport};
use lastmile::{
    BlockerProbe, Engine, EngineConfig, InstantSleeper, Lifecycle, ManualClock, Receipt,
    StrategyKind, TransportChain, TransportError,
};
use std::sync::Arc;
use std::time::Duration;

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn debounced_submissions_reach_the_collector() {
    let collector = ScriptedTransport::accepting();
    let mut engine = Engine::builder(EngineConfig::default())
        .alternate(Arc::new(collector.clone()))
        .build()
        .unwrap();
    engine.start();

    for kind in ["view", "scroll", "click"] {
        engine.submit(engine.event(kind, "ui", "interact").build());
    }
    assert_eq!(engine.intake().pending_len(), 3);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(collector.calls(), 3);
    assert!(collector.events().iter().all(|e| e.session_id() == engine.session_id()));
    engine.shutdown();
}

#[tokio::test]
async fn loaded_signal_drains_the_durable_queue() {
    let collector = ScriptedTransport::blocked();
    let mut engine = Engine::builder(EngineConfig::default())
        .alternate(Arc::new(collector.clone()))
        .sleeper(Arc::new(InstantSleeper))
        .build()
        .unwrap();
    let lifecycle = Lifecycle::new();
    engine.listen(&lifecycle);

    engine.submit(sample_event("queued"));
    engine.intake().flush().await;
    assert_eq!(engine.pending_count().await, 1);

    collector.set_fallback(Ok(Receipt::Status(200)));
    assert_eq!(lifecycle.loaded(), 1);
    settle().await;

    assert_eq!(engine.pending_count().await, 0);
    engine.shutdown();
}

#[tokio::test]
async fn unloading_signal_uses_the_beacon_for_pending_and_stored_events() {
    let alternate = ScriptedTransport::blocked();
    let beacon = ScriptedTransport::always(Err(TransportError::Unavailable));
    let mut engine = Engine::builder(EngineConfig::default())
        .alternate(Arc::new(alternate.clone()))
        .beacon(Arc::new(beacon.clone()))
        .sleeper(Arc::new(InstantSleeper))
        .build()
        .unwrap();
    let lifecycle = Lifecycle::new();
    engine.listen(&lifecycle);

    engine.submit(sample_event("stored"));
    engine.intake().flush().await;
    assert_eq!(engine.pending_count().await, 1);
    let alternate_before = alternate.calls();

    beacon.set_fallback(Ok(Receipt::Queued(true)));
    engine.submit(sample_event("in-memory"));
    lifecycle.unloading();
    settle().await;

    assert_eq!(alternate.calls(), alternate_before, "only unload-safe strategies run");
    assert_eq!(engine.intake().pending_len(), 0);
    assert_eq!(engine.pending_count().await, 0);
    let kinds: Vec<_> = beacon.events().iter().map(|e| e.kind().to_string()).collect();
    assert!(kinds.ends_with(&["in-memory".to_string(), "stored".to_string()]));
    engine.shutdown();
}

#[tokio::test]
async fn blocked_verdict_demotes_but_never_skips_a_strategy() {
    let config = EngineConfig::default();
    let alternate = ScriptedTransport::accepting().with_endpoint("http://c.test/api/track/events");
    let canonical =
        ScriptedTransport::accepting().with_endpoint("http://c.test/api/analytics/events");
    let reach = FakeReachability::new(Err(TransportError::Blocked("refused".into())));
    let probe = Arc::new(
        BlockerProbe::new(Arc::new(reach.clone()), &config)
            .with_clock(Arc::new(ManualClock::new(0))),
    );
    probe.detect("http://c.test/api/track/events").await;
    reach.set(Ok(200));
    probe.detect("http://c.test/api/analytics/events").await;

    let chain = TransportChain::new(vec![
        lastmile::StrategyDescriptor::network(
            StrategyKind::AlternateEndpoint,
            Arc::new(alternate.clone()),
        ),
        lastmile::StrategyDescriptor::network(
            StrategyKind::CanonicalEndpoint,
            Arc::new(canonical.clone()),
        ),
    ])
    .with_probe(Arc::clone(&probe));

    let report = chain.deliver(&sample_event("e")).await;
    assert_eq!(report.via, Some(StrategyKind::CanonicalEndpoint));
    assert_eq!(alternate.calls(), 0);

    canonical.set_fallback(Err(TransportError::Blocked("reset".into())));
    let report = chain.deliver(&sample_event("e")).await;
    assert_eq!(report.via, Some(StrategyKind::AlternateEndpoint), "demoted, still attempted");
}

#[tokio::test]
async fn diagnostics_trace_an_event_from_failure_to_redelivery() {
    let sink = MemorySink::new();
    let alternate = ScriptedTransport::blocked();
    let chain = Arc::new(
        TransportChain::new(vec![lastmile::StrategyDescriptor::network(
            StrategyKind::AlternateEndpoint,
            Arc::new(alternate.clone()),
        )])
        .with_diagnostics(Diagnostics::new(sink.clone())),
    );
    let config = EngineConfig::default();
    let store = DurableQueueStore::new(Arc::new(MemoryBackend::new()), &config);
    let orchestrator = lastmile::DeliveryOrchestrator::new(Arc::clone(&chain), store.clone())
        .with_diagnostics(Diagnostics::new(sink.clone()));
    let scheduler = lastmile::RetryScheduler::with_parts(
        chain,
        store.clone(),
        Arc::new(InstantSleeper),
        Diagnostics::new(sink.clone()),
        &config,
    );

    orchestrator.send(sample_event("e")).await;
    alternate.set_fallback(Ok(Receipt::Status(200)));
    scheduler.flush_pending().await;

    let events = sink.events();
    assert_eq!(
        events[..2],
        [
            DeliveryEvent::StrategyFailed {
                strategy: StrategyKind::AlternateEndpoint,
                kind: lastmile::FailureKind::Blocked,
            },
            DeliveryEvent::Persisted,
        ]
    );
    assert!(events.contains(&DeliveryEvent::Delivered { via: StrategyKind::AlternateEndpoint }));
    assert_eq!(events.last(), Some(&DeliveryEvent::FlushCompleted { delivered: 1 }));
}
