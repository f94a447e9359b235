use lastmile::store::{DurableQueueStore, MemoryBackend};
use lastmile::testing::{blocked_chain, sample_event, ScriptedTransport};
use lastmile::{
    DeliveryOrchestrator, EngineConfig, EventIntake, InstantSleeper, ManualClock, RetryScheduler,
    SendOutcome, StrategyKind, TransportChain, TransportError,
};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    alternate: ScriptedTransport,
    beacon: ScriptedTransport,
    canonical: ScriptedTransport,
    store: DurableQueueStore,
    orchestrator: DeliveryOrchestrator,
    scheduler: RetryScheduler,
    clock: ManualClock,
}

fn harness(config: EngineConfig) -> Harness {
    let alternate = ScriptedTransport::accepting();
    let beacon = ScriptedTransport::accepting();
    let canonical = ScriptedTransport::accepting();
    let chain = Arc::new(TransportChain::standard(
        Arc::new(alternate.clone()),
        Arc::new(beacon.clone()),
        Arc::new(canonical.clone()),
    ));
    let clock = ManualClock::new(1_700_000_000_000);
    let store = DurableQueueStore::new(Arc::new(MemoryBackend::new()), &config)
        .with_clock(Arc::new(clock.clone()));
    let orchestrator = DeliveryOrchestrator::new(Arc::clone(&chain), store.clone());
    let scheduler = RetryScheduler::with_parts(
        chain,
        store.clone(),
        Arc::new(InstantSleeper),
        Default::default(),
        &config,
    );
    Harness { alternate, beacon, canonical, store, orchestrator, scheduler, clock }
}

fn block_everything(h: &Harness) {
    for transport in [&h.alternate, &h.beacon, &h.canonical] {
        transport.set_fallback(Err(TransportError::Blocked("connection refused".into())));
    }
}

#[tokio::test]
async fn fresh_event_with_healthy_transports_never_touches_store() {
    let h = harness(EngineConfig::default());

    let outcome = h.orchestrator.send(sample_event("E1")).await;

    assert_eq!(outcome, SendOutcome::Delivered(StrategyKind::AlternateEndpoint));
    assert_eq!(h.alternate.calls(), 1);
    assert_eq!(h.store.count().await, 0);
}

#[tokio::test]
async fn all_network_transports_blocked_persists_once_with_zero_attempts() {
    let h = harness(EngineConfig::default());
    block_everything(&h);

    let outcome = h.orchestrator.send(sample_event("E2")).await;

    assert_eq!(outcome, SendOutcome::Persisted);
    assert_eq!(h.store.count().await, 1);
    let records = h.store.list_eligible(10).await;
    assert_eq!(records[0].attempt_count, 0);
    assert_eq!(records[0].event.kind(), "E2");
    assert_eq!((h.alternate.calls(), h.beacon.calls(), h.canonical.calls()), (1, 1, 1));
}

#[tokio::test]
async fn retry_succeeds_once_connectivity_returns() {
    let h = harness(EngineConfig::default());
    block_everything(&h);
    h.orchestrator.send(sample_event("E3")).await;
    h.scheduler.flush_pending().await;
    h.scheduler.flush_pending().await;
    assert_eq!(h.store.list_eligible(1).await[0].attempt_count, 2);

    h.alternate.set_fallback(Ok(lastmile::Receipt::Status(200)));
    let before = h.store.count().await;
    let delivered = h.scheduler.flush_pending().await;

    assert_eq!(delivered, 1);
    assert_eq!(h.store.count().await, before - 1);
    assert!(h.store.list_eligible(10).await.is_empty());
}

#[tokio::test]
async fn store_at_capacity_evicts_oldest_record() {
    let config = EngineConfig { max_records: 3, ..EngineConfig::default() };
    let h = harness(config);
    let mut ids = Vec::new();
    for name in ["t1", "t2", "t3", "t4"] {
        h.clock.advance(Duration::from_millis(1));
        ids.push(h.store.enqueue(sample_event(name)).await.unwrap());
    }

    let records = h.store.list_eligible(10).await;
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.event.kind() != "t1"));
    assert_eq!(records.last().unwrap().id, ids[3]);
}

#[tokio::test]
async fn retries_stop_at_the_cap_and_record_is_evicted() {
    let h = harness(EngineConfig::default());
    block_everything(&h);
    h.orchestrator.send(sample_event("doomed")).await;

    for pass in 1..=5 {
        h.scheduler.flush_pending().await;
        for record in h.store.list_eligible(10).await {
            assert!(record.attempt_count <= 5);
            assert_eq!(record.attempt_count, pass);
        }
    }

    assert_eq!(h.store.count().await, 0);
    assert_eq!(h.alternate.calls(), 6, "one fresh attempt plus five retries");
}

#[tokio::test]
async fn delivered_retry_never_reappears() {
    let h = harness(EngineConfig::default());
    block_everything(&h);
    h.orchestrator.send(sample_event("once")).await;
    h.canonical.set_fallback(Ok(lastmile::Receipt::Status(204)));

    assert_eq!(h.scheduler.flush_pending().await, 1);
    assert_eq!(h.scheduler.flush_pending().await, 0);
    assert_eq!(h.canonical.calls(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_flushes_never_double_process() {
    let config = EngineConfig { retry_pause: Duration::from_millis(5), ..EngineConfig::default() };
    let alternate = ScriptedTransport::accepting();
    let chain = Arc::new(TransportChain::standard(
        Arc::new(alternate.clone()),
        Arc::new(ScriptedTransport::accepting()),
        Arc::new(ScriptedTransport::accepting()),
    ));
    let store = DurableQueueStore::new(Arc::new(MemoryBackend::new()), &config);
    for i in 0..10 {
        store.enqueue(sample_event(&format!("e{}", i))).await;
    }
    let scheduler = RetryScheduler::new(chain, store.clone(), &config);

    let a = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.flush_pending().await }
    });
    let b = tokio::spawn({
        let scheduler = scheduler.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            scheduler.flush_pending().await
        }
    });
    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    assert_eq!(a + b, 10);
    assert!(a == 0 || b == 0, "one of the calls must have been coalesced");
    assert_eq!(alternate.calls(), 10);
    assert_eq!(store.count().await, 0);
}

#[tokio::test]
async fn burst_from_one_source_reaches_pending_once() {
    let h = harness(EngineConfig::default());
    let intake = EventIntake::with_parts(
        h.orchestrator.clone(),
        &EngineConfig::default(),
        Arc::new(h.clock.clone()),
        Arc::new(InstantSleeper),
    );

    for _ in 0..20 {
        intake.submit_keyed("button#add-to-cart", sample_event("click"));
        h.clock.advance(Duration::from_millis(10));
    }

    assert_eq!(intake.pending_len(), 1);
    assert_eq!(intake.suppressed(), 19);
    assert_eq!(intake.flush().await, 1);
    assert_eq!(h.alternate.calls(), 1);
}

#[tokio::test]
async fn blocked_chain_fixture_persists_every_event() {
    let config = EngineConfig::default();
    let store = DurableQueueStore::new(Arc::new(MemoryBackend::new()), &config);
    let orchestrator = DeliveryOrchestrator::new(Arc::new(blocked_chain()), store.clone());
    for i in 0..4 {
        orchestrator.send(sample_event(&format!("e{}", i))).await;
    }
    assert_eq!(store.count().await, 4);
}
