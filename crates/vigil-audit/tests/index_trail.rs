//! Index trail behavior against object storage with injected failures.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use vigil_audit::event::{AuditLayer, OriginType};
use vigil_audit::index_name::resolve;
use vigil_audit::metrics::{EVENTS_DROPPED, EVENTS_ENQUEUED, EVENTS_WRITTEN};
use vigil_audit::prelude::*;
use vigil_test_utils::{CapturingRecorder, FailingBackend, await_drained, init_test_logging};

fn settings(prefix: &str) -> IndexSettings {
    IndexSettings {
        prefix: prefix.to_string(),
        bulk_size: 8,
        queue_max_size: 1000,
        flush_interval_ms: 20,
        retry_backoff_ms: 5,
        ..IndexSettings::default()
    }
}

fn event(event_type: AuditEventType, ts: DateTime<Utc>) -> AuditEvent {
    AuditEvent::builder()
        .event_type(event_type)
        .layer(AuditLayer::Transport)
        .timestamp(ts)
        .node_name("node-0")
        .principal("alice")
        .try_build()
        .unwrap()
}

async fn all_hits(store: &ObjectIndexStore, prefix: &str) -> Vec<SearchHit> {
    let indices = store.list_indices(prefix).await.unwrap();
    ScrollHelper::fetch_all_by_entity(store, SearchRequest::new(indices).size(100), Ok)
        .await
        .unwrap()
}

#[tokio::test]
async fn every_event_lands_in_its_rollover_index() {
    init_test_logging();
    let store = Arc::new(ObjectIndexStore::in_memory());
    let trail = IndexAuditTrail::new(
        store.clone(),
        IndexSettings {
            rollover: Rollover::Hourly,
            ..settings("hourly")
        },
        "node-0",
    )
    .unwrap();
    trail.start().await.unwrap();

    let base = Utc.with_ymd_and_hms(2024, 2, 29, 22, 15, 0).unwrap();
    let timestamps: Vec<_> = (0..12)
        .map(|n| base + chrono::Duration::minutes(20 * n))
        .collect();
    for ts in &timestamps {
        assert!(trail.enqueue(event(AuditEventType::AccessDenied, *ts)));
    }
    assert!(await_drained(&trail, Duration::from_secs(10)).await);

    let hits = all_hits(&store, "hourly-2024").await;
    assert_eq!(hits.len(), timestamps.len());

    let mut per_index: HashMap<String, usize> = HashMap::new();
    for hit in &hits {
        let recorded = AuditEvent::from_document(hit.source.clone().unwrap()).unwrap();
        assert_eq!(hit.index, resolve("hourly", recorded.timestamp, Rollover::Hourly));
        *per_index.entry(hit.index.clone()).or_default() += 1;
    }
    let expected: BTreeSet<String> = timestamps
        .iter()
        .map(|ts| resolve("hourly", *ts, Rollover::Hourly))
        .collect();
    assert_eq!(per_index.keys().cloned().collect::<BTreeSet<_>>(), expected);

    let ids: BTreeSet<&str> = hits.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(ids.len(), hits.len());

    trail.stop().await.unwrap();
}

#[tokio::test]
async fn transient_failures_within_budget_persist_each_event_once() {
    init_test_logging();
    let backend = FailingBackend::new();
    let store = Arc::new(ObjectIndexStore::new(Arc::new(backend.clone())));
    let trail = IndexAuditTrail::new(store.clone(), settings("retry"), "node-0").unwrap();
    trail.start().await.unwrap();

    // some documents of the first attempt are written before it fails
    backend.fail_puts_after(3, 2);
    let ts = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    for _ in 0..6 {
        trail.enqueue(event(AuditEventType::AccessDenied, ts));
    }
    assert!(await_drained(&trail, Duration::from_secs(10)).await);

    assert_eq!(backend.injected_failures(), 2);
    let hits = all_hits(&store, "retry-").await;
    assert_eq!(hits.len(), 6);
    assert!(hits.iter().all(|h| h.index == "retry-2024.06.01"));
    let ids: BTreeSet<&str> = hits.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(ids.len(), 6);

    trail.stop().await.unwrap();
}

#[tokio::test]
async fn persistent_failure_drops_batch_and_trail_keeps_running() {
    init_test_logging();
    let backend = FailingBackend::new();
    let store = Arc::new(ObjectIndexStore::new(Arc::new(backend.clone())));
    let trail = IndexAuditTrail::new(
        store.clone(),
        IndexSettings {
            max_retries: 1,
            ..settings("outage")
        },
        "node-0",
    )
    .unwrap();
    trail.start().await.unwrap();

    backend.fail_all(true);
    let lost = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    trail.enqueue(event(AuditEventType::AccessDenied, lost));
    assert!(await_drained(&trail, Duration::from_secs(10)).await);
    backend.fail_all(false);

    let kept = Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap();
    trail.enqueue(event(AuditEventType::AccessDenied, kept));
    assert!(await_drained(&trail, Duration::from_secs(10)).await);

    let hits = all_hits(&store, "outage-2024").await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].index, "outage-2024.06.02");
    assert_eq!(trail.state(), TrailState::Started);

    trail.stop().await.unwrap();
}

#[tokio::test]
async fn excluded_types_are_never_persisted() {
    init_test_logging();
    let store = Arc::new(ObjectIndexStore::in_memory());
    let trail = Arc::new(
        IndexAuditTrail::new(
            store.clone(),
            IndexSettings {
                events: EventFilter {
                    include: vec![
                        AuditEventType::AccessDenied,
                        AuditEventType::AccessGranted,
                        AuditEventType::ConnectionDenied,
                    ],
                    exclude: vec![AuditEventType::AccessGranted],
                },
                ..settings("filtered")
            },
            "node-0",
        )
        .unwrap(),
    );
    let service = AuditTrailService::new("node-0").with_index_trail(trail.clone());
    service.start().await.unwrap();

    let auth = Authentication::new(User::new("alice", "native"));
    let request = RequestInfo::transport(
        "indices:data/read/get",
        "GetRequest",
        OriginType::Transport,
        "10.0.0.2:9300",
    )
    .with_indices(["logs"]);
    for _ in 0..3 {
        service.access_granted(&auth, &request);
    }
    service.access_denied(&auth, &request);
    service.connection_denied("10.9.9.9:9300", "default", "deny all");
    service.connection_granted("10.0.0.1:9300", "default", "allow 10.0.0.0/24");
    assert!(await_drained(&trail, Duration::from_secs(10)).await);

    let types: BTreeSet<String> = all_hits(&store, "filtered-")
        .await
        .into_iter()
        .map(|h| h.source.unwrap()[Field::TYPE].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        types,
        BTreeSet::from(["access_denied".to_string(), "connection_denied".to_string()])
    );

    service.stop().await.unwrap();
}

#[tokio::test]
async fn full_queue_drops_events_without_blocking() {
    init_test_logging();
    let store = Arc::new(ObjectIndexStore::in_memory());
    let trail = IndexAuditTrail::new(
        store.clone(),
        IndexSettings {
            queue_max_size: 10,
            bulk_size: 10,
            ..settings("bounded")
        },
        "node-0",
    )
    .unwrap();

    let ts = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    let started = Instant::now();
    let accepted = (0..500)
        .filter(|_| trail.enqueue(event(AuditEventType::AccessDenied, ts)))
        .count();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(accepted, 10);
    assert_eq!(trail.pending(), 10);

    trail.start().await.unwrap();
    assert!(await_drained(&trail, Duration::from_secs(10)).await);
    assert_eq!(all_hits(&store, "bounded-2024").await.len(), 10);

    trail.stop().await.unwrap();
    assert!(!trail.enqueue(event(AuditEventType::AccessDenied, ts)));
}

#[test]
fn dropped_events_are_counted_by_reason() {
    init_test_logging();
    let recorder = CapturingRecorder::default();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    metrics::with_local_recorder(&recorder, || {
        runtime.block_on(async {
            let backend = FailingBackend::new();
            let store = Arc::new(ObjectIndexStore::new(Arc::new(backend.clone())));
            let trail = IndexAuditTrail::new(
                store,
                IndexSettings {
                    queue_max_size: 2,
                    bulk_size: 2,
                    max_retries: 1,
                    ..settings("counted")
                },
                "node-0",
            )
            .unwrap();

            let ts = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
            let accepted = (0..5)
                .filter(|_| trail.enqueue(event(AuditEventType::AccessDenied, ts)))
                .count();
            assert_eq!(accepted, 2);

            // the first attempt and its single retry both fail
            backend.fail_next_puts(2);
            trail.stop().await.unwrap();
            assert_eq!(backend.injected_failures(), 2);
            assert!(!trail.enqueue(event(AuditEventType::AccessDenied, ts)));
        });
    });

    assert_eq!(recorder.counter(EVENTS_ENQUEUED, &[("type", "access_denied")]), 2);
    assert_eq!(recorder.counter(EVENTS_DROPPED, &[("reason", "queue_full")]), 3);
    assert_eq!(recorder.counter(EVENTS_DROPPED, &[("reason", "retries_exhausted")]), 2);
    assert_eq!(recorder.counter(EVENTS_DROPPED, &[("reason", "not_running")]), 1);
    assert_eq!(recorder.counter_total(EVENTS_WRITTEN), 0);
}

#[test]
fn building_the_service_describes_audit_metrics() {
    let recorder = CapturingRecorder::default();
    let settings = AuditSettings {
        enabled: true,
        outputs: vec![AuditOutput::Index],
        ..AuditSettings::default()
    };
    let service = metrics::with_local_recorder(&recorder, || {
        AuditTrailService::from_settings(
            &settings,
            Arc::new(ObjectIndexStore::in_memory()),
            "node-0",
        )
    })
    .unwrap();

    assert!(service.is_enabled());
    assert!(recorder.is_described(EVENTS_ENQUEUED));
    assert!(recorder.is_described(EVENTS_DROPPED));
    assert!(recorder.is_described(EVENTS_WRITTEN));
}
