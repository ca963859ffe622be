//! End-to-end audit of run-as denials through the index trail.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use http::StatusCode;
use serde_json::Value;
use vigil_audit::index_name::{INDEX_NAME_PREFIX, Rollover, resolve_range};
use vigil_audit::prelude::*;
use vigil_test_utils::{SearchCall, SecurityHarness, await_drained, init_test_logging};

async fn audited_harness() -> (SecurityHarness, Arc<ObjectIndexStore>) {
    init_test_logging();
    let store = Arc::new(ObjectIndexStore::in_memory());
    let settings = AuditSettings::from_env_with(|key| {
        let value = match key {
            "VIGIL_AUDIT_ENABLED" => Some("true"),
            "VIGIL_AUDIT_OUTPUTS" => Some("index"),
            "VIGIL_AUDIT_INDEX_EVENTS_INCLUDE" => {
                Some("access_denied,authentication_failed,run_as_denied")
            }
            "VIGIL_AUDIT_INDEX_FLUSH_INTERVAL_MS" => Some("50"),
            _ => None,
        };
        value.map(str::to_string)
    })
    .unwrap();

    let audit = AuditTrailService::from_settings(&settings, store.clone(), "node-0").unwrap();
    audit.start().await.unwrap();
    (SecurityHarness::run_as_fixture(audit), store)
}

async fn audit_events(
    harness: &SecurityHarness,
    store: &ObjectIndexStore,
    since: DateTime<Utc>,
) -> Vec<Value> {
    let trail = &harness.audit().index_trails()[0];
    assert!(
        await_drained(trail, Duration::from_secs(10)).await,
        "audit queue never drained"
    );

    // an event recorded just before midnight lands in yesterday's index
    let indices = resolve_range(INDEX_NAME_PREFIX, since, Utc::now(), Rollover::Daily);
    for index in &indices {
        let _ = store.refresh(index).await;
    }
    let request = SearchRequest::new(indices)
        .size(1000)
        .ignore_unavailable(true);
    ScrollHelper::fetch_all_by_entity(store, request, |hit| {
        Ok(hit.source.expect("source requested"))
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn run_as_user_without_privilege_is_audited_as_access_denied() {
    let (harness, store) = audited_harness().await;
    let since = Utc::now();

    let status = harness.search(
        &SearchCall::new([".security"])
            .basic_auth("http_user", "http_pass")
            .run_as("exec_user"),
    );
    assert_eq!(status, StatusCode::FORBIDDEN);

    let events = audit_events(&harness, &store, since).await;
    assert_eq!(events.len(), 1, "events: {events:?}");
    let event = &events[0];
    assert_eq!(event[Field::TYPE], "access_denied");
    assert!(
        event[Field::INDICES]
            .as_array()
            .unwrap()
            .contains(&Value::from(".security"))
    );
    assert_eq!(event[Field::PRINCIPAL], "exec_user");
    assert_eq!(event[Field::RUN_BY_PRINCIPAL], "http_user");

    harness.audit().stop().await.unwrap();
}

#[tokio::test]
async fn empty_run_as_header_is_audited_as_run_as_denied() {
    let (harness, store) = audited_harness().await;
    let since = Utc::now();

    let status = harness.search(
        &SearchCall::new([".security"])
            .basic_auth("http_user", "http_pass")
            .run_as(""),
    );
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let events = audit_events(&harness, &store, since).await;
    assert_eq!(events.len(), 1, "events: {events:?}");
    let event = &events[0];
    assert_eq!(event[Field::TYPE], "run_as_denied");
    assert_eq!(event[Field::PRINCIPAL], "");
    assert_eq!(event[Field::RUN_BY_PRINCIPAL], "http_user");

    harness.audit().stop().await.unwrap();
}

#[tokio::test]
async fn granted_requests_are_not_indexed_when_excluded() {
    let (harness, store) = audited_harness().await;
    let since = Utc::now();

    let status = harness.search(
        &SearchCall::new(["logs-2024"])
            .basic_auth("http_user", "http_pass")
            .run_as("exec_user"),
    );
    assert_eq!(status, StatusCode::OK);

    let denied = harness.search(&SearchCall::new(["logs-2024"]).basic_auth("nobody", "x"));
    assert_eq!(denied, StatusCode::UNAUTHORIZED);

    let events = audit_events(&harness, &store, since).await;
    let types: Vec<&str> = events
        .iter()
        .map(|e| e[Field::TYPE].as_str().unwrap())
        .collect();
    assert_eq!(types, vec!["authentication_failed"]);

    harness.audit().stop().await.unwrap();
}
