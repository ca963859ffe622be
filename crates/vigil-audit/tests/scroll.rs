//! Scrolling through result sets larger than one page.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::json;
use ulid::Ulid;
use vigil_audit::prelude::*;
use vigil_core::LocalFsBackend;

async fn seed(store: &ObjectIndexStore, index: &str, count: usize) {
    let docs = (0..count)
        .map(|n| {
            let kind = if n % 3 == 0 { "run_as_denied" } else { "access_denied" };
            (
                Ulid::new().to_string(),
                json!({ "type": kind, "principal": format!("user-{n}"), "indices": ["logs"] }),
            )
        })
        .collect();
    store.bulk_index(index, docs).await.unwrap();
}

#[tokio::test]
async fn scroll_returns_every_hit_beyond_the_page_size() {
    let store = ObjectIndexStore::in_memory();
    seed(&store, "audit-2024.01.01", 1500).await;
    seed(&store, "audit-2024.01.02", 1200).await;

    let request = SearchRequest::new(["audit-2024.01.01", "audit-2024.01.02"]).size(1000);
    let principals = ScrollHelper::fetch_all_by_entity(&store, request, |hit| {
        Ok(hit.source.unwrap()[Field::PRINCIPAL].as_str().unwrap().to_string())
    })
    .await
    .unwrap();

    assert_eq!(principals.len(), 2700);
    assert_eq!(store.open_scrolls(), 0);
}

#[tokio::test]
async fn scroll_respects_query_and_default_page_size() {
    let store = ObjectIndexStore::in_memory();
    seed(&store, "audit-2024.01.01", 95).await;

    let request = SearchRequest::new(["audit-2024.01.01"])
        .query(Query::term(Field::TYPE, "run_as_denied"));
    assert_eq!(request.size, 10);

    let ids = ScrollHelper::fetch_all_by_entity(&store, request, |hit| Ok(hit.id))
        .await
        .unwrap();
    assert_eq!(ids.len(), 32);
    assert_eq!(ids.iter().collect::<BTreeSet<_>>().len(), 32);
    assert_eq!(store.open_scrolls(), 0);
}

#[tokio::test]
async fn scroll_over_local_filesystem() {
    let dir = tempfile::tempdir().unwrap();
    let backend = LocalFsBackend::open(dir.path()).unwrap();
    let store = ObjectIndexStore::new(Arc::new(backend));
    seed(&store, "audit-2024.01.01", 40).await;

    let reopened = ObjectIndexStore::new(Arc::new(LocalFsBackend::open(dir.path()).unwrap()));
    let hits = ScrollHelper::fetch_all_by_entity(
        &reopened,
        SearchRequest::new(["audit-2024.01.01"]).size(7),
        Ok,
    )
    .await
    .unwrap();

    assert_eq!(hits.len(), 40);
    assert_eq!(
        reopened.list_indices(".").await.unwrap(),
        Vec::<String>::new()
    );
    assert_eq!(
        reopened.list_indices("audit-").await.unwrap(),
        vec!["audit-2024.01.01"]
    );
}
