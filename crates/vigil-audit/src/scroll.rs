//! Exhaustive search through scroll contexts.

use std::time::Duration;

use crate::error::Result;
use crate::store::{IndexStore, SearchHit, SearchRequest};

/// Keep-alive used when the request does not set one.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Collects every hit of a search, page by page.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScrollHelper;

impl ScrollHelper {
    /// Runs `request` and maps every matching hit with `mapper`.
    ///
    /// Pages are fetched until one comes back empty or `total_hits` hits
    /// have been collected. The scroll context is released before
    /// returning, including when a page or the mapper fails; in that case
    /// the first error is returned.
    ///
    /// # Errors
    ///
    /// Returns the first search, scroll or mapping error.
    pub async fn fetch_all_by_entity<S, T, F>(
        store: &S,
        mut request: SearchRequest,
        mut mapper: F,
    ) -> Result<Vec<T>>
    where
        S: IndexStore + ?Sized,
        F: FnMut(SearchHit) -> Result<T>,
    {
        let keep_alive = *request.scroll.get_or_insert(DEFAULT_KEEP_ALIVE);
        let first = store.search(request).await?;

        let Some(scroll_id) = first.scroll_id.clone() else {
            return first.hits.into_iter().map(mapper).collect();
        };

        let collected = Self::drain(store, first, &scroll_id, keep_alive, &mut mapper).await;
        let cleared = store.clear_scroll(&scroll_id).await;

        match (collected, cleared) {
            (Err(err), cleared) => {
                if let Err(clear_err) = cleared {
                    tracing::warn!(scroll_id, error = %clear_err, "failed to clear scroll context");
                }
                Err(err)
            }
            (Ok(results), Err(clear_err)) => {
                tracing::warn!(scroll_id, error = %clear_err, "failed to clear scroll context");
                Ok(results)
            }
            (Ok(results), Ok(())) => Ok(results),
        }
    }

    async fn drain<S, T, F>(
        store: &S,
        first: crate::store::SearchResponse,
        scroll_id: &str,
        keep_alive: Duration,
        mapper: &mut F,
    ) -> Result<Vec<T>>
    where
        S: IndexStore + ?Sized,
        F: FnMut(SearchHit) -> Result<T>,
    {
        let total = first.total_hits;
        let mut results = Vec::with_capacity(total);
        let mut page = first.hits;

        loop {
            if page.is_empty() {
                break;
            }
            for hit in page {
                results.push(mapper(hit)?);
            }
            if results.len() >= total {
                break;
            }
            page = store.scroll(scroll_id, keep_alive).await?.hits;
        }

        tracing::debug!(scroll_id, hits = results.len(), total, "scroll drained");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuditError;
    use crate::store::{ObjectIndexStore, Query};
    use serde_json::json;
    use ulid::Ulid;

    async fn store_with(count: usize) -> ObjectIndexStore {
        let store = ObjectIndexStore::in_memory();
        let docs = (0..count)
            .map(|n| {
                let kind = if n % 2 == 0 { "access_denied" } else { "access_granted" };
                (Ulid::new().to_string(), json!({ "type": kind, "n": n }))
            })
            .collect();
        store.bulk_index("audit", docs).await.unwrap();
        store
    }

    #[tokio::test]
    async fn collects_more_hits_than_one_page() {
        let store = store_with(25).await;
        let request = SearchRequest::new(["audit"]).size(4);

        let ids = ScrollHelper::fetch_all_by_entity(&store, request, |hit| Ok(hit.id))
            .await
            .unwrap();

        assert_eq!(ids.len(), 25);
        assert_eq!(store.open_scrolls(), 0);
    }

    #[tokio::test]
    async fn applies_query_filter() {
        let store = store_with(10).await;
        let request = SearchRequest::new(["audit"])
            .size(3)
            .query(Query::term("type", "access_denied"));

        let kinds = ScrollHelper::fetch_all_by_entity(&store, request, |hit| {
            Ok(hit.source.unwrap()["type"].as_str().unwrap().to_string())
        })
        .await
        .unwrap();

        assert_eq!(kinds.len(), 5);
        assert!(kinds.iter().all(|k| k == "access_denied"));
    }

    #[tokio::test]
    async fn empty_result_still_clears_context() {
        let store = ObjectIndexStore::in_memory();
        store.create_index("audit").await.unwrap();

        let hits = ScrollHelper::fetch_all_by_entity(&store, SearchRequest::new(["audit"]), Ok)
            .await
            .unwrap();

        assert!(hits.is_empty());
        assert_eq!(store.open_scrolls(), 0);
    }

    #[tokio::test]
    async fn mapper_error_clears_context() {
        let store = store_with(6).await;
        let request = SearchRequest::new(["audit"]).size(2);

        let mut seen = 0;
        let err = ScrollHelper::fetch_all_by_entity(&store, request, |_hit| {
            seen += 1;
            if seen == 3 {
                Err(AuditError::InvalidEvent { field: "type" })
            } else {
                Ok(())
            }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, AuditError::InvalidEvent { .. }));
        assert_eq!(store.open_scrolls(), 0);
    }

    #[tokio::test]
    async fn missing_index_is_reported() {
        let store = ObjectIndexStore::in_memory();
        let err = ScrollHelper::fetch_all_by_entity(&store, SearchRequest::new(["gone"]), Ok)
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::IndexNotFound { .. }));
    }
}
