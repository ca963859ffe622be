//! Searchable document store for audit indices.
//!
//! [`IndexStore`] is the contract the audit trail writes to and the scroll
//! helper reads from. [`ObjectIndexStore`] implements it on top of any
//! [`StorageBackend`]:
//!
//! ```text
//! indices/{index}/_index.json          index marker (IndexMeta)
//! indices/{index}/docs/{doc_id}.json   one document per audit event
//! ```
//!
//! Documents are written with a `DoesNotExist` precondition, so the store is
//! append-only and replays of the same document id are harmless. Document
//! ids are ULIDs, which makes path order chronological order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use ulid::Ulid;

use vigil_core::storage::{MemoryBackend, StorageBackend, WritePrecondition, WriteResult};

use crate::error::{AuditError, Result};
use crate::index_name::DOC_TYPE;

/// Default page size of a search.
pub const DEFAULT_SEARCH_SIZE: usize = 10;

/// A document query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Query {
    /// Matches every document.
    #[default]
    MatchAll,
    /// Field equals value; for array fields, the array contains value.
    Term {
        /// Document key.
        field: String,
        /// Expected value.
        value: String,
    },
    /// Field matches any of the values.
    Terms {
        /// Document key.
        field: String,
        /// Accepted values.
        values: Vec<String>,
    },
    /// Every sub-query matches.
    All(Vec<Query>),
}

impl Query {
    /// Creates a term query.
    #[must_use]
    pub fn term(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Returns true if `document` satisfies the query.
    #[must_use]
    pub fn matches(&self, document: &Value) -> bool {
        match self {
            Self::MatchAll => true,
            Self::Term { field, value } => field_matches(document.get(field), &|v| v == value),
            Self::Terms { field, values } => {
                field_matches(document.get(field), &|v| values.iter().any(|x| x == v))
            }
            Self::All(queries) => queries.iter().all(|q| q.matches(document)),
        }
    }
}

fn field_matches(field: Option<&Value>, accept: &dyn Fn(&str) -> bool) -> bool {
    match field {
        Some(Value::String(s)) => accept(s),
        Some(Value::Array(items)) => items.iter().any(|item| field_matches(Some(item), accept)),
        Some(Value::Number(n)) => accept(&n.to_string()),
        Some(Value::Bool(b)) => accept(if *b { "true" } else { "false" }),
        _ => false,
    }
}

/// A search over one or more indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    /// Indices to search.
    pub indices: Vec<String>,
    /// Document filter.
    pub query: Query,
    /// Page size.
    pub size: usize,
    /// Whether hits carry their source document.
    pub fetch_source: bool,
    /// Keep-alive of a scroll context; `None` disables scrolling.
    pub scroll: Option<Duration>,
    /// Skip missing indices instead of failing.
    pub ignore_unavailable: bool,
}

impl SearchRequest {
    /// Creates a match-all request over `indices`.
    #[must_use]
    pub fn new<I, S>(indices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            indices: indices.into_iter().map(Into::into).collect(),
            query: Query::MatchAll,
            size: DEFAULT_SEARCH_SIZE,
            fetch_source: true,
            scroll: None,
            ignore_unavailable: false,
        }
    }

    /// Sets the query.
    #[must_use]
    pub fn query(mut self, query: Query) -> Self {
        self.query = query;
        self
    }

    /// Sets the page size.
    #[must_use]
    pub const fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Sets whether hits carry their source.
    #[must_use]
    pub const fn fetch_source(mut self, fetch_source: bool) -> Self {
        self.fetch_source = fetch_source;
        self
    }

    /// Opens a scroll context with the given keep-alive.
    #[must_use]
    pub const fn scroll(mut self, keep_alive: Duration) -> Self {
        self.scroll = Some(keep_alive);
        self
    }

    /// Skips missing indices.
    #[must_use]
    pub const fn ignore_unavailable(mut self, ignore: bool) -> Self {
        self.ignore_unavailable = ignore;
        self
    }
}

/// One matching document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    /// Index holding the document.
    pub index: String,
    /// Document id.
    pub id: String,
    /// Document body, when requested.
    pub source: Option<Value>,
}

/// A page of search results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResponse {
    /// Number of documents matching the query across all pages.
    pub total_hits: usize,
    /// Hits of this page.
    pub hits: Vec<SearchHit>,
    /// Cursor for the next page, when scrolling.
    pub scroll_id: Option<String>,
}

/// Outcome of a bulk write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkResponse {
    /// Documents newly written.
    pub created: usize,
    /// Documents whose id already existed (left untouched).
    pub duplicates: usize,
}

/// Marker stored for every index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMeta {
    /// Index name.
    pub name: String,
    /// Document type held by the index.
    pub doc_type: String,
    /// When the index was created.
    pub created_at: DateTime<Utc>,
}

/// Searchable, append-only document store.
#[async_trait]
pub trait IndexStore: Send + Sync + 'static {
    /// Creates an index. Returns true if it did not exist before.
    async fn create_index(&self, index: &str) -> Result<bool>;

    /// Returns true if the index exists.
    async fn index_exists(&self, index: &str) -> Result<bool>;

    /// Lists index names starting with `prefix`, sorted.
    async fn list_indices(&self, prefix: &str) -> Result<Vec<String>>;

    /// Writes documents. Existing ids are left untouched and counted as
    /// duplicates. Creates the index if needed.
    async fn bulk_index(&self, index: &str, documents: Vec<(String, Value)>)
    -> Result<BulkResponse>;

    /// Makes written documents searchable.
    ///
    /// Returns `IndexNotFound` if the index does not exist.
    async fn refresh(&self, index: &str) -> Result<()>;

    /// Runs a search, opening a scroll context if requested.
    async fn search(&self, request: SearchRequest) -> Result<SearchResponse>;

    /// Fetches the next page of a scroll and extends its keep-alive.
    async fn scroll(&self, scroll_id: &str, keep_alive: Duration) -> Result<SearchResponse>;

    /// Releases a scroll context. Unknown ids are ignored.
    async fn clear_scroll(&self, scroll_id: &str) -> Result<()>;
}

/// Validates an index name.
///
/// # Errors
///
/// Returns `InvalidIndexName` describing the first violated rule.
pub fn validate_index_name(index: &str) -> Result<()> {
    let reject = |reason| {
        Err(AuditError::InvalidIndexName {
            index: index.to_string(),
            reason,
        })
    };
    if index.is_empty() {
        return reject("must not be empty");
    }
    if index == "." || index == ".." {
        return reject("must not be '.' or '..'");
    }
    if index.starts_with(['-', '_', '+']) {
        return reject("must not start with '-', '_' or '+'");
    }
    if index
        .chars()
        .any(|c| matches!(c, '/' | '\\' | '*' | '?' | '"' | '<' | '>' | '|' | ' ' | ',' | '#'))
    {
        return reject("must not contain '/', '\\', '*', '?', '\"', '<', '>', '|', ' ', ',' or '#'");
    }
    if index.chars().any(char::is_uppercase) {
        return reject("must be lowercase");
    }
    Ok(())
}

fn validate_doc_id(id: &str) -> Result<()> {
    if id.is_empty()
        || !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(AuditError::InvalidDocumentId { id: id.to_string() });
    }
    Ok(())
}

fn marker_path(index: &str) -> String {
    format!("indices/{index}/_index.json")
}

fn docs_prefix(index: &str) -> String {
    format!("indices/{index}/docs/")
}

#[derive(Debug)]
struct ScrollContext {
    hits: Vec<SearchHit>,
    position: usize,
    page_size: usize,
    expires_at: Instant,
}

impl ScrollContext {
    fn next_page(&mut self) -> Vec<SearchHit> {
        let end = (self.position + self.page_size).min(self.hits.len());
        let page = self.hits[self.position..end].to_vec();
        self.position = end;
        page
    }
}

/// [`IndexStore`] backed by object storage.
pub struct ObjectIndexStore {
    backend: Arc<dyn StorageBackend>,
    scrolls: Mutex<HashMap<String, ScrollContext>>,
}

impl std::fmt::Debug for ObjectIndexStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectIndexStore").finish_non_exhaustive()
    }
}

impl ObjectIndexStore {
    /// Creates a store over `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            scrolls: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a store over a fresh [`MemoryBackend`].
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Returns the number of open scroll contexts.
    #[must_use]
    pub fn open_scrolls(&self) -> usize {
        self.scrolls.lock().map(|s| s.len()).unwrap_or(0)
    }

    fn scrolls(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, ScrollContext>>> {
        self.scrolls
            .lock()
            .map_err(|_| AuditError::storage("scroll registry lock poisoned"))
    }

    async fn collect_hits(&self, index: &str, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        let prefix = docs_prefix(index);
        let mut paths: Vec<String> = self
            .backend
            .list(&prefix)
            .await?
            .into_iter()
            .map(|meta| meta.path)
            .filter(|p| p.ends_with(".json"))
            .collect();
        paths.sort();

        let mut hits = Vec::new();
        for path in paths {
            let data = self.backend.get(&path).await?;
            let source: Value = serde_json::from_slice(&data)?;
            if !request.query.matches(&source) {
                continue;
            }
            let id = path
                .strip_prefix(&prefix)
                .and_then(|p| p.strip_suffix(".json"))
                .unwrap_or_default()
                .to_string();
            hits.push(SearchHit {
                index: index.to_string(),
                id,
                source: request.fetch_source.then_some(source),
            });
        }
        Ok(hits)
    }
}

#[async_trait]
impl IndexStore for ObjectIndexStore {
    async fn create_index(&self, index: &str) -> Result<bool> {
        validate_index_name(index)?;
        let meta = IndexMeta {
            name: index.to_string(),
            doc_type: DOC_TYPE.to_string(),
            created_at: Utc::now(),
        };
        let body = serde_json::to_vec(&meta)?;
        let result = self
            .backend
            .put(
                &marker_path(index),
                Bytes::from(body),
                WritePrecondition::DoesNotExist,
            )
            .await?;
        match result {
            WriteResult::Success { .. } => {
                tracing::info!(index, "created audit index");
                Ok(true)
            }
            WriteResult::PreconditionFailed { .. } => Ok(false),
        }
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        validate_index_name(index)?;
        Ok(self.backend.head(&marker_path(index)).await?.is_some())
    }

    async fn list_indices(&self, prefix: &str) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .backend
            .list("indices/")
            .await?
            .into_iter()
            .filter_map(|meta| {
                meta.path
                    .strip_prefix("indices/")
                    .and_then(|rest| rest.strip_suffix("/_index.json"))
                    .map(str::to_string)
            })
            .filter(|name| name.starts_with(prefix))
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn bulk_index(
        &self,
        index: &str,
        documents: Vec<(String, Value)>,
    ) -> Result<BulkResponse> {
        self.create_index(index).await?;

        let mut response = BulkResponse::default();
        for (id, document) in documents {
            validate_doc_id(&id)?;
            let body = serde_json::to_vec(&document)?;
            let path = format!("{}{id}.json", docs_prefix(index));
            match self
                .backend
                .put(&path, Bytes::from(body), WritePrecondition::DoesNotExist)
                .await?
            {
                WriteResult::Success { .. } => response.created += 1,
                WriteResult::PreconditionFailed { .. } => {
                    tracing::debug!(index, id, "duplicate audit document (already exists)");
                    response.duplicates += 1;
                }
            }
        }
        Ok(response)
    }

    async fn refresh(&self, index: &str) -> Result<()> {
        // writes are visible once bulk_index returns; only existence matters
        if self.index_exists(index).await? {
            Ok(())
        } else {
            Err(AuditError::IndexNotFound {
                index: index.to_string(),
            })
        }
    }

    async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        let mut hits = Vec::new();
        for index in &request.indices {
            if !self.index_exists(index).await? {
                if request.ignore_unavailable {
                    continue;
                }
                return Err(AuditError::IndexNotFound {
                    index: index.clone(),
                });
            }
            hits.extend(self.collect_hits(index, &request).await?);
        }
        let total_hits = hits.len();
        let page_size = request.size.max(1);

        let Some(keep_alive) = request.scroll else {
            hits.truncate(request.size);
            return Ok(SearchResponse {
                total_hits,
                hits,
                scroll_id: None,
            });
        };

        let mut context = ScrollContext {
            hits,
            position: 0,
            page_size,
            expires_at: Instant::now() + keep_alive,
        };
        let page = context.next_page();
        let scroll_id = Ulid::new().to_string();

        let mut scrolls = self.scrolls()?;
        let now = Instant::now();
        scrolls.retain(|_, ctx| ctx.expires_at > now);
        scrolls.insert(scroll_id.clone(), context);
        drop(scrolls);

        Ok(SearchResponse {
            total_hits,
            hits: page,
            scroll_id: Some(scroll_id),
        })
    }

    async fn scroll(&self, scroll_id: &str, keep_alive: Duration) -> Result<SearchResponse> {
        let mut scrolls = self.scrolls()?;
        let now = Instant::now();
        let expired = scrolls.get(scroll_id).is_some_and(|ctx| ctx.expires_at <= now);
        if expired {
            scrolls.remove(scroll_id);
        }
        let context = scrolls
            .get_mut(scroll_id)
            .ok_or_else(|| AuditError::ScrollNotFound {
                scroll_id: scroll_id.to_string(),
            })?;

        context.expires_at = now + keep_alive;
        let hits = context.next_page();
        let total_hits = context.hits.len();
        drop(scrolls);

        Ok(SearchResponse {
            total_hits,
            hits,
            scroll_id: Some(scroll_id.to_string()),
        })
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<()> {
        self.scrolls()?.remove(scroll_id);
        Ok(())
    }
}
