//! Search command - scroll through audit events.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::Args;
use owo_colors::OwoColorize;
use vigil_audit::event::{AuditEvent, AuditEventType, Field};
use vigil_audit::index_name::{Rollover, resolve_range};
use vigil_audit::scroll::ScrollHelper;
use vigil_audit::store::{IndexStore, Query, SearchRequest};

use crate::{Config, OutputFormat};

/// Arguments for the search command.
#[derive(Debug, Args)]
pub struct SearchArgs {
    /// Day to search (YYYY-MM-DD, UTC). Defaults to today.
    #[arg(long, conflicts_with_all = ["from", "to"])]
    pub date: Option<NaiveDate>,

    /// Start of the time range (RFC 3339 or YYYY-MM-DD).
    #[arg(long, requires = "to")]
    pub from: Option<String>,

    /// End of the time range, inclusive (RFC 3339 or YYYY-MM-DD).
    #[arg(long, requires = "from")]
    pub to: Option<String>,

    /// Only events of this type.
    #[arg(long = "type", value_name = "TYPE")]
    pub event_type: Option<AuditEventType>,

    /// Only events acting as this principal.
    #[arg(long)]
    pub principal: Option<String>,

    /// Scroll page size.
    #[arg(long, default_value = "1000")]
    pub size: usize,
}

/// Resolves the inclusive UTC time window of a search.
///
/// # Errors
///
/// Returns an error if a bound cannot be parsed or the range is inverted.
pub fn time_window(
    args: &SearchArgs,
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let (from, to) = match (&args.from, &args.to) {
        (Some(from), Some(to)) => (parse_bound(from, false)?, parse_bound(to, true)?),
        _ => {
            let day = args.date.unwrap_or_else(|| now.date_naive());
            (start_of_day(day), end_of_day(day))
        }
    };
    if to < from {
        bail!("--to ({to}) is before --from ({from})");
    }
    Ok((from, to))
}

fn start_of_day(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(NaiveTime::MIN).and_utc()
}

fn end_of_day(day: NaiveDate) -> DateTime<Utc> {
    start_of_day(day) + chrono::Duration::days(1) - chrono::Duration::milliseconds(1)
}

fn parse_bound(raw: &str, end: bool) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let day = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("invalid time bound '{raw}', expected RFC 3339 or YYYY-MM-DD"))?;
    Ok(if end { end_of_day(day) } else { start_of_day(day) })
}

/// Builds the document query for the filters.
#[must_use]
pub fn build_query(args: &SearchArgs) -> Query {
    let mut terms = Vec::new();
    if let Some(event_type) = args.event_type {
        terms.push(Query::term(Field::TYPE, event_type.name()));
    }
    if let Some(principal) = &args.principal {
        terms.push(Query::term(Field::PRINCIPAL, principal.clone()));
    }
    match terms.len() {
        0 => Query::MatchAll,
        1 => terms.remove(0),
        _ => Query::All(terms),
    }
}

/// Collects every matching event in the time window.
///
/// Events outside the window are dropped even if they share an index with
/// events inside it.
///
/// # Errors
///
/// Returns an error if the search fails or a document is not an audit event.
pub async fn collect(
    store: &dyn IndexStore,
    args: &SearchArgs,
    prefix: &str,
    rollover: Rollover,
    now: DateTime<Utc>,
) -> Result<Vec<AuditEvent>> {
    let (from, to) = time_window(args, now)?;
    let indices = resolve_range(prefix, from, to, rollover);
    tracing::debug!(?indices, %from, %to, "searching audit indices");

    let request = SearchRequest::new(indices)
        .query(build_query(args))
        .size(args.size.max(1))
        .ignore_unavailable(true);
    let events = ScrollHelper::fetch_all_by_entity(store, request, |hit| {
        let source = hit.source.unwrap_or_default();
        AuditEvent::from_document(source)
    })
    .await
    .context("audit search failed")?;

    Ok(events
        .into_iter()
        .filter(|e| e.timestamp >= from && e.timestamp <= to)
        .collect())
}

/// Execute the search command.
///
/// # Errors
///
/// Returns an error if the arguments are invalid or the search fails.
pub async fn execute(args: &SearchArgs, config: &Config) -> Result<()> {
    let store = config.open_store()?;
    let events = collect(&store, args, &config.prefix, config.rollover, Utc::now()).await?;

    match config.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&events)?);
        }
        OutputFormat::Text => {
            if events.is_empty() {
                println!("No audit events found");
                return Ok(());
            }
            for event in &events {
                let kind = if event.event_type.is_denial() {
                    event.event_type.name().red().to_string()
                } else {
                    event.event_type.name().green().to_string()
                };
                let mut line = format!(
                    "{} {kind} principal={}",
                    event.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ").dimmed(),
                    event.principal.as_deref().unwrap_or("-"),
                );
                if let Some(run_by) = &event.run_by_principal {
                    line.push_str(&format!(" run_by={run_by}"));
                }
                if let Some(indices) = &event.indices {
                    line.push_str(&format!(" indices={}", indices.join(",")));
                }
                if let Some(action) = event.action.as_deref().or(event.uri.as_deref()) {
                    line.push_str(&format!(" {action}"));
                }
                println!("{line}");
            }
        }
        OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct EventRow {
                #[tabled(rename = "Timestamp")]
                timestamp: String,
                #[tabled(rename = "Type")]
                event_type: String,
                #[tabled(rename = "Principal")]
                principal: String,
                #[tabled(rename = "Run By")]
                run_by: String,
                #[tabled(rename = "Indices")]
                indices: String,
            }

            let rows: Vec<_> = events
                .iter()
                .map(|e| EventRow {
                    timestamp: e.timestamp.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
                    event_type: e.event_type.to_string(),
                    principal: e.principal.clone().unwrap_or_default(),
                    run_by: e.run_by_principal.clone().unwrap_or_default(),
                    indices: e.indices.as_ref().map(|i| i.join(",")).unwrap_or_default(),
                })
                .collect();

            if rows.is_empty() {
                println!("No audit events found");
            } else {
                println!("{}", Table::new(rows));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;
    use vigil_audit::event::AuditLayer;
    use vigil_audit::settings::IndexSettings;
    use vigil_audit::{IndexAuditTrail, ObjectIndexStore};
    use vigil_core::LocalFsBackend;

    fn args() -> SearchArgs {
        SearchArgs {
            date: None,
            from: None,
            to: None,
            event_type: None,
            principal: None,
            size: 2,
        }
    }

    fn event(event_type: AuditEventType, principal: &str, ts: DateTime<Utc>) -> AuditEvent {
        AuditEvent::builder()
            .event_type(event_type)
            .layer(AuditLayer::Transport)
            .timestamp(ts)
            .principal(principal)
            .try_build()
            .unwrap()
    }

    #[test]
    fn window_defaults_to_today() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 15, 0, 0).unwrap();
        let (from, to) = time_window(&args(), now).unwrap();
        assert_eq!(from, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
        assert_eq!(to.date_naive(), now.date_naive());
    }

    #[test]
    fn window_accepts_dates_and_timestamps() {
        let now = Utc::now();
        let a = SearchArgs {
            from: Some("2024-01-01".into()),
            to: Some("2024-01-02T06:00:00+02:00".into()),
            ..args()
        };
        let (from, to) = time_window(&a, now).unwrap();
        assert_eq!(from, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(to, Utc.with_ymd_and_hms(2024, 1, 2, 4, 0, 0).unwrap());

        let inverted = SearchArgs {
            from: Some("2024-01-02".into()),
            to: Some("2024-01-01T00:00:00Z".into()),
            ..args()
        };
        assert!(time_window(&inverted, now).is_err());

        let garbage = SearchArgs {
            from: Some("yesterday".into()),
            to: Some("today".into()),
            ..args()
        };
        assert!(time_window(&garbage, now).is_err());
    }

    #[test]
    fn query_combines_filters() {
        assert_eq!(build_query(&args()), Query::MatchAll);
        let a = SearchArgs {
            event_type: Some(AuditEventType::RunAsDenied),
            principal: Some(String::new()),
            ..args()
        };
        assert_eq!(
            build_query(&a),
            Query::All(vec![
                Query::term("type", "run_as_denied"),
                Query::term("principal", ""),
            ])
        );
    }

    #[tokio::test]
    async fn collects_events_from_local_storage() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ObjectIndexStore::new(Arc::new(
            LocalFsBackend::open(dir.path()).unwrap(),
        )));
        let trail = IndexAuditTrail::new(
            store.clone(),
            IndexSettings {
                prefix: "audit".into(),
                ..IndexSettings::default()
            },
            "node-0",
        )
        .unwrap();
        let day = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        trail.enqueue(event(AuditEventType::AccessDenied, "exec_user", day));
        trail.enqueue(event(AuditEventType::AccessGranted, "alice", day));
        trail.enqueue(event(AuditEventType::AccessDenied, "bob", day));
        trail.enqueue(event(
            AuditEventType::AccessDenied,
            "carol",
            day + chrono::Duration::days(1),
        ));
        trail.stop().await.unwrap();

        let on_day = SearchArgs {
            date: Some(day.date_naive()),
            event_type: Some(AuditEventType::AccessDenied),
            ..args()
        };
        let events = collect(store.as_ref(), &on_day, "audit", Rollover::Daily, Utc::now())
            .await
            .unwrap();
        let principals: Vec<_> = events.iter().map(|e| e.principal.clone().unwrap()).collect();
        assert_eq!(principals.len(), 2);
        assert!(principals.contains(&"exec_user".to_string()));
        assert!(principals.contains(&"bob".to_string()));

        let range = SearchArgs {
            from: Some("2024-03-01".into()),
            to: Some("2024-03-05".into()),
            principal: Some("carol".into()),
            ..args()
        };
        let events = collect(store.as_ref(), &range, "audit", Rollover::Daily, Utc::now())
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
    }
}
