//! Indices command - list audit indices.

use anyhow::{Context, Result};
use clap::Args;
use owo_colors::OwoColorize;
use vigil_audit::store::{IndexStore, SearchRequest};

use crate::{Config, OutputFormat};

/// Arguments for the indices command.
#[derive(Debug, Args)]
pub struct IndicesArgs {
    /// Skip counting events per index.
    #[arg(long)]
    pub no_count: bool,
}

/// An audit index with its event count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSummary {
    /// Index name.
    pub name: String,
    /// Number of events, unless counting was skipped.
    pub events: Option<usize>,
}

/// Lists the audit indices under the configured prefix.
///
/// # Errors
///
/// Returns an error if the store cannot be listed or searched.
pub async fn collect(
    store: &dyn IndexStore,
    prefix: &str,
    count: bool,
) -> Result<Vec<IndexSummary>> {
    let names = store
        .list_indices(&format!("{prefix}-"))
        .await
        .context("failed to list audit indices")?;

    let mut summaries = Vec::with_capacity(names.len());
    for name in names {
        let events = if count {
            let response = store
                .search(SearchRequest::new([name.as_str()]).size(0))
                .await
                .with_context(|| format!("failed to count events in {name}"))?;
            Some(response.total_hits)
        } else {
            None
        };
        summaries.push(IndexSummary { name, events });
    }
    Ok(summaries)
}

/// Execute the indices command.
///
/// # Errors
///
/// Returns an error if the storage cannot be opened or read.
pub async fn execute(args: &IndicesArgs, config: &Config) -> Result<()> {
    let store = config.open_store()?;
    let summaries = collect(&store, &config.prefix, !args.no_count).await?;

    match config.format {
        OutputFormat::Json => {
            let json: Vec<_> = summaries
                .iter()
                .map(|s| serde_json::json!({ "index": s.name, "events": s.events }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            if summaries.is_empty() {
                println!("No audit indices found under {}", config.prefix);
                return Ok(());
            }
            for summary in &summaries {
                match summary.events {
                    Some(events) => println!("  {} {}", summary.name.bold(), events.dimmed()),
                    None => println!("  {}", summary.name.bold()),
                }
            }
        }
        OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct IndexRow {
                #[tabled(rename = "Index")]
                name: String,
                #[tabled(rename = "Events")]
                events: String,
            }

            let rows: Vec<_> = summaries
                .iter()
                .map(|s| IndexRow {
                    name: s.name.clone(),
                    events: s.events.map_or_else(|| "-".to_string(), |n| n.to_string()),
                })
                .collect();

            if rows.is_empty() {
                println!("No audit indices found under {}", config.prefix);
            } else {
                println!("{}", Table::new(rows));
            }
        }
    }

    Ok(())
}
