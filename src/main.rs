use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use ulid::Ulid;

use reprise::clock::{Clock, FixedClock, SystemClock};
use reprise::model::{Performance, PerformanceOrder};
use reprise::recurrence::StoredRule;
use reprise::scheduler::{PerformanceEdit, Scheduler};
use reprise::store::{InMemoryStore, OccurrenceStore, RuleStore};

/// Stored state to start from plus the edits to replay against it.
#[derive(Debug, Deserialize)]
struct Scenario {
    #[serde(default)]
    rules: Vec<StoredRule>,
    #[serde(default)]
    performances: Vec<Performance>,
    #[serde(default)]
    edits: Vec<PerformanceEdit>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let metrics_port: Option<u16> = std::env::var("REPRISE_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    reprise::observability::init(metrics_port);

    let clock: Arc<dyn Clock> = match std::env::var("REPRISE_NOW") {
        Ok(now) => Arc::new(FixedClock(now.parse::<NaiveDateTime>()?)),
        Err(_) => Arc::new(SystemClock),
    };

    let raw = match std::env::var("REPRISE_INPUT") {
        Ok(path) if path != "-" => tokio::fs::read_to_string(&path).await?,
        _ => {
            let mut buf = String::new();
            tokio::io::stdin().read_to_string(&mut buf).await?;
            buf
        }
    };
    let scenario: Scenario = serde_json::from_str(&raw)?;
    info!(
        "scenario: {} rules, {} performances, {} edits",
        scenario.rules.len(),
        scenario.performances.len(),
        scenario.edits.len()
    );

    let store = Arc::new(InMemoryStore::new());
    let mut events = BTreeSet::new();
    for rule in scenario.rules {
        store.save_rule(rule).await?;
    }
    for mut performance in scenario.performances {
        events.insert(performance.event_id);
        performance.version = 0;
        store.save(performance).await?;
    }

    let scheduler = Scheduler::new(store, clock);
    let mut results = Vec::with_capacity(scenario.edits.len());
    for edit in scenario.edits {
        events.insert(edit.performance.event_id);
        let id = edit.performance.id;
        match scheduler.submit(edit).await {
            Ok(applied) => results.push(json!({ "id": id, "applied": applied })),
            Err(e) => {
                error!("edit of {id} failed: {e}");
                results.push(json!({ "id": id, "error": e.to_string() }));
            }
        }
    }

    let mut listing: BTreeMap<Ulid, Vec<Performance>> = BTreeMap::new();
    for event_id in events {
        listing.insert(
            event_id,
            scheduler.list_event(event_id, PerformanceOrder::StartAsc).await?,
        );
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "results": results, "events": listing }))?
    );
    Ok(())
}
