//! Ingestion orchestration
//!
//! One worker per configured CRM source, run concurrently. Each worker
//! connects, fetches everything newer than its stored watermark (or a
//! configured lookback window on first run), reconciles the batch into the
//! store and advances the watermark only if its own fetch and reconcile
//! succeeded. A wedged or broken source never stalls or poisons the others.
//!
//! A best-effort vehicle enrichment pass follows: placeholder vehicles with
//! no pricing data yet get a detail fetch from their source. Enrichment
//! failures are logged and skipped.

use crate::connectors::{ConnectorRegistry, CrmConnector};
use crate::db::vehicles;
use crate::db::watermarks;
use crate::reconcile::Reconciler;
use chrono::{Duration, Utc};
use leadflow_common::config::IngestConfig;
use leadflow_common::model::CrmSource;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Per-source outcome of an ingest cycle
#[derive(Debug)]
pub struct SourceReport {
    pub source: CrmSource,
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
    /// None when the cycle succeeded
    pub error: Option<String>,
}

/// Outcome of a whole ingest cycle across all sources
#[derive(Debug)]
pub struct IngestReport {
    pub sources: Vec<SourceReport>,
    pub vehicles_enriched: usize,
}

impl IngestReport {
    pub fn all_succeeded(&self) -> bool {
        self.sources.iter().all(|s| s.error.is_none())
    }
}

/// Run one full ingest cycle
///
/// `only` restricts the cycle to a single source when set.
pub async fn run_ingest(
    pool: &SqlitePool,
    connectors: &ConnectorRegistry,
    config: &IngestConfig,
    only: Option<CrmSource>,
) -> IngestReport {
    let mut handles = Vec::new();
    for (&source, connector) in connectors {
        if let Some(filter) = only {
            if source != filter {
                continue;
            }
        }
        let pool = pool.clone();
        let connector = connector.clone();
        let config = config.clone();
        handles.push(tokio::spawn(async move {
            ingest_source(pool, connector, config).await
        }));
    }

    let mut sources = Vec::with_capacity(handles.len());
    for result in futures::future::join_all(handles).await {
        match result {
            Ok(report) => sources.push(report),
            Err(e) => error!(error = %e, "Ingest worker panicked"),
        }
    }

    let vehicles_enriched = enrich_vehicles(pool, connectors, only).await;

    let report = IngestReport {
        sources,
        vehicles_enriched,
    };
    info!(
        sources = report.sources.len(),
        succeeded = report.sources.iter().filter(|s| s.error.is_none()).count(),
        vehicles_enriched,
        "Ingest cycle complete"
    );
    report
}

/// Ingest one source end to end
async fn ingest_source(
    pool: SqlitePool,
    connector: Arc<dyn CrmConnector>,
    config: IngestConfig,
) -> SourceReport {
    let source = connector.source();
    let mut report = SourceReport {
        source,
        fetched: 0,
        created: 0,
        updated: 0,
        failed: 0,
        error: None,
    };

    let since = match watermarks::get(&pool, source).await {
        Ok(Some(at)) => at,
        Ok(None) => Utc::now() - Duration::hours(config.lookback_hours),
        Err(e) => {
            report.error = Some(format!("Watermark read failed: {}", e));
            error!(source = source.as_str(), error = %e, "Watermark read failed");
            return report;
        }
    };

    // The cycle start, not the fetch end, becomes the next watermark so the
    // window overlaps rather than gaps
    let cycle_start = Utc::now();

    if let Err(e) = connector.connect().await {
        report.error = Some(e.to_string());
        error!(source = source.as_str(), error = %e, "Connect failed");
        return report;
    }

    let timeout = std::time::Duration::from_secs(config.source_timeout_secs);
    let fetch = tokio::time::timeout(timeout, connector.fetch_new_records(since)).await;
    let records = match fetch {
        Ok(Ok(records)) => records,
        Ok(Err(e)) => {
            report.error = Some(e.to_string());
            error!(source = source.as_str(), error = %e, "Fetch failed");
            connector.disconnect().await;
            return report;
        }
        Err(_) => {
            report.error = Some(format!("Fetch timed out after {}s", config.source_timeout_secs));
            error!(
                source = source.as_str(),
                timeout_secs = config.source_timeout_secs,
                "Fetch timed out"
            );
            connector.disconnect().await;
            return report;
        }
    };
    report.fetched = records.len();

    let reconciler = Reconciler::new(pool.clone());
    let outcome = reconciler.reconcile_batch(&records).await;
    report.created = outcome.created;
    report.updated = outcome.updated;
    report.failed = outcome.failures.len();

    // Validation failures are permanent for a given payload and do not hold
    // the watermark back. Store errors are retryable, so the window is kept
    // and the next cycle re-fetches the dropped records.
    let transient = outcome.transient_failures();
    if transient > 0 {
        report.error = Some(format!("{} records hit store errors", transient));
        warn!(
            source = source.as_str(),
            transient,
            "Store errors during reconcile, holding watermark for retry"
        );
    } else if let Err(e) = watermarks::set(&pool, source, cycle_start).await {
        report.error = Some(format!("Watermark advance failed: {}", e));
        error!(source = source.as_str(), error = %e, "Watermark advance failed");
    } else {
        info!(
            source = source.as_str(),
            since = %since,
            fetched = report.fetched,
            created = report.created,
            updated = report.updated,
            failed = report.failed,
            "Source ingested"
        );
    }

    connector.disconnect().await;
    report
}

/// Fill in placeholder vehicles from their source's inventory endpoint
async fn enrich_vehicles(
    pool: &SqlitePool,
    connectors: &ConnectorRegistry,
    only: Option<CrmSource>,
) -> usize {
    let unenriched = match vehicles::find_unenriched(pool).await {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "Could not list vehicles for enrichment");
            return 0;
        }
    };

    let mut enriched = 0usize;
    for vehicle in unenriched {
        // The vehicle does not record its source; try registered connectors
        // until one recognizes the id
        for (&source, connector) in connectors {
            if let Some(filter) = only {
                if source != filter {
                    continue;
                }
            }
            match connector
                .fetch_vehicle_details(&vehicle.source_vehicle_id)
                .await
            {
                Ok(details) => {
                    match vehicles::enrich(pool, vehicle.guid, &details).await {
                        Ok(()) => enriched += 1,
                        Err(e) => warn!(
                            vehicle = %vehicle.source_vehicle_id,
                            error = %e,
                            "Vehicle enrichment write failed"
                        ),
                    }
                    break;
                }
                Err(e) => {
                    // A source that does not know the id reports a fetch
                    // error; try the next one
                    debug!(
                        source = source.as_str(),
                        vehicle = %vehicle.source_vehicle_id,
                        error = %e,
                        "Vehicle detail fetch failed on this source"
                    );
                    continue;
                }
            }
        }
    }
    enriched
}
