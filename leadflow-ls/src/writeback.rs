//! Score writeback
//!
//! Routes a freshly computed likelihood to the internal store and to the
//! originating CRM. The two destinations fail independently: a CRM outage
//! never blocks the internal UPDATE, and a local disk problem never stops
//! the outbound push. Neither failure propagates to the caller; both are
//! reported in the outcome and logged.

use crate::connectors::ConnectorRegistry;
use crate::db::leads;
use leadflow_common::model::CrmSource;
use sqlx::SqlitePool;
use tracing::{debug, warn};

/// What actually happened on each side of a writeback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WritebackOutcome {
    /// predicted_likelihood landed in the local leads table
    pub internal_persisted: bool,
    /// The CRM accepted the score
    pub external_delivered: bool,
}

/// Fans a score out to the store and the source CRM
pub struct WritebackOrchestrator {
    pool: SqlitePool,
    connectors: ConnectorRegistry,
    retry_budget: u32,
}

impl WritebackOrchestrator {
    pub fn new(pool: SqlitePool, connectors: ConnectorRegistry, retry_budget: u32) -> Self {
        Self {
            pool,
            connectors,
            retry_budget: retry_budget.max(1),
        }
    }

    /// Write a score to both destinations
    ///
    /// Internal: one UPDATE, no retry. A miss (unknown lead) or a database
    /// error is logged and surfaces as `internal_persisted = false`.
    /// External: a fixed number of attempts through the matching connector,
    /// no backoff. A source with no registered connector is a warn and a
    /// no-op, not an error.
    pub async fn write_score(
        &self,
        source: CrmSource,
        source_lead_id: &str,
        score: f64,
    ) -> WritebackOutcome {
        let internal_persisted =
            match leads::set_predicted_likelihood(&self.pool, source, source_lead_id, score).await {
                Ok(true) => true,
                Ok(false) => {
                    warn!(
                        source = source.as_str(),
                        source_lead_id, "Internal writeback matched no lead"
                    );
                    false
                }
                Err(e) => {
                    warn!(
                        source = source.as_str(),
                        source_lead_id,
                        error = %e,
                        "Internal writeback failed, continuing degraded"
                    );
                    false
                }
            };

        let external_delivered = self.push_external(source, source_lead_id, score).await;

        WritebackOutcome {
            internal_persisted,
            external_delivered,
        }
    }

    async fn push_external(&self, source: CrmSource, source_lead_id: &str, score: f64) -> bool {
        let connector = match self.connectors.get(&source) {
            Some(c) => c.clone(),
            None => {
                warn!(
                    source = source.as_str(),
                    source_lead_id, "No connector registered for source, skipping external writeback"
                );
                return false;
            }
        };

        for attempt in 1..=self.retry_budget {
            match connector.update_lead_score(source_lead_id, score).await {
                Ok(()) => {
                    debug!(
                        source = source.as_str(),
                        source_lead_id, attempt, "Score delivered to CRM"
                    );
                    return true;
                }
                Err(e) => {
                    warn!(
                        source = source.as_str(),
                        source_lead_id,
                        attempt,
                        budget = self.retry_budget,
                        error = %e,
                        "External writeback attempt failed"
                    );
                }
            }
        }

        warn!(
            source = source.as_str(),
            source_lead_id, "External writeback exhausted its retry budget"
        );
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::{ConnectorError, CrmConnector};
    use crate::db::{source_records, vehicles};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use leadflow_common::db::init_database;
    use leadflow_common::model::{LeadDetails, StandardizedFields, StandardizedRecord, VehicleDetails};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use uuid::Uuid;

    /// Connector double that fails a configurable number of score pushes
    struct FlakyConnector {
        fail_first: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl CrmConnector for FlakyConnector {
        fn source(&self) -> CrmSource {
            CrmSource::VinSolutions
        }

        async fn connect(&self) -> Result<(), ConnectorError> {
            Ok(())
        }

        async fn disconnect(&self) {}

        async fn fetch_new_records(
            &self,
            _since: DateTime<Utc>,
        ) -> Result<Vec<StandardizedRecord>, ConnectorError> {
            Ok(Vec::new())
        }

        async fn fetch_record_details(
            &self,
            source_lead_id: &str,
        ) -> Result<LeadDetails, ConnectorError> {
            Ok(LeadDetails {
                source_lead_id: source_lead_id.to_string(),
                assigned_salesperson_id: None,
                extra: serde_json::Value::Null,
            })
        }

        async fn fetch_vehicle_details(
            &self,
            source_vehicle_id: &str,
        ) -> Result<VehicleDetails, ConnectorError> {
            Err(ConnectorError::Fetch(format!(
                "Unknown vehicle: {}",
                source_vehicle_id
            )))
        }

        async fn update_lead_score(
            &self,
            _source_lead_id: &str,
            _score: f64,
        ) -> Result<(), ConnectorError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail_first {
                Err(ConnectorError::Writeback("CRM rejected the update".into()))
            } else {
                Ok(())
            }
        }
    }

    fn registry(fail_first: u32) -> (ConnectorRegistry, Arc<FlakyConnector>) {
        let connector = Arc::new(FlakyConnector {
            fail_first,
            calls: AtomicU32::new(0),
        });
        let mut map = ConnectorRegistry::new();
        map.insert(
            CrmSource::VinSolutions,
            connector.clone() as Arc<dyn CrmConnector>,
        );
        (map, connector)
    }

    async fn seed_lead(pool: &SqlitePool, source_lead_id: &str) {
        let record = source_records::SourceRecord {
            guid: Uuid::new_v4(),
            source: CrmSource::VinSolutions,
            source_lead_id: source_lead_id.to_string(),
            raw_payload: serde_json::json!({}),
            standardized: StandardizedFields::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        source_records::insert(pool, &record).await.unwrap();
        let vehicle = vehicles::Vehicle::placeholder("V-1".to_string(), None, None);
        vehicles::insert(pool, &vehicle).await.unwrap();
        let lead = crate::db::leads::Lead {
            guid: Uuid::new_v4(),
            source_record_id: record.guid,
            vehicle_id: vehicle.guid,
            status: leadflow_common::model::LeadStatus::New,
            initial_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            closed_at: None,
            converted: None,
            predicted_likelihood: None,
        };
        crate::db::leads::insert(pool, &lead).await.unwrap();
    }

    async fn test_pool(name: &str) -> SqlitePool {
        let path = format!("/tmp/leadflow-wb-{}-{}.db", name, std::process::id());
        let _ = std::fs::remove_file(&path);
        init_database(std::path::Path::new(&path)).await.unwrap()
    }

    #[tokio::test]
    async fn both_sides_succeed() {
        let pool = test_pool("ok").await;
        seed_lead(&pool, "L-100").await;
        let (connectors, _) = registry(0);
        let wb = WritebackOrchestrator::new(pool.clone(), connectors, 3);

        let outcome = wb.write_score(CrmSource::VinSolutions, "L-100", 0.73).await;
        assert!(outcome.internal_persisted);
        assert!(outcome.external_delivered);

        let lead = leads::find_by_source_id(&pool, CrmSource::VinSolutions, "L-100")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lead.predicted_likelihood, Some(0.73));
    }

    #[tokio::test]
    async fn external_failure_does_not_block_internal() {
        let pool = test_pool("extfail").await;
        seed_lead(&pool, "L-101").await;
        let (connectors, connector) = registry(u32::MAX);
        let wb = WritebackOrchestrator::new(pool.clone(), connectors, 3);

        let outcome = wb.write_score(CrmSource::VinSolutions, "L-101", 0.4).await;
        assert!(outcome.internal_persisted);
        assert!(!outcome.external_delivered);
        assert_eq!(connector.calls.load(Ordering::SeqCst), 3);

        let lead = leads::find_by_source_id(&pool, CrmSource::VinSolutions, "L-101")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lead.predicted_likelihood, Some(0.4));
    }

    #[tokio::test]
    async fn retry_budget_recovers_from_transient_failures() {
        let pool = test_pool("retry").await;
        seed_lead(&pool, "L-102").await;
        let (connectors, connector) = registry(2);
        let wb = WritebackOrchestrator::new(pool.clone(), connectors, 3);

        let outcome = wb.write_score(CrmSource::VinSolutions, "L-102", 0.5).await;
        assert!(outcome.external_delivered);
        assert_eq!(connector.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unknown_lead_reports_internal_miss() {
        let pool = test_pool("miss").await;
        let (connectors, _) = registry(0);
        let wb = WritebackOrchestrator::new(pool.clone(), connectors, 3);

        let outcome = wb.write_score(CrmSource::VinSolutions, "L-404", 0.9).await;
        assert!(!outcome.internal_persisted);
        assert!(outcome.external_delivered);
    }

    #[tokio::test]
    async fn unregistered_source_is_a_noop_externally() {
        let pool = test_pool("nosource").await;
        seed_lead(&pool, "L-103").await;
        let (connectors, _) = registry(0);
        let wb = WritebackOrchestrator::new(pool.clone(), connectors, 3);

        let outcome = wb.write_score(CrmSource::Cdk, "L-103", 0.2).await;
        assert!(!outcome.external_delivered);
    }
}
