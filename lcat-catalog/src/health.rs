//! Read-only diagnostics over both backends
//!
//! The report answers "can we reach the stores, and what do they hold":
//! reachability per backend, the table inventory, column counts and one
//! sample row per table. A failing table is recorded against that table
//! and enumeration carries on.

use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::db::{
    BackendFailure, BackendKind, FailureKind, QueryDescriptor, QueryExecutor, RawRow, SchemaProbe,
};

/// First row of a table, or why it could not be read
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableSample {
    /// `None` when the table is empty
    Row(Option<RawRow>),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub backend_reachable: bool,
    /// `None` when no secondary backend is configured
    pub secondary_reachable: Option<bool>,
    /// Backend the inventory was read from
    pub inventory_source: Option<BackendKind>,
    pub table_inventory: Vec<String>,
    pub per_table_column_counts: BTreeMap<String, usize>,
    pub sample_row_per_table: BTreeMap<String, TableSample>,
    pub errors: Vec<String>,
}

pub struct HealthReporter {
    primary: Arc<dyn SchemaProbe>,
    secondary: Option<Arc<dyn SchemaProbe>>,
    executor: QueryExecutor,
    probe_timeout: Duration,
}

impl HealthReporter {
    pub fn new(
        primary: Arc<dyn SchemaProbe>,
        secondary: Option<Arc<dyn SchemaProbe>>,
        executor: QueryExecutor,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            primary,
            secondary,
            executor,
            probe_timeout,
        }
    }

    async fn bounded<T>(
        &self,
        backend: BackendKind,
        probe: impl Future<Output = Result<T, BackendFailure>>,
    ) -> Result<T, BackendFailure> {
        match tokio::time::timeout(self.probe_timeout, probe).await {
            Ok(result) => result,
            Err(_) => Err(BackendFailure::new(
                backend,
                FailureKind::Timeout,
                format!("no response within {}ms", self.probe_timeout.as_millis()),
            )),
        }
    }

    pub async fn report(&self, cancel: &CancellationToken) -> HealthReport {
        let mut errors = Vec::new();

        let primary_tables = self.bounded(BackendKind::Primary, self.primary.list_tables()).await;
        let backend_reachable = primary_tables.is_ok();

        let mut secondary_tables = None;
        if let Some(secondary) = &self.secondary {
            secondary_tables = Some(self.bounded(BackendKind::Secondary, secondary.list_tables()).await);
        }
        let secondary_reachable = secondary_tables.as_ref().map(Result::is_ok);

        let mut inventory = None;
        match primary_tables {
            Ok(tables) => inventory = Some((BackendKind::Primary, tables)),
            Err(failure) => errors.push(failure.to_string()),
        }
        match secondary_tables {
            Some(Ok(tables)) if inventory.is_none() => inventory = Some((BackendKind::Secondary, tables)),
            Some(Err(failure)) => errors.push(failure.to_string()),
            _ => {}
        }

        let Some((source, table_inventory)) = inventory else {
            warn!("No backend answered the table inventory");
            return HealthReport {
                backend_reachable,
                secondary_reachable,
                inventory_source: None,
                table_inventory: Vec::new(),
                per_table_column_counts: BTreeMap::new(),
                sample_row_per_table: BTreeMap::new(),
                errors,
            };
        };

        let probe = match (source, &self.secondary) {
            (BackendKind::Secondary, Some(secondary)) => secondary.clone(),
            _ => self.primary.clone(),
        };

        let mut per_table_column_counts = BTreeMap::new();
        let mut sample_row_per_table = BTreeMap::new();
        for table in &table_inventory {
            if cancel.is_cancelled() {
                errors.push("report cancelled".to_string());
                break;
            }

            match self.bounded(source, probe.describe_columns(table)).await {
                Ok(columns) => {
                    per_table_column_counts.insert(table.clone(), columns.len());
                }
                Err(failure) => errors.push(format!("{}: {}", table, failure)),
            }

            let sample = QueryDescriptor::new(table.as_str()).limit(1);
            let sample = match self.executor.fetch(&sample, cancel).await {
                Ok(rows) => TableSample::Row(rows.rows.into_iter().next()),
                Err(failure) => {
                    errors.push(failure.to_string());
                    TableSample::Error(failure.to_string())
                }
            };
            sample_row_per_table.insert(table.clone(), sample);
        }

        info!(
            tables = table_inventory.len(),
            errors = errors.len(),
            source = %source,
            "Diagnostics report built"
        );

        HealthReport {
            backend_reachable,
            secondary_reachable,
            inventory_source: Some(source),
            table_inventory,
            per_table_column_counts,
            sample_row_per_table,
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Backend;
    use crate::testing::MemoryBackend;
    use serde_json::json;

    fn reporter(primary: Arc<MemoryBackend>, secondary: Option<Arc<MemoryBackend>>) -> HealthReporter {
        let executor = QueryExecutor::new(
            primary.clone(),
            secondary.clone().map(|s| s as Arc<dyn Backend>),
            Duration::from_secs(1),
        );
        HealthReporter::new(
            primary,
            secondary.map(|s| s as Arc<dyn SchemaProbe>),
            executor,
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_report_lists_tables_and_samples() {
        let primary = MemoryBackend::primary()
            .table("artists", &["id", "name"], vec![json!({"id": "A1", "name": "Ada"})])
            .table("labels", &["id", "name", "display_name"], Vec::new());

        let report = reporter(Arc::new(primary), None)
            .report(&CancellationToken::new())
            .await;

        assert!(report.backend_reachable);
        assert_eq!(report.secondary_reachable, None);
        assert_eq!(report.table_inventory, vec!["artists", "labels"]);
        assert_eq!(report.per_table_column_counts["labels"], 3);
        assert_eq!(
            report.sample_row_per_table["artists"],
            TableSample::Row(json!({"id": "A1", "name": "Ada"}).as_object().cloned())
        );
        assert_eq!(report.sample_row_per_table["labels"], TableSample::Row(None));
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_failing_table_does_not_stop_enumeration() {
        let primary = MemoryBackend::primary()
            .table("artists", &["id"], vec![json!({"id": "A1"})])
            .table("releases", &["id"], vec![json!({"id": "R1"})])
            .table("tracks", &["id"], Vec::new())
            .failing_table("releases");

        let report = reporter(Arc::new(primary), None)
            .report(&CancellationToken::new())
            .await;

        assert_eq!(report.sample_row_per_table.len(), 3);
        assert!(matches!(report.sample_row_per_table["releases"], TableSample::Error(_)));
        assert!(matches!(report.sample_row_per_table["tracks"], TableSample::Row(None)));
        assert_eq!(report.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_primary_down_inventory_from_secondary() {
        let primary = MemoryBackend::primary().failing(FailureKind::Connection);
        let secondary = MemoryBackend::secondary().table("releases", &["id", "title"], vec![json!({"id": "R1", "title": "x"})]);

        let report = reporter(Arc::new(primary), Some(Arc::new(secondary)))
            .report(&CancellationToken::new())
            .await;

        assert!(!report.backend_reachable);
        assert_eq!(report.secondary_reachable, Some(true));
        assert_eq!(report.inventory_source, Some(BackendKind::Secondary));
        assert_eq!(report.per_table_column_counts["releases"], 2);
        assert!(matches!(report.sample_row_per_table["releases"], TableSample::Row(Some(_))));
        assert!(!report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_nothing_reachable() {
        let primary = MemoryBackend::primary().failing(FailureKind::Connection);

        let report = reporter(Arc::new(primary), None)
            .report(&CancellationToken::new())
            .await;

        assert!(!report.backend_reachable);
        assert!(report.table_inventory.is_empty());
        assert_eq!(report.errors.len(), 1);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["backend_reachable"], false);
        assert!(json["secondary_reachable"].is_null());
    }
}
