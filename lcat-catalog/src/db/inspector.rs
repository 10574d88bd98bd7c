//! Schema metadata lookups with a definitive-answer cache
//!
//! Questions go to the primary probe first and to the secondary probe when
//! the primary cannot answer. Only definitive answers (present or absent)
//! are cached; "unknown" is retried on the next lookup. The boolean helpers
//! read unknown as absent, so metadata lookups never fail a caller.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

use super::backend::{BackendFailure, BackendKind, ColumnInfo, FailureKind, SchemaProbe};
use super::descriptor::is_valid_identifier;
use super::executor::ExecFailure;

/// Answer to a metadata question
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Present,
    Absent,
    /// Neither backend could answer
    Unknown,
}

impl Presence {
    pub fn is_present(self) -> bool {
        self == Presence::Present
    }

    fn from_bool(present: bool) -> Self {
        if present {
            Presence::Present
        } else {
            Presence::Absent
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum MetaKey {
    Table(String),
    Column(String, String),
    Function(String),
}

impl MetaKey {
    fn names(&self) -> Vec<&str> {
        match self {
            MetaKey::Table(t) | MetaKey::Function(t) => vec![t.as_str()],
            MetaKey::Column(t, c) => vec![t.as_str(), c.as_str()],
        }
    }
}

/// Cached schema metadata over one or two probes
pub struct SchemaInspector {
    primary: Arc<dyn SchemaProbe>,
    secondary: Option<Arc<dyn SchemaProbe>>,
    probe_timeout: Duration,
    cache: RwLock<HashMap<MetaKey, bool>>,
}

impl SchemaInspector {
    pub fn new(
        primary: Arc<dyn SchemaProbe>,
        secondary: Option<Arc<dyn SchemaProbe>>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            primary,
            secondary,
            probe_timeout,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn table_exists(&self, table: &str) -> bool {
        self.table_presence(table).await.is_present()
    }

    pub async fn column_exists(&self, table: &str, column: &str) -> bool {
        self.column_presence(table, column).await.is_present()
    }

    pub async fn function_exists(&self, name: &str) -> bool {
        self.function_presence(name).await.is_present()
    }

    pub async fn table_presence(&self, table: &str) -> Presence {
        self.presence(MetaKey::Table(table.to_string())).await
    }

    pub async fn column_presence(&self, table: &str, column: &str) -> Presence {
        self.presence(MetaKey::Column(table.to_string(), column.to_string()))
            .await
    }

    pub async fn function_presence(&self, name: &str) -> Presence {
        self.presence(MetaKey::Function(name.to_string())).await
    }

    /// First column of `candidates` present on `table`
    pub async fn first_present_column<'a>(&self, table: &str, candidates: &[&'a str]) -> Option<&'a str> {
        for &column in candidates {
            if self.column_exists(table, column).await {
                return Some(column);
            }
        }
        None
    }

    /// Drop every cached answer
    pub fn invalidate(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
    }

    async fn presence(&self, key: MetaKey) -> Presence {
        if !key.names().iter().all(|n| is_valid_identifier(n)) {
            return Presence::Absent;
        }

        if let Some(answer) = self.cached(&key) {
            return Presence::from_bool(answer);
        }

        let mut probes = vec![&self.primary];
        probes.extend(self.secondary.as_ref());

        for probe in probes {
            match self.ask(probe.as_ref(), &key).await {
                Ok(answer) => {
                    debug!(?key, answer, backend = %probe.kind(), "Schema metadata resolved");
                    if let Ok(mut cache) = self.cache.write() {
                        cache.insert(key, answer);
                    }
                    return Presence::from_bool(answer);
                }
                Err(failure) => {
                    warn!(?key, "Schema probe failed: {}", failure);
                }
            }
        }

        Presence::Unknown
    }

    fn cached(&self, key: &MetaKey) -> Option<bool> {
        self.cache.read().ok().and_then(|cache| cache.get(key).copied())
    }

    async fn ask(&self, probe: &dyn SchemaProbe, key: &MetaKey) -> Result<bool, BackendFailure> {
        let kind = probe.kind();
        match key {
            MetaKey::Table(t) => self.bounded(kind, probe.table_exists(t)).await,
            MetaKey::Column(t, c) => self.bounded(kind, probe.column_exists(t, c)).await,
            MetaKey::Function(f) => self.bounded(kind, probe.function_exists(f)).await,
        }
    }

    async fn bounded<T>(
        &self,
        kind: BackendKind,
        probe: impl Future<Output = Result<T, BackendFailure>>,
    ) -> Result<T, BackendFailure> {
        tokio::time::timeout(self.probe_timeout, probe)
            .await
            .unwrap_or_else(|_| {
                Err(BackendFailure::new(
                    kind,
                    FailureKind::Timeout,
                    format!("metadata probe exceeded {}ms", self.probe_timeout.as_millis()),
                ))
            })
    }

    /// All user tables, sorted (not cached)
    pub async fn list_tables(&self) -> Result<Vec<String>, ExecFailure> {
        let mut failures = Vec::new();
        let mut probes = vec![&self.primary];
        probes.extend(self.secondary.as_ref());

        for probe in probes {
            match self.bounded(probe.kind(), probe.list_tables()).await {
                Ok(tables) => return Ok(tables),
                Err(failure) => failures.push(failure),
            }
        }
        Err(ExecFailure {
            target: "table listing".to_string(),
            failures,
        })
    }

    /// Columns of `table` (not cached)
    pub async fn describe_columns(&self, table: &str) -> Result<Vec<ColumnInfo>, ExecFailure> {
        let mut failures = Vec::new();
        let mut probes = vec![&self.primary];
        probes.extend(self.secondary.as_ref());

        for probe in probes {
            match self.bounded(probe.kind(), probe.describe_columns(table)).await {
                Ok(columns) => return Ok(columns),
                Err(failure) => failures.push(failure),
            }
        }
        Err(ExecFailure {
            target: table.to_string(),
            failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryBackend;
    use serde_json::json;

    fn catalog() -> MemoryBackend {
        MemoryBackend::primary()
            .table("releases", &["id", "title", "artist_id"], vec![json!({"id": "R1"})])
            .table("artists", &["id", "name"], Vec::new())
            .function("get_artist_releases", Vec::new())
    }

    fn inspector(primary: Arc<MemoryBackend>, secondary: Option<Arc<MemoryBackend>>) -> SchemaInspector {
        SchemaInspector::new(
            primary,
            secondary.map(|s| s as Arc<dyn SchemaProbe>),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_definitive_answers() {
        let inspector = inspector(Arc::new(catalog()), None);

        assert!(inspector.table_exists("releases").await);
        assert!(!inspector.table_exists("tracks").await);
        assert!(inspector.column_exists("releases", "artist_id").await);
        assert!(!inspector.column_exists("releases", "primary_artist_id").await);
        assert!(inspector.function_exists("get_artist_releases").await);
        assert!(!inspector.function_exists("nope").await);
    }

    #[tokio::test]
    async fn test_answers_are_cached() {
        let primary = Arc::new(catalog());
        let inspector = inspector(primary.clone(), None);

        assert!(inspector.table_exists("releases").await);
        assert!(!inspector.table_exists("tracks").await);
        assert!(inspector.table_exists("releases").await);
        assert!(!inspector.table_exists("tracks").await);
        assert_eq!(primary.probes(), 2);

        inspector.invalidate();
        assert!(inspector.table_exists("releases").await);
        assert_eq!(primary.probes(), 3);
    }

    #[tokio::test]
    async fn test_unknown_is_not_cached() {
        let primary = Arc::new(catalog().probe_failing());
        let inspector = inspector(primary.clone(), None);

        assert_eq!(inspector.table_presence("releases").await, Presence::Unknown);
        assert!(!inspector.table_exists("releases").await);
        assert_eq!(primary.probes(), 2);
    }

    #[tokio::test]
    async fn test_secondary_answers_when_primary_cannot() {
        let primary = Arc::new(catalog().probe_failing());
        let secondary = Arc::new(catalog().with_kind(BackendKind::Secondary));
        let inspector = inspector(primary.clone(), Some(secondary.clone()));

        assert_eq!(inspector.table_presence("releases").await, Presence::Present);
        assert_eq!(inspector.column_presence("releases", "nope").await, Presence::Absent);

        // cached after the secondary answered
        assert!(inspector.table_exists("releases").await);
        assert_eq!(secondary.probes(), 2);
    }

    #[tokio::test]
    async fn test_invalid_names_are_absent_without_probing() {
        let primary = Arc::new(catalog());
        let inspector = inspector(primary.clone(), None);

        assert_eq!(
            inspector.table_presence("releases; DROP TABLE x").await,
            Presence::Absent
        );
        assert_eq!(primary.probes(), 0);
    }

    #[tokio::test]
    async fn test_first_present_column() {
        let inspector = inspector(Arc::new(catalog()), None);
        assert_eq!(
            inspector
                .first_present_column("releases", &["primary_artist_id", "artist_id"])
                .await,
            Some("artist_id")
        );
        assert_eq!(
            inspector.first_present_column("artists", &["artist_id"]).await,
            None
        );
    }

    #[tokio::test]
    async fn test_listing_and_description() {
        let inspector = inspector(Arc::new(catalog()), None);
        assert_eq!(inspector.list_tables().await.unwrap(), vec!["artists", "releases"]);

        let columns = inspector.describe_columns("releases").await.unwrap();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "title", "artist_id"]);

        let err = inspector.describe_columns("missing").await.unwrap_err();
        assert_eq!(err.failures.len(), 1);
    }
}
