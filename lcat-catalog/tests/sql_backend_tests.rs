//! Integration tests for the SQL backend against an in-memory SQLite catalog
//!
//! Tests cover:
//! - Rendering and running filtered, ordered, paged selects
//! - Join-table embedding in the flat-joined shape
//! - Schema metadata probes
//! - Unsupported function calls on SQLite

mod common;

use common::{catalog_pool, EDGE_CATALOG};
use lcat_catalog::db::{
    Backend, Direction, FailureKind, FunctionCall, JoinSpec, QueryDescriptor, RowShape, SchemaProbe,
    SqlBackend,
};
use serde_json::{json, Value};

async fn backend() -> SqlBackend {
    SqlBackend::new(catalog_pool(EDGE_CATALOG).await)
}

fn ids(rows: &[serde_json::Map<String, Value>], column: &str) -> Vec<Value> {
    rows.iter().map(|r| r.get(column).cloned().unwrap_or(Value::Null)).collect()
}

fn artists_embed() -> JoinSpec {
    JoinSpec {
        alias: "artists".to_string(),
        through: "release_artists".to_string(),
        local_key: "release_id".to_string(),
        target_key: "artist_id".to_string(),
        target: "artists".to_string(),
        target_columns: vec!["id".to_string(), "name".to_string()],
        edge_columns: vec!["role".to_string()],
    }
}

// =============================================================================
// Selects
// =============================================================================

#[tokio::test]
async fn test_order_puts_nulls_last() {
    let backend = backend().await;
    let query = QueryDescriptor::new("releases")
        .select(["id", "title"])
        .order_by("release_date", Direction::Desc);

    let rows = backend.fetch(&query).await.unwrap();

    assert_eq!(rows.shape, RowShape::Flat);
    assert_eq!(ids(&rows.rows, "id"), vec![json!("R2"), json!("R3"), json!("R1"), json!("R4")]);
    // The sort column rides along with the requested projection
    assert!(rows.rows[0].get("title").is_some());
    assert!(rows.rows[0].get("release_date").is_some());
}

#[tokio::test]
async fn test_filters_and_paging() {
    let backend = backend().await;
    let query = QueryDescriptor::new("releases")
        .eq("label_id", "L1")
        .order_by("release_date", Direction::Asc)
        .offset(1)
        .limit(1);

    let rows = backend.fetch(&query).await.unwrap();
    assert_eq!(ids(&rows.rows, "id"), vec![json!("R3")]);

    let query = QueryDescriptor::new("releases").contains("title", "NOVA");
    let rows = backend.fetch(&query).await.unwrap();
    assert_eq!(ids(&rows.rows, "id"), vec![json!("R1")]);

    let query = QueryDescriptor::new("releases")
        .any_of("id", vec!["R4".to_string(), "R1".to_string()])
        .order_by("id", Direction::Asc);
    let rows = backend.fetch(&query).await.unwrap();
    assert_eq!(ids(&rows.rows, "id"), vec![json!("R1"), json!("R4")]);
}

#[tokio::test]
async fn test_like_wildcards_are_literal() {
    let backend = backend().await;
    let rows = backend
        .fetch(&QueryDescriptor::new("releases").contains("title", "%"))
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_values_keep_storage_class() {
    let backend = backend().await;
    let query = QueryDescriptor::new("tracks").eq("id", "T1");

    let rows = backend.fetch(&query).await.unwrap();
    let row = &rows.rows[0];

    assert_eq!(row["track_number"], json!(1));
    assert_eq!(row["duration_ms"], json!(60000));
    assert_eq!(row["title"], json!("Intro"));
    assert!(row["spotify_url"].is_null());
}

#[tokio::test]
async fn test_missing_table_is_query_failure() {
    let backend = backend().await;
    let err = backend.fetch(&QueryDescriptor::new("playlists")).await.unwrap_err();
    assert_eq!(err.kind, FailureKind::Query);
}

#[tokio::test]
async fn test_hostile_identifier_is_rejected_before_sql() {
    let backend = backend().await;
    let err = backend
        .fetch(&QueryDescriptor::new("releases; DROP TABLE artists"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::Query);
    assert!(backend.table_exists("artists").await.unwrap());
}

// =============================================================================
// Embedding
// =============================================================================

#[tokio::test]
async fn test_embed_yields_one_row_per_edge() {
    let backend = backend().await;
    let query = QueryDescriptor::new("releases")
        .embed(artists_embed())
        .eq("id", "R2");

    let rows = backend.fetch(&query).await.unwrap();

    assert_eq!(
        rows.shape,
        RowShape::FlatJoined {
            prefix: "artists__".to_string()
        }
    );
    assert_eq!(rows.len(), 2);
    assert_eq!(
        ids(&rows.rows, "artists__id"),
        vec![json!("A1"), json!("A4")]
    );
    assert_eq!(rows.rows[1]["artists__role"], json!("featured"));
    assert_eq!(rows.rows[0]["title"], json!("Second Light"));
}

#[tokio::test]
async fn test_embed_keeps_releases_without_edges() {
    let backend = backend().await;
    let query = QueryDescriptor::new("releases")
        .embed(artists_embed())
        .eq("id", "R4");

    let rows = backend.fetch(&query).await.unwrap();

    assert_eq!(rows.len(), 1);
    assert!(rows.rows[0]["artists__id"].is_null());
}

#[tokio::test]
async fn test_embed_limit_applies_to_base_rows() {
    let backend = backend().await;
    let query = QueryDescriptor::new("releases")
        .embed(artists_embed())
        .order_by("release_date", Direction::Desc)
        .limit(1);

    let rows = backend.fetch(&query).await.unwrap();

    // R2 has two contributors; both survive the limit of one release
    assert_eq!(rows.len(), 2);
    assert!(rows.rows.iter().all(|r| r["id"] == json!("R2")));
}

// =============================================================================
// Metadata
// =============================================================================

#[tokio::test]
async fn test_metadata_probes() {
    let backend = backend().await;

    assert!(backend.table_exists("release_artists").await.unwrap());
    assert!(!backend.table_exists("playlists").await.unwrap());
    assert!(backend.column_exists("releases", "created_at").await.unwrap());
    assert!(!backend.column_exists("releases", "artist_id").await.unwrap());
    assert!(!backend.column_exists("playlists", "id").await.unwrap());

    let tables = backend.list_tables().await.unwrap();
    assert_eq!(tables, vec!["artists", "labels", "release_artists", "releases", "tracks"]);

    let columns = backend.describe_columns("release_artists").await.unwrap();
    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["release_id", "artist_id", "role"]);
    assert_eq!(columns[0].type_name, "TEXT");
}

#[tokio::test]
async fn test_function_probe_never_fails_the_caller() {
    let backend = backend().await;
    // Older SQLite builds lack pragma_function_list; either answer is false
    let present = backend.function_exists("get_artist_releases").await.unwrap_or(false);
    assert!(!present);
}

#[tokio::test]
async fn test_calls_are_unsupported_on_sqlite() {
    let backend = backend().await;
    let err = backend
        .call(&FunctionCall::new("get_artist_releases").arg("artist_id", "A1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::Unsupported);
}
