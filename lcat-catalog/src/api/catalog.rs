//! Catalog endpoints: artists, releases, tracks and labels
//!
//! Each request gets its own cancellation token, a child of the server
//! shutdown token, so in-flight resolutions stop on shutdown.

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use lcat_common::api::Envelope;
use lcat_common::models::{Artist, Label, Release, Track};
use serde::Deserialize;

use super::respond;
use crate::pagination::{calculate_pagination, Page, PAGE_SIZE};
use crate::resolve::ArtistReleases;
use crate::AppState;

/// Query parameters for listings
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    /// Page number (1-indexed)
    pub page: Option<i64>,
}

/// Query parameters for the query-string form of artist releases
#[derive(Debug, Deserialize)]
pub struct ArtistReleasesQuery {
    pub artist_id: Option<String>,
}

fn empty_page<T>(page: Option<i64>) -> Page<T> {
    Page {
        items: Vec::new(),
        page: calculate_pagination(page).page,
        page_size: PAGE_SIZE,
        has_more: false,
    }
}

fn no_releases() -> ArtistReleases {
    ArtistReleases {
        artist: None,
        releases: Vec::new(),
    }
}

fn describe_artist_releases(value: &ArtistReleases) -> String {
    match &value.artist {
        Some(artist) => format!("Found {} releases for {}", value.releases.len(), artist.name),
        None => format!("Found {} releases", value.releases.len()),
    }
}

/// GET /api/artists?page=
pub async fn list_artists(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Json<Envelope<Page<Artist>>> {
    let cancel = state.shutdown.child_token();
    let result = state.resolver.artists_page(query.page, &cancel).await;
    respond("artists", result, Some(empty_page(query.page)), |page| {
        format!("Found {} artists", page.items.len())
    })
}

/// GET /api/artists/:id
pub async fn get_artist(State(state): State<AppState>, Path(id): Path<String>) -> Json<Envelope<Artist>> {
    let cancel = state.shutdown.child_token();
    let result = state.resolver.artist(&id, &cancel).await;
    respond("artist", result, None, |artist| format!("Found artist {}", artist.name))
}

/// GET /api/artists/:id/releases
pub async fn get_artist_releases(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<Envelope<ArtistReleases>> {
    let cancel = state.shutdown.child_token();
    let result = state.resolver.artist_releases(&id, &cancel).await;
    respond("releases", result, Some(no_releases()), describe_artist_releases)
}

/// GET /api/artist-releases?artist_id=
///
/// A missing or blank `artist_id` is rejected without running any strategy.
pub async fn query_artist_releases(
    State(state): State<AppState>,
    Query(query): Query<ArtistReleasesQuery>,
) -> Json<Envelope<ArtistReleases>> {
    let Some(id) = query.artist_id.filter(|id| !id.trim().is_empty()) else {
        return Json(Envelope::failure("Artist id is required", Some(no_releases())));
    };
    get_artist_releases(State(state), Path(id)).await
}

/// GET /api/releases?page=
pub async fn list_releases(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Json<Envelope<Page<Release>>> {
    let cancel = state.shutdown.child_token();
    let result = state.resolver.releases_page(query.page, &cancel).await;
    respond("releases", result, Some(empty_page(query.page)), |page| {
        format!("Found {} releases", page.items.len())
    })
}

/// GET /api/releases/:id
pub async fn get_release(State(state): State<AppState>, Path(id): Path<String>) -> Json<Envelope<Release>> {
    let cancel = state.shutdown.child_token();
    let result = state.resolver.release(&id, &cancel).await;
    respond("release", result, None, |release| {
        format!("Found release {} with {} tracks", release.title, release.tracks.len())
    })
}

/// GET /api/releases/:id/tracks
pub async fn get_release_tracks(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<Envelope<Vec<Track>>> {
    let cancel = state.shutdown.child_token();
    let result = state.resolver.release_tracks(&id, &cancel).await;
    respond("tracks", result, Some(Vec::new()), |tracks| {
        format!("Found {} tracks", tracks.len())
    })
}

/// GET /api/labels
pub async fn list_labels(State(state): State<AppState>) -> Json<Envelope<Vec<Label>>> {
    let cancel = state.shutdown.child_token();
    let result = state.resolver.labels(&cancel).await;
    respond("labels", result, Some(Vec::new()), |labels| {
        format!("Found {} labels", labels.len())
    })
}

/// Build catalog routes
pub fn catalog_routes() -> Router<AppState> {
    Router::new()
        .route("/api/artists", get(list_artists))
        .route("/api/artists/:id", get(get_artist))
        .route("/api/artists/:id/releases", get(get_artist_releases))
        .route("/api/artist-releases", get(query_artist_releases))
        .route("/api/releases", get(list_releases))
        .route("/api/releases/:id", get(get_release))
        .route("/api/releases/:id/tracks", get(get_release_tracks))
        .route("/api/labels", get(list_labels))
        .route("/api/diagnostics", get(super::get_diagnostics))
}
