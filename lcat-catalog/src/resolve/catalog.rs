//! Catalog-level resolution: keyed lookups, listings and artist releases
//!
//! Contributors come from exactly one source per resolution, chosen from
//! the schema: join-table edges when `release_artists` is usable, else the
//! direct artist column on `releases`, else none. Contributor ids are
//! hydrated into full artists with a batched fetch; ids that cannot be
//! hydrated stay as placeholder artists.

use lcat_common::models::{Artist, ArtistRole, Label, Release, ReleaseArtist, Track};
use serde::Serialize;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::artist_releases::{
    artist_release_chain, ArtistSubject, Harvest, HarvestOrder, BATCH_SIZE, DIRECT_COLUMNS,
    EDGE_TABLE, RELEASES_TABLE,
};
use super::lookup::lookup_chain;
use super::{Confidence, FailureReason, Resolution, ResolveContext, StrategyChain};
use crate::db::{
    value_as_id, BackendKind, Direction, JoinSpec, QueryDescriptor, QueryExecutor, RawRow, RowSet,
    RowShape, SchemaInspector,
};
use crate::normalize::{
    normalize, normalize_all, sort_by_release_date_desc, sort_tracks, stub_artist, UNKNOWN_ARTIST,
};
use crate::pagination::{calculate_pagination, Page};

const ARTISTS_TABLE: &str = "artists";
const TRACKS_TABLE: &str = "tracks";
const LABELS_TABLE: &str = "labels";

/// Artist columns projected when contributors are embedded
const ARTIST_COLUMNS: [&str; 6] = [
    "id",
    "name",
    "image_url",
    "profile_image_url",
    "spotify_url",
    "label_id",
];

/// Identifiers longer than this are rejected as malformed
const MAX_ID_LEN: usize = 128;

/// Where release contributors are read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContributorSource {
    /// `release_artists` edges, embedded in release queries
    Edges {
        target_columns: Vec<String>,
        edge_columns: Vec<String>,
    },
    /// A direct artist column on `releases`
    DirectColumn(&'static str),
    None,
}

/// Payload of an artist → releases resolution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtistReleases {
    /// The artist, when its row could be found
    pub artist: Option<Artist>,
    pub releases: Vec<Release>,
}

pub struct CatalogResolver {
    executor: QueryExecutor,
    inspector: SchemaInspector,
    artist_chain: StrategyChain<ArtistSubject, Harvest>,
    lookup_chain: StrategyChain<QueryDescriptor, RowSet>,
}

fn validate_id(id: &str) -> Result<&str, FailureReason> {
    let id = id.trim();
    if id.is_empty() {
        return Err(FailureReason::InvalidInput("identifier is required".to_string()));
    }
    if id.len() > MAX_ID_LEN || id.chars().any(char::is_control) {
        return Err(FailureReason::InvalidInput("identifier is malformed".to_string()));
    }
    Ok(id)
}

fn not_found<'a>(entity: &'static str, id: &'a str) -> impl FnOnce(FailureReason) -> FailureReason + 'a {
    move |reason| match reason {
        FailureReason::NoRelationship { attempts } => FailureReason::NotFound {
            entity,
            id: id.to_string(),
            attempts,
        },
        other => other,
    }
}

/// An empty listing is a successful answer, not a failure
fn empty_listing<T>(reason: FailureReason) -> Result<Resolution<Vec<T>>, FailureReason> {
    match reason {
        FailureReason::NoRelationship { attempts } => Ok(Resolution {
            value: Vec::new(),
            source: attempts.first().map(|a| a.strategy).unwrap_or("primary_lookup"),
            backend: BackendKind::Primary,
            confidence: Confidence::Relationship,
        }),
        other => Err(other),
    }
}

fn row_ids(sets: &[RowSet], shape_filter: impl Fn(&RowShape) -> bool) -> Vec<String> {
    let mut ids = Vec::new();
    for set in sets.iter().filter(|s| shape_filter(&s.shape)) {
        for row in &set.rows {
            if let Some(id) = row.get("id").and_then(value_as_id) {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
    }
    ids
}

fn direct_edges(sets: &[RowSet], column: &str) -> Vec<ReleaseArtist> {
    sets.iter()
        .flat_map(|set| set.rows.iter())
        .filter_map(|row: &RawRow| {
            Some(ReleaseArtist {
                release_id: row.get("id").and_then(value_as_id)?,
                artist_id: row.get(column).and_then(value_as_id)?,
                role: Some(ArtistRole::Primary),
            })
        })
        .collect()
}

impl CatalogResolver {
    pub fn new(executor: QueryExecutor, inspector: SchemaInspector, heuristic_fallbacks: bool) -> Self {
        Self {
            executor,
            inspector,
            artist_chain: artist_release_chain(heuristic_fallbacks),
            lookup_chain: lookup_chain(),
        }
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    pub fn inspector(&self) -> &SchemaInspector {
        &self.inspector
    }

    fn ctx<'a>(&'a self, cancel: &'a CancellationToken) -> ResolveContext<'a> {
        ResolveContext {
            executor: &self.executor,
            inspector: &self.inspector,
            cancel,
        }
    }

    async fn lookup(
        &self,
        query: QueryDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Resolution<RowSet>, FailureReason> {
        self.lookup_chain.resolve(&query, &self.ctx(cancel)).await
    }

    /// Pick the contributor source from the current schema
    pub async fn contributor_source(&self) -> ContributorSource {
        let edges_usable = self.inspector.table_exists(EDGE_TABLE).await
            && self.inspector.column_exists(EDGE_TABLE, "artist_id").await
            && self.inspector.column_exists(EDGE_TABLE, "release_id").await
            && self.inspector.column_exists(ARTISTS_TABLE, "id").await;

        if edges_usable {
            let mut target_columns = Vec::new();
            for column in ARTIST_COLUMNS {
                if self.inspector.column_exists(ARTISTS_TABLE, column).await {
                    target_columns.push(column.to_string());
                }
            }
            let mut edge_columns = Vec::new();
            if self.inspector.column_exists(EDGE_TABLE, "role").await {
                edge_columns.push("role".to_string());
            }
            return ContributorSource::Edges {
                target_columns,
                edge_columns,
            };
        }

        match self
            .inspector
            .first_present_column(RELEASES_TABLE, &DIRECT_COLUMNS)
            .await
        {
            Some(column) => ContributorSource::DirectColumn(column),
            None => ContributorSource::None,
        }
    }

    /// Base release query for a contributor source
    fn release_query(source: &ContributorSource) -> QueryDescriptor {
        let query = QueryDescriptor::new(RELEASES_TABLE);
        match source {
            ContributorSource::Edges {
                target_columns,
                edge_columns,
            } => query.embed(JoinSpec {
                alias: ARTISTS_TABLE.to_string(),
                through: EDGE_TABLE.to_string(),
                local_key: "release_id".to_string(),
                target_key: "artist_id".to_string(),
                target: ARTISTS_TABLE.to_string(),
                target_columns: target_columns.clone(),
                edge_columns: edge_columns.clone(),
            }),
            ContributorSource::DirectColumn(_) | ContributorSource::None => query,
        }
    }

    /// Normalize release rows and attach contributors from `source`
    async fn finish_releases(
        &self,
        sets: &[RowSet],
        source: &ContributorSource,
        cancel: &CancellationToken,
    ) -> Vec<Release> {
        let mut releases: Vec<Release> = normalize_all(sets);

        let edges = match source {
            ContributorSource::Edges { edge_columns, .. } => {
                // Rows from function calls are never joined
                let bare = row_ids(sets, |shape| *shape == RowShape::Flat);
                if bare.is_empty() {
                    Vec::new()
                } else {
                    self.fetch_edges(&bare, !edge_columns.is_empty(), cancel).await
                }
            }
            ContributorSource::DirectColumn(column) => direct_edges(sets, column),
            ContributorSource::None => Vec::new(),
        };

        self.attach_contributors(&mut releases, edges, cancel).await;
        releases
    }

    async fn fetch_edges(
        &self,
        release_ids: &[String],
        with_role: bool,
        cancel: &CancellationToken,
    ) -> Vec<ReleaseArtist> {
        let mut columns = vec!["release_id", "artist_id"];
        if with_role {
            columns.push("role");
        }

        let mut edges = Vec::new();
        for chunk in release_ids.chunks(BATCH_SIZE) {
            let query = QueryDescriptor::new(EDGE_TABLE)
                .select(columns.iter().copied())
                .any_of("release_id", chunk.to_vec())
                .order_by("release_id", Direction::Asc)
                .order_by("artist_id", Direction::Asc);
            match self.executor.fetch(&query, cancel).await {
                Ok(rows) => edges.extend(rows.rows.iter().filter_map(|row| {
                    Some(ReleaseArtist {
                        release_id: row.get("release_id").and_then(value_as_id)?,
                        artist_id: row.get("artist_id").and_then(value_as_id)?,
                        role: row
                            .get("role")
                            .and_then(value_as_id)
                            .map(|r| ArtistRole::parse(&r)),
                    })
                })),
                Err(failure) => warn!("Edge fetch failed, contributors omitted: {}", failure),
            }
        }
        edges
    }

    /// Hydrate edge artists in batches and add them to their releases
    async fn attach_contributors(
        &self,
        releases: &mut [Release],
        edges: Vec<ReleaseArtist>,
        cancel: &CancellationToken,
    ) {
        if edges.is_empty() {
            return;
        }

        let mut wanted: Vec<String> = Vec::new();
        for edge in &edges {
            if !wanted.contains(&edge.artist_id) {
                wanted.push(edge.artist_id.clone());
            }
        }

        let mut known: HashMap<String, Artist> = HashMap::new();
        for chunk in wanted.chunks(BATCH_SIZE) {
            let query = QueryDescriptor::new(ARTISTS_TABLE).any_of("id", chunk.to_vec());
            match self.executor.fetch(&query, cancel).await {
                Ok(rows) => {
                    for artist in normalize::<Artist>(&rows) {
                        known.insert(artist.id.clone(), artist);
                    }
                }
                Err(failure) => warn!("Contributor hydration failed, using placeholders: {}", failure),
            }
        }
        debug!(wanted = wanted.len(), hydrated = known.len(), "Contributors hydrated");

        for edge in edges {
            if let Some(release) = releases.iter_mut().find(|r| r.id == edge.release_id) {
                let mut artist = known
                    .get(&edge.artist_id)
                    .cloned()
                    .unwrap_or_else(|| stub_artist(&edge.artist_id));
                artist.role = edge.role;
                release.add_artist(artist);
            }
        }
    }

    /// Artist by id
    pub async fn artist(&self, id: &str, cancel: &CancellationToken) -> Result<Resolution<Artist>, FailureReason> {
        let id = validate_id(id)?;
        let query = QueryDescriptor::new(ARTISTS_TABLE).eq("id", id).limit(1);
        let resolution = self.lookup(query, cancel).await.map_err(not_found("artist", id))?;

        let artist = normalize::<Artist>(&resolution.value).into_iter().next();
        match artist {
            Some(artist) => Ok(resolution.map(|_| artist)),
            None => Err(FailureReason::NotFound {
                entity: "artist",
                id: id.to_string(),
                attempts: Vec::new(),
            }),
        }
    }

    /// Releases related to an artist, through the strategy chain
    pub async fn artist_releases(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Resolution<ArtistReleases>, FailureReason> {
        let id = validate_id(id)?;

        let artist = match self.artist(id, cancel).await {
            Ok(resolution) => Some(resolution.value),
            Err(FailureReason::Cancelled { attempts }) => {
                return Err(FailureReason::Cancelled { attempts })
            }
            Err(reason) => {
                warn!(artist_id = id, "Artist lookup failed, resolving without name or label: {}", reason);
                None
            }
        };

        let source = self.contributor_source().await;
        let subject = ArtistSubject {
            artist_id: id.to_string(),
            name: artist
                .as_ref()
                .map(|a| a.name.clone())
                .filter(|name| name != UNKNOWN_ARTIST),
            label_id: artist.as_ref().and_then(|a| a.label_id.clone()),
            releases: Self::release_query(&source),
        };

        let resolution = self.artist_chain.resolve(&subject, &self.ctx(cancel)).await?;
        let mut releases = self
            .finish_releases(&resolution.value.batches, &source, cancel)
            .await;
        if resolution.value.order == HarvestOrder::ReleaseDateDesc {
            sort_by_release_date_desc(&mut releases);
        }

        Ok(resolution.map(|_| ArtistReleases { artist, releases }))
    }

    /// Release by id, with contributors and ordered tracks
    pub async fn release(&self, id: &str, cancel: &CancellationToken) -> Result<Resolution<Release>, FailureReason> {
        let id = validate_id(id)?;
        let source = self.contributor_source().await;
        let query = Self::release_query(&source).eq("id", id).limit(1);
        let resolution = self.lookup(query, cancel).await.map_err(not_found("release", id))?;

        let mut releases = self
            .finish_releases(std::slice::from_ref(&resolution.value), &source, cancel)
            .await;
        let Some(mut release) = releases.pop() else {
            return Err(FailureReason::NotFound {
                entity: "release",
                id: id.to_string(),
                attempts: Vec::new(),
            });
        };

        match self.release_tracks(id, cancel).await {
            Ok(tracks) => release.tracks = tracks.value,
            Err(FailureReason::Cancelled { attempts }) => {
                return Err(FailureReason::Cancelled { attempts })
            }
            Err(reason) => warn!(release_id = id, "Tracks unavailable: {}", reason),
        }

        Ok(resolution.map(|_| release))
    }

    /// Tracks of a release, by track number then id
    pub async fn release_tracks(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Resolution<Vec<Track>>, FailureReason> {
        let id = validate_id(id)?;
        let query = QueryDescriptor::new(TRACKS_TABLE)
            .eq("release_id", id)
            .order_by("track_number", Direction::Asc)
            .order_by("id", Direction::Asc);

        let resolution = match self.lookup(query, cancel).await {
            Ok(resolution) => resolution,
            Err(reason) => return empty_listing(reason),
        };
        Ok(resolution.map(|rows| {
            let mut tracks: Vec<Track> = normalize(&rows);
            sort_tracks(&mut tracks);
            tracks
        }))
    }

    /// One page of artists, by name
    pub async fn artists_page(
        &self,
        page: Option<i64>,
        cancel: &CancellationToken,
    ) -> Result<Resolution<Page<Artist>>, FailureReason> {
        let pagination = calculate_pagination(page);
        let query = QueryDescriptor::new(ARTISTS_TABLE)
            .order_by("name", Direction::Asc)
            .order_by("id", Direction::Asc)
            .offset(pagination.offset)
            .limit(pagination.limit);

        let resolution = match self.lookup(query, cancel).await {
            Ok(resolution) => resolution.map(|rows| normalize::<Artist>(&rows)),
            Err(reason) => empty_listing(reason)?,
        };
        Ok(resolution.map(|artists| Page::from_lookahead(artists, pagination)))
    }

    /// One page of releases, newest first, with contributors
    pub async fn releases_page(
        &self,
        page: Option<i64>,
        cancel: &CancellationToken,
    ) -> Result<Resolution<Page<Release>>, FailureReason> {
        let pagination = calculate_pagination(page);
        let source = self.contributor_source().await;
        let query = Self::release_query(&source)
            .order_by("release_date", Direction::Desc)
            .order_by("id", Direction::Asc)
            .offset(pagination.offset)
            .limit(pagination.limit);

        let resolution = match self.lookup(query, cancel).await {
            Ok(resolution) => resolution,
            Err(reason) => {
                let empty: Resolution<Vec<Release>> = empty_listing(reason)?;
                return Ok(empty.map(|releases| Page::from_lookahead(releases, pagination)));
            }
        };

        let releases = self
            .finish_releases(std::slice::from_ref(&resolution.value), &source, cancel)
            .await;
        Ok(resolution.map(|_| Page::from_lookahead(releases, pagination)))
    }

    /// All labels, by name
    pub async fn labels(&self, cancel: &CancellationToken) -> Result<Resolution<Vec<Label>>, FailureReason> {
        let query = QueryDescriptor::new(LABELS_TABLE)
            .order_by("name", Direction::Asc)
            .order_by("id", Direction::Asc);
        match self.lookup(query, cancel).await {
            Ok(resolution) => Ok(resolution.map(|rows| normalize::<Label>(&rows))),
            Err(reason) => empty_listing(reason),
        }
    }
}
