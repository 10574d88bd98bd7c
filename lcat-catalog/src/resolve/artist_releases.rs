//! Artist → releases strategies, in priority order
//!
//! | # | strategy           | viable when                                   | confidence   |
//! |---|--------------------|-----------------------------------------------|--------------|
//! | 1 | `join_edge`        | `release_artists.artist_id` exists            | relationship |
//! | 2 | `direct_column`    | `releases.artist_id` / `primary_artist_id`    | relationship |
//! | 3 | `stored_procedure` | `get_artist_releases` exists                  | relationship |
//! | 4 | `title_match`      | artist name known, at least 4 characters      | heuristic    |
//! | 5 | `label_sibling`    | artist label known                            | heuristic    |
//! | 6 | `recent_sample`    | always                                        | unrelated    |
//!
//! Strategies return raw row sets; contributors and ordering are applied by
//! the catalog resolver once a winner is known.

use async_trait::async_trait;

use super::{Confidence, ResolveContext, Strategy, StrategyChain, Viability, Yield};
use crate::db::{BackendKind, Direction, ExecFailure, FunctionCall, QueryDescriptor, RowSet};

pub const EDGE_TABLE: &str = "release_artists";
pub const RELEASES_TABLE: &str = "releases";
pub const STORED_PROCEDURE: &str = "get_artist_releases";

/// Direct artist columns on `releases`, in preference order
pub const DIRECT_COLUMNS: [&str; 2] = ["artist_id", "primary_artist_id"];

/// Maximum ids per `IN (...)` batch
pub const BATCH_SIZE: usize = 10;

pub const MIN_TITLE_MATCH_CHARS: usize = 4;
pub const TITLE_MATCH_LIMIT: u32 = 20;
pub const LABEL_SIBLING_LIMIT: u32 = 10;
pub const RECENT_SAMPLE_LIMIT: u32 = 5;

/// The artist being resolved, plus the release query template
#[derive(Debug, Clone)]
pub struct ArtistSubject {
    pub artist_id: String,
    /// Known only when the artist row was found
    pub name: Option<String>,
    pub label_id: Option<String>,
    /// Base release query (embeds contributors when edges are the source)
    pub releases: QueryDescriptor,
}

/// How the winning rows must be ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestOrder {
    /// Merge batches, newest release first
    ReleaseDateDesc,
    /// Keep the backend's order
    AsReturned,
}

/// Row sets produced by one strategy run
#[derive(Debug, Clone)]
pub struct Harvest {
    pub batches: Vec<RowSet>,
    pub order: HarvestOrder,
}

impl Harvest {
    fn single(rows: RowSet, order: HarvestOrder) -> Self {
        Self {
            batches: vec![rows],
            order,
        }
    }
}

impl Yield for Harvest {
    fn is_empty(&self) -> bool {
        self.batches.iter().all(RowSet::is_empty)
    }

    fn backend(&self) -> BackendKind {
        self.batches
            .iter()
            .find(|b| !b.is_empty())
            .or_else(|| self.batches.first())
            .map(|b| b.backend)
            .unwrap_or(BackendKind::Primary)
    }
}

fn newest_first(subject: &ArtistSubject) -> QueryDescriptor {
    subject
        .releases
        .clone()
        .order_by("release_date", Direction::Desc)
}

/// Distinct ids in first-appearance order
fn distinct_ids(rows: &RowSet, column: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for row in &rows.rows {
        if let Some(id) = row.get(column).and_then(crate::db::value_as_id) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}

/// Release ids linked through `release_artists`, fetched in batches
pub struct JoinEdge;

#[async_trait]
impl Strategy<ArtistSubject, Harvest> for JoinEdge {
    fn name(&self) -> &'static str {
        "join_edge"
    }

    fn confidence(&self) -> Confidence {
        Confidence::Relationship
    }

    async fn viability(&self, _: &ArtistSubject, ctx: &ResolveContext<'_>) -> Viability {
        if !ctx.inspector.table_exists(EDGE_TABLE).await {
            return Viability::NotViable(format!("table {} missing", EDGE_TABLE));
        }
        if !ctx.inspector.column_exists(EDGE_TABLE, "artist_id").await {
            return Viability::NotViable(format!("column {}.artist_id missing", EDGE_TABLE));
        }
        Viability::Viable
    }

    async fn run(&self, subject: &ArtistSubject, ctx: &ResolveContext<'_>) -> Result<Harvest, ExecFailure> {
        let edges = QueryDescriptor::new(EDGE_TABLE)
            .select(["release_id"])
            .eq("artist_id", subject.artist_id.as_str());
        let edge_rows = ctx.executor.fetch(&edges, ctx.cancel).await?;

        let ids = distinct_ids(&edge_rows, "release_id");
        if ids.is_empty() {
            return Ok(Harvest::single(edge_rows, HarvestOrder::ReleaseDateDesc));
        }

        let mut batches = Vec::with_capacity(ids.len().div_ceil(BATCH_SIZE));
        for chunk in ids.chunks(BATCH_SIZE) {
            let query = newest_first(subject).any_of("id", chunk.to_vec());
            batches.push(ctx.executor.fetch(&query, ctx.cancel).await?);
        }

        Ok(Harvest {
            batches,
            order: HarvestOrder::ReleaseDateDesc,
        })
    }
}

/// Equality on a direct artist column of `releases`
pub struct DirectColumn;

#[async_trait]
impl Strategy<ArtistSubject, Harvest> for DirectColumn {
    fn name(&self) -> &'static str {
        "direct_column"
    }

    fn confidence(&self) -> Confidence {
        Confidence::Relationship
    }

    async fn viability(&self, _: &ArtistSubject, ctx: &ResolveContext<'_>) -> Viability {
        match ctx
            .inspector
            .first_present_column(RELEASES_TABLE, &DIRECT_COLUMNS)
            .await
        {
            Some(_) => Viability::Viable,
            None => Viability::NotViable("releases has no direct artist column".to_string()),
        }
    }

    async fn run(&self, subject: &ArtistSubject, ctx: &ResolveContext<'_>) -> Result<Harvest, ExecFailure> {
        let column = ctx
            .inspector
            .first_present_column(RELEASES_TABLE, &DIRECT_COLUMNS)
            .await
            .unwrap_or(DIRECT_COLUMNS[0]);
        let query = newest_first(subject).eq(column, subject.artist_id.as_str());
        let rows = ctx.executor.fetch(&query, ctx.cancel).await?;
        Ok(Harvest::single(rows, HarvestOrder::ReleaseDateDesc))
    }
}

/// Server-side `get_artist_releases(artist_id)`
pub struct StoredProcedure;

#[async_trait]
impl Strategy<ArtistSubject, Harvest> for StoredProcedure {
    fn name(&self) -> &'static str {
        "stored_procedure"
    }

    fn confidence(&self) -> Confidence {
        Confidence::Relationship
    }

    async fn viability(&self, _: &ArtistSubject, ctx: &ResolveContext<'_>) -> Viability {
        if ctx.inspector.function_exists(STORED_PROCEDURE).await {
            Viability::Viable
        } else {
            Viability::NotViable(format!("function {} missing", STORED_PROCEDURE))
        }
    }

    async fn run(&self, subject: &ArtistSubject, ctx: &ResolveContext<'_>) -> Result<Harvest, ExecFailure> {
        let call = FunctionCall::new(STORED_PROCEDURE).arg("artist_id", subject.artist_id.as_str());
        let rows = ctx.executor.call(&call, ctx.cancel).await?;
        Ok(Harvest::single(rows, HarvestOrder::AsReturned))
    }
}

/// Releases whose title contains the artist name
pub struct TitleMatch;

#[async_trait]
impl Strategy<ArtistSubject, Harvest> for TitleMatch {
    fn name(&self) -> &'static str {
        "title_match"
    }

    fn confidence(&self) -> Confidence {
        Confidence::Heuristic
    }

    async fn viability(&self, subject: &ArtistSubject, _: &ResolveContext<'_>) -> Viability {
        match subject.name.as_deref().map(str::trim) {
            None => Viability::NotViable("artist name unknown".to_string()),
            Some(name) if name.chars().count() < MIN_TITLE_MATCH_CHARS => Viability::NotViable(
                format!("artist name shorter than {} characters", MIN_TITLE_MATCH_CHARS),
            ),
            Some(_) => Viability::Viable,
        }
    }

    async fn run(&self, subject: &ArtistSubject, ctx: &ResolveContext<'_>) -> Result<Harvest, ExecFailure> {
        let name = subject.name.as_deref().unwrap_or_default().trim();
        let query = newest_first(subject)
            .contains("title", name)
            .limit(TITLE_MATCH_LIMIT);
        let rows = ctx.executor.fetch(&query, ctx.cancel).await?;
        Ok(Harvest::single(rows, HarvestOrder::ReleaseDateDesc))
    }
}

/// Other releases on the artist's label
pub struct LabelSibling;

#[async_trait]
impl Strategy<ArtistSubject, Harvest> for LabelSibling {
    fn name(&self) -> &'static str {
        "label_sibling"
    }

    fn confidence(&self) -> Confidence {
        Confidence::Heuristic
    }

    async fn viability(&self, subject: &ArtistSubject, _: &ResolveContext<'_>) -> Viability {
        if subject.label_id.is_some() {
            Viability::Viable
        } else {
            Viability::NotViable("artist has no label".to_string())
        }
    }

    async fn run(&self, subject: &ArtistSubject, ctx: &ResolveContext<'_>) -> Result<Harvest, ExecFailure> {
        let label = subject.label_id.as_deref().unwrap_or_default();
        let query = newest_first(subject)
            .eq("label_id", label)
            .limit(LABEL_SIBLING_LIMIT);
        let rows = ctx.executor.fetch(&query, ctx.cancel).await?;
        Ok(Harvest::single(rows, HarvestOrder::ReleaseDateDesc))
    }
}

/// Most recently created releases, regardless of artist
pub struct RecentSample;

#[async_trait]
impl Strategy<ArtistSubject, Harvest> for RecentSample {
    fn name(&self) -> &'static str {
        "recent_sample"
    }

    fn confidence(&self) -> Confidence {
        Confidence::Unrelated
    }

    async fn viability(&self, _: &ArtistSubject, _: &ResolveContext<'_>) -> Viability {
        Viability::Viable
    }

    async fn run(&self, subject: &ArtistSubject, ctx: &ResolveContext<'_>) -> Result<Harvest, ExecFailure> {
        let (column, order) = if ctx.inspector.column_exists(RELEASES_TABLE, "created_at").await {
            ("created_at", HarvestOrder::AsReturned)
        } else {
            ("release_date", HarvestOrder::ReleaseDateDesc)
        };
        let query = subject
            .releases
            .clone()
            .order_by(column, Direction::Desc)
            .limit(RECENT_SAMPLE_LIMIT);
        let rows = ctx.executor.fetch(&query, ctx.cancel).await?;
        Ok(Harvest::single(rows, order))
    }
}

/// Artist → releases chain; heuristics (4–6) only when enabled
pub fn artist_release_chain(heuristic_fallbacks: bool) -> StrategyChain<ArtistSubject, Harvest> {
    let mut strategies: Vec<Box<dyn Strategy<ArtistSubject, Harvest>>> = vec![
        Box::new(JoinEdge),
        Box::new(DirectColumn),
        Box::new(StoredProcedure),
    ];
    if heuristic_fallbacks {
        strategies.push(Box::new(TitleMatch));
        strategies.push(Box::new(LabelSibling));
        strategies.push(Box::new(RecentSample));
    }
    StrategyChain::new(strategies)
}
