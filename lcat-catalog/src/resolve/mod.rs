//! Relationship resolution as an ordered strategy chain
//!
//! A [`StrategyChain`] is data: an ordered list of [`Strategy`] values. The
//! fold checks each strategy's viability against the schema, runs the
//! viable ones in priority order, and stops at the first non-empty result.
//! Skipped, empty and failed strategies are recorded as [`Attempt`]s and
//! returned inside the failure when nothing resolves.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::db::{BackendKind, ExecFailure, QueryExecutor, RowSet, SchemaInspector};

pub mod artist_releases;
mod catalog;
pub mod lookup;

pub use artist_releases::{artist_release_chain, ArtistSubject, Harvest, HarvestOrder};
pub use catalog::{ArtistReleases, CatalogResolver, ContributorSource};
pub use lookup::{lookup_chain, BackendLookup};

/// Everything a strategy may consult while deciding and running
pub struct ResolveContext<'a> {
    pub executor: &'a QueryExecutor,
    pub inspector: &'a SchemaInspector,
    pub cancel: &'a CancellationToken,
}

/// How strongly a strategy's output is related to the subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Backed by a stored relationship (edge, foreign key, procedure)
    Relationship,
    /// Inferred from shared attributes (title, label)
    Heuristic,
    /// Not related to the subject at all
    Unrelated,
}

impl Confidence {
    pub fn as_str(self) -> &'static str {
        match self {
            Confidence::Relationship => "relationship",
            Confidence::Heuristic => "heuristic",
            Confidence::Unrelated => "unrelated",
        }
    }
}

/// Whether a strategy may run given the current schema and subject
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Viability {
    Viable,
    NotViable(String),
}

/// What happened to one strategy during a resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Skipped { reason: String },
    Empty,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attempt {
    pub strategy: &'static str,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

/// Why a resolution produced no value
#[derive(Debug, Clone, Error)]
pub enum FailureReason {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{entity} '{id}' not found")]
    NotFound {
        entity: &'static str,
        id: String,
        attempts: Vec<Attempt>,
    },

    #[error("all strategies failed")]
    Exhausted { attempts: Vec<Attempt> },

    #[error("no relationship found")]
    NoRelationship { attempts: Vec<Attempt> },

    #[error("request cancelled")]
    Cancelled { attempts: Vec<Attempt> },
}

impl FailureReason {
    pub fn attempts(&self) -> &[Attempt] {
        match self {
            FailureReason::InvalidInput(_) => &[],
            FailureReason::NotFound { attempts, .. }
            | FailureReason::Exhausted { attempts }
            | FailureReason::NoRelationship { attempts }
            | FailureReason::Cancelled { attempts } => attempts,
        }
    }
}

/// A resolved value plus where it came from
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution<T> {
    pub value: T,
    /// Name of the winning strategy
    pub source: &'static str,
    pub backend: BackendKind,
    pub confidence: Confidence,
}

impl<T> Resolution<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Resolution<U> {
        Resolution {
            value: f(self.value),
            source: self.source,
            backend: self.backend,
            confidence: self.confidence,
        }
    }
}

/// Output of a strategy run
pub trait Yield: Send {
    fn is_empty(&self) -> bool;

    /// Backend that produced the (first non-empty part of the) output
    fn backend(&self) -> BackendKind;
}

impl Yield for RowSet {
    fn is_empty(&self) -> bool {
        RowSet::is_empty(self)
    }

    fn backend(&self) -> BackendKind {
        self.backend
    }
}

/// One way of resolving `S` into `T`
#[async_trait]
pub trait Strategy<S: Sync, T: Yield>: Send + Sync {
    fn name(&self) -> &'static str;

    fn confidence(&self) -> Confidence;

    async fn viability(&self, subject: &S, ctx: &ResolveContext<'_>) -> Viability;

    async fn run(&self, subject: &S, ctx: &ResolveContext<'_>) -> Result<T, ExecFailure>;
}

/// Ordered strategies folded first-non-empty-wins
pub struct StrategyChain<S: Sync, T: Yield> {
    strategies: Vec<Box<dyn Strategy<S, T>>>,
}

impl<S: Sync, T: Yield> StrategyChain<S, T> {
    pub fn new(strategies: Vec<Box<dyn Strategy<S, T>>>) -> Self {
        Self { strategies }
    }

    /// Strategy names in priority order
    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub async fn resolve(
        &self,
        subject: &S,
        ctx: &ResolveContext<'_>,
    ) -> Result<Resolution<T>, FailureReason> {
        let mut attempts = Vec::new();
        let mut any_failed = false;

        for strategy in &self.strategies {
            let name = strategy.name();

            if ctx.cancel.is_cancelled() {
                return Err(FailureReason::Cancelled { attempts });
            }

            if let Viability::NotViable(reason) = strategy.viability(subject, ctx).await {
                debug!(strategy = name, "Skipping strategy: {}", reason);
                attempts.push(Attempt {
                    strategy: name,
                    outcome: AttemptOutcome::Skipped { reason },
                });
                continue;
            }

            match strategy.run(subject, ctx).await {
                Ok(value) if !value.is_empty() => {
                    info!(strategy = name, backend = %value.backend(), "Resolved");
                    return Ok(Resolution {
                        backend: value.backend(),
                        value,
                        source: name,
                        confidence: strategy.confidence(),
                    });
                }
                Ok(_) => {
                    debug!(strategy = name, "Strategy returned nothing");
                    attempts.push(Attempt {
                        strategy: name,
                        outcome: AttemptOutcome::Empty,
                    });
                }
                Err(failure) if failure.was_cancelled() => {
                    return Err(FailureReason::Cancelled { attempts });
                }
                Err(failure) => {
                    warn!(strategy = name, "Strategy failed: {}", failure);
                    any_failed = true;
                    attempts.push(Attempt {
                        strategy: name,
                        outcome: AttemptOutcome::Failed {
                            reason: failure.to_string(),
                        },
                    });
                }
            }
        }

        if any_failed {
            Err(FailureReason::Exhausted { attempts })
        } else {
            Err(FailureReason::NoRelationship { attempts })
        }
    }
}
