//! Two-step chain for keyed lookups: primary query, then secondary query
//!
//! Lookups have an unambiguous key, so no heuristic steps are involved.

use async_trait::async_trait;

use super::{Confidence, ResolveContext, Strategy, StrategyChain, Viability};
use crate::db::{BackendKind, ExecFailure, QueryDescriptor, Request, RowSet};

/// Run the subject query on one backend
pub struct BackendLookup {
    kind: BackendKind,
}

impl BackendLookup {
    pub fn new(kind: BackendKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl Strategy<QueryDescriptor, RowSet> for BackendLookup {
    fn name(&self) -> &'static str {
        match self.kind {
            BackendKind::Primary => "primary_lookup",
            BackendKind::Secondary => "secondary_lookup",
        }
    }

    fn confidence(&self) -> Confidence {
        Confidence::Relationship
    }

    async fn viability(&self, _query: &QueryDescriptor, ctx: &ResolveContext<'_>) -> Viability {
        match self.kind {
            BackendKind::Secondary if !ctx.executor.has_secondary() => {
                Viability::NotViable("no secondary backend configured".to_string())
            }
            _ => Viability::Viable,
        }
    }

    async fn run(
        &self,
        query: &QueryDescriptor,
        ctx: &ResolveContext<'_>,
    ) -> Result<RowSet, ExecFailure> {
        ctx.executor
            .execute(self.kind, Request::Select(query), ctx.cancel)
            .await
            .map_err(|failure| ExecFailure {
                target: query.table.clone(),
                failures: vec![failure],
            })
    }
}

pub fn lookup_chain() -> StrategyChain<QueryDescriptor, RowSet> {
    StrategyChain::new(vec![
        Box::new(BackendLookup::new(BackendKind::Primary)),
        Box::new(BackendLookup::new(BackendKind::Secondary)),
    ])
}
