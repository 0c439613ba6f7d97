use std::collections::HashSet;
use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::cache::CacheStats;
use crate::consensus::{ConsensusSet, ConsensusSummary, aggregate};
use crate::domain::{Organism, RawIdentifier, Release, SourceDatabase, SourceRow};
use crate::error::OrthoError;
use crate::input::SourceRows;
use crate::lifecycle::{LifecycleOutcome, LifecycleSource, LifecycleTracker};
use crate::provider::LookupProvider;
use crate::reconcile::{ReconciledSource, ReconciliationStats, Reconciler, pair_sets};
use crate::resolver::{ResolvedIdentifier, Resolver};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink: Sync {
    fn event(&self, event: ProgressEvent);
}

pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn event(&self, _event: ProgressEvent) {}
}

/// Forwards progress to `tracing` at info level.
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => tracing::info!(?elapsed, "{}", event.message),
            None => tracing::info!("{}", event.message),
        }
    }
}

/// Parsed rows of one source database.
#[derive(Debug, Clone)]
pub struct SourceInput {
    pub database: SourceDatabase,
    pub rows: Vec<SourceRow>,
    /// Records dropped while reading the source file.
    pub malformed_records: usize,
}

impl SourceInput {
    pub fn new(database: SourceDatabase, rows: Vec<SourceRow>) -> Self {
        Self {
            database,
            rows,
            malformed_records: 0,
        }
    }

    pub fn from_rows(database: SourceDatabase, read: SourceRows) -> Self {
        Self {
            database,
            rows: read.rows,
            malformed_records: read.malformed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub release: Release,
    pub sources: Vec<ReconciledSource>,
    pub consensus: ConsensusSet,
    pub dropped_by_reference: usize,
    pub resolver_cache: CacheStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source: SourceDatabase,
    pub stats: ReconciliationStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub release: String,
    pub sources: Vec<SourceReport>,
    pub consensus: ConsensusSummary,
    pub dropped_by_reference: usize,
    pub resolver_cache: CacheStats,
}

impl RunResult {
    pub fn report(&self) -> RunReport {
        RunReport {
            release: self.release.to_string(),
            sources: self
                .sources
                .iter()
                .map(|source| SourceReport {
                    source: source.source,
                    stats: source.stats.clone(),
                })
                .collect(),
            consensus: self.consensus.summary(),
            dropped_by_reference: self.dropped_by_reference,
            resolver_cache: self.resolver_cache,
        }
    }
}

/// A run stopped by a systemic error; sources that finished are kept.
#[derive(Debug)]
pub struct RunFailure {
    pub error: OrthoError,
    pub completed: Vec<ReconciledSource>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IdentifierReport {
    pub resolved: ResolvedIdentifier,
    pub lifecycle: Option<LifecycleOutcome>,
    pub lifecycle_error: Option<String>,
}

impl IdentifierReport {
    pub fn final_id(&self) -> Option<&str> {
        match &self.lifecycle {
            Some(outcome) => outcome.final_id.as_deref(),
            None if self.lifecycle_error.is_some() => None,
            None => self.resolved.canonical(),
        }
    }
}

pub struct App<L: LookupProvider, S: LifecycleSource> {
    resolver: Resolver<L>,
    tracker: LifecycleTracker<S>,
    human_reference: Option<HashSet<String>>,
}

impl<L: LookupProvider, S: LifecycleSource> App<L, S> {
    pub fn new(resolver: Resolver<L>, tracker: LifecycleTracker<S>) -> Self {
        Self {
            resolver,
            tracker,
            human_reference: None,
        }
    }

    /// Human genes allowed into the consensus; others are dropped after aggregation.
    pub fn with_human_reference(mut self, genes: HashSet<String>) -> Self {
        self.human_reference = Some(genes);
        self
    }

    pub fn resolver(&self) -> &Resolver<L> {
        &self.resolver
    }

    pub fn tracker(&self) -> &LifecycleTracker<S> {
        &self.tracker
    }

    /// Reconciles every source on its own thread, sharing the resolver and
    /// tracker caches, then aggregates. A fatal error in one source raises
    /// the abort flag so the others stop at their next row.
    pub fn run(&self, inputs: &[SourceInput], sink: &dyn ProgressSink) -> Result<RunResult, RunFailure> {
        let started = Instant::now();
        sink.event(ProgressEvent {
            message: format!(
                "phase=Resolve; sources={}; release={}",
                inputs.len(),
                self.tracker.release()
            ),
            elapsed: None,
        });

        let abort = AtomicBool::new(false);
        let outcomes: Vec<Result<ReconciledSource, OrthoError>> = thread::scope(|scope| {
            let handles = inputs
                .iter()
                .map(|input| {
                    let abort = &abort;
                    scope.spawn(move || self.reconcile_one(input, abort, sink))
                })
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(outcome) => outcome,
                    Err(payload) => panic::resume_unwind(payload),
                })
                .collect()
        });

        let mut completed = Vec::new();
        let mut first_error: Option<OrthoError> = None;
        for outcome in outcomes {
            match outcome {
                Ok(result) => completed.push(result),
                Err(OrthoError::Aborted) => {
                    first_error.get_or_insert(OrthoError::Aborted);
                }
                Err(err) => {
                    if matches!(first_error, None | Some(OrthoError::Aborted)) {
                        first_error = Some(err);
                    }
                }
            }
        }
        completed.sort_by_key(|result| result.source);
        if let Some(error) = first_error {
            tracing::error!(%error, completed = completed.len(), "run aborted");
            return Err(RunFailure { error, completed });
        }

        sink.event(ProgressEvent {
            message: "phase=Aggregate; building consensus".to_string(),
            elapsed: Some(started.elapsed()),
        });
        let mut consensus = aggregate(&pair_sets(&completed));
        let dropped_by_reference = match &self.human_reference {
            Some(reference) => consensus.restrict_human(reference),
            None => 0,
        };
        tracing::info!(
            pairs = consensus.len(),
            dropped_by_reference,
            "consensus built"
        );

        Ok(RunResult {
            release: self.tracker.release().clone(),
            sources: completed,
            consensus,
            dropped_by_reference,
            resolver_cache: self.resolver.cache_stats(),
        })
    }

    fn reconcile_one(
        &self,
        input: &SourceInput,
        abort: &AtomicBool,
        sink: &dyn ProgressSink,
    ) -> Result<ReconciledSource, OrthoError> {
        let started = Instant::now();
        sink.event(ProgressEvent {
            message: format!(
                "phase=Reconcile; source={}; rows={}",
                input.database,
                input.rows.len()
            ),
            elapsed: None,
        });
        let result = Reconciler::new(&self.resolver, &self.tracker)
            .with_abort(abort)
            .reconcile(input.database, &input.rows)
            .map(|mut reconciled| {
                reconciled.stats.malformed_rows += input.malformed_records;
                reconciled
            });
        match &result {
            Ok(reconciled) => sink.event(ProgressEvent {
                message: format!(
                    "phase=Reconcile; source={}; pairs={}; unresolved={}",
                    input.database, reconciled.stats.output_pairs, reconciled.stats.unresolved_count
                ),
                elapsed: Some(started.elapsed()),
            }),
            Err(err) => {
                if err.is_fatal() {
                    abort.store(true, Ordering::Relaxed);
                }
                sink.event(ProgressEvent {
                    message: format!("phase=Reconcile; source={}; failed: {err}", input.database),
                    elapsed: Some(started.elapsed()),
                });
            }
        }
        result
    }

    /// Resolves one identifier and, for worm ids, follows its lifecycle.
    pub fn resolve_one(&self, raw: &RawIdentifier) -> Result<IdentifierReport, OrthoError> {
        let resolved = self
            .resolver
            .resolve(raw, raw.organism.target_namespace())?;
        let mut report = IdentifierReport {
            resolved,
            lifecycle: None,
            lifecycle_error: None,
        };
        if raw.organism != Organism::Worm {
            return Ok(report);
        }
        let Some(canonical) = report.resolved.canonical_value.clone() else {
            return Ok(report);
        };
        match self.tracker.apply(&canonical) {
            Ok(outcome) => report.lifecycle = Some(outcome),
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                tracing::warn!(id = %canonical, error = %err, "lifecycle lookup failed");
                report.lifecycle_error = Some(err.to_string());
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::domain::{Namespace, RawPair};
    use crate::lifecycle::LifecycleTable;
    use crate::tables::{OverrideTable, TableLookup};

    struct Recorder(Mutex<Vec<String>>);

    impl ProgressSink for Recorder {
        fn event(&self, event: ProgressEvent) {
            self.0.lock().unwrap().push(event.message);
        }
    }

    #[test]
    fn progress_mentions_each_phase() {
        let release: Release = "WS255".parse().unwrap();
        let app = App::new(
            Resolver::new(TableLookup::new(), OverrideTable::new()),
            LifecycleTracker::new(LifecycleTable::new(release.clone()), release),
        );
        let rows = vec![SourceRow::Pair(RawPair {
            worm: RawIdentifier::worm("WBGene00000001", Namespace::WormBaseId).unwrap(),
            human: RawIdentifier::human("ENSG00000000001", Namespace::EnsemblGeneId).unwrap(),
        })];
        let sink = Recorder(Mutex::new(Vec::new()));
        let result = app
            .run(&[SourceInput::new(SourceDatabase::Oma, rows)], &sink)
            .unwrap();
        assert_eq!(result.consensus.len(), 1);
        let messages = sink.0.into_inner().unwrap();
        assert!(messages[0].starts_with("phase=Resolve"));
        assert!(messages.iter().any(|m| m.contains("source=OMA; pairs=1")));
        assert!(messages.last().unwrap().starts_with("phase=Aggregate"));
    }
}
