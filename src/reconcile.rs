use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

use crate::domain::{Namespace, Organism, OrthologPair, RawIdentifier, SourceDatabase, SourceRow};
use crate::error::OrthoError;
use crate::group;
use crate::lifecycle::{
    LifecycleEvent, LifecycleKind, LifecycleOutcome, LifecycleSource, LifecycleTracker,
};
use crate::provider::LookupProvider;
use crate::resolver::Resolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailedSide {
    Worm,
    Human,
    Both,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedRow {
    pub row: usize,
    pub worm_raw: RawIdentifier,
    pub human_raw: RawIdentifier,
    pub side: FailedSide,
    pub detail: String,
    pub lifecycle_cycle: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairProvenance {
    pub row: usize,
    pub pair: OrthologPair,
    pub worm_raw: RawIdentifier,
    pub human_raw: RawIdentifier,
    /// Worm id as resolved, before lifecycle tracking.
    pub worm_resolved: String,
    pub lifecycle: Vec<LifecycleEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationStats {
    pub input_rows: usize,
    pub expanded_pairs: usize,
    pub output_pairs: usize,
    pub duplicate_pairs: usize,
    pub unresolved_count: usize,
    pub unresolved_worm: usize,
    pub unresolved_human: usize,
    pub malformed_rows: usize,
    pub retired_worm_ids: usize,
    pub lifecycle_cycles: usize,
    pub lifecycle_events: BTreeMap<LifecycleKind, usize>,
    pub worm_ids_before: usize,
    pub human_ids_before: usize,
    pub worm_ids_after: usize,
    pub human_ids_after: usize,
}

impl ReconciliationStats {
    pub fn lifecycle_count(&self, kind: LifecycleKind) -> usize {
        self.lifecycle_events.get(&kind).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciledSource {
    pub source: SourceDatabase,
    pub pairs: BTreeSet<OrthologPair>,
    pub provenance: Vec<PairProvenance>,
    pub unresolved: Vec<UnresolvedRow>,
    pub stats: ReconciliationStats,
}

enum WormSide {
    Current {
        resolved: String,
        outcome: LifecycleOutcome,
    },
    Failed {
        detail: String,
        cycle: bool,
    },
}

/// Worm-side lifecycle results already counted for this source.
#[derive(Default)]
struct LifecycleTally {
    seen: HashSet<String>,
}

/// Per-source pipeline: expansion, resolution, lifecycle tracking and dedup.
pub struct Reconciler<'a, L: LookupProvider, S: LifecycleSource> {
    resolver: &'a Resolver<L>,
    tracker: &'a LifecycleTracker<S>,
    abort: Option<&'a AtomicBool>,
}

impl<'a, L: LookupProvider, S: LifecycleSource> Reconciler<'a, L, S> {
    pub fn new(resolver: &'a Resolver<L>, tracker: &'a LifecycleTracker<S>) -> Self {
        Self {
            resolver,
            tracker,
            abort: None,
        }
    }

    /// Stops at the next row once `flag` is raised by another task.
    pub fn with_abort(mut self, flag: &'a AtomicBool) -> Self {
        self.abort = Some(flag);
        self
    }

    pub fn reconcile(
        &self,
        source: SourceDatabase,
        rows: &[SourceRow],
    ) -> Result<ReconciledSource, OrthoError> {
        tracing::info!(%source, rows = rows.len(), "reconciling source");
        let mut stats = ReconciliationStats {
            input_rows: rows.len(),
            ..ReconciliationStats::default()
        };
        let mut pairs = BTreeSet::new();
        let mut provenance = Vec::new();
        let mut unresolved = Vec::new();
        let mut tally = LifecycleTally::default();
        let mut worm_before: HashSet<(Namespace, String)> = HashSet::new();
        let mut human_before: HashSet<(Namespace, String)> = HashSet::new();

        for (index, row) in rows.iter().enumerate() {
            if self.abort.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                return Err(OrthoError::Aborted);
            }
            let candidates = match row {
                SourceRow::Pair(pair) => {
                    if pair.worm.organism != Organism::Worm || pair.human.organism != Organism::Human
                    {
                        tracing::warn!(
                            %source,
                            row = index,
                            worm = %pair.worm,
                            human = %pair.human,
                            "pair with mismatched organism tags"
                        );
                        stats.malformed_rows += 1;
                        continue;
                    }
                    vec![(pair.worm.clone(), pair.human.clone())]
                }
                SourceRow::Group(group) => match group::expand(group) {
                    Ok(expanded) => expanded,
                    Err(err) => {
                        tracing::warn!(%source, error = %err, "skipping group");
                        stats.malformed_rows += 1;
                        continue;
                    }
                },
            };
            stats.expanded_pairs += candidates.len();

            for (worm_raw, human_raw) in candidates {
                worm_before.insert((worm_raw.namespace, worm_raw.value.clone()));
                human_before.insert((human_raw.namespace, human_raw.value.clone()));

                let worm = self.worm_side(&worm_raw, &mut tally, &mut stats)?;
                let human = self
                    .resolver
                    .resolve(&human_raw, Organism::Human.target_namespace())?;

                let human_path = human.path_summary();
                match (worm, human.canonical_value) {
                    (
                        WormSide::Current {
                            resolved,
                            outcome:
                                LifecycleOutcome {
                                    final_id: Some(worm_id),
                                    events,
                                },
                        },
                        Some(human_id),
                    ) => {
                        let pair = OrthologPair {
                            worm_canonical: worm_id,
                            human_canonical: human_id,
                            source_database: source,
                        };
                        if !pairs.insert(pair.clone()) {
                            stats.duplicate_pairs += 1;
                        }
                        provenance.push(PairProvenance {
                            row: index,
                            pair,
                            worm_raw,
                            human_raw,
                            worm_resolved: resolved,
                            lifecycle: events,
                        });
                    }
                    (worm, human_id) => {
                        let (worm_failed, detail, cycle) = match worm {
                            WormSide::Failed { detail, cycle } => (true, detail, cycle),
                            WormSide::Current { outcome, .. } => match outcome.final_id {
                                Some(_) => (false, String::new(), false),
                                None => (true, retired_detail(&outcome), false),
                            },
                        };
                        let human_failed = human_id.is_none();
                        let side = match (worm_failed, human_failed) {
                            (true, true) => FailedSide::Both,
                            (true, false) => FailedSide::Worm,
                            _ => FailedSide::Human,
                        };
                        let detail = if human_failed {
                            let human_detail = format!("human unresolved ({human_path})");
                            if detail.is_empty() {
                                human_detail
                            } else {
                                format!("{detail}; {human_detail}")
                            }
                        } else {
                            detail
                        };
                        if worm_failed {
                            stats.unresolved_worm += 1;
                        }
                        if human_failed {
                            stats.unresolved_human += 1;
                        }
                        stats.unresolved_count += 1;
                        tracing::debug!(
                            %source,
                            row = index,
                            worm = %worm_raw,
                            human = %human_raw,
                            %detail,
                            "row unresolved"
                        );
                        unresolved.push(UnresolvedRow {
                            row: index,
                            worm_raw,
                            human_raw,
                            side,
                            detail,
                            lifecycle_cycle: cycle,
                        });
                    }
                }
            }
        }

        stats.output_pairs = pairs.len();
        stats.worm_ids_before = worm_before.len();
        stats.human_ids_before = human_before.len();
        stats.worm_ids_after = pairs
            .iter()
            .map(|pair| pair.worm_canonical.as_str())
            .collect::<HashSet<_>>()
            .len();
        stats.human_ids_after = pairs
            .iter()
            .map(|pair| pair.human_canonical.as_str())
            .collect::<HashSet<_>>()
            .len();

        tracing::info!(
            %source,
            input_rows = stats.input_rows,
            output_pairs = stats.output_pairs,
            unresolved = stats.unresolved_count,
            retired = stats.retired_worm_ids,
            cycles = stats.lifecycle_cycles,
            "source reconciled"
        );

        Ok(ReconciledSource {
            source,
            pairs,
            provenance,
            unresolved,
            stats,
        })
    }

    fn worm_side(
        &self,
        raw: &RawIdentifier,
        tally: &mut LifecycleTally,
        stats: &mut ReconciliationStats,
    ) -> Result<WormSide, OrthoError> {
        let resolved = self
            .resolver
            .resolve(raw, Organism::Worm.target_namespace())?;
        let Some(canonical) = resolved.canonical_value else {
            return Ok(WormSide::Failed {
                detail: format!("worm unresolved ({})", resolved.path_summary()),
                cycle: false,
            });
        };
        let first_sighting = tally.seen.insert(canonical.clone());
        match self.tracker.apply(&canonical) {
            Ok(outcome) => {
                if first_sighting {
                    for event in &outcome.events {
                        *stats.lifecycle_events.entry(event.kind).or_default() += 1;
                    }
                    if outcome.is_retired() {
                        stats.retired_worm_ids += 1;
                    }
                }
                Ok(WormSide::Current {
                    resolved: canonical,
                    outcome,
                })
            }
            Err(err) if err.is_fatal() => Err(err),
            Err(err) if err.is_lifecycle_corruption() => {
                if first_sighting {
                    tracing::warn!(
                        id = %canonical,
                        error = %err,
                        "lifecycle cycle in change table; id left unresolved"
                    );
                    stats.lifecycle_cycles += 1;
                }
                Ok(WormSide::Failed {
                    detail: err.to_string(),
                    cycle: true,
                })
            }
            Err(err) => {
                tracing::warn!(id = %canonical, error = %err, "lifecycle lookup failed");
                Ok(WormSide::Failed {
                    detail: err.to_string(),
                    cycle: false,
                })
            }
        }
    }
}

fn retired_detail(outcome: &LifecycleOutcome) -> String {
    match outcome.events.last() {
        Some(event) => format!("worm id {} retired ({})", event.from_id, event.kind),
        None => "worm id retired".to_string(),
    }
}

/// Distinct pairs per source, the shape the consensus aggregator consumes.
pub fn pair_sets<'r, I>(results: I) -> BTreeMap<SourceDatabase, BTreeSet<OrthologPair>>
where
    I: IntoIterator<Item = &'r ReconciledSource>,
{
    let mut sets: BTreeMap<SourceDatabase, BTreeSet<OrthologPair>> = BTreeMap::new();
    for result in results {
        sets.entry(result.source)
            .or_default()
            .extend(result.pairs.iter().cloned());
    }
    sets
}

/// Original worm id and change comment per emitted pair, deduplicated.
pub fn worm_changes(result: &ReconciledSource) -> Vec<(OrthologPair, String, Option<String>)> {
    let mut seen = HashMap::new();
    for item in &result.provenance {
        let comment = item
            .lifecycle
            .iter()
            .map(|event| match &event.to_id {
                Some(to) => format!("{} {} -> {}", event.kind, event.from_id, to),
                None => format!("{} {}", event.kind, event.from_id),
            })
            .reduce(|acc, next| format!("{acc}; {next}"));
        seen.entry((item.pair.clone(), item.worm_resolved.clone()))
            .or_insert(comment);
    }
    let mut rows = seen
        .into_iter()
        .map(|((pair, old), comment)| (pair, old, comment))
        .collect::<Vec<_>>();
    rows.sort();
    rows
}
