use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;

use crate::domain::{OrthologPair, SourceDatabase};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ConsensusEntry {
    pub worm_canonical: String,
    pub human_canonical: String,
    pub supporting_sources: BTreeSet<SourceDatabase>,
}

impl ConsensusEntry {
    /// Number of databases that independently predict this pair.
    pub fn score(&self) -> usize {
        self.supporting_sources.len()
    }

    /// Source names joined with `|`, in a stable order.
    pub fn databases_label(&self) -> String {
        self.supporting_sources
            .iter()
            .map(SourceDatabase::as_str)
            .collect::<Vec<_>>()
            .join("|")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsensusSummary {
    pub pairs: usize,
    pub unique_worm_genes: usize,
    pub unique_human_genes: usize,
    pub pairs_per_source: BTreeMap<SourceDatabase, usize>,
    pub pairs_per_score: BTreeMap<usize, usize>,
}

/// Deduplicated ortholog pairs keyed by `(worm, human)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsensusSet {
    entries: BTreeMap<(String, String), BTreeSet<SourceDatabase>>,
}

impl ConsensusSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pair: &OrthologPair) {
        self.entries
            .entry((pair.worm_canonical.clone(), pair.human_canonical.clone()))
            .or_default()
            .insert(pair.source_database);
    }

    pub fn extend_pairs<'p, I>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = &'p OrthologPair>,
    {
        for pair in pairs {
            self.insert(pair);
        }
    }

    /// Set union; supporting sources of shared keys are merged.
    pub fn union(mut self, other: ConsensusSet) -> Self {
        for (key, sources) in other.entries {
            self.entries.entry(key).or_default().extend(sources);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, worm: &str, human: &str) -> Option<ConsensusEntry> {
        self.entries
            .get(&(worm.to_string(), human.to_string()))
            .map(|sources| ConsensusEntry {
                worm_canonical: worm.to_string(),
                human_canonical: human.to_string(),
                supporting_sources: sources.clone(),
            })
    }

    pub fn entries(&self) -> impl Iterator<Item = ConsensusEntry> + '_ {
        self.entries
            .iter()
            .map(|((worm, human), sources)| ConsensusEntry {
                worm_canonical: worm.clone(),
                human_canonical: human.clone(),
                supporting_sources: sources.clone(),
            })
    }

    pub fn to_entries(&self) -> BTreeSet<ConsensusEntry> {
        self.entries().collect()
    }

    pub fn with_min_support(&self, min_sources: usize) -> impl Iterator<Item = ConsensusEntry> + '_ {
        self.entries()
            .filter(move |entry| entry.score() >= min_sources)
    }

    /// Drops pairs whose human gene is outside `reference`; returns how many.
    pub fn restrict_human(&mut self, reference: &HashSet<String>) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|(_, human), _| reference.contains(human));
        let dropped = before - self.entries.len();
        if dropped > 0 {
            tracing::info!(dropped, kept = self.entries.len(), "restricted to reference human genes");
        }
        dropped
    }

    pub fn summary(&self) -> ConsensusSummary {
        let mut summary = ConsensusSummary {
            pairs: self.entries.len(),
            ..ConsensusSummary::default()
        };
        let mut worms = HashSet::new();
        let mut humans = HashSet::new();
        for ((worm, human), sources) in &self.entries {
            worms.insert(worm.as_str());
            humans.insert(human.as_str());
            for source in sources {
                *summary.pairs_per_source.entry(*source).or_default() += 1;
            }
            *summary.pairs_per_score.entry(sources.len()).or_default() += 1;
        }
        summary.unique_worm_genes = worms.len();
        summary.unique_human_genes = humans.len();
        summary
    }
}

/// Unions per-source pair sets into one consensus set. Sources carry no
/// weight; the result is independent of map order and of repetition.
pub fn aggregate(per_source: &BTreeMap<SourceDatabase, BTreeSet<OrthologPair>>) -> ConsensusSet {
    let mut consensus = ConsensusSet::new();
    for (source, pairs) in per_source {
        for pair in pairs {
            if pair.source_database != *source {
                tracing::warn!(
                    expected = %source,
                    found = %pair.source_database,
                    "pair filed under another source"
                );
            }
            consensus.insert(pair);
        }
    }
    consensus
}
