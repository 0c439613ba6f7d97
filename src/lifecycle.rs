use std::collections::{HashMap, HashSet};
use std::fmt;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::cache::MemoCache;
use crate::domain::Release;
use crate::error::OrthoError;
use crate::fs_util::read_records;
use crate::provider::RetryPolicy;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleKind {
    Merged,
    Split,
    Pseudogene,
    Killed,
    Transposon,
    /// Not in the target release and no recorded transition.
    Absent,
    Unchanged,
}

impl LifecycleKind {
    /// Classifies a free-text change comment such as `Merged into WBGene00000002`.
    pub fn from_comment(comment: &str, has_successor: bool) -> Self {
        let comment = comment.to_ascii_lowercase();
        if comment.contains("merge") {
            LifecycleKind::Merged
        } else if comment.contains("split") {
            LifecycleKind::Split
        } else if comment.contains("pseudogene") {
            LifecycleKind::Pseudogene
        } else if comment.contains("transposon") {
            LifecycleKind::Transposon
        } else if comment.contains("kill") || comment.contains("dead") || comment.contains("suppress")
        {
            LifecycleKind::Killed
        } else if has_successor {
            LifecycleKind::Merged
        } else {
            LifecycleKind::Killed
        }
    }

    /// Kinds that retire an id regardless of any recorded successor.
    pub fn retires(&self) -> bool {
        matches!(
            self,
            LifecycleKind::Pseudogene
                | LifecycleKind::Killed
                | LifecycleKind::Transposon
                | LifecycleKind::Absent
        )
    }
}

impl fmt::Display for LifecycleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LifecycleKind::Merged => "merged",
            LifecycleKind::Split => "split",
            LifecycleKind::Pseudogene => "pseudogene",
            LifecycleKind::Killed => "killed",
            LifecycleKind::Transposon => "transposon",
            LifecycleKind::Absent => "absent",
            LifecycleKind::Unchanged => "unchanged",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub from_id: String,
    pub to_id: Option<String>,
    pub kind: LifecycleKind,
}

impl LifecycleEvent {
    pub fn new(from_id: impl Into<String>, to_id: Option<&str>, kind: LifecycleKind) -> Self {
        Self {
            from_id: from_id.into(),
            to_id: to_id.map(str::to_string),
            kind,
        }
    }

    pub fn unchanged(id: impl Into<String>) -> Self {
        Self::new(id, None, LifecycleKind::Unchanged)
    }
}

/// Single-hop lifecycle status lookup for one release.
pub trait LifecycleSource: Send + Sync {
    fn lifecycle_status(&self, id: &str, release: &Release) -> Result<LifecycleEvent, OrthoError>;
}

impl<T: LifecycleSource + ?Sized> LifecycleSource for &T {
    fn lifecycle_status(&self, id: &str, release: &Release) -> Result<LifecycleEvent, OrthoError> {
        (**self).lifecycle_status(id, release)
    }
}

/// Lifecycle data for one release: the release's gene list plus the table
/// of recorded id changes.
#[derive(Debug, Clone)]
pub struct LifecycleTable {
    release: Release,
    current: HashSet<String>,
    changes: HashMap<String, LifecycleEvent>,
    has_gene_list: bool,
}

impl LifecycleTable {
    pub fn new(release: Release) -> Self {
        Self {
            release,
            current: HashSet::new(),
            changes: HashMap::new(),
            has_gene_list: false,
        }
    }

    pub fn load(
        release: Release,
        current_genes: Option<&Utf8Path>,
        changes: Option<&Utf8Path>,
    ) -> Result<Self, OrthoError> {
        let mut table = Self::new(release);
        if let Some(path) = current_genes {
            table = table.with_current_genes(read_gene_list(path)?);
        }
        if let Some(path) = changes {
            for record in read_records(path, true)? {
                let old = record.require(0, path)?;
                let comment = record.field(2).unwrap_or_default();
                table.record_change(old, record.field(1), comment);
            }
        }
        tracing::info!(
            release = %table.release,
            genes = table.current.len(),
            changes = table.changes.len(),
            "loaded lifecycle table"
        );
        Ok(table)
    }

    pub fn with_current_genes<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.current.extend(ids.into_iter().map(Into::into));
        self.has_gene_list = true;
        self
    }

    pub fn with_change(mut self, old: &str, current: Option<&str>, kind: LifecycleKind) -> Self {
        self.insert_event(LifecycleEvent::new(old, current, kind));
        self
    }

    pub fn record_change(&mut self, old: &str, current: Option<&str>, comment: &str) {
        let kind = LifecycleKind::from_comment(comment, current.is_some());
        self.insert_event(LifecycleEvent::new(old, current, kind));
    }

    /// The first event recorded for an id is authoritative.
    fn insert_event(&mut self, event: LifecycleEvent) {
        if let Some(existing) = self.changes.get(&event.from_id) {
            if *existing != event {
                tracing::warn!(
                    id = %event.from_id,
                    kept = %existing.kind,
                    ignored = %event.kind,
                    "conflicting lifecycle rows"
                );
            }
            return;
        }
        self.changes.insert(event.from_id.clone(), event);
    }

    pub fn release(&self) -> &Release {
        &self.release
    }
}

/// Reads a release gene list. Either one id per line or WormBase
/// `geneIDs` rows (`6239,WBGene00000001,aap-1,Y110A7A.10,Live`); the first
/// field holding a WormBase gene id is taken from each row.
fn read_gene_list(path: &Utf8Path) -> Result<Vec<String>, OrthoError> {
    let records = read_records(path, false)?;
    let mut ids = Vec::with_capacity(records.len());
    let mut skipped = 0usize;
    for record in &records {
        match record.fields.iter().find(|field| is_wormbase_gene_id(field)) {
            Some(id) => ids.push(id.clone()),
            None => skipped += 1,
        }
    }
    if ids.is_empty() {
        if let Some(first) = records.first() {
            return Err(OrthoError::TableParse {
                path: path.to_string(),
                line: first.line,
                message: "gene list holds no WormBase gene ids".to_string(),
            });
        }
    }
    if skipped > 0 {
        tracing::warn!(%path, skipped, "gene list rows without a WormBase gene id");
    }
    Ok(ids)
}

fn is_wormbase_gene_id(value: &str) -> bool {
    value
        .strip_prefix("WBGene")
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

impl LifecycleSource for LifecycleTable {
    fn lifecycle_status(&self, id: &str, release: &Release) -> Result<LifecycleEvent, OrthoError> {
        if *release != self.release {
            return Err(OrthoError::ProviderUnavailable(format!(
                "lifecycle table holds {}, asked for {}",
                self.release, release
            )));
        }
        if let Some(event) = self.changes.get(id) {
            return Ok(event.clone());
        }
        if !self.has_gene_list || self.current.contains(id) {
            return Ok(LifecycleEvent::unchanged(id));
        }
        Ok(LifecycleEvent::new(id, None, LifecycleKind::Absent))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleOutcome {
    pub final_id: Option<String>,
    pub events: Vec<LifecycleEvent>,
}

impl LifecycleOutcome {
    pub fn is_retired(&self) -> bool {
        self.final_id.is_none()
    }
}

pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Walks lifecycle chains to the id that is current in one release.
pub struct LifecycleTracker<S: LifecycleSource> {
    source: S,
    release: Release,
    max_depth: usize,
    retry: RetryPolicy,
    cache: MemoCache<String, LifecycleOutcome>,
}

impl<S: LifecycleSource> LifecycleTracker<S> {
    pub fn new(source: S, release: Release) -> Self {
        Self {
            source,
            release,
            max_depth: DEFAULT_MAX_DEPTH,
            retry: RetryPolicy::default(),
            cache: MemoCache::new(),
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn release(&self) -> &Release {
        &self.release
    }

    /// Follows merge/split successors until an unchanged id or a retiring
    /// event. Revisiting an id or making more than `max_depth` hops is an
    /// error for this chain only.
    pub fn apply(&self, canonical_id: &str) -> Result<LifecycleOutcome, OrthoError> {
        self.cache
            .get_or_try_insert_with(&canonical_id.to_string(), || self.walk(canonical_id))
    }

    fn walk(&self, start: &str) -> Result<LifecycleOutcome, OrthoError> {
        let mut seen = HashSet::from([start.to_string()]);
        let mut current = start.to_string();
        let mut events = Vec::new();
        loop {
            let event = self
                .retry
                .run(|| self.source.lifecycle_status(&current, &self.release))?;
            if event.kind == LifecycleKind::Unchanged {
                return Ok(LifecycleOutcome {
                    final_id: Some(current),
                    events,
                });
            }
            let successor = if event.kind.retires() {
                None
            } else {
                event.to_id.clone()
            };
            tracing::debug!(from = %current, kind = %event.kind, to = ?successor, "lifecycle hop");
            events.push(event);
            let Some(next) = successor else {
                return Ok(LifecycleOutcome {
                    final_id: None,
                    events,
                });
            };
            if !seen.insert(next.clone()) {
                return Err(OrthoError::LifecycleCycle {
                    start: start.to_string(),
                    revisited: next,
                });
            }
            if events.len() > self.max_depth {
                return Err(OrthoError::LifecycleDepthExceeded {
                    start: start.to_string(),
                    bound: self.max_depth,
                });
            }
            current = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn release() -> Release {
        "WS255".parse().unwrap()
    }

    #[test]
    fn classify_comments() {
        assert_eq!(
            LifecycleKind::from_comment("Merged into WBGene00000002", true),
            LifecycleKind::Merged
        );
        assert_eq!(
            LifecycleKind::from_comment("Made into pseudogene", false),
            LifecycleKind::Pseudogene
        );
        assert_eq!(LifecycleKind::from_comment("Killed", false), LifecycleKind::Killed);
        assert_eq!(LifecycleKind::from_comment("", true), LifecycleKind::Merged);
        assert_eq!(LifecycleKind::from_comment("", false), LifecycleKind::Killed);
    }

    #[test]
    fn first_conflicting_row_wins() {
        let table = LifecycleTable::new(release())
            .with_change("WBGene00000001", Some("WBGene00000002"), LifecycleKind::Merged)
            .with_change("WBGene00000001", None, LifecycleKind::Pseudogene);
        let event = table.lifecycle_status("WBGene00000001", &release()).unwrap();
        assert_eq!(event.kind, LifecycleKind::Merged);
    }

    #[test]
    fn absent_only_with_gene_list() {
        let without = LifecycleTable::new(release());
        assert_eq!(
            without.lifecycle_status("WBGene00000009", &release()).unwrap().kind,
            LifecycleKind::Unchanged
        );
        let with = LifecycleTable::new(release()).with_current_genes(["WBGene00000001"]);
        assert_eq!(
            with.lifecycle_status("WBGene00000009", &release()).unwrap().kind,
            LifecycleKind::Absent
        );
    }

    #[test]
    fn wrong_release_is_systemic() {
        let table = LifecycleTable::new(release());
        let other: Release = "WS260".parse().unwrap();
        let err = table.lifecycle_status("WBGene00000001", &other).unwrap_err();
        assert_matches!(err, OrthoError::ProviderUnavailable(_));
    }

    #[test]
    fn self_successor_is_a_cycle() {
        let table = LifecycleTable::new(release()).with_change(
            "WBGene00000001",
            Some("WBGene00000001"),
            LifecycleKind::Merged,
        );
        let tracker = LifecycleTracker::new(table, release());
        assert_matches!(
            tracker.apply("WBGene00000001"),
            Err(OrthoError::LifecycleCycle { .. })
        );
    }
}
