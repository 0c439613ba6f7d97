use std::fmt;

use serde::Serialize;

use crate::cache::{CacheStats, MemoCache};
use crate::domain::{Namespace, RawIdentifier};
use crate::error::OrthoError;
use crate::provider::{FailureBreaker, LookupProvider, RetryPolicy, Throttle};
use crate::tables::OverrideTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Identity,
    BulkLookup,
    HistoryLookup,
    ManualOverride,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Identity => write!(f, "identity"),
            Strategy::BulkLookup => write!(f, "bulk_lookup"),
            Strategy::HistoryLookup => write!(f, "history_lookup"),
            Strategy::ManualOverride => write!(f, "manual_override"),
        }
    }
}

/// Fixed strategy order for one namespace pair.
pub fn strategy_chain(from: Namespace, to: Namespace) -> &'static [Strategy] {
    if from == to {
        return &[Strategy::Identity];
    }
    match from {
        // No history service keeps versions for these.
        Namespace::WormpepId | Namespace::OmaId => {
            &[Strategy::BulkLookup, Strategy::ManualOverride]
        }
        _ => &[
            Strategy::BulkLookup,
            Strategy::HistoryLookup,
            Strategy::ManualOverride,
        ],
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum StepOutcome {
    Found(String),
    NotFound,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionStep {
    pub strategy: Strategy,
    pub outcome: StepOutcome,
}

impl ResolutionStep {
    pub fn new(strategy: Strategy, outcome: StepOutcome) -> Self {
        Self { strategy, outcome }
    }
}

impl fmt::Display for ResolutionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            StepOutcome::Found(id) => write!(f, "{}: {}", self.strategy, id),
            StepOutcome::NotFound => write!(f, "{}: not_found", self.strategy),
            StepOutcome::Failed(reason) => write!(f, "{}: failed ({})", self.strategy, reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStatus {
    Resolved,
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedIdentifier {
    pub raw: RawIdentifier,
    pub canonical_value: Option<String>,
    pub target_namespace: Namespace,
    pub resolution_path: Vec<ResolutionStep>,
    pub status: ResolutionStatus,
}

impl ResolvedIdentifier {
    pub fn canonical(&self) -> Option<&str> {
        self.canonical_value.as_deref()
    }

    pub fn is_resolved(&self) -> bool {
        self.status == ResolutionStatus::Resolved
    }

    /// True when some strategy gave up on a service error rather than a miss.
    pub fn had_failures(&self) -> bool {
        self.resolution_path
            .iter()
            .any(|step| matches!(step.outcome, StepOutcome::Failed(_)))
    }

    pub fn path_summary(&self) -> String {
        self.resolution_path
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

type CacheKey = (String, Namespace, Namespace);

/// Exhausted transient failures in a row before a provider counts as down.
pub const DEFAULT_FAILURE_LIMIT: usize = 10;

/// Resolves raw identifiers to one canonical id through the strategy chain.
pub struct Resolver<L: LookupProvider> {
    provider: L,
    overrides: OverrideTable,
    retry: RetryPolicy,
    history_throttle: Throttle,
    lookup_breaker: FailureBreaker,
    history_breaker: FailureBreaker,
    cache: MemoCache<CacheKey, ResolvedIdentifier>,
}

impl<L: LookupProvider> Resolver<L> {
    pub fn new(provider: L, overrides: OverrideTable) -> Self {
        Self {
            provider,
            overrides,
            retry: RetryPolicy::default(),
            history_throttle: Throttle::new(4),
            lookup_breaker: FailureBreaker::new("bulk lookup", DEFAULT_FAILURE_LIMIT),
            history_breaker: FailureBreaker::new("history lookup", DEFAULT_FAILURE_LIMIT),
            cache: MemoCache::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_history_concurrency(mut self, permits: usize) -> Self {
        self.history_throttle = Throttle::new(permits);
        self
    }

    /// Consecutive exhausted failures, per endpoint, that abort the run.
    /// Zero disables the check.
    pub fn with_failure_limit(mut self, limit: usize) -> Self {
        self.lookup_breaker = FailureBreaker::new("bulk lookup", limit);
        self.history_breaker = FailureBreaker::new("history lookup", limit);
        self
    }

    pub fn provider(&self) -> &L {
        &self.provider
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Only systemic provider failures surface as `Err`; everything else ends
    /// in an `Unresolved` result with the failing steps in its path.
    pub fn resolve(
        &self,
        raw: &RawIdentifier,
        target: Namespace,
    ) -> Result<ResolvedIdentifier, OrthoError> {
        let key = (raw.value.clone(), raw.namespace, target);
        let mut resolved = self
            .cache
            .get_or_try_insert_with(&key, || self.resolve_uncached(raw, target))?;
        resolved.raw = raw.clone();
        Ok(resolved)
    }

    fn resolve_uncached(
        &self,
        raw: &RawIdentifier,
        target: Namespace,
    ) -> Result<ResolvedIdentifier, OrthoError> {
        let mut path = Vec::new();
        for &strategy in strategy_chain(raw.namespace, target) {
            let attempt = match strategy {
                Strategy::Identity => Ok(Some(raw.value.clone())),
                Strategy::BulkLookup => self.lookup(&raw.value, raw.namespace, target),
                Strategy::HistoryLookup => self.history_candidate(raw, target),
                Strategy::ManualOverride => Ok(self
                    .overrides
                    .get(raw.namespace, target, &raw.value)
                    .map(str::to_string)),
            };
            match attempt {
                Ok(Some(candidate)) => {
                    tracing::debug!(id = %raw, %strategy, %candidate, "resolved");
                    path.push(ResolutionStep::new(
                        strategy,
                        StepOutcome::Found(candidate.clone()),
                    ));
                    return Ok(ResolvedIdentifier {
                        raw: raw.clone(),
                        canonical_value: Some(candidate),
                        target_namespace: target,
                        resolution_path: path,
                        status: ResolutionStatus::Resolved,
                    });
                }
                Ok(None) => {
                    path.push(ResolutionStep::new(strategy, StepOutcome::NotFound));
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    tracing::warn!(id = %raw, %strategy, error = %err, "lookup gave up");
                    path.push(ResolutionStep::new(
                        strategy,
                        StepOutcome::Failed(err.to_string()),
                    ));
                }
            }
        }
        tracing::debug!(id = %raw, %target, "unresolved");
        Ok(ResolvedIdentifier {
            raw: raw.clone(),
            canonical_value: None,
            target_namespace: target,
            resolution_path: path,
            status: ResolutionStatus::Unresolved,
        })
    }

    fn lookup(
        &self,
        id: &str,
        from: Namespace,
        to: Namespace,
    ) -> Result<Option<String>, OrthoError> {
        self.lookup_breaker
            .observe(self.retry.run(|| self.provider.lookup(id, from, to)))
    }

    /// Takes the newest known version of `raw` and maps that version's record
    /// into `target`, either through a direct cross-reference or through a
    /// bulk lookup of one of the identifiers it points to. A reference whose
    /// lookup fails does not stop the others; the last failure is reported
    /// only when none of them resolves.
    fn history_candidate(
        &self,
        raw: &RawIdentifier,
        target: Namespace,
    ) -> Result<Option<String>, OrthoError> {
        let records = {
            let _permit = self.history_throttle.acquire();
            self.history_breaker.observe(
                self.retry
                    .run(|| self.provider.history(&raw.value, raw.namespace)),
            )?
        };
        let Some(latest) = records.iter().max_by_key(|record| record.version) else {
            return Ok(None);
        };
        if let Some(id) = latest.reference(target) {
            return Ok(Some(id.to_string()));
        }
        let mut last_failure = None;
        for (namespace, id) in &latest.cross_references {
            if *namespace == raw.namespace && *id == raw.value {
                continue;
            }
            match self.lookup(id, *namespace, target) {
                Ok(Some(candidate)) => return Ok(Some(candidate)),
                Ok(None) => {}
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    tracing::debug!(
                        id = %raw,
                        reference = %id,
                        error = %err,
                        "reference lookup failed"
                    );
                    last_failure = Some(OrthoError::LookupTransient(format!(
                        "reference {namespace}:{id}: {err}"
                    )));
                }
            }
        }
        match last_failure {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }
}
