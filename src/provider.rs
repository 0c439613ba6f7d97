use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use serde::Serialize;

use crate::domain::Namespace;
use crate::error::OrthoError;

/// One historical version of an identifier's record, with the
/// cross-references that version carried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryRecord {
    pub version: u32,
    pub cross_references: Vec<(Namespace, String)>,
}

impl HistoryRecord {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            cross_references: Vec::new(),
        }
    }

    pub fn with_reference(mut self, namespace: Namespace, id: impl Into<String>) -> Self {
        self.cross_references.push((namespace, id.into()));
        self
    }

    pub fn reference(&self, namespace: Namespace) -> Option<&str> {
        self.cross_references
            .iter()
            .find(|(ns, _)| *ns == namespace)
            .map(|(_, id)| id.as_str())
    }
}

/// Mapping capability backed by bulk tables, history pages or live services.
///
/// `Ok(None)` means the provider answered and has no candidate. Errors that
/// report `is_transient()` are retried by the caller; `ProviderUnavailable`
/// aborts the run.
pub trait LookupProvider: Send + Sync {
    fn lookup(&self, id: &str, from: Namespace, to: Namespace)
    -> Result<Option<String>, OrthoError>;

    /// Known versions of `id`, in any order.
    fn history(&self, id: &str, namespace: Namespace) -> Result<Vec<HistoryRecord>, OrthoError>;
}

impl<T: LookupProvider + ?Sized> LookupProvider for &T {
    fn lookup(
        &self,
        id: &str,
        from: Namespace,
        to: Namespace,
    ) -> Result<Option<String>, OrthoError> {
        (**self).lookup(id, from, to)
    }

    fn history(&self, id: &str, namespace: Namespace) -> Result<Vec<HistoryRecord>, OrthoError> {
        (**self).history(id, namespace)
    }
}

/// Two providers stacked: `primary` answers first, `fallback` fills gaps.
pub struct Layered<A, B> {
    primary: A,
    fallback: B,
}

impl<A: LookupProvider, B: LookupProvider> Layered<A, B> {
    pub fn new(primary: A, fallback: B) -> Self {
        Self { primary, fallback }
    }
}

impl<A: LookupProvider, B: LookupProvider> LookupProvider for Layered<A, B> {
    fn lookup(
        &self,
        id: &str,
        from: Namespace,
        to: Namespace,
    ) -> Result<Option<String>, OrthoError> {
        match self.primary.lookup(id, from, to)? {
            Some(found) => Ok(Some(found)),
            None => self.fallback.lookup(id, from, to),
        }
    }

    fn history(&self, id: &str, namespace: Namespace) -> Result<Vec<HistoryRecord>, OrthoError> {
        let records = self.primary.history(id, namespace)?;
        if !records.is_empty() {
            return Ok(records);
        }
        self.fallback.history(id, namespace)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Runs `op`, retrying transient failures with linear backoff.
    pub fn run<T, F>(&self, mut op: F) -> Result<T, OrthoError>
    where
        F: FnMut() -> Result<T, OrthoError>,
    {
        let mut attempt = 0usize;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_retries && err.is_transient() => {
                    let delay = self.base_delay * (attempt as u32 + 1);
                    tracing::debug!(attempt, ?delay, error = %err, "retrying lookup");
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Turns a streak of back-to-back exhausted transient failures against one
/// endpoint into `ProviderUnavailable`. Any answer from the endpoint, hit or
/// miss, resets the streak. A limit of zero never trips.
#[derive(Debug)]
pub struct FailureBreaker {
    endpoint: &'static str,
    limit: usize,
    consecutive: AtomicUsize,
}

impl FailureBreaker {
    pub fn new(endpoint: &'static str, limit: usize) -> Self {
        Self {
            endpoint,
            limit,
            consecutive: AtomicUsize::new(0),
        }
    }

    pub fn consecutive_failures(&self) -> usize {
        self.consecutive.load(Ordering::Relaxed)
    }

    pub fn observe<T>(&self, result: Result<T, OrthoError>) -> Result<T, OrthoError> {
        match result {
            Ok(value) => {
                self.consecutive.store(0, Ordering::Relaxed);
                Ok(value)
            }
            Err(err) if err.is_transient() && self.limit > 0 => {
                let failures = self.consecutive.fetch_add(1, Ordering::Relaxed) + 1;
                if failures < self.limit {
                    return Err(err);
                }
                tracing::error!(
                    endpoint = self.endpoint,
                    failures,
                    error = %err,
                    "lookup provider unreachable"
                );
                Err(OrthoError::ProviderUnavailable(format!(
                    "{}: {failures} consecutive lookups failed, last: {err}",
                    self.endpoint
                )))
            }
            Err(err) => Err(err),
        }
    }
}

/// Caps the number of concurrent calls against one external endpoint.
#[derive(Debug)]
pub struct Throttle {
    permits: Mutex<usize>,
    released: Condvar,
}

impl Throttle {
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits.max(1)),
            released: Condvar::new(),
        }
    }

    pub fn acquire(&self) -> ThrottlePermit<'_> {
        let mut available = self
            .permits
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while *available == 0 {
            available = self
                .released
                .wait(available)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *available -= 1;
        ThrottlePermit { throttle: self }
    }
}

pub struct ThrottlePermit<'a> {
    throttle: &'a Throttle,
}

impl Drop for ThrottlePermit<'_> {
    fn drop(&mut self) {
        let mut available = self
            .throttle
            .permits
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *available += 1;
        self.throttle.released.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;

    use super::*;

    fn fast_policy(max_retries: usize) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::ZERO,
        }
    }

    #[test]
    fn retries_transient_until_success() {
        let mut calls = 0;
        let result = fast_policy(3).run(|| {
            calls += 1;
            if calls < 3 {
                Err(OrthoError::LookupTransient("timeout".to_string()))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn gives_up_after_max_retries() {
        let mut calls = 0;
        let result: Result<(), _> = fast_policy(2).run(|| {
            calls += 1;
            Err(OrthoError::LookupTransient("timeout".to_string()))
        });
        assert_matches!(result, Err(OrthoError::LookupTransient(_)));
        assert_eq!(calls, 3);
    }

    #[test]
    fn does_not_retry_permanent_errors() {
        let mut calls = 0;
        let result: Result<(), _> = fast_policy(5).run(|| {
            calls += 1;
            Err(OrthoError::ProviderUnavailable("dns".to_string()))
        });
        assert_matches!(result, Err(OrthoError::ProviderUnavailable(_)));
        assert_eq!(calls, 1);
    }

    #[test]
    fn breaker_trips_after_consecutive_failures() {
        let breaker = FailureBreaker::new("history", 3);
        let down = || -> Result<(), OrthoError> {
            Err(OrthoError::UniprotHttp("connection refused".to_string()))
        };
        assert_matches!(breaker.observe(down()), Err(OrthoError::UniprotHttp(_)));
        assert_matches!(breaker.observe(down()), Err(OrthoError::UniprotHttp(_)));
        let err = breaker.observe(down()).unwrap_err();
        assert_matches!(err, OrthoError::ProviderUnavailable(_));
        assert!(err.is_fatal());
    }

    #[test]
    fn breaker_resets_on_any_answer() {
        let breaker = FailureBreaker::new("lookup", 2);
        let _ = breaker.observe::<()>(Err(OrthoError::LookupTransient("timeout".to_string())));
        assert_eq!(breaker.consecutive_failures(), 1);
        assert_eq!(breaker.observe(Ok(None::<String>)).unwrap(), None);
        assert_eq!(breaker.consecutive_failures(), 0);
        let _ = breaker.observe::<()>(Err(OrthoError::LookupTransient("timeout".to_string())));
        assert_eq!(breaker.consecutive_failures(), 1);
    }

    #[test]
    fn breaker_with_zero_limit_never_trips() {
        let breaker = FailureBreaker::new("lookup", 0);
        for _ in 0..20 {
            let result = breaker.observe::<()>(Err(OrthoError::LookupTransient("x".to_string())));
            assert_matches!(result, Err(OrthoError::LookupTransient(_)));
        }
    }

    #[test]
    fn throttle_bounds_concurrency() {
        let throttle = Arc::new(Throttle::new(2));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        thread::scope(|scope| {
            for _ in 0..8 {
                let throttle = Arc::clone(&throttle);
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                scope.spawn(move || {
                    let _permit = throttle.acquire();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(5));
                    active.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    struct Fixed(Option<&'static str>, Vec<HistoryRecord>);

    impl LookupProvider for Fixed {
        fn lookup(
            &self,
            _id: &str,
            _from: Namespace,
            _to: Namespace,
        ) -> Result<Option<String>, OrthoError> {
            Ok(self.0.map(str::to_string))
        }

        fn history(
            &self,
            _id: &str,
            _namespace: Namespace,
        ) -> Result<Vec<HistoryRecord>, OrthoError> {
            Ok(self.1.clone())
        }
    }

    #[test]
    fn layered_prefers_primary() {
        let layered = Layered::new(
            Fixed(None, Vec::new()),
            Fixed(Some("ENSG00000000001"), vec![HistoryRecord::new(2)]),
        );
        assert_eq!(
            layered
                .lookup("P04637", Namespace::UniProtId, Namespace::EnsemblGeneId)
                .unwrap()
                .as_deref(),
            Some("ENSG00000000001")
        );
        assert_eq!(layered.history("P04637", Namespace::UniProtId).unwrap().len(), 1);

        let layered = Layered::new(
            Fixed(Some("ENSG00000000002"), vec![HistoryRecord::new(7)]),
            Fixed(Some("ENSG00000000001"), Vec::new()),
        );
        assert_eq!(
            layered
                .lookup("P04637", Namespace::UniProtId, Namespace::EnsemblGeneId)
                .unwrap()
                .as_deref(),
            Some("ENSG00000000002")
        );
        assert_eq!(layered.history("P04637", Namespace::UniProtId).unwrap()[0].version, 7);
    }

    #[test]
    fn history_record_reference() {
        let record = HistoryRecord::new(4).with_reference(Namespace::WormBaseId, "WBGene00019439");
        assert_eq!(record.reference(Namespace::WormBaseId), Some("WBGene00019439"));
        assert_eq!(record.reference(Namespace::EnsemblGeneId), None);
    }
}
