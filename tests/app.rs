use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use assert_matches::assert_matches;

use ortholist::app::{App, NoopSink, SourceInput};
use ortholist::domain::{Namespace, RawIdentifier, RawPair, Release, SourceDatabase, SourceRow};
use ortholist::error::OrthoError;
use ortholist::input::SourceRows;
use ortholist::lifecycle::{LifecycleKind, LifecycleTable, LifecycleTracker};
use ortholist::provider::{HistoryRecord, LookupProvider, RetryPolicy};
use ortholist::resolver::Resolver;
use ortholist::tables::OverrideTable;

#[derive(Default)]
struct MockLookup {
    calls: Mutex<HashMap<String, usize>>,
    down_for: Option<&'static str>,
}

impl MockLookup {
    fn calls_for(&self, id: &str) -> usize {
        self.calls.lock().unwrap().get(id).copied().unwrap_or(0)
    }
}

impl LookupProvider for MockLookup {
    fn lookup(
        &self,
        id: &str,
        from: Namespace,
        to: Namespace,
    ) -> Result<Option<String>, OrthoError> {
        *self.calls.lock().unwrap().entry(id.to_string()).or_default() += 1;
        if self.down_for == Some(id) {
            return Err(OrthoError::ProviderUnavailable("dns failure".to_string()));
        }
        // ENSP00000NNN -> ENSG00000NNN
        if from == Namespace::EnsemblProteinId && to == Namespace::EnsemblGeneId {
            return Ok(id.strip_prefix("ENSP").map(|rest| format!("ENSG{rest}")));
        }
        Ok(None)
    }

    fn history(&self, _id: &str, _namespace: Namespace) -> Result<Vec<HistoryRecord>, OrthoError> {
        Ok(Vec::new())
    }
}

fn release() -> Release {
    "WS255".parse().unwrap()
}

fn pair(worm: &str, human: &str) -> SourceRow {
    SourceRow::Pair(RawPair {
        worm: RawIdentifier::worm(worm, Namespace::WormBaseId).unwrap(),
        human: RawIdentifier::human(human, Namespace::EnsemblProteinId).unwrap(),
    })
}

fn app(lookup: MockLookup, lifecycle: LifecycleTable) -> App<MockLookup, LifecycleTable> {
    let resolver = Resolver::new(lookup, OverrideTable::new()).with_retry(RetryPolicy::none());
    App::new(resolver, LifecycleTracker::new(lifecycle, release()))
}

fn shared_rows() -> Vec<SourceRow> {
    (0..20)
        .map(|index| {
            pair(
                &format!("WBGene{index:08}"),
                &format!("ENSP{:011}", index % 5),
            )
        })
        .collect()
}

#[test]
fn sources_run_concurrently_and_share_the_cache() {
    let app = app(MockLookup::default(), LifecycleTable::new(release()));
    let inputs: Vec<_> = [
        SourceDatabase::EnsemblCompara,
        SourceDatabase::Oma,
        SourceDatabase::InParanoid,
        SourceDatabase::OrthoMcl,
    ]
    .into_iter()
    .map(|source| SourceInput::new(source, shared_rows()))
    .collect();

    let result = app.run(&inputs, &NoopSink).unwrap();
    assert_eq!(result.sources.len(), 4);
    assert_eq!(result.consensus.len(), 20);
    assert!(result.consensus.entries().all(|entry| entry.score() == 4));
    for index in 0..5 {
        let id = format!("ENSP{index:011}");
        assert_eq!(app.resolver().provider().calls_for(&id), 1);
    }
    assert_eq!(result.resolver_cache.misses, 20 + 5);
}

#[test]
fn sources_are_reported_in_stable_order() {
    let app = app(MockLookup::default(), LifecycleTable::new(release()));
    let inputs = vec![
        SourceInput::new(SourceDatabase::OrthoMcl, shared_rows()),
        SourceInput::new(SourceDatabase::EnsemblCompara, shared_rows()),
    ];
    let result = app.run(&inputs, &NoopSink).unwrap();
    let order: Vec<_> = result.sources.iter().map(|source| source.source).collect();
    assert_eq!(
        order,
        vec![SourceDatabase::EnsemblCompara, SourceDatabase::OrthoMcl]
    );
    let report = result.report();
    assert_eq!(report.release, "WS255");
    assert_eq!(report.sources[0].stats.output_pairs, 20);
}

#[test]
fn fatal_provider_error_aborts_the_run() {
    let lookup = MockLookup {
        down_for: Some("ENSP00000000999"),
        ..MockLookup::default()
    };
    let app = app(lookup, LifecycleTable::new(release()));
    let inputs = vec![
        SourceInput::new(
            SourceDatabase::HomoloGene,
            vec![pair("WBGene00000001", "ENSP00000000999")],
        ),
        SourceInput::new(SourceDatabase::Oma, shared_rows()),
    ];
    let failure = app.run(&inputs, &NoopSink).unwrap_err();
    assert_matches!(failure.error, OrthoError::ProviderUnavailable(_));
    assert!(
        failure
            .completed
            .iter()
            .all(|source| source.source != SourceDatabase::HomoloGene)
    );
}

struct UnreachableLookup;

impl LookupProvider for UnreachableLookup {
    fn lookup(
        &self,
        _id: &str,
        _from: Namespace,
        _to: Namespace,
    ) -> Result<Option<String>, OrthoError> {
        Err(OrthoError::UniprotHttp("connection refused".to_string()))
    }

    fn history(&self, _id: &str, _namespace: Namespace) -> Result<Vec<HistoryRecord>, OrthoError> {
        Err(OrthoError::UniprotHttp("connection refused".to_string()))
    }
}

#[test]
fn unreachable_provider_aborts_instead_of_leaving_everything_unresolved() {
    let resolver = Resolver::new(UnreachableLookup, OverrideTable::new())
        .with_retry(RetryPolicy::none())
        .with_failure_limit(5);
    let app = App::new(
        resolver,
        LifecycleTracker::new(LifecycleTable::new(release()), release()),
    );
    let rows = (0..50)
        .map(|index| pair(&format!("WBGene{index:08}"), &format!("ENSP{index:011}")))
        .collect();
    let inputs = vec![SourceInput::new(SourceDatabase::EnsemblCompara, rows)];

    let failure = app.run(&inputs, &NoopSink).unwrap_err();
    assert_matches!(failure.error, OrthoError::ProviderUnavailable(_));
    assert!(failure.completed.is_empty());
}

#[test]
fn records_dropped_while_reading_count_as_malformed() {
    let app = app(MockLookup::default(), LifecycleTable::new(release()));
    let read = SourceRows {
        rows: shared_rows(),
        malformed: 2,
    };
    let inputs = vec![SourceInput::from_rows(SourceDatabase::InParanoid, read)];
    let result = app.run(&inputs, &NoopSink).unwrap();
    assert_eq!(result.sources[0].stats.malformed_rows, 2);
    assert_eq!(result.sources[0].stats.output_pairs, 20);
}

#[test]
fn human_reference_filters_consensus() {
    let app = app(MockLookup::default(), LifecycleTable::new(release()))
        .with_human_reference(HashSet::from(["ENSG00000000001".to_string()]));
    let inputs = vec![SourceInput::new(SourceDatabase::Oma, shared_rows())];
    let result = app.run(&inputs, &NoopSink).unwrap();
    assert_eq!(result.consensus.len(), 4);
    assert_eq!(result.dropped_by_reference, 16);
    assert!(
        result
            .consensus
            .entries()
            .all(|entry| entry.human_canonical == "ENSG00000000001")
    );
}

#[test]
fn resolve_one_follows_worm_lifecycle() {
    let lifecycle = LifecycleTable::new(release()).with_change(
        "WBGene00001234",
        Some("WBGene00009999"),
        LifecycleKind::Merged,
    );
    let app = app(MockLookup::default(), lifecycle);
    let raw = RawIdentifier::worm("WBGene00001234", Namespace::WormBaseId).unwrap();
    let report = app.resolve_one(&raw).unwrap();
    assert_eq!(report.resolved.canonical(), Some("WBGene00001234"));
    assert_eq!(report.final_id(), Some("WBGene00009999"));

    let raw = RawIdentifier::human("ENSP00000000042", Namespace::EnsemblProteinId).unwrap();
    let report = app.resolve_one(&raw).unwrap();
    assert!(report.lifecycle.is_none());
    assert_eq!(report.final_id(), Some("ENSG00000000042"));
}
