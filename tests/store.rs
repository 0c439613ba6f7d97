use std::fs;

use camino::Utf8PathBuf;

use ortholist::app::{App, NoopSink, SourceInput};
use ortholist::domain::{Namespace, RawIdentifier, RawPair, Release, SourceDatabase, SourceRow};
use ortholist::lifecycle::{LifecycleTable, LifecycleTracker};
use ortholist::resolver::Resolver;
use ortholist::store::ResultStore;
use ortholist::tables::{OverrideTable, TableLookup};

fn row(worm: &str, human: &str) -> SourceRow {
    SourceRow::Pair(RawPair {
        worm: RawIdentifier::worm(worm, Namespace::WormBaseId).unwrap(),
        human: RawIdentifier::human(human, Namespace::EnsemblGeneId).unwrap(),
    })
}

#[test]
fn rerun_replaces_files_in_place() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().join("results")).unwrap();
    let release: Release = "WS255".parse().unwrap();
    let app = App::new(
        Resolver::new(TableLookup::new(), OverrideTable::new()),
        LifecycleTracker::new(LifecycleTable::new(release.clone()), release),
    );
    let store = ResultStore::new(root.clone());

    let first = app
        .run(
            &[SourceInput::new(
                SourceDatabase::EnsemblCompara,
                vec![row("WBGene00000001", "ENSG00000000001")],
            )],
            &NoopSink,
        )
        .unwrap();
    store.write_run(&first).unwrap();

    let second = app
        .run(
            &[SourceInput::new(
                SourceDatabase::EnsemblCompara,
                vec![
                    row("WBGene00000001", "ENSG00000000001"),
                    row("WBGene00000002", "ENSG00000000002"),
                ],
            )],
            &NoopSink,
        )
        .unwrap();
    let stored = store.write_run(&second).unwrap();

    let unique_wb = fs::read_to_string(root.join("unique_wb.csv")).unwrap();
    assert_eq!(unique_wb, "CE_WB_CURRENT\nWBGene00000001\nWBGene00000002\n");
    let compara = fs::read_to_string(root.join("compara.csv")).unwrap();
    assert_eq!(compara.lines().count(), 3);
    assert!(compara.contains("WBGene00000001,ENSG00000000001,,\n"));
    assert!(stored.files.iter().all(|path| path.starts_with(&root)));

    let leftovers = fs::read_dir(root.as_std_path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(".ortholist"))
        .count();
    assert_eq!(leftovers, 0);
}
