use assert_matches::assert_matches;

use ortholist::domain::{Namespace, Organism, RawIdentifier, Release, SourceDatabase};
use ortholist::error::OrthoError;

#[test]
fn parse_namespace_valid() {
    let ns: Namespace = "ensembl_protein".parse().unwrap();
    assert_eq!(ns, Namespace::EnsemblProteinId);
    assert_eq!(ns.to_string(), "ensembl_protein");
}

#[test]
fn parse_namespace_invalid() {
    let err = "flybase".parse::<Namespace>().unwrap_err();
    assert_matches!(err, OrthoError::InvalidNamespace(_));
}

#[test]
fn parse_organism_from_taxon() {
    assert_eq!("6239".parse::<Organism>().unwrap(), Organism::Worm);
    assert_eq!("hsap".parse::<Organism>().unwrap(), Organism::Human);
    assert_matches!("mouse".parse::<Organism>(), Err(OrthoError::InvalidOrganism(_)));
}

#[test]
fn organism_targets() {
    assert_eq!(Organism::Worm.target_namespace(), Namespace::WormBaseId);
    assert_eq!(Organism::Human.target_namespace(), Namespace::EnsemblGeneId);
}

#[test]
fn source_names_round_trip_through_display() {
    for source in SourceDatabase::ALL {
        let parsed: SourceDatabase = source.to_string().parse().unwrap();
        assert_eq!(parsed, source);
    }
}

#[test]
fn raw_identifier_rejects_inner_whitespace() {
    let err = RawIdentifier::human("ENSP 0001", Namespace::EnsemblProteinId).unwrap_err();
    assert_matches!(err, OrthoError::InvalidIdentifier(_));
}

#[test]
fn release_trims_input() {
    let release: Release = " WS255 ".parse().unwrap();
    assert_eq!(release.to_string(), "WS255");
}
