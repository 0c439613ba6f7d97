use std::collections::BTreeMap;

use crate::domain::{OrthologGroup, Organism, RawIdentifier};
use crate::error::OrthoError;

/// Checks that every member carries one organism tag consistent with its
/// namespace.
pub fn validate(group: &OrthologGroup) -> Result<(), OrthoError> {
    let malformed = |reason: String| OrthoError::MalformedGroup {
        group_id: group.group_id.clone(),
        reason,
    };
    let mut tags: BTreeMap<(&str, _), Organism> = BTreeMap::new();
    for member in &group.members {
        if let Some(expected) = member.namespace.organism_hint() {
            if expected != member.organism {
                return Err(malformed(format!(
                    "{member} is tagged {} but its namespace belongs to {expected}",
                    member.organism
                )));
            }
        }
        let key = (member.value.as_str(), member.namespace);
        if let Some(previous) = tags.insert(key, member.organism) {
            if previous != member.organism {
                return Err(malformed(format!("{member} is tagged as both worm and human")));
            }
        }
    }
    Ok(())
}

/// Flattens a group into every worm × human pair, in member order.
pub fn expand(group: &OrthologGroup) -> Result<Vec<(RawIdentifier, RawIdentifier)>, OrthoError> {
    validate(group)?;
    let (worms, humans): (Vec<&RawIdentifier>, Vec<&RawIdentifier>) = group
        .members
        .iter()
        .partition(|member| member.organism == Organism::Worm);
    let mut pairs = Vec::with_capacity(worms.len() * humans.len());
    for worm in &worms {
        for human in &humans {
            pairs.push(((*worm).clone(), (*human).clone()));
        }
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::domain::Namespace;

    #[test]
    fn expands_cross_product() {
        let group = OrthologGroup::new("OG5_126572")
            .with_member(RawIdentifier::worm("WBGene00000001", Namespace::WormBaseId).unwrap())
            .with_member(RawIdentifier::worm("WBGene00000002", Namespace::WormBaseId).unwrap())
            .with_member(RawIdentifier::human("ENSP00000000001", Namespace::EnsemblProteinId).unwrap())
            .with_member(RawIdentifier::human("ENSP00000000002", Namespace::EnsemblProteinId).unwrap())
            .with_member(RawIdentifier::human("ENSP00000000003", Namespace::EnsemblProteinId).unwrap());
        let pairs = expand(&group).unwrap();
        assert_eq!(pairs.len(), 6);
        assert!(pairs.iter().all(|(worm, human)| {
            worm.organism == Organism::Worm && human.organism == Organism::Human
        }));
    }

    #[test]
    fn one_sided_group_yields_nothing() {
        let group = OrthologGroup::new("1")
            .with_member(RawIdentifier::human("P04637", Namespace::UniProtId).unwrap());
        assert!(expand(&group).unwrap().is_empty());
        assert!(expand(&OrthologGroup::new("empty")).unwrap().is_empty());
    }

    #[test]
    fn conflicting_tags_are_malformed() {
        let group = OrthologGroup::new("42")
            .with_member(RawIdentifier::worm("Q9XXX1", Namespace::UniProtId).unwrap())
            .with_member(RawIdentifier::human("Q9XXX1", Namespace::UniProtId).unwrap());
        assert_matches!(expand(&group), Err(OrthoError::MalformedGroup { .. }));
    }

    #[test]
    fn namespace_organism_mismatch_is_malformed() {
        let group = OrthologGroup::new("43")
            .with_member(RawIdentifier::human("WBGene00000001", Namespace::WormBaseId).unwrap());
        assert_matches!(validate(&group), Err(OrthoError::MalformedGroup { .. }));
    }
}
