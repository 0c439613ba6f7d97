use std::collections::{HashMap, HashSet};

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::domain::{Namespace, Organism, OrthologGroup, RawIdentifier, RawPair, SourceRow};
use crate::error::OrthoError;
use crate::fs_util::{Record, read_records};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// `worm_id, worm_namespace, human_id, human_namespace`
    #[default]
    Pairs,
    /// `group_id, organism, namespace, id`
    Groups,
}

/// Rows read from one source file, plus the records that had to be dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceRows {
    pub rows: Vec<SourceRow>,
    /// Pair records or whole groups skipped because a member did not parse.
    pub malformed: usize,
}

/// Reads one source's uniform row file. A header line is expected.
///
/// A record that does not parse is skipped with a warning; only unreadable
/// files fail.
pub fn read_source_rows(path: &Utf8Path, layout: Layout) -> Result<SourceRows, OrthoError> {
    let records = read_records(path, true)?;
    let rows = match layout {
        Layout::Pairs => pair_rows(&records, path),
        Layout::Groups => group_rows(&records, path),
    };
    tracing::debug!(
        %path,
        ?layout,
        rows = rows.rows.len(),
        malformed = rows.malformed,
        "read source rows"
    );
    Ok(rows)
}

fn pair_rows(records: &[Record], path: &Utf8Path) -> SourceRows {
    let mut out = SourceRows::default();
    for record in records {
        let pair = identifier(record, path, 0, 1, Organism::Worm).and_then(|worm| {
            let human = identifier(record, path, 2, 3, Organism::Human)?;
            Ok(RawPair { worm, human })
        });
        match pair {
            Ok(pair) => out.rows.push(SourceRow::Pair(pair)),
            Err(err) => {
                tracing::warn!(error = %err, "skipping malformed pair row");
                out.malformed += 1;
            }
        }
    }
    out
}

/// Rows of one group need not be contiguous; groups keep first-seen order.
/// A group with any unparseable member is dropped whole.
fn group_rows(records: &[Record], path: &Utf8Path) -> SourceRows {
    let mut order: Vec<OrthologGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut broken: HashSet<String> = HashSet::new();
    let mut malformed = 0;
    for record in records {
        let group_id = match record.require(0, path) {
            Ok(group_id) => group_id,
            Err(err) => {
                tracing::warn!(error = %err, "skipping group row without a group id");
                malformed += 1;
                continue;
            }
        };
        let member = record
            .require(1, path)
            .and_then(|organism| {
                organism
                    .parse::<Organism>()
                    .map_err(|err| parse_error(record, path, err))
            })
            .and_then(|organism| identifier(record, path, 3, 2, organism));
        let slot = *index.entry(group_id.to_string()).or_insert_with(|| {
            order.push(OrthologGroup::new(group_id));
            order.len() - 1
        });
        match member {
            Ok(member) => {
                order[slot].members.insert(member);
            }
            Err(err) => {
                if broken.insert(group_id.to_string()) {
                    tracing::warn!(group = group_id, error = %err, "skipping malformed group");
                }
            }
        }
    }
    malformed += broken.len();
    let rows = order
        .into_iter()
        .filter(|group| !broken.contains(&group.group_id))
        .map(SourceRow::Group)
        .collect();
    SourceRows { rows, malformed }
}

fn identifier(
    record: &Record,
    path: &Utf8Path,
    value_at: usize,
    namespace_at: usize,
    organism: Organism,
) -> Result<RawIdentifier, OrthoError> {
    let namespace: Namespace = record
        .require(namespace_at, path)?
        .parse()
        .map_err(|err: OrthoError| parse_error(record, path, err))?;
    RawIdentifier::new(record.require(value_at, path)?, namespace, organism)
        .map_err(|err| parse_error(record, path, err))
}

fn parse_error(record: &Record, path: &Utf8Path, err: OrthoError) -> OrthoError {
    OrthoError::TableParse {
        path: path.to_string(),
        line: record.line,
        message: err.to_string(),
    }
}
