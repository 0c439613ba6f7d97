use std::collections::HashMap;

use camino::Utf8Path;

use crate::domain::Namespace;
use crate::error::OrthoError;
use crate::fs_util::read_records;
use crate::provider::{HistoryRecord, LookupProvider};

/// Bulk id → candidate mapping for one namespace pair.
#[derive(Debug, Clone)]
pub struct MappingTable {
    from: Namespace,
    to: Namespace,
    entries: HashMap<String, String>,
    ambiguous: usize,
}

impl MappingTable {
    pub fn new(from: Namespace, to: Namespace) -> Self {
        Self {
            from,
            to,
            entries: HashMap::new(),
            ambiguous: 0,
        }
    }

    /// Columns: source id, target id. Rows without a target are skipped.
    pub fn load(
        path: &Utf8Path,
        from: Namespace,
        to: Namespace,
        has_header: bool,
    ) -> Result<Self, OrthoError> {
        let mut table = Self::new(from, to);
        for record in read_records(path, has_header)? {
            let id = record.require(0, path)?;
            let Some(candidate) = record.field(1) else {
                continue;
            };
            table.insert(id, candidate);
        }
        if table.ambiguous > 0 {
            tracing::warn!(
                %path,
                ambiguous = table.ambiguous,
                "mapping table lists several candidates for some ids; keeping the first"
            );
        }
        tracing::info!(%path, %from, %to, entries = table.len(), "loaded mapping table");
        Ok(table)
    }

    /// First candidate for an id wins. Returns false when the row was ignored.
    pub fn insert(&mut self, id: &str, candidate: &str) -> bool {
        match self.entries.get(id) {
            Some(existing) if existing == candidate => false,
            Some(_) => {
                self.ambiguous += 1;
                false
            }
            None => {
                self.entries.insert(id.to_string(), candidate.to_string());
                true
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.entries.get(id).map(String::as_str)
    }

    pub fn from(&self) -> Namespace {
        self.from
    }

    pub fn to(&self) -> Namespace {
        self.to
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ambiguous(&self) -> usize {
        self.ambiguous
    }

    fn absorb(&mut self, other: MappingTable) {
        let mut rows = other.entries.into_iter().collect::<Vec<_>>();
        rows.sort();
        for (id, candidate) in rows {
            self.insert(&id, &candidate);
        }
        self.ambiguous += other.ambiguous;
    }
}

/// Offline record of identifier versions for one namespace.
#[derive(Debug, Clone)]
pub struct HistoryTable {
    namespace: Namespace,
    records: HashMap<String, Vec<HistoryRecord>>,
}

impl HistoryTable {
    pub fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            records: HashMap::new(),
        }
    }

    /// Columns: id, version, referenced namespace, referenced id.
    pub fn load(path: &Utf8Path, namespace: Namespace, has_header: bool) -> Result<Self, OrthoError> {
        let mut table = Self::new(namespace);
        for record in read_records(path, has_header)? {
            let id = record.require(0, path)?;
            let version = record
                .require(1, path)?
                .parse::<u32>()
                .map_err(|err| OrthoError::TableParse {
                    path: path.to_string(),
                    line: record.line,
                    message: format!("invalid version: {err}"),
                })?;
            match (record.field(2), record.field(3)) {
                (Some(ns), Some(target)) => {
                    let ns = ns.parse::<Namespace>().map_err(|err| OrthoError::TableParse {
                        path: path.to_string(),
                        line: record.line,
                        message: err.to_string(),
                    })?;
                    table.add(id, version, Some((ns, target)));
                }
                _ => table.add(id, version, None),
            }
        }
        tracing::info!(%path, %namespace, ids = table.records.len(), "loaded history table");
        Ok(table)
    }

    pub fn add(&mut self, id: &str, version: u32, reference: Option<(Namespace, &str)>) {
        let versions = self.records.entry(id.to_string()).or_default();
        let index = match versions.iter().position(|record| record.version == version) {
            Some(index) => index,
            None => {
                versions.push(HistoryRecord::new(version));
                versions.len() - 1
            }
        };
        if let Some((ns, target)) = reference {
            let record = &mut versions[index];
            if record.reference(ns) != Some(target) {
                record.cross_references.push((ns, target.to_string()));
            }
        }
        versions.sort_by_key(|record| record.version);
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn records(&self, id: &str) -> Vec<HistoryRecord> {
        self.records.get(id).cloned().unwrap_or_default()
    }
}

/// Lookup provider served entirely from local tables.
#[derive(Debug, Clone, Default)]
pub struct TableLookup {
    tables: HashMap<(Namespace, Namespace), MappingTable>,
    history: HashMap<Namespace, HistoryTable>,
}

impl TableLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, table: MappingTable) {
        let key = (table.from(), table.to());
        match self.tables.get_mut(&key) {
            Some(existing) => existing.absorb(table),
            None => {
                self.tables.insert(key, table);
            }
        }
    }

    pub fn with_table(mut self, table: MappingTable) -> Self {
        self.add_table(table);
        self
    }

    pub fn add_history(&mut self, table: HistoryTable) {
        self.history.insert(table.namespace(), table);
    }

    pub fn with_history(mut self, table: HistoryTable) -> Self {
        self.add_history(table);
        self
    }

    pub fn serves_history(&self, namespace: Namespace) -> bool {
        self.history.contains_key(&namespace)
    }

    fn direct(&self, id: &str, from: Namespace, to: Namespace) -> Option<&str> {
        self.tables.get(&(from, to)).and_then(|table| table.get(id))
    }

    /// `from → X → to` through any two loaded tables, in namespace order.
    fn two_hop(&self, id: &str, from: Namespace, to: Namespace) -> Option<&str> {
        Namespace::ALL
            .iter()
            .filter(|mid| **mid != from && **mid != to)
            .find_map(|mid| {
                let intermediate = self.direct(id, from, *mid)?;
                self.direct(intermediate, *mid, to)
            })
    }
}

impl LookupProvider for TableLookup {
    fn lookup(
        &self,
        id: &str,
        from: Namespace,
        to: Namespace,
    ) -> Result<Option<String>, OrthoError> {
        let candidate = self
            .direct(id, from, to)
            .or_else(|| self.two_hop(id, from, to));
        Ok(candidate.map(str::to_string))
    }

    fn history(&self, id: &str, namespace: Namespace) -> Result<Vec<HistoryRecord>, OrthoError> {
        Ok(self
            .history
            .get(&namespace)
            .map(|table| table.records(id))
            .unwrap_or_default())
    }
}

/// Curated exceptions, loaded once per run and never mutated afterwards.
#[derive(Debug, Clone, Default)]
pub struct OverrideTable {
    entries: HashMap<(Namespace, Namespace, String), String>,
}

impl OverrideTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(
        path: &Utf8Path,
        from: Namespace,
        to: Namespace,
        has_header: bool,
    ) -> Result<Self, OrthoError> {
        let mut table = Self::new();
        table.extend_from(path, from, to, has_header)?;
        Ok(table)
    }

    pub fn extend_from(
        &mut self,
        path: &Utf8Path,
        from: Namespace,
        to: Namespace,
        has_header: bool,
    ) -> Result<(), OrthoError> {
        for record in read_records(path, has_header)? {
            let id = record.require(0, path)?;
            let target = record.require(1, path)?;
            self.insert(from, to, id, target);
        }
        tracing::info!(%path, %from, %to, entries = self.len(), "loaded override table");
        Ok(())
    }

    pub fn insert(&mut self, from: Namespace, to: Namespace, id: &str, target: &str) {
        self.entries
            .entry((from, to, id.to_string()))
            .or_insert_with(|| target.to_string());
    }

    pub fn with_entry(mut self, from: Namespace, to: Namespace, id: &str, target: &str) -> Self {
        self.insert(from, to, id, target);
        self
    }

    pub fn get(&self, from: Namespace, to: Namespace, id: &str) -> Option<&str> {
        self.entries
            .get(&(from, to, id.to_string()))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_candidate_wins() {
        let mut table = MappingTable::new(Namespace::EntrezId, Namespace::WormBaseId);
        assert!(table.insert("171590", "WBGene00000001"));
        assert!(!table.insert("171590", "WBGene00000002"));
        assert_eq!(table.get("171590"), Some("WBGene00000001"));
        assert_eq!(table.ambiguous(), 1);
    }

    #[test]
    fn quoted_ids_with_commas_load_whole() {
        let dir = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::from_path_buf(dir.path().join("uniprot.csv")).unwrap();
        std::fs::write(&path, "\"Q9XXX1, isoform 2\",WBGene00000001\n").unwrap();

        let table = MappingTable::load(&path, Namespace::UniProtId, Namespace::WormBaseId, false)
            .unwrap();
        assert_eq!(table.get("Q9XXX1, isoform 2"), Some("WBGene00000001"));
        assert_eq!(table.get("Q9XXX1"), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn two_hop_route() {
        let mut oma = MappingTable::new(Namespace::OmaId, Namespace::WormpepId);
        oma.insert("CAEEL00001", "CE00001");
        let mut wormpep = MappingTable::new(Namespace::WormpepId, Namespace::WormBaseId);
        wormpep.insert("CE00001", "WBGene00000007");
        let lookup = TableLookup::new().with_table(oma).with_table(wormpep);

        let found = lookup
            .lookup("CAEEL00001", Namespace::OmaId, Namespace::WormBaseId)
            .unwrap();
        assert_eq!(found.as_deref(), Some("WBGene00000007"));
        let missing = lookup
            .lookup("CAEEL09999", Namespace::OmaId, Namespace::WormBaseId)
            .unwrap();
        assert_eq!(missing, None);
    }

    #[test]
    fn history_versions_sorted() {
        let mut table = HistoryTable::new(Namespace::UniProtId);
        table.add("Q9XXX1", 7, Some((Namespace::WormBaseId, "WBGene00019439")));
        table.add("Q9XXX1", 2, None);
        let records = table.records("Q9XXX1");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].version, 2);
        assert_eq!(records[1].reference(Namespace::WormBaseId), Some("WBGene00019439"));
    }

    #[test]
    fn override_lookup_is_keyed_by_pair() {
        let overrides = OverrideTable::new().with_entry(
            Namespace::UniProtId,
            Namespace::EnsemblGeneId,
            "P04637",
            "ENSG00000141510",
        );
        assert_eq!(
            overrides.get(Namespace::UniProtId, Namespace::EnsemblGeneId, "P04637"),
            Some("ENSG00000141510")
        );
        assert_eq!(
            overrides.get(Namespace::UniProtId, Namespace::WormBaseId, "P04637"),
            None
        );
    }
}
