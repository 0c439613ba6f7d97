use std::collections::BTreeSet;
use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use tempfile::Builder;

use crate::app::{RunReport, RunResult};
use crate::consensus::ConsensusSet;
use crate::error::OrthoError;
use crate::reconcile::{ReconciledSource, worm_changes};

const PAIR_HEADER: [&str; 4] = ["CE_WB_CURRENT", "HS_ENSG", "CE_WB_OLD", "CE_WB_COMMENT"];
const MASTER_HEADER: [&str; 4] = ["CE_WB_CURRENT", "HS_ENSG", "Databases", "Score"];

/// Output directory for one run's tables and report.
#[derive(Debug, Clone)]
pub struct ResultStore {
    root: Utf8PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredRun {
    pub generated_at: String,
    pub files: Vec<Utf8PathBuf>,
}

#[derive(Serialize)]
struct StoredReport<'a> {
    generated_at: &'a str,
    tool: String,
    #[serde(flatten)]
    report: &'a RunReport,
}

impl ResultStore {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn source_path(&self, source: &ReconciledSource) -> Utf8PathBuf {
        self.root.join(format!("{}.csv", source.source.file_stem()))
    }

    pub fn master_path(&self) -> Utf8PathBuf {
        self.root.join("master.csv.gz")
    }

    pub fn report_path(&self) -> Utf8PathBuf {
        self.root.join("report.json")
    }

    /// Writes every table of a finished run. Each file is replaced atomically.
    pub fn write_run(&self, result: &RunResult) -> Result<StoredRun, OrthoError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| OrthoError::Filesystem(err.to_string()))?;
        let generated_at = Utc::now().to_rfc3339();
        let mut files = Vec::new();

        let mut combined = BTreeSet::new();
        for source in &result.sources {
            let rows = pair_rows(source);
            let path = self.source_path(source);
            Self::write_atomic(&path, &csv_document(&PAIR_HEADER, &rows)?)?;
            files.push(path);
            combined.extend(rows);
        }
        let combined = combined.into_iter().collect::<Vec<_>>();
        let path = self.root.join("combined.csv");
        Self::write_atomic(&path, &csv_document(&PAIR_HEADER, &combined)?)?;
        files.push(path);

        let unique_worm = result
            .consensus
            .entries()
            .map(|entry| vec![entry.worm_canonical])
            .collect::<BTreeSet<_>>();
        let unique_human = result
            .consensus
            .entries()
            .map(|entry| vec![entry.human_canonical])
            .collect::<BTreeSet<_>>();
        for (name, header, rows) in [
            ("unique_wb.csv", ["CE_WB_CURRENT"], unique_worm),
            ("unique_ensg.csv", ["HS_ENSG"], unique_human),
        ] {
            let path = self.root.join(name);
            let rows = rows.into_iter().collect::<Vec<_>>();
            Self::write_atomic(&path, &csv_document(&header, &rows)?)?;
            files.push(path);
        }

        let path = self.master_path();
        Self::write_atomic(&path, &gzip(&master_table(&result.consensus)?)?)?;
        files.push(path);

        let report = result.report();
        let stored = StoredReport {
            generated_at: &generated_at,
            tool: format!("ortholist/{}", env!("CARGO_PKG_VERSION")),
            report: &report,
        };
        let content = serde_json::to_vec_pretty(&stored)
            .map_err(|err| OrthoError::Filesystem(err.to_string()))?;
        let path = self.report_path();
        Self::write_atomic(&path, &content)?;
        files.push(path);

        tracing::info!(root = %self.root, files = files.len(), "results written");
        Ok(StoredRun {
            generated_at,
            files,
        })
    }

    pub fn write_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), OrthoError> {
        let parent = path
            .parent()
            .ok_or_else(|| OrthoError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| OrthoError::Filesystem(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix(".ortholist")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| OrthoError::Filesystem(err.to_string()))?;
        temp.write_all(content)
            .map_err(|err| OrthoError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| OrthoError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

fn pair_rows(source: &ReconciledSource) -> Vec<Vec<String>> {
    worm_changes(source)
        .into_iter()
        .map(|(pair, old, comment)| {
            let old = if old == pair.worm_canonical {
                String::new()
            } else {
                old
            };
            vec![
                pair.worm_canonical,
                pair.human_canonical,
                old,
                comment.unwrap_or_default(),
            ]
        })
        .collect()
}

fn master_table(consensus: &ConsensusSet) -> Result<Vec<u8>, OrthoError> {
    let rows = consensus
        .entries()
        .map(|entry| {
            let databases = entry.databases_label();
            let score = entry.score().to_string();
            vec![entry.worm_canonical, entry.human_canonical, databases, score]
        })
        .collect::<Vec<_>>();
    csv_document(&MASTER_HEADER, &rows)
}

fn csv_document(header: &[&str], rows: &[Vec<String>]) -> Result<Vec<u8>, OrthoError> {
    let csv_error = |err: csv::Error| OrthoError::Filesystem(format!("write csv: {err}"));
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(header).map_err(csv_error)?;
    for row in rows {
        writer.write_record(row).map_err(csv_error)?;
    }
    writer
        .into_inner()
        .map_err(|err| OrthoError::Filesystem(format!("write csv: {}", err.error())))
}

fn gzip(content: &[u8]) -> Result<Vec<u8>, OrthoError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(content)
        .map_err(|err| OrthoError::Filesystem(err.to_string()))?;
    encoder
        .finish()
        .map_err(|err| OrthoError::Filesystem(err.to_string()))
}
