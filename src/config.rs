use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::domain::{Namespace, Release, SourceDatabase};
use crate::error::OrthoError;
use crate::fs_util::read_records;
use crate::input::Layout;
use crate::lifecycle::{DEFAULT_MAX_DEPTH, LifecycleTable};
use crate::provider::RetryPolicy;
use crate::resolver::DEFAULT_FAILURE_LIMIT;
use crate::tables::{HistoryTable, MappingTable, OverrideTable, TableLookup};

pub const DEFAULT_CONFIG_FILE: &str = "ortholist.json";

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    pub release: String,
    #[serde(default)]
    pub max_lifecycle_depth: Option<usize>,
    #[serde(default)]
    pub lookup: LookupSettings,
    #[serde(default)]
    pub mappings: Vec<TableEntry>,
    #[serde(default)]
    pub overrides: Vec<TableEntry>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub lifecycle: LifecycleEntry,
    #[serde(default)]
    pub human_reference: Option<Utf8PathBuf>,
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
    #[serde(default)]
    pub output_dir: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LookupSettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_concurrent_history")]
    pub max_concurrent_history: usize,
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: usize,
    #[serde(default)]
    pub uniprot_history: bool,
}

impl Default for LookupSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_concurrent_history: default_max_concurrent_history(),
            max_consecutive_failures: default_max_consecutive_failures(),
            uniprot_history: false,
        }
    }
}

fn default_max_retries() -> usize {
    3
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_max_concurrent_history() -> usize {
    4
}

fn default_max_consecutive_failures() -> usize {
    DEFAULT_FAILURE_LIMIT
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TableEntry {
    pub from: String,
    pub to: String,
    pub path: Utf8PathBuf,
    #[serde(default)]
    pub header: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HistoryEntry {
    pub namespace: String,
    pub path: Utf8PathBuf,
    #[serde(default)]
    pub header: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LifecycleEntry {
    #[serde(default)]
    pub current_genes: Option<Utf8PathBuf>,
    #[serde(default)]
    pub changes: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceEntry {
    pub database: String,
    pub path: Utf8PathBuf,
    #[serde(default)]
    pub layout: Layout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub from: Namespace,
    pub to: Namespace,
    pub path: Utf8PathBuf,
    pub header: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistorySpec {
    pub namespace: Namespace,
    pub path: Utf8PathBuf,
    pub header: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    pub database: SourceDatabase,
    pub path: Utf8PathBuf,
    pub layout: Layout,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub release: Release,
    pub max_lifecycle_depth: usize,
    pub retry: RetryPolicy,
    pub max_concurrent_history: usize,
    /// Zero keeps retrying forever without aborting.
    pub max_consecutive_failures: usize,
    pub uniprot_history: bool,
    pub mappings: Vec<TableSpec>,
    pub overrides: Vec<TableSpec>,
    pub history: Vec<HistorySpec>,
    pub current_genes: Option<Utf8PathBuf>,
    pub changes: Option<Utf8PathBuf>,
    pub human_reference: Option<Utf8PathBuf>,
    pub sources: Vec<SourceSpec>,
    pub output_dir: Utf8PathBuf,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, OrthoError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(OrthoError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| OrthoError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| OrthoError::ConfigParse(err.to_string()))?;

        let mut resolved = Self::resolve_config(config)?;
        let base = config_path
            .parent()
            .and_then(Utf8Path::from_path)
            .map(Utf8Path::to_path_buf)
            .unwrap_or_default();
        resolved.rebase(&base);
        Ok(resolved)
    }

    /// Validates a parsed config; paths are left as written.
    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, OrthoError> {
        let schema_version = config.schema_version.unwrap_or(1);
        let release: Release = config.release.parse()?;

        let mappings = config
            .mappings
            .into_iter()
            .map(table_spec)
            .collect::<Result<Vec<_>, OrthoError>>()?;
        let overrides = config
            .overrides
            .into_iter()
            .map(table_spec)
            .collect::<Result<Vec<_>, OrthoError>>()?;
        let history = config
            .history
            .into_iter()
            .map(|entry| {
                Ok(HistorySpec {
                    namespace: entry.namespace.parse()?,
                    path: entry.path,
                    header: entry.header,
                })
            })
            .collect::<Result<Vec<_>, OrthoError>>()?;

        let mut seen = HashSet::new();
        let sources = config
            .sources
            .into_iter()
            .map(|entry| {
                let database: SourceDatabase = entry.database.parse()?;
                if !seen.insert(database) {
                    return Err(OrthoError::ConfigParse(format!(
                        "source {database} listed more than once"
                    )));
                }
                Ok(SourceSpec {
                    database,
                    path: entry.path,
                    layout: entry.layout,
                })
            })
            .collect::<Result<Vec<_>, OrthoError>>()?;

        Ok(ResolvedConfig {
            schema_version,
            release,
            max_lifecycle_depth: config.max_lifecycle_depth.unwrap_or(DEFAULT_MAX_DEPTH),
            retry: RetryPolicy {
                max_retries: config.lookup.max_retries,
                base_delay: Duration::from_millis(config.lookup.base_delay_ms),
            },
            max_concurrent_history: config.lookup.max_concurrent_history.max(1),
            max_consecutive_failures: config.lookup.max_consecutive_failures,
            uniprot_history: config.lookup.uniprot_history,
            mappings,
            overrides,
            history,
            current_genes: config.lifecycle.current_genes,
            changes: config.lifecycle.changes,
            human_reference: config.human_reference,
            sources,
            output_dir: config
                .output_dir
                .unwrap_or_else(|| Utf8PathBuf::from("results")),
        })
    }
}

fn table_spec(entry: TableEntry) -> Result<TableSpec, OrthoError> {
    Ok(TableSpec {
        from: entry.from.parse()?,
        to: entry.to.parse()?,
        path: entry.path,
        header: entry.header,
    })
}

fn rebase_path(base: &Utf8Path, path: &mut Utf8PathBuf) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}

impl ResolvedConfig {
    /// Anchors relative paths at `base`, the directory holding the config file.
    pub fn rebase(&mut self, base: &Utf8Path) {
        if base.as_str().is_empty() {
            return;
        }
        for spec in self.mappings.iter_mut().chain(self.overrides.iter_mut()) {
            rebase_path(base, &mut spec.path);
        }
        for spec in &mut self.history {
            rebase_path(base, &mut spec.path);
        }
        for spec in &mut self.sources {
            rebase_path(base, &mut spec.path);
        }
        for path in [
            &mut self.current_genes,
            &mut self.changes,
            &mut self.human_reference,
        ]
        .into_iter()
        .flatten()
        {
            rebase_path(base, path);
        }
        rebase_path(base, &mut self.output_dir);
    }

    pub fn load_lookup(&self) -> Result<TableLookup, OrthoError> {
        let mut lookup = TableLookup::new();
        for spec in &self.mappings {
            lookup.add_table(MappingTable::load(&spec.path, spec.from, spec.to, spec.header)?);
        }
        for spec in &self.history {
            lookup.add_history(HistoryTable::load(&spec.path, spec.namespace, spec.header)?);
        }
        Ok(lookup)
    }

    pub fn load_overrides(&self) -> Result<OverrideTable, OrthoError> {
        let mut overrides = OverrideTable::new();
        for spec in &self.overrides {
            overrides.extend_from(&spec.path, spec.from, spec.to, spec.header)?;
        }
        Ok(overrides)
    }

    pub fn load_lifecycle(&self) -> Result<LifecycleTable, OrthoError> {
        LifecycleTable::load(
            self.release.clone(),
            self.current_genes.as_deref(),
            self.changes.as_deref(),
        )
    }

    pub fn load_human_reference(&self) -> Result<Option<HashSet<String>>, OrthoError> {
        let Some(path) = &self.human_reference else {
            return Ok(None);
        };
        let mut genes = HashSet::new();
        for record in read_records(path, false)? {
            genes.insert(record.require(0, path)?.to_string());
        }
        tracing::info!(%path, genes = genes.len(), "loaded human reference genes");
        Ok(Some(genes))
    }

    /// Sources to run: all configured ones, or the subset named in `only`.
    pub fn select_sources(&self, only: &[SourceDatabase]) -> Result<Vec<SourceSpec>, OrthoError> {
        if only.is_empty() {
            return Ok(self.sources.clone());
        }
        only.iter()
            .map(|database| {
                self.sources
                    .iter()
                    .find(|spec| spec.database == *database)
                    .cloned()
                    .ok_or_else(|| {
                        OrthoError::InvalidSource(format!("{database} is not configured"))
                    })
            })
            .collect()
    }
}
