use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::OrthoError;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    WormBaseId,
    EnsemblGeneId,
    EnsemblProteinId,
    UniProtId,
    EntrezId,
    OmaId,
    WormpepId,
}

impl Namespace {
    pub const ALL: [Namespace; 7] = [
        Namespace::WormBaseId,
        Namespace::EnsemblGeneId,
        Namespace::EnsemblProteinId,
        Namespace::UniProtId,
        Namespace::EntrezId,
        Namespace::OmaId,
        Namespace::WormpepId,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::WormBaseId => "wormbase",
            Namespace::EnsemblGeneId => "ensembl_gene",
            Namespace::EnsemblProteinId => "ensembl_protein",
            Namespace::UniProtId => "uniprot",
            Namespace::EntrezId => "entrez",
            Namespace::OmaId => "oma",
            Namespace::WormpepId => "wormpep",
        }
    }

    /// Organism a namespace is exclusive to, if any.
    pub fn organism_hint(&self) -> Option<Organism> {
        match self {
            Namespace::WormBaseId | Namespace::WormpepId => Some(Organism::Worm),
            _ => None,
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = OrthoError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "wormbase" | "wormbase_id" | "wormbaseid" | "wb" => Ok(Namespace::WormBaseId),
            "ensembl_gene" | "ensembl_gene_id" | "ensemblgeneid" | "ensg" => {
                Ok(Namespace::EnsemblGeneId)
            }
            "ensembl_protein" | "ensembl_protein_id" | "ensemblproteinid" | "ensp" => {
                Ok(Namespace::EnsemblProteinId)
            }
            "uniprot" | "uniprot_id" | "uniprotid" => Ok(Namespace::UniProtId),
            "entrez" | "entrez_id" | "entrezid" => Ok(Namespace::EntrezId),
            "oma" | "oma_id" | "omaid" => Ok(Namespace::OmaId),
            "wormpep" | "wormpep_id" | "wormpepid" => Ok(Namespace::WormpepId),
            _ => Err(OrthoError::InvalidNamespace(value.to_string())),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Organism {
    Worm,
    Human,
}

impl Organism {
    /// Namespace every identifier of this organism is resolved into.
    pub fn target_namespace(&self) -> Namespace {
        match self {
            Organism::Worm => Namespace::WormBaseId,
            Organism::Human => Namespace::EnsemblGeneId,
        }
    }
}

impl fmt::Display for Organism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Organism::Worm => write!(f, "worm"),
            Organism::Human => write!(f, "human"),
        }
    }
}

impl FromStr for Organism {
    type Err = OrthoError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "worm" | "cele" | "c.elegans" | "caenorhabditis elegans" | "6239" => {
                Ok(Organism::Worm)
            }
            "human" | "hsap" | "h.sapiens" | "homo sapiens" | "9606" => Ok(Organism::Human),
            _ => Err(OrthoError::InvalidOrganism(value.to_string())),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
pub enum SourceDatabase {
    #[value(name = "ensembl-compara")]
    EnsemblCompara,
    #[value(name = "homologene")]
    HomoloGene,
    #[value(name = "inparanoid")]
    InParanoid,
    #[value(name = "oma")]
    Oma,
    #[value(name = "orthoinspector")]
    OrthoInspector,
    #[value(name = "orthomcl")]
    OrthoMcl,
}

impl SourceDatabase {
    pub const ALL: [SourceDatabase; 6] = [
        SourceDatabase::EnsemblCompara,
        SourceDatabase::HomoloGene,
        SourceDatabase::InParanoid,
        SourceDatabase::Oma,
        SourceDatabase::OrthoInspector,
        SourceDatabase::OrthoMcl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceDatabase::EnsemblCompara => "EnsemblCompara",
            SourceDatabase::HomoloGene => "HomoloGene",
            SourceDatabase::InParanoid => "InParanoid",
            SourceDatabase::Oma => "OMA",
            SourceDatabase::OrthoInspector => "OrthoInspector",
            SourceDatabase::OrthoMcl => "OrthoMCL",
        }
    }

    pub fn file_stem(&self) -> &'static str {
        match self {
            SourceDatabase::EnsemblCompara => "compara",
            SourceDatabase::HomoloGene => "homologene",
            SourceDatabase::InParanoid => "inparanoid",
            SourceDatabase::Oma => "oma",
            SourceDatabase::OrthoInspector => "orthoinspector",
            SourceDatabase::OrthoMcl => "orthomcl",
        }
    }
}

impl fmt::Display for SourceDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SourceDatabase {
    type Err = OrthoError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized: String = value
            .trim()
            .chars()
            .filter(|ch| ch.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "ensemblcompara" | "compara" => Ok(SourceDatabase::EnsemblCompara),
            "homologene" => Ok(SourceDatabase::HomoloGene),
            "inparanoid" => Ok(SourceDatabase::InParanoid),
            "oma" => Ok(SourceDatabase::Oma),
            "orthoinspector" => Ok(SourceDatabase::OrthoInspector),
            "orthomcl" => Ok(SourceDatabase::OrthoMcl),
            _ => Err(OrthoError::InvalidSource(value.to_string())),
        }
    }
}

/// Gene-set release the lifecycle table refers to (e.g. `WS255`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Release(String);

impl Release {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Release {
    type Err = OrthoError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_string();
        let is_valid = !normalized.is_empty()
            && normalized
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '.' || ch == '_');
        if !is_valid {
            return Err(OrthoError::InvalidRelease(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RawIdentifier {
    pub value: String,
    pub namespace: Namespace,
    pub organism: Organism,
}

impl RawIdentifier {
    /// Builds an identifier, dropping a leading taxon tag such as `cele|`.
    pub fn new(
        value: &str,
        namespace: Namespace,
        organism: Organism,
    ) -> Result<Self, OrthoError> {
        let trimmed = value.trim();
        let bare = match trimmed.split_once('|') {
            Some((_, rest)) => rest.trim(),
            None => trimmed,
        };
        if bare.is_empty() || bare.chars().any(|ch| ch.is_whitespace() || ch == '|') {
            return Err(OrthoError::InvalidIdentifier(value.to_string()));
        }
        Ok(Self {
            value: bare.to_string(),
            namespace,
            organism,
        })
    }

    pub fn worm(value: &str, namespace: Namespace) -> Result<Self, OrthoError> {
        Self::new(value, namespace, Organism::Worm)
    }

    pub fn human(value: &str, namespace: Namespace) -> Result<Self, OrthoError> {
        Self::new(value, namespace, Organism::Human)
    }
}

impl fmt::Display for RawIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawPair {
    pub worm: RawIdentifier,
    pub human: RawIdentifier,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrthologGroup {
    pub group_id: String,
    pub members: BTreeSet<RawIdentifier>,
}

impl OrthologGroup {
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            members: BTreeSet::new(),
        }
    }

    pub fn with_member(mut self, member: RawIdentifier) -> Self {
        self.members.insert(member);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceRow {
    Pair(RawPair),
    Group(OrthologGroup),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrthologPair {
    pub worm_canonical: String,
    pub human_canonical: String,
    pub source_database: SourceDatabase,
}
