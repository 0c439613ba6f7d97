use std::time::Duration;

use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;

use crate::domain::Namespace;
use crate::error::OrthoError;
use crate::provider::{HistoryRecord, LookupProvider};

/// Access to UniSave, the UniProt entry version archive.
pub trait UniprotClient: Send + Sync {
    /// Entry versions known for an accession; empty when the accession is unknown.
    fn entry_versions(&self, accession: &str) -> Result<Vec<u32>, OrthoError>;

    /// Flat-text record of one entry version.
    fn entry_text(&self, accession: &str, version: u32) -> Result<Option<String>, OrthoError>;
}

#[derive(Clone)]
pub struct UniprotHttpClient {
    client: Client,
    base_url: String,
}

impl UniprotHttpClient {
    pub fn new() -> Result<Self, OrthoError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("ortholist/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| OrthoError::UniprotHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| OrthoError::UniprotHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: "https://rest.uniprot.org/unisave".to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// One attempt; the caller's retry policy decides whether to repeat.
    fn get(
        &self,
        accession: &str,
        query: &[(&str, String)],
    ) -> Result<Option<reqwest::blocking::Response>, OrthoError> {
        let url = format!("{}/{}", self.base_url, accession);
        let response = self.client.get(&url).query(query).send().map_err(|err| {
            if is_retryable_error(&err) {
                OrthoError::LookupTransient(format!("uniprot: {err}"))
            } else {
                OrthoError::UniprotHttp(err.to_string())
            }
        })?;
        let status = response.status().as_u16();
        if response.status().is_success() {
            return Ok(Some(response));
        }
        if status == 404 {
            return Ok(None);
        }
        if is_retryable_status(status) {
            return Err(OrthoError::LookupTransient(format!(
                "uniprot returned status {status}"
            )));
        }
        let message = response
            .text()
            .unwrap_or_else(|_| "UniProt request failed".to_string());
        Err(OrthoError::UniprotStatus { status, message })
    }
}

impl UniprotClient for UniprotHttpClient {
    fn entry_versions(&self, accession: &str) -> Result<Vec<u32>, OrthoError> {
        let Some(response) = self.get(accession, &[("format", "json".to_string())])? else {
            return Ok(Vec::new());
        };
        let raw: Value = response
            .json()
            .map_err(|err| OrthoError::UniprotHttp(err.to_string()))?;
        Ok(parse_entry_versions(&raw))
    }

    fn entry_text(&self, accession: &str, version: u32) -> Result<Option<String>, OrthoError> {
        let query = [
            ("format", "txt".to_string()),
            ("versions", version.to_string()),
        ];
        let Some(response) = self.get(accession, &query)? else {
            return Ok(None);
        };
        response
            .text()
            .map(Some)
            .map_err(|err| OrthoError::UniprotHttp(err.to_string()))
    }
}

pub fn parse_entry_versions(raw: &Value) -> Vec<u32> {
    let mut versions = raw
        .get("results")
        .and_then(|v| v.as_array())
        .map(|results| {
            results
                .iter()
                .filter_map(|entry| entry.get("entryVersion").and_then(|v| v.as_u64()))
                .filter_map(|version| u32::try_from(version).ok())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    versions.sort_unstable();
    versions.dedup();
    versions
}

/// Pulls WormBase and Ensembl identifiers from the `DR` lines of a flat-text entry.
pub struct CrossRefExtractor {
    wormbase: Regex,
    ensembl_gene: Regex,
    ensembl_protein: Regex,
}

impl CrossRefExtractor {
    pub fn new() -> Result<Self, OrthoError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|err| OrthoError::InvalidIdentifier(err.to_string()))
        };
        Ok(Self {
            wormbase: compile(r"\bWBGene[0-9]{8}\b")?,
            ensembl_gene: compile(r"\bENSG[0-9]{11}\b")?,
            ensembl_protein: compile(r"\bENSP[0-9]{11}\b")?,
        })
    }

    pub fn extract(&self, text: &str) -> Vec<(Namespace, String)> {
        let mut found: Vec<(Namespace, String)> = Vec::new();
        for line in text.lines().filter(|line| line.starts_with("DR   ")) {
            for (namespace, regex) in [
                (Namespace::WormBaseId, &self.wormbase),
                (Namespace::EnsemblGeneId, &self.ensembl_gene),
                (Namespace::EnsemblProteinId, &self.ensembl_protein),
            ] {
                for hit in regex.find_iter(line) {
                    let entry = (namespace, hit.as_str().to_string());
                    if !found.contains(&entry) {
                        found.push(entry);
                    }
                }
            }
        }
        found
    }
}

/// History half of the lookup capability for UniProt accessions.
///
/// Every known version is listed, but only the newest one is fetched in
/// full and carries cross-references.
pub struct UniprotHistory<C: UniprotClient> {
    client: C,
    extractor: CrossRefExtractor,
}

impl<C: UniprotClient> UniprotHistory<C> {
    pub fn new(client: C) -> Result<Self, OrthoError> {
        Ok(Self {
            client,
            extractor: CrossRefExtractor::new()?,
        })
    }

    pub fn client(&self) -> &C {
        &self.client
    }
}

impl<C: UniprotClient> LookupProvider for UniprotHistory<C> {
    fn lookup(
        &self,
        _id: &str,
        _from: Namespace,
        _to: Namespace,
    ) -> Result<Option<String>, OrthoError> {
        Ok(None)
    }

    fn history(&self, id: &str, namespace: Namespace) -> Result<Vec<HistoryRecord>, OrthoError> {
        if namespace != Namespace::UniProtId {
            return Ok(Vec::new());
        }
        let versions = self.client.entry_versions(id)?;
        let Some(&latest) = versions.iter().max() else {
            return Ok(Vec::new());
        };
        let mut records = versions
            .iter()
            .filter(|version| **version != latest)
            .map(|version| HistoryRecord::new(*version))
            .collect::<Vec<_>>();
        let mut newest = HistoryRecord::new(latest);
        if let Some(text) = self.client.entry_text(id, latest)? {
            newest.cross_references = self.extractor.extract(&text);
        }
        tracing::debug!(
            accession = id,
            versions = versions.len(),
            references = newest.cross_references.len(),
            "uniprot history"
        );
        records.push(newest);
        Ok(records)
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_from_unisave_json() {
        let raw = serde_json::json!({
            "results": [
                {"accession": "Q9XXX1", "entryVersion": 12},
                {"accession": "Q9XXX1", "entryVersion": 3},
                {"accession": "Q9XXX1", "entryVersion": 12}
            ]
        });
        assert_eq!(parse_entry_versions(&raw), vec![3, 12]);
        assert!(parse_entry_versions(&serde_json::json!({})).is_empty());
    }

    #[test]
    fn cross_references_only_from_dr_lines() {
        let text = "\
ID   YX01_CAEEL              Unreviewed;       312 AA.
CC   -!- Similar to WBGene00000000 in an older note.
DR   WormBase; F35D2.2; CE12345; WBGene00019439; -.
DR   Ensembl; ENST00000269305.9; ENSP00000269305.4; ENSG00000141510.19.
";
        let extractor = CrossRefExtractor::new().unwrap();
        let refs = extractor.extract(text);
        assert_eq!(
            refs,
            vec![
                (Namespace::WormBaseId, "WBGene00019439".to_string()),
                (Namespace::EnsemblGeneId, "ENSG00000141510".to_string()),
                (Namespace::EnsemblProteinId, "ENSP00000269305".to_string()),
            ]
        );
    }
}
