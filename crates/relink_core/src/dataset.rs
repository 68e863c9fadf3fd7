use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::filesystem::{absolute_from_relative, compute_hash, write_document};
use crate::runtime::ResolvedPaths;

/// Extractor output: document path -> raw matches in extraction order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dataset {
    documents: BTreeMap<String, Vec<String>>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the matches of one document. Documents without matches are not
    /// recorded; returns whether the document was kept.
    pub fn insert(&mut self, relative_path: impl Into<String>, matches: Vec<String>) -> bool {
        if matches.is_empty() {
            return false;
        }
        self.documents.insert(relative_path.into(), matches);
        true
    }

    pub fn get(&self, relative_path: &str) -> Option<&[String]> {
        self.documents.get(relative_path).map(Vec::as_slice)
    }

    pub fn contains(&self, relative_path: &str) -> bool {
        self.documents.contains_key(relative_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.documents
            .iter()
            .map(|(path, matches)| (path.as_str(), matches.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn match_count(&self) -> usize {
        self.documents.values().map(Vec::len).sum()
    }
}

/// Content hashes taken at extraction time, stored beside the dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetManifest {
    pub generated_at_unix: u64,
    pub document_extension: String,
    pub documents: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetStats {
    pub documents: usize,
    pub matches: usize,
    pub manifest_present: bool,
    pub generated_at_unix: Option<u64>,
    pub stale_documents: Vec<String>,
    pub missing_documents: Vec<String>,
}

pub fn write_dataset(path: &Path, dataset: &Dataset) -> Result<()> {
    let rendered =
        serde_json::to_string_pretty(dataset).context("failed to serialize dataset JSON")?;
    write_document(path, &format!("{rendered}\n"))
}

/// `Ok(None)` when the dataset has not been extracted yet.
pub fn load_dataset(path: &Path) -> Result<Option<Dataset>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let dataset = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse dataset {}", path.display()))?;
    Ok(Some(dataset))
}

pub fn write_manifest(path: &Path, manifest: &DatasetManifest) -> Result<()> {
    let rendered =
        serde_json::to_string_pretty(manifest).context("failed to serialize manifest JSON")?;
    write_document(path, &format!("{rendered}\n"))
}

pub fn load_manifest(path: &Path) -> Result<Option<DatasetManifest>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let manifest = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse manifest {}", path.display()))?;
    Ok(Some(manifest))
}

impl DatasetManifest {
    /// True when the recorded hash differs from `content`. Documents the
    /// manifest does not know about are not considered stale.
    pub fn is_stale(&self, relative_path: &str, content: &str) -> bool {
        self.documents
            .get(relative_path)
            .is_some_and(|hash| *hash != compute_hash(content))
    }
}

pub fn dataset_stats(paths: &ResolvedPaths) -> Result<Option<DatasetStats>> {
    let Some(dataset) = load_dataset(&paths.dataset_path)? else {
        return Ok(None);
    };
    let manifest = load_manifest(&paths.manifest_path)?;

    let mut stale_documents = Vec::new();
    let mut missing_documents = Vec::new();
    for (relative_path, _) in dataset.iter() {
        let absolute = absolute_from_relative(paths, relative_path);
        if !absolute.exists() {
            missing_documents.push(relative_path.to_string());
            continue;
        }
        if let Some(manifest) = &manifest {
            let content = fs::read_to_string(&absolute)
                .with_context(|| format!("failed to read {}", absolute.display()))?;
            if manifest.is_stale(relative_path, &content) {
                stale_documents.push(relative_path.to_string());
            }
        }
    }

    Ok(Some(DatasetStats {
        documents: dataset.len(),
        matches: dataset.match_count(),
        manifest_present: manifest.is_some(),
        generated_at_unix: manifest.as_ref().map(|item| item.generated_at_unix),
        stale_documents,
        missing_documents,
    }))
}

pub(crate) fn unix_timestamp() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before UNIX_EPOCH")
        .map(|duration| duration.as_secs())
}
