use std::collections::BTreeMap;
use std::fs;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{PatternSpec, RelinkConfig};
use crate::dataset::{Dataset, DatasetManifest, unix_timestamp, write_dataset, write_manifest};
use crate::filesystem::{compute_hash, display_path, scan_documents};
use crate::runtime::ResolvedPaths;

// Outer shapes come first so that a URL nested inside an already claimed
// span (a quoted URL inside a connection call) is not recorded twice.
const BUILTIN_PATTERNS: [(&str, &str); 6] = [
    (
        "label_link",
        r#"\[(?:\*\*)?(?i:here|th(?:is|ese) tutorials?|th(?:is|ese) tools?)(?:\*\*)?\]\(["']?https?://[^)"'\s]+["']?\)"#,
    ),
    (
        "remote_connection",
        r#"(?:base::)?(?:readRDS|load|read\.delim|read\.csv|read\.table)\(url\(["']https?://[^"'\s]+["'](?:,\s*["']rb["'])?\)\)"#,
    ),
    ("citation_note", r"note\s*=\s*\{https?://[^}\s]+\}"),
    ("url_field", r"url:\s*[^\s]*"),
    ("quoted_url", r#"["']https?://[^\s"']+["']"#),
    ("delimited_url", r"[`(\{]https?://[^\s`)\}]+[`)\}]"),
];

#[derive(Debug, Clone)]
pub struct MatchPattern {
    pub name: String,
    regex: Regex,
}

impl MatchPattern {
    pub fn new(name: &str, pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .with_context(|| format!("invalid extract pattern `{name}`: {pattern}"))?;
        Ok(Self {
            name: name.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

pub fn builtin_pattern_specs() -> Vec<PatternSpec> {
    BUILTIN_PATTERNS
        .iter()
        .map(|(name, regex)| PatternSpec {
            name: name.to_string(),
            regex: regex.to_string(),
        })
        .collect()
}

/// Configured patterns, or the built-in list when the config names none.
pub fn compile_patterns(config: &RelinkConfig) -> Result<Vec<MatchPattern>> {
    let specs = if config.extract.patterns.is_empty() {
        builtin_pattern_specs()
    } else {
        config.extract.patterns.clone()
    };
    specs
        .iter()
        .map(|spec| MatchPattern::new(&spec.name, &spec.regex))
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentMatches {
    pub matches: Vec<String>,
    pub by_pattern: BTreeMap<String, usize>,
    pub discarded: usize,
    pub nested: usize,
}

/// Run every pattern over `content` in order. Matches are kept in pattern
/// order, then left-to-right; a match must mention one of `hostnames`, and a
/// match lying entirely inside a span claimed by an earlier kept match is
/// dropped.
pub fn extract_document(
    content: &str,
    patterns: &[MatchPattern],
    hostnames: &[String],
) -> DocumentMatches {
    let mut result = DocumentMatches::default();
    let mut claimed: Vec<(usize, usize)> = Vec::new();

    for pattern in patterns {
        for found in pattern.regex.find_iter(content) {
            let text = found.as_str();
            if !hostnames
                .iter()
                .any(|host| !host.is_empty() && text.contains(host.as_str()))
            {
                result.discarded += 1;
                continue;
            }
            let span = (found.start(), found.end());
            if claimed
                .iter()
                .any(|(start, end)| *start <= span.0 && span.1 <= *end)
            {
                result.nested += 1;
                continue;
            }
            claimed.push(span);
            result.matches.push(text.to_string());
            *result.by_pattern.entry(pattern.name.clone()).or_insert(0) += 1;
        }
    }
    result
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractReport {
    pub dataset_path: String,
    pub manifest_path: String,
    pub scanned_documents: usize,
    pub kept_documents: usize,
    pub total_matches: usize,
    pub discarded_matches: usize,
    pub nested_matches: usize,
    pub by_pattern: BTreeMap<String, usize>,
    pub warnings: Vec<String>,
    #[serde(skip)]
    pub dataset: Dataset,
}

/// Walk the documents tree, extract matches and overwrite the dataset and
/// its manifest.
pub fn extract_tree(paths: &ResolvedPaths, config: &RelinkConfig) -> Result<ExtractReport> {
    let patterns = compile_patterns(config)?;
    let mut warnings = Vec::new();
    if !paths.documents_dir.exists() {
        let message = format!(
            "documents directory {} does not exist; writing an empty dataset",
            display_path(&paths.documents_dir)
        );
        warn!("{message}");
        warnings.push(message);
    }

    let documents = scan_documents(paths, &config.site.document_extension)?;
    let mut dataset = Dataset::new();
    let mut manifest = DatasetManifest {
        generated_at_unix: unix_timestamp()?,
        document_extension: config.site.document_extension.clone(),
        documents: BTreeMap::new(),
    };
    let mut by_pattern: BTreeMap<String, usize> = BTreeMap::new();
    let mut discarded_matches = 0usize;
    let mut nested_matches = 0usize;

    for document in &documents {
        let content = match fs::read_to_string(&document.absolute_path) {
            Ok(content) => content,
            Err(error) => {
                let message = format!("skipping {}: {error}", document.relative_path);
                warn!("{message}");
                warnings.push(message);
                continue;
            }
        };
        let found = extract_document(&content, &patterns, &config.site.hostnames);
        debug!(
            document = %document.relative_path,
            matches = found.matches.len(),
            "extracted"
        );
        discarded_matches += found.discarded;
        nested_matches += found.nested;
        for (name, count) in found.by_pattern {
            *by_pattern.entry(name).or_insert(0) += count;
        }
        if dataset.insert(document.relative_path.clone(), found.matches) {
            manifest
                .documents
                .insert(document.relative_path.clone(), compute_hash(&content));
        }
    }

    write_dataset(&paths.dataset_path, &dataset)?;
    write_manifest(&paths.manifest_path, &manifest)?;
    info!(
        documents = dataset.len(),
        matches = dataset.match_count(),
        "dataset written to {}",
        display_path(&paths.dataset_path)
    );

    Ok(ExtractReport {
        dataset_path: display_path(&paths.dataset_path),
        manifest_path: display_path(&paths.manifest_path),
        scanned_documents: documents.len(),
        kept_documents: dataset.len(),
        total_matches: dataset.match_count(),
        discarded_matches,
        nested_matches,
        by_pattern,
        warnings,
        dataset,
    })
}
