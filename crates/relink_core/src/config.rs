use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CANONICAL_URL: &str = "https://ladal.edu.au";
pub const DEFAULT_DOCUMENT_EXTENSION: &str = "qmd";
pub const DEFAULT_HOSTNAMES: [&str; 2] = ["slcladal.github.io", "ladal.edu.au"];

const DEFAULT_TUTORIALS: [&str; 44] = [
    "atap_docclass",
    "comp",
    "gutenberg",
    "key",
    "litsty",
    "pdf2txt",
    "reinfnlp",
    "surveys",
    "tree",
    "basicquant",
    "corplingr",
    "introquant",
    "kwics",
    "llr",
    "postag",
    "repro",
    "svm",
    "txtsum",
    "basicstatz",
    "dimred",
    "intror",
    "laegs",
    "load",
    "pwr",
    "sentiment",
    "table",
    "vc",
    "clust",
    "dstats",
    "introta",
    "lex",
    "motion",
    "regex",
    "spellcheck",
    "textanalysis",
    "whyr",
    "coll",
    "dviz",
    "introviz",
    "lexsim",
    "net",
    "regression",
    "string",
    "topic",
];

const DEFAULT_TOOLS: [&str; 8] = [
    "amtool",
    "keytool",
    "kwictool",
    "nettool",
    "postool",
    "sentool",
    "stringtool",
    "topictool",
];

const DEFAULT_LABELS: [&str; 3] = ["here", "this tutorial", "this tool"];

// Every singular/plural mix the extractor's label pattern accepts.
const DEFAULT_LABEL_ALIASES: [(&str, &str); 6] = [
    ("these tutorials", "this tutorial"),
    ("these tutorial", "this tutorial"),
    ("this tutorials", "this tutorial"),
    ("these tools", "this tool"),
    ("these tool", "this tool"),
    ("this tools", "this tool"),
];

// Targets that were renamed or misspelled on the legacy site.
const DEFAULT_SUBSTITUTIONS: [(&str, &str); 3] = [
    (
        "[here](https://slcladal.github.io/tagging.html)",
        "[here](tutorials/postag/postag.html)",
    ),
    (
        "[here](https://slcladal.github.io/introstats.html)",
        "[here](tutorials/basicstatz/basicstatz.html)",
    ),
    (
        "[here](https://slcladal.github.io/regresssion.html)",
        "[here](tutorials/regression/regression.html)",
    ),
];

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RelinkConfig {
    #[serde(default)]
    pub site: SiteSection,
    #[serde(default)]
    pub labels: LabelSection,
    #[serde(default = "default_substitutions")]
    pub substitutions: BTreeMap<String, String>,
    #[serde(default)]
    pub extract: ExtractSection,
}

impl Default for RelinkConfig {
    fn default() -> Self {
        Self {
            site: SiteSection::default(),
            labels: LabelSection::default(),
            substitutions: default_substitutions(),
            extract: ExtractSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct SiteSection {
    pub hostnames: Vec<String>,
    pub canonical_url: String,
    pub document_extension: String,
    pub asset_source_root: Option<PathBuf>,
    pub targets: Vec<TargetGroup>,
}

impl Default for SiteSection {
    fn default() -> Self {
        Self {
            hostnames: DEFAULT_HOSTNAMES.iter().map(|host| host.to_string()).collect(),
            canonical_url: DEFAULT_CANONICAL_URL.to_string(),
            document_extension: DEFAULT_DOCUMENT_EXTENSION.to_string(),
            asset_source_root: None,
            targets: vec![
                TargetGroup {
                    layout: "tutorials".to_string(),
                    identifiers: DEFAULT_TUTORIALS.iter().map(|id| id.to_string()).collect(),
                },
                TargetGroup {
                    layout: "tools".to_string(),
                    identifiers: DEFAULT_TOOLS.iter().map(|id| id.to_string()).collect(),
                },
            ],
        }
    }
}

/// Destination identifiers that live under one output folder, e.g. `tutorials/<id>/<id>.html`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TargetGroup {
    pub layout: String,
    pub identifiers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LabelSection {
    pub canonical: Vec<String>,
    pub aliases: BTreeMap<String, String>,
}

impl Default for LabelSection {
    fn default() -> Self {
        Self {
            canonical: DEFAULT_LABELS.iter().map(|label| label.to_string()).collect(),
            aliases: DEFAULT_LABEL_ALIASES
                .iter()
                .map(|(alias, canonical)| (alias.to_string(), canonical.to_string()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ExtractSection {
    /// Replaces the built-in pattern list when non-empty.
    pub patterns: Vec<PatternSpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PatternSpec {
    pub name: String,
    pub regex: String,
}

fn default_substitutions() -> BTreeMap<String, String> {
    DEFAULT_SUBSTITUTIONS
        .iter()
        .map(|(old, new)| (old.to_string(), new.to_string()))
        .collect()
}

impl RelinkConfig {
    /// Built-in configuration, identical to what `relink init` materializes.
    pub fn builtin() -> Self {
        Self::default()
    }

    /// Resolve the asset source root: env RELINK_ASSET_ROOT > config > None.
    pub fn asset_source_root(&self) -> Option<PathBuf> {
        if let Ok(value) = env::var("RELINK_ASSET_ROOT") {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
        self.site.asset_source_root.clone()
    }

    /// Layout folder for a destination identifier, first group wins.
    pub fn layout_for(&self, identifier: &str) -> Option<&str> {
        self.site
            .targets
            .iter()
            .find(|group| group.identifiers.iter().any(|id| id == identifier))
            .map(|group| group.layout.as_str())
    }

    pub fn validate(&self) -> Result<()> {
        if self.site.hostnames.iter().all(|host| host.trim().is_empty()) {
            bail!("[site] hostnames must name at least one legacy hostname");
        }
        if self.site.document_extension.trim().is_empty() {
            bail!("[site] document_extension cannot be empty");
        }
        for group in &self.site.targets {
            if group.layout.trim().is_empty() {
                bail!("[[site.targets]] layout cannot be empty");
            }
        }
        for (alias, canonical) in &self.labels.aliases {
            if !self.labels.canonical.iter().any(|label| label == canonical) {
                bail!("label alias `{alias}` points at unknown canonical label `{canonical}`");
            }
        }
        for pattern in &self.extract.patterns {
            if pattern.name.trim().is_empty() {
                bail!("[[extract.patterns]] name cannot be empty");
            }
        }
        Ok(())
    }
}

/// Load and validate a RelinkConfig from a TOML file. Returns the built-in
/// configuration if the file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<RelinkConfig> {
    if !config_path.exists() {
        return Ok(RelinkConfig::builtin());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: RelinkConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    parsed
        .validate()
        .with_context(|| format!("invalid configuration in {}", config_path.display()))?;
    Ok(parsed)
}

pub fn render_default_config() -> Result<String> {
    let body = toml::to_string_pretty(&RelinkConfig::builtin())
        .context("failed to serialize default config TOML")?;
    Ok(format!(
        "# relink configuration (materialized by `relink init`)\n# asset_source_root may also come from RELINK_ASSET_ROOT.\n# Set [[extract.patterns]] entries (name, regex) to replace the built-in matchers.\n\n{body}"
    ))
}
