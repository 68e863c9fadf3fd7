use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;

use crate::config::RelinkConfig;
use crate::filesystem::document_dir;

const SCHEMES: [&str; 2] = ["https://", "http://"];
const BARE_DELIMITERS: [(&str, &str); 6] = [
    ("(", ")"),
    ("\"", "\""),
    ("'", "'"),
    ("<", ">"),
    ("`", "`"),
    ("{", "}"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Content,
    Data,
    Images,
    Scripts,
}

impl AssetKind {
    pub fn folder(self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::Data => "data",
            Self::Images => "images",
            Self::Scripts => "rscripts",
        }
    }

    /// Images and scripts are not part of the scaffolded layout and have to be
    /// pulled from the asset source tree.
    pub fn copies_from_source(self) -> bool {
        matches!(self, Self::Images | Self::Scripts)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    NormalizeLabel,
    LiteralSubstitution,
    ExactLink,
    AssetReference(AssetKind),
    UnwrapConnection,
    CitationNote,
    BareUrl,
}

impl Rule {
    pub fn name(self) -> &'static str {
        match self {
            Self::NormalizeLabel => "normalize-label",
            Self::LiteralSubstitution => "literal-substitution",
            Self::ExactLink => "exact-link",
            Self::AssetReference(AssetKind::Content) => "content-reference",
            Self::AssetReference(AssetKind::Data) => "data-reference",
            Self::AssetReference(AssetKind::Images) => "image-reference",
            Self::AssetReference(AssetKind::Scripts) => "script-reference",
            Self::UnwrapConnection => "unwrap-connection",
            Self::CitationNote => "citation-note",
            Self::BareUrl => "bare-url",
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::NormalizeLabel => "canonicalize link label case, bold markup and plural aliases",
            Self::LiteralSubstitution => "exact whole-string replacements from [substitutions]",
            Self::ExactLink => {
                "[label](host/<id>.html#frag) -> [label](<layout>/<id>/<id>.html#frag), site root -> /"
            }
            Self::AssetReference(AssetKind::Content) => "host/content/ -> <document dir>/",
            Self::AssetReference(AssetKind::Data) => "host/data/ -> <document dir>/data/",
            Self::AssetReference(AssetKind::Images) => {
                "host/images/ -> <document dir>/images/ and copy the image"
            }
            Self::AssetReference(AssetKind::Scripts) => {
                "host/rscripts/ -> <document dir>/rscripts/ and copy the script"
            }
            Self::UnwrapConnection => "url(\"<relative path>\", \"rb\") -> \"<relative path>\"",
            Self::CitationNote => "note = {host/<id>} -> note = {<canonical url>/<layout>/<id>/<id>.html}",
            Self::BareUrl => {
                "whole delimited host/<id>.html -> <layout>/<id>/<id>.html, site root -> /"
            }
        }
    }

    /// Default evaluation order. Label normalization must precede the exact
    /// link rule, and connection unwrapping must follow the asset prefixes.
    pub fn standard_order() -> Vec<Rule> {
        vec![
            Self::NormalizeLabel,
            Self::LiteralSubstitution,
            Self::ExactLink,
            Self::AssetReference(AssetKind::Content),
            Self::AssetReference(AssetKind::Data),
            Self::AssetReference(AssetKind::Images),
            Self::AssetReference(AssetKind::Scripts),
            Self::UnwrapConnection,
            Self::CitationNote,
            Self::BareUrl,
        ]
    }
}

/// A file the rewritten reference now expects next to its document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetCopy {
    pub kind: AssetKind,
    /// Path below the asset source root, e.g. `images/logo.png`.
    pub asset: String,
    /// Destination relative to the project root.
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RewriteOutcome {
    pub original: String,
    pub replacement: String,
    pub fired: Vec<&'static str>,
    pub asset_copies: Vec<AssetCopy>,
}

impl RewriteOutcome {
    pub fn changed(&self) -> bool {
        self.original != self.replacement
    }
}

#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<Rule>,
    config: RelinkConfig,
    label_link: Regex,
    connection: Regex,
    citation: Regex,
    url_field: Regex,
}

impl RuleSet {
    pub fn standard(config: &RelinkConfig) -> Result<Self> {
        Self::new(config, Rule::standard_order())
    }

    pub fn new(config: &RelinkConfig, rules: Vec<Rule>) -> Result<Self> {
        Ok(Self {
            rules,
            config: config.clone(),
            label_link: compile(r#"^\[([^\]]+)\]\((["']?)(.+?)(["']?)\)$"#)?,
            connection: compile(r#"url\((["'])([^"']+)["'](?:,\s*["']rb["'])?\)"#)?,
            citation: compile(r"^(note\s*=\s*\{)(.+)\}$")?,
            url_field: compile(r"^(url:\s*)(.*)$")?,
        })
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Run every rule in order over `raw`, each rule seeing the output of the
    /// previous one. `document` is the `/`-separated path of the document the
    /// match came from.
    pub fn rewrite(&self, raw: &str, document: &str) -> RewriteOutcome {
        let doc_dir = document_dir(document);
        let mut working = raw.to_string();
        let mut fired = Vec::new();
        let mut asset_copies = Vec::new();

        for rule in &self.rules {
            if let Some(next) = self.apply(*rule, &working, doc_dir, &mut asset_copies) {
                if next != working {
                    fired.push(rule.name());
                    working = next;
                }
            }
        }

        RewriteOutcome {
            original: raw.to_string(),
            replacement: working,
            fired,
            asset_copies,
        }
    }

    fn apply(
        &self,
        rule: Rule,
        working: &str,
        doc_dir: &str,
        copies: &mut Vec<AssetCopy>,
    ) -> Option<String> {
        match rule {
            Rule::NormalizeLabel => self.normalize_label(working),
            Rule::LiteralSubstitution => self.config.substitutions.get(working).cloned(),
            Rule::ExactLink => self.exact_link(working),
            Rule::AssetReference(kind) => self.asset_reference(kind, working, doc_dir, copies),
            Rule::UnwrapConnection => self.unwrap_connection(working),
            Rule::CitationNote => self.citation_note(working),
            Rule::BareUrl => self.bare_url(working),
        }
    }

    fn normalize_label(&self, working: &str) -> Option<String> {
        let captures = self.label_link.captures(working)?;
        let label = captures.get(1)?.as_str();
        let canonical = self.canonical_label(label)?;
        if canonical == label {
            return None;
        }
        let target_start = captures.get(1)?.end() + 1;
        Some(format!("[{canonical}]{}", &working[target_start..]))
    }

    fn canonical_label(&self, label: &str) -> Option<&str> {
        let plain = label
            .trim()
            .trim_start_matches("**")
            .trim_end_matches("**")
            .trim_start_matches("__")
            .trim_end_matches("__")
            .trim()
            .to_lowercase();
        if let Some(canonical) = self.config.labels.canonical.iter().find(|item| **item == plain) {
            return Some(canonical.as_str());
        }
        self.config.labels.aliases.get(&plain).map(String::as_str)
    }

    fn exact_link(&self, working: &str) -> Option<String> {
        let captures = self.label_link.captures(working)?;
        let label = captures.get(1)?.as_str();
        if !self.config.labels.canonical.iter().any(|item| item == label) {
            return None;
        }
        let open = captures.get(2)?.as_str();
        let close = captures.get(4)?.as_str();
        let target = self.site_target(captures.get(3)?.as_str())?;
        Some(format!("[{label}]({open}{target}{close})"))
    }

    fn asset_reference(
        &self,
        kind: AssetKind,
        working: &str,
        doc_dir: &str,
        copies: &mut Vec<AssetCopy>,
    ) -> Option<String> {
        let folder = kind.folder();
        let new_prefix = match (kind, doc_dir.is_empty()) {
            (AssetKind::Content, true) => String::new(),
            (AssetKind::Content, false) => format!("{doc_dir}/"),
            (_, true) => format!("{folder}/"),
            (_, false) => format!("{doc_dir}/{folder}/"),
        };

        let mut rewritten = working.to_string();
        let mut matched = false;
        for host in &self.config.site.hostnames {
            for scheme in SCHEMES {
                let needle = format!("{scheme}{host}/{folder}/");
                let mut search_from = 0usize;
                while let Some(offset) = rewritten[search_from..].find(&needle) {
                    let start = search_from + offset;
                    let rest_start = start + needle.len();
                    let rest = asset_path_prefix(&rewritten[rest_start..]);
                    if kind.copies_from_source() && !rest.is_empty() {
                        copies.push(AssetCopy {
                            kind,
                            asset: format!("{folder}/{rest}"),
                            destination: format!("{new_prefix}{rest}"),
                        });
                    }
                    rewritten.replace_range(start..rest_start, &new_prefix);
                    search_from = start + new_prefix.len();
                    matched = true;
                }
            }
        }
        matched.then_some(rewritten)
    }

    fn unwrap_connection(&self, working: &str) -> Option<String> {
        if !self.connection.is_match(working) {
            return None;
        }
        let unwrapped = self
            .connection
            .replace_all(working, |captures: &regex::Captures<'_>| {
                let quote = &captures[1];
                let path = &captures[2];
                if path.contains("://") {
                    captures[0].to_string()
                } else {
                    format!("{quote}{path}{quote}")
                }
            });
        Some(unwrapped.into_owned())
    }

    fn citation_note(&self, working: &str) -> Option<String> {
        let captures = self.citation.captures(working)?;
        let prefix = captures.get(1)?.as_str();
        let rest = self.site_path(captures.get(2)?.as_str())?;
        let (path, fragment) = split_fragment(rest);
        let id = path.trim_end_matches('/').trim_end_matches(".html");
        let layout = self.config.layout_for(id)?;
        let canonical = self.config.site.canonical_url.trim_end_matches('/');
        Some(format!("{prefix}{canonical}/{layout}/{id}/{id}.html{fragment}}}"))
    }

    fn bare_url(&self, working: &str) -> Option<String> {
        let (field, value) = match self.url_field.captures(working) {
            Some(captures) => (captures.get(1)?.as_str(), captures.get(2)?.as_str()),
            None => ("", working),
        };
        let (open, inner, close) = BARE_DELIMITERS
            .iter()
            .find_map(|(open, close)| {
                value
                    .strip_prefix(open)
                    .and_then(|rest| rest.strip_suffix(close))
                    .map(|inner| (*open, inner, *close))
            })
            .unwrap_or(("", value, ""));

        let target = self.site_target(inner)?;
        Some(format!("{field}{open}{target}{close}"))
    }

    /// Site root -> `/`, layout index -> `<layout>`, page -> relative target.
    fn site_target(&self, url: &str) -> Option<String> {
        let rest = self.site_path(url)?;
        if rest.trim_end_matches('/').is_empty() {
            return Some("/".to_string());
        }
        if let Some(layout) = self.layout_index(rest) {
            return Some(layout.to_string());
        }
        self.relative_target(url)
    }

    /// `https://<host>/<id>[.html][#frag]` -> `<layout>/<id>/<id>.html[#frag]`.
    fn relative_target(&self, url: &str) -> Option<String> {
        let rest = self.site_path(url)?;
        let (path, fragment) = split_fragment(rest);
        let id = path.strip_suffix(".html").unwrap_or(path);
        if id.is_empty() || id.contains('/') {
            return None;
        }
        let layout = self.config.layout_for(id)?;
        Some(format!("{layout}/{id}/{id}.html{fragment}"))
    }

    fn layout_index(&self, rest: &str) -> Option<&str> {
        let name = rest.trim_end_matches('/');
        let name = name.strip_suffix(".html").unwrap_or(name);
        self.config
            .site
            .targets
            .iter()
            .map(|group| group.layout.as_str())
            .find(|layout| *layout == name)
    }

    /// Path after a known scheme and hostname, without the leading slash.
    fn site_path<'a>(&self, url: &'a str) -> Option<&'a str> {
        for scheme in SCHEMES {
            let Some(after_scheme) = url.strip_prefix(scheme) else {
                continue;
            };
            for host in &self.config.site.hostnames {
                let Some(rest) = after_scheme.strip_prefix(host.as_str()) else {
                    continue;
                };
                if rest.is_empty() {
                    return Some(rest);
                }
                if let Some(path) = rest.strip_prefix('/') {
                    return Some(path);
                }
            }
        }
        None
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).with_context(|| format!("invalid rule pattern: {pattern}"))
}

fn split_fragment(path: &str) -> (&str, &str) {
    match path.find('#') {
        Some(index) => (&path[..index], &path[index..]),
        None => (path, ""),
    }
}

fn asset_path_prefix(value: &str) -> &str {
    let end = value
        .find(|ch: char| {
            ch.is_whitespace() || matches!(ch, '"' | '\'' | '`' | ')' | '}' | ']' | '>' | '?' | '#')
        })
        .unwrap_or(value.len());
    &value[..end]
}
