use std::fs;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use similar::TextDiff;
use tracing::{debug, info, warn};

use crate::assets::{CopyOutcome, copy_asset};
use crate::config::RelinkConfig;
use crate::dataset::{load_dataset, load_manifest};
use crate::filesystem::{absolute_from_relative, display_path, normalize_separators, write_document};
use crate::rules::{RewriteOutcome, RuleSet};
use crate::runtime::ResolvedPaths;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RewriteMode {
    Apply,
    DryRun,
}

impl RewriteMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Apply => "apply",
            Self::DryRun => "dry-run",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RewriteOptions {
    pub mode: RewriteMode,
    /// Restrict the run to one dataset document (`/`-separated, project relative).
    pub only: Option<String>,
    pub include_diff: bool,
}

impl Default for RewriteOptions {
    fn default() -> Self {
        Self {
            mode: RewriteMode::Apply,
            only: None,
            include_diff: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacementStatus {
    Applied,
    Unchanged,
    NotFound,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplacementRecord {
    pub original: String,
    pub replacement: String,
    pub fired: Vec<&'static str>,
    pub status: ReplacementStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentRewrite {
    pub relative_path: String,
    pub stale: bool,
    pub changed: bool,
    pub written: bool,
    pub replacements: Vec<ReplacementRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

impl DocumentRewrite {
    pub fn count(&self, status: ReplacementStatus) -> usize {
        self.replacements
            .iter()
            .filter(|record| record.status == status)
            .count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RewriteReport {
    pub mode: RewriteMode,
    pub dataset_path: String,
    pub processed_documents: usize,
    pub changed_documents: usize,
    pub written_documents: usize,
    pub applied: usize,
    pub unchanged: usize,
    pub not_found: usize,
    pub asset_copies: Vec<CopyOutcome>,
    pub documents: Vec<DocumentRewrite>,
    pub warnings: Vec<String>,
}

/// Replace the first remaining occurrence of each changed outcome in order.
/// Originals that can no longer be found are reported and left alone.
pub fn apply_outcomes(
    content: &str,
    outcomes: &[RewriteOutcome],
) -> (String, Vec<ReplacementStatus>) {
    let mut updated = content.to_string();
    let mut statuses = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        if !outcome.changed() {
            statuses.push(ReplacementStatus::Unchanged);
            continue;
        }
        let status = match updated.find(&outcome.original) {
            Some(start) => {
                let end = start + outcome.original.len();
                updated.replace_range(start..end, &outcome.replacement);
                ReplacementStatus::Applied
            }
            None => ReplacementStatus::NotFound,
        };
        statuses.push(status);
    }
    (updated, statuses)
}

pub fn unified_diff(relative_path: &str, before: &str, after: &str) -> String {
    TextDiff::from_lines(before, after)
        .unified_diff()
        .context_radius(2)
        .header(&format!("a/{relative_path}"), &format!("b/{relative_path}"))
        .to_string()
}

/// Rewrite every document named by the dataset. Returns `Ok(None)` when the
/// dataset has not been extracted yet. Missing documents and vanished matches
/// are warnings; a missing asset source aborts the run.
pub fn rewrite_documents(
    paths: &ResolvedPaths,
    config: &RelinkConfig,
    options: &RewriteOptions,
) -> Result<Option<RewriteReport>> {
    let Some(dataset) = load_dataset(&paths.dataset_path)? else {
        return Ok(None);
    };
    let manifest = load_manifest(&paths.manifest_path)?;
    let rules = RuleSet::standard(config)?;
    let source_root = config.asset_source_root();
    let dry_run = options.mode == RewriteMode::DryRun;
    let only = options.only.as_deref().map(normalize_separators);

    let mut report = RewriteReport {
        mode: options.mode,
        dataset_path: display_path(&paths.dataset_path),
        processed_documents: 0,
        changed_documents: 0,
        written_documents: 0,
        applied: 0,
        unchanged: 0,
        not_found: 0,
        asset_copies: Vec::new(),
        documents: Vec::new(),
        warnings: Vec::new(),
    };

    if let Some(only) = &only {
        if !dataset.contains(only) {
            bail!("{only} is not listed in {}", report.dataset_path);
        }
    }

    for (relative_path, matches) in dataset.iter() {
        if only.as_deref().is_some_and(|only| only != relative_path) {
            continue;
        }
        let absolute = absolute_from_relative(paths, relative_path);
        if !absolute.is_file() {
            let message = format!("skipping {relative_path}: document not found");
            warn!("{message}");
            report.warnings.push(message);
            continue;
        }
        let content = fs::read_to_string(&absolute)
            .with_context(|| format!("failed to read {}", absolute.display()))?;

        let stale = manifest
            .as_ref()
            .is_some_and(|manifest| manifest.is_stale(relative_path, &content));
        if stale {
            let message = format!("{relative_path} changed since extraction");
            warn!("{message}");
            report.warnings.push(message);
        }

        let outcomes: Vec<RewriteOutcome> = matches
            .iter()
            .map(|raw| rules.rewrite(raw, relative_path))
            .collect();
        for outcome in &outcomes {
            for request in &outcome.asset_copies {
                let copied = copy_asset(paths, source_root.as_deref(), request, dry_run)
                    .with_context(|| format!("while rewriting {relative_path}"))?;
                debug!(source = %copied.source, destination = %copied.destination, "asset");
                report.asset_copies.push(copied);
            }
        }

        let (updated, statuses) = apply_outcomes(&content, &outcomes);
        let mut replacements = Vec::with_capacity(outcomes.len());
        for (outcome, status) in outcomes.into_iter().zip(statuses) {
            match status {
                ReplacementStatus::Applied => report.applied += 1,
                ReplacementStatus::Unchanged => report.unchanged += 1,
                ReplacementStatus::NotFound => {
                    report.not_found += 1;
                    let message = format!(
                        "{relative_path}: match no longer present, skipped: {}",
                        outcome.original
                    );
                    warn!("{message}");
                    report.warnings.push(message);
                }
            }
            replacements.push(ReplacementRecord {
                original: outcome.original,
                replacement: outcome.replacement,
                fired: outcome.fired,
                status,
            });
        }

        let changed = updated != content;
        let written = changed && !dry_run;
        if written {
            write_document(&absolute, &updated)?;
            info!(document = relative_path, "rewritten");
        }
        let diff = (options.include_diff && changed)
            .then(|| unified_diff(relative_path, &content, &updated));

        report.processed_documents += 1;
        report.changed_documents += usize::from(changed);
        report.written_documents += usize::from(written);
        report.documents.push(DocumentRewrite {
            relative_path: relative_path.to_string(),
            stale,
            changed,
            written,
            replacements,
            diff,
        });
    }

    Ok(Some(report))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::tempdir;

    use super::{
        ReplacementStatus, RewriteMode, RewriteOptions, apply_outcomes, rewrite_documents,
    };
    use crate::config::RelinkConfig;
    use crate::dataset::{Dataset, write_dataset};
    use crate::extract::extract_tree;
    use crate::rules::RuleSet;
    use crate::runtime::ResolvedPaths;

    const LEX: &str = "Intro [Here](https://slcladal.github.io/lex.html) and\n\n![](https://slcladal.github.io/images/uq1.jpg)\n";
    const DSTATS: &str = "dat <- read.csv(\"https://ladal.edu.au/data/foo.csv\")\nrds <- base::readRDS(url(\"https://slcladal.github.io/data/d.rda\", \"rb\"))\n";

    fn write_file(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, content).expect("write");
    }

    fn site_with_assets(root: &Path) -> (ResolvedPaths, RelinkConfig) {
        let paths = ResolvedPaths::for_project(&root.join("site"));
        let mut config = RelinkConfig::builtin();
        let source_root = root.join("LADAL");
        write_file(&source_root.join("images/uq1.jpg"), "jpg");
        config.site.asset_source_root = Some(source_root);
        (paths, config)
    }

    #[test]
    fn apply_outcomes_replaces_duplicates_in_order() {
        let rules = RuleSet::standard(&RelinkConfig::builtin()).expect("rules");
        let raw = "[here](https://slcladal.github.io/lex.html)";
        let outcomes = vec![
            rules.rewrite(raw, "tutorials/lex/lex.qmd"),
            rules.rewrite(raw, "tutorials/lex/lex.qmd"),
        ];
        let content = format!("a {raw}\nb {raw}\n");
        let (updated, statuses) = apply_outcomes(&content, &outcomes);
        assert_eq!(
            updated,
            "a [here](tutorials/lex/lex.html)\nb [here](tutorials/lex/lex.html)\n"
        );
        assert_eq!(
            statuses,
            vec![ReplacementStatus::Applied, ReplacementStatus::Applied]
        );
    }

    #[test]
    fn apply_outcomes_skips_vanished_matches() {
        let rules = RuleSet::standard(&RelinkConfig::builtin()).expect("rules");
        let outcomes = vec![
            rules.rewrite("(https://ladal.edu.au/kwics.html)", "tutorials/x/x.qmd"),
            rules.rewrite("\"https://example.org/a.csv\"", "tutorials/x/x.qmd"),
        ];
        let (updated, statuses) = apply_outcomes("nothing here\n", &outcomes);
        assert_eq!(updated, "nothing here\n");
        assert_eq!(
            statuses,
            vec![ReplacementStatus::NotFound, ReplacementStatus::Unchanged]
        );
    }

    #[test]
    fn rewrite_documents_migrates_extracted_tree() {
        let temp = tempdir().expect("tempdir");
        let (paths, config) = site_with_assets(temp.path());
        let lex = paths.documents_dir.join("lex/lex.qmd");
        let dstats = paths.documents_dir.join("dstats/dstats.qmd");
        write_file(&lex, LEX);
        write_file(&dstats, DSTATS);
        extract_tree(&paths, &config).expect("extract");

        let report = rewrite_documents(&paths, &config, &RewriteOptions::default())
            .expect("rewrite")
            .expect("dataset exists");
        assert_eq!(report.processed_documents, 2);
        assert_eq!(report.written_documents, 2);
        assert_eq!(report.not_found, 0);
        assert!(report.warnings.is_empty());

        assert_eq!(
            fs::read_to_string(&lex).expect("read lex"),
            "Intro [here](tutorials/lex/lex.html) and\n\n![](tutorials/lex/images/uq1.jpg)\n"
        );
        assert_eq!(
            fs::read_to_string(&dstats).expect("read dstats"),
            "dat <- read.csv(\"tutorials/dstats/data/foo.csv\")\nrds <- base::readRDS(\"tutorials/dstats/data/d.rda\")\n"
        );
        assert_eq!(
            fs::read(paths.documents_dir.join("lex/images/uq1.jpg")).expect("copied image"),
            b"jpg"
        );
        assert_eq!(report.asset_copies.len(), 1);
    }

    #[test]
    fn rewrite_documents_second_run_is_noop() {
        let temp = tempdir().expect("tempdir");
        let (paths, config) = site_with_assets(temp.path());
        let lex = paths.documents_dir.join("lex/lex.qmd");
        write_file(&lex, LEX);
        extract_tree(&paths, &config).expect("extract");
        rewrite_documents(&paths, &config, &RewriteOptions::default())
            .expect("first run")
            .expect("dataset exists");
        let after_first = fs::read_to_string(&lex).expect("read");

        extract_tree(&paths, &config).expect("re-extract");
        let report = rewrite_documents(&paths, &config, &RewriteOptions::default())
            .expect("second run")
            .expect("dataset exists");
        assert_eq!(report.processed_documents, 0);
        assert_eq!(fs::read_to_string(&lex).expect("read"), after_first);
    }

    #[test]
    fn rewrite_documents_with_unchanged_dataset_finds_nothing_left() {
        let temp = tempdir().expect("tempdir");
        let (paths, config) = site_with_assets(temp.path());
        let lex = paths.documents_dir.join("lex/lex.qmd");
        write_file(&lex, LEX);
        extract_tree(&paths, &config).expect("extract");
        rewrite_documents(&paths, &config, &RewriteOptions::default())
            .expect("first run")
            .expect("dataset exists");
        let after_first = fs::read_to_string(&lex).expect("read");

        let report = rewrite_documents(&paths, &config, &RewriteOptions::default())
            .expect("second run")
            .expect("dataset exists");
        assert_eq!(fs::read_to_string(&lex).expect("read"), after_first);
        assert_eq!(report.applied, 0);
        assert_eq!(report.written_documents, 0);
        let statuses: Vec<ReplacementStatus> = report.documents[0]
            .replacements
            .iter()
            .map(|record| record.status)
            .collect();
        assert_eq!(
            statuses,
            vec![ReplacementStatus::NotFound, ReplacementStatus::NotFound]
        );
    }

    #[test]
    fn rewrite_documents_migrates_every_extracted_label_link() {
        let temp = tempdir().expect("tempdir");
        let (paths, config) = site_with_assets(temp.path());
        let document = paths.documents_dir.join("intror/intror.qmd");
        write_file(
            &document,
            "A [here](https://ladal.edu.au)\nB [this tools](https://ladal.edu.au/amtool.html)\nC [here](https://ladal.edu.au/tools)\nD [These Tutorial](https://slcladal.github.io/lex.html)\nE see (https://ladal.edu.au)\n",
        );
        extract_tree(&paths, &config).expect("extract");

        let report = rewrite_documents(&paths, &config, &RewriteOptions::default())
            .expect("rewrite")
            .expect("dataset exists");
        assert_eq!(report.applied, 5);
        assert_eq!(report.unchanged, 0);
        assert_eq!(report.not_found, 0);
        assert_eq!(
            fs::read_to_string(&document).expect("read"),
            "A [here](/)\nB [this tool](tools/amtool/amtool.html)\nC [here](tools)\nD [this tutorial](tutorials/lex/lex.html)\nE see (/)\n"
        );
    }

    #[test]
    fn rewrite_documents_dry_run_leaves_files_alone() {
        let temp = tempdir().expect("tempdir");
        let (paths, config) = site_with_assets(temp.path());
        let lex = paths.documents_dir.join("lex/lex.qmd");
        write_file(&lex, LEX);
        extract_tree(&paths, &config).expect("extract");

        let options = RewriteOptions {
            mode: RewriteMode::DryRun,
            only: None,
            include_diff: true,
        };
        let report = rewrite_documents(&paths, &config, &options)
            .expect("dry run")
            .expect("dataset exists");
        assert_eq!(report.changed_documents, 1);
        assert_eq!(report.written_documents, 0);
        assert_eq!(fs::read_to_string(&lex).expect("read"), LEX);
        assert!(!paths.documents_dir.join("lex/images").exists());
        let diff = report.documents[0].diff.as_deref().expect("diff");
        assert!(diff.contains("+Intro [here](tutorials/lex/lex.html) and"));
        assert!(diff.contains("--- a/tutorials/lex/lex.qmd"));
    }

    #[test]
    fn rewrite_documents_warns_on_stale_and_missing_documents() {
        let temp = tempdir().expect("tempdir");
        let (paths, config) = site_with_assets(temp.path());
        let kwics = paths.documents_dir.join("kwics/kwics.qmd");
        write_file(&kwics, "see (https://ladal.edu.au/kwics.html)\n");
        let gone = paths.documents_dir.join("gone/gone.qmd");
        write_file(&gone, "see (https://ladal.edu.au/net.html)\n");
        extract_tree(&paths, &config).expect("extract");

        fs::remove_file(&gone).expect("remove");
        write_file(&kwics, "edited by hand\n");

        let report = rewrite_documents(&paths, &config, &RewriteOptions::default())
            .expect("rewrite")
            .expect("dataset exists");
        assert_eq!(report.processed_documents, 1);
        assert_eq!(report.not_found, 1);
        assert!(report.documents[0].stale);
        assert!(!report.documents[0].changed);
        assert_eq!(report.warnings.len(), 3);
        assert!(report.warnings[0].contains("tutorials/gone/gone.qmd"));
    }

    #[test]
    fn rewrite_documents_aborts_on_missing_asset() {
        let temp = tempdir().expect("tempdir");
        let (paths, config) = site_with_assets(temp.path());
        let lex = paths.documents_dir.join("lex/lex.qmd");
        let original = "![](https://slcladal.github.io/images/absent.png)\n";
        write_file(&lex, original);
        extract_tree(&paths, &config).expect("extract");

        let error = rewrite_documents(&paths, &config, &RewriteOptions::default())
            .expect_err("must fail");
        let rendered = format!("{error:#}");
        assert!(rendered.contains("images/absent.png"));
        assert_eq!(fs::read_to_string(&lex).expect("read"), original);
    }

    #[test]
    fn rewrite_documents_rejects_assets_outside_their_folder() {
        let temp = tempdir().expect("tempdir");
        let (paths, config) = site_with_assets(temp.path());
        write_file(&temp.path().join("secret.png"), "secret");
        let lex = paths.documents_dir.join("lex/lex.qmd");
        let original = "![](https://ladal.edu.au/images/../../secret.png)\n";
        write_file(&lex, original);
        extract_tree(&paths, &config).expect("extract");

        let error = rewrite_documents(&paths, &config, &RewriteOptions::default())
            .expect_err("must fail");
        assert!(format!("{error:#}").contains("must not contain"));
        assert_eq!(fs::read_to_string(&lex).expect("read"), original);
        assert!(!paths.documents_dir.join("secret.png").exists());
    }

    #[test]
    fn rewrite_documents_honors_only_filter() {
        let temp = tempdir().expect("tempdir");
        let (paths, config) = site_with_assets(temp.path());
        let lex = paths.documents_dir.join("lex/lex.qmd");
        let dstats = paths.documents_dir.join("dstats/dstats.qmd");
        write_file(&lex, LEX);
        write_file(&dstats, DSTATS);
        extract_tree(&paths, &config).expect("extract");

        let options = RewriteOptions {
            only: Some("tutorials/dstats/dstats.qmd".to_string()),
            ..RewriteOptions::default()
        };
        let report = rewrite_documents(&paths, &config, &options)
            .expect("rewrite")
            .expect("dataset exists");
        assert_eq!(report.processed_documents, 1);
        assert_eq!(fs::read_to_string(&lex).expect("read"), LEX);

        let options = RewriteOptions {
            only: Some("tutorials/absent/absent.qmd".to_string()),
            ..RewriteOptions::default()
        };
        let error = rewrite_documents(&paths, &config, &options).expect_err("must fail");
        assert!(error.to_string().contains("is not listed in"));
    }

    #[test]
    fn rewrite_documents_without_dataset_returns_none() {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::for_project(temp.path());
        let report = rewrite_documents(&paths, &RelinkConfig::builtin(), &RewriteOptions::default())
            .expect("rewrite");
        assert!(report.is_none());
    }

    #[test]
    fn rewrite_documents_uses_dataset_order_for_duplicates() {
        let temp = tempdir().expect("tempdir");
        let (paths, config) = site_with_assets(temp.path());
        let document = paths.documents_dir.join("coll/coll.qmd");
        write_file(
            &document,
            "[here](https://slcladal.github.io/coll.html) then [here](https://slcladal.github.io/coll.html)\n",
        );
        let mut dataset = Dataset::new();
        dataset.insert(
            "tutorials/coll/coll.qmd",
            vec!["[here](https://slcladal.github.io/coll.html)".to_string(); 3],
        );
        write_dataset(&paths.dataset_path, &dataset).expect("write dataset");

        let report = rewrite_documents(&paths, &config, &RewriteOptions::default())
            .expect("rewrite")
            .expect("dataset exists");
        assert_eq!(report.applied, 2);
        assert_eq!(report.not_found, 1);
        assert_eq!(
            fs::read_to_string(&document).expect("read"),
            "[here](tutorials/coll/coll.html) then [here](tutorials/coll/coll.html)\n"
        );
    }
}
