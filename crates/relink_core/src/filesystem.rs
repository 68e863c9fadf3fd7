use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::runtime::ResolvedPaths;

#[derive(Debug, Clone, Serialize)]
pub struct DocumentFile {
    pub relative_path: String,
    #[serde(skip)]
    pub absolute_path: PathBuf,
    pub bytes: u64,
}

/// Every regular file under the documents directory carrying `extension`,
/// sorted by relative path. A missing directory yields an empty list.
pub fn scan_documents(paths: &ResolvedPaths, extension: &str) -> Result<Vec<DocumentFile>> {
    let mut documents = Vec::new();
    if !paths.documents_dir.exists() {
        return Ok(documents);
    }
    let wanted = extension.trim_start_matches('.');

    for entry in WalkDir::new(&paths.documents_dir).follow_links(false) {
        let entry = entry
            .with_context(|| format!("failed to walk {}", paths.documents_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(wanted) {
            continue;
        }
        let metadata = entry
            .metadata()
            .with_context(|| format!("failed to stat {}", path.display()))?;
        documents.push(DocumentFile {
            relative_path: relative_from_root(paths, path)?,
            absolute_path: path.to_path_buf(),
            bytes: metadata.len(),
        });
    }

    documents.sort_by(|left, right| left.relative_path.cmp(&right.relative_path));
    Ok(documents)
}

/// Reject paths that would land outside the project root once `..` is resolved.
pub fn validate_scoped_path(paths: &ResolvedPaths, candidate: &Path) -> Result<()> {
    let absolute = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        paths.project_root.join(candidate)
    };
    let normalized = normalize_pathbuf(&absolute);
    let root = normalize_pathbuf(&paths.project_root);
    if normalized.starts_with(&root) {
        return Ok(());
    }
    bail!(
        "path escapes the project root: {}\nproject root: {}",
        display_path(&normalized),
        display_path(&root)
    )
}

pub fn absolute_from_relative(paths: &ResolvedPaths, relative: &str) -> PathBuf {
    let mut out = paths.project_root.clone();
    for segment in relative.split('/') {
        if !segment.is_empty() {
            out.push(segment);
        }
    }
    out
}

pub fn relative_from_root(paths: &ResolvedPaths, path: &Path) -> Result<String> {
    let rel = path.strip_prefix(&paths.project_root).with_context(|| {
        format!(
            "failed to derive relative path from root {} for {}",
            paths.project_root.display(),
            path.display()
        )
    })?;
    Ok(display_path(rel))
}

/// Directory part of a `/`-separated document path: `tutorials/lex/lex.qmd` -> `tutorials/lex`.
pub fn document_dir(relative_path: &str) -> &str {
    let normalized = relative_path.trim_end_matches('/');
    match normalized.rfind('/') {
        Some(index) => &normalized[..index],
        None => "",
    }
}

pub fn compute_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut output = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

pub fn write_document(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
}

pub fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}

pub fn display_path(path: &Path) -> String {
    normalize_separators(&path.to_string_lossy())
}

fn normalize_pathbuf(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Path::new(std::path::MAIN_SEPARATOR_STR)),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};

    use super::{
        absolute_from_relative, compute_hash, document_dir, scan_documents, validate_scoped_path,
    };
    use crate::runtime::ResolvedPaths;
    use tempfile::tempdir;

    fn write_file(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, content).expect("write");
    }

    #[test]
    fn scan_documents_filters_by_extension_and_sorts() {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::for_project(temp.path());
        write_file(&paths.documents_dir.join("lex/lex.qmd"), "lex");
        write_file(&paths.documents_dir.join("dstats/dstats.qmd"), "dstats");
        write_file(&paths.documents_dir.join("dstats/data/foo.csv"), "a,b");
        write_file(&paths.documents_dir.join("dstats/notes.Rmd"), "old");

        let documents = scan_documents(&paths, "qmd").expect("scan");
        let relative: Vec<&str> = documents
            .iter()
            .map(|document| document.relative_path.as_str())
            .collect();
        assert_eq!(
            relative,
            vec!["tutorials/dstats/dstats.qmd", "tutorials/lex/lex.qmd"]
        );
        assert_eq!(documents[0].bytes, 6);
    }

    #[test]
    fn scan_documents_tolerates_missing_directory() {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::for_project(temp.path());
        assert!(scan_documents(&paths, ".qmd").expect("scan").is_empty());
    }

    #[test]
    fn validate_scoped_path_rejects_parent_escape() {
        let paths = ResolvedPaths::for_project(Path::new("/site"));
        assert!(validate_scoped_path(&paths, Path::new("tutorials/lex/images/a.png")).is_ok());
        let error = validate_scoped_path(&paths, Path::new("tutorials/../../etc/passwd"))
            .expect_err("must fail");
        assert!(error.to_string().contains("escapes the project root"));
    }

    #[test]
    fn document_dir_strips_file_name() {
        assert_eq!(document_dir("tutorials/dstats/dstats.qmd"), "tutorials/dstats");
        assert_eq!(document_dir("lex.qmd"), "");
    }

    #[test]
    fn absolute_from_relative_joins_segments() {
        let paths = ResolvedPaths::for_project(Path::new("/site"));
        assert_eq!(
            absolute_from_relative(&paths, "tutorials/lex/lex.qmd"),
            PathBuf::from("/site/tutorials/lex/lex.qmd")
        );
    }

    #[test]
    fn compute_hash_is_stable_and_short() {
        let first = compute_hash("alpha");
        assert_eq!(first.len(), 16);
        assert_eq!(first, compute_hash("alpha"));
        assert_ne!(first, compute_hash("beta"));
    }
}
