use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;

use crate::filesystem::{absolute_from_relative, display_path, validate_scoped_path};
use crate::rules::AssetCopy;
use crate::runtime::ResolvedPaths;

#[derive(Debug, Clone, Serialize)]
pub struct CopyOutcome {
    pub source: String,
    pub destination: String,
    pub copied: bool,
}

/// Copy one requested asset out of the source tree. A missing source is an
/// error; callers treat it as fatal. With `dry_run` only the source is checked.
pub fn copy_asset(
    paths: &ResolvedPaths,
    source_root: Option<&Path>,
    request: &AssetCopy,
    dry_run: bool,
) -> Result<CopyOutcome> {
    let Some(source_root) = source_root else {
        bail!(
            "cannot copy {}: no asset source root configured (set [site] asset_source_root or RELINK_ASSET_ROOT)",
            request.asset
        );
    };
    ensure_plain_segments(&request.asset)?;
    ensure_plain_segments(&request.destination)?;
    let source = join_segments(source_root, &request.asset);
    if !source.is_file() {
        bail!(
            "asset source file does not exist: {} (requested by {})",
            display_path(&source),
            request.destination
        );
    }

    let destination = absolute_from_relative(paths, &request.destination);
    validate_scoped_path(paths, &destination)?;

    if !dry_run {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::copy(&source, &destination).with_context(|| {
            format!(
                "failed to copy {} to {}",
                source.display(),
                destination.display()
            )
        })?;
    }

    Ok(CopyOutcome {
        source: display_path(&source),
        destination: request.destination.clone(),
        copied: !dry_run,
    })
}

/// Asset paths come from document text; they may not climb out of the
/// folder they name.
fn ensure_plain_segments(relative: &str) -> Result<()> {
    if relative
        .split(['/', '\\'])
        .any(|segment| segment == ".." || segment == ".")
    {
        bail!("asset path must not contain `.` or `..` segments: {relative}");
    }
    Ok(())
}

fn join_segments(root: &Path, relative: &str) -> PathBuf {
    let mut out = root.to_path_buf();
    for segment in relative.split('/') {
        if !segment.is_empty() {
            out.push(segment);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::copy_asset;
    use crate::rules::{AssetCopy, AssetKind};
    use crate::runtime::ResolvedPaths;

    fn request(asset: &str, destination: &str) -> AssetCopy {
        AssetCopy {
            kind: AssetKind::Images,
            asset: asset.to_string(),
            destination: destination.to_string(),
        }
    }

    #[test]
    fn copy_asset_creates_destination_dirs() {
        let temp = tempdir().expect("tempdir");
        let source_root = temp.path().join("LADAL");
        fs::create_dir_all(source_root.join("images")).expect("mkdir");
        fs::write(source_root.join("images/uq1.jpg"), b"jpg").expect("write");
        let paths = ResolvedPaths::for_project(&temp.path().join("site"));

        let outcome = copy_asset(
            &paths,
            Some(&source_root),
            &request("images/uq1.jpg", "tutorials/lex/images/uq1.jpg"),
            false,
        )
        .expect("copy");
        assert!(outcome.copied);
        let copied = paths.project_root.join("tutorials/lex/images/uq1.jpg");
        assert_eq!(fs::read(copied).expect("read copy"), b"jpg");
    }

    #[test]
    fn copy_asset_dry_run_only_checks_source() {
        let temp = tempdir().expect("tempdir");
        let source_root = temp.path().join("LADAL");
        fs::create_dir_all(source_root.join("images")).expect("mkdir");
        fs::write(source_root.join("images/uq1.jpg"), b"jpg").expect("write");
        let paths = ResolvedPaths::for_project(&temp.path().join("site"));

        let outcome = copy_asset(
            &paths,
            Some(&source_root),
            &request("images/uq1.jpg", "tutorials/lex/images/uq1.jpg"),
            true,
        )
        .expect("dry run");
        assert!(!outcome.copied);
        assert!(!paths.project_root.join("tutorials").exists());
    }

    #[test]
    fn copy_asset_fails_for_missing_source() {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::for_project(&temp.path().join("site"));
        let error = copy_asset(
            &paths,
            Some(temp.path()),
            &request("images/absent.png", "tutorials/lex/images/absent.png"),
            true,
        )
        .expect_err("must fail");
        assert!(error.to_string().contains("asset source file does not exist"));
    }

    #[test]
    fn copy_asset_requires_source_root() {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::for_project(temp.path());
        let error = copy_asset(
            &paths,
            None,
            &request("images/a.png", "tutorials/lex/images/a.png"),
            false,
        )
        .expect_err("must fail");
        assert!(error.to_string().contains("no asset source root configured"));
    }

    #[test]
    fn copy_asset_rejects_parent_segments() {
        let temp = tempdir().expect("tempdir");
        let source_root = temp.path().join("LADAL");
        fs::create_dir_all(source_root.join("images")).expect("mkdir");
        fs::write(temp.path().join("secret.txt"), b"secret").expect("write");
        let paths = ResolvedPaths::for_project(&temp.path().join("site"));

        let error = copy_asset(
            &paths,
            Some(&source_root),
            &request("images/../../secret.txt", "tutorials/lex/images/secret.txt"),
            false,
        )
        .expect_err("source must be rejected");
        assert!(error.to_string().contains("must not contain"));

        fs::write(source_root.join("images/a.png"), b"png").expect("write");
        let error = copy_asset(
            &paths,
            Some(&source_root),
            &request("images/a.png", "tutorials/lex/images/../../../etc/a.png"),
            false,
        )
        .expect_err("destination must be rejected");
        assert!(error.to_string().contains("must not contain"));
        assert!(!paths.project_root.join("etc").exists());
    }
}
