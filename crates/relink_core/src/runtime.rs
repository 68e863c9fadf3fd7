use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::render_default_config;

pub const STATE_DIR_NAME: &str = ".relink";
pub const DEFAULT_DOCUMENTS_DIR: &str = "tutorials";
pub const DATASET_FILENAME: &str = "urls.json";
pub const MANIFEST_FILENAME: &str = "urls.manifest.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub documents_dir: Option<PathBuf>,
    pub dataset: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
    pub executable_dir: Option<PathBuf>,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        let executable_dir = env::current_exe()
            .ok()
            .and_then(|path| path.parent().map(Path::to_path_buf));
        Ok(Self {
            cwd,
            executable_dir,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub documents_dir: PathBuf,
    pub state_dir: PathBuf,
    pub dataset_path: PathBuf,
    pub manifest_path: PathBuf,
    pub config_path: PathBuf,
    pub root_source: ValueSource,
    pub documents_source: ValueSource,
    pub dataset_source: ValueSource,
    pub config_source: ValueSource,
}

#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub project_root_exists: bool,
    pub documents_dir_exists: bool,
    pub state_dir_exists: bool,
    pub dataset_exists: bool,
    pub dataset_size_bytes: Option<u64>,
    pub manifest_exists: bool,
    pub config_exists: bool,
    pub warnings: Vec<String>,
}

impl ResolvedPaths {
    /// Paths rooted at `project_root` with every default applied.
    pub fn for_project(project_root: &Path) -> Self {
        let state_dir = project_root.join(STATE_DIR_NAME);
        Self {
            project_root: project_root.to_path_buf(),
            documents_dir: project_root.join(DEFAULT_DOCUMENTS_DIR),
            dataset_path: state_dir.join(DATASET_FILENAME),
            manifest_path: state_dir.join(MANIFEST_FILENAME),
            config_path: state_dir.join("config.toml"),
            state_dir,
            root_source: ValueSource::Flag,
            documents_source: ValueSource::Default,
            dataset_source: ValueSource::Default,
            config_source: ValueSource::Default,
        }
    }

    pub fn diagnostics(&self) -> String {
        format!(
            "project_root={} ({})\ndocuments_dir={} ({})\nstate_dir={}\ndataset_path={} ({})\nmanifest_path={}\nconfig_path={} ({})",
            normalize_for_display(&self.project_root),
            self.root_source.as_str(),
            normalize_for_display(&self.documents_dir),
            self.documents_source.as_str(),
            normalize_for_display(&self.state_dir),
            normalize_for_display(&self.dataset_path),
            self.dataset_source.as_str(),
            normalize_for_display(&self.manifest_path),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
        )
    }
}

pub fn inspect_runtime(paths: &ResolvedPaths) -> Result<RuntimeStatus> {
    let project_root_exists = paths.project_root.exists();
    let documents_dir_exists = paths.documents_dir.exists();
    let state_dir_exists = paths.state_dir.exists();
    let dataset_exists = paths.dataset_path.exists();
    let manifest_exists = paths.manifest_path.exists();
    let config_exists = paths.config_path.exists();
    let dataset_size_bytes = if dataset_exists {
        let metadata = fs::metadata(&paths.dataset_path)
            .with_context(|| format!("failed to inspect {}", paths.dataset_path.display()))?;
        Some(metadata.len())
    } else {
        None
    };

    let mut warnings = Vec::new();
    if !documents_dir_exists {
        warnings.push(format!(
            "{} is missing; scaffold the document layout before `relink extract`",
            normalize_for_display(&paths.documents_dir)
        ));
    }
    if !config_exists {
        warnings.push(
            "config.toml is missing; built-in defaults are in effect (run `relink init`)"
                .to_string(),
        );
    }
    if !dataset_exists {
        warnings.push("dataset is missing; run `relink extract` before `relink rewrite`".to_string());
    } else if !manifest_exists {
        warnings.push(
            "dataset manifest is missing; stale documents cannot be detected".to_string(),
        );
    }

    Ok(RuntimeStatus {
        project_root_exists,
        documents_dir_exists,
        state_dir_exists,
        dataset_exists,
        dataset_size_bytes,
        manifest_exists,
        config_exists,
        warnings,
    })
}

#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    pub force: bool,
}

#[derive(Debug, Clone)]
pub struct InitReport {
    pub created_dirs: Vec<PathBuf>,
    pub wrote_config: bool,
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (documents_name, documents_source) =
        if let Some(path) = overrides.documents_dir.as_deref() {
            (path.to_path_buf(), ValueSource::Flag)
        } else if let Some(value) = lookup_env("RELINK_DOCUMENTS_DIR") {
            (PathBuf::from(value.trim()), ValueSource::Env)
        } else {
            (PathBuf::from(DEFAULT_DOCUMENTS_DIR), ValueSource::Default)
        };

    let (project_root, root_source) =
        resolve_project_root(context, overrides, &documents_name, &lookup_env);
    let state_dir = project_root.join(STATE_DIR_NAME);
    let documents_dir = absolutize(&documents_name, &project_root);

    let (dataset_path, dataset_source) = if let Some(path) = overrides.dataset.as_deref() {
        (absolutize(path, &project_root), ValueSource::Flag)
    } else if let Some(value) = lookup_env("RELINK_DATASET") {
        (
            absolutize(Path::new(value.trim()), &project_root),
            ValueSource::Env,
        )
    } else {
        (state_dir.join(DATASET_FILENAME), ValueSource::Default)
    };
    let manifest_path = manifest_path_for(&dataset_path);

    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (absolutize(path, &project_root), ValueSource::Flag)
    } else if let Some(value) = lookup_env("RELINK_CONFIG") {
        (
            absolutize(Path::new(value.trim()), &project_root),
            ValueSource::Env,
        )
    } else {
        (state_dir.join("config.toml"), ValueSource::Default)
    };

    Ok(ResolvedPaths {
        project_root,
        documents_dir,
        state_dir,
        dataset_path,
        manifest_path,
        config_path,
        root_source,
        documents_source,
        dataset_source,
        config_source,
    })
}

/// `urls.json` -> `urls.manifest.json`, kept beside the dataset it describes.
pub fn manifest_path_for(dataset_path: &Path) -> PathBuf {
    let stem = dataset_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "urls".to_string());
    dataset_path.with_file_name(format!("{stem}.manifest.json"))
}

pub fn init_layout(paths: &ResolvedPaths, options: &InitOptions) -> Result<InitReport> {
    let mut created_dirs = Vec::new();
    if !paths.state_dir.exists() {
        fs::create_dir_all(&paths.state_dir)
            .with_context(|| format!("failed to create {}", paths.state_dir.display()))?;
        created_dirs.push(paths.state_dir.clone());
    }

    let wrote_config = write_text_file(&paths.config_path, &render_default_config()?, options.force)?;
    Ok(InitReport {
        created_dirs,
        wrote_config,
    })
}

fn resolve_project_root<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    documents_name: &Path,
    lookup_env: &F,
) -> (PathBuf, ValueSource)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = overrides.project_root.as_deref() {
        return (absolutize(path, &context.cwd), ValueSource::Flag);
    }

    if let Some(value) = lookup_env("RELINK_PROJECT_ROOT") {
        return (
            absolutize(Path::new(value.trim()), &context.cwd),
            ValueSource::Env,
        );
    }

    match detect_project_root(&context.cwd, context.executable_dir.as_deref(), documents_name) {
        Some(root) => (root, ValueSource::Heuristic),
        None => (context.cwd.clone(), ValueSource::Default),
    }
}

fn detect_project_root(
    cwd: &Path,
    executable_dir: Option<&Path>,
    documents_name: &Path,
) -> Option<PathBuf> {
    if documents_name.is_absolute() {
        return None;
    }
    let mut seen = HashSet::new();
    let mut candidates: Vec<&Path> = cwd.ancestors().collect();
    if let Some(exe_dir) = executable_dir {
        candidates.extend(exe_dir.ancestors());
    }
    for candidate in candidates {
        if !seen.insert(normalize_for_display(candidate)) {
            continue;
        }
        if candidate.join(documents_name).is_dir() {
            return Some(candidate.to_path_buf());
        }
    }
    None
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn write_text_file(path: &Path, content: &str, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }

    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create parent directory {}", parent.display()))?;
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
