use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use relink_core::config::load_config;
use relink_core::dataset::dataset_stats;
use relink_core::extract::{ExtractReport, extract_tree};
use relink_core::filesystem::normalize_separators;
use relink_core::rewrite::{ReplacementStatus, RewriteMode, RewriteOptions, rewrite_documents};
use relink_core::rules::RuleSet;
use relink_core::runtime::{
    InitOptions, PathOverrides, ResolutionContext, ResolvedPaths, init_layout, inspect_runtime,
    resolve_paths,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "relink",
    version,
    about = "Extract legacy site URLs from tutorial sources and rewrite them to relative paths"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    documents_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    dataset: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    documents_dir: Option<PathBuf>,
    dataset: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            documents_dir: cli.documents_dir.clone(),
            dataset: cli.dataset.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Create .relink/ and write the default config.toml")]
    Init(InitArgs),
    #[command(about = "Scan documents and write the URL dataset")]
    Extract(ExtractArgs),
    #[command(about = "Rewrite dataset matches in place and copy referenced assets")]
    Rewrite(RewriteArgs),
    #[command(about = "Show runtime paths and dataset freshness")]
    Status,
    #[command(about = "List rewrite rules in evaluation order")]
    Rules,
    #[command(about = "Trace the rule chain over one raw match without touching files")]
    Explain(ExplainArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config.toml")]
    force: bool,
}

#[derive(Debug, Args)]
struct ExtractArgs {
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct RewriteArgs {
    #[arg(long, help = "Report what would change without writing or copying")]
    dry_run: bool,
    #[arg(long, help = "Include unified diffs of changed documents")]
    diff: bool,
    #[arg(long, value_name = "PATH", help = "Only rewrite this dataset document")]
    only: Option<String>,
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct ExplainArgs {
    raw: String,
    #[arg(long, value_name = "PATH", help = "Document the match belongs to")]
    document: String,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);
    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Extract(args)) => run_extract(&runtime, args),
        Some(Commands::Rewrite(args)) => run_rewrite(&runtime, args),
        Some(Commands::Status) => run_status(&runtime),
        Some(Commands::Rules) => run_rules(&runtime),
        Some(Commands::Explain(args)) => run_explain(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(&paths, &InitOptions { force: args.force })?;

    println!("Initialized relink runtime layout");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!("documents_dir: {}", normalize_path(&paths.documents_dir));
    println!("state_dir: {}", normalize_path(&paths.state_dir));
    println!("dataset_path: {}", normalize_path(&paths.dataset_path));
    println!("config_path: {}", normalize_path(&paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    if !report.wrote_config {
        println!("config: already exists (use --force to overwrite)");
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn run_extract(runtime: &RuntimeOptions, args: ExtractArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let report = extract_tree(&paths, &config)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("extract");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!("documents_dir: {}", normalize_path(&paths.documents_dir));
    print_extract_report(&report);
    print_warnings(&report.warnings);
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn print_extract_report(report: &ExtractReport) {
    println!("dataset: {}", report.dataset_path);
    println!("manifest: {}", report.manifest_path);
    println!("documents.scanned: {}", report.scanned_documents);
    println!("documents.kept: {}", report.kept_documents);
    println!("matches.total: {}", report.total_matches);
    println!("matches.discarded: {}", report.discarded_matches);
    println!("matches.nested: {}", report.nested_matches);
    if report.by_pattern.is_empty() {
        println!("matches.by_pattern: <empty>");
    } else {
        for (pattern, count) in &report.by_pattern {
            println!("matches.pattern.{pattern}: {count}");
        }
    }
}

fn run_rewrite(runtime: &RuntimeOptions, args: RewriteArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let options = RewriteOptions {
        mode: if args.dry_run {
            RewriteMode::DryRun
        } else {
            RewriteMode::Apply
        },
        only: args.only,
        include_diff: args.diff,
    };

    let Some(report) = rewrite_documents(&paths, &config, &options)? else {
        println!("rewrite");
        println!("project_root: {}", normalize_path(&paths.project_root));
        println!("dataset: <not built> (run `relink extract`)");
        return Ok(());
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("rewrite");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!("mode: {}", report.mode.as_str());
    println!("dataset: {}", report.dataset_path);
    println!("documents.processed: {}", report.processed_documents);
    println!("documents.changed: {}", report.changed_documents);
    println!("documents.written: {}", report.written_documents);
    println!("replacements.applied: {}", report.applied);
    println!("replacements.unchanged: {}", report.unchanged);
    println!("replacements.not_found: {}", report.not_found);
    println!("assets.requested: {}", report.asset_copies.len());
    for copy in &report.asset_copies {
        println!(
            "assets.{}: {} -> {}",
            if copy.copied { "copied" } else { "verified" },
            copy.source,
            copy.destination
        );
    }
    for document in &report.documents {
        println!(
            "document: {} applied={} unchanged={} not_found={} stale={} written={}",
            document.relative_path,
            document.count(ReplacementStatus::Applied),
            document.count(ReplacementStatus::Unchanged),
            document.count(ReplacementStatus::NotFound),
            format_flag(document.stale),
            format_flag(document.written)
        );
    }
    for document in &report.documents {
        if let Some(diff) = &document.diff {
            println!();
            print!("{diff}");
        }
    }
    print_warnings(&report.warnings);
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn run_status(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;
    let stats = dataset_stats(&paths)?;

    println!("runtime status");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!(
        "project_root_exists: {}",
        format_flag(status.project_root_exists)
    );
    println!(
        "documents_dir_exists: {}",
        format_flag(status.documents_dir_exists)
    );
    println!("state_dir_exists: {}", format_flag(status.state_dir_exists));
    println!("config_exists: {}", format_flag(status.config_exists));
    println!("dataset_exists: {}", format_flag(status.dataset_exists));
    println!(
        "dataset_size_bytes: {}",
        status
            .dataset_size_bytes
            .map(|size| size.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );
    println!("manifest_exists: {}", format_flag(status.manifest_exists));
    match stats {
        Some(stats) => {
            println!("dataset.documents: {}", stats.documents);
            println!("dataset.matches: {}", stats.matches);
            println!(
                "dataset.generated_at_unix: {}",
                stats
                    .generated_at_unix
                    .map(|value| value.to_string())
                    .unwrap_or_else(|| "n/a".to_string())
            );
            for path in &stats.stale_documents {
                println!("dataset.stale: {path}");
            }
            for path in &stats.missing_documents {
                println!("dataset.missing: {path}");
            }
        }
        None => println!("dataset: <not built> (run `relink extract`)"),
    }
    print_warnings(&status.warnings);
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn run_rules(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let rules = RuleSet::standard(&config)?;
    println!("rules (evaluation order)");
    for (index, rule) in rules.rules().iter().enumerate() {
        println!("{:>2}. {:<22} {}", index + 1, rule.name(), rule.describe());
    }
    println!("substitutions: {}", config.substitutions.len());
    println!("hostnames: {}", config.site.hostnames.join(", "));
    Ok(())
}

fn run_explain(runtime: &RuntimeOptions, args: ExplainArgs) -> Result<()> {
    let document = normalize_separators(args.document.trim());
    if document.is_empty() {
        bail!("explain requires a non-empty --document path");
    }
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let outcome = RuleSet::standard(&config)?.rewrite(&args.raw, &document);

    println!("explain");
    println!("document: {document}");
    println!("original: {}", outcome.original);
    println!("replacement: {}", outcome.replacement);
    println!("changed: {}", format_flag(outcome.changed()));
    if outcome.fired.is_empty() {
        println!("fired: <none>");
    } else {
        println!("fired: {}", outcome.fired.join(" -> "));
    }
    for copy in &outcome.asset_copies {
        println!("asset_copy: {} -> {}", copy.asset, copy.destination);
    }
    Ok(())
}

fn print_warnings(warnings: &[String]) {
    if warnings.is_empty() {
        return;
    }
    println!("warnings:");
    for warning in warnings {
        println!("  - {warning}");
    }
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        documents_dir: runtime.documents_dir.clone(),
        dataset: runtime.dataset.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    let paths = resolve_paths(&context, &overrides)?;
    tracing::debug!(
        root = %normalize_path(&paths.project_root),
        source = paths.root_source.as_str(),
        "resolved project root"
    );
    Ok(paths)
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
