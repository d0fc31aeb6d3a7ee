use aigen_patcher::config::{load_for_base, load_from_path};
use aigen_patcher::{
    ApplyOptions, OperationKind, OperationRecord, ParseResult, Patcher, PatcherConfig,
    SpliceOutcome,
};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use similar::{ChangeTag, TextDiff};
use std::env;
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "aigen-patcher")]
#[command(about = "Apply ai_gen file and function directives to a project", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract, validate and apply directives
    Apply {
        #[command(flatten)]
        source: SourceArgs,

        /// Dry run - report what would change without writing anything
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Do not back up existing files before changing them
        #[arg(long)]
        no_backup: bool,

        /// Show unified diff of planned changes
        #[arg(short, long)]
        diff: bool,

        /// Print operation records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Extract and validate directives without applying them
    Check {
        #[command(flatten)]
        source: SourceArgs,

        /// Print the validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List extracted directives
    List {
        #[command(flatten)]
        source: SourceArgs,

        /// Print directives as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct SourceArgs {
    /// File containing tagged text (reads stdin if not specified)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Project root that directive paths are relative to
    #[arg(short, long)]
    base: Option<PathBuf>,

    /// Config file (defaults to <base>/aigen.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Apply {
            source,
            dry_run,
            no_backup,
            diff,
            json,
        } => cmd_apply(source, dry_run, no_backup, diff, json),

        Commands::Check { source, json } => cmd_check(source, json),

        Commands::List { source, json } => cmd_list(source, json),
    }
}

/// Diagnostics go to stderr, filtered by `RUST_LOG` (default `warn`).
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr).compact())
        .init();
}

/// Resolve the base directory
///
/// Priority order:
/// 1. Explicit --base flag
/// 2. AIGEN_BASE_DIR environment variable
/// 3. Current directory
fn resolve_base(cli_base: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = cli_base {
        return Ok(path);
    }

    if let Ok(env_path) = env::var("AIGEN_BASE_DIR") {
        let path = PathBuf::from(&env_path);
        if path.is_dir() {
            return Ok(path);
        }
        eprintln!(
            "{}",
            format!(
                "Warning: AIGEN_BASE_DIR is set but is not a directory: {}",
                env_path
            )
            .yellow()
        );
    }

    env::current_dir().context("failed to read current directory")
}

/// Build the engine and read the input text.
fn load(source: &SourceArgs) -> Result<(Patcher, PatcherConfig, ParseResult)> {
    let base = resolve_base(source.base.clone())?;

    let config = match &source.config {
        Some(path) => load_from_path(path)?,
        None => load_for_base(&base)?,
    };

    let patcher = Patcher::with_tags(&base, config.tag_set())
        .with_context(|| format!("failed to resolve base directory {}", base.display()))?;

    let result = match &source.input {
        Some(path) => patcher.extract_from_path(path)?,
        None => patcher.extract_from_reader(io::stdin().lock())?,
    };

    Ok((patcher, config, result))
}

fn print_parse_errors(result: &ParseResult) {
    for error in &result.errors {
        eprintln!("{} {}", "Warning:".yellow(), error.message);
        eprintln!("  {}", error.block.dimmed());
    }
}

/// Helper: Show unified diff between original and modified content
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!(
        "\n{}",
        format!("--- {} (original)", file.display()).dimmed()
    );
    println!("{}", format!("+++ {} (patched)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => format!(" {}", change).normal(),
        };
        print!("{}", sign);
    }
}

fn target_label(record: &OperationRecord) -> String {
    match (&record.kind, &record.name) {
        (OperationKind::FunctionReplace, Some(name)) => format!("{} ({})", record.path, name),
        _ => record.path.clone(),
    }
}

fn cmd_apply(
    source: SourceArgs,
    dry_run: bool,
    no_backup: bool,
    show_diff: bool,
    json: bool,
) -> Result<()> {
    let (patcher, config, result) = load(&source)?;

    let mut options: ApplyOptions = config.apply_options();
    if dry_run {
        options.dry_run = true;
    }
    if no_backup {
        options.backup = false;
    }

    if !json {
        println!("Base: {}", patcher.base_dir().display());
        println!(
            "Directives: {} file, {} function",
            result.files.len(),
            result.functions.len()
        );
        println!();
    }
    print_parse_errors(&result);

    // Never apply anything from an invalid result
    let report = patcher.validate(&result);
    if !report.is_valid() {
        if json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            eprintln!("{}", "Validation failed:".red().bold());
            for error in report.errors() {
                eprintln!("  {} {}", "✗".red(), error);
            }
        }
        std::process::exit(1);
    }

    if show_diff && !json {
        for planned in patcher.preview(&result) {
            match &planned.after {
                Ok(after) => {
                    let before = planned.before.as_deref().unwrap_or("");
                    if before != after {
                        display_diff(&planned.target, before, after);
                    }
                }
                Err(e) => eprintln!("{} {}: {}", "✗".red(), planned.path, e),
            }
        }
        println!();
    }

    if options.dry_run && !json {
        println!("{}", "[DRY RUN - nothing will be written]".cyan());
    }

    let records = patcher.apply(&result, options);

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        for record in &records {
            let label = target_label(record);
            if record.success {
                let verb = match (options.dry_run, record.splice) {
                    (true, _) => "Would apply",
                    (false, Some(SpliceOutcome::Appended)) => "Appended",
                    (false, _) => "Applied",
                };
                println!("{} {} {}: {}", "✓".green(), record.kind, label, verb);
                if let Some(backup) = &record.backup {
                    println!("  {}", format!("backup: {}", backup.display()).dimmed());
                }
            } else {
                eprintln!(
                    "{} {} {}: Failed - {}",
                    "✗".red(),
                    record.kind,
                    label,
                    record.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }

    let failed = records.iter().filter(|r| !r.success).count();

    if !json {
        println!();
        println!("{}", "Summary:".bold());
        println!(
            "  {} succeeded",
            format!("{}", records.len() - failed).green()
        );
        println!("  {} failed", format!("{}", failed).red());
        println!(
            "  {} parse errors",
            format!("{}", result.errors.len()).yellow()
        );
    }

    if failed > 0 {
        std::process::exit(1);
    }

    Ok(())
}

fn cmd_check(source: SourceArgs, json: bool) -> Result<()> {
    let (patcher, _config, result) = load(&source)?;
    let report = patcher.validate(&result);

    if json {
        let output = serde_json::json!({
            "files": result.files.len(),
            "functions": result.functions.len(),
            "parse_errors": result.errors,
            "validation": report,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", "Directive Check".bold());
        println!("Base: {}", patcher.base_dir().display());
        println!(
            "Directives: {} file, {} function",
            result.files.len(),
            result.functions.len()
        );
        println!();
        print_parse_errors(&result);

        if report.is_valid() {
            println!("{} {}", "✓".green(), "VALID".green().bold());
        } else {
            println!(
                "{} {} ({} errors)",
                "✗".red(),
                "INVALID".red().bold(),
                report.issues().len()
            );
            for error in report.errors() {
                println!("  - {}", error);
            }
        }
    }

    if !report.is_valid() {
        std::process::exit(1);
    }

    Ok(())
}

fn cmd_list(source: SourceArgs, json: bool) -> Result<()> {
    let (_patcher, _config, result) = load(&source)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if result.is_empty() {
        println!("{}", "No directives found".yellow());
    }

    for file in &result.files {
        println!(
            "{} {} {}",
            "file".cyan(),
            file.path,
            format!("-> {}", file.resolved_path.display()).dimmed()
        );
    }

    for func in &result.functions {
        println!(
            "{} {} ({}) {}",
            "function".cyan(),
            func.path,
            func.name,
            format!("-> {}", func.resolved_path.display()).dimmed()
        );
    }

    print_parse_errors(&result);

    Ok(())
}
