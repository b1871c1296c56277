use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use colineage_core::{ChangeSeverity, Config, DiffReport, Report, Severity};
use colineage_engine::{diff_dirs, Pipeline};
use colineage_graph::{render_html, Direction, ImpactEdge, VizOptions};

/// Exit code for run-fatal errors (unreadable input, unwritable output)
const EXIT_FATAL: i32 = 3;

/// colineage - column-level lineage and breaking-change detection for SQL
#[derive(Parser)]
#[command(name = "colineage")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: colineage.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a SQL corpus and write per-object descriptors
    Extract {
        /// Directory containing SQL sources
        #[arg(long)]
        sql_dir: PathBuf,

        /// Directory receiving <object>.json files and report.json
        #[arg(long)]
        out_dir: PathBuf,
    },

    /// Show upstream/downstream columns for a selector
    Impact {
        /// Selector such as `+dbo.fct_sales.Revenue` or `dbo.orders.Status+`
        selector: String,

        /// Directory containing SQL sources
        #[arg(long)]
        sql_dir: PathBuf,

        /// Maximum number of hops (default from config)
        #[arg(long)]
        max_depth: Option<usize>,

        /// Print edges as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write an HTML page drawing the column lineage graph
    Viz {
        /// Directory containing SQL sources
        #[arg(long)]
        sql_dir: PathBuf,

        /// HTML file to write
        #[arg(short, long)]
        out: PathBuf,

        /// Only draw the impact of this selector
        #[arg(long)]
        focus: Option<String>,

        /// Maximum number of hops for --focus (default from config)
        #[arg(long)]
        max_depth: Option<usize>,
    },

    /// Compare two versions of a corpus
    Diff {
        /// Base (before) SQL directory
        #[arg(long)]
        base: PathBuf,

        /// Head (after) SQL directory
        #[arg(long)]
        head: PathBuf,

        /// Output file for the diff report
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match run(cli) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("{} {:#}", "error:".red().bold(), error);
            EXIT_FATAL
        }
    };
    std::process::exit(code);
}

/// `RUST_LOG` wins; otherwise warnings, or debug with `--verbose`
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<i32> {
    let config = load_config(cli.config.as_deref(), cli.verbose)?;

    if cli.verbose {
        eprintln!("{} dialect: {:?}", "Using".cyan(), config.dialect);
    }

    match cli.command {
        Commands::Extract { sql_dir, out_dir } => extract_command(&config, &sql_dir, &out_dir),
        Commands::Impact {
            selector,
            sql_dir,
            max_depth,
            json,
        } => impact_command(&config, &selector, &sql_dir, max_depth, json),
        Commands::Viz {
            sql_dir,
            out,
            focus,
            max_depth,
        } => viz_command(&config, &sql_dir, &out, focus, max_depth),
        Commands::Diff { base, head, output } => {
            diff_command(&config, &base, &head, output.as_deref(), cli.verbose)
        }
    }
}

fn load_config(path: Option<&Path>, verbose: bool) -> Result<Config> {
    if let Some(path) = path {
        return Config::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()));
    }

    let default_path = Path::new("colineage.toml");
    if default_path.exists() {
        return Config::from_file(default_path).context("Failed to load colineage.toml");
    }

    if verbose {
        eprintln!("{}", "No config file found, using defaults".yellow());
    }
    Ok(Config::default())
}

/// Extract command - resolve everything and write descriptors
fn extract_command(config: &Config, sql_dir: &Path, out_dir: &Path) -> Result<i32> {
    let pipeline = Pipeline::new(config.clone());
    let snapshot = pipeline
        .run_dir(sql_dir)
        .with_context(|| format!("Failed to analyze {}", sql_dir.display()))?;

    let written = snapshot
        .write(out_dir, config)
        .with_context(|| format!("Failed to write {}", out_dir.display()))?;

    print_report_summary(&snapshot.report());
    println!(
        "{} {} object descriptors to {}",
        "Wrote".green().bold(),
        written,
        out_dir.display()
    );
    Ok(0)
}

/// Impact command - walk the column graph from the selector's seeds
fn impact_command(
    config: &Config,
    selector: &str,
    sql_dir: &Path,
    max_depth: Option<usize>,
    json: bool,
) -> Result<i32> {
    let pipeline = Pipeline::new(config.clone());
    let snapshot = pipeline
        .run_dir(sql_dir)
        .with_context(|| format!("Failed to analyze {}", sql_dir.display()))?;

    let depth = max_depth.unwrap_or(config.impact.max_depth);
    let edges = snapshot.impact(selector, depth);

    if json {
        println!("{}", serde_json::to_string_pretty(&edges)?);
        return Ok(0);
    }

    print_impact(selector, &edges);
    Ok(0)
}

/// Viz command - render the column graph as a standalone page
fn viz_command(
    config: &Config,
    sql_dir: &Path,
    out: &Path,
    focus: Option<String>,
    max_depth: Option<usize>,
) -> Result<i32> {
    let pipeline = Pipeline::new(config.clone());
    let snapshot = pipeline
        .run_dir(sql_dir)
        .with_context(|| format!("Failed to analyze {}", sql_dir.display()))?;

    let options = VizOptions {
        focus,
        max_depth: max_depth.unwrap_or(config.impact.max_depth),
    };
    let html = render_html(&snapshot.column_graph, &options).context("Failed to render lineage page")?;

    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(out, html).with_context(|| format!("Failed to write {}", out.display()))?;

    println!(
        "{} lineage page ({} edges) to {}",
        "Wrote".green().bold(),
        snapshot.column_graph.edge_count(),
        out.display()
    );
    Ok(0)
}

/// Diff command - exit status follows the highest severity found
fn diff_command(
    config: &Config,
    base: &Path,
    head: &Path,
    output: Option<&Path>,
    verbose: bool,
) -> Result<i32> {
    if verbose {
        eprintln!(
            "{} {} -> {}",
            "Comparing".cyan(),
            base.display(),
            head.display()
        );
    }

    let report = diff_dirs(config, base, head).context("Failed to build snapshots")?;

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("{} {}", "Report written to".green(), path.display());
    }

    print_diff(&report);
    Ok(report.exit_status(config.diff.fail_on).code())
}

fn print_impact(selector: &str, edges: &[ImpactEdge]) {
    if edges.is_empty() {
        println!("{} '{}'", "No lineage found for".yellow(), selector);
        return;
    }

    println!("{} {}", "Impact of".bold(), selector.bold());
    for edge in edges {
        let direction = match edge.direction {
            Direction::Upstream => "upstream".cyan(),
            Direction::Downstream => "downstream".magenta(),
        };
        println!("  [{}] {} {}", direction, edge.depth, edge.description);
    }
    println!();
    println!("{} edges", edges.len());
}

fn print_diff(report: &DiffReport) {
    if report.is_clean() {
        println!("{}", "✓ No changes".green().bold());
        return;
    }

    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", "Schema Diff Report".bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    for change in &report.changes {
        let severity = severity_label(change.severity);
        match &change.column {
            Some(column) => println!(
                "  [{}] {} {}.{}",
                severity, change.change_type, change.object, column
            ),
            None => println!("  [{}] {} {}", severity, change.change_type, change.object),
        }
        println!("    {}", change.message);
        if !change.impact.is_empty() {
            println!("    Impact: {} downstream columns", change.impact.len());
            for column in &change.impact {
                println!("      - {}", column);
            }
        }
    }

    println!();
    if let Some(severity) = report.severity {
        println!("Overall: {}", severity_label(severity));
    }
    println!("{}", "=".repeat(60).bright_blue());
}

fn severity_label(severity: ChangeSeverity) -> colored::ColoredString {
    match severity {
        ChangeSeverity::Breaking => "BREAKING".red().bold(),
        ChangeSeverity::PotentiallyBreaking => "POTENTIALLY_BREAKING".yellow().bold(),
        ChangeSeverity::NonBreaking => "NON_BREAKING".green(),
    }
}

/// Print report summary to stdout
fn print_report_summary(report: &Report) {
    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", "Lineage Extraction Report".bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    println!("Version: {}", report.version);
    println!("Timestamp: {}", report.timestamp);
    if let Some(fingerprint) = &report.fingerprint {
        println!("Fingerprint: {}", fingerprint);
    }
    println!();

    println!("{}", "Summary:".bold());
    println!("  Objects:  {}", report.summary.objects);
    println!("  Edges:    {}", report.summary.edges);
    println!("  Total diagnostics: {}", report.summary.total);

    if report.summary.errors > 0 {
        println!("  Errors:   {}", format!("{}", report.summary.errors).red().bold());
    } else {
        println!("  Errors:   {}", format!("{}", report.summary.errors).green());
    }

    if report.summary.warnings > 0 {
        println!("  Warnings: {}", format!("{}", report.summary.warnings).yellow());
    } else {
        println!("  Warnings: {}", format!("{}", report.summary.warnings).green());
    }

    println!("  Info:     {}", report.summary.info);
    println!();

    let notable: Vec<_> = report
        .diagnostics
        .iter()
        .filter(|d| d.severity != Severity::Info)
        .collect();
    if notable.is_empty() {
        println!("{}", "✓ No issues found!".green().bold());
    } else {
        println!("{}", "Diagnostics:".bold());
        for diag in notable {
            let severity_str = match diag.severity {
                Severity::Error => "ERROR".red().bold(),
                Severity::Warn => "WARN".yellow().bold(),
                Severity::Info => "INFO".cyan(),
            };

            match &diag.object {
                Some(object) => println!("  [{}] {} {}: {}", severity_str, diag.code, object, diag.message),
                None => println!("  [{}] {}: {}", severity_str, diag.code, diag.message),
            }

            if let Some(loc) = &diag.location {
                print!("    at {}", loc.file);
                if let Some(line) = loc.line {
                    print!(":{}", line);
                }
                println!();
            }

            if let Some(expression) = &diag.expression {
                println!("    Expression: {}", expression);
            }
        }
    }

    println!();
    println!("{}", "=".repeat(60).bright_blue());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn selector_is_positional() {
        let cli = Cli::try_parse_from([
            "colineage",
            "impact",
            "+dbo.fct_sales.Revenue",
            "--sql-dir",
            "sql",
            "--max-depth",
            "3",
        ])
        .unwrap();
        match cli.command {
            Commands::Impact {
                selector, max_depth, ..
            } => {
                assert_eq!(selector, "+dbo.fct_sales.Revenue");
                assert_eq!(max_depth, Some(3));
            }
            _ => panic!("expected impact"),
        }
    }

    #[test]
    fn viz_focus_is_optional() {
        let cli = Cli::try_parse_from(["colineage", "viz", "--sql-dir", "sql", "--out", "lineage.html"]).unwrap();
        match cli.command {
            Commands::Viz { focus, out, .. } => {
                assert_eq!(focus, None);
                assert_eq!(out, PathBuf::from("lineage.html"));
            }
            _ => panic!("expected viz"),
        }
    }
}
