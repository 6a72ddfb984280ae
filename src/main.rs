use anyhow::{Context, Result};
use apkscan::{
    cache::Cache,
    catalog::PatternCatalog,
    config::Config,
    engine::Analyzer,
    error::ScanError,
    model::{AnalysisOptions, AnalysisResult, Category, Severity},
    output::{format_results_to_string, print_results, OutputFormat},
    platform,
    sink::DirectorySink,
};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tabled::{settings::Style, Table, Tabled};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Exit codes for CI integration
mod exit_codes {
    pub const SUCCESS: u8 = 0;
    pub const ERROR: u8 = 1;
    pub const CRITICAL_VULN: u8 = 2;
    pub const HIGH_VULN: u8 = 3;
    pub const MEDIUM_VULN: u8 = 4;
    pub const LOW_VULN: u8 = 5;
    pub const REJECTED_ARCHIVE: u8 = 6;
}

#[derive(Parser)]
#[command(name = "apkscan")]
#[command(
    author,
    version,
    about = "Static security assessment for Android application archives"
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze one or more archives
    Scan {
        /// Archives to analyze
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Output format (table, json, sarif)
        #[arg(short, long)]
        format: Option<String>,

        /// Category hint; matching features are listed first (e.g. payment, login)
        #[arg(short, long)]
        category: Option<String>,

        /// Only run these pattern ids (repeatable)
        #[arg(short, long = "include")]
        include: Vec<String>,

        /// Ignore cached results and analyze again
        #[arg(long)]
        deep: bool,

        /// Scan deadline in seconds (overrides the config)
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Write output to file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also save each result as JSON in this directory
        #[arg(long, num_args = 0..=1)]
        report_dir: Option<Option<PathBuf>>,

        /// Exit with error if vulnerabilities at or above this severity are found
        #[arg(long, value_enum)]
        fail_on: Option<FailLevel>,

        /// Analyze archives one at a time
        #[arg(long)]
        no_parallel: bool,
    },

    /// List the detection patterns in the active catalog
    Patterns {
        /// Only show one category (vulnerability, protection, feature)
        #[arg(short, long)]
        category: Option<String>,
    },

    /// Show or create config file
    Config {
        /// Generate default config file
        #[arg(long)]
        init: bool,

        /// Show config file path
        #[arg(long)]
        path: bool,
    },

    /// Clear the result cache
    ClearCache,
}

#[derive(Clone, Copy, ValueEnum)]
enum FailLevel {
    Critical,
    High,
    Medium,
    Low,
}

impl FailLevel {
    fn threshold(self) -> Severity {
        match self {
            FailLevel::Critical => Severity::Critical,
            FailLevel::High => Severity::High,
            FailLevel::Medium => Severity::Medium,
            FailLevel::Low => Severity::Low,
        }
    }
}

#[derive(Tabled)]
struct PatternRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Type")]
    pattern_type: String,
    #[tabled(rename = "Name")]
    name: String,
}

struct ScanRequest {
    paths: Vec<PathBuf>,
    format: OutputFormat,
    options: AnalysisOptions,
    output: Option<PathBuf>,
    report_dir: Option<PathBuf>,
    fail_on: Option<FailLevel>,
    parallel: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli.command).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_codes::ERROR)
        }
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("apkscan=warn")),
        1 => EnvFilter::new("apkscan=info"),
        _ => EnvFilter::new("apkscan=debug"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(command: Commands) -> Result<u8> {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %format!("{:#}", e), "Ignoring unreadable config file");
            Config::default()
        }
    };

    match command {
        Commands::Scan {
            paths,
            format,
            category,
            include,
            deep,
            timeout,
            output,
            report_dir,
            fail_on,
            no_parallel,
        } => {
            let format_str = format.unwrap_or_else(|| config.default_format.clone());
            let format = OutputFormat::from_str(&format_str).map_err(|e| anyhow::anyhow!(e))?;

            let request = ScanRequest {
                paths,
                format,
                options: AnalysisOptions {
                    category_hint: category,
                    include_pattern_ids: include,
                    deep_analysis: deep,
                    timeout_seconds: timeout,
                },
                output,
                report_dir: report_dir.map(|dir| dir.unwrap_or_else(platform::reports_dir)),
                fail_on,
                parallel: !no_parallel,
            };
            run_scan(&config, request).await
        }
        Commands::Patterns { category } => {
            list_patterns(&config, category.as_deref())?;
            Ok(exit_codes::SUCCESS)
        }
        Commands::Config { init, path } => {
            handle_config(init, path)?;
            Ok(exit_codes::SUCCESS)
        }
        Commands::ClearCache => {
            let cache = Cache::new();
            let removed = cache.clear()?;
            println!("Cache cleared ({} entries).", removed);
            Ok(exit_codes::SUCCESS)
        }
    }
}

async fn run_scan(config: &Config, request: ScanRequest) -> Result<u8> {
    let is_interactive = request.format == OutputFormat::Table && request.output.is_none();

    let mut analyzer = Analyzer::from_config(config)?;
    if let Some(dir) = &request.report_dir {
        analyzer = analyzer.with_sink(Arc::new(DirectorySink::new(dir)));
    }
    let cache = Cache::with_ttl_hours(config.cache_ttl_hours);

    let progress = if is_interactive {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_message(format!("Analyzing {} archive(s)...", request.paths.len()));
        Some(pb)
    } else {
        None
    };

    let outcomes: Vec<(PathBuf, Result<AnalysisResult, ScanError>)> =
        if request.parallel && request.paths.len() > 1 {
            let futures: Vec<_> = request
                .paths
                .iter()
                .map(|path| {
                    let analyzer = &analyzer;
                    let cache = &cache;
                    let options = &request.options;
                    async move {
                        let outcome = analyze_cached(analyzer, cache, path, options).await;
                        (path.clone(), outcome)
                    }
                })
                .collect();
            join_all(futures).await
        } else {
            let mut outcomes = Vec::with_capacity(request.paths.len());
            for path in &request.paths {
                if let Some(ref pb) = progress {
                    pb.set_message(format!("Analyzing {}...", path.display()));
                }
                let outcome = analyze_cached(&analyzer, &cache, path, &request.options).await;
                outcomes.push((path.clone(), outcome));
            }
            outcomes
        };

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    let mut results = Vec::new();
    let mut failure: Option<u8> = None;
    for (path, outcome) in outcomes {
        match outcome {
            Ok(result) => results.push(result),
            Err(e) => {
                eprintln!("Error: {}: {}", path.display(), e);
                let code = if e.is_fatal_archive() {
                    exit_codes::REJECTED_ARCHIVE
                } else {
                    exit_codes::ERROR
                };
                failure = Some(failure.map_or(code, |current| current.min(code)));
            }
        }
    }

    if !results.is_empty() {
        match &request.output {
            Some(path) => {
                let content = format_results_to_string(&results, request.format)?;
                std::fs::write(path, content)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                eprintln!("Results written to: {}", path.display());
            }
            None => print_results(&results, request.format)?,
        }
    }

    analyzer.drain_sinks().await;

    if let Some(code) = failure {
        return Ok(code);
    }
    Ok(determine_exit_code(&results, request.fail_on))
}

/// Serve a cached result when the archive, catalog and settings are unchanged.
///
/// Option-dependent runs (pattern filters, category hints, `--deep`) always
/// analyze afresh, and partial results are never stored.
async fn analyze_cached(
    analyzer: &Analyzer,
    cache: &Cache,
    path: &Path,
    options: &AnalysisOptions,
) -> Result<AnalysisResult, ScanError> {
    let cacheable = !options.deep_analysis
        && options.include_pattern_ids.is_empty()
        && options.category_hint.is_none();

    // Oversized or non-archive files fail here, before their body is hashed.
    let key = if cacheable {
        Some(analyzer.cache_key(path).await?)
    } else {
        None
    };

    if let Some(ref key) = key {
        if let Some(cached) = cache.get::<AnalysisResult>(key) {
            debug!(path = %path.display(), "Using cached result");
            return Ok(cached);
        }
    }

    let result = analyzer.analyze(path, options).await?;

    if let Some(key) = key {
        if !result.timed_out {
            if let Err(e) = cache.set(&key, &result) {
                warn!(error = %e, "Failed to cache result");
            }
        }
    }

    Ok(result)
}

/// Determine the exit code based on vulnerabilities found and --fail-on setting
fn determine_exit_code(results: &[AnalysisResult], fail_on: Option<FailLevel>) -> u8 {
    let Some(fail_on) = fail_on else {
        return exit_codes::SUCCESS;
    };

    let worst = results
        .iter()
        .filter_map(AnalysisResult::max_severity)
        .min_by_key(|s| s.rank());

    match worst {
        Some(severity) if severity.rank() <= fail_on.threshold().rank() => match severity {
            Severity::Critical => exit_codes::CRITICAL_VULN,
            Severity::High => exit_codes::HIGH_VULN,
            Severity::Medium => exit_codes::MEDIUM_VULN,
            _ => exit_codes::LOW_VULN,
        },
        _ => exit_codes::SUCCESS,
    }
}

fn list_patterns(config: &Config, category: Option<&str>) -> Result<()> {
    let category = category
        .map(Category::from_str)
        .transpose()
        .map_err(|e| anyhow::anyhow!(e))?;
    let catalog = PatternCatalog::load(config.rules_file.as_deref(), &config.ignore.patterns)
        .context("Failed to load pattern catalog")?;

    let rows: Vec<PatternRow> = catalog
        .enabled()
        .filter(|p| category.is_none_or(|c| p.category() == c))
        .map(|p| PatternRow {
            id: p.id.clone(),
            category: p.category().to_string(),
            severity: p
                .severity()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string()),
            pattern_type: p.pattern_type.clone(),
            name: p.name.clone(),
        })
        .collect();

    println!("{} patterns (catalog {}):", rows.len(), &catalog.fingerprint()[..12]);
    println!();
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);

    for failure in catalog.rejected() {
        eprintln!("Rejected pattern {}: {}", failure.id, failure.reason);
    }

    Ok(())
}

fn handle_config(init: bool, show_path: bool) -> Result<()> {
    let config_path = Config::config_path();

    if show_path {
        println!("{}", config_path.display());
        return Ok(());
    }

    if init {
        if config_path.exists() {
            println!("Config file already exists at: {}", config_path.display());
            return Ok(());
        }

        let config = Config::default();
        config.save()?;
        println!("Created config file at: {}", config_path.display());
        println!();
        println!("Default configuration:");
        println!("{}", Config::generate_default_config());
        return Ok(());
    }

    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)?;
        println!("Config file: {}", config_path.display());
        println!();
        println!("{}", content);
    } else {
        println!("No config file found.");
        println!("Run 'apkscan config --init' to create one.");
        println!();
        println!("Config path: {}", config_path.display());
    }

    Ok(())
}
