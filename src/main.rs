use async_trait::async_trait;
use clap::{ArgAction, Parser, ValueEnum};
use ignore::WalkBuilder;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use reviewflow::config::ReviewConfig;
use reviewflow::error::{BoxError, ErrorClassifier, ErrorContext, ReviewError};
use reviewflow::executor::{AnalysisOutcome, JobProcessor, ProcessingResult, ProgressObserver};
use reviewflow::logging::{init_logging, LogLevel, LoggingConfig};
use reviewflow::mode::{BatchDescriptor, BatchKind};
use reviewflow::queue::JobStatus;
use reviewflow::runner::{BatchReport, BatchRunner};

/// Batch kind accepted on the command line
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum CliBatchKind {
    /// Explicit list of files
    #[default]
    Files,
    /// Directories, expanded to the files beneath them
    Directory,
    /// Changed files of a working tree
    Changes,
    /// Files of a pull request
    Pr,
}

impl From<CliBatchKind> for BatchKind {
    fn from(kind: CliBatchKind) -> Self {
        match kind {
            CliBatchKind::Files => BatchKind::Files,
            CliBatchKind::Directory => BatchKind::Directory,
            CliBatchKind::Changes => BatchKind::Changes,
            CliBatchKind::Pr => BatchKind::Pr,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "reviewflow")]
#[command(version)]
#[command(about = "Run review jobs over a batch of files with caching and retries")]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(long, short, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Disable colors (also respects NO_COLOR environment variable)
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Review a batch of targets
    Run(RunArgs),
    /// Classify a failure message and show its retry policy
    Classify {
        /// The failure message
        message: String,
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Files (or directories with --kind directory) to review
    #[arg(required = true)]
    targets: Vec<PathBuf>,

    /// What the batch was built from; decides the processing mode
    #[arg(long, value_enum, default_value = "files")]
    kind: CliBatchKind,

    /// Configuration file (TOML)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Process one target at a time regardless of batch kind
    #[arg(long)]
    force_sequential: bool,

    /// Process targets concurrently regardless of batch kind
    #[arg(long)]
    force_parallel: bool,

    /// Stop after this many failed targets
    #[arg(long, value_name = "N")]
    max_errors: Option<usize>,

    /// Stop at the first failed target
    #[arg(long)]
    stop_on_error: bool,

    /// Max concurrent targets in parallel mode
    #[arg(long, value_name = "N")]
    max_concurrency: Option<usize>,

    /// Print the batch report as JSON on stdout
    #[arg(long)]
    json: bool,
}

impl RunArgs {
    /// Apply command line flags on top of the loaded configuration
    fn apply(&self, config: &mut ReviewConfig) {
        config.mode.force_sequential |= self.force_sequential;
        config.mode.force_parallel |= self.force_parallel;
        if self.max_errors.is_some() {
            config.executor.max_errors = self.max_errors;
        }
        if self.stop_on_error {
            config.executor.continue_on_error = false;
        }
        if let Some(max_concurrency) = self.max_concurrency {
            config.parallel.max_concurrency = max_concurrency;
        }
    }
}

/// Exit codes for the run command
mod exit_codes {
    use std::process::ExitCode;

    /// Every target succeeded
    pub fn success() -> ExitCode {
        ExitCode::from(0)
    }

    /// At least one target failed
    pub fn failed() -> ExitCode {
        ExitCode::from(1)
    }

    /// The configuration could not be used
    pub fn config_error() -> ExitCode {
        ExitCode::from(2)
    }
}

/// Markers that turn an approved file into a warning
const MARKERS: [&str; 2] = ["TODO", "FIXME"];

/// Reads each file and flags unfinished-work markers
struct FileScanProcessor;

#[async_trait]
impl JobProcessor for FileScanProcessor {
    async fn process(
        &self,
        target: &str,
        content: Option<&str>,
    ) -> Result<AnalysisOutcome, BoxError> {
        let content = content.ok_or_else(|| format!("no content loaded for {}", target))?;

        let marker_lines: Vec<usize> = content
            .lines()
            .enumerate()
            .filter(|(_, line)| MARKERS.iter().any(|m| line.contains(m)))
            .map(|(n, _)| n + 1)
            .collect();
        let line_count = content.lines().count();
        let details = serde_json::json!({
            "lines": line_count,
            "bytes": content.len(),
            "marker_lines": marker_lines,
        });

        let outcome = if marker_lines.is_empty() {
            AnalysisOutcome::approved(format!("{} lines, no markers", line_count))
        } else {
            AnalysisOutcome::warning(format!(
                "{} lines, {} TODO/FIXME marker(s)",
                line_count,
                marker_lines.len()
            ))
        };
        Ok(outcome.with_details(details))
    }

    async fn load_content(&self, target: &str) -> Result<Option<String>, BoxError> {
        Ok(Some(tokio::fs::read_to_string(target).await?))
    }
}

/// Drives an indicatif bar from executor callbacks
struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    fn new(total: usize, visible: bool) -> Self {
        let bar = if visible {
            ProgressBar::new(total as u64)
        } else {
            ProgressBar::hidden()
        };
        bar.set_style(
            ProgressStyle::with_template("{bar:30} {pos}/{len} {wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Self { bar }
    }
}

impl ProgressObserver for ProgressReporter {
    fn on_start(&self, _index: usize, _total: usize, target: &str) {
        self.bar.set_message(target.to_string());
    }

    fn on_complete(&self, _result: &ProcessingResult) {
        self.bar.inc(1);
    }

    fn on_error(&self, target: &str, error: &ReviewError) {
        self.bar
            .println(format!("failed: {} ({})", target, error.kind));
    }
}

/// Expand directories into the files beneath them, sorted
///
/// The walk honors `.gitignore` and does not follow symlinks.
fn expand_targets(targets: &[PathBuf], kind: BatchKind) -> Vec<String> {
    let mut expanded = Vec::new();
    for target in targets {
        if kind == BatchKind::Directory && target.is_dir() {
            let mut files = collect_files(target);
            files.sort();
            expanded.extend(files.iter().map(|p| p.display().to_string()));
        } else {
            expanded.push(target.display().to_string());
        }
    }
    expanded
}

fn collect_files(dir: &Path) -> Vec<PathBuf> {
    let mut builder = WalkBuilder::new(dir);
    let walker = WalkBuilder::hidden(&mut builder, false) // dotfiles are reviewed too
        .git_ignore(true)
        .git_exclude(true)
        .require_git(false)
        .filter_entry(|entry| entry.file_name() != ".git")
        .build();

    let mut files = Vec::new();
    for entry in walker {
        match entry {
            Ok(entry) if entry.file_type().is_some_and(|t| t.is_file()) => {
                files.push(entry.into_path());
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(dir = %dir.display(), "skipping unreadable entry: {}", e),
        }
    }
    files
}

fn load_config(path: Option<&Path>) -> Result<ReviewConfig, reviewflow::config::ConfigError> {
    match path {
        Some(path) => ReviewConfig::load(path),
        None => Ok(ReviewConfig::default()),
    }
}

fn print_summary(report: &BatchReport, use_color: bool) {
    for result in &report.results {
        let (mark, detail) = match (&result.payload, &result.error) {
            (_, Some(error)) => ("✗", format!("{}: {}", error.kind, error.message)),
            (Some(payload), None) => {
                let mark = if result.status == JobStatus::Warning {
                    "!"
                } else {
                    "✓"
                };
                (mark, payload.summary.clone())
            }
            (None, None) => ("?", String::new()),
        };
        let cached = if result.from_cache { " (cached)" } else { "" };
        let line = format!("{} {}  {}{}", mark, result.target, detail, cached);

        if !use_color {
            println!("{}", line);
        } else if result.status == JobStatus::Error {
            println!("{}", line.red());
        } else if result.status == JobStatus::Warning {
            println!("{}", line.yellow());
        } else {
            println!("{}", line.green());
        }

        if let Some(guidance) = result.error.as_ref().and_then(|e| e.guidance.as_deref()) {
            if use_color {
                println!("    {}", guidance.dimmed());
            } else {
                println!("    {}", guidance);
            }
        }
    }

    let stats = &report.stats;
    let summary = format!(
        "{} targets [{}]: {} successful ({} with warnings), {} failed, {} skipped",
        stats.total + report.skipped,
        report.mode,
        stats.successful,
        stats.warnings,
        stats.failed,
        report.skipped
    );
    if use_color {
        println!("{}", summary.bold());
    } else {
        println!("{}", summary);
    }
}

async fn run_batch(args: RunArgs, config: &ReviewConfig, use_color: bool) -> ExitCode {
    let runner = match BatchRunner::from_config(config) {
        Ok(runner) => runner,
        Err(e) => {
            eprintln!("error: {}", e);
            return exit_codes::config_error();
        }
    };

    let kind = BatchKind::from(args.kind);
    let batch = BatchDescriptor::new(kind, expand_targets(&args.targets, kind));
    let reporter = ProgressReporter::new(batch.targets.len(), !args.json);
    let report = runner.run(&batch, &FileScanProcessor, &reporter).await;
    reporter.bar.finish_and_clear();

    if args.json {
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("error: failed to serialize report: {}", e);
                return exit_codes::failed();
            }
        }
    } else {
        print_summary(&report, use_color);
    }

    if report.has_failures() {
        exit_codes::failed()
    } else {
        exit_codes::success()
    }
}

fn classify(message: &str, use_color: bool) -> ExitCode {
    let error = ErrorClassifier::new().classify_message(message, &ErrorContext::new("classify"));
    let engine = reviewflow::error::RetryEngine::new();

    let kind = error.kind.to_string();
    if use_color {
        println!("{}", kind.bold());
    } else {
        println!("{}", kind);
    }
    println!("retryable: {}", error.retryable);
    match engine.policy_for(error.kind) {
        Some(policy) => println!(
            "policy: {} attempts, {}ms base delay, x{} backoff, {}ms cap",
            policy.max_attempts, policy.base_delay_ms, policy.backoff_multiplier, policy.max_delay_ms
        ),
        None => println!("policy: never retried"),
    }
    println!("{}", error.kind.guidance());
    exit_codes::success()
}

/// `-v` selects info, `-vv` debug with source locations, `-vvv` trace
fn logging_config(verbose: u8, configured: Option<LogLevel>) -> LoggingConfig {
    let level = match (verbose, configured) {
        (0, Some(level)) => level,
        (0, None) => LogLevel::Warn,
        (n, _) => LogLevel::from(n - 1),
    };
    LoggingConfig::new()
        .with_level(level)
        .with_source_location(verbose >= 2)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let use_color = !cli.no_color && std::env::var("NO_COLOR").is_err();

    match cli.command {
        Commands::Run(args) => {
            let mut config = match load_config(args.config.as_deref()) {
                Ok(config) => config,
                Err(e) => {
                    init_logging(logging_config(cli.verbose, None));
                    eprintln!("error: {}", e);
                    return exit_codes::config_error();
                }
            };
            args.apply(&mut config);
            init_logging(logging_config(cli.verbose, config.log_level));
            run_batch(args, &config, use_color).await
        }
        Commands::Classify { message } => {
            init_logging(logging_config(cli.verbose, None));
            classify(&message, use_color)
        }
    }
}
