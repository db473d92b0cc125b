//! CLI argument parsing and command dispatch

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use loadramp_core::{
    CompletionStatus, ConfigError, LoadError, RunConfig, RunControllerBuilder, RunReport, Stage,
};

/// Exit code for a clean, complete run
pub const EXIT_SUCCESS: u8 = 0;
/// Exit code for a configuration error
pub const EXIT_CONFIG_ERROR: u8 = 2;
/// Exit code for a run whose workers had to be force-terminated
pub const EXIT_FORCED_STOP: u8 = 3;
/// Exit code for any other failure
pub const EXIT_FAILURE: u8 = 1;

#[derive(Parser, Debug)]
#[command(name = "loadramp")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a staged load test
    Run(RunArgs),
    /// Validate a configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
}

/// Options of `loadramp run`; flags override values from `--config`
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Path to a JSON configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Target URL
    #[arg(short, long)]
    pub target: Option<String>,

    /// Request header, repeatable (e.g. -H "Content-Type: application/json")
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Ramp stage <duration>:<target>, repeatable; replaces configured stages
    #[arg(short, long = "stage")]
    pub stages: Vec<Stage>,

    /// Per-request timeout (e.g. 30s)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub request_timeout: Option<Duration>,

    /// Pause after each iteration (e.g. 1s, 0s)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub think_time: Option<Duration>,

    /// Scheduler reconciliation period
    #[arg(long, value_parser = humantime::parse_duration)]
    pub scheduler_tick: Option<Duration>,

    /// Upper bound on graceful worker retirement at the end of the run
    #[arg(long, value_parser = humantime::parse_duration)]
    pub drain_timeout: Option<Duration>,

    /// Global cap in requests per second
    #[arg(long)]
    pub rate_limit: Option<f64>,

    /// Write the final report as JSON to this path
    #[arg(long)]
    pub summary_export: Option<PathBuf>,
}

impl RunArgs {
    /// Resolve the effective configuration
    pub fn to_config(&self) -> Result<RunConfig, LoadError> {
        let mut config = match &self.config {
            Some(path) => RunConfig::from_file(path)?,
            None => RunConfig::default(),
        };

        if let Some(target) = &self.target {
            config.target = target.clone();
        }
        for (name, value) in &self.headers {
            config.headers.insert(name.clone(), value.clone());
        }
        if !self.stages.is_empty() {
            config.stages = self.stages.clone();
        }
        if let Some(timeout) = self.request_timeout {
            config.request_timeout = timeout;
        }
        if let Some(think_time) = self.think_time {
            config.think_time = think_time;
        }
        if let Some(tick) = self.scheduler_tick {
            config.scheduler_tick = tick;
        }
        if let Some(timeout) = self.drain_timeout {
            config.drain_timeout = timeout;
        }
        if let Some(rps) = self.rate_limit {
            config.rate_limit = Some(rps);
        }

        Ok(config)
    }
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once(':')
        .ok_or_else(|| format!("expected <name>: <value>, got {s:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in {s:?}"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

impl Cli {
    /// Dispatch the command and map the result to a process exit code
    pub async fn run(self) -> ExitCode {
        let result = match self.command {
            Commands::Run(args) => run_load(args).await,
            Commands::Validate { config } => validate(config),
        };

        match result {
            Ok(code) => code,
            Err(e) => {
                tracing::error!("{e:#}");
                ExitCode::from(exit_code_for(&e))
            }
        }
    }
}

async fn run_load(args: RunArgs) -> Result<ExitCode> {
    let config = args.to_config()?;
    let controller = RunControllerBuilder::new().config(config).build()?;

    let report = controller.run_with_signal_handling().await?;
    println!("{report}");

    if let Some(path) = &args.summary_export {
        export_summary(&report, path)?;
        tracing::info!(path = %path.display(), "Summary written");
    }

    Ok(ExitCode::from(completion_exit_code(report.completion)))
}

fn validate(path: PathBuf) -> Result<ExitCode> {
    let config = RunConfig::from_file(&path)?;
    config.validate()?;
    let profile = config.profile()?;

    println!(
        "{}: ok ({} stages, {}, peak {} VUs, target {})",
        path.display(),
        profile.stages().len(),
        humantime::format_duration(profile.total_duration()),
        profile.peak_target(),
        config.target
    );
    Ok(ExitCode::SUCCESS)
}

fn export_summary(report: &RunReport, path: &Path) -> Result<()> {
    let json = report.to_json().context("failed to serialize summary")?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write summary to {}", path.display()))
}

fn completion_exit_code(completion: CompletionStatus) -> u8 {
    match completion {
        CompletionStatus::Completed => EXIT_SUCCESS,
        CompletionStatus::PartialDueToForceStop => EXIT_FORCED_STOP,
    }
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    let is_config = err.chain().any(|cause| {
        cause.downcast_ref::<LoadError>().is_some_and(LoadError::is_config)
            || cause.downcast_ref::<ConfigError>().is_some()
    });
    if is_config {
        EXIT_CONFIG_ERROR
    } else {
        EXIT_FAILURE
    }
}
