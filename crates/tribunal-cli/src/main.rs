//! Tribunal - rubric-driven code audits
//!
//! ## Commands
//!
//! - `audit`: investigate a repository and its report, judge every rubric
//!   criterion and write a Markdown audit report
//! - `validate-rubric`: schema and semantic checks for a rubric file

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use tribunal_core::{AuditInputs, RubricConfig};
use tribunal_runtime::{FailurePolicy, RunResult, RuntimeConfig, RuntimeOrchestrator};

#[derive(Parser)]
#[command(name = "tribunal")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Rubric-driven audits of a repository and its report", long_about = None)]
struct Cli {
    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Default log level when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Audit a repository against a rubric
    Audit {
        /// Repository URL to clone
        #[arg(long)]
        repo: String,

        /// Accompanying report (Markdown or text)
        #[arg(long)]
        report: PathBuf,

        /// Rubric file (JSON or YAML)
        #[arg(long)]
        rubric: PathBuf,

        /// Directory for the rendered reports
        #[arg(short, long, default_value = "audit")]
        output: PathBuf,

        /// Runtime configuration file (YAML)
        #[arg(short, long, env = "TRIBUNAL_CONFIG")]
        config: Option<PathBuf>,

        /// Record node failures instead of aborting the run
        #[arg(long)]
        resilient: bool,

        /// Include the diagram inspector
        #[arg(long)]
        vision: bool,
    },

    /// Validate a rubric file
    ValidateRubric {
        /// Rubric file (JSON or YAML)
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs, cli.log_level);

    match cli.command {
        Commands::Audit {
            repo,
            report,
            rubric,
            output,
            config,
            resilient,
            vision,
        } => {
            let mut runtime = RuntimeConfig::load(config.as_deref()).context("Failed to load runtime configuration")?;
            if resilient {
                runtime.failure_policy = FailurePolicy::Resilient;
            }
            if vision {
                runtime.capabilities.vision = true;
            }

            let rubric = RubricConfig::from_file(&rubric)
                .with_context(|| format!("Failed to load rubric {}", rubric.display()))?;
            let orchestrator = RuntimeOrchestrator::new(runtime)?;

            let result = orchestrator.run(AuditInputs::new(repo, report, rubric)).await?;
            let written = write_reports(&result, &output)?;

            print_scores(&result);
            for path in written {
                println!("Report written: {}", path.display());
            }
        }

        Commands::ValidateRubric { path } => {
            let rubric = RubricConfig::from_file(&path)
                .with_context(|| format!("Rubric {} is invalid", path.display()))?;
            println!("Rubric: {}", rubric.name());
            println!("Dimensions: {}", rubric.dimensions.len());
            for dimension in &rubric.dimensions {
                println!("  - {} ({}) -> {}", dimension.id, dimension.name, dimension.target_artifact);
            }
            let policy = rubric.policy();
            println!(
                "Policy: security_override={} missing_artifact_cap={} high_variance_missing_evidence={}",
                policy.security_override, policy.missing_artifact_cap, policy.high_variance_missing_evidence
            );
        }
    }

    Ok(())
}

/// Initialise the global tracing subscriber. `RUST_LOG` wins over `level`.
fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}

/// Write the timestamped report and the `audit_report.md` alias.
fn write_reports(result: &RunResult, output: &Path) -> Result<Vec<PathBuf>> {
    let report = result
        .state
        .final_report
        .as_deref()
        .context("Run finished without a rendered report")?;

    std::fs::create_dir_all(output)
        .with_context(|| format!("Failed to create output directory {}", output.display()))?;

    let stamped = output.join(format!("audit_report_{}.md", Utc::now().format("%Y%m%d_%H%M%S")));
    let latest = output.join("audit_report.md");
    for path in [&stamped, &latest] {
        std::fs::write(path, report).with_context(|| format!("Failed to write {}", path.display()))?;
    }
    info!(path = %stamped.display(), "Audit report written");
    Ok(vec![stamped, latest])
}

fn print_scores(result: &RunResult) {
    let state = &result.state;
    println!("\nFinal scores:");
    for (criterion, score) in &state.final_scores {
        println!("  {:<32} {}/5", criterion, score);
    }
    if !state.errors.is_empty() {
        warn!(errors = state.errors.len(), "Run completed with degraded nodes");
        for error in &state.errors {
            println!("  ! {}", error);
        }
    }
    println!(
        "\nLLM calls: {}  tokens: {}  retries: {}  cache hits: {}  elapsed: {:.1}s",
        result.usage.llm_calls,
        result.usage.total_tokens,
        result.usage.retries,
        result.usage.cache_hits,
        result.elapsed.as_secs_f64()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_audit_flags() {
        let cli = Cli::try_parse_from([
            "tribunal",
            "audit",
            "--repo",
            "https://github.com/org/repo",
            "--report",
            "report.md",
            "--rubric",
            "rubric.json",
            "--resilient",
            "--json-logs",
        ])
        .unwrap();
        assert!(cli.json_logs);
        match cli.command {
            Commands::Audit { resilient, vision, output, .. } => {
                assert!(resilient);
                assert!(!vision);
                assert_eq!(output, PathBuf::from("audit"));
            }
            Commands::ValidateRubric { .. } => panic!("wrong subcommand"),
        }
    }
}
