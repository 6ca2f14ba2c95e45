//! Waypoint - resumable contract deployment
//!
//! Usage:
//!   waypoint deploy            # Run outstanding steps, then enabled flows
//!   waypoint deploy --dry-run  # Rehearse against an in-memory chain
//!   waypoint plan              # List steps and what is already done
//!   waypoint status            # Show recorded progress
//!   waypoint validate          # Run validation flows
//!   waypoint resolve <step>    # Forget an unconfirmed transaction

mod interactive;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use waypoint_core::context::AppContext;
use waypoint_core::flows::{FlowReport, configured_flows};
use waypoint_core::pipeline::{PipelineError, RunReport, RunStatus, StepReport};
use waypoint_core::service::{self, DeployOptions, DeployOutcome};
use waypoint_core::state::load_or_default;
use waypoint_core::status::{DeploymentStatus, collect_status};

use crate::interactive::{ConfirmDeploy, Decision};

#[derive(Parser)]
#[command(name = "waypoint")]
#[command(about = "Resumable multi-contract deployment", long_about = None)]
struct Cli {
    /// Deployment config
    #[arg(long, short, global = true, default_value = "waypoint.toml")]
    config: PathBuf,

    /// Directory holding progress documents (default: per-user state dir)
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every outstanding step of the deployment
    Deploy {
        /// Rehearse against an in-memory chain; nothing is broadcast or saved
        #[arg(long)]
        dry_run: bool,

        /// Run validation flows afterwards even if the config does not enable them
        #[arg(long)]
        flows: bool,

        /// Skip the confirmation prompt (for CI/CD)
        #[arg(short = 'y', long)]
        yes: bool,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// List the plan's steps and which are already done
    Plan {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Show recorded progress
    Status {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Run the validation flows against the recorded contracts
    Validate {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Forget the unconfirmed transaction recorded for a step
    ///
    /// Inspect the transaction on a block explorer first. If it did land,
    /// record its effect by hand instead; the next deploy resends the step.
    Resolve {
        /// Step name, e.g. `configure:oracle:price-source:untrn`
        step: String,
    },
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// Machine-readable JSON
    Json,
}

fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "waypoint=info,waypoint_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run_cli(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {:#}", style("error:").red().bold(), err);
            ExitCode::FAILURE
        }
    }
}

fn run_cli(cli: Cli) -> Result<ExitCode> {
    let ctx = AppContext::load(&cli.config, cli.state_dir)?;
    match cli.command {
        Commands::Deploy {
            dry_run,
            flows,
            yes,
            format,
        } => run_deploy(&ctx, DeployOptions { dry_run, flows }, yes, format),
        Commands::Plan { format } => {
            run_plan(&ctx, format)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Status { format } => {
            run_status(&ctx, format)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Validate { format } => {
            run_validate(&ctx, format)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Resolve { step } => {
            let store = ctx.state_store();
            let key = ctx.state_key()?;
            let tx_hash = service::resolve_pending(&store, &key, &ctx.plan(), &step)?;
            println!(
                "Cleared pending transaction {} for {}",
                style(tx_hash).cyan(),
                style(&step).bold()
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_deploy(
    ctx: &AppContext,
    opts: DeployOptions,
    yes: bool,
    format: OutputFormat,
) -> Result<ExitCode> {
    if !opts.dry_run {
        let status = collect_status(&ctx.state_store(), &ctx.state_key()?, &ctx.plan())?;
        let chain = &ctx.config().chain;
        let decision = ConfirmDeploy::new(yes)
            .with_flows(opts.flows || ctx.config().flows.enabled)
            .run(&chain.chain_id, &chain.node, &status)?;
        if let Some(code) = halt_code(decision) {
            return Ok(code);
        }
    }

    match service::deploy(ctx, opts) {
        Ok(outcome) => {
            match format {
                OutputFormat::Table => print_outcome(&outcome),
                OutputFormat::Json => print_json(&outcome)?,
            }
            if let Some(failure) = &outcome.flow_failure {
                eprintln!("{} {}", style("error:").red().bold(), failure);
                return Ok(ExitCode::FAILURE);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            if let Some(report) = err.downcast_ref::<PipelineError>().and_then(|e| e.report()) {
                match format {
                    OutputFormat::Table => print_run(report),
                    OutputFormat::Json => print_json(report)?,
                }
            }
            Err(err)
        }
    }
}

/// Exit code for a deploy that stops at the prompt.
fn halt_code(decision: Decision) -> Option<ExitCode> {
    match decision {
        Decision::Proceed => None,
        Decision::NothingToDo => Some(ExitCode::SUCCESS),
        Decision::Declined => {
            eprintln!("{}", style("Aborted; nothing was sent.").yellow());
            Some(ExitCode::FAILURE)
        }
    }
}

fn run_plan(ctx: &AppContext, format: OutputFormat) -> Result<()> {
    let plan = ctx.plan();
    let state = load_or_default(&ctx.state_store(), &ctx.state_key()?)?;
    let issues = plan.lint(&state);

    match format {
        OutputFormat::Table => {
            println!("  {:<6} {:<55} Produces", "", "Step");
            println!("  {}", "-".repeat(90));
            for step in plan.steps() {
                let marker = if state.contains(step.produces()) {
                    style("done").green()
                } else if state.pending_tx(step.name()).is_some() {
                    style("tx?").yellow()
                } else {
                    style("todo").dim()
                };
                println!(
                    "  {:<6} {:<55} {}",
                    marker,
                    truncate(step.name(), 55),
                    step.produces()
                );
            }
            println!();
            for issue in &issues {
                println!("{} {}", style("warning:").yellow(), issue);
            }
        }
        OutputFormat::Json => {
            let steps: Vec<_> = plan
                .steps()
                .iter()
                .map(|step| {
                    let requires: Vec<_> = step.requires().iter().map(ToString::to_string).collect();
                    serde_json::json!({
                        "name": step.name(),
                        "requires": requires,
                        "produces": step.produces().to_string(),
                        "done": state.contains(step.produces()),
                        "pending_tx": state.pending_tx(step.name()),
                    })
                })
                .collect();
            let output = serde_json::json!({
                "steps": steps,
                "issues": issues.iter().map(ToString::to_string).collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

fn run_status(ctx: &AppContext, format: OutputFormat) -> Result<()> {
    let status = collect_status(&ctx.state_store(), &ctx.state_key()?, &ctx.plan())?;
    match format {
        OutputFormat::Table => print_status(&status),
        OutputFormat::Json => {
            let output = serde_json::json!({
                "schema_version": 1,
                "state_dir": ctx.state_dir(),
                "status": status,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

fn run_validate(ctx: &AppContext, format: OutputFormat) -> Result<()> {
    let flows = configured_flows(ctx.config());
    if flows.is_empty() {
        println!(
            "No flows configured. Add a [flows] section to {}.",
            ctx.config_path().display()
        );
        return Ok(());
    }
    let mut chain = ctx.chain();
    tracing::info!(
        binary = %chain.options().binary,
        node = %chain.options().node,
        flows = flows.len(),
        "Running validation flows"
    );
    let key = ctx.state_key()?;
    let reports = service::run_flows(&ctx.state_store(), &key, &mut chain, &flows)?;
    match format {
        OutputFormat::Table => print_flows(&reports),
        OutputFormat::Json => print_json(&reports)?,
    }
    Ok(())
}

fn print_outcome(outcome: &DeployOutcome) {
    if outcome.dry_run {
        println!("{}", style("Dry run: nothing was broadcast or saved").yellow());
    }
    print_run(&outcome.report);
    if !outcome.flows.is_empty() {
        println!();
        print_flows(&outcome.flows);
    }
}

fn print_run(report: &RunReport) {
    for step in &report.steps {
        match step {
            StepReport::Skipped { step } => {
                println!("  {} {}", style("skip").dim(), step);
            }
            StepReport::Executed {
                step,
                tx_hash,
                gas_used,
            } => {
                println!(
                    "  {} {:<55} gas {:>9}  {}",
                    style("done").green(),
                    truncate(step, 55),
                    gas_used,
                    style(tx_hash).dim()
                );
            }
            StepReport::Recovered { step, tx_hash } => {
                println!(
                    "  {} {:<55} {}",
                    style("recv").cyan(),
                    truncate(step, 55),
                    style(tx_hash).dim()
                );
            }
        }
    }
    println!();
    let status = match report.status {
        RunStatus::Completed => style("completed").green().bold(),
        RunStatus::Failed => style("failed").red().bold(),
        RunStatus::Pending | RunStatus::Running => style("incomplete").yellow().bold(),
    };
    println!(
        "Deployment {} {}: {} executed, {} skipped, {} gas",
        report.key,
        status,
        report.executed(),
        report.skipped(),
        report.gas_used()
    );
}

fn print_status(status: &DeploymentStatus) {
    println!("State: {}", status.key);
    println!();

    if !status.modules.is_empty() {
        println!("Modules ({}):", status.modules.len());
        for (name, id) in &status.modules {
            println!("  {:<20} {}", name, id);
        }
        println!();
    }

    if !status.contracts.is_empty() {
        println!("Contracts ({}):", status.contracts.len());
        for (name, address) in &status.contracts {
            println!("  {:<20} {}", name, address);
        }
        println!();
    }

    if !status.pending.is_empty() {
        println!("Unconfirmed transactions ({}):", status.pending.len());
        for (step, tx_hash) in &status.pending {
            println!("  {:<55} {}", truncate(step, 55), tx_hash);
        }
        println!();
    }

    let summary = &status.summary;
    if summary.is_complete() {
        println!("Summary: {} steps, all done", summary.total_steps);
    } else {
        println!(
            "Summary: {} of {} steps done, next: {} (run 'waypoint deploy' to continue)",
            summary.done,
            summary.total_steps,
            status.outstanding.first().map(String::as_str).unwrap_or("-")
        );
    }
}

fn print_flows(reports: &[FlowReport]) {
    for report in reports {
        println!("Flow {}:", style(&report.flow).bold());
        for action in &report.actions {
            println!(
                "  {} {:<20} {} check(s), gas {}",
                style("ok").green(),
                action.action,
                action.checks_passed,
                action.gas_used
            );
        }
    }
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use std::process::ExitCode;

    use super::{Cli, Commands, Decision, halt_code, truncate};
    use clap::Parser;

    #[test]
    fn declined_prompt_fails_the_command() {
        let code = halt_code(Decision::Declined).expect("declined run halts");
        assert_eq!(format!("{code:?}"), format!("{:?}", ExitCode::FAILURE));
        let code = halt_code(Decision::NothingToDo).expect("finished run halts");
        assert_eq!(format!("{code:?}"), format!("{:?}", ExitCode::SUCCESS));
        assert!(halt_code(Decision::Proceed).is_none());
    }

    #[test]
    fn deploy_flags_parse() {
        let cli = Cli::try_parse_from(["waypoint", "deploy", "--dry-run", "-y"]).unwrap();
        match cli.command {
            Commands::Deploy {
                dry_run, yes, flows, ..
            } => {
                assert!(dry_run);
                assert!(yes);
                assert!(!flows);
            }
            _ => panic!("expected deploy"),
        }
        assert_eq!(cli.config.to_str(), Some("waypoint.toml"));
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from([
            "waypoint",
            "status",
            "--config",
            "testnet.toml",
            "--state-dir",
            "/tmp/wp",
            "--format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.config.to_str(), Some("testnet.toml"));
        assert_eq!(cli.state_dir.as_deref().and_then(|p| p.to_str()), Some("/tmp/wp"));
    }

    #[test]
    fn resolve_requires_step() {
        assert!(Cli::try_parse_from(["waypoint", "resolve"]).is_err());
        let cli = Cli::try_parse_from(["waypoint", "resolve", "upload:oracle"]).unwrap();
        assert!(matches!(cli.command, Commands::Resolve { step } if step == "upload:oracle"));
    }

    #[test]
    fn truncate_long_names() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("configure:oracle", 10), "configu...");
    }
}
