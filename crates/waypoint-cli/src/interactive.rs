//! Deployment summary and confirmation prompt.

use std::io::{self, Write};

use anyhow::Result;
use console::style;
use dialoguer::{Confirm, theme::ColorfulTheme};

use waypoint_core::status::DeploymentStatus;

/// What the operator decided at the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Proceed,
    /// Every step is recorded and no flows are wanted
    NothingToDo,
    Declined,
}

/// Shows what a deploy is about to do and asks before sending anything.
pub struct ConfirmDeploy<W: Write = io::Stdout> {
    /// Skip the prompt
    yes: bool,
    /// Validation flows run after the plan
    flows: bool,
    /// Output writer (for testing)
    writer: W,
    theme: ColorfulTheme,
}

impl ConfirmDeploy<io::Stdout> {
    pub fn new(yes: bool) -> Self {
        Self::with_writer(yes, io::stdout())
    }
}

impl<W: Write> ConfirmDeploy<W> {
    pub fn with_writer(yes: bool, writer: W) -> Self {
        Self {
            yes,
            flows: false,
            writer,
            theme: ColorfulTheme::default(),
        }
    }

    pub fn with_flows(mut self, flows: bool) -> Self {
        self.flows = flows;
        self
    }

    /// Print the summary and ask whether to proceed.
    pub fn run(
        &mut self,
        chain_id: &str,
        node: &str,
        status: &DeploymentStatus,
    ) -> Result<Decision> {
        writeln!(self.writer)?;
        writeln!(self.writer, "{}", style("  Deployment").bold())?;
        writeln!(self.writer, "  ───────────────────────────")?;
        writeln!(self.writer, "  Chain:    {}", style(chain_id).green())?;
        writeln!(self.writer, "  Node:     {}", style(node).green())?;
        writeln!(self.writer, "  State:    {}", style(&status.key).green())?;
        writeln!(
            self.writer,
            "  Steps:    {} of {} outstanding",
            style(status.summary.outstanding).yellow(),
            status.summary.total_steps
        )?;
        if status.summary.pending > 0 {
            writeln!(
                self.writer,
                "  Pending:  {} unconfirmed transaction(s) will be looked up first",
                style(status.summary.pending).yellow()
            )?;
        }
        if self.flows {
            writeln!(self.writer, "  Flows:    {}", style("enabled").yellow())?;
        }
        writeln!(self.writer)?;

        let prompt = if !status.summary.is_complete() {
            "Send transactions?"
        } else if self.flows {
            writeln!(self.writer, "  All steps recorded; only the validation flows will run.")?;
            "Run validation flows?"
        } else {
            writeln!(self.writer, "  Nothing to do.")?;
            return Ok(Decision::NothingToDo);
        };
        if self.yes {
            return Ok(Decision::Proceed);
        }

        let confirmed = Confirm::with_theme(&self.theme)
            .with_prompt(prompt)
            .default(false)
            .interact()?;
        Ok(if confirmed {
            Decision::Proceed
        } else {
            Decision::Declined
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use waypoint_core::status::StatusSummary;

    use super::*;

    fn status(outstanding: usize) -> DeploymentStatus {
        DeploymentStatus {
            key: "pion-1-owner".to_string(),
            modules: BTreeMap::new(),
            contracts: BTreeMap::new(),
            completed_actions: Vec::new(),
            pending: BTreeMap::new(),
            outstanding: vec!["upload:oracle".to_string(); outstanding],
            summary: StatusSummary {
                total_steps: 3,
                done: 3 - outstanding,
                outstanding,
                pending: 0,
            },
        }
    }

    #[test]
    fn yes_skips_the_prompt() {
        let mut out = Vec::new();
        let proceed = ConfirmDeploy::with_writer(true, &mut out)
            .run("pion-1", "https://rpc", &status(2))
            .unwrap();
        assert_eq!(proceed, Decision::Proceed);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("pion-1-owner"));
    }

    #[test]
    fn complete_deployment_does_not_proceed() {
        let mut out = Vec::new();
        let proceed = ConfirmDeploy::with_writer(true, &mut out)
            .run("pion-1", "https://rpc", &status(0))
            .unwrap();
        assert_eq!(proceed, Decision::NothingToDo);
        assert!(String::from_utf8(out).unwrap().contains("Nothing to do"));
    }

    #[test]
    fn complete_deployment_still_runs_flows() {
        let mut out = Vec::new();
        let decision = ConfirmDeploy::with_writer(true, &mut out)
            .with_flows(true)
            .run("pion-1", "https://rpc", &status(0))
            .unwrap();
        assert_eq!(decision, Decision::Proceed);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("only the validation flows"));
        assert!(!text.contains("Nothing to do"));
    }
}
