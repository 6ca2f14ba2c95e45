//! Ordered deployment plans.
//!
//! The order is authored, not computed. [`Plan::lint`] checks the authored
//! order statically; at run time each step's precondition check is what
//! catches an ordering mistake.

use std::collections::HashSet;
use std::fmt;

use crate::state::DeploymentState;
use crate::types::StoreKey;

use super::Step;

#[derive(Debug, Clone, Default)]
pub struct Plan {
    steps: Vec<Step>,
}

/// A problem found by [`Plan::lint`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LintIssue {
    DuplicateStep { step: String },
    DuplicateOutput { step: String, key: StoreKey },
    UnsatisfiedRequirement { step: String, key: StoreKey },
}

impl fmt::Display for LintIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LintIssue::DuplicateStep { step } => write!(f, "step '{step}' appears more than once"),
            LintIssue::DuplicateOutput { step, key } => {
                write!(f, "step '{step}' records {key}, which an earlier step already records")
            }
            LintIssue::UnsatisfiedRequirement { step, key } => write!(
                f,
                "step '{step}' requires {key}, which no earlier step records"
            ),
        }
    }
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: Step) {
        self.steps.push(step);
    }

    pub fn extend(&mut self, steps: impl IntoIterator<Item = Step>) {
        self.steps.extend(steps);
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|step| step.name() == name)
    }

    /// Steps whose output is not yet recorded in `state`.
    pub fn outstanding<'a>(&'a self, state: &'a DeploymentState) -> impl Iterator<Item = &'a Step> {
        self.steps
            .iter()
            .filter(move |step| !state.contains(step.produces()))
    }

    /// Check the authored order against `state`.
    ///
    /// A requirement is satisfied when an earlier step records it or it is
    /// already present in `state`.
    pub fn lint(&self, state: &DeploymentState) -> Vec<LintIssue> {
        let mut issues = Vec::new();
        let mut names = HashSet::new();
        let mut produced = HashSet::new();

        for step in &self.steps {
            if !names.insert(step.name()) {
                issues.push(LintIssue::DuplicateStep {
                    step: step.name().to_string(),
                });
            }
            for key in step.requires() {
                if !produced.contains(key) && !state.contains(key) {
                    issues.push(LintIssue::UnsatisfiedRequirement {
                        step: step.name().to_string(),
                        key: key.clone(),
                    });
                }
            }
            if !produced.insert(step.produces().clone()) {
                issues.push(LintIssue::DuplicateOutput {
                    step: step.name().to_string(),
                    key: step.produces().clone(),
                });
            }
        }
        issues
    }
}

impl FromIterator<Step> for Plan {
    fn from_iter<I: IntoIterator<Item = Step>>(iter: I) -> Self {
        Self {
            steps: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::types::{Address, ModuleId};

    fn ordered() -> Plan {
        Plan::from_iter([
            Step::upload("a", "a.wasm"),
            Step::instantiate("a", "a", json!({})),
            Step::execute("configure:a", "a", json!({"go": {}})),
        ])
    }

    #[test]
    fn ordered_plan_lints_clean() {
        assert!(ordered().lint(&DeploymentState::new()).is_empty());
    }

    #[test]
    fn misordered_plan_reports_requirement() {
        let plan = Plan::from_iter([
            Step::instantiate("a", "a", json!({})),
            Step::upload("a", "a.wasm"),
        ]);
        let issues = plan.lint(&DeploymentState::new());
        assert_eq!(
            issues,
            vec![LintIssue::UnsatisfiedRequirement {
                step: "instantiate:a".to_string(),
                key: StoreKey::module("a"),
            }]
        );
    }

    #[test]
    fn recorded_state_satisfies_requirements() {
        let plan = Plan::from_iter([Step::execute("configure:b", "b", json!({}))]);
        let mut state = DeploymentState::new();
        state.set_address("b", Address::new("addr-b")).unwrap();
        assert!(plan.lint(&state).is_empty());
    }

    #[test]
    fn duplicates_are_reported() {
        let plan = Plan::from_iter([Step::upload("a", "a.wasm"), Step::upload("a", "a.wasm")]);
        let issues = plan.lint(&DeploymentState::new());
        assert_eq!(issues.len(), 2);
    }

    #[test]
    fn outstanding_skips_recorded_steps() {
        let plan = ordered();
        let mut state = DeploymentState::new();
        state.set_module_id("a", ModuleId::new("1"), None).unwrap();
        let names: Vec<_> = plan.outstanding(&state).map(Step::name).collect();
        assert_eq!(names, vec!["instantiate:a", "configure:a"]);
    }
}
