//! Outcome aggregation for a finished run.

use std::fmt;

use crate::{ComponentRole, Outcome, OutcomeKind, RunState};

/// Everything one component reported.
#[derive(Debug, Clone)]
pub struct ComponentReport {
    pub name: String,
    pub role: ComponentRole,
    pub outcomes: Vec<Outcome>,
    /// Set when the component task itself failed rather than an item.
    pub error: Option<String>,
}

impl ComponentReport {
    pub fn new(name: impl Into<String>, role: ComponentRole) -> Self {
        Self {
            name: name.into(),
            role,
            outcomes: Vec::new(),
            error: None,
        }
    }

    pub fn with_outcomes(mut self, outcomes: Vec<Outcome>) -> Self {
        self.outcomes = outcomes;
        self
    }

    /// Record a component-level failure. It is also added as a failed outcome
    /// so it counts against the run.
    pub fn with_error(mut self, error: impl fmt::Display) -> Self {
        let message = error.to_string();
        self.outcomes
            .push(Outcome::failure(format!("{} failed: {message}", self.name)));
        self.error = Some(message);
        self
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some() || self.outcomes.iter().any(Outcome::is_failure)
    }

    pub fn count(&self, kind: OutcomeKind) -> usize {
        self.outcomes.iter().filter(|o| o.kind() == kind).count()
    }
}

/// Aggregated result of [`Orchestrator::run`](crate::Orchestrator::run).
#[derive(Debug, Clone)]
pub struct RunReport {
    pub state: RunState,
    pub components: Vec<ComponentReport>,
    /// Run-level markers, e.g. the cancellation notice.
    pub run_outcomes: Vec<Outcome>,
}

impl RunReport {
    pub fn new(state: RunState, components: Vec<ComponentReport>) -> Self {
        Self {
            state,
            components,
            run_outcomes: Vec::new(),
        }
    }

    /// Every outcome: run-level markers first, then per component in order.
    pub fn outcomes(&self) -> impl Iterator<Item = &Outcome> {
        self.run_outcomes
            .iter()
            .chain(self.components.iter().flat_map(|c| c.outcomes.iter()))
    }

    pub fn count(&self, kind: OutcomeKind) -> usize {
        self.outcomes().filter(|o| o.kind() == kind).count()
    }

    pub fn failures(&self) -> usize {
        self.count(OutcomeKind::Failure)
    }

    pub fn was_cancelled(&self) -> bool {
        self.run_outcomes
            .iter()
            .any(|o| o.kind() == OutcomeKind::Cancelled)
    }

    /// No failed outcome anywhere in the run.
    pub fn is_success(&self) -> bool {
        self.state == RunState::Completed && self.failures() == 0
    }

    /// Process exit status: 0 on success, 130 when cancelled, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.was_cancelled() {
            130
        } else if self.is_success() {
            0
        } else {
            1
        }
    }

    pub fn component(&self, name: &str) -> Option<&ComponentReport> {
        self.components.iter().find(|c| c.name == name)
    }

    /// Reports of all components with the given role, in wiring order.
    pub fn by_role(&self, role: ComponentRole) -> impl Iterator<Item = &ComponentReport> {
        self.components.iter().filter(move |c| c.role == role)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}: {} succeeded, {} failed, {} skipped, {} cancelled",
            self.state,
            self.count(OutcomeKind::Success),
            self.count(OutcomeKind::Failure),
            self.count(OutcomeKind::Skipped),
            self.count(OutcomeKind::Cancelled),
        )
    }
}
