use std::any::Any;
use std::future::Future;

use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::{ComponentReport, ComponentRole, Outcome, PipelineError};

/// A component handed back by its task so it outlives the run's data flow.
pub(crate) type Retained = Box<dyn Any + Send>;

/// What a component task resolves to.
pub struct TaskOutput {
    pub result: Result<Vec<Outcome>, PipelineError>,
    pub(crate) retained: Option<Retained>,
}

impl TaskOutput {
    pub fn new(result: Result<Vec<Outcome>, PipelineError>) -> Self {
        Self {
            result,
            retained: None,
        }
    }

    pub(crate) fn retaining(mut self, component: Retained) -> Self {
        self.retained = Some(component);
        self
    }
}

/// A spawned component task plus the identity it reports under.
pub struct ComponentTask {
    pub name: String,
    pub role: ComponentRole,
    handle: JoinHandle<TaskOutput>,
}

impl ComponentTask {
    pub fn spawn<F>(name: impl Into<String>, role: ComponentRole, fut: F) -> Self
    where
        F: Future<Output = TaskOutput> + Send + 'static,
    {
        Self {
            name: name.into(),
            role,
            handle: tokio::spawn(fut),
        }
    }
}

/// Wait for every task and turn its result into a [`ComponentReport`].
///
/// Tasks are awaited in order, but all of them run concurrently, so the total
/// wait is bounded by the slowest task. Semantics:
/// - `Ok(outcomes)` is reported as is.
/// - `Err(Cancelled)` becomes a cancelled outcome, not a failure.
/// - Any other error, or a panicked task, becomes a component failure.
///
/// Components that were handed back are returned so the caller decides when
/// to drop them.
pub async fn settle_components(
    tasks: Vec<ComponentTask>,
) -> (Vec<ComponentReport>, Vec<Box<dyn Any + Send>>) {
    let mut reports = Vec::with_capacity(tasks.len());
    let mut retained = Vec::new();

    for task in tasks {
        let report = ComponentReport::new(task.name, task.role);
        let report = match task.handle.await {
            Ok(output) => {
                retained.extend(output.retained);
                match output.result {
                    Ok(outcomes) => report.with_outcomes(outcomes),
                    Err(PipelineError::Cancelled) => {
                        let message = format!("{} cancelled", report.name);
                        report.with_outcomes(vec![Outcome::cancelled(message)])
                    }
                    Err(e) => {
                        error!(component = %report.name, role = %report.role, error = %e, "Component failed");
                        report.with_error(e)
                    }
                }
            }
            Err(join_error) if join_error.is_cancelled() => {
                let message = format!("{} aborted", report.name);
                report.with_outcomes(vec![Outcome::cancelled(message)])
            }
            Err(join_error) => {
                error!(component = %report.name, error = %join_error, "Component task panicked");
                report.with_error(PipelineError::TaskJoin(join_error.to_string()))
            }
        };
        debug!(
            component = %report.name,
            outcomes = report.outcomes.len(),
            failed = report.is_failed(),
            "Component settled"
        );
        reports.push(report);
    }

    (reports, retained)
}
