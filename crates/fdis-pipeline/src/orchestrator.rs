//! # Pipeline orchestrator
//!
//! Turns a [`PipelineConfig`] into running tasks and drives one run through
//! its states:
//!
//! ```text
//! Configuring -> Running -> Draining -> Completed
//!      \
//!       -> Failed (no source or sink, or one of them cannot be resolved)
//! ```
//!
//! Wiring: every source writes its own channel; several sources are merged
//! with a [`funnel`]; the merged stream runs through the [`StageChain`]; the
//! chain's output is fanned out with a [`broadcast`] when more than one sink
//! is configured.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::run_completion::{ComponentTask, TaskOutput};
use crate::{
    ComponentRegistry, ComponentRole, ContentReceiver, Outcome, OutcomeKind, PipelineConfig,
    PipelineContext, PipelineError, Receiver, RunReport, Sink, Source, Stage, StageChain,
    broadcast, channel, funnel, settle_components,
};

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Configuring,
    Running,
    Draining,
    Completed,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

struct Resolved {
    sources: Vec<Box<dyn Source>>,
    stages: Vec<Box<dyn Stage>>,
    sinks: Vec<Box<dyn Sink>>,
}

/// Runs configured pipelines against a component registry.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    registry: Arc<ComponentRegistry>,
}

impl Orchestrator {
    pub fn new(registry: Arc<ComponentRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Execute one run to completion.
    ///
    /// Returns `Err` only for configuration-phase failures, before any task
    /// has started. Everything after that, including cancellation through
    /// `token`, ends in a [`RunReport`].
    pub async fn run(
        &self,
        config: &PipelineConfig,
        token: CancellationToken,
    ) -> Result<RunReport, PipelineError> {
        let mut state = RunState::Configuring;
        info!(
            sources = config.sources.len(),
            stages = config.stages.len(),
            sinks = config.sinks.len(),
            concurrency = config.concurrency,
            "Configuring pipeline"
        );

        let resolved = match self.resolve(config) {
            Ok(resolved) => resolved,
            Err(e) => {
                transition(&mut state, RunState::Failed);
                warn!(error = %e, "Pipeline configuration failed");
                return Err(e);
            }
        };

        transition(&mut state, RunState::Running);
        let ctx = PipelineContext::arc_new(token.clone(), config.concurrency);
        let tasks = wire(resolved, &ctx, config.channel_capacity);

        transition(&mut state, RunState::Draining);
        let (components, retained) = settle_components(tasks).await;
        // Components (and any temporary artifacts they own) live until every
        // task, sinks included, has finished.
        debug!(count = retained.len(), "Releasing components");
        drop(retained);

        transition(&mut state, RunState::Completed);
        let mut report = RunReport::new(state, components);
        if token.is_cancelled() {
            report.run_outcomes.push(Outcome::cancelled("run cancelled"));
        }

        for component in &report.components {
            info!(
                component = %component.name,
                role = %component.role,
                succeeded = component.count(OutcomeKind::Success),
                failed = component.count(OutcomeKind::Failure),
                skipped = component.count(OutcomeKind::Skipped),
                cancelled = component.count(OutcomeKind::Cancelled),
                "Component summary"
            );
            for outcome in component.outcomes.iter().filter(|o| o.is_failure()) {
                warn!(component = %component.name, "{outcome}");
            }
        }
        info!("Pipeline finished: {report}");

        Ok(report)
    }

    fn resolve(&self, config: &PipelineConfig) -> Result<Resolved, PipelineError> {
        if config.sources.is_empty() {
            return Err(PipelineError::Configuration(
                "no source configured".to_string(),
            ));
        }
        if config.sinks.is_empty() {
            return Err(PipelineError::Configuration("no sink configured".to_string()));
        }

        let sources = config
            .sources
            .iter()
            .map(|spec| self.registry.create_source(spec))
            .collect::<Result<Vec<_>, _>>()?;

        let stages = config
            .stages
            .iter()
            .filter_map(|spec| match self.registry.create_stage(spec) {
                Ok(stage) => Some(stage),
                Err(e) => {
                    warn!(stage = %spec.type_name, error = %e, "Omitting stage from the chain");
                    None
                }
            })
            .collect();

        let sinks = config
            .sinks
            .iter()
            .map(|spec| self.registry.create_sink(spec))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Resolved {
            sources,
            stages,
            sinks,
        })
    }
}

fn transition(state: &mut RunState, next: RunState) {
    debug!(from = %state, to = %next, "Run state changed");
    *state = next;
}

/// Spawn every task of the run, in data-flow order.
fn wire(
    resolved: Resolved,
    ctx: &Arc<PipelineContext>,
    channel_capacity: Option<usize>,
) -> Vec<ComponentTask> {
    let Resolved {
        sources,
        stages,
        sinks,
    } = resolved;
    let mut tasks = Vec::new();

    let mut source_outputs = Vec::with_capacity(sources.len());
    for mut source in sources {
        let (tx, rx) = channel::with_capacity(channel_capacity);
        let ctx = ctx.clone();
        let name = source.name();
        tasks.push(ComponentTask::spawn(name, ComponentRole::Source, async move {
            let result = source.provide(Receiver::empty(), tx, &ctx).await;
            TaskOutput::new(result).retaining(Box::new(source))
        }));
        source_outputs.push(rx);
    }

    let merged = if source_outputs.len() == 1 {
        source_outputs.remove(0)
    } else {
        let (merged, handle) = funnel(source_outputs, ctx.token.clone());
        tasks.push(ComponentTask::spawn("Funnel", ComponentRole::Connector, async move {
            TaskOutput::new(match handle.await {
                Ok(result) => result.map(|forwarded| {
                    debug!(forwarded, "Funnel drained");
                    Vec::new()
                }),
                Err(e) => Err(PipelineError::TaskJoin(e.to_string())),
            })
        }));
        merged
    };

    let chain = stages.into_iter().fold(
        StageChain::new(ctx.clone()).with_channel_capacity(channel_capacity),
        StageChain::add_stage,
    );
    let spawned = chain.spawn(merged);
    tasks.extend(spawned.tasks);

    let sink_inputs: Vec<ContentReceiver> = if sinks.len() == 1 {
        vec![spawned.output]
    } else {
        let (receivers, handle) = broadcast(spawned.output, sinks.len(), ctx.token.clone());
        tasks.push(ComponentTask::spawn("Broadcast", ComponentRole::Connector, async move {
            TaskOutput::new(match handle.await {
                Ok(result) => result.map(|stats| {
                    debug!(items = stats.items, receivers = stats.receivers, "Broadcast drained");
                    Vec::new()
                }),
                Err(e) => Err(PipelineError::TaskJoin(e.to_string())),
            })
        }));
        receivers
    };

    for (mut sink, input) in sinks.into_iter().zip(sink_inputs) {
        let ctx = ctx.clone();
        let name = sink.name();
        tasks.push(ComponentTask::spawn(name, ComponentRole::Sink, async move {
            let result = sink.consume(input, &ctx).await;
            TaskOutput::new(result).retaining(Box::new(sink))
        }));
    }

    tasks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_tracing;
    use crate::{ComponentSpec, ContentDescriptor, ContentSender, Received};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn item(name: &str) -> ContentDescriptor {
        ContentDescriptor::new(name, "", name, 1)
    }

    /// Emits the comma-separated names in its `Items` option.
    struct ListSource {
        items: Vec<String>,
    }

    #[async_trait]
    impl Source for ListSource {
        fn name(&self) -> String {
            "ListSource".to_string()
        }

        async fn provide(
            &mut self,
            _input: ContentReceiver,
            output: ContentSender,
            _ctx: &PipelineContext,
        ) -> Result<Vec<Outcome>, PipelineError> {
            for name in &self.items {
                output.send(item(name)).await?;
            }
            Ok(vec![Outcome::success(format!("listed {}", self.items.len()))])
        }
    }

    /// Emits an item every few milliseconds until cancelled.
    struct Ticker;

    #[async_trait]
    impl Source for Ticker {
        fn name(&self) -> String {
            "Ticker".to_string()
        }

        async fn provide(
            &mut self,
            _input: ContentReceiver,
            output: ContentSender,
            ctx: &PipelineContext,
        ) -> Result<Vec<Outcome>, PipelineError> {
            let mut n = 0u64;
            loop {
                tokio::select! {
                    biased;
                    _ = ctx.token.cancelled() => {
                        return Ok(vec![Outcome::cancelled(format!("ticker stopped after {n}"))]);
                    }
                    _ = tokio::time::sleep(Duration::from_millis(2)) => {}
                }
                output.send(item(&n.to_string())).await?;
                n += 1;
            }
        }
    }

    /// Upper-cases file names; flags when it is dropped.
    struct Upper {
        dropped: Arc<AtomicBool>,
    }

    impl Drop for Upper {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Stage for Upper {
        fn name(&self) -> String {
            "Upper".to_string()
        }

        async fn process(
            &mut self,
            mut input: ContentReceiver,
            output: ContentSender,
            ctx: &PipelineContext,
        ) -> Result<Vec<Outcome>, PipelineError> {
            let mut outcomes = Vec::new();
            loop {
                match input.recv_cancellable(&ctx.token).await {
                    Received::Item(item) => {
                        let upper = item.file_name().to_uppercase();
                        output.send(item.with_file_name(upper)).await?;
                        outcomes.push(Outcome::success("upper"));
                    }
                    Received::Ended => break,
                    Received::Cancelled => {
                        outcomes.push(Outcome::cancelled("upper cancelled"));
                        break;
                    }
                }
            }
            Ok(outcomes)
        }
    }

    /// Records every name it receives, and whether the `Upper` stage was
    /// still alive when its input ended.
    struct Collect {
        seen: Arc<Mutex<Vec<String>>>,
        stage_dropped: Arc<AtomicBool>,
        stage_alive_at_end: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Sink for Collect {
        fn name(&self) -> String {
            "Collect".to_string()
        }

        async fn consume(
            &mut self,
            mut input: ContentReceiver,
            ctx: &PipelineContext,
        ) -> Result<Vec<Outcome>, PipelineError> {
            let mut outcomes = Vec::new();
            loop {
                match input.recv_cancellable(&ctx.token).await {
                    Received::Item(item) => {
                        self.seen
                            .lock()
                            .unwrap()
                            .push(item.file_name().to_string());
                        outcomes.push(Outcome::success(format!("collected {item}")));
                    }
                    Received::Ended => break,
                    Received::Cancelled => {
                        outcomes.push(Outcome::cancelled("collect cancelled"));
                        break;
                    }
                }
            }
            self.stage_alive_at_end
                .store(!self.stage_dropped.load(Ordering::SeqCst), Ordering::SeqCst);
            Ok(outcomes)
        }
    }

    struct Broken;

    #[async_trait]
    impl Sink for Broken {
        fn name(&self) -> String {
            "Broken".to_string()
        }

        async fn consume(
            &mut self,
            input: ContentReceiver,
            _ctx: &PipelineContext,
        ) -> Result<Vec<Outcome>, PipelineError> {
            let items = input.collect().await;
            Ok(items
                .iter()
                .map(|i| Outcome::failure(format!("could not write {i}")))
                .collect())
        }
    }

    struct Fixture {
        seen: Arc<Mutex<Vec<String>>>,
        stage_dropped: Arc<AtomicBool>,
        stage_alive_at_end: Arc<AtomicBool>,
        orchestrator: Orchestrator,
    }

    fn fixture() -> Fixture {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let stage_dropped = Arc::new(AtomicBool::new(false));
        let stage_alive_at_end = Arc::new(AtomicBool::new(false));

        let registry = {
            let seen = seen.clone();
            let stage_dropped = stage_dropped.clone();
            let sink_dropped = stage_dropped.clone();
            let alive = stage_alive_at_end.clone();
            ComponentRegistry::builder()
                .source("List", |options| {
                    let items = options
                        .require("List", "Items")?
                        .split(',')
                        .map(str::to_string)
                        .collect();
                    Ok(Box::new(ListSource { items }))
                })
                .source("Ticker", |_| Ok(Box::new(Ticker)))
                .stage("Upper", move |_| {
                    Ok(Box::new(Upper {
                        dropped: stage_dropped.clone(),
                    }))
                })
                .sink("Collect", move |_| {
                    Ok(Box::new(Collect {
                        seen: seen.clone(),
                        stage_dropped: sink_dropped.clone(),
                        stage_alive_at_end: alive.clone(),
                    }))
                })
                .sink("Broken", |_| Ok(Box::new(Broken)))
                .build()
        };

        Fixture {
            seen,
            stage_dropped,
            stage_alive_at_end,
            orchestrator: Orchestrator::new(Arc::new(registry)),
        }
    }

    fn config(sources: &[ComponentSpec], stages: &[&str], sinks: &[&str]) -> PipelineConfig {
        PipelineConfig {
            concurrency: 2,
            sources: sources.to_vec(),
            stages: stages.iter().map(|s| ComponentSpec::new(*s)).collect(),
            sinks: sinks.iter().map(|s| ComponentSpec::new(*s)).collect(),
            ..PipelineConfig::default()
        }
    }

    fn list(items: &str) -> ComponentSpec {
        ComponentSpec::new("List").with_option("Items", items)
    }

    #[tokio::test]
    async fn test_single_source_stage_sink() {
        init_tracing();
        let f = fixture();
        let config = config(&[list("a,b,c")], &["Upper"], &["Collect"]);

        let report = f
            .orchestrator
            .run(&config, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.state, RunState::Completed);
        assert!(report.is_success());
        assert_eq!(*f.seen.lock().unwrap(), vec!["A", "B", "C"]);
        assert_eq!(report.component("Collect").unwrap().outcomes.len(), 3);
        assert_eq!(
            report
                .components
                .iter()
                .map(|c| c.role)
                .collect::<Vec<_>>(),
            vec![ComponentRole::Source, ComponentRole::Stage, ComponentRole::Sink]
        );
    }

    #[tokio::test]
    async fn test_funnel_and_broadcast_wiring() {
        let f = fixture();
        let config = config(
            &[list("a,b"), list("c")],
            &["Upper"],
            &["Collect", "Collect"],
        );

        let report = f
            .orchestrator
            .run(&config, CancellationToken::new())
            .await
            .unwrap();

        assert!(report.is_success());
        assert!(report.component("Funnel").is_some());
        assert!(report.component("Broadcast").is_some());

        let mut seen = f.seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["A", "A", "B", "B", "C", "C"]);
        for sink in report.by_role(ComponentRole::Sink) {
            assert_eq!(sink.count(OutcomeKind::Success), 3);
        }
    }

    #[tokio::test]
    async fn test_components_outlive_the_data_flow() {
        let f = fixture();
        let config = config(&[list("a")], &["Upper"], &["Collect"]);

        f.orchestrator
            .run(&config, CancellationToken::new())
            .await
            .unwrap();

        assert!(f.stage_alive_at_end.load(Ordering::SeqCst));
        assert!(f.stage_dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_missing_sink_fails_before_running() {
        let f = fixture();
        let err = f
            .orchestrator
            .run(&config(&[list("a")], &[], &[]), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(f.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_source_is_fatal() {
        let f = fixture();
        let err = f
            .orchestrator
            .run(
                &config(&[ComponentSpec::new("Nope")], &[], &["Collect"]),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Resolution {
                role: ComponentRole::Source,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_invalid_source_options_are_fatal() {
        let f = fixture();
        let err = f
            .orchestrator
            .run(
                &config(&[ComponentSpec::new("List")], &[], &["Collect"]),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidOption { .. }));
    }

    #[tokio::test]
    async fn test_unknown_stage_is_omitted() {
        let f = fixture();
        let config = config(&[list("a,b")], &["Nope", "Upper"], &["Collect"]);

        let report = f
            .orchestrator
            .run(&config, CancellationToken::new())
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.by_role(ComponentRole::Stage).count(), 1);
        assert_eq!(*f.seen.lock().unwrap(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_failed_outcomes_fail_the_run() {
        let f = fixture();
        let config = config(&[list("a,b")], &[], &["Collect", "Broken"]);

        let report = f
            .orchestrator
            .run(&config, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.state, RunState::Completed);
        assert!(!report.is_success());
        assert_eq!(report.failures(), 2);
        assert_eq!(report.exit_code(), 1);
        assert_eq!(f.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cancellation_drains_and_marks_the_run() {
        let f = fixture();
        let config = config(
            &[ComponentSpec::new("Ticker")],
            &["Upper"],
            &["Collect", "Collect"],
        );
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let report = tokio::time::timeout(
            Duration::from_secs(5),
            f.orchestrator.run(&config, token),
        )
        .await
        .expect("cancelled run must drain")
        .unwrap();

        assert_eq!(report.state, RunState::Completed);
        assert!(report.was_cancelled());
        assert_eq!(report.exit_code(), 130);
        assert_eq!(report.failures(), 0);
        assert!(report.count(OutcomeKind::Cancelled) >= 2);
        assert!(RunState::Completed.is_terminal());
    }
}
