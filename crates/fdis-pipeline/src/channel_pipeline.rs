//! # Stage chain
//!
//! Runs each stage in its own task, connected 1:1 by channels: stage N reads
//! the channel stage N-1 writes. With no stages the input receiver is handed
//! straight back as the output.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::channel;
use crate::run_completion::{ComponentTask, TaskOutput};
use crate::{ComponentRole, ContentReceiver, PipelineContext, PipelineError, Stage};

/// An ordered chain of stages waiting to be spawned.
pub struct StageChain {
    stages: Vec<Box<dyn Stage>>,
    context: Arc<PipelineContext>,
    channel_capacity: Option<usize>,
}

/// Result of spawning a chain.
pub struct SpawnedChain {
    /// Receiver of the last stage's output channel.
    pub output: ContentReceiver,
    pub tasks: Vec<ComponentTask>,
}

impl StageChain {
    pub fn new(context: Arc<PipelineContext>) -> Self {
        Self {
            stages: Vec::new(),
            context,
            channel_capacity: None,
        }
    }

    /// Use bounded channels between stages.
    pub fn with_channel_capacity(mut self, capacity: Option<usize>) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Append a stage to the end of the chain.
    pub fn add_stage(mut self, stage: Box<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Spawn one task per stage and chain them starting from `input`.
    ///
    /// Each task hands its stage back when it finishes so the stage is dropped
    /// by whoever settles the tasks, not as soon as its loop ends.
    pub fn spawn(self, input: ContentReceiver) -> SpawnedChain {
        let mut tasks = Vec::with_capacity(self.stages.len());
        let mut current_rx = input;

        for (index, mut stage) in self.stages.into_iter().enumerate() {
            let (next_tx, next_rx) = channel::with_capacity(self.channel_capacity);
            let context = self.context.clone();
            let stage_name = stage.name();

            let task = ComponentTask::spawn(stage_name.clone(), ComponentRole::Stage, async move {
                debug!(stage = %stage_name, position = index, "Stage started");
                let result = stage.process(current_rx, next_tx, &context).await;
                match &result {
                    Ok(outcomes) => info!(
                        stage = %stage_name,
                        outcomes = outcomes.len(),
                        "Stage finished"
                    ),
                    Err(PipelineError::Cancelled) => {
                        debug!(stage = %stage_name, "Stage cancelled")
                    }
                    Err(e) => error!(stage = %stage_name, error = %e, "Stage failed"),
                }
                TaskOutput::new(result).retaining(Box::new(stage))
            });

            tasks.push(task);
            current_rx = next_rx;
        }

        SpawnedChain {
            output: current_rx,
            tasks,
        }
    }
}
