//! Rate limited pass-through.

use std::time::Duration;

use async_trait::async_trait;
use fdis_pipeline::{
    ComponentOptions, ContentReceiver, ContentSender, Outcome, PipelineContext, PipelineError,
    RateLimiter, Received, Stage,
};
use tracing::{debug, info};

const DEFAULT_INTERVAL_MS: u64 = 1000;

/// Forwards at most one item per `IntervalMs` milliseconds.
pub struct Throttle {
    limiter: RateLimiter,
}

impl Throttle {
    pub const NAME: &'static str = "Throttle";

    pub fn new(interval: Duration) -> Self {
        Self {
            limiter: RateLimiter::new(interval),
        }
    }

    pub fn from_options(options: &ComponentOptions) -> Result<Self, PipelineError> {
        let interval_ms = options.parse_or(Self::NAME, "IntervalMs", DEFAULT_INTERVAL_MS)?;
        Ok(Self::new(Duration::from_millis(interval_ms)))
    }
}

#[async_trait]
impl Stage for Throttle {
    fn name(&self) -> String {
        format!("{}[{}ms]", Self::NAME, self.limiter.interval().as_millis())
    }

    async fn process(
        &mut self,
        mut input: ContentReceiver,
        output: ContentSender,
        ctx: &PipelineContext,
    ) -> Result<Vec<Outcome>, PipelineError> {
        let mut forwarded = 0usize;

        loop {
            let item = match input.recv_cancellable(&ctx.token).await {
                Received::Item(item) => item,
                Received::Ended => break,
                Received::Cancelled => return Ok(cancelled()),
            };
            if self.limiter.wait_acquire_cancellable(&ctx.token).await.is_err() {
                return Ok(cancelled());
            }
            debug!(file = %item.file_name(), "Released");
            output.send_cancellable(item, &ctx.token).await?;
            forwarded += 1;
        }

        info!(forwarded, interval = ?self.limiter.interval(), "Throttle finished");
        Ok(Vec::new())
    }
}

fn cancelled() -> Vec<Outcome> {
    vec![Outcome::cancelled("throttle cancelled")]
}
