use std::sync::Arc;

use super::backoff::{Sleeper, ThreadSleeper};
use super::sources::PlaceholderTier;
use super::{AttemptEnv, ImageContext, ImageResult, ImageSource};
use crate::logging::{LogRecord, LogSink};

/// Ordered image tiers ending in a placeholder. The placeholder lives outside
/// the tier list, so `acquire` has no failure path.
pub struct ImageChain {
    tiers: Vec<Box<dyn ImageSource>>,
    placeholder: PlaceholderTier,
    sleeper: Arc<dyn Sleeper>,
}

impl ImageChain {
    pub fn new(placeholder: PlaceholderTier) -> Self {
        Self {
            tiers: Vec::new(),
            placeholder,
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    pub fn with_tier<S: ImageSource + 'static>(mut self, tier: S) -> Self {
        self.tiers.push(Box::new(tier));
        self
    }

    pub fn push_tier(&mut self, tier: Box<dyn ImageSource>) {
        self.tiers.push(tier);
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn tier_labels(&self) -> Vec<&str> {
        self.tiers
            .iter()
            .map(|tier| tier.label())
            .chain(std::iter::once(PlaceholderTier::LABEL))
            .collect()
    }

    pub fn acquire(&self, context: &ImageContext<'_>, sink: &dyn LogSink) -> ImageResult {
        let env = AttemptEnv {
            sink,
            sleeper: self.sleeper.as_ref(),
        };

        for (index, tier) in self.tiers.iter().enumerate() {
            let message = if index == 0 {
                format!("Orchestrating visuals ({})...", tier.label())
            } else {
                format!("Fallback {}: {}...", index, tier.label())
            };
            sink.log(LogRecord::info(message));

            if let Some(result) = tier.attempt(context, &env) {
                return result;
            }
        }

        sink.log(LogRecord::warn(format!(
            "All image tiers exhausted for \"{}\"; using placeholder.",
            context.chapter_title
        )));
        self.placeholder.produce()
    }
}
