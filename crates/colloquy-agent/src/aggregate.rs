use std::sync::Arc;

use tracing::{debug, info};

use colloquy_core::error::Result;
use colloquy_core::traits::{GenerationTask, Generator};
use colloquy_core::types::{AggregateResult, BranchResult};

/// Separator between report sections.
pub const SECTION_SEPARATOR: &str = "\n\n";

/// Combines branch results into one document with a generated introduction.
pub struct Aggregator {
    generator: Arc<dyn Generator>,
}

impl Aggregator {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }

    /// Join section texts in the given order and prepend an introduction.
    ///
    /// With no results the generator is not called and the aggregate is empty.
    pub async fn aggregate(&self, topic: &str, results: &[BranchResult]) -> Result<AggregateResult> {
        if results.is_empty() {
            debug!("No branch results, skipping introduction");
            return Ok(AggregateResult::default());
        }

        let sections: Vec<String> = results.iter().map(|r| r.text.clone()).collect();
        let body = sections.join(SECTION_SEPARATOR);

        let header = self
            .generator
            .generate(GenerationTask::Introduction { topic, body: &body })
            .await?;

        info!(sections = sections.len(), "Report assembled");
        Ok(AggregateResult {
            header,
            sections,
            body,
        })
    }
}
