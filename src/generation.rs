//! Answer generation from question plus retrieved context.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::{with_deadline, Result, DEP_LLM};
use crate::llm::LanguageModel;
use crate::pipeline::{RequestState, Stage, StateUpdate};

pub fn build_prompt(context: &str, question: &str) -> String {
    format!(
        "You are an expert research assistant. Use the provided context AND your general knowledge.\n\
         Context: {}\n\
         Question: {}\n\
         Answer:",
        context, question
    )
}

pub struct GenerationStage {
    model: Arc<dyn LanguageModel>,
    timeout_secs: u64,
}

impl GenerationStage {
    pub fn new(model: Arc<dyn LanguageModel>, timeout_secs: u64) -> Self {
        Self {
            model,
            timeout_secs,
        }
    }
}

#[async_trait]
impl Stage for GenerationStage {
    fn name(&self) -> &'static str {
        "generate"
    }

    async fn run(&self, state: &RequestState) -> Result<StateUpdate> {
        tracing::info!(model = self.model.model_name(), "generating answer");
        let prompt = build_prompt(&state.context, &state.question);
        let answer = with_deadline(DEP_LLM, self.timeout_secs, self.model.complete(&prompt)).await?;
        Ok(StateUpdate {
            context: None,
            response: Some(answer),
        })
    }
}
