//! Mention Extractor (spec §4.4): an LLM call with structured output
//! returning untyped surface-form mentions from a single chunk.

use crate::error::Result;
use crate::llm::LlmClient;
use crate::types::Mention;
use serde::Deserialize;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You identify surface-form mentions of candidate entities in a passage \
of text. Only mention surface forms that literally occur in the passage; do not invent entities or \
infer facts. Return JSON of the form {\"mentions\": [{\"mention\": string, \"context\": string or null}]}.";

#[derive(Deserialize)]
struct MentionsResponse {
    #[serde(default)]
    mentions: Vec<Mention>,
}

#[derive(Clone)]
pub struct MentionExtractor {
    llm: Arc<dyn LlmClient>,
}

impl MentionExtractor {
    #[must_use]
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn extract(&self, chunk_text: &str) -> Result<Vec<Mention>> {
        let user_prompt = format!("Passage:\n\n{chunk_text}");
        let value = self
            .llm
            .generate_object(SYSTEM_PROMPT, &user_prompt)
            .await?;
        let parsed: MentionsResponse = serde_json::from_value(value)?;
        Ok(parsed.mentions)
    }
}
