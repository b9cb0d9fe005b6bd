use futures::future::BoxFuture;
use serde::Deserialize;

use carepath_core::error::{CarepathError, Result};
use carepath_core::traits::EnrichmentOracle;
use carepath_core::types::Enrichment;

use crate::client::ChatClient;

const SYSTEM_PROMPT: &str = "You rewrite terse care-task notes into gentle, \
concrete guidance for a person who needs step-by-step support. Use plain \
everyday words, one idea at a time, and a warm, encouraging tone. Respond \
with JSON only.";

/// LLM-backed enrichment oracle producing display text for one node.
pub struct TextEnrichmentOracle {
    client: ChatClient,
}

#[derive(Debug, Deserialize)]
struct EnrichmentReply {
    title: String,
    instruction: String,
    call_to_action: String,
}

impl TextEnrichmentOracle {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }

    fn render_prompt(name: &str, description: &str) -> String {
        format!(
            "Task name: {name}\n\
             Raw description: {description}\n\n\
             Reply with a JSON object \
             {{\"title\": string, \"instruction\": string, \"call_to_action\": string}}. \
             \"title\" is a short everyday heading. \"instruction\" restates the \
             description conversationally, explaining what the steps inside cover and \
             why they help. \"call_to_action\" is one short, friendly sentence inviting \
             the next step."
        )
    }
}

impl EnrichmentOracle for TextEnrichmentOracle {
    fn enrich(&self, name: &str, description: &str) -> BoxFuture<'_, Result<Enrichment>> {
        let prompt = Self::render_prompt(name, description);
        Box::pin(async move {
            let raw = self.client.complete_json(SYSTEM_PROMPT, &prompt).await?;
            let reply: EnrichmentReply = serde_json::from_str(&raw)
                .map_err(|e| CarepathError::OracleParse(format!("enrichment reply: {e}")))?;
            Ok(Enrichment {
                title: reply.title,
                instruction: reply.instruction,
                call_to_action: reply.call_to_action,
            })
        })
    }
}
