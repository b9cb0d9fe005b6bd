use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::debug;

use carepath_core::error::{CarepathError, Result};
use carepath_core::traits::{OrderOracle, ReorderRequest};

use crate::client::ChatClient;

const SYSTEM_PROMPT: &str = "You order care tasks for a guided assistant. \
Never violate a stated precedence constraint; within that freedom, prefer \
the sequence a person would naturally follow (cognitive load, physical \
flow around the home, context switches). Respond with JSON only.";

/// LLM-backed ordering oracle.
///
/// The reply must list every task exactly once; the caller validates it
/// and falls back to its deterministic order otherwise, so a bad reply
/// degrades quality, never correctness.
pub struct SemanticOrderOracle {
    client: ChatClient,
}

#[derive(Debug, Deserialize)]
struct ReorderReply {
    /// The model commits its reasoning before the list; logged, not used.
    #[serde(default)]
    reasoning: String,
    ordered: Vec<String>,
}

impl SemanticOrderOracle {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }

    fn render_prompt(request: &ReorderRequest) -> String {
        let mut items = String::new();
        for name in &request.names {
            let description = request
                .descriptions
                .get(name)
                .map(String::as_str)
                .unwrap_or("");
            items.push_str(&format!("- name: {name}, description: {description}\n"));
        }
        let constraints =
            serde_json::to_string_pretty(&request.follows).unwrap_or_else(|_| "{}".into());

        format!(
            "Tasks:\n{items}\n\
             Precedence constraints (each source must come before every listed target):\n\
             {constraints}\n\n\
             Reply with a JSON object {{\"reasoning\": string, \"ordered\": [task names]}}. \
             \"ordered\" must contain exactly the task names above, each exactly once, \
             in your proposed order."
        )
    }
}

impl OrderOracle for SemanticOrderOracle {
    fn reorder(&self, request: ReorderRequest) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let prompt = Self::render_prompt(&request);
            let raw = self.client.complete_json(SYSTEM_PROMPT, &prompt).await?;
            let reply: ReorderReply = serde_json::from_str(&raw)
                .map_err(|e| CarepathError::OracleParse(format!("reorder reply: {e}")))?;
            debug!(reasoning = %reply.reasoning, "Reorder reasoning");
            Ok(reply.ordered)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn prompt_carries_tasks_and_constraints() {
        let request = ReorderRequest {
            names: vec!["wash_face".into(), "get_dressed".into()],
            follows: HashMap::from([("wash_face".to_string(), vec!["get_dressed".to_string()])]),
            descriptions: HashMap::from([(
                "wash_face".to_string(),
                "Wash your face at the sink".to_string(),
            )]),
        };
        let prompt = SemanticOrderOracle::render_prompt(&request);
        assert!(prompt.contains("name: wash_face, description: Wash your face at the sink"));
        assert!(prompt.contains("name: get_dressed, description: \n"));
        assert!(prompt.contains("\"wash_face\""));
    }

    #[test]
    fn reply_parses_with_and_without_reasoning() {
        let full: ReorderReply =
            serde_json::from_str(r#"{"reasoning": "sink first", "ordered": ["a", "b"]}"#).unwrap();
        assert_eq!(full.ordered, vec!["a", "b"]);

        let bare: ReorderReply = serde_json::from_str(r#"{"ordered": []}"#).unwrap();
        assert!(bare.ordered.is_empty());
        assert!(bare.reasoning.is_empty());

        assert!(serde_json::from_str::<ReorderReply>(r#"{"reasoning": "lost the list"}"#).is_err());
    }
}
