use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use colloquy_core::config::ModelConfig;
use colloquy_core::error::{ColloquyError, Result};
use colloquy_core::traits::LlmClient;
use colloquy_core::types::{ChatMessage, Role};

use super::{status_error, transport_error};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    http: Client,
}

impl AnthropicClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for AnthropicClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
}

#[derive(Serialize, Debug, PartialEq)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize, Debug)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
}

#[derive(Deserialize, Debug)]
struct ResponseBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Split system messages out; the messages API takes them as a top-level field.
fn convert_messages(messages: Vec<ChatMessage>) -> (Option<String>, Vec<ApiMessage>) {
    let mut system_parts = Vec::new();
    let mut api_msgs: Vec<ApiMessage> = Vec::new();

    for msg in messages {
        let role = match msg.role {
            Role::System => {
                system_parts.push(msg.content);
                continue;
            }
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        // Consecutive same-role messages must be merged
        match api_msgs.last_mut() {
            Some(last) if last.role == role => {
                last.content.push_str("\n\n");
                last.content.push_str(&msg.content);
            }
            _ => api_msgs.push(ApiMessage {
                role,
                content: msg.content,
            }),
        }
    }

    // The API requires the first message to come from the user
    if api_msgs.first().map(|m| m.role) != Some("user") {
        api_msgs.insert(
            0,
            ApiMessage {
                role: "user",
                content: "Begin.".to_string(),
            },
        );
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (system, api_msgs)
}

fn parse_response(body: &str) -> Result<String> {
    let parsed: AnthropicResponse =
        serde_json::from_str(body).map_err(|e| ColloquyError::LlmParse(e.to_string()))?;
    let text: String = parsed
        .content
        .into_iter()
        .filter(|b| b.kind == "text")
        .filter_map(|b| b.text)
        .collect();
    if text.is_empty() {
        return Err(ColloquyError::LlmParse("response had no text blocks".into()));
    }
    Ok(text)
}

impl LlmClient for AnthropicClient {
    fn chat(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<String>> {
        let config = config.clone();

        Box::pin(async move {
            let url = config.base_url.as_deref().unwrap_or(ANTHROPIC_API_URL);
            let (system, api_messages) = convert_messages(messages);

            let body = AnthropicRequest {
                model: config.model_id.clone(),
                max_tokens: config.max_tokens,
                temperature: config.temperature,
                messages: api_messages,
                system,
            };

            let mut req = self
                .http
                .post(url)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body);
            if let Some(api_key) = &config.api_key {
                req = req.header("x-api-key", api_key);
            }
            for (k, v) in &config.extra_headers {
                req = req.header(k.as_str(), v.as_str());
            }

            let response = req
                .send()
                .await
                .map_err(transport_error)?;

            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(transport_error)?;

            if !status.is_success() {
                return Err(status_error(status, text));
            }

            debug!(model = %config.model_id, "Anthropic message received");
            parse_response(&text)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_messages_are_lifted() {
        let (system, msgs) = convert_messages(vec![
            ChatMessage::system("You are an editor."),
            ChatMessage::user("Write."),
        ]);
        assert_eq!(system.as_deref(), Some("You are an editor."));
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].role, "user");
    }

    #[test]
    fn test_consecutive_roles_merge_and_user_leads() {
        let (_, msgs) = convert_messages(vec![
            ChatMessage::assistant("Hello, I'm Ada."),
            ChatMessage::assistant("What is new in 3.1?"),
            ChatMessage::user("Longer context."),
        ]);
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0].role, "user");
        assert_eq!(msgs[1].content, "Hello, I'm Ada.\n\nWhat is new in 3.1?");
    }

    #[test]
    fn test_parse_response_joins_text_blocks() {
        let body = r###"{"content":[{"type":"text","text":"## Title"},{"type":"text","text":"\nBody"}]}"###;
        assert_eq!(parse_response(body).unwrap(), "## Title\nBody");
        assert!(parse_response(r#"{"content":[]}"#).is_err());
    }
}
