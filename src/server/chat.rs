/// OpenAI-compatible chat completion endpoint.
///
/// Only the last message is used, as a query with citations enabled. The
/// query result (answer or error message) comes back as a single
/// `system`-role choice.
use axum::Json;
use axum::extract::State;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::dispatch::AppContext;
use crate::llm;

/// A request message. `content` may be a string, an array of content
/// parts, or null (assistant turns that only carry tool calls).
#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<Value>,
}

impl ChatMessage {
    /// Plain text of the message: the string itself, or its `text` parts
    /// joined by newlines.
    pub fn text(&self) -> Option<String> {
        match self.content.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Array(parts) => {
                let texts: Vec<&str> = parts
                    .iter()
                    .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .collect();
                (!texts.is_empty()).then(|| texts.join("\n"))
            }
            _ => None,
        }
    }
}

/// Unknown request fields (temperature, stream, ...) are ignored.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ReplyMessage,
    pub finish_reason: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub usage: Usage,
}

impl ChatCompletionResponse {
    pub fn new(model: String, content: String) -> Self {
        Self {
            id: format!("chatcmpl-{}", Uuid::new_v4()),
            object: "chat.completion".to_string(),
            created: Utc::now().timestamp(),
            model,
            choices: vec![ChatChoice {
                index: 0,
                message: ReplyMessage {
                    role: "system".to_string(),
                    content,
                },
                finish_reason: "stop".to_string(),
            }],
            usage: Usage::default(),
        }
    }
}

/// Model id to report: the backend's, else the `MODEL_PATH` file name.
fn configured_model(ctx: &AppContext) -> String {
    ctx.query
        .model_name()
        .map(str::to_string)
        .or_else(|| ctx.settings.model.model_path.as_deref().map(llm::model_id))
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string())
}

pub async fn completions(
    State(ctx): State<AppContext>,
    Json(req): Json<ChatCompletionRequest>,
) -> Json<ChatCompletionResponse> {
    let model = req
        .model
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| configured_model(&ctx));

    let query = req
        .messages
        .last()
        .map(|last| last.text().filter(|t| !t.trim().is_empty()));

    let content = match query {
        None => "messages must not be empty".to_string(),
        Some(None) => "Query string must be specified for query action".to_string(),
        Some(Some(query)) => {
            let res = ctx.query(&query, false).await;
            match res.data.as_ref().and_then(|d| d.get("answer")).and_then(Value::as_str) {
                Some(answer) if res.is_ok() => answer.to_string(),
                _ => res.message,
            }
        }
    };

    Json(ChatCompletionResponse::new(model, content))
}

pub async fn models(State(ctx): State<AppContext>) -> Json<Value> {
    Json(json!({
        "object": "list",
        "data": [{
            "id": configured_model(&ctx),
            "object": "model",
            "created": 0,
            "owned_by": "local",
        }],
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(content: Value) -> ChatMessage {
        serde_json::from_value(json!({ "role": "user", "content": content })).unwrap()
    }

    #[test]
    fn test_message_text_forms() {
        assert_eq!(message(json!("Why?")).text().as_deref(), Some("Why?"));
        assert_eq!(message(Value::Null).text(), None);
        assert_eq!(
            message(json!([
                { "type": "text", "text": "Why was" },
                { "type": "image_url", "image_url": { "url": "http://x/y.png" } },
                { "type": "text", "text": "NATO created?" },
            ]))
            .text()
            .as_deref(),
            Some("Why was\nNATO created?")
        );
        assert_eq!(message(json!([{ "type": "image_url" }])).text(), None);
    }

    #[test]
    fn test_missing_content_field() {
        let msg: ChatMessage =
            serde_json::from_value(json!({ "role": "assistant", "tool_calls": [] })).unwrap();
        assert_eq!(msg.text(), None);
    }
}
