//! Anthropic-native adapter.
//!
//! Implements the Anthropic Messages API including streaming. System prompts
//! go in a separate top-level `system` field rather than the message list.

use crate::traits::{
    ChatMessage, ChatRequest, ChatResponse, ChatRole, EmbeddingsRequest, EmbeddingsResponse,
    LlmProvider,
};
use crate::util::{from_reqwest, resolve_api_key, status_to_error};
use ag_domain::config::ProviderConfig;
use ag_domain::error::{Error, Result};
use ag_domain::stream::{BoxStream, StreamEvent, Usage};
use serde_json::Value;

const ANTHROPIC_VERSION: &str = "2023-06-01";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An LLM provider adapter for the Anthropic Messages API.
pub struct AnthropicProvider {
    id: String,
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new provider from the deserialized provider config.
    pub fn from_config(cfg: &ProviderConfig) -> Result<Self> {
        let api_key = resolve_api_key(cfg)?.ok_or_else(|| {
            Error::Config(format!("provider '{}': anthropic requires an API key", cfg.id))
        })?;
        let default_model = cfg
            .default_model
            .clone()
            .unwrap_or_else(|| "claude-sonnet-4-20250514".into());

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: cfg.id.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            default_model,
            client,
        })
    }

    fn authed_post(&self) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
    }

    fn build_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req
            .messages
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .map(msg_to_anthropic)
            .collect();

        let mut body = serde_json::json!({
            "model": req.model.clone().unwrap_or_else(|| self.default_model.clone()),
            "messages": messages,
            "max_tokens": req.max_tokens.unwrap_or(4096),
        });

        // System text from the dedicated field plus any system-role messages.
        let mut system_parts: Vec<&str> = Vec::new();
        if let Some(s) = &req.system_prompt {
            system_parts.push(s);
        }
        for m in &req.messages {
            if m.role == ChatRole::System {
                system_parts.push(&m.content);
            }
        }
        if !system_parts.is_empty() {
            body["system"] = Value::String(system_parts.join("\n\n"));
        }

        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if !req.stop_sequences.is_empty() {
            body["stop_sequences"] = serde_json::json!(req.stop_sequences);
        }
        if stream {
            body["stream"] = serde_json::json!(true);
        }
        body
    }
}

fn msg_to_anthropic(msg: &ChatMessage) -> Value {
    let role = match msg.role {
        ChatRole::Assistant => "assistant",
        _ => "user",
    };
    serde_json::json!({ "role": role, "content": msg.content })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_response(provider: &str, body: &Value) -> Result<ChatResponse> {
    let content_arr = body
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| Error::Provider {
            provider: provider.into(),
            message: "missing content array".into(),
        })?;

    let text: String = content_arr
        .iter()
        .filter(|block| block.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|block| block.get("text").and_then(|t| t.as_str()))
        .collect();

    let finish_reason = body
        .get("stop_reason")
        .and_then(|v| v.as_str())
        .map(|s| match s {
            "end_turn" => "stop".to_string(),
            other => other.to_string(),
        });

    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    Ok(ChatResponse {
        content: text,
        usage: body.get("usage").and_then(parse_anthropic_usage),
        model,
        finish_reason,
    })
}

fn parse_anthropic_usage(v: &Value) -> Option<Usage> {
    let input = v.get("input_tokens")?.as_u64()? as u32;
    let output = v.get("output_tokens")?.as_u64()? as u32;
    Some(Usage {
        prompt_tokens: input,
        completion_tokens: output,
        total_tokens: input + output,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming SSE helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Usage arrives split across `message_start` and `message_delta`, so the
/// parser carries state between payloads.
struct StreamState {
    usage: Option<Usage>,
    done_emitted: bool,
}

impl StreamState {
    fn new() -> Self {
        Self {
            usage: None,
            done_emitted: false,
        }
    }
}

/// Parse a single Anthropic SSE data payload and produce zero or more stream events.
fn parse_anthropic_sse(data: &str, state: &mut StreamState) -> Vec<Result<StreamEvent>> {
    let mut events = Vec::new();

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            events.push(Err(Error::Json(e)));
            return events;
        }
    };

    let event_type = v.get("type").and_then(|v| v.as_str()).unwrap_or("");

    match event_type {
        "message_start" => {
            if let Some(msg) = v.get("message") {
                state.usage = msg.get("usage").and_then(parse_anthropic_usage);
            }
        }

        "content_block_delta" => {
            if let Some(delta) = v.get("delta") {
                if delta.get("type").and_then(|t| t.as_str()) == Some("text_delta") {
                    if let Some(text) = delta.get("text").and_then(|t| t.as_str()) {
                        if !text.is_empty() {
                            events.push(Ok(StreamEvent::Token {
                                text: text.to_string(),
                            }));
                        }
                    }
                }
            }
        }

        "message_delta" => {
            if let Some(usage_val) = v.get("usage") {
                if let Some(output) = usage_val.get("output_tokens").and_then(|v| v.as_u64()) {
                    if let Some(ref mut u) = state.usage {
                        u.completion_tokens = output as u32;
                        u.total_tokens = u.prompt_tokens + u.completion_tokens;
                    }
                }
            }
            let stop_reason = v
                .get("delta")
                .and_then(|d| d.get("stop_reason"))
                .and_then(|v| v.as_str())
                .map(|s| match s {
                    "end_turn" => "stop".to_string(),
                    other => other.to_string(),
                });
            if stop_reason.is_some() {
                state.done_emitted = true;
                events.push(Ok(StreamEvent::Done {
                    usage: state.usage.clone(),
                    finish_reason: stop_reason,
                }));
            }
        }

        "message_stop" => {
            if !state.done_emitted {
                state.done_emitted = true;
                events.push(Ok(StreamEvent::Done {
                    usage: state.usage.clone(),
                    finish_reason: Some("stop".into()),
                }));
            }
        }

        "error" => {
            let msg = v
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error");
            events.push(Ok(StreamEvent::Error {
                message: msg.to_string(),
            }));
        }

        _ => {
            // ping, content_block_start/stop -- ignore.
        }
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for AnthropicProvider {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let body = self.build_body(&req, false);

        let resp = self
            .authed_post()
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(from_reqwest)?;

        if !status.is_success() {
            return Err(status_to_error(&self.id, status, &resp_text));
        }

        let resp_json: Value = serde_json::from_str(&resp_text)?;
        parse_response(&self.id, &resp_json)
    }

    async fn chat_stream(
        &self,
        req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let body = self.build_body(&req, true);

        let resp = self
            .authed_post()
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.map_err(from_reqwest)?;
            return Err(status_to_error(&self.id, status, &err_text));
        }

        let mut state = StreamState::new();
        Ok(crate::sse::sse_response_stream(resp, move |data| {
            parse_anthropic_sse(data, &mut state)
        }))
    }

    async fn embeddings(&self, _req: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        Err(Error::Permanent(format!(
            "provider '{}' does not offer an embeddings endpoint",
            self.id
        )))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_goes_top_level() {
        let provider = AnthropicProvider {
            id: "anthropic".into(),
            base_url: "https://api.anthropic.com".into(),
            api_key: "k".into(),
            default_model: "claude-sonnet-4-20250514".into(),
            client: reqwest::Client::new(),
        };
        let req = ChatRequest {
            messages: vec![
                ChatMessage::system("stay terse"),
                ChatMessage::user("hello"),
            ],
            system_prompt: Some("you are a critic".into()),
            ..Default::default()
        };
        let body = provider.build_body(&req, false);
        let system = body["system"].as_str().unwrap();
        assert!(system.contains("you are a critic"));
        assert!(system.contains("stay terse"));
        // Only the user message remains in the list.
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn sse_text_delta() {
        let mut state = StreamState::new();
        let data = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"hey"}}"#;
        let events = parse_anthropic_sse(data, &mut state);
        assert!(matches!(
            events[0].as_ref().unwrap(),
            StreamEvent::Token { text } if text == "hey"
        ));
    }

    #[test]
    fn sse_usage_assembled_across_events() {
        let mut state = StreamState::new();
        parse_anthropic_sse(
            r#"{"type":"message_start","message":{"usage":{"input_tokens":7,"output_tokens":0}}}"#,
            &mut state,
        );
        let events = parse_anthropic_sse(
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":12}}"#,
            &mut state,
        );
        match events[0].as_ref().unwrap() {
            StreamEvent::Done {
                usage: Some(u),
                finish_reason,
            } => {
                assert_eq!(u.prompt_tokens, 7);
                assert_eq!(u.completion_tokens, 12);
                assert_eq!(u.total_tokens, 19);
                assert_eq!(finish_reason.as_deref(), Some("stop"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn sse_message_stop_without_delta_emits_done_once() {
        let mut state = StreamState::new();
        let events =
            parse_anthropic_sse(r#"{"type":"message_stop"}"#, &mut state);
        assert!(matches!(events[0].as_ref().unwrap(), StreamEvent::Done { .. }));
        // A second message_stop must not emit another Done.
        let events = parse_anthropic_sse(r#"{"type":"message_stop"}"#, &mut state);
        assert!(events.is_empty());
    }

    #[test]
    fn sse_error_event() {
        let mut state = StreamState::new();
        let events = parse_anthropic_sse(
            r#"{"type":"error","error":{"message":"overloaded"}}"#,
            &mut state,
        );
        assert!(matches!(
            events[0].as_ref().unwrap(),
            StreamEvent::Error { message } if message == "overloaded"
        ));
    }
}
