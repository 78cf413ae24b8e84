//! Google Gemini adapter.
//!
//! Implements the Gemini `generateContent` / `streamGenerateContent` APIs and
//! `batchEmbedContents` for embeddings. Auth is via an API key passed as a
//! query parameter (`key={api_key}`).

use crate::traits::{
    ChatMessage, ChatRequest, ChatResponse, ChatRole, EmbeddingsRequest, EmbeddingsResponse,
    LlmProvider,
};
use crate::util::{from_reqwest, resolve_api_key, status_to_error};
use ag_domain::config::ProviderConfig;
use ag_domain::error::{Error, Result};
use ag_domain::stream::{BoxStream, StreamEvent, Usage};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An LLM provider adapter for the Google Gemini API.
pub struct GeminiProvider {
    id: String,
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    /// Create a new provider from the deserialized provider config.
    pub fn from_config(cfg: &ProviderConfig) -> Result<Self> {
        let api_key = resolve_api_key(cfg)?.ok_or_else(|| {
            Error::Config(format!("provider '{}': gemini requires an API key", cfg.id))
        })?;
        let default_model = cfg
            .default_model
            .clone()
            .unwrap_or_else(|| "gemini-2.0-flash".into());

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

    // ── Internal helpers ───────────────────────────────────────────

    fn generate_url(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        )
    }

    fn stream_url(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url, model, self.api_key
        )
    }

    fn effective_model(&self, req: &ChatRequest) -> String {
        req.model
            .clone()
            .unwrap_or_else(|| self.default_model.clone())
    }

    fn build_body(&self, req: &ChatRequest) -> Value {
        let mut contents: Vec<Value> = Vec::new();
        let mut system_parts: Vec<String> = Vec::new();

        if let Some(s) = &req.system_prompt {
            system_parts.push(s.clone());
        }

        for msg in &req.messages {
            match msg.role {
                ChatRole::System => system_parts.push(msg.content.clone()),
                ChatRole::User => contents.push(content_part("user", msg)),
                ChatRole::Assistant => contents.push(content_part("model", msg)),
            }
        }

        let mut body = serde_json::json!({ "contents": contents });

        if !system_parts.is_empty() {
            body["systemInstruction"] = serde_json::json!({
                "parts": [{"text": system_parts.join("\n\n")}]
            });
        }

        let mut generation_config = serde_json::Map::new();
        if let Some(temp) = req.temperature {
            generation_config.insert("temperature".into(), serde_json::json!(temp));
        }
        if let Some(max) = req.max_tokens {
            generation_config.insert("maxOutputTokens".into(), serde_json::json!(max));
        }
        if !req.stop_sequences.is_empty() {
            generation_config.insert("stopSequences".into(), serde_json::json!(req.stop_sequences));
        }
        if !generation_config.is_empty() {
            body["generationConfig"] = Value::Object(generation_config);
        }

        body
    }
}

fn content_part(role: &str, msg: &ChatMessage) -> Value {
    serde_json::json!({
        "role": role,
        "parts": [{"text": msg.content}]
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn extract_text(body: &Value) -> String {
    body.get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .and_then(|cand| cand.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<String>()
        })
        .unwrap_or_default()
}

fn extract_finish_reason(body: &Value) -> Option<String> {
    body.get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .and_then(|cand| cand.get("finishReason"))
        .and_then(|v| v.as_str())
        .map(|s| match s {
            "STOP" => "stop".to_string(),
            "MAX_TOKENS" => "length".to_string(),
            other => other.to_lowercase(),
        })
}

fn parse_gemini_usage(body: &Value) -> Option<Usage> {
    let meta = body.get("usageMetadata")?;
    let prompt = meta.get("promptTokenCount").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let completion = meta
        .get("candidatesTokenCount")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u32;
    Some(Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: prompt + completion,
    })
}

fn parse_gemini_sse_data(data: &str) -> Vec<Result<StreamEvent>> {
    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    let mut events = Vec::new();
    let text = extract_text(&v);
    if !text.is_empty() {
        events.push(Ok(StreamEvent::Token { text }));
    }

    if let Some(finish_reason) = extract_finish_reason(&v) {
        events.push(Ok(StreamEvent::Done {
            usage: parse_gemini_usage(&v),
            finish_reason: Some(finish_reason),
        }));
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for GeminiProvider {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let model = self.effective_model(&req);
        let url = self.generate_url(&model);
        let body = self.build_body(&req);

        let resp = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
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
        Ok(ChatResponse {
            content: extract_text(&resp_json),
            usage: parse_gemini_usage(&resp_json),
            model,
            finish_reason: extract_finish_reason(&resp_json),
        })
    }

    async fn chat_stream(
        &self,
        req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let model = self.effective_model(&req);
        let url = self.stream_url(&model);
        let body = self.build_body(&req);

        let resp = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.map_err(from_reqwest)?;
            return Err(status_to_error(&self.id, status, &err_text));
        }

        Ok(crate::sse::sse_response_stream(resp, parse_gemini_sse_data))
    }

    async fn embeddings(&self, req: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        let model = req.model.clone().unwrap_or_else(|| "text-embedding-004".into());
        // Gemini embeddings use batchEmbedContents for multiple inputs.
        let url = format!(
            "{}/v1beta/models/{}:batchEmbedContents?key={}",
            self.base_url, model, self.api_key
        );

        let requests: Vec<Value> = req
            .input
            .iter()
            .map(|text| {
                serde_json::json!({
                    "model": format!("models/{}", model),
                    "content": { "parts": [{"text": text}] }
                })
            })
            .collect();

        let resp = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&serde_json::json!({ "requests": requests }))
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(from_reqwest)?;

        if !status.is_success() {
            return Err(status_to_error(&self.id, status, &resp_text));
        }

        let resp_json: Value = serde_json::from_str(&resp_text)?;
        let embeddings = resp_json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .map(|arr| {
                arr.iter()
                    .map(|item| {
                        item.get("values")
                            .and_then(|v| v.as_array())
                            .map(|vals| {
                                vals.iter()
                                    .filter_map(|v| v.as_f64().map(|f| f as f32))
                                    .collect()
                            })
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(EmbeddingsResponse { embeddings })
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

    fn provider() -> GeminiProvider {
        GeminiProvider {
            id: "gemini".into(),
            base_url: "https://generativelanguage.googleapis.com".into(),
            api_key: "k".into(),
            default_model: "gemini-2.0-flash".into(),
            client: reqwest::Client::new(),
        }
    }

    #[test]
    fn assistant_maps_to_model_role() {
        let p = provider();
        let req = ChatRequest {
            messages: vec![
                ChatMessage::user("q"),
                ChatMessage::assistant("a"),
            ],
            ..Default::default()
        };
        let body = p.build_body(&req);
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][1]["role"], "model");
    }

    #[test]
    fn system_collected_into_instruction() {
        let p = provider();
        let req = ChatRequest {
            messages: vec![ChatMessage::system("rules"), ChatMessage::user("q")],
            system_prompt: Some("persona".into()),
            stop_sequences: vec!["##".into()],
            ..Default::default()
        };
        let body = p.build_body(&req);
        let si = body["systemInstruction"]["parts"][0]["text"].as_str().unwrap();
        assert!(si.contains("persona") && si.contains("rules"));
        assert_eq!(body["generationConfig"]["stopSequences"][0], "##");
    }

    #[test]
    fn sse_token_and_done() {
        let data = r#"{"candidates":[{"content":{"parts":[{"text":"hi"}]},"finishReason":"STOP"}],
                       "usageMetadata":{"promptTokenCount":4,"candidatesTokenCount":2}}"#;
        let events = parse_gemini_sse_data(data);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].as_ref().unwrap(), StreamEvent::Token { text } if text == "hi"));
        match events[1].as_ref().unwrap() {
            StreamEvent::Done { usage: Some(u), finish_reason } => {
                assert_eq!(u.total_tokens, 6);
                assert_eq!(finish_reason.as_deref(), Some("stop"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn sse_chunk_without_finish() {
        let data = r#"{"candidates":[{"content":{"parts":[{"text":"partial"}]}}]}"#;
        let events = parse_gemini_sse_data(data);
        assert_eq!(events.len(), 1);
    }
}
