//! The agent invoker: one debate turn as one streamed LLM call with retry,
//! timeout, cancellation and token accounting.
//!
//! Event contract per attempt: exactly one `token_start`, zero or more
//! `token_delta`, then exactly one `token_end` (success or cancellation,
//! the latter with `partial=true`) or one `error` (failure). The
//! orchestrator emits the authoritative `agent_message` afterwards.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;

use ag_domain::debate::{DebateMessage, TurnRole};
use ag_domain::error::{Error, Result};
use ag_domain::event::{Event, EventPayload};
use ag_domain::stream::{estimate_tokens, StreamEvent};
use ag_providers::traits::{ChatMessage, ChatRequest};

use crate::bus::EventSink;
use crate::caller::AgentCaller;
use crate::cancel::CancelToken;

/// Appended to the content when the hard token budget truncates a stream.
pub const BUDGET_STOP_MARKER: &str = "\n[truncated: token budget reached]";

/// Granularity of cancellation checks while waiting on stream bytes.
const CANCEL_POLL: Duration = Duration::from_millis(100);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Backoff
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Jittered exponential back-off between retry attempts.
#[derive(Debug, Clone)]
pub struct RetryBackoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(15),
            backoff_factor: 2.0,
        }
    }
}

impl RetryBackoff {
    /// Compute the delay for the given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.backoff_factor.powi(attempt as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        // ~25% jitter to spread retry storms.
        let jitter = capped_ms * 0.25 * pseudo_random_fraction(attempt);
        Duration::from_millis((capped_ms + jitter) as u64)
    }
}

/// Cheap deterministic "random" fraction [0, 1) based on attempt number.
/// Not cryptographically secure — just enough to decorrelate retries.
fn pseudo_random_fraction(attempt: u32) -> f64 {
    let hash = attempt.wrapping_add(1).wrapping_mul(2654435761); // Knuth multiplicative hash
    (hash as f64) / (u32::MAX as f64)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Policy & input
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct InvokerPolicy {
    /// Attempts on transient failure (total, not additional).
    pub attempts: u32,
    pub backoff: RetryBackoff,
    /// Hard per-call token budget; the stream is truncated beyond it.
    pub token_budget: u32,
    /// No stream bytes for this long fails the attempt with `Timeout`.
    pub inactivity_timeout: Duration,
    /// A `Timeout` is retried only when fewer tokens than this arrived.
    pub timeout_retry_threshold: u32,
}

impl Default for InvokerPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: RetryBackoff::default(),
            token_budget: 4096,
            inactivity_timeout: Duration::from_secs(60),
            timeout_retry_threshold: 64,
        }
    }
}

/// Everything one agent turn needs.
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub debate_id: String,
    pub agent: String,
    pub round: u32,
    pub role: TurnRole,
    pub cognitive_role: Option<String>,
    pub system_prompt: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Invoker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AgentInvoker {
    caller: Arc<dyn AgentCaller>,
    sink: Arc<dyn EventSink>,
    policy: InvokerPolicy,
}

/// Outcome of a single attempt, before retry policy is applied.
struct AttemptFailure {
    error: Error,
    tokens_seen: u32,
}

impl AgentInvoker {
    pub fn new(caller: Arc<dyn AgentCaller>, sink: Arc<dyn EventSink>, policy: InvokerPolicy) -> Self {
        Self {
            caller,
            sink,
            policy,
        }
    }

    /// Run one agent turn, retrying per policy, and return the materialized
    /// message. Token events are emitted to the sink in real time.
    pub async fn invoke(
        &self,
        input: &TurnInput,
        cancel: &CancelToken,
        deadline: Instant,
    ) -> Result<DebateMessage> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(Error::Canceled);
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout("debate deadline reached".into()));
            }

            match self.attempt(input, cancel, deadline, attempt).await {
                Ok(message) => return Ok(message),
                Err(failure) => {
                    let retriable = match &failure.error {
                        Error::Canceled => false,
                        Error::Permanent(_) => false,
                        Error::Timeout(_) => {
                            failure.tokens_seen < self.policy.timeout_retry_threshold
                        }
                        e => e.is_retriable(),
                    };
                    if !retriable || attempt >= self.policy.attempts {
                        return Err(failure.error);
                    }
                    let delay = self.policy.backoff.delay_for_attempt(attempt - 1);
                    tracing::debug!(
                        agent = %input.agent,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure.error,
                        "retrying agent turn"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn attempt(
        &self,
        input: &TurnInput,
        cancel: &CancelToken,
        deadline: Instant,
        attempt: u32,
    ) -> std::result::Result<DebateMessage, AttemptFailure> {
        let fail = |error: Error, tokens_seen: u32| AttemptFailure { error, tokens_seen };

        self.emit(input, EventPayload::TokenStart { attempt })
            .map_err(|e| fail(e, 0))?;

        let req = ChatRequest {
            messages: input.messages.clone(),
            system_prompt: input.system_prompt.clone(),
            temperature: input.temperature,
            max_tokens: Some(self.policy.token_budget),
            stop_sequences: Vec::new(),
            model: None,
        };

        let mut stream = match self.caller.stream_turn(&input.agent, req).await {
            Ok(s) => s,
            Err(e) => {
                self.emit_error(input, &e).map_err(|pe| fail(pe, 0))?;
                return Err(fail(e, 0));
            }
        };

        let mut content = String::new();
        let mut tokens: u32 = 0;
        let mut finish_reason: Option<String> = None;
        let mut last_byte_at = Instant::now();

        loop {
            if cancel.is_cancelled() {
                // Tear down: close the viewer-visible stream, discard partial.
                self.emit(
                    input,
                    EventPayload::TokenEnd {
                        partial: true,
                        tokens,
                    },
                )
                .map_err(|e| fail(e, tokens))?;
                return Err(fail(Error::Canceled, tokens));
            }
            if Instant::now() >= deadline {
                let e = Error::Timeout("debate deadline reached mid-stream".into());
                self.emit_error(input, &e).map_err(|pe| fail(pe, tokens))?;
                return Err(fail(e, tokens));
            }

            let item = match tokio::time::timeout(CANCEL_POLL, stream.next()).await {
                Err(_elapsed) => {
                    if last_byte_at.elapsed() >= self.policy.inactivity_timeout {
                        let e = Error::Timeout("no stream bytes within inactivity window".into());
                        self.emit_error(input, &e).map_err(|pe| fail(pe, tokens))?;
                        return Err(fail(e, tokens));
                    }
                    continue;
                }
                Ok(item) => item,
            };

            match item {
                None => break,
                Some(Ok(StreamEvent::Token { text })) => {
                    last_byte_at = Instant::now();
                    tokens += estimate_tokens(&text);
                    content.push_str(&text);
                    self.emit(input, EventPayload::TokenDelta { text })
                        .map_err(|e| fail(e, tokens))?;
                    if tokens >= self.policy.token_budget {
                        content.push_str(BUDGET_STOP_MARKER);
                        finish_reason = Some("budget".into());
                        break;
                    }
                }
                Some(Ok(StreamEvent::Done {
                    finish_reason: fr, ..
                })) => {
                    finish_reason = fr;
                    break;
                }
                Some(Ok(StreamEvent::Error { message })) => {
                    let e = Error::Transient(message);
                    self.emit_error(input, &e).map_err(|pe| fail(pe, tokens))?;
                    return Err(fail(e, tokens));
                }
                Some(Err(e)) => {
                    self.emit_error(input, &e).map_err(|pe| fail(pe, tokens))?;
                    return Err(fail(e, tokens));
                }
            }
        }

        self.emit(
            input,
            EventPayload::TokenEnd {
                partial: false,
                tokens,
            },
        )
        .map_err(|e| fail(e, tokens))?;

        tracing::debug!(
            agent = %input.agent,
            round = input.round,
            tokens,
            finish_reason = finish_reason.as_deref().unwrap_or("eof"),
            "agent turn complete"
        );

        Ok(DebateMessage {
            debate_id: input.debate_id.clone(),
            round: input.round,
            agent: input.agent.clone(),
            role: input.role,
            cognitive_role: input.cognitive_role.clone(),
            confidence: extract_confidence(&content),
            citations: extract_citations(&content),
            content,
            ts: chrono::Utc::now(),
        })
    }

    fn emit(&self, input: &TurnInput, payload: EventPayload) -> Result<()> {
        self.sink
            .publish(
                Event::new(payload)
                    .for_debate(&input.debate_id)
                    .in_round(input.round)
                    .from_agent(&input.agent),
            )
            .map(|_| ())
    }

    fn emit_error(&self, input: &TurnInput, error: &Error) -> Result<()> {
        self.emit(
            input,
            EventPayload::Error {
                code: error.code().to_string(),
                message: error.to_string(),
            },
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Content extraction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Pull a confidence value out of agent output: a JSON `"confidence"` field
/// anywhere in the text, else a `confidence: 0.x` prose marker.
pub fn extract_confidence(content: &str) -> Option<f64> {
    if let Some(v) = find_json_object(content) {
        if let Some(c) = v.get("confidence").and_then(|c| c.as_f64()) {
            return Some(c.clamp(0.0, 1.0));
        }
    }
    let re = regex_confidence();
    re.captures(content)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(|c| if c > 1.0 { (c / 100.0).clamp(0.0, 1.0) } else { c.clamp(0.0, 1.0) })
}

/// Collect cited URLs from agent output.
pub fn extract_citations(content: &str) -> Vec<String> {
    let re = regex_url();
    re.find_iter(content)
        .map(|m| m.as_str().trim_end_matches(&[')', ']', '.', ','][..]).to_string())
        .collect()
}

/// Find the first balanced JSON object embedded in free text.
pub fn find_json_object(content: &str) -> Option<serde_json::Value> {
    let start = content.find('{')?;
    let bytes = content.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return serde_json::from_str(&content[start..=i]).ok();
                }
            }
            _ => {}
        }
    }
    None
}

fn regex_confidence() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"(?i)confidence[:=\s]+([0-9]*\.?[0-9]+)").unwrap())
}

fn regex_url() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"https?://[^\s<>\x22]+").unwrap())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
