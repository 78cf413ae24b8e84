//! Scripted fakes for the engine's capability traits.
//!
//! Used by the test suites (and the CLI's dry-run mode) to drive debates
//! without network access: scripted agents, a deterministic embedder with
//! overridable vectors, an event sink that records instead of broadcasting,
//! and a store wrapper with injectable write failures.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use ag_domain::debate::{Debate, DebateMessage};
use ag_domain::error::{Error, Result};
use ag_domain::event::Event;
use ag_domain::ranking::{AgentRating, Flip, MatchRecord, Position};
use ag_domain::stream::{BoxStream, StreamEvent};
use ag_providers::traits::ChatRequest;
use ag_storage::{DebateSeal, JsonlStore, Store};

use crate::bus::EventSink;
use crate::caller::AgentCaller;
use crate::embed::{Embedder, LexicalEmbedder};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted agent caller
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
enum TurnKind {
    Stream { chunks: Vec<String>, delay: Duration },
    FailTransient,
    FailPermanent,
    FailMidStream,
}

/// One scripted agent turn.
#[derive(Debug, Clone)]
pub struct ScriptedTurn {
    kind: TurnKind,
}

impl ScriptedTurn {
    /// Stream the text in small chunks, then finish.
    pub fn text(text: &str) -> Self {
        Self {
            kind: TurnKind::Stream {
                chunks: chunk_text(text),
                delay: Duration::ZERO,
            },
        }
    }

    /// Stream the text with a delay between chunks (for cancellation tests).
    pub fn slow_text(text: &str, delay_ms: u64) -> Self {
        Self {
            kind: TurnKind::Stream {
                chunks: chunk_text(text),
                delay: Duration::from_millis(delay_ms),
            },
        }
    }

    pub fn fail_transient() -> Self {
        Self {
            kind: TurnKind::FailTransient,
        }
    }

    pub fn fail_permanent() -> Self {
        Self {
            kind: TurnKind::FailPermanent,
        }
    }

    /// Emit one chunk, then fail the stream.
    pub fn fail_mid_stream() -> Self {
        Self {
            kind: TurnKind::FailMidStream,
        }
    }
}

fn chunk_text(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(8)
        .map(|c| c.iter().collect::<String>())
        .collect()
}

/// In-process agent whose turns follow a script.
///
/// When an agent's script runs dry its last turn repeats, which makes
/// "agent keeps saying the same thing" convergence scenarios trivial to set
/// up. Unscripted agents return a fixed placeholder.
pub struct ScriptedCaller {
    scripts: Mutex<HashMap<String, VecDeque<ScriptedTurn>>>,
    last: Mutex<HashMap<String, ScriptedTurn>>,
    calls: Mutex<Vec<(String, ChatRequest)>>,
}

impl Default for ScriptedCaller {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedCaller {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            last: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn script(&self, agent: &str, turns: Vec<ScriptedTurn>) {
        self.scripts
            .lock()
            .entry(agent.to_string())
            .or_default()
            .extend(turns);
    }

    /// Number of turns played so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Requests seen, in order, for prompt assertions.
    pub fn calls_for(&self, agent: &str) -> Vec<ChatRequest> {
        self.calls
            .lock()
            .iter()
            .filter(|(a, _)| a == agent)
            .map(|(_, r)| r.clone())
            .collect()
    }

    fn next_turn(&self, agent: &str) -> ScriptedTurn {
        if let Some(turn) = self
            .scripts
            .lock()
            .get_mut(agent)
            .and_then(|queue| queue.pop_front())
        {
            self.last.lock().insert(agent.to_string(), turn.clone());
            return turn;
        }
        if let Some(last) = self.last.lock().get(agent) {
            return last.clone();
        }
        ScriptedTurn::text("I have nothing further to add.")
    }
}

#[async_trait::async_trait]
impl AgentCaller for ScriptedCaller {
    async fn stream_turn(
        &self,
        agent: &str,
        req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        self.calls.lock().push((agent.to_string(), req));

        match self.next_turn(agent).kind {
            TurnKind::FailTransient => Err(Error::Transient("scripted 503".into())),
            TurnKind::FailPermanent => Err(Error::Permanent("scripted 400".into())),
            TurnKind::FailMidStream => {
                let stream = async_stream::stream! {
                    yield Ok(StreamEvent::Token { text: "partial".into() });
                    yield Err(Error::Transient("scripted mid-stream failure".into()));
                };
                Ok(Box::pin(stream))
            }
            TurnKind::Stream { chunks, delay } => {
                let stream = async_stream::stream! {
                    for chunk in chunks {
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        yield Ok(StreamEvent::Token { text: chunk });
                    }
                    yield Ok(StreamEvent::Done {
                        usage: None,
                        finish_reason: Some("stop".into()),
                    });
                };
                Ok(Box::pin(stream))
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Collecting sink
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An [`EventSink`] that records events in memory and assigns sequence
/// numbers locally. For unit tests that do not need a real store.
pub struct CollectingSink {
    events: Mutex<Vec<Event>>,
    next_seq: AtomicU64,
}

impl Default for CollectingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectingSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            next_seq: AtomicU64::new(1),
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<ag_domain::event::EventKind> {
        self.events.lock().iter().map(|e| e.kind()).collect()
    }
}

impl EventSink for CollectingSink {
    fn publish(&self, mut event: Event) -> Result<Arc<Event>> {
        event.seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let stored = Arc::new(event.clone());
        self.events.lock().push(event);
        Ok(stored)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted embedder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Deterministic embedder with per-text overrides; unknown texts fall back
/// to the lexical embedding.
pub struct ScriptedEmbedder {
    fixed: Mutex<HashMap<String, Vec<f32>>>,
}

impl Default for ScriptedEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedEmbedder {
    pub fn new() -> Self {
        Self {
            fixed: Mutex::new(HashMap::new()),
        }
    }

    pub fn set(&self, text: &str, embedding: Vec<f32>) {
        self.fixed.lock().insert(text.to_string(), embedding);
    }
}

#[async_trait::async_trait]
impl Embedder for ScriptedEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let fixed = self.fixed.lock();
        Ok(texts
            .iter()
            .map(|t| {
                fixed
                    .get(t)
                    .cloned()
                    .unwrap_or_else(|| LexicalEmbedder::embed_one(t))
            })
            .collect())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Failing store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A [`Store`] wrapper with injectable write failures, for exercising the
/// durability gate and the orchestrator's fatal-write paths.
pub struct FailingStore {
    inner: JsonlStore,
    fail_event_appends: AtomicBool,
    fail_messages: AtomicBool,
    fail_seals: AtomicBool,
    fail_matches: AtomicBool,
}

impl FailingStore {
    pub fn wrapping(dir: &Path) -> Self {
        let inner = JsonlStore::open(&ag_domain::config::StorageConfig {
            data_dir: dir.to_path_buf(),
            max_in_memory: 1000,
            max_read_limit: 100,
        })
        .expect("test store");
        Self {
            inner,
            fail_event_appends: AtomicBool::new(false),
            fail_messages: AtomicBool::new(false),
            fail_seals: AtomicBool::new(false),
            fail_matches: AtomicBool::new(false),
        }
    }

    pub fn fail_event_appends(&self, on: bool) {
        self.fail_event_appends.store(on, Ordering::SeqCst);
    }

    pub fn fail_messages(&self, on: bool) {
        self.fail_messages.store(on, Ordering::SeqCst);
    }

    pub fn fail_seals(&self, on: bool) {
        self.fail_seals.store(on, Ordering::SeqCst);
    }

    pub fn fail_matches(&self, on: bool) {
        self.fail_matches.store(on, Ordering::SeqCst);
    }

    fn tripped(flag: &AtomicBool) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            Err(Error::Storage("injected write failure".into()))
        } else {
            Ok(())
        }
    }
}

impl Store for FailingStore {
    fn append_event(&self, event: Event) -> Result<Event> {
        Self::tripped(&self.fail_event_appends)?;
        self.inner.append_event(event)
    }

    fn read_events(
        &self,
        debate_id: Option<&str>,
        after_seq: Option<u64>,
        limit: usize,
    ) -> Result<Vec<Event>> {
        self.inner.read_events(debate_id, after_seq, limit)
    }

    fn create_debate(&self, debate: &Debate) -> Result<()> {
        self.inner.create_debate(debate)
    }

    fn get_debate(&self, slug_or_id: &str) -> Result<Option<Debate>> {
        self.inner.get_debate(slug_or_id)
    }

    fn list_debates(
        &self,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<(Vec<Debate>, Option<String>)> {
        self.inner.list_debates(limit, cursor)
    }

    fn seal_debate(&self, debate_id: &str, seal: &DebateSeal) -> Result<()> {
        Self::tripped(&self.fail_seals)?;
        self.inner.seal_debate(debate_id, seal)
    }

    fn append_message(&self, message: &DebateMessage) -> Result<()> {
        Self::tripped(&self.fail_messages)?;
        self.inner.append_message(message)
    }

    fn messages_for(&self, debate_id: &str) -> Result<Vec<DebateMessage>> {
        self.inner.messages_for(debate_id)
    }

    fn record_match(&self, record: &MatchRecord) -> Result<Vec<AgentRating>> {
        Self::tripped(&self.fail_matches)?;
        self.inner.record_match(record)
    }

    fn record_flip(&self, flip: &Flip, qualification_weight: f64) -> Result<AgentRating> {
        self.inner.record_flip(flip, qualification_weight)
    }

    fn append_position(
        &self,
        position: &Position,
        qualification_weight: f64,
    ) -> Result<AgentRating> {
        self.inner.append_position(position, qualification_weight)
    }

    fn positions_for_agent(
        &self,
        agent: &str,
        domain: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Position>> {
        self.inner.positions_for_agent(agent, domain, limit)
    }

    fn recent_matches(&self, limit: usize) -> Result<Vec<MatchRecord>> {
        self.inner.recent_matches(limit)
    }

    fn recent_flips(&self, limit: usize) -> Result<Vec<Flip>> {
        self.inner.recent_flips(limit)
    }

    fn rating(&self, agent: &str, domain: &str) -> Result<Option<AgentRating>> {
        self.inner.rating(agent, domain)
    }

    fn leaderboard(&self, domain: Option<&str>, limit: usize) -> Result<Vec<AgentRating>> {
        self.inner.leaderboard(domain, limit)
    }

    fn schema_version(&self, module: &str) -> Result<u32> {
        self.inner.schema_version(module)
    }
}
