//! JSONL-backed store: append files on disk, bounded in-memory rings for
//! fast reads.
//!
//! Layout under the data directory, one subdirectory per logical schema:
//!
//! ```text
//! core/    VERSION  debates.jsonl  messages.jsonl  events.jsonl
//! agents/  VERSION  matches.jsonl  ratings.jsonl   flips.jsonl
//! memory/  VERSION  positions.jsonl
//! ```
//!
//! Debates and ratings are mutable records persisted as append-with-last-wins
//! rows; everything else is strictly append-only. All writes go through one
//! write lock, which both serializes event sequence assignment and keeps
//! multi-row commits (match + ratings) invisible until complete. Files are
//! written before memory, so a failed append surfaces as an error with no
//! state change.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use ag_domain::config::StorageConfig;
use ag_domain::debate::{Debate, DebateMessage, DebateStatus};
use ag_domain::error::{Error, Result};
use ag_domain::event::Event;
use ag_domain::ranking::{AgentRating, Flip, MatchRecord, Position};

use crate::migrate;
use crate::store::{DebateSeal, Store};

const ELO_SUM_TOLERANCE: f64 = 1e-6;
/// Bound applied to event reads regardless of the caller's limit.
const MAX_EVENT_READ: usize = 1000;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct JsonlStore {
    core_dir: PathBuf,
    agents_dir: PathBuf,
    memory_dir: PathBuf,
    max_in_memory: usize,
    max_read_limit: usize,
    versions: HashMap<String, u32>,
    inner: RwLock<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
    // core
    debates: Vec<Debate>,
    by_id: HashMap<String, usize>,
    by_slug: HashMap<String, usize>,
    messages: HashMap<String, Vec<DebateMessage>>,
    message_keys: HashSet<String>,
    /// Bounded tail of the durable event log.
    events: VecDeque<Event>,
    next_seq: u64,
    // agents
    matches: VecDeque<MatchRecord>,
    flips: VecDeque<Flip>,
    ratings: HashMap<(String, String), AgentRating>,
    // memory
    positions: Vec<Position>,
}

impl JsonlStore {
    /// Open (or initialize) the store at `cfg.data_dir`, validating and
    /// forward-migrating each schema module.
    pub fn open(cfg: &StorageConfig) -> Result<Self> {
        let core_dir = cfg.data_dir.join("core");
        let agents_dir = cfg.data_dir.join("agents");
        let memory_dir = cfg.data_dir.join("memory");

        let mut versions = HashMap::new();
        versions.insert("core".to_string(), migrate::open_module(&core_dir, "core")?);
        versions.insert(
            "agents".to_string(),
            migrate::open_module(&agents_dir, "agents")?,
        );
        versions.insert(
            "memory".to_string(),
            migrate::open_module(&memory_dir, "memory")?,
        );

        let store = Self {
            core_dir,
            agents_dir,
            memory_dir,
            max_in_memory: cfg.max_in_memory,
            max_read_limit: cfg.max_read_limit,
            versions,
            inner: RwLock::new(StoreInner::default()),
        };
        store.load()?;
        Ok(store)
    }

    // ── Loading ──────────────────────────────────────────────────────

    fn load(&self) -> Result<()> {
        let mut inner = self.inner.write();

        for debate in read_jsonl::<Debate>(&self.core_dir.join("debates.jsonl")) {
            // Append-with-last-wins: a later row for the same id replaces
            // the earlier one.
            let existing = inner.by_id.get(&debate.debate_id).copied();
            match existing {
                Some(idx) => inner.debates[idx] = debate,
                None => {
                    let idx = inner.debates.len();
                    inner.by_id.insert(debate.debate_id.clone(), idx);
                    inner.by_slug.insert(debate.slug.clone(), idx);
                    inner.debates.push(debate);
                }
            }
        }

        for message in read_jsonl::<DebateMessage>(&self.core_dir.join("messages.jsonl")) {
            inner.message_keys.insert(message.unique_key());
            inner
                .messages
                .entry(message.debate_id.clone())
                .or_default()
                .push(message);
        }

        let mut max_seq = 0u64;
        for event in read_jsonl::<Event>(&self.core_dir.join("events.jsonl")) {
            max_seq = max_seq.max(event.seq);
            inner.events.push_back(event);
            if inner.events.len() > self.max_in_memory {
                inner.events.pop_front();
            }
        }
        inner.next_seq = max_seq + 1;

        for m in read_jsonl::<MatchRecord>(&self.agents_dir.join("matches.jsonl")) {
            inner.matches.push_back(m);
            if inner.matches.len() > self.max_in_memory {
                inner.matches.pop_front();
            }
        }
        for f in read_jsonl::<Flip>(&self.agents_dir.join("flips.jsonl")) {
            inner.flips.push_back(f);
            if inner.flips.len() > self.max_in_memory {
                inner.flips.pop_front();
            }
        }
        for r in read_jsonl::<AgentRating>(&self.agents_dir.join("ratings.jsonl")) {
            inner.ratings.insert((r.agent.clone(), r.domain.clone()), r);
        }
        for p in read_jsonl::<Position>(&self.memory_dir.join("positions.jsonl")) {
            inner.positions.push(p);
        }

        tracing::debug!(
            debates = inner.debates.len(),
            events = inner.events.len(),
            ratings = inner.ratings.len(),
            "store loaded"
        );
        Ok(())
    }

    // ── Write helpers ────────────────────────────────────────────────

    fn append_line<T: Serialize>(&self, path: &Path, row: &T) -> Result<()> {
        let json = serde_json::to_string(row)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| Error::Storage(format!("{}: {e}", path.display())))?;
        writeln!(file, "{json}").map_err(|e| Error::Storage(format!("{}: {e}", path.display())))?;
        Ok(())
    }

    fn persist_debate(&self, debate: &Debate) -> Result<()> {
        self.append_line(&self.core_dir.join("debates.jsonl"), debate)
    }

    fn persist_rating(&self, rating: &AgentRating) -> Result<()> {
        self.append_line(&self.agents_dir.join("ratings.jsonl"), rating)
    }
}

fn read_jsonl<T: serde::de::DeserializeOwned>(path: &Path) -> Vec<T> {
    let mut rows = Vec::new();
    if let Ok(content) = std::fs::read_to_string(path) {
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(line) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable row")
                }
            }
        }
    }
    rows
}

fn rating_entry<'a>(
    ratings: &'a mut HashMap<(String, String), AgentRating>,
    agent: &str,
    domain: &str,
) -> &'a mut AgentRating {
    ratings
        .entry((agent.to_string(), domain.to_string()))
        .or_insert_with(|| AgentRating::new(agent, domain))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store impl
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Store for JsonlStore {
    fn append_event(&self, mut event: Event) -> Result<Event> {
        let mut inner = self.inner.write();
        event.seq = inner.next_seq;
        self.append_line(&self.core_dir.join("events.jsonl"), &event)?;
        inner.next_seq += 1;
        inner.events.push_back(event.clone());
        if inner.events.len() > self.max_in_memory {
            inner.events.pop_front();
        }
        Ok(event)
    }

    fn read_events(
        &self,
        debate_id: Option<&str>,
        after_seq: Option<u64>,
        limit: usize,
    ) -> Result<Vec<Event>> {
        let limit = limit.clamp(1, MAX_EVENT_READ);
        let after = after_seq.unwrap_or(0);
        let inner = self.inner.read();

        // The in-memory ring covers the tail of the log; fall back to the
        // file when the cursor predates it.
        let ring_start = inner.events.front().map(|e| e.seq).unwrap_or(u64::MAX);
        let matches_filter = |e: &Event| {
            e.seq > after
                && debate_id
                    .map(|d| e.debate_id.as_deref() == Some(d))
                    .unwrap_or(true)
        };

        if after + 1 >= ring_start || inner.events.is_empty() {
            Ok(inner
                .events
                .iter()
                .filter(|e| matches_filter(e))
                .take(limit)
                .cloned()
                .collect())
        } else {
            Ok(read_jsonl::<Event>(&self.core_dir.join("events.jsonl"))
                .into_iter()
                .filter(|e| matches_filter(e))
                .take(limit)
                .collect())
        }
    }

    fn create_debate(&self, debate: &Debate) -> Result<()> {
        if debate.rounds_planned == 0 {
            return Err(Error::InvalidInput("rounds_planned must be at least 1".into()));
        }
        let mut inner = self.inner.write();
        if inner.by_slug.contains_key(&debate.slug) {
            return Err(Error::Integrity(format!("duplicate slug '{}'", debate.slug)));
        }
        if inner.by_id.contains_key(&debate.debate_id) {
            return Err(Error::Integrity(format!(
                "duplicate debate id '{}'",
                debate.debate_id
            )));
        }
        self.persist_debate(debate)?;
        let idx = inner.debates.len();
        inner.by_id.insert(debate.debate_id.clone(), idx);
        inner.by_slug.insert(debate.slug.clone(), idx);
        inner.debates.push(debate.clone());
        Ok(())
    }

    fn get_debate(&self, slug_or_id: &str) -> Result<Option<Debate>> {
        let inner = self.inner.read();
        let idx = inner
            .by_slug
            .get(slug_or_id)
            .or_else(|| inner.by_id.get(slug_or_id));
        Ok(idx.map(|&i| inner.debates[i].clone()))
    }

    fn list_debates(
        &self,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<(Vec<Debate>, Option<String>)> {
        let limit = limit.clamp(1, self.max_read_limit);
        let inner = self.inner.read();

        let mut iter = inner.debates.iter().rev();
        if let Some(cursor_id) = cursor {
            // Skip everything up to and including the cursor debate.
            for d in iter.by_ref() {
                if d.debate_id == cursor_id {
                    break;
                }
            }
        }

        let page: Vec<Debate> = iter.take(limit).cloned().collect();
        let next_cursor = if page.len() == limit {
            page.last().map(|d| d.debate_id.clone())
        } else {
            None
        };
        Ok((page, next_cursor))
    }

    fn seal_debate(&self, debate_id: &str, seal: &DebateSeal) -> Result<()> {
        let mut inner = self.inner.write();
        let idx = *inner
            .by_id
            .get(debate_id)
            .ok_or_else(|| Error::NotFound(format!("debate '{debate_id}'")))?;

        if inner.debates[idx].status == DebateStatus::Sealed {
            let existing = &inner.debates[idx];
            let same = existing.rounds_used == seal.rounds_used
                && existing.outcome == Some(seal.outcome)
                && existing.consensus_reached == seal.consensus_reached
                && existing.confidence == seal.confidence
                && existing.final_artifact == seal.final_artifact;
            return if same {
                Ok(())
            } else {
                Err(Error::Integrity(format!(
                    "debate '{debate_id}' already sealed with a different payload"
                )))
            };
        }

        if seal.rounds_used > inner.debates[idx].rounds_planned {
            return Err(Error::Integrity(
                "rounds_used exceeds rounds_planned".into(),
            ));
        }
        if seal.consensus_reached != seal.confidence.is_some() {
            return Err(Error::Integrity(
                "confidence must be present exactly when consensus is reached".into(),
            ));
        }

        let mut sealed = inner.debates[idx].clone();
        sealed.rounds_used = seal.rounds_used;
        sealed.outcome = Some(seal.outcome);
        sealed.consensus_reached = seal.consensus_reached;
        sealed.confidence = seal.confidence;
        sealed.final_artifact = seal.final_artifact.clone();
        sealed.status = DebateStatus::Sealed;
        sealed.sealed_at = Some(Utc::now());

        self.persist_debate(&sealed)?;
        inner.debates[idx] = sealed;
        Ok(())
    }

    fn append_message(&self, message: &DebateMessage) -> Result<()> {
        let mut inner = self.inner.write();
        let idx = *inner
            .by_id
            .get(&message.debate_id)
            .ok_or_else(|| Error::NotFound(format!("debate '{}'", message.debate_id)))?;
        let rounds_planned = inner.debates[idx].rounds_planned;
        if message.round == 0 || message.round > rounds_planned {
            return Err(Error::InvalidInput(format!(
                "round {} outside [1, {rounds_planned}]",
                message.round
            )));
        }
        let key = message.unique_key();
        if inner.message_keys.contains(&key) {
            return Err(Error::Integrity(format!("duplicate message '{key}'")));
        }
        self.append_line(&self.core_dir.join("messages.jsonl"), message)?;
        inner.message_keys.insert(key);
        inner
            .messages
            .entry(message.debate_id.clone())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    fn messages_for(&self, debate_id: &str) -> Result<Vec<DebateMessage>> {
        let inner = self.inner.read();
        Ok(inner.messages.get(debate_id).cloned().unwrap_or_default())
    }

    fn record_match(&self, record: &MatchRecord) -> Result<Vec<AgentRating>> {
        if record.participants.len() < 2 {
            return Err(Error::InvalidInput(
                "a match requires at least two participants".into(),
            ));
        }
        if record.elo_sum().abs() > ELO_SUM_TOLERANCE {
            return Err(Error::Integrity(format!(
                "elo changes sum to {} (not zero)",
                record.elo_sum()
            )));
        }

        let mut inner = self.inner.write();

        // Compute the updated ratings first; commit files, then memory.
        let mut updated: Vec<AgentRating> = Vec::with_capacity(record.participants.len());
        for agent in &record.participants {
            let mut rating = inner
                .ratings
                .get(&(agent.clone(), record.domain.clone()))
                .cloned()
                .unwrap_or_else(|| AgentRating::new(agent, &record.domain));
            rating.elo += record.elo_changes.get(agent).copied().unwrap_or(0.0);
            match &record.winner {
                Some(w) if w == agent => rating.wins += 1,
                Some(_) => rating.losses += 1,
                None => rating.draws += 1,
            }
            rating.updated_at = Utc::now();
            updated.push(rating);
        }

        self.append_line(&self.agents_dir.join("matches.jsonl"), record)?;
        for rating in &updated {
            self.persist_rating(rating)?;
        }

        for rating in &updated {
            inner.ratings.insert(
                (rating.agent.clone(), rating.domain.clone()),
                rating.clone(),
            );
        }
        inner.matches.push_back(record.clone());
        if inner.matches.len() > self.max_in_memory {
            inner.matches.pop_front();
        }
        Ok(updated)
    }

    fn record_flip(&self, flip: &Flip, qualification_weight: f64) -> Result<AgentRating> {
        if !(0.0..=1.0).contains(&flip.similarity) {
            return Err(Error::InvalidInput("flip similarity outside [0, 1]".into()));
        }
        let mut inner = self.inner.write();

        let mut rating = inner
            .ratings
            .get(&(flip.agent.clone(), flip.domain.clone()))
            .cloned()
            .unwrap_or_else(|| AgentRating::new(&flip.agent, &flip.domain));
        match flip.kind {
            ag_domain::ranking::FlipKind::Contradiction => rating.contradictions += 1,
            ag_domain::ranking::FlipKind::Retraction => rating.retractions += 1,
            ag_domain::ranking::FlipKind::Qualification => rating.qualifications += 1,
            ag_domain::ranking::FlipKind::Refinement => {}
        }
        rating.recompute_consistency(qualification_weight);
        rating.updated_at = Utc::now();

        self.append_line(&self.agents_dir.join("flips.jsonl"), flip)?;
        self.persist_rating(&rating)?;

        inner.ratings.insert(
            (rating.agent.clone(), rating.domain.clone()),
            rating.clone(),
        );
        inner.flips.push_back(flip.clone());
        if inner.flips.len() > self.max_in_memory {
            inner.flips.pop_front();
        }
        Ok(rating)
    }

    fn append_position(
        &self,
        position: &Position,
        qualification_weight: f64,
    ) -> Result<AgentRating> {
        let mut inner = self.inner.write();

        let mut rating = inner
            .ratings
            .get(&(position.agent.clone(), position.domain.clone()))
            .cloned()
            .unwrap_or_else(|| AgentRating::new(&position.agent, &position.domain));
        rating.total_positions += 1;
        rating.recompute_consistency(qualification_weight);
        rating.updated_at = Utc::now();

        self.append_line(&self.memory_dir.join("positions.jsonl"), position)?;
        self.persist_rating(&rating)?;

        inner.ratings.insert(
            (rating.agent.clone(), rating.domain.clone()),
            rating.clone(),
        );
        inner.positions.push(position.clone());
        Ok(rating)
    }

    fn positions_for_agent(
        &self,
        agent: &str,
        domain: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Position>> {
        let limit = limit.clamp(1, self.max_read_limit);
        let inner = self.inner.read();
        Ok(inner
            .positions
            .iter()
            .rev()
            .filter(|p| {
                p.agent == agent && domain.map(|d| p.domain == d).unwrap_or(true)
            })
            .take(limit)
            .cloned()
            .collect())
    }

    fn recent_matches(&self, limit: usize) -> Result<Vec<MatchRecord>> {
        let limit = limit.clamp(1, self.max_read_limit);
        let inner = self.inner.read();
        Ok(inner.matches.iter().rev().take(limit).cloned().collect())
    }

    fn recent_flips(&self, limit: usize) -> Result<Vec<Flip>> {
        let limit = limit.clamp(1, self.max_read_limit);
        let inner = self.inner.read();
        Ok(inner.flips.iter().rev().take(limit).cloned().collect())
    }

    fn rating(&self, agent: &str, domain: &str) -> Result<Option<AgentRating>> {
        let inner = self.inner.read();
        Ok(inner
            .ratings
            .get(&(agent.to_string(), domain.to_string()))
            .cloned())
    }

    fn leaderboard(&self, domain: Option<&str>, limit: usize) -> Result<Vec<AgentRating>> {
        let limit = limit.clamp(1, self.max_read_limit);
        let inner = self.inner.read();
        let mut rows: Vec<AgentRating> = inner
            .ratings
            .values()
            .filter(|r| domain.map(|d| r.domain == d).unwrap_or(true))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.elo.partial_cmp(&a.elo).unwrap_or(std::cmp::Ordering::Equal));
        rows.truncate(limit);
        Ok(rows)
    }

    fn schema_version(&self, module: &str) -> Result<u32> {
        self.versions
            .get(module)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("schema module '{module}'")))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
