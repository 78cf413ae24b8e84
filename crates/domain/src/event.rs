//! The typed event envelope carried by the event bus.
//!
//! Wire form is a flat JSON object: the header fields plus `type` / `data`
//! from the payload enum, e.g.
//! `{"seq":7,"ts":"…","debate_id":"…","type":"token_delta","data":{"text":"…"}}`.
//! Serialization is a pure projection of this type; there is no separate
//! wire schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::debate::{ConsensusResult, Debate, DebateMessage, DebateOutcome, Vote};
use crate::ranking::{Flip, MatchRecord};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One event as published on the bus and appended to the durable log.
///
/// `seq` is assigned by the storage adapter at append time and is strictly
/// increasing per debate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    pub ts: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debate_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    /// A header-less draft; the bus fills `seq` via the storage adapter.
    pub fn new(payload: EventPayload) -> Self {
        Self {
            seq: 0,
            ts: Utc::now(),
            debate_id: None,
            round: None,
            agent: None,
            payload,
        }
    }

    pub fn for_debate(mut self, debate_id: &str) -> Self {
        self.debate_id = Some(debate_id.to_string());
        self
    }

    pub fn in_round(mut self, round: u32) -> Self {
        self.round = Some(round);
        self
    }

    pub fn from_agent(mut self, agent: &str) -> Self {
        self.agent = Some(agent.to_string());
        self
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Payload variants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Closed set of event payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    // Debate lifecycle
    DebateStart {
        task: String,
        agents: Vec<String>,
        rounds_planned: u32,
    },
    RoundStart {
        phases: Vec<String>,
    },
    RoundEnd {
        #[serde(skip_serializing_if = "Option::is_none")]
        similarity: Option<f64>,
    },
    DebateEnd {
        outcome: DebateOutcome,
        rounds_used: u32,
    },

    // Agent emission
    AgentMessage {
        message: DebateMessage,
    },
    TokenStart {
        attempt: u32,
    },
    TokenDelta {
        text: String,
    },
    TokenEnd {
        partial: bool,
        tokens: u32,
    },

    // Structured outcomes
    Consensus {
        result: ConsensusResult,
    },
    Vote {
        vote: Vote,
    },
    Critique {
        #[serde(skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        excerpt: String,
    },
    MatchRecorded {
        record: MatchRecord,
    },
    FlipDetected {
        flip: Flip,
    },

    // System
    Sync {
        #[serde(skip_serializing_if = "Option::is_none")]
        debate: Option<Box<Debate>>,
        events: Vec<Event>,
    },
    Error {
        code: String,
        message: String,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::DebateStart { .. } => EventKind::DebateStart,
            Self::RoundStart { .. } => EventKind::RoundStart,
            Self::RoundEnd { .. } => EventKind::RoundEnd,
            Self::DebateEnd { .. } => EventKind::DebateEnd,
            Self::AgentMessage { .. } => EventKind::AgentMessage,
            Self::TokenStart { .. } => EventKind::TokenStart,
            Self::TokenDelta { .. } => EventKind::TokenDelta,
            Self::TokenEnd { .. } => EventKind::TokenEnd,
            Self::Consensus { .. } => EventKind::Consensus,
            Self::Vote { .. } => EventKind::Vote,
            Self::Critique { .. } => EventKind::Critique,
            Self::MatchRecorded { .. } => EventKind::MatchRecorded,
            Self::FlipDetected { .. } => EventKind::FlipDetected,
            Self::Sync { .. } => EventKind::Sync,
            Self::Error { .. } => EventKind::Error,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Kind (for subscription filters)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    DebateStart,
    RoundStart,
    RoundEnd,
    DebateEnd,
    AgentMessage,
    TokenStart,
    TokenDelta,
    TokenEnd,
    Consensus,
    Vote,
    Critique,
    MatchRecorded,
    FlipDetected,
    Sync,
    Error,
}
