//! The debate orchestrator: one state machine from admitted task to sealed
//! record.
//!
//! `Created → Running(round, phase) → Voting → Sealing → Terminal`, where
//! Terminal is one of consensus, no_consensus, canceled or error. The
//! orchestrator owns the in-progress debate and the ordering of its events;
//! it depends only on capability traits (store, event sink, agent caller via
//! the invoker, embedder) so composition happens at the edge.
//!
//! Within a phase, agents run in parallel; results are gathered and emitted
//! in the configured agent order so event streams are reproducible.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ag_domain::config::{ConsensusPolicy, DebateConfig, Phase, RankingConfig};
use ag_domain::debate::{
    ConsensusResult, Debate, DebateMessage, DebateOutcome, TurnRole, Vote,
};
use ag_domain::error::{Error, Result};
use ag_domain::event::{Event, EventPayload};
use ag_domain::ranking::{MatchRecord, Position, DEFAULT_ELO};
use ag_providers::traits::ChatMessage;
use ag_storage::{DebateSeal, Store};
use chrono::Utc;
use uuid::Uuid;

use crate::bus::EventSink;
use crate::cancel::CancelToken;
use crate::convergence::{round_similarity, ConvergenceTracker};
use crate::elo;
use crate::embed::Embedder;
use crate::flips::FlipEngine;
use crate::invoker::{find_json_object, AgentInvoker, TurnInput};
use crate::voting::{self, Candidate};

/// Rotating cognitive stances assigned when role rotation is on.
const COGNITIVE_ROLES: [&str; 4] = ["analyst", "skeptic", "innovator", "synthesizer"];

/// Messages of history included in each prompt.
const HISTORY_WINDOW: usize = 30;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// External collaborators
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Pre-round research micro-phase. The tool-calling side lives outside the
/// engine; the default implementation contributes nothing.
#[async_trait::async_trait]
pub trait Researcher: Send + Sync {
    async fn research(&self, task: &str, round: u32) -> Result<Option<String>>;
}

pub struct NoopResearcher;

#[async_trait::async_trait]
impl Researcher for NoopResearcher {
    async fn research(&self, _task: &str, _round: u32) -> Result<Option<String>> {
        Ok(None)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request & context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct DebateRequest {
    pub task: String,
    pub agents: Vec<String>,
    pub config: DebateConfig,
}

struct Ctx {
    debate: Debate,
    cfg: DebateConfig,
    cancel: CancelToken,
    deadline: Instant,
    history: Vec<DebateMessage>,
    consecutive_failures: u32,
    rounds_used: u32,
}

enum DriveOutcome {
    Decided {
        result: ConsensusResult,
        candidates: Vec<Candidate>,
    },
    Canceled,
    Failed(Error),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Orchestrator {
    store: Arc<dyn Store>,
    sink: Arc<dyn EventSink>,
    invoker: AgentInvoker,
    embedder: Arc<dyn Embedder>,
    researcher: Arc<dyn Researcher>,
    flips: FlipEngine,
    ranking: RankingConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        sink: Arc<dyn EventSink>,
        invoker: AgentInvoker,
        embedder: Arc<dyn Embedder>,
        ranking: RankingConfig,
    ) -> Self {
        Self {
            store,
            sink,
            invoker,
            embedder,
            researcher: Arc::new(NoopResearcher),
            flips: FlipEngine::new(ranking.clone()),
            ranking,
        }
    }

    pub fn with_researcher(mut self, researcher: Arc<dyn Researcher>) -> Self {
        self.researcher = researcher;
        self
    }

    /// Validate the request and create the durable debate record. The
    /// returned debate is `Created`; [`run`](Self::run) drives it to a
    /// terminal state.
    pub fn admit(&self, req: &DebateRequest) -> Result<Debate> {
        if req.task.trim().is_empty() {
            return Err(Error::InvalidInput("task must not be empty".into()));
        }
        if req.agents.len() < 2 {
            return Err(Error::InvalidInput("a debate needs at least two agents".into()));
        }
        if (req.agents.len() as u32) < req.config.min_participants {
            return Err(Error::InvalidInput(format!(
                "{} agents configured but min_participants is {}",
                req.agents.len(),
                req.config.min_participants
            )));
        }
        if req.config.rounds_planned == 0 {
            return Err(Error::InvalidInput("rounds_planned must be at least 1".into()));
        }
        if req.config.phases_per_round.is_empty()
            || !req.config.phases_per_round.contains(&Phase::Propose)
        {
            return Err(Error::InvalidInput(
                "phases_per_round must include the propose phase".into(),
            ));
        }

        let mut debate = Debate::new(&req.task, req.agents.clone(), req.config.rounds_planned);
        debate.domain = Some(req.config.domain.clone());
        self.store.create_debate(&debate)?;
        tracing::info!(
            debate_id = %debate.debate_id,
            slug = %debate.slug,
            agents = debate.agents.len(),
            rounds = debate.rounds_planned,
            policy = ?req.config.consensus_policy,
            "debate admitted"
        );
        Ok(debate)
    }

    /// Drive an admitted debate to its terminal state and seal it. Exactly
    /// one `debate_end` is emitted, whatever the outcome.
    pub async fn run(
        &self,
        debate: Debate,
        cfg: DebateConfig,
        cancel: CancelToken,
    ) -> Result<Debate> {
        let deadline = Instant::now() + Duration::from_secs(cfg.deadline_secs.max(1));
        let mut ctx = Ctx {
            debate,
            cfg,
            cancel,
            deadline,
            history: Vec::new(),
            consecutive_failures: 0,
            rounds_used: 0,
        };

        self.publish(
            Event::new(EventPayload::DebateStart {
                task: ctx.debate.task.clone(),
                agents: ctx.debate.agents.clone(),
                rounds_planned: ctx.debate.rounds_planned,
            })
            .for_debate(&ctx.debate.debate_id),
        )?;

        let outcome = self.drive(&mut ctx).await;
        self.finish(ctx, outcome)
    }

    // ── Round loop ───────────────────────────────────────────────────

    async fn drive(&self, ctx: &mut Ctx) -> DriveOutcome {
        let mut tracker = ConvergenceTracker::new(ctx.cfg.convergence.clone());

        for round in 1..=ctx.cfg.rounds_planned {
            ctx.rounds_used = round;

            if ctx.cancel.is_cancelled() {
                return DriveOutcome::Canceled;
            }
            if Instant::now() >= ctx.deadline {
                return DriveOutcome::Failed(Error::Timeout("debate deadline reached".into()));
            }

            let phases: Vec<String> = ctx
                .cfg
                .phases_per_round
                .iter()
                .map(|p| p.as_str().to_string())
                .collect();
            if let Err(e) = self.publish(
                Event::new(EventPayload::RoundStart { phases })
                    .for_debate(&ctx.debate.debate_id)
                    .in_round(round),
            ) {
                return DriveOutcome::Failed(e);
            }

            let research = if ctx.cfg.research_enabled {
                match self.researcher.research(&ctx.debate.task, round).await {
                    Ok(context) => context,
                    Err(e) => {
                        tracing::warn!(round, error = %e, "research micro-phase failed");
                        None
                    }
                }
            } else {
                None
            };

            let round_started = Instant::now();
            let soft_budget = Duration::from_secs(ctx.cfg.round_soft_budget_secs.max(1));
            let phase_list = ctx.cfg.phases_per_round.clone();

            for phase in &phase_list {
                if ctx.cancel.is_cancelled() {
                    return DriveOutcome::Canceled;
                }
                if phase.is_optional() && round_started.elapsed() >= soft_budget {
                    tracing::info!(
                        round,
                        phase = phase.as_str(),
                        "round soft budget exceeded, skipping optional phase"
                    );
                    continue;
                }

                match self.run_phase(ctx, *phase, round, research.as_deref()).await {
                    Ok(successes) => {
                        if *phase == Phase::Propose
                            && successes < ctx.cfg.min_participants as usize
                        {
                            return DriveOutcome::Failed(Error::Transient(format!(
                                "only {successes} agents produced a proposal in round {round}, \
                                 below min_participants {}",
                                ctx.cfg.min_participants
                            )));
                        }
                    }
                    Err(outcome) => return outcome,
                }
            }

            // Positions and flips for this round's final messages.
            let finals = self.round_final_messages(ctx, round);
            if let Err(e) = self.extract_positions(ctx, &finals).await {
                return DriveOutcome::Failed(e);
            }

            // Round similarity over the final message contents.
            let similarity = self.round_similarity(&finals).await;
            if let Err(e) = self.publish(
                Event::new(EventPayload::RoundEnd { similarity })
                    .for_debate(&ctx.debate.debate_id)
                    .in_round(round),
            ) {
                return DriveOutcome::Failed(e);
            }

            if tracker.observe(round, similarity) {
                tracing::info!(
                    debate_id = %ctx.debate.debate_id,
                    round,
                    similarity = similarity.unwrap_or_default(),
                    "convergence reached, moving to voting early"
                );
                break;
            }
        }

        if ctx.cancel.is_cancelled() {
            return DriveOutcome::Canceled;
        }

        self.vote(ctx).await
    }

    /// Run every agent through one phase in parallel, then persist and emit
    /// the results in agent-list order. Returns the number of successful
    /// turns, or the drive outcome that ends the debate.
    async fn run_phase(
        &self,
        ctx: &mut Ctx,
        phase: Phase,
        round: u32,
        research: Option<&str>,
    ) -> std::result::Result<usize, DriveOutcome> {
        let inputs: Vec<TurnInput> = ctx
            .debate
            .agents
            .iter()
            .enumerate()
            .map(|(idx, agent)| self.turn_input(ctx, agent, idx, phase, round, research))
            .collect();

        let futures = inputs
            .iter()
            .map(|input| self.invoker.invoke(input, &ctx.cancel, ctx.deadline));
        let results = futures_util::future::join_all(futures).await;

        let mut successes = 0;
        for (input, result) in inputs.into_iter().zip(results) {
            match result {
                Ok(message) => {
                    if let Err(e) = self.store.append_message(&message) {
                        return Err(DriveOutcome::Failed(e));
                    }
                    if let Err(e) = self.publish(
                        Event::new(EventPayload::AgentMessage {
                            message: message.clone(),
                        })
                        .for_debate(&ctx.debate.debate_id)
                        .in_round(round)
                        .from_agent(&message.agent),
                    ) {
                        return Err(DriveOutcome::Failed(e));
                    }
                    if phase == Phase::Critique {
                        if let Err(e) = self.publish(
                            Event::new(EventPayload::Critique {
                                target: None,
                                excerpt: excerpt(&message.content, 200),
                            })
                            .for_debate(&ctx.debate.debate_id)
                            .in_round(round)
                            .from_agent(&message.agent),
                        ) {
                            return Err(DriveOutcome::Failed(e));
                        }
                    }
                    ctx.consecutive_failures = 0;
                    ctx.history.push(message);
                    successes += 1;
                }
                Err(Error::Canceled) => return Err(DriveOutcome::Canceled),
                Err(Error::Storage(s)) => {
                    return Err(DriveOutcome::Failed(Error::Storage(s)))
                }
                Err(e) => {
                    // Abstention for this phase; the invoker already emitted
                    // the error event.
                    tracing::warn!(
                        debate_id = %ctx.debate.debate_id,
                        agent = %input.agent,
                        round,
                        phase = phase.as_str(),
                        error = %e,
                        "agent abstained after retries"
                    );
                    ctx.consecutive_failures += 1;
                    if ctx.consecutive_failures >= ctx.cfg.max_consecutive_failures {
                        return Err(DriveOutcome::Failed(Error::Transient(format!(
                            "{} consecutive agent failures",
                            ctx.consecutive_failures
                        ))));
                    }
                }
            }
        }
        Ok(successes)
    }

    // ── Voting ───────────────────────────────────────────────────────

    async fn vote(&self, ctx: &mut Ctx) -> DriveOutcome {
        if Instant::now() >= ctx.deadline {
            return DriveOutcome::Failed(Error::Timeout(
                "debate deadline reached before voting".into(),
            ));
        }
        let candidates = self.candidates(ctx);
        if candidates.is_empty() {
            let result = ConsensusResult {
                reached: false,
                choice: None,
                confidence: None,
            };
            if let Err(e) = self.publish_consensus(ctx, &result) {
                return DriveOutcome::Failed(e);
            }
            return DriveOutcome::Decided { result, candidates };
        }

        let round = ctx.rounds_used.max(1);
        let mut votes: Vec<Vote> = Vec::new();

        if ctx.cfg.consensus_policy == ConsensusPolicy::Judge {
            let judge = ctx
                .cfg
                .judge
                .clone()
                .unwrap_or_else(|| ctx.debate.agents.last().cloned().unwrap_or_default());
            let input = self.vote_input(ctx, &judge, TurnRole::Judge, round, &candidates);
            match self.invoker.invoke(&input, &ctx.cancel, ctx.deadline).await {
                Ok(message) => {
                    if let Err(e) = self.store.append_message(&message) {
                        return DriveOutcome::Failed(e);
                    }
                    if let Some(vote) = parse_vote(&judge, &message.content, &candidates) {
                        if let Err(e) = self.publish_vote(ctx, round, &vote) {
                            return DriveOutcome::Failed(e);
                        }
                        votes.push(vote);
                    }
                }
                Err(Error::Canceled) => return DriveOutcome::Canceled,
                Err(e) => {
                    tracing::warn!(judge = %judge, error = %e, "judge failed to decide");
                }
            }
        } else {
            let inputs: Vec<TurnInput> = ctx
                .debate
                .agents
                .iter()
                .map(|agent| self.vote_input(ctx, agent, TurnRole::Voter, round, &candidates))
                .collect();
            let futures = inputs
                .iter()
                .map(|input| self.invoker.invoke(input, &ctx.cancel, ctx.deadline));
            let results = futures_util::future::join_all(futures).await;

            for (input, result) in inputs.into_iter().zip(results) {
                match result {
                    Ok(message) => {
                        if let Err(e) = self.store.append_message(&message) {
                            return DriveOutcome::Failed(e);
                        }
                        match parse_vote(&input.agent, &message.content, &candidates) {
                            Some(vote) => {
                                if let Err(e) = self.publish_vote(ctx, round, &vote) {
                                    return DriveOutcome::Failed(e);
                                }
                                votes.push(vote);
                            }
                            None => {
                                tracing::warn!(agent = %input.agent, "unparseable vote, treating as abstention");
                            }
                        }
                    }
                    Err(Error::Canceled) => return DriveOutcome::Canceled,
                    Err(e) => {
                        tracing::warn!(agent = %input.agent, error = %e, "voter abstained");
                    }
                }
            }
        }

        let weights = if ctx.cfg.consensus_policy == ConsensusPolicy::Weighted {
            let mut elos = HashMap::new();
            for agent in &ctx.debate.agents {
                let elo = self
                    .store
                    .rating(agent, &ctx.cfg.domain)
                    .ok()
                    .flatten()
                    .map(|r| r.elo)
                    .unwrap_or(DEFAULT_ELO);
                elos.insert(agent.clone(), elo);
            }
            voting::elo_weights(&elos)
        } else {
            HashMap::new()
        };

        let result = voting::apply_policy(
            ctx.cfg.consensus_policy,
            ctx.cfg.consensus_threshold,
            &votes,
            &candidates,
            &weights,
        );
        if let Err(e) = self.publish_consensus(ctx, &result) {
            return DriveOutcome::Failed(e);
        }
        DriveOutcome::Decided { result, candidates }
    }

    // ── Sealing ──────────────────────────────────────────────────────

    fn finish(&self, ctx: Ctx, outcome: DriveOutcome) -> Result<Debate> {
        let debate_id = ctx.debate.debate_id.clone();
        let rounds_used = ctx.rounds_used.min(ctx.debate.rounds_planned);

        let seal = match outcome {
            DriveOutcome::Decided { result, candidates } => {
                let winning = result.choice.as_ref().and_then(|agent| {
                    candidates.iter().find(|c| &c.agent == agent)
                });

                // A match is recorded on consensus, or when a ranking policy
                // still produced a plurality leader.
                if let Some(winner) = winning {
                    let winner_agent = winner.agent.clone();
                    self.record_match(&ctx, &winner_agent);
                }

                if result.reached {
                    let artifact = winning.map(|c| {
                        serde_json::json!({
                            "choice": c.content,
                            "proposed_by": c.agent,
                            "confidence": result.confidence,
                            "policy": ctx.cfg.consensus_policy,
                        })
                    });
                    DebateSeal {
                        rounds_used,
                        outcome: DebateOutcome::Consensus,
                        consensus_reached: true,
                        confidence: result.confidence,
                        final_artifact: artifact,
                    }
                } else {
                    DebateSeal {
                        rounds_used,
                        outcome: DebateOutcome::NoConsensus,
                        consensus_reached: false,
                        confidence: None,
                        final_artifact: None,
                    }
                }
            }
            DriveOutcome::Canceled => DebateSeal {
                rounds_used,
                outcome: DebateOutcome::Canceled,
                consensus_reached: false,
                confidence: None,
                final_artifact: None,
            },
            DriveOutcome::Failed(e) => {
                tracing::error!(debate_id = %debate_id, error = %e, "debate failed");
                DebateSeal {
                    rounds_used,
                    outcome: DebateOutcome::Error,
                    consensus_reached: false,
                    confidence: None,
                    final_artifact: None,
                }
            }
        };

        self.store.seal_debate(&debate_id, &seal)?;
        self.publish(
            Event::new(EventPayload::DebateEnd {
                outcome: seal.outcome,
                rounds_used: seal.rounds_used,
            })
            .for_debate(&debate_id),
        )?;

        tracing::info!(
            debate_id = %debate_id,
            outcome = ?seal.outcome,
            rounds_used = seal.rounds_used,
            "debate sealed"
        );

        self.store
            .get_debate(&debate_id)?
            .ok_or_else(|| Error::NotFound(format!("debate '{debate_id}' after seal")))
    }

    fn record_match(&self, ctx: &Ctx, winner: &str) {
        let domain = ctx.cfg.domain.clone();
        let ratings: Vec<(String, f64)> = ctx
            .debate
            .agents
            .iter()
            .map(|agent| {
                let elo = self
                    .store
                    .rating(agent, &domain)
                    .ok()
                    .flatten()
                    .map(|r| r.elo)
                    .unwrap_or(DEFAULT_ELO);
                (agent.clone(), elo)
            })
            .collect();

        let changes = elo::compute_changes(&ratings, Some(winner), self.ranking.k_factor);
        let record = MatchRecord {
            id: Uuid::new_v4().to_string(),
            debate_id: ctx.debate.debate_id.clone(),
            participants: ctx.debate.agents.clone(),
            winner: Some(winner.to_string()),
            elo_changes: changes,
            domain,
            ts: Utc::now(),
        };

        match self.store.record_match(&record) {
            Ok(_) => {
                if let Err(e) = self.publish(
                    Event::new(EventPayload::MatchRecorded {
                        record: record.clone(),
                    })
                    .for_debate(&ctx.debate.debate_id),
                ) {
                    tracing::warn!(error = %e, "match recorded but event publish failed");
                }
            }
            Err(e) => {
                tracing::error!(
                    debate_id = %ctx.debate.debate_id,
                    error = %e,
                    "failed to record match, ratings unchanged"
                );
            }
        }
    }

    // ── Positions & similarity ───────────────────────────────────────

    /// Each agent's position-bearing message for the round: the revision
    /// when present, else the proposal.
    fn round_final_messages(&self, ctx: &Ctx, round: u32) -> Vec<DebateMessage> {
        ctx.debate
            .agents
            .iter()
            .filter_map(|agent| {
                ctx.history
                    .iter()
                    .filter(|m| {
                        m.round == round
                            && &m.agent == agent
                            && matches!(m.role, TurnRole::Proposer | TurnRole::Reviser)
                    })
                    .last()
                    .cloned()
            })
            .collect()
    }

    async fn extract_positions(&self, ctx: &Ctx, finals: &[DebateMessage]) -> Result<()> {
        if finals.is_empty() {
            return Ok(());
        }
        let claims: Vec<String> = finals.iter().map(|m| claim_of(&m.content)).collect();
        let embeddings = match self.embedder.embed(&claims).await {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "claim embedding failed, skipping flip detection this round");
                vec![Vec::new(); claims.len()]
            }
        };

        for ((message, claim), embedding) in finals.iter().zip(claims).zip(embeddings) {
            let mut position = Position::new(
                &message.agent,
                &claim,
                message.confidence.unwrap_or(0.5),
                &ctx.cfg.domain,
                &ctx.debate.debate_id,
                message.round,
            );
            position.embedding = embedding;

            // Priors before this position lands; same domain first, any
            // domain when the agent has none there yet.
            let flip = if position.embedding.is_empty() {
                None
            } else {
                let mut priors = self.store.positions_for_agent(
                    &position.agent,
                    Some(&ctx.cfg.domain),
                    self.flips.scan_limit(),
                )?;
                if priors.is_empty() {
                    priors = self.store.positions_for_agent(
                        &position.agent,
                        None,
                        self.flips.scan_limit(),
                    )?;
                }
                self.flips.detect(&position, &priors)
            };

            self.store
                .append_position(&position, self.ranking.qualification_weight)?;

            if let Some(flip) = flip {
                self.store
                    .record_flip(&flip, self.ranking.qualification_weight)?;
                self.publish(
                    Event::new(EventPayload::FlipDetected { flip: flip.clone() })
                        .for_debate(&ctx.debate.debate_id)
                        .in_round(message.round)
                        .from_agent(&flip.agent),
                )?;
            }
        }
        Ok(())
    }

    async fn round_similarity(&self, finals: &[DebateMessage]) -> Option<f64> {
        if finals.len() < 2 {
            return None;
        }
        let contents: Vec<String> = finals.iter().map(|m| m.content.clone()).collect();
        match self.embedder.embed(&contents).await {
            Ok(embeddings) => round_similarity(&embeddings),
            Err(e) => {
                tracing::warn!(error = %e, "round similarity embedding failed");
                None
            }
        }
    }

    // ── Prompt assembly ──────────────────────────────────────────────

    fn turn_input(
        &self,
        ctx: &Ctx,
        agent: &str,
        agent_idx: usize,
        phase: Phase,
        round: u32,
        research: Option<&str>,
    ) -> TurnInput {
        let cognitive_role = if ctx.cfg.rotate_roles {
            Some(
                COGNITIVE_ROLES[(agent_idx + round as usize - 1) % COGNITIVE_ROLES.len()]
                    .to_string(),
            )
        } else {
            None
        };

        let role = match phase {
            Phase::Propose => TurnRole::Proposer,
            Phase::Critique => TurnRole::Critic,
            Phase::Revise => TurnRole::Reviser,
        };

        let instruction = match phase {
            Phase::Propose => {
                "State your proposal for the task. Lead with the decision itself, then your \
                 reasoning."
            }
            Phase::Critique => {
                "Critique the other agents' proposals: weaknesses, risks, missed alternatives. \
                 Do not restate your own proposal."
            }
            Phase::Revise => {
                "Revise your proposal in light of the critiques. Keep it if nothing changed \
                 your mind."
            }
        };

        let mut system = format!(
            "You are agent \"{agent}\" in round {round} of a structured multi-agent debate. \
             Your role this phase: {}.",
            role.as_str()
        );
        if let Some(stance) = &cognitive_role {
            system.push_str(&format!(" Adopt the cognitive stance of the {stance}."));
        }
        system.push_str(
            " End your reply with a line of the form `Confidence: 0.x` rating your \
             confidence in your own claim.",
        );

        let mut user = format!("Task: {}\n\n", ctx.debate.task);
        if let Some(context) = research {
            user.push_str(&format!("Research context:\n{context}\n\n"));
        }
        let transcript = transcript_window(&ctx.history, HISTORY_WINDOW);
        if !transcript.is_empty() {
            user.push_str(&format!("Debate so far:\n{transcript}\n\n"));
        }
        user.push_str(instruction);

        TurnInput {
            debate_id: ctx.debate.debate_id.clone(),
            agent: agent.to_string(),
            round,
            role,
            cognitive_role,
            system_prompt: Some(system),
            messages: vec![ChatMessage::user(user)],
            temperature: None,
        }
    }

    fn vote_input(
        &self,
        ctx: &Ctx,
        agent: &str,
        role: TurnRole,
        round: u32,
        candidates: &[Candidate],
    ) -> TurnInput {
        let mut listing = String::new();
        for c in candidates {
            listing.push_str(&format!("- {}: {}\n", c.agent, excerpt(&c.content, 500)));
        }
        let ask = match role {
            TurnRole::Judge => "You are the designated judge. Pick the strongest proposal.",
            _ => "Vote for the strongest proposal (your own included only if it truly is).",
        };
        let user = format!(
            "Task: {}\n\nCandidate proposals:\n{listing}\n{ask}\n\
             Reply with a JSON object: {{\"choice\": \"<agent>\", \"confidence\": <0..1>, \
             \"reasoning\": \"...\"}}",
            ctx.debate.task
        );

        TurnInput {
            debate_id: ctx.debate.debate_id.clone(),
            agent: agent.to_string(),
            round,
            role,
            cognitive_role: None,
            system_prompt: Some(format!(
                "You are agent \"{agent}\" concluding a structured multi-agent debate."
            )),
            messages: vec![ChatMessage::user(user)],
            temperature: None,
        }
    }

    // ── Event helpers ────────────────────────────────────────────────

    fn publish(&self, event: Event) -> Result<()> {
        self.sink.publish(event).map(|_| ())
    }

    fn publish_vote(&self, ctx: &Ctx, round: u32, vote: &Vote) -> Result<()> {
        self.publish(
            Event::new(EventPayload::Vote { vote: vote.clone() })
                .for_debate(&ctx.debate.debate_id)
                .in_round(round)
                .from_agent(&vote.voter),
        )
    }

    fn publish_consensus(&self, ctx: &Ctx, result: &ConsensusResult) -> Result<()> {
        self.publish(
            Event::new(EventPayload::Consensus {
                result: result.clone(),
            })
            .for_debate(&ctx.debate.debate_id),
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Free helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The claim a position carries: the message's first paragraph, bounded.
fn claim_of(content: &str) -> String {
    let first = content
        .split("\n\n")
        .map(str::trim)
        .find(|p| !p.is_empty())
        .unwrap_or("");
    excerpt(first, 300)
}

fn excerpt(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}

fn transcript_window(history: &[DebateMessage], window: usize) -> String {
    let start = history.len().saturating_sub(window);
    history[start..]
        .iter()
        .map(|m| {
            format!(
                "[round {}] {} ({}): {}",
                m.round,
                m.agent,
                m.role.as_str(),
                excerpt(&m.content, 400)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse a vote out of agent output: a JSON `choice`/`confidence` object
/// anywhere in the text, else the first candidate name mentioned.
fn parse_vote(voter: &str, content: &str, candidates: &[Candidate]) -> Option<Vote> {
    if let Some(v) = find_json_object(content) {
        if let Some(choice_raw) = v.get("choice").and_then(|c| c.as_str()) {
            let choice = candidates
                .iter()
                .find(|c| c.agent.eq_ignore_ascii_case(choice_raw.trim()))
                .map(|c| c.agent.clone());
            if let Some(choice) = choice {
                let confidence = v
                    .get("confidence")
                    .and_then(|c| c.as_f64())
                    .unwrap_or(0.5)
                    .clamp(0.0, 1.0);
                let reasoning = v
                    .get("reasoning")
                    .and_then(|r| r.as_str())
                    .map(String::from);
                return Some(Vote {
                    voter: voter.to_string(),
                    choice,
                    confidence,
                    reasoning,
                });
            }
        }
    }

    // Prose fallback: first candidate mentioned by name.
    let lowered = content.to_lowercase();
    candidates
        .iter()
        .filter_map(|c| {
            lowered
                .find(&c.agent.to_lowercase())
                .map(|pos| (pos, c.agent.clone()))
        })
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, choice)| Vote {
            voter: voter.to_string(),
            choice,
            confidence: crate::invoker::extract_confidence(content).unwrap_or(0.5),
            reasoning: None,
        })
}

impl Orchestrator {
    /// Candidate proposals: for each agent, the latest proposal-bearing
    /// message, tagged with the round its first proposal appeared in.
    fn candidates(&self, ctx: &Ctx) -> Vec<Candidate> {
        ctx.debate
            .agents
            .iter()
            .filter_map(|agent| {
                let proposals: Vec<&DebateMessage> = ctx
                    .history
                    .iter()
                    .filter(|m| {
                        &m.agent == agent
                            && matches!(m.role, TurnRole::Proposer | TurnRole::Reviser)
                    })
                    .collect();
                let first_round = proposals
                    .iter()
                    .filter(|m| m.role == TurnRole::Proposer)
                    .map(|m| m.round)
                    .min()?;
                let latest = proposals.last()?;
                Some(Candidate {
                    agent: agent.clone(),
                    first_round,
                    content: latest.content.clone(),
                })
            })
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_is_first_paragraph() {
        assert_eq!(claim_of("Use X.\n\nBecause reasons."), "Use X.");
        assert_eq!(claim_of("\n\n  lead claim  \n\nrest"), "lead claim");
        assert_eq!(claim_of(""), "");
    }

    #[test]
    fn excerpt_char_boundary_safe() {
        let s = "héllo wörld, a long enough sentence";
        let e = excerpt(s, 6);
        assert!(e.ends_with('…'));
    }

    #[test]
    fn parse_vote_json() {
        let candidates = vec![
            Candidate {
                agent: "alpha".into(),
                first_round: 1,
                content: "X".into(),
            },
            Candidate {
                agent: "beta".into(),
                first_round: 1,
                content: "Y".into(),
            },
        ];
        let vote = parse_vote(
            "beta",
            r#"I pick alpha. {"choice": "Alpha", "confidence": 0.9, "reasoning": "clearer"}"#,
            &candidates,
        )
        .unwrap();
        assert_eq!(vote.choice, "alpha");
        assert_eq!(vote.confidence, 0.9);
        assert_eq!(vote.reasoning.as_deref(), Some("clearer"));
    }

    #[test]
    fn parse_vote_prose_fallback() {
        let candidates = vec![
            Candidate {
                agent: "alpha".into(),
                first_round: 1,
                content: "X".into(),
            },
            Candidate {
                agent: "beta".into(),
                first_round: 1,
                content: "Y".into(),
            },
        ];
        let vote = parse_vote(
            "x",
            "After consideration, beta's proposal is stronger. Confidence: 0.7",
            &candidates,
        )
        .unwrap();
        assert_eq!(vote.choice, "beta");
        assert!((vote.confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn parse_vote_unknown_choice_falls_back_to_mention() {
        let candidates = vec![Candidate {
            agent: "alpha".into(),
            first_round: 1,
            content: "X".into(),
        }];
        // JSON names a non-candidate; the prose mentions alpha.
        let vote = parse_vote(
            "x",
            r#"{"choice": "gamma", "confidence": 0.9} but really alpha"#,
            &candidates,
        )
        .unwrap();
        assert_eq!(vote.choice, "alpha");
    }

    #[test]
    fn parse_vote_nothing_matches() {
        let candidates = vec![Candidate {
            agent: "alpha".into(),
            first_round: 1,
            content: "X".into(),
        }];
        assert!(parse_vote("x", "no opinion at all", &candidates).is_none());
    }

    #[test]
    fn transcript_windows_tail() {
        let mk = |round: u32, agent: &str| DebateMessage {
            debate_id: "d".into(),
            round,
            agent: agent.into(),
            role: TurnRole::Proposer,
            cognitive_role: None,
            content: format!("msg {round} {agent}"),
            confidence: None,
            citations: vec![],
            ts: Utc::now(),
        };
        let history: Vec<DebateMessage> = (1..=5).map(|r| mk(r, "a")).collect();
        let t = transcript_window(&history, 2);
        assert!(t.contains("msg 4"));
        assert!(t.contains("msg 5"));
        assert!(!t.contains("msg 3"));
    }
}
