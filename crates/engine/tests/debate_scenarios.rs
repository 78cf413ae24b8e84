//! End-to-end debate scenarios against the real store and event bus, with
//! scripted agents and embedders standing in for providers.

use std::sync::Arc;
use std::time::Duration;

use ag_domain::config::{
    ConsensusPolicy, DebateConfig, DebateDefaults, Phase, RankingConfig, StorageConfig,
};
use ag_domain::debate::{DebateOutcome, DebateStatus};
use ag_domain::event::{EventKind, EventPayload};
use ag_domain::ranking::FlipKind;
use ag_engine::bus::EventBus;
use ag_engine::cancel::CancelToken;
use ag_engine::embed::{Embedder, LexicalEmbedder};
use ag_engine::invoker::{AgentInvoker, InvokerPolicy, RetryBackoff};
use ag_engine::orchestrator::{DebateRequest, Orchestrator};
use ag_engine::testing::{ScriptedCaller, ScriptedTurn};
use ag_storage::{JsonlStore, Store};

struct Harness {
    orchestrator: Orchestrator,
    store: Arc<JsonlStore>,
    bus: Arc<EventBus>,
    _dir: tempfile::TempDir,
}

fn harness(caller: Arc<ScriptedCaller>) -> Harness {
    harness_with_embedder(caller, Arc::new(LexicalEmbedder))
}

fn harness_with_embedder(caller: Arc<ScriptedCaller>, embedder: Arc<dyn Embedder>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        JsonlStore::open(&StorageConfig {
            data_dir: dir.path().to_path_buf(),
            max_in_memory: 5000,
            max_read_limit: 200,
        })
        .unwrap(),
    );
    let bus = Arc::new(EventBus::new(store.clone(), 1024));
    let invoker = AgentInvoker::new(
        caller,
        bus.clone(),
        InvokerPolicy {
            attempts: 2,
            backoff: RetryBackoff {
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                backoff_factor: 2.0,
            },
            token_budget: 4096,
            inactivity_timeout: Duration::from_secs(5),
            timeout_retry_threshold: 64,
        },
    );
    let orchestrator = Orchestrator::new(
        store.clone(),
        bus.clone(),
        invoker,
        embedder,
        RankingConfig::default(),
    );
    Harness {
        orchestrator,
        store,
        bus,
        _dir: dir,
    }
}

fn config(rounds: u32, policy: ConsensusPolicy) -> DebateConfig {
    let mut cfg = DebateConfig::from_defaults(&DebateDefaults::default());
    cfg.rounds_planned = rounds;
    cfg.phases_per_round = vec![Phase::Propose];
    cfg.consensus_policy = policy;
    cfg.convergence.enabled = false;
    cfg.deadline_secs = 30;
    cfg
}

fn vote_json(choice: &str, confidence: f64) -> ScriptedTurn {
    ScriptedTurn::text(&format!(
        "{{\"choice\": \"{choice}\", \"confidence\": {confidence}}}"
    ))
}

async fn run(
    h: &Harness,
    task: &str,
    agents: &[&str],
    cfg: DebateConfig,
    cancel: CancelToken,
) -> ag_domain::debate::Debate {
    let request = DebateRequest {
        task: task.into(),
        agents: agents.iter().map(|s| s.to_string()).collect(),
        config: cfg.clone(),
    };
    let debate = h.orchestrator.admit(&request).unwrap();
    h.orchestrator.run(debate, cfg, cancel).await.unwrap()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenarios
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn unanimous_two_agents_agree() {
    let caller = Arc::new(ScriptedCaller::new());
    caller.script(
        "a",
        vec![
            ScriptedTurn::text("X"),
            ScriptedTurn::text("X"),
            vote_json("a", 1.0),
        ],
    );
    caller.script(
        "b",
        vec![
            ScriptedTurn::text("X"),
            ScriptedTurn::text("X"),
            vote_json("a", 1.0),
        ],
    );
    let h = harness(caller);

    let debate = run(
        &h,
        "Pick X or Y",
        &["a", "b"],
        config(2, ConsensusPolicy::Unanimous),
        CancelToken::new(),
    )
    .await;

    assert!(debate.consensus_reached);
    assert_eq!(debate.confidence, Some(1.0));
    assert_eq!(debate.outcome, Some(DebateOutcome::Consensus));
    assert_eq!(debate.rounds_used, 2);
    let artifact = debate.final_artifact.unwrap();
    assert_eq!(artifact["choice"], "X");

    // One match: winner a gains K/2 against an equal-rated opponent.
    let matches = h.store.recent_matches(10).unwrap();
    assert_eq!(matches.len(), 1);
    let m = &matches[0];
    assert_eq!(m.winner.as_deref(), Some("a"));
    assert!((m.elo_changes["a"] - 16.0).abs() < 1e-9);
    assert!((m.elo_changes["b"] + 16.0).abs() < 1e-9);
    assert!(m.elo_sum().abs() < 1e-6);

    // Leaderboard reflects the result.
    let board = h.store.leaderboard(Some("general"), 10).unwrap();
    assert_eq!(board[0].agent, "a");
    assert_eq!(board[0].wins, 1);
}

#[tokio::test]
async fn event_order_is_strictly_increasing_per_debate() {
    let caller = Arc::new(ScriptedCaller::new());
    caller.script("a", vec![ScriptedTurn::text("X"), vote_json("a", 0.9)]);
    caller.script("b", vec![ScriptedTurn::text("X"), vote_json("a", 0.9)]);
    let h = harness(caller);

    let debate = run(
        &h,
        "ordering check",
        &["a", "b"],
        config(1, ConsensusPolicy::Majority),
        CancelToken::new(),
    )
    .await;

    let events = h
        .store
        .read_events(Some(&debate.debate_id), None, 1000)
        .unwrap();
    assert!(!events.is_empty());
    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(
        events.first().map(|e| e.kind()),
        Some(EventKind::DebateStart)
    );
    assert_eq!(events.last().map(|e| e.kind()), Some(EventKind::DebateEnd));
}

#[tokio::test]
async fn majority_tie_broken_by_vote_count() {
    // S2: two agents vote "a" (0.6, 0.7), one votes "c" (0.95). Count wins.
    let caller = Arc::new(ScriptedCaller::new());
    caller.script("a", vec![ScriptedTurn::text("X"), vote_json("a", 0.6)]);
    caller.script("b", vec![ScriptedTurn::text("X"), vote_json("a", 0.7)]);
    caller.script("c", vec![ScriptedTurn::text("Y"), vote_json("c", 0.95)]);
    let h = harness(caller);

    let debate = run(
        &h,
        "Pick X or Y with three agents",
        &["a", "b", "c"],
        config(1, ConsensusPolicy::Majority),
        CancelToken::new(),
    )
    .await;

    assert!(debate.consensus_reached);
    let artifact = debate.final_artifact.unwrap();
    assert_eq!(artifact["choice"], "X");
    assert!((debate.confidence.unwrap() - 0.65).abs() < 1e-9);
}

#[tokio::test]
async fn unanimous_disagreement_yields_no_consensus_and_no_match() {
    // S3: two agents disagree across all rounds.
    let caller = Arc::new(ScriptedCaller::new());
    caller.script(
        "a",
        vec![
            ScriptedTurn::text("Use X for everything"),
            ScriptedTurn::text("Use X for everything"),
            ScriptedTurn::text("Use X for everything"),
            vote_json("a", 0.9),
        ],
    );
    caller.script(
        "b",
        vec![
            ScriptedTurn::text("Use Y instead definitely"),
            ScriptedTurn::text("Use Y instead definitely"),
            ScriptedTurn::text("Use Y instead definitely"),
            vote_json("b", 0.9),
        ],
    );
    let h = harness(caller);

    let debate = run(
        &h,
        "X or Y, no agreement",
        &["a", "b"],
        config(3, ConsensusPolicy::Unanimous),
        CancelToken::new(),
    )
    .await;

    assert!(!debate.consensus_reached);
    assert!(debate.confidence.is_none());
    assert_eq!(debate.outcome, Some(DebateOutcome::NoConsensus));
    assert!(h.store.recent_matches(10).unwrap().is_empty());
}

#[tokio::test]
async fn convergence_stops_a_five_round_debate_at_round_three() {
    let caller = Arc::new(ScriptedCaller::new());
    caller.script("a", vec![ScriptedTurn::text("The answer is X, final.")]);
    caller.script("b", vec![ScriptedTurn::text("The answer is X, final.")]);
    let h = harness(caller);

    let mut cfg = config(5, ConsensusPolicy::Majority);
    cfg.convergence.enabled = true;
    cfg.convergence.similarity_threshold = 0.99;
    cfg.convergence.min_rounds = 2;

    let debate = run(
        &h,
        "repeat yourselves",
        &["a", "b"],
        cfg,
        CancelToken::new(),
    )
    .await;

    assert_eq!(debate.rounds_used, 3);
    // Voting still ran after the early stop.
    let events = h
        .store
        .read_events(Some(&debate.debate_id), None, 1000)
        .unwrap();
    let round_ends = events
        .iter()
        .filter(|e| e.kind() == EventKind::RoundEnd)
        .count();
    assert_eq!(round_ends, 3);
}

#[tokio::test]
async fn cancellation_mid_stream_seals_cleanly() {
    // S6: cancel a long debate mid-token-stream.
    let caller = Arc::new(ScriptedCaller::new());
    caller.script(
        "a",
        vec![ScriptedTurn::slow_text(
            "a very long streaming answer that keeps going",
            40,
        )],
    );
    caller.script(
        "b",
        vec![ScriptedTurn::slow_text(
            "another very long streaming answer that keeps going",
            40,
        )],
    );
    let h = harness(caller);

    let cfg = config(10, ConsensusPolicy::Majority);
    let request = DebateRequest {
        task: "marathon debate".into(),
        agents: vec!["a".into(), "b".into()],
        config: cfg.clone(),
    };
    let debate = h.orchestrator.admit(&request).unwrap();
    let debate_id = debate.debate_id.clone();
    let slug = debate.slug.clone();

    let cancel = CancelToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        canceller.cancel();
    });

    let sealed = h.orchestrator.run(debate, cfg, cancel).await.unwrap();
    assert_eq!(sealed.outcome, Some(DebateOutcome::Canceled));
    assert!(!sealed.consensus_reached);
    assert!(h.store.recent_matches(10).unwrap().is_empty());

    // Exactly one debate_end, with canceled outcome; partial token_end(s)
    // for the torn-down streams.
    let events = h.store.read_events(Some(&debate_id), None, 1000).unwrap();
    let ends: Vec<_> = events
        .iter()
        .filter(|e| e.kind() == EventKind::DebateEnd)
        .collect();
    assert_eq!(ends.len(), 1);
    match &ends[0].payload {
        EventPayload::DebateEnd { outcome, .. } => {
            assert_eq!(*outcome, DebateOutcome::Canceled)
        }
        _ => unreachable!(),
    }
    assert!(events.iter().any(|e| matches!(
        &e.payload,
        EventPayload::TokenEnd { partial: true, .. }
    )));

    // Durable state remains readable by slug.
    let stored = h.store.get_debate(&slug).unwrap().unwrap();
    assert_eq!(stored.status, DebateStatus::Sealed);
}

#[tokio::test]
async fn failing_agent_becomes_abstention_when_enough_remain() {
    let caller = Arc::new(ScriptedCaller::new());
    caller.script("a", vec![ScriptedTurn::fail_permanent()]);
    caller.script("b", vec![ScriptedTurn::text("Ship it"), vote_json("b", 0.8)]);
    caller.script("c", vec![ScriptedTurn::text("Ship it"), vote_json("b", 0.8)]);
    let h = harness(caller);

    let debate = run(
        &h,
        "ship or wait",
        &["a", "b", "c"],
        config(1, ConsensusPolicy::Majority),
        CancelToken::new(),
    )
    .await;

    assert!(debate.consensus_reached);
    // The abstaining agent produced no durable messages.
    let messages = h.store.messages_for(&debate.debate_id).unwrap();
    assert!(messages.iter().all(|m| m.agent != "a"));
    // Its failure surfaced as error events.
    let events = h
        .store
        .read_events(Some(&debate.debate_id), None, 1000)
        .unwrap();
    assert!(events.iter().any(|e| e.kind() == EventKind::Error));
}

#[tokio::test]
async fn too_few_proposals_fails_the_debate() {
    let caller = Arc::new(ScriptedCaller::new());
    caller.script("a", vec![ScriptedTurn::fail_permanent()]);
    caller.script("b", vec![ScriptedTurn::fail_permanent()]);
    let h = harness(caller);

    let debate = run(
        &h,
        "nobody shows up",
        &["a", "b"],
        config(2, ConsensusPolicy::Majority),
        CancelToken::new(),
    )
    .await;

    assert_eq!(debate.outcome, Some(DebateOutcome::Error));
    assert!(h.store.recent_matches(10).unwrap().is_empty());
}

#[tokio::test]
async fn judge_policy_lets_one_agent_decide() {
    let caller = Arc::new(ScriptedCaller::new());
    caller.script("a", vec![ScriptedTurn::text("Plan Alpha")]);
    caller.script("b", vec![ScriptedTurn::text("Plan Beta")]);
    caller.script(
        "judge",
        vec![ScriptedTurn::text("weighing…"), vote_json("b", 0.73)],
    );
    let h = harness(caller);

    let mut cfg = config(1, ConsensusPolicy::Judge);
    cfg.judge = Some("judge".into());

    let debate = run(
        &h,
        "alpha or beta",
        &["a", "b", "judge"],
        cfg,
        CancelToken::new(),
    )
    .await;

    assert!(debate.consensus_reached);
    assert_eq!(debate.confidence, Some(0.73));
    let artifact = debate.final_artifact.unwrap();
    assert_eq!(artifact["proposed_by"], "b");
}

#[tokio::test]
async fn refinement_flip_detected_across_debates() {
    // S4: the same agent strengthens a near-identical claim in a later
    // debate; the flip engine records a refinement.
    let caller = Arc::new(ScriptedCaller::new());
    let claim_v1 = "cache size 1 MB is best for this workload profile overall";
    let claim_v2 =
        "cache size 1 MB is best for this workload profile overall assuming workload W";
    caller.script(
        "a",
        vec![
            ScriptedTurn::text(&format!("{claim_v1}\nConfidence: 0.8")),
            vote_json("a", 0.8),
            ScriptedTurn::text(&format!("{claim_v2}\nConfidence: 0.82")),
            vote_json("a", 0.82),
        ],
    );
    caller.script(
        "b",
        vec![
            ScriptedTurn::text("disk layout matters more here"),
            vote_json("a", 0.6),
            ScriptedTurn::text("disk layout matters more here"),
            vote_json("a", 0.6),
        ],
    );
    let h = harness(caller);

    run(
        &h,
        "first cache debate",
        &["a", "b"],
        config(1, ConsensusPolicy::Majority),
        CancelToken::new(),
    )
    .await;
    run(
        &h,
        "second cache debate",
        &["a", "b"],
        config(1, ConsensusPolicy::Majority),
        CancelToken::new(),
    )
    .await;

    let flips = h.store.recent_flips(10).unwrap();
    let refinement = flips
        .iter()
        .find(|f| f.agent == "a" && f.kind == FlipKind::Refinement)
        .expect("refinement flip expected");
    assert!(refinement.similarity >= 0.85);

    // Refinements never hurt consistency.
    let rating = h.store.rating("a", "general").unwrap().unwrap();
    assert_eq!(rating.consistency, 1.0);
}

#[tokio::test]
async fn slow_subscriber_does_not_stall_the_debate() {
    let caller = Arc::new(ScriptedCaller::new());
    caller.script("a", vec![ScriptedTurn::text(&"chunk ".repeat(200)), vote_json("a", 0.9)]);
    caller.script("b", vec![ScriptedTurn::text(&"chunk ".repeat(200)), vote_json("a", 0.9)]);
    let h = harness(caller);

    // A subscriber that never reads: events pile up in its lagging receiver
    // while the orchestrator keeps publishing.
    let _stuck = h.bus.subscribe();

    let debate = run(
        &h,
        "slow viewer",
        &["a", "b"],
        config(2, ConsensusPolicy::Majority),
        CancelToken::new(),
    )
    .await;
    assert_eq!(debate.outcome, Some(DebateOutcome::Consensus));
}

#[tokio::test]
async fn duplicate_task_slugs_do_not_collide() {
    let caller = Arc::new(ScriptedCaller::new());
    caller.script("a", vec![ScriptedTurn::text("X"), vote_json("a", 0.9)]);
    caller.script("b", vec![ScriptedTurn::text("X"), vote_json("a", 0.9)]);
    let h = harness(caller);

    let cfg = config(1, ConsensusPolicy::Majority);
    let d1 = run(&h, "same task", &["a", "b"], cfg.clone(), CancelToken::new()).await;
    let d2 = run(&h, "same task", &["a", "b"], cfg, CancelToken::new()).await;
    assert_ne!(d1.slug, d2.slug);
}

#[tokio::test]
async fn storage_failure_mid_debate_is_fatal() {
    use ag_engine::testing::FailingStore;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FailingStore::wrapping(dir.path()));
    let bus = Arc::new(EventBus::new(store.clone(), 256));
    let caller = Arc::new(ScriptedCaller::new());
    caller.script("a", vec![ScriptedTurn::text("X")]);
    caller.script("b", vec![ScriptedTurn::text("X")]);
    let invoker = AgentInvoker::new(caller, bus.clone(), InvokerPolicy::default());
    let orchestrator = Orchestrator::new(
        store.clone(),
        bus.clone(),
        invoker,
        Arc::new(LexicalEmbedder),
        RankingConfig::default(),
    );

    let cfg = config(1, ConsensusPolicy::Majority);
    let request = DebateRequest {
        task: "doomed".into(),
        agents: vec!["a".into(), "b".into()],
        config: cfg.clone(),
    };
    let debate = orchestrator.admit(&request).unwrap();
    let debate_id = debate.debate_id.clone();

    store.fail_messages(true);
    let sealed = orchestrator
        .run(debate, cfg, CancelToken::new())
        .await
        .unwrap();
    assert_eq!(sealed.outcome, Some(DebateOutcome::Error));
    assert!(store.messages_for(&debate_id).unwrap().is_empty());
}
