use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Phases & policies
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Inner step within a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Propose,
    Critique,
    Revise,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Propose => "propose",
            Self::Critique => "critique",
            Self::Revise => "revise",
        }
    }

    /// Propose is mandatory; the rest may be skipped under a round's soft
    /// time budget.
    pub fn is_optional(self) -> bool {
        !matches!(self, Self::Propose)
    }
}

/// The rule used to decide whether the agents have agreed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusPolicy {
    Majority,
    Supermajority,
    Unanimous,
    Judge,
    Weighted,
}

impl std::str::FromStr for ConsensusPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "majority" => Ok(Self::Majority),
            "supermajority" => Ok(Self::Supermajority),
            "unanimous" => Ok(Self::Unanimous),
            "judge" => Ok(Self::Judge),
            "weighted" => Ok(Self::Weighted),
            other => Err(format!("unknown consensus policy '{other}'")),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Convergence
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Similarity-based early stop, distinct from consensus: when round
/// similarity stays at or above the threshold for two consecutive rounds
/// after `min_rounds`, voting is triggered early.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergenceConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_conv_sim")]
    pub similarity_threshold: f64,
    #[serde(default = "d_conv_min_rounds")]
    pub min_rounds: u32,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: d_conv_sim(),
            min_rounds: d_conv_min_rounds(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Debate defaults
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Server-level defaults applied when a debate request leaves an option
/// unset. Every field here is an enumerated configuration option.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateDefaults {
    #[serde(default = "d_rounds")]
    pub rounds: u32,
    #[serde(default = "d_policy")]
    pub consensus_policy: ConsensusPolicy,
    #[serde(default = "d_threshold")]
    pub consensus_threshold: f64,
    #[serde(default)]
    pub convergence: ConvergenceConfig,
    #[serde(default = "d_min_participants")]
    pub min_participants: u32,
    /// Soft per-round budget; breaching it skips the remaining optional
    /// phases of that round.
    #[serde(default = "d_round_budget")]
    pub round_soft_budget_secs: u64,
    /// Absolute wall-clock limit for one debate.
    #[serde(default = "d_deadline")]
    pub deadline_secs: u64,
    /// Hard token budget per agent call.
    #[serde(default = "d_call_budget")]
    pub max_tokens_per_call: u32,
    /// Agent invoker attempts on transient failure.
    #[serde(default = "d_attempts")]
    pub invoker_attempts: u32,
    /// Consecutive invoker failures that make the debate fatal.
    #[serde(default = "d_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    #[serde(default)]
    pub research_enabled: bool,
}

impl Default for DebateDefaults {
    fn default() -> Self {
        Self {
            rounds: d_rounds(),
            consensus_policy: d_policy(),
            consensus_threshold: d_threshold(),
            convergence: ConvergenceConfig::default(),
            min_participants: d_min_participants(),
            round_soft_budget_secs: d_round_budget(),
            deadline_secs: d_deadline(),
            max_tokens_per_call: d_call_budget(),
            invoker_attempts: d_attempts(),
            max_consecutive_failures: d_max_consecutive_failures(),
            research_enabled: false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-debate configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The resolved configuration of one debate: request options overlaid on
/// the server defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateConfig {
    pub rounds_planned: u32,
    /// Ordered subset of the phases run each round.
    pub phases_per_round: Vec<Phase>,
    pub consensus_policy: ConsensusPolicy,
    pub consensus_threshold: f64,
    pub convergence: ConvergenceConfig,
    pub min_participants: u32,
    pub round_soft_budget_secs: u64,
    pub deadline_secs: u64,
    pub max_tokens_per_call: u32,
    pub invoker_attempts: u32,
    pub max_consecutive_failures: u32,
    pub research_enabled: bool,
    /// Rotate cognitive stance tags between rounds.
    #[serde(default)]
    pub rotate_roles: bool,
    /// Designated judge for the `judge` policy; defaults to the last agent.
    #[serde(default)]
    pub judge: Option<String>,
    /// Domain tag applied to positions, flips and matches.
    #[serde(default = "d_domain")]
    pub domain: String,
}

impl DebateConfig {
    pub fn from_defaults(d: &DebateDefaults) -> Self {
        Self {
            rounds_planned: d.rounds,
            phases_per_round: vec![Phase::Propose, Phase::Critique, Phase::Revise],
            consensus_policy: d.consensus_policy,
            consensus_threshold: d.consensus_threshold,
            convergence: d.convergence.clone(),
            min_participants: d.min_participants,
            round_soft_budget_secs: d.round_soft_budget_secs,
            deadline_secs: d.deadline_secs,
            max_tokens_per_call: d.max_tokens_per_call,
            invoker_attempts: d.invoker_attempts,
            max_consecutive_failures: d.max_consecutive_failures,
            research_enabled: d.research_enabled,
            rotate_roles: false,
            judge: None,
            domain: d_domain(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
fn d_domain() -> String {
    "general".into()
}
fn d_conv_sim() -> f64 {
    0.92
}
fn d_conv_min_rounds() -> u32 {
    2
}
fn d_rounds() -> u32 {
    3
}
fn d_policy() -> ConsensusPolicy {
    ConsensusPolicy::Majority
}
fn d_threshold() -> f64 {
    0.66
}
fn d_min_participants() -> u32 {
    2
}
fn d_round_budget() -> u64 {
    120
}
fn d_deadline() -> u64 {
    1800
}
fn d_call_budget() -> u32 {
    4096
}
fn d_attempts() -> u32 {
    3
}
fn d_max_consecutive_failures() -> u32 {
    3
}
