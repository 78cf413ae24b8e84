use ag_domain::config::{Config, ConsensusPolicy, WsOverflowPolicy};

#[test]
fn empty_toml_yields_defaults() {
    let cfg: Config = toml::from_str("").unwrap();
    assert_eq!(cfg.server.port, 8300);
    assert_eq!(cfg.debate.rounds, 3);
    assert_eq!(cfg.debate.consensus_policy, ConsensusPolicy::Majority);
    assert_eq!(cfg.rate_limit.per_token_per_minute, 60);
    assert_eq!(cfg.rate_limit.per_ip_per_minute, 120);
    assert_eq!(cfg.server.ws.max_frame_bytes, 64 * 1024);
    assert_eq!(cfg.server.ws.overflow, WsOverflowPolicy::DropSlow);
    assert!(cfg.validate().iter().all(|i| {
        i.severity != ag_domain::config::ConfigSeverity::Error
    }));
}

#[test]
fn partial_toml_overrides() {
    let cfg: Config = toml::from_str(
        r#"
        [server]
        port = 9000

        [debate]
        rounds = 5
        consensus_policy = "unanimous"

        [[llm.providers]]
        id = "local"
        kind = "openai_compat"
        base_url = "http://127.0.0.1:11434/v1"
        "#,
    )
    .unwrap();
    assert_eq!(cfg.server.port, 9000);
    assert_eq!(cfg.debate.rounds, 5);
    assert_eq!(cfg.debate.consensus_policy, ConsensusPolicy::Unanimous);
    assert_eq!(cfg.llm.providers.len(), 1);
    assert!(cfg.llm.provider("local").is_some());
}

#[test]
fn invalid_combination_is_an_error() {
    let mut cfg = Config::default();
    cfg.debate.rounds = 0;
    cfg.ranking.tau_qual = 0.9;
    cfg.ranking.tau_refine = 0.5;
    let issues = cfg.validate();
    let errors = issues
        .iter()
        .filter(|i| i.severity == ag_domain::config::ConfigSeverity::Error)
        .count();
    assert!(errors >= 2);
}
