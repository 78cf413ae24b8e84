use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::HeaderValue;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use ag_domain::config::{Config, ConfigSeverity};
use ag_engine::bus::EventBus;
use ag_engine::caller::ProviderCaller;
use ag_engine::cancel::CancelMap;
use ag_engine::embed::{Embedder, LexicalEmbedder};
use ag_engine::invoker::{AgentInvoker, InvokerPolicy};
use ag_engine::orchestrator::Orchestrator;
use ag_providers::embeddings::EmbeddingRouter;
use ag_providers::registry::ProviderRegistry;
use ag_storage::{JsonlStore, Store};

use ag_gateway::api;
use ag_gateway::api::auth::TokenSigner;
use ag_gateway::cli::{client, Cli, Command};
use ag_gateway::metrics::Metrics;
use ag_gateway::ratelimit::TokenBuckets;
use ag_gateway::state::{AppState, MeteredSink};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = dispatch(cli).await;
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

async fn dispatch(cli: Cli) -> i32 {
    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            let config = match ag_gateway::cli::load_config(&cli.config) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("config: {e}");
                    return 2;
                }
            };
            init_tracing(config.log_level.as_deref());
            match run_server(Arc::new(config)).await {
                Ok(()) => 0,
                Err(e) => {
                    tracing::error!(error = %e, "server exited with error");
                    1
                }
            }
        }
        Some(Command::Start {
            task,
            agents,
            rounds,
            policy,
            server,
            token,
        }) => {
            run_client(async {
                let api = client::ApiClient::new(&server, token)?;
                client::start(&api, &task, &agents, rounds, policy.as_deref()).await
            })
            .await
        }
        Some(Command::Replay {
            debate,
            server,
            token,
        }) => {
            run_client(async {
                let api = client::ApiClient::new(&server, token)?;
                client::replay(&api, &debate).await
            })
            .await
        }
        Some(Command::Export {
            debate,
            format,
            output,
            server,
            token,
        }) => {
            run_client(async {
                let api = client::ApiClient::new(&server, token)?;
                client::export(&api, &debate, format, output.as_deref()).await
            })
            .await
        }
        Some(Command::Token { subject, ttl }) => {
            let config = match ag_gateway::cli::load_config(&cli.config) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("config: {e}");
                    return 2;
                }
            };
            let key = match std::env::var(&config.auth.hmac_key_env) {
                Ok(k) if !k.is_empty() => k,
                _ => {
                    eprintln!(
                        "{} is not set; cannot mint tokens",
                        config.auth.hmac_key_env
                    );
                    return 2;
                }
            };
            let signer = TokenSigner::new(key.as_bytes());
            let ttl = Duration::from_secs(ttl.unwrap_or(config.auth.token_ttl_seconds));
            println!("{}", signer.mint(&subject, ttl));
            0
        }
        Some(Command::Version) => {
            println!("aragora {}", env!("CARGO_PKG_VERSION"));
            0
        }
    }
}

async fn run_client<F>(fut: F) -> i32
where
    F: std::future::Future<Output = Result<(), client::CliError>>,
{
    match fut.await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{e}");
            e.exit_code
        }
    }
}

/// Initialize structured JSON tracing for the server process. The resolved
/// `LOG_LEVEL` (env over file) wins over `RUST_LOG`.
fn init_tracing(level: Option<&str>) {
    let filter = level
        .map(EnvFilter::new)
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info,ag_gateway=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).json().init();
}

/// Start the gateway server with the given configuration.
async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Aragora starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Storage ──────────────────────────────────────────────────────
    let store: Arc<dyn Store> =
        Arc::new(JsonlStore::open(&config.storage).context("opening store")?);
    tracing::info!(path = %config.storage.data_dir.display(), "store ready");

    // ── Providers & embeddings ───────────────────────────────────────
    let registry =
        Arc::new(ProviderRegistry::from_config(&config.llm).context("building providers")?);
    let providers_ok = !registry.is_empty();
    if !providers_ok {
        tracing::warn!("no LLM providers available; debates cannot run real agents");
    }

    let embedding_router = EmbeddingRouter::resolve(&config.embedding, &registry);
    let embeddings_ok = embedding_router.is_available();
    let embedder: Arc<dyn Embedder> = if embeddings_ok {
        Arc::new(embedding_router)
    } else {
        Arc::new(LexicalEmbedder)
    };

    // ── Engine ───────────────────────────────────────────────────────
    let bus = Arc::new(EventBus::new(store.clone(), 2048));
    let sink = Arc::new(MeteredSink::new(bus.clone()));
    let invoker = AgentInvoker::new(
        Arc::new(ProviderCaller::new(registry.clone())),
        sink.clone(),
        InvokerPolicy {
            attempts: config.debate.invoker_attempts,
            token_budget: config.debate.max_tokens_per_call,
            ..Default::default()
        },
    );
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        sink.clone(),
        invoker,
        embedder,
        config.ranking.clone(),
    ));

    // ── Gate (read the HMAC key once at startup) ─────────────────────
    let signer = match std::env::var(&config.auth.hmac_key_env) {
        Ok(key) if !key.is_empty() => Some(Arc::new(TokenSigner::new(key.as_bytes()))),
        _ => {
            tracing::warn!(
                env = %config.auth.hmac_key_env,
                "auth disabled: HMAC key not set (dev mode)"
            );
            None
        }
    };
    let buckets = Arc::new(TokenBuckets::new(config.rate_limit.clone()));

    let state = AppState {
        config: config.clone(),
        store,
        bus,
        sink,
        orchestrator,
        cancel_map: Arc::new(CancelMap::new()),
        active: Arc::new(parking_lot::Mutex::new(HashMap::new())),
        signer,
        buckets,
        metrics: Arc::new(Metrics::default()),
        providers_ok,
        embeddings_ok,
    };

    // ── CORS (explicit allow-list) ───────────────────────────────────
    let origins: Vec<HeaderValue> = config
        .server
        .cors
        .allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    let app = api::router(state.clone())
        .with_state(state)
        .layer(cors);

    // ── Bind & serve ─────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.bind_addr, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(addr = %addr, "listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    })
    .await
    .context("serving")?;

    Ok(())
}
