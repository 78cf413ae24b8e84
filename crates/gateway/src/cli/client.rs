//! Thin HTTP client behind the `start` / `replay` / `export` subcommands.
//!
//! Exit codes mirror the API's error classes: 0 success, 2 bad input,
//! 3 auth failure, 4 rate limited, 1 anything else.

use std::time::Duration;

use serde_json::Value;

/// A CLI failure carrying the process exit code.
#[derive(Debug)]
pub struct CliError {
    pub exit_code: i32,
    pub message: String,
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl CliError {
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            message: message.into(),
        }
    }

    pub fn bad_input(message: impl Into<String>) -> Self {
        Self {
            exit_code: 2,
            message: message.into(),
        }
    }

    fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
        let exit_code = match status.as_u16() {
            401 | 403 => 3,
            429 => 4,
            400 | 404 | 409 | 422 => 2,
            _ => 1,
        };
        Self { exit_code, message }
    }
}

pub struct ApiClient {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(server: &str, token: Option<String>) -> Result<Self, CliError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CliError::other(e.to_string()))?;
        Ok(Self {
            base_url: server.trim_end_matches('/').to_string(),
            token,
            http,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.request(method, format!("{}{path}", self.base_url));
        if let Some(token) = &self.token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        builder
    }

    async fn execute(&self, builder: reqwest::RequestBuilder) -> Result<Value, CliError> {
        let response = builder
            .send()
            .await
            .map_err(|e| CliError::other(format!("request failed: {e}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CliError::other(e.to_string()))?;
        if !status.is_success() {
            return Err(CliError::from_status(status, &body));
        }
        serde_json::from_str(&body).map_err(|e| CliError::other(format!("bad response: {e}")))
    }

    pub async fn get(&self, path: &str) -> Result<Value, CliError> {
        self.execute(self.request(reqwest::Method::GET, path)).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<Value, CliError> {
        self.execute(self.request(reqwest::Method::POST, path).json(&body))
            .await
    }
}

/// `aragora start` — kick off a debate and poll until it seals.
pub async fn start(
    client: &ApiClient,
    task: &str,
    agents: &str,
    rounds: Option<u32>,
    policy: Option<&str>,
) -> Result<(), CliError> {
    let agents: Vec<&str> = agents
        .split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .collect();
    if agents.len() < 2 {
        return Err(CliError::bad_input("--agents needs at least two entries"));
    }

    let mut body = serde_json::json!({ "task": task, "agents": agents });
    if let Some(rounds) = rounds {
        body["rounds"] = rounds.into();
    }
    if let Some(policy) = policy {
        body["consensus_policy"] = policy.into();
    }

    let started = client.post("/api/debates", body).await?;
    let slug = started
        .get("slug")
        .and_then(|s| s.as_str())
        .ok_or_else(|| CliError::other("server response missing slug"))?
        .to_string();
    println!("debate started: {slug}");

    // Poll until sealed.
    loop {
        tokio::time::sleep(Duration::from_secs(2)).await;
        let detail = client.get(&format!("/api/debates/{slug}")).await?;
        let debate = &detail["debate"];
        if debate["status"] == "sealed" {
            println!(
                "outcome: {}  consensus: {}  rounds: {}",
                debate["outcome"].as_str().unwrap_or("?"),
                debate["consensus_reached"],
                debate["rounds_used"],
            );
            if let Some(artifact) = detail["debate"].get("final_artifact") {
                if !artifact.is_null() {
                    println!("artifact: {artifact}");
                }
            }
            return Ok(());
        }
    }
}

/// `aragora replay` — print the durable event log, one event per line.
pub async fn replay(client: &ApiClient, debate: &str) -> Result<(), CliError> {
    let mut after: Option<u64> = None;
    loop {
        let path = match after {
            Some(seq) => format!("/api/debates/{debate}/events?after={seq}&limit=500"),
            None => format!("/api/debates/{debate}/events?limit=500"),
        };
        let page = client.get(&path).await?;
        let events = page["events"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        if events.is_empty() {
            return Ok(());
        }
        for event in &events {
            println!("{event}");
        }
        after = events.last().and_then(|e| e["seq"].as_u64());
    }
}

/// `aragora export` — fetch the transcript and format it.
pub async fn export(
    client: &ApiClient,
    debate: &str,
    format: super::ExportFormat,
    output: Option<&std::path::Path>,
) -> Result<(), CliError> {
    let detail = client.get(&format!("/api/debates/{debate}")).await?;
    let events = client
        .get(&format!("/api/debates/{debate}/events?limit=1000"))
        .await?;

    let rendered = match format {
        super::ExportFormat::Json => super::export::to_json(&detail, &events)?,
        super::ExportFormat::Csv => super::export::to_csv(&detail),
        super::ExportFormat::Html => super::export::to_html(&detail),
    };

    match output {
        Some(path) => std::fs::write(path, rendered)
            .map_err(|e| CliError::other(format!("write {}: {e}", path.display())))?,
        None => println!("{rendered}"),
    }
    Ok(())
}
