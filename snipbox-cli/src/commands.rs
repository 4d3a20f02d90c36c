//! CLI command implementations
//!
//! Remote commands talk to a running snipbox server over HTTP; `run` without
//! a server URL drives the sandbox in-process.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::json;
use snipbox_sandbox::{RunCoordinator, RunRequest, RunResult};
use snipbox_server::{timeout_message, AppConfig};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::debug;

/// Slack added to the HTTP timeout on top of the run timeout
const HTTP_TIMEOUT_SLACK: Duration = Duration::from_secs(30);

/// Client-side wait assumed for remote runs when `--timeout` is not given
const DEFAULT_REMOTE_WAIT: Duration = Duration::from_secs(10);

/// What the user sees from a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Output(String),
    Error(String),
}

/// Body shape shared by every snipbox endpoint
#[derive(Debug, Default, Deserialize)]
struct ApiResponse {
    output: Option<String>,
    error: Option<String>,
    id: Option<String>,
    code: Option<String>,
}

/// Read program text from a file, or from stdin when `path` is `-`
pub async fn read_source(path: &str) -> Result<String> {
    if path == "-" {
        let mut source = String::new();
        tokio::io::stdin()
            .read_to_string(&mut source)
            .await
            .context("Failed to read program from stdin")?;
        Ok(source)
    } else {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path))
    }
}

/// Join a base URL and an endpoint path
pub fn endpoint(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

fn client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

async fn read_response(response: reqwest::Response) -> Result<ApiResponse> {
    let status = response.status();
    let body: ApiResponse = response
        .json()
        .await
        .with_context(|| format!("Unexpected response from server (HTTP {})", status))?;
    Ok(body)
}

/// How long to wait for the server's answer to a remote run.
///
/// The server enforces its own run timeout; `timeout_secs` only bounds how
/// long this client waits for it.
pub fn remote_wait(timeout_secs: Option<u64>) -> Duration {
    timeout_secs.map_or(DEFAULT_REMOTE_WAIT, Duration::from_secs) + HTTP_TIMEOUT_SLACK
}

/// POST the program to `<url>/run`
pub async fn execute_remote_run(
    url: &str,
    code: String,
    input: String,
    timeout_secs: Option<u64>,
) -> Result<RunOutcome> {
    let target = endpoint(url, "run");
    let wait = remote_wait(timeout_secs);
    debug!("POST {} (waiting up to {:?})", target, wait);

    let response = client(wait)?
        .post(&target)
        .json(&json!({ "code": code, "input": input }))
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", target))?;

    let body = read_response(response).await?;
    match (body.output, body.error) {
        (_, Some(error)) => Ok(RunOutcome::Error(error)),
        (Some(output), None) => Ok(RunOutcome::Output(output)),
        (None, None) => Err(anyhow!("Server answered without output or error")),
    }
}

/// Run the program through a local sandbox, using the same configuration
/// sources as the server
pub async fn execute_local_run(
    code: String,
    input: String,
    timeout_secs: Option<u64>,
    config_path: Option<&Path>,
) -> Result<RunOutcome> {
    let mut config = AppConfig::load(config_path)?;
    if let Some(secs) = timeout_secs {
        config.set_timeout(Duration::from_secs(secs));
    }
    config.validate()?;

    let request = RunRequest::new(code).with_stdin(input);
    if let Err(e) = request.validate() {
        return Ok(RunOutcome::Error(e.to_string()));
    }

    let timeout = config.limits.timeout;
    let coordinator =
        RunCoordinator::from_config(config.sandbox, config.limits, config.coordinator)
            .await
            .context("Failed to set up the sandbox")?;
    debug!("Running locally with the {} runtime", coordinator.runtime_name());

    Ok(match coordinator.handle_run(request).await {
        Ok(result) => outcome_from(result, timeout),
        Err(e) => RunOutcome::Error(e.to_string()),
    })
}

/// Map a local run result to what the server would have answered
fn outcome_from(result: RunResult, timeout: Duration) -> RunOutcome {
    match result {
        RunResult::Success { stdout } => RunOutcome::Output(stdout),
        RunResult::Failure { stderr, .. } => RunOutcome::Error(stderr),
        RunResult::TimedOut => RunOutcome::Error(timeout_message(timeout)),
        RunResult::SystemError { message } => RunOutcome::Error(message),
    }
}

/// Share a snippet, returning its id
pub async fn execute_save(url: &str, code: String) -> Result<String> {
    let target = endpoint(url, "save");
    let response = client(HTTP_TIMEOUT_SLACK)?
        .post(&target)
        .json(&json!({ "code": code }))
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", target))?;

    let body = read_response(response).await?;
    match (body.id, body.error) {
        (Some(id), _) => Ok(id),
        (None, Some(error)) => Err(anyhow!(error)),
        (None, None) => Err(anyhow!("Server answered without an id")),
    }
}

/// Fetch a shared snippet's source
pub async fn execute_fetch(url: &str, id: &str) -> Result<String> {
    let target = endpoint(url, &format!("code/{}", id));
    let response = client(HTTP_TIMEOUT_SLACK)?
        .get(&target)
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", target))?;

    let body = read_response(response).await?;
    match (body.code, body.error) {
        (Some(code), _) => Ok(code),
        (None, Some(error)) => Err(anyhow!(error)),
        (None, None) => Err(anyhow!("Server answered without code")),
    }
}
