//! CLI command implementations.

pub mod builds;

use anyhow::{Context, Result, bail};
use kiln_core::{BuildRecord, TriggerPayload};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::io::Read;
use std::path::Path;
use tracing::debug;
use url::Url;

/// Thin JSON client for the server's REST API.
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
}

impl ApiClient {
    pub fn new(api_url: &str) -> Result<Self> {
        let mut base = Url::parse(api_url).with_context(|| format!("invalid API URL: {}", api_url))?;
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base,
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base.join(path.trim_start_matches('/'))?)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path)?;
        debug!(%url, "GET");
        let response = self.http.get(url).send().await?;
        decode(response).await
    }

    pub async fn post<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T> {
        let url = self.url(path)?;
        debug!(%url, "POST");
        let response = self.http.post(url).json(body).send().await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    if !status.is_success() {
        let message = body
            .get("error")
            .and_then(|e| e.as_str())
            .map(String::from)
            .unwrap_or_else(|| status.to_string());
        bail!("server returned {}: {}", status.as_u16(), message);
    }
    Ok(serde_json::from_value(body)?)
}

fn wait_suffix(wait: bool) -> &'static str {
    if wait { "?wait=true" } else { "" }
}

/// Read a trigger payload from a file, or stdin for `-`.
fn read_payload(path: &Path) -> Result<Value> {
    let content = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?
    };

    let value: Value = serde_json::from_str(&content).context("payload is not valid JSON")?;
    // Check locally first so obvious mistakes don't need a round trip.
    let payload = value.get("payload").cloned().unwrap_or_else(|| value.clone());
    serde_json::from_value::<TriggerPayload>(payload)?.validate()?;
    Ok(value)
}

/// Print the server's answer to a submit or rebuild.
fn print_submitted(response: &Value, wait: bool) -> Result<()> {
    if wait {
        let record: BuildRecord = serde_json::from_value(response.clone())?;
        builds::print_record(&record);
    } else {
        let id = response.get("id").and_then(|v| v.as_str()).unwrap_or("?");
        println!("Queued build {}", id);
    }
    Ok(())
}

pub async fn submit(api_url: &str, path: &Path, wait: bool) -> Result<()> {
    let payload = read_payload(path)?;
    let client = ApiClient::new(api_url)?;
    let response: Value = client
        .post(&format!("api/v1/builds{}", wait_suffix(wait)), &payload)
        .await?;
    print_submitted(&response, wait)
}

pub async fn rebuild(api_url: &str, id: &str, wait: bool) -> Result<()> {
    let client = ApiClient::new(api_url)?;
    let response: Value = client
        .post(&format!("api/v1/builds/{}/rebuild{}", id, wait_suffix(wait)), &Value::Null)
        .await?;
    print_submitted(&response, wait)
}

pub async fn status(api_url: &str) -> Result<()> {
    let client = ApiClient::new(api_url)?;
    let view: Value = client.get("api/v1/worker").await?;
    println!("{}", format_status(&view));
    Ok(())
}

fn format_status(view: &Value) -> String {
    let worker = &view["worker"];
    let mut out = match worker["state"].as_str() {
        Some("running") => match worker["build"].as_object() {
            Some(build) => format!(
                "Worker running: {} {} ({})",
                build.get("id").and_then(|v| v.as_str()).unwrap_or("?"),
                build.get("repository").and_then(|v| v.as_str()).unwrap_or("?"),
                build.get("message").and_then(|v| v.as_str()).unwrap_or(""),
            ),
            None => "Worker running".to_string(),
        },
        _ => "Worker idle".to_string(),
    };

    let pending = view["pending"].as_array().map(Vec::len).unwrap_or(0);
    out.push_str(&format!("\n{} build(s) queued", pending));
    out
}

pub async fn blame(api_url: &str) -> Result<()> {
    let client = ApiClient::new(api_url)?;
    let entries: Vec<Value> = client.get("api/v1/blame").await?;
    if entries.is_empty() {
        println!("No failed builds");
        return Ok(());
    }
    for entry in entries {
        println!(
            "{:>5}  {}",
            entry["failures"].as_u64().unwrap_or(0),
            entry["author"].as_str().unwrap_or("?")
        );
    }
    Ok(())
}

pub async fn settings(api_url: &str) -> Result<()> {
    let client = ApiClient::new(api_url)?;
    let settings: Value = client.get("api/v1/settings").await?;
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

pub fn validate(path: &Path) -> Result<()> {
    let settings = kiln_config::load_settings(path)?;
    println!("Configuration is valid");
    match &settings.build.test {
        Some(test) => println!("  test command: {}", test),
        None => println!("  no test command, every build passes"),
    }
    match settings.build.timeout() {
        Some(limit) => println!("  timeout: {}s", limit.as_secs()),
        None => println!("  timeout: none"),
    }
    Ok(())
}
