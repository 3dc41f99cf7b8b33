//! API client module for the Life Changing Journey backend

pub mod client;
pub mod metrics;
#[cfg(test)]
pub mod mock;
pub mod result;
pub mod routes;
pub mod transport;

use anyhow::{bail, Context, Result};
use reqwest::Method;

use self::client::{ApiClient, ApiRequest};
use self::result::ApiOutcome;

use crate::config::Config;

/// Options for a raw API call from the command line
pub struct RawRequest {
    pub method: String,
    pub path: String,
    pub data: Option<String>,
    pub headers: Vec<String>,
    pub repeat: usize,
    pub stats: bool,
}

/// Show the signed-in user's profile
pub async fn whoami() -> Result<()> {
    let config = Config::load()?;
    let client = ApiClient::from_config(&config)?;
    print_outcome(ApiOutcome::from(client.get(&config.profile_path).await))
}

/// Send an arbitrary authenticated request and print the uniform result
pub async fn request(raw: RawRequest) -> Result<()> {
    let config = Config::load()?;
    let client = ApiClient::from_config(&config)?;
    let request = build_request(&raw)?;

    let mut last = None;
    for i in 0..raw.repeat.max(1) {
        tracing::debug!("Attempt {} of {}", i + 1, raw.repeat.max(1));
        last = Some(ApiOutcome::from(client.send(request.clone()).await));
    }

    if raw.stats {
        print_stats(&client);
    }

    match last {
        Some(outcome) => print_outcome(outcome),
        None => Ok(()),
    }
}

fn build_request(raw: &RawRequest) -> Result<ApiRequest> {
    let method = Method::from_bytes(raw.method.to_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method: {}", raw.method))?;

    let mut request = ApiRequest::new(method, raw.path.as_str());
    for header in &raw.headers {
        let Some((name, value)) = header.split_once(':') else {
            bail!("Header must look like 'Name: value', got '{}'", header);
        };
        request = request.header(name.trim(), value.trim());
    }
    if let Some(data) = &raw.data {
        let body = serde_json::from_str(data).context("--data is not valid JSON")?;
        request = request.json(body);
    }
    Ok(request)
}

fn print_outcome(outcome: ApiOutcome) -> Result<()> {
    let rendered =
        serde_json::to_string_pretty(&outcome).context("Failed to render response")?;
    println!("{}", rendered);

    if !outcome.success {
        bail!(
            "Request failed{}",
            outcome
                .status
                .map(|s| format!(" (HTTP {})", s))
                .unwrap_or_default()
        );
    }
    Ok(())
}

fn print_stats(client: &ApiClient) {
    let snapshot = client.recorder().snapshot();
    if snapshot.is_empty() {
        return;
    }

    eprintln!();
    eprintln!(
        "{:<40} {:>6} {:>10} {:>10} {:>10}",
        "ENDPOINT", "COUNT", "AVG ms", "MIN ms", "MAX ms"
    );
    for (endpoint, stats) in snapshot {
        eprintln!(
            "{:<40} {:>6} {:>10.1} {:>10.1} {:>10.1}",
            endpoint,
            stats.count,
            stats.avg.as_secs_f64() * 1000.0,
            stats.min.as_secs_f64() * 1000.0,
            stats.max.as_secs_f64() * 1000.0
        );
    }
}
