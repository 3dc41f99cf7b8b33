//! Login, logout and session status

use std::io::{self, BufRead, Write};

use anyhow::{bail, Context, Result};

use super::tokens::TokenResponse;
use crate::api::client::{ApiClient, ApiRequest};
use crate::config::Config;

/// Exchange email and password for a credential pair
pub async fn login(email: &str, password: Option<String>, force: bool) -> Result<()> {
    let config = Config::load()?;
    let client = ApiClient::from_config(&config)?;

    if !force && client.store().is_logged_in() && client.store().get().is_some() {
        println!("Already logged in. Use --force to re-authenticate.");
        return Ok(());
    }

    let password = match password {
        Some(password) => password,
        None => prompt_password()?,
    };

    tracing::info!("Signing in as {}...", email);

    let request = ApiRequest::post(config.login_path.as_str())
        .json(serde_json::json!({ "email": email, "password": password }))
        .anonymous();
    let resp = client.send(request).await.context("Login failed")?;

    let tokens: TokenResponse = resp
        .json()
        .context("Login response did not contain a token pair")?;
    client.store().set(tokens.into())?;

    println!("Login successful.");
    Ok(())
}

/// Clear stored credentials
pub async fn logout() -> Result<()> {
    let config = Config::load()?;
    let client = ApiClient::from_config(&config)?;
    if client.store().clear() {
        println!("Logged out.");
    } else {
        println!("Not logged in.");
    }
    Ok(())
}

/// Display current session status
pub async fn status() -> Result<()> {
    let config = Config::load()?;
    let client = ApiClient::from_config(&config)?;
    let store = client.store();

    println!("API:         {}", config.api_base_url);

    match (store.is_logged_in(), store.logged_in_until()) {
        (true, until) => {
            println!("Session:     active");
            if let Some(ts) = until.and_then(format_timestamp) {
                println!("  expires_at: {}", ts);
            }
        }
        (false, Some(_)) => println!("Session:     expired"),
        (false, None) => println!("Session:     none"),
    }

    match store.get() {
        Some(pair) => {
            println!("Access tok:  {}", mask(&pair.access_token));
            println!("Refresh tok: present");
        }
        None => {
            println!("Access tok:  none");
            println!("Refresh tok: none");
            println!("\nRun 'lcj login' to authenticate.");
        }
    }

    Ok(())
}

/// The terminal echoes what is typed here; `LCJ_PASSWORD` avoids that.
const PASSWORD_PROMPT: &str = "Password (input is visible; set LCJ_PASSWORD to avoid typing it): ";

fn prompt_password() -> Result<String> {
    read_password(io::stdin().lock(), io::stdout())
}

fn read_password(mut input: impl BufRead, mut output: impl Write) -> Result<String> {
    write!(output, "{}", PASSWORD_PROMPT).context("Failed to write prompt")?;
    output.flush().context("Failed to flush stdout")?;

    let mut line = String::new();
    input
        .read_line(&mut line)
        .context("Failed to read password")?;

    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("Password must not be empty");
    }
    Ok(password)
}

fn format_timestamp(secs: u64) -> Option<String> {
    let secs = i64::try_from(secs).ok()?;
    chrono::DateTime::from_timestamp(secs, 0).map(|dt| dt.to_rfc3339())
}

/// Show only enough of a token to tell two apart
fn mask(token: &str) -> String {
    let head: String = token.chars().take(6).collect();
    if head.len() < token.len() {
        format!("{}...", head)
    } else {
        "*".repeat(token.chars().count())
    }
}
