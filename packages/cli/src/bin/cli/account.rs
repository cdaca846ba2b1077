// ABOUTME: CLI commands that call the CherryIN API with the stored token
// ABOUTME: Shows balance and account details and sends raw authenticated requests

use std::sync::Arc;

use anyhow::{Context, Result};
use colored::*;
use cherryin_auth::AuthenticatedClient;
use cherryin_cli::open_manager;
use cherryin_config::CherryInConfig;
use reqwest::Method;
use serde_json::Value;

async fn client(config: &CherryInConfig, user_id: &str) -> Result<AuthenticatedClient> {
    let oauth = open_manager(config).await?;
    Ok(AuthenticatedClient::new(Arc::new(oauth), user_id))
}

pub async fn balance(config: &CherryInConfig, user_id: &str) -> Result<()> {
    let balance = client(config, user_id).await?.balance().await?;

    let currency = balance.currency.as_deref().unwrap_or("");
    println!(
        "{} {} {}",
        "Balance:".bold(),
        format!("{:.2}", balance.balance).green().bold(),
        currency
    );
    Ok(())
}

pub async fn whoami(config: &CherryInConfig, user_id: &str) -> Result<()> {
    let info = client(config, user_id).await?.user_info().await?;

    println!("{} {}", "Account:".bold(), info.sub.cyan());
    if let Some(name) = info.name {
        println!("   Name: {}", name);
    }
    if let Some(email) = info.email {
        println!("   Email: {}", email);
    }
    Ok(())
}

pub async fn request(
    config: &CherryInConfig,
    user_id: &str,
    path: &str,
    method: &str,
    data: Option<&str>,
) -> Result<()> {
    let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method: {}", method))?;
    let body: Option<Value> = data
        .map(serde_json::from_str)
        .transpose()
        .context("Request body is not valid JSON")?;

    let response = client(config, user_id)
        .await?
        .request(method, path, body.as_ref())
        .await?;

    let status = response.status();
    let text = response.text().await?;

    let status_line = status.to_string();
    if status.is_success() {
        eprintln!("{}", status_line.green());
    } else {
        eprintln!("{}", status_line.red());
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }

    if !status.is_success() {
        anyhow::bail!("Request failed with status {}", status.as_u16());
    }
    Ok(())
}
