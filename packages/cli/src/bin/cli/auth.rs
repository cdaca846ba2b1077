// ABOUTME: CLI commands for CherryIN OAuth sign-in
// ABOUTME: Supports login, logout, status, and token refresh

use anyhow::Result;
use chrono::Utc;
use colored::*;
use cherryin_auth::{AuthError, OAuthToken};
use cherryin_cli::{
    format::{describe_expiry, format_timestamp},
    open_manager,
};
use cherryin_config::CherryInConfig;

pub async fn login(config: &CherryInConfig, user_id: &str, force: bool, no_browser: bool) -> Result<()> {
    let oauth = open_manager(config).await?;

    if !force {
        if let Some(token) = oauth.get_token(user_id).await? {
            println!("{} Already logged in to CherryIN", "✓".green().bold());
            print_expiry(&token);
            println!();
            println!("Use {} to sign in again", "cherryin login --force".yellow());
            return Ok(());
        }
    }

    println!("{}", "🔐 Signing in to CherryIN...".bold().cyan());

    let result = if no_browser {
        oauth
            .login_with(user_id, |url| {
                println!("   Open this URL in your browser to continue:");
                println!();
                println!("   {}", url.as_str().underline());
                println!();
                Ok(())
            })
            .await
    } else {
        println!("   Your browser will open for authentication.");
        oauth.login(user_id).await
    };

    let token = match result {
        Ok(token) => token,
        Err(AuthError::FlowTimedOut) => {
            eprintln!("{} Timed out waiting for the browser", "✗".red().bold());
            eprintln!("  Run {} to try again", "cherryin login".yellow());
            return Err(AuthError::FlowTimedOut.into());
        }
        Err(e) => return Err(e.into()),
    };

    println!();
    println!("{} Successfully logged in", "✓".green().bold());
    print_expiry(&token);
    if let Some(scope) = &token.scope {
        println!("   Scope: {}", scope.cyan());
    }
    Ok(())
}

pub async fn logout(config: &CherryInConfig, user_id: &str) -> Result<()> {
    let oauth = open_manager(config).await?;

    println!("{}", "🔓 Logging out from CherryIN...".bold().cyan());
    oauth.logout(user_id).await?;
    println!("{} Successfully logged out", "✓".green().bold());
    Ok(())
}

pub async fn status(config: &CherryInConfig, user_id: &str) -> Result<()> {
    let oauth = open_manager(config).await?;
    let status = oauth.status(user_id).await?;

    println!("{}", "🔐 CherryIN Authentication Status".bold().cyan());
    println!();

    let icon = if status.authenticated {
        "✓".green().bold()
    } else {
        "✗".red().bold()
    };
    println!("  {} {}", icon, user_id.bold());

    if status.authenticated {
        if let Some(expires_at) = status.expires_at {
            let relative = describe_expiry(Some(expires_at), Utc::now().timestamp());
            let line = format!("{} ({})", format_timestamp(expires_at), relative);
            if status.needs_refresh {
                println!("        Expires: {} {}", line.yellow(), "(refresh due)".yellow());
            } else {
                println!("        Expires: {}", line.green());
            }
        }
        if let Some(scope) = &status.scope {
            println!("        Scope: {}", scope.cyan());
        }
    } else {
        println!("        {}", "Not authenticated".dimmed());
    }

    if status.login_pending {
        println!("        {}", "Login in progress".yellow());
    }

    println!(
        "        Storage: {} encryption",
        oauth.storage().encryption_mode().await.to_string().cyan()
    );
    println!();

    if !status.authenticated {
        println!("Use {} to authenticate", "cherryin login".yellow());
    }
    Ok(())
}

pub async fn refresh(config: &CherryInConfig, user_id: &str) -> Result<()> {
    let oauth = open_manager(config).await?;

    match oauth.refresh_token(user_id).await {
        Ok(token) => {
            println!("{} Token refreshed", "✓".green().bold());
            print_expiry(&token);
            Ok(())
        }
        Err(e) if e.requires_login() => {
            eprintln!("{} {}", "✗".red().bold(), e);
            eprintln!("  Run {} to sign in", "cherryin login".yellow());
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

fn print_expiry(token: &OAuthToken) {
    let now = Utc::now().timestamp();
    match token.expires_at {
        Some(expires_at) => println!(
            "   Expires: {} ({})",
            format_timestamp(expires_at),
            describe_expiry(Some(expires_at), now)
        ),
        None => println!("   Expires: {}", describe_expiry(None, now).dimmed()),
    }
}
