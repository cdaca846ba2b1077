// ABOUTME: CLI commands for managing token encryption security
// ABOUTME: Supports password-based encryption upgrade/downgrade and status checking

use anyhow::{bail, Result};
use clap::Subcommand;
use colored::*;
use cherryin_cli::{
    open_manager,
    session::{prompt_password, validate_new_password, MIN_PASSWORD_LENGTH},
};
use cherryin_config::CherryInConfig;
use cherryin_security::EncryptionMode;
use inquire::{Confirm, Password, PasswordDisplayMode};

#[derive(Subcommand)]
pub enum SecurityCommands {
    /// Set a password to enable password-based encryption (upgrades from machine-based)
    SetPassword,
    /// Change the encryption password
    ChangePassword,
    /// Remove password-based encryption (downgrades to machine-based)
    RemovePassword,
    /// Show current encryption mode and security status
    Status,
}

impl SecurityCommands {
    pub async fn execute(&self, config: &CherryInConfig) -> Result<()> {
        match self {
            SecurityCommands::SetPassword => set_password_command(config).await,
            SecurityCommands::ChangePassword => change_password_command(config).await,
            SecurityCommands::RemovePassword => remove_password_command(config).await,
            SecurityCommands::Status => status_command(config).await,
        }
    }
}

fn prompt_new_password() -> Result<String> {
    let password = Password::new("Enter new password:")
        .with_display_mode(PasswordDisplayMode::Masked)
        .with_help_message(&format!(
            "Minimum {} characters",
            MIN_PASSWORD_LENGTH
        ))
        .without_confirmation()
        .prompt()
        .map_err(|_| anyhow::anyhow!("Password input cancelled"))?;

    let confirmation = prompt_password("Confirm password:")?;

    if let Err(message) = validate_new_password(&password, &confirmation) {
        bail!(message);
    }
    Ok(password)
}

async fn set_password_command(config: &CherryInConfig) -> Result<()> {
    println!(
        "{}",
        "Setting up password-based encryption...".bold().cyan()
    );
    println!();

    let oauth = open_manager(config).await?;
    if oauth.storage().encryption_mode().await == EncryptionMode::Password {
        eprintln!(
            "{} Password-based encryption is already enabled.",
            "✗".red().bold()
        );
        eprintln!(
            "  Use {} to change the password.",
            "cherryin security change-password".yellow()
        );
        bail!("Password-based encryption is already enabled");
    }

    println!("{}", "⚠ SECURITY WARNING:".yellow().bold());
    println!("  • Machine-based encryption only protects copies of the database file");
    println!("  • Password-based encryption keeps tokens sealed without the password");
    println!("  • If you forget your password, stored tokens cannot be recovered");
    println!();

    let password = prompt_new_password()?;
    oauth.storage().change_encryption(Some(&password)).await?;

    println!();
    println!(
        "{} Password-based encryption enabled successfully!",
        "✓".green().bold()
    );
    println!();
    println!("{}", "Next steps:".bold());
    println!("  • You will be asked for the password when tokens are used");
    println!(
        "  • Set {} to skip the prompt in scripts",
        "CHERRYIN_ENCRYPTION_PASSWORD".cyan()
    );
    println!();
    Ok(())
}

async fn change_password_command(config: &CherryInConfig) -> Result<()> {
    println!("{}", "Changing encryption password...".bold().cyan());
    println!();

    let oauth = open_manager(config).await?;
    if oauth.storage().encryption_mode().await != EncryptionMode::Password {
        eprintln!(
            "{} Password-based encryption is not enabled.",
            "✗".red().bold()
        );
        eprintln!(
            "  Use {} to enable it.",
            "cherryin security set-password".yellow()
        );
        bail!("Password-based encryption is not enabled");
    }

    let password = prompt_new_password()?;
    oauth.storage().change_encryption(Some(&password)).await?;

    println!();
    println!("{} Password changed successfully!", "✓".green().bold());
    Ok(())
}

async fn remove_password_command(config: &CherryInConfig) -> Result<()> {
    let oauth = open_manager(config).await?;
    if oauth.storage().encryption_mode().await != EncryptionMode::Password {
        println!(
            "{} Tokens already use machine-based encryption.",
            "✓".green().bold()
        );
        return Ok(());
    }

    let confirmed = Confirm::new("Downgrade to machine-based encryption?")
        .with_default(false)
        .prompt()
        .unwrap_or(false);
    if !confirmed {
        println!("Cancelled.");
        return Ok(());
    }

    oauth.storage().change_encryption(None).await?;
    println!(
        "{} Switched to machine-based encryption",
        "✓".green().bold()
    );
    Ok(())
}

async fn status_command(config: &CherryInConfig) -> Result<()> {
    let oauth = open_manager(config).await?;
    let mode = oauth.storage().encryption_mode().await;

    println!("{}", "🔒 Token Encryption Status".bold().cyan());
    println!();
    println!("  Database: {}", config.database_path().display());

    match mode {
        EncryptionMode::Machine => {
            println!("  Mode: {}", "machine".yellow());
            println!(
                "  {}",
                "Tokens can be read by anyone with access to this account.".dimmed()
            );
            println!(
                "  Use {} for stronger protection.",
                "cherryin security set-password".yellow()
            );
        }
        EncryptionMode::Password => {
            println!("  Mode: {}", "password".green());
            println!("  {}", "Tokens are sealed with your password.".dimmed());
        }
    }
    Ok(())
}
