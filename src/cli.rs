//! Command-line interface

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::auth::{ClientSecret, CredentialManager};
use crate::config::Config;
use crate::error::{GmailError, ToolError};
use crate::provider::{build_http_client, HttpMailProvider};
use crate::rate_limiter::QuotaLimiter;
use crate::retry::RetryPolicy;
use crate::tools::{GmailTools, ManageAction};

#[derive(Parser, Debug)]
#[command(name = "gmail-mcp")]
#[command(version)]
#[command(about = "Gmail tools for AI assistants: read, send, manage, newsletter digests", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authorize access to Gmail in the browser
    Auth {
        /// Re-authorize even if a credential is stored
        #[arg(long)]
        force: bool,
    },

    /// Revoke the stored credential and delete it
    Logout,

    /// Show the stored credential's state without contacting Gmail
    Status,

    /// Check that the credential works by reading the mailbox profile
    Verify,

    /// List messages
    List {
        /// Gmail search query, e.g. "is:unread from:alice@example.com"
        #[arg(short, long)]
        query: Option<String>,

        /// Label id to restrict to, e.g. INBOX
        #[arg(short, long)]
        label: Option<String>,

        #[arg(short = 'n', long, default_value_t = 10)]
        max_results: u32,
    },

    /// List the mailbox's labels and their ids
    Labels,

    /// Read one message
    Read { message_id: String },

    /// Send a new message
    Send {
        #[arg(long)]
        to: String,

        #[arg(long)]
        subject: String,

        #[arg(long)]
        body: String,

        /// Send the body as HTML
        #[arg(long)]
        html: bool,
    },

    /// Reply within the original conversation
    Reply {
        message_id: String,

        #[arg(long)]
        body: String,

        #[arg(long)]
        html: bool,
    },

    /// Change a message's state
    Manage {
        message_id: String,

        #[arg(value_enum)]
        action: ManageAction,
    },

    /// Digest of recent newsletters grouped by sender
    Newsletters {
        /// Window size in hours (defaults to the configured value)
        #[arg(long)]
        hours_back: Option<u32>,

        /// Sender address; repeat for several (defaults to the configured list)
        #[arg(long = "sender")]
        senders: Vec<String>,
    },

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

impl Commands {
    /// Operation name reported in errors
    pub fn operation(&self) -> &'static str {
        match self {
            Commands::Auth { .. } => "auth",
            Commands::Logout => "logout",
            Commands::Status => "status",
            Commands::Verify => "test_connection",
            Commands::List { .. } => "list_emails",
            Commands::Labels => "list_labels",
            Commands::Read { .. } => "read_email",
            Commands::Send { .. } => "send_email",
            Commands::Reply { .. } => "reply_email",
            Commands::Manage { .. } => "manage_email",
            Commands::Newsletters { .. } => "fetch_newsletters",
            Commands::InitConfig { .. } => "init_config",
        }
    }
}

/// Wire the credential manager from configuration
pub async fn build_credentials(config: &Config) -> crate::error::Result<Arc<CredentialManager>> {
    let secret = ClientSecret::discover(&config.auth.credentials_path).await?;
    let http = build_http_client(&config.gmail)?;
    Ok(Arc::new(CredentialManager::new(
        secret,
        &config.auth,
        RetryPolicy::from(&config.retry),
        http,
    )))
}

/// Wire the tool layer over the production provider
pub fn build_tools(
    config: &Config,
    credentials: Arc<CredentialManager>,
) -> crate::error::Result<GmailTools> {
    let provider = HttpMailProvider::new(
        build_http_client(&config.gmail)?,
        &config.gmail,
        credentials,
        QuotaLimiter::from_config(&config.quota),
        RetryPolicy::from(&config.retry),
    );
    Ok(GmailTools::new(Arc::new(provider), config.newsletter.clone()))
}

#[derive(Debug, Serialize)]
struct AuthOutcome {
    authorized: bool,
    token_path: PathBuf,
    expires_at: chrono::DateTime<chrono::Utc>,
    scopes: Vec<String>,
}

#[derive(Debug, Serialize)]
struct LogoutOutcome {
    removed: bool,
}

#[derive(Debug, Serialize)]
struct InitConfigOutcome {
    created: PathBuf,
}

fn to_json<T: Serialize>(operation: &str, value: &T) -> Result<serde_json::Value, ToolError> {
    serde_json::to_value(value)
        .map_err(|e| ToolError::from_error(operation, &GmailError::SerializationError(e)))
}

/// Execute one command, returning its JSON result
pub async fn execute(cli: &Cli) -> Result<serde_json::Value, ToolError> {
    let operation = cli.command.operation();
    let fail = |e: GmailError| ToolError::from_error(operation, &e);

    if let Commands::InitConfig { output, force } = &cli.command {
        if output.exists() && !force {
            return Err(fail(GmailError::ConfigError(format!(
                "{:?} already exists; pass --force to overwrite",
                output
            ))));
        }
        Config::create_example(output).await.map_err(fail)?;
        return to_json(operation, &InitConfigOutcome {
            created: output.clone(),
        });
    }

    let config = Config::load(&cli.config).await.map_err(fail)?;
    let credentials = build_credentials(&config).await.map_err(fail)?;

    match &cli.command {
        Commands::Auth { force } => {
            if !force {
                if let Ok(credential) = credentials.ensure_valid().await {
                    info!("Stored credential is valid, skipping consent flow");
                    return to_json(operation, &AuthOutcome {
                        authorized: true,
                        token_path: config.auth.token_path.clone(),
                        expires_at: credential.expires_at,
                        scopes: credential.scopes,
                    });
                }
            }
            let credential = credentials.authorize().await.map_err(fail)?;
            to_json(operation, &AuthOutcome {
                authorized: true,
                token_path: config.auth.token_path.clone(),
                expires_at: credential.expires_at,
                scopes: credential.scopes,
            })
        }
        Commands::Logout => {
            let removed = credentials.revoke().await.map_err(fail)?;
            to_json(operation, &LogoutOutcome { removed })
        }
        Commands::Status => {
            let status = credentials.status().await.map_err(fail)?;
            to_json(operation, &status)
        }
        command => {
            let tools = build_tools(&config, credentials).map_err(fail)?;
            run_tool(&tools, command).await
        }
    }
}

async fn run_tool(tools: &GmailTools, command: &Commands) -> Result<serde_json::Value, ToolError> {
    let operation = command.operation();
    match command {
        Commands::Verify => to_json(operation, &tools.test_connection().await?),
        Commands::List {
            query,
            label,
            max_results,
        } => to_json(
            operation,
            &tools
                .list_emails(query.as_deref(), label.as_deref(), *max_results)
                .await?,
        ),
        Commands::Labels => to_json(operation, &tools.list_labels().await?),
        Commands::Read { message_id } => to_json(operation, &tools.read_email(message_id).await?),
        Commands::Send {
            to,
            subject,
            body,
            html,
        } => to_json(operation, &tools.send_email(to, subject, body, *html).await?),
        Commands::Reply {
            message_id,
            body,
            html,
        } => to_json(operation, &tools.reply_email(message_id, body, *html).await?),
        Commands::Manage { message_id, action } => {
            to_json(operation, &tools.manage_email(message_id, *action).await?)
        }
        Commands::Newsletters {
            hours_back,
            senders,
        } => to_json(
            operation,
            &tools.fetch_newsletters(*hours_back, senders).await?,
        ),
        Commands::Auth { .. } | Commands::Logout | Commands::Status | Commands::InitConfig { .. } => {
            Err(ToolError::from_error(
                operation,
                &GmailError::ConfigError(format!("{} is not a tool command", operation)),
            ))
        }
    }
}
