//! Gmail MCP tools
//!
//! Gmail operations (read, send, manage, newsletter digests) exposed as
//! tool calls for an AI assistant, authenticated with OAuth 2.0.
//!
//! # Overview
//!
//! - **Authentication**: OAuth2 credential lifecycle with refresh, atomic
//!   persistence and interactive consent
//! - **Codec**: decoding Gmail's MIME part trees and encoding outgoing mail
//! - **Threading**: replies that stay in the original conversation
//! - **Newsletters**: time-windowed retrieval, HTML cleanup, grouping
//! - **Tools**: validated tool-call contracts with structured errors
//!
//! # Example Usage
//!
//! ```no_run
//! use gmail_mcp::{cli, config::Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!
//!     let credentials = cli::build_credentials(&config).await?;
//!     let tools = cli::build_tools(&config, credentials)?;
//!
//!     let digest = tools.fetch_newsletters(Some(36), &[]).await?;
//!     println!("{} newsletters", digest.total_emails);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`] - OAuth2 credentials: load, refresh, persist, authorize, revoke
//! - [`api`] - Gmail REST v1 wire types
//! - [`provider`] - Mail provider trait and the HTTP implementation
//! - [`codec`] - MIME decoding and transport-document encoding
//! - [`html`] - Newsletter HTML cleaning
//! - [`threading`] - Reply assembly
//! - [`newsletter`] - Newsletter digest pipeline
//! - [`tools`] - Tool-call contracts
//! - [`cli`] - Command-line interface
//! - [`config`] - Configuration management
//! - [`error`] - Error types and result aliases
//! - [`models`] - Core data structures
//! - [`rate_limiter`] - Client-side Gmail quota limiting
//! - [`retry`] - Exponential backoff for transient failures
//! - [`validation`] - Parameter validation

pub mod api;
pub mod auth;
pub mod cli;
pub mod codec;
pub mod config;
pub mod error;
pub mod html;
pub mod models;
pub mod newsletter;
pub mod provider;
pub mod rate_limiter;
pub mod retry;
pub mod threading;
pub mod tools;
pub mod validation;

pub use error::{ErrorKind, GmailError, Result, ToolError};
pub use models::{EmailMessage, EmailSummary, NewsletterDigest, NewsletterEntry, OutgoingMessage};
pub use tools::GmailTools;
