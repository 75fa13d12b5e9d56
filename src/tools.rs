//! Tool-call contracts exposed to an assistant
//!
//! Each operation validates its scalar parameters locally, before any
//! network traffic, then routes through the provider and the core
//! modules. Failures come back as a serializable [`ToolError`].

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::api::{Label, MessageFormat};
use crate::codec;
use crate::config::NewsletterConfig;
use crate::error::{GmailError, Result, ToolError};
use crate::models::{
    extract_address, BodyFormat, EmailMessage, EmailSummary, NewsletterDigest, OutgoingMessage,
};
use crate::newsletter::NewsletterPipeline;
use crate::provider::MailProvider;
use crate::threading::{build_reply, ThreadLinkage};
use crate::validation;

const LABEL_UNREAD: &str = "UNREAD";
const LABEL_INBOX: &str = "INBOX";
const LABEL_STARRED: &str = "STARRED";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileSummary {
    pub email_address: String,
    pub messages_total: u64,
    pub threads_total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendConfirmation {
    pub message_id: String,
    pub thread_id: String,
    pub to: String,
    pub subject: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplyConfirmation {
    pub message_id: String,
    pub thread_id: String,
    pub to: String,
    pub subject: String,
    pub in_reply_to: Option<String>,
    pub threading: ThreadLinkage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManageConfirmation {
    pub message_id: String,
    pub action: ManageAction,
    pub added_labels: Vec<String>,
    pub removed_labels: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ManageAction {
    MarkRead,
    MarkUnread,
    Archive,
    MoveToInbox,
    Star,
    Unstar,
    Trash,
}

impl ManageAction {
    /// Label ids to add and remove; `None` for trash, which has its own endpoint
    fn label_changes(self) -> Option<(Vec<String>, Vec<String>)> {
        let label = |name: &str| vec![name.to_string()];
        match self {
            ManageAction::MarkRead => Some((vec![], label(LABEL_UNREAD))),
            ManageAction::MarkUnread => Some((label(LABEL_UNREAD), vec![])),
            ManageAction::Archive => Some((vec![], label(LABEL_INBOX))),
            ManageAction::MoveToInbox => Some((label(LABEL_INBOX), vec![])),
            ManageAction::Star => Some((label(LABEL_STARRED), vec![])),
            ManageAction::Unstar => Some((vec![], label(LABEL_STARRED))),
            ManageAction::Trash => None,
        }
    }
}

pub struct GmailTools {
    provider: Arc<dyn MailProvider>,
    newsletters: NewsletterPipeline,
    concurrency: usize,
}

/// Log the failure and convert it for the caller
fn tool_error(operation: &'static str) -> impl Fn(GmailError) -> ToolError {
    move |e| {
        if e.kind() == crate::error::ErrorKind::Validation {
            warn!("{} rejected: {}", operation, e);
        } else {
            error!("{} failed: {}", operation, e);
        }
        ToolError::from_error(operation, &e)
    }
}

impl GmailTools {
    pub fn new(provider: Arc<dyn MailProvider>, newsletter_config: NewsletterConfig) -> Self {
        let concurrency = newsletter_config.fetch_concurrency.max(1);
        Self {
            newsletters: NewsletterPipeline::new(provider.clone(), newsletter_config),
            provider,
            concurrency,
        }
    }

    /// Verify the credential and API access by reading the mailbox profile
    pub async fn test_connection(&self) -> std::result::Result<ProfileSummary, ToolError> {
        let profile = self
            .provider
            .get_profile()
            .await
            .map_err(tool_error("test_connection"))?;

        info!("Connected to {}", profile.email_address);
        Ok(ProfileSummary {
            email_address: profile.email_address,
            messages_total: profile.messages_total,
            threads_total: profile.threads_total,
        })
    }

    pub async fn list_emails(
        &self,
        query: Option<&str>,
        label: Option<&str>,
        max_results: u32,
    ) -> std::result::Result<Vec<EmailSummary>, ToolError> {
        self.list_inner(query, label, max_results)
            .await
            .map_err(tool_error("list_emails"))
    }

    async fn list_inner(
        &self,
        query: Option<&str>,
        label: Option<&str>,
        max_results: u32,
    ) -> Result<Vec<EmailSummary>> {
        validation::validate_max_results(max_results)?;
        let query = match query {
            Some(q) => validation::sanitize_query(q)?,
            None => String::new(),
        };
        let label_ids: Vec<String> = label
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| vec![l.to_string()])
            .unwrap_or_default();

        let refs = self
            .provider
            .list_messages(&query, &label_ids, max_results)
            .await?;

        let fetched: Vec<Result<Option<EmailSummary>>> = stream::iter(refs)
            .map(|message_ref| async move {
                match self
                    .provider
                    .get_message(&message_ref.id, MessageFormat::Metadata)
                    .await
                {
                    Ok(raw) => Ok(Some(codec::summarize(&raw))),
                    Err(GmailError::NotFound { .. }) => {
                        warn!("Message {} disappeared before it could be listed", message_ref.id);
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut summaries = Vec::with_capacity(fetched.len());
        for summary in fetched {
            if let Some(summary) = summary? {
                summaries.push(summary);
            }
        }
        Ok(summaries)
    }

    /// Labels of the mailbox; their ids are what `list_emails` filters on
    pub async fn list_labels(&self) -> std::result::Result<Vec<Label>, ToolError> {
        let labels = self
            .provider
            .list_labels()
            .await
            .map_err(tool_error("list_labels"))?;
        info!("Found {} labels", labels.len());
        Ok(labels)
    }

    pub async fn read_email(&self, message_id: &str) -> std::result::Result<EmailMessage, ToolError> {
        self.read_inner(message_id)
            .await
            .map_err(tool_error("read_email"))
    }

    async fn read_inner(&self, message_id: &str) -> Result<EmailMessage> {
        validation::validate_message_id(message_id)?;
        let raw = self
            .provider
            .get_message(message_id, MessageFormat::Full)
            .await?;
        codec::decode(&raw)
    }

    pub async fn send_email(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        html: bool,
    ) -> std::result::Result<SendConfirmation, ToolError> {
        self.send_inner(to, subject, body, html)
            .await
            .map_err(tool_error("send_email"))
    }

    async fn send_inner(&self, to: &str, subject: &str, body: &str, html: bool) -> Result<SendConfirmation> {
        validation::validate_recipients(to)?;
        validation::validate_subject(subject)?;
        validation::validate_body(body)?;

        let message = OutgoingMessage::new(to, subject, body, BodyFormat::from_html_flag(html));
        let raw = codec::encode(&message)?;
        let sent = self.provider.send_message(raw, None).await?;

        info!("Sent message {} to {}", sent.id, message.to);
        Ok(SendConfirmation {
            message_id: sent.id,
            thread_id: sent.thread_id,
            to: message.to,
            subject: message.subject,
        })
    }

    pub async fn reply_email(
        &self,
        message_id: &str,
        body: &str,
        html: bool,
    ) -> std::result::Result<ReplyConfirmation, ToolError> {
        self.reply_inner(message_id, body, html)
            .await
            .map_err(tool_error("reply_email"))
    }

    async fn reply_inner(&self, message_id: &str, body: &str, html: bool) -> Result<ReplyConfirmation> {
        validation::validate_message_id(message_id)?;
        validation::validate_body(body)?;

        let raw = self
            .provider
            .get_message(message_id, MessageFormat::Full)
            .await?;
        let original = codec::decode(&raw)?;
        let draft = build_reply(&original, body, BodyFormat::from_html_flag(html))?;

        let encoded = codec::encode(&draft.message)?;
        let thread_id = Some(draft.thread_id.clone()).filter(|t| !t.is_empty());
        let sent = self.provider.send_message(encoded, thread_id).await?;

        info!(
            "Sent reply {} to message {} in thread {}",
            sent.id, message_id, sent.thread_id
        );
        Ok(ReplyConfirmation {
            message_id: sent.id,
            thread_id: sent.thread_id,
            in_reply_to: draft.message.threading.map(|t| t.in_reply_to),
            to: draft.message.to,
            subject: draft.message.subject,
            threading: draft.linkage,
        })
    }

    pub async fn manage_email(
        &self,
        message_id: &str,
        action: ManageAction,
    ) -> std::result::Result<ManageConfirmation, ToolError> {
        self.manage_inner(message_id, action)
            .await
            .map_err(tool_error("manage_email"))
    }

    async fn manage_inner(&self, message_id: &str, action: ManageAction) -> Result<ManageConfirmation> {
        validation::validate_message_id(message_id)?;

        let (added_labels, removed_labels) = match action.label_changes() {
            Some((add, remove)) => {
                self.provider
                    .modify_labels(message_id, &add, &remove)
                    .await?;
                (add, remove)
            }
            None => {
                self.provider.trash_message(message_id).await?;
                (vec!["TRASH".to_string()], vec![])
            }
        };

        info!("Applied {:?} to message {}", action, message_id);
        Ok(ManageConfirmation {
            message_id: message_id.to_string(),
            action,
            added_labels,
            removed_labels,
        })
    }

    /// `hours_back` defaults to the configured window; an empty sender
    /// list means the configured senders
    pub async fn fetch_newsletters(
        &self,
        hours_back: Option<u32>,
        senders: &[String],
    ) -> std::result::Result<NewsletterDigest, ToolError> {
        self.newsletters_inner(hours_back, senders)
            .await
            .map_err(tool_error("fetch_newsletters"))
    }

    async fn newsletters_inner(&self, hours_back: Option<u32>, senders: &[String]) -> Result<NewsletterDigest> {
        let hours_back = hours_back.unwrap_or(self.newsletters.config().default_hours_back);
        validation::validate_hours_back(hours_back)?;

        let mut addresses = Vec::with_capacity(senders.len());
        for sender in senders.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
            validation::validate_email(sender).map_err(|_| {
                GmailError::validation("senders", format!("invalid sender address: {}", sender))
            })?;
            addresses.push(extract_address(sender));
        }

        self.newsletters.fetch(hours_back, &addresses).await
    }
}
