//! Reply assembly that keeps replies in the original conversation.

use serde::Serialize;
use tracing::warn;

use crate::error::{GmailError, Result};
use crate::models::{BodyFormat, EmailMessage, OutgoingMessage, ThreadingContext};

/// Whether a reply carries RFC 5322 threading headers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ThreadLinkage {
    Linked,
    /// Sent without `In-Reply-To`/`References`; clients may show it as a
    /// new conversation
    Unlinked { reason: String },
}

#[derive(Debug, Clone)]
pub struct ReplyDraft {
    pub message: OutgoingMessage,
    /// Provider conversation to send into
    pub thread_id: String,
    pub linkage: ThreadLinkage,
}

/// Prefix `Re: ` unless the subject already starts with it.
///
/// Matching ignores case and leading whitespace, so applying this to its
/// own output changes nothing.
pub fn reply_subject(original: &str) -> String {
    let trimmed = original.trim();
    let already_reply = trimmed
        .get(..3)
        .map(|prefix| prefix.eq_ignore_ascii_case("re:"))
        .unwrap_or(false);

    if already_reply {
        trimmed.to_string()
    } else {
        format!("Re: {}", trimmed).trim_end().to_string()
    }
}

/// Extend a reference chain with `message_id` unless it is already last
pub fn extend_references(references: &[String], message_id: &str) -> Vec<String> {
    let mut chain = references.to_vec();
    if chain.last().map(String::as_str) != Some(message_id) {
        chain.push(message_id.to_string());
    }
    chain
}

/// Build a reply to `original`.
///
/// A missing `Message-Id` is not fatal: the reply is still produced, without
/// threading headers, and the draft reports [`ThreadLinkage::Unlinked`].
pub fn build_reply(original: &EmailMessage, body: &str, format: BodyFormat) -> Result<ReplyDraft> {
    let to = original
        .from()
        .map(str::trim)
        .filter(|from| !from.is_empty())
        .ok_or_else(|| {
            GmailError::validation(
                "message_id",
                format!("message {} has no From header to reply to", original.id),
            )
        })?;

    let mut message = OutgoingMessage::new(to, reply_subject(original.subject()), body, format);

    let linkage = match original.message_id() {
        Some(message_id) => {
            message.threading = Some(ThreadingContext {
                in_reply_to: message_id.to_string(),
                references: extend_references(&original.references(), message_id),
            });
            ThreadLinkage::Linked
        }
        None => {
            warn!(
                "Message {} has no Message-Id header; reply will not carry threading headers",
                original.id
            );
            ThreadLinkage::Unlinked {
                reason: "original message has no Message-Id header".to_string(),
            }
        }
    };

    Ok(ReplyDraft {
        message,
        thread_id: original.thread_id.clone(),
        linkage,
    })
}
