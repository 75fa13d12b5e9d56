//! Common test utilities and fixtures
#![allow(dead_code)]

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use gmail_mcp::api::{Label, MessageFormat, MessageRef, Profile, RawMessage};
use gmail_mcp::auth::{ClientSecret, Credential, CredentialManager, CredentialStore, GMAIL_SCOPES};
use gmail_mcp::config::AuthConfig;
use gmail_mcp::error::{GmailError, Result};
use gmail_mcp::provider::MailProvider;
use gmail_mcp::retry::RetryPolicy;
use mockall::mock;
use serde_json::json;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

/// base64url without padding, as Gmail sends bodies
pub fn b64(text: &str) -> String {
    URL_SAFE_NO_PAD.encode(text.as_bytes())
}

/// Create mock Gmail API message response (JSON)
pub fn mock_gmail_message_response(
    id: &str,
    thread_id: &str,
    from: &str,
    subject: &str,
) -> serde_json::Value {
    json!({
        "id": id,
        "threadId": thread_id,
        "labelIds": ["INBOX", "UNREAD"],
        "snippet": "Email snippet...",
        "payload": {
            "mimeType": "multipart/alternative",
            "headers": [
                {"name": "From", "value": from},
                {"name": "Subject", "value": subject},
                {"name": "Date", "value": "Mon, 1 Jan 2024 10:00:00 -0800"},
                {"name": "To", "value": "me@example.com"},
                {"name": "Message-ID", "value": format!("<{}@mail.example.com>", id)}
            ],
            "parts": [
                {"partId": "0", "mimeType": "text/plain", "body": {"size": 5, "data": b64("Hello")}},
                {"partId": "1", "mimeType": "text/html", "body": {"size": 12, "data": b64("<p>Hello</p>")}}
            ]
        },
        "internalDate": "1704132000000",
        "sizeEstimate": 1234
    })
}

/// Create mock Gmail list messages response (JSON)
pub fn mock_gmail_list_response(
    message_ids: Vec<&str>,
    next_page_token: Option<&str>,
) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = message_ids
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "threadId": format!("thread_{}", id)
            })
        })
        .collect();

    let mut response = json!({
        "messages": messages,
        "resultSizeEstimate": messages.len()
    });

    if let Some(token) = next_page_token {
        response["nextPageToken"] = json!(token);
    }

    response
}

/// A newsletter as Gmail returns it with `format=full`
pub fn newsletter_message(
    id: &str,
    from: &str,
    subject: &str,
    received_at: DateTime<Utc>,
    html: &str,
) -> RawMessage {
    serde_json::from_value(json!({
        "id": id,
        "threadId": format!("thread_{}", id),
        "labelIds": ["INBOX"],
        "snippet": format!("{} snippet", subject),
        "internalDate": received_at.timestamp_millis().to_string(),
        "payload": {
            "mimeType": "multipart/alternative",
            "headers": [
                {"name": "From", "value": from},
                {"name": "Subject", "value": subject},
                {"name": "Date", "value": received_at.to_rfc2822()}
            ],
            "parts": [
                {"partId": "0", "mimeType": "text/plain", "body": {"size": 4, "data": b64("plain version")}},
                {"partId": "1", "mimeType": "text/html", "body": {"size": 10, "data": b64(html)}}
            ]
        }
    }))
    .unwrap()
}

/// An original message to reply to
pub fn original_message(id: &str, headers: &[(&str, &str)]) -> RawMessage {
    let headers: Vec<serde_json::Value> = headers
        .iter()
        .map(|(name, value)| json!({"name": name, "value": value}))
        .collect();

    serde_json::from_value(json!({
        "id": id,
        "threadId": "thread-1",
        "labelIds": ["INBOX"],
        "snippet": "original",
        "internalDate": "1704132000000",
        "payload": {
            "mimeType": "text/plain",
            "headers": headers,
            "body": {"size": 8, "data": b64("original")}
        }
    }))
    .unwrap()
}

pub fn raw_from_json(value: serde_json::Value) -> RawMessage {
    serde_json::from_value(value).unwrap()
}

pub fn test_credential(access_token: &str, expires_in: Duration) -> Credential {
    Credential {
        access_token: access_token.to_string(),
        refresh_token: "refresh-token".to_string(),
        expires_at: Utc::now() + expires_in,
        scopes: GMAIL_SCOPES.iter().map(|s| s.to_string()).collect(),
        token_type: "Bearer".to_string(),
    }
}

pub fn test_client_secret(token_uri: &str) -> ClientSecret {
    ClientSecret {
        client_id: "test-client-id".to_string(),
        client_secret: "test-client-secret".to_string(),
        project_id: None,
        auth_uri: "https://accounts.google.com/o/oauth2/auth".to_string(),
        token_uri: token_uri.to_string(),
        redirect_uris: vec!["http://localhost".to_string()],
    }
}

/// A manager over a token file in `dir`, seeded with `credential` if given
pub async fn credential_manager(
    dir: &Path,
    token_uri: &str,
    credential: Option<&Credential>,
) -> CredentialManager {
    let token_path = dir.join("token.json");
    if let Some(credential) = credential {
        CredentialStore::new(&token_path).save(credential).await.unwrap();
    }

    let config = AuthConfig {
        token_path,
        ..AuthConfig::default()
    };
    CredentialManager::new(
        test_client_secret(token_uri),
        &config,
        RetryPolicy::immediate(3),
        reqwest::Client::new(),
    )
}

/// Token endpoint success body
pub fn token_response(access_token: &str) -> serde_json::Value {
    json!({
        "access_token": access_token,
        "expires_in": 3599,
        "token_type": "Bearer",
        "scope": GMAIL_SCOPES.join(" ")
    })
}

// Mock implementation of MailProvider for testing
mock! {
    pub MailProvider {}

    #[async_trait::async_trait]
    impl MailProvider for MailProvider {
        async fn list_messages(
            &self,
            query: &str,
            label_ids: &[String],
            max_results: u32,
        ) -> Result<Vec<MessageRef>>;
        async fn get_message(&self, id: &str, format: MessageFormat) -> Result<RawMessage>;
        async fn send_message(&self, raw: String, thread_id: Option<String>) -> Result<MessageRef>;
        async fn modify_labels(&self, id: &str, add: &[String], remove: &[String]) -> Result<()>;
        async fn trash_message(&self, id: &str) -> Result<()>;
        async fn get_profile(&self) -> Result<Profile>;
        async fn list_labels(&self) -> Result<Vec<Label>>;
    }
}

/// In-memory mailbox: lists every stored message in insertion order and
/// records the queries it was asked
#[derive(Default)]
pub struct FixtureProvider {
    messages: Vec<RawMessage>,
    vanished: HashSet<String>,
    failing: Option<fn() -> GmailError>,
    pub queries: Mutex<Vec<String>>,
}

impl FixtureProvider {
    pub fn new(messages: Vec<RawMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    /// Listed, but gone by the time it is fetched
    pub fn with_vanished(mut self, id: &str) -> Self {
        self.vanished.insert(id.to_string());
        self
    }

    /// Every `get_message` fails with this error
    pub fn failing_with(mut self, error: fn() -> GmailError) -> Self {
        self.failing = Some(error);
        self
    }
}

#[async_trait]
impl MailProvider for FixtureProvider {
    async fn list_messages(
        &self,
        query: &str,
        _label_ids: &[String],
        max_results: u32,
    ) -> Result<Vec<MessageRef>> {
        self.queries.lock().unwrap().push(query.to_string());
        Ok(self
            .messages
            .iter()
            .map(|m| MessageRef {
                id: m.id.clone(),
                thread_id: m.thread_id.clone(),
            })
            .take(max_results as usize)
            .collect())
    }

    async fn get_message(&self, id: &str, _format: MessageFormat) -> Result<RawMessage> {
        if let Some(error) = self.failing {
            return Err(error());
        }
        if self.vanished.contains(id) {
            return Err(GmailError::not_found("get message", format!("message {}", id)));
        }
        self.messages
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| GmailError::not_found("get message", format!("message {}", id)))
    }

    async fn send_message(&self, _raw: String, thread_id: Option<String>) -> Result<MessageRef> {
        Ok(MessageRef {
            id: "sent".to_string(),
            thread_id: thread_id.unwrap_or_else(|| "new-thread".to_string()),
        })
    }

    async fn modify_labels(&self, _id: &str, _add: &[String], _remove: &[String]) -> Result<()> {
        Ok(())
    }

    async fn trash_message(&self, _id: &str) -> Result<()> {
        Ok(())
    }

    async fn get_profile(&self) -> Result<Profile> {
        Ok(Profile {
            email_address: "me@example.com".to_string(),
            messages_total: self.messages.len() as u64,
            threads_total: self.messages.len() as u64,
            history_id: "1".to_string(),
        })
    }

    async fn list_labels(&self) -> Result<Vec<Label>> {
        Ok(vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_gmail_message_response() {
        let response =
            mock_gmail_message_response("msg1", "thread1", "test@example.com", "Test Subject");
        assert_eq!(response["id"], "msg1");
        assert_eq!(response["threadId"], "thread1");
        let raw = raw_from_json(response);
        assert_eq!(raw.header("subject"), Some("Test Subject"));
    }

    #[test]
    fn test_mock_gmail_list_response() {
        let response = mock_gmail_list_response(vec!["msg1", "msg2"], Some("token123"));
        assert_eq!(response["messages"].as_array().unwrap().len(), 2);
        assert_eq!(response["nextPageToken"], "token123");
    }
}
