//! Gmail REST v1 access behind a mockable trait

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::{DeserializeOwned, IgnoredAny};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::api::{
    Label, ListLabelsResponse, ListMessagesResponse, MessageFormat, MessageRef,
    ModifyMessageRequest, Profile, RawMessage, SendMessageRequest,
};
use crate::auth::CredentialManager;
use crate::config::GmailApiConfig;
use crate::error::{GmailError, Result};
use crate::rate_limiter::{QuotaCost, QuotaLimiter};
use crate::retry::{with_retry_when, RetryPolicy};

/// Largest page `users.messages.list` will return
const MAX_PAGE_SIZE: u32 = 500;

/// Trait defining the mail provider operations the tools rely on
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// List message references matching a Gmail search query (empty for
    /// all) and label ids, newest first, up to `max_results`
    async fn list_messages(
        &self,
        query: &str,
        label_ids: &[String],
        max_results: u32,
    ) -> Result<Vec<MessageRef>>;

    async fn get_message(&self, id: &str, format: MessageFormat) -> Result<RawMessage>;

    /// Send a base64url transport document, optionally into an existing thread.
    ///
    /// Not idempotent: only failures where the provider never saw the
    /// request (rate limiting, refused connections) are retried.
    async fn send_message(&self, raw: String, thread_id: Option<String>) -> Result<MessageRef>;

    async fn modify_labels(&self, id: &str, add: &[String], remove: &[String]) -> Result<()>;

    async fn trash_message(&self, id: &str) -> Result<()>;

    async fn get_profile(&self) -> Result<Profile>;

    /// System and user labels of the mailbox
    async fn list_labels(&self) -> Result<Vec<Label>>;
}

/// Outcome of one request, before a possible token refresh
enum Reply<T> {
    Done(T),
    Unauthorized(String),
}

/// Build the shared HTTP client with the configured request timeout
pub fn build_http_client(config: &GmailApiConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .user_agent(concat!("gmail-mcp/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| GmailError::ConfigError(format!("Failed to build HTTP client: {}", e)))
}

/// Production provider speaking Gmail REST v1
///
/// Every request:
/// - waits for quota units on the shared [`QuotaLimiter`]
/// - carries a bearer token from the [`CredentialManager`]
/// - runs inside [`with_retry_when`], so 5xx, 429 and network failures back off
///
/// The token is obtained once per call, outside the retry loop: the
/// [`CredentialManager`] already retries its own token requests. A 401 on a
/// token the manager considered valid triggers one `refresh_if_current`
/// and a single replay of the request.
pub struct HttpMailProvider {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<CredentialManager>,
    quota: QuotaLimiter,
    retry: RetryPolicy,
}

impl HttpMailProvider {
    pub fn new(
        http: reqwest::Client,
        config: &GmailApiConfig,
        credentials: Arc<CredentialManager>,
        quota: QuotaLimiter,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            credentials,
            quota,
            retry,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/users/me/{}", self.base_url, path)
    }

    async fn call<T, B>(&self, operation: &str, cost: QuotaCost, build: B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Fn(&reqwest::Client) -> reqwest::RequestBuilder + Send + Sync,
    {
        self.call_when(operation, cost, GmailError::is_transient, build)
            .await
    }

    async fn call_when<T, B>(
        &self,
        operation: &str,
        cost: QuotaCost,
        retryable: fn(&GmailError) -> bool,
        build: B,
    ) -> Result<T>
    where
        T: DeserializeOwned,
        B: Fn(&reqwest::Client) -> reqwest::RequestBuilder + Send + Sync,
    {
        let mut token = self.credentials.access_token().await?;
        let mut replayed = false;

        loop {
            let reply = with_retry_when(operation, &self.retry, retryable, || {
                self.attempt(operation, cost, &build, &token)
            })
            .await?;

            match reply {
                Reply::Done(value) => return Ok(value),
                Reply::Unauthorized(_) if !replayed => {
                    warn!("{} returned 401, refreshing access token and replaying once", operation);
                    token = self.credentials.refresh_if_current(&token).await?.access_token;
                    replayed = true;
                }
                Reply::Unauthorized(body) => {
                    return Err(GmailError::from_status(operation, 401, None, &body));
                }
            }
        }
    }

    async fn attempt<T, B>(&self, operation: &str, cost: QuotaCost, build: &B, token: &str) -> Result<Reply<T>>
    where
        T: DeserializeOwned,
        B: Fn(&reqwest::Client) -> reqwest::RequestBuilder + Send + Sync,
    {
        self.quota.acquire(cost).await;

        debug!("Calling Gmail API: {}", operation);
        let response = build(&self.http).bearer_auth(token).send().await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Ok(Reply::Unauthorized(response.text().await.unwrap_or_default()));
        }
        parse_response(operation, response).await.map(Reply::Done)
    }
}

async fn parse_response<T: DeserializeOwned>(operation: &str, response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return response.json::<T>().await.map_err(|e| GmailError::ProviderError {
            operation: operation.to_string(),
            status: status.as_u16(),
            message: format!("unreadable response body: {}", e),
        });
    }

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.text().await.unwrap_or_default();

    Err(GmailError::from_status(
        operation,
        status.as_u16(),
        retry_after.as_deref(),
        &body,
    ))
}

/// Report a 404 against the message id rather than the provider's wording
fn name_missing_message(id: &str) -> impl FnOnce(GmailError) -> GmailError + '_ {
    move |error| match error {
        GmailError::NotFound { operation, .. } => {
            GmailError::not_found(operation, format!("message {}", id))
        }
        other => other,
    }
}

#[async_trait]
impl MailProvider for HttpMailProvider {
    async fn list_messages(
        &self,
        query: &str,
        label_ids: &[String],
        max_results: u32,
    ) -> Result<Vec<MessageRef>> {
        let url = self.url("messages");
        let mut collected: Vec<MessageRef> = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let remaining = max_results.saturating_sub(collected.len() as u32);
            if remaining == 0 {
                break;
            }
            let page_size = remaining.min(MAX_PAGE_SIZE);

            let page: ListMessagesResponse = self
                .call("list messages", QuotaCost::List, |http| {
                    let mut request = http
                        .get(&url)
                        .query(&[("maxResults", page_size.to_string())]);
                    if !query.is_empty() {
                        request = request.query(&[("q", query)]);
                    }
                    for label in label_ids {
                        request = request.query(&[("labelIds", label)]);
                    }
                    if let Some(token) = &page_token {
                        request = request.query(&[("pageToken", token)]);
                    }
                    request
                })
                .await?;

            collected.extend(page.messages);
            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        collected.truncate(max_results as usize);
        debug!("Listed {} messages for query {:?}", collected.len(), query);
        Ok(collected)
    }

    async fn get_message(&self, id: &str, format: MessageFormat) -> Result<RawMessage> {
        let url = self.url(&format!("messages/{}", id));
        self.call("get message", QuotaCost::Get, |http| {
            http.get(&url).query(&[("format", format.as_str())])
        })
        .await
        .map_err(name_missing_message(id))
    }

    async fn send_message(&self, raw: String, thread_id: Option<String>) -> Result<MessageRef> {
        let url = self.url("messages/send");
        let request = SendMessageRequest {
            raw: &raw,
            thread_id: thread_id.as_deref(),
        };
        let sent: MessageRef = self
            .call_when(
                "send message",
                QuotaCost::Send,
                GmailError::is_safe_to_resend,
                |http| http.post(&url).json(&request),
            )
            .await?;
        debug!("Sent message {} in thread {}", sent.id, sent.thread_id);
        Ok(sent)
    }

    async fn modify_labels(&self, id: &str, add: &[String], remove: &[String]) -> Result<()> {
        let url = self.url(&format!("messages/{}/modify", id));
        let request = ModifyMessageRequest {
            add_label_ids: add,
            remove_label_ids: remove,
        };
        let _: IgnoredAny = self
            .call("modify labels", QuotaCost::Modify, |http| {
                http.post(&url).json(&request)
            })
            .await
            .map_err(name_missing_message(id))?;
        Ok(())
    }

    async fn trash_message(&self, id: &str) -> Result<()> {
        let url = self.url(&format!("messages/{}/trash", id));
        let _: IgnoredAny = self
            .call("trash message", QuotaCost::Trash, |http| http.post(&url))
            .await
            .map_err(name_missing_message(id))?;
        Ok(())
    }

    async fn get_profile(&self) -> Result<Profile> {
        let url = self.url("profile");
        self.call("get profile", QuotaCost::Profile, |http| http.get(&url))
            .await
    }

    async fn list_labels(&self) -> Result<Vec<Label>> {
        let url = self.url("labels");
        let response: ListLabelsResponse = self
            .call("list labels", QuotaCost::Labels, |http| http.get(&url))
            .await?;
        debug!("Listed {} labels", response.labels.len());
        Ok(response.labels)
    }
}

// Allow shared ownership of a provider behind Arc
#[async_trait]
impl<P: MailProvider + ?Sized> MailProvider for Arc<P> {
    async fn list_messages(
        &self,
        query: &str,
        label_ids: &[String],
        max_results: u32,
    ) -> Result<Vec<MessageRef>> {
        self.as_ref().list_messages(query, label_ids, max_results).await
    }

    async fn get_message(&self, id: &str, format: MessageFormat) -> Result<RawMessage> {
        self.as_ref().get_message(id, format).await
    }

    async fn send_message(&self, raw: String, thread_id: Option<String>) -> Result<MessageRef> {
        self.as_ref().send_message(raw, thread_id).await
    }

    async fn modify_labels(&self, id: &str, add: &[String], remove: &[String]) -> Result<()> {
        self.as_ref().modify_labels(id, add, remove).await
    }

    async fn trash_message(&self, id: &str) -> Result<()> {
        self.as_ref().trash_message(id).await
    }

    async fn get_profile(&self) -> Result<Profile> {
        self.as_ref().get_profile().await
    }

    async fn list_labels(&self) -> Result<Vec<Label>> {
        self.as_ref().list_labels().await
    }
}
