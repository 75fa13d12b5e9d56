//! Newsletter digest: time-windowed retrieval, cleaning and grouping
//!
//! The window is applied twice. Gmail's `after:` operator only takes a
//! date and interprets it in the account's timezone, so the server-side
//! bound is widened to whole days plus one day of margin. The exact
//! cutoff (`now - hours_back`) is then applied to each message's
//! timestamp in memory; a message exactly on the cutoff is kept.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::api::MessageFormat;
use crate::codec;
use crate::config::NewsletterConfig;
use crate::error::{GmailError, Result};
use crate::html;
use crate::models::{extract_address, parse_mailbox, EmailMessage, NewsletterDigest, NewsletterEntry, SkippedMessage};
use crate::provider::MailProvider;

enum Outcome {
    Entry(NewsletterEntry),
    Skipped(SkippedMessage),
    OutsideWindow,
}

pub struct NewsletterPipeline {
    provider: Arc<dyn MailProvider>,
    config: NewsletterConfig,
}

impl NewsletterPipeline {
    pub fn new(provider: Arc<dyn MailProvider>, config: NewsletterConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &NewsletterConfig {
        &self.config
    }

    /// Fetch newsletters received in the last `hours_back` hours.
    ///
    /// An empty `senders` list means the configured default senders.
    pub async fn fetch(&self, hours_back: u32, senders: &[String]) -> Result<NewsletterDigest> {
        self.fetch_at(Utc::now(), hours_back, senders).await
    }

    /// [`fetch`](Self::fetch) with an explicit clock
    pub async fn fetch_at(
        &self,
        now: DateTime<Utc>,
        hours_back: u32,
        senders: &[String],
    ) -> Result<NewsletterDigest> {
        let senders: Vec<String> = if senders.is_empty() {
            self.config.sender_addresses()
        } else {
            senders.iter().map(|s| extract_address(s)).collect()
        };
        let cutoff = now - ChronoDuration::hours(hours_back as i64);
        let query = build_query(&senders, now, hours_back);

        info!(
            "Fetching newsletters from {} senders, last {} hours",
            senders.len(),
            hours_back
        );
        debug!("Newsletter query: {}", query);

        let refs = self
            .provider
            .list_messages(&query, &[], self.config.max_results)
            .await?;

        let outcomes: Vec<Outcome> = stream::iter(refs)
            .map(|message_ref| self.process(message_ref.id, cutoff))
            .buffered(self.config.fetch_concurrency.max(1))
            .try_collect()
            .await?;

        let mut newsletters_by_sender: BTreeMap<String, Vec<NewsletterEntry>> = BTreeMap::new();
        let mut skipped = Vec::new();
        let mut total_emails = 0;
        let mut outside_window = 0;

        for outcome in outcomes {
            match outcome {
                Outcome::Entry(entry) => {
                    total_emails += 1;
                    newsletters_by_sender
                        .entry(entry.sender.clone())
                        .or_default()
                        .push(entry);
                }
                Outcome::Skipped(message) => skipped.push(message),
                Outcome::OutsideWindow => outside_window += 1,
            }
        }

        info!(
            "Newsletter digest: {} entries from {} senders ({} outside window, {} skipped)",
            total_emails,
            newsletters_by_sender.len(),
            outside_window,
            skipped.len()
        );

        Ok(NewsletterDigest {
            date_range: format!(
                "{} to {}",
                cutoff.format("%Y-%m-%d"),
                now.format("%Y-%m-%d")
            ),
            hours_back,
            total_emails,
            newsletters_by_sender,
            skipped,
        })
    }

    async fn process(&self, id: String, cutoff: DateTime<Utc>) -> Result<Outcome> {
        let raw = match self.provider.get_message(&id, MessageFormat::Full).await {
            Ok(raw) => raw,
            Err(GmailError::NotFound { .. }) => {
                warn!("Message {} disappeared between list and get, skipping", id);
                return Ok(Outcome::Skipped(SkippedMessage {
                    message_id: id,
                    reason: "message no longer exists".to_string(),
                }));
            }
            Err(e) => return Err(e),
        };

        let message = match codec::decode(&raw) {
            Ok(message) => message,
            Err(e) => {
                warn!("Could not decode newsletter {}: {}", id, e);
                return Ok(Outcome::Skipped(SkippedMessage {
                    message_id: id,
                    reason: e.to_string(),
                }));
            }
        };

        let Some(timestamp) = message.received_at else {
            warn!("Newsletter {} has no usable timestamp, skipping", id);
            return Ok(Outcome::Skipped(SkippedMessage {
                message_id: id,
                reason: "message has no usable timestamp".to_string(),
            }));
        };

        if timestamp < cutoff {
            debug!("Message {} at {} is older than the cutoff", id, timestamp);
            return Ok(Outcome::OutsideWindow);
        }

        Ok(Outcome::Entry(self.entry(&message, timestamp)))
    }

    fn entry(&self, message: &EmailMessage, timestamp: DateTime<Utc>) -> NewsletterEntry {
        let (name, address) = parse_mailbox(message.from().unwrap_or(""));
        let display_name = name
            .or_else(|| self.config.sender_name(&address).map(str::to_string))
            .unwrap_or_else(|| name_from_domain(&address));

        let content = html::clean_content(
            message.html_body.as_deref(),
            message.plain_body.as_deref(),
            self.config.max_content_length,
        )
        .unwrap_or_else(|| message.snippet.clone());

        NewsletterEntry {
            message_id: message.id.clone(),
            sender: address.to_lowercase(),
            display_name,
            subject: message.subject().to_string(),
            timestamp,
            content,
        }
    }
}

/// Server-side lower bound: `hours_back` rounded up to whole days, plus
/// one day for the provider's timezone
pub fn query_lower_bound(now: DateTime<Utc>, hours_back: u32) -> NaiveDate {
    let days = (hours_back as i64 + 23) / 24 + 1;
    (now - ChronoDuration::days(days)).date_naive()
}

/// `from:(a OR b ...) after:YYYY/MM/DD`; `senders` must already be bare addresses
pub fn build_query(senders: &[String], now: DateTime<Utc>, hours_back: u32) -> String {
    format!(
        "from:({}) after:{}",
        senders.join(" OR "),
        query_lower_bound(now, hours_back).format("%Y/%m/%d")
    )
}

/// `news@mail.example.com` → `Example`
fn name_from_domain(address: &str) -> String {
    let Some((_, domain)) = address.rsplit_once('@') else {
        return address.to_string();
    };
    let labels: Vec<&str> = domain.split('.').filter(|l| !l.is_empty()).collect();
    let label = match labels.len() {
        0 => return address.to_string(),
        1 => labels[0],
        n => labels[n - 2],
    };

    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => address.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_query_lower_bound_rounds_outward() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).unwrap();

        // 36h -> 2 days + 1 margin
        assert_eq!(
            query_lower_bound(now, 36),
            NaiveDate::from_ymd_opt(2024, 3, 7).unwrap()
        );
        // 24h -> 1 day + 1 margin
        assert_eq!(
            query_lower_bound(now, 24),
            NaiveDate::from_ymd_opt(2024, 3, 8).unwrap()
        );
        assert_eq!(
            query_lower_bound(now, 1),
            NaiveDate::from_ymd_opt(2024, 3, 8).unwrap()
        );
    }

    #[test]
    fn test_lower_bound_never_after_exact_cutoff() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 0, 30, 0).unwrap();
        for hours in [1, 6, 23, 24, 25, 36, 47, 48, 168] {
            let cutoff = now - ChronoDuration::hours(hours as i64);
            let bound = query_lower_bound(now, hours);
            // A mailbox at UTC-12 sees the cutoff on the earliest local date
            let cutoff_local_date = (cutoff - ChronoDuration::hours(12)).date_naive();
            assert!(bound <= cutoff_local_date, "hours={}", hours);
        }
    }

    #[test]
    fn test_build_query() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).unwrap();
        let senders = vec![
            "a@example.com".to_string(),
            "b@example.org".to_string(),
        ];
        assert_eq!(
            build_query(&senders, now, 36),
            "from:(a@example.com OR b@example.org) after:2024/03/07"
        );
    }

    #[test]
    fn test_name_from_domain() {
        assert_eq!(name_from_domain("news@daily.therundown.ai"), "Therundown");
        assert_eq!(name_from_domain("hello@bensbites.co"), "Bensbites");
        assert_eq!(name_from_domain("digest@mail.substack.com"), "Substack");
        assert_eq!(name_from_domain("a@b.c.example.co"), "Example");
        assert_eq!(name_from_domain("x@localhost"), "Localhost");
        assert_eq!(name_from_domain("not-an-address"), "not-an-address");
    }
}
