use chrono::{DateTime, Utc};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered header mapping with case-insensitive, unique names.
///
/// Inserting a name that is already present replaces its value in place,
/// so the last occurrence of a repeated header wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

impl Serialize for Headers {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// A decoded incoming message
#[derive(Debug, Clone, Serialize)]
pub struct EmailMessage {
    pub id: String,
    pub thread_id: String,
    pub headers: Headers,
    pub plain_body: Option<String>,
    pub html_body: Option<String>,
    pub snippet: String,
    pub labels: Vec<String>,
    pub received_at: Option<DateTime<Utc>>,
}

impl EmailMessage {
    pub fn subject(&self) -> &str {
        self.headers.get("Subject").unwrap_or("")
    }

    pub fn from(&self) -> Option<&str> {
        self.headers.get("From")
    }

    pub fn message_id(&self) -> Option<&str> {
        self.headers
            .get("Message-ID")
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    /// Message ids from the `References` header, oldest first
    pub fn references(&self) -> Vec<String> {
        self.headers
            .get("References")
            .map(|refs| refs.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn has_body(&self) -> bool {
        self.plain_body.is_some() || self.html_body.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BodyFormat {
    #[default]
    Plain,
    Html,
}

impl BodyFormat {
    pub fn from_html_flag(html: bool) -> Self {
        if html {
            BodyFormat::Html
        } else {
            BodyFormat::Plain
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            BodyFormat::Plain => "text/plain",
            BodyFormat::Html => "text/html",
        }
    }
}

/// RFC 5322 conversation headers for a reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadingContext {
    pub in_reply_to: String,
    pub references: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub format: BodyFormat,
    pub threading: Option<ThreadingContext>,
}

impl OutgoingMessage {
    pub fn new(
        to: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
        format: BodyFormat,
    ) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
            format,
            threading: None,
        }
    }
}

/// Header-only view of a message, used for listings
#[derive(Debug, Clone, Serialize)]
pub struct EmailSummary {
    pub id: String,
    pub thread_id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub date: String,
    pub snippet: String,
    pub labels: Vec<String>,
    pub unread: bool,
    pub received_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NewsletterEntry {
    pub message_id: String,
    pub sender: String,
    pub display_name: String,
    pub subject: String,
    pub timestamp: DateTime<Utc>,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SkippedMessage {
    pub message_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewsletterDigest {
    pub date_range: String,
    pub hours_back: u32,
    pub total_emails: usize,
    pub newsletters_by_sender: BTreeMap<String, Vec<NewsletterEntry>>,
    pub skipped: Vec<SkippedMessage>,
}

impl NewsletterDigest {
    pub fn is_empty(&self) -> bool {
        self.total_emails == 0
    }
}

/// Split a mailbox header (`"Jane Doe" <jane@example.com>`) into its
/// display name and address. A bare address has no display name.
pub fn parse_mailbox(header: &str) -> (Option<String>, String) {
    if let Some(start) = header.find('<') {
        if let Some(end) = header[start..].find('>') {
            let name = header[..start].trim().trim_matches('"').trim().to_string();
            let address = header[start + 1..start + end].trim().to_string();
            let name = if name.is_empty() { None } else { Some(name) };
            return (name, address);
        }
    }
    (None, header.trim().to_string())
}

pub fn extract_address(header: &str) -> String {
    parse_mailbox(header).1
}

/// Parse a `Date` header, RFC 2822 first with RFC 3339 as fallback
pub fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    // Strip trailing comments such as "(UTC)" which chrono rejects
    let cleaned = match date_str.find('(') {
        Some(idx) => date_str[..idx].trim(),
        None => date_str.trim(),
    };
    DateTime::parse_from_rfc2822(cleaned)
        .or_else(|_| DateTime::parse_from_rfc3339(cleaned))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Custom deserializers for Gmail API types
pub mod deserializers {
    use chrono::{DateTime, Utc};
    use serde::{
        de::{self, Deserializer},
        Deserialize,
    };

    /// Deserialize Gmail timestamp (milliseconds since epoch as string)
    pub fn deserialize_gmail_timestamp<'de, D>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<String> = Option::deserialize(deserializer)?;
        match opt {
            Some(s) => {
                let millis = s.parse::<i64>().map_err(de::Error::custom)?;
                let dt = DateTime::from_timestamp_millis(millis)
                    .ok_or_else(|| de::Error::custom("Invalid timestamp"))?;
                Ok(Some(dt))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_case_insensitive_last_wins() {
        let headers: Headers = vec![
            ("Subject", "first"),
            ("From", "a@example.com"),
            ("subject", "second"),
        ]
        .into_iter()
        .collect();

        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("SUBJECT"), Some("second"));
        // Position of the first occurrence is kept
        assert_eq!(headers.iter().next(), Some(("Subject", "second")));
    }

    #[test]
    fn test_headers_serialize_as_map() {
        let headers: Headers = vec![("To", "b@example.com"), ("Subject", "Hi")]
            .into_iter()
            .collect();
        let json = serde_json::to_value(&headers).unwrap();
        assert_eq!(json["To"], "b@example.com");
        assert_eq!(json["Subject"], "Hi");
    }

    #[test]
    fn test_parse_mailbox() {
        assert_eq!(
            parse_mailbox("\"Jane Doe\" <jane@example.com>"),
            (Some("Jane Doe".to_string()), "jane@example.com".to_string())
        );
        assert_eq!(
            parse_mailbox("<jane@example.com>"),
            (None, "jane@example.com".to_string())
        );
        assert_eq!(
            parse_mailbox(" jane@example.com "),
            (None, "jane@example.com".to_string())
        );
    }

    #[test]
    fn test_parse_date_formats() {
        let rfc2822 = parse_date("Thu, 07 Nov 2024 09:30:00 +0000 (UTC)").unwrap();
        assert_eq!(rfc2822.to_rfc3339(), "2024-11-07T09:30:00+00:00");

        let rfc3339 = parse_date("2024-11-07T09:30:00Z").unwrap();
        assert_eq!(rfc2822, rfc3339);

        assert!(parse_date("yesterday").is_none());
    }

    #[test]
    fn test_message_id_accessor_trims_and_ignores_blank() {
        let mut message = EmailMessage {
            id: "1".into(),
            thread_id: "t".into(),
            headers: Headers::new(),
            plain_body: None,
            html_body: None,
            snippet: "s".into(),
            labels: vec![],
            received_at: None,
        };
        assert_eq!(message.message_id(), None);

        message.headers.insert("Message-Id", "  ");
        assert_eq!(message.message_id(), None);

        message.headers.insert("MESSAGE-ID", " <abc@mail> ");
        assert_eq!(message.message_id(), Some("<abc@mail>"));
    }

    #[test]
    fn test_body_format_flags() {
        assert_eq!(BodyFormat::from_html_flag(true).mime_type(), "text/html");
        assert_eq!(BodyFormat::from_html_flag(false).mime_type(), "text/plain");
    }
}
