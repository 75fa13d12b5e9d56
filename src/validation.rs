//! Local parameter validation for tool operations.
//!
//! Every check here runs before any network call and fails with
//! [`GmailError::Validation`], naming the offending parameter.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{GmailError, Result};

pub const MAX_RESULTS_LIMIT: u32 = 500;
pub const MAX_HOURS_BACK: u32 = 8760;
pub const MAX_QUERY_LENGTH: usize = 500;
pub const MAX_SUBJECT_LENGTH: usize = 998;
pub const MAX_BODY_LENGTH: usize = 5_000_000;

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap()
});

static MESSAGE_ID_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9]+$").unwrap());

/// Characters Gmail search syntax never needs
static QUERY_DISALLOWED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[^\p{L}\p{N}\s@.\-_:/'"(){}\[\]]"#).unwrap());

/// Validate an address, bare (`user@example.com`) or in mailbox form
/// (`Jane Doe <user@example.com>`).
pub fn validate_email(email: &str) -> Result<()> {
    let trimmed = email.trim();
    if trimmed.is_empty() {
        return Err(GmailError::validation("to", "email address cannot be empty"));
    }

    let address = crate::models::extract_address(trimmed);
    if !EMAIL_PATTERN.is_match(&address) {
        return Err(GmailError::validation(
            "to",
            format!("invalid email format: {}", trimmed),
        ));
    }
    Ok(())
}

/// Validate one or more comma-separated recipients
pub fn validate_recipients(recipients: &str) -> Result<()> {
    let mut count = 0;
    for recipient in recipients.split(',').map(str::trim).filter(|r| !r.is_empty()) {
        validate_email(recipient)?;
        count += 1;
    }
    if count == 0 {
        return Err(GmailError::validation("to", "at least one recipient is required"));
    }
    Ok(())
}

pub fn validate_message_id(message_id: &str) -> Result<()> {
    let trimmed = message_id.trim();
    if trimmed.is_empty() {
        return Err(GmailError::validation("message_id", "message id cannot be empty"));
    }
    if !MESSAGE_ID_PATTERN.is_match(trimmed) {
        return Err(GmailError::validation(
            "message_id",
            format!("invalid message id format: {}", trimmed),
        ));
    }
    if !(10..=30).contains(&trimmed.len()) {
        return Err(GmailError::validation(
            "message_id",
            format!("message id has invalid length: {}", trimmed),
        ));
    }
    Ok(())
}

/// Result counts outside 1..=500 are rejected, never clamped
pub fn validate_max_results(max_results: u32) -> Result<()> {
    if max_results == 0 {
        return Err(GmailError::validation(
            "max_results",
            "max_results must be positive, got 0",
        ));
    }
    if max_results > MAX_RESULTS_LIMIT {
        return Err(GmailError::validation(
            "max_results",
            format!(
                "max_results too large: {} (max: {})",
                max_results, MAX_RESULTS_LIMIT
            ),
        ));
    }
    Ok(())
}

pub fn validate_hours_back(hours: u32) -> Result<()> {
    if hours == 0 {
        return Err(GmailError::validation("hours_back", "hours must be positive, got 0"));
    }
    if hours > MAX_HOURS_BACK {
        return Err(GmailError::validation(
            "hours_back",
            format!("hours too large: {} (max: {})", hours, MAX_HOURS_BACK),
        ));
    }
    Ok(())
}

pub fn validate_subject(subject: &str) -> Result<()> {
    if subject.trim().is_empty() {
        return Err(GmailError::validation("subject", "subject cannot be empty"));
    }
    let length = subject.chars().count();
    if length > MAX_SUBJECT_LENGTH {
        return Err(GmailError::validation(
            "subject",
            format!("subject too long: {} chars (max: {})", length, MAX_SUBJECT_LENGTH),
        ));
    }
    Ok(())
}

pub fn validate_body(body: &str) -> Result<()> {
    if body.trim().is_empty() {
        return Err(GmailError::validation("body", "body cannot be empty"));
    }
    let length = body.chars().count();
    if length > MAX_BODY_LENGTH {
        return Err(GmailError::validation(
            "body",
            format!("body too long: {} chars (max: {})", length, MAX_BODY_LENGTH),
        ));
    }
    Ok(())
}

/// Validate a `YYYY/MM/DD` date as used by Gmail's `after:`/`before:` operators
pub fn validate_date_string(date: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(date.trim(), "%Y/%m/%d").map_err(|_| {
        GmailError::validation(
            "date",
            format!("invalid date format: {}. Expected format: YYYY/MM/DD", date),
        )
    })
}

/// Trim a search query, reject overly long ones, and strip characters
/// outside the Gmail search alphabet.
pub fn sanitize_query(query: &str) -> Result<String> {
    let trimmed = query.trim();
    let length = trimmed.chars().count();
    if length > MAX_QUERY_LENGTH {
        return Err(GmailError::validation(
            "query",
            format!("query too long: {} chars (max: {})", length, MAX_QUERY_LENGTH),
        ));
    }
    Ok(QUERY_DISALLOWED.replace_all(trimmed, "").into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_validate_email() {
        assert!(validate_email("user@example.com").is_ok());
        assert!(validate_email("  first.last+tag@sub.example.co.uk ").is_ok());
        assert!(validate_email("Jane Doe <jane@example.com>").is_ok());

        assert!(validate_email("").is_err());
        assert!(validate_email("invalid-email").is_err());
        assert!(validate_email("user@localhost").is_err());
        assert!(validate_email("Jane <not an address>").is_err());
    }

    #[test]
    fn test_validate_recipients() {
        assert!(validate_recipients("a@example.com, Bob <b@example.com>").is_ok());
        assert!(validate_recipients(" , ").is_err());
        assert!(validate_recipients("a@example.com, broken").is_err());
    }

    #[test]
    fn test_validate_message_id() {
        assert!(validate_message_id("18c2f4a9b1d3e5f7").is_ok());
        assert!(validate_message_id("abc").is_err());
        assert!(validate_message_id("18c2f4a9-b1d3e5f7").is_err());
        assert!(validate_message_id(&"a".repeat(31)).is_err());
        assert!(validate_message_id("").is_err());
    }

    #[test]
    fn test_validate_max_results_rejects_instead_of_clamping() {
        assert!(validate_max_results(1).is_ok());
        assert!(validate_max_results(500).is_ok());

        let err = validate_max_results(0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = validate_max_results(501).unwrap_err();
        assert!(err.to_string().contains("max_results too large: 501"));
    }

    #[test]
    fn test_validate_hours_back() {
        assert!(validate_hours_back(1).is_ok());
        assert!(validate_hours_back(8760).is_ok());
        assert!(validate_hours_back(0).is_err());
        assert!(validate_hours_back(8761).is_err());
    }

    #[test]
    fn test_validate_subject_and_body() {
        assert!(validate_subject("Hello").is_ok());
        assert!(validate_subject("   ").is_err());
        assert!(validate_subject(&"x".repeat(999)).is_err());

        assert!(validate_body("Hi there").is_ok());
        assert!(validate_body("\n\t ").is_err());
    }

    #[test]
    fn test_validate_date_string() {
        let date = validate_date_string("2024/11/07").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 11, 7).unwrap());
        assert!(validate_date_string("11-07-2024").is_err());
    }

    #[test]
    fn test_sanitize_query() {
        assert_eq!(
            sanitize_query("  from:(a@b.com OR c@d.com) after:2024/11/05 ").unwrap(),
            "from:(a@b.com OR c@d.com) after:2024/11/05"
        );
        assert_eq!(sanitize_query("is:unread; rm -rf").unwrap(), "is:unread rm -rf");
        assert_eq!(sanitize_query("subject:café").unwrap(), "subject:café");
        assert!(sanitize_query(&"a".repeat(501)).is_err());
    }
}
