//! Newsletter pipeline over an in-memory mailbox

mod common;

use chrono::{DateTime, Duration, TimeZone, Utc};
use common::{b64, newsletter_message, raw_from_json, FixtureProvider};
use gmail_mcp::config::NewsletterConfig;
use gmail_mcp::error::{ErrorKind, GmailError};
use gmail_mcp::newsletter::NewsletterPipeline;
use serde_json::json;
use std::sync::Arc;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
}

fn html(headline: &str) -> String {
    format!(
        "<html><head><style>p {{ color: red; }}</style></head><body>\
         <header>Daily Brief</header>\
         <h1>{}</h1><p>Read the <a href=\"https://example.com/story\">full story</a>.</p>\
         <div class=\"footer\">Unsubscribe from this list</div>\
         </body></html>",
        headline
    )
}

fn pipeline(provider: FixtureProvider) -> NewsletterPipeline {
    NewsletterPipeline::new(Arc::new(provider), NewsletterConfig::default())
}

#[tokio::test]
async fn test_thirty_six_hour_window_across_five_senders() {
    let now = now();
    let messages = vec![
        // Inside the window
        newsletter_message("m1", "Ben's Bites <hello@bensbites.beehiiv.com>", "Ben 1", now - Duration::hours(2), &html("AI agents")),
        newsletter_message("m2", "The Neuron <newsletter@theneurondaily.com>", "Neuron 1", now - Duration::hours(5), &html("Chips")),
        newsletter_message("m3", "hello@bensbites.beehiiv.com", "Ben 2", now - Duration::hours(20), &html("Robots")),
        newsletter_message("m4", "The Rundown AI <team@rundown.ai>", "Rundown 1", now - Duration::hours(30), &html("Models")),
        newsletter_message("m5", "Last Week in AI <hello@lastweekin.ai>", "LWiAI 1", now - Duration::hours(35), &html("Weekly")),
        // Outside the window but inside the widened server-side bound
        newsletter_message("m6", "AlphaSignal <newsletter@alphasignal.ai>", "Alpha 1", now - Duration::hours(37), &html("Old")),
        newsletter_message("m7", "The Neuron <newsletter@theneurondaily.com>", "Neuron 0", now - Duration::hours(40), &html("Older")),
        newsletter_message("m8", "The Rundown AI <team@rundown.ai>", "Rundown 0", now - Duration::hours(60), &html("Oldest")),
    ];
    let provider = FixtureProvider::new(messages);
    let pipeline = pipeline(provider);

    let digest = pipeline.fetch_at(now, 36, &[]).await.unwrap();

    assert_eq!(digest.total_emails, 5);
    assert_eq!(digest.hours_back, 36);
    assert_eq!(digest.date_range, "2024-03-09 to 2024-03-10");
    assert!(digest.skipped.is_empty());

    let senders: Vec<_> = digest.newsletters_by_sender.keys().cloned().collect();
    assert_eq!(
        senders,
        vec![
            "hello@bensbites.beehiiv.com",
            "hello@lastweekin.ai",
            "newsletter@theneurondaily.com",
            "team@rundown.ai",
        ]
    );

    // Retrieval order (newest first) within a sender
    let bens = &digest.newsletters_by_sender["hello@bensbites.beehiiv.com"];
    let subjects: Vec<_> = bens.iter().map(|e| e.subject.as_str()).collect();
    assert_eq!(subjects, vec!["Ben 1", "Ben 2"]);

    // Bare address falls back to the configured name
    assert_eq!(bens[0].display_name, "Ben's Bites");
    assert_eq!(bens[1].display_name, "Ben's Bites");
    assert_eq!(bens[0].timestamp, now - Duration::hours(2));
}

#[tokio::test]
async fn test_content_is_cleaned() {
    let now = now();
    let provider = FixtureProvider::new(vec![newsletter_message(
        "m1",
        "The Neuron <newsletter@theneurondaily.com>",
        "Neuron",
        now - Duration::hours(1),
        &html("Chips are back"),
    )]);

    let digest = pipeline(provider).fetch_at(now, 24, &[]).await.unwrap();
    let entry = &digest.newsletters_by_sender["newsletter@theneurondaily.com"][0];

    assert!(entry.content.contains("Chips are back"));
    assert!(entry.content.contains("[full story](https://example.com/story)"));
    assert!(!entry.content.contains("color: red"));
    assert!(!entry.content.contains("Daily Brief"));
    assert!(!entry.content.contains("Unsubscribe"));
    assert_eq!(entry.message_id, "m1");
}

#[tokio::test]
async fn test_window_boundary_is_inclusive() {
    let now = now();
    let cutoff = now - Duration::hours(6);
    let provider = FixtureProvider::new(vec![
        newsletter_message("at", "news@example.com", "At cutoff", cutoff, &html("a")),
        newsletter_message("before", "news@example.com", "Just before", cutoff - Duration::seconds(1), &html("b")),
        newsletter_message("after", "news@example.com", "Just after", cutoff + Duration::seconds(1), &html("c")),
    ]);

    let digest = pipeline(provider)
        .fetch_at(now, 6, &["news@example.com".to_string()])
        .await
        .unwrap();

    let subjects: Vec<_> = digest.newsletters_by_sender["news@example.com"]
        .iter()
        .map(|e| e.subject.as_str())
        .collect();
    assert_eq!(subjects, vec!["At cutoff", "Just after"]);
}

#[tokio::test]
async fn test_query_uses_given_senders_or_defaults() {
    let now = now();

    let provider = Arc::new(FixtureProvider::new(vec![]));
    let pipeline = NewsletterPipeline::new(provider.clone(), NewsletterConfig::default());

    pipeline
        .fetch_at(now, 36, &["a@example.com".to_string(), "b@example.com".to_string()])
        .await
        .unwrap();
    pipeline.fetch_at(now, 36, &[]).await.unwrap();

    let queries = provider.queries.lock().unwrap().clone();
    assert_eq!(queries[0], "from:(a@example.com OR b@example.com) after:2024/03/07");
    assert!(queries[1].starts_with("from:(hello@bensbites.beehiiv.com OR "));
    assert_eq!(queries[1].matches(" OR ").count(), 4);
}

#[tokio::test]
async fn test_named_senders_query_by_bare_address() {
    let provider = Arc::new(FixtureProvider::new(vec![]));
    let pipeline = NewsletterPipeline::new(provider.clone(), NewsletterConfig::default());

    pipeline
        .fetch_at(now(), 12, &["Jane Doe <jane@example.com>".to_string()])
        .await
        .unwrap();

    let queries = provider.queries.lock().unwrap().clone();
    assert_eq!(queries, vec!["from:(jane@example.com) after:2024/03/08"]);
}

#[tokio::test]
async fn test_no_matches_is_empty_digest() {
    let digest = pipeline(FixtureProvider::new(vec![]))
        .fetch_at(now(), 36, &[])
        .await
        .unwrap();

    assert!(digest.is_empty());
    assert!(digest.newsletters_by_sender.is_empty());
}

#[tokio::test]
async fn test_vanished_and_corrupt_messages_are_skipped() {
    let now = now();
    let corrupt = raw_from_json(json!({
        "id": "corrupt",
        "threadId": "t",
        "internalDate": (now - Duration::hours(1)).timestamp_millis().to_string(),
        "payload": {
            "mimeType": "text/html",
            "headers": [{"name": "From", "value": "news@example.com"}],
            "body": {"size": 4, "data": "!!not base64!!"}
        }
    }));
    let provider = FixtureProvider::new(vec![
        newsletter_message("gone", "news@example.com", "Gone", now - Duration::hours(1), &html("x")),
        corrupt,
        newsletter_message("ok", "news@example.com", "Kept", now - Duration::hours(2), &html("y")),
    ])
    .with_vanished("gone");

    let digest = pipeline(provider)
        .fetch_at(now, 12, &["news@example.com".to_string()])
        .await
        .unwrap();

    assert_eq!(digest.total_emails, 1);
    let skipped: Vec<_> = digest.skipped.iter().map(|s| s.message_id.as_str()).collect();
    assert_eq!(skipped, vec!["gone", "corrupt"]);
}

#[tokio::test]
async fn test_exhausted_rate_limit_aborts_fetch() {
    let now = now();
    let provider = FixtureProvider::new(vec![newsletter_message(
        "m1",
        "news@example.com",
        "Subject",
        now - Duration::hours(1),
        &html("x"),
    )])
    .failing_with(|| GmailError::RateLimitExceeded {
        operation: "get message".to_string(),
        retry_after: 30,
    });

    let err = pipeline(provider).fetch_at(now, 12, &[]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RateLimit);
}

#[tokio::test]
async fn test_display_name_falls_back_to_domain() {
    let now = now();
    let provider = FixtureProvider::new(vec![newsletter_message(
        "m1",
        "digest@mail.substack.com",
        "Weekly",
        now - Duration::hours(1),
        &html("x"),
    )]);

    let digest = pipeline(provider)
        .fetch_at(now, 12, &["digest@mail.substack.com".to_string()])
        .await
        .unwrap();
    assert_eq!(
        digest.newsletters_by_sender["digest@mail.substack.com"][0].display_name,
        "Substack"
    );
}

#[tokio::test]
async fn test_plain_body_used_when_html_missing() {
    let now = now();
    let raw = raw_from_json(json!({
        "id": "plain",
        "threadId": "t",
        "internalDate": (now - Duration::hours(1)).timestamp_millis().to_string(),
        "payload": {
            "mimeType": "text/plain",
            "headers": [{"name": "From", "value": "News <news@example.com>"}, {"name": "Subject", "value": "Plain"}],
            "body": {"size": 20, "data": b64("Line one\n\n\n\nLine two")}
        }
    }));

    let digest = pipeline(FixtureProvider::new(vec![raw]))
        .fetch_at(now, 12, &["news@example.com".to_string()])
        .await
        .unwrap();
    let entry = &digest.newsletters_by_sender["news@example.com"][0];
    assert_eq!(entry.display_name, "News");
    assert_eq!(entry.content, "Line one\n\nLine two");
}
