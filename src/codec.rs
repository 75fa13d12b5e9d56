//! Message codec: provider MIME trees in, RFC 5322 transport documents out.
//!
//! Incoming messages arrive as a nested part tree with base64url bodies.
//! [`decode`] converts that tree into [`MimePart`] and walks it depth-first,
//! keeping the first `text/plain` and the first `text/html` leaf. Outgoing
//! messages are rendered by [`encode`] as a single-part document and the
//! whole document is base64url-encoded for the provider's `raw` field.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use encoding_rs::Encoding;
use tracing::warn;

use crate::api::{MessagePart, RawMessage};
use crate::error::{GmailError, Result};
use crate::html::decode_html_entities;
use crate::models::{
    parse_date, BodyFormat, EmailMessage, EmailSummary, Headers, OutgoingMessage,
};

/// Shown when a message has no body and the provider sent no snippet
pub const EMPTY_MESSAGE_PLACEHOLDER: &str = "(no content)";

/// Encoded words may not exceed 75 characters; 45 input bytes encode to 60
const ENCODED_WORD_CHUNK_BYTES: usize = 45;
const BODY_LINE_LENGTH: usize = 76;

/// A node of the MIME tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MimePart {
    Leaf {
        part_id: Option<String>,
        content_type: String,
        filename: Option<String>,
        /// Declared `charset` parameter, if any
        charset: Option<String>,
        /// Still base64url-encoded
        payload: Option<String>,
    },
    Multipart {
        content_type: String,
        children: Vec<MimePart>,
    },
}

impl MimePart {
    pub fn from_wire(part: &MessagePart) -> Self {
        let content_type = part.mime_type.clone();
        if !part.parts.is_empty() || essence(&content_type).starts_with("multipart/") {
            MimePart::Multipart {
                content_type,
                children: part.parts.iter().map(MimePart::from_wire).collect(),
            }
        } else {
            // Gmail's mimeType drops parameters; the part header keeps them
            let charset = part
                .header("Content-Type")
                .and_then(charset_param)
                .or_else(|| charset_param(&content_type));
            MimePart::Leaf {
                part_id: part.part_id.clone(),
                content_type,
                filename: part.filename.clone().filter(|f| !f.is_empty()),
                charset,
                payload: part.body.as_ref().and_then(|b| b.data.clone()),
            }
        }
    }

    pub fn content_type(&self) -> &str {
        match self {
            MimePart::Leaf { content_type, .. } | MimePart::Multipart { content_type, .. } => {
                content_type
            }
        }
    }

    /// Visit every node depth-first, parents before children, stopping at
    /// the first error.
    pub fn walk<F>(&self, visit: &mut F) -> Result<()>
    where
        F: FnMut(&MimePart) -> Result<()>,
    {
        visit(self)?;
        if let MimePart::Multipart { children, .. } = self {
            for child in children {
                child.walk(visit)?;
            }
        }
        Ok(())
    }
}

/// Lowercased media type without parameters
fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

fn charset_param(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_string())
            .filter(|v| !v.is_empty())
    })
}

/// Decode base64url data, tolerating missing or extra padding, embedded
/// line breaks and the standard alphabet.
pub fn decode_base64url(data: &str) -> Result<Vec<u8>> {
    let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let engines = [&URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD, &STANDARD_NO_PAD];

    for engine in engines {
        if let Ok(decoded) = engine.decode(&compact) {
            return Ok(decoded);
        }
    }
    // Over-padded input: strip and retry the padding-free engines
    let unpadded = compact.trim_end_matches('=');
    for engine in [&URL_SAFE_NO_PAD, &STANDARD_NO_PAD] {
        if let Ok(decoded) = engine.decode(unpadded) {
            return Ok(decoded);
        }
    }

    Err(GmailError::validation("payload", "body is not valid base64url"))
}

/// Base64url-decode a text part and convert it from its declared charset.
/// Missing or unknown charsets are read as UTF-8 with replacement.
fn decode_text(data: &str, charset: Option<&str>) -> Result<String> {
    let bytes = decode_base64url(data)?;
    let encoding = charset.and_then(|label| {
        let encoding = Encoding::for_label_no_replacement(label.as_bytes());
        if encoding.is_none() {
            warn!("Unknown charset {:?}, decoding as UTF-8", label);
        }
        encoding
    });

    Ok(match encoding {
        Some(encoding) => encoding.decode_with_bom_removal(&bytes).0.into_owned(),
        None => String::from_utf8_lossy(&bytes).into_owned(),
    })
}

/// Decode one provider message.
///
/// A corrupt body payload fails this message only, with a `Validation`
/// error naming the message and part.
pub fn decode(raw: &RawMessage) -> Result<EmailMessage> {
    let mut headers = Headers::new();
    let mut plain_body = None;
    let mut html_body = None;

    if let Some(payload) = &raw.payload {
        for header in &payload.headers {
            headers.insert(header.name.clone(), header.value.clone());
        }

        let tree = MimePart::from_wire(payload);
        tree.walk(&mut |part| {
            let MimePart::Leaf {
                part_id,
                content_type,
                filename,
                charset,
                payload,
            } = part
            else {
                return Ok(());
            };
            // Attachments never populate the body
            if filename.is_some() {
                return Ok(());
            }
            let Some(data) = payload.as_deref().filter(|d| !d.is_empty()) else {
                return Ok(());
            };

            let slot = match essence(content_type).as_str() {
                "text/plain" if plain_body.is_none() => &mut plain_body,
                "text/html" if html_body.is_none() => &mut html_body,
                _ => return Ok(()),
            };
            let text = decode_text(data, charset.as_deref()).map_err(|_| {
                GmailError::validation(
                    "payload",
                    format!(
                        "message {} part {} is not valid base64url",
                        raw.id,
                        part_id.as_deref().unwrap_or("?")
                    ),
                )
            })?;
            *slot = Some(text);
            Ok(())
        })?;
    }

    let mut snippet = decode_html_entities(&raw.snippet);
    if plain_body.is_none() && html_body.is_none() && snippet.trim().is_empty() {
        snippet = EMPTY_MESSAGE_PLACEHOLDER.to_string();
    }

    let received_at = raw
        .internal_date
        .or_else(|| headers.get("Date").and_then(parse_date));

    Ok(EmailMessage {
        id: raw.id.clone(),
        thread_id: raw.thread_id.clone(),
        headers,
        plain_body,
        html_body,
        snippet,
        labels: raw.label_ids.clone(),
        received_at,
    })
}

/// Decode each message independently; one failure never aborts the rest
pub fn decode_batch(raws: &[RawMessage]) -> Vec<Result<EmailMessage>> {
    raws.iter()
        .map(|raw| {
            let decoded = decode(raw);
            if let Err(e) = &decoded {
                warn!("Skipping body of message {}: {}", raw.id, e);
            }
            decoded
        })
        .collect()
}

/// Header-only summary; never touches body payloads
pub fn summarize(raw: &RawMessage) -> EmailSummary {
    let header = |name: &str| raw.header(name).unwrap_or("").to_string();
    let date = header("Date");
    let received_at = raw.internal_date.or_else(|| parse_date(&date));

    EmailSummary {
        id: raw.id.clone(),
        thread_id: raw.thread_id.clone(),
        from: header("From"),
        to: header("To"),
        subject: header("Subject"),
        date,
        snippet: decode_html_entities(&raw.snippet),
        labels: raw.label_ids.clone(),
        unread: raw.label_ids.iter().any(|l| l == "UNREAD"),
        received_at,
    }
}

fn reject_line_breaks(parameter: &str, value: &str) -> Result<()> {
    if value.contains('\r') || value.contains('\n') {
        return Err(GmailError::validation(
            parameter,
            "header values cannot contain line breaks",
        ));
    }
    Ok(())
}

/// Encode an outgoing message as a base64url RFC 5322 document.
///
/// Empty recipient, subject or body is rejected before anything is built.
pub fn encode(message: &OutgoingMessage) -> Result<String> {
    if message.to.trim().is_empty() {
        return Err(GmailError::validation("to", "recipient cannot be empty"));
    }
    if message.subject.trim().is_empty() {
        return Err(GmailError::validation("subject", "subject cannot be empty"));
    }
    if message.body.trim().is_empty() {
        return Err(GmailError::validation("body", "body cannot be empty"));
    }
    reject_line_breaks("to", &message.to)?;
    reject_line_breaks("subject", &message.subject)?;

    let mut document = String::new();
    push_header(&mut document, "To", &encode_address_list(&message.to));
    push_header(&mut document, "Subject", &encode_header_value(message.subject.trim()));

    if let Some(threading) = &message.threading {
        reject_line_breaks("in_reply_to", &threading.in_reply_to)?;
        push_header(&mut document, "In-Reply-To", &threading.in_reply_to);
        if !threading.references.is_empty() {
            let references = threading.references.join(" ");
            reject_line_breaks("references", &references)?;
            push_header(&mut document, "References", &references);
        }
    }

    push_header(&mut document, "MIME-Version", "1.0");
    push_header(
        &mut document,
        "Content-Type",
        &format!("{}; charset=\"UTF-8\"", message.format.mime_type()),
    );
    push_header(&mut document, "Content-Transfer-Encoding", "base64");
    document.push_str("\r\n");

    let encoded_body = STANDARD.encode(message.body.as_bytes());
    for line in encoded_body.as_bytes().chunks(BODY_LINE_LENGTH) {
        // base64 output is ASCII
        document.push_str(std::str::from_utf8(line).unwrap_or_default());
        document.push_str("\r\n");
    }

    Ok(URL_SAFE_NO_PAD.encode(document.as_bytes()))
}

fn push_header(document: &mut String, name: &str, value: &str) {
    document.push_str(name);
    document.push_str(": ");
    document.push_str(value);
    document.push_str("\r\n");
}

/// RFC 2047 `B` encoding for non-ASCII values, split into encoded words
/// on character boundaries and folded onto continuation lines.
pub fn encode_header_value(value: &str) -> String {
    if value.is_ascii() {
        return value.to_string();
    }

    let mut words = Vec::new();
    let mut chunk = String::new();
    for ch in value.chars() {
        if chunk.len() + ch.len_utf8() > ENCODED_WORD_CHUNK_BYTES {
            words.push(format!("=?UTF-8?B?{}?=", STANDARD.encode(chunk.as_bytes())));
            chunk.clear();
        }
        chunk.push(ch);
    }
    if !chunk.is_empty() {
        words.push(format!("=?UTF-8?B?{}?=", STANDARD.encode(chunk.as_bytes())));
    }
    words.join("\r\n ")
}

/// Encode display names of a comma-separated recipient list; addresses
/// themselves must stay ASCII.
fn encode_address_list(recipients: &str) -> String {
    recipients
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(|recipient| {
            if recipient.is_ascii() {
                return recipient.to_string();
            }
            match crate::models::parse_mailbox(recipient) {
                (Some(name), address) => format!("{} <{}>", encode_header_value(&name), address),
                (None, address) => address,
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// A transport document decoded back into its parts
#[derive(Debug, Clone)]
pub struct TransportDocument {
    pub headers: Headers,
    pub body: String,
    pub format: BodyFormat,
}

/// Decode a base64url transport document, the inverse of [`encode`]
pub fn parse_transport_document(raw: &str) -> Result<TransportDocument> {
    let bytes = decode_base64url(raw)?;
    let parsed = mailparse::parse_mail(&bytes)
        .map_err(|e| GmailError::validation("raw", format!("not an RFC 5322 document: {}", e)))?;

    // get_value unfolds continuation lines and decodes RFC 2047 words
    let headers: Headers = parsed
        .headers
        .iter()
        .map(|h| (h.get_key(), h.get_value()))
        .collect();

    let format = if parsed.ctype.mimetype.eq_ignore_ascii_case("text/html") {
        BodyFormat::Html
    } else {
        BodyFormat::Plain
    };

    let body = parsed
        .get_body()
        .map_err(|e| GmailError::validation("raw", format!("unreadable body: {}", e)))?;

    Ok(TransportDocument {
        headers,
        body,
        format,
    })
}
