use serde::Serialize;
use thiserror::Error;

/// Type alias for Result with GmailError
pub type Result<T> = std::result::Result<T, GmailError>;

/// Error types for the Gmail tool surface
#[derive(Error, Debug)]
pub enum GmailError {
    /// No usable credential: missing, corrupt, or rejected by the token endpoint
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// A parameter or message failed local validation. Never retried.
    #[error("Invalid {parameter}: {message}")]
    Validation { parameter: String, message: String },

    /// The provider rejected or failed a request
    #[error("{operation} failed (HTTP {status}): {message}")]
    ProviderError {
        operation: String,
        status: u16,
        message: String,
    },

    /// Quota or rate limit hit - should retry after specified seconds
    #[error("{operation} rate limited, retry after {retry_after} seconds")]
    RateLimitExceeded { operation: String, retry_after: u64 },

    /// Resource not found (404)
    #[error("{operation}: {resource} not found")]
    NotFound { operation: String, resource: String },

    /// Network-related error (timeouts, resets, unreadable responses)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The connection was never established, so the request was not sent
    #[error("Connection failed: {0}")]
    ConnectError(String),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Coarse error classification exposed to tool callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Authentication,
    Validation,
    Provider,
    RateLimit,
    NotFound,
    Internal,
}

impl GmailError {
    pub fn validation(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        GmailError::Validation {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    pub fn not_found(operation: impl Into<String>, resource: impl Into<String>) -> Self {
        GmailError::NotFound {
            operation: operation.into(),
            resource: resource.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GmailError::AuthError(_) => ErrorKind::Authentication,
            GmailError::Validation { .. } => ErrorKind::Validation,
            GmailError::ProviderError { .. }
            | GmailError::NetworkError(_)
            | GmailError::ConnectError(_) => ErrorKind::Provider,
            GmailError::RateLimitExceeded { .. } => ErrorKind::RateLimit,
            GmailError::NotFound { .. } => ErrorKind::NotFound,
            GmailError::IoError(_)
            | GmailError::SerializationError(_)
            | GmailError::ConfigError(_) => ErrorKind::Internal,
        }
    }

    /// Check if the error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            GmailError::RateLimitExceeded { .. }
            | GmailError::NetworkError(_)
            | GmailError::ConnectError(_) => true,
            GmailError::ProviderError { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Transient failures where the provider certainly did not act on the
    /// request. A 5xx or a timeout may arrive after a send was accepted.
    pub fn is_safe_to_resend(&self) -> bool {
        matches!(
            self,
            GmailError::RateLimitExceeded { .. } | GmailError::ConnectError(_)
        )
    }

    /// Check if the error is permanent and should not be retried
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Map a non-success HTTP response onto an error variant.
    ///
    /// `body` is the raw response text; Gmail puts the reason for 403s in
    /// `error.errors[].reason`, which is how quota exhaustion is told apart
    /// from a permission problem.
    pub fn from_status(
        operation: &str,
        status: u16,
        retry_after: Option<&str>,
        body: &str,
    ) -> Self {
        let message = provider_message(body).unwrap_or_else(|| format!("HTTP {}", status));

        match status {
            429 => GmailError::RateLimitExceeded {
                operation: operation.to_string(),
                retry_after: parse_retry_after(retry_after),
            },
            403 if is_rate_limit_reason(body) => GmailError::RateLimitExceeded {
                operation: operation.to_string(),
                retry_after: parse_retry_after(retry_after),
            },
            404 => GmailError::not_found(operation, message),
            401 => GmailError::AuthError(format!("{} rejected the access token: {}", operation, message)),
            _ => GmailError::ProviderError {
                operation: operation.to_string(),
                status,
                message,
            },
        }
    }
}

impl From<reqwest::Error> for GmailError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            return GmailError::ProviderError {
                operation: "decode response".to_string(),
                status: error.status().map(|s| s.as_u16()).unwrap_or(200),
                message: error.to_string(),
            };
        }
        if error.is_connect() {
            return GmailError::ConnectError(error.to_string());
        }
        GmailError::NetworkError(error.to_string())
    }
}

/// Structured failure returned by every tool operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolError {
    pub kind: ErrorKind,
    pub operation: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ToolError {
    pub fn from_error(operation: &str, error: &GmailError) -> Self {
        let (parameter, status, retry_after) = match error {
            GmailError::Validation { parameter, .. } => (Some(parameter.clone()), None, None),
            GmailError::ProviderError { status, .. } => (None, Some(*status), None),
            GmailError::RateLimitExceeded { retry_after, .. } => {
                (None, Some(429), Some(*retry_after))
            }
            GmailError::NotFound { .. } => (None, Some(404), None),
            _ => (None, None, None),
        };

        Self {
            kind: error.kind(),
            operation: operation.to_string(),
            message: error.to_string(),
            parameter,
            status,
            retry_after,
        }
    }
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:?}): {}", self.operation, self.kind, self.message)
    }
}

impl std::error::Error for ToolError {}

const DEFAULT_RETRY_AFTER: u64 = 5;

/// Parse a Retry-After header value.
///
/// The header carries either delay-seconds ("120") or an HTTP-date
/// ("Wed, 21 Oct 2015 07:28:00 GMT"). Missing, invalid, or past values
/// fall back to 5 seconds.
pub fn parse_retry_after(value: Option<&str>) -> u64 {
    let Some(value) = value.map(str::trim) else {
        return DEFAULT_RETRY_AFTER;
    };

    if let Ok(seconds) = value.parse::<u64>() {
        return seconds;
    }

    if let Ok(date) = chrono::DateTime::parse_from_rfc2822(value) {
        let delta = date.with_timezone(&chrono::Utc) - chrono::Utc::now();
        if delta.num_seconds() > 0 {
            return delta.num_seconds() as u64;
        }
    }

    DEFAULT_RETRY_AFTER
}

pub(crate) fn provider_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let error = value.get("error")?;
    // Gmail REST: {"error": {"message": ...}}; OAuth endpoint: {"error": "...", "error_description": ...}
    if let Some(message) = error.get("message").and_then(|m| m.as_str()) {
        return Some(message.to_string());
    }
    let code = error.as_str()?;
    match value.get("error_description").and_then(|d| d.as_str()) {
        Some(description) => Some(format!("{}: {}", code, description)),
        None => Some(code.to_string()),
    }
}

fn is_rate_limit_reason(body: &str) -> bool {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return false;
    };
    value
        .pointer("/error/errors")
        .and_then(|errors| errors.as_array())
        .map(|errors| {
            errors.iter().any(|e| {
                matches!(
                    e.get("reason").and_then(|r| r.as_str()),
                    Some("rateLimitExceeded") | Some("userRateLimitExceeded")
                )
            })
        })
        .unwrap_or(false)
}
