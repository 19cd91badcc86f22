//! External service clients
//!
//! Each client wraps one HTTP API. Failures surface as [`RemoteError`]; callers
//! decide whether to back off, skip the cycle, or ignore the miss.

/// Radarr/Sonarr poster lookups
pub mod posters;
/// qBittorrent Web API
pub mod qbit;
/// Tautulli API v2
pub mod tautulli;

use crate::config::get_http_timeout_secs;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by external service clients
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Connection, timeout or body decoding failure
    #[error("{0}")]
    Http(#[from] reqwest::Error),
    /// Service answered with a non-success status
    #[error("HTTP {status} from {endpoint}")]
    Status {
        /// Path that was requested
        endpoint: String,
        /// Response status code
        status: u16,
    },
    /// Credentials were refused
    #[error("login rejected: {0}")]
    LoginRejected(String),
    /// Service reported an application-level error
    #[error("{0}")]
    Api(String),
    /// Response body did not have the expected shape
    #[error("unexpected response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Build the shared HTTP client with the outbound call timeout.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialized.
pub fn build_http_client(cookie_store: bool) -> Result<reqwest::Client, RemoteError> {
    let timeout = Duration::from_secs(get_http_timeout_secs());
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .cookie_store(cookie_store)
        .build()?)
}

/// Strip the trailing slash so paths can be appended verbatim
pub(crate) fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Numbers that may arrive as JSON strings, `null` or `""`; those become 0
pub(crate) fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(value_as_f64(&value).map_or(0, |n| n.max(0.0) as u64))
}

/// Like [`lenient_u64`] but keeps fractions
pub(crate) fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_as_f64(&value).unwrap_or(0.0))
}

/// Identifiers and labels that may arrive as numbers or strings.
///
/// Blank strings and `null` become `None`.
pub(crate) fn lenient_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Sample {
        #[serde(default, deserialize_with = "lenient_u64")]
        count: u64,
        #[serde(default, deserialize_with = "lenient_f64")]
        ratio: f64,
        #[serde(default, deserialize_with = "lenient_opt_string")]
        label: Option<String>,
    }

    #[test]
    fn test_numbers_as_strings() -> Result<(), serde_json::Error> {
        let s: Sample = serde_json::from_str(r#"{"count": "42", "ratio": "0.5", "label": 7}"#)?;
        assert_eq!(s.count, 42);
        assert!((s.ratio - 0.5).abs() < f64::EPSILON);
        assert_eq!(s.label.as_deref(), Some("7"));
        Ok(())
    }

    #[test]
    fn test_blank_and_null() -> Result<(), serde_json::Error> {
        let s: Sample = serde_json::from_str(r#"{"count": "", "ratio": null, "label": "  "}"#)?;
        assert_eq!(s.count, 0);
        assert!(s.ratio.abs() < f64::EPSILON);
        assert_eq!(s.label, None);

        let s: Sample = serde_json::from_str("{}")?;
        assert_eq!(s.count, 0);
        assert_eq!(s.label, None);
        Ok(())
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url(" http://tautulli:8181/ "), "http://tautulli:8181");
        assert_eq!(normalize_base_url("http://qbit"), "http://qbit");
    }
}
