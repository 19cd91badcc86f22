//! Utility functions for text cleanup, timestamps and transport retries.
//!
//! Regexes are declared with `lazy_regex!` so patterns are validated at
//! compile time and built on first use.

// lazy_regex! uses once_cell internally
#![allow(clippy::non_std_lazy_statics)]

use crate::config::{
    TRANSPORT_API_INITIAL_BACKOFF_MS, TRANSPORT_API_MAX_BACKOFF_MS, TRANSPORT_API_MAX_RETRIES,
};
use chrono::{DateTime, Datelike, TimeZone};
use lazy_regex::lazy_regex;
use std::fmt::Display;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::warn;

/// Leading group tag: `[SubsPlease] `
static RE_GROUP_TAG: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"^\[[^\]]+\]\s*");

/// Trailing tag: `[1080p]`, `[F123ABC]`
static RE_TRAILING_TAG: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"\[[^\]]+\]\s*$");

/// Trailing absolute episode number: ` - 06`
static RE_EPISODE_SUFFIX: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"\s*-\s*\d{1,3}\s*$");

/// Quality/release markers
static RE_RELEASE_INFO: lazy_regex::Lazy<regex::Regex> = lazy_regex!(
    r"(?i)\s*\(?(?:\d{3,4}p|web[- ]?dl|bluray|hdr|dv|hevc|h26[45]|atmos|ddp|aac|dts|remux|hybrid).*?\)?"
);

/// `S01E02` style markers
static RE_SEASON_EPISODE: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"(?i)S\d{1,2}E\d{1,2}");

/// Safely truncates a string to a maximum character length (not bytes).
///
/// # Examples
///
/// ```
/// use mediarelay_core::utils::truncate_str;
/// assert_eq!(truncate_str("Привет, мир!", 6), "Привет");
/// ```
pub fn truncate_str(s: impl AsRef<str>, max_chars: usize) -> String {
    let s = s.as_ref();
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.char_indices()
        .nth(max_chars)
        .map_or_else(|| s.to_string(), |(pos, _)| s[..pos].to_string())
}

/// Fit an HTML message body into `max_chars`, marking the cut.
///
/// The cut is moved back to the last line break so no tag is left open.
#[must_use]
pub fn truncate_message(text: &str, max_chars: usize) -> String {
    const MARKER: &str = "\n<i>(truncated)</i>";

    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let budget = max_chars.saturating_sub(MARKER.chars().count());
    let head = truncate_str(text, budget);
    let head = head.rfind('\n').map_or(head.as_str(), |pos| &head[..pos]);
    format!("{head}{MARKER}")
}

/// Strip release-group, quality and episode tags from a media title.
///
/// # Examples
///
/// ```
/// use mediarelay_core::utils::clean_title;
/// assert_eq!(clean_title("[SubsPlease] Frieren - 06 [1080p]"), "Frieren");
/// ```
#[must_use]
pub fn clean_title(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let cleaned = RE_GROUP_TAG.replace(raw, "");
    let cleaned = RE_TRAILING_TAG.replace(&cleaned, "");
    let cleaned = RE_EPISODE_SUFFIX.replace(&cleaned, "");
    let cleaned = RE_RELEASE_INFO.replace_all(&cleaned, "");
    cleaned.trim().to_string()
}

/// Returns `true` if the name carries an `SxxEyy` marker
#[must_use]
pub fn looks_like_episode(name: &str) -> bool {
    RE_SEASON_EPISODE.is_match(name)
}

/// English ordinal suffix for a day of month
#[must_use]
pub const fn ordinal_suffix(day: u32) -> &'static str {
    if day >= 11 && day <= 13 {
        return "th";
    }
    match day % 10 {
        1 => "st",
        2 => "nd",
        3 => "rd",
        _ => "th",
    }
}

/// Footer timestamp, e.g. `19th October 14:05`
pub fn format_timestamp<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    let suffix = ordinal_suffix(now.day());
    now.format(&format!("%d{suffix} %B %H:%M")).to_string()
}

/// Retry a transport API operation with exponential backoff.
///
/// Only errors accepted by `is_transient` are retried; anything else is
/// returned immediately. The strategy uses jitter:
/// - Initial delay: 500ms
/// - Max delay: 4s
/// - Max retries: 3 (see constants in `config.rs`)
///
/// # Errors
///
/// Returns the last error if every attempt fails.
pub async fn retry_transport_operation<F, Fut, T, E, C>(
    operation: F,
    is_transient: C,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    C: FnMut(&E) -> bool,
    E: Display,
{
    let retry_strategy = ExponentialBackoff::from_millis(2)
        .factor(TRANSPORT_API_INITIAL_BACKOFF_MS / 2)
        .max_delay(Duration::from_millis(TRANSPORT_API_MAX_BACKOFF_MS))
        .map(jitter) // Add jitter to prevent thundering herd
        .take(TRANSPORT_API_MAX_RETRIES);

    RetryIf::spawn(retry_strategy, operation, is_transient)
        .await
        .map_err(|e| {
            warn!(error = %e, "Transport API operation failed");
            e
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Europe::Stockholm;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_truncate_str_unicode() {
        let s = "Привет, мир!";
        assert_eq!(truncate_str(s, 6), "Привет");
        assert_eq!(truncate_str(s, 100), s);
    }

    #[test]
    fn test_truncate_message_cuts_at_line() {
        let text = "<b>one</b>\n<b>two</b>\n<b>three</b>";
        let out = truncate_message(text, 30);
        assert!(out.starts_with("<b>one</b>"));
        assert!(out.ends_with("<i>(truncated)</i>"));
        assert!(!out.contains("three"));
        assert_eq!(truncate_message("short", 30), "short");
    }

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("[Erai-raws] Dandadan - 12"), "Dandadan");
        assert_eq!(clean_title("Dune Part Two 2160p WEB-DL"), "Dune Part Two");
        assert_eq!(clean_title("Alien (1979) (1080p BluRay)"), "Alien (1979)");
        assert_eq!(clean_title("The Office"), "The Office");
        assert_eq!(clean_title(""), "");
    }

    #[test]
    fn test_looks_like_episode() {
        assert!(looks_like_episode("Severance.S02E03.1080p"));
        assert!(looks_like_episode("show s1e9"));
        assert!(!looks_like_episode("Heat.1995.2160p"));
    }

    #[test]
    fn test_ordinal_suffix() {
        assert_eq!(ordinal_suffix(1), "st");
        assert_eq!(ordinal_suffix(2), "nd");
        assert_eq!(ordinal_suffix(3), "rd");
        assert_eq!(ordinal_suffix(11), "th");
        assert_eq!(ordinal_suffix(12), "th");
        assert_eq!(ordinal_suffix(13), "th");
        assert_eq!(ordinal_suffix(21), "st");
        assert_eq!(ordinal_suffix(22), "nd");
        assert_eq!(ordinal_suffix(30), "th");
    }

    #[test]
    fn test_format_timestamp() {
        let Some(now) = Stockholm.with_ymd_and_hms(2026, 10, 19, 14, 5, 0).single() else {
            panic!("valid local time");
        };
        assert_eq!(format_timestamp(&now), "19th October 14:05");

        let Some(now) = Stockholm.with_ymd_and_hms(2026, 3, 2, 8, 30, 0).single() else {
            panic!("valid local time");
        };
        assert_eq!(format_timestamp(&now), "02nd March 08:30");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_on_permanent_error() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), String> = retry_transport_operation(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("forbidden".to_string()) }
            },
            |e: &String| e != "forbidden",
        )
        .await;

        assert_eq!(result, Err("forbidden".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_transient_error() {
        let calls = AtomicUsize::new(0);
        let result: Result<u32, String> = retry_transport_operation(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("timeout".to_string())
                    } else {
                        Ok(7)
                    }
                }
            },
            |_: &String| true,
        )
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
