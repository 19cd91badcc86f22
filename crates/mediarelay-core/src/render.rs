//! Summary renderers
//!
//! Pure functions from fetched data to Telegram HTML. The current time is an
//! argument so output is deterministic in tests.

use crate::config::{DOWNLOADS_MAX_TORRENTS, MAX_MESSAGE_CHARS, STATS_ROWS, STREAMS_MAX_SESSIONS};
use crate::sources::qbit::Torrent;
use crate::sources::tautulli::{LibraryCounts, StatRow, StreamSession};
use crate::utils::{format_timestamp, truncate_message, truncate_str};
use chrono::{DateTime, TimeDelta};
use chrono_tz::Tz;
use html_escape::{encode_double_quoted_attribute, encode_text};
use std::fmt::Write;

const SUMMARY_MAX_CHARS: usize = 300;
/// qBittorrent reports this ETA when it cannot estimate one
const QBIT_ETA_UNKNOWN: u64 = 8_640_000;

/// Rendered message body for one slot
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageContent {
    /// Telegram HTML body
    pub text: String,
    /// URL shown as the link preview, if any
    pub preview_url: Option<String>,
}

impl MessageContent {
    fn finish(text: String, preview_url: Option<String>) -> Self {
        Self {
            text: truncate_message(&text, MAX_MESSAGE_CHARS),
            preview_url,
        }
    }
}

/// A session with its resolved poster
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionView {
    /// Session data
    pub session: StreamSession,
    /// Poster URL
    pub poster: Option<String>,
}

/// A torrent with its resolved poster
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TorrentView {
    /// Torrent data
    pub torrent: Torrent,
    /// Poster URL
    pub poster: Option<String>,
}

/// Home statistics shown in the daily summary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopStats {
    /// Top users over 30 days
    pub users_30d: Vec<StatRow>,
    /// Top users over 365 days
    pub users_365d: Vec<StatRow>,
    /// Top movies over 30 days
    pub movies_30d: Vec<StatRow>,
    /// Top shows over 30 days
    pub tv_30d: Vec<StatRow>,
}

/// What the downloads poller observed
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadsReport {
    /// qBittorrent is degraded; carries its status text
    Unavailable(String),
    /// Torrents currently downloading
    Active(Vec<TorrentView>),
}

/// Chat titles for the library channels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryTitles {
    /// Movies channel title
    pub movies: String,
    /// TV shows channel title
    pub tv_shows: String,
    /// Users channel title
    pub users: String,
}

impl From<&LibraryCounts> for LibraryTitles {
    fn from(counts: &LibraryCounts) -> Self {
        Self {
            movies: format!("🎬 Movies: {}", counts.movies),
            tv_shows: format!("📺 TV Shows: {}", counts.shows),
            users: format!("👤 Users: {}", counts.users),
        }
    }
}

fn capitalize(s: &str) -> String {
    let lower = s.to_lowercase();
    let mut chars = lower.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn footer(now: &DateTime<Tz>) -> String {
    format!("<i>{}</i>", format_timestamp(now))
}

/// Playback progress in percent, from offsets or Tautulli's own figure
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn progress_percent(session: &StreamSession) -> u32 {
    if session.duration > 0 {
        let ratio = session.view_offset as f64 / session.duration as f64;
        return (ratio * 100.0).round().clamp(0.0, 100.0) as u32;
    }
    session.progress_percent.round().max(0.0) as u32
}

/// `("ETA", "15:20 CEST")` while playing, `("Left", "1h 5m left")` otherwise
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn eta_or_left(session: &StreamSession, now: &DateTime<Tz>) -> (&'static str, String) {
    let state = session.state_lower();
    let total_ms = if session.duration > 0 {
        session.duration
    } else {
        session.media_duration
    };

    if total_ms == 0 {
        let label = if state == "playing" { "ETA" } else { "Left" };
        return (label, "—".to_string());
    }

    let mut viewed_ms = session.view_offset;
    if viewed_ms == 0 {
        viewed_ms = (total_ms as f64 * session.progress_percent / 100.0).max(0.0) as u64;
    }
    let remaining_secs = total_ms.saturating_sub(viewed_ms) / 1000;

    if state == "playing" || state == "buffering" {
        let secs = i64::try_from(remaining_secs).unwrap_or(i64::MAX);
        let eta = TimeDelta::try_seconds(secs)
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(*now);
        return ("ETA", eta.format("%H:%M %Z").to_string());
    }
    if remaining_secs == 0 {
        return ("Left", "0m left".to_string());
    }

    let (hours, minutes) = (remaining_secs / 3600, (remaining_secs % 3600) / 60);
    if hours > 0 {
        ("Left", format!("{hours}h {minutes}m left"))
    } else {
        ("Left", format!("{minutes}m left"))
    }
}

/// Torrent ETA: `<1 min`, `N min`, `Hh Mm`
#[must_use]
pub fn download_eta(eta_secs: u64) -> String {
    if eta_secs >= QBIT_ETA_UNKNOWN {
        return "∞".to_string();
    }
    let minutes = eta_secs / 60;
    if minutes < 1 {
        return "<1 min".to_string();
    }
    if minutes < 60 {
        return format!("{minutes} min");
    }
    let (h, m) = (minutes / 60, minutes % 60);
    if m > 0 {
        format!("{h}h {m}m")
    } else {
        format!("{h}h")
    }
}

fn stream_line(session: &StreamSession) -> String {
    let decision =
        capitalize(non_blank(session.transcode_decision.as_deref()).unwrap_or("Direct Play"));
    let codec = non_blank(session.video_codec.as_deref())
        .map_or_else(|| "—".to_string(), str::to_uppercase);
    let details: Vec<&str> = std::iter::once(codec.as_str())
        .chain(non_blank(session.video_resolution.as_deref()))
        .chain(non_blank(session.video_dynamic_range.as_deref()))
        .collect();
    format!("{decision} ({})", details.join(" "))
}

fn write_session(out: &mut String, view: &SessionView, now: &DateTime<Tz>) {
    let s = &view.session;
    let icon = if s.state_lower() == "paused" { "⏸" } else { "▶️" };
    let title = non_blank(s.full_title.as_deref()).unwrap_or("—");
    let user = non_blank(s.friendly_name.as_deref()).unwrap_or("—");

    let _ = write!(out, "{icon} <b>{}</b>", encode_text(title));
    if let Some(poster) = &view.poster {
        let _ = write!(out, " <a href=\"{}\">🖼</a>", encode_double_quoted_attribute(poster));
    }
    out.push('\n');

    if s.is_episode() {
        let season = non_blank(s.parent_media_index.as_deref()).unwrap_or("—");
        let episode = non_blank(s.media_index.as_deref()).unwrap_or("—");
        let _ = writeln!(
            out,
            "👤 {} · S{} E{}",
            encode_text(user),
            encode_text(season),
            encode_text(episode)
        );
    } else {
        let year = non_blank(s.year.as_deref()).unwrap_or("—");
        let _ = writeln!(out, "👤 {} · {}", encode_text(user), encode_text(year));
    }

    let state = capitalize(s.state.as_deref().unwrap_or_default());
    let _ = writeln!(out, "{} • {}%", encode_text(&state), progress_percent(s));
    let _ = writeln!(out, "{}", encode_text(&stream_line(s)));

    let (label, value) = eta_or_left(s, now);
    let _ = write!(out, "{label}: {}", encode_text(&value));

    if let Some(summary) = non_blank(s.summary.as_deref()) {
        let mut short = truncate_str(summary.trim(), SUMMARY_MAX_CHARS);
        if short.len() < summary.trim().len() {
            short.push('…');
        }
        let _ = write!(out, "\n<i>{}</i>", encode_text(&short));
    }
}

/// Active streams summary
#[must_use]
pub fn render_streams(sessions: &[SessionView], now: &DateTime<Tz>) -> MessageContent {
    let mut text = String::from("<b>Plex Streams</b>\n\n");

    if sessions.is_empty() {
        text.push_str("Currently no streams active");
    } else {
        let shown = &sessions[..sessions.len().min(STREAMS_MAX_SESSIONS)];
        for (i, view) in shown.iter().enumerate() {
            if i > 0 {
                text.push_str("\n\n");
            }
            write_session(&mut text, view, now);
        }
    }

    let _ = write!(text, "\n\n{}", footer(now));
    let preview = sessions
        .iter()
        .take(STREAMS_MAX_SESSIONS)
        .find_map(|v| v.poster.clone());
    MessageContent::finish(text, preview)
}

fn write_stat_block(out: &mut String, heading: &str, rows: &[StatRow], users: bool) {
    let _ = writeln!(out, "<b>{heading}</b>");
    if rows.is_empty() {
        out.push('—');
        return;
    }

    let lines: Vec<String> = rows
        .iter()
        .take(STATS_ROWS)
        .enumerate()
        .map(|(i, row)| {
            let name = if users {
                non_blank(row.user.as_deref()).or(non_blank(row.friendly_name.as_deref()))
            } else {
                non_blank(row.title.as_deref()).or(non_blank(row.user.as_deref()))
            };
            format!(
                "{}. {} — {} plays",
                i + 1,
                encode_text(name.unwrap_or("—")),
                row.total_plays
            )
        })
        .collect();
    out.push_str(&lines.join("\n"));
}

/// Daily top activity summary
#[must_use]
pub fn render_stats(stats: &TopStats, now: &DateTime<Tz>) -> MessageContent {
    let mut text = String::from("<b>Top Activity (Daily)</b>\n\n");

    write_stat_block(&mut text, "Top Users — 30d", &stats.users_30d, true);
    text.push_str("\n\n");
    write_stat_block(&mut text, "Top Users — 365d", &stats.users_365d, true);
    text.push_str("\n\n");
    write_stat_block(&mut text, "Top Movies — 30d", &stats.movies_30d, false);
    text.push_str("\n\n");
    write_stat_block(&mut text, "Top TV — 30d", &stats.tv_30d, false);

    let _ = write!(text, "\n\n{}", footer(now));
    MessageContent::finish(text, None)
}

/// Downloads summary, or the degraded status when qBittorrent is unreachable
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn render_downloads(report: &DownloadsReport, now: &DateTime<Tz>) -> MessageContent {
    let mut text = String::from("<b>qBittorrent Status</b>\n\n");
    let mut preview = None;

    match report {
        DownloadsReport::Unavailable(status) => {
            let _ = write!(text, "⚠️ {}", encode_text(status));
        }
        DownloadsReport::Active(torrents) if torrents.is_empty() => {
            text.push_str("No downloads in progress.");
        }
        DownloadsReport::Active(torrents) => {
            let shown = &torrents[..torrents.len().min(DOWNLOADS_MAX_TORRENTS)];
            for (i, view) in shown.iter().enumerate() {
                if i > 0 {
                    text.push_str("\n\n");
                }
                let t = &view.torrent;
                let speed_mb = t.dlspeed as f64 / (1024.0 * 1024.0);
                let _ = write!(text, "<b>{}</b>", encode_text(&t.name));
                if let Some(poster) = &view.poster {
                    let _ = write!(
                        text,
                        " <a href=\"{}\">🖼</a>",
                        encode_double_quoted_attribute(poster)
                    );
                }
                let _ = write!(
                    text,
                    "\nProgress: {:.2}%\nSpeed: {speed_mb:.2} MB/s\nETA: {}",
                    t.progress * 100.0,
                    encode_text(&download_eta(t.eta))
                );
            }
            preview = shown.iter().find_map(|v| v.poster.clone());
        }
    }

    let _ = write!(text, "\n\n{}", footer(now));
    MessageContent::finish(text, preview)
}
