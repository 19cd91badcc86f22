use super::{
    build_http_client, lenient_f64, lenient_opt_string, lenient_u64, normalize_base_url,
    RemoteError,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

/// One active playback session from `get_activity`
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamSession {
    /// Display title, e.g. `Show - Episode` for episodes
    pub full_title: Option<String>,
    /// Item title
    pub title: Option<String>,
    /// Show title for episodes
    pub grandparent_title: Option<String>,
    /// Plot summary
    pub summary: Option<String>,
    /// Viewer display name
    pub friendly_name: Option<String>,
    /// `playing`, `paused`, `buffering`
    pub state: Option<String>,
    /// `movie`, `episode`, `track`, ...
    pub media_type: Option<String>,
    /// `transcode`, `copy`, `direct play`
    pub transcode_decision: Option<String>,
    /// Video codec, e.g. `hevc`
    pub video_codec: Option<String>,
    /// Video resolution, e.g. `1080`
    pub video_resolution: Option<String>,
    /// Dynamic range, e.g. `HDR`
    pub video_dynamic_range: Option<String>,
    /// Season number
    #[serde(deserialize_with = "lenient_opt_string")]
    pub parent_media_index: Option<String>,
    /// Episode number
    #[serde(deserialize_with = "lenient_opt_string")]
    pub media_index: Option<String>,
    /// Release year
    #[serde(deserialize_with = "lenient_opt_string")]
    pub year: Option<String>,
    /// TheTVDB id of the show
    #[serde(deserialize_with = "lenient_opt_string")]
    pub tvdb_id: Option<String>,
    /// IMDb id of the movie
    #[serde(deserialize_with = "lenient_opt_string")]
    pub imdb_id: Option<String>,
    /// TMDB id of the movie
    #[serde(deserialize_with = "lenient_opt_string")]
    pub tmdb_id: Option<String>,
    /// Stream duration in milliseconds
    #[serde(deserialize_with = "lenient_u64")]
    pub duration: u64,
    /// Media duration in milliseconds, used when `duration` is missing
    #[serde(deserialize_with = "lenient_u64")]
    pub media_duration: u64,
    /// Playback position in milliseconds
    #[serde(deserialize_with = "lenient_u64")]
    pub view_offset: u64,
    /// Progress as reported by Tautulli, 0-100
    #[serde(deserialize_with = "lenient_f64")]
    pub progress_percent: f64,
}

impl StreamSession {
    /// Returns `true` for TV episodes
    #[must_use]
    pub fn is_episode(&self) -> bool {
        self.media_type.as_deref() == Some("episode")
    }

    /// Lowercased playback state
    #[must_use]
    pub fn state_lower(&self) -> String {
        self.state.as_deref().unwrap_or_default().to_lowercase()
    }
}

/// One row of a `get_home_stats` block
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StatRow {
    /// Username (user blocks)
    pub user: Option<String>,
    /// Display name (user blocks)
    pub friendly_name: Option<String>,
    /// Media title (movie/show blocks)
    pub title: Option<String>,
    /// Plays in the requested range
    #[serde(deserialize_with = "lenient_u64")]
    pub total_plays: u64,
}

/// Library and user totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LibraryCounts {
    /// Items across all movie libraries
    pub movies: u64,
    /// Items across all show libraries
    pub shows: u64,
    /// Known users
    pub users: u64,
}

#[derive(Deserialize)]
struct Envelope<T> {
    response: EnvelopeBody<T>,
}

#[derive(Deserialize)]
struct EnvelopeBody<T> {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Deserialize, Default)]
struct Activity {
    #[serde(default)]
    sessions: Vec<StreamSession>,
}

#[derive(Deserialize)]
struct StatBlock {
    #[serde(default)]
    stat_id: String,
    #[serde(default)]
    rows: Vec<StatRow>,
}

#[derive(Deserialize)]
struct Library {
    #[serde(default)]
    section_type: String,
    #[serde(default, deserialize_with = "lenient_u64")]
    count: u64,
}

/// Decode a Tautulli `{"response": {"result", "message", "data"}}` body.
///
/// A missing `data` field decodes as `T::default()`.
///
/// # Errors
///
/// Returns [`RemoteError::Api`] when `result` is `error`, or
/// [`RemoteError::Decode`] when the body has another shape.
pub fn decode_envelope<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, RemoteError> {
    let envelope: Envelope<T> = serde_json::from_slice(body)?;
    let response = envelope.response;
    if response.result.as_deref() == Some("error") {
        return Err(RemoteError::Api(
            response
                .message
                .unwrap_or_else(|| "Tautulli returned an error".to_string()),
        ));
    }
    Ok(response.data.unwrap_or_default())
}

/// Rows of the block whose `stat_id` equals `stat_id`
fn rows_for(blocks: Vec<StatBlock>, stat_id: &str) -> Vec<StatRow> {
    blocks
        .into_iter()
        .find(|b| b.stat_id == stat_id)
        .map(|b| b.rows)
        .unwrap_or_default()
}

/// Sum of `count` across libraries of one section type
fn sum_libraries(libraries: &[Library], section_type: &str) -> u64 {
    libraries
        .iter()
        .filter(|l| l.section_type == section_type)
        .map(|l| l.count)
        .sum()
}

/// Tautulli API v2 client
#[derive(Clone)]
pub struct TautulliClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl TautulliClient {
    /// Create a client for `base_url` authenticated with `api_key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, RemoteError> {
        Ok(Self {
            http: build_http_client(false)?,
            base_url: normalize_base_url(base_url),
            api_key: api_key.trim().to_string(),
        })
    }

    async fn command<T: DeserializeOwned + Default>(
        &self,
        cmd: &str,
        params: &[(&str, String)],
    ) -> Result<T, RemoteError> {
        let url = format!("{}/api/v2", self.base_url);
        debug!(cmd, "Tautulli request");

        let response = self
            .http
            .get(&url)
            .query(&[("apikey", self.api_key.as_str()), ("cmd", cmd)])
            .query(params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status {
                endpoint: format!("/api/v2?cmd={cmd}"),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        decode_envelope(&body)
    }

    /// Current playback sessions
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body is malformed.
    pub async fn get_activity(&self) -> Result<Vec<StreamSession>, RemoteError> {
        let activity: Activity = self.command("get_activity", &[]).await?;
        Ok(activity.sessions)
    }

    /// Top rows of one home statistics block, ordered by plays
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body is malformed.
    pub async fn get_home_stats(
        &self,
        stat_id: &str,
        days: u32,
        length: usize,
    ) -> Result<Vec<StatRow>, RemoteError> {
        let params = [
            ("stats_type", stat_id.to_string()),
            ("time_range", days.to_string()),
            ("length", length.to_string()),
            ("order_column", "total_plays".to_string()),
        ];
        let blocks: Vec<StatBlock> = self.command("get_home_stats", &params).await?;
        Ok(rows_for(blocks, stat_id))
    }

    /// Number of items in libraries of `section_type` (`movie` or `show`)
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body is malformed.
    pub async fn count_library(&self, section_type: &str) -> Result<u64, RemoteError> {
        let libraries: Vec<Library> = self.command("get_libraries", &[]).await?;
        Ok(sum_libraries(&libraries, section_type))
    }

    /// Number of users known to Tautulli
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body is malformed.
    pub async fn count_users(&self) -> Result<u64, RemoteError> {
        let users: Vec<serde_json::Value> = self.command("get_users", &[]).await?;
        Ok(users.len() as u64)
    }

    /// Movie, show and user totals
    ///
    /// # Errors
    ///
    /// Returns the first failing request's error.
    pub async fn library_counts(&self) -> Result<LibraryCounts, RemoteError> {
        Ok(LibraryCounts {
            movies: self.count_library("movie").await?,
            shows: self.count_library("show").await?,
            users: self.count_users().await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_activity() -> Result<(), RemoteError> {
        let body = br#"{"response": {"result": "success", "data": {"stream_count": "1", "sessions": [
            {"full_title": "Severance - Hello, Ms. Cobel", "media_type": "episode",
             "friendly_name": "alice", "state": "playing", "parent_media_index": "2",
             "media_index": 1, "duration": "3000000", "view_offset": 1500000,
             "progress_percent": "50", "year": 2025}
        ]}}}"#;

        let activity: Activity = decode_envelope(body)?;
        assert_eq!(activity.sessions.len(), 1);
        let s = &activity.sessions[0];
        assert!(s.is_episode());
        assert_eq!(s.parent_media_index.as_deref(), Some("2"));
        assert_eq!(s.media_index.as_deref(), Some("1"));
        assert_eq!(s.duration, 3_000_000);
        assert_eq!(s.view_offset, 1_500_000);
        assert_eq!(s.year.as_deref(), Some("2025"));
        assert_eq!(s.state_lower(), "playing");
        Ok(())
    }

    #[test]
    fn test_decode_error_result() {
        let body = br#"{"response": {"result": "error", "message": "Invalid apikey", "data": {}}}"#;
        let Err(RemoteError::Api(msg)) = decode_envelope::<Activity>(body) else {
            panic!("expected api error");
        };
        assert_eq!(msg, "Invalid apikey");
    }

    #[test]
    fn test_decode_missing_data_is_default() -> Result<(), RemoteError> {
        let activity: Activity = decode_envelope(br#"{"response": {"result": "success"}}"#)?;
        assert!(activity.sessions.is_empty());
        assert!(decode_envelope::<Activity>(b"<html>").is_err());
        Ok(())
    }

    #[test]
    fn test_home_stats_picks_matching_block() -> Result<(), RemoteError> {
        let body = br#"{"response": {"result": "success", "data": [
            {"stat_id": "top_movies", "rows": [{"title": "Heat", "total_plays": 3}]},
            {"stat_id": "top_users", "rows": [{"user": "bob", "friendly_name": "Bob", "total_plays": "9"}]}
        ]}}"#;
        let blocks: Vec<StatBlock> = decode_envelope(body)?;
        let rows = rows_for(blocks, "top_users");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].user.as_deref(), Some("bob"));
        assert_eq!(rows[0].total_plays, 9);
        Ok(())
    }

    #[test]
    fn test_library_counts_sum_by_type() -> Result<(), RemoteError> {
        let body = br#"{"response": {"result": "success", "data": [
            {"section_type": "movie", "count": "120"},
            {"section_type": "movie", "count": 30},
            {"section_type": "show", "count": "45"},
            {"section_type": "artist", "count": "999"}
        ]}}"#;
        let libraries: Vec<Library> = decode_envelope(body)?;
        assert_eq!(sum_libraries(&libraries, "movie"), 150);
        assert_eq!(sum_libraries(&libraries, "show"), 45);
        assert_eq!(sum_libraries(&libraries, "photo"), 0);
        Ok(())
    }
}
