//! Poster URLs via Radarr/Sonarr
//!
//! The arr apps return public CDN `remoteUrl`s for artwork, which chat
//! clients can fetch without access to the home network. Library listings
//! and lookups are cached since they rarely change between poll cycles.

use super::{build_http_client, normalize_base_url, tautulli::StreamSession, RemoteError};
use crate::config::{is_set, ArrSettings};
use crate::utils::{clean_title, looks_like_episode};
use moka::future::Cache;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const CACHE_CAPACITY: u64 = 128;
const CACHE_TTL_SECS: u64 = 600;

#[derive(Debug, Clone)]
struct ArrEndpoint {
    base_url: String,
    api_key: String,
}

impl ArrEndpoint {
    fn from_pair(host: Option<&str>, key: Option<&str>) -> Option<Self> {
        match (host, key) {
            (Some(host), Some(key)) if is_set(Some(host)) && is_set(Some(key)) => Some(Self {
                base_url: normalize_base_url(host),
                api_key: key.trim().to_string(),
            }),
            _ => None,
        }
    }
}

/// Resolves poster URLs for sessions and torrents
#[derive(Clone)]
pub struct PosterResolver {
    http: reqwest::Client,
    radarr: Option<ArrEndpoint>,
    sonarr: Option<ArrEndpoint>,
    /// URL (with query) -> parsed body, `None` for failed requests
    cache: Cache<String, Option<Arc<Value>>>,
}

impl PosterResolver {
    /// Build a resolver if Radarr or Sonarr is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_settings(arr: &ArrSettings) -> Result<Option<Self>, RemoteError> {
        let radarr =
            ArrEndpoint::from_pair(arr.radarr_host.as_deref(), arr.radarr_api_key.as_deref());
        let sonarr =
            ArrEndpoint::from_pair(arr.sonarr_host.as_deref(), arr.sonarr_api_key.as_deref());
        if radarr.is_none() && sonarr.is_none() {
            return Ok(None);
        }

        let cache = Cache::builder()
            .max_capacity(CACHE_CAPACITY)
            .time_to_live(Duration::from_secs(CACHE_TTL_SECS))
            .build();

        Ok(Some(Self {
            http: build_http_client(false)?,
            radarr,
            sonarr,
            cache,
        }))
    }

    /// Poster for an active session, `None` if nothing matches
    pub async fn for_session(&self, session: &StreamSession) -> Option<String> {
        if session.is_episode() {
            let raw = session
                .grandparent_title
                .as_deref()
                .or(session.title.as_deref())?;
            return self
                .tv_poster(Some(&clean_title(raw)), session.tvdb_id.as_deref())
                .await;
        }

        let raw = session
            .title
            .as_deref()
            .or(session.full_title.as_deref())?;
        let title = clean_title(raw);
        let imdb = session.imdb_id.as_deref();
        let tmdb = session.tmdb_id.as_deref();

        if let Some(url) = self
            .movie_poster(Some(&title), session.year.as_deref(), imdb, tmdb)
            .await
        {
            return Some(url);
        }
        // Tautulli and Radarr sometimes disagree on the year
        self.movie_poster(Some(&title), None, imdb, tmdb).await
    }

    /// Poster for a torrent name, guessing movie vs. show from `SxxEyy`
    pub async fn for_torrent(&self, name: &str) -> Option<String> {
        let title = clean_title(name);
        if looks_like_episode(name) {
            self.tv_poster(Some(&title), None).await
        } else {
            self.movie_poster(Some(&title), None, None, None).await
        }
    }

    /// Movie poster via Radarr: library first, then lookup
    pub async fn movie_poster(
        &self,
        title: Option<&str>,
        year: Option<&str>,
        imdb_id: Option<&str>,
        tmdb_id: Option<&str>,
    ) -> Option<String> {
        let radarr = self.radarr.as_ref()?;
        let title = title.filter(|t| !t.trim().is_empty());
        let imdb_id = imdb_id.filter(|id| !id.trim().is_empty());
        let tmdb_id = tmdb_id.filter(|id| is_numeric_id(id));

        if let Some(movies) = self.get(radarr, "/api/v3/movie", &[]).await {
            let found = imdb_id
                .and_then(|id| match_key(&movies, "imdbId", id))
                .or_else(|| tmdb_id.and_then(|id| match_key(&movies, "tmdbId", id)))
                .or_else(|| title.and_then(|t| match_title_year(&movies, t, year)));
            if found.is_some() {
                return found;
            }
        }

        if let Some(id) = imdb_id {
            let items = self.get(radarr, "/api/v3/movie/lookup", &[("imdbId", id)]).await;
            if let Some(url) = items.as_deref().and_then(first_poster) {
                return Some(url);
            }
        }
        if let Some(id) = tmdb_id {
            let items = self.get(radarr, "/api/v3/movie/lookup", &[("tmdbId", id)]).await;
            if let Some(url) = items.as_deref().and_then(first_poster) {
                return Some(url);
            }
        }
        let title = title?;
        let items = self.get(radarr, "/api/v3/movie/lookup", &[("term", title)]).await?;
        pick_by_title(&items, title, year)
    }

    /// Series poster via Sonarr: library first, then lookup
    pub async fn tv_poster(&self, title: Option<&str>, tvdb_id: Option<&str>) -> Option<String> {
        let sonarr = self.sonarr.as_ref()?;
        let title = title.filter(|t| !t.trim().is_empty());
        let tvdb_id = tvdb_id.filter(|id| is_numeric_id(id));

        if let Some(series) = self.get(sonarr, "/api/v3/series", &[]).await {
            let found = tvdb_id
                .and_then(|id| match_key(&series, "tvdbId", id))
                .or_else(|| title.and_then(|t| match_title_year(&series, t, None)));
            if found.is_some() {
                return found;
            }
        }

        if let Some(id) = tvdb_id {
            let term = format!("tvdb:{id}");
            let items = self
                .get(sonarr, "/api/v3/series/lookup", &[("term", term.as_str())])
                .await;
            if let Some(url) = items.as_deref().and_then(first_poster) {
                return Some(url);
            }
        }
        let title = title?;
        let items = self
            .get(sonarr, "/api/v3/series/lookup", &[("term", title)])
            .await?;
        pick_by_title(&items, title, None)
    }

    async fn get(
        &self,
        endpoint: &ArrEndpoint,
        path: &str,
        params: &[(&str, &str)],
    ) -> Option<Arc<Value>> {
        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        let key = format!("{}{path}?{query}", endpoint.base_url);

        self.cache
            .get_with(key, async move {
                match self.fetch_json(endpoint, path, params).await {
                    Ok(value) => Some(Arc::new(value)),
                    Err(e) => {
                        debug!(path, error = %e, "Poster lookup failed");
                        None
                    }
                }
            })
            .await
    }

    async fn fetch_json(
        &self,
        endpoint: &ArrEndpoint,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<Value, RemoteError> {
        let response = self
            .http
            .get(format!("{}{path}", endpoint.base_url))
            .header("X-Api-Key", &endpoint.api_key)
            .query(params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status {
                endpoint: path.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.json().await?)
    }
}

fn is_numeric_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_digit())
}

/// Scalar JSON value as text, for loose id/year comparisons
fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn items(value: &Value) -> &[Value] {
    value.as_array().map_or(&[][..], Vec::as_slice)
}

/// First `poster` image with a `remoteUrl`, else any image with one.
///
/// Accepts a single item or a list (first element is used).
#[must_use]
pub fn first_poster(item_or_list: &Value) -> Option<String> {
    let item = match item_or_list {
        Value::Array(list) => list.first()?,
        other => other,
    };
    let images = item.get("images").map(items).unwrap_or_default();
    let remote_url = |img: &Value| {
        img.get("remoteUrl")
            .and_then(Value::as_str)
            .filter(|u| !u.is_empty())
            .map(str::to_string)
    };

    images
        .iter()
        .filter(|img| img.get("coverType").and_then(Value::as_str) == Some("poster"))
        .find_map(remote_url)
        .or_else(|| images.iter().find_map(remote_url))
}

/// Poster of the first item whose `key` equals `value`
fn match_key(list: &Value, key: &str, value: &str) -> Option<String> {
    items(list)
        .iter()
        .find(|item| item.get(key).and_then(value_text).as_deref() == Some(value))
        .and_then(first_poster)
}

fn title_matches(item: &Value, title: &str, year: Option<&str>) -> bool {
    let wanted = title.trim().to_lowercase();
    let item_title = item
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    let year_ok = year.map_or(true, |y| {
        item.get("year").and_then(value_text).as_deref() == Some(y)
    });
    item_title == wanted && year_ok
}

/// Poster of the first item with the same title (and year when given)
fn match_title_year(list: &Value, title: &str, year: Option<&str>) -> Option<String> {
    items(list)
        .iter()
        .find(|item| title_matches(item, title, year))
        .and_then(first_poster)
}

/// Like [`match_title_year`] but falls back to the first lookup result
fn pick_by_title(list: &Value, title: &str, year: Option<&str>) -> Option<String> {
    if items(list).is_empty() {
        return None;
    }
    match_title_year(list, title, year).or_else(|| first_poster(list))
}
