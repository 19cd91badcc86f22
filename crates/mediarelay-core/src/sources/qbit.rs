use super::{build_http_client, lenient_f64, lenient_u64, normalize_base_url, RemoteError};
use crate::remote::RemoteService;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// Torrent entry from `torrents/info`
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Torrent {
    /// Torrent name
    pub name: String,
    /// Completion ratio, 0.0-1.0
    #[serde(deserialize_with = "lenient_f64")]
    pub progress: f64,
    /// Download speed in bytes per second
    #[serde(deserialize_with = "lenient_u64")]
    pub dlspeed: u64,
    /// Estimated seconds remaining; qBittorrent uses 8640000 for "unknown"
    #[serde(deserialize_with = "lenient_u64")]
    pub eta: u64,
    /// Torrent state, e.g. `downloading`, `stalledDL`
    pub state: String,
}

/// Keep torrents whose state is exactly `downloading`
#[must_use]
pub fn only_downloading(torrents: Vec<Torrent>) -> Vec<Torrent> {
    torrents
        .into_iter()
        .filter(|t| t.state.eq_ignore_ascii_case("downloading"))
        .collect()
}

/// qBittorrent Web API session (cookie based)
pub struct QbitService {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl QbitService {
    /// Create a service for the Web UI at `host`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(host: &str, username: &str, password: &str) -> Result<Self, RemoteError> {
        Ok(Self {
            http: build_http_client(true)?,
            base_url: normalize_base_url(host),
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    /// Normalized Web UI base URL
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl RemoteService for QbitService {
    type Output = Vec<Torrent>;

    fn name(&self) -> &str {
        "qBittorrent"
    }

    async fn login(&self) -> Result<(), RemoteError> {
        let response = self
            .http
            .post(format!("{}/api/v2/auth/login", self.base_url))
            // Needed when the Web UI enforces CSRF protection
            .header(reqwest::header::REFERER, &self.base_url)
            .form(&[
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(RemoteError::Status {
                endpoint: "/api/v2/auth/login".to_string(),
                status: status.as_u16(),
            });
        }
        if body.trim() != "Ok." {
            return Err(RemoteError::LoginRejected(body.trim().to_string()));
        }

        debug!(host = %self.base_url, "qBittorrent login succeeded");
        Ok(())
    }

    async fn query(&self) -> Result<Vec<Torrent>, RemoteError> {
        let response = self
            .http
            .get(format!("{}/api/v2/torrents/info", self.base_url))
            .query(&[("filter", "downloading")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status {
                endpoint: "/api/v2/torrents/info".to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        let torrents: Vec<Torrent> = serde_json::from_slice(&body)?;
        Ok(only_downloading(torrents))
    }
}
