//! Pollers for each feature
//!
//! Each one pairs a source from `mediarelay_core::sources` with its renderer.

use crate::worker::Poller;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use mediarelay_core::config::{DOWNLOADS_MAX_TORRENTS, STATS_ROWS, STREAMS_MAX_SESSIONS};
use mediarelay_core::remote::{RemoteFetch, RemoteService, ResilientClient};
use mediarelay_core::render::{
    render_downloads, render_stats, render_streams, DownloadsReport, LibraryTitles, MessageContent,
    SessionView, TopStats, TorrentView,
};
use mediarelay_core::sources::posters::PosterResolver;
use mediarelay_core::sources::qbit::{QbitService, Torrent};
use mediarelay_core::sources::tautulli::{LibraryCounts, StreamSession, TautulliClient};
use std::sync::Arc;
use tracing::debug;

fn local_now(tz: Tz) -> DateTime<Tz> {
    Utc::now().with_timezone(&tz)
}

/// Current sessions from Tautulli
pub struct StreamsPoller {
    tautulli: Arc<TautulliClient>,
    posters: Option<PosterResolver>,
    tz: Tz,
}

impl StreamsPoller {
    /// `posters` is `None` when thumbnails are off
    #[must_use]
    pub const fn new(
        tautulli: Arc<TautulliClient>,
        posters: Option<PosterResolver>,
        tz: Tz,
    ) -> Self {
        Self {
            tautulli,
            posters,
            tz,
        }
    }
}

#[async_trait]
impl Poller for StreamsPoller {
    type Data = Vec<SessionView>;
    type Output = MessageContent;

    async fn fetch(&mut self) -> Result<Vec<SessionView>> {
        let sessions: Vec<StreamSession> = self.tautulli.get_activity().await?;
        debug!(count = sessions.len(), "Fetched Tautulli activity");

        let mut views = Vec::with_capacity(sessions.len().min(STREAMS_MAX_SESSIONS));
        for session in sessions.into_iter().take(STREAMS_MAX_SESSIONS) {
            let poster = match &self.posters {
                Some(posters) => posters.for_session(&session).await,
                None => None,
            };
            views.push(SessionView { session, poster });
        }
        Ok(views)
    }

    fn render(&self, data: Vec<SessionView>) -> MessageContent {
        render_streams(&data, &local_now(self.tz))
    }
}

/// Home statistics from Tautulli
pub struct StatsPoller {
    tautulli: Arc<TautulliClient>,
    tz: Tz,
}

impl StatsPoller {
    /// Poller over `tautulli`
    #[must_use]
    pub const fn new(tautulli: Arc<TautulliClient>, tz: Tz) -> Self {
        Self { tautulli, tz }
    }
}

#[async_trait]
impl Poller for StatsPoller {
    type Data = TopStats;
    type Output = MessageContent;

    async fn fetch(&mut self) -> Result<TopStats> {
        let t = &self.tautulli;
        Ok(TopStats {
            users_30d: t.get_home_stats("top_users", 30, STATS_ROWS).await?,
            users_365d: t.get_home_stats("top_users", 365, STATS_ROWS).await?,
            movies_30d: t.get_home_stats("top_movies", 30, STATS_ROWS).await?,
            tv_30d: t.get_home_stats("top_tv", 30, STATS_ROWS).await?,
        })
    }

    fn render(&self, data: TopStats) -> MessageContent {
        render_stats(&data, &local_now(self.tz))
    }
}

/// Downloading torrents from qBittorrent.
///
/// Never fails: an unreachable qBittorrent is rendered as its status text.
pub struct DownloadsPoller<S = QbitService> {
    client: ResilientClient<S>,
    posters: Option<PosterResolver>,
    tz: Tz,
}

impl<S> DownloadsPoller<S> {
    /// Poller over a resilient torrent client
    #[must_use]
    pub const fn new(client: ResilientClient<S>, posters: Option<PosterResolver>, tz: Tz) -> Self {
        Self {
            client,
            posters,
            tz,
        }
    }
}

#[async_trait]
impl<S> Poller for DownloadsPoller<S>
where
    S: RemoteService<Output = Vec<Torrent>> + 'static,
{
    type Data = DownloadsReport;
    type Output = MessageContent;

    async fn fetch(&mut self) -> Result<DownloadsReport> {
        let torrents = match self.client.fetch().await {
            RemoteFetch::Fetched(torrents) => torrents,
            RemoteFetch::Unavailable => {
                let status = self
                    .client
                    .status_text()
                    .unwrap_or_else(|| "qBittorrent unavailable.".to_string());
                return Ok(DownloadsReport::Unavailable(status));
            }
        };

        let mut views = Vec::with_capacity(torrents.len().min(DOWNLOADS_MAX_TORRENTS));
        for torrent in torrents.into_iter().take(DOWNLOADS_MAX_TORRENTS) {
            let poster = match &self.posters {
                Some(posters) => posters.for_torrent(&torrent.name).await,
                None => None,
            };
            views.push(TorrentView { torrent, poster });
        }
        Ok(DownloadsReport::Active(views))
    }

    fn render(&self, data: DownloadsReport) -> MessageContent {
        render_downloads(&data, &local_now(self.tz))
    }
}

/// Library totals from Tautulli, rendered as chat titles
pub struct LibraryPoller {
    tautulli: Arc<TautulliClient>,
}

impl LibraryPoller {
    /// Poller over `tautulli`
    #[must_use]
    pub const fn new(tautulli: Arc<TautulliClient>) -> Self {
        Self { tautulli }
    }
}

#[async_trait]
impl Poller for LibraryPoller {
    type Data = LibraryCounts;
    type Output = LibraryTitles;

    async fn fetch(&mut self) -> Result<LibraryCounts> {
        Ok(self.tautulli.library_counts().await?)
    }

    fn render(&self, data: LibraryCounts) -> LibraryTitles {
        LibraryTitles::from(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::MockDestination;
    use crate::reconciler::MessageReconciler;
    use crate::sinks::SlotSink;
    use crate::worker::{PollingWorker, WorkerSpec};
    use mediarelay_core::slots::{MessageId, SlotStore};
    use mediarelay_core::sources::RemoteError;
    use mockall::predicate::eq;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    const CHANNEL: i64 = -1003;

    /// qBittorrent stand-in whose logins follow a script
    struct FlakyTorrents {
        logins: Mutex<VecDeque<Result<(), String>>>,
    }

    #[async_trait]
    impl RemoteService for FlakyTorrents {
        type Output = Vec<Torrent>;

        fn name(&self) -> &str {
            "qBittorrent"
        }

        async fn login(&self) -> Result<(), RemoteError> {
            let next = self
                .logins
                .lock()
                .map_err(|_| RemoteError::Api("poisoned".into()))?
                .pop_front();
            next.unwrap_or(Ok(())).map_err(RemoteError::Api)
        }

        async fn query(&self) -> Result<Vec<Torrent>, RemoteError> {
            Ok(vec![Torrent {
                name: "Dune.Part.Two.2024.2160p".to_string(),
                progress: 0.5,
                dlspeed: 2 * 1024 * 1024,
                eta: 600,
                state: "downloading".to_string(),
            }])
        }
    }

    type Texts = std::sync::Arc<Mutex<Vec<String>>>;

    fn texts(recorded: &Texts) -> Vec<String> {
        let Ok(texts) = recorded.lock() else {
            panic!("recorded texts poisoned");
        };
        texts.clone()
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_qbit_shows_status_then_recovers_in_place(
    ) -> Result<(), std::io::Error> {
        let dir = tempfile::tempdir()?;
        let sent = Texts::default();
        let edited = Texts::default();

        let mut destination = MockDestination::new();
        destination.expect_channel_exists().returning(|_| Ok(true));
        let record = sent.clone();
        destination
            .expect_send()
            .times(1)
            .returning(move |_, content| {
                if let Ok(mut texts) = record.lock() {
                    texts.push(content.text.clone());
                }
                Ok(MessageId(7))
            });
        let record = edited.clone();
        destination
            .expect_edit()
            .with(eq(CHANNEL), eq(MessageId(7)), mockall::predicate::always())
            .times(1)
            .returning(move |_, _, content| {
                if let Ok(mut texts) = record.lock() {
                    texts.push(content.text.clone());
                }
                Ok(())
            });

        let slots = Arc::new(SlotStore::load(dir.path().join("message_ids.json")));
        let reconciler = Arc::new(MessageReconciler::new(Arc::new(destination), slots.clone()));
        let service = FlakyTorrents {
            logins: Mutex::new(VecDeque::from([Err("connection refused".to_string())])),
        };
        let worker = PollingWorker::new(
            WorkerSpec::new("downloads", Duration::from_secs(60)),
            DownloadsPoller::new(ResilientClient::new(service), None, chrono_tz::UTC),
            SlotSink::new(reconciler, "downloads", Some(CHANNEL)),
        );

        let cancel = CancellationToken::new();
        let handle = worker.spawn(cancel.clone());
        tokio::time::sleep(Duration::from_secs(61)).await;
        cancel.cancel();
        let Ok(report) = handle.await else {
            panic!("downloads worker failed");
        };

        assert_eq!(report.cycles, 2);
        assert_eq!(report.failures, 0);

        let sent = texts(&sent);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("qBittorrent unreachable: connection refused. Retrying in 5s."));

        let edited = texts(&edited);
        assert_eq!(edited.len(), 1);
        assert!(edited[0].contains("<b>Dune.Part.Two.2024.2160p</b>"));
        assert!(edited[0].contains("Progress: 50.00%"));
        assert!(!edited[0].contains("unreachable"));
        assert_eq!(slots.get("downloads").await, Some(MessageId(7)));
        Ok(())
    }
}
