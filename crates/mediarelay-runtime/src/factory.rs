use crate::destination::Destination;
use crate::pollers::{DownloadsPoller, LibraryPoller, StatsPoller, StreamsPoller};
use crate::reconciler::MessageReconciler;
use crate::sinks::{SlotSink, TitleSink};
use crate::worker::{PollingWorker, WorkerReport, WorkerSpec};
use mediarelay_core::config::Settings;
use mediarelay_core::features::{Feature, FeaturePlan};
use mediarelay_core::remote::ResilientClient;
use mediarelay_core::slots::SlotStore;
use mediarelay_core::sources::posters::PosterResolver;
use mediarelay_core::sources::qbit::QbitService;
use mediarelay_core::sources::tautulli::TautulliClient;
use mediarelay_core::sources::RemoteError;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Everything a worker set is built from
#[derive(Clone)]
pub struct GenerationContext {
    /// Settings the generation was started with
    pub settings: Arc<Settings>,
    /// Features to run
    pub plan: FeaturePlan,
    /// Destination of the live connection
    pub destination: Arc<dyn Destination>,
    /// Persisted slot identities
    pub slots: Arc<SlotStore>,
}

/// A running worker task
pub struct WorkerHandle {
    /// Slot key of the worker
    pub slot: String,
    /// Task handle yielding the worker's counters
    pub handle: JoinHandle<WorkerReport>,
}

/// Builds and spawns the workers of one connection generation
pub trait WorkerFactory: Send + Sync {
    /// Spawn one worker per enabled feature; each gets a child of `cancel`
    fn spawn(&self, ctx: &GenerationContext, cancel: &CancellationToken) -> Vec<WorkerHandle>;
}

/// Production factory backed by Tautulli, qBittorrent and the arr apps
#[derive(Debug, Default, Clone, Copy)]
pub struct ServiceWorkerFactory;

impl ServiceWorkerFactory {
    fn tautulli(settings: &Settings) -> Result<Arc<TautulliClient>, RemoteError> {
        let t = &settings.tautulli;
        TautulliClient::new(
            t.url.as_deref().unwrap_or_default(),
            t.api_key.as_deref().unwrap_or_default(),
        )
        .map(Arc::new)
    }

    fn posters(settings: &Settings) -> Option<PosterResolver> {
        if !settings.streams.post_thumbnails {
            return None;
        }
        match PosterResolver::from_settings(&settings.arr) {
            Ok(resolver) => resolver,
            Err(e) => {
                warn!(error = %e, "Poster lookups unavailable");
                None
            }
        }
    }

    fn spawn_feature(
        feature: Feature,
        ctx: &GenerationContext,
        reconciler: &Arc<MessageReconciler>,
        posters: Option<&PosterResolver>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<WorkerReport>, RemoteError> {
        let settings = &ctx.settings;
        let spec = WorkerSpec::new(feature.slot_key(), feature.interval(settings));
        let tz = settings.timezone();
        let slot_sink = |channel| SlotSink::new(reconciler.clone(), feature.slot_key(), channel);

        let handle = match feature {
            Feature::Streams => PollingWorker::new(
                spec,
                StreamsPoller::new(Self::tautulli(settings)?, posters.cloned(), tz),
                slot_sink(settings.streams.channel_id),
            )
            .spawn(cancel),
            Feature::Stats => PollingWorker::new(
                spec,
                StatsPoller::new(Self::tautulli(settings)?, tz),
                slot_sink(settings.stats.channel_id),
            )
            .spawn(cancel),
            Feature::Downloads => {
                let q = &settings.qbit;
                let service = QbitService::new(
                    q.host.as_deref().unwrap_or_default(),
                    q.username.as_deref().unwrap_or_default(),
                    q.password.as_deref().unwrap_or_default(),
                )?;
                PollingWorker::new(
                    spec,
                    DownloadsPoller::new(ResilientClient::new(service), posters.cloned(), tz),
                    slot_sink(q.channel_id),
                )
                .spawn(cancel)
            }
            Feature::Library => PollingWorker::new(
                spec,
                LibraryPoller::new(Self::tautulli(settings)?),
                TitleSink::new(ctx.destination.clone(), settings.library_channels.clone()),
            )
            .spawn(cancel),
        };
        Ok(handle)
    }
}

impl WorkerFactory for ServiceWorkerFactory {
    fn spawn(&self, ctx: &GenerationContext, cancel: &CancellationToken) -> Vec<WorkerHandle> {
        let reconciler = Arc::new(MessageReconciler::new(
            ctx.destination.clone(),
            ctx.slots.clone(),
        ));
        let posters = Self::posters(&ctx.settings);

        let mut handles = Vec::with_capacity(ctx.plan.enabled.len());
        for &feature in &ctx.plan.enabled {
            let built = Self::spawn_feature(
                feature,
                ctx,
                &reconciler,
                posters.as_ref(),
                cancel.child_token(),
            );
            match built {
                Ok(handle) => handles.push(WorkerHandle {
                    slot: feature.slot_key().to_string(),
                    handle,
                }),
                Err(e) => error!(feature = %feature, error = %e, "Failed to build worker"),
            }
        }

        info!(
            workers = handles.len(),
            posters = posters.is_some(),
            "Workers spawned"
        );
        handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::MockDestination;

    fn settings(dir: &tempfile::TempDir) -> Settings {
        let mut settings = Settings::default();
        settings.general.bot_token = "123456:test-token".to_string();
        settings.general.message_id_file = dir.path().join("message_ids.json");
        settings.tautulli.url = Some("http://tautulli:8181".to_string());
        settings.tautulli.api_key = Some("key".to_string());
        settings.streams.channel_id = Some(-1001);
        settings.stats.channel_id = Some(-1002);
        settings.qbit.channel_id = Some(-1003);
        settings.qbit.host = Some("http://qbittorrent:8080".to_string());
        settings.qbit.username = Some("admin".to_string());
        settings.qbit.password = Some("secret".to_string());
        settings.library_channels.movies_channel = Some(-1004);
        settings
    }

    fn context(settings: Settings) -> GenerationContext {
        let slots = Arc::new(SlotStore::load(settings.general.message_id_file.clone()));
        GenerationContext {
            plan: FeaturePlan::from_settings(&settings),
            settings: Arc::new(settings),
            destination: Arc::new(MockDestination::new()),
            slots,
        }
    }

    /// Spawn with a cancelled token so no worker reaches the network
    async fn spawned_slots(ctx: &GenerationContext) -> Vec<String> {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut slots = Vec::new();
        for worker in ServiceWorkerFactory.spawn(ctx, &cancel) {
            let Ok(report) = worker.handle.await else {
                panic!("worker {} failed", worker.slot);
            };
            assert_eq!(report.cycles, 0);
            slots.push(worker.slot);
        }
        slots
    }

    #[tokio::test]
    async fn test_one_worker_per_enabled_feature() -> Result<(), std::io::Error> {
        let dir = tempfile::tempdir()?;
        let ctx = context(settings(&dir));
        assert_eq!(ctx.plan.enabled, Feature::ALL.to_vec());

        let slots = spawned_slots(&ctx).await;
        assert_eq!(slots, vec!["streams", "stats", "downloads", "library"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_disabled_features_get_no_worker() -> Result<(), std::io::Error> {
        let dir = tempfile::tempdir()?;
        let mut settings = settings(&dir);
        settings.qbit.password = None;
        settings.library_channels.movies_channel = None;
        let ctx = context(settings);
        assert_eq!(ctx.plan.enabled, vec![Feature::Streams, Feature::Stats]);

        let slots = spawned_slots(&ctx).await;
        assert_eq!(slots, vec!["streams", "stats"]);
        Ok(())
    }
}
