//! Feature table
//!
//! Each feature names the settings it needs and the external service it depends
//! on. [`FeaturePlan::from_settings`] checks every row the same way: a feature
//! whose output is unconfigured is silently off, a feature whose output is
//! configured but whose requirements are incomplete is disabled with a warning.

use crate::config::{is_set, Settings};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// Output areas mirrored into the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Current media server sessions
    Streams,
    /// Top users/movies/shows
    Stats,
    /// Active torrent downloads
    Downloads,
    /// Library counts written into chat titles
    Library,
}

impl Feature {
    /// All features, in startup order
    pub const ALL: [Self; 4] = [Self::Streams, Self::Stats, Self::Downloads, Self::Library];

    /// Stable slot key used for message persistence
    #[must_use]
    pub const fn slot_key(self) -> &'static str {
        match self {
            Self::Streams => "streams",
            Self::Stats => "stats",
            Self::Downloads => "downloads",
            Self::Library => "library",
        }
    }

    /// Service the feature pulls its data from
    #[must_use]
    pub const fn dependency(self) -> Dependency {
        match self {
            Self::Streams | Self::Stats | Self::Library => Dependency::Tautulli,
            Self::Downloads => Dependency::Qbittorrent,
        }
    }

    /// Poll interval configured for this feature
    #[must_use]
    pub const fn interval(self, settings: &Settings) -> Duration {
        let g = &settings.general;
        Duration::from_secs(match self {
            Self::Streams => g.update_seconds,
            Self::Stats => g.stats_update_seconds,
            Self::Downloads => g.qb_update_seconds,
            Self::Library => g.library_update_seconds,
        })
    }

    /// Whether the feature has somewhere to write its output
    fn has_output(self, settings: &Settings) -> bool {
        match self {
            Self::Streams => settings.streams.channel_id.is_some(),
            Self::Stats => settings.stats.channel_id.is_some(),
            Self::Downloads => settings.qbit.channel_id.is_some(),
            Self::Library => settings.library_channels.any(),
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slot_key())
    }
}

/// External services a feature can require
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dependency {
    /// Tautulli (media server statistics)
    Tautulli,
    /// qBittorrent Web API
    Qbittorrent,
}

impl Dependency {
    /// Human readable name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Tautulli => "Tautulli",
            Self::Qbittorrent => "qBittorrent",
        }
    }

    /// Required fields as `(dotted path, present)` pairs
    fn required_fields(self, settings: &Settings) -> Vec<(&'static str, bool)> {
        match self {
            Self::Tautulli => vec![
                ("tautulli.url", is_set(settings.tautulli.url.as_deref())),
                ("tautulli.api_key", is_set(settings.tautulli.api_key.as_deref())),
            ],
            Self::Qbittorrent => vec![
                ("qbit.host", is_set(settings.qbit.host.as_deref())),
                ("qbit.username", is_set(settings.qbit.username.as_deref())),
                ("qbit.password", is_set(settings.qbit.password.as_deref())),
            ],
        }
    }

    /// Fields that are required but blank
    #[must_use]
    pub fn missing_fields(self, settings: &Settings) -> Vec<&'static str> {
        self.required_fields(settings)
            .into_iter()
            .filter(|(_, present)| !present)
            .map(|(name, _)| name)
            .collect()
    }
}

/// A feature that was configured but cannot run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisabledFeature {
    /// The feature that was turned off
    pub feature: Feature,
    /// Settings that must be filled in to enable it
    pub missing: Vec<&'static str>,
}

/// Features that should run for one connection generation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeaturePlan {
    /// Features whose requirements are satisfied
    pub enabled: Vec<Feature>,
    /// Features with an output configured but missing requirements
    pub disabled: Vec<DisabledFeature>,
}

impl FeaturePlan {
    /// Evaluate the feature table against the settings.
    ///
    /// Disabled features are logged at `warn` level; nothing here fails.
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        let mut plan = Self::default();

        for feature in Feature::ALL {
            if !feature.has_output(settings) {
                debug!(feature = %feature, "Feature has no output configured");
                continue;
            }

            let dependency = feature.dependency();
            let missing = dependency.missing_fields(settings);
            if missing.is_empty() {
                plan.enabled.push(feature);
            } else {
                warn!(
                    feature = %feature,
                    dependency = dependency.name(),
                    missing = ?missing,
                    "Feature output is configured but {} is not; disabling it",
                    dependency.name()
                );
                plan.disabled.push(DisabledFeature { feature, missing });
            }
        }

        plan
    }

    /// Returns `true` if the feature will run
    #[must_use]
    pub fn is_enabled(&self, feature: Feature) -> bool {
        self.enabled.contains(&feature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tautulli_settings() -> Settings {
        let mut settings = Settings::default();
        settings.tautulli.url = Some("http://tautulli:8181".to_string());
        settings.tautulli.api_key = Some("key".to_string());
        settings
    }

    #[test]
    fn test_nothing_configured_is_empty_plan() {
        let plan = FeaturePlan::from_settings(&Settings::default());
        assert!(plan.enabled.is_empty());
        assert!(plan.disabled.is_empty());
    }

    #[test]
    fn test_streams_requires_tautulli() {
        let mut settings = Settings::default();
        settings.streams.channel_id = Some(-100);
        settings.tautulli.url = Some("http://tautulli".to_string());

        let plan = FeaturePlan::from_settings(&settings);
        assert!(!plan.is_enabled(Feature::Streams));
        assert_eq!(
            plan.disabled,
            vec![DisabledFeature {
                feature: Feature::Streams,
                missing: vec!["tautulli.api_key"],
            }]
        );
    }

    #[test]
    fn test_downloads_disabled_while_stats_run() {
        let mut settings = tautulli_settings();
        settings.stats.channel_id = Some(-200);
        settings.qbit.channel_id = Some(-300);
        settings.qbit.host = Some("http://qbit:8080".to_string());

        let plan = FeaturePlan::from_settings(&settings);
        assert_eq!(plan.enabled, vec![Feature::Stats]);
        assert_eq!(plan.disabled.len(), 1);
        assert_eq!(plan.disabled[0].feature, Feature::Downloads);
        assert_eq!(
            plan.disabled[0].missing,
            vec!["qbit.username", "qbit.password"]
        );
    }

    #[test]
    fn test_library_enabled_by_any_channel() {
        let mut settings = tautulli_settings();
        settings.library_channels.user_count_channel = Some(-400);
        let plan = FeaturePlan::from_settings(&settings);
        assert_eq!(plan.enabled, vec![Feature::Library]);
    }

    #[test]
    fn test_intervals_follow_settings() {
        let mut settings = Settings::default();
        settings.general.qb_update_seconds = 30;
        assert_eq!(
            Feature::Downloads.interval(&settings),
            Duration::from_secs(30)
        );
        assert_eq!(Feature::Streams.interval(&settings), Duration::from_secs(60));
    }
}
