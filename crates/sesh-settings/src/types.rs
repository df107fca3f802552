//! Settings type definitions.
//!
//! Field names are camelCase in JSON. Every section is `#[serde(default)]`, so
//! a partial file only needs the keys it changes.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type, loaded from `~/.sesh/settings.json`.
///
/// ```json
/// {
///   "clustering": { "gapThresholdMs": 14400000 },
///   "database": { "path": "/var/lib/sesh/sesh.db" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SeshSettings {
    pub clustering: ClusteringSettings,
    pub backfill: BackfillSettings,
    pub feed: FeedSettings,
    pub database: DatabaseSettings,
    pub logging: LoggingSettings,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusteringSettings {
    /// Inactivity gap that starts a new session, in milliseconds.
    pub gap_threshold_ms: u64,
    /// Padding around a session when adding a member, in milliseconds.
    pub membership_window_buffer_ms: u64,
}

impl Default for ClusteringSettings {
    fn default() -> Self {
        Self {
            gap_threshold_ms: 14_400_000,
            membership_window_buffer_ms: 1_800_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackfillSettings {
    pub batch_size: u32,
    /// Period of the `watch` loop.
    pub interval_secs: u64,
}

impl Default for BackfillSettings {
    fn default() -> Self {
        Self {
            batch_size: 5000,
            interval_secs: 300,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeedSettings {
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            default_page_size: 20,
            max_page_size: 100,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    /// A leading `~/` expands to the home directory.
    pub path: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: "~/.sesh/sesh.db".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl SeshSettings {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.clustering.gap_threshold_ms == 0, "clustering.gapThresholdMs must be positive"),
            (self.backfill.batch_size == 0, "backfill.batchSize must be positive"),
            (self.backfill.interval_secs == 0, "backfill.intervalSecs must be positive"),
            (self.feed.default_page_size == 0, "feed.defaultPageSize must be positive"),
            (
                self.feed.max_page_size < self.feed.default_page_size,
                "feed.maxPageSize must be at least feed.defaultPageSize",
            ),
            (self.database.path.trim().is_empty(), "database.path must not be empty"),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(SettingsError::InvalidValue((*message).to_string())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = SeshSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.clustering.gap_threshold_ms, 4 * 60 * 60 * 1000);
        assert_eq!(settings.backfill.batch_size, 5000);
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(SeshSettings::default()).unwrap();
        assert_eq!(json["clustering"]["gapThresholdMs"], 14_400_000);
        assert_eq!(json["clustering"]["membershipWindowBufferMs"], 1_800_000);
        assert_eq!(json["feed"]["maxPageSize"], 100);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: SeshSettings =
            serde_json::from_str(r#"{"backfill": {"batchSize": 10}}"#).unwrap();
        assert_eq!(settings.backfill.batch_size, 10);
        assert_eq!(settings.backfill.interval_secs, 300);
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn zero_values_are_rejected() {
        let mut settings = SeshSettings::default();
        settings.backfill.batch_size = 0;
        assert!(matches!(settings.validate(), Err(SettingsError::InvalidValue(_))));

        let mut settings = SeshSettings::default();
        settings.feed.max_page_size = 5;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("maxPageSize"));
    }
}
