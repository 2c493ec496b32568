use serde::Deserialize;
use std::time::Duration;

pub(crate) const DEFAULT_VERSION_TABLE_NAME: &str = "schema_migrations";
pub(crate) const DEFAULT_BATCH_SIZE: usize = 250;

/// Tuning knobs for a [Migrator](crate::Migrator) run.
///
/// Every field has a default, so a partial document deserializes fine:
///
/// ```
/// use migrastep::MigratorSettings;
///
/// let settings: MigratorSettings = serde_json::from_str(r#"{ "batch_size": 1000 }"#).unwrap();
/// assert_eq!(settings.batch_size, 1000);
/// assert_eq!(settings.version_table, "schema_migrations");
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MigratorSettings {
    /// Name of the table recording applied step versions.
    pub version_table: String,
    /// Number of executed writes between two commits of a mass update.
    pub batch_size: usize,
    /// Seconds between two progress log lines of a long-running mass update.
    pub progress_interval_secs: u64,
    /// Seconds SQLite waits on a locked database before giving up.
    pub busy_timeout_secs: u64,
}

impl Default for MigratorSettings {
    fn default() -> Self {
        Self {
            version_table: DEFAULT_VERSION_TABLE_NAME.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            progress_interval_secs: 60,
            busy_timeout_secs: 30,
        }
    }
}

impl MigratorSettings {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_timeout_secs)
    }

    /// Batch size actually used by the engine; zero is treated as one.
    pub(crate) fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }
}
