use crate::connection::config::ConnectionConfig;
use crate::core::{DbError, Result};
use crate::retry::RetryPolicy;
use crate::stream::DEFAULT_PREFETCH;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Everything the client and the command line read from a config file.
///
/// ```toml
/// [connection]
/// host = "localhost"
/// user = "admin"
/// password = "adminpass"
/// database = "querykit"
///
/// [retry]
/// max_attempts = 3
/// retry_delay_seconds = 1.0
///
/// [stream]
/// batch_size = 100
/// page_size = 100
/// ```
///
/// Missing sections and keys take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub connection: ConnectionConfig,
    pub retry: RetryPolicy,
    pub stream: StreamSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub batch_size: usize,
    pub page_size: usize,
    /// Rows fetched per round trip in row mode
    pub prefetch: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            page_size: 100,
            prefetch: DEFAULT_PREFETCH,
        }
    }
}

impl Settings {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| DbError::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        self.connection.validate().map_err(DbError::Config)?;

        let stream = &self.stream;
        if stream.batch_size == 0 || stream.page_size == 0 || stream.prefetch == 0 {
            return Err(DbError::Config(
                "stream batch_size, page_size and prefetch must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| DbError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_missing_sections_take_defaults() {
        let settings = Settings::from_toml_str("[retry]\nmax_attempts = 5\n").unwrap();
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.retry.delay, Duration::from_secs(1));
        assert_eq!(settings.connection, ConnectionConfig::default());
        assert_eq!(settings.stream, StreamSettings::default());
    }

    #[test]
    fn test_round_trip() {
        let mut settings = Settings::default();
        settings.connection.database = "reports".into();
        settings.stream.page_size = 25;

        let text = settings.to_toml_string().unwrap();
        assert_eq!(Settings::from_toml_str(&text).unwrap(), settings);
    }

    #[test]
    fn test_zero_sizes_rejected() {
        let err = Settings::from_toml_str("[stream]\nbatch_size = 0\n").unwrap_err();
        assert!(matches!(err, DbError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("querykit.toml");
        std::fs::write(&path, "[connection]\nhost = \"db.local\"\nport = 3307\n").unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.connection.host, "db.local");
        assert_eq!(settings.connection.port, 3307);
        assert_eq!(settings.connection.user, "admin");
    }
}
