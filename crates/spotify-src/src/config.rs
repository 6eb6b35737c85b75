//! Element settings: defaults from the environment, optional TOML overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::queue::DEFAULT_MAX_BYTES;
use crate::session::SessionOptions;
use crate::uri::SpotifyUri;

pub const ENV_USER: &str = "SPOTIFY_USER";
pub const ENV_PASS: &str = "SPOTIFY_PASS";
pub const ENV_APPKEY: &str = "SPOTIFY_APPKEY";

pub const DEFAULT_USER_AGENT: &str = "spotify-src";
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Settable element properties.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceSettings {
    /// Account user name.
    pub user: Option<String>,
    /// Account password.
    pub pass: Option<String>,
    /// Path to the application key blob.
    pub appkey_file: Option<PathBuf>,
    /// Track URI.
    pub uri: SpotifyUri,
    /// Frame queue capacity in bytes (`0` = unbounded).
    pub max_bytes: u64,
    pub cache_location: PathBuf,
    pub settings_location: PathBuf,
    pub user_agent: String,
    pub login_timeout: Duration,
    pub load_timeout: Duration,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self::from_env()
    }
}

impl SourceSettings {
    /// Defaults with credentials taken from `SPOTIFY_USER`, `SPOTIFY_PASS` and
    /// `SPOTIFY_APPKEY`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults with credentials resolved through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let tmp = std::env::temp_dir();
        Self {
            user: non_empty(ENV_USER),
            pass: non_empty(ENV_PASS),
            appkey_file: non_empty(ENV_APPKEY).map(PathBuf::from),
            uri: SpotifyUri::default(),
            max_bytes: DEFAULT_MAX_BYTES,
            cache_location: tmp.clone(),
            settings_location: tmp,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            login_timeout: DEFAULT_LOGIN_TIMEOUT,
            load_timeout: DEFAULT_LOAD_TIMEOUT,
        }
    }

    /// Overlay the values present in `file`.
    pub fn apply_file(&mut self, file: &SourceConfigFile) -> Result<()> {
        if let Some(user) = &file.user {
            self.user = Some(user.clone());
        }
        if let Some(pass) = &file.pass {
            self.pass = Some(pass.clone());
        }
        if let Some(path) = &file.appkey_file {
            self.appkey_file = Some(path.clone());
        }
        if let Some(uri) = &file.uri {
            self.uri = SpotifyUri::parse(uri).with_context(|| format!("parse uri {uri}"))?;
        }
        if let Some(max_bytes) = file.max_bytes {
            self.max_bytes = max_bytes;
        }
        if let Some(dir) = &file.cache_location {
            self.cache_location = dir.clone();
        }
        if let Some(dir) = &file.settings_location {
            self.settings_location = dir.clone();
        }
        if let Some(agent) = &file.user_agent {
            self.user_agent = agent.clone();
        }
        if let Some(ms) = file.login_timeout_ms {
            self.login_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = file.load_timeout_ms {
            self.load_timeout = Duration::from_millis(ms);
        }
        Ok(())
    }

    /// Session options, or `None` when no application key file is configured.
    pub fn session_options(&self) -> Option<SessionOptions> {
        let appkey_file = self.appkey_file.clone()?;
        Some(SessionOptions {
            appkey_file,
            cache_location: self.cache_location.clone(),
            settings_location: self.settings_location.clone(),
            user_agent: self.user_agent.clone(),
            login_timeout: self.login_timeout,
            load_timeout: self.load_timeout,
        })
    }
}

/// Element configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct SourceConfigFile {
    /// Account user name.
    pub user: Option<String>,
    /// Account password.
    pub pass: Option<String>,
    /// Path to the application key blob.
    pub appkey_file: Option<PathBuf>,
    /// `spotify://` URI of the track to play.
    pub uri: Option<String>,
    /// Frame queue capacity in bytes.
    pub max_bytes: Option<u64>,
    /// Client cache directory.
    pub cache_location: Option<PathBuf>,
    /// Client settings directory.
    pub settings_location: Option<PathBuf>,
    /// User agent reported to the service.
    pub user_agent: Option<String>,
    /// Login timeout in milliseconds.
    pub login_timeout_ms: Option<u64>,
    /// Track metadata timeout in milliseconds.
    pub load_timeout_ms: Option<u64>,
}

impl SourceConfigFile {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<SourceConfigFile>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::temp_file_with;
    use crate::uri::DEFAULT_URI;

    #[test]
    fn defaults_come_from_lookup() {
        let settings = SourceSettings::from_lookup(|key| match key {
            ENV_USER => Some("alice".to_string()),
            ENV_PASS => Some("secret".to_string()),
            ENV_APPKEY => Some("/etc/spotify/appkey.key".to_string()),
            _ => None,
        });
        assert_eq!(settings.user.as_deref(), Some("alice"));
        assert_eq!(settings.pass.as_deref(), Some("secret"));
        assert_eq!(
            settings.appkey_file,
            Some(PathBuf::from("/etc/spotify/appkey.key"))
        );
        assert_eq!(settings.uri.as_str(), DEFAULT_URI);
        assert_eq!(settings.max_bytes, DEFAULT_MAX_BYTES);
    }

    #[test]
    fn blank_environment_values_are_ignored() {
        let settings = SourceSettings::from_lookup(|_| Some("  ".to_string()));
        assert!(settings.user.is_none());
        assert!(settings.appkey_file.is_none());
        assert!(settings.session_options().is_none());
    }

    #[test]
    fn file_overrides_defaults() {
        let path = temp_file_with(
            "config.toml",
            br#"
user = "bob"
appkey_file = "/keys/app.key"
uri = "spotify://spotify:track:0000000000000000000000"
max_bytes = 4096
login_timeout_ms = 1500
"#,
        )
        .unwrap();
        let file = SourceConfigFile::load(&path).unwrap();
        let mut settings = SourceSettings::from_lookup(|_| None);
        settings.apply_file(&file).unwrap();

        assert_eq!(settings.user.as_deref(), Some("bob"));
        assert_eq!(settings.max_bytes, 4096);
        assert_eq!(settings.uri.location(), "spotify:track:0000000000000000000000");
        let opts = settings.session_options().unwrap();
        assert_eq!(opts.appkey_file, PathBuf::from("/keys/app.key"));
        assert_eq!(opts.login_timeout, Duration::from_millis(1500));
        assert_eq!(opts.load_timeout, DEFAULT_LOAD_TIMEOUT);
    }

    #[test]
    fn file_with_bad_uri_is_rejected() {
        let file = SourceConfigFile {
            uri: Some("http://example.com".to_string()),
            ..SourceConfigFile::default()
        };
        let mut settings = SourceSettings::from_lookup(|_| None);
        assert!(settings.apply_file(&file).is_err());
        assert_eq!(settings.uri.as_str(), DEFAULT_URI);
    }

    #[test]
    fn load_reports_missing_file() {
        let err = SourceConfigFile::load(Path::new("/nonexistent/spotify-src.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("read config"));
    }
}
