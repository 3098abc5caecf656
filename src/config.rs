//! Application-level configuration loading: timings, retry limits and collaborator backends.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "CROWDTUNE_BACK_CONFIG_PATH";

/// Which tree store backend the server runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Couch,
}

/// Which streaming provider drives playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackBackend {
    Spotify,
    Simulated,
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// How long an ended session or quiz stays readable before it is removed.
    pub removal_delay: Duration,
    /// Remaining playback time under which the next queued track is handed to the player.
    pub ending_buffer: Duration,
    /// Attempts a single-path atomic update gets before reporting a conflict.
    pub transaction_max_retries: usize,
    /// Number of track ids kept per quiz participant.
    pub quiz_track_sample: usize,
    pub store: StoreBackend,
    pub playback: PlaybackBackend,
    pub spotify_api_base_url: String,
    pub simulated_devices: Vec<(String, String)>,
    pub simulated_track_duration: Duration,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        store = ?app_config.store,
                        playback = ?app_config.playback,
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Interval of the playback monitor: half the ending buffer, so a track is seen at least
    /// once inside its final window.
    pub fn monitor_poll_interval(&self) -> Duration {
        (self.ending_buffer / 2).max(Duration::from_millis(10))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    removal_delay_ms: u64,
    ending_buffer_ms: u64,
    transaction_max_retries: usize,
    quiz_track_sample: usize,
    store: StoreBackend,
    playback: PlaybackBackend,
    spotify_api_base_url: String,
    simulated_devices: Vec<RawDevice>,
    simulated_track_duration_ms: u64,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            removal_delay_ms: 2_000,
            ending_buffer_ms: 10_000,
            transaction_max_retries: 25,
            quiz_track_sample: 5,
            store: StoreBackend::Memory,
            playback: PlaybackBackend::Simulated,
            spotify_api_base_url: "https://api.spotify.com".into(),
            simulated_devices: vec![RawDevice {
                id: "simulated-speaker".into(),
                name: "Simulated Speaker".into(),
            }],
            simulated_track_duration_ms: 180_000,
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of a simulated playback device.
struct RawDevice {
    id: String,
    name: String,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            removal_delay: Duration::from_millis(value.removal_delay_ms),
            ending_buffer: Duration::from_millis(value.ending_buffer_ms),
            transaction_max_retries: value.transaction_max_retries.max(1),
            quiz_track_sample: value.quiz_track_sample.max(1),
            store: value.store,
            playback: value.playback,
            spotify_api_base_url: value.spotify_api_base_url,
            simulated_devices: value
                .simulated_devices
                .into_iter()
                .map(|device| (device.id, device.name))
                .collect(),
            simulated_track_duration: Duration::from_millis(value.simulated_track_duration_ms),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let raw: RawConfig =
            serde_json::from_str(r#"{"ending_buffer_ms": 4000, "store": "couch"}"#).unwrap();
        let config = AppConfig::from(raw);

        assert_eq!(config.ending_buffer, Duration::from_secs(4));
        assert_eq!(config.monitor_poll_interval(), Duration::from_secs(2));
        assert_eq!(config.store, StoreBackend::Couch);
        assert_eq!(config.removal_delay, Duration::from_secs(2));
        assert_eq!(config.playback, PlaybackBackend::Simulated);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(serde_json::from_str::<RawConfig>(r#"{"playback": "cassette"}"#).is_err());
    }
}
