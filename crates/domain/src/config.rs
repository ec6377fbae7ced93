use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub weather: WeatherConfig,
}

impl Config {
    /// Load from a TOML file; fall back to defaults when the file is absent
    /// or malformed.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(raw) => match toml::from_str(&raw) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "invalid config file, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::warn!(path = %path.display(), "config file not found, using defaults");
                Self::default()
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Simulation engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Maximum undo/redo history. `None` = unbounded.
    #[serde(default = "d_undo_max")]
    pub undo_max_size: Option<usize>,
    /// Real-time interval between auto-advance ticks, in milliseconds.
    /// Each tick advances `base_tick_ms / 1000 * time_scale` simulated
    /// seconds.
    #[serde(default = "d_tick_ms")]
    pub base_tick_ms: u64,
    /// Simulated instant the clock starts at. `None` = wall-clock now.
    #[serde(default)]
    pub initial_time: Option<DateTime<Utc>>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            undo_max_size: d_undo_max(),
            base_tick_ms: d_tick_ms(),
            initial_time: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outbound weather API
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    #[serde(default = "d_weather_url")]
    pub base_url: String,
    #[serde(default = "d_weather_timeout")]
    pub timeout_ms: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            base_url: d_weather_url(),
            timeout_ms: d_weather_timeout(),
        }
    }
}

impl WeatherConfig {
    /// The API key is deliberately not part of the config file.
    pub fn api_key() -> Option<String> {
        std::env::var("OPENWEATHER_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

fn d_host() -> String {
    "0.0.0.0".to_string()
}
fn d_port() -> u16 {
    8000
}
fn d_undo_max() -> Option<usize> {
    Some(100)
}
fn d_tick_ms() -> u64 {
    100
}
fn d_weather_url() -> String {
    "https://api.openweathermap.org/data/3.0/onecall".to_string()
}
fn d_weather_timeout() -> u64 {
    10_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.simulation.undo_max_size, Some(100));
        assert_eq!(config.simulation.base_tick_ms, 100);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 9001

            [simulation]
            base_tick_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9001);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.simulation.base_tick_ms, 250);
        assert_eq!(config.simulation.undo_max_size, Some(100));
    }

    #[test]
    fn initial_time_parses_iso8601() {
        let config: Config = toml::from_str(
            r#"
            [simulation]
            initial_time = "2025-01-15T10:00:00Z"
            "#,
        )
        .unwrap();
        assert!(config.simulation.initial_time.is_some());
    }
}
