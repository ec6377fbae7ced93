pub mod api;
pub mod error;
pub mod state;
pub mod weather_client;

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use es_domain::config::Config;
use es_engine::SimulationEngine;

use crate::state::AppState;
use crate::weather_client::OpenWeatherClient;

/// Assemble the shared application state from a loaded config.
pub fn build_state(config: Config) -> anyhow::Result<AppState> {
    let start_time = config.simulation.initial_time.unwrap_or_else(Utc::now);
    let engine = SimulationEngine::new(start_time, config.simulation.undo_max_size)?;
    let weather = OpenWeatherClient::new(&config.weather)?;
    Ok(AppState {
        config: Arc::new(config),
        engine: Arc::new(Mutex::new(engine)),
        weather: Arc::new(weather),
    })
}
