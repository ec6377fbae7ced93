use std::sync::Arc;

use parking_lot::Mutex;

use es_domain::config::Config;
use es_engine::SimulationEngine;

use crate::weather_client::OpenWeatherClient;

/// Shared application state passed to all API handlers.
///
/// The engine sits behind one coarse mutex: every operation — scheduling,
/// time control, queries — takes the lock for its full duration, so
/// observable state changes are atomic and readers never see a partially
/// applied event.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: Arc<Mutex<SimulationEngine>>,
    /// Outbound OpenWeather client for `real=true` weather queries.
    pub weather: Arc<OpenWeatherClient>,
}
