//! Outbound OpenWeather One Call client, used only when a weather query
//! asks for `real=true`.
//!
//! The API key is read from `OPENWEATHER_API_KEY` at call time — a missing
//! key is a validation error on the request, not a startup failure.

use reqwest::Client;
use serde_json::Value;

use es_domain::config::WeatherConfig;
use es_domain::{Error, Result};

#[derive(Debug, Clone)]
pub struct OpenWeatherClient {
    http: Client,
    base_url: String,
}

impl OpenWeatherClient {
    pub fn new(cfg: &WeatherConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| Error::External(e.to_string()))?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
        })
    }

    /// Fetch current conditions for a coordinate pair, in standard units
    /// (the caller converts, exactly as for simulated reports).
    pub async fn fetch_report(&self, lat: f64, lon: f64) -> Result<Value> {
        let api_key = WeatherConfig::api_key().ok_or_else(|| {
            Error::validation("real weather queries require OPENWEATHER_API_KEY to be set")
        })?;
        let response = self
            .http
            .get(&self.base_url)
            .query(&[
                ("lat", lat.to_string()),
                ("lon", lon.to_string()),
                ("appid", api_key),
                ("units", "standard".to_string()),
            ])
            .send()
            .await
            .map_err(|e| Error::External(format!("weather API request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::External(format!(
                "weather API returned {status}: {body}"
            )));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| Error::External(format!("weather API returned invalid JSON: {e}")))
    }
}
