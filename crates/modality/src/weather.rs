//! Weather modality — OpenWeather-shaped reports keyed by coordinates.
//!
//! Coordinates are rounded to 2 decimal places (~1 km) to form the storage
//! key, so nearby queries hit the same report. Reports are stored in
//! standard units (Kelvin, m/s) and converted on query.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use es_domain::{Error, Result};

use crate::{
    parse_input, undo_action, undo_field, undo_object, undo_str, unknown_undo_action,
    ModalityState, StateMeta,
};

pub const MODALITY: &str = "weather";

const ACTION_REMOVE_LOCATION: &str = "remove_location";
const ACTION_RESTORE_REPORT: &str = "restore_report";

/// m/s -> mph
const MPH_PER_MPS: f64 = 2.23694;

/// Storage key for a coordinate pair, rounded to ~1 km precision.
pub fn location_key(latitude: f64, longitude: f64) -> String {
    format!("{latitude:.2},{longitude:.2}")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Serialize, Deserialize)]
struct WeatherInput {
    latitude: f64,
    longitude: f64,
    /// Full report in OpenWeather One Call shape, standard units.
    report: Value,
}

fn validate_coordinates(latitude: f64, longitude: f64) -> Result<()> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(Error::validation(format!(
            "latitude {latitude} out of range [-90, 90]"
        )));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(Error::validation(format!(
            "longitude {longitude} out of range [-180, 180]"
        )));
    }
    Ok(())
}

fn validate_report(report: &Value) -> Result<()> {
    let map = report
        .as_object()
        .ok_or_else(|| Error::validation("report must be an object"))?;
    let current = map
        .get("current")
        .and_then(Value::as_object)
        .ok_or_else(|| Error::validation("report must contain a 'current' object"))?;
    if !current.get("temp").map_or(false, Value::is_number) {
        return Err(Error::validation("report 'current.temp' must be a number"));
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Query & unit conversion
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    #[default]
    Standard,
    Metric,
    Imperial,
}

#[derive(Debug, Deserialize)]
pub struct WeatherQuery {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub units: Units,
    /// Route a live lookup through the outbound OpenWeather client
    /// instead of simulated state. Handled by the API layer.
    #[serde(default)]
    pub real: bool,
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn kelvin_to(units: Units, kelvin: f64) -> f64 {
    match units {
        Units::Standard => kelvin,
        Units::Metric => round2(kelvin - 273.15),
        Units::Imperial => round2((kelvin - 273.15) * 9.0 / 5.0 + 32.0),
    }
}

fn wind_to(units: Units, mps: f64) -> f64 {
    match units {
        Units::Standard | Units::Metric => mps,
        Units::Imperial => round2(mps * MPH_PER_MPS),
    }
}

fn convert_number(value: &mut Value, f: impl Fn(f64) -> f64) {
    if let Some(x) = value.as_f64() {
        *value = json!(f(x));
    }
}

/// Convert the scalar temperature and wind fields of a `current`/`hourly`
/// block in place.
fn convert_block(block: &mut Value, units: Units) {
    let Some(map) = block.as_object_mut() else { return };
    for key in ["temp", "feels_like", "dew_point"] {
        if let Some(value) = map.get_mut(key) {
            convert_number(value, |k| kelvin_to(units, k));
        }
    }
    for key in ["wind_speed", "wind_gust"] {
        if let Some(value) = map.get_mut(key) {
            convert_number(value, |w| wind_to(units, w));
        }
    }
}

/// Daily blocks nest temperatures one level deeper.
fn convert_daily_block(block: &mut Value, units: Units) {
    let Some(map) = block.as_object_mut() else { return };
    for key in ["temp", "feels_like"] {
        if let Some(nested) = map.get_mut(key).and_then(Value::as_object_mut) {
            for value in nested.values_mut() {
                convert_number(value, |k| kelvin_to(units, k));
            }
        }
    }
    if let Some(value) = map.get_mut("dew_point") {
        convert_number(value, |k| kelvin_to(units, k));
    }
    for key in ["wind_speed", "wind_gust"] {
        if let Some(value) = map.get_mut(key) {
            convert_number(value, |w| wind_to(units, w));
        }
    }
}

/// Convert a stored report (standard units) into the requested units.
pub fn convert_report(report: &Value, units: Units) -> Value {
    let mut converted = report.clone();
    if units == Units::Standard {
        return converted;
    }
    if let Some(map) = converted.as_object_mut() {
        if let Some(current) = map.get_mut("current") {
            convert_block(current, units);
        }
        if let Some(hourly) = map.get_mut("hourly").and_then(Value::as_array_mut) {
            for block in hourly {
                convert_block(block, units);
            }
        }
        if let Some(daily) = map.get_mut("daily").and_then(Value::as_array_mut) {
            for block in daily {
                convert_daily_block(block, units);
            }
        }
    }
    converted
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default)]
pub struct WeatherState {
    meta: StateMeta,
    reports: BTreeMap<String, Value>,
}

impl WeatherState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report_at(&self, latitude: f64, longitude: f64) -> Option<&Value> {
        self.reports.get(&location_key(latitude, longitude))
    }
}

impl ModalityState for WeatherState {
    fn modality_type(&self) -> &'static str {
        MODALITY
    }

    fn update_count(&self) -> u64 {
        self.meta.update_count
    }

    fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.meta.last_updated
    }

    fn prepare_input(&self, input: &Value) -> Result<Value> {
        let parsed: WeatherInput = parse_input(input)?;
        validate_coordinates(parsed.latitude, parsed.longitude)?;
        validate_report(&parsed.report)?;
        Ok(serde_json::to_value(parsed)?)
    }

    fn apply(&mut self, input: &Value, at: DateTime<Utc>) -> Result<()> {
        let parsed: WeatherInput = parse_input(input)?;
        validate_coordinates(parsed.latitude, parsed.longitude)?;
        validate_report(&parsed.report)?;
        let key = location_key(parsed.latitude, parsed.longitude);
        self.reports.insert(key, parsed.report);
        self.meta.bump(at);
        Ok(())
    }

    fn create_undo_data(&self, input: &Value) -> Result<Value> {
        let parsed: WeatherInput = parse_input(input)?;
        let key = location_key(parsed.latitude, parsed.longitude);
        let mut undo = match self.reports.get(&key) {
            Some(existing) => {
                let mut undo = self.meta.undo_base(ACTION_RESTORE_REPORT);
                undo.insert("report".into(), existing.clone());
                undo
            }
            None => self.meta.undo_base(ACTION_REMOVE_LOCATION),
        };
        undo.insert("location_key".into(), Value::String(key));
        Ok(Value::Object(undo))
    }

    fn apply_undo(&mut self, undo_data: &Value) -> Result<()> {
        let undo = undo_object(undo_data)?;
        match undo_action(undo)? {
            ACTION_REMOVE_LOCATION => {
                let key = undo_str(undo, "location_key")?;
                if self.reports.remove(key).is_none() {
                    return Err(Error::inconsistent(format!(
                        "cannot remove weather location '{key}': not present"
                    )));
                }
            }
            ACTION_RESTORE_REPORT => {
                let key = undo_str(undo, "location_key")?.to_string();
                let report: Value = undo_field(undo, "report")?;
                if !self.reports.contains_key(&key) {
                    return Err(Error::inconsistent(format!(
                        "cannot restore weather location '{key}': not present"
                    )));
                }
                self.reports.insert(key, report);
            }
            crate::ACTION_NOOP => {}
            action => return Err(unknown_undo_action(MODALITY, action)),
        }
        self.meta.restore(undo)
    }

    fn query(&self, params: &Value) -> Result<Value> {
        if params.is_null() || !params.is_object() {
            return Err(Error::validation("weather query requires 'lat' and 'lon'"));
        }
        let q: WeatherQuery = serde_json::from_value(params.clone())
            .map_err(|e| Error::validation(format!("weather query requires 'lat' and 'lon': {e}")))?;
        validate_coordinates(q.lat, q.lon)?;
        let reports: Vec<Value> = self
            .report_at(q.lat, q.lon)
            .map(|r| convert_report(r, q.units))
            .into_iter()
            .collect();
        let count = reports.len();
        Ok(json!({
            "reports": reports,
            "count": count,
            "total_count": count,
            "units": q.units,
        }))
    }

    fn snapshot(&self) -> Value {
        json!({
            "modality_type": MODALITY,
            "update_count": self.meta.update_count,
            "last_updated": self.meta.last_updated,
            "reports": self.reports,
            "location_count": self.reports.len(),
        })
    }

    fn state_summary(&self) -> Value {
        json!({
            "location_count": self.reports.len(),
            "locations": self.reports.keys().collect::<Vec<_>>(),
        })
    }

    fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for (key, report) in &self.reports {
            if validate_report(report).is_err() {
                errors.push(format!("report '{key}' is missing current conditions"));
            }
            let mut parts = key.splitn(2, ',');
            let lat = parts.next().and_then(|p| p.parse::<f64>().ok());
            let lon = parts.next().and_then(|p| p.parse::<f64>().ok());
            match (lat, lon) {
                (Some(lat), Some(lon)) if validate_coordinates(lat, lon).is_ok() => {}
                _ => errors.push(format!("malformed location key '{key}'")),
            }
        }
        errors
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}
