//! Environment — the simulated clock plus the registry of modality states.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use es_domain::clock::SimClock;
use es_modality::{default_modalities, ModalityState};

use crate::queue::EventQueue;

pub struct Environment {
    clock: SimClock,
    states: BTreeMap<String, Box<dyn ModalityState>>,
}

impl Environment {
    /// Build an environment with the full default modality registry.
    pub fn new(start_time: DateTime<Utc>) -> Self {
        let mut states: BTreeMap<String, Box<dyn ModalityState>> = BTreeMap::new();
        for state in default_modalities() {
            states.insert(state.modality_type().to_string(), state);
        }
        Self {
            clock: SimClock::new(start_time),
            states,
        }
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut SimClock {
        &mut self.clock
    }

    pub fn contains(&self, name: &str) -> bool {
        self.states.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&dyn ModalityState> {
        self.states.get(name).map(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut dyn ModalityState> {
        match self.states.get_mut(name) {
            Some(state) => Some(state.as_mut()),
            None => None,
        }
    }

    pub fn modality_names(&self) -> Vec<String> {
        self.states.keys().cloned().collect()
    }

    pub fn modality_count(&self) -> usize {
        self.states.len()
    }

    /// Name -> full snapshot for every registered modality.
    pub fn snapshots(&self) -> Value {
        let map: serde_json::Map<String, Value> = self
            .states
            .iter()
            .map(|(name, state)| (name.clone(), state.snapshot()))
            .collect();
        Value::Object(map)
    }

    /// Compact per-modality overview used by `GET /environment/state`.
    pub fn summaries(&self) -> Vec<Value> {
        self.states
            .values()
            .map(|state| {
                json!({
                    "modality_type": state.modality_type(),
                    "state_summary": state.state_summary(),
                })
            })
            .collect()
    }

    /// Reset every modality to its initial empty form; returns how many
    /// were reset.
    pub fn reset_all(&mut self) -> usize {
        for state in self.states.values_mut() {
            state.reset();
        }
        self.states.len()
    }

    /// Cross-validate the environment: per-modality consistency, clock
    /// sanity, and queue references to unregistered modalities.
    pub fn validate(&self, queue: &EventQueue) -> Vec<String> {
        let mut errors = Vec::new();
        if self.states.is_empty() {
            errors.push("Environment: no modalities registered".to_string());
        }
        for error in self.clock.validate() {
            errors.push(format!("time_state: {error}"));
        }
        for (name, state) in &self.states {
            for error in state.validate() {
                errors.push(format!("modality '{name}': {error}"));
            }
        }
        for modality in queue.modality_names_in_use() {
            if !self.states.contains_key(&modality) {
                errors.push(format!(
                    "EventQueue: events reference unregistered modality '{modality}'"
                ));
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use es_domain::event::{EventRequest, SimEvent};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap()
    }

    #[test]
    fn registry_contains_all_seven_modalities() {
        let env = Environment::new(t0());
        assert_eq!(
            env.modality_names(),
            vec!["calendar", "chat", "email", "location", "sms", "time", "weather"]
        );
        assert!(env.get("email").is_some());
        assert!(env.get("nonexistent").is_none());
    }

    #[test]
    fn fresh_environment_validates_clean() {
        let env = Environment::new(t0());
        let queue = EventQueue::new();
        assert!(env.validate(&queue).is_empty());
    }

    #[test]
    fn validation_flags_unregistered_modality_events() {
        let env = Environment::new(t0());
        let mut queue = EventQueue::new();
        let event = SimEvent::from_request(
            EventRequest {
                scheduled_time: t0() + chrono::Duration::seconds(60),
                modality: "telepathy".into(),
                data: serde_json::json!({}),
                priority: 50,
                metadata: Default::default(),
                agent_id: None,
            },
            t0(),
        );
        queue.insert(event, t0()).unwrap();
        let errors = env.validate(&queue);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("EventQueue:"));
        assert!(errors[0].contains("telepathy"));
    }

    #[test]
    fn reset_all_clears_every_modality() {
        let mut env = Environment::new(t0());
        let payload = env
            .get("chat")
            .unwrap()
            .prepare_input(&serde_json::json!({
                "operation": "send_message",
                "role": "user",
                "content": "hello",
            }))
            .unwrap();
        env.get_mut("chat").unwrap().apply(&payload, t0()).unwrap();
        assert_eq!(env.get("chat").unwrap().update_count(), 1);

        assert_eq!(env.reset_all(), 7);
        assert_eq!(env.get("chat").unwrap().update_count(), 0);
    }

    #[test]
    fn snapshots_are_keyed_by_name() {
        let env = Environment::new(t0());
        let snaps = env.snapshots();
        assert_eq!(snaps["email"]["modality_type"], "email");
        assert_eq!(snaps["weather"]["modality_type"], "weather");
        assert_eq!(snaps.as_object().unwrap().len(), 7);
    }
}
