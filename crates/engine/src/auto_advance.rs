//! Auto-advance worker — background progression of the simulated clock.
//!
//! Each real-time tick of `base_tick_ms` advances the simulation by
//! `base_tick_ms / 1000 * time_scale` simulated seconds, executing due
//! events along the way. The worker respects the pause flag and terminates
//! as soon as the engine's generation counter moves (stop/reset/clear or a
//! restart).

use std::sync::Arc;

use parking_lot::Mutex;

use crate::engine::SimulationEngine;

/// Spawn the worker for the engine's current run. Returns the task handle;
/// the worker stops itself, so the handle is rarely needed.
pub fn spawn(engine: Arc<Mutex<SimulationEngine>>, base_tick_ms: u64) -> tokio::task::JoinHandle<()> {
    let base_tick_ms = base_tick_ms.max(10);
    let my_generation = engine.lock().generation();
    tokio::spawn(async move {
        tracing::debug!(base_tick_ms, "auto-advance worker started");
        loop {
            tokio::time::sleep(std::time::Duration::from_millis(base_tick_ms)).await;
            let keep_going = {
                let mut guard = engine.lock();
                if guard.generation() != my_generation || !guard.is_running() {
                    false
                } else {
                    if !guard.is_paused() {
                        let sim_seconds = base_tick_ms as f64 / 1000.0 * guard.time_scale();
                        if let Err(e) = guard.advance(sim_seconds) {
                            tracing::warn!(error = %e, "auto-advance tick failed");
                        }
                    }
                    true
                }
            };
            if !keep_going {
                break;
            }
        }
        tracing::debug!("auto-advance worker stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn worker_advances_while_running() {
        let start = Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap();
        let engine = Arc::new(Mutex::new(SimulationEngine::new(start, None).unwrap()));
        engine.lock().start(true, 1.0).unwrap();

        let handle = spawn(engine.clone(), 10);
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(engine.lock().current_time() > start);

        engine.lock().stop();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn worker_respects_pause() {
        let start = Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap();
        let engine = Arc::new(Mutex::new(SimulationEngine::new(start, None).unwrap()));
        engine.lock().start(true, 1.0).unwrap();
        engine.lock().pause();

        let handle = spawn(engine.clone(), 10);
        tokio::time::sleep(std::time::Duration::from_millis(80)).await;
        assert_eq!(engine.lock().current_time(), start);

        engine.lock().stop();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn worker_stops_on_generation_bump() {
        let start = Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap();
        let engine = Arc::new(Mutex::new(SimulationEngine::new(start, None).unwrap()));
        engine.lock().start(true, 1.0).unwrap();

        let handle = spawn(engine.clone(), 10);
        engine.lock().reset();
        // worker notices the bump on its next tick and exits
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("worker should terminate")
            .unwrap();
    }
}
