//! Simulation engine: the event queue, undo stack, environment container,
//! and the scheduler that drives them against the simulated clock.

pub mod auto_advance;
pub mod engine;
pub mod environment;
pub mod queue;
pub mod undo;

pub use engine::SimulationEngine;
pub use environment::Environment;
pub use queue::EventQueue;
pub use undo::{UndoEntry, UndoStack};
