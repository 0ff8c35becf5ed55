#![forbid(unsafe_code)]

// Exam monitor load simulator - synthetic students driving an exam server
// over Socket.IO

pub mod catalog;
pub mod config;
pub mod signaling;
pub mod simulation;

pub use config::{IdentityMode, SimulationConfig};
pub use simulation::{Orchestrator, SimulationReport};
