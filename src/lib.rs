//! Padlink Session Server Library
//!
//! A TCP session-lifecycle controller for couch multiplayer: phones (or any
//! TCP client) connect as controllers, the server tracks the population
//! against configured min/max thresholds, drives the session state machine
//! by broadcasting control messages, and forwards raw player input to an
//! external game engine through the [`engine::GameEngine`] facade.

pub mod config;
pub mod engine;
pub mod metrics;
pub mod net;
