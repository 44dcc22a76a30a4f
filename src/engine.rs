//! Game engine facade
//!
//! The session controller does not run the game itself; it drives an external
//! engine through this trait. Hook implementations are expected to return
//! quickly relative to the control loop's cadence.

use crate::net::session::PlayerId;

/// Hooks the session controller invokes on the external game engine.
pub trait GameEngine: Send {
    /// A player joined the session.
    fn add_player(&mut self, id: &PlayerId);

    /// A player left the session.
    fn remove_player(&mut self, id: &PlayerId);

    /// Enough players are connected for the first time; the game begins.
    fn start(&mut self);

    /// The population dropped below the minimum; the game pauses.
    fn pause(&mut self);

    /// The population recovered to the minimum; the game resumes.
    fn resume(&mut self);

    /// Raw input bytes arrived from a player. The payload is opaque to the
    /// controller; the engine decides what it means.
    fn input(&mut self, id: &PlayerId, payload: &[u8]);
}

/// Engine implementation that only logs the hook calls.
///
/// Used by the standalone binary, where the real engine lives in another
/// process and consumes the forwarded events out of band.
#[derive(Debug, Default)]
pub struct LogEngine;

impl GameEngine for LogEngine {
    fn add_player(&mut self, id: &PlayerId) {
        tracing::info!("Engine: player {} joined", id);
    }

    fn remove_player(&mut self, id: &PlayerId) {
        tracing::info!("Engine: player {} left", id);
    }

    fn start(&mut self) {
        tracing::info!("Engine: game started");
    }

    fn pause(&mut self) {
        tracing::info!("Engine: game paused");
    }

    fn resume(&mut self) {
        tracing::info!("Engine: game resumed");
    }

    fn input(&mut self, id: &PlayerId, payload: &[u8]) {
        tracing::debug!("Engine: {} bytes of input from {}", payload.len(), id);
    }
}
