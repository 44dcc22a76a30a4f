//! Session state machine
//!
//! Owns the player roster and the min/max population thresholds, and drives
//! the session lifecycle (NotStarted → Waiting → Running → Paused → Stopped)
//! as players come and go. All mutation happens from the server's control
//! loop, so no locking is needed here.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::engine::GameEngine;
use crate::metrics::Metrics;
use crate::net::framing;
use crate::net::protocol::ControlMessage;

/// Handle for one live connection, assigned at accept time.
///
/// The roster key. A fresh handle is issued for every accepted connection, so
/// a reconnecting peer never aliases a stale entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(u64);

impl ConnId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Player identity derived from the peer address: `"@" + port`.
///
/// Unique among live connections (a listener cannot hold two open connections
/// from the same peer port) but not across the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlayerId(String);

impl PlayerId {
    pub fn from_addr(addr: &SocketAddr) -> Self {
        Self(format!("@{}", addr.port()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No player has ever connected.
    NotStarted,
    /// Below the minimum population; waiting for more players.
    Waiting,
    /// At or above the minimum; the game is in progress.
    Running,
    /// The population dropped below the minimum after a start.
    Paused,
    /// Shut down; terminal.
    Stopped,
}

/// A connected player's identity and stream writer
struct PlayerConnection<W> {
    id: PlayerId,
    writer: W,
}

/// The session: roster, thresholds, and lifecycle state.
///
/// Generic over the writer type so tests can drive it with in-memory duplex
/// streams; the server instantiates it with TCP write halves.
pub struct Session<E, W> {
    engine: E,
    roster: HashMap<ConnId, PlayerConnection<W>>,
    min_players: usize,
    max_players: usize,
    /// True once the session has been Running at least once; never reset.
    started: bool,
    state: SessionState,
    metrics: Arc<Metrics>,
}

impl<E, W> Session<E, W>
where
    E: GameEngine,
    W: AsyncWrite + Unpin,
{
    pub fn new(engine: E, min_players: usize, max_players: usize, metrics: Arc<Metrics>) -> Self {
        debug_assert!(min_players > 0 && min_players <= max_players);
        Self {
            engine,
            roster: HashMap::new(),
            min_players,
            max_players,
            started: false,
            state: SessionState::NotStarted,
            metrics,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn player_count(&self) -> usize {
        self.roster.len()
    }

    pub fn is_full(&self) -> bool {
        self.roster.len() >= self.max_players
    }

    pub fn player_id(&self, conn: ConnId) -> Option<&PlayerId> {
        self.roster.get(&conn).map(|p| &p.id)
    }

    /// Register an accepted connection and run the population-threshold
    /// transition. The caller must have checked `is_full()` first.
    pub async fn register(&mut self, conn: ConnId, peer: SocketAddr, writer: W) -> PlayerId {
        let id = PlayerId::from_addr(&peer);
        info!("Player {} joined from {} ({})", id, peer, conn);

        self.roster.insert(
            conn,
            PlayerConnection {
                id: id.clone(),
                writer,
            },
        );
        self.metrics
            .players_connected
            .store(self.roster.len() as u64, Ordering::Relaxed);
        self.engine.add_player(&id);

        let count = self.roster.len();
        if count == self.min_players {
            if !self.started {
                // First time the session fills up: the game begins.
                self.started = true;
                self.state = SessionState::Running;
                info!("Session running with {} players", count);
                self.broadcast(ControlMessage::StartGame).await;
                self.engine.start();
            } else {
                // The session was paused; the returning player unblocks it.
                self.state = SessionState::Running;
                info!("Session resumed with {} players", count);
                self.broadcast(ControlMessage::ResumeGame).await;
                self.engine.resume();
            }
        } else if count < self.min_players {
            self.state = SessionState::Waiting;
            self.send_to(conn, ControlMessage::WaitForPlayer).await;
        } else {
            // Above the minimum: the others are already playing, only the
            // newcomer needs the go-ahead.
            self.send_to(conn, ControlMessage::StartGame).await;
        }

        id
    }

    /// Remove a disconnected player and pause the session if the population
    /// fell below the minimum.
    pub async fn remove(&mut self, conn: ConnId) {
        let Some(player) = self.roster.remove(&conn) else {
            debug!("Remove for unknown {} ignored", conn);
            return;
        };
        info!("Player {} left ({})", player.id, conn);
        self.metrics
            .players_connected
            .store(self.roster.len() as u64, Ordering::Relaxed);
        self.engine.remove_player(&player.id);

        if self.started && self.roster.len() < self.min_players {
            match self.state {
                SessionState::Running => {
                    self.state = SessionState::Paused;
                    info!(
                        "Session paused: {} of {} required players",
                        self.roster.len(),
                        self.min_players
                    );
                    self.broadcast(ControlMessage::PauseGame).await;
                    self.engine.pause();
                }
                SessionState::Paused => {
                    // Already paused; the remaining players hear it again.
                    self.broadcast(ControlMessage::PauseGame).await;
                }
                _ => {}
            }
        }
    }

    /// Forward an input chunk to the engine. The payload is opaque here.
    pub fn input(&mut self, conn: ConnId, payload: &[u8]) {
        let Some(player) = self.roster.get(&conn) else {
            debug!("Input from unknown {} dropped", conn);
            return;
        };
        self.metrics.inputs_received.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .input_bytes_received
            .fetch_add(payload.len() as u64, Ordering::Relaxed);
        self.engine.input(&player.id, payload);
    }

    /// Best-effort broadcast: a failed send is logged and skipped, the rest
    /// of the roster still gets the message.
    pub async fn broadcast(&mut self, message: ControlMessage) {
        debug!("Broadcasting {:?} to {} players", message, self.roster.len());
        for player in self.roster.values_mut() {
            match framing::write_message(&mut player.writer, message.token()).await {
                Ok(()) => {
                    self.metrics.messages_sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.metrics.send_failures.fetch_add(1, Ordering::Relaxed);
                    warn!("Failed to send {:?} to {}: {}", message, player.id, e);
                }
            }
        }
    }

    /// Best-effort unicast to a single connection.
    pub async fn send_to(&mut self, conn: ConnId, message: ControlMessage) {
        let Some(player) = self.roster.get_mut(&conn) else {
            debug!("Send {:?} to unknown {} dropped", message, conn);
            return;
        };
        match framing::write_message(&mut player.writer, message.token()).await {
            Ok(()) => {
                self.metrics.messages_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.metrics.send_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to send {:?} to {}: {}", message, player.id, e);
            }
        }
    }

    /// Final transition: tell everyone the game is over and close all
    /// writers. Called exactly once, at control-loop exit.
    pub async fn shutdown(&mut self) {
        self.broadcast(ControlMessage::GameStopped).await;
        self.state = SessionState::Stopped;
        for (_, mut player) in self.roster.drain() {
            // Close errors on a dying connection are not interesting.
            let _ = player.writer.shutdown().await;
        }
        self.metrics.players_connected.store(0, Ordering::Relaxed);
        info!("Session stopped");
    }
}
