//! TCP session server
//!
//! Owns the listening socket and the control loop. The loop is the single
//! place session state is touched; every ready source it reacts to is one of
//! a closed set: the listener, the shutdown signal, or a player connection
//! (reported by that connection's reader task over the event channel).

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::engine::GameEngine;
use crate::metrics::Metrics;
use crate::net::framing;
use crate::net::protocol::{ControlMessage, INPUT_CHUNK_SIZE};
use crate::net::session::{ConnId, Session};

/// Errors that take the whole server down
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("Connection event channel closed")]
    EventChannelClosed,
}

/// Events flowing from reader tasks into the control loop.
enum ConnEvent {
    /// A bounded chunk of raw input bytes from one player.
    Input { conn: ConnId, data: Vec<u8> },
    /// Orderly close or read error; either way the player is gone.
    Disconnected { conn: ConnId },
}

/// Cloneable handle for requesting a graceful shutdown.
///
/// The control signal of the session: the binary wires it to Ctrl+C and
/// stdin, tests call it directly.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: mpsc::Sender<()>,
}

impl ShutdownHandle {
    /// Ask the control loop to stop. Observed at its next iteration.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(()).await;
    }
}

/// The session server: listener plus the session it controls.
pub struct SessionServer<E> {
    listener: TcpListener,
    local_addr: SocketAddr,
    session: Session<E, OwnedWriteHalf>,
    metrics: Arc<Metrics>,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl<E: GameEngine> SessionServer<E> {
    /// Bind the listening socket with address reuse and a backlog equal to
    /// `max_players`. Must be called from within a tokio runtime.
    pub fn bind(config: &ServerConfig, engine: E, metrics: Arc<Metrics>) -> Result<Self, ServerError> {
        let addr = config.bind_addr();
        let listener = Self::bind_listener(addr, config.max_players as u32)
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let session = Session::new(
            engine,
            config.min_players,
            config.max_players,
            metrics.clone(),
        );

        Ok(Self {
            listener,
            local_addr,
            session,
            metrics,
            shutdown_tx,
            shutdown_rx,
        })
    }

    fn bind_listener(addr: SocketAddr, backlog: u32) -> std::io::Result<TcpListener> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        socket.listen(backlog)
    }

    /// The address the listener actually bound to (port 0 resolves here).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Run the control loop until a shutdown is requested or the event
    /// channel dies. Always runs the session shutdown on the way out.
    pub async fn run(self) -> Result<(), ServerError> {
        let SessionServer {
            listener,
            local_addr,
            mut session,
            metrics,
            shutdown_tx,
            mut shutdown_rx,
        } = self;
        // Held so shutdown_rx can never observe an empty sender set while
        // the loop runs.
        let _shutdown_tx = shutdown_tx;

        info!("Session server listening on {}", local_addr);

        let (event_tx, mut event_rx) = mpsc::channel::<ConnEvent>(64);
        let mut next_conn: u64 = 0;
        let mut fatal = None;

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let conn = ConnId::new(next_conn);
                        next_conn += 1;
                        handle_accept(&mut session, &metrics, conn, stream, peer, &event_tx).await;
                    }
                    // An isolated accept failure; keep serving.
                    Err(e) => warn!("Accept failed: {}", e),
                },
                event = event_rx.recv() => match event {
                    Some(ConnEvent::Input { conn, data }) => session.input(conn, &data),
                    Some(ConnEvent::Disconnected { conn }) => session.remove(conn).await,
                    None => {
                        fatal = Some(ServerError::EventChannelClosed);
                        break;
                    }
                },
                _ = shutdown_rx.recv() => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        session.shutdown().await;
        drop(listener);

        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Admit or reject one accepted connection.
async fn handle_accept<E: GameEngine>(
    session: &mut Session<E, OwnedWriteHalf>,
    metrics: &Metrics,
    conn: ConnId,
    mut stream: TcpStream,
    peer: SocketAddr,
    events: &mpsc::Sender<ConnEvent>,
) {
    if session.is_full() {
        metrics.connections_rejected.fetch_add(1, Ordering::Relaxed);
        warn!(
            "Rejecting connection from {}: session full ({} players)",
            peer,
            session.player_count()
        );
        if let Err(e) = framing::write_message(&mut stream, ControlMessage::TooManyPlayers.token()).await
        {
            debug!("Failed to notify rejected connection {}: {}", peer, e);
        }
        // The rejected socket is closed, not abandoned.
        let _ = stream.shutdown().await;
        return;
    }

    metrics.connections_accepted.fetch_add(1, Ordering::Relaxed);
    let (read_half, write_half) = stream.into_split();

    let events = events.clone();
    tokio::spawn(async move {
        reader_loop(read_half, conn, events).await;
    });

    session.register(conn, peer, write_half).await;
}

/// Per-connection reader: forwards bounded input chunks to the control loop
/// and reports the disconnect when the peer goes away.
async fn reader_loop(mut read_half: OwnedReadHalf, conn: ConnId, events: mpsc::Sender<ConnEvent>) {
    let mut buf = vec![0u8; INPUT_CHUNK_SIZE];
    loop {
        match read_half.read(&mut buf).await {
            Ok(0) => {
                debug!("{} closed by peer", conn);
                let _ = events.send(ConnEvent::Disconnected { conn }).await;
                break;
            }
            Ok(n) => {
                let data = buf[..n].to_vec();
                if events.send(ConnEvent::Input { conn, data }).await.is_err() {
                    // Control loop is gone; nothing left to report to.
                    break;
                }
            }
            Err(e) => {
                debug!("Read error on {}: {}", conn, e);
                let _ = events.send(ConnEvent::Disconnected { conn }).await;
                break;
            }
        }
    }
}
