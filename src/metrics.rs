//! Prometheus-compatible metrics endpoint
//!
//! Exposes session-controller counters in Prometheus format.
//! Default endpoint: http://localhost:9090/metrics

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Metrics registry for the session server
#[derive(Debug)]
pub struct Metrics {
    // Connection lifecycle
    pub connections_accepted: AtomicU64,
    pub connections_rejected: AtomicU64,
    pub players_connected: AtomicU64,

    // Control channel
    pub messages_sent: AtomicU64,
    pub send_failures: AtomicU64,

    // Player input
    pub inputs_received: AtomicU64,
    pub input_bytes_received: AtomicU64,

    // Server uptime
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            connections_accepted: AtomicU64::new(0),
            connections_rejected: AtomicU64::new(0),
            players_connected: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            inputs_received: AtomicU64::new(0),
            input_bytes_received: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(1024);

        // Helper macro for metrics
        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        metric!(
            "padlink_connections_accepted_total",
            "Connections accepted and registered",
            "counter",
            self.connections_accepted.load(Ordering::Relaxed)
        );
        metric!(
            "padlink_connections_rejected_total",
            "Connections rejected because the session was full",
            "counter",
            self.connections_rejected.load(Ordering::Relaxed)
        );
        metric!(
            "padlink_players_connected",
            "Currently connected players",
            "gauge",
            self.players_connected.load(Ordering::Relaxed)
        );
        metric!(
            "padlink_messages_sent_total",
            "Control messages written to clients",
            "counter",
            self.messages_sent.load(Ordering::Relaxed)
        );
        metric!(
            "padlink_send_failures_total",
            "Control message writes that failed",
            "counter",
            self.send_failures.load(Ordering::Relaxed)
        );
        metric!(
            "padlink_inputs_received_total",
            "Input chunks forwarded to the engine",
            "counter",
            self.inputs_received.load(Ordering::Relaxed)
        );
        metric!(
            "padlink_input_bytes_received_total",
            "Input bytes forwarded to the engine",
            "counter",
            self.input_bytes_received.load(Ordering::Relaxed)
        );
        metric!(
            "padlink_uptime_seconds",
            "Server uptime in seconds",
            "counter",
            self.uptime_seconds()
        );

        output
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);

                    let response = if request.starts_with("GET /metrics") {
                        let body = metrics.to_prometheus();
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        )
                    } else if request.starts_with("GET /health") || request.starts_with("GET /") {
                        let body = "OK";
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        )
                    } else {
                        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
                    };

                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}
