use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_address: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Minimum number of players required for the session to run
    pub min_players: usize,
    /// Maximum number of players allowed in the session
    pub max_players: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 7777,
            min_players: 1,
            max_players: 2,
        }
    }
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("BIND_ADDRESS") {
            if let Ok(parsed) = addr.parse() {
                config.bind_address = parsed;
            } else {
                tracing::warn!("Invalid BIND_ADDRESS '{}', using default", addr);
            }
        }

        if let Ok(port) = std::env::var("PORT") {
            if let Ok(parsed) = port.parse::<u16>() {
                if parsed > 0 {
                    config.port = parsed;
                } else {
                    tracing::warn!("PORT must be > 0, using default");
                }
            } else {
                tracing::warn!("Invalid PORT '{}', using default", port);
            }
        }

        if let Ok(min_players) = std::env::var("MIN_PLAYERS") {
            if let Ok(parsed) = min_players.parse::<usize>() {
                if parsed > 0 {
                    config.min_players = parsed;
                } else {
                    tracing::warn!("MIN_PLAYERS must be > 0, using default");
                }
            } else {
                tracing::warn!("Invalid MIN_PLAYERS '{}', using default", min_players);
            }
        }

        if let Ok(max_players) = std::env::var("MAX_PLAYERS") {
            if let Ok(parsed) = max_players.parse::<usize>() {
                if parsed > 0 {
                    config.max_players = parsed;
                } else {
                    tracing::warn!("MAX_PLAYERS must be > 0, using default");
                }
            } else {
                tracing::warn!("Invalid MAX_PLAYERS '{}', using default", max_players);
            }
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("Port cannot be 0".to_string());
        }
        if self.min_players == 0 {
            return Err("min_players must be at least 1".to_string());
        }
        if self.min_players > self.max_players {
            return Err("min_players cannot exceed max_players".to_string());
        }
        Ok(())
    }

    /// Socket address the listener binds to
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}
