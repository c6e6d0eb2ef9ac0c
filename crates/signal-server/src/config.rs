//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

/// Runtime configuration for the signaling server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP/WebSocket listener binds to
    pub bind_addr: SocketAddr,
    /// SQLite database URL; in-memory when absent
    pub database_url: Option<String>,
    /// How long invitees may ring before a call is marked missed
    pub ring_timeout: Duration,
    /// Outbound event queue depth per connection; slow consumers that
    /// fall this far behind start losing events
    pub outbound_queue_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8443".parse().expect("valid default address"),
            database_url: None,
            ring_timeout: Duration::from_secs(45),
            outbound_queue_depth: 64,
        }
    }
}

impl ServerConfig {
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn with_ring_timeout(mut self, timeout: Duration) -> Self {
        self.ring_timeout = timeout;
        self
    }
}
