use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use super::protocol::{DEFAULT_TCP_PORT, DEFAULT_TICK_RATE, DEFAULT_UDP_PORT};

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long `connect` waits for the server's reply to the request.
    pub handshake_timeout: Duration,
    /// Local UDP port to bind; `0` lets the OS choose.
    pub local_udp_port: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            local_udp_port: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub tcp_port: u16,
    pub udp_port: u16,
    pub max_clients: usize,
    pub tick_rate: u32,
    /// Ticks between forced full-property snapshots.
    pub full_sync_interval: u32,
    pub handshake_timeout: Duration,
    pub scene_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            tcp_port: DEFAULT_TCP_PORT,
            udp_port: DEFAULT_UDP_PORT,
            max_clients: 32,
            tick_rate: DEFAULT_TICK_RATE,
            full_sync_interval: 120,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            scene_name: "pond".to_string(),
        }
    }
}
