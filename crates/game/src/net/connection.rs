//! Client side of a server connection: a framed TCP control channel and a
//! UDP data channel to one server endpoint.

use std::collections::VecDeque;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::replication::Snapshot;
use crate::simulation::Command;

use super::backoff::receive_backoff;
use super::cancel::{CancelSignal, CancelToken};
use super::config::ClientConfig;
use super::frame::{FrameError, FrameReader, FrameWriter};
use super::protocol::{Packet, PacketType, Protocol, ProtocolError, MAX_DATAGRAM_SIZE};
use super::stats::NetworkStats;

pub const REASON_CLIENT_REQUESTED: &str = "client requested";
pub const REASON_SERVER_CLOSED: &str = "server closed the connection";
pub const REASON_TIMEOUT: &str = "no response before timeout";

const DISCONNECT_SEND_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("connection cannot be reused")]
    AlreadyUsed,
    #[error("could not resolve '{0}' to an IPv4 address")]
    Resolve(String),
    #[error("no response before timeout")]
    Timeout,
    #[error("server closed the connection")]
    Closed,
    #[error("connection rejected: {0}")]
    Rejected(String),
    #[error("unexpected {0:?} during handshake")]
    UnexpectedReply(PacketType),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// What the simulation context learns from [`Connection::poll_events`].
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Snapshot(Snapshot),
    SceneChanged { scene_epoch: u32, scene_name: String },
    Chat { client_id: i32, message: String },
    Disconnected { reason: String },
}

/// Receive loops never touch connection state; they forward packets or a
/// loss notice and the owner performs the transition.
#[derive(Debug)]
enum Inbound {
    Packet(Packet),
    Lost(String),
}

struct Established {
    client_id: i32,
    server_udp: SocketAddr,
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
    udp: UdpSocket,
}

pub struct Connection {
    protocol: Arc<Protocol>,
    config: ClientConfig,
    state: ConnectionState,
    used: bool,
    client_id: i32,
    server_udp: Option<SocketAddr>,
    writer: Option<Arc<FrameWriter<OwnedWriteHalf>>>,
    udp: Option<Arc<UdpSocket>>,
    cancel: CancelSignal,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    pending: VecDeque<ConnectionEvent>,
    tasks: Vec<JoinHandle<()>>,
    stats: Arc<NetworkStats>,
}

impl Connection {
    pub fn new(protocol: Arc<Protocol>, config: ClientConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            protocol,
            config,
            state: ConnectionState::Disconnected,
            used: false,
            client_id: -1,
            server_udp: None,
            writer: None,
            udp: None,
            cancel: CancelSignal::new(),
            inbound_tx,
            inbound_rx,
            pending: VecDeque::new(),
            tasks: Vec::new(),
            stats: Arc::new(NetworkStats::default()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Id assigned by the server, `-1` before a successful handshake.
    pub fn client_id(&self) -> i32 {
        self.client_id
    }

    pub fn server_udp_addr(&self) -> Option<SocketAddr> {
        self.server_udp
    }

    pub fn local_udp_addr(&self) -> Option<SocketAddr> {
        self.udp.as_ref().and_then(|udp| udp.local_addr().ok())
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    /// Performs the handshake and starts both receive loops. On failure every
    /// channel opened so far is released and the connection stays
    /// disconnected for good.
    pub async fn connect(
        &mut self,
        host: &str,
        tcp_port: u16,
        local_udp_port: u16,
    ) -> Result<i32, ConnectError> {
        if self.used || self.state != ConnectionState::Disconnected {
            return Err(ConnectError::AlreadyUsed);
        }
        self.used = true;
        self.state = ConnectionState::Connecting;

        let established = match self.handshake(host, tcp_port, local_udp_port).await {
            Ok(established) => established,
            Err(err) => {
                log::warn!("Connection to {}:{} failed: {}", host, tcp_port, err);
                self.cancel.cancel();
                self.state = ConnectionState::Disconnected;
                return Err(err);
            }
        };

        let Established {
            client_id,
            server_udp,
            reader,
            writer,
            udp,
        } = established;

        let udp = Arc::new(udp);
        self.client_id = client_id;
        self.server_udp = Some(server_udp);
        self.writer = Some(Arc::new(writer));
        self.udp = Some(Arc::clone(&udp));
        self.state = ConnectionState::Connected;

        self.tasks.push(tokio::spawn(reliable_loop(
            reader,
            Arc::clone(&self.protocol),
            self.inbound_tx.clone(),
            self.cancel.token(),
            Arc::clone(&self.stats),
        )));
        self.tasks.push(tokio::spawn(unreliable_loop(
            Arc::clone(&udp),
            server_udp,
            Arc::clone(&self.protocol),
            self.inbound_tx.clone(),
            self.cancel.token(),
            Arc::clone(&self.stats),
        )));

        // Opens the NAT mapping for the server's datagrams.
        let punch = self.protocol.encode_packet(&Packet::Empty);
        match udp.try_send_to(&punch, server_udp) {
            Ok(sent) => self.stats.record_unreliable_sent(sent),
            Err(e) => log::debug!("Hole punch to {} failed: {}", server_udp, e),
        }

        log::info!(
            "Connected to {}:{} as client {} (server UDP {})",
            host,
            tcp_port,
            client_id,
            server_udp
        );
        Ok(client_id)
    }

    async fn handshake(
        &self,
        host: &str,
        tcp_port: u16,
        local_udp_port: u16,
    ) -> Result<Established, ConnectError> {
        let ip = resolve(host, tcp_port).await?;
        let stream = TcpStream::connect(SocketAddr::new(ip, tcp_port)).await?;
        stream.set_nodelay(true)?;

        let udp = UdpSocket::bind(udp_bind_addr(ip, local_udp_port)).await?;
        let udp_port = udp.local_addr()?.port();

        let (read_half, write_half) = stream.into_split();
        let mut reader = FrameReader::new(read_half);
        let writer = FrameWriter::new(write_half);

        let request = self
            .protocol
            .encode_packet(&Packet::ConnectionRequest { udp_port });
        writer.send(&request).await?;
        self.stats.record_reliable_sent(request.len());

        let mut token = self.cancel.token();
        let reply = tokio::time::timeout(self.config.handshake_timeout, reader.receive(&mut token))
            .await
            .map_err(|_| ConnectError::Timeout)?
            .ok_or(ConnectError::Closed)?;
        self.stats.record_reliable_received(reply.len());

        match self.protocol.decode_packet(&reply)? {
            Packet::ConnectionAccept {
                client_id,
                server_udp_port,
            } => Ok(Established {
                client_id,
                server_udp: SocketAddr::new(ip, server_udp_port),
                reader,
                writer,
                udp,
            }),
            Packet::Disconnect { reason } => Err(ConnectError::Rejected(reason)),
            other => Err(ConnectError::UnexpectedReply(other.packet_type())),
        }
    }

    /// Sends one command batch as a single datagram. Never queued or retried:
    /// a failed send is logged and the batch is gone.
    pub fn send_commands(&self, commands: &[Command]) -> bool {
        let (Some(udp), Some(server_udp)) = (&self.udp, self.server_udp) else {
            return false;
        };
        if !self.is_connected() || commands.is_empty() {
            return false;
        }

        let bytes = self
            .protocol
            .encode_packet(&Packet::CommandBatch(commands.to_vec()));
        if bytes.len() > MAX_DATAGRAM_SIZE {
            log::warn!("Dropping command batch of {} bytes", bytes.len());
            self.stats.record_unreliable_dropped();
            return false;
        }

        match udp.try_send_to(&bytes, server_udp) {
            Ok(sent) => {
                self.stats.record_unreliable_sent(sent);
                true
            }
            Err(e) => {
                log::debug!("Command batch send failed: {}", e);
                self.stats.record_unreliable_dropped();
                false
            }
        }
    }

    pub async fn send_chat(&self, message: &str) -> Result<(), FrameError> {
        self.send_reliable(&Packet::Chat {
            client_id: self.client_id,
            message: message.to_string(),
        })
        .await
    }

    async fn send_reliable(&self, packet: &Packet) -> Result<(), FrameError> {
        if !self.is_connected() {
            return Err(FrameError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "not connected",
            )));
        }
        self.write_packet(packet).await
    }

    async fn write_packet(&self, packet: &Packet) -> Result<(), FrameError> {
        let Some(writer) = &self.writer else {
            return Ok(());
        };
        let bytes = self.protocol.encode_packet(packet);
        writer.send(&bytes).await?;
        self.stats.record_reliable_sent(bytes.len());
        Ok(())
    }

    /// Leaves the server with `reason`. Only the first call on a connected
    /// connection has an effect.
    pub async fn disconnect(&mut self, reason: &str) {
        self.close(reason, true).await;
    }

    async fn close(&mut self, reason: &str, notify_server: bool) {
        if self.state != ConnectionState::Connected {
            return;
        }
        self.state = ConnectionState::Disconnecting;

        if notify_server {
            let packet = Packet::Disconnect {
                reason: reason.to_string(),
            };
            match tokio::time::timeout(DISCONNECT_SEND_TIMEOUT, self.write_packet(&packet))
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::debug!("Disconnect notice not delivered: {}", e),
                Err(_) => log::debug!("Disconnect notice timed out"),
            }
        }

        self.cancel.cancel();
        if let Some(writer) = self.writer.take() {
            writer.shutdown().await;
        }
        self.udp = None;
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                log::debug!("Receive loop ended abnormally: {}", e);
            }
        }
        while self.inbound_rx.try_recv().is_ok() {}

        self.state = ConnectionState::Disconnected;
        log::info!("Disconnected: {}", reason);
        self.pending.push_back(ConnectionEvent::Disconnected {
            reason: reason.to_string(),
        });
    }

    /// Drains everything the receive loops delivered since the last call. A
    /// lost channel or a disconnect from the server ends the connection here
    /// and yields exactly one `Disconnected` event.
    pub async fn poll_events(&mut self) -> Vec<ConnectionEvent> {
        while let Ok(inbound) = self.inbound_rx.try_recv() {
            match inbound {
                Inbound::Packet(Packet::Snapshot(snapshot)) => {
                    self.pending.push_back(ConnectionEvent::Snapshot(snapshot));
                }
                Inbound::Packet(Packet::SceneChange {
                    scene_epoch,
                    scene_name,
                }) => self.pending.push_back(ConnectionEvent::SceneChanged {
                    scene_epoch,
                    scene_name,
                }),
                Inbound::Packet(Packet::Chat { client_id, message }) => {
                    self.pending
                        .push_back(ConnectionEvent::Chat { client_id, message });
                }
                Inbound::Packet(Packet::Disconnect { reason }) => {
                    self.close(&reason, false).await;
                    break;
                }
                Inbound::Packet(Packet::Empty) => {}
                Inbound::Packet(other) => {
                    log::debug!("Ignoring {:?} from server", other.packet_type());
                }
                Inbound::Lost(reason) => {
                    self.close(&reason, false).await;
                    break;
                }
            }
        }

        self.pending.drain(..).collect()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Wildcard address in the same family as `server`, so datagrams to it can
/// leave the socket.
fn udp_bind_addr(server: IpAddr, port: u16) -> SocketAddr {
    let ip = match server {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, port)
}

async fn resolve(host: &str, port: u16) -> Result<IpAddr, ConnectError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }

    tokio::net::lookup_host((host, port))
        .await?
        .map(|addr| addr.ip())
        .find(IpAddr::is_ipv4)
        .ok_or_else(|| ConnectError::Resolve(host.to_string()))
}

async fn reliable_loop(
    mut reader: FrameReader<OwnedReadHalf>,
    protocol: Arc<Protocol>,
    tx: mpsc::UnboundedSender<Inbound>,
    mut cancel: CancelToken,
    stats: Arc<NetworkStats>,
) {
    loop {
        let Some(bytes) = reader.receive(&mut cancel).await else {
            if !cancel.is_cancelled() {
                let _ = tx.send(Inbound::Lost(REASON_SERVER_CLOSED.to_string()));
            }
            return;
        };
        stats.record_reliable_received(bytes.len());

        match protocol.decode_packet(&bytes) {
            Ok(packet) => {
                if tx.send(Inbound::Packet(packet)).is_err() {
                    return;
                }
            }
            Err(e) => {
                log::warn!("Malformed reliable packet from server: {}", e);
                let _ = tx.send(Inbound::Lost(format!("protocol error: {}", e)));
                return;
            }
        }
    }
}

async fn unreliable_loop(
    udp: Arc<UdpSocket>,
    server: SocketAddr,
    protocol: Arc<Protocol>,
    tx: mpsc::UnboundedSender<Inbound>,
    mut cancel: CancelToken,
    stats: Arc<NetworkStats>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut failures = 0u32;

    loop {
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            received = udp.recv_from(&mut buf) => received,
        };

        let (len, from) = match received {
            Ok(received) => {
                failures = 0;
                received
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                let delay = receive_backoff(failures);
                log::debug!(
                    "UDP receive failed ({} in a row), retrying in {:?}: {}",
                    failures,
                    delay,
                    e
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                continue;
            }
        };

        if from != server {
            log::trace!("Ignoring datagram from {}", from);
            stats.record_unreliable_dropped();
            continue;
        }
        if len == 0 || !PacketType::is_valid_discriminator(buf[0]) {
            stats.record_unreliable_dropped();
            continue;
        }
        stats.record_unreliable_received(len);

        match protocol.decode_packet(&buf[..len]) {
            Ok(packet) => {
                if tx.send(Inbound::Packet(packet)).is_err() {
                    return;
                }
            }
            Err(e) => {
                log::warn!("Malformed datagram from server: {}", e);
                let _ = tx.send(Inbound::Lost(format!("protocol error: {}", e)));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn udp_socket_matches_server_family() {
        let v4 = udp_bind_addr(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)), 0);
        assert_eq!(v4, SocketAddr::from(([0, 0, 0, 0], 0)));

        let v6 = udp_bind_addr(IpAddr::V6(Ipv6Addr::LOCALHOST), 7001);
        assert!(v6.is_ipv6());
        assert!(v6.ip().is_unspecified());
        assert_eq!(v6.port(), 7001);
    }

    #[tokio::test]
    async fn literal_addresses_skip_lookup() {
        assert_eq!(
            resolve("::1", 7000).await.unwrap(),
            IpAddr::V6(Ipv6Addr::LOCALHOST)
        );
        assert_eq!(
            resolve("127.0.0.1", 7000).await.unwrap(),
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        );
    }
}
