//! Authoritative host: accepts clients over TCP, receives their commands over
//! UDP and hands everything to the simulation context as [`ServerEvent`]s.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::simulation::Command;

use super::backoff::receive_backoff;
use super::cancel::{CancelSignal, CancelToken};
use super::config::ServerConfig;
use super::frame::{FrameReader, FrameWriter};
use super::protocol::{Packet, PacketType, Protocol, MAX_DATAGRAM_SIZE};
use super::stats::NetworkStats;

pub const REASON_SERVER_FULL: &str = "server full";
pub const REASON_SERVER_SHUTDOWN: &str = "server shutting down";

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    ClientConnected { client_id: i32, addr: SocketAddr },
    ClientDisconnected { client_id: i32, reason: String },
    Commands { client_id: i32, commands: Vec<Command> },
    Chat { client_id: i32, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientSlot {
    pub tcp_addr: SocketAddr,
    pub udp_addr: SocketAddr,
}

/// Client id allocation and endpoint bookkeeping. Ids start at 1 since 0 is
/// the host's own local client; a freed id is handed out again.
#[derive(Debug)]
pub struct ConnectionManager {
    max_clients: usize,
    clients: BTreeMap<i32, ClientSlot>,
    clients_by_udp: HashMap<SocketAddr, i32>,
}

impl ConnectionManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            max_clients,
            clients: BTreeMap::new(),
            clients_by_udp: HashMap::new(),
        }
    }

    pub fn admit(&mut self, slot: ClientSlot) -> Result<i32, &'static str> {
        if self.clients.len() >= self.max_clients {
            return Err(REASON_SERVER_FULL);
        }

        let client_id = (1..)
            .find(|id| !self.clients.contains_key(id))
            .ok_or(REASON_SERVER_FULL)?;
        self.clients.insert(client_id, slot);
        self.clients_by_udp.insert(slot.udp_addr, client_id);
        Ok(client_id)
    }

    pub fn remove(&mut self, client_id: i32) -> Option<ClientSlot> {
        let slot = self.clients.remove(&client_id)?;
        if self.clients_by_udp.get(&slot.udp_addr) == Some(&client_id) {
            self.clients_by_udp.remove(&slot.udp_addr);
        }
        Some(slot)
    }

    pub fn get(&self, client_id: i32) -> Option<&ClientSlot> {
        self.clients.get(&client_id)
    }

    pub fn client_for_udp(&self, addr: &SocketAddr) -> Option<i32> {
        self.clients_by_udp.get(addr).copied()
    }

    pub fn client_ids(&self) -> Vec<i32> {
        self.clients.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

struct ClientLink {
    writer: Arc<FrameWriter<OwnedWriteHalf>>,
    cancel: CancelSignal,
}

struct Clients {
    manager: ConnectionManager,
    links: HashMap<i32, ClientLink>,
}

struct Shared {
    protocol: Arc<Protocol>,
    clients: Mutex<Clients>,
    events: mpsc::UnboundedSender<ServerEvent>,
    stats: NetworkStats,
    udp_port: u16,
    handshake_timeout: Duration,
    oversize_warned: AtomicBool,
}

impl Shared {
    /// Drops the slot and link of `client_id` without announcing anything.
    /// Returns the link only if both were still present.
    async fn unlink(&self, client_id: i32) -> Option<ClientLink> {
        let mut clients = self.clients.lock().await;
        let slot = clients.manager.remove(client_id);
        let link = clients.links.remove(&client_id);
        slot.and(link)
    }

    /// Exit point for every client that was announced with
    /// `ClientConnected`. Whoever removes the entry first emits the
    /// disconnect event; later calls find nothing and do nothing.
    async fn remove_client(
        &self,
        client_id: i32,
        reason: &str,
    ) -> Option<Arc<FrameWriter<OwnedWriteHalf>>> {
        let link = self.unlink(client_id).await?;

        link.cancel.cancel();
        log::info!("Client {} left: {}", client_id, reason);
        let _ = self.events.send(ServerEvent::ClientDisconnected {
            client_id,
            reason: reason.to_string(),
        });
        Some(link.writer)
    }

    async fn send_frame(&self, writer: &FrameWriter<OwnedWriteHalf>, packet: &Packet) -> bool {
        let bytes = self.protocol.encode_packet(packet);
        self.send_frame_bytes(writer, &bytes).await
    }

    async fn send_frame_bytes(&self, writer: &FrameWriter<OwnedWriteHalf>, bytes: &[u8]) -> bool {
        match writer.send(bytes).await {
            Ok(()) => {
                self.stats.record_reliable_sent(bytes.len());
                true
            }
            Err(e) => {
                log::debug!("Reliable send failed: {}", e);
                false
            }
        }
    }
}

pub struct HostServer {
    shared: Arc<Shared>,
    udp: Arc<UdpSocket>,
    tcp_addr: SocketAddr,
    udp_addr: SocketAddr,
    events: mpsc::UnboundedReceiver<ServerEvent>,
    cancel: CancelSignal,
    tasks: Vec<JoinHandle<()>>,
}

impl HostServer {
    /// Binds both sockets and starts accepting. Port `0` in the config binds
    /// an ephemeral port; the actual addresses are reported by
    /// [`HostServer::tcp_addr`] and [`HostServer::udp_addr`].
    pub async fn bind(config: &ServerConfig, protocol: Arc<Protocol>) -> io::Result<Self> {
        let listener = TcpListener::bind((config.bind, config.tcp_port)).await?;
        let udp = Arc::new(UdpSocket::bind((config.bind, config.udp_port)).await?);
        let tcp_addr = listener.local_addr()?;
        let udp_addr = udp.local_addr()?;

        let (events_tx, events) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            protocol,
            clients: Mutex::new(Clients {
                manager: ConnectionManager::new(config.max_clients),
                links: HashMap::new(),
            }),
            events: events_tx,
            stats: NetworkStats::default(),
            udp_port: udp_addr.port(),
            handshake_timeout: config.handshake_timeout,
            oversize_warned: AtomicBool::new(false),
        });

        let cancel = CancelSignal::new();
        let tasks = vec![
            tokio::spawn(accept_loop(listener, Arc::clone(&shared), cancel.token())),
            tokio::spawn(datagram_loop(
                Arc::clone(&udp),
                Arc::clone(&shared),
                cancel.token(),
            )),
        ];

        log::info!("Host listening on TCP {} / UDP {}", tcp_addr, udp_addr);

        Ok(Self {
            shared,
            udp,
            tcp_addr,
            udp_addr,
            events,
            cancel,
            tasks,
        })
    }

    pub fn tcp_addr(&self) -> SocketAddr {
        self.tcp_addr
    }

    pub fn udp_addr(&self) -> SocketAddr {
        self.udp_addr
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.shared.stats
    }

    pub fn drain_events(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Waits for the next event.
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        self.events.recv().await
    }

    pub async fn client_ids(&self) -> Vec<i32> {
        self.shared.clients.lock().await.manager.client_ids()
    }

    pub async fn client_count(&self) -> usize {
        self.shared.clients.lock().await.manager.len()
    }

    /// Sends one datagram to the client's announced UDP endpoint without
    /// waiting. Returns `false` if the client is unknown or the send failed.
    pub async fn send_unreliable(&self, client_id: i32, packet: &Packet) -> bool {
        let bytes = self.shared.protocol.encode_packet(packet);
        self.send_unreliable_bytes(client_id, &bytes).await
    }

    /// Like [`HostServer::send_unreliable`] for an already encoded packet.
    pub async fn send_unreliable_bytes(&self, client_id: i32, bytes: &[u8]) -> bool {
        let addr = self
            .shared
            .clients
            .lock()
            .await
            .manager
            .get(client_id)
            .map(|slot| slot.udp_addr);
        match addr {
            Some(addr) => self.send_datagram(addr, bytes),
            None => false,
        }
    }

    /// Sends an encoded snapshot over UDP, or over the reliable channel when
    /// it does not fit in one datagram.
    pub async fn send_snapshot_bytes(&self, client_id: i32, bytes: &[u8]) -> bool {
        if bytes.len() <= MAX_DATAGRAM_SIZE {
            return self.send_unreliable_bytes(client_id, bytes).await;
        }

        if !self.shared.oversize_warned.swap(true, Ordering::Relaxed) {
            log::warn!(
                "Snapshot of {} bytes exceeds the datagram limit, sending oversized snapshots reliably",
                bytes.len()
            );
        }
        let writer = {
            let clients = self.shared.clients.lock().await;
            clients
                .links
                .get(&client_id)
                .map(|link| Arc::clone(&link.writer))
        };
        match writer {
            Some(writer) => self.shared.send_frame_bytes(&writer, bytes).await,
            None => false,
        }
    }

    fn send_datagram(&self, addr: SocketAddr, bytes: &[u8]) -> bool {
        if bytes.len() > MAX_DATAGRAM_SIZE {
            log::warn!("Dropping {} byte datagram for {}", bytes.len(), addr);
            self.shared.stats.record_unreliable_dropped();
            return false;
        }
        match self.udp.try_send_to(bytes, addr) {
            Ok(sent) => {
                self.shared.stats.record_unreliable_sent(sent);
                true
            }
            Err(e) => {
                log::debug!("Datagram to {} not sent: {}", addr, e);
                self.shared.stats.record_unreliable_dropped();
                false
            }
        }
    }

    pub async fn send_reliable(&self, client_id: i32, packet: &Packet) -> bool {
        let writer = {
            let clients = self.shared.clients.lock().await;
            clients
                .links
                .get(&client_id)
                .map(|link| Arc::clone(&link.writer))
        };
        match writer {
            Some(writer) => self.shared.send_frame(&writer, packet).await,
            None => false,
        }
    }

    /// Sends `packet` to every client. Returns how many sends succeeded.
    pub async fn broadcast_reliable(&self, packet: &Packet) -> usize {
        let writers: Vec<_> = {
            let clients = self.shared.clients.lock().await;
            clients
                .links
                .values()
                .map(|link| Arc::clone(&link.writer))
                .collect()
        };

        let mut delivered = 0;
        for writer in writers {
            if self.shared.send_frame(&writer, packet).await {
                delivered += 1;
            }
        }
        delivered
    }

    /// Removes a client, telling it why. Returns `false` if it was not
    /// connected.
    pub async fn kick(&self, client_id: i32, reason: &str) -> bool {
        let Some(writer) = self.shared.remove_client(client_id, reason).await else {
            return false;
        };
        self.shared
            .send_frame(
                &writer,
                &Packet::Disconnect {
                    reason: reason.to_string(),
                },
            )
            .await;
        writer.shutdown().await;
        true
    }

    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        for client_id in self.client_ids().await {
            self.kick(client_id, REASON_SERVER_SHUTDOWN).await;
        }
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                log::debug!("Server task ended abnormally: {}", e);
            }
        }
        log::info!("Host stopped");
    }
}

impl Drop for HostServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>, mut cancel: CancelToken) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => {
                log::debug!("Incoming connection from {}", addr);
                tokio::spawn(serve_client(stream, addr, Arc::clone(&shared), cancel.clone()));
            }
            Err(e) => log::warn!("Accept failed: {}", e),
        }
    }
}

/// Handshake followed by the client's reliable receive loop.
async fn serve_client(
    stream: TcpStream,
    addr: SocketAddr,
    shared: Arc<Shared>,
    mut server_cancel: CancelToken,
) {
    if let Err(e) = stream.set_nodelay(true) {
        log::debug!("Could not disable Nagle for {}: {}", addr, e);
    }
    let (read_half, write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half);
    let writer = Arc::new(FrameWriter::new(write_half));

    let request =
        tokio::time::timeout(shared.handshake_timeout, reader.receive(&mut server_cancel)).await;
    let udp_port = match request {
        Ok(Some(bytes)) => {
            shared.stats.record_reliable_received(bytes.len());
            match shared.protocol.decode_packet(&bytes) {
                Ok(Packet::ConnectionRequest { udp_port }) => udp_port,
                Ok(other) => {
                    log::warn!("{} opened with {:?}", addr, other.packet_type());
                    reject(&shared, &writer, "expected connection request").await;
                    return;
                }
                Err(e) => {
                    log::warn!("Malformed handshake from {}: {}", addr, e);
                    reject(&shared, &writer, "protocol error").await;
                    return;
                }
            }
        }
        Ok(None) => {
            log::debug!("{} left before the handshake", addr);
            return;
        }
        Err(_) => {
            log::warn!("Handshake from {} timed out", addr);
            reject(&shared, &writer, "no response before timeout").await;
            return;
        }
    };

    let slot = ClientSlot {
        tcp_addr: addr,
        udp_addr: SocketAddr::new(addr.ip(), udp_port),
    };
    let link_cancel = CancelSignal::new();
    let mut token = link_cancel.token();

    let admitted = {
        let mut clients = shared.clients.lock().await;
        let admitted = clients.manager.admit(slot);
        if let Ok(client_id) = admitted {
            clients.links.insert(
                client_id,
                ClientLink {
                    writer: Arc::clone(&writer),
                    cancel: link_cancel,
                },
            );
        }
        admitted
    };

    let client_id = match admitted {
        Ok(client_id) => client_id,
        Err(reason) => {
            log::info!("Rejecting {}: {}", addr, reason);
            reject(&shared, &writer, reason).await;
            return;
        }
    };

    let accept = Packet::ConnectionAccept {
        client_id,
        server_udp_port: shared.udp_port,
    };
    if !shared.send_frame(&writer, &accept).await {
        shared.unlink(client_id).await;
        return;
    }

    log::info!("Client {} joined from {} (UDP {})", client_id, addr, slot.udp_addr);
    let _ = shared
        .events
        .send(ServerEvent::ClientConnected { client_id, addr });

    let reason = tokio::select! {
        biased;
        _ = server_cancel.cancelled() => return,
        reason = client_loop(client_id, &mut reader, &shared, &mut token) => reason,
    };

    if let Some(writer) = shared.remove_client(client_id, &reason).await {
        writer.shutdown().await;
    }
}

/// Reads the client's reliable traffic until it ends. Returns why.
async fn client_loop(
    client_id: i32,
    reader: &mut FrameReader<OwnedReadHalf>,
    shared: &Shared,
    cancel: &mut CancelToken,
) -> String {
    loop {
        let Some(bytes) = reader.receive(cancel).await else {
            return "connection closed".to_string();
        };
        shared.stats.record_reliable_received(bytes.len());

        let packet = match shared.protocol.decode_packet(&bytes) {
            Ok(packet) => packet,
            Err(e) => {
                log::warn!("Malformed packet from client {}: {}", client_id, e);
                return format!("protocol error: {}", e);
            }
        };

        let event = match packet {
            Packet::Disconnect { reason } => return reason,
            Packet::Chat { message, .. } => ServerEvent::Chat { client_id, message },
            Packet::CommandBatch(commands) => ServerEvent::Commands { client_id, commands },
            Packet::Empty => continue,
            other => {
                log::warn!(
                    "Client {} sent unexpected {:?}",
                    client_id,
                    other.packet_type()
                );
                return "unexpected packet".to_string();
            }
        };

        if shared.events.send(event).is_err() {
            return REASON_SERVER_SHUTDOWN.to_string();
        }
    }
}

async fn reject(shared: &Shared, writer: &FrameWriter<OwnedWriteHalf>, reason: &str) {
    shared
        .send_frame(
            writer,
            &Packet::Disconnect {
                reason: reason.to_string(),
            },
        )
        .await;
    writer.shutdown().await;
}

async fn datagram_loop(udp: Arc<UdpSocket>, shared: Arc<Shared>, mut cancel: CancelToken) {
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

        if len == 0 || !PacketType::is_valid_discriminator(buf[0]) {
            shared.stats.record_unreliable_dropped();
            continue;
        }

        let Some(client_id) = shared.clients.lock().await.manager.client_for_udp(&from) else {
            log::trace!("Ignoring datagram from unknown endpoint {}", from);
            shared.stats.record_unreliable_dropped();
            continue;
        };

        match shared.protocol.decode_packet(&buf[..len]) {
            Ok(Packet::CommandBatch(commands)) => {
                shared.stats.record_unreliable_received(len);
                let _ = shared
                    .events
                    .send(ServerEvent::Commands { client_id, commands });
            }
            Ok(Packet::Empty) => {
                shared.stats.record_unreliable_received(len);
                log::trace!("Hole punch from client {}", client_id);
            }
            Ok(other) => {
                log::debug!(
                    "Ignoring {:?} datagram from client {}",
                    other.packet_type(),
                    client_id
                );
                shared.stats.record_unreliable_dropped();
            }
            Err(e) => {
                log::warn!("Dropping malformed datagram from client {}: {}", client_id, e);
                shared.stats.record_unreliable_dropped();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(port: u16) -> ClientSlot {
        ClientSlot {
            tcp_addr: SocketAddr::from(([127, 0, 0, 1], 40_000 + port)),
            udp_addr: SocketAddr::from(([127, 0, 0, 1], 50_000 + port)),
        }
    }

    #[test]
    fn ids_start_at_one_and_are_reused() {
        let mut manager = ConnectionManager::new(4);
        assert_eq!(manager.admit(slot(1)), Ok(1));
        assert_eq!(manager.admit(slot(2)), Ok(2));
        assert_eq!(manager.admit(slot(3)), Ok(3));

        assert!(manager.remove(2).is_some());
        assert_eq!(manager.admit(slot(4)), Ok(2));
        assert_eq!(manager.client_ids(), vec![1, 2, 3]);
    }

    #[test]
    fn full_server_rejects() {
        let mut manager = ConnectionManager::new(1);
        assert_eq!(manager.admit(slot(1)), Ok(1));
        assert_eq!(manager.admit(slot(2)), Err(REASON_SERVER_FULL));
    }

    #[test]
    fn udp_lookup_follows_membership() {
        let mut manager = ConnectionManager::new(4);
        let id = manager.admit(slot(7)).unwrap();
        assert_eq!(manager.client_for_udp(&slot(7).udp_addr), Some(id));

        manager.remove(id);
        assert_eq!(manager.client_for_udp(&slot(7).udp_addr), None);
        assert!(manager.remove(id).is_none());
    }

    async fn linked_shared() -> (Shared, mpsc::UnboundedReceiver<ServerEvent>, i32, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let peer = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let (_, write_half) = stream.into_split();

        let protocol = Protocol::new(crate::player::object_registry().unwrap()).unwrap();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut manager = ConnectionManager::new(4);
        let client_id = manager.admit(slot(1)).unwrap();
        let mut links = HashMap::new();
        links.insert(
            client_id,
            ClientLink {
                writer: Arc::new(FrameWriter::new(write_half)),
                cancel: CancelSignal::new(),
            },
        );

        let shared = Shared {
            protocol: Arc::new(protocol),
            clients: Mutex::new(Clients { manager, links }),
            events: events_tx,
            stats: NetworkStats::default(),
            udp_port: 0,
            handshake_timeout: Duration::from_secs(1),
            oversize_warned: AtomicBool::new(false),
        };
        (shared, events_rx, client_id, peer)
    }

    #[tokio::test]
    async fn failed_accept_frees_the_slot_silently() {
        let (shared, mut events, client_id, _peer) = linked_shared().await;

        assert!(shared.unlink(client_id).await.is_some());
        assert!(shared.clients.lock().await.manager.is_empty());
        assert!(shared.clients.lock().await.links.is_empty());
        assert!(shared.remove_client(client_id, "gone").await.is_none());
        assert!(events.try_recv().is_err());

        let mut clients = shared.clients.lock().await;
        assert_eq!(clients.manager.admit(slot(2)), Ok(client_id));
    }

    #[tokio::test]
    async fn removal_announces_the_client_once() {
        let (shared, mut events, client_id, _peer) = linked_shared().await;

        assert!(shared.remove_client(client_id, "bye").await.is_some());
        assert!(shared.remove_client(client_id, "again").await.is_none());
        assert!(shared.unlink(client_id).await.is_none());

        match events.try_recv() {
            Ok(ServerEvent::ClientDisconnected { client_id: id, reason }) => {
                assert_eq!(id, client_id);
                assert_eq!(reason, "bye");
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(events.try_recv().is_err());
    }
}
