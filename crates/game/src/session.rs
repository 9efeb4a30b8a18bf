//! The active multiplayer role of this process and what it does each tick.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use crate::net::{
    ClientConfig, ConnectError, Connection, ConnectionEvent, HostServer, Packet, Protocol,
    ServerConfig, ServerEvent, REASON_CLIENT_REQUESTED,
};
use crate::player;
use crate::replication::{ReplicationError, Scene, Snapshot, SyncMode};
use crate::simulation::{Command, CommandInbox, CommandSequencer, InputState};

/// Client id of the local player on a host or in single-player.
pub const LOCAL_CLIENT_ID: i32 = 0;

/// Snapshots carrying full property blobs sent to a client after it joins or
/// the scene changes. Covers full snapshots that arrive before the client
/// has processed the scene change.
const FULL_SYNC_BURST: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionType {
    Singleplayer,
    Client,
    Host,
}

#[derive(Debug, Clone)]
pub enum SessionConfig {
    Singleplayer {
        scene_name: String,
    },
    Client {
        host: String,
        tcp_port: u16,
        config: ClientConfig,
    },
    Host(ServerConfig),
}

impl SessionConfig {
    pub fn session_type(&self) -> SessionType {
        match self {
            SessionConfig::Singleplayer { .. } => SessionType::Singleplayer,
            SessionConfig::Client { .. } => SessionType::Client,
            SessionConfig::Host(_) => SessionType::Host,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ClientJoined { client_id: i32 },
    ClientLeft { client_id: i32, reason: String },
    Chat { client_id: i32, message: String },
    SnapshotApplied { tick: u32 },
    SceneChanged { scene_epoch: u32, scene_name: String },
    Disconnected { reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("only the authority can change the scene")]
    NotAuthority,
    #[error("not connected")]
    NotConnected,
}

struct ClientRole {
    connection: Connection,
    last_snapshot_tick: Option<u32>,
}

struct HostRole {
    server: HostServer,
    inbox: CommandInbox,
    full_sync_due: HashMap<i32, u32>,
    full_sync_interval: u32,
    ticks_since_full_sync: u32,
}

enum Role {
    Singleplayer,
    Client(Box<ClientRole>),
    Host(Box<HostRole>),
}

pub struct Session {
    role: Role,
    protocol: Arc<Protocol>,
    scene: Scene,
    sequencer: CommandSequencer,
    local_client_id: i32,
    tick: u32,
    events: Vec<SessionEvent>,
}

impl Session {
    pub async fn start(
        config: SessionConfig,
        protocol: Arc<Protocol>,
    ) -> Result<Self, SessionError> {
        let (role, scene, local_client_id) = match config {
            SessionConfig::Singleplayer { scene_name } => {
                let mut scene = Scene::new(scene_name, true);
                player::populate_scene(&mut scene);
                player::spawn_pawn(&mut scene, LOCAL_CLIENT_ID);
                (Role::Singleplayer, scene, LOCAL_CLIENT_ID)
            }
            SessionConfig::Host(config) => {
                let server = HostServer::bind(&config, Arc::clone(&protocol)).await?;
                let mut scene = Scene::new(config.scene_name.clone(), true);
                player::populate_scene(&mut scene);
                player::spawn_pawn(&mut scene, LOCAL_CLIENT_ID);
                let role = HostRole {
                    server,
                    inbox: CommandInbox::new(),
                    full_sync_due: HashMap::new(),
                    full_sync_interval: config.full_sync_interval.max(1),
                    ticks_since_full_sync: 0,
                };
                (Role::Host(Box::new(role)), scene, LOCAL_CLIENT_ID)
            }
            SessionConfig::Client {
                host,
                tcp_port,
                config,
            } => {
                let local_udp_port = config.local_udp_port;
                let mut connection = Connection::new(Arc::clone(&protocol), config);
                let client_id = connection.connect(&host, tcp_port, local_udp_port).await?;
                let role = ClientRole {
                    connection,
                    last_snapshot_tick: None,
                };
                (
                    Role::Client(Box::new(role)),
                    Scene::new(String::new(), false),
                    client_id,
                )
            }
        };

        log::info!(
            "{:?} session started as client {}",
            role_type(&role),
            local_client_id
        );

        Ok(Self {
            role,
            protocol,
            scene,
            sequencer: CommandSequencer::new(),
            local_client_id,
            tick: 0,
            events: Vec::new(),
        })
    }

    pub fn session_type(&self) -> SessionType {
        role_type(&self.role)
    }

    pub fn local_client_id(&self) -> i32 {
        self.local_client_id
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    pub fn sequencer(&self) -> &CommandSequencer {
        &self.sequencer
    }

    pub fn protocol(&self) -> &Arc<Protocol> {
        &self.protocol
    }

    pub fn host_server(&self) -> Option<&HostServer> {
        match &self.role {
            Role::Host(host) => Some(&host.server),
            _ => None,
        }
    }

    pub fn connection(&self) -> Option<&Connection> {
        match &self.role {
            Role::Client(client) => Some(&client.connection),
            _ => None,
        }
    }

    /// Turns one tick of sampled input into commands and submits them.
    pub fn submit_input(&mut self, input: &InputState) -> usize {
        let commands = self.sequencer.produce(input, self.tick);
        self.submit_commands(commands)
    }

    /// Applies commands locally on the authority or sends them to the server.
    /// Returns how many commands took effect or were handed to the socket.
    pub fn submit_commands(&mut self, commands: Vec<Command>) -> usize {
        match &self.role {
            Role::Singleplayer | Role::Host(_) => {
                let mut applied = 0;
                for command in &commands {
                    if command.apply(&mut self.scene, self.local_client_id) {
                        applied += 1;
                    }
                }
                if let Some(last) = commands.last() {
                    self.sequencer.acknowledge(last.sequence);
                }
                applied
            }
            Role::Client(client) => {
                if client.connection.send_commands(&commands) {
                    commands.len()
                } else {
                    0
                }
            }
        }
    }

    /// Runs one simulation tick and returns what happened since the last one.
    pub async fn update(&mut self, dt: f32) -> Vec<SessionEvent> {
        match self.role {
            Role::Singleplayer => {
                self.scene.simulate(dt);
                self.tick = self.tick.wrapping_add(1);
            }
            Role::Host(_) => {
                self.process_server_events().await;
                if let Role::Host(host) = &mut self.role {
                    host.inbox.apply_pending(&mut self.scene);
                }
                self.scene.simulate(dt);
                self.tick = self.tick.wrapping_add(1);
                self.publish_snapshot().await;
            }
            Role::Client(_) => {
                self.process_connection_events().await;
                self.tick = self.tick.wrapping_add(1);
            }
        }

        std::mem::take(&mut self.events)
    }

    async fn process_server_events(&mut self) {
        let Role::Host(host) = &mut self.role else {
            return;
        };

        for event in host.server.drain_events() {
            match event {
                ServerEvent::ClientConnected { client_id, .. } => {
                    host.inbox.add_client(client_id);
                    player::spawn_pawn(&mut self.scene, client_id);
                    host.full_sync_due.insert(client_id, FULL_SYNC_BURST);
                    host.server
                        .send_reliable(
                            client_id,
                            &Packet::SceneChange {
                                scene_epoch: self.scene.epoch(),
                                scene_name: self.scene.name().to_string(),
                            },
                        )
                        .await;
                    self.events.push(SessionEvent::ClientJoined { client_id });
                }
                ServerEvent::ClientDisconnected { client_id, reason } => {
                    host.inbox.remove_client(client_id);
                    host.full_sync_due.remove(&client_id);
                    let removed = self.scene.remove_owned_by(client_id);
                    log::debug!("Removed {} objects of client {}", removed, client_id);
                    self.events
                        .push(SessionEvent::ClientLeft { client_id, reason });
                }
                ServerEvent::Commands {
                    client_id,
                    commands,
                } => host.inbox.push_batch(client_id, commands),
                ServerEvent::Chat { client_id, message } => {
                    host.server
                        .broadcast_reliable(&Packet::Chat {
                            client_id,
                            message: message.clone(),
                        })
                        .await;
                    self.events.push(SessionEvent::Chat { client_id, message });
                }
            }
        }
    }

    /// Sends this tick's snapshot to every client: full blobs to clients that
    /// need a full sync, dirty properties to the rest. Clears dirty state.
    pub async fn publish_snapshot(&mut self) {
        let Role::Host(host) = &mut self.role else {
            return;
        };

        self.scene.update_dirty();
        let acks = host.inbox.acks();

        host.ticks_since_full_sync += 1;
        let periodic_full = host.ticks_since_full_sync >= host.full_sync_interval;
        if periodic_full {
            host.ticks_since_full_sync = 0;
        }

        let mut full: Option<Vec<u8>> = None;
        let mut delta: Option<Vec<u8>> = None;

        for client_id in host.server.client_ids().await {
            let wants_full = periodic_full
                || host
                    .full_sync_due
                    .get(&client_id)
                    .is_some_and(|remaining| *remaining > 0);

            let (cache, mode) = if wants_full {
                (&mut full, SyncMode::Full)
            } else {
                (&mut delta, SyncMode::Delta)
            };
            let bytes = cache.get_or_insert_with(|| {
                let snapshot = self.scene.build_snapshot(self.tick, acks.clone(), mode);
                self.protocol.encode_packet(&Packet::Snapshot(snapshot))
            });
            host.server.send_snapshot_bytes(client_id, bytes).await;

            if let Some(remaining) = host.full_sync_due.get_mut(&client_id) {
                *remaining = remaining.saturating_sub(1);
            }
        }
        host.full_sync_due.retain(|_, remaining| *remaining > 0);

        self.scene.clear_dirty();
    }

    async fn process_connection_events(&mut self) {
        let Role::Client(client) = &mut self.role else {
            return;
        };

        for event in client.connection.poll_events().await {
            match event {
                ConnectionEvent::Snapshot(snapshot) => {
                    let last_tick = client.last_snapshot_tick;
                    let Some(tick) = accept_snapshot(&self.scene, last_tick, &snapshot) else {
                        continue;
                    };
                    if let Err(e) = self
                        .scene
                        .apply_snapshot(&snapshot, self.protocol.objects())
                    {
                        fail_replication(&mut client.connection, e).await;
                        break;
                    }
                    client.last_snapshot_tick = Some(tick);
                    if let Some(sequence) = snapshot.ack_for(self.local_client_id) {
                        self.sequencer.acknowledge(sequence);
                    }
                    self.events.push(SessionEvent::SnapshotApplied { tick });
                }
                ConnectionEvent::SceneChanged {
                    scene_epoch,
                    scene_name,
                } => {
                    if scene_epoch == self.scene.epoch() {
                        self.scene.rename(scene_name.clone());
                    } else {
                        self.scene.reset(scene_name.clone(), scene_epoch);
                        client.last_snapshot_tick = None;
                    }
                    self.events.push(SessionEvent::SceneChanged {
                        scene_epoch,
                        scene_name,
                    });
                }
                ConnectionEvent::Chat { client_id, message } => {
                    self.events.push(SessionEvent::Chat { client_id, message });
                }
                ConnectionEvent::Disconnected { reason } => {
                    self.events.push(SessionEvent::Disconnected { reason });
                }
            }
        }
    }

    /// Starts a new scene instance on the authority and tells every client.
    /// Every connected player gets a fresh pawn in the new scene.
    pub async fn change_scene(&mut self, scene_name: &str) -> Result<u32, SessionError> {
        if !self.scene.is_authority() {
            return Err(SessionError::NotAuthority);
        }

        let scene_epoch = self.scene.advance_epoch(scene_name);
        player::populate_scene(&mut self.scene);
        player::spawn_pawn(&mut self.scene, LOCAL_CLIENT_ID);

        if let Role::Host(host) = &mut self.role {
            for client_id in host.server.client_ids().await {
                player::spawn_pawn(&mut self.scene, client_id);
                host.full_sync_due.insert(client_id, FULL_SYNC_BURST);
            }
            host.server
                .broadcast_reliable(&Packet::SceneChange {
                    scene_epoch,
                    scene_name: scene_name.to_string(),
                })
                .await;
        }

        log::info!("Scene changed to '{}' (epoch {})", scene_name, scene_epoch);
        self.events.push(SessionEvent::SceneChanged {
            scene_epoch,
            scene_name: scene_name.to_string(),
        });
        Ok(scene_epoch)
    }

    pub async fn send_chat(&mut self, message: &str) -> Result<(), SessionError> {
        match &self.role {
            Role::Singleplayer => {}
            Role::Host(host) => {
                host.server
                    .broadcast_reliable(&Packet::Chat {
                        client_id: LOCAL_CLIENT_ID,
                        message: message.to_string(),
                    })
                    .await;
            }
            Role::Client(client) => {
                return client
                    .connection
                    .send_chat(message)
                    .await
                    .map_err(|_| SessionError::NotConnected);
            }
        }
        self.events.push(SessionEvent::Chat {
            client_id: LOCAL_CLIENT_ID,
            message: message.to_string(),
        });
        Ok(())
    }

    /// Releases the network resources of this session.
    pub async fn shutdown(&mut self, reason: &str) {
        match &mut self.role {
            Role::Singleplayer => {}
            Role::Client(client) => client.connection.disconnect(reason).await,
            Role::Host(host) => host.server.shutdown().await,
        }
        log::info!("{:?} session ended: {}", self.session_type(), reason);
    }
}

fn role_type(role: &Role) -> SessionType {
    match role {
        Role::Singleplayer => SessionType::Singleplayer,
        Role::Client(_) => SessionType::Client,
        Role::Host(_) => SessionType::Host,
    }
}

/// Snapshots from another scene instance or older than the last applied one
/// are stale.
fn accept_snapshot(scene: &Scene, last_tick: Option<u32>, snapshot: &Snapshot) -> Option<u32> {
    if snapshot.scene_epoch != scene.epoch() {
        log::debug!(
            "Dropping snapshot for epoch {} (scene is at {})",
            snapshot.scene_epoch,
            scene.epoch()
        );
        return None;
    }
    if let Some(last) = last_tick {
        if !crate::simulation::sequence_greater_than(snapshot.tick, last) {
            log::trace!("Dropping snapshot {} (last applied {})", snapshot.tick, last);
            return None;
        }
    }
    Some(snapshot.tick)
}

async fn fail_replication(connection: &mut Connection, error: ReplicationError) {
    log::warn!("Snapshot could not be applied: {}", error);
    connection
        .disconnect(&format!("protocol error: {}", error))
        .await;
}

/// Owns the one active session. Switching always tears the previous one down
/// before the next starts.
pub struct SessionManager {
    protocol: Arc<Protocol>,
    active: Option<Session>,
}

impl SessionManager {
    pub fn new(protocol: Arc<Protocol>) -> Self {
        Self {
            protocol,
            active: None,
        }
    }

    pub fn protocol(&self) -> &Arc<Protocol> {
        &self.protocol
    }

    pub fn active(&self) -> Option<&Session> {
        self.active.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut Session> {
        self.active.as_mut()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub async fn switch(&mut self, config: SessionConfig) -> Result<&mut Session, SessionError> {
        self.reset().await;
        let session = Session::start(config, Arc::clone(&self.protocol)).await?;
        Ok(self.active.insert(session))
    }

    pub async fn reset(&mut self) {
        self.end(REASON_CLIENT_REQUESTED).await;
    }

    /// Shuts the active session down with `reason`, if there is one.
    pub async fn end(&mut self, reason: &str) {
        if let Some(mut session) = self.active.take() {
            session.shutdown(reason).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec2;

    use super::*;
    use crate::player::{PAWN_DESIRED_DIRECTION, PAWN_POSITION};
    use crate::replication::PropertyValue;
    use crate::simulation::InputButtons;

    fn protocol() -> Arc<Protocol> {
        Arc::new(Protocol::new(player::object_registry().unwrap()).unwrap())
    }

    #[tokio::test]
    async fn singleplayer_applies_input_locally() {
        let mut manager = SessionManager::new(protocol());
        let session = manager
            .switch(SessionConfig::Singleplayer {
                scene_name: "pond".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(session.session_type(), SessionType::Singleplayer);
        assert_eq!(session.local_client_id(), LOCAL_CLIENT_ID);

        let input = InputState {
            move_direction: Vec2::X,
            buttons: InputButtons::LEAP,
            ..Default::default()
        };
        assert_eq!(session.submit_input(&input), 2);
        assert_eq!(session.sequencer().last_acked(), 2);

        for _ in 0..30 {
            session.update(1.0 / 60.0).await;
        }

        let pawn = session.scene().find_pawn(LOCAL_CLIENT_ID).unwrap();
        assert_eq!(
            pawn.get(PAWN_DESIRED_DIRECTION),
            Some(PropertyValue::Vec2(Vec2::X))
        );
        match pawn.get(PAWN_POSITION) {
            Some(PropertyValue::Vec2(position)) => assert!(position.x > 0.0),
            other => panic!("unexpected position {:?}", other),
        }
    }

    #[tokio::test]
    async fn singleplayer_scene_change_bumps_epoch() {
        let mut manager = SessionManager::new(protocol());
        let session = manager
            .switch(SessionConfig::Singleplayer {
                scene_name: "pond".to_string(),
            })
            .await
            .unwrap();

        let epoch = session.change_scene("marsh").await.unwrap();
        assert_eq!(epoch, 1);
        assert_eq!(session.scene().name(), "marsh");
        assert!(session.scene().find_pawn(LOCAL_CLIENT_ID).is_some());

        let events = session.update(1.0 / 60.0).await;
        assert!(events.contains(&SessionEvent::SceneChanged {
            scene_epoch: 1,
            scene_name: "marsh".to_string()
        }));
    }

    #[tokio::test]
    async fn switching_resets_previous_session() {
        let mut manager = SessionManager::new(protocol());
        manager
            .switch(SessionConfig::Singleplayer {
                scene_name: "a".to_string(),
            })
            .await
            .unwrap();
        manager
            .switch(SessionConfig::Singleplayer {
                scene_name: "b".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(manager.active().unwrap().scene().name(), "b");

        manager.reset().await;
        assert!(!manager.is_active());
    }

    #[test]
    fn stale_snapshots_are_rejected() {
        let mut scene = Scene::new("pond", false);
        scene.reset("pond", 2);

        let snapshot = |tick, scene_epoch| Snapshot {
            tick,
            scene_epoch,
            ..Default::default()
        };

        assert_eq!(accept_snapshot(&scene, None, &snapshot(5, 2)), Some(5));
        assert_eq!(accept_snapshot(&scene, None, &snapshot(5, 1)), None);
        assert_eq!(accept_snapshot(&scene, Some(5), &snapshot(5, 2)), None);
        assert_eq!(accept_snapshot(&scene, Some(5), &snapshot(4, 2)), None);
        assert_eq!(accept_snapshot(&scene, Some(5), &snapshot(6, 2)), Some(6));
    }
}
