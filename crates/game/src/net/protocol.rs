use crate::replication::{ObjectRegistry, ReplicationError, Snapshot};
use crate::simulation::{Command, CommandKind};

use super::codec::{DecodeError, WireReader, WireWriter};
use super::registry::{Registry, RegistryError};

pub const DEFAULT_TCP_PORT: u16 = 27015;
pub const DEFAULT_UDP_PORT: u16 = 27016;
pub const DEFAULT_TICK_RATE: u32 = 60;

/// Largest datagram the unreliable channel will send or accept.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    ConnectionRequest = 1,
    ConnectionAccept = 2,
    Empty = 3,
    Disconnect = 4,
    Chat = 5,
    CommandBatch = 6,
    Snapshot = 7,
    SceneChange = 8,
}

impl PacketType {
    pub const FIRST: u8 = PacketType::ConnectionRequest as u8;
    pub const LAST: u8 = PacketType::SceneChange as u8;

    /// Whether a leading byte can start a packet at all. The unreliable
    /// receive loop filters on this before decoding.
    pub fn is_valid_discriminator(byte: u8) -> bool {
        (Self::FIRST..=Self::LAST).contains(&byte)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Replication(#[from] ReplicationError),
    #[error("empty message")]
    Empty,
    #[error("{0} trailing bytes after packet body")]
    TrailingBytes(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    ConnectionRequest { udp_port: u16 },
    ConnectionAccept { client_id: i32, server_udp_port: u16 },
    Empty,
    Disconnect { reason: String },
    Chat { client_id: i32, message: String },
    CommandBatch(Vec<Command>),
    Snapshot(Snapshot),
    SceneChange { scene_epoch: u32, scene_name: String },
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::ConnectionRequest { .. } => PacketType::ConnectionRequest,
            Packet::ConnectionAccept { .. } => PacketType::ConnectionAccept,
            Packet::Empty => PacketType::Empty,
            Packet::Disconnect { .. } => PacketType::Disconnect,
            Packet::Chat { .. } => PacketType::Chat,
            Packet::CommandBatch(_) => PacketType::CommandBatch,
            Packet::Snapshot(_) => PacketType::Snapshot,
            Packet::SceneChange { .. } => PacketType::SceneChange,
        }
    }

    pub fn discriminator(&self) -> u8 {
        self.packet_type() as u8
    }

    fn encode_body(&self, writer: &mut WireWriter) {
        match self {
            Packet::ConnectionRequest { udp_port } => writer.write_u16(*udp_port),
            Packet::ConnectionAccept {
                client_id,
                server_udp_port,
            } => {
                writer.write_i32(*client_id);
                writer.write_u16(*server_udp_port);
            }
            Packet::Empty => {}
            Packet::Disconnect { reason } => writer.write_string(reason),
            Packet::Chat { client_id, message } => {
                writer.write_i32(*client_id);
                writer.write_string(message);
            }
            Packet::CommandBatch(commands) => {
                writer.write_u32(commands.len() as u32);
                for command in commands {
                    command.encode(writer);
                }
            }
            Packet::Snapshot(snapshot) => snapshot.encode(writer),
            Packet::SceneChange {
                scene_epoch,
                scene_name,
            } => {
                writer.write_u32(*scene_epoch);
                writer.write_string(scene_name);
            }
        }
    }

    fn decode_body(
        &mut self,
        reader: &mut WireReader<'_>,
        commands: &Registry<u32, CommandKind>,
    ) -> Result<(), ProtocolError> {
        match self {
            Packet::ConnectionRequest { udp_port } => *udp_port = reader.read_u16()?,
            Packet::ConnectionAccept {
                client_id,
                server_udp_port,
            } => {
                *client_id = reader.read_i32()?;
                *server_udp_port = reader.read_u16()?;
            }
            Packet::Empty => {}
            Packet::Disconnect { reason } => *reason = reader.read_string()?,
            Packet::Chat { client_id, message } => {
                *client_id = reader.read_i32()?;
                *message = reader.read_string()?;
            }
            Packet::CommandBatch(batch) => {
                let count = reader.read_u32()? as usize;
                if count.saturating_mul(Command::ENVELOPE_LEN) > reader.remaining() {
                    return Err(DecodeError::LengthOutOfRange(count as i64).into());
                }
                batch.reserve(count);
                for _ in 0..count {
                    batch.push(Command::decode(reader, commands)?);
                }
            }
            Packet::Snapshot(snapshot) => *snapshot = Snapshot::decode(reader)?,
            Packet::SceneChange {
                scene_epoch,
                scene_name,
            } => {
                *scene_epoch = reader.read_u32()?;
                *scene_name = reader.read_string()?;
            }
        }
        Ok(())
    }
}

fn packet_table() -> [(u8, fn() -> Packet); 8] {
    [
        (PacketType::ConnectionRequest as u8, || {
            Packet::ConnectionRequest { udp_port: 0 }
        }),
        (PacketType::ConnectionAccept as u8, || {
            Packet::ConnectionAccept {
                client_id: -1,
                server_udp_port: 0,
            }
        }),
        (PacketType::Empty as u8, || Packet::Empty),
        (PacketType::Disconnect as u8, || Packet::Disconnect {
            reason: String::new(),
        }),
        (PacketType::Chat as u8, || Packet::Chat {
            client_id: -1,
            message: String::new(),
        }),
        (PacketType::CommandBatch as u8, || {
            Packet::CommandBatch(Vec::new())
        }),
        (PacketType::Snapshot as u8, || {
            Packet::Snapshot(Snapshot::default())
        }),
        (PacketType::SceneChange as u8, || Packet::SceneChange {
            scene_epoch: 0,
            scene_name: String::new(),
        }),
    ]
}

/// The registries both peers must agree on, constructed once and shared by
/// every component that encodes or decodes messages.
#[derive(Debug)]
pub struct Protocol {
    packets: Registry<u8, Packet>,
    commands: Registry<u32, CommandKind>,
    objects: ObjectRegistry,
}

impl Protocol {
    pub fn new(objects: ObjectRegistry) -> Result<Self, RegistryError> {
        Ok(Self {
            packets: Registry::from_table("packet", packet_table())?,
            commands: Registry::from_table("command", crate::simulation::command_table())?,
            objects,
        })
    }

    pub fn packets(&self) -> &Registry<u8, Packet> {
        &self.packets
    }

    pub fn commands(&self) -> &Registry<u32, CommandKind> {
        &self.commands
    }

    pub fn objects(&self) -> &ObjectRegistry {
        &self.objects
    }

    pub fn encode_packet(&self, packet: &Packet) -> Vec<u8> {
        let mut writer = WireWriter::with_capacity(64);
        writer.write_u8(packet.discriminator());
        packet.encode_body(&mut writer);
        writer.into_bytes()
    }

    pub fn decode_packet(&self, bytes: &[u8]) -> Result<Packet, ProtocolError> {
        let mut reader = WireReader::new(bytes);
        if reader.is_exhausted() {
            return Err(ProtocolError::Empty);
        }

        let discriminator = reader.read_u8()?;
        let mut packet = self.packets.create(discriminator)?;
        packet.decode_body(&mut reader, &self.commands)?;

        if !reader.is_exhausted() {
            return Err(ProtocolError::TrailingBytes(reader.remaining()));
        }
        Ok(packet)
    }
}
