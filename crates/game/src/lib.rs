pub mod net;
pub mod player;
pub mod replication;
pub mod session;
pub mod simulation;

pub use net::{
    ClientConfig, ConnectError, Connection, ConnectionEvent, ConnectionState, HostServer,
    NetworkStats, Packet, PacketType, Protocol, ProtocolError, ServerConfig, ServerEvent,
    DEFAULT_TCP_PORT, DEFAULT_TICK_RATE, DEFAULT_UDP_PORT,
};
pub use replication::{NetObject, ObjectRegistry, Replicate, Scene, Snapshot, SyncMode};
pub use session::{
    Session, SessionConfig, SessionError, SessionEvent, SessionManager, SessionType,
    LOCAL_CLIENT_ID,
};
pub use simulation::{
    Command, CommandInbox, CommandKind, CommandSequencer, FixedTimestep, InputButtons,
    InputState,
};
