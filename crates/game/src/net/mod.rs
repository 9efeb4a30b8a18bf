mod backoff;
mod cancel;
mod codec;
mod config;
mod connection;
mod frame;
mod protocol;
mod registry;
mod server;
mod stats;

pub use cancel::{CancelSignal, CancelToken};
pub use codec::{DecodeError, WireReader, WireWriter};
pub use config::{ClientConfig, ServerConfig, DEFAULT_HANDSHAKE_TIMEOUT};
pub use connection::{
    ConnectError, Connection, ConnectionEvent, ConnectionState, REASON_CLIENT_REQUESTED,
    REASON_SERVER_CLOSED, REASON_TIMEOUT,
};
pub use frame::{FrameError, FrameReader, FrameWriter, FRAME_HEADER_LEN, MAX_FRAME_LEN};
pub use protocol::{
    Packet, PacketType, Protocol, ProtocolError, DEFAULT_TCP_PORT, DEFAULT_TICK_RATE,
    DEFAULT_UDP_PORT, MAX_DATAGRAM_SIZE,
};
pub use registry::{Registry, RegistryError};
pub use server::{
    ClientSlot, ConnectionManager, HostServer, ServerEvent, REASON_SERVER_FULL,
    REASON_SERVER_SHUTDOWN,
};
pub use stats::{NetworkStats, StatsSnapshot};
