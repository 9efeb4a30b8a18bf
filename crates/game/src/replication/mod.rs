mod object;
mod property;
mod registry;
mod scene;
mod snapshot;

pub use object::{NetObject, Replicate, SyncMode, NO_OWNER, UNASSIGNED_NETWORK_ID};
pub use property::{
    PropertyDescriptor, PropertyId, PropertyKind, PropertyValue, TrackedProperty,
};
pub use registry::ObjectRegistry;
pub use scene::Scene;
pub use snapshot::{CommandAck, ObjectTree, Snapshot};

use crate::net::DecodeError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplicationError {
    #[error("object type {type_id} has no property {property_id}")]
    UnknownProperty { type_id: u32, property_id: u16 },
    #[error("object type {type_id} rejected the value for property {property_id}")]
    RejectedValue { type_id: u32, property_id: u16 },
    #[error(transparent)]
    Decode(#[from] DecodeError),
}
