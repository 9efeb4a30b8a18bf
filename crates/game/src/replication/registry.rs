use crate::net::{Registry, RegistryError};

use super::object::{NetObject, Replicate};

/// Constructors for every replicable type both peers know, keyed by type id.
#[derive(Debug)]
pub struct ObjectRegistry {
    types: Registry<u32, Box<dyn Replicate>>,
}

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self {
            types: Registry::new("object"),
        }
    }

    pub fn from_table(
        table: impl IntoIterator<Item = (u32, fn() -> Box<dyn Replicate>)>,
    ) -> Result<Self, RegistryError> {
        Ok(Self {
            types: Registry::from_table("object", table)?,
        })
    }

    pub fn register(
        &mut self,
        type_id: u32,
        constructor: fn() -> Box<dyn Replicate>,
    ) -> Result<(), RegistryError> {
        self.types.register(type_id, constructor)
    }

    pub fn contains(&self, type_id: u32) -> bool {
        self.types.contains(type_id)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// A default-valued object of `type_id` with no network id assigned.
    pub fn create(&self, type_id: u32) -> Result<NetObject, RegistryError> {
        self.types.create(type_id).map(NetObject::from_boxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::{self, Pawn, PAWN_TYPE_ID, PROP_TYPE_ID};

    #[test]
    fn game_types_are_registered() {
        let registry = player::object_registry().unwrap();
        assert_eq!(registry.len(), 2);

        let pawn = registry.create(PAWN_TYPE_ID).unwrap();
        assert!(pawn.is_pawn());
        assert_eq!(pawn.net_type(), PAWN_TYPE_ID);
        assert!(!registry.create(PROP_TYPE_ID).unwrap().is_pawn());
    }

    #[test]
    fn duplicate_type_is_rejected() {
        let mut registry = player::object_registry().unwrap();
        let err = registry
            .register(PAWN_TYPE_ID, || Box::new(Pawn::default()))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::Duplicate {
                registry: "object",
                discriminator: PAWN_TYPE_ID
            }
        );
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(matches!(
            ObjectRegistry::new().create(42),
            Err(RegistryError::Unknown {
                registry: "object",
                discriminator: 42
            })
        ));
    }
}
