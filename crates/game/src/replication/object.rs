use std::any::Any;
use std::fmt;

use glam::Vec2;

use crate::net::{WireReader, WireWriter};

use super::property::{
    PropertyDescriptor, PropertyId, PropertyValue, TrackedProperty,
};
use super::snapshot::ObjectTree;
use super::ReplicationError;

pub const UNASSIGNED_NETWORK_ID: i32 = -1;
pub const NO_OWNER: i32 = -1;

/// Gameplay state of one replicable object type.
///
/// Implementors describe their properties once in a static table and expose
/// them by id; the replication layer never sees concrete fields.
pub trait Replicate: fmt::Debug + Send + 'static {
    /// Stable identifier of the concrete type, used to rebuild an empty
    /// instance through the object registry.
    fn net_type(&self) -> u32;

    fn properties(&self) -> &'static [PropertyDescriptor];

    fn get(&self, id: PropertyId) -> Option<PropertyValue>;

    /// Writes a value. Returns `false` if the id is unknown or the value has
    /// the wrong kind.
    fn set(&mut self, id: PropertyId, value: PropertyValue) -> bool;

    fn is_pawn(&self) -> bool {
        false
    }

    /// Runs a named gameplay action. Returns `false` when the action is not
    /// known to this object.
    fn apply_action(&mut self, _action: &str, _direction: Vec2) -> bool {
        false
    }

    /// Advances the object's own gameplay state. Runs on the authority only.
    fn simulate(&mut self, _dt: f32) {}

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Every property, for a client's first sync.
    Full,
    /// Only properties dirtied since the last clear.
    Delta,
}

/// A node of the replicated scene tree.
#[derive(Debug)]
pub struct NetObject {
    network_id: i32,
    owner: i32,
    replicates: bool,
    state: Box<dyn Replicate>,
    tracked: Vec<TrackedProperty>,
    children: Vec<NetObject>,
}

impl NetObject {
    pub fn new(state: impl Replicate) -> Self {
        Self::from_boxed(Box::new(state))
    }

    pub fn from_boxed(state: Box<dyn Replicate>) -> Self {
        let tracked = state
            .properties()
            .iter()
            .map(|descriptor| {
                let current = state
                    .get(descriptor.id)
                    .unwrap_or_else(|| PropertyValue::default_for(descriptor.kind));
                TrackedProperty::new(*descriptor, current)
            })
            .collect();

        Self {
            network_id: UNASSIGNED_NETWORK_ID,
            owner: NO_OWNER,
            replicates: true,
            state,
            tracked,
            children: Vec::new(),
        }
    }

    /// A node that never takes part in replication, though its children may.
    pub fn local(state: impl Replicate) -> Self {
        let mut object = Self::new(state);
        object.replicates = false;
        object
    }

    pub fn with_owner(mut self, owner: i32) -> Self {
        self.owner = owner;
        self
    }

    pub fn with_child(mut self, child: NetObject) -> Self {
        self.children.push(child);
        self
    }

    pub fn net_type(&self) -> u32 {
        self.state.net_type()
    }

    pub fn network_id(&self) -> i32 {
        self.network_id
    }

    pub(crate) fn set_network_id(&mut self, network_id: i32) {
        self.network_id = network_id;
    }

    pub fn owner(&self) -> i32 {
        self.owner
    }

    pub fn set_owner(&mut self, owner: i32) {
        self.owner = owner;
    }

    pub fn replicates(&self) -> bool {
        self.replicates
    }

    pub fn is_pawn(&self) -> bool {
        self.state.is_pawn()
    }

    pub fn state(&self) -> &dyn Replicate {
        self.state.as_ref()
    }

    /// Mutable gameplay state. Changes are picked up by the next dirty scan.
    pub fn state_mut(&mut self) -> &mut dyn Replicate {
        self.state.as_mut()
    }

    pub fn downcast_ref<T: Replicate>(&self) -> Option<&T> {
        self.state.as_any().downcast_ref()
    }

    pub fn downcast_mut<T: Replicate>(&mut self) -> Option<&mut T> {
        self.state.as_any_mut().downcast_mut()
    }

    pub fn children(&self) -> &[NetObject] {
        &self.children
    }

    pub(crate) fn children_mut(&mut self) -> &mut Vec<NetObject> {
        &mut self.children
    }

    pub fn get(&self, id: PropertyId) -> Option<PropertyValue> {
        self.state.get(id)
    }

    pub fn set(&mut self, id: PropertyId, value: PropertyValue) -> Result<(), ReplicationError> {
        if self.state.set(id, value) {
            Ok(())
        } else {
            Err(ReplicationError::RejectedValue {
                type_id: self.net_type(),
                property_id: id,
            })
        }
    }

    pub fn is_dirty(&self, id: PropertyId) -> bool {
        self.tracked
            .iter()
            .any(|tracked| tracked.id() == id && tracked.is_dirty())
    }

    pub fn dirty_count(&self) -> usize {
        self.tracked.iter().filter(|t| t.is_dirty()).count()
    }

    /// Compares every property against its last scanned value. Returns the
    /// number of dirty properties afterwards.
    pub fn update_dirty(&mut self) -> usize {
        let mut dirty = 0;
        for tracked in &mut self.tracked {
            let current = self
                .state
                .get(tracked.id())
                .unwrap_or_else(|| PropertyValue::default_for(tracked.kind()));
            if tracked.scan(current) {
                dirty += 1;
            }
        }
        dirty
    }

    pub fn clear_dirty(&mut self) {
        for tracked in &mut self.tracked {
            tracked.clear();
        }
    }

    /// Property blob: `u16 count` then `(u16 id, value)` per included property.
    pub fn encode_properties(&self, mode: SyncMode) -> Vec<u8> {
        let included: Vec<&TrackedProperty> = self
            .tracked
            .iter()
            .filter(|tracked| mode == SyncMode::Full || tracked.is_dirty())
            .collect();

        let mut writer = WireWriter::with_capacity(2 + included.len() * 8);
        writer.write_u16(included.len() as u16);
        for tracked in included {
            writer.write_u16(tracked.id());
            match self.state.get(tracked.id()) {
                Some(value) if value.kind() == tracked.kind() => value.encode(&mut writer),
                _ => tracked.last_value().encode(&mut writer),
            }
        }
        writer.into_bytes()
    }

    /// Applies a property blob through the object's setters. Returns the
    /// number of properties written.
    ///
    /// Properties carry no individual length, so an unknown id leaves the rest
    /// of the blob unreadable and is reported as an error.
    pub fn apply_properties(&mut self, blob: &[u8]) -> Result<usize, ReplicationError> {
        let mut reader = WireReader::new(blob);
        let count = reader.read_u16()?;

        for _ in 0..count {
            let id = reader.read_u16()?;
            let Some(tracked) = self.tracked.iter_mut().find(|t| t.id() == id) else {
                return Err(ReplicationError::UnknownProperty {
                    type_id: self.state.net_type(),
                    property_id: id,
                });
            };

            let value = PropertyValue::decode(tracked.kind(), &mut reader)?;
            if !self.state.set(id, value.clone()) {
                return Err(ReplicationError::RejectedValue {
                    type_id: self.state.net_type(),
                    property_id: id,
                });
            }
            tracked.synced(value);
        }

        Ok(count as usize)
    }

    pub fn update_dirty_recursive(&mut self) -> usize {
        let mut dirty = if self.replicates { self.update_dirty() } else { 0 };
        for child in &mut self.children {
            dirty += child.update_dirty_recursive();
        }
        dirty
    }

    pub fn clear_dirty_recursive(&mut self) {
        self.clear_dirty();
        for child in &mut self.children {
            child.clear_dirty_recursive();
        }
    }

    /// Gives every replicating node in this subtree that has no id yet the
    /// next id from `next_id`. A newly registered node is unknown to every
    /// receiver, so all of its properties go out with the next delta.
    pub(crate) fn assign_network_ids(&mut self, next_id: &mut i32) {
        if self.replicates && self.network_id == UNASSIGNED_NETWORK_ID {
            self.network_id = *next_id;
            *next_id += 1;
            for tracked in &mut self.tracked {
                tracked.mark_dirty();
            }
        }
        for child in &mut self.children {
            child.assign_network_ids(next_id);
        }
    }

    pub fn find(&self, network_id: i32) -> Option<&NetObject> {
        if self.network_id == network_id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(network_id))
    }

    pub fn find_mut(&mut self, network_id: i32) -> Option<&mut NetObject> {
        if self.network_id == network_id {
            return Some(self);
        }
        self.children
            .iter_mut()
            .find_map(|child| child.find_mut(network_id))
    }

    pub fn find_pawn(&self, client_id: i32) -> Option<&NetObject> {
        if self.owner == client_id && self.is_pawn() {
            return Some(self);
        }
        self.children
            .iter()
            .find_map(|child| child.find_pawn(client_id))
    }

    pub fn find_pawn_mut(&mut self, client_id: i32) -> Option<&mut NetObject> {
        if self.owner == client_id && self.is_pawn() {
            return Some(self);
        }
        self.children
            .iter_mut()
            .find_map(|child| child.find_pawn_mut(client_id))
    }

    pub(crate) fn collect_owned(&self, client_id: i32, out: &mut Vec<i32>) {
        if self.owner == client_id && self.network_id != UNASSIGNED_NETWORK_ID {
            out.push(self.network_id);
        }
        for child in &self.children {
            child.collect_owned(client_id, out);
        }
    }

    /// Removes and returns the descendant with `network_id`.
    pub(crate) fn remove_descendant(&mut self, network_id: i32) -> Option<NetObject> {
        if let Some(index) = self
            .children
            .iter()
            .position(|child| child.network_id == network_id)
        {
            return Some(self.children.remove(index));
        }
        self.children
            .iter_mut()
            .find_map(|child| child.remove_descendant(network_id))
    }

    /// Appends the wire trees of this subtree to `out`. A non-replicating
    /// node is left out and its replicating descendants take its place.
    pub fn append_trees(&self, mode: SyncMode, out: &mut Vec<ObjectTree>) {
        if !self.replicates {
            for child in &self.children {
                child.append_trees(mode, out);
            }
            return;
        }

        let mut children = Vec::new();
        for child in &self.children {
            child.append_trees(mode, &mut children);
        }
        out.push(ObjectTree {
            type_id: self.net_type(),
            network_id: self.network_id,
            owner: self.owner,
            blob: self.encode_properties(mode),
            children,
        });
    }

    /// Advances gameplay state of the whole subtree by `dt` seconds.
    pub fn simulate(&mut self, dt: f32) {
        self.state.simulate(dt);
        for child in &mut self.children {
            child.simulate(dt);
        }
    }

    pub(crate) fn count_nodes(&self) -> usize {
        1 + self.children.iter().map(NetObject::count_nodes).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::{
        Pawn, Prop, PAWN_HEALTH, PAWN_NAME, PAWN_POSITION, PROP_LABEL,
    };

    #[test]
    fn new_object_is_clean() {
        let mut pawn = NetObject::new(Pawn::default());
        assert_eq!(pawn.dirty_count(), 0);
        assert_eq!(pawn.update_dirty(), 0);
        assert_eq!(pawn.network_id(), UNASSIGNED_NETWORK_ID);
        assert_eq!(pawn.owner(), NO_OWNER);
    }

    #[test]
    fn dirty_lifecycle() {
        let mut pawn = NetObject::new(Pawn::default());

        pawn.set(PAWN_HEALTH, PropertyValue::Int(40)).unwrap();
        assert!(!pawn.is_dirty(PAWN_HEALTH));

        pawn.update_dirty();
        assert!(pawn.is_dirty(PAWN_HEALTH));
        assert!(!pawn.is_dirty(PAWN_POSITION));

        pawn.clear_dirty();
        assert!(!pawn.is_dirty(PAWN_HEALTH));

        pawn.update_dirty();
        assert!(!pawn.is_dirty(PAWN_HEALTH));
    }

    #[test]
    fn full_blob_contains_every_property() {
        let pawn = NetObject::new(Pawn::default());
        let blob = pawn.encode_properties(SyncMode::Full);
        let count = u16::from_le_bytes([blob[0], blob[1]]) as usize;
        assert_eq!(count, pawn.state().properties().len());
    }

    #[test]
    fn delta_applies_only_dirty_properties() {
        let mut source = NetObject::new(Pawn::default());
        source.set(PAWN_HEALTH, PropertyValue::Int(12)).unwrap();
        source
            .set(PAWN_NAME, PropertyValue::Text("frog".to_string()))
            .unwrap();
        source.update_dirty();

        let blob = source.encode_properties(SyncMode::Delta);

        let mut target = NetObject::new(Pawn::default());
        target
            .set(PAWN_POSITION, PropertyValue::Vec2(Vec2::new(9.0, 9.0)))
            .unwrap();

        let applied = target.apply_properties(&blob).unwrap();
        assert_eq!(applied, 2);
        assert_eq!(target.get(PAWN_HEALTH), Some(PropertyValue::Int(12)));
        assert_eq!(
            target.get(PAWN_NAME),
            Some(PropertyValue::Text("frog".to_string()))
        );
        assert_eq!(
            target.get(PAWN_POSITION),
            Some(PropertyValue::Vec2(Vec2::new(9.0, 9.0)))
        );
    }

    #[test]
    fn received_values_do_not_dirty_the_receiver() {
        let mut source = NetObject::new(Pawn::default());
        source.set(PAWN_HEALTH, PropertyValue::Int(3)).unwrap();
        source.update_dirty();

        let mut target = NetObject::new(Pawn::default());
        target
            .apply_properties(&source.encode_properties(SyncMode::Delta))
            .unwrap();
        assert_eq!(target.update_dirty(), 0);
    }

    #[test]
    fn unknown_property_id_is_fatal() {
        let mut writer = WireWriter::new();
        writer.write_u16(1);
        writer.write_u16(999);
        writer.write_i32(0);
        let blob = writer.into_bytes();

        let mut target = NetObject::new(Prop::default());
        assert!(matches!(
            target.apply_properties(&blob),
            Err(ReplicationError::UnknownProperty {
                property_id: 999,
                ..
            })
        ));
    }

    #[test]
    fn ids_are_assigned_only_to_replicating_nodes() {
        let mut root = NetObject::local(Prop::default())
            .with_child(NetObject::new(Prop::default()))
            .with_child(NetObject::new(Pawn::default()).with_owner(2));

        let mut next = 1;
        root.assign_network_ids(&mut next);

        assert_eq!(root.network_id(), UNASSIGNED_NETWORK_ID);
        assert_eq!(root.children()[0].network_id(), 1);
        assert_eq!(root.children()[1].network_id(), 2);
        assert_eq!(next, 3);

        let mut trees = Vec::new();
        root.append_trees(SyncMode::Full, &mut trees);
        assert_eq!(
            trees.iter().map(|t| t.network_id).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(root.find_pawn(2).map(NetObject::network_id), Some(2));
    }

    #[test]
    fn newly_assigned_nodes_send_every_property() {
        let mut root = NetObject::local(Prop::default())
            .with_child(NetObject::new(Pawn::default()).with_owner(2));
        root.assign_network_ids(&mut 1);

        assert_eq!(root.dirty_count(), 0);
        let pawn = &root.children()[0];
        assert_eq!(pawn.dirty_count(), pawn.state().properties().len());

        let delta = pawn.encode_properties(SyncMode::Delta);
        assert_eq!(delta, pawn.encode_properties(SyncMode::Full));
    }

    #[test]
    fn downcast_reaches_concrete_state() {
        let mut prop = NetObject::new(Prop::default());
        prop.set(PROP_LABEL, PropertyValue::Text("barrel".to_string()))
            .unwrap();
        assert_eq!(prop.downcast_ref::<Prop>().unwrap().label, "barrel");
        assert!(prop.downcast_mut::<Pawn>().is_none());
    }
}
