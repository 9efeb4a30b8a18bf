use glam::Vec2;

use crate::net::{DecodeError, WireReader, WireWriter};

pub type PropertyId = u16;

/// Closed set of replicable value kinds. Adding a kind means extending both
/// [`PropertyValue::encode`] and [`PropertyValue::decode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    Bool,
    Byte,
    Int,
    Float,
    Text,
    Vec2,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Byte(u8),
    Int(i32),
    Float(f32),
    Text(String),
    Vec2(Vec2),
}

impl PropertyValue {
    pub fn kind(&self) -> PropertyKind {
        match self {
            PropertyValue::Bool(_) => PropertyKind::Bool,
            PropertyValue::Byte(_) => PropertyKind::Byte,
            PropertyValue::Int(_) => PropertyKind::Int,
            PropertyValue::Float(_) => PropertyKind::Float,
            PropertyValue::Text(_) => PropertyKind::Text,
            PropertyValue::Vec2(_) => PropertyKind::Vec2,
        }
    }

    pub fn default_for(kind: PropertyKind) -> Self {
        match kind {
            PropertyKind::Bool => PropertyValue::Bool(false),
            PropertyKind::Byte => PropertyValue::Byte(0),
            PropertyKind::Int => PropertyValue::Int(0),
            PropertyKind::Float => PropertyValue::Float(0.0),
            PropertyKind::Text => PropertyValue::Text(String::new()),
            PropertyKind::Vec2 => PropertyValue::Vec2(Vec2::ZERO),
        }
    }

    pub fn encode(&self, writer: &mut WireWriter) {
        match self {
            PropertyValue::Bool(v) => writer.write_bool(*v),
            PropertyValue::Byte(v) => writer.write_u8(*v),
            PropertyValue::Int(v) => writer.write_i32(*v),
            PropertyValue::Float(v) => writer.write_f32(*v),
            PropertyValue::Text(v) => writer.write_string(v),
            PropertyValue::Vec2(v) => writer.write_vec2(*v),
        }
    }

    pub fn decode(kind: PropertyKind, reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        Ok(match kind {
            PropertyKind::Bool => PropertyValue::Bool(reader.read_bool()?),
            PropertyKind::Byte => PropertyValue::Byte(reader.read_u8()?),
            PropertyKind::Int => PropertyValue::Int(reader.read_i32()?),
            PropertyKind::Float => PropertyValue::Float(reader.read_f32()?),
            PropertyKind::Text => PropertyValue::Text(reader.read_string()?),
            PropertyKind::Vec2 => PropertyValue::Vec2(reader.read_vec2()?),
        })
    }
}

/// Static description of one property of a replicable type. Ids are unique
/// within a type and must stay stable across builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyDescriptor {
    pub id: PropertyId,
    pub name: &'static str,
    pub kind: PropertyKind,
}

impl PropertyDescriptor {
    pub const fn new(id: PropertyId, name: &'static str, kind: PropertyKind) -> Self {
        Self { id, name, kind }
    }
}

/// Change tracking for one property of a live object.
#[derive(Debug, Clone)]
pub struct TrackedProperty {
    descriptor: PropertyDescriptor,
    last_value: PropertyValue,
    dirty: bool,
}

impl TrackedProperty {
    pub fn new(descriptor: PropertyDescriptor, current: PropertyValue) -> Self {
        Self {
            descriptor,
            last_value: current,
            dirty: false,
        }
    }

    pub fn descriptor(&self) -> &PropertyDescriptor {
        &self.descriptor
    }

    pub fn id(&self) -> PropertyId {
        self.descriptor.id
    }

    pub fn kind(&self) -> PropertyKind {
        self.descriptor.kind
    }

    pub fn last_value(&self) -> &PropertyValue {
        &self.last_value
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Compares against the last scanned value. Marks the property dirty on
    /// a change; an unchanged value leaves the flag as it was.
    pub fn scan(&mut self, current: PropertyValue) -> bool {
        if current != self.last_value {
            self.last_value = current;
            self.dirty = true;
        }
        self.dirty
    }

    /// Forces the current value into the next delta, e.g. for a node no
    /// receiver has seen yet.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear(&mut self) {
        self.dirty = false;
    }

    /// Records a value received from the authority without dirtying it.
    pub fn synced(&mut self, value: PropertyValue) {
        self.last_value = value;
        self.dirty = false;
    }
}
