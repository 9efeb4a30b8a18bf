use std::any::Any;

use glam::Vec2;

use crate::replication::{PropertyDescriptor, PropertyId, PropertyKind, PropertyValue, Replicate};

use super::PROP_TYPE_ID;

pub const PROP_LABEL: PropertyId = 1;
pub const PROP_POSITION: PropertyId = 2;
pub const PROP_ACTIVE: PropertyId = 3;

static PROP_PROPERTIES: [PropertyDescriptor; 3] = [
    PropertyDescriptor::new(PROP_LABEL, "label", PropertyKind::Text),
    PropertyDescriptor::new(PROP_POSITION, "position", PropertyKind::Vec2),
    PropertyDescriptor::new(PROP_ACTIVE, "active", PropertyKind::Bool),
];

/// Static scene piece: lily pads, logs, the scene root.
#[derive(Debug, Clone, Default)]
pub struct Prop {
    pub label: String,
    pub position: Vec2,
    pub active: bool,
}

impl Prop {
    pub fn new(label: impl Into<String>, position: Vec2) -> Self {
        Self {
            label: label.into(),
            position,
            active: true,
        }
    }
}

impl Replicate for Prop {
    fn net_type(&self) -> u32 {
        PROP_TYPE_ID
    }

    fn properties(&self) -> &'static [PropertyDescriptor] {
        &PROP_PROPERTIES
    }

    fn get(&self, id: PropertyId) -> Option<PropertyValue> {
        Some(match id {
            PROP_LABEL => PropertyValue::Text(self.label.clone()),
            PROP_POSITION => PropertyValue::Vec2(self.position),
            PROP_ACTIVE => PropertyValue::Bool(self.active),
            _ => return None,
        })
    }

    fn set(&mut self, id: PropertyId, value: PropertyValue) -> bool {
        match (id, value) {
            (PROP_LABEL, PropertyValue::Text(v)) => self.label = v,
            (PROP_POSITION, PropertyValue::Vec2(v)) => self.position = v,
            (PROP_ACTIVE, PropertyValue::Bool(v)) => self.active = v,
            _ => return false,
        }
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
