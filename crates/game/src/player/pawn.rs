use std::any::Any;

use glam::Vec2;

use crate::replication::{PropertyDescriptor, PropertyId, PropertyKind, PropertyValue, Replicate};
use crate::simulation::{LEAP_ACTION, MOVE_ACTION};

use super::{PawnConfig, PAWN_TYPE_ID};

pub const DASH_ACTION: &str = "dash";
pub const HEAL_ACTION: &str = "heal";

pub const PAWN_POSITION: PropertyId = 1;
pub const PAWN_VELOCITY: PropertyId = 2;
pub const PAWN_DESIRED_DIRECTION: PropertyId = 3;
pub const PAWN_HEIGHT: PropertyId = 4;
pub const PAWN_GROUNDED: PropertyId = 5;
pub const PAWN_HEALTH: PropertyId = 6;
pub const PAWN_NAME: PropertyId = 7;
pub const PAWN_COLOR: PropertyId = 8;

static PAWN_PROPERTIES: [PropertyDescriptor; 8] = [
    PropertyDescriptor::new(PAWN_POSITION, "position", PropertyKind::Vec2),
    PropertyDescriptor::new(PAWN_VELOCITY, "velocity", PropertyKind::Vec2),
    PropertyDescriptor::new(PAWN_DESIRED_DIRECTION, "desired_direction", PropertyKind::Vec2),
    PropertyDescriptor::new(PAWN_HEIGHT, "height", PropertyKind::Float),
    PropertyDescriptor::new(PAWN_GROUNDED, "grounded", PropertyKind::Bool),
    PropertyDescriptor::new(PAWN_HEALTH, "health", PropertyKind::Int),
    PropertyDescriptor::new(PAWN_NAME, "name", PropertyKind::Text),
    PropertyDescriptor::new(PAWN_COLOR, "color", PropertyKind::Byte),
];

/// The frog a client controls. Moves on the ground plane and hops along the
/// vertical axis; `height` is the distance above the ground.
#[derive(Debug, Clone)]
pub struct Pawn {
    pub position: Vec2,
    pub velocity: Vec2,
    pub desired_direction: Vec2,
    pub height: f32,
    pub vertical_velocity: f32,
    pub grounded: bool,
    pub health: i32,
    pub name: String,
    pub color: u8,
    config: PawnConfig,
}

impl Default for Pawn {
    fn default() -> Self {
        Self::new(PawnConfig::default())
    }
}

impl Pawn {
    pub fn new(config: PawnConfig) -> Self {
        Self {
            position: Vec2::ZERO,
            velocity: Vec2::ZERO,
            desired_direction: Vec2::ZERO,
            height: 0.0,
            vertical_velocity: 0.0,
            grounded: true,
            health: config.max_health,
            name: String::new(),
            color: 0,
            config,
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn config(&self) -> &PawnConfig {
        &self.config
    }

    fn leap(&mut self, direction: Vec2) {
        if !self.grounded {
            return;
        }
        self.vertical_velocity = self.config.leap_power;
        self.grounded = false;

        let direction = direction.normalize_or_zero();
        if direction != Vec2::ZERO {
            self.velocity = direction * self.config.leap_speed;
        }
    }

    fn tick_vertical(&mut self, dt: f32) {
        if self.grounded {
            return;
        }

        let gravity = if self.vertical_velocity > 0.0 {
            self.config.gravity
        } else {
            self.config.gravity_fall
        };
        self.vertical_velocity =
            (self.vertical_velocity - gravity * dt).max(-self.config.max_fall_speed);
        self.height += self.vertical_velocity * dt;

        if self.height <= 0.0 {
            self.height = 0.0;
            self.vertical_velocity = 0.0;
            self.grounded = true;
        }
    }

    fn tick_horizontal(&mut self, dt: f32) {
        let (acceleration, max_speed) = if self.grounded {
            (self.config.accelerate_ground, self.config.move_speed_ground)
        } else {
            (self.config.accelerate_air, self.config.move_speed_air)
        };

        if self.desired_direction.length_squared() > 0.001 {
            let blend = (acceleration * dt).min(1.0);
            self.velocity = self
                .velocity
                .lerp(self.desired_direction * max_speed, blend);
        } else if self.grounded {
            let speed = (self.velocity.length() - self.config.decelerate_ground * dt).max(0.0);
            self.velocity = self.velocity.normalize_or_zero() * speed;
        }

        self.position += self.velocity * dt;
    }
}

impl Replicate for Pawn {
    fn net_type(&self) -> u32 {
        PAWN_TYPE_ID
    }

    fn properties(&self) -> &'static [PropertyDescriptor] {
        &PAWN_PROPERTIES
    }

    fn get(&self, id: PropertyId) -> Option<PropertyValue> {
        Some(match id {
            PAWN_POSITION => PropertyValue::Vec2(self.position),
            PAWN_VELOCITY => PropertyValue::Vec2(self.velocity),
            PAWN_DESIRED_DIRECTION => PropertyValue::Vec2(self.desired_direction),
            PAWN_HEIGHT => PropertyValue::Float(self.height),
            PAWN_GROUNDED => PropertyValue::Bool(self.grounded),
            PAWN_HEALTH => PropertyValue::Int(self.health),
            PAWN_NAME => PropertyValue::Text(self.name.clone()),
            PAWN_COLOR => PropertyValue::Byte(self.color),
            _ => return None,
        })
    }

    fn set(&mut self, id: PropertyId, value: PropertyValue) -> bool {
        match (id, value) {
            (PAWN_POSITION, PropertyValue::Vec2(v)) => self.position = v,
            (PAWN_VELOCITY, PropertyValue::Vec2(v)) => self.velocity = v,
            (PAWN_DESIRED_DIRECTION, PropertyValue::Vec2(v)) => self.desired_direction = v,
            (PAWN_HEIGHT, PropertyValue::Float(v)) => self.height = v,
            (PAWN_GROUNDED, PropertyValue::Bool(v)) => self.grounded = v,
            (PAWN_HEALTH, PropertyValue::Int(v)) => self.health = v,
            (PAWN_NAME, PropertyValue::Text(v)) => self.name = v,
            (PAWN_COLOR, PropertyValue::Byte(v)) => self.color = v,
            _ => return false,
        }
        true
    }

    fn is_pawn(&self) -> bool {
        true
    }

    fn apply_action(&mut self, action: &str, direction: Vec2) -> bool {
        match action {
            MOVE_ACTION => self.desired_direction = direction.clamp_length_max(1.0),
            LEAP_ACTION => self.leap(direction),
            DASH_ACTION => {
                self.velocity += direction.normalize_or_zero() * self.config.dash_speed;
            }
            HEAL_ACTION => {
                self.health = (self.health + self.config.heal_amount).min(self.config.max_health);
            }
            _ => return false,
        }
        true
    }

    fn simulate(&mut self, dt: f32) {
        self.tick_vertical(dt);
        self.tick_horizontal(dt);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f32 = 1.0 / 60.0;

    #[test]
    fn move_clamps_direction() {
        let mut pawn = Pawn::default();
        assert!(pawn.apply_action(MOVE_ACTION, Vec2::new(3.0, 4.0)));
        assert!((pawn.desired_direction.length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn pawn_accelerates_toward_desired_direction() {
        let mut pawn = Pawn::default();
        pawn.apply_action(MOVE_ACTION, Vec2::X);
        for _ in 0..60 {
            pawn.simulate(DT);
        }
        assert!(pawn.position.x > 0.0);
        assert!(pawn.velocity.x <= pawn.config().move_speed_ground + 1e-3);
    }

    #[test]
    fn leap_lands_again() {
        let mut pawn = Pawn::default();
        assert!(pawn.apply_action(LEAP_ACTION, Vec2::Y));
        assert!(!pawn.grounded);

        pawn.simulate(DT);
        assert!(pawn.height > 0.0);

        for _ in 0..300 {
            pawn.simulate(DT);
        }
        assert!(pawn.grounded);
        assert_eq!(pawn.height, 0.0);
        assert!(pawn.position.y > 0.0);
    }

    #[test]
    fn heal_is_capped() {
        let mut pawn = Pawn::default();
        pawn.health = 90;
        assert!(pawn.apply_action(HEAL_ACTION, Vec2::ZERO));
        assert_eq!(pawn.health, pawn.config().max_health);
    }

    #[test]
    fn unknown_action_is_rejected() {
        let mut pawn = Pawn::default();
        assert!(!pawn.apply_action("teleport", Vec2::X));
    }

    #[test]
    fn set_rejects_mismatched_kind() {
        let mut pawn = Pawn::default();
        assert!(!pawn.set(PAWN_HEALTH, PropertyValue::Float(1.0)));
        assert!(!pawn.set(99, PropertyValue::Int(1)));
        assert!(pawn.set(PAWN_COLOR, PropertyValue::Byte(3)));
        assert_eq!(pawn.get(PAWN_COLOR), Some(PropertyValue::Byte(3)));
    }
}
