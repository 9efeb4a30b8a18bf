use glam::Vec2;
use leapfrog::player::{DASH_ACTION, HEAL_ACTION};
use leapfrog::{InputButtons, InputState};

const LEAP_EVERY: u32 = 90;
const DASH_EVERY: u32 = 240;
const HEAL_EVERY: u32 = 600;

/// Stands in for a player: walks in a circle, leaps and dashes on a fixed
/// rhythm.
pub struct ScriptedInput {
    tick: u32,
    turn_rate: f32,
}

impl ScriptedInput {
    /// `turn_rate` is in radians per tick.
    pub fn new(turn_rate: f32) -> Self {
        Self { tick: 0, turn_rate }
    }

    pub fn sample(&mut self) -> InputState {
        self.tick = self.tick.wrapping_add(1);

        let angle = self.tick as f32 * self.turn_rate;
        let move_direction = Vec2::from_angle(angle);
        let mut input = InputState {
            move_direction,
            aim_direction: move_direction,
            ..Default::default()
        };

        if self.tick % LEAP_EVERY == 0 {
            input.buttons |= InputButtons::LEAP;
        }
        if self.tick % HEAL_EVERY == 0 {
            input.buttons |= InputButtons::USE_ITEM;
            input.item = Some(HEAL_ACTION.to_string());
        } else if self.tick % DASH_EVERY == 0 {
            input.buttons |= InputButtons::USE_ITEM;
            input.item = Some(DASH_ACTION.to_string());
        }

        input
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moves_along_a_unit_circle() {
        let mut script = ScriptedInput::new(0.05);
        for _ in 0..200 {
            let input = script.sample();
            assert!((input.move_direction.length() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn leaps_and_uses_items_on_schedule() {
        let mut script = ScriptedInput::new(0.05);
        let inputs: Vec<_> = (0..HEAL_EVERY).map(|_| script.sample()).collect();

        let leaps = inputs
            .iter()
            .filter(|i| i.pressed(InputButtons::LEAP))
            .count();
        assert_eq!(leaps, (HEAL_EVERY / LEAP_EVERY) as usize);

        let items: Vec<_> = inputs.iter().filter_map(|i| i.item.as_deref()).collect();
        assert_eq!(items, vec![DASH_ACTION, DASH_ACTION, HEAL_ACTION]);
    }
}
