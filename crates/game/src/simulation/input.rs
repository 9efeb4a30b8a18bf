use bitflags::bitflags;
use glam::Vec2;

use super::command::{sequence_greater_than, Command, CommandKind};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InputButtons: u8 {
        const LEAP = 1 << 0;
        const USE_ITEM = 1 << 1;
    }
}

/// Input sampled once per tick by the game's binding layer.
#[derive(Debug, Clone, Default)]
pub struct InputState {
    pub move_direction: Vec2,
    pub aim_direction: Vec2,
    pub buttons: InputButtons,
    pub item: Option<String>,
}

impl InputState {
    pub fn pressed(&self, button: InputButtons) -> bool {
        self.buttons.contains(button)
    }
}

/// Produces sequenced commands for the local client and tracks which of them
/// the authority has acknowledged.
#[derive(Debug)]
pub struct CommandSequencer {
    next_sequence: u32,
    last_acked: u32,
}

impl Default for CommandSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandSequencer {
    pub fn new() -> Self {
        Self {
            next_sequence: 1,
            last_acked: 0,
        }
    }

    pub fn next(&mut self, kind: CommandKind, tick: u32) -> Command {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        Command::new(kind, sequence, tick)
    }

    /// Commands for one tick of input. A move command is always produced so
    /// the authority keeps the latest desired direction even under loss.
    pub fn produce(&mut self, input: &InputState, tick: u32) -> Vec<Command> {
        let mut commands = vec![self.next(
            CommandKind::Move {
                direction: input.move_direction.clamp_length_max(1.0),
            },
            tick,
        )];

        if input.pressed(InputButtons::LEAP) {
            let direction = if input.aim_direction == Vec2::ZERO {
                input.move_direction
            } else {
                input.aim_direction
            };
            commands.push(self.next(CommandKind::Leap { direction }, tick));
        }

        if input.pressed(InputButtons::USE_ITEM) {
            if let Some(item) = &input.item {
                commands.push(self.next(
                    CommandKind::UseItem {
                        action: item.clone(),
                        direction: input.aim_direction,
                    },
                    tick,
                ));
            }
        }

        commands
    }

    /// Records an acknowledgment. Returns `false` for a stale one, which can
    /// arrive when snapshots are reordered.
    pub fn acknowledge(&mut self, sequence: u32) -> bool {
        if sequence_greater_than(sequence, self.last_acked) {
            self.last_acked = sequence;
            true
        } else {
            false
        }
    }

    pub fn last_acked(&self) -> u32 {
        self.last_acked
    }

    /// Commands sent but not yet acknowledged.
    pub fn in_flight(&self) -> u32 {
        self.next_sequence
            .wrapping_sub(self.last_acked)
            .saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_to_commands() {
        let mut sequencer = CommandSequencer::new();
        let input = InputState {
            move_direction: Vec2::new(3.0, 0.0),
            aim_direction: Vec2::Y,
            buttons: InputButtons::LEAP | InputButtons::USE_ITEM,
            item: Some("dash".to_string()),
        };

        let commands = sequencer.produce(&input, 10);

        assert_eq!(commands.len(), 3);
        assert_eq!(
            commands.iter().map(|c| c.sequence).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(commands.iter().all(|c| c.tick == 10));
        assert_eq!(
            commands[0].kind,
            CommandKind::Move {
                direction: Vec2::new(1.0, 0.0)
            }
        );
        assert_eq!(commands[1].kind, CommandKind::Leap { direction: Vec2::Y });
    }

    #[test]
    fn use_item_without_item_is_skipped() {
        let mut sequencer = CommandSequencer::new();
        let input = InputState {
            buttons: InputButtons::USE_ITEM,
            ..Default::default()
        };
        assert_eq!(sequencer.produce(&input, 0).len(), 1);
    }

    #[test]
    fn stale_acks_are_ignored() {
        let mut sequencer = CommandSequencer::new();
        for tick in 0..5 {
            sequencer.produce(&InputState::default(), tick);
        }
        assert_eq!(sequencer.in_flight(), 5);

        assert!(sequencer.acknowledge(4));
        assert!(!sequencer.acknowledge(2));
        assert!(!sequencer.acknowledge(4));
        assert_eq!(sequencer.last_acked(), 4);
        assert_eq!(sequencer.in_flight(), 1);
    }
}
