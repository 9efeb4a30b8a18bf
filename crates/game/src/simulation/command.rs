use std::collections::HashMap;

use glam::Vec2;

use crate::net::{DecodeError, ProtocolError, Registry, WireReader, WireWriter};
use crate::replication::{CommandAck, Scene};

pub const MOVE_ACTION: &str = "move";
pub const LEAP_ACTION: &str = "leap";

const SEQUENCE_WRAP_THRESHOLD: u32 = u32::MAX / 2;

#[inline]
pub fn sequence_greater_than(s1: u32, s2: u32) -> bool {
    ((s1 > s2) && (s1 - s2 <= SEQUENCE_WRAP_THRESHOLD))
        || ((s1 < s2) && (s2 - s1 > SEQUENCE_WRAP_THRESHOLD))
}

/// Variant payload of a command. The envelope (type, sequence, tick) is
/// written by [`Command`], never by the variant itself.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandKind {
    Move { direction: Vec2 },
    Leap { direction: Vec2 },
    UseItem { action: String, direction: Vec2 },
}

impl CommandKind {
    pub const MOVE: u32 = 1;
    pub const LEAP: u32 = 2;
    pub const USE_ITEM: u32 = 3;

    pub fn type_id(&self) -> u32 {
        match self {
            CommandKind::Move { .. } => Self::MOVE,
            CommandKind::Leap { .. } => Self::LEAP,
            CommandKind::UseItem { .. } => Self::USE_ITEM,
        }
    }

    fn encode_body(&self, writer: &mut WireWriter) {
        match self {
            CommandKind::Move { direction } | CommandKind::Leap { direction } => {
                writer.write_vec2(*direction);
            }
            CommandKind::UseItem { action, direction } => {
                writer.write_string(action);
                writer.write_vec2(*direction);
            }
        }
    }

    fn decode_body(&mut self, reader: &mut WireReader<'_>) -> Result<(), DecodeError> {
        match self {
            CommandKind::Move { direction } | CommandKind::Leap { direction } => {
                *direction = reader.read_vec2()?;
            }
            CommandKind::UseItem { action, direction } => {
                *action = reader.read_string()?;
                *direction = reader.read_vec2()?;
            }
        }
        Ok(())
    }

    fn action(&self) -> (&str, Vec2) {
        match self {
            CommandKind::Move { direction } => (MOVE_ACTION, *direction),
            CommandKind::Leap { direction } => (LEAP_ACTION, *direction),
            CommandKind::UseItem { action, direction } => (action.as_str(), *direction),
        }
    }
}

pub(crate) fn command_table() -> [(u32, fn() -> CommandKind); 3] {
    [
        (CommandKind::MOVE, || CommandKind::Move {
            direction: Vec2::ZERO,
        }),
        (CommandKind::LEAP, || CommandKind::Leap {
            direction: Vec2::ZERO,
        }),
        (CommandKind::USE_ITEM, || CommandKind::UseItem {
            action: String::new(),
            direction: Vec2::ZERO,
        }),
    ]
}

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub sequence: u32,
    pub tick: u32,
    pub kind: CommandKind,
}

impl Command {
    /// Bytes taken by `type`, `sequence` and `tick`.
    pub const ENVELOPE_LEN: usize = 12;

    pub fn new(kind: CommandKind, sequence: u32, tick: u32) -> Self {
        Self {
            sequence,
            tick,
            kind,
        }
    }

    pub fn encode(&self, writer: &mut WireWriter) {
        writer.write_u32(self.kind.type_id());
        writer.write_u32(self.sequence);
        writer.write_u32(self.tick);
        self.kind.encode_body(writer);
    }

    pub fn decode(
        reader: &mut WireReader<'_>,
        registry: &Registry<u32, CommandKind>,
    ) -> Result<Self, ProtocolError> {
        let type_id = reader.read_u32()?;
        let mut kind = registry.create(type_id)?;
        let sequence = reader.read_u32()?;
        let tick = reader.read_u32()?;
        kind.decode_body(reader)?;
        Ok(Self {
            sequence,
            tick,
            kind,
        })
    }

    /// Applies the command to the pawn `client_id` controls. Returns `false`
    /// when there is no such pawn or it does not know the action; both are
    /// expected under loss and duplication and are otherwise ignored.
    pub fn apply(&self, scene: &mut Scene, client_id: i32) -> bool {
        let Some(pawn) = scene.find_pawn_mut(client_id) else {
            log::trace!(
                "Dropping command {} for client {} without a pawn",
                self.sequence,
                client_id
            );
            return false;
        };

        let (action, direction) = self.kind.action();
        let applied = pawn.state_mut().apply_action(action, direction);
        if !applied {
            log::trace!("Pawn of client {} ignored action '{}'", client_id, action);
        }
        applied
    }
}

#[derive(Debug, Default)]
struct ClientInbox {
    last_processed: u32,
    pending: Vec<Command>,
}

/// Authoritative-side buffer of remote commands. Batches may arrive out of
/// order or twice; each command is applied at most once and never after a
/// newer one from the same client.
#[derive(Debug, Default)]
pub struct CommandInbox {
    clients: HashMap<i32, ClientInbox>,
}

impl CommandInbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_client(&mut self, client_id: i32) {
        self.clients.entry(client_id).or_default();
    }

    pub fn remove_client(&mut self, client_id: i32) {
        self.clients.remove(&client_id);
    }

    pub fn push_batch(&mut self, client_id: i32, commands: Vec<Command>) {
        self.clients
            .entry(client_id)
            .or_default()
            .pending
            .extend(commands);
    }

    pub fn pending_len(&self) -> usize {
        self.clients.values().map(|c| c.pending.len()).sum()
    }

    /// Sorts each client's pending commands by sequence, drops anything not
    /// newer than the last processed sequence, and applies the rest.
    pub fn apply_pending(&mut self, scene: &mut Scene) -> usize {
        let mut applied = 0;

        for (&client_id, inbox) in &mut self.clients {
            let base = inbox.last_processed;
            let mut pending = std::mem::take(&mut inbox.pending);
            pending.sort_by_key(|c| c.sequence.wrapping_sub(base));

            for command in pending {
                if !sequence_greater_than(command.sequence, inbox.last_processed) {
                    continue;
                }
                inbox.last_processed = command.sequence;
                if command.apply(scene, client_id) {
                    applied += 1;
                }
            }
        }

        applied
    }

    pub fn last_processed(&self, client_id: i32) -> Option<u32> {
        self.clients.get(&client_id).map(|c| c.last_processed)
    }

    pub fn acks(&self) -> Vec<CommandAck> {
        let mut acks: Vec<CommandAck> = self
            .clients
            .iter()
            .map(|(&client_id, inbox)| CommandAck {
                client_id,
                sequence: inbox.last_processed,
            })
            .collect();
        acks.sort_by_key(|ack| ack.client_id);
        acks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::Protocol;
    use crate::player::{self, Pawn, PAWN_DESIRED_DIRECTION};
    use crate::replication::NetObject;

    fn scene_with_pawn(owner: i32) -> Scene {
        let mut scene = Scene::new("test", true);
        scene.add(NetObject::new(Pawn::default()).with_owner(owner));
        scene
    }

    fn move_command(sequence: u32, x: f32) -> Command {
        Command::new(
            CommandKind::Move {
                direction: Vec2::new(x, 0.0),
            },
            sequence,
            10,
        )
    }

    fn desired_direction(scene: &Scene, owner: i32) -> Vec2 {
        match scene
            .find_pawn(owner)
            .and_then(|p| p.get(PAWN_DESIRED_DIRECTION))
        {
            Some(crate::replication::PropertyValue::Vec2(v)) => v,
            other => panic!("unexpected property value {:?}", other),
        }
    }

    #[test]
    fn test_sequence_comparison() {
        assert!(sequence_greater_than(2, 1));
        assert!(!sequence_greater_than(1, 2));
        assert!(sequence_greater_than(0, u32::MAX));
        assert!(!sequence_greater_than(u32::MAX, 0));
    }

    #[test]
    fn envelope_precedes_variant_body() {
        let command = Command::new(
            CommandKind::Leap {
                direction: Vec2::new(0.5, 0.5),
            },
            3,
            77,
        );
        let mut writer = WireWriter::new();
        command.encode(&mut writer);
        let bytes = writer.into_bytes();

        assert_eq!(bytes.len(), Command::ENVELOPE_LEN + 8);
        assert_eq!(&bytes[0..4], &CommandKind::LEAP.to_le_bytes());
        assert_eq!(&bytes[4..8], &3u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &77u32.to_le_bytes());

        let protocol = Protocol::new(player::object_registry().unwrap()).unwrap();
        let mut reader = WireReader::new(&bytes);
        let decoded = Command::decode(&mut reader, protocol.commands()).unwrap();
        assert_eq!(decoded, command);
    }

    #[test]
    fn apply_without_pawn_is_ignored() {
        let mut scene = Scene::new("empty", true);
        assert!(!move_command(1, 1.0).apply(&mut scene, 4));
    }

    #[test]
    fn unknown_item_action_is_ignored() {
        let mut scene = scene_with_pawn(1);
        let command = Command::new(
            CommandKind::UseItem {
                action: "teleport".to_string(),
                direction: Vec2::X,
            },
            1,
            0,
        );
        assert!(!command.apply(&mut scene, 1));
    }

    #[test]
    fn out_of_order_batch_matches_in_order_result() {
        let mut ordered_scene = scene_with_pawn(1);
        let mut ordered = CommandInbox::new();
        ordered.push_batch(
            1,
            vec![move_command(1, 0.1), move_command(2, 0.2), move_command(3, 0.3)],
        );
        ordered.apply_pending(&mut ordered_scene);

        let mut shuffled_scene = scene_with_pawn(1);
        let mut shuffled = CommandInbox::new();
        shuffled.push_batch(
            1,
            vec![move_command(3, 0.3), move_command(1, 0.1), move_command(2, 0.2)],
        );
        shuffled.apply_pending(&mut shuffled_scene);

        assert_eq!(
            desired_direction(&ordered_scene, 1),
            desired_direction(&shuffled_scene, 1)
        );
        assert_eq!(ordered.last_processed(1), Some(3));
        assert_eq!(shuffled.last_processed(1), Some(3));
    }

    #[test]
    fn stale_and_duplicate_commands_are_dropped() {
        let mut scene = scene_with_pawn(1);
        let mut inbox = CommandInbox::new();

        inbox.push_batch(1, vec![move_command(5, 0.5)]);
        assert_eq!(inbox.apply_pending(&mut scene), 1);

        inbox.push_batch(1, vec![move_command(5, 0.5), move_command(4, -1.0)]);
        assert_eq!(inbox.apply_pending(&mut scene), 0);
        assert_eq!(desired_direction(&scene, 1), Vec2::new(0.5, 0.0));
        assert_eq!(inbox.pending_len(), 0);
    }

    #[test]
    fn acks_report_last_processed_sequence() {
        let mut scene = scene_with_pawn(2);
        let mut inbox = CommandInbox::new();
        inbox.add_client(1);
        inbox.push_batch(2, vec![move_command(9, 1.0)]);
        inbox.apply_pending(&mut scene);

        assert_eq!(
            inbox.acks(),
            vec![
                CommandAck {
                    client_id: 1,
                    sequence: 0
                },
                CommandAck {
                    client_id: 2,
                    sequence: 9
                },
            ]
        );
    }
}
