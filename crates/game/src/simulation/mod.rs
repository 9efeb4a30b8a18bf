mod command;
mod input;
mod tick;

pub(crate) use command::command_table;
pub use command::{
    sequence_greater_than, Command, CommandInbox, CommandKind, LEAP_ACTION, MOVE_ACTION,
};
pub use input::{CommandSequencer, InputButtons, InputState};
pub use tick::FixedTimestep;
