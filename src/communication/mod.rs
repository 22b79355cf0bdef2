pub mod command_channel;
pub mod messages;

pub use command_channel::{command_channel, CommandInbox, CommandSender};
pub use messages::{OperatorCommand, StatusEmission};
