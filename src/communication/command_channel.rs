use amiquip::{
    Channel, Connection, ConsumerMessage, ConsumerOptions, Exchange, Publish, QueueDeclareOptions,
    Result as AmiquipResult,
};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{info, warn};

use crate::communication::messages::{OperatorCommand, StatusEmission};
use crate::error::CommandError;
use crate::global_variables::{AMQP_URL, QUEUE_OPERATOR_COMMANDS, QUEUE_SIGNAL_STATUS};

/// Producer side of the operator command queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: Sender<OperatorCommand>,
}

/// Consumer side, drained by the coordinator between ticks.
#[derive(Debug)]
pub struct CommandInbox {
    rx: Receiver<OperatorCommand>,
}

pub fn command_channel() -> (CommandSender, CommandInbox) {
    let (tx, rx) = unbounded();
    (CommandSender { tx }, CommandInbox { rx })
}

impl CommandSender {
    /// Returns false once the inbox is gone.
    pub fn send(&self, command: OperatorCommand) -> bool {
        self.tx.send(command).is_ok()
    }

    /// Parses a line-delimited body and queues every valid command. Blank
    /// lines are skipped; malformed ones are returned.
    pub fn send_lines(&self, body: &str) -> Vec<CommandError> {
        let mut rejected = Vec::new();
        for parsed in parse_command_lines(body) {
            match parsed {
                Ok(command) => {
                    if !self.send(command) {
                        warn!("Operator command dropped: inbox closed");
                    }
                }
                Err(e) => rejected.push(e),
            }
        }
        rejected
    }
}

impl CommandInbox {
    /// Everything queued so far. Never blocks.
    pub fn drain(&self) -> Vec<OperatorCommand> {
        self.rx.try_iter().collect()
    }
}

pub fn parse_command_lines(body: &str) -> Vec<Result<OperatorCommand, CommandError>> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(OperatorCommand::parse)
        .collect()
}

/// Consumes the operator command queue and forwards every command into
/// `sender` until the broker closes the consumer.
pub async fn listen_operator_commands(sender: CommandSender) -> AmiquipResult<()> {
    let joined = tokio::task::spawn_blocking(move || -> AmiquipResult<()> {
        let mut connection = Connection::insecure_open(AMQP_URL)?;
        let channel = connection.open_channel(None)?;
        let queue = channel.queue_declare(QUEUE_OPERATOR_COMMANDS, QueueDeclareOptions::default())?;
        let consumer = queue.consume(ConsumerOptions::default())?;
        info!("Listening for operator commands on '{}'", QUEUE_OPERATOR_COMMANDS);
        for message in consumer.receiver() {
            match message {
                ConsumerMessage::Delivery(delivery) => {
                    match std::str::from_utf8(&delivery.body) {
                        Ok(body) => {
                            for error in sender.send_lines(body) {
                                warn!("Ignoring operator command: {}", error);
                            }
                        }
                        Err(e) => warn!("Operator command is not UTF-8: {}", e),
                    }
                    consumer.ack(delivery)?;
                }
                other => {
                    info!("Operator command consumer ended: {:?}", other);
                    break;
                }
            }
        }
        connection.close()
    })
    .await;
    match joined {
        Ok(result) => result,
        Err(e) => {
            warn!("Operator command listener task failed: {}", e);
            Ok(())
        }
    }
}

/// Publishes status emissions, one JSON line per message.
pub struct StatusPublisher {
    connection: Connection,
    channel: Channel,
}

impl StatusPublisher {
    pub fn connect() -> AmiquipResult<Self> {
        let mut connection = Connection::insecure_open(AMQP_URL)?;
        let channel = connection.open_channel(None)?;
        channel.queue_declare(QUEUE_SIGNAL_STATUS, QueueDeclareOptions::default())?;
        Ok(Self { connection, channel })
    }

    pub fn publish(&self, statuses: &[StatusEmission]) -> AmiquipResult<()> {
        let exchange = Exchange::direct(&self.channel);
        for status in statuses {
            match status.to_line() {
                Ok(line) => exchange.publish(Publish::new(line.as_bytes(), QUEUE_SIGNAL_STATUS))?,
                Err(e) => warn!("Could not encode status for publishing: {}", e),
            }
        }
        Ok(())
    }

    pub fn close(self) -> AmiquipResult<()> {
        self.connection.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_without_blocking() {
        let (sender, inbox) = command_channel();
        assert!(inbox.drain().is_empty());
        let rejected = sender.send_lines(
            "{\"type\":\"phase_next\",\"id\":\"J00\"}\n\n{\"type\":\"bogus\"}\n{\"type\":\"phase_reset\",\"id\":\"J01\"}\n",
        );
        assert_eq!(rejected.len(), 1);
        let drained = inbox.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[1], OperatorCommand::PhaseReset { id: "J01".into() });
        assert!(inbox.drain().is_empty());
    }

    #[test]
    fn sending_after_inbox_dropped_reports_failure() {
        let (sender, inbox) = command_channel();
        drop(inbox);
        assert!(!sender.send(OperatorCommand::PhaseNext { id: "J00".into() }));
    }
}
