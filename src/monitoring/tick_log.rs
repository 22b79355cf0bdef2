use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use crate::data_structures::Time;
use crate::shared_data::StepOutput;

/// One row of the per-tick CSV trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickRecord {
    pub run: String,
    pub time: Time,
    pub agents: usize,
    pub total_reward: f64,
    pub mean_reward: f64,
    pub std_reward: f64,
    pub mean_queue: f64,
    pub mean_waiting: f64,
    pub mean_fairness: f64,
    pub std_fairness: f64,
    pub emergency_switches: u64,
    pub done: bool,
}

impl TickRecord {
    pub fn from_step(run: &str, output: &StepOutput) -> Self {
        let a = &output.aggregates;
        Self {
            run: run.to_string(),
            time: output.time,
            agents: a.active_agents,
            total_reward: output.total_reward(),
            mean_reward: a.reward.mean,
            std_reward: a.reward.std,
            mean_queue: a.queue_length.mean,
            mean_waiting: a.waiting_time.mean,
            mean_fairness: a.fairness_score.mean,
            std_fairness: a.fairness_score.std,
            emergency_switches: output.agents.iter().map(|a| a.info.emergency_switches).sum(),
            done: output.done,
        }
    }
}

/// Writes tick records as CSV to any writer.
pub struct TickLog<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> TickLog<W> {
    pub fn new(writer: W, write_headers: bool) -> Self {
        Self {
            writer: csv::WriterBuilder::new()
                .has_headers(write_headers)
                .from_writer(writer),
        }
    }

    pub fn record(&mut self, record: &TickRecord) -> Result<(), Box<dyn Error>> {
        self.writer.serialize(record)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), Box<dyn Error>> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> Result<W, Box<dyn Error>> {
        self.writer.into_inner().map_err(|e| e.to_string().into())
    }
}

impl TickLog<std::fs::File> {
    /// Appends to `path`, writing the header only when the file is new.
    pub fn append(path: impl AsRef<Path>) -> Result<Self, Box<dyn Error>> {
        let path = path.as_ref();
        let file_exists = path.exists();
        let file = OpenOptions::new().append(true).create(true).open(path)?;
        Ok(Self::new(file, !file_exists))
    }
}
