use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::data_structures::{IntersectionId, LaneId, LaneSnapshot, Phase, SignalString, Time};
use crate::error::SimulatorError;
use crate::simulation_engine::simulator::Simulator;

/// Approach directions of a grid junction, in link order.
pub const APPROACHES: [&str; 4] = ["N", "S", "E", "W"];

/// Settings for the built-in grid network.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub rows: usize,
    pub cols: usize,
    /// Lane length in meters.
    pub lane_length: f64,
    /// Free-flow speed in m/s.
    pub free_speed: f64,
    /// Seconds between two vehicles leaving a green lane.
    pub saturation_headway: f64,
    /// Arrival probability per second for N, S, E, W approaches.
    pub arrival_rates: [f64; 4],
    /// No vehicle departs after this time.
    pub demand_until: Time,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            rows: 2,
            cols: 2,
            lane_length: 200.0,
            free_speed: 13.9,
            saturation_headway: 2.0,
            arrival_rates: [0.12, 0.12, 0.05, 0.05],
            demand_until: 1800,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
struct Junction {
    id: IntersectionId,
    program: Vec<Phase>,
    links: Vec<LaneId>,
    phase: usize,
    remaining: f64,
    /// Raw signal written by `set_signal_string`, shown until the next
    /// phase change.
    signal_override: Option<SignalString>,
}

impl Junction {
    fn signal(&self) -> &SignalString {
        self.signal_override
            .as_ref()
            .unwrap_or_else(|| self.program[self.phase].signal())
    }

    fn green_lanes(&self) -> HashSet<&LaneId> {
        self.signal()
            .green_links()
            .filter_map(|link| self.links.get(link))
            .collect()
    }

    fn tick(&mut self) {
        self.remaining -= 1.0;
        if self.remaining <= 0.0 {
            self.phase = (self.phase + 1) % self.program.len();
            self.remaining = self.program[self.phase].nominal_duration();
            self.signal_override = None;
        }
    }
}

#[derive(Debug, Clone, Default)]
struct LaneState {
    length: f64,
    /// Time each moving vehicle reaches the stop line.
    approaching: VecDeque<Time>,
    /// Time each halted vehicle joined the queue.
    queue: VecDeque<Time>,
    discharge_credit: f64,
}

/// A deterministic in-memory network of isolated signalized junctions with
/// seeded random demand. Vehicles travel the lane at free speed, queue at
/// the stop line and leave one per headway while their link is green.
#[derive(Debug, Clone)]
pub struct SyntheticSimulator {
    config: SyntheticConfig,
    time: Time,
    junctions: Vec<Junction>,
    lanes: HashMap<LaneId, LaneState>,
    /// Departure schedule sorted by time.
    schedule: Vec<(Time, LaneId)>,
    next_departure: usize,
    arrived: u64,
    failing_lanes: HashSet<LaneId>,
    broken_programs: HashSet<IntersectionId>,
    failing_signals: HashSet<IntersectionId>,
}

impl SyntheticSimulator {
    /// An empty network. Add junctions with [`SyntheticSimulator::add_junction`].
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            time: 0,
            junctions: Vec::new(),
            lanes: HashMap::new(),
            schedule: Vec::new(),
            next_departure: 0,
            arrived: 0,
            failing_lanes: HashSet::new(),
            broken_programs: HashSet::new(),
            failing_signals: HashSet::new(),
        }
    }

    /// A `rows x cols` grid of four-approach junctions named `J<row><col>`,
    /// each running a two-phase program with yellow transitions.
    pub fn grid(config: SyntheticConfig) -> Self {
        let mut sim = Self::new(config.clone());
        for row in 0..config.rows {
            for col in 0..config.cols {
                let id = IntersectionId(format!("J{}{}", row, col));
                let links: Vec<LaneId> = APPROACHES
                    .iter()
                    .map(|dir| LaneId(format!("{}_{}", id, dir)))
                    .collect();
                sim.add_junction(id, four_approach_program(), links.clone());
                for (lane, rate) in links.iter().zip(config.arrival_rates) {
                    sim.add_demand(lane, rate, 0, config.demand_until);
                }
            }
        }
        sim
    }

    /// Adds a junction whose links lead from `links` (one lane per link).
    pub fn add_junction(&mut self, id: IntersectionId, program: Vec<Phase>, links: Vec<LaneId>) {
        for lane in &links {
            self.lanes.entry(lane.clone()).or_insert_with(|| LaneState {
                length: self.config.lane_length,
                ..LaneState::default()
            });
        }
        let remaining = program.first().map_or(0.0, Phase::nominal_duration);
        self.junctions.push(Junction {
            id,
            program,
            links,
            phase: 0,
            remaining,
            signal_override: None,
        });
    }

    /// Schedules Bernoulli arrivals on `lane`, one draw per second in
    /// `[from, until)`.
    pub fn add_demand(&mut self, lane: &LaneId, rate_per_second: f64, from: Time, until: Time) {
        let mut rng = SmallRng::seed_from_u64(self.config.seed ^ lane_seed(lane));
        let rate = rate_per_second.clamp(0.0, 1.0);
        for t in from..until {
            if rng.random_bool(rate) {
                self.schedule.push((t, lane.clone()));
            }
        }
        self.schedule[self.next_departure..].sort_by_key(|(t, _)| *t);
    }

    /// Puts `count` halted vehicles on `lane` right away.
    pub fn seed_queue(&mut self, lane: &LaneId, count: usize) {
        let now = self.time;
        if let Some(state) = self.lanes.get_mut(lane) {
            state.queue.extend(std::iter::repeat(now).take(count));
        }
    }

    /// Makes every snapshot lookup for `lane` fail.
    pub fn fail_lane(&mut self, lane: LaneId) {
        self.failing_lanes.insert(lane);
    }

    /// Makes the program lookup for `id` fail.
    pub fn break_program(&mut self, id: IntersectionId) {
        self.broken_programs.insert(id);
    }

    /// Makes current-signal and current-phase lookups for `id` fail.
    pub fn fail_signal(&mut self, id: IntersectionId) {
        self.failing_signals.insert(id);
    }

    pub fn arrived(&self) -> u64 {
        self.arrived
    }

    /// Vehicles currently in the network.
    pub fn vehicles_in_network(&self) -> usize {
        self.lanes
            .values()
            .map(|l| l.approaching.len() + l.queue.len())
            .sum()
    }

    /// Remaining duration of the junction's current phase.
    pub fn remaining(&self, id: &IntersectionId) -> Result<f64, SimulatorError> {
        Ok(self.junction(id)?.remaining)
    }

    fn junction(&self, id: &IntersectionId) -> Result<&Junction, SimulatorError> {
        self.junctions
            .iter()
            .find(|j| &j.id == id)
            .ok_or_else(|| SimulatorError::UnknownIntersection(id.clone()))
    }

    fn junction_mut(&mut self, id: &IntersectionId) -> Result<&mut Junction, SimulatorError> {
        self.junctions
            .iter_mut()
            .find(|j| &j.id == id)
            .ok_or_else(|| SimulatorError::UnknownIntersection(id.clone()))
    }

    fn step_once(&mut self) {
        let now = self.time;
        let travel = (self.config.lane_length / self.config.free_speed).ceil() as Time;

        while let Some((t, lane)) = self.schedule.get(self.next_departure) {
            if *t > now {
                break;
            }
            if let Some(state) = self.lanes.get_mut(lane) {
                state.approaching.push_back(now + travel);
            }
            self.next_departure += 1;
        }

        let green: HashSet<LaneId> = self
            .junctions
            .iter()
            .flat_map(|j| j.green_lanes().into_iter().cloned().collect::<Vec<_>>())
            .collect();

        let per_second = 1.0 / self.config.saturation_headway.max(0.1);
        for (lane, state) in self.lanes.iter_mut() {
            while state.approaching.front().is_some_and(|eta| *eta <= now) {
                state.approaching.pop_front();
                state.queue.push_back(now);
            }
            if green.contains(lane) {
                state.discharge_credit = (state.discharge_credit + per_second).min(1.0);
                if state.discharge_credit >= 1.0 && state.queue.pop_front().is_some() {
                    state.discharge_credit -= 1.0;
                    self.arrived += 1;
                }
            } else {
                state.discharge_credit = 0.0;
            }
        }

        for junction in &mut self.junctions {
            junction.tick();
        }
        self.time += 1;
    }
}

/// `GGrr / yyrr / rrGG / rryy` with 30 s greens and 4 s yellows.
pub fn four_approach_program() -> Vec<Phase> {
    [("GGrr", 30.0), ("yyrr", 4.0), ("rrGG", 30.0), ("rryy", 4.0)]
        .iter()
        .filter_map(|(signal, duration)| Phase::parse(signal, *duration).ok())
        .collect()
}

fn lane_seed(lane: &LaneId) -> u64 {
    lane.as_str()
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325_u64, |h, b| (h ^ b as u64).wrapping_mul(0x0100_0000_01b3))
}

impl Simulator for SyntheticSimulator {
    fn intersection_ids(&self) -> Vec<IntersectionId> {
        self.junctions.iter().map(|j| j.id.clone()).collect()
    }

    fn controlled_lanes(&self, id: &IntersectionId) -> Result<Vec<LaneId>, SimulatorError> {
        Ok(self.junction(id)?.links.clone())
    }

    fn program(&self, id: &IntersectionId) -> Result<Vec<Phase>, SimulatorError> {
        if self.broken_programs.contains(id) {
            return Err(SimulatorError::Query(format!("no program loaded for {}", id)));
        }
        Ok(self.junction(id)?.program.clone())
    }

    fn lane_snapshot(&self, lane: &LaneId) -> Result<LaneSnapshot, SimulatorError> {
        if self.failing_lanes.contains(lane) {
            return Err(SimulatorError::Query(format!("lane {} did not answer", lane)));
        }
        let state = self
            .lanes
            .get(lane)
            .ok_or_else(|| SimulatorError::UnknownLane(lane.clone()))?;
        let moving = state.approaching.len();
        let halted = state.queue.len();
        let vehicles = moving + halted;
        let mean_speed = if vehicles == 0 {
            self.config.free_speed
        } else {
            moving as f64 * self.config.free_speed / vehicles as f64
        };
        Ok(LaneSnapshot {
            vehicle_count: vehicles as u32,
            halted_count: halted as u32,
            waiting_time: state.queue.iter().map(|since| (self.time - since) as f64).sum(),
            mean_speed,
            lane_length: state.length,
        })
    }

    fn current_signal(&self, id: &IntersectionId) -> Result<String, SimulatorError> {
        if self.failing_signals.contains(id) {
            return Err(SimulatorError::Query(format!("signal state of {} unavailable", id)));
        }
        Ok(self.junction(id)?.signal().to_string())
    }

    fn current_phase(&self, id: &IntersectionId) -> Result<usize, SimulatorError> {
        if self.failing_signals.contains(id) {
            return Err(SimulatorError::Query(format!("phase of {} unavailable", id)));
        }
        Ok(self.junction(id)?.phase)
    }

    fn set_phase(&mut self, id: &IntersectionId, phase_index: usize) -> Result<(), SimulatorError> {
        let junction = self.junction_mut(id)?;
        let phase = junction
            .program
            .get(phase_index)
            .ok_or_else(|| SimulatorError::PhaseOutOfRange {
                id: id.clone(),
                index: phase_index,
            })?;
        junction.remaining = phase.nominal_duration();
        junction.phase = phase_index;
        junction.signal_override = None;
        Ok(())
    }

    fn set_phase_duration(&mut self, id: &IntersectionId, seconds: f64) -> Result<(), SimulatorError> {
        self.junction_mut(id)?.remaining = seconds;
        Ok(())
    }

    fn set_signal_string(&mut self, id: &IntersectionId, signal: &str) -> Result<(), SimulatorError> {
        let junction = self.junction_mut(id)?;
        let parsed: SignalString = signal
            .parse()
            .map_err(|e: crate::error::SignalParseError| SimulatorError::Query(e.to_string()))?;
        if parsed.len() != junction.links.len() {
            return Err(SimulatorError::Query(format!(
                "{} needs {} links, got {}",
                id,
                junction.links.len(),
                parsed.len()
            )));
        }
        junction.signal_override = Some(parsed);
        Ok(())
    }

    fn advance(&mut self, sub_steps: u32) -> Result<(), SimulatorError> {
        for _ in 0..sub_steps {
            self.step_once();
        }
        Ok(())
    }

    fn time(&self) -> Time {
        self.time
    }

    fn vehicles_in_system(&self) -> Result<usize, SimulatorError> {
        Ok(self.vehicles_in_network() + (self.schedule.len() - self.next_departure))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_exposes_four_lanes_per_junction() {
        let sim = SyntheticSimulator::grid(SyntheticConfig::default());
        let ids = sim.intersection_ids();
        assert_eq!(ids.len(), 4);
        assert_eq!(ids[0], IntersectionId::from("J00"));
        let lanes = sim.controlled_lanes(&ids[0]).unwrap();
        assert_eq!(lanes[0], LaneId::from("J00_N"));
        assert_eq!(sim.program(&ids[0]).unwrap().len(), 4);
        assert_eq!(sim.current_signal(&ids[0]).unwrap(), "GGrr");
    }

    #[test]
    fn same_seed_gives_same_traffic() {
        let mut a = SyntheticSimulator::grid(SyntheticConfig::default());
        let mut b = SyntheticSimulator::grid(SyntheticConfig::default());
        a.advance(300).unwrap();
        b.advance(300).unwrap();
        let lane = LaneId::from("J11_E");
        assert_eq!(a.lane_snapshot(&lane).unwrap(), b.lane_snapshot(&lane).unwrap());
        assert_eq!(a.arrived(), b.arrived());
        assert!(a.vehicles_in_system().unwrap() > 0);
    }

    #[test]
    fn red_lane_queues_and_green_lane_discharges() {
        let mut sim = SyntheticSimulator::new(SyntheticConfig::default());
        let links = vec![LaneId::from("a"), LaneId::from("b")];
        sim.add_junction(
            "J".into(),
            vec![Phase::parse("Gr", 30.0).unwrap(), Phase::parse("rG", 30.0).unwrap()],
            links,
        );
        sim.set_phase_duration(&"J".into(), 1_000.0).unwrap();
        sim.seed_queue(&"a".into(), 4);
        sim.seed_queue(&"b".into(), 4);
        sim.advance(4).unwrap();
        let a = sim.lane_snapshot(&"a".into()).unwrap();
        let b = sim.lane_snapshot(&"b".into()).unwrap();
        assert_eq!(a.halted_count, 2);
        assert_eq!(b.halted_count, 4);
        assert_eq!(b.waiting_time, 16.0);
        assert_eq!(sim.arrived(), 2);
    }

    #[test]
    fn program_advances_unless_held() {
        let mut sim = SyntheticSimulator::grid(SyntheticConfig::default());
        let held = IntersectionId::from("J00");
        let free = IntersectionId::from("J01");
        sim.set_phase_duration(&held, 3_600.0).unwrap();
        sim.advance(31).unwrap();
        assert_eq!(sim.current_phase(&held).unwrap(), 0);
        assert_eq!(sim.current_phase(&free).unwrap(), 1);
        assert_eq!(sim.current_signal(&free).unwrap(), "yyrr");
    }

    #[test]
    fn injected_failures_surface_as_errors() {
        let mut sim = SyntheticSimulator::grid(SyntheticConfig::default());
        sim.fail_lane("J00_N".into());
        sim.break_program("J01".into());
        sim.fail_signal("J10".into());
        assert!(sim.lane_snapshot(&"J00_N".into()).is_err());
        assert!(sim.program(&"J01".into()).is_err());
        assert!(sim.current_signal(&"J10".into()).is_err());
        assert!(matches!(
            sim.lane_snapshot(&"nowhere".into()),
            Err(SimulatorError::UnknownLane(_))
        ));
        assert!(matches!(
            sim.set_phase(&"J00".into(), 9),
            Err(SimulatorError::PhaseOutOfRange { .. })
        ));
        assert!(sim.set_signal_string(&"J00".into(), "GG").is_err());
    }
}
