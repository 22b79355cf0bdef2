use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};

use crate::communication::command_channel::CommandInbox;
use crate::communication::messages::{OperatorCommand, StatusEmission};
use crate::config::EngineConfig;
use crate::control_system::baselines::{build_baseline, AgentView, DecisionSource};
use crate::control_system::intersection::Intersection;
use crate::control_system::phase_controller::PhaseController;
use crate::data_structures::{Action, Decision, IntersectionId, SignalString, Time};
use crate::engine::episode::{Episode, EpisodeSummary};
use crate::engine::pipeline::Pipeline;
use crate::error::{CommandError, ConfigError, EngineError, SimulatorError};
use crate::flow_analyzer::observation::{GlobalContext, ObservationEncoder};
use crate::flow_analyzer::reward::{RewardBreakdown, RewardComposer};
use crate::shared_data::{AgentInfo, AgentStep, Notice, StepOutput, SystemAggregates};
use crate::simulation_engine::simulator::Simulator;
use crate::simulation_engine::telemetry::{IntersectionTelemetry, TelemetryReader};

/// Validates a requested agent subset against the simulator's intersections.
/// Without a request, the first `max_agents` intersections are taken.
pub fn select_agents(
    all: &[IntersectionId],
    requested: Option<&[IntersectionId]>,
    max_agents: usize,
) -> Result<Vec<IntersectionId>, ConfigError> {
    match requested {
        Some(requested) => {
            let known: HashSet<&IntersectionId> = all.iter().collect();
            let mut selected: Vec<IntersectionId> = Vec::with_capacity(requested.len());
            for id in requested {
                if !known.contains(id) {
                    return Err(ConfigError::UnknownIntersection(id.clone()));
                }
                if !selected.contains(id) {
                    selected.push(id.clone());
                }
            }
            Ok(selected)
        }
        None => Ok(all.iter().take(max_agents).cloned().collect()),
    }
}

#[derive(Debug)]
struct Slot {
    controller: PhaseController,
    is_agent: bool,
    /// The engine has pinned the simulator's phase duration.
    actuated: bool,
}

enum Control {
    Actuate(Action),
    Observe,
}

/// Drives every intersection of the simulator through the decision tick:
/// commands, decisions, actuation, advance, encoding, rewards, aggregates.
pub struct Coordinator<S: Simulator> {
    sim: S,
    config: EngineConfig,
    encoder: ObservationEncoder,
    composer: RewardComposer,
    reader: TelemetryReader,
    background: Box<dyn DecisionSource + Send>,
    slots: Vec<Slot>,
    agents: Vec<IntersectionId>,
    requested_agents: usize,
    pipeline: Pipeline,
    episode: Episode,
    commands: Option<CommandInbox>,
    last_observations: HashMap<IntersectionId, Vec<f64>>,
    /// Reported with the next step.
    pending_notices: Vec<Notice>,
}

impl<S: Simulator> Coordinator<S> {
    /// Validates the configuration and the agent subset before anything runs.
    pub fn new(sim: S, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let encoder = ObservationEncoder::new(config.encoder.clone());
        let composer = RewardComposer::new(config.reward.clone());
        let background = build_baseline(config.coordinator.background);
        let pipeline = Pipeline::standard(Vec::new(), encoder.clone(), config.coordinator.max_agents);
        let mut coordinator = Self {
            sim,
            config,
            encoder,
            composer,
            reader: TelemetryReader::new(),
            background,
            slots: Vec::new(),
            agents: Vec::new(),
            requested_agents: 0,
            pipeline,
            episode: Episode::new(Vec::new(), 0),
            commands: None,
            last_observations: HashMap::new(),
            pending_notices: Vec::new(),
        };
        coordinator.reset()?;
        Ok(coordinator)
    }

    pub fn attach_commands(&mut self, inbox: CommandInbox) {
        self.commands = Some(inbox);
    }

    /// Rebuilds every intersection from the simulator's current programs
    /// and returns the initial observations. Rewards are zero. Agents that
    /// could not be loaded are reported once, with the next step.
    pub fn reset(&mut self) -> Result<StepOutput, EngineError> {
        let all = self.sim.intersection_ids();
        let requested = select_agents(
            &all,
            self.config.coordinator.agents.as_deref(),
            self.config.coordinator.max_agents,
        )?;

        let mut slots = Vec::with_capacity(all.len());
        let mut notices = Vec::new();
        for id in &all {
            let is_agent = requested.contains(id);
            match self.load_intersection(id)? {
                Ok(intersection) => slots.push(Slot {
                    controller: PhaseController::new(intersection, self.config.controller),
                    is_agent,
                    actuated: false,
                }),
                Err(e) if is_agent => {
                    warn!("Dropping agent {} for this episode: {}", id, e);
                    notices.push(Notice::AgentDropped {
                        id: id.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => warn!("Intersection {} left uncontrolled: {}", id, e),
            }
        }

        self.agents = requested
            .iter()
            .filter(|id| slots.iter().any(|s| s.is_agent && &s.controller.intersection().id == *id))
            .cloned()
            .collect();
        self.requested_agents = requested.len();
        self.slots = slots;
        self.reader = TelemetryReader::new();
        self.last_observations.clear();
        self.background = build_baseline(self.config.coordinator.background);
        self.pipeline = Pipeline::standard(
            self.agents.clone(),
            self.encoder.clone(),
            self.config.coordinator.max_agents,
        );
        self.episode = Episode::new(self.agents.clone(), self.sim.time());
        info!(
            "Episode reset: {} intersections, {} of {} requested agents active, background {}",
            self.slots.len(),
            self.agents.len(),
            self.requested_agents,
            self.background.name()
        );

        self.pending_notices = notices;

        let now = self.sim.time();
        let vehicles = self.sim.vehicles_in_system().ok();
        let decisions = vec![None; self.slots.len()];
        Ok(self.assemble(now, &decisions, vehicles, false))
    }

    /// Outer error: fatal. Inner error: the intersection cannot be used.
    fn load_intersection(
        &self,
        id: &IntersectionId,
    ) -> Result<Result<Intersection, SimulatorError>, ConfigError> {
        let program = match self.sim.program(id) {
            Ok(program) => program,
            Err(e) => return Ok(Err(e)),
        };
        let links = match self.sim.controlled_lanes(id) {
            Ok(links) => links,
            Err(e) => return Ok(Err(e)),
        };
        let initial_phase = self.sim.current_phase(id).unwrap_or(0);
        Intersection::new(id.clone(), program, links, initial_phase, &self.config.controller).map(Ok)
    }

    /// Runs one decision tick. `None` hands every agent to the background
    /// baseline for this tick.
    pub fn step(&mut self, actions: Option<&[Action]>) -> Result<StepOutput, EngineError> {
        if self.episode.is_over() {
            return Err(EngineError::EpisodeOver);
        }
        let mut notices = std::mem::take(&mut self.pending_notices);
        let statuses = self.drain_commands();
        let now = self.sim.time();

        let agent_actions: Option<HashMap<IntersectionId, Action>> = actions.map(|actions| {
            let expected = self.agents.len();
            if actions.len() < expected {
                warn!("Got {} actions for {} agents, padding with keep", actions.len(), expected);
                notices.push(Notice::ActionsPadded {
                    expected,
                    got: actions.len(),
                });
            } else if actions.len() > expected {
                warn!("Got {} actions for {} agents, ignoring the extra", actions.len(), expected);
                notices.push(Notice::ActionsTruncated {
                    expected,
                    got: actions.len(),
                });
            }
            self.agents
                .iter()
                .enumerate()
                .map(|(i, id)| (id.clone(), actions.get(i).copied().unwrap_or_default()))
                .collect()
        });

        let mut decisions = Vec::with_capacity(self.slots.len());
        for index in 0..self.slots.len() {
            decisions.push(self.control_intersection(index, now, agent_actions.as_ref()));
        }

        self.sim
            .advance(self.config.episode.sub_steps_per_tick())
            .map_err(EngineError::Simulator)?;

        let after = self.sim.time();
        let vehicles = self.sim.vehicles_in_system().ok();
        let mut output = self.assemble(after, &decisions, vehicles, true);
        notices.append(&mut output.notices);
        output.notices = notices;
        output.statuses = statuses;

        self.episode.ticks += 1;
        self.episode.episode_reward += output.total_reward();
        let termination = self
            .episode
            .check_termination(after, vehicles, &self.config.episode);
        if termination.is_some() {
            output.done = true;
            output.termination = termination;
            for agent in &mut output.agents {
                agent.done = true;
            }
        }
        Ok(output)
    }

    fn control_intersection(
        &mut self,
        index: usize,
        now: Time,
        agent_actions: Option<&HashMap<IntersectionId, Action>>,
    ) -> Option<Decision> {
        let telemetry = self.reader.read(&self.sim, self.slots[index].controller.intersection());
        let id = self.slots[index].controller.intersection().id.clone();

        let control = match agent_actions.and_then(|a| a.get(&id)) {
            Some(action) if self.slots[index].is_agent => Control::Actuate(*action),
            _ if self.background.actuates() => {
                let intersection = self.slots[index].controller.intersection();
                let observation = self
                    .last_observations
                    .get(&id)
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                let view = AgentView {
                    id: &id,
                    time_since_last_switch: intersection.time_since_last_switch(now),
                    observation,
                };
                Control::Actuate(self.background.decide(&view))
            }
            _ => Control::Observe,
        };

        match control {
            Control::Observe => {
                self.slots[index]
                    .controller
                    .observe(telemetry.simulator_phase, now);
                None
            }
            Control::Actuate(action) => {
                self.take_control(index);
                let infeasible_before = self.slots[index].controller.intersection().infeasible_overrides();
                let controller = &mut self.slots[index].controller;
                let decision = controller.decide(now, action, &telemetry);
                let switched = controller.apply(decision, now);
                self.episode.infeasible_override_count +=
                    controller.intersection().infeasible_overrides() - infeasible_before;

                if let Some(phase) = switched {
                    if decision.is_emergency() {
                        self.episode.emergency_switch_count += 1;
                        if self.episode.emergency_switch_count % 10 == 0 {
                            info!(
                                "{} emergency overrides so far (latest at {} t={}s)",
                                self.episode.emergency_switch_count, id, now
                            );
                        }
                    }
                    self.actuate_phase(&id, phase);
                }
                Some(decision)
            }
        }
    }

    /// Pins the simulator's phase duration so its own program stops
    /// advancing the intersection.
    fn take_control(&mut self, index: usize) {
        if self.slots[index].actuated {
            return;
        }
        let id = self.slots[index].controller.intersection().id.clone();
        let hold = self.config.episode.time_budget as f64;
        match self.sim.set_phase_duration(&id, hold) {
            Ok(()) => {
                debug!("Took control of {}", id);
                self.slots[index].actuated = true;
            }
            Err(e) => warn!("Could not take control of {}: {}", id, e),
        }
    }

    fn actuate_phase(&mut self, id: &IntersectionId, phase: usize) {
        let hold = self.config.episode.time_budget as f64;
        let result = self
            .sim
            .set_phase(id, phase)
            .and_then(|()| self.sim.set_phase_duration(id, hold));
        if let Err(e) = result {
            warn!("Could not set phase {} on {}: {}", phase, id, e);
        }
    }

    fn assemble(
        &mut self,
        now: Time,
        decisions: &[Option<Decision>],
        vehicles_in_system: Option<usize>,
        score: bool,
    ) -> StepOutput {
        let telemetry: Vec<IntersectionTelemetry> = self
            .slots
            .iter()
            .map(|slot| self.reader.read(&self.sim, slot.controller.intersection()))
            .collect();

        let lane_count: usize = telemetry.iter().map(|t| t.lanes.len()).sum();
        let network_mean_speed = if lane_count == 0 {
            0.0
        } else {
            telemetry
                .iter()
                .flat_map(|t| t.snapshots().map(|s| s.mean_speed))
                .sum::<f64>()
                / lane_count as f64
        };
        let context = GlobalContext {
            vehicles_in_system,
            time: now - self.episode.start_time,
            time_budget: self.config.episode.time_budget,
            emergency_switches: self.episode.emergency_switch_count,
            active_agents: self.agents.len(),
            requested_agents: self.requested_agents,
            network_waiting_time: telemetry.iter().map(|t| t.total_waiting()).sum(),
            network_mean_speed,
        };
        let global = self.encoder.encode_global(&context).to_vec();

        let agents = self
            .slots
            .iter()
            .zip(&telemetry)
            .zip(decisions)
            .map(|((slot, t), decision)| {
                let intersection = slot.controller.intersection();
                let block = self.encoder.encode_intersection(intersection, t, now);
                let breakdown = if score {
                    self.composer.compose(intersection, t)
                } else {
                    RewardBreakdown::default()
                };
                AgentStep {
                    id: intersection.id.clone(),
                    observation: self.encoder.encode_agent(&block, &global),
                    reward: breakdown.total,
                    done: false,
                    info: AgentInfo {
                        phase_index: intersection.current_phase_index(),
                        waiting_time: t.total_waiting(),
                        queue_length: t.total_queue(),
                        throughput: t.total_flow(),
                        fairness_score: self.composer.fairness_score(intersection),
                        total_switches: intersection.total_switches(),
                        emergency_switches: intersection.emergency_switches(),
                        infeasible_overrides: intersection.infeasible_overrides(),
                        degraded_reads: t.degraded_reads,
                        decision: *decision,
                        reward: breakdown,
                    },
                }
            })
            .collect();

        let mut output = StepOutput {
            time: now,
            agents,
            global,
            joint_observation: Vec::new(),
            aggregates: SystemAggregates::default(),
            done: false,
            termination: None,
            notices: Vec::new(),
            statuses: Vec::new(),
        };
        self.pipeline.run(&mut output);

        self.last_observations = output
            .agents
            .iter()
            .map(|a| (a.id.clone(), a.observation.clone()))
            .collect();
        output
    }

    fn drain_commands(&mut self) -> Vec<StatusEmission> {
        let commands = match &self.commands {
            Some(inbox) => inbox.drain(),
            None => return Vec::new(),
        };
        commands
            .into_iter()
            .map(|command| {
                let id = command.id().clone();
                self.apply_operator_command(&command).unwrap_or_else(|e| {
                    warn!("Operator command for {} rejected: {}", id, e);
                    StatusEmission::rejected(Some(id), &e)
                })
            })
            .collect()
    }

    /// Applies one operator command immediately, bypassing min-green, and
    /// returns the resulting status.
    pub fn apply_operator_command(&mut self, command: &OperatorCommand) -> Result<StatusEmission, CommandError> {
        let id = command.id().clone();
        let index = self
            .slots
            .iter()
            .position(|s| s.controller.intersection().id == id)
            .ok_or_else(|| CommandError::UnknownIntersection(id.clone()))?;
        let now = self.sim.time();
        let phases = self.slots[index].controller.intersection().num_phases();
        let current = self.slots[index].controller.intersection().current_phase_index();
        let hold = self.config.episode.time_budget as f64;

        let target = match command {
            OperatorCommand::PhaseNext { .. } => Some((current + 1) % phases),
            OperatorCommand::PhasePrev { .. } => Some((current + phases - 1) % phases),
            OperatorCommand::PhaseSet { phase_index, .. } => {
                if *phase_index >= phases {
                    return Err(CommandError::PhaseOutOfRange {
                        id,
                        index: *phase_index,
                        phases,
                    });
                }
                Some(*phase_index)
            }
            OperatorCommand::PhaseReset { .. } => {
                self.sim.set_phase(&id, 0)?;
                self.slots[index].controller.force_phase(0, now);
                self.slots[index].actuated = false;
                None
            }
            OperatorCommand::PhaseResume { .. } => {
                self.sim.set_phase(&id, current)?;
                if self.slots[index].actuated {
                    self.sim.set_phase_duration(&id, hold)?;
                }
                None
            }
            OperatorCommand::StateSet { signal_string, .. } => {
                let signal: SignalString = signal_string
                    .parse()
                    .map_err(|source| CommandError::BadSignal {
                        id: id.clone(),
                        source,
                    })?;
                let expected = self.slots[index].controller.intersection().link_count();
                if signal.len() != expected {
                    return Err(CommandError::SignalLength {
                        id,
                        expected,
                        got: signal.len(),
                    });
                }
                self.sim.set_signal_string(&id, &signal.to_string())?;
                None
            }
        };

        if let Some(target) = target {
            self.sim.set_phase(&id, target)?;
            if self.slots[index].actuated {
                self.sim.set_phase_duration(&id, hold)?;
            }
            self.slots[index].controller.force_phase(target, now);
        }
        info!("Operator command applied to {}: {:?}", id, command);
        Ok(self.status(index, now))
    }

    fn status(&self, index: usize, now: Time) -> StatusEmission {
        let slot = &self.slots[index];
        let intersection = slot.controller.intersection();
        let state = self
            .sim
            .current_signal(&intersection.id)
            .unwrap_or_else(|_| intersection.current_phase().signal().to_string());
        StatusEmission::TlsStatus {
            id: intersection.id.clone(),
            state,
            phase_index: Some(intersection.current_phase_index()),
            remaining: (!slot.actuated).then(|| intersection.remaining_nominal(now)),
        }
    }

    /// What each active agent's decision source sees right now.
    pub fn agent_views(&self) -> Vec<AgentView<'_>> {
        let now = self.sim.time();
        self.agents
            .iter()
            .filter_map(|id| {
                let intersection = self.intersection(id)?;
                Some(AgentView {
                    id,
                    time_since_last_switch: intersection.time_since_last_switch(now),
                    observation: self
                        .last_observations
                        .get(id)
                        .map(Vec::as_slice)
                        .unwrap_or(&[]),
                })
            })
            .collect()
    }

    /// Actions for every agent from `source`, or `None` when the source
    /// leaves the simulator's program in charge.
    pub fn actions_from(&self, source: &mut dyn DecisionSource) -> Option<Vec<Action>> {
        if !source.actuates() {
            return None;
        }
        Some(self.agent_views().iter().map(|view| source.decide(view)).collect())
    }

    pub fn intersection(&self, id: &IntersectionId) -> Option<&Intersection> {
        self.slots
            .iter()
            .map(|s| s.controller.intersection())
            .find(|i| &i.id == id)
    }

    pub fn intersections(&self) -> impl Iterator<Item = &Intersection> {
        self.slots.iter().map(|s| s.controller.intersection())
    }

    pub fn agents(&self) -> &[IntersectionId] {
        &self.agents
    }

    pub fn episode(&self) -> &Episode {
        &self.episode
    }

    pub fn summary(&self) -> EpisodeSummary {
        self.episode.summary()
    }

    pub fn simulator(&self) -> &S {
        &self.sim
    }

    pub fn simulator_mut(&mut self) -> &mut S {
        &mut self.sim
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn degraded_reads(&self) -> u64 {
        self.reader.degraded_total()
    }
}
