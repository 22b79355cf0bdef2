use log::debug;

use crate::data_structures::IntersectionId;
use crate::flow_analyzer::observation::{DimensionAdapter, ObservationEncoder};
use crate::shared_data::{MetricSummary, Notice, StepOutput, SystemAggregates};

/// One named transformation of a tick's output. Stages run in the order
/// they were added to the [`Pipeline`].
pub trait StepStage: Send {
    fn name(&self) -> &'static str;

    fn apply(&mut self, output: &mut StepOutput);
}

/// Keeps only the active agents, in the order they were selected.
#[derive(Debug, Clone)]
pub struct AgentSubset {
    active: Vec<IntersectionId>,
}

impl AgentSubset {
    pub fn new(active: Vec<IntersectionId>) -> Self {
        Self { active }
    }
}

impl StepStage for AgentSubset {
    fn name(&self) -> &'static str {
        "agent_subset"
    }

    fn apply(&mut self, output: &mut StepOutput) {
        let mut all = std::mem::take(&mut output.agents);
        output.agents = self
            .active
            .iter()
            .filter_map(|id| {
                let at = all.iter().position(|a| &a.id == id)?;
                Some(all.swap_remove(at))
            })
            .collect();
    }
}

/// Mean and standard deviation of reward, queue, wait and fairness across
/// the agents still in the output.
#[derive(Debug, Clone, Copy, Default)]
pub struct FairnessSummary;

impl StepStage for FairnessSummary {
    fn name(&self) -> &'static str {
        "fairness_summary"
    }

    fn apply(&mut self, output: &mut StepOutput) {
        let agents = &output.agents;
        output.aggregates = SystemAggregates {
            reward: MetricSummary::of(agents.iter().map(|a| a.reward)),
            queue_length: MetricSummary::of(agents.iter().map(|a| a.info.queue_length)),
            waiting_time: MetricSummary::of(agents.iter().map(|a| a.info.waiting_time)),
            fairness_score: MetricSummary::of(agents.iter().map(|a| a.info.fairness_score)),
            active_agents: agents.len(),
        };
    }
}

/// Builds the joint observation and fits every vector to the length its
/// consumer expects.
#[derive(Debug)]
pub struct ObservationShape {
    encoder: ObservationEncoder,
    max_agents: usize,
    agent_adapter: DimensionAdapter,
    joint_adapter: DimensionAdapter,
}

impl ObservationShape {
    pub fn new(encoder: ObservationEncoder, max_agents: usize) -> Self {
        let agent_adapter = DimensionAdapter::new(encoder.config().expected_dim);
        let joint_adapter = DimensionAdapter::new(encoder.config().expected_joint_dim);
        Self {
            encoder,
            max_agents,
            agent_adapter,
            joint_adapter,
        }
    }
}

impl StepStage for ObservationShape {
    fn name(&self) -> &'static str {
        "observation_shape"
    }

    fn apply(&mut self, output: &mut StepOutput) {
        let block_len = self.encoder.block_len();
        let joint = self.encoder.encode_joint(
            output
                .agents
                .iter()
                .map(|a| &a.observation[..block_len.min(a.observation.len())]),
            &output.global,
            self.max_agents,
        );
        let (joint, from) = self.joint_adapter.fit(joint, "joint observation");
        if let Some(from) = from {
            output.notices.push(Notice::ObservationAdapted {
                id: None,
                from,
                to: joint.len(),
            });
        }
        output.joint_observation = joint;

        for agent in &mut output.agents {
            let observation = std::mem::take(&mut agent.observation);
            let (fitted, from) = self.agent_adapter.fit(observation, "agent observation");
            if let Some(from) = from {
                output.notices.push(Notice::ObservationAdapted {
                    id: Some(agent.id.clone()),
                    from,
                    to: fitted.len(),
                });
            }
            agent.observation = fitted;
        }
    }
}

/// Ordered stages composed once per episode.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn StepStage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage(mut self, stage: impl StepStage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Subset filter, then aggregates, then observation shaping.
    pub fn standard(active: Vec<IntersectionId>, encoder: ObservationEncoder, max_agents: usize) -> Self {
        Self::new()
            .with_stage(AgentSubset::new(active))
            .with_stage(FairnessSummary)
            .with_stage(ObservationShape::new(encoder, max_agents))
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn run(&mut self, output: &mut StepOutput) {
        for stage in &mut self.stages {
            debug!("Running step stage {}", stage.name());
            stage.apply(output);
        }
    }
}
