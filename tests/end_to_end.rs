use fairsignal::communication::command_channel::command_channel;
use fairsignal::communication::messages::{OperatorCommand, StatusEmission};
use fairsignal::config::{BaselineKind, EngineConfig};
use fairsignal::control_system::baselines::{FixedCycle, PassThrough};
use fairsignal::data_structures::{Action, Decision, IntersectionId, LaneId, Phase};
use fairsignal::engine::coordinator::Coordinator;
use fairsignal::engine::episode::TerminationReason;
use fairsignal::error::{ConfigError, EngineError};
use fairsignal::shared_data::Notice;
use fairsignal::simulation_engine::simulator::Simulator;
use fairsignal::simulation_engine::synthetic::{SyntheticConfig, SyntheticSimulator};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

fn grid() -> SyntheticSimulator {
    SyntheticSimulator::grid(SyntheticConfig::default())
}

fn two_phase_junction(start_phase: usize) -> SyntheticSimulator {
    let mut sim = SyntheticSimulator::new(SyntheticConfig {
        demand_until: 0,
        ..SyntheticConfig::default()
    });
    sim.add_junction(
        "J".into(),
        vec![Phase::parse("Gr", 30.0).unwrap(), Phase::parse("rG", 30.0).unwrap()],
        vec![LaneId::from("L1"), LaneId::from("L2")],
    );
    let l2 = LaneId::from("L2");
    sim.add_demand(&l2, 0.3, 0, 600);
    sim.set_phase(&"J".into(), start_phase).unwrap();
    sim
}

#[test]
fn starved_lane_gets_an_emergency_override() {
    let mut coordinator = Coordinator::new(two_phase_junction(1), EngineConfig::default()).unwrap();
    assert_eq!(coordinator.intersection(&"J".into()).unwrap().current_phase_index(), 1);

    let mut override_tick = None;
    for tick in 0..=15 {
        let output = coordinator.step(Some(&[Action::Keep])).unwrap();
        if output.agents[0].info.decision == Some(Decision::EmergencyOverride(0)) {
            override_tick = Some(tick);
            assert_eq!(output.agents[0].info.phase_index, 0);
            break;
        }
    }
    assert!(override_tick.is_some_and(|t| t <= 15));
    assert_eq!(coordinator.simulator().current_phase(&"J".into()).unwrap(), 0);
    assert_eq!(coordinator.episode().emergency_switch_count, 1);
}

#[test]
fn random_actions_never_break_min_green() {
    let mut coordinator = Coordinator::new(grid(), EngineConfig::default()).unwrap();
    let agents = coordinator.agents().to_vec();
    let mut rng = SmallRng::seed_from_u64(11);
    let mut last_transition: HashMap<IntersectionId, i64> = HashMap::new();
    let mut phase: HashMap<IntersectionId, usize> = agents
        .iter()
        .map(|id| (id.clone(), coordinator.intersection(id).unwrap().current_phase_index()))
        .collect();

    for tick in 0..400 {
        let decided_at = coordinator.simulator().time();
        let actions: Vec<Action> = agents
            .iter()
            .map(|_| Action::from_index(rng.random_range(0..2)))
            .collect();
        let output = coordinator.step(Some(&actions)).unwrap();
        for agent in &output.agents {
            let previous = phase[&agent.id];
            if agent.info.phase_index != previous {
                if let Some(Decision::Switch(_)) = agent.info.decision {
                    if let Some(last) = last_transition.get(&agent.id) {
                        assert!(
                            decided_at - last >= 10,
                            "{} switched at {} after {} (tick {})",
                            agent.id,
                            decided_at,
                            last,
                            tick
                        );
                    }
                }
                last_transition.insert(agent.id.clone(), decided_at);
                phase.insert(agent.id.clone(), agent.info.phase_index);
            }
        }
        if output.done {
            break;
        }
    }
}

#[test]
fn observations_have_fixed_length_and_unit_range() {
    let mut coordinator = Coordinator::new(grid(), EngineConfig::default()).unwrap();
    let mut source = FixedCycle::new(45);
    for _ in 0..120 {
        let actions = coordinator.actions_from(&mut source);
        let output = coordinator.step(actions.as_deref()).unwrap();
        assert_eq!(output.agents.len(), 4);
        assert_eq!(output.joint_observation.len(), 10 * (2 + 12 * 7) + 8);
        for agent in &output.agents {
            assert_eq!(agent.observation.len(), 2 + 12 * 7 + 8);
            assert!(agent.observation.iter().all(|v| (0.0..=1.0).contains(v)));
            assert!(agent.reward.is_finite());
        }
        assert!(output.joint_observation.iter().all(|v| (0.0..=1.0).contains(v)));
    }
}

#[test]
fn expected_dimension_is_enforced() {
    let mut config = EngineConfig::default();
    config.encoder.expected_dim = Some(50);
    config.encoder.expected_joint_dim = Some(1000);
    let mut coordinator = Coordinator::new(grid(), config).unwrap();
    let output = coordinator.step(None).unwrap();
    assert!(output.agents.iter().all(|a| a.observation.len() == 50));
    assert_eq!(output.joint_observation.len(), 1000);
    assert!(output
        .notices
        .iter()
        .any(|n| matches!(n, Notice::ObservationAdapted { id: None, from: 868, to: 1000 })));
}

#[test]
fn unknown_agent_is_rejected_before_the_episode_starts() {
    let mut config = EngineConfig::default();
    config.coordinator.agents = Some(vec!["J00".into(), "J99".into()]);
    match Coordinator::new(grid(), config) {
        Err(EngineError::Config(ConfigError::UnknownIntersection(id))) => assert_eq!(id.as_str(), "J99"),
        Err(e) => panic!("unexpected error {}", e),
        Ok(_) => panic!("unknown agent accepted"),
    }
}

#[test]
fn empty_program_is_fatal() {
    let mut sim = grid();
    sim.add_junction("EMPTY".into(), Vec::new(), vec![LaneId::from("x")]);
    assert!(matches!(
        Coordinator::new(sim, EngineConfig::default()),
        Err(EngineError::Config(ConfigError::EmptyProgram(_)))
    ));
}

#[test]
fn agent_without_program_is_dropped_and_reported_once() {
    let mut sim = grid();
    sim.break_program("J01".into());
    let mut coordinator = Coordinator::new(sim, EngineConfig::default()).unwrap();
    assert_eq!(
        coordinator.agents(),
        &[IntersectionId::from("J00"), "J10".into(), "J11".into()]
    );

    let first = coordinator.step(None).unwrap();
    let dropped = |notices: &[Notice]| {
        notices
            .iter()
            .filter(|n| matches!(n, Notice::AgentDropped { id, .. } if id.as_str() == "J01"))
            .count()
    };
    assert_eq!(dropped(&first.notices), 1);
    let second = coordinator.step(None).unwrap();
    assert_eq!(dropped(&second.notices), 0);
    assert_eq!(second.global[3], 0.75);
}

#[test]
fn failed_lane_reads_degrade_instead_of_failing_the_tick() {
    let mut sim = grid();
    sim.fail_lane("J00_N".into());
    sim.fail_signal("J11".into());
    let mut coordinator = Coordinator::new(sim, EngineConfig::default()).unwrap();
    let output = coordinator.step(Some(&[Action::Switch; 4])).unwrap();
    let j00 = output.agents.iter().find(|a| a.id.as_str() == "J00").unwrap();
    assert_eq!(j00.info.degraded_reads, 1);
    let j11 = output.agents.iter().find(|a| a.id.as_str() == "J11").unwrap();
    assert_eq!(j11.info.degraded_reads, 2);
    assert!(coordinator.degraded_reads() >= 3);
}

#[test]
fn action_vector_is_padded_or_truncated_with_a_notice() {
    let mut coordinator = Coordinator::new(grid(), EngineConfig::default()).unwrap();
    let short = coordinator.step(Some(&[Action::Keep])).unwrap();
    assert!(short
        .notices
        .contains(&Notice::ActionsPadded { expected: 4, got: 1 }));
    let long = coordinator.step(Some(&[Action::Keep; 6])).unwrap();
    assert!(long
        .notices
        .contains(&Notice::ActionsTruncated { expected: 4, got: 6 }));
}

#[test]
fn operator_commands_are_applied_between_ticks() {
    let mut coordinator = Coordinator::new(grid(), EngineConfig::default()).unwrap();
    let (sender, inbox) = command_channel();
    coordinator.attach_commands(inbox);

    sender.send(OperatorCommand::PhaseSet {
        id: "J00".into(),
        phase_index: 2,
    });
    sender.send(OperatorCommand::PhaseSet {
        id: "J00".into(),
        phase_index: 9,
    });
    sender.send(OperatorCommand::PhaseNext { id: "nowhere".into() });

    let output = coordinator.step(None).unwrap();
    assert_eq!(output.statuses.len(), 3);
    match &output.statuses[0] {
        StatusEmission::TlsStatus {
            id,
            state,
            phase_index,
            ..
        } => {
            assert_eq!(id.as_str(), "J00");
            assert_eq!(state, "rrGG");
            assert_eq!(*phase_index, Some(2));
        }
        other => panic!("expected a status, got {:?}", other),
    }
    assert!(matches!(&output.statuses[1], StatusEmission::Error { .. }));
    assert!(matches!(&output.statuses[2], StatusEmission::Error { .. }));
}

#[test]
fn raw_signal_is_undone_by_resume() {
    let mut coordinator = Coordinator::new(grid(), EngineConfig::default()).unwrap();
    let id = IntersectionId::from("J10");
    coordinator
        .apply_operator_command(&OperatorCommand::StateSet {
            id: id.clone(),
            signal_string: "rrrr".into(),
        })
        .unwrap();
    assert_eq!(coordinator.simulator().current_signal(&id).unwrap(), "rrrr");
    assert!(coordinator
        .apply_operator_command(&OperatorCommand::StateSet {
            id: id.clone(),
            signal_string: "rrr".into(),
        })
        .is_err());

    let status = coordinator
        .apply_operator_command(&OperatorCommand::PhaseResume { id: id.clone() })
        .unwrap();
    assert!(matches!(status, StatusEmission::TlsStatus { ref state, .. } if state == "GGrr"));
}

#[test]
fn pass_through_follows_the_simulator_program() {
    let mut coordinator = Coordinator::new(grid(), EngineConfig::default()).unwrap();
    let mut source = PassThrough;
    let mut switches_seen = 0;
    for _ in 0..40 {
        assert!(coordinator.actions_from(&mut source).is_none());
        let output = coordinator.step(None).unwrap();
        assert!(output.agents.iter().all(|a| a.info.decision.is_none()));
        switches_seen = output.agents[0].info.total_switches;
    }
    let j00 = coordinator.intersection(&"J00".into()).unwrap();
    assert_eq!(j00.ticks_observed(), 40);
    // 200 s of a 68 s cycle.
    assert!(switches_seen >= 4);
    assert_eq!(coordinator.episode().emergency_switch_count, 0);
}

#[test]
fn episode_ends_on_time_budget() {
    let mut config = EngineConfig::default();
    config.episode.time_budget = 100;
    config.coordinator.background = BaselineKind::FixedCycle { cycle_length: 30 };
    let mut coordinator = Coordinator::new(grid(), config).unwrap();
    let mut ticks = 0;
    loop {
        let output = coordinator.step(None).unwrap();
        ticks += 1;
        if output.done {
            assert_eq!(output.termination, Some(TerminationReason::TimeBudget));
            assert!(output.agents.iter().all(|a| a.done));
            break;
        }
    }
    assert_eq!(ticks, 20);
    assert!(matches!(coordinator.step(None), Err(EngineError::EpisodeOver)));
    assert_eq!(coordinator.summary().ticks, 20);
}

#[test]
fn empty_network_ends_after_grace_period() {
    let sim = SyntheticSimulator::grid(SyntheticConfig {
        demand_until: 0,
        ..SyntheticConfig::default()
    });
    let mut coordinator = Coordinator::new(sim, EngineConfig::default()).unwrap();
    let mut last = None;
    for _ in 0..20 {
        let output = coordinator.step(None).unwrap();
        if output.done {
            last = Some(output);
            break;
        }
    }
    let last = last.unwrap();
    assert_eq!(last.time, 60);
    assert_eq!(last.termination, Some(TerminationReason::NetworkEmpty));
}

#[test]
fn decision_interval_sets_the_tick_length() {
    let mut config = EngineConfig::default();
    config.episode.decision_interval = 10;
    let mut coordinator = Coordinator::new(grid(), config).unwrap();
    assert_eq!(coordinator.step(None).unwrap().time, 10);
    assert_eq!(coordinator.step(None).unwrap().time, 20);
}

#[test]
fn control_is_taken_on_first_actuation() {
    let mut coordinator = Coordinator::new(grid(), EngineConfig::default()).unwrap();
    let id = IntersectionId::from("J00");
    assert_eq!(coordinator.simulator().remaining(&id).unwrap(), 30.0);

    coordinator.step(Some(&[Action::Keep; 4])).unwrap();
    // Held for the episode budget, minus the five seconds just simulated.
    assert_eq!(coordinator.simulator().remaining(&id).unwrap(), 3595.0);

    let mut observed = Coordinator::new(grid(), EngineConfig::default()).unwrap();
    observed.step(None).unwrap();
    assert_eq!(observed.simulator().remaining(&id).unwrap(), 25.0);
}
