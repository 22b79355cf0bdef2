use fairsignal::config::{BaselineKind, EngineConfig};
use fairsignal::control_system::baselines::build_baseline;
use fairsignal::engine::coordinator::Coordinator;
use fairsignal::engine::episode::EpisodeSummary;
use fairsignal::global_variables::{CONFIG_PATH_ENV, TICK_LOG_PATH};
use fairsignal::monitoring::tick_log::{TickLog, TickRecord};
use fairsignal::simulation_engine::synthetic::{SyntheticConfig, SyntheticSimulator};
use log::{info, warn};
use std::error::Error;

// Runs one episode on a fresh synthetic grid with every agent driven by `kind`.
fn run_episode(
    config: &EngineConfig,
    kind: BaselineKind,
    log: &mut TickLog<std::fs::File>,
) -> Result<EpisodeSummary, Box<dyn Error>> {
    let sim = SyntheticSimulator::grid(SyntheticConfig::default());
    let mut coordinator = Coordinator::new(sim, config.clone())?;
    let mut source = build_baseline(kind);
    let run = source.name().to_string();
    info!("Running {} on agents {:?}", run, coordinator.agents());

    loop {
        let actions = coordinator.actions_from(source.as_mut());
        let output = coordinator.step(actions.as_deref())?;
        log.record(&TickRecord::from_step(&run, &output))?;
        if output.done {
            break;
        }
    }
    log.flush()?;
    Ok(coordinator.summary())
}

fn main() {
    env_logger::init();

    let config = match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) => match EngineConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Could not load config {}: {}", path, e);
                std::process::exit(1);
            }
        },
        Err(_) => EngineConfig::default(),
    };

    let mut log = match TickLog::append(TICK_LOG_PATH) {
        Ok(log) => log,
        Err(e) => {
            eprintln!("Could not open {}: {}", TICK_LOG_PATH, e);
            std::process::exit(1);
        }
    };

    let baselines = [
        BaselineKind::PassThrough,
        BaselineKind::FixedCycle { cycle_length: 60 },
    ];
    for kind in baselines {
        match run_episode(&config, kind, &mut log) {
            Ok(summary) => {
                println!(
                    "{:?}: {} ticks, reward {:.3} ({:.4}/tick), {} emergency overrides, {} infeasible, ended by {:?}",
                    kind,
                    summary.ticks,
                    summary.total_reward,
                    summary.mean_reward_per_tick,
                    summary.emergency_switches,
                    summary.infeasible_overrides,
                    summary.termination
                );
            }
            Err(e) => warn!("Episode with {:?} failed: {}", kind, e),
        }
    }
}
