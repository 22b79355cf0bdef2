use fairsignal::communication::command_channel::{
    command_channel, listen_operator_commands, StatusPublisher,
};
use fairsignal::config::EngineConfig;
use fairsignal::engine::coordinator::Coordinator;
use fairsignal::global_variables::CONFIG_PATH_ENV;
use fairsignal::simulation_engine::synthetic::{SyntheticConfig, SyntheticSimulator};
use log::{error, info, warn};
use std::error::Error;
use std::time::Duration;

// Runs the engine in real time under the configured background baseline, taking
// operator commands from the broker and publishing status lines back.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let config = match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) => EngineConfig::load(path)?,
        Err(_) => EngineConfig::default(),
    };
    let tick = Duration::from_secs(config.episode.decision_interval.max(1) as u64);

    let (sender, inbox) = command_channel();
    tokio::spawn(async move {
        if let Err(e) = listen_operator_commands(sender).await {
            error!("Operator command listener stopped: {}", e);
        }
    });

    let engine = tokio::task::spawn_blocking(move || -> Result<(), String> {
        let sim = SyntheticSimulator::grid(SyntheticConfig::default());
        let mut coordinator = Coordinator::new(sim, config).map_err(|e| e.to_string())?;
        coordinator.attach_commands(inbox);
        let publisher = match StatusPublisher::connect() {
            Ok(publisher) => Some(publisher),
            Err(e) => {
                warn!("Status publishing disabled: {}", e);
                None
            }
        };

        loop {
            let output = coordinator.step(None).map_err(|e| e.to_string())?;
            if let Some(publisher) = &publisher {
                if let Err(e) = publisher.publish(&output.statuses) {
                    warn!("Could not publish status: {}", e);
                }
            }
            if output.done {
                info!("Episode over: {:?}", coordinator.summary());
                break;
            }
            std::thread::sleep(tick);
        }
        if let Some(publisher) = publisher {
            publisher.close().map_err(|e| e.to_string())?;
        }
        Ok(())
    });

    engine.await??;
    Ok(())
}
