//! Node leader binary

use meshwork_core::leader::http;
use meshwork_core::runtime::{NodeRuntime, RuntimeConfig};
use meshwork_core::{Config, LeaderConfig, Topology};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut leader_config = LeaderConfig::from_env()?;
    let config_path = leader_config
        .config_path
        .get_or_insert_with(|| PathBuf::from("config.json"))
        .clone();

    info!("Starting Meshwork leader for {}", leader_config.node);

    let topology = match Config::from_file(&config_path) {
        Ok(topology) => topology,
        Err(e) => {
            error!("Unable to load topology: {}", e);
            return Err(e.into());
        }
    };

    let port = leader_config
        .gui_port
        .or(topology.gui_port)
        .unwrap_or(meshwork_core::DEFAULT_GUI_PORT);

    let runtime = NodeRuntime::new(RuntimeConfig::default())?;
    let workers = runtime.compute_handle();

    let served = runtime.block_on_io(async move {
        let node = Topology::build(&topology, &leader_config.node, leader_config.control_timeout)?;
        let leader = Arc::new(node.into_leader(leader_config)?.with_spawner(workers));

        leader.init().await?;
        leader.run();

        http::bind_and_serve(leader, port).await
    });

    runtime.shutdown();

    if let Err(e) = served {
        error!("Leader failed: {}", e);
        return Err(e.into());
    }

    info!("Leader exited");
    Ok(())
}
