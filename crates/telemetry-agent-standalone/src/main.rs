// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{
    env,
    path::{Path, PathBuf},
    process,
    sync::Arc,
};
use tracing::{error, info};

use agent_transport::TransportRegistry;
use telemetry_agent::{
    collectors::{
        loader::JsonTargetLoader,
        procfs::{ProcManagementClient, UnsupportedSnapshotParser},
        Collectors,
    },
    logger, AgentConfig, AgentContext, AgentController,
};

const CONFIG_ENV: &str = "TELEMETRY_AGENT_CONFIG";
const TARGET_DIR_ENV: &str = "TELEMETRY_AGENT_TARGET_DIR";

#[tokio::main]
pub async fn main() {
    let Some(config_path) = env::args_os()
        .nth(1)
        .or_else(|| env::var_os(CONFIG_ENV))
        .map(PathBuf::from)
    else {
        eprintln!("usage: telemetry-agent-standalone <agent.properties> (or set {CONFIG_ENV})");
        process::exit(2);
    };

    let config = match AgentConfig::from_file(&config_path, None) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Unable to load configuration: {e}");
            process::exit(1);
        }
    };

    let log_control = match logger::init(config.logging_level) {
        Ok(control) => Some(control),
        Err(e) => {
            eprintln!("Failed to install logger: {e}");
            None
        }
    };

    // target documents live next to the properties file unless overridden
    let target_dir = env::var_os(TARGET_DIR_ENV)
        .map(PathBuf::from)
        .or_else(|| config_path.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));

    let collectors = Collectors {
        management: Arc::new(ProcManagementClient::new()),
        snapshot_parser: Arc::new(UnsupportedSnapshotParser),
        target_loader: Arc::new(JsonTargetLoader::new(target_dir)),
    };
    let ctx = AgentContext::new(
        config,
        TransportRegistry::with_defaults(),
        collectors,
        log_control,
    );
    let controller = AgentController::new(Arc::new(ctx));

    if let Err(e) = controller.start(Some(config_path.clone())).await {
        error!("Failed to start telemetry agent: {e}");
        process::exit(1);
    }
    info!(
        "Telemetry agent running with configuration {}",
        config_path.display()
    );

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received interrupt, shutting down"),
        Err(e) => error!("Unable to listen for shutdown signal: {e}"),
    }
    controller.shutdown().await;
}
