// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};
use std::sync::Weak;
use std::time::{Duration, SystemTime};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::controller::AgentController;

/// Polls the modification time of `path` and reloads the agent when it moves forward.
///
/// A file that disappears is ignored until it comes back. Reload failures are logged and the
/// running configuration stays in place.
pub async fn run(
    controller: Weak<AgentController>,
    path: PathBuf,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut last_modified = modified(&path).await;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let current = modified(&path).await;
        let changed = match (current, last_modified) {
            (Some(now), Some(before)) => now > before,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !changed {
            continue;
        }
        last_modified = current;

        let Some(controller) = controller.upgrade() else {
            break;
        };
        info!("Configuration file {} changed, reloading", path.display());
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            reloaded = controller.reload_from_file(&path) => {
                if let Err(e) = reloaded {
                    error!("Failed to reload {}: {e}", path.display());
                }
            }
        }
    }
    debug!("Configuration watcher stopped");
}

async fn modified(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.and_then(|m| m.modified()).ok()
}
