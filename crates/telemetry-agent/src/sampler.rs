// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Periodic heap snapshot capture.
//!
//! Each cycle removes any stale snapshot, asks the local management interface for a live
//! snapshot, parses it off the async runtime and publishes one `snapshot_record` per record
//! allowed by the configured record-type filter. The snapshot file is removed after every
//! cycle, including failed and cancelled ones.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use agent_transport::Event;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::context::AgentContext;
use crate::error::{CollectorError, EnqueueError};
use crate::worker::until_cancelled;

pub const SAMPLER_SOURCE: &str = "snapshot_sampler";
pub const SNAPSHOT_EVENT: &str = "snapshot_record";

pub async fn run(ctx: Arc<AgentContext>, path: PathBuf, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match sample_once(&ctx, &path, &cancel).await {
            Ok(published) => debug!("Published {published} snapshot records"),
            Err(e) => error!("Snapshot sampling failed: {e}"),
        }
        if cancel.is_cancelled() {
            break;
        }
    }
    debug!("Snapshot sampler stopped");
}

/// Runs one capture cycle and returns the number of records published.
///
/// When `cancel` fires mid-cycle the management connection is still closed and the snapshot
/// file removed; records published before that point are counted.
pub async fn sample_once(
    ctx: &AgentContext,
    path: &Path,
    cancel: &CancellationToken,
) -> Result<usize, CollectorError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed stale snapshot {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    let published = capture_and_publish(ctx, path, cancel).await;
    remove_snapshot(path).await;
    published
}

async fn capture_and_publish(
    ctx: &AgentContext,
    path: &Path,
    cancel: &CancellationToken,
) -> Result<usize, CollectorError> {
    let collectors = ctx.collectors();
    let mut connection = tokio::select! {
        biased;
        () = cancel.cancelled() => return Ok(0),
        connection = collectors.management.local() => connection?,
    };
    let dumped = tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        dumped = connection.dump_snapshot(path, true) => Some(dumped),
    };
    connection.close().await;
    match dumped {
        None => return Ok(0),
        Some(dumped) => dumped?,
    }

    let parser = Arc::clone(&collectors.snapshot_parser);
    let snapshot = path.to_path_buf();
    let parsing = tokio::task::spawn_blocking(move || parser.parse(&snapshot));
    let records = tokio::select! {
        biased;
        () = cancel.cancelled() => return Ok(0),
        parsed = parsing => parsed.map_err(|e| CollectorError::Parse(e.to_string()))??,
    };

    let config = ctx.config();
    let mut published: usize = 0;
    for record in records {
        if !config
            .hprof_record_types
            .allows(record.record_type, record.sub_record_type)
        {
            continue;
        }
        if cancel.is_cancelled() || ctx.is_paused() || !ctx.config().trace_hprof {
            break;
        }
        let mut event = Event::builder(SNAPSHOT_EVENT, SAMPLER_SOURCE).field("recordType", record.record_type);
        if let Some(sub) = record.sub_record_type {
            event = event.field("subRecordType", sub);
        }
        for (key, value) in record.fields {
            event = event.field(key, value);
        }
        let Some(sent) = until_cancelled(cancel, ctx.publish(event.build())).await else {
            break;
        };
        match sent {
            Ok(()) => published += 1,
            Err(EnqueueError::Cancelled) => break,
            Err(e) => debug!("Dropped {SNAPSHOT_EVENT} event: {e}"),
        }
    }
    Ok(published)
}

async fn remove_snapshot(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove snapshot {}: {e}", path.display()),
    }
}
