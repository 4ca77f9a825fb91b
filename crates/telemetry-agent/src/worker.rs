// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// How long `stop` waits for a cancelled worker before aborting it.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// A supervised background task: its own cancellation token plus the join handle.
///
/// Workers are start/stop only. Stopping cancels the token and joins the task, so any
/// connection the worker holds is released before `stop` returns.
#[derive(Debug)]
pub struct WorkerHandle {
    name: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl WorkerHandle {
    /// Spawns `run` with a child of `parent`, so cancelling the parent stops the worker too.
    pub fn spawn<F, Fut>(name: impl Into<String>, parent: &CancellationToken, run: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let cancel = parent.child_token();
        let handle = tokio::spawn(run(cancel.clone()));
        debug!("Started worker {name}");
        WorkerHandle {
            name,
            cancel,
            handle,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancels the worker and waits up to [`STOP_TIMEOUT`] for it to exit.
    pub async fn stop(self) {
        self.stop_with_timeout(STOP_TIMEOUT).await;
    }

    pub async fn stop_with_timeout(mut self, timeout: Duration) {
        self.cancel.cancel();
        match tokio::time::timeout(timeout, &mut self.handle).await {
            Ok(Ok(())) => debug!("Worker {} stopped", self.name),
            Ok(Err(e)) if e.is_panic() => error!("Worker {} panicked: {e}", self.name),
            Ok(Err(e)) => debug!("Worker {} ended: {e}", self.name),
            Err(_) => {
                warn!("Worker {} did not stop within {timeout:?}, aborting", self.name);
                self.handle.abort();
            }
        }
    }
}

/// Runs `fut` to completion unless `cancel` fires first.
pub(crate) async fn until_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        output = fut => Some(output),
    }
}
