//! Per-repository polling task

use crate::repo::source::{ChartSource, SourceError};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Latest chart versions observed in one repository poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartUpdate {
    pub repo: String,
    /// Chart name to its highest published version
    pub latest: BTreeMap<String, String>,
}

/// A running poller for one repository. Polls immediately, then once per
/// period, sending a [`ChartUpdate`] after every successful refresh.
/// Dropping or closing the handle stops the poller.
pub struct RepoHandle {
    source: Arc<dyn ChartSource>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl RepoHandle {
    pub fn spawn(
        source: Arc<dyn ChartSource>,
        period: Duration,
        updates: mpsc::UnboundedSender<ChartUpdate>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_loop(source.clone(), period, updates, cancel.clone()));
        Self {
            source,
            cancel,
            task,
        }
    }

    pub fn source(&self) -> Arc<dyn ChartSource> {
        self.source.clone()
    }

    pub fn name(&self) -> &str {
        self.source.name()
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.task.is_finished()
    }
}

impl Drop for RepoHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Refresh the source and collect the latest version of each chart
pub async fn poll_once(source: &dyn ChartSource) -> Result<ChartUpdate, SourceError> {
    source.refresh().await?;
    Ok(ChartUpdate {
        repo: source.name().to_string(),
        latest: source.latest_versions().await?,
    })
}

async fn poll_loop(
    source: Arc<dyn ChartSource>,
    period: Duration,
    updates: mpsc::UnboundedSender<ChartUpdate>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match poll_once(source.as_ref()).await {
                    Ok(update) => {
                        debug!(repo = %update.repo, charts = update.latest.len(), "Repository polled");
                        if updates.send(update).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(repo = %source.name(), error = %e, "Repository poll failed"),
                }
            }
        }
    }
    debug!(repo = %source.name(), "Repository poller stopped");
}
