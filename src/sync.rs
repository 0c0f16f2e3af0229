//! Keeps the spec index in step with the specification change stream.

use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cluster::{SpecEvent, SpecWatcher, WatchEvent};
use crate::index::SpecIndex;
use crate::metrics::{self, ReconnectReason, SpecEventType};

const MAX_BACKOFF_SECS: u64 = 30;

/// Single writer of the [`SpecIndex`].
pub struct SyncCoordinator {
    watcher: Arc<dyn SpecWatcher>,
    index: SpecIndex,
    reserved_namespace: String,
}

/// Specifications seen since the current watch was opened, until `Synced`.
type Listing = Option<HashSet<String>>;

impl SyncCoordinator {
    /// Create a coordinator feeding `index` from `watcher`.
    pub fn new(
        watcher: Arc<dyn SpecWatcher>,
        index: SpecIndex,
        reserved_namespace: impl Into<String>,
    ) -> Self {
        Self {
            watcher,
            index,
            reserved_namespace: reserved_namespace.into(),
        }
    }

    /// Watch and apply changes until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut backoff_secs = 1u64;
        let mut first_connect = true;

        loop {
            if shutdown.is_cancelled() {
                info!("Spec sync shutting down");
                return;
            }

            info!(namespace = %self.reserved_namespace, "Starting spec watch");

            let mut stream = match self.watcher.watch().await {
                Ok(s) => {
                    backoff_secs = 1;
                    if first_connect {
                        metrics::record_watch_reconnect(ReconnectReason::InitialConnect);
                        first_connect = false;
                    }
                    s
                }
                Err(e) => {
                    error!("Failed to watch specs: {}", e);
                    metrics::record_watch_reconnect(ReconnectReason::Error);
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = sleep(Duration::from_secs(backoff_secs)) => {}
                    }
                    backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                    continue;
                }
            };

            let mut listing: Listing = Some(HashSet::new());

            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.cancelled() => {
                        info!("Spec sync received shutdown signal");
                        return;
                    }

                    result = stream.next() => {
                        match result {
                            Some(Ok(event)) => self.handle_watch_event(event, &mut listing),
                            Some(Err(e)) => {
                                warn!("Spec watch error: {}", e);
                                metrics::record_watch_reconnect(ReconnectReason::Error);
                                break;
                            }
                            None => {
                                info!("Spec watch stream ended");
                                metrics::record_watch_reconnect(ReconnectReason::StreamEnded);
                                break;
                            }
                        }
                    }
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = sleep(Duration::from_secs(1)) => {}
            }
        }
    }

    fn handle_watch_event(&self, event: WatchEvent, listing: &mut Listing) {
        match event {
            WatchEvent::Spec(event) => {
                if let Some(seen) = listing.as_mut() {
                    if !event.is_delete() {
                        seen.insert(event.spec().name.clone());
                    }
                }
                self.handle_spec_event(event);
            }
            WatchEvent::Synced => {
                metrics::record_spec_event(SpecEventType::Synced);
                if let Some(seen) = listing.take() {
                    let pruned = self.index.retain(&seen);
                    if pruned > 0 {
                        metrics::record_index_resync();
                    }
                    debug!(specs = seen.len(), pruned, "spec listing complete");
                }
                if !self.index.is_ready() {
                    self.index.mark_ready();
                    info!(specs = self.index.specs_count(), "Initial spec sync complete");
                }
            }
        }
    }

    /// Apply one specification change to the index.
    pub fn handle_spec_event(&self, event: SpecEvent) {
        let spec = event.spec();

        if spec.namespace != self.reserved_namespace {
            metrics::record_spec_event(SpecEventType::Ignored);
            return;
        }

        if event.is_delete() {
            self.index.remove_deleted(spec);
            metrics::record_spec_event(SpecEventType::Delete);
            return;
        }

        if !spec.is_scheduled() {
            // Leaving the scheduled phase withdraws an indexed spec.
            if self.index.remove(&spec.name) {
                debug!(spec = %spec.name, phase = ?spec.phase, "spec no longer scheduled");
                metrics::record_spec_event(SpecEventType::Unscheduled);
            } else {
                metrics::record_spec_event(SpecEventType::Ignored);
            }
            return;
        }

        let event_type = match event {
            SpecEvent::Added(_) => SpecEventType::Add,
            _ => SpecEventType::Update,
        };
        if self.index.upsert(event.into_spec()) {
            metrics::record_spec_event(event_type);
        } else {
            metrics::record_spec_event(SpecEventType::Ignored);
        }
    }
}
