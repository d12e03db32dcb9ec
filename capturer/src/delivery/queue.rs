use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{stream, StreamExt};
use miette::{IntoDiagnostic, Result};
use shared::results::summary::RunTraceBuilder;
use shared::storage::BlobStore;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::capture::CaptureResult;
use crate::config::DeliveryConfig;
use crate::delivery::deliver_item;
use crate::orchestrator::ItemState;

struct DeliveryState {
    /// Captured items that have not been fully delivered yet, at most one per item ID.
    pending: Mutex<VecDeque<CaptureResult>>,

    capture_phase_finished: AtomicBool,

    wake: Notify,
}


/// Cheap, cloneable handle for feeding the delivery queue from the capture phase.
#[derive(Clone)]
pub struct DeliveryHandle {
    state: Arc<DeliveryState>,
}

impl DeliveryHandle {
    /// Adds `result` to the pending set. A pending entry for the same item is replaced.
    pub async fn enqueue(&self, result: CaptureResult) {
        let mut pending = self.state.pending.lock().await;

        match pending
            .iter_mut()
            .find(|queued| queued.item_id == result.item_id)
        {
            Some(queued) => *queued = result,
            None => pending.push_back(result),
        }
    }

    /// No more items will be enqueued; the queue exits once everything pending is delivered.
    pub fn mark_capture_phase_finished(&self) {
        self.state
            .capture_phase_finished
            .store(true, Ordering::SeqCst);
        self.state.wake.notify_one();
    }

    pub async fn pending_count(&self) -> usize {
        self.state.pending.lock().await.len()
    }
}


/// Background task that keeps uploading pending items, retrying failed ones on every pass,
/// until the capture phase has finished and nothing is left.
pub struct DeliveryQueue {
    handle: DeliveryHandle,

    join_handle: JoinHandle<Result<()>>,
}

impl DeliveryQueue {
    pub fn initialize(
        destination: Arc<dyn BlobStore>,
        config: DeliveryConfig,
        tracer: RunTraceBuilder,
    ) -> Self {
        let state = Arc::new(DeliveryState {
            pending: Mutex::new(VecDeque::new()),
            capture_phase_finished: AtomicBool::new(false),
            wake: Notify::new(),
        });

        let join_handle = tokio::spawn(Self::run_drain_loop(
            destination,
            state.clone(),
            config,
            tracer,
        ));

        Self {
            handle: DeliveryHandle { state },
            join_handle,
        }
    }

    pub fn handle(&self) -> DeliveryHandle {
        self.handle.clone()
    }

    pub async fn join(self) -> Result<()> {
        self.join_handle.await.into_diagnostic()?
    }

    async fn run_drain_loop(
        destination: Arc<dyn BlobStore>,
        state: Arc<DeliveryState>,
        config: DeliveryConfig,
        tracer: RunTraceBuilder,
    ) -> Result<()> {
        let max_concurrent_items = config.max_concurrent_items.max(1);

        loop {
            let snapshot: Vec<CaptureResult> =
                state.pending.lock().await.iter().cloned().collect();

            if !snapshot.is_empty() {
                info!(pending = snapshot.len(), "Starting drain pass.");
                tracer.trace_drain_pass().await;

                stream::iter(snapshot)
                    .for_each_concurrent(max_concurrent_items, |result| {
                        Self::deliver_and_settle(destination.as_ref(), &state, &tracer, result)
                    })
                    .await;
            }

            // The flag has to be read before the pending set: an item enqueued right
            // before the capture phase finished must still be seen as pending.
            let capture_phase_finished = state.capture_phase_finished.load(Ordering::SeqCst);
            let nothing_pending = state.pending.lock().await.is_empty();

            if capture_phase_finished && nothing_pending {
                debug!("Delivery queue drained, stopping.");
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(config.retry_interval) => {}
                _ = state.wake.notified() => {}
            }
        }

        Ok(())
    }

    async fn deliver_and_settle(
        destination: &dyn BlobStore,
        state: &DeliveryState,
        tracer: &RunTraceBuilder,
        result: CaptureResult,
    ) {
        match deliver_item(destination, &result).await {
            Ok(()) => {
                // A newer capture of the same item may have replaced this entry meanwhile;
                // that one still has to be delivered.
                state
                    .pending
                    .lock()
                    .await
                    .retain(|queued| queued != &result);

                info!(
                    item_id = result.item_id,
                    state = %ItemState::Delivered,
                    "Artifacts uploaded."
                );
                tracer.trace_item_delivered().await;
            }
            Err(error) => {
                warn!(
                    item_id = result.item_id,
                    error = ?error,
                    "Could not upload artifacts, will retry on the next pass."
                );
                tracer.trace_failed_transfer().await;
            }
        }
    }
}
