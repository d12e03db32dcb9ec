//! Drives a single item through the render host:
//! `Fetched -> ReadyChecked -> Capturing -> Captured -> Removed`, or `Skipped` on any error.

use std::fmt::{Display, Formatter};
use std::sync::Arc;

use miette::{miette, Context, IntoDiagnostic, Result};
use shared::items::WorkItem;
use shared::results::summary::RunTraceBuilder;
use shared::storage::BlobStore;
use tracing::{debug, error, info, warn};

use crate::capture::animation::GifAssembler;
use crate::capture::readiness::ReadinessPoller;
use crate::capture::rotation::capture_rotation;
use crate::capture::{CaptureResult, ItemError};
use crate::config::CapturerConfiguration;
use crate::host::{HostAction, HostCall, RenderHost};
use crate::staging::{animation_key, is_valid_item_id, StagingArea};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ItemState {
    Fetched,
    ReadyChecked,
    Capturing,
    Captured,
    Removed,
    Delivered,
    Skipped,
}

impl Display for ItemState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ItemState::Fetched => "Fetched",
            ItemState::ReadyChecked => "ReadyChecked",
            ItemState::Capturing => "Capturing",
            ItemState::Captured => "Captured",
            ItemState::Removed => "Removed",
            ItemState::Delivered => "Delivered",
            ItemState::Skipped => "Skipped",
        };

        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum ItemOutcome {
    /// Artifacts are staged and ready to be delivered.
    Captured(CaptureResult),

    /// Artifacts already exist in the destination store; the render host was never touched.
    AlreadyProcessed,

    Skipped(ItemError),
}


/// Navigates the render host to the editor and gets it ready for loading items.
pub async fn prepare_editor<H: RenderHost + ?Sized>(
    host: &H,
    configuration: &CapturerConfiguration,
) -> Result<()> {
    let builder_url = configuration.builder_url.as_str();

    info!(builder_url, "Navigating to the editor.");
    host.navigate(builder_url)
        .await
        .into_diagnostic()
        .wrap_err_with(|| miette!("Could not open the editor at {builder_url}."))?;

    host.set_viewport(configuration.screen_width, configuration.screen_height)
        .await
        .into_diagnostic()
        .wrap_err_with(|| miette!("Could not set the viewport size."))?;

    host.evaluate(HostCall::DismissOnboarding)
        .await
        .into_diagnostic()
        .wrap_err_with(|| miette!("Could not dismiss the editor's onboarding."))?;

    // Reload so the editor starts up with the onboarding flags set.
    host.navigate(builder_url)
        .await
        .into_diagnostic()
        .wrap_err_with(|| miette!("Could not reload the editor."))?;

    Ok(())
}


pub struct CaptureOrchestrator<H: RenderHost + ?Sized> {
    host: Arc<H>,
    source_store: Arc<dyn BlobStore>,
    destination_store: Arc<dyn BlobStore>,
    poller: ReadinessPoller,
    assembler: GifAssembler,
    staging: StagingArea,
    skip_already_processed: bool,
    tracer: RunTraceBuilder,
}

impl<H: RenderHost + ?Sized> CaptureOrchestrator<H> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        host: Arc<H>,
        source_store: Arc<dyn BlobStore>,
        destination_store: Arc<dyn BlobStore>,
        poller: ReadinessPoller,
        assembler: GifAssembler,
        staging: StagingArea,
        skip_already_processed: bool,
        tracer: RunTraceBuilder,
    ) -> Self {
        Self {
            host,
            source_store,
            destination_store,
            poller,
            assembler,
            staging,
            skip_already_processed,
            tracer,
        }
    }

    /// Processes one item. Never fails: every error ends up as `ItemOutcome::Skipped`.
    pub async fn process_item(&self, source_key: &str) -> ItemOutcome {
        self.tracer.trace_item_attempted().await;

        match self.run_item(source_key).await {
            Ok(ItemOutcome::Captured(result)) => {
                self.tracer.trace_item_captured().await;
                ItemOutcome::Captured(result)
            }
            Ok(ItemOutcome::AlreadyProcessed) => {
                info!(
                    item_id = source_key,
                    "Skipping this item because it has already been processed."
                );
                self.tracer.trace_item_skipped_already_processed().await;
                ItemOutcome::AlreadyProcessed
            }
            Ok(ItemOutcome::Skipped(error)) | Err(error) => {
                error!(
                    item_id = source_key,
                    kind = error.kind(),
                    state = %ItemState::Skipped,
                    "[{}] {}",
                    source_key,
                    error
                );
                self.tracer
                    .trace_item_failed(source_key, error.kind(), error.to_string())
                    .await;
                ItemOutcome::Skipped(error)
            }
        }
    }

    async fn run_item(&self, source_key: &str) -> Result<ItemOutcome, ItemError> {
        info!(item_id = source_key, "Fetching item from the source store.");
        let item = self.fetch_item(source_key).await?;
        let item_id = item.id();
        debug!(item_id, state = %ItemState::Fetched, "Item fetched.");

        if self.skip_already_processed && self.has_been_processed(item_id).await {
            return Ok(ItemOutcome::AlreadyProcessed);
        }

        info!(item_id, "Loading item into the editor.");
        self.host
            .dispatch(HostAction::CreateProject {
                project: item.project.clone(),
            })
            .await?;

        let capture = self.capture_loaded_item(&item).await;

        let teardown = self
            .host
            .dispatch(HostAction::DeleteProject {
                project: item.project.clone(),
            })
            .await;

        match (&capture, teardown) {
            (Ok(_), Ok(())) => debug!(item_id, state = %ItemState::Removed, "Item removed from the editor."),
            (_, Err(error)) => warn!(
                item_id,
                error = %error,
                "Could not remove item from the editor."
            ),
            (Err(_), Ok(())) => {}
        }

        capture.map(ItemOutcome::Captured)
    }

    async fn capture_loaded_item(&self, item: &WorkItem) -> Result<CaptureResult, ItemError> {
        let item_id = item.id();

        self.host
            .dispatch(HostAction::CreateScene {
                scene: item.scene.clone(),
            })
            .await?;

        self.poller.await_ready(self.host.as_ref(), item).await?;
        debug!(item_id, state = %ItemState::ReadyChecked, "Scene is ready.");

        info!(item_id, state = %ItemState::Capturing, "Capturing rotation.");
        let result =
            capture_rotation(self.host.as_ref(), item, &self.staging, &self.assembler).await?;
        info!(item_id, state = %ItemState::Captured, "Rotation captured.");

        Ok(result)
    }

    async fn fetch_item(&self, source_key: &str) -> Result<WorkItem, ItemError> {
        let bytes = self
            .source_store
            .read(source_key)
            .await
            .map_err(|error| ItemError::Fetch(error.to_string()))?;

        let item = WorkItem::from_json_bytes(source_key, &bytes)
            .map_err(|error| ItemError::Fetch(format!("invalid entry JSON: {error}")))?;

        if !is_valid_item_id(item.id()) {
            return Err(ItemError::Fetch(format!(
                "invalid project id {:?}",
                item.id()
            )));
        }

        Ok(item)
    }

    async fn has_been_processed(&self, item_id: &str) -> bool {
        match self.destination_store.exists(&animation_key(item_id)).await {
            Ok(exists) => exists,
            Err(error) => {
                warn!(
                    item_id,
                    error = %error,
                    "Could not check for existing artifacts, capturing anyway."
                );
                false
            }
        }
    }
}
