use std::future::Future;

use shared::items::WorkItem;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::capture::{ItemError, ReadinessPhase};
use crate::config::ReadinessConfig;
use crate::host::{
    evaluate_bool,
    evaluate_count,
    evaluate_scene_metrics,
    HostCall,
    HostError,
    RenderHost,
    CANVAS_SELECTOR,
    PREVIEW_LOADING_SELECTOR,
};

/// Decides when a freshly loaded scene is safe to photograph.
pub struct ReadinessPoller {
    config: ReadinessConfig,
}

impl ReadinessPoller {
    pub fn new(config: ReadinessConfig) -> Self {
        Self { config }
    }

    /// Returns `Ok` once the scene has content, the editor has initialized,
    /// the scene has been provisioned and no assets are loading anymore.
    ///
    /// An empty scene fails immediately with `ItemError::ContentEmpty`, the other
    /// conditions are polled until their timeout runs out (`ItemError::HostTimeout`).
    pub async fn await_ready<H: RenderHost + ?Sized>(
        &self,
        host: &H,
        item: &WorkItem,
    ) -> Result<(), ItemError> {
        let item_id = item.id();
        let scene_id = item.scene_id();

        debug!(item_id, "Checking if the scene has content.");
        let entity_count = evaluate_count(
            host,
            HostCall::SceneEntityCount {
                scene_id: scene_id.to_string(),
            },
        )
        .await?;

        if entity_count == 0 {
            return Err(ItemError::ContentEmpty);
        }

        info!(item_id, "Waiting for the editor to initialize.");
        self.poll_until(
            item_id,
            ReadinessPhase::Initialization,
            self.config.initialization_timeout,
            move || async move {
                let canvas_present = evaluate_bool(
                    host,
                    HostCall::ElementPresent {
                        selector: CANVAS_SELECTOR.to_string(),
                    },
                )
                .await?;

                if !canvas_present {
                    return Ok(false);
                }

                let preview_loading = evaluate_bool(
                    host,
                    HostCall::ElementPresent {
                        selector: PREVIEW_LOADING_SELECTOR.to_string(),
                    },
                )
                .await?;

                Ok(!preview_loading)
            },
        )
        .await?;

        info!(item_id, "Waiting for the scene to provision.");
        self.poll_until(
            item_id,
            ReadinessPhase::Provisioning,
            self.config.initialization_timeout,
            move || async move {
                let metrics = evaluate_scene_metrics(host, scene_id).await?;
                Ok(metrics.map(|metrics| metrics.entities > 0).unwrap_or(false))
            },
        )
        .await?;

        info!(item_id, "Waiting for assets to load.");
        self.poll_until(
            item_id,
            ReadinessPhase::AssetLoad,
            self.config.asset_load_timeout,
            move || async move {
                let loading = evaluate_bool(host, HostCall::AssetsLoading).await?;
                Ok(!loading)
            },
        )
        .await?;

        Ok(())
    }

    async fn poll_until<F, Fut>(
        &self,
        item_id: &str,
        phase: ReadinessPhase,
        timeout: std::time::Duration,
        mut condition: F,
    ) -> Result<(), ItemError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool, HostError>>,
    {
        let started_at = Instant::now();
        let mut polls: u32 = 0;

        loop {
            if condition().await? {
                debug!(item_id, polls, "Done waiting for {}.", phase);
                return Ok(());
            }

            polls += 1;

            let waited = started_at.elapsed();
            if waited >= timeout {
                return Err(ItemError::HostTimeout { phase, waited });
            }

            if polls % self.config.liveness_log_every == 0 {
                info!(
                    item_id,
                    polls,
                    waited_seconds = waited.as_secs(),
                    "Still waiting for {}, the capturer is alive.",
                    phase
                );
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}
