//! Runs a whole batch: capture phase in the foreground, delivery queue in the background.

use std::sync::Arc;

use chrono::Utc;
use miette::{miette, Context, IntoDiagnostic, Result};
use shared::items::ids::{load_item_ids, WorkWindow};
use shared::results::summary::{format_minutes_and_seconds, RunSummary, RunTraceBuilder};
use shared::storage::BlobStore;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::capture::animation::GifAssembler;
use crate::capture::readiness::ReadinessPoller;
use crate::config::CapturerConfiguration;
use crate::delivery::queue::{DeliveryHandle, DeliveryQueue};
use crate::host::RenderHost;
use crate::orchestrator::{prepare_editor, CaptureOrchestrator, ItemOutcome};
use crate::staging::StagingArea;

pub struct BatchDriver<H: RenderHost + ?Sized> {
    configuration: CapturerConfiguration,
    host: Arc<H>,
    source_store: Arc<dyn BlobStore>,
    destination_store: Arc<dyn BlobStore>,
}

impl<H: RenderHost + ?Sized> BatchDriver<H> {
    pub fn new(
        configuration: CapturerConfiguration,
        host: Arc<H>,
        source_store: Arc<dyn BlobStore>,
        destination_store: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            configuration,
            host,
            source_store,
            destination_store,
        }
    }

    pub async fn run(self) -> Result<RunSummary> {
        let tracer = RunTraceBuilder::new_empty();
        tracer.set_run_start_time(Utc::now()).await;
        let run_started = Instant::now();

        info!(
            source = self.source_store.describe(),
            destination = self.destination_store.describe(),
            "Starting batch run."
        );

        let staging = StagingArea::new(&self.configuration.staging_directory);
        staging
            .recreate()
            .await
            .into_diagnostic()
            .wrap_err_with(|| {
                miette!(
                    "Could not recreate staging directory {:?}.",
                    staging.directory()
                )
            })?;

        let all_item_ids = load_item_ids(&self.configuration.ids_file_path)?;
        let window = WorkWindow::new(self.configuration.page, self.configuration.size);
        let item_ids = window.apply(&all_item_ids);

        info!(
            page = window.page,
            size = window.size,
            offset = window.offset(),
            total_ids = all_item_ids.len(),
            "Processing {} items.",
            item_ids.len()
        );

        let delivery_queue = DeliveryQueue::initialize(
            self.destination_store.clone(),
            self.configuration.delivery.clone(),
            tracer.clone(),
        );
        let delivery = delivery_queue.handle();

        let capture_phase_result = self
            .run_capture_phase(item_ids, staging, &tracer, &delivery)
            .await;

        info!(
            "Capture phase finished in {}.",
            format_minutes_and_seconds(run_started.elapsed())
        );

        if let Err(error) = self.host.close().await {
            warn!(error = %error, "Could not close the render host.");
        }

        // Whatever was captured before a failure still gets delivered.
        delivery.mark_capture_phase_finished();

        let still_pending = delivery.pending_count().await;
        if still_pending > 0 {
            info!(pending = still_pending, "Uploading screenshots...");
        }

        delivery_queue
            .join()
            .await
            .wrap_err_with(|| miette!("Delivery queue stopped unexpectedly."))?;

        capture_phase_result?;

        tracer.set_run_finish_time(Utc::now()).await;
        let summary = tracer.build().await?;
        log_summary(&summary);

        if let Some(summary_output_path) = &self.configuration.summary_output_path {
            summary.write_to_file(summary_output_path)?;
            info!(path = ?summary_output_path, "Run summary written.");
        }

        Ok(summary)
    }

    async fn run_capture_phase(
        &self,
        item_ids: &[String],
        staging: StagingArea,
        tracer: &RunTraceBuilder,
        delivery: &DeliveryHandle,
    ) -> Result<()> {
        prepare_editor(self.host.as_ref(), &self.configuration).await?;

        let orchestrator = CaptureOrchestrator::new(
            self.host.clone(),
            self.source_store.clone(),
            self.destination_store.clone(),
            ReadinessPoller::new(self.configuration.readiness.clone()),
            GifAssembler::new(&self.configuration.animation),
            staging,
            self.configuration.skip_already_processed,
            tracer.clone(),
        );

        for (index, item_id) in item_ids.iter().enumerate() {
            info!(item_id, "project id: {} (#{})", item_id, index + 1);
            let item_started = Instant::now();

            if let ItemOutcome::Captured(result) = orchestrator.process_item(item_id).await {
                delivery.enqueue(result).await;
            }

            info!(
                item_id,
                "Item took {}.",
                format_minutes_and_seconds(item_started.elapsed())
            );
        }

        Ok(())
    }
}

fn log_summary(summary: &RunSummary) {
    info!(
        items_attempted = summary.items_attempted,
        items_captured = summary.items_captured,
        items_skipped_already_processed = summary.items_skipped_already_processed,
        items_failed = summary.failures.len(),
        items_delivered = summary.items_delivered,
        drain_passes = summary.drain_passes,
        failed_transfer_attempts = summary.failed_transfer_attempts,
        "Total time: {}.",
        format_minutes_and_seconds(summary.total_time)
    );

    for (kind, count) in summary.failures_by_kind() {
        warn!(kind, count, "Items skipped because of errors.");
    }

    if !summary.uploads_occurred() {
        info!("Nothing was uploaded during this run.");
    }
}


#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashMap};
    use std::path::Path;
    use std::time::Duration;

    use shared::storage::memory::MemoryBlobStore;
    use tempfile::TempDir;

    use super::*;
    use crate::test_support::{entry, entry_json, RecordedCall, ScriptedHost};

    struct Fixture {
        directory: TempDir,
        host: Arc<ScriptedHost>,
        source: Arc<MemoryBlobStore>,
        destination: Arc<MemoryBlobStore>,
    }

    impl Fixture {
        /// Source store holds `items` as `(id, entity count)`; the ID list holds `ids`.
        async fn new(items: &[(&str, usize)], ids: &[&str]) -> Self {
            let directory = tempfile::tempdir().unwrap();
            let source = Arc::new(MemoryBlobStore::new());

            for (item_id, entity_count) in items {
                source.insert(*item_id, entry_json(item_id, *entity_count)).await;
            }

            std::fs::write(
                directory.path().join("ids.json"),
                serde_json::to_string(ids).unwrap(),
            )
            .unwrap();

            Self {
                directory,
                host: Arc::new(ScriptedHost::new()),
                source,
                destination: Arc::new(MemoryBlobStore::new()),
            }
        }

        fn configuration(&self, page: usize, size: usize) -> CapturerConfiguration {
            configuration_in(self.directory.path(), page, size)
        }

        async fn run(&self, page: usize, size: usize) -> RunSummary {
            BatchDriver::new(
                self.configuration(page, size),
                self.host.clone(),
                self.source.clone(),
                self.destination.clone(),
            )
            .run()
            .await
            .unwrap()
        }
    }

    fn configuration_in(directory: &Path, page: usize, size: usize) -> CapturerConfiguration {
        let configuration = format!(
            r#"
ids_file_path = "{ids}"
staging_directory = "{staging}"
summary_output_path = "{summary}"
page = {page}
size = {size}

[animation]
width = 4
height = 4

[readiness]
poll_interval = 5

[delivery]
retry_interval = 20

[source_storage]
kind = "filesystem"
root = "{unused}"

[destination_storage]
kind = "filesystem"
root = "{unused}"
"#,
            ids = directory.join("ids.json").display(),
            staging = directory.join("screenshots").display(),
            summary = directory.join("summary.json").display(),
            unused = directory.join("unused").display(),
        );

        CapturerConfiguration::load_from_str(&configuration).unwrap()
    }

    fn expected_keys(item_ids: &[&str]) -> BTreeSet<String> {
        item_ids
            .iter()
            .flat_map(|item_id| {
                (0..8)
                    .map(move |index| format!("{item_id}/screenshot-{index}.png"))
                    .chain(std::iter::once(format!("{item_id}/preview.gif")))
            })
            .collect()
    }

    #[tokio::test]
    async fn delivers_good_items_and_skips_empty_one() {
        let fixture = Fixture::new(&[("a", 2), ("b", 0), ("c", 3)], &["a", "b", "c"]).await;

        let summary = fixture.run(0, 5).await;

        let delivered: BTreeSet<String> = fixture.destination.keys().await.into_iter().collect();
        assert_eq!(delivered, expected_keys(&["a", "c"]));

        assert_eq!(summary.items_attempted, 3);
        assert_eq!(summary.items_captured, 2);
        assert_eq!(summary.items_delivered, 2);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].item_id, "b");
        assert_eq!(summary.failures[0].kind, "ContentEmptyError");

        // Item "b" never got a camera move or screenshot.
        assert_eq!(fixture.host.rotation_angles().len(), 64);
        assert_eq!(fixture.host.screenshot_count(), 64);
        assert_eq!(fixture.host.calls().last(), Some(&RecordedCall::Close));

        let written_summary =
            std::fs::read_to_string(fixture.directory.path().join("summary.json")).unwrap();
        assert!(written_summary.contains("\"items_delivered\": 2"));
    }

    #[tokio::test]
    async fn rerun_leaves_processed_items_alone() {
        let fixture = Fixture::new(&[("a", 2), ("c", 2)], &["a", "c"]).await;
        fixture
            .destination
            .insert("a/preview.gif", b"earlier run".to_vec())
            .await;

        let summary = fixture.run(0, 5).await;

        assert_eq!(fixture.host.calls_touching("a"), 0);
        assert!(fixture.host.calls_touching("c") > 0);
        assert!(fixture
            .destination
            .written_keys()
            .await
            .iter()
            .all(|key| !key.starts_with("a/")));
        assert_eq!(
            fixture.destination.get("a/preview.gif").await.unwrap(),
            b"earlier run".to_vec()
        );

        assert_eq!(summary.items_skipped_already_processed, 1);
        assert_eq!(summary.items_delivered, 1);
    }

    #[tokio::test]
    async fn only_the_requested_page_is_processed() {
        let items = [("a", 1), ("b", 1), ("c", 1), ("d", 1), ("e", 1)];
        let fixture = Fixture::new(&items, &["a", "b", "c", "d", "e"]).await;

        let summary = fixture.run(1, 2).await;

        let delivered: BTreeSet<String> = fixture.destination.keys().await.into_iter().collect();
        assert_eq!(delivered, expected_keys(&["c", "d"]));
        assert_eq!(summary.items_attempted, 2);

        for untouched in ["a", "b", "e"] {
            assert_eq!(fixture.host.calls_touching(untouched), 0);
        }
    }

    #[tokio::test]
    async fn transient_upload_failures_are_retried() {
        let fixture = Fixture::new(&[("a", 2)], &["a"]).await;
        fixture.destination.fail_next_writes(4);

        let summary = fixture.run(0, 5).await;

        let delivered: BTreeSet<String> = fixture.destination.keys().await.into_iter().collect();
        assert_eq!(delivered, expected_keys(&["a"]));
        assert_eq!(summary.items_delivered, 1);
        assert!(summary.failed_transfer_attempts >= 1);
    }

    #[tokio::test]
    async fn missing_id_list_fails_the_run() {
        let directory = tempfile::tempdir().unwrap();

        let result = BatchDriver::new(
            configuration_in(directory.path(), 0, 5),
            Arc::new(ScriptedHost::new()),
            Arc::new(MemoryBlobStore::new()),
            Arc::new(MemoryBlobStore::new()),
        )
        .run()
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn failed_recapture_of_an_undelivered_item_keeps_the_earlier_capture() {
        let mut fixture = Fixture::new(&[], &["k1", "k2"]).await;

        // Two source entries describing the same project; the second one breaks mid-rotation.
        let mut first = entry("x", 2);
        first.project.scene_id = "x-scene-1".to_string();
        first.scene.id = "x-scene-1".to_string();
        let mut second = entry("x", 2);
        second.project.scene_id = "x-scene-2".to_string();
        second.scene.id = "x-scene-2".to_string();
        fixture.source.insert("k1", serde_json::to_vec(&first).unwrap()).await;
        fixture.source.insert("k2", serde_json::to_vec(&second).unwrap()).await;

        fixture.host = Arc::new(ScriptedHost {
            failing_rotations: HashMap::from([("x-scene-2".to_string(), 5)]),
            ..ScriptedHost::new()
        });

        // Nothing reaches the destination until the capture phase is over.
        fixture.destination.fail_next_writes(usize::MAX);

        let run = BatchDriver::new(
            fixture.configuration(0, 5),
            fixture.host.clone(),
            fixture.source.clone(),
            fixture.destination.clone(),
        )
        .run();

        let release_destination = async {
            while fixture.host.calls().last() != Some(&RecordedCall::Close) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            fixture.destination.fail_next_writes(0);
        };

        let (summary, ()) = tokio::time::timeout(
            Duration::from_secs(20),
            async { tokio::join!(run, release_destination) },
        )
        .await
        .expect("batch did not finish");
        let summary = summary.unwrap();

        let delivered: BTreeSet<String> = fixture.destination.keys().await.into_iter().collect();
        assert_eq!(delivered, expected_keys(&["x"]));
        assert_eq!(fixture.host.screenshot_count(), 32 + 5);
        assert_eq!(summary.items_captured, 1);
        assert_eq!(summary.items_delivered, 1);
        assert_eq!(summary.failures.len(), 1);
    }
}
