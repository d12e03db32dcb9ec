use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use miette::{miette, Context, IntoDiagnostic, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSecondsWithFrac};
use tokio::sync::Mutex;

#[derive(Clone, Eq, PartialEq, Serialize, Deserialize, Debug)]
pub struct ItemFailure {
    pub item_id: String,

    /// Error kind, e.g. `ContentEmptyError`.
    pub kind: String,

    pub reason: String,
}

#[serde_as]
#[derive(Clone, Eq, PartialEq, Serialize, Deserialize, Debug)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,

    pub finished_at: DateTime<Utc>,

    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub total_time: Duration,

    pub items_attempted: usize,

    pub items_captured: usize,

    pub items_skipped_already_processed: usize,

    /// Items that were skipped because of an error, in the order they failed.
    pub failures: Vec<ItemFailure>,

    pub items_delivered: usize,

    pub drain_passes: usize,

    pub failed_transfer_attempts: usize,
}

impl RunSummary {
    pub fn failures_by_kind(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();

        for failure in &self.failures {
            *counts.entry(failure.kind.as_str()).or_insert(0) += 1;
        }

        counts
    }

    pub fn uploads_occurred(&self) -> bool {
        self.items_delivered > 0
    }

    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        let serialized = serde_json::to_string_pretty(self)
            .into_diagnostic()
            .wrap_err_with(|| miette!("Could not serialize run summary."))?;

        std::fs::write(path, serialized)
            .into_diagnostic()
            .wrap_err_with(|| miette!("Could not write run summary to {:?}.", path))
    }
}

/// Formats a duration the way the run log reports it: `N minutes M seconds`.
pub fn format_minutes_and_seconds(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    format!(
        "{} minutes {} seconds",
        total_seconds / 60,
        total_seconds % 60
    )
}



struct RunTraceIncomplete {
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    items_attempted: usize,
    items_captured: usize,
    items_skipped_already_processed: usize,
    failures: Vec<ItemFailure>,
    items_delivered: usize,
    drain_passes: usize,
    failed_transfer_attempts: usize,
}

/// Shared, append-only record of what happened during a run.
/// Both the capture phase and the delivery queue hold a clone.
#[derive(Clone)]
pub struct RunTraceBuilder(Arc<Mutex<RunTraceIncomplete>>);

impl RunTraceBuilder {
    pub fn new_empty() -> Self {
        Self(Arc::new(Mutex::new(RunTraceIncomplete {
            started_at: None,
            finished_at: None,
            items_attempted: 0,
            items_captured: 0,
            items_skipped_already_processed: 0,
            failures: Vec::new(),
            items_delivered: 0,
            drain_passes: 0,
            failed_transfer_attempts: 0,
        })))
    }

    pub async fn build(&self) -> Result<RunSummary> {
        let trace = self.0.lock().await;

        let started_at = trace
            .started_at
            .ok_or_else(|| miette!("Missing run start time, can't build."))?;
        let finished_at = trace
            .finished_at
            .ok_or_else(|| miette!("Missing run finish time, can't build."))?;

        let total_time = (finished_at - started_at)
            .to_std()
            .into_diagnostic()
            .wrap_err_with(|| miette!("Run finished before it started?"))?;

        Ok(RunSummary {
            started_at,
            finished_at,
            total_time,
            items_attempted: trace.items_attempted,
            items_captured: trace.items_captured,
            items_skipped_already_processed: trace.items_skipped_already_processed,
            failures: trace.failures.clone(),
            items_delivered: trace.items_delivered,
            drain_passes: trace.drain_passes,
            failed_transfer_attempts: trace.failed_transfer_attempts,
        })
    }

    pub async fn set_run_start_time(&self, start_time: DateTime<Utc>) {
        let _ = self.0.lock().await.started_at.insert(start_time);
    }

    pub async fn set_run_finish_time(&self, finish_time: DateTime<Utc>) {
        let _ = self.0.lock().await.finished_at.insert(finish_time);
    }

    pub async fn trace_item_attempted(&self) {
        self.0.lock().await.items_attempted += 1;
    }

    pub async fn trace_item_captured(&self) {
        self.0.lock().await.items_captured += 1;
    }

    pub async fn trace_item_skipped_already_processed(&self) {
        self.0.lock().await.items_skipped_already_processed += 1;
    }

    pub async fn trace_item_failed<I, K, R>(&self, item_id: I, kind: K, reason: R)
    where
        I: Into<String>,
        K: Into<String>,
        R: Into<String>,
    {
        self.0.lock().await.failures.push(ItemFailure {
            item_id: item_id.into(),
            kind: kind.into(),
            reason: reason.into(),
        });
    }

    pub async fn trace_item_delivered(&self) {
        self.0.lock().await.items_delivered += 1;
    }

    pub async fn trace_drain_pass(&self) {
        self.0.lock().await.drain_passes += 1;
    }

    pub async fn trace_failed_transfer(&self) {
        self.0.lock().await.failed_transfer_attempts += 1;
    }
}


#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn formats_minutes_and_seconds() {
        assert_eq!(
            format_minutes_and_seconds(Duration::from_secs(0)),
            "0 minutes 0 seconds"
        );
        assert_eq!(
            format_minutes_and_seconds(Duration::from_millis(125_900)),
            "2 minutes 5 seconds"
        );
    }

    #[tokio::test]
    async fn builds_summary_from_trace() {
        let trace = RunTraceBuilder::new_empty();
        let start = Utc.with_ymd_and_hms(2019, 3, 20, 12, 0, 0).unwrap();

        trace.set_run_start_time(start).await;
        trace.trace_item_attempted().await;
        trace.trace_item_attempted().await;
        trace.trace_item_captured().await;
        trace.trace_item_failed("b", "ContentEmptyError", "Scene is empty").await;
        trace.trace_drain_pass().await;
        trace.trace_item_delivered().await;
        trace
            .set_run_finish_time(start + chrono::Duration::seconds(90))
            .await;

        let summary = trace.build().await.unwrap();

        assert_eq!(summary.total_time, Duration::from_secs(90));
        assert_eq!(summary.items_attempted, 2);
        assert!(summary.uploads_occurred());
        assert_eq!(
            summary.failures_by_kind().get("ContentEmptyError"),
            Some(&1)
        );

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["total_time"], 90.0);
    }

    #[tokio::test]
    async fn refuses_to_build_unfinished_trace() {
        let trace = RunTraceBuilder::new_empty();
        trace.set_run_start_time(Utc::now()).await;

        assert!(trace.build().await.is_err());
    }
}
