use std::f64::consts::PI;

use shared::items::WorkItem;
use tracing::{debug, info};

use crate::capture::animation::{AnimationSink, GifAssembler};
use crate::capture::{CaptureResult, Frame, ItemError};
use crate::host::{HostCall, RenderHost, CANVAS_SELECTOR};
use crate::staging::{StagedAttempt, StagingArea, STILLS_PER_ITEM};

/// Camera yaw advanced per rotation step.
pub const STEP_ANGLE: f64 = PI / 16.0;

/// Steps in a full revolution; the last frame is at `2π - STEP_ANGLE`.
pub const STEP_COUNT: usize = 32;

/// Every this many steps the frame is also saved as a still.
pub const STILL_EVERY: usize = STEP_COUNT / STILLS_PER_ITEM;

/// Zoom delta that fits the item's parcel layout into view.
pub fn camera_zoom(item: &WorkItem) -> f64 {
    f64::from(item.layout_side().saturating_sub(1)) * 25.0
}

/// `(step, angle)` pairs of one revolution. Angles are derived from the step index,
/// so accumulated rounding can never add or drop a frame.
pub fn rotation_steps() -> impl Iterator<Item = (usize, f64)> {
    (0..STEP_COUNT).map(|step| (step, step as f64 * STEP_ANGLE))
}

/// Still index for a step, if that step produces a still.
pub fn still_index(step: usize) -> Option<usize> {
    (step % STILL_EVERY == 0).then_some(step / STILL_EVERY)
}


/// Rotates the camera through a full revolution, saving stills and the animation
/// into the staging area. On failure, nothing this attempt staged is left behind;
/// files of earlier attempts of the same item are never touched.
pub async fn capture_rotation<H: RenderHost + ?Sized>(
    host: &H,
    item: &WorkItem,
    staging: &StagingArea,
    assembler: &GifAssembler,
) -> Result<CaptureResult, ItemError> {
    let item_id = item.id();

    let zoom = camera_zoom(item);
    debug!(item_id, zoom, "Setting camera zoom.");
    host.evaluate(HostCall::SetCameraZoomDelta { zoom }).await?;

    let attempt = staging.begin_attempt(item_id);
    let animation_path = attempt.animation_path();
    let sink = assembler.open(&animation_path);

    match rotate_and_capture(host, item, &attempt, sink).await {
        Ok(still_paths) => Ok(CaptureResult {
            item_id: item_id.to_string(),
            still_paths,
            animation_path,
        }),
        Err(error) => {
            attempt.discard().await;
            Err(error)
        }
    }
}

async fn rotate_and_capture<H: RenderHost + ?Sized>(
    host: &H,
    item: &WorkItem,
    attempt: &StagedAttempt,
    mut sink: AnimationSink,
) -> Result<Vec<std::path::PathBuf>, ItemError> {
    let item_id = item.id();
    let mut still_paths = Vec::with_capacity(STILLS_PER_ITEM);

    for (step, angle) in rotation_steps() {
        let frame = match capture_step(host, item_id, attempt, step, angle, &mut still_paths).await {
            Ok(frame) => frame,
            Err(error) => {
                sink.abort().await;
                return Err(error);
            }
        };
        debug!(item_id, step = frame.step, angle = frame.angle, "Frame captured.");

        if let Err(error) = sink.add_frame(frame).await {
            sink.abort().await;
            return Err(ItemError::capture_aborted(step, error));
        }
    }

    let encoded_frames = sink
        .finish()
        .await
        .map_err(|error| ItemError::capture_aborted(STEP_COUNT, error))?;

    debug!(item_id, encoded_frames, "Animation written.");
    Ok(still_paths)
}

async fn capture_step<H: RenderHost + ?Sized>(
    host: &H,
    item_id: &str,
    attempt: &StagedAttempt,
    step: usize,
    angle: f64,
    still_paths: &mut Vec<std::path::PathBuf>,
) -> Result<Frame, ItemError> {
    host.evaluate(HostCall::SetCameraRotation { angle })
        .await
        .map_err(|error| ItemError::capture_aborted(step, error))?;

    let png = host
        .screenshot(CANVAS_SELECTOR)
        .await
        .map_err(|error| ItemError::capture_aborted(step, error))?;

    if let Some(still_index) = still_index(step) {
        info!(item_id, "Taking screenshot #{}.", still_index + 1);

        let still_path = attempt.still_path(still_index);
        tokio::fs::write(&still_path, &png)
            .await
            .map_err(|error| ItemError::capture_aborted(step, error))?;

        still_paths.push(still_path);
    }

    Ok(Frame { step, angle, png })
}
