//! The render host: a browser page running the scene editor.
//!
//! The capture pipeline only talks to the editor through [`HostAction`]s (state mutations
//! dispatched into the editor's store) and [`HostCall`]s (reads and camera commands), so it
//! never depends on the editor's internal structure.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use shared::items::{Project, Scene, SceneMetrics};
use thiserror::Error;

pub mod webdriver;

/// Element the editor renders the scene into.
pub const CANVAS_SELECTOR: &str = "#main-canvas";

/// Present while the editor's preview is still initializing.
pub const PREVIEW_LOADING_SELECTOR: &str = ".Preview.loading";

#[derive(Error, Debug)]
pub enum HostError {
    #[error("Render host transport error: {0}")]
    Transport(String),

    #[error("Render host returned {error}: {message}")]
    Protocol { error: String, message: String },

    #[error("Unexpected render host response: {0}")]
    Decode(String),

    #[error("No render host session is open.")]
    MissingSession,
}

impl From<reqwest::Error> for HostError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(value.to_string())
    }
}


/// State mutations understood by the editor's store.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum HostAction {
    #[serde(rename = "Create project")]
    CreateProject { project: Project },

    #[serde(rename = "Create scene")]
    CreateScene { scene: Scene },

    #[serde(rename = "Delete project")]
    DeleteProject { project: Project },
}

/// Reads of editor state, plus the camera commands the capture loop needs.
#[derive(Clone, Debug, PartialEq)]
pub enum HostCall {
    /// Pre-dismisses onboarding overlays that would otherwise cover the canvas.
    DismissOnboarding,

    /// Number of entities in the stored scene (`0` if the scene isn't in the store).
    SceneEntityCount { scene_id: String },

    ElementPresent { selector: String },

    /// Scene metrics, or `null` if the scene hasn't been provisioned yet.
    SceneMetrics { scene_id: String },

    /// Whether the editor still has an entity whose assets are loading.
    AssetsLoading,

    SetCameraZoomDelta { zoom: f64 },

    SetCameraRotation { angle: f64 },
}

#[async_trait]
pub trait RenderHost: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), HostError>;

    async fn set_viewport(&self, width: u32, height: u32) -> Result<(), HostError>;

    /// Fire-and-forget state mutation.
    async fn dispatch(&self, action: HostAction) -> Result<(), HostError>;

    async fn evaluate(&self, call: HostCall) -> Result<Value, HostError>;

    /// PNG-encoded screenshot of the first element matching `selector`.
    async fn screenshot(&self, selector: &str) -> Result<Vec<u8>, HostError>;

    async fn close(&self) -> Result<(), HostError>;
}


pub async fn evaluate_bool<H: RenderHost + ?Sized>(
    host: &H,
    call: HostCall,
) -> Result<bool, HostError> {
    match host.evaluate(call.clone()).await? {
        Value::Bool(value) => Ok(value),
        other => Err(HostError::Decode(format!(
            "expected a boolean from {call:?}, got {other}"
        ))),
    }
}

pub async fn evaluate_count<H: RenderHost + ?Sized>(
    host: &H,
    call: HostCall,
) -> Result<u64, HostError> {
    let value = host.evaluate(call.clone()).await?;

    value.as_u64().ok_or_else(|| {
        HostError::Decode(format!(
            "expected a non-negative integer from {call:?}, got {value}"
        ))
    })
}

pub async fn evaluate_scene_metrics<H: RenderHost + ?Sized>(
    host: &H,
    scene_id: &str,
) -> Result<Option<SceneMetrics>, HostError> {
    let value = host
        .evaluate(HostCall::SceneMetrics {
            scene_id: scene_id.to_string(),
        })
        .await?;

    if value.is_null() {
        return Ok(None);
    }

    serde_json::from_value(value)
        .map(Some)
        .map_err(|error| HostError::Decode(format!("invalid scene metrics: {error}")))
}


#[cfg(test)]
mod tests {
    use serde_json::json;
    use shared::items::ProjectLayout;

    use super::*;

    #[test]
    fn actions_serialize_into_store_payloads() {
        let project = Project {
            id: "p-1".to_string(),
            title: "Castle".to_string(),
            layout: ProjectLayout { cols: 2, rows: 1 },
            scene_id: "s-1".to_string(),
            extra: Default::default(),
        };

        let payload = serde_json::to_value(HostAction::DeleteProject { project }).unwrap();

        assert_eq!(
            payload,
            json!({
                "type": "Delete project",
                "payload": {
                    "project": {
                        "id": "p-1",
                        "title": "Castle",
                        "layout": { "cols": 2, "rows": 1 },
                        "sceneId": "s-1"
                    }
                }
            })
        );
    }
}
