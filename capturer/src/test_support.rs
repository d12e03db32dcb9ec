//! In-process stand-ins for the render host and helpers shared by the test modules.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use image::{ImageFormat, Rgba, RgbaImage};
use serde_json::{json, Value};
use shared::items::{Entry, Project, ProjectLayout, Scene, WorkItem};

use crate::capture::rotation::STEP_ANGLE;
use crate::capture::CaptureResult;
use crate::config::{AnimationConfig, ReadinessConfig};
use crate::host::{HostAction, HostCall, HostError, RenderHost, CANVAS_SELECTOR, PREVIEW_LOADING_SELECTOR};
use crate::staging::{StagingArea, STILLS_PER_ITEM};

pub const TEST_FRAME_SIZE: u32 = 4;

pub fn solid_png(width: u32, height: u32, shade: u8) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, Rgba([shade, 128, 255 - shade, 255]));

    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, ImageFormat::Png)
        .expect("could not encode test PNG");

    bytes.into_inner()
}

pub fn test_animation_config() -> AnimationConfig {
    AnimationConfig {
        width: TEST_FRAME_SIZE,
        height: TEST_FRAME_SIZE,
        frame_delay: Duration::from_millis(150),
        quality: 10,
    }
}

pub fn fast_readiness_config() -> ReadinessConfig {
    ReadinessConfig {
        poll_interval: Duration::from_millis(100),
        initialization_timeout: Duration::from_secs(10),
        asset_load_timeout: Duration::from_secs(30),
        liveness_log_every: 50,
    }
}

pub fn entry(id: &str, entity_count: usize) -> Entry {
    let entities: serde_json::Map<String, Value> = (0..entity_count)
        .map(|index| {
            let entity_id = format!("{id}-entity-{index}");
            (entity_id.clone(), json!({ "id": entity_id, "components": [] }))
        })
        .collect();

    Entry {
        project: Project {
            id: id.to_string(),
            title: format!("Project {id}"),
            layout: ProjectLayout { cols: 2, rows: 3 },
            scene_id: format!("{id}-scene"),
            extra: Default::default(),
        },
        scene: Scene {
            id: format!("{id}-scene"),
            entities,
            extra: Default::default(),
        },
        contest: None,
    }
}

pub fn entry_json(id: &str, entity_count: usize) -> Vec<u8> {
    serde_json::to_vec(&entry(id, entity_count)).expect("could not serialize test entry")
}

pub fn work_item(id: &str, entity_count: usize) -> WorkItem {
    WorkItem::from_entry(id, entry(id, entity_count))
}

/// Writes placeholder artifacts for `item_id` as if it had been captured.
/// Contents name the attempt, e.g. `a#0 still 3` and `a#0 gif`.
pub async fn stage_fake_capture(staging: &StagingArea, item_id: &str) -> CaptureResult {
    let attempt = staging.begin_attempt(item_id);
    let label = format!("{item_id}#{}", attempt.number());

    let mut still_paths = Vec::new();
    for still_index in 0..STILLS_PER_ITEM {
        let path = attempt.still_path(still_index);
        tokio::fs::write(&path, format!("{label} still {still_index}"))
            .await
            .expect("could not write fake still");
        still_paths.push(path);
    }

    let animation_path = attempt.animation_path();
    tokio::fs::write(&animation_path, format!("{label} gif"))
        .await
        .expect("could not write fake animation");

    CaptureResult {
        item_id: item_id.to_string(),
        still_paths,
        animation_path,
    }
}


#[derive(Clone, Debug, PartialEq)]
pub enum RecordedCall {
    Navigate(String),
    Viewport(u32, u32),
    Dispatch(HostAction),
    Evaluate(HostCall),
    Screenshot(String),
    Close,
}

#[derive(Default)]
pub(crate) struct HostState {
    /// Entities per scene ID, as loaded through `Create scene`.
    scene_entities: HashMap<String, u64>,

    current_scene: Option<String>,

    initialization_polls_left: u32,

    asset_polls_left: u32,

    calls: Vec<RecordedCall>,
}

/// A render host that answers editor queries from scripted state.
pub struct ScriptedHost {
    /// `.Preview.loading` is reported present this many times per loaded item.
    pub initialization_polls: u32,

    /// `getLoadingEntity()` is reported truthy this many times per loaded item.
    pub asset_polls: u32,

    pub never_initializes: bool,

    pub never_loads_assets: bool,

    /// Scene ID -> rotation step at which `setCameraRotation` fails.
    pub failing_rotations: HashMap<String, usize>,

    pub(crate) state: Mutex<HostState>,
}

impl Default for ScriptedHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedHost {
    pub fn new() -> Self {
        Self {
            initialization_polls: 2,
            asset_polls: 3,
            never_initializes: false,
            never_loads_assets: false,
            failing_rotations: HashMap::new(),
            state: Mutex::new(HostState::default()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn rotation_angles(&self) -> Vec<f64> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::Evaluate(HostCall::SetCameraRotation { angle }) => Some(angle),
                _ => None,
            })
            .collect()
    }

    pub fn screenshot_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, RecordedCall::Screenshot(_)))
            .count()
    }

    /// Calls that mention the given project or scene.
    pub fn calls_touching(&self, project_id: &str) -> usize {
        let scene_id = format!("{project_id}-scene");

        self.calls()
            .iter()
            .filter(|call| match call {
                RecordedCall::Dispatch(HostAction::CreateProject { project })
                | RecordedCall::Dispatch(HostAction::DeleteProject { project }) => {
                    project.id == project_id
                }
                RecordedCall::Dispatch(HostAction::CreateScene { scene }) => scene.id == scene_id,
                RecordedCall::Evaluate(HostCall::SceneEntityCount { scene_id: id })
                | RecordedCall::Evaluate(HostCall::SceneMetrics { scene_id: id }) => *id == scene_id,
                _ => false,
            })
            .count()
    }

    pub fn dispatched(&self) -> Vec<HostAction> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::Dispatch(action) => Some(action),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: RecordedCall) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl RenderHost for ScriptedHost {
    async fn navigate(&self, url: &str) -> Result<(), HostError> {
        self.record(RecordedCall::Navigate(url.to_string()));
        Ok(())
    }

    async fn set_viewport(&self, width: u32, height: u32) -> Result<(), HostError> {
        self.record(RecordedCall::Viewport(width, height));
        Ok(())
    }

    async fn dispatch(&self, action: HostAction) -> Result<(), HostError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(RecordedCall::Dispatch(action.clone()));

        match action {
            HostAction::CreateProject { .. } => {
                state.initialization_polls_left = self.initialization_polls;
                state.asset_polls_left = self.asset_polls;
            }
            HostAction::CreateScene { scene } => {
                state
                    .scene_entities
                    .insert(scene.id.clone(), scene.entities.len() as u64);
                state.current_scene = Some(scene.id);
            }
            HostAction::DeleteProject { project } => {
                state.scene_entities.remove(&project.scene_id);
                state.current_scene = None;
            }
        }

        Ok(())
    }

    async fn evaluate(&self, call: HostCall) -> Result<Value, HostError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(RecordedCall::Evaluate(call.clone()));

        let response = match call {
            HostCall::DismissOnboarding => json!(true),
            HostCall::SceneEntityCount { scene_id } => {
                json!(state.scene_entities.get(&scene_id).copied().unwrap_or(0))
            }
            HostCall::ElementPresent { selector } if selector == PREVIEW_LOADING_SELECTOR => {
                if self.never_initializes {
                    json!(true)
                } else if state.initialization_polls_left > 0 {
                    state.initialization_polls_left -= 1;
                    json!(true)
                } else {
                    json!(false)
                }
            }
            HostCall::ElementPresent { selector } => json!(selector == CANVAS_SELECTOR),
            HostCall::SceneMetrics { scene_id } => match state.scene_entities.get(&scene_id) {
                Some(entities) => json!({ "entities": entities, "triangles": 12 }),
                None => Value::Null,
            },
            HostCall::AssetsLoading => {
                if self.never_loads_assets {
                    json!(true)
                } else if state.asset_polls_left > 0 {
                    state.asset_polls_left -= 1;
                    json!(true)
                } else {
                    json!(false)
                }
            }
            HostCall::SetCameraZoomDelta { .. } => json!(true),
            HostCall::SetCameraRotation { angle } => {
                let step = (angle / STEP_ANGLE).round() as usize;
                let failing_step = state
                    .current_scene
                    .as_ref()
                    .and_then(|scene_id| self.failing_rotations.get(scene_id));

                if failing_step == Some(&step) {
                    return Err(HostError::Protocol {
                        error: "javascript error".to_string(),
                        message: "editor is not defined".to_string(),
                    });
                }

                json!(true)
            }
        };

        Ok(response)
    }

    async fn screenshot(&self, selector: &str) -> Result<Vec<u8>, HostError> {
        let shade = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(RecordedCall::Screenshot(selector.to_string()));
            (state.calls.len() % 256) as u8
        };

        Ok(solid_png(TEST_FRAME_SIZE, TEST_FRAME_SIZE, shade))
    }

    async fn close(&self) -> Result<(), HostError> {
        self.record(RecordedCall::Close);
        Ok(())
    }
}
