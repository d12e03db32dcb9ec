//! Work items: the project/scene pairs read from the source bucket.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod ids;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProjectLayout {
    pub cols: u32,
    pub rows: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,

    #[serde(default)]
    pub title: String,

    pub layout: ProjectLayout,

    pub scene_id: String,

    /// Fields we don't interpret ourselves, but the editor expects to get back.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Scene {
    pub id: String,

    #[serde(default)]
    pub entities: Map<String, Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Scene statistics as reported by the editor once a scene has been provisioned.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct SceneMetrics {
    pub triangles: u64,
    pub materials: u64,
    pub geometries: u64,
    pub bodies: u64,
    pub entities: u64,
    pub textures: u64,
}

/// Raw contents of a single source bucket entry.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Entry {
    pub project: Project,

    pub scene: Scene,

    #[serde(default)]
    pub contest: Option<Value>,
}


/// One unit of work. Immutable once read from the source store.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkItem {
    /// Key the entry was read from in the source store.
    pub source_key: String,

    pub project: Project,

    pub scene: Scene,
}

impl WorkItem {
    pub fn from_entry<S: Into<String>>(source_key: S, entry: Entry) -> Self {
        Self {
            source_key: source_key.into(),
            project: entry.project,
            scene: entry.scene,
        }
    }

    pub fn from_json_bytes<S: Into<String>>(
        source_key: S,
        bytes: &[u8],
    ) -> Result<Self, serde_json::Error> {
        let entry: Entry = serde_json::from_slice(bytes)?;
        Ok(Self::from_entry(source_key, entry))
    }

    /// Identifier all artifacts of this item are keyed by.
    pub fn id(&self) -> &str {
        &self.project.id
    }

    pub fn scene_id(&self) -> &str {
        &self.project.scene_id
    }

    /// Longer side of the project's parcel layout.
    pub fn layout_side(&self) -> u32 {
        self.project.layout.cols.max(self.project.layout.rows)
    }
}
