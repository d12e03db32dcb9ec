use std::fs::read_to_string;
use std::path::{Path, PathBuf};
use std::time::Duration;

use miette::{miette, Context, IntoDiagnostic, Result};
use serde::Deserialize;
use serde_with::{serde_as, DurationMilliSeconds};
use shared::storage::StorageConfig;
use url::Url;

#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct CapturerConfiguration {
    /// Page the scene editor is served from.
    #[serde(default = "default_builder_url")]
    pub builder_url: Url,

    #[serde(default = "default_screen_width")]
    pub screen_width: u32,

    #[serde(default = "default_screen_height")]
    pub screen_height: u32,

    #[serde(default)]
    pub animation: AnimationConfig,

    /// JSON array of item IDs, pre-sorted.
    #[serde(default = "default_ids_file_path")]
    pub ids_file_path: PathBuf,

    #[serde(default)]
    pub page: usize,

    #[serde(default = "default_page_size")]
    pub size: usize,

    /// Scratch directory for stills and animations. Recreated on every run.
    #[serde(default = "default_staging_directory")]
    pub staging_directory: PathBuf,

    #[serde(default = "default_true")]
    pub skip_already_processed: bool,

    #[serde(default)]
    pub summary_output_path: Option<PathBuf>,

    #[serde(default)]
    pub webdriver: WebDriverConfig,

    #[serde(default)]
    pub readiness: ReadinessConfig,

    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Where work item entries are read from.
    pub source_storage: StorageConfig,

    /// Where stills and animations are delivered to.
    pub destination_storage: StorageConfig,
}

#[serde_as]
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AnimationConfig {
    pub width: u32,

    pub height: u32,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub frame_delay: Duration,

    /// GIF color quantization speed, 1 (best) to 30 (fastest).
    pub quality: i32,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            width: 996,
            height: 720,
            frame_delay: Duration::from_millis(150),
            quality: 10,
        }
    }
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct WebDriverConfig {
    pub endpoint: Url,

    pub headless: bool,

    pub user_data_directory: Option<PathBuf>,
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            endpoint: Url::parse("http://127.0.0.1:9515").expect("BUG: Invalid default URL."),
            headless: true,
            user_data_directory: Some(PathBuf::from("userData")),
        }
    }
}

#[serde_as]
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ReadinessConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub poll_interval: Duration,

    /// Bound on waiting for the editor to initialize and provision the scene.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub initialization_timeout: Duration,

    /// Bound on waiting for the scene's assets to load.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub asset_load_timeout: Duration,

    /// Log a liveness message every this many asset-load polls.
    pub liveness_log_every: u32,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            initialization_timeout: Duration::from_secs(120),
            asset_load_timeout: Duration::from_secs(600),
            liveness_log_every: 50,
        }
    }
}

#[serde_as]
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Pause between drain passes.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub retry_interval: Duration,

    pub max_concurrent_items: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(5),
            max_concurrent_items: 4,
        }
    }
}

fn default_builder_url() -> Url {
    Url::parse("https://builder-screenshots.now.sh").expect("BUG: Invalid default URL.")
}

fn default_screen_width() -> u32 {
    1366
}

fn default_screen_height() -> u32 {
    768
}

fn default_ids_file_path() -> PathBuf {
    PathBuf::from("ids.json")
}

fn default_page_size() -> usize {
    5
}

fn default_staging_directory() -> PathBuf {
    PathBuf::from("screenshots")
}

fn default_true() -> bool {
    true
}


impl CapturerConfiguration {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() && !path.is_file() {
            return Err(miette!("Path exists, but it is not a file!"));
        } else if !path.exists() {
            return Err(miette!("No such file: {:?}", path));
        }

        let file_contents = read_to_string(path)
            .into_diagnostic()
            .wrap_err_with(|| miette!("Could not read configuration file."))?;

        Self::load_from_str(&file_contents)
    }

    pub fn load_from_str(contents: &str) -> Result<Self> {
        let configuration: Self = toml::from_str(contents)
            .into_diagnostic()
            .wrap_err_with(|| miette!("Could not parse TOML contents of configuration file."))?;

        configuration.validate()?;
        Ok(configuration)
    }

    pub fn with_window_overrides(mut self, page: Option<usize>, size: Option<usize>) -> Self {
        if let Some(page) = page {
            self.page = page;
        }
        if let Some(size) = size {
            self.size = size;
        }

        self
    }

    fn validate(&self) -> Result<()> {
        if self.screen_width == 0 || self.screen_height == 0 {
            return Err(miette!("Screen dimensions must be non-zero."));
        }

        if self.animation.width == 0 || self.animation.height == 0 {
            return Err(miette!("Animation dimensions must be non-zero."));
        }

        if !(1..=30).contains(&self.animation.quality) {
            return Err(miette!(
                "Animation quality must be between 1 and 30, got {}.",
                self.animation.quality
            ));
        }

        if self.readiness.poll_interval.is_zero() {
            return Err(miette!("Readiness poll interval must be non-zero."));
        }

        if self.readiness.liveness_log_every == 0 {
            return Err(miette!("liveness_log_every must be at least 1."));
        }

        if self.delivery.max_concurrent_items == 0 {
            return Err(miette!("max_concurrent_items must be at least 1."));
        }

        Ok(())
    }
}
