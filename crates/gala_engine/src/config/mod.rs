//! Configuration system
//!
//! Settings are plain serde structs. Every section defaults field-by-field, so
//! a `gala.toml` only needs to name the values it overrides.

use std::path::{Path, PathBuf};

pub use serde::{Deserialize, Serialize};

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file, picking the format from the extension
    fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        match ConfigFormat::from_path(path)? {
            ConfigFormat::Toml => toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string())),
            ConfigFormat::Ron => ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string())),
        }
    }

    /// Load configuration from file if it exists, otherwise fall back to defaults
    fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            log::info!("Loading configuration from {}", path.display());
            Self::load_from_file(path)
        } else {
            log::info!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = match ConfigFormat::from_path(path)? {
            ConfigFormat::Toml => {
                toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
            }
            ConfigFormat::Ron => ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?,
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

enum ConfigFormat {
    Toml,
    Ron,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(Self::Toml),
            Some("ron") => Ok(Self::Ron),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A value was parsed but is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GalaConfig {
    /// Window settings
    pub window: WindowSettings,
    /// Renderer settings
    pub render: RenderSettings,
    /// Scene generation and flattening settings
    pub scene: SceneSettings,
    /// Initial camera settings
    pub camera: CameraSettings,
}

impl Config for GalaConfig {}

impl GalaConfig {
    /// Reject values the renderer cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "window extent {}x{} must be non-zero",
                self.window.width, self.window.height
            )));
        }
        if self.render.frames_in_flight == 0 {
            return Err(ConfigError::Invalid("render.frames_in_flight must be at least 1".into()));
        }
        if self.render.textures.is_empty() {
            return Err(ConfigError::Invalid("render.textures must name at least one image".into()));
        }
        if self.scene.height == 0 {
            return Err(ConfigError::Invalid("scene.height must be at least 1".into()));
        }
        let breakpoints = &self.scene.lod_breakpoints;
        if breakpoints.iter().any(|b| b.is_nan()) || breakpoints.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ConfigError::Invalid(format!(
                "scene.lod_breakpoints must be strictly ascending, got {breakpoints:?}"
            )));
        }
        if self.scene.clip_margin < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "scene.clip_margin {} would cull visible bodies",
                self.scene.clip_margin
            )));
        }
        let camera = &self.camera;
        if !(camera.near > 0.0 && camera.far > camera.near) {
            return Err(ConfigError::Invalid(format!(
                "camera planes must satisfy 0 < near < far, got near={} far={}",
                camera.near, camera.far
            )));
        }
        Ok(())
    }
}

/// Window settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowSettings {
    /// Width in screen coordinates
    pub width: u32,
    /// Height in screen coordinates
    pub height: u32,
    /// Window title
    pub title: String,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            width: 1600,
            height: 900,
            title: "Gala".to_string(),
        }
    }
}

/// Renderer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Number of frames the CPU may record ahead of the GPU
    pub frames_in_flight: usize,
    /// Recording slots in the loading arena used for uploads
    pub loading_slots: usize,
    /// Timeout for every completion-token wait; `u64::MAX` waits forever
    pub fence_timeout_ns: u64,
    /// Compiled vertex shader
    pub vertex_shader: PathBuf,
    /// Compiled fragment shader
    pub fragment_shader: PathBuf,
    /// Body textures, indexed by material
    pub textures: Vec<PathBuf>,
    /// Every texture is resized to this extent before upload
    pub texture_size: [u32; 2],
    /// Enable the Khronos validation layer and debug messenger
    pub enable_validation: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        const TEXTURES: [&str; 13] = [
            "sun",
            "ceres_fictional",
            "eris_fictional",
            "haumea_fictional",
            "jupiter",
            "makemake_fictional",
            "mars",
            "mercury",
            "moon",
            "neptune",
            "saturn",
            "uranus",
            "venus_surface",
        ];

        Self {
            frames_in_flight: 2,
            loading_slots: 4,
            fence_timeout_ns: u64::MAX,
            vertex_shader: PathBuf::from("target/shaders/orbit.vert.spv"),
            fragment_shader: PathBuf::from("target/shaders/orbit.frag.spv"),
            textures: TEXTURES.iter().map(|name| PathBuf::from(format!("res/2k_{name}.jpg"))).collect(),
            texture_size: [512, 256],
            enable_validation: cfg!(debug_assertions),
        }
    }
}

/// Scene generation and flattening settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneSettings {
    /// Number of nodes besides the root
    pub body_count: usize,
    /// Number of flatten passes; ancestors deeper than this are not resolved
    pub height: u32,
    /// Seed for procedural generation
    pub seed: u64,
    /// Ascending sort-key breakpoints separating the LOD tiers
    pub lod_breakpoints: [f32; 4],
    /// Bodies in this tier or farther are drawn without self-spin
    pub spin_tier_limit: usize,
    /// Half-extent of the expanded clip volume used for culling
    pub clip_margin: f32,
}

impl Default for SceneSettings {
    fn default() -> Self {
        Self {
            body_count: 4095,
            height: 2,
            seed: 0x7819_e801,
            lod_breakpoints: [5.0e1, 5.0e3, 5.0e4, f32::INFINITY],
            spin_tier_limit: 2,
            clip_margin: 1.1,
        }
    }
}

/// Initial camera settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Eye position
    pub position: [f32; 3],
    /// Point the camera initially looks at
    pub target: [f32; 3],
    /// Vertical field of view in degrees
    pub fov_deg: f32,
    /// Near plane distance
    pub near: f32,
    /// Far plane distance
    pub far: f32,
    /// Translation speed in units per second
    pub move_speed: f32,
    /// Radians of rotation per window-height of mouse travel
    pub look_speed: f32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            position: [0.0, -12.0, 2.0],
            target: [0.0, 0.0, 0.0],
            fov_deg: 45.0,
            near: 0.1,
            far: 10000.0,
            move_speed: 2.0,
            look_speed: 1.0,
        }
    }
}
