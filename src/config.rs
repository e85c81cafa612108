// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section is optional. Missing keys take the defaults below, and a
// missing or malformed file falls back to `Config::default()`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Validation layer requested when `debug.validation_layers` is on.
pub const VALIDATION_LAYER: &std::ffi::CStr = c"VK_LAYER_KHRONOS_validation";

/// Root configuration structure
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub objects: Vec<ObjectConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            graphics: GraphicsConfig::default(),
            debug: DebugConfig::default(),
            objects: default_objects(),
        }
    }
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Scene Renderer".to_string(),
            width: 800,
            height: 600,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub clear_color: [f32; 4],
    /// Draw edges only; ignored if the GPU lacks `fill_mode_non_solid`
    pub wireframe: bool,
    /// Directory holding `scene.vert.spv` and `scene.frag.spv`
    pub shader_dir: PathBuf,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            wireframe: false,
            shader_dir: PathBuf::from("shaders"),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Only honored in debug builds
    pub validation_layers: bool,
    pub log_level: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
            show_fps: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    /// Textured mesh spinning about +Z
    Static,
    /// Untextured light marker, spinning like static meshes
    Lit,
}

/// One `[[objects]]` entry
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectConfig {
    pub kind: ObjectKind,
    /// `"cube"` or a path to an OBJ file
    #[serde(default = "default_mesh")]
    pub mesh: String,
    #[serde(default)]
    pub texture: Option<PathBuf>,
    #[serde(default)]
    pub translate: [f32; 3],
    #[serde(default = "default_scale")]
    pub scale: f32,
}

fn default_mesh() -> String {
    "cube".to_string()
}

fn default_scale() -> f32 {
    1.0
}

fn default_objects() -> Vec<ObjectConfig> {
    vec![
        ObjectConfig {
            kind: ObjectKind::Static,
            mesh: default_mesh(),
            texture: None,
            translate: [0.0, -3.0, 0.0],
            scale: 3.0,
        },
        ObjectConfig {
            kind: ObjectKind::Static,
            mesh: default_mesh(),
            texture: None,
            translate: [0.0, 3.0, 0.0],
            scale: 1.0,
        },
        ObjectConfig {
            kind: ObjectKind::Lit,
            mesh: default_mesh(),
            texture: None,
            translate: [1.0, 1.0, 1.0],
            scale: 0.25,
        },
    ]
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Validation is a debug-build feature only
    pub fn validation_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.debug.validation_layers
    }

    /// Default log filter, overridden by `RUST_LOG`
    pub fn log_level(&self) -> log::LevelFilter {
        self.debug.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}
