// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides sensible defaults if config file is missing or has errors.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use winit::keyboard::KeyCode;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub scene: SceneConfig,
    pub debug: DebugConfig,
    pub controls: ControlsConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
    /// PNG icon path; empty string disables the icon
    pub icon: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Forge Renderer".to_string(),
            width: 1920,
            height: 1080,
            fullscreen: false,
            icon: "assets/icon.png".to_string(),
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
    /// Enables the acceleration-structure subsystem and the extra
    /// device features/extensions it needs
    pub ray_tracing: bool,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            max_frames_in_flight: 3,
            ray_tracing: false,
        }
    }
}

/// Scene content settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// OBJ model path; empty string renders the built-in cube
    pub model: String,
    /// Model spin speed in degrees per second
    pub rotation_speed: f32,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            rotation_speed: 90.0,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_to_file: false,
            log_file: "forge_debug.log".to_string(),
            show_fps: true,
        }
    }
}

/// Control key bindings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControlsConfig {
    pub fullscreen_key: String,
    pub quit_key: String,
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            fullscreen_key: "F11".to_string(),
            quit_key: "Escape".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {}. Using defaults.", e);
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

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Preferred present mode as a Vulkan enum. The swapchain still
    /// falls back if the surface doesn't support it.
    pub fn present_mode(&self) -> ash::vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => ash::vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => ash::vk::PresentModeKHR::MAILBOX,
            "fifo" => ash::vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => ash::vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to MAILBOX",
                    self.graphics.present_mode
                );
                ash::vk::PresentModeKHR::MAILBOX
            }
        }
    }

    pub fn fullscreen_key(&self) -> KeyCode {
        key_code(&self.controls.fullscreen_key).unwrap_or_else(|| {
            log::warn!(
                "Unknown fullscreen key '{}', defaulting to F11",
                self.controls.fullscreen_key
            );
            KeyCode::F11
        })
    }

    pub fn quit_key(&self) -> KeyCode {
        key_code(&self.controls.quit_key).unwrap_or_else(|| {
            log::warn!(
                "Unknown quit key '{}', defaulting to Escape",
                self.controls.quit_key
            );
            KeyCode::Escape
        })
    }
}

/// Map a key name from config.toml to a winit key code
fn key_code(name: &str) -> Option<KeyCode> {
    let code = match name.to_lowercase().as_str() {
        "escape" | "esc" => KeyCode::Escape,
        "space" => KeyCode::Space,
        "enter" | "return" => KeyCode::Enter,
        "tab" => KeyCode::Tab,
        "f1" => KeyCode::F1,
        "f2" => KeyCode::F2,
        "f3" => KeyCode::F3,
        "f4" => KeyCode::F4,
        "f5" => KeyCode::F5,
        "f6" => KeyCode::F6,
        "f7" => KeyCode::F7,
        "f8" => KeyCode::F8,
        "f9" => KeyCode::F9,
        "f10" => KeyCode::F10,
        "f11" => KeyCode::F11,
        "f12" => KeyCode::F12,
        _ => return None,
    };
    Some(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.window.width, 1920);
        assert_eq!(config.window.height, 1080);
        assert_eq!(config.graphics.max_frames_in_flight, 3);
        assert!(!config.graphics.ray_tracing);
        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: Config = toml::from_str(
            r#"
            [window]
            width = 800
            height = 600

            [graphics]
            ray_tracing = true
            "#,
        )
        .unwrap();

        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 600);
        // Untouched sections keep their defaults
        assert_eq!(config.window.title, "Forge Renderer");
        assert!(config.graphics.ray_tracing);
        assert_eq!(config.graphics.max_frames_in_flight, 3);
        assert_eq!(config.scene.rotation_speed, 90.0);
    }

    #[test]
    fn present_mode_mapping() {
        let mut config = Config::default();
        for (name, expected) in [
            ("immediate", vk::PresentModeKHR::IMMEDIATE),
            ("Mailbox", vk::PresentModeKHR::MAILBOX),
            ("FIFO", vk::PresentModeKHR::FIFO),
            ("fifo_relaxed", vk::PresentModeKHR::FIFO_RELAXED),
            ("bogus", vk::PresentModeKHR::MAILBOX),
        ] {
            config.graphics.present_mode = name.to_string();
            assert_eq!(config.present_mode(), expected, "mode {}", name);
        }
    }

    #[test]
    fn key_name_mapping() {
        assert_eq!(key_code("F11"), Some(KeyCode::F11));
        assert_eq!(key_code("escape"), Some(KeyCode::Escape));
        assert_eq!(key_code("ESC"), Some(KeyCode::Escape));
        assert_eq!(key_code("not-a-key"), None);

        let mut config = Config::default();
        config.controls.quit_key = "garbage".to_string();
        assert_eq!(config.quit_key(), KeyCode::Escape);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load_from_path("definitely/not/here.toml").unwrap();
        assert_eq!(config.graphics.max_frames_in_flight, 3);
    }
}
