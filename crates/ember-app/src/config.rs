// SPDX-License-Identifier: CEPL-1.0
//! `ember.toml`: optional, every key has a default.

use ember_render::RenderSize;
use ember_render_vk::{RendererConfig, VsyncMode};
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const DEFAULT_CONFIG_PATH: &str = "ember.toml";

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub pulse: bool,
    pub vsync: bool,
    pub vsync_mode: VsyncModeCfg,
    pub acquire_timeout_ms: u64,
    pub fence_timeout_ms: u64,
    /// Swapchain images to ask for; clamped to what the surface allows.
    pub image_count: Option<u32>,
    pub shader_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VsyncModeCfg {
    Fifo,
    #[default]
    Mailbox,
}

impl From<VsyncModeCfg> for VsyncMode {
    fn from(mode: VsyncModeCfg) -> Self {
        match mode {
            VsyncModeCfg::Fifo => VsyncMode::Fifo,
            VsyncModeCfg::Mailbox => VsyncMode::Mailbox,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppCfg {
    pub render: RenderCfg,
    pub window: WindowCfg,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            pulse: true,
            vsync: true,
            vsync_mode: VsyncModeCfg::Mailbox,
            acquire_timeout_ms: 1000,
            fence_timeout_ms: 1000,
            image_count: None,
            shader_dir: None,
        }
    }
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: "Ember".to_owned(),
            width: 1280,
            height: 720,
        }
    }
}

impl AppCfg {
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Read `path`. A missing or malformed file yields the defaults; only an
    /// explicitly requested file that is missing is worth a warning.
    pub fn load(path: Option<&Path>) -> Self {
        let explicit = path.is_some();
        let path = path.unwrap_or(Path::new(DEFAULT_CONFIG_PATH));
        match fs::read_to_string(path) {
            Ok(text) => match Self::parse(&text) {
                Ok(cfg) => {
                    info!("config loaded from {}", path.display());
                    cfg
                }
                Err(e) => {
                    warn!("{} is malformed, using defaults: {e}", path.display());
                    Self::default()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound && !explicit => Self::default(),
            Err(e) => {
                warn!("cannot read {}, using defaults: {e}", path.display());
                Self::default()
            }
        }
    }

    pub fn window_size(&self) -> RenderSize {
        RenderSize::new(self.window.width, self.window.height)
    }

    pub fn renderer_config(&self) -> RendererConfig {
        let r = &self.render;
        RendererConfig {
            vsync: r.vsync,
            vsync_mode: r.vsync_mode.into(),
            clear: r.clear_color,
            pulse: r.pulse,
            acquire_timeout_ns: ms_to_ns(r.acquire_timeout_ms),
            fence_timeout_ns: ms_to_ns(r.fence_timeout_ms),
            desired_images: r.image_count,
            shader_dir: r.shader_dir.clone(),
        }
    }
}

fn ms_to_ns(ms: u64) -> u64 {
    ms.saturating_mul(1_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let cfg = AppCfg::parse("").unwrap();
        assert!(cfg.render.vsync);
        assert!(cfg.render.pulse);
        assert_eq!(cfg.render.vsync_mode, VsyncModeCfg::Mailbox);
        assert_eq!(cfg.window.title, "Ember");
        assert_eq!(cfg.window_size(), RenderSize::new(1280, 720));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = AppCfg::parse(
            r#"
            [render]
            vsync_mode = "fifo"
            clear_color = [0.1, 0.2, 0.3, 1.0]
            shader_dir = "assets/shaders"

            [window]
            width = 640
            "#,
        )
        .unwrap();
        assert_eq!(cfg.render.vsync_mode, VsyncModeCfg::Fifo);
        assert_eq!(cfg.render.clear_color, [0.1, 0.2, 0.3, 1.0]);
        assert_eq!(cfg.render.shader_dir, Some(PathBuf::from("assets/shaders")));
        assert!(cfg.render.vsync);
        assert_eq!(cfg.window_size(), RenderSize::new(640, 720));
    }

    #[test]
    fn unknown_vsync_mode_is_rejected() {
        assert!(AppCfg::parse("[render]\nvsync_mode = \"adaptive\"\n").is_err());
    }

    #[test]
    fn timeouts_convert_to_nanoseconds() {
        let cfg = AppCfg::parse("[render]\nacquire_timeout_ms = 250\n").unwrap();
        let rc = cfg.renderer_config();
        assert_eq!(rc.acquire_timeout_ns, 250_000_000);
        assert_eq!(rc.fence_timeout_ns, 1_000_000_000);
        assert_eq!(rc.vsync_mode, VsyncMode::Mailbox);
    }

    #[test]
    fn image_count_reaches_the_renderer() {
        let cfg = AppCfg::parse("[render]\nimage_count = 4\n").unwrap();
        assert_eq!(cfg.renderer_config().desired_images, Some(4));
        assert_eq!(AppCfg::default().renderer_config().desired_images, None);
    }

    #[test]
    fn huge_timeout_saturates() {
        assert_eq!(ms_to_ns(u64::MAX), u64::MAX);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join(format!("ember-cfg-{}.toml", std::process::id()));
        fs::write(&path, "[render\nvsync = ").unwrap();
        let cfg = AppCfg::load(Some(&path));
        assert!(cfg.render.vsync);
        assert_eq!(cfg.window.width, 1280);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn missing_explicit_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join("ember-cfg-does-not-exist.toml");
        let cfg = AppCfg::load(Some(&path));
        assert_eq!(cfg.render.fence_timeout_ms, 1000);
    }
}
