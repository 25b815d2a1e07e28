// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::Result;
use clap::Parser;
use ember_core::init_tracing;
use ember_platform::{framebuffer_size, to_render_size, window_attributes};
use ember_render::{FrameStatus, RenderSize, Renderer};
use ember_render_vk::{RendererConfig, VkRenderer, VsyncMode};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info};

use ember_platform::winit::{
    application::ApplicationHandler,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::Key,
    window::{Window, WindowId},
};

mod config;
use config::AppCfg;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (default: ./ember.toml)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Directory with triangle.vert.spv / triangle.frag.spv
    #[arg(long)]
    shader_dir: Option<PathBuf>,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    /// Present without waiting for vertical blank
    #[arg(long)]
    no_vsync: bool,
}

impl Args {
    fn apply(&self, cfg: &mut AppCfg) {
        if let Some(dir) = &self.shader_dir {
            cfg.render.shader_dir = Some(dir.clone());
        }
        if let Some(w) = self.width {
            cfg.window.width = w;
        }
        if let Some(h) = self.height {
            cfg.window.height = h;
        }
        if self.no_vsync {
            cfg.render.vsync = false;
        }
    }
}

/// Runtime switches bound to keys: V vsync, M vsync mode, P pulse.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Toggle {
    Vsync,
    VsyncMode,
    Pulse,
}

fn toggle_for(event: &KeyEvent) -> Option<Toggle> {
    if event.state != ElementState::Pressed || event.repeat {
        return None;
    }
    toggle_for_key(&event.logical_key)
}

fn toggle_for_key(key: &Key) -> Option<Toggle> {
    match key {
        Key::Character(c) => match c.to_ascii_lowercase().as_str() {
            "v" => Some(Toggle::Vsync),
            "m" => Some(Toggle::VsyncMode),
            "p" => Some(Toggle::Pulse),
            _ => None,
        },
        _ => None,
    }
}

/// Flip the setting in `cfg`; the caller forwards it to the renderer.
fn apply_toggle(cfg: &mut RendererConfig, toggle: Toggle) {
    match toggle {
        Toggle::Vsync => cfg.vsync = !cfg.vsync,
        Toggle::VsyncMode => {
            cfg.vsync_mode = match cfg.vsync_mode {
                VsyncMode::Fifo => VsyncMode::Mailbox,
                VsyncMode::Mailbox => VsyncMode::Fifo,
            }
        }
        Toggle::Pulse => cfg.pulse = !cfg.pulse,
    }
}

struct App {
    cfg: AppCfg,
    renderer_cfg: RendererConfig,
    window: Option<Window>,
    renderer: Option<VkRenderer>,
    render_size: RenderSize,

    exiting: bool,
    failed: bool,
    paused: bool,
    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn new(cfg: AppCfg) -> Self {
        App {
            renderer_cfg: cfg.renderer_config(),
            render_size: cfg.window_size(),
            cfg,
            window: None,
            renderer: None,
            exiting: false,
            failed: false,
            paused: false,
            frames: 0,
            last_fps_instant: Instant::now(),
        }
    }

    /// Fatal: log, drop GPU state before the window, leave the loop.
    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{err:#}");
        self.failed = true;
        self.shutdown(event_loop);
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn toggle(&mut self, event_loop: &ActiveEventLoop, toggle: Toggle) {
        apply_toggle(&mut self.renderer_cfg, toggle);
        let cfg = &self.renderer_cfg;
        if let Some(r) = &mut self.renderer {
            match toggle {
                Toggle::Vsync => r.set_vsync(cfg.vsync),
                Toggle::VsyncMode => r.set_vsync_mode(cfg.vsync_mode),
                Toggle::Pulse => r.set_pulse(cfg.pulse),
            }
        }
        if toggle == Toggle::Vsync {
            event_loop.set_control_flow(if cfg.vsync {
                ControlFlow::Wait
            } else {
                ControlFlow::Poll
            });
        }
        info!(
            "vsync = {} ({:?}), pulse = {}",
            cfg.vsync, cfg.vsync_mode, cfg.pulse
        );
    }

    fn create_window_and_renderer(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = window_attributes(&self.cfg.window.title, self.cfg.window_size());
        let window = event_loop.create_window(attrs)?;

        self.render_size = framebuffer_size(&window);
        let renderer =
            VkRenderer::with_config(&window, &window, self.render_size, &self.renderer_cfg)?;

        info!(
            "window {}x{}, vsync = {} ({:?})",
            self.render_size.width,
            self.render_size.height,
            self.renderer_cfg.vsync,
            self.renderer_cfg.vsync_mode,
        );

        self.window = Some(window);
        self.renderer = Some(renderer);
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.create_window_and_renderer(event_loop) {
                self.fail(event_loop, e.context("startup"));
                return;
            }
        }

        event_loop.set_control_flow(if self.renderer_cfg.vsync {
            ControlFlow::Wait
        } else {
            ControlFlow::Poll
        });

        self.paused = self.render_size.is_empty();
        if !self.paused {
            if let Some(w) = &self.window {
                w.request_redraw();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("close requested");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = to_render_size(new_size);
                let now_paused = self.render_size.is_empty();
                if self.paused != now_paused {
                    self.paused = now_paused;
                    info!(
                        "resized to {}x{} (paused={})",
                        self.render_size.width, self.render_size.height, self.paused
                    );
                }

                let res = match &mut self.renderer {
                    Some(r) => r.resize(self.render_size),
                    None => Ok(()),
                };
                if let Err(e) = res {
                    self.fail(event_loop, e);
                    return;
                }
                if !self.paused {
                    if let Some(w) = &self.window {
                        w.request_redraw();
                    }
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if let Some(t) = toggle_for(&event) {
                    self.toggle(event_loop, t);
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.paused {
                    return;
                }
                let res = match &mut self.renderer {
                    Some(r) => r.render(),
                    None => return,
                };
                match res {
                    Ok(FrameStatus::Presented) => {
                        self.frames = self.frames.saturating_add(1);
                    }
                    Ok(FrameStatus::Skipped) => {}
                    Err(e) => self.fail(event_loop, e),
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        if self.paused {
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }

        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            let frame = self.renderer.as_ref().map_or(0, |r| r.frame_number());
            info!("fps ~ {} (frame {frame})", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<ExitCode> {
    init_tracing();
    let args = Args::parse();

    let mut cfg = AppCfg::load(args.config.as_deref());
    args.apply(&mut cfg);

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg);
    event_loop.run_app(&mut app)?;

    Ok(if app.failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
