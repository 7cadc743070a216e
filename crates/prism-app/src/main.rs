// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod gpu;
mod scene;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ash::vk;
use clap::{Parser, ValueEnum};
use prism_core::init_tracing;
use prism_render::RenderSize;
use prism_render_vk::{ChainSettings, PipelineSettings, SwapchainPreferences};
use serde::Deserialize;
use tracing::{error, info, warn};
use winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::{ElementState, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{Key, NamedKey},
    window::{Window, WindowId},
};

use crate::gpu::Gpu;
use crate::scene::{Scene, SceneOptions};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML file with a `[render]` table
    #[arg(long, default_value = "prism.toml")]
    config: PathBuf,
    /// Overrides `render.present_mode`
    #[arg(long, value_enum)]
    present_mode: Option<PresentModeCfg>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "snake_case")]
enum PresentModeCfg {
    Fifo,
    #[default]
    Mailbox,
    Immediate,
}

impl PresentModeCfg {
    fn to_vk(self) -> vk::PresentModeKHR {
        match self {
            PresentModeCfg::Fifo => vk::PresentModeKHR::FIFO,
            PresentModeCfg::Mailbox => vk::PresentModeKHR::MAILBOX,
            PresentModeCfg::Immediate => vk::PresentModeKHR::IMMEDIATE,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
struct RenderCfg {
    #[serde(default = "default_clear")]
    clear_color: [f32; 4],
    #[serde(default)]
    present_mode: PresentModeCfg,
    #[serde(default = "default_true")]
    cull_back_faces: bool,
    #[serde(default = "default_checker_cell")]
    checker_cell: u32,
    #[serde(default = "default_spin")]
    spin_speed: f32,
    #[serde(default = "default_size")]
    window_size: [u32; 2],
}

#[derive(Debug, Deserialize, Default)]
struct AppCfg {
    #[serde(default)]
    render: RenderCfg,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
            present_mode: PresentModeCfg::Mailbox,
            cull_back_faces: true,
            checker_cell: default_checker_cell(),
            spin_speed: default_spin(),
            window_size: default_size(),
        }
    }
}

impl RenderCfg {
    fn chain_settings(&self) -> ChainSettings {
        ChainSettings {
            clear_color: self.clear_color,
            swapchain: SwapchainPreferences {
                present_mode: self.present_mode.to_vk(),
                ..SwapchainPreferences::default()
            },
            pipeline: PipelineSettings {
                cull_mode: if self.cull_back_faces {
                    vk::CullModeFlags::BACK
                } else {
                    vk::CullModeFlags::NONE
                },
                ..PipelineSettings::default()
            },
        }
    }
}

fn default_clear() -> [f32; 4] {
    ChainSettings::default().clear_color
}
fn default_true() -> bool {
    true
}
fn default_checker_cell() -> u32 {
    8
}
fn default_spin() -> f32 {
    0.5
}
fn default_size() -> [u32; 2] {
    [1280, 720]
}

fn parse_cfg(text: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str::<AppCfg>(text)
}

fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => parse_cfg(&s).unwrap_or_else(|e| {
            warn!("{}: {e}; using defaults", path.display());
            AppCfg::default()
        }),
        Err(_) => {
            info!("no config at {}, using defaults", path.display());
            AppCfg::default()
        }
    }
}

/// Space cycles through these.
const CLEAR_PRESETS: [[f32; 4]; 3] = [
    [0.02, 0.02, 0.04, 1.0],
    [0.25, 0.05, 0.05, 1.0],
    [0.05, 0.18, 0.10, 1.0],
];

// Field order is teardown order: scene resources, then the device, then the
// window the surface was created from.
struct App {
    scene: Option<Scene>,
    gpu: Option<Gpu>,
    window: Option<Window>,
    cfg: RenderCfg,
    render_size: RenderSize,
    paused: bool,
    preset: usize,
    failure: Option<anyhow::Error>,
}

impl App {
    fn new(cfg: RenderCfg) -> Self {
        Self {
            scene: None,
            gpu: None,
            window: None,
            cfg,
            render_size: RenderSize::new(cfg.window_size[0], cfg.window_size[1]),
            paused: false,
            preset: 0,
            failure: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let [w, h] = self.cfg.window_size;
        let window = event_loop
            .create_window(
                Window::default_attributes()
                    .with_title("prism")
                    .with_inner_size(LogicalSize::new(w, h)),
            )
            .context("create_window")?;
        let size = window.inner_size();
        self.render_size = RenderSize::new(size.width, size.height);

        let gpu = Gpu::new(&window)?;
        let scene = Scene::new(
            gpu.device(),
            self.render_size,
            SceneOptions {
                chain: self.cfg.chain_settings(),
                checker_cell: self.cfg.checker_cell,
                spin_speed: self.cfg.spin_speed,
            },
        )?;

        info!(
            "present_mode cfg = {:?}, cull_back_faces = {}",
            self.cfg.present_mode, self.cfg.cull_back_faces
        );
        self.scene = Some(scene);
        self.gpu = Some(gpu);
        self.window = Some(window);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("{e:#}");
        self.shutdown();
        self.failure = Some(e);
        event_loop.exit();
    }

    fn shutdown(&mut self) {
        self.scene = None;
        self.gpu = None;
        self.window = None;
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.init(event_loop) {
                self.fail(event_loop, e);
                return;
            }
        }
        event_loop.set_control_flow(ControlFlow::Wait);
        self.paused = self.render_size.is_empty();
        info!("resumed → paused={}", self.paused);
        if let Some(w) = &self.window {
            w.request_redraw();
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
                info!("CloseRequested");
                self.shutdown();
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = RenderSize::new(new_size.width, new_size.height);
                self.paused = self.render_size.is_empty();
                info!(
                    "Resized → {}x{} (paused={})",
                    self.render_size.width, self.render_size.height, self.paused
                );
                if let Some(scene) = &mut self.scene {
                    scene.resize(self.render_size);
                }
            }

            WindowEvent::Occluded(occluded) => {
                self.paused = occluded || self.render_size.is_empty();
                info!("Occluded={} → paused={}", occluded, self.paused);
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if event.state == ElementState::Pressed
                    && !event.repeat
                    && event.logical_key == Key::Named(NamedKey::Space)
                {
                    self.preset = (self.preset + 1) % CLEAR_PRESETS.len();
                    let rgba = CLEAR_PRESETS[self.preset];
                    if let Some(scene) = &mut self.scene {
                        if let Err(e) = scene.set_clear_color(rgba) {
                            self.fail(event_loop, e);
                        }
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if self.paused {
                    return;
                }
                if let Some(scene) = &mut self.scene {
                    if let Err(e) = scene.draw() {
                        self.fail(event_loop, e);
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if self.paused {
            return;
        }
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut cfg = load_cfg(&args.config).render;
    if let Some(mode) = args.present_mode {
        cfg.present_mode = mode;
    }

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg);
    event_loop.run_app(&mut app)?;

    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
