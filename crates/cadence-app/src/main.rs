// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cadence_core::{init_tracing, FrameClock};
use cadence_platform::{create_window, framebuffer_size};
use cadence_render::{
    ObjectId, RenderPacket, RenderSize, RendererBackend, RendererBackendType, RendererConfig,
    RendererFrontend,
};
use cadence_render_vk::VulkanBackend;
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use tracing::{error, info, warn};

use cadence_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendArg {
    Vulkan,
}

impl From<BackendArg> for RendererBackendType {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Vulkan => RendererBackendType::Vulkan,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config file
    #[arg(long, default_value = "cadence.toml")]
    config: PathBuf,

    #[arg(long, value_enum, default_value_t = BackendArg::Vulkan)]
    backend: BackendArg,

    /// Exit after this many frames; 0 runs until the window closes
    #[arg(long, default_value_t = 0)]
    frames: u64,

    /// Override the configured window width
    #[arg(long)]
    width: Option<u32>,

    /// Override the configured window height
    #[arg(long)]
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
struct WindowCfg {
    title: String,
    width: u32,
    height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: "cadence".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
struct AppCfg {
    window: WindowCfg,
    render: RendererConfig,
}

fn load_cfg(path: &Path) -> Result<AppCfg> {
    match fs::read_to_string(path) {
        Ok(s) => toml::from_str(&s).with_context(|| format!("parse {}", path.display())),
        Err(e) => {
            warn!("config {} not read ({e}), using defaults", path.display());
            Ok(AppCfg::default())
        }
    }
}

struct App {
    backend_type: RendererBackendType,
    cfg: AppCfg,
    frame_limit: Option<u64>,

    window: Option<Window>,
    renderer: Option<RendererFrontend>,
    quad: Option<ObjectId>,
    clock: FrameClock,
    exiting: bool,
    failed: bool,
}

impl App {
    fn init_renderer(&mut self, window: &Window) -> Result<RendererFrontend> {
        let (width, height) = framebuffer_size(window);
        let size = RenderSize { width, height };
        let backend: Box<dyn RendererBackend> = match self.backend_type {
            RendererBackendType::Vulkan => Box::new(
                VulkanBackend::initialize(window, window, size, &self.cfg.render)
                    .context("Vulkan backend init")?,
            ),
        };
        Ok(RendererFrontend::new(backend))
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        if let Some(mut renderer) = self.renderer.take() {
            info!("rendered {} frames", renderer.frame_number());
            if let Some(id) = self.quad.take() {
                if let Err(e) = renderer.release_object_id(id) {
                    warn!("quad id: {e}");
                }
            }
            renderer.shutdown();
        }
        self.clock.stop();
        self.window = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let w = &self.cfg.window;
        let window = match create_window(event_loop, &w.title, w.width, w.height) {
            Ok(window) => window,
            Err(e) => {
                error!("{e:#}");
                self.failed = true;
                event_loop.exit();
                return;
            }
        };

        match self.init_renderer(&window) {
            Ok(mut renderer) => {
                self.quad = Some(renderer.acquire_object_id());
                self.renderer = Some(renderer);
            }
            Err(e) => {
                error!("renderer init failed: {e:#}");
                self.failed = true;
                event_loop.exit();
                return;
            }
        }

        info!("backend = {:?}", self.backend_type);
        event_loop.set_control_flow(ControlFlow::Poll);
        self.clock.start();
        window.request_redraw();
        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        match &self.window {
            Some(window) if window.id() == window_id => {}
            _ => return,
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                info!("Resized → {}x{}", new_size.width, new_size.height);
                if let Some(renderer) = &mut self.renderer {
                    renderer.on_resized(new_size.width, new_size.height);
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting {
                    return;
                }
                let Some(renderer) = &mut self.renderer else {
                    return;
                };
                let packet = RenderPacket {
                    delta_time: self.clock.tick(),
                };
                if let Err(e) = renderer.draw_frame(&packet) {
                    error!("render error: {e:#}");
                    self.failed = true;
                    self.shutdown(event_loop);
                    return;
                }
                if self
                    .frame_limit
                    .is_some_and(|limit| renderer.frame_number() >= limit)
                {
                    info!("frame limit reached");
                    self.shutdown(event_loop);
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if self.exiting {
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

    let mut cfg = load_cfg(&args.config)?;
    if let Some(width) = args.width {
        cfg.window.width = width;
    }
    if let Some(height) = args.height {
        cfg.window.height = height;
    }

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App {
        backend_type: args.backend.into(),
        cfg,
        frame_limit: (args.frames > 0).then_some(args.frames),
        window: None,
        renderer: None,
        quad: None,
        clock: FrameClock::new(),
        exiting: false,
        failed: false,
    };
    event_loop.run_app(&mut app)?;

    if app.failed {
        anyhow::bail!("renderer stopped on a fatal error");
    }
    Ok(())
}
