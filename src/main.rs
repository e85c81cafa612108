// =============================================================================
// SCENE RENDERER - binary entry
// =============================================================================
//
// LAYERS:
// ┌─────────────────────────────────────────────────────────────────┐
// │  App          winit events, window, title statistics            │
// │  FrameLoop    swapchain state machine, per-frame ordering       │
// │  VulkanBackend  device, chain resources, scene                  │
// └─────────────────────────────────────────────────────────────────┘
//
// One `draw_frame` per redraw. Resizes are not handled here: the frame
// loop notices a size mismatch after present and rebuilds the chain.
//
// =============================================================================

use anyhow::Result;
use scene_renderer::config::{Config, WindowConfig};
use scene_renderer::frame::{FrameLoop, FrameStatus};
use scene_renderer::renderer::VulkanBackend;
use std::sync::Arc;
use std::time::{Duration, Instant};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Fullscreen, Window, WindowAttributes, WindowId},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config = Config::load();
    init_logging(&config);

    log::info!(
        "Starting {} at {}x{}",
        config.window.title,
        config.window.width,
        config.window.height
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    app.fatal.map_or(Ok(()), Err)
}

/// Configured level is the default; `RUST_LOG` overrides it
fn init_logging(config: &Config) {
    env_logger::Builder::new()
        .filter_level(config.log_level())
        .parse_default_env()
        .init();
}

fn window_attributes(config: &WindowConfig) -> WindowAttributes {
    let attributes = Window::default_attributes()
        .with_title(config.title.clone())
        .with_inner_size(PhysicalSize::new(config.width, config.height));

    if config.fullscreen {
        attributes.with_fullscreen(Some(Fullscreen::Borderless(None)))
    } else {
        attributes
    }
}

// =============================================================================
// FRAME STATISTICS
// =============================================================================

/// Average frame rate over roughly one-second windows
struct FpsCounter {
    frames: u32,
    window_start: Instant,
    last_frame: Instant,
}

impl FpsCounter {
    const WINDOW: Duration = Duration::from_secs(1);

    fn new(now: Instant) -> Self {
        Self {
            frames: 0,
            window_start: now,
            last_frame: now,
        }
    }

    /// Count a presented frame. Returns (fps, last frame in ms) once per window.
    fn tick(&mut self, now: Instant) -> Option<(f32, f32)> {
        let frame_ms = now.duration_since(self.last_frame).as_secs_f32() * 1000.0;
        self.last_frame = now;
        self.frames += 1;

        let elapsed = now.duration_since(self.window_start);
        if elapsed < Self::WINDOW {
            return None;
        }

        let fps = self.frames as f32 / elapsed.as_secs_f32();
        self.frames = 0;
        self.window_start = now;
        Some((fps, frame_ms))
    }
}

// =============================================================================
// APPLICATION
// =============================================================================

struct App {
    config: Config,

    // Dropped before the window it renders into
    frame_loop: Option<FrameLoop<VulkanBackend>>,
    window: Option<Arc<Window>>,
    fullscreen: bool,
    fps: FpsCounter,

    /// First unrecoverable error; returned from `main`
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            fullscreen: config.window.fullscreen,
            config,
            frame_loop: None,
            window: None,
            fps: FpsCounter::new(Instant::now()),
            fatal: None,
        }
    }

    fn start_renderer(&mut self, window: Arc<Window>) -> Result<()> {
        log::info!("Initializing Vulkan...");

        let mut frame_loop = FrameLoop::new(VulkanBackend::new(window, &self.config)?);
        frame_loop.create()?;
        self.frame_loop = Some(frame_loop);

        log::info!("Renderer ready");
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        self.fatal.get_or_insert(error);
        event_loop.exit();
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(frame_loop) = self.frame_loop.as_mut() else {
            return;
        };

        match frame_loop.draw_frame() {
            Ok(FrameStatus::Presented) => self.frame_presented(),
            Ok(FrameStatus::Recreated) | Ok(FrameStatus::Skipped) => {}
            Err(e) => self.fail(event_loop, e.context("Failed to draw frame")),
        }
    }

    fn frame_presented(&mut self) {
        let Some((fps, frame_ms)) = self.fps.tick(Instant::now()) else {
            return;
        };
        if !self.config.debug.show_fps {
            return;
        }
        if let Some(window) = &self.window {
            window.set_title(&format!(
                "{} - {:.0} FPS ({:.2}ms)",
                self.config.window.title, fps, frame_ms
            ));
        }
    }

    fn key_pressed(&mut self, event_loop: &ActiveEventLoop, key: KeyCode) {
        match key {
            KeyCode::Escape => {
                log::info!("Escape pressed, exiting");
                event_loop.exit();
            }
            KeyCode::F11 => self.toggle_fullscreen(),
            _ => {}
        }
    }

    /// Borderless fullscreen on the current monitor; the frame loop picks up
    /// the new size on the next present
    fn toggle_fullscreen(&mut self) {
        let Some(window) = &self.window else {
            return;
        };

        self.fullscreen = !self.fullscreen;
        window.set_fullscreen(self.fullscreen.then_some(Fullscreen::Borderless(None)));
        log::info!("Fullscreen: {}", self.fullscreen);
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window = match event_loop.create_window(window_attributes(&self.config.window)) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        self.window = Some(window.clone());
        if let Err(e) = self.start_renderer(window) {
            self.fail(event_loop, e.context("Failed to initialize renderer"));
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
            }
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            WindowEvent::KeyboardInput { event, .. } if event.state.is_pressed() => {
                if let PhysicalKey::Code(key) = event.physical_key {
                    self.key_pressed(event_loop, key);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // Waits for the GPU, then releases every Vulkan object
        self.frame_loop = None;
        log::info!("Cleanup complete");
    }
}
