// =============================================================================
// FORGE RENDERER - minimal real-time Vulkan renderer
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit App (window, input, redraw pacing)                       │
// │    └── Renderer (Vulkan object graph)                           │
// │          └── Device + Swapchain + Pipeline                      │
// │                └── Command Buffers (GPU instructions)           │
// │                      └── Synchronization (fences, semaphores)   │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Poll window events
// 2. Acquire swapchain image
// 3. Wait for the frame slot's previous work
// 4. Record + submit commands
// 5. Present rendered image to screen

mod backend;
mod config;
mod renderer;
mod scene;

use anyhow::{Context, Result};
use config::Config;
use renderer::Renderer;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::KeyCode,
    window::{Fullscreen, Icon, Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    // Initialize logging
    init_logging(&config);
    log::info!("Starting {}", config.window.title);
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen {
            "fullscreen"
        } else {
            "windowed"
        }
    );
    log::info!("Present mode: {}", config.graphics.present_mode);
    log::info!(
        "Ray tracing: {}",
        if config.graphics.ray_tracing {
            "enabled"
        } else {
            "disabled"
        }
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// Initialize logging with optional file output for validation errors
fn init_logging(config: &Config) {
    use env_logger::Builder;
    use log::LevelFilter;

    let mut builder = Builder::from_default_env();
    builder.filter_level(LevelFilter::Info);
    builder.init();

    // Create/clear log file if enabled
    if config.debug.log_to_file {
        if let Ok(mut file) = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
        {
            let _ = writeln!(file, "=== {} Log ===", config.window.title);
            let _ = writeln!(file, "Started: {:?}", std::time::SystemTime::now());
            let _ = writeln!(file);
        }
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Window/event-loop orchestration around the renderer
pub struct App {
    config: Config,

    window: Option<Arc<Window>>,
    renderer: Option<Renderer>,
    is_fullscreen: bool,

    // Key bindings resolved once from config
    quit_key: KeyCode,
    fullscreen_key: KeyCode,

    // FPS tracking
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    pub fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        let quit_key = config.quit_key();
        let fullscreen_key = config.fullscreen_key();
        let now = Instant::now();
        Self {
            config,
            window: None,
            renderer: None,
            is_fullscreen,
            quit_key,
            fullscreen_key,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    fn init_renderer(&mut self, window: &Window) -> Result<()> {
        use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

        let display_handle = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        let window_handle = window
            .window_handle()
            .context("Failed to get window handle")?
            .as_raw();

        let size = window.inner_size();
        let renderer = Renderer::new(
            &self.config,
            display_handle,
            window_handle,
            size.width,
            size.height,
        )?;

        self.renderer = Some(renderer);
        Ok(())
    }

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }

            if let Some(ref mut renderer) = self.renderer {
                renderer.needs_resize = true;
            }
        }
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        if now.duration_since(self.last_fps_update).as_secs_f32() >= 1.0 {
            let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                let mode = if self.is_fullscreen {
                    "fullscreen"
                } else {
                    "windowed"
                };
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [{}]",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                    mode
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

/// Decode a PNG into a window icon. Never fatal: a missing or broken
/// icon logs a warning and the window keeps the default.
fn load_window_icon(path: &str) -> Option<Icon> {
    if path.is_empty() {
        return None;
    }

    let image = match image::open(path) {
        Ok(image) => image.into_rgba8(),
        Err(e) => {
            log::warn!("Failed to load icon {:?}: {}", path, e);
            return None;
        }
    };

    let (width, height) = image.dimensions();
    match Icon::from_rgba(image.into_raw(), width, height) {
        Ok(icon) => Some(icon),
        Err(e) => {
            log::warn!("Failed to create icon from {:?}: {}", path, e);
            None
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        // Create window with settings from config
        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_window_icon(load_window_icon(&self.config.window.icon));

        if self.config.window.fullscreen {
            window_attributes =
                window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        // First failure aborts the bootstrap
        if let Err(e) = self.init_renderer(&window) {
            log::error!("Failed to initialize Vulkan: {:?}", e);
            event_loop.exit();
            return;
        }

        self.window = Some(window);
    }

    /// Handle window events.
    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(ref renderer) = self.renderer {
                    renderer.wait_idle();
                }
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);

                if let Some(ref mut renderer) = self.renderer {
                    if size.width == 0 || size.height == 0 {
                        renderer.is_minimized = true;
                    } else {
                        renderer.is_minimized = false;
                        renderer.needs_resize = true;
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                let size = match self.window {
                    Some(ref window) => window.inner_size(),
                    None => return,
                };

                if let Some(ref mut renderer) = self.renderer {
                    match renderer.render_frame(size.width, size.height) {
                        Ok(rendered) => {
                            if rendered {
                                self.update_fps();
                            }
                        }
                        Err(e) => {
                            log::error!("Render error: {:?}", e);
                        }
                    }
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::PhysicalKey;

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        if key == self.quit_key {
                            log::info!("Quit key pressed, exiting...");
                            if let Some(ref renderer) = self.renderer {
                                renderer.wait_idle();
                            }
                            event_loop.exit();
                        } else if key == self.fullscreen_key {
                            self.toggle_fullscreen();
                        }
                    }
                }
            }

            _ => {}
        }
    }

    /// Called when the event loop is about to block waiting for events.
    /// We use this to request continuous redraws for maximum FPS.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}
