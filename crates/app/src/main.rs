//! vkframe - Main Entry Point
//!
//! Opens a fixed-size window and renders the built-in quad until the window
//! is closed. Any fatal error stops the event loop and is returned from
//! `main`, which exits with a non-zero status.

use anyhow::{Context, Result};
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use vkframe_core::{AppConfig, FrameTimer};
use vkframe_platform::Window;
use vkframe_renderer::Renderer;

struct App {
    config: AppConfig,
    // Dropped before the window it renders to
    renderer: Option<Renderer>,
    window: Option<Window>,
    timer: FrameTimer,
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(config: AppConfig) -> Self {
        let timer = FrameTimer::new(config.stats.interval());
        Self {
            config,
            renderer: None,
            window: None,
            timer,
            fatal: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{:#}", err);
        self.fatal = Some(err);
        // Release GPU objects before the loop returns
        self.renderer = None;
        event_loop.exit();
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window =
            Window::new(event_loop, &self.config.window).context("failed to create window")?;
        let renderer = Renderer::new(&window, &self.config.renderer)
            .context("failed to initialize renderer")?;

        info!("Initialization complete, entering main loop");
        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() && self.fatal.is_none() {
            if let Err(e) = self.init(event_loop) {
                self.fail(event_loop, e);
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                let Some(renderer) = self.renderer.as_mut() else {
                    return;
                };
                let dt = self.timer.since_last_frame().as_secs_f32();
                if let Err(e) = renderer.render_frame(dt) {
                    self.fail(event_loop, anyhow::Error::new(e).context("frame failed"));
                    return;
                }
                if let Some(stats) = self.timer.frame() {
                    info!(
                        "{} frames, {:.1} fps, {:.2} ms/frame",
                        stats.frames, stats.fps, stats.mean_frame_ms
                    );
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    let config = AppConfig::load().context("failed to load configuration")?;
    vkframe_core::init_logging(&config.log)?;
    info!(
        "Starting vkframe (config: {})",
        AppConfig::path().display()
    );

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    let frames = app.timer.total_frames();
    drop(app.renderer.take());
    if let Some(err) = app.fatal {
        return Err(err);
    }

    info!("Exited after {} frames", frames);
    Ok(())
}
