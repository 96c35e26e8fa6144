//! Opens a window and runs the frame orchestrator until it is closed.
//!
//! Settings come from `$INFLIGHT_CONFIG`, or `inflight.toml` next to the
//! binary's working directory, or built-in defaults when neither exists.

mod renderer;

use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use inflight_core::{EngineConfig, FrameReport, FrameStats, Timer};
use inflight_platform::Window;
use inflight_renderer::{FrameOutcome, SkipReason};

use crate::renderer::Renderer;

const REPORT_EVERY: Duration = Duration::from_secs(5);

/// Everything that only exists between `resumed` and exit. Field order is
/// drop order: the renderer goes before the window it presents to.
struct Running {
    renderer: Renderer,
    window: Window,
}

struct App {
    config: EngineConfig,
    running: Option<Running>,
    timer: Timer,
    stats: FrameStats,
    /// First error that ended the loop; returned from `main`.
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(config: EngineConfig) -> Self {
        Self {
            config,
            running: None,
            timer: Timer::new(),
            stats: FrameStats::new(REPORT_EVERY),
            fatal: None,
        }
    }

    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = Window::new(event_loop, &self.config.window)?;
        let renderer = Renderer::new(&window, &self.config)?;
        self.running = Some(Running { renderer, window });
        self.timer.reset();
        info!("renderer up, entering frame loop");
        Ok(())
    }

    /// Drains the GPU and releases everything. Safe to call more than once.
    fn stop(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(running) = self.running.as_mut()
            && let Err(e) = running.renderer.shutdown()
        {
            error!(error = %e, "shutdown did not complete cleanly");
            self.fail(anyhow!(e).context("shutdown"));
        }
        event_loop.exit();
    }

    fn fail(&mut self, err: anyhow::Error) {
        self.fatal.get_or_insert(err);
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(running) = self.running.as_mut() else {
            return;
        };
        let dt = self.timer.tick();

        match running.renderer.render_frame() {
            Ok(FrameOutcome::Presented { .. }) => {
                if let Some(report) = self.stats.record(dt) {
                    log_report(&report);
                }
            }
            Ok(FrameOutcome::Skipped(SkipReason::Minimized)) => {}
            Ok(FrameOutcome::Skipped(reason)) => debug!(?reason, "frame skipped"),
            Err(e) => {
                let frame = running.renderer.frame_number();
                error!(frame, error = %e, "frame failed, stopping");
                self.fail(anyhow!(e).context(format!("frame {frame}")));
                self.stop(event_loop);
            }
        }
    }
}

fn log_report(report: &FrameReport) {
    info!(
        frames = report.frames,
        avg_ms = format_args!("{:.2}", report.average_ms),
        worst_ms = format_args!("{:.2}", report.worst_ms),
        fps = format_args!("{:.1}", report.fps()),
        "frame timing"
    );
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.running.is_some() {
            return;
        }
        if let Err(e) = self.start(event_loop) {
            error!("startup failed: {e:#}");
            self.fail(e.context("startup"));
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            WindowEvent::Resized(size) => {
                if let Some(running) = self.running.as_mut() {
                    running.renderer.resize(size.width, size.height);
                }
            }
            WindowEvent::CloseRequested => {
                info!("window closed");
                self.stop(event_loop);
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(running) = self.running.as_ref() {
            running.window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    inflight_core::init_logging();

    let config = EngineConfig::load_or_default(EngineConfig::default_path())?;
    info!(
        frames_in_flight = config.frames.frames_in_flight,
        "starting inflight"
    );

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    match app.fatal.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_fatal_error_is_kept() {
        let mut app = App::new(EngineConfig::default());
        assert!(app.fatal.is_none());

        app.fail(anyhow!("device lost").context("frame 12"));
        app.fail(anyhow!("device lost").context("shutdown"));
        assert_eq!(
            app.fatal.map(|e| e.to_string()),
            Some("frame 12".to_string())
        );
    }
}
