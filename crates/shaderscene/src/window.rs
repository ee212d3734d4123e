use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Sender};
use winit::dpi::PhysicalSize;
use winit::event::{Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoopBuilder, EventLoopProxy};
use winit::window::WindowBuilder;

use tracing::{error, info};

use crate::controller::SceneLifecycleController;
use crate::error::PipelineError;
use crate::gpu::WgpuDevice;
use crate::runtime::scheduler_for_fps;
use crate::types::{GpuPowerPreference, SceneOptions, ShaderSubmission};

/// Settings for [`SceneRuntime::spawn`].
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub surface_size: (u32, u32),
    pub title: String,
    pub power: GpuPowerPreference,
    /// Frame-rate cap; `None` renders on every display refresh.
    pub target_fps: Option<f32>,
    pub options: SceneOptions,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            surface_size: (400, 400),
            title: "shadergen preview".to_string(),
            power: GpuPowerPreference::default(),
            target_fps: None,
            options: SceneOptions::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("scene runtime is no longer running")]
    Closed,
}

type Reply = Sender<Result<(), PipelineError>>;

enum RuntimeCommand {
    Submit {
        submission: Box<ShaderSubmission>,
        reply: Reply,
    },
    Teardown {
        reply: Reply,
    },
    Reset {
        reply: Reply,
    },
    Shutdown,
}

/// A window thread that owns a [`SceneLifecycleController`] over a
/// [`WgpuDevice`].
///
/// Commands are delivered through the event loop and handled one at a time,
/// in arrival order, between frames.
pub struct SceneRuntime {
    proxy: EventLoopProxy<RuntimeCommand>,
    join_handle: Option<JoinHandle<Result<()>>>,
}

impl SceneRuntime {
    pub fn spawn(config: RuntimeConfig) -> Result<Self> {
        let (ready_tx, ready_rx) = bounded(1);
        let handle = thread::Builder::new()
            .name("shaderscene-window".into())
            .spawn(move || run_window_thread(config, ready_tx))
            .map_err(|err| anyhow!("failed to spawn window thread: {err}"))?;

        let proxy = ready_rx
            .recv()
            .map_err(|err| anyhow!("window thread failed to initialise: {err}"))??;

        Ok(Self {
            proxy,
            join_handle: Some(handle),
        })
    }

    /// Replaces the live scene. Blocks until the window thread has processed
    /// this submission.
    pub fn submit(&self, submission: ShaderSubmission) -> Result<(), RuntimeError> {
        self.request(|reply| RuntimeCommand::Submit {
            submission: Box::new(submission),
            reply,
        })
    }

    /// Tears the live scene down without building a new one.
    pub fn teardown(&self) -> Result<(), RuntimeError> {
        self.request(|reply| RuntimeCommand::Teardown { reply })
    }

    /// Drops every device resource and clears a teardown fault so the next
    /// submission can build again.
    pub fn reset(&self) -> Result<(), RuntimeError> {
        self.request(|reply| RuntimeCommand::Reset { reply })
    }

    /// Whether the window thread is still alive (the user may have closed the
    /// window).
    pub fn is_running(&self) -> bool {
        self.join_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn shutdown(mut self) -> Result<()> {
        if let Some(handle) = self.join_handle.take() {
            let _ = self.proxy.send_event(RuntimeCommand::Shutdown);
            handle
                .join()
                .map_err(|err| anyhow!("window thread panicked: {err:?}"))??;
        }
        Ok(())
    }

    fn request(&self, command: impl FnOnce(Reply) -> RuntimeCommand) -> Result<(), RuntimeError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.proxy
            .send_event(command(reply_tx))
            .map_err(|_| RuntimeError::Closed)?;
        reply_rx.recv().map_err(|_| RuntimeError::Closed)??;
        Ok(())
    }
}

impl Drop for SceneRuntime {
    fn drop(&mut self) {
        if let Some(handle) = self.join_handle.take() {
            let _ = self.proxy.send_event(RuntimeCommand::Shutdown);
            let _ = handle.join();
        }
    }
}

fn run_window_thread(
    config: RuntimeConfig,
    ready_tx: Sender<Result<EventLoopProxy<RuntimeCommand>, anyhow::Error>>,
) -> Result<()> {
    let mut builder = EventLoopBuilder::<RuntimeCommand>::with_user_event();
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        use winit::platform::wayland::EventLoopBuilderExtWayland;
        EventLoopBuilderExtWayland::with_any_thread(&mut builder, true);
    }

    #[cfg(any(
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd",
        target_os = "dragonfly"
    ))]
    {
        use winit::platform::x11::EventLoopBuilderExtX11;
        EventLoopBuilderExtX11::with_any_thread(&mut builder, true);
    }
    let event_loop = match builder.build() {
        Ok(event_loop) => event_loop,
        Err(err) => {
            let message = format!("failed to create event loop: {err}");
            let _ = ready_tx.send(Err(anyhow!(message.clone())));
            return Err(anyhow!(message));
        }
    };
    let proxy = event_loop.create_proxy();

    let (width, height) = config.surface_size;
    let window = match WindowBuilder::new()
        .with_title(config.title.as_str())
        .with_inner_size(PhysicalSize::new(width.max(1), height.max(1)))
        .build(&event_loop)
    {
        Ok(window) => Arc::new(window),
        Err(err) => {
            let message = format!("failed to create preview window: {err}");
            let _ = ready_tx.send(Err(anyhow!(message.clone())));
            return Err(anyhow!(message));
        }
    };

    let device = match WgpuDevice::new(window.clone(), config.power) {
        Ok(device) => device,
        Err(err) => {
            let wrapped = anyhow!("failed to initialise window renderer: {err}");
            let message = wrapped.to_string();
            let _ = ready_tx.send(Err(anyhow!(message)));
            return Err(wrapped);
        }
    };
    info!(adapter = device.adapter_name(), width, height, "preview window ready");

    let mut controller = SceneLifecycleController::with_scheduler(
        device,
        config.options.clone(),
        scheduler_for_fps(config.target_fps),
    );

    let _ = ready_tx.send(Ok(proxy));

    let run_result = event_loop.run(move |event, elwt| match event {
        Event::UserEvent(command) => match command {
            RuntimeCommand::Submit { submission, reply } => {
                let result = controller.submit(&submission);
                if let Err(err) = &result {
                    error!(error = %err, "shader submission failed");
                }
                let _ = reply.send(result);
                if controller.wants_frame(Instant::now()) {
                    window.request_redraw();
                }
            }
            RuntimeCommand::Teardown { reply } => {
                let _ = reply.send(controller.teardown());
            }
            RuntimeCommand::Reset { reply } => {
                controller.reset();
                let _ = reply.send(Ok(()));
            }
            RuntimeCommand::Shutdown => {
                if let Err(err) = controller.teardown() {
                    error!(error = %err, "teardown failed during shutdown");
                }
                elwt.exit();
            }
        },
        Event::WindowEvent { window_id, event } if window_id == window.id() => match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                if let Err(err) = controller.teardown() {
                    error!(error = %err, "teardown failed while closing window");
                }
                elwt.exit();
            }
            WindowEvent::Resized(new_size) => {
                controller.resize(new_size.width, new_size.height);
            }
            WindowEvent::ScaleFactorChanged {
                mut inner_size_writer,
                ..
            } => {
                let _ = inner_size_writer.request_inner_size(window.inner_size());
            }
            WindowEvent::RedrawRequested => match controller.frame(Instant::now()) {
                Ok(_) => {}
                Err(PipelineError::ResourceExhausted(err)) => {
                    error!(error = %err, "GPU resources exhausted while drawing; tearing scene down");
                    if let Err(err) = controller.teardown() {
                        error!(error = %err, "teardown failed after draw error");
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "frame failed; retrying next frame");
                }
            },
            _ => {}
        },
        Event::AboutToWait => {
            let now = Instant::now();
            if controller.wants_frame(now) {
                tracing::trace!("scheduler: issuing redraw now");
                window.request_redraw();
                elwt.set_control_flow(ControlFlow::Wait);
            } else if let Some(deadline) = controller.next_deadline() {
                let ms = deadline.saturating_duration_since(now).as_millis();
                tracing::trace!(deadline_ms = ms, "scheduler: waiting until next frame");
                elwt.set_control_flow(ControlFlow::WaitUntil(deadline));
            } else {
                elwt.set_control_flow(ControlFlow::Wait);
            }
        }
        Event::LoopExiting => {
            if let Err(err) = controller.teardown() {
                error!(error = %err, "teardown failed while exiting event loop");
            }
        }
        _ => {}
    });

    run_result.map_err(|err| anyhow!("window event loop error: {err}"))
}
