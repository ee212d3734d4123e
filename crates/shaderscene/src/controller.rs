use std::fmt;
use std::time::Instant;

use crate::compile::{CompiledProgram, MaterialDescriptor, ShaderProgramBuilder};
use crate::device::RenderDevice;
use crate::error::{DeviceError, PipelineError};
use crate::runtime::{scheduler_for_fps, FrameScheduler, RenderLoop};
use crate::scene::{SceneGraph, SceneState};
use crate::shape::create_geometry;
use crate::types::{RenderTarget, SceneOptions, ShaderSubmission};

/// Where the controller is in the build/teardown cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    Uninitialized,
    Building,
    Live,
    Disposing,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Lifecycle::Uninitialized => "uninitialized",
            Lifecycle::Building => "building",
            Lifecycle::Live => "live",
            Lifecycle::Disposing => "disposing",
        };
        f.write_str(name)
    }
}

/// Outcome of one display callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Drawn,
    /// Live, but the scheduler did not want a frame yet.
    Skipped,
    /// No live scene.
    Idle,
}

/// Owns the one live [`SceneState`] and every GPU resource behind it.
///
/// All mutation goes through `&mut self`, so a caller can never interleave
/// two submissions; concurrent producers must funnel through a queue (see
/// [`crate::SceneRuntime`]).
pub struct SceneLifecycleController<D: RenderDevice> {
    device: D,
    builder: ShaderProgramBuilder,
    options: SceneOptions,
    scene: Option<SceneState>,
    render_loop: RenderLoop,
    lifecycle: Lifecycle,
    faulted: bool,
}

impl<D: RenderDevice> SceneLifecycleController<D> {
    /// Controller that draws on every display refresh.
    pub fn new(device: D, options: SceneOptions) -> Self {
        Self::with_scheduler(device, options, scheduler_for_fps(None))
    }

    pub fn with_scheduler(device: D, options: SceneOptions, scheduler: Box<dyn FrameScheduler>) -> Self {
        let render_loop = RenderLoop::new(scheduler, &options);
        Self {
            device,
            builder: ShaderProgramBuilder::new(),
            options,
            scene: None,
            render_loop,
            lifecycle: Lifecycle::Uninitialized,
            faulted: false,
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Set after a teardown failed; cleared by [`Self::reset`].
    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Direct device access, for diagnostics and fault injection.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn scene(&self) -> Option<&SceneState> {
        self.scene.as_ref()
    }

    pub fn scene_mut(&mut self) -> Option<&mut SceneState> {
        self.scene.as_mut()
    }

    pub fn render_loop(&self) -> &RenderLoop {
        &self.render_loop
    }

    pub fn options(&self) -> &SceneOptions {
        &self.options
    }

    /// Replaces the live scene with one built from `submission`.
    ///
    /// The previous scene is always torn down first. On any build failure the
    /// controller ends `Uninitialized` with nothing left allocated.
    pub fn submit(&mut self, submission: &ShaderSubmission) -> Result<(), PipelineError> {
        if self.faulted {
            return Err(PipelineError::ResetRequired);
        }
        tracing::info!(shape = %submission.shape, "shader submission received");

        self.teardown()?;

        self.transition(Lifecycle::Building);
        let geometry = create_geometry(submission.shape);

        let background = match self.builder.compile(
            &mut self.device,
            &submission.background,
            &MaterialDescriptor::background(),
        ) {
            Ok(program) => program,
            Err(err) => return Err(self.abort_build(err, None)),
        };
        let object = match self.builder.compile(
            &mut self.device,
            &submission.object,
            &MaterialDescriptor::object(),
        ) {
            Ok(program) => program,
            Err(err) => return Err(self.abort_build(err, Some(background))),
        };

        let target = self.render_target();
        let mut scene = match SceneGraph::assemble(
            &mut self.device,
            background,
            object,
            &geometry,
            &self.options,
            target,
        ) {
            Ok(scene) => scene,
            Err(err) => return Err(self.abort_build(err, None)),
        };

        self.render_loop.start(&mut scene, target);
        self.scene = Some(scene);
        self.transition(Lifecycle::Live);
        tracing::info!(
            shape = %submission.shape,
            programs = self.device.live_programs(),
            "scene is live"
        );
        Ok(())
    }

    /// Stops the loop and releases every resource of the live scene, if any.
    ///
    /// After this returns no further draw is issued. If the device refuses a
    /// release the controller is left faulted and `reset` is required.
    pub fn teardown(&mut self) -> Result<(), PipelineError> {
        self.render_loop.stop();
        let Some(scene) = self.scene.take() else {
            if self.lifecycle != Lifecycle::Uninitialized {
                self.transition(Lifecycle::Uninitialized);
            }
            return Ok(());
        };

        self.transition(Lifecycle::Disposing);
        let disposed = scene.dispose(&mut self.device);
        let mut failures = disposed.failures;
        failures.extend(release_programs(&mut self.device, disposed.programs));
        self.transition(Lifecycle::Uninitialized);

        if !failures.is_empty() {
            self.faulted = true;
            tracing::error!(
                failures = failures.len(),
                "scene teardown failed; controller requires a full reset"
            );
            return Err(PipelineError::Teardown(failures));
        }
        self.check_for_leaks();
        Ok(())
    }

    /// Drives one display callback at `now`.
    pub fn frame(&mut self, now: Instant) -> Result<FrameStatus, PipelineError> {
        let Some(scene) = self.scene.as_mut() else {
            return Ok(FrameStatus::Idle);
        };
        if self.lifecycle != Lifecycle::Live {
            return Ok(FrameStatus::Idle);
        }
        match self.render_loop.tick(scene, &mut self.device, now)? {
            true => Ok(FrameStatus::Drawn),
            false => Ok(FrameStatus::Skipped),
        }
    }

    /// Forwards a drawable resize to the device and camera.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.device.resize(width, height);
        if let Some(scene) = self.scene.as_mut() {
            scene.camera.set_aspect(RenderTarget::new(width, height).aspect());
        }
        tracing::debug!(width, height, "render target resized");
    }

    /// Drops every device resource and clears a teardown fault.
    pub fn reset(&mut self) {
        self.render_loop.stop();
        if let Some(scene) = self.scene.take() {
            // release_all below drops the program handles.
            for program in scene.dispose(&mut self.device).programs {
                program.abandon();
            }
        }
        self.device.release_all();
        self.faulted = false;
        self.transition(Lifecycle::Uninitialized);
        tracing::info!("controller reset");
    }

    /// Next time the scheduler wants a frame, when it runs on a timer.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.render_loop.next_deadline()
    }

    pub fn wants_frame(&self, now: Instant) -> bool {
        self.lifecycle == Lifecycle::Live && self.render_loop.ready_for_frame(now)
    }

    fn render_target(&self) -> RenderTarget {
        let (width, height) = self.device.surface_size();
        RenderTarget::new(width, height)
    }

    fn abort_build(&mut self, err: PipelineError, compiled: Option<CompiledProgram>) -> PipelineError {
        if let Some(program) = compiled {
            for failure in release_programs(&mut self.device, vec![program]) {
                tracing::warn!(error = %failure, "failed to release partially built program");
            }
        }
        self.transition(Lifecycle::Uninitialized);
        match err.stage() {
            Some(stage) => tracing::warn!(%stage, error = %err, "scene build failed"),
            None => tracing::warn!(error = %err, "scene build failed"),
        }
        self.check_for_leaks();
        err
    }

    fn check_for_leaks(&self) {
        let programs = self.device.live_programs();
        let meshes = self.device.live_meshes();
        if programs != 0 || meshes != 0 {
            tracing::error!(programs, meshes, "GPU resources still live with no scene");
        }
    }

    fn transition(&mut self, next: Lifecycle) {
        tracing::debug!(from = %self.lifecycle, to = %next, "lifecycle transition");
        self.lifecycle = next;
    }
}

impl<D: RenderDevice> Drop for SceneLifecycleController<D> {
    fn drop(&mut self) {
        if self.scene.is_some() {
            if let Err(err) = self.teardown() {
                tracing::error!(error = %err, "teardown failed while dropping controller");
            }
        }
    }
}

fn release_programs<D: RenderDevice + ?Sized>(
    device: &mut D,
    programs: Vec<CompiledProgram>,
) -> Vec<DeviceError> {
    programs
        .into_iter()
        .filter_map(|program| program.release(device).err())
        .collect()
}
