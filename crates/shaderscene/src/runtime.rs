use std::time::{Duration, Instant};

use crate::device::RenderDevice;
use crate::error::DeviceError;
use crate::scene::SceneState;
use crate::types::{ClockMode, RenderTarget, SceneOptions};

/// Snapshot of the scene clock handed to the time uniform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSample {
    /// Time since the clock was last reset.
    pub elapsed: Duration,
    /// Monotonic frame counter since the last reset.
    pub frame_index: u64,
}

impl TimeSample {
    pub fn new(elapsed: Duration, frame_index: u64) -> Self {
        Self {
            elapsed,
            frame_index,
        }
    }

    pub fn seconds(&self) -> f32 {
        self.elapsed.as_secs_f32()
    }
}

/// Abstraction over where time values originate from.
pub trait TimeSource: Send {
    /// Restarts the source at zero.
    fn reset(&mut self);
    /// Produces a time sample for the next frame.
    fn sample(&mut self) -> TimeSample;
}

/// Time source backed by the system monotonic clock.
#[derive(Debug, Clone, Copy)]
pub struct SystemTimeSource {
    origin: Instant,
    frame: u64,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
            frame: 0,
        }
    }
}

impl TimeSource for SystemTimeSource {
    fn reset(&mut self) {
        self.origin = Instant::now();
        self.frame = 0;
    }

    fn sample(&mut self) -> TimeSample {
        let sample = TimeSample::new(self.origin.elapsed(), self.frame);
        self.frame = self.frame.saturating_add(1);
        sample
    }
}

/// Time source that advances by a fixed step on every sample, for
/// deterministic playback. The first sample after a reset reads zero.
#[derive(Debug, Clone, Copy)]
pub struct SteppedTimeSource {
    step: Duration,
    frame: u64,
}

impl SteppedTimeSource {
    pub fn new(step: Duration) -> Self {
        Self { step, frame: 0 }
    }

    pub fn step(&self) -> Duration {
        self.step
    }
}

impl TimeSource for SteppedTimeSource {
    fn reset(&mut self) {
        self.frame = 0;
    }

    fn sample(&mut self) -> TimeSample {
        let factor = u32::try_from(self.frame).unwrap_or(u32::MAX);
        let sample = TimeSample::new(self.step.saturating_mul(factor), self.frame);
        self.frame = self.frame.saturating_add(1);
        sample
    }
}

/// Convenient alias for owning time sources behind trait objects.
pub type BoxedTimeSource = Box<dyn TimeSource + Send>;

/// Builds the time source a [`ClockMode`] asks for.
pub fn time_source_for_clock(mode: ClockMode) -> BoxedTimeSource {
    match mode {
        ClockMode::System => Box::new(SystemTimeSource::new()),
        ClockMode::FixedStep(step) => Box::new(SteppedTimeSource::new(step)),
    }
}

/// Decides when the render loop may issue its next frame.
///
/// Independent of any windowing API: a winit event loop, a timer thread, or a
/// test can all drive it by passing in `now`.
pub trait FrameScheduler: Send {
    fn start(&mut self, now: Instant);
    /// After this returns, `ready_for_frame` answers `false` until the next
    /// `start`.
    fn stop(&mut self);
    fn is_running(&self) -> bool;
    fn ready_for_frame(&self, now: Instant) -> bool;
    fn mark_rendered(&mut self, now: Instant);
    /// When the caller should wake up next; `None` means on the next display
    /// refresh (or never, when stopped).
    fn next_deadline(&self) -> Option<Instant>;
}

/// Renders on every display refresh while running.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisplayScheduler {
    running: bool,
}

impl DisplayScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameScheduler for DisplayScheduler {
    fn start(&mut self, _now: Instant) {
        self.running = true;
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn ready_for_frame(&self, _now: Instant) -> bool {
        self.running
    }

    fn mark_rendered(&mut self, _now: Instant) {}

    fn next_deadline(&self) -> Option<Instant> {
        None
    }
}

/// Renders at most once per fixed interval.
#[derive(Debug, Clone, Copy)]
pub struct IntervalScheduler {
    interval: Duration,
    next_frame: Option<Instant>,
}

impl IntervalScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_frame: None,
        }
    }

    /// Interval derived from a target frame rate. Non-positive or non-finite
    /// rates yield `None`.
    pub fn from_fps(fps: f32) -> Option<Self> {
        if fps.is_finite() && fps > 0.0 {
            Some(Self::new(Duration::from_secs_f32(1.0 / fps)))
        } else {
            None
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl FrameScheduler for IntervalScheduler {
    fn start(&mut self, now: Instant) {
        self.next_frame = Some(now);
    }

    fn stop(&mut self) {
        self.next_frame = None;
    }

    fn is_running(&self) -> bool {
        self.next_frame.is_some()
    }

    fn ready_for_frame(&self, now: Instant) -> bool {
        matches!(self.next_frame, Some(deadline) if now >= deadline)
    }

    fn mark_rendered(&mut self, now: Instant) {
        if let Some(deadline) = self.next_frame.as_mut() {
            let mut next = *deadline + self.interval;
            // Drop missed frames instead of bursting to catch up.
            if next <= now {
                next = now + self.interval;
            }
            *deadline = next;
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.next_frame
    }
}

/// Scheduler matching an optional FPS cap.
pub fn scheduler_for_fps(target_fps: Option<f32>) -> Box<dyn FrameScheduler> {
    match target_fps.and_then(IntervalScheduler::from_fps) {
        Some(interval) => Box::new(interval),
        None => Box::new(DisplayScheduler::new()),
    }
}

/// Per-frame driver: rotates the object, advances `time`, and draws.
///
/// The loop never owns the scene. It is handed a `&mut SceneState` on every
/// tick by the controller that does.
pub struct RenderLoop {
    scheduler: Box<dyn FrameScheduler>,
    rotation_step: f32,
    clear_color: [f64; 4],
    frames_drawn: u64,
}

impl RenderLoop {
    pub fn new(scheduler: Box<dyn FrameScheduler>, options: &SceneOptions) -> Self {
        Self {
            scheduler,
            rotation_step: options.rotation_step,
            clear_color: options.clear_color,
            frames_drawn: 0,
        }
    }

    /// Resets the scene clock, fits the camera to `target`, and begins
    /// scheduling frames.
    pub fn start(&mut self, scene: &mut SceneState, target: RenderTarget) {
        scene.clock.reset();
        scene.camera.set_aspect(target.aspect());
        self.frames_drawn = 0;
        self.scheduler.start(Instant::now());
        tracing::debug!(
            width = target.width,
            height = target.height,
            rotation_step = self.rotation_step,
            "render loop started"
        );
    }

    /// Cancels scheduling. No draw is issued after this returns.
    pub fn stop(&mut self) {
        if self.scheduler.is_running() {
            tracing::debug!(frames = self.frames_drawn, "render loop stopped");
        }
        self.scheduler.stop();
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Frames drawn since the last `start`.
    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }

    pub fn ready_for_frame(&self, now: Instant) -> bool {
        self.scheduler.ready_for_frame(now)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    /// Runs one display callback. Returns whether a frame was drawn.
    pub fn tick<D: RenderDevice + ?Sized>(
        &mut self,
        scene: &mut SceneState,
        device: &mut D,
        now: Instant,
    ) -> Result<bool, DeviceError> {
        if !self.scheduler.ready_for_frame(now) {
            return Ok(false);
        }

        scene.rotate_object(self.rotation_step);
        let sample = scene.clock.sample();
        scene.update_time(sample.elapsed);

        let (width, height) = device.surface_size();
        scene.prepare_frame(RenderTarget::new(width, height));
        device.draw_frame(&scene.frame_draw(self.clear_color))?;

        self.scheduler.mark_rendered(now);
        self.frames_drawn += 1;
        tracing::trace!(
            frame = sample.frame_index,
            time = sample.seconds(),
            "frame drawn"
        );
        Ok(true)
    }
}

impl std::fmt::Debug for RenderLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderLoop")
            .field("running", &self.scheduler.is_running())
            .field("rotation_step", &self.rotation_step)
            .field("frames_drawn", &self.frames_drawn)
            .finish()
    }
}
