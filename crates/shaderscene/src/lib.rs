//! Live two-pass shader scenes: a full-screen background plus one rotating
//! foreground mesh, rebuilt from fresh GLSL on every submission.
//!
//! ```text
//!   ShaderSubmission
//!          │ submit()
//!          ▼
//!   SceneLifecycleController ──▶ teardown previous scene (loop, meshes, programs)
//!          │
//!          ├─▶ create_geometry(shape)
//!          ├─▶ ShaderProgramBuilder::compile × 2 ──▶ RenderDevice::create_program
//!          ├─▶ SceneGraph::assemble ──▶ SceneState
//!          └─▶ RenderLoop::start ──▶ frame(): rotate ▶ update_time ▶ draw
//! ```
//!
//! Every GPU allocation goes through the [`RenderDevice`] trait.
//! [`WgpuDevice`] draws into a winit window (see [`SceneRuntime`]);
//! [`HeadlessDevice`] only keeps accounts, which is enough to compile-check
//! shaders and to test the lifecycle without a GPU.
//!
//! Shader sources use the WebGL `ShaderMaterial` dialect (`attribute`,
//! `varying`, `gl_FragColor`, implicit `projectionMatrix`/`modelViewMatrix`).
//! [`compile`] rewrites them to GLSL 450 and validates both stages with naga
//! before anything reaches the device.

pub mod compile;
pub mod controller;
pub mod device;
mod error;
mod gpu;
pub mod headless;
pub mod runtime;
pub mod scene;
pub mod shape;
mod types;
pub mod uniforms;
mod window;

pub use compile::{CompiledProgram, MaterialDescriptor, ShaderProgramBuilder, TranslatedProgram};
pub use controller::{FrameStatus, Lifecycle, SceneLifecycleController};
pub use device::{DepthMode, DrawCall, FrameDraw, MeshId, ProgramDescriptor, ProgramId, RenderDevice};
pub use error::{
    DeviceError, InvalidShapeError, PipelineError, ProgramStage, ResourceExhaustedError,
    ShaderCompileError, ShaderLinkError, UniformError,
};
pub use gpu::WgpuDevice;
pub use headless::{HeadlessDevice, RecordedDraw};
pub use runtime::{
    DisplayScheduler, FrameScheduler, IntervalScheduler, RenderLoop, SteppedTimeSource,
    SystemTimeSource, TimeSample, TimeSource,
};
pub use scene::{Camera, NodeRole, RenderableNode, SceneGraph, SceneState, Transform};
pub use shape::{create_geometry, Geometry, Vertex};
pub use types::{
    ClockMode, GpuPowerPreference, RenderTarget, SceneOptions, ShaderSourcePair, ShaderSubmission,
    ShapeKind,
};
pub use uniforms::{UniformKind, UniformValue};
pub use window::{RuntimeConfig, RuntimeError, SceneRuntime};
