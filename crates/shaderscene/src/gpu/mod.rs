//! wgpu implementation of [`crate::RenderDevice`].
//!
//! - `context` owns instance/adapter/device/surface wiring plus the depth
//!   target, and rebuilds both when the window resizes.
//! - `device` turns wrapped GLSL into render pipelines (one uniform buffer and
//!   bind group per program), uploads meshes, and records frames.

mod context;
mod device;

pub use device::WgpuDevice;
