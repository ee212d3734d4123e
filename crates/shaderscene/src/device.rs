use std::fmt;

use crate::error::DeviceError;
use crate::shape::Geometry;

/// Opaque handle to a linked program owned by a [`RenderDevice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub(crate) u64);

/// Opaque handle to uploaded geometry owned by a [`RenderDevice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(pub(crate) u64);

impl ProgramId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl MeshId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "program#{}", self.0)
    }
}

impl fmt::Display for MeshId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mesh#{}", self.0)
    }
}

/// Depth behaviour baked into a program's pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthMode {
    pub test: bool,
    pub write: bool,
}

impl DepthMode {
    /// Neither tests nor writes depth; used for the background pass.
    pub const DISABLED: DepthMode = DepthMode {
        test: false,
        write: false,
    };
    /// Standard less-than depth test with writes.
    pub const OPAQUE: DepthMode = DepthMode {
        test: true,
        write: true,
    };
}

/// Everything a device needs to build one program.
#[derive(Debug, Clone, Copy)]
pub struct ProgramDescriptor<'a> {
    pub label: &'a str,
    /// Wrapped GLSL 450 vertex stage.
    pub vertex_glsl: &'a str,
    /// Wrapped GLSL 450 fragment stage.
    pub fragment_glsl: &'a str,
    /// Size in bytes of the std140 uniform block at set 0, binding 0.
    pub uniform_block_size: u64,
    pub depth: DepthMode,
}

/// One indexed draw of `mesh` with `program`.
#[derive(Debug, Clone, Copy)]
pub struct DrawCall<'a> {
    pub program: ProgramId,
    pub mesh: MeshId,
    /// Uniform block contents uploaded before the draw.
    pub uniforms: &'a [u8],
}

/// Draws for one presented frame, in submission order.
#[derive(Debug, Clone)]
pub struct FrameDraw<'a> {
    pub clear_color: [f64; 4],
    pub draws: Vec<DrawCall<'a>>,
}

/// GPU seam used by every component that allocates, releases, or draws.
///
/// All handles are created and destroyed through this trait so the owner can
/// account for them; releasing or drawing with a handle the device does not
/// know about is reported as [`DeviceError::UnknownHandle`].
pub trait RenderDevice {
    /// Current drawable size in physical pixels.
    fn surface_size(&self) -> (u32, u32);

    /// Reconfigures the drawable. Zero-sized requests are ignored.
    fn resize(&mut self, width: u32, height: u32);

    fn create_program(&mut self, descriptor: &ProgramDescriptor<'_>) -> Result<ProgramId, DeviceError>;

    fn release_program(&mut self, program: ProgramId) -> Result<(), DeviceError>;

    fn create_mesh(&mut self, geometry: &Geometry) -> Result<MeshId, DeviceError>;

    fn release_mesh(&mut self, mesh: MeshId) -> Result<(), DeviceError>;

    /// Clears the surface and issues `frame.draws` in order.
    fn draw_frame(&mut self, frame: &FrameDraw<'_>) -> Result<(), DeviceError>;

    fn live_programs(&self) -> usize;

    fn live_meshes(&self) -> usize;

    /// Drops every program and mesh the device still holds.
    fn release_all(&mut self);
}
