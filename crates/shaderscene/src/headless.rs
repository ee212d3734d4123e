//! A [`RenderDevice`] that allocates nothing on a GPU.
//!
//! Handles are plain counters, but every allocation, release, and draw is
//! accounted for, which makes the device useful for compile-only checks and
//! for asserting resource behaviour in tests.

use std::collections::BTreeMap;

use crate::device::{DepthMode, DrawCall, FrameDraw, MeshId, ProgramDescriptor, ProgramId, RenderDevice};
use crate::error::{DeviceError, ResourceExhaustedError};
use crate::shape::Geometry;

#[derive(Debug, Clone)]
struct HeadlessProgram {
    label: String,
    depth: DepthMode,
    uniform_block_size: u64,
}

#[derive(Debug, Clone)]
struct HeadlessMesh {
    label: &'static str,
    index_count: usize,
}

/// One draw as observed by [`HeadlessDevice`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedDraw {
    pub program: ProgramId,
    pub program_label: String,
    pub mesh: MeshId,
    pub mesh_label: &'static str,
    pub depth: DepthMode,
    pub index_count: usize,
    pub uniforms: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct HeadlessDevice {
    size: (u32, u32),
    next_handle: u64,
    programs: BTreeMap<ProgramId, HeadlessProgram>,
    meshes: BTreeMap<MeshId, HeadlessMesh>,
    program_budget: Option<usize>,
    fail_releases: bool,
    programs_created: usize,
    programs_released: usize,
    frames_drawn: u64,
    last_frame: Vec<RecordedDraw>,
}

impl HeadlessDevice {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: (width.max(1), height.max(1)),
            next_handle: 1,
            programs: BTreeMap::new(),
            meshes: BTreeMap::new(),
            program_budget: None,
            fail_releases: false,
            programs_created: 0,
            programs_released: 0,
            frames_drawn: 0,
            last_frame: Vec::new(),
        }
    }

    /// Fails program creation once `budget` programs are live at the same time.
    pub fn with_program_budget(mut self, budget: usize) -> Self {
        self.program_budget = Some(budget);
        self
    }

    /// While set, every program and mesh release is refused and the handle
    /// stays live, as if the device had been lost.
    pub fn set_fail_releases(&mut self, fail: bool) {
        self.fail_releases = fail;
    }

    pub fn programs_created(&self) -> usize {
        self.programs_created
    }

    pub fn programs_released(&self) -> usize {
        self.programs_released
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }

    /// Draw list of the most recent frame, in the order it was issued.
    pub fn last_frame(&self) -> &[RecordedDraw] {
        &self.last_frame
    }

    /// Label of a live program, if the handle is known.
    pub fn program_label(&self, program: ProgramId) -> Option<&str> {
        self.programs.get(&program).map(|entry| entry.label.as_str())
    }

    fn next_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn record(&self, draw: &DrawCall<'_>) -> Result<RecordedDraw, DeviceError> {
        let program = self
            .programs
            .get(&draw.program)
            .ok_or(DeviceError::UnknownHandle {
                kind: "program",
                id: draw.program.raw(),
            })?;
        let mesh = self.meshes.get(&draw.mesh).ok_or(DeviceError::UnknownHandle {
            kind: "mesh",
            id: draw.mesh.raw(),
        })?;
        if draw.uniforms.len() as u64 != program.uniform_block_size {
            tracing::warn!(
                program = %draw.program,
                expected = program.uniform_block_size,
                actual = draw.uniforms.len(),
                "uniform upload does not match block size"
            );
        }
        Ok(RecordedDraw {
            program: draw.program,
            program_label: program.label.clone(),
            mesh: draw.mesh,
            mesh_label: mesh.label,
            depth: program.depth,
            index_count: mesh.index_count,
            uniforms: draw.uniforms.to_vec(),
        })
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new(400, 400)
    }
}

impl RenderDevice for HeadlessDevice {
    fn surface_size(&self) -> (u32, u32) {
        self.size
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.size = (width, height);
    }

    fn create_program(&mut self, descriptor: &ProgramDescriptor<'_>) -> Result<ProgramId, DeviceError> {
        if let Some(budget) = self.program_budget {
            if self.programs.len() >= budget {
                return Err(ResourceExhaustedError {
                    resource: format!("program '{}'", descriptor.label),
                    message: format!("program budget of {budget} reached"),
                }
                .into());
            }
        }
        let id = ProgramId(self.next_handle());
        self.programs.insert(
            id,
            HeadlessProgram {
                label: descriptor.label.to_string(),
                depth: descriptor.depth,
                uniform_block_size: descriptor.uniform_block_size,
            },
        );
        self.programs_created += 1;
        Ok(id)
    }

    fn release_program(&mut self, program: ProgramId) -> Result<(), DeviceError> {
        if self.fail_releases {
            return Err(DeviceError::Lost(format!("refused to release {program}")));
        }
        self.programs
            .remove(&program)
            .ok_or(DeviceError::UnknownHandle {
                kind: "program",
                id: program.raw(),
            })?;
        self.programs_released += 1;
        Ok(())
    }

    fn create_mesh(&mut self, geometry: &Geometry) -> Result<MeshId, DeviceError> {
        let id = MeshId(self.next_handle());
        self.meshes.insert(
            id,
            HeadlessMesh {
                label: geometry.label,
                index_count: geometry.index_count(),
            },
        );
        Ok(id)
    }

    fn release_mesh(&mut self, mesh: MeshId) -> Result<(), DeviceError> {
        if self.fail_releases {
            return Err(DeviceError::Lost(format!("refused to release {mesh}")));
        }
        self.meshes
            .remove(&mesh)
            .map(|_| ())
            .ok_or(DeviceError::UnknownHandle {
                kind: "mesh",
                id: mesh.raw(),
            })
    }

    fn draw_frame(&mut self, frame: &FrameDraw<'_>) -> Result<(), DeviceError> {
        let recorded = frame
            .draws
            .iter()
            .map(|draw| self.record(draw))
            .collect::<Result<Vec<_>, _>>()?;
        self.last_frame = recorded;
        self.frames_drawn += 1;
        Ok(())
    }

    fn live_programs(&self) -> usize {
        self.programs.len()
    }

    fn live_meshes(&self) -> usize {
        self.meshes.len()
    }

    fn release_all(&mut self) {
        self.programs_released += self.programs.len();
        self.programs.clear();
        self.meshes.clear();
        self.last_frame.clear();
    }
}
