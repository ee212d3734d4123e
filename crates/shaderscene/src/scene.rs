//! The live scene: a background plane and one foreground mesh.

use std::fmt;
use std::time::Duration;

use glam::{EulerRot, Mat3, Mat4, Quat, Vec3};

use crate::compile::CompiledProgram;
use crate::device::{DrawCall, FrameDraw, MeshId, RenderDevice};
use crate::error::{DeviceError, PipelineError, UniformError};
use crate::runtime::{time_source_for_clock, BoxedTimeSource, TimeSample};
use crate::shape::{background_plane, Geometry};
use crate::types::{RenderTarget, SceneOptions};
use crate::uniforms::{
    UniformValue, CAMERA_POSITION, MODEL_MATRIX, MODEL_VIEW_MATRIX, NORMAL_MATRIX,
    PROJECTION_MATRIX, RESOLUTION, TIME, VIEW_MATRIX,
};

pub const BACKGROUND_RENDER_ORDER: i32 = -1;
pub const OBJECT_RENDER_ORDER: i32 = 0;

const CAMERA_NEAR: f32 = 0.1;
const CAMERA_FAR: f32 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRole {
    Background,
    Object,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Background => f.write_str("background"),
            NodeRole::Object => f.write_str("object"),
        }
    }
}

/// Position, Euler XYZ rotation in radians, and scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Transform {
    pub fn matrix(&self) -> Mat4 {
        let rotation = Quat::from_euler(EulerRot::XYZ, self.rotation.x, self.rotation.y, self.rotation.z);
        Mat4::from_scale_rotation_translation(self.scale, rotation, self.position)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }
}

/// Perspective camera looking down -Z.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub fov_y_degrees: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    pub position: Vec3,
}

impl Camera {
    pub fn new(options: &SceneOptions, aspect: f32) -> Self {
        Self {
            fov_y_degrees: options.fov_degrees,
            aspect,
            near: CAMERA_NEAR,
            far: CAMERA_FAR,
            position: Vec3::new(0.0, 0.0, options.camera_distance),
        }
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        if aspect.is_finite() && aspect > 0.0 {
            self.aspect = aspect;
        }
    }

    /// Right-handed projection with a 0..1 depth range.
    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y_degrees.to_radians(), self.aspect, self.near, self.far)
    }

    pub fn view(&self) -> Mat4 {
        Mat4::from_translation(-self.position)
    }
}

/// Elapsed-time source for the scene.
pub struct SceneClock {
    source: BoxedTimeSource,
    last: Option<TimeSample>,
}

impl SceneClock {
    pub fn new(source: BoxedTimeSource) -> Self {
        Self { source, last: None }
    }

    pub fn reset(&mut self) {
        self.source.reset();
        self.last = None;
    }

    pub fn sample(&mut self) -> TimeSample {
        let sample = self.source.sample();
        self.last = Some(sample);
        sample
    }

    /// Most recent sample since the last reset.
    pub fn last(&self) -> Option<TimeSample> {
        self.last
    }
}

impl fmt::Debug for SceneClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SceneClock").field("last", &self.last).finish_non_exhaustive()
    }
}

/// Geometry plus the material that draws it.
#[derive(Debug)]
pub struct RenderableNode {
    pub role: NodeRole,
    pub mesh: MeshId,
    pub mesh_label: &'static str,
    pub vertex_count: usize,
    pub index_count: usize,
    pub material: CompiledProgram,
    pub transform: Transform,
    pub render_order: i32,
}

/// The single live aggregate of nodes, camera, and clock.
#[derive(Debug)]
pub struct SceneState {
    pub nodes: Vec<RenderableNode>,
    pub camera: Camera,
    pub clock: SceneClock,
}

/// What is left after a scene releases its own resources: the node
/// materials, for the owner to release, and any release failures.
#[derive(Debug)]
pub struct DisposedScene {
    pub programs: Vec<CompiledProgram>,
    pub failures: Vec<DeviceError>,
}

/// Builds [`SceneState`]s.
pub struct SceneGraph;

impl SceneGraph {
    /// Uploads the background plane and `geometry`, and binds the two
    /// programs to them.
    ///
    /// On failure everything handed in or created so far is released before
    /// the error is returned.
    pub fn assemble<D: RenderDevice + ?Sized>(
        device: &mut D,
        background: CompiledProgram,
        object: CompiledProgram,
        geometry: &Geometry,
        options: &SceneOptions,
        target: RenderTarget,
    ) -> Result<SceneState, PipelineError> {
        let plane = background_plane();
        let background_mesh = match device.create_mesh(&plane) {
            Ok(mesh) => mesh,
            Err(err) => {
                release_quietly(device, [background, object]);
                return Err(err.into());
            }
        };
        let object_mesh = match device.create_mesh(geometry) {
            Ok(mesh) => mesh,
            Err(err) => {
                if let Err(release_err) = device.release_mesh(background_mesh) {
                    tracing::warn!(error = %release_err, "failed to release background mesh");
                }
                release_quietly(device, [background, object]);
                return Err(err.into());
            }
        };

        let nodes = vec![
            RenderableNode {
                role: NodeRole::Background,
                mesh: background_mesh,
                mesh_label: plane.label,
                vertex_count: plane.vertex_count(),
                index_count: plane.index_count(),
                material: background,
                transform: Transform::default(),
                render_order: BACKGROUND_RENDER_ORDER,
            },
            RenderableNode {
                role: NodeRole::Object,
                mesh: object_mesh,
                mesh_label: geometry.label,
                vertex_count: geometry.vertex_count(),
                index_count: geometry.index_count(),
                material: object,
                transform: Transform::default(),
                render_order: OBJECT_RENDER_ORDER,
            },
        ];

        tracing::debug!(
            shape = geometry.label,
            vertices = geometry.vertex_count(),
            "scene assembled"
        );
        Ok(SceneState {
            nodes,
            camera: Camera::new(options, target.aspect()),
            clock: SceneClock::new(time_source_for_clock(options.clock)),
        })
    }
}

fn release_quietly<D: RenderDevice + ?Sized>(device: &mut D, programs: [CompiledProgram; 2]) {
    for program in programs {
        let label = program.label().to_string();
        if let Err(err) = program.release(device) {
            tracing::warn!(program = %label, error = %err, "failed to release program");
        }
    }
}

impl SceneState {
    pub fn node(&self, role: NodeRole) -> Option<&RenderableNode> {
        self.nodes.iter().find(|node| node.role == role)
    }

    pub fn node_mut(&mut self, role: NodeRole) -> Option<&mut RenderableNode> {
        self.nodes.iter_mut().find(|node| node.role == role)
    }

    /// Adds `step` radians to the object's X and Y rotation.
    pub fn rotate_object(&mut self, step: f32) {
        if let Some(node) = self.node_mut(NodeRole::Object) {
            node.transform.rotation.x += step;
            node.transform.rotation.y += step;
        }
    }

    /// Writes `elapsed` into the object material's `time` uniform. The
    /// background material is left untouched.
    pub fn update_time(&mut self, elapsed: Duration) {
        if let Some(node) = self.node_mut(NodeRole::Object) {
            if let Err(err) = node
                .material
                .set_uniform(TIME, UniformValue::Float(elapsed.as_secs_f32()))
            {
                tracing::trace!(error = %err, "object material has no time uniform");
            }
        }
    }

    /// Writes a declared uniform on one node's material.
    pub fn set_uniform(
        &mut self,
        role: NodeRole,
        name: &str,
        value: UniformValue,
    ) -> Result<(), UniformError> {
        match self.node_mut(role) {
            Some(node) => node.material.set_uniform(name, value),
            None => Err(UniformError::Unknown(name.to_string())),
        }
    }

    /// Refreshes the camera and model uniforms of every node.
    pub fn prepare_frame(&mut self, target: RenderTarget) {
        self.camera.set_aspect(target.aspect());
        let projection = self.camera.projection();
        let view = self.camera.view();
        let camera_position = self.camera.position;
        let resolution = [target.width as f32, target.height as f32];

        for node in &mut self.nodes {
            let model = node.transform.matrix();
            let model_view = view * model;
            let normal = Mat3::from_mat4(model_view).inverse().transpose();
            let values = [
                (PROJECTION_MATRIX, UniformValue::Mat4(projection.to_cols_array_2d())),
                (MODEL_VIEW_MATRIX, UniformValue::Mat4(model_view.to_cols_array_2d())),
                (MODEL_MATRIX, UniformValue::Mat4(model.to_cols_array_2d())),
                (VIEW_MATRIX, UniformValue::Mat4(view.to_cols_array_2d())),
                (NORMAL_MATRIX, UniformValue::Mat3(normal.to_cols_array_2d())),
                (CAMERA_POSITION, UniformValue::Vec3(camera_position.to_array())),
                (RESOLUTION, UniformValue::Vec2(resolution)),
            ];
            for (name, value) in values {
                if let Err(err) = node.material.set_uniform(name, value) {
                    tracing::warn!(node = %node.role, error = %err, "failed to write built-in uniform");
                }
            }
        }
    }

    /// Nodes in the order they are drawn.
    pub fn draw_list(&self) -> Vec<&RenderableNode> {
        let mut nodes: Vec<&RenderableNode> = self.nodes.iter().collect();
        nodes.sort_by_key(|node| node.render_order);
        nodes
    }

    pub fn frame_draw(&self, clear_color: [f64; 4]) -> FrameDraw<'_> {
        FrameDraw {
            clear_color,
            draws: self
                .draw_list()
                .into_iter()
                .map(|node| DrawCall {
                    program: node.material.id(),
                    mesh: node.mesh,
                    uniforms: node.material.uniforms().as_bytes(),
                })
                .collect(),
        }
    }

    /// Releases the meshes and hands back the node materials.
    pub fn dispose<D: RenderDevice + ?Sized>(self, device: &mut D) -> DisposedScene {
        let mut programs = Vec::with_capacity(self.nodes.len());
        let mut failures = Vec::new();
        for node in self.nodes {
            if let Err(err) = device.release_mesh(node.mesh) {
                tracing::warn!(node = %node.role, mesh = %node.mesh, error = %err, "mesh release failed");
                failures.push(err);
            }
            programs.push(node.material);
        }
        DisposedScene { programs, failures }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::{MaterialDescriptor, ShaderProgramBuilder};
    use crate::device::DepthMode;
    use crate::headless::HeadlessDevice;
    use crate::shape::create_geometry;
    use crate::types::{ShaderSourcePair, ShapeKind};

    const VERTEX: &str = "void main() { gl_Position = projectionMatrix * modelViewMatrix * vec4(position, 1.0); }";
    const FRAGMENT: &str = "uniform float time;\nvoid main() { gl_FragColor = vec4(vec3(fract(time)), 1.0); }";
    const BACKGROUND_VERTEX: &str = "void main() { gl_Position = vec4(position, 1.0); }";
    const BACKGROUND_FRAGMENT: &str = "void main() { gl_FragColor = vec4(0.1, 0.1, 0.2, 1.0); }";

    fn build(device: &mut HeadlessDevice) -> SceneState {
        let builder = ShaderProgramBuilder::new();
        let background = builder
            .compile(
                device,
                &ShaderSourcePair::new(BACKGROUND_VERTEX, BACKGROUND_FRAGMENT),
                &MaterialDescriptor::background(),
            )
            .unwrap();
        let object = builder
            .compile(
                device,
                &ShaderSourcePair::new(VERTEX, FRAGMENT),
                &MaterialDescriptor::object(),
            )
            .unwrap();
        SceneGraph::assemble(
            device,
            background,
            object,
            &create_geometry(ShapeKind::Torus),
            &SceneOptions::default(),
            RenderTarget::new(800, 600),
        )
        .unwrap()
    }

    fn release(scene: SceneState, device: &mut HeadlessDevice) {
        let disposed = scene.dispose(device);
        assert!(disposed.failures.is_empty());
        for program in disposed.programs {
            program.release(device).unwrap();
        }
    }

    #[test]
    fn background_draws_first_without_depth() {
        let mut device = HeadlessDevice::default();
        let scene = build(&mut device);
        let order: Vec<_> = scene.draw_list().iter().map(|node| node.role).collect();
        assert_eq!(order, vec![NodeRole::Background, NodeRole::Object]);

        let background = scene.node(NodeRole::Background).unwrap();
        assert_eq!(background.material.depth(), DepthMode::DISABLED);
        assert_eq!(background.render_order, BACKGROUND_RENDER_ORDER);
        assert_eq!(scene.node(NodeRole::Object).unwrap().index_count, 9600);
        release(scene, &mut device);
    }

    #[test]
    fn update_time_only_touches_object() {
        let mut device = HeadlessDevice::default();
        let mut scene = build(&mut device);
        scene.update_time(Duration::from_millis(2500));

        let object = scene.node(NodeRole::Object).unwrap();
        assert_eq!(object.material.uniforms().get_float(TIME), Some(2.5));
        let background = scene.node(NodeRole::Background).unwrap();
        assert_eq!(background.material.uniforms().get_float(TIME), None);
        release(scene, &mut device);
    }

    #[test]
    fn set_uniform_checks_name_and_kind() {
        let mut device = HeadlessDevice::default();
        let mut scene = build(&mut device);
        assert!(scene
            .set_uniform(NodeRole::Object, TIME, UniformValue::Float(1.0))
            .is_ok());
        assert!(matches!(
            scene.set_uniform(NodeRole::Object, TIME, UniformValue::Vec2([0.0, 0.0])),
            Err(UniformError::KindMismatch { .. })
        ));
        assert_eq!(
            scene.set_uniform(NodeRole::Background, "speed", UniformValue::Float(1.0)),
            Err(UniformError::Unknown("speed".into()))
        );
        release(scene, &mut device);
    }

    #[test]
    fn rotation_accumulates_on_x_and_y() {
        let mut device = HeadlessDevice::default();
        let mut scene = build(&mut device);
        for _ in 0..10 {
            scene.rotate_object(0.01);
        }
        let rotation = scene.node(NodeRole::Object).unwrap().transform.rotation;
        assert!((rotation.x - 0.1).abs() < 1e-5);
        assert!((rotation.y - 0.1).abs() < 1e-5);
        assert_eq!(rotation.z, 0.0);
        release(scene, &mut device);
    }

    #[test]
    fn dispose_releases_meshes_and_returns_programs() {
        let mut device = HeadlessDevice::default();
        let scene = build(&mut device);
        assert_eq!(device.live_meshes(), 2);

        let disposed = scene.dispose(&mut device);
        assert_eq!(device.live_meshes(), 0);
        assert_eq!(disposed.programs.len(), 2);
        for program in disposed.programs {
            program.release(&mut device).unwrap();
        }
        assert_eq!(device.live_programs(), 0);
    }

    #[test]
    fn camera_matches_default_perspective() {
        let camera = Camera::new(&SceneOptions::default(), 1.0);
        assert_eq!(camera.position, Vec3::new(0.0, 0.0, 3.0));
        let origin = camera.projection() * camera.view() * glam::Vec4::new(0.0, 0.0, 0.0, 1.0);
        let depth = origin.z / origin.w;
        assert!(depth > 0.0 && depth < 1.0);
    }
}
