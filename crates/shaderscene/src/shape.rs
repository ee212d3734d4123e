//! Geometry for the foreground mesh and the background plane.
//!
//! Parameters are fixed so vertex counts downstream are predictable:
//!
//! | shape      | parameters                                   | vertices | indices |
//! |------------|----------------------------------------------|----------|---------|
//! | cube       | 1 x 1 x 1, one segment per side              | 24       | 36      |
//! | sphere     | radius 0.75, 32 x 32 segments                | 1089     | 5952    |
//! | torus      | radius 0.5, tube 0.2, 16 x 100 segments      | 1717     | 9600    |
//! | background | 2 x 2 plane spanning clip space              | 4        | 6       |
//!
//! Front faces wind counter-clockwise.

use std::f32::consts::{PI, TAU};

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::types::ShapeKind;

pub const CUBE_SIZE: f32 = 1.0;
pub const SPHERE_RADIUS: f32 = 0.75;
pub const SPHERE_WIDTH_SEGMENTS: u32 = 32;
pub const SPHERE_HEIGHT_SEGMENTS: u32 = 32;
pub const TORUS_RADIUS: f32 = 0.5;
pub const TORUS_TUBE: f32 = 0.2;
pub const TORUS_RADIAL_SEGMENTS: u32 = 16;
pub const TORUS_TUBULAR_SEGMENTS: u32 = 100;
pub const BACKGROUND_SIZE: f32 = 2.0;

/// Interleaved vertex as uploaded to the GPU (attribute locations 0, 1, 2).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

/// Indexed triangle list.
#[derive(Clone, Debug, PartialEq)]
pub struct Geometry {
    pub label: &'static str,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl Geometry {
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }
}

/// Builds the foreground geometry for `shape`.
pub fn create_geometry(shape: ShapeKind) -> Geometry {
    let geometry = match shape {
        ShapeKind::Cube => cube(CUBE_SIZE),
        ShapeKind::Sphere => sphere(SPHERE_RADIUS, SPHERE_WIDTH_SEGMENTS, SPHERE_HEIGHT_SEGMENTS),
        ShapeKind::Torus => torus(
            TORUS_RADIUS,
            TORUS_TUBE,
            TORUS_RADIAL_SEGMENTS,
            TORUS_TUBULAR_SEGMENTS,
        ),
    };
    tracing::debug!(
        shape = %shape,
        vertices = geometry.vertex_count(),
        indices = geometry.index_count(),
        "built geometry"
    );
    geometry
}

/// Plane covering the whole of clip space, for the background pass.
pub fn background_plane() -> Geometry {
    let half = BACKGROUND_SIZE * 0.5;
    let normal = [0.0, 0.0, 1.0];
    let vertices = vec![
        Vertex {
            position: [-half, half, 0.0],
            normal,
            uv: [0.0, 1.0],
        },
        Vertex {
            position: [half, half, 0.0],
            normal,
            uv: [1.0, 1.0],
        },
        Vertex {
            position: [-half, -half, 0.0],
            normal,
            uv: [0.0, 0.0],
        },
        Vertex {
            position: [half, -half, 0.0],
            normal,
            uv: [1.0, 0.0],
        },
    ];
    Geometry {
        label: "background",
        vertices,
        indices: vec![0, 2, 1, 2, 3, 1],
    }
}

fn cube(size: f32) -> Geometry {
    let half = size * 0.5;
    // (normal, u axis, v axis) with u x v == normal.
    let faces = [
        (Vec3::X, Vec3::NEG_Z, Vec3::Y),
        (Vec3::NEG_X, Vec3::Z, Vec3::Y),
        (Vec3::Y, Vec3::X, Vec3::NEG_Z),
        (Vec3::NEG_Y, Vec3::X, Vec3::Z),
        (Vec3::Z, Vec3::X, Vec3::Y),
        (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, u_axis, v_axis) in faces {
        let base = vertices.len() as u32;
        let center = normal * half;
        for (u, v) in [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)] {
            let position = center + u_axis * (u - 0.5) * size + v_axis * (v - 0.5) * size;
            vertices.push(Vertex {
                position: position.to_array(),
                normal: normal.to_array(),
                uv: [u, v],
            });
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    Geometry {
        label: "cube",
        vertices,
        indices,
    }
}

fn sphere(radius: f32, width_segments: u32, height_segments: u32) -> Geometry {
    let row = width_segments + 1;
    let mut vertices = Vec::with_capacity((row * (height_segments + 1)) as usize);
    for iy in 0..=height_segments {
        let v = iy as f32 / height_segments as f32;
        for ix in 0..=width_segments {
            let u = ix as f32 / width_segments as f32;
            let position = Vec3::new(
                -radius * (u * TAU).cos() * (v * PI).sin(),
                radius * (v * PI).cos(),
                radius * (u * TAU).sin() * (v * PI).sin(),
            );
            vertices.push(Vertex {
                position: position.to_array(),
                normal: position.normalize_or_zero().to_array(),
                uv: [u, 1.0 - v],
            });
        }
    }

    let mut indices = Vec::new();
    for iy in 0..height_segments {
        for ix in 0..width_segments {
            let a = iy * row + ix + 1;
            let b = iy * row + ix;
            let c = (iy + 1) * row + ix;
            let d = (iy + 1) * row + ix + 1;
            // The poles collapse one triangle of each quad.
            if iy != 0 {
                indices.extend_from_slice(&[a, b, d]);
            }
            if iy != height_segments - 1 {
                indices.extend_from_slice(&[b, c, d]);
            }
        }
    }

    Geometry {
        label: "sphere",
        vertices,
        indices,
    }
}

fn torus(radius: f32, tube: f32, radial_segments: u32, tubular_segments: u32) -> Geometry {
    let row = tubular_segments + 1;
    let mut vertices = Vec::with_capacity((row * (radial_segments + 1)) as usize);
    for j in 0..=radial_segments {
        let v = j as f32 / radial_segments as f32 * TAU;
        for i in 0..=tubular_segments {
            let u = i as f32 / tubular_segments as f32 * TAU;
            let position = Vec3::new(
                (radius + tube * v.cos()) * u.cos(),
                (radius + tube * v.cos()) * u.sin(),
                tube * v.sin(),
            );
            let center = Vec3::new(radius * u.cos(), radius * u.sin(), 0.0);
            vertices.push(Vertex {
                position: position.to_array(),
                normal: (position - center).normalize_or_zero().to_array(),
                uv: [
                    i as f32 / tubular_segments as f32,
                    j as f32 / radial_segments as f32,
                ],
            });
        }
    }

    let mut indices = Vec::with_capacity((radial_segments * tubular_segments * 6) as usize);
    for j in 1..=radial_segments {
        for i in 1..=tubular_segments {
            let a = row * j + i - 1;
            let b = row * (j - 1) + i - 1;
            let c = row * (j - 1) + i;
            let d = row * j + i;
            indices.extend_from_slice(&[a, b, d, b, c, d]);
        }
    }

    Geometry {
        label: "torus",
        vertices,
        indices,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_indices_in_range(geometry: &Geometry) {
        let count = geometry.vertex_count() as u32;
        assert!(geometry.indices.iter().all(|&index| index < count));
        assert_eq!(geometry.index_count() % 3, 0);
    }

    #[test]
    fn documented_vertex_counts_hold() {
        let cube = create_geometry(ShapeKind::Cube);
        assert_eq!((cube.vertex_count(), cube.index_count()), (24, 36));

        let sphere = create_geometry(ShapeKind::Sphere);
        assert_eq!((sphere.vertex_count(), sphere.index_count()), (1089, 5952));

        let torus = create_geometry(ShapeKind::Torus);
        assert_eq!((torus.vertex_count(), torus.index_count()), (1717, 9600));

        let plane = background_plane();
        assert_eq!((plane.vertex_count(), plane.index_count()), (4, 6));

        for geometry in [&cube, &sphere, &torus, &plane] {
            assert_indices_in_range(geometry);
        }
    }

    #[test]
    fn cube_faces_wind_counter_clockwise_outwards() {
        let cube = create_geometry(ShapeKind::Cube);
        for triangle in cube.indices.chunks_exact(3) {
            let [a, b, c] = [0, 1, 2].map(|k| Vec3::from(cube.vertices[triangle[k] as usize].position));
            let face_normal = (b - a).cross(c - a).normalize();
            let stored = Vec3::from(cube.vertices[triangle[0] as usize].normal);
            assert!(face_normal.dot(stored) > 0.99);
        }
    }

    #[test]
    fn background_plane_faces_the_camera() {
        let plane = background_plane();
        for triangle in plane.indices.chunks_exact(3) {
            let [a, b, c] = [0, 1, 2].map(|k| Vec3::from(plane.vertices[triangle[k] as usize].position));
            assert!((b - a).cross(c - a).z > 0.0);
        }
    }

    #[test]
    fn sphere_normals_are_unit_length() {
        let sphere = create_geometry(ShapeKind::Sphere);
        for vertex in &sphere.vertices {
            let length = Vec3::from(vertex.normal).length();
            // Pole vertices sit on the axis; their normal is still radial.
            assert!((length - 1.0).abs() < 1e-4);
        }
    }
}
