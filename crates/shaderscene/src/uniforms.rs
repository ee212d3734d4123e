//! std140 uniform blocks shared by both stages of a program.
//!
//! Every program gets exactly one block at `set = 0, binding = 0`. The block
//! starts with the built-in camera/model uniforms and is followed by the
//! material's own uniforms in declaration order. [`UniformLayout`] mirrors the
//! std140 offsets so [`UniformValues`] can be written straight into the GPU
//! buffer each frame.

use std::fmt;

use crate::error::UniformError;

/// Scalar, vector, and matrix types allowed inside the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformKind {
    Float,
    Int,
    Vec2,
    Vec3,
    Vec4,
    Mat3,
    Mat4,
}

impl UniformKind {
    /// Maps a GLSL type name onto a block-compatible kind. Opaque types
    /// (samplers, images) return `None`.
    pub fn from_glsl(name: &str) -> Option<Self> {
        match name {
            "float" => Some(UniformKind::Float),
            "int" => Some(UniformKind::Int),
            "vec2" => Some(UniformKind::Vec2),
            "vec3" => Some(UniformKind::Vec3),
            "vec4" => Some(UniformKind::Vec4),
            "mat3" => Some(UniformKind::Mat3),
            "mat4" => Some(UniformKind::Mat4),
            _ => None,
        }
    }

    pub fn glsl_name(self) -> &'static str {
        match self {
            UniformKind::Float => "float",
            UniformKind::Int => "int",
            UniformKind::Vec2 => "vec2",
            UniformKind::Vec3 => "vec3",
            UniformKind::Vec4 => "vec4",
            UniformKind::Mat3 => "mat3",
            UniformKind::Mat4 => "mat4",
        }
    }

    /// std140 base alignment in bytes.
    fn alignment(self) -> usize {
        match self {
            UniformKind::Float | UniformKind::Int => 4,
            UniformKind::Vec2 => 8,
            UniformKind::Vec3 | UniformKind::Vec4 | UniformKind::Mat3 | UniformKind::Mat4 => 16,
        }
    }

    /// std140 size in bytes. Matrix columns are padded to vec4.
    fn size(self) -> usize {
        match self {
            UniformKind::Float | UniformKind::Int => 4,
            UniformKind::Vec2 => 8,
            UniformKind::Vec3 => 12,
            UniformKind::Vec4 => 16,
            UniformKind::Mat3 => 48,
            UniformKind::Mat4 => 64,
        }
    }
}

impl fmt::Display for UniformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.glsl_name())
    }
}

/// A value destined for one uniform slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    /// Column-major.
    Mat3([[f32; 3]; 3]),
    /// Column-major.
    Mat4([[f32; 4]; 4]),
}

impl UniformValue {
    pub fn kind(&self) -> UniformKind {
        match self {
            UniformValue::Float(_) => UniformKind::Float,
            UniformValue::Int(_) => UniformKind::Int,
            UniformValue::Vec2(_) => UniformKind::Vec2,
            UniformValue::Vec3(_) => UniformKind::Vec3,
            UniformValue::Vec4(_) => UniformKind::Vec4,
            UniformValue::Mat3(_) => UniformKind::Mat3,
            UniformValue::Mat4(_) => UniformKind::Mat4,
        }
    }

    fn write_into(&self, dst: &mut [u8]) {
        match self {
            UniformValue::Float(value) => dst[..4].copy_from_slice(bytemuck::bytes_of(value)),
            UniformValue::Int(value) => dst[..4].copy_from_slice(bytemuck::bytes_of(value)),
            UniformValue::Vec2(value) => dst[..8].copy_from_slice(bytemuck::cast_slice(value)),
            UniformValue::Vec3(value) => dst[..12].copy_from_slice(bytemuck::cast_slice(value)),
            UniformValue::Vec4(value) => dst[..16].copy_from_slice(bytemuck::cast_slice(value)),
            UniformValue::Mat3(columns) => {
                for (index, column) in columns.iter().enumerate() {
                    let start = index * 16;
                    dst[start..start + 12].copy_from_slice(bytemuck::cast_slice(column));
                }
            }
            UniformValue::Mat4(columns) => {
                for (index, column) in columns.iter().enumerate() {
                    let start = index * 16;
                    dst[start..start + 16].copy_from_slice(bytemuck::cast_slice(column));
                }
            }
        }
    }
}

pub const PROJECTION_MATRIX: &str = "projectionMatrix";
pub const MODEL_VIEW_MATRIX: &str = "modelViewMatrix";
pub const MODEL_MATRIX: &str = "modelMatrix";
pub const VIEW_MATRIX: &str = "viewMatrix";
pub const NORMAL_MATRIX: &str = "normalMatrix";
pub const CAMERA_POSITION: &str = "cameraPosition";
pub const RESOLUTION: &str = "resolution";
pub const TIME: &str = "time";

/// Uniforms every program receives regardless of what its source declares.
pub const BUILTIN_UNIFORMS: [(&str, UniformKind); 7] = [
    (PROJECTION_MATRIX, UniformKind::Mat4),
    (MODEL_VIEW_MATRIX, UniformKind::Mat4),
    (MODEL_MATRIX, UniformKind::Mat4),
    (VIEW_MATRIX, UniformKind::Mat4),
    (NORMAL_MATRIX, UniformKind::Mat3),
    (CAMERA_POSITION, UniformKind::Vec3),
    (RESOLUTION, UniformKind::Vec2),
];

/// Location of one uniform inside the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformSlot {
    pub offset: usize,
    pub kind: UniformKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct UniformEntry {
    name: String,
    slot: UniformSlot,
}

/// Ordered std140 layout of a program's uniform block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformLayout {
    entries: Vec<UniformEntry>,
    end: usize,
}

impl UniformLayout {
    /// An empty layout with no members.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            end: 0,
        }
    }

    /// A layout holding only the built-in uniforms.
    pub fn with_builtins() -> Self {
        let mut layout = Self::empty();
        for (name, kind) in BUILTIN_UNIFORMS {
            layout.push(name, kind);
        }
        layout
    }

    /// Appends `name` if it is not declared yet. Returns the existing kind when
    /// the name is already present, so callers can detect conflicts.
    pub fn declare(&mut self, name: &str, kind: UniformKind) -> Option<UniformKind> {
        if let Some(existing) = self.slot(name) {
            return Some(existing.kind);
        }
        self.push(name, kind);
        None
    }

    fn push(&mut self, name: &str, kind: UniformKind) {
        let offset = align_up(self.end, kind.alignment());
        self.entries.push(UniformEntry {
            name: name.to_string(),
            slot: UniformSlot { offset, kind },
        });
        self.end = offset + kind.size();
    }

    pub fn slot(&self, name: &str) -> Option<UniformSlot> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.slot)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slot(name).is_some()
    }

    /// Members in block order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, UniformSlot)> {
        self.entries
            .iter()
            .map(|entry| (entry.name.as_str(), entry.slot))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Buffer size in bytes, padded to a 16 byte multiple and never zero.
    pub fn size(&self) -> usize {
        align_up(self.end, 16).max(16)
    }
}

impl Default for UniformLayout {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// CPU-side image of a uniform block, ready to upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformValues {
    layout: UniformLayout,
    bytes: Vec<u8>,
}

impl UniformValues {
    /// Zero-initialised values for `layout`.
    pub fn new(layout: UniformLayout) -> Self {
        let bytes = vec![0; layout.size()];
        Self { layout, bytes }
    }

    pub fn layout(&self) -> &UniformLayout {
        &self.layout
    }

    pub fn set(&mut self, name: &str, value: UniformValue) -> Result<(), UniformError> {
        let slot = self
            .layout
            .slot(name)
            .ok_or_else(|| UniformError::Unknown(name.to_string()))?;
        if slot.kind != value.kind() {
            return Err(UniformError::KindMismatch {
                name: name.to_string(),
                declared: slot.kind,
                given: value.kind(),
            });
        }
        value.write_into(&mut self.bytes[slot.offset..]);
        Ok(())
    }

    /// Reads back a float uniform. Returns `None` for undeclared or
    /// non-float names.
    pub fn get_float(&self, name: &str) -> Option<f32> {
        let slot = self.layout.slot(name)?;
        if slot.kind != UniformKind::Float {
            return None;
        }
        let raw = &self.bytes[slot.offset..slot.offset + 4];
        Some(f32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

fn align_up(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_layout_follows_std140() {
        let layout = UniformLayout::with_builtins();
        assert_eq!(layout.slot(PROJECTION_MATRIX).unwrap().offset, 0);
        assert_eq!(layout.slot(VIEW_MATRIX).unwrap().offset, 192);
        assert_eq!(layout.slot(NORMAL_MATRIX).unwrap().offset, 256);
        assert_eq!(layout.slot(CAMERA_POSITION).unwrap().offset, 304);
        assert_eq!(layout.slot(RESOLUTION).unwrap().offset, 320);
        assert_eq!(layout.size(), 336);
    }

    #[test]
    fn float_packs_after_vec3() {
        let mut layout = UniformLayout::empty();
        layout.declare("tint", UniformKind::Vec3);
        layout.declare("time", UniformKind::Float);
        assert_eq!(layout.slot("time").unwrap().offset, 12);
        assert_eq!(layout.size(), 16);
    }

    #[test]
    fn redeclaring_reports_existing_kind() {
        let mut layout = UniformLayout::with_builtins();
        assert_eq!(layout.declare(TIME, UniformKind::Float), None);
        assert_eq!(
            layout.declare(TIME, UniformKind::Vec2),
            Some(UniformKind::Float)
        );
        assert_eq!(layout.len(), BUILTIN_UNIFORMS.len() + 1);
    }

    #[test]
    fn values_round_trip_floats_and_reject_mismatches() {
        let mut layout = UniformLayout::with_builtins();
        layout.declare(TIME, UniformKind::Float);
        let mut values = UniformValues::new(layout);

        values.set(TIME, UniformValue::Float(1.5)).unwrap();
        assert_eq!(values.get_float(TIME), Some(1.5));

        let err = values.set(TIME, UniformValue::Int(3)).unwrap_err();
        assert!(matches!(err, UniformError::KindMismatch { .. }));
        let err = values.set("speed", UniformValue::Float(1.0)).unwrap_err();
        assert_eq!(err, UniformError::Unknown("speed".into()));
    }

    #[test]
    fn mat3_columns_are_padded() {
        let mut layout = UniformLayout::empty();
        layout.declare("m", UniformKind::Mat3);
        let mut values = UniformValues::new(layout);
        values
            .set(
                "m",
                UniformValue::Mat3([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]),
            )
            .unwrap();
        let floats: Vec<f32> = values
            .as_bytes()
            .chunks_exact(4)
            .map(|chunk| f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        assert_eq!(&floats[0..4], &[1.0, 2.0, 3.0, 0.0]);
        assert_eq!(&floats[4..8], &[4.0, 5.0, 6.0, 0.0]);
        assert_eq!(&floats[8..11], &[7.0, 8.0, 9.0]);
    }
}
