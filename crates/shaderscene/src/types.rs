use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::de::{self, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer};

use crate::error::InvalidShapeError;

/// Vertex and fragment source text for one material.
///
/// Sources are written in the WebGL `ShaderMaterial` dialect; see
/// [`crate::compile`] for the rewriting applied before compilation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShaderSourcePair {
    pub vertex_source: String,
    pub fragment_source: String,
}

impl ShaderSourcePair {
    pub fn new(vertex_source: impl Into<String>, fragment_source: impl Into<String>) -> Self {
        Self {
            vertex_source: vertex_source.into(),
            fragment_source: fragment_source.into(),
        }
    }
}

/// One complete request to (re)build the scene.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ShaderSubmission {
    /// Full-screen background material.
    pub background: ShaderSourcePair,
    /// Material applied to the foreground mesh.
    pub object: ShaderSourcePair,
    /// Geometry used for the foreground mesh.
    #[serde(default)]
    pub shape: ShapeKind,
}

/// Foreground geometry selector.
///
/// Deserialization never fails: unknown names and non-string values fall back
/// to the default shape with a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ShapeKind {
    #[default]
    Cube,
    Sphere,
    Torus,
}

impl ShapeKind {
    pub const ALL: [ShapeKind; 3] = [ShapeKind::Cube, ShapeKind::Sphere, ShapeKind::Torus];

    pub fn name(self) -> &'static str {
        match self {
            ShapeKind::Cube => "cube",
            ShapeKind::Sphere => "sphere",
            ShapeKind::Torus => "torus",
        }
    }

    /// Parses a shape name, falling back to the default shape for anything
    /// unrecognised.
    pub fn from_name_lossy(name: &str) -> Self {
        match name.parse() {
            Ok(shape) => shape,
            Err(err) => {
                tracing::warn!(error = %err, fallback = %ShapeKind::default(), "using default shape");
                ShapeKind::default()
            }
        }
    }
}

impl FromStr for ShapeKind {
    type Err = InvalidShapeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        ShapeKind::ALL
            .into_iter()
            .find(|shape| shape.name().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| InvalidShapeError {
                name: trimmed.to_string(),
            })
    }
}

impl<'de> Deserialize<'de> for ShapeKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ShapeVisitor)
    }
}

struct ShapeVisitor;

impl ShapeVisitor {
    fn fallback(found: &str) -> ShapeKind {
        tracing::warn!(found, fallback = %ShapeKind::default(), "shape is not a name; using default shape");
        ShapeKind::default()
    }
}

impl<'de> Visitor<'de> for ShapeVisitor {
    type Value = ShapeKind;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a shape name")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<ShapeKind, E> {
        Ok(ShapeKind::from_name_lossy(value))
    }

    fn visit_unit<E: de::Error>(self) -> Result<ShapeKind, E> {
        Ok(Self::fallback("null"))
    }

    fn visit_none<E: de::Error>(self) -> Result<ShapeKind, E> {
        Ok(Self::fallback("null"))
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<ShapeKind, D::Error> {
        ShapeKind::deserialize(deserializer)
    }

    fn visit_bool<E: de::Error>(self, _: bool) -> Result<ShapeKind, E> {
        Ok(Self::fallback("boolean"))
    }

    fn visit_i64<E: de::Error>(self, _: i64) -> Result<ShapeKind, E> {
        Ok(Self::fallback("number"))
    }

    fn visit_u64<E: de::Error>(self, _: u64) -> Result<ShapeKind, E> {
        Ok(Self::fallback("number"))
    }

    fn visit_f64<E: de::Error>(self, _: f64) -> Result<ShapeKind, E> {
        Ok(Self::fallback("number"))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<ShapeKind, A::Error> {
        while seq.next_element::<IgnoredAny>()?.is_some() {}
        Ok(Self::fallback("array"))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<ShapeKind, A::Error> {
        while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
        Ok(Self::fallback("object"))
    }
}

impl fmt::Display for ShapeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Size of the drawable the scene is presented on, in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTarget {
    pub width: u32,
    pub height: u32,
}

impl RenderTarget {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn aspect(&self) -> f32 {
        self.width.max(1) as f32 / self.height.max(1) as f32
    }
}

/// Where the scene clock gets its time from.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ClockMode {
    /// Monotonic wall-clock time since the render loop started.
    #[default]
    System,
    /// Advance by a fixed step every frame, independent of wall-clock time.
    FixedStep(Duration),
}

/// Tunables for scene construction and animation.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneOptions {
    /// Radians added to the object's X and Y rotation every frame.
    pub rotation_step: f32,
    /// Vertical field of view of the perspective camera, in degrees.
    pub fov_degrees: f32,
    /// Distance of the camera from the origin along +Z.
    pub camera_distance: f32,
    /// Colour the surface is cleared to before the background draws.
    pub clear_color: [f64; 4],
    /// Time source for the `time` uniform.
    pub clock: ClockMode,
}

impl SceneOptions {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for SceneOptions {
    fn default() -> Self {
        Self {
            rotation_step: 0.01,
            fov_degrees: 75.0,
            camera_distance: 3.0,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            clock: ClockMode::System,
        }
    }
}

/// Adapter selection preference for the wgpu device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GpuPowerPreference {
    #[default]
    Low,
    High,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_names_parse_case_insensitively() {
        assert_eq!("Torus".parse::<ShapeKind>().unwrap(), ShapeKind::Torus);
        assert_eq!(" sphere ".parse::<ShapeKind>().unwrap(), ShapeKind::Sphere);
    }

    #[test]
    fn unknown_shape_is_an_error_when_strict() {
        let err = "dodecahedron".parse::<ShapeKind>().unwrap_err();
        assert_eq!(err.name, "dodecahedron");
    }

    #[test]
    fn unknown_shape_falls_back_when_lossy() {
        assert_eq!(ShapeKind::from_name_lossy("pyramid"), ShapeKind::Cube);
    }

    #[test]
    fn submission_deserialises_with_default_shape() {
        let json = r#"{
            "background": {"vertexSource": "bv", "fragmentSource": "bf"},
            "object": {"vertexSource": "ov", "fragmentSource": "of"}
        }"#;
        let submission: ShaderSubmission = serde_json::from_str(json).unwrap();
        assert_eq!(submission.shape, ShapeKind::Cube);
        assert_eq!(submission.object.fragment_source, "of");
    }

    #[test]
    fn submission_with_unknown_shape_still_deserialises() {
        let json = r#"{
            "background": {"vertexSource": "bv", "fragmentSource": "bf"},
            "object": {"vertexSource": "ov", "fragmentSource": "of"},
            "shape": "klein-bottle"
        }"#;
        let submission: ShaderSubmission = serde_json::from_str(json).unwrap();
        assert_eq!(submission.shape, ShapeKind::Cube);
    }

    #[test]
    fn non_string_shapes_fall_back_to_cube() {
        for shape in ["null", "3", "true", "[\"torus\"]", "{\"name\": \"torus\"}"] {
            let json = format!(
                r#"{{
                    "background": {{"vertexSource": "bv", "fragmentSource": "bf"}},
                    "object": {{"vertexSource": "ov", "fragmentSource": "of"}},
                    "shape": {shape}
                }}"#
            );
            let submission: ShaderSubmission = serde_json::from_str(&json).unwrap();
            assert_eq!(submission.shape, ShapeKind::Cube, "{shape}");
        }
    }

    #[test]
    fn shape_names_deserialise_case_insensitively() {
        let shape: ShapeKind = serde_json::from_str("\"Sphere\"").unwrap();
        assert_eq!(shape, ShapeKind::Sphere);
    }

    #[test]
    fn render_target_aspect_guards_zero_height() {
        assert_eq!(RenderTarget::new(400, 0).aspect(), 400.0);
        assert_eq!(RenderTarget::new(800, 400).aspect(), 2.0);
    }
}
