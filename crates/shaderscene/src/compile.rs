//! Turns a WebGL-dialect vertex/fragment pair into a linked program.
//!
//! Steps performed for every submission (nothing is cached):
//!
//! 1. Scan both stages. `#version` and `precision` lines, the `position`,
//!    `normal`, and `uv` attributes, and non-opaque `uniform` declarations are
//!    removed statement by statement, leaving every line in place so
//!    diagnostics keep the submitted line numbers.
//!    `varying` declarations are collected and `gl_FragColor` is renamed.
//! 2. Build one std140 uniform block from the built-ins, the material's own
//!    uniforms, and whatever the stages declared.
//! 3. Prepend a GLSL 450 prelude to each stage and run it through naga's GLSL
//!    front end and validator. The vertex stage short-circuits the fragment
//!    stage, and both short-circuit linking.
//! 4. Link: check that the fragment stage only reads varyings the vertex stage
//!    writes, with matching types, and that shared uniforms agree.
//! 5. Hand the wrapped sources to the [`RenderDevice`], which creates the
//!    pipeline and may still reject it.

use std::fmt::Write as _;

use wgpu::naga;
use wgpu::naga::front::glsl;
use wgpu::naga::valid::{Capabilities, ValidationFlags, Validator};

use crate::device::{DepthMode, ProgramDescriptor, ProgramId, RenderDevice};
use crate::error::{
    DeviceError, PipelineError, ProgramStage, ShaderCompileError, ShaderLinkError, UniformError,
};
use crate::types::ShaderSourcePair;
use crate::uniforms::{
    UniformKind, UniformLayout, UniformSlot, UniformValue, UniformValues, BUILTIN_UNIFORMS, TIME,
};

const FRAG_COLOR_OUTPUT: &str = "shadergen_FragColor";
const VERTEX_ATTRIBUTES: [(&str, &str); 3] = [("position", "vec3"), ("normal", "vec3"), ("uv", "vec2")];

/// Per-material settings that do not come from shader source.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialDescriptor {
    pub label: String,
    pub depth: DepthMode,
    /// Uniforms the material always exposes, whether or not the source
    /// declares them.
    pub uniforms: Vec<(String, UniformKind)>,
}

impl MaterialDescriptor {
    /// Full-screen background: no depth test or writes, no extra uniforms.
    pub fn background() -> Self {
        Self {
            label: "background".to_string(),
            depth: DepthMode::DISABLED,
            uniforms: Vec::new(),
        }
    }

    /// Foreground mesh: opaque depth, animated `time` uniform.
    pub fn object() -> Self {
        Self {
            label: "object".to_string(),
            depth: DepthMode::OPAQUE,
            uniforms: vec![(TIME.to_string(), UniformKind::Float)],
        }
    }

    pub fn with_uniform(mut self, name: impl Into<String>, kind: UniformKind) -> Self {
        self.uniforms.push((name.into(), kind));
        self
    }
}

/// A pair that passed stage compilation and linking, ready for a device.
#[derive(Debug, Clone)]
pub struct TranslatedProgram {
    pub label: String,
    pub vertex_glsl: String,
    pub fragment_glsl: String,
    pub layout: UniformLayout,
    pub depth: DepthMode,
}

/// A linked program living on a [`RenderDevice`].
///
/// The device handle is released by consuming the program with
/// [`CompiledProgram::release`], so it can only happen once.
#[derive(Debug)]
pub struct CompiledProgram {
    id: ProgramId,
    label: String,
    depth: DepthMode,
    uniforms: UniformValues,
    released: bool,
}

impl CompiledProgram {
    pub fn id(&self) -> ProgramId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn depth(&self) -> DepthMode {
        self.depth
    }

    /// Where `name` lives in the uniform block, if the program declares it.
    pub fn uniform_slot(&self, name: &str) -> Option<UniformSlot> {
        self.uniforms.layout().slot(name)
    }

    pub fn uniforms(&self) -> &UniformValues {
        &self.uniforms
    }

    pub fn set_uniform(&mut self, name: &str, value: UniformValue) -> Result<(), UniformError> {
        self.uniforms.set(name, value)
    }

    /// Releases the device program.
    pub fn release<D: RenderDevice + ?Sized>(mut self, device: &mut D) -> Result<(), DeviceError> {
        self.released = true;
        tracing::trace!(program = %self.id, label = %self.label, "releasing program");
        device.release_program(self.id)
    }

    /// Marks the handle as released without telling the device, for callers
    /// that are about to drop every device resource at once.
    pub(crate) fn abandon(mut self) {
        self.released = true;
    }
}

impl Drop for CompiledProgram {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!(
                program = %self.id,
                label = %self.label,
                "compiled program dropped without release; its GPU handle is leaked"
            );
        }
    }
}

/// Compiles source pairs into [`CompiledProgram`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShaderProgramBuilder;

impl ShaderProgramBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Compiles and links `pair` on `device`.
    pub fn compile<D: RenderDevice + ?Sized>(
        &self,
        device: &mut D,
        pair: &ShaderSourcePair,
        material: &MaterialDescriptor,
    ) -> Result<CompiledProgram, PipelineError> {
        let translated = self.translate(pair, material)?;
        let descriptor = ProgramDescriptor {
            label: &translated.label,
            vertex_glsl: &translated.vertex_glsl,
            fragment_glsl: &translated.fragment_glsl,
            uniform_block_size: translated.layout.size() as u64,
            depth: translated.depth,
        };
        let id = device.create_program(&descriptor)?;
        tracing::debug!(
            program = %id,
            label = %translated.label,
            uniforms = translated.layout.len(),
            block_size = translated.layout.size(),
            "linked program"
        );
        Ok(CompiledProgram {
            id,
            label: translated.label,
            depth: translated.depth,
            uniforms: UniformValues::new(translated.layout),
            released: false,
        })
    }

    /// Runs every device-independent step: rewriting, stage compilation, and
    /// interface linking.
    pub fn translate(
        &self,
        pair: &ShaderSourcePair,
        material: &MaterialDescriptor,
    ) -> Result<TranslatedProgram, ShaderCompileError> {
        let vertex = scan_stage(&pair.vertex_source, StageRole::Vertex);
        let fragment = scan_stage(&pair.fragment_source, StageRole::Fragment);

        let mut layout = UniformLayout::with_builtins();
        for (name, kind) in &material.uniforms {
            layout.declare(name, *kind);
        }
        let base = layout.clone();

        let mut vertex_conflict = None;
        for decl in &vertex.uniforms {
            if let Some(existing) = layout.declare(&decl.name, decl.kind) {
                if existing != decl.kind && vertex_conflict.is_none() {
                    vertex_conflict = Some(builtin_conflict(decl, existing));
                }
            }
        }
        let mut fragment_conflict = None;
        let mut link_conflict = None;
        for decl in &fragment.uniforms {
            if let Some(existing) = layout.declare(&decl.name, decl.kind) {
                if existing == decl.kind {
                    continue;
                }
                if base.contains(&decl.name) {
                    fragment_conflict.get_or_insert_with(|| builtin_conflict(decl, existing));
                } else {
                    link_conflict.get_or_insert_with(|| {
                        format!(
                            "uniform '{}' is {} in the vertex stage but {} in the fragment stage",
                            decl.name, existing, decl.kind
                        )
                    });
                }
            }
        }

        let varyings = assign_varyings(&vertex.varyings, &fragment.varyings);

        vertex.check_supported()?;
        if let Some(message) = vertex_conflict {
            return Err(ShaderCompileError::new(ProgramStage::Vertex, message));
        }
        let (vertex_glsl, vertex_prelude) = wrap_stage(&vertex, &layout, &varyings);
        compile_stage(naga::ShaderStage::Vertex, &vertex_glsl, vertex_prelude)?;

        fragment.check_supported()?;
        if let Some(message) = fragment_conflict {
            return Err(ShaderCompileError::new(ProgramStage::Fragment, message));
        }
        let (fragment_glsl, fragment_prelude) = wrap_stage(&fragment, &layout, &varyings);
        compile_stage(naga::ShaderStage::Fragment, &fragment_glsl, fragment_prelude)?;

        if let Some(message) = link_conflict {
            return Err(ShaderLinkError { message }.into());
        }
        link_varyings(&vertex.varyings, &fragment.varyings)?;

        Ok(TranslatedProgram {
            label: material.label.clone(),
            vertex_glsl,
            fragment_glsl,
            layout,
            depth: material.depth,
        })
    }
}

fn builtin_conflict(decl: &UniformDecl, existing: UniformKind) -> String {
    format!(
        "uniform '{}' is declared as {} but is provided as {}",
        decl.name, decl.kind, existing
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StageRole {
    Vertex,
    Fragment,
}

impl StageRole {
    fn program_stage(self) -> ProgramStage {
        match self {
            StageRole::Vertex => ProgramStage::Vertex,
            StageRole::Fragment => ProgramStage::Fragment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct UniformDecl {
    name: String,
    kind: UniformKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Varying {
    name: String,
    ty: String,
}

#[derive(Debug)]
struct StageScan {
    role: StageRole,
    body: String,
    uniforms: Vec<UniformDecl>,
    varyings: Vec<Varying>,
    /// First declaration the rewriter cannot express, with its source line.
    unsupported: Option<String>,
}

impl StageScan {
    /// Records the declarations in one `;`-terminated statement. Returns
    /// whether the statement should be removed from the body.
    fn absorb(&mut self, statement: &str, line: usize) -> bool {
        let trimmed = statement.trim();
        if trimmed.starts_with("precision ") {
            return true;
        }

        if let Some((ty, declarators)) = parse_declaration(trimmed, "uniform") {
            let Some(kind) = UniformKind::from_glsl(ty) else {
                return false;
            };
            for declarator in declarators {
                match declarator {
                    Declarator::Plain(name) => self.uniforms.push(UniformDecl {
                        name: name.to_string(),
                        kind,
                    }),
                    Declarator::Array(name) => self.reject(
                        line,
                        format!("uniform array '{name}' is not supported; declare one uniform per element"),
                    ),
                }
            }
            return true;
        }

        if let Some((ty, declarators)) = parse_declaration(trimmed, "varying") {
            for declarator in declarators {
                match declarator {
                    Declarator::Plain(name) => self.varyings.push(Varying {
                        name: name.to_string(),
                        ty: ty.to_string(),
                    }),
                    Declarator::Array(name) => {
                        self.reject(line, format!("varying array '{name}' is not supported"))
                    }
                }
            }
            return true;
        }

        if let Some((_, declarators)) = parse_declaration(trimmed, "attribute") {
            return self.role == StageRole::Vertex
                && declarators.iter().all(|declarator| {
                    matches!(declarator, Declarator::Plain(name)
                        if VERTEX_ATTRIBUTES.iter().any(|(attr, _)| attr == name))
                });
        }

        false
    }

    fn reject(&mut self, line: usize, message: String) {
        self.unsupported
            .get_or_insert_with(|| format!("line {line}: {message}"));
    }

    fn check_supported(&self) -> Result<(), ShaderCompileError> {
        match &self.unsupported {
            Some(message) => Err(ShaderCompileError::new(
                self.role.program_stage(),
                message.clone(),
            )),
            None => Ok(()),
        }
    }
}

fn scan_stage(source: &str, role: StageRole) -> StageScan {
    let mut scan = StageScan {
        role,
        body: String::with_capacity(source.len() + 64),
        uniforms: Vec::new(),
        varyings: Vec::new(),
        unsupported: None,
    };

    for (index, line) in source.lines().enumerate() {
        if line.trim_start().starts_with("#version") {
            scan.body.push('\n');
            continue;
        }

        let (code, comment) = line.split_at(line.find("//").unwrap_or(line.len()));
        let mut kept = String::with_capacity(line.len());
        let mut statements = code.split(';').peekable();
        while let Some(statement) = statements.next() {
            if statements.peek().is_none() {
                kept.push_str(statement);
            } else if !scan.absorb(statement, index + 1) {
                kept.push_str(statement);
                kept.push(';');
            }
        }
        kept.push_str(comment);

        if role == StageRole::Fragment {
            scan.body
                .push_str(&kept.replace("gl_FragColor", FRAG_COLOR_OUTPUT));
        } else {
            scan.body.push_str(&kept);
        }
        scan.body.push('\n');
    }

    scan
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Declarator<'a> {
    Plain(&'a str),
    Array(&'a str),
}

impl<'a> Declarator<'a> {
    fn parse(raw: &'a str) -> Option<Self> {
        let raw = raw.trim();
        match raw.split_once('[') {
            Some((name, _)) => {
                let name = name.trim_end();
                is_identifier(name).then_some(Declarator::Array(name))
            }
            None => is_identifier(raw).then_some(Declarator::Plain(raw)),
        }
    }
}

/// Parses `<keyword> [precision] <type> <declarator>, ...` from a statement
/// with its `;` already removed.
fn parse_declaration<'a>(statement: &'a str, keyword: &str) -> Option<(&'a str, Vec<Declarator<'a>>)> {
    let rest = statement.trim().strip_prefix(keyword)?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let mut rest = rest.trim_start();
    for qualifier in ["lowp", "mediump", "highp"] {
        if let Some(stripped) = rest.strip_prefix(qualifier) {
            if stripped.starts_with(char::is_whitespace) {
                rest = stripped.trim_start();
                break;
            }
        }
    }
    let (ty, declarators) = rest.split_once(char::is_whitespace)?;
    if !is_identifier(ty) {
        return None;
    }
    let declarators = declarators
        .split(',')
        .map(Declarator::parse)
        .collect::<Option<Vec<_>>>()?;
    Some((ty, declarators))
}

fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    matches!(chars.next(), Some(first) if first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Vertex varyings keep declaration order; fragment-only names follow.
fn assign_varyings(vertex: &[Varying], fragment: &[Varying]) -> Vec<String> {
    let mut names: Vec<String> = vertex.iter().map(|varying| varying.name.clone()).collect();
    for varying in fragment {
        if !names.contains(&varying.name) {
            names.push(varying.name.clone());
        }
    }
    names
}

fn wrap_stage(scan: &StageScan, layout: &UniformLayout, varyings: &[String]) -> (String, usize) {
    let mut prelude = String::from("#version 450\n");

    // Anonymous block: members are plain globals that locals may shadow.
    let _ = writeln!(
        prelude,
        "layout(std140, set = 0, binding = 0) uniform ShadergenUniforms {{"
    );
    for (name, slot) in layout.iter() {
        let _ = writeln!(prelude, "    {} {};", slot.kind, name);
    }
    let _ = writeln!(prelude, "}};");

    let location = |name: &str| {
        varyings
            .iter()
            .position(|candidate| candidate == name)
            .unwrap_or_default()
    };

    match scan.role {
        StageRole::Vertex => {
            for (index, (name, ty)) in VERTEX_ATTRIBUTES.iter().enumerate() {
                let _ = writeln!(prelude, "layout(location = {index}) in {ty} {name};");
            }
            for varying in &scan.varyings {
                let _ = writeln!(
                    prelude,
                    "layout(location = {}) out {} {};",
                    location(&varying.name),
                    varying.ty,
                    varying.name
                );
            }
        }
        StageRole::Fragment => {
            for varying in &scan.varyings {
                let _ = writeln!(
                    prelude,
                    "layout(location = {}) in {} {};",
                    location(&varying.name),
                    varying.ty,
                    varying.name
                );
            }
            let _ = writeln!(prelude, "layout(location = 0) out vec4 {FRAG_COLOR_OUTPUT};");
        }
    }

    let prelude_lines = prelude.lines().count();
    prelude.push_str(&scan.body);
    (prelude, prelude_lines)
}

fn compile_stage(
    stage: naga::ShaderStage,
    wrapped: &str,
    prelude_lines: usize,
) -> Result<naga::Module, ShaderCompileError> {
    let program_stage = if stage == naga::ShaderStage::Vertex {
        ProgramStage::Vertex
    } else {
        ProgramStage::Fragment
    };

    let mut frontend = glsl::Frontend::default();
    let module = frontend
        .parse(&glsl::Options::from(stage), wrapped)
        .map_err(|errors| {
            let message = errors
                .errors
                .iter()
                .map(|error| {
                    let location = error.meta.location(wrapped);
                    let line = (location.line_number as usize).saturating_sub(prelude_lines);
                    if line == 0 {
                        error.kind.to_string()
                    } else {
                        format!("line {line}: {}", error.kind)
                    }
                })
                .collect::<Vec<_>>()
                .join("; ");
            tracing::debug!(stage = %program_stage, %message, "stage failed to parse");
            ShaderCompileError::new(program_stage, message)
        })?;

    Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|err| {
            ShaderCompileError::new(program_stage, format!("validation failed: {}", err.as_inner()))
        })?;

    Ok(module)
}

fn link_varyings(vertex: &[Varying], fragment: &[Varying]) -> Result<(), ShaderLinkError> {
    for input in fragment {
        match vertex.iter().find(|output| output.name == input.name) {
            None => {
                return Err(ShaderLinkError {
                    message: format!(
                        "varying '{}' is read by the fragment stage but never written by the vertex stage",
                        input.name
                    ),
                })
            }
            Some(output) if output.ty != input.ty => {
                return Err(ShaderLinkError {
                    message: format!(
                        "varying '{}' is {} in the vertex stage but {} in the fragment stage",
                        input.name, output.ty, input.ty
                    ),
                })
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Names of the uniforms every program exposes.
pub fn builtin_uniform_names() -> impl Iterator<Item = &'static str> {
    BUILTIN_UNIFORMS.iter().map(|(name, _)| *name)
}
