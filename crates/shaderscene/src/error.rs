use std::fmt;

use crate::uniforms::UniformKind;

/// Step of program construction a diagnostic belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramStage {
    Vertex,
    Fragment,
    Link,
}

impl fmt::Display for ProgramStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgramStage::Vertex => f.write_str("vertex"),
            ProgramStage::Fragment => f.write_str("fragment"),
            ProgramStage::Link => f.write_str("link"),
        }
    }
}

/// A shader pair could not be turned into a program.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("could not compile {stage} stage: {message}")]
pub struct ShaderCompileError {
    pub stage: ProgramStage,
    pub message: String,
}

impl ShaderCompileError {
    pub fn new(stage: ProgramStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

/// Both stages compiled but their interfaces do not fit together.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("could not link program: {message}")]
pub struct ShaderLinkError {
    pub message: String,
}

impl From<ShaderLinkError> for ShaderCompileError {
    fn from(err: ShaderLinkError) -> Self {
        ShaderCompileError::new(ProgramStage::Link, err.message)
    }
}

/// The device could not allocate a resource.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("GPU resources exhausted while allocating {resource}: {message}")]
pub struct ResourceExhaustedError {
    pub resource: String,
    pub message: String,
}

/// A shape name outside the supported set. Recovered by falling back to the
/// default shape; never surfaced from a submission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown shape '{name}'")]
pub struct InvalidShapeError {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UniformError {
    #[error("uniform '{0}' is not declared by this material")]
    Unknown(String),
    #[error("uniform '{name}' is declared as {declared} but was given a {given}")]
    KindMismatch {
        name: String,
        declared: UniformKind,
        given: UniformKind,
    },
}

/// Failures reported by a [`crate::RenderDevice`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error(transparent)]
    Exhausted(#[from] ResourceExhaustedError),
    #[error("device rejected {stage} stage: {message}")]
    Rejected { stage: ProgramStage, message: String },
    #[error("unknown {kind} handle {id}")]
    UnknownHandle { kind: &'static str, id: u64 },
    #[error("surface error: {0}")]
    Surface(String),
    #[error("device lost: {0}")]
    Lost(String),
}

/// Result of a failed [`crate::SceneLifecycleController`] operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Compile(#[from] ShaderCompileError),
    #[error(transparent)]
    ResourceExhausted(#[from] ResourceExhaustedError),
    #[error("device error: {0}")]
    Device(DeviceError),
    #[error("scene teardown failed ({} release error(s)); a full reset is required: {}", .0.len(), .0.first().map(ToString::to_string).unwrap_or_default())]
    Teardown(Vec<DeviceError>),
    #[error("controller is faulted after a failed teardown; call reset() first")]
    ResetRequired,
}

impl PipelineError {
    /// The failing stage when this is a compile or link error.
    pub fn stage(&self) -> Option<ProgramStage> {
        match self {
            PipelineError::Compile(err) => Some(err.stage),
            _ => None,
        }
    }
}

impl From<DeviceError> for PipelineError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::Exhausted(inner) => PipelineError::ResourceExhausted(inner),
            DeviceError::Rejected { stage, message } => {
                PipelineError::Compile(ShaderCompileError::new(stage, message))
            }
            other => PipelineError::Device(other),
        }
    }
}
