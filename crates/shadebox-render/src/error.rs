// SPDX-License-Identifier: CEPL-1.0
//! Recoverable error kinds. Device-level failures live with the backend and
//! are never represented here.
use crate::shader::ShaderStage;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpirvError {
    #[error("SPIR-V binary is {len} bytes, not a whole number of words")]
    Misaligned { len: usize },
    #[error("SPIR-V binary holds {words} words, too short for a module header")]
    Truncated { words: usize },
    #[error("bad SPIR-V magic number {found:#010x}")]
    BadMagic { found: u32 },
    #[error("malformed SPIR-V instruction at word {offset}")]
    MalformedInstruction { offset: usize },
    #[error("module has no {stage} entry point named `{name}`")]
    MissingEntryPoint { stage: ShaderStage, name: String },
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("{}: not a shader source the compiler understands", path.display())]
    UnknownKind { path: PathBuf },
    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: {message}", path.display())]
    Compiler { path: PathBuf, message: String },
    #[error("prebuilt artifact {} does not exist", path.display())]
    MissingArtifact { path: PathBuf },
    #[error("shader compiler unavailable: {0}")]
    Unavailable(String),
}

/// A shader selection could not produce a loadable program.
#[derive(Debug, Error)]
pub enum ShaderBuildError {
    #[error("no fragment shader found for {}", path.display())]
    Unresolved { path: PathBuf },
    #[error("{}: unrecognised shader file type", path.display())]
    UnknownKind { path: PathBuf },
    #[error("fragment artifact {} is missing", path.display())]
    MissingFragment { path: PathBuf },
    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{} is not a usable SPIR-V module", path.display())]
    InvalidArtifact {
        path: PathBuf,
        #[source]
        source: SpirvError,
    },
    #[error(transparent)]
    Compile(#[from] CompileError),
}

/// The backend refused a program; whatever was active before stays active.
#[derive(Debug, Error)]
#[error("pipeline rebuild for `{shader}` failed, keeping the active pipeline")]
pub struct PipelineRebuildError {
    pub shader: String,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error(transparent)]
    Rebuild(#[from] PipelineRebuildError),
    /// The device failed while draining or rebuilding. Not recoverable.
    #[error(transparent)]
    Fatal(anyhow::Error),
}
