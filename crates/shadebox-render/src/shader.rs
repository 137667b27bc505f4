// SPDX-License-Identifier: CEPL-1.0
//! Turning a user-supplied path into a loadable shader program.
//!
//! File names are inspected exactly once, in [`ShaderRole::classify`] and
//! [`ShaderSelection::resolve`]; everything downstream works with the
//! resolved selection and never looks at extensions again.
use crate::compiler::ShaderCompiler;
use crate::error::ShaderBuildError;
use crate::spirv::SpirvModule;
use crate::texture;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const FRAGMENT_EXTENSIONS: [&str; 3] = ["frag", "fsh", "glsl"];
pub const VERTEX_EXTENSIONS: [&str; 2] = ["vsh", "vert"];
pub const GEOMETRY_EXTENSIONS: [&str; 2] = ["gsh", "geom"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Geometry,
    Fragment,
}

impl ShaderStage {
    pub const ALL: [ShaderStage; 3] = [
        ShaderStage::Vertex,
        ShaderStage::Geometry,
        ShaderStage::Fragment,
    ];

    /// SPIR-V `ExecutionModel` operand.
    pub const fn execution_model(self) -> u32 {
        match self {
            ShaderStage::Vertex => 0,
            ShaderStage::Geometry => 3,
            ShaderStage::Fragment => 4,
        }
    }

    /// Middle component of `<base>.<suffix>.spv`.
    pub const fn spv_suffix(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vert",
            ShaderStage::Geometry => "geom",
            ShaderStage::Fragment => "frag",
        }
    }

    fn from_spv_suffix(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.spv_suffix() == s)
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Geometry => "geometry",
            ShaderStage::Fragment => "fragment",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderRole {
    Fragment,
    Vertex,
    Geometry,
    /// A `<base>.<stage>.spv` artifact; nothing to compile.
    Compiled(ShaderStage),
}

impl ShaderRole {
    pub fn classify(path: &Path) -> Option<ShaderRole> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if ext == "spv" {
            let stem = Path::new(path.file_stem()?);
            let stage = stem.extension()?.to_str()?.to_ascii_lowercase();
            return ShaderStage::from_spv_suffix(&stage).map(ShaderRole::Compiled);
        }
        let ext = ext.as_str();
        if FRAGMENT_EXTENSIONS.contains(&ext) {
            Some(ShaderRole::Fragment)
        } else if VERTEX_EXTENSIONS.contains(&ext) {
            Some(ShaderRole::Vertex)
        } else if GEOMETRY_EXTENSIONS.contains(&ext) {
            Some(ShaderRole::Geometry)
        } else {
            None
        }
    }

    pub fn stage(self) -> ShaderStage {
        match self {
            ShaderRole::Fragment => ShaderStage::Fragment,
            ShaderRole::Vertex => ShaderStage::Vertex,
            ShaderRole::Geometry => ShaderStage::Geometry,
            ShaderRole::Compiled(stage) => stage,
        }
    }
}

/// Path of the artifact the compiler writes for `source` in `stage`.
pub fn artifact_path(source: &Path, stage: ShaderStage) -> PathBuf {
    let dir = source.parent().unwrap_or_else(|| Path::new(""));
    let base = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.join(format!("{base}.{}.spv", stage.spv_suffix()))
}

/// A fragment shader plus whatever sibling stages sit next to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderSelection {
    /// Fragment source, or the fragment artifact for [`ShaderRole::Compiled`].
    pub fragment: PathBuf,
    pub role: ShaderRole,
    pub vertex: Option<PathBuf>,
    pub geometry: Option<PathBuf>,
    dir: PathBuf,
    base: String,
}

impl ShaderSelection {
    pub fn resolve(path: &Path) -> Result<Self, ShaderBuildError> {
        let path = strip_trailing_dot(path);
        let path = if path.extension().is_some() {
            path
        } else {
            find_with_extension(&path, &FRAGMENT_EXTENSIONS)
                .ok_or(ShaderBuildError::Unresolved { path })?
        };

        let role = ShaderRole::classify(&path)
            .ok_or_else(|| ShaderBuildError::UnknownKind { path: path.clone() })?;
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

        match role {
            ShaderRole::Fragment => Ok(Self::from_fragment_source(path, dir)),
            ShaderRole::Vertex | ShaderRole::Geometry => {
                let fragment = find_with_extension(&path, &["frag", "fsh"])
                    .ok_or(ShaderBuildError::Unresolved { path })?;
                Ok(Self::from_fragment_source(fragment, dir))
            }
            ShaderRole::Compiled(_) => {
                // foo.vert.spv -> foo
                let base = Path::new(path.file_stem().unwrap_or_default())
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let fragment = dir.join(format!("{base}.frag.spv"));
                Ok(Self {
                    fragment,
                    role: ShaderRole::Compiled(ShaderStage::Fragment),
                    vertex: None,
                    geometry: None,
                    dir,
                    base,
                })
            }
        }
    }

    fn from_fragment_source(fragment: PathBuf, dir: PathBuf) -> Self {
        let base = fragment
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let sibling = |exts: &[&str]| {
            exts.iter()
                .map(|ext| dir.join(format!("{base}.{ext}")))
                .find(|p| p.is_file())
        };
        let vertex = sibling(&VERTEX_EXTENSIONS);
        let geometry = sibling(&GEOMETRY_EXTENSIONS);
        Self {
            fragment,
            role: ShaderRole::Fragment,
            vertex,
            geometry,
            dir,
            base,
        }
    }

    pub fn base_name(&self) -> &str {
        &self.base
    }

    /// Where the discovery contract expects the binary for `stage`.
    pub fn artifact(&self, stage: ShaderStage) -> PathBuf {
        self.dir
            .join(format!("{}.{}.spv", self.base, stage.spv_suffix()))
    }

    /// Compiles whatever sources the selection has, then loads the binaries.
    pub fn build(&self, compiler: &dyn ShaderCompiler) -> Result<ShaderProgram, ShaderBuildError> {
        if self.role == ShaderRole::Fragment {
            compiler.compile(&self.fragment)?;
            for source in self.vertex.iter().chain(self.geometry.iter()) {
                compiler.compile(source)?;
            }
        }
        ShaderProgram::load(self)
    }
}

fn strip_trailing_dot(path: &Path) -> PathBuf {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) if name.len() > 1 && name.ends_with('.') => {
            path.with_file_name(name.trim_end_matches('.'))
        }
        _ => path.to_path_buf(),
    }
}

fn find_with_extension(path: &Path, exts: &[&str]) -> Option<PathBuf> {
    exts.iter()
        .map(|ext| path.with_extension(ext))
        .find(|p| p.is_file())
}

/// Binaries for every stage of one shader unit, validated as SPIR-V.
#[derive(Clone, Debug)]
pub struct ShaderProgram {
    pub name: String,
    pub fragment: SpirvModule,
    pub vertex: Option<SpirvModule>,
    pub geometry: Option<SpirvModule>,
    /// Identity of the program; two selections with the same fragment
    /// artifact are the same program.
    pub fragment_artifact: PathBuf,
    /// Image for `iChannel0`, if the shader names or implies one.
    pub texture: Option<PathBuf>,
}

impl ShaderProgram {
    pub fn load(selection: &ShaderSelection) -> Result<Self, ShaderBuildError> {
        let fragment_artifact = selection.artifact(ShaderStage::Fragment);
        let fragment = match read_module(&fragment_artifact)? {
            Some(m) => m,
            None => {
                return Err(ShaderBuildError::MissingFragment {
                    path: fragment_artifact,
                })
            }
        };
        let vertex = read_module(&selection.artifact(ShaderStage::Vertex))?;
        let geometry = read_module(&selection.artifact(ShaderStage::Geometry))?;
        let texture = texture::discover(&selection.fragment);

        Ok(Self {
            name: selection.base_name().to_owned(),
            fragment,
            vertex,
            geometry,
            fragment_artifact,
            texture,
        })
    }

    pub fn has_geometry(&self) -> bool {
        self.geometry.is_some()
    }
}

fn read_module(path: &Path) -> Result<Option<SpirvModule>, ShaderBuildError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ShaderBuildError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    SpirvModule::from_bytes(&bytes)
        .map(Some)
        .map_err(|source| ShaderBuildError::InvalidArtifact {
            path: path.to_path_buf(),
            source,
        })
}
