// SPDX-License-Identifier: CEPL-1.0
//! Source-to-SPIR-V compilation seam.
//!
//! The engine only ever asks for "this source, compiled, next to itself";
//! how that happens is up to the [`ShaderCompiler`] in use.
use crate::error::CompileError;
use crate::shader::{artifact_path, ShaderRole, ShaderStage};
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledArtifact {
    pub stage: ShaderStage,
    pub path: PathBuf,
}

pub trait ShaderCompiler {
    /// Compiles `source` into `<dir>/<base>.<stage>.spv`.
    fn compile(&self, source: &Path) -> Result<CompiledArtifact, CompileError>;
}

fn source_stage(source: &Path) -> Result<ShaderStage, CompileError> {
    match ShaderRole::classify(source) {
        Some(ShaderRole::Compiled(_)) | None => Err(CompileError::UnknownKind {
            path: source.to_path_buf(),
        }),
        Some(role) => Ok(role.stage()),
    }
}

/// Compiles nothing; succeeds only when the artifact already exists.
#[derive(Clone, Copy, Debug, Default)]
pub struct PrebuiltCompiler;

impl ShaderCompiler for PrebuiltCompiler {
    fn compile(&self, source: &Path) -> Result<CompiledArtifact, CompileError> {
        let stage = source_stage(source)?;
        let path = artifact_path(source, stage);
        if path.is_file() {
            Ok(CompiledArtifact { stage, path })
        } else {
            Err(CompileError::MissingArtifact { path })
        }
    }
}

/// Uniform block, samplers and entry shim put around bare ShaderToy code.
/// Block offsets match `UniformBlock`.
pub const SHADERTOY_PRELUDE: &str = r"#version 450
layout(binding = 0) uniform ShaderInputs {
    layout(offset = 0) vec3 iResolution;
    layout(offset = 16) float iTime;
    layout(offset = 32) vec4 iMouse;
    layout(offset = 48) vec2 iScroll;
    layout(offset = 64) float iButtonLeft;
    layout(offset = 68) float iButtonRight;
    layout(offset = 72) float iButtonMiddle;
    layout(offset = 76) float iButton4;
    layout(offset = 80) float iButton5;
};
layout(binding = 1) uniform sampler2D iChannel0;
layout(binding = 2) uniform sampler2D iChannel1;
layout(location = 0) out vec4 shadebox_outColor;
";

const SHADERTOY_MAIN: &str = r"
void main() {
    vec4 color = vec4(0.0);
    mainImage(color, gl_FragCoord.xy);
    shadebox_outColor = color;
}
";

const SHADERTOY_UNIFORMS: [&str; 6] = [
    "iResolution",
    "iTime",
    "iMouse",
    "iChannel0",
    "iChannel1",
    "iScroll",
];

/// Lines searched for a `#version` directive before deciding a source is
/// bare ShaderToy code.
const VERSION_SCAN_LINES: usize = 50;

pub(crate) fn has_version_directive(source: &str) -> bool {
    crate::texture::skip_isf_header(source)
        .lines()
        .take(VERSION_SCAN_LINES)
        .any(|l| l.trim_start().starts_with("#version"))
}

/// Wraps bare ShaderToy code with [`SHADERTOY_PRELUDE`] and a `main` that
/// calls `mainImage` with `gl_FragCoord.xy`: pixel centres, row 0 at the
/// top, the same origin as `iMouse` and as row 0 of both channels.
pub fn wrap_shadertoy(source: &str) -> String {
    let body: Vec<&str> = crate::texture::skip_isf_header(source)
        .lines()
        .filter(|line| {
            let t = line.trim_start();
            !(t.starts_with("uniform ") && SHADERTOY_UNIFORMS.iter().any(|u| t.contains(u)))
        })
        .collect();
    format!(
        "{SHADERTOY_PRELUDE}#line 1\n{}\n{SHADERTOY_MAIN}",
        body.join("\n")
    )
}

#[cfg(feature = "shaderc")]
pub use self::shaderc_backend::ShadercCompiler;

#[cfg(feature = "shaderc")]
mod shaderc_backend {
    use super::*;
    use tracing::{debug, info};

    /// In-process GLSL compiler targeting Vulkan 1.0.
    pub struct ShadercCompiler {
        compiler: shaderc::Compiler,
    }

    impl ShadercCompiler {
        pub fn new() -> Result<Self, CompileError> {
            let compiler =
                shaderc::Compiler::new().map_err(|e| CompileError::Unavailable(e.to_string()))?;
            Ok(Self { compiler })
        }
    }

    impl ShaderCompiler for ShadercCompiler {
        fn compile(&self, source: &Path) -> Result<CompiledArtifact, CompileError> {
            let stage = source_stage(source)?;
            let text = std::fs::read_to_string(source).map_err(|e| CompileError::Read {
                path: source.to_path_buf(),
                source: e,
            })?;
            let text = if stage == ShaderStage::Fragment && !has_version_directive(&text) {
                debug!("{}: wrapping bare ShaderToy source", source.display());
                wrap_shadertoy(&text)
            } else {
                text
            };

            let kind = match stage {
                ShaderStage::Vertex => shaderc::ShaderKind::Vertex,
                ShaderStage::Geometry => shaderc::ShaderKind::Geometry,
                ShaderStage::Fragment => shaderc::ShaderKind::Fragment,
            };
            let mut opts = shaderc::CompileOptions::new()
                .map_err(|e| CompileError::Unavailable(e.to_string()))?;
            opts.set_target_env(
                shaderc::TargetEnv::Vulkan,
                shaderc::EnvVersion::Vulkan1_0 as u32,
            );
            opts.set_optimization_level(shaderc::OptimizationLevel::Performance);
            let name = source.display().to_string();
            let binary = self
                .compiler
                .compile_into_spirv(&text, kind, &name, "main", Some(&opts))
                .map_err(|e| CompileError::Compiler {
                    path: source.to_path_buf(),
                    message: e.to_string(),
                })?;

            let path = artifact_path(source, stage);
            std::fs::write(&path, binary.as_binary_u8()).map_err(|e| CompileError::Write {
                path: path.clone(),
                source: e,
            })?;
            info!("compiled {} -> {}", source.display(), path.display());
            Ok(CompiledArtifact { stage, path })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn prebuilt_requires_existing_artifact() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("a.fsh");
        std::fs::write(&src, "").unwrap();
        assert!(matches!(
            PrebuiltCompiler.compile(&src),
            Err(CompileError::MissingArtifact { .. })
        ));

        std::fs::write(tmp.path().join("a.frag.spv"), [0u8; 4]).unwrap();
        let artifact = PrebuiltCompiler.compile(&src).unwrap();
        assert_eq!(artifact.stage, ShaderStage::Fragment);
        assert_eq!(artifact.path, tmp.path().join("a.frag.spv"));

        let vert = tmp.path().join("a.vsh");
        assert!(matches!(
            PrebuiltCompiler.compile(&vert),
            Err(CompileError::MissingArtifact { path }) if path == tmp.path().join("a.vert.spv")
        ));
    }

    #[test]
    fn rejects_unknown_sources() {
        assert!(matches!(
            PrebuiltCompiler.compile(Path::new("x.frag.spv")),
            Err(CompileError::UnknownKind { .. })
        ));
        assert!(matches!(
            PrebuiltCompiler.compile(Path::new("notes.txt")),
            Err(CompileError::UnknownKind { .. })
        ));
    }

    #[test]
    fn version_directive_detection_skips_isf_header() {
        assert!(has_version_directive("// hi\n#version 450\nvoid main(){}"));
        assert!(!has_version_directive("void mainImage(out vec4 c, in vec2 p) {}"));
        assert!(has_version_directive("/*{ \"INPUTS\": [] }*/\n#version 450\n"));
    }

    #[test]
    fn wrap_replaces_shadertoy_uniforms() {
        let src = "uniform float iTime;\nuniform sampler2D iChannel0;\nvoid mainImage(out vec4 c, in vec2 p) { c = vec4(iTime); }\n";
        let wrapped = wrap_shadertoy(src);
        assert!(wrapped.starts_with("#version 450"));
        assert!(!wrapped.contains("uniform float iTime"));
        assert_eq!(wrapped.matches("uniform sampler2D iChannel0").count(), 1);
        assert!(wrapped.contains("mainImage(color, gl_FragCoord.xy)"));
    }

    #[test]
    fn frag_coord_shares_the_mouse_origin() {
        use crate::uniforms::{InputEvent, UniformState};
        use crate::RenderSize;

        // Vulkan's gl_FragCoord has its origin at the top left, so the
        // centre of the top row is y = 0.5. The wrapper must pass it through.
        let wrapped = wrap_shadertoy("void mainImage(out vec4 c, in vec2 p) { c = vec4(p, 0.0, 1.0); }");
        assert!(wrapped.contains("mainImage(color, gl_FragCoord.xy)"));
        assert!(!wrapped.contains("iResolution.y - gl_FragCoord.y"));

        let size = RenderSize::new(800, 600);
        let mut state = UniformState::new();
        state.apply(InputEvent::CursorMoved { x: 10.0, y: 0.5 });
        let block = state.snapshot(0.0, size, size);
        assert_eq!(block.mouse[1], 0.5);
    }
}
