// SPDX-License-Identifier: CEPL-1.0
//! Backend-agnostic half of the viewer: what a frame needs (uniforms, shader
//! program, static texture) and the seams a GPU backend plugs into.
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

pub mod catalog;
pub mod compiler;
pub mod error;
pub mod shader;
pub mod spirv;
pub mod switch;
pub mod texture;
pub mod uniforms;

pub use catalog::ShaderCatalog;
pub use compiler::{CompiledArtifact, PrebuiltCompiler, ShaderCompiler};
#[cfg(feature = "shaderc")]
pub use compiler::ShadercCompiler;
pub use error::{CompileError, InstallError, PipelineRebuildError, ShaderBuildError, SpirvError};
pub use shader::{ShaderProgram, ShaderRole, ShaderSelection, ShaderStage};
pub use switch::{ProgramSink, ShaderSwitcher, SwitchFailure, SwitchOutcome};
pub use texture::TexturePixels;
pub use uniforms::{InputEvent, MouseButton, UniformBlock, UniformState};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// A GPU backend that owns the frame loop for one window.
///
/// `render` may only fail on device-level errors; the caller treats any
/// error from it as fatal. Program installation goes through
/// [`ProgramSink`] so a rejected shader never takes the renderer down.
pub trait Renderer: ProgramSink {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        program: &ShaderProgram,
    ) -> Result<Self>
    where
        Self: Sized;

    fn resize(&mut self, size: RenderSize) -> Result<()>;

    /// Renders one frame. `window` is the logical window size used to scale
    /// pointer coordinates onto the framebuffer.
    fn render(&mut self, input: &mut UniformState, window: RenderSize) -> Result<()>;
}
