// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::{Context, Result};
use clap::Parser;
use shadebox_core::init_tracing;
use shadebox_platform::{translate, Command};
use shadebox_render::{
    PrebuiltCompiler, RenderSize, Renderer, ShaderCatalog, ShaderCompiler, ShaderProgram,
    ShaderSelection, ShaderSwitcher, SwitchOutcome, UniformState,
};
use shadebox_render_vk::VkRenderer;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};

use shadebox_platform::winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::{ElementState, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Fullscreen, Window, WindowId},
};

mod config;

use config::{AppConfig, CompilerKind};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Fragment shader to start with (overrides `shaders.initial`)
    shader: Option<PathBuf>,
    /// Shader list file browsed with Left/Right
    #[arg(long)]
    catalog: Option<PathBuf>,
    /// Config file (default: shadebox.toml)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Never compile; use the .spv files already on disk
    #[arg(long)]
    prebuilt: bool,
}

fn make_compiler(kind: CompilerKind) -> Box<dyn ShaderCompiler> {
    match kind {
        CompilerKind::Prebuilt => Box::new(PrebuiltCompiler),
        #[cfg(feature = "shaderc")]
        CompilerKind::Shaderc => match shadebox_render::ShadercCompiler::new() {
            Ok(c) => Box::new(c),
            Err(e) => {
                warn!("shaderc unavailable ({e}); using prebuilt artifacts");
                Box::new(PrebuiltCompiler)
            }
        },
        #[cfg(not(feature = "shaderc"))]
        CompilerKind::Shaderc => {
            warn!("built without shaderc; using prebuilt artifacts");
            Box::new(PrebuiltCompiler)
        }
    }
}

struct App {
    cfg: AppConfig,
    window: Option<Window>,
    renderer: Option<VkRenderer>,
    /// Built before the loop starts; handed to the renderer on first resume.
    initial: Option<ShaderProgram>,
    switcher: ShaderSwitcher,
    uniforms: UniformState,
    failed: bool,
}

impl App {
    /// Drops the renderer (device teardown happens there) and ends the loop
    /// with a failure exit code.
    fn fatal(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("fatal: {e:#}");
        self.failed = true;
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn logical_size(window: &Window) -> RenderSize {
        let size = window.inner_size().to_logical::<u32>(window.scale_factor());
        RenderSize::new(size.width, size.height)
    }

    fn switch(&mut self, event_loop: &ActiveEventLoop, delta: isize) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };
        match self.switcher.step(delta, renderer) {
            Ok(SwitchOutcome::Switched { name, failures }) => {
                if !failures.is_empty() {
                    info!("skipped {} broken shader(s)", failures.len());
                }
                if let Some(w) = &self.window {
                    w.set_title(&format!("{} - {name}", self.cfg.window.title));
                }
            }
            Ok(SwitchOutcome::NoWorkingShader { failures }) => {
                warn!("no working shader ({} tried)", failures.len());
            }
            Ok(SwitchOutcome::EmptyCatalog) => info!("shader catalog is empty"),
            Err(e) => self.fatal(event_loop, e),
        }
    }

    fn command(&mut self, event_loop: &ActiveEventLoop, cmd: Command) {
        if let Some(input) = cmd.input_event() {
            self.uniforms.apply(input);
            return;
        }
        match cmd {
            Command::Quit => {
                info!("Escape → exit");
                self.renderer = None;
                self.window = None;
                event_loop.exit();
            }
            Command::ToggleFullscreen => {
                if let Some(w) = &self.window {
                    let next = match w.fullscreen() {
                        Some(_) => None,
                        None => Some(Fullscreen::Borderless(None)),
                    };
                    info!("fullscreen={}", next.is_some());
                    w.set_fullscreen(next);
                }
            }
            Command::NextShader => self.switch(event_loop, 1),
            Command::PrevShader => self.switch(event_loop, -1),
            Command::ResetScroll | Command::ScrollUp | Command::ScrollDown => {}
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let Some(program) = self.initial.take() else {
            return;
        };

        let wc = &self.cfg.window;
        let mut attrs = Window::default_attributes()
            .with_title(format!("{} - {}", wc.title, program.name))
            .with_inner_size(LogicalSize::new(wc.width, wc.height))
            .with_resizable(wc.resizable);
        if wc.fullscreen {
            attrs = attrs.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }
        let window = match event_loop.create_window(attrs) {
            Ok(w) => w,
            Err(e) => return self.fatal(event_loop, anyhow::Error::new(e).context("create_window")),
        };

        let size = window.inner_size();
        let render_size = RenderSize::new(size.width, size.height);
        match VkRenderer::new(&window, &window, render_size, &program) {
            Ok(r) => {
                info!("renderer ready: `{}` at {}x{}", program.name, size.width, size.height);
                self.renderer = Some(r);
            }
            Err(e) => return self.fatal(event_loop, e.context("vk init")),
        }

        event_loop.set_control_flow(ControlFlow::Wait);
        window.request_redraw();
        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(window) = &self.window else {
            return;
        };
        if window_id != window.id() {
            return;
        }
        let scale = window.scale_factor();

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.renderer = None;
                self.window = None;
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                let size = RenderSize::new(new_size.width, new_size.height);
                if let Some(r) = self.renderer.as_mut() {
                    if let Err(e) = r.resize(size) {
                        self.fatal(event_loop, e);
                    }
                }
            }

            WindowEvent::KeyboardInput { event, .. } if event.state == ElementState::Pressed => {
                let Some(cmd) = Command::from_key(&event.logical_key) else {
                    return;
                };
                // Held scroll keys keep scrolling; everything else fires once.
                if event.repeat && cmd.input_event().is_none() {
                    return;
                }
                self.command(event_loop, cmd);
            }

            WindowEvent::RedrawRequested => {
                let logical = Self::logical_size(window);
                if let Some(r) = self.renderer.as_mut() {
                    if let Err(e) = r.render(&mut self.uniforms, logical) {
                        self.fatal(event_loop, e);
                    }
                }
            }

            other => {
                if let Some(input) = translate(&other, scale) {
                    self.uniforms.apply(input);
                }
            }
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        // FIFO present paces the loop.
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }
}

fn run(args: Args) -> Result<bool> {
    let cfg = config::load(args.config.as_deref());
    let initial = args.shader.unwrap_or_else(|| cfg.shaders.initial.clone());
    let kind = if args.prebuilt {
        CompilerKind::Prebuilt
    } else {
        cfg.shaders.compiler
    };
    let compiler = make_compiler(kind);

    // 1) Initial shader must build before any window exists
    let program = ShaderSelection::resolve(&initial)
        .and_then(|s| s.build(compiler.as_ref()))
        .with_context(|| format!("initial shader {}", initial.display()))?;
    info!("initial shader `{}`", program.name);

    // 2) Catalog, focused on the initial shader
    let list = args.catalog.unwrap_or_else(|| cfg.shaders.catalog.clone());
    let catalog = ShaderCatalog::load(Some(&list), &initial);
    let switcher = ShaderSwitcher::new(catalog, compiler, program.fragment_artifact.clone());

    // 3) Event loop
    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App {
        cfg,
        window: None,
        renderer: None,
        initial: Some(program),
        switcher,
        uniforms: UniformState::new(),
        failed: false,
    };
    event_loop.run_app(&mut app)?;
    Ok(!app.failed)
}

fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();
    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_positional_shader_and_flags() {
        let args = Args::parse_from([
            "shadebox",
            "shaders/plasma.frag",
            "--catalog",
            "list.txt",
            "--prebuilt",
        ]);
        assert_eq!(args.shader, Some(PathBuf::from("shaders/plasma.frag")));
        assert_eq!(args.catalog, Some(PathBuf::from("list.txt")));
        assert!(args.prebuilt);
        assert_eq!(args.config, None);
    }

    #[test]
    fn prebuilt_kind_never_compiles() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("a.frag");
        std::fs::write(&src, "void mainImage(out vec4 c, in vec2 p) { c = vec4(1.0); }").unwrap();
        let compiler = make_compiler(CompilerKind::Prebuilt);
        assert!(compiler.compile(&src).is_err());
    }
}
