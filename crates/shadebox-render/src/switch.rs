// SPDX-License-Identifier: CEPL-1.0
//! Live shader switching with bounded fallback.
use crate::catalog::ShaderCatalog;
use crate::compiler::ShaderCompiler;
use crate::error::{InstallError, PipelineRebuildError, ShaderBuildError};
use crate::shader::{ShaderProgram, ShaderSelection, ShaderStage};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Whatever currently renders with a program; the GPU backend in practice.
pub trait ProgramSink {
    /// Replaces the active program. On `Err` the previous program must
    /// still be the active one.
    fn install(&mut self, program: &ShaderProgram) -> Result<(), InstallError>;
}

#[derive(Debug)]
pub enum SwitchFailure {
    Build {
        path: PathBuf,
        error: ShaderBuildError,
    },
    Rebuild {
        path: PathBuf,
        error: PipelineRebuildError,
    },
}

impl SwitchFailure {
    pub fn path(&self) -> &Path {
        match self {
            SwitchFailure::Build { path, .. } | SwitchFailure::Rebuild { path, .. } => path,
        }
    }
}

#[derive(Debug)]
pub enum SwitchOutcome {
    Switched {
        name: String,
        failures: Vec<SwitchFailure>,
    },
    /// Every candidate failed; the active program is unchanged.
    NoWorkingShader { failures: Vec<SwitchFailure> },
    /// Nothing to switch to.
    EmptyCatalog,
}

pub struct ShaderSwitcher {
    catalog: ShaderCatalog,
    compiler: Box<dyn ShaderCompiler>,
    active: PathBuf,
}

impl ShaderSwitcher {
    /// `active` is the fragment artifact of the program already installed.
    pub fn new(
        catalog: ShaderCatalog,
        compiler: Box<dyn ShaderCompiler>,
        active: PathBuf,
    ) -> Self {
        Self {
            catalog,
            compiler,
            active,
        }
    }

    pub fn catalog(&self) -> &ShaderCatalog {
        &self.catalog
    }

    pub fn active(&self) -> &Path {
        &self.active
    }

    /// Tries catalog entries `delta` apart, starting next to the current one,
    /// until one builds and installs. At most one attempt per entry; entries
    /// that resolve to the active program are skipped. Only a fatal install
    /// error comes back as `Err`.
    pub fn step<S: ProgramSink + ?Sized>(
        &mut self,
        delta: isize,
        sink: &mut S,
    ) -> anyhow::Result<SwitchOutcome> {
        if self.catalog.is_empty() {
            return Ok(SwitchOutcome::EmptyCatalog);
        }
        let mut failures = Vec::new();
        let mut index = self.catalog.current_index();

        for _ in 0..self.catalog.len() {
            let Some(next) = self.catalog.offset(index, delta) else {
                break;
            };
            index = next;
            let path = self.catalog.entries()[index].clone();

            let built = ShaderSelection::resolve(&path).and_then(|selection| {
                if selection.artifact(ShaderStage::Fragment) == self.active {
                    Ok(None)
                } else {
                    selection.build(self.compiler.as_ref()).map(Some)
                }
            });
            let program = match built {
                Ok(Some(p)) => p,
                Ok(None) => {
                    debug!("skipping {}: already active", path.display());
                    continue;
                }
                Err(error) => {
                    warn!("shader {}: {error}", path.display());
                    failures.push(SwitchFailure::Build { path, error });
                    continue;
                }
            };

            match sink.install(&program) {
                Ok(()) => {
                    info!("switched to shader {} ({})", program.name, path.display());
                    self.catalog.select(index);
                    self.active = program.fragment_artifact;
                    return Ok(SwitchOutcome::Switched {
                        name: program.name,
                        failures,
                    });
                }
                Err(InstallError::Rebuild(error)) => {
                    warn!("shader {}: {error}", path.display());
                    failures.push(SwitchFailure::Rebuild { path, error });
                }
                Err(InstallError::Fatal(e)) => return Err(e),
            }
        }

        warn!("no working shader found, keeping {}", self.active.display());
        Ok(SwitchOutcome::NoWorkingShader { failures })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::PrebuiltCompiler;
    use crate::spirv::tests::module_bytes;
    use std::fs;
    use tempfile::TempDir;

    /// Records installs; rejects programs whose name is listed.
    #[derive(Default)]
    struct Sink {
        active: Option<String>,
        installs: usize,
        reject: Vec<&'static str>,
    }

    impl ProgramSink for Sink {
        fn install(&mut self, program: &ShaderProgram) -> Result<(), InstallError> {
            if self.reject.contains(&program.name.as_str()) {
                return Err(PipelineRebuildError {
                    shader: program.name.clone(),
                    source: "incompatible stages".into(),
                }
                .into());
            }
            self.installs += 1;
            self.active = Some(program.name.clone());
            Ok(())
        }
    }

    /// Writes `<name>.frag` and, when `compiled`, its fragment artifact.
    fn shader(dir: &Path, name: &str, compiled: bool) -> PathBuf {
        let src = dir.join(format!("{name}.frag"));
        fs::write(&src, "void mainImage(out vec4 c, in vec2 p) {}\n").unwrap();
        if compiled {
            fs::write(
                dir.join(format!("{name}.frag.spv")),
                module_bytes(ShaderStage::Fragment),
            )
            .unwrap();
        }
        src
    }

    fn switcher(dir: &Path, entries: Vec<PathBuf>) -> ShaderSwitcher {
        let active = dir.join("a.frag.spv");
        ShaderSwitcher::new(
            ShaderCatalog::new(entries),
            Box::new(PrebuiltCompiler),
            active,
        )
    }

    #[test]
    fn missing_fragment_keeps_active_shader() {
        let tmp = TempDir::new().unwrap();
        let a = shader(tmp.path(), "a", true);
        let b = shader(tmp.path(), "b", false);
        let mut sw = switcher(tmp.path(), vec![a, b.clone()]);
        let mut sink = Sink {
            active: Some("a".into()),
            ..Default::default()
        };

        let outcome = sw.step(1, &mut sink).unwrap();
        let SwitchOutcome::NoWorkingShader { failures } = outcome else {
            panic!("expected no working shader");
        };
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].path(), b);
        assert!(matches!(
            &failures[0],
            SwitchFailure::Build {
                error: ShaderBuildError::Compile(_) | ShaderBuildError::MissingFragment { .. },
                ..
            }
        ));
        assert_eq!(sink.installs, 0);
        assert_eq!(sink.active.as_deref(), Some("a"));
        assert_eq!(sw.catalog().current_index(), 0);
        assert_eq!(sw.active(), tmp.path().join("a.frag.spv"));
    }

    #[test]
    fn falls_through_to_next_working_candidate() {
        let tmp = TempDir::new().unwrap();
        let entries = vec![
            shader(tmp.path(), "a", true),
            shader(tmp.path(), "b", false),
            shader(tmp.path(), "c", true),
        ];
        let mut sw = switcher(tmp.path(), entries);
        let mut sink = Sink::default();

        let outcome = sw.step(1, &mut sink).unwrap();
        assert!(matches!(
            &outcome,
            SwitchOutcome::Switched { name, failures } if name == "c" && failures.len() == 1
        ));
        assert_eq!(sw.catalog().current_index(), 2);
        assert_eq!(sw.active(), tmp.path().join("c.frag.spv"));

        // Backwards from c: b fails, a installs.
        let outcome = sw.step(-1, &mut sink).unwrap();
        assert!(matches!(outcome, SwitchOutcome::Switched { ref name, .. } if name == "a"));
        assert_eq!(sink.installs, 2);
    }

    #[test]
    fn rejected_rebuild_is_reported_and_skipped() {
        let tmp = TempDir::new().unwrap();
        let entries = vec![
            shader(tmp.path(), "a", true),
            shader(tmp.path(), "b", true),
            shader(tmp.path(), "c", true),
        ];
        let mut sw = switcher(tmp.path(), entries);
        let mut sink = Sink {
            reject: vec!["b"],
            ..Default::default()
        };

        let outcome = sw.step(1, &mut sink).unwrap();
        let SwitchOutcome::Switched { name, failures } = outcome else {
            panic!("expected a switch");
        };
        assert_eq!(name, "c");
        assert!(matches!(failures.as_slice(), [SwitchFailure::Rebuild { .. }]));
    }

    #[test]
    fn attempts_are_bounded_by_catalog_size() {
        let tmp = TempDir::new().unwrap();
        let entries = vec![
            shader(tmp.path(), "a", true),
            shader(tmp.path(), "b", false),
            shader(tmp.path(), "c", false),
        ];
        let mut sw = switcher(tmp.path(), entries);
        let mut sink = Sink::default();
        let outcome = sw.step(-1, &mut sink).unwrap();
        assert!(matches!(
            outcome,
            SwitchOutcome::NoWorkingShader { ref failures } if failures.len() == 2
        ));
    }

    #[test]
    fn fatal_install_error_propagates() {
        struct Broken;
        impl ProgramSink for Broken {
            fn install(&mut self, _: &ShaderProgram) -> Result<(), InstallError> {
                Err(InstallError::Fatal(anyhow::anyhow!("device lost")))
            }
        }
        let tmp = TempDir::new().unwrap();
        let entries = vec![shader(tmp.path(), "a", true), shader(tmp.path(), "b", true)];
        let mut sw = switcher(tmp.path(), entries);
        assert!(sw.step(1, &mut Broken).is_err());
        assert_eq!(sw.active(), tmp.path().join("a.frag.spv"));
    }

    #[test]
    fn empty_catalog_is_a_no_op() {
        let mut sw = ShaderSwitcher::new(
            ShaderCatalog::default(),
            Box::new(PrebuiltCompiler),
            PathBuf::from("x.frag.spv"),
        );
        assert!(matches!(
            sw.step(1, &mut Sink::default()).unwrap(),
            SwitchOutcome::EmptyCatalog
        ));
    }
}
