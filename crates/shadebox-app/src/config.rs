// SPDX-License-Identifier: CEPL-1.0
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const DEFAULT_CONFIG: &str = "shadebox.toml";

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
    pub resizable: bool,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        WindowConfig {
            width: 1280,
            height: 720,
            title: "shadebox".to_owned(),
            resizable: false,
            fullscreen: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompilerKind {
    #[default]
    Shaderc,
    Prebuilt,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ShadersConfig {
    pub initial: PathBuf,
    pub catalog: PathBuf,
    pub compiler: CompilerKind,
}

impl Default for ShadersConfig {
    fn default() -> Self {
        ShadersConfig {
            initial: PathBuf::from("shaders/example.frag"),
            catalog: PathBuf::from("shader_list.txt"),
            compiler: CompilerKind::Shaderc,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub window: WindowConfig,
    pub shaders: ShadersConfig,
}

/// Reads `path` (or `shadebox.toml`). A missing file means defaults; so does
/// a malformed one, after a warning.
pub fn load(path: Option<&Path>) -> AppConfig {
    let path = path.unwrap_or(Path::new(DEFAULT_CONFIG));
    match fs::read_to_string(path) {
        Ok(s) => match toml::from_str::<AppConfig>(&s) {
            Ok(cfg) => {
                info!("config: {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("config: {} is malformed, using defaults: {e}", path.display());
                AppConfig::default()
            }
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => AppConfig::default(),
        Err(e) => {
            warn!("config: cannot read {}: {e}", path.display());
            AppConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_other_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [window]
            width = 640
            fullscreen = true

            [shaders]
            compiler = "prebuilt"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.window.width, 640);
        assert_eq!(cfg.window.height, 720);
        assert!(cfg.window.fullscreen);
        assert_eq!(cfg.window.title, "shadebox");
        assert_eq!(cfg.shaders.compiler, CompilerKind::Prebuilt);
        assert_eq!(cfg.shaders.initial, PathBuf::from("shaders/example.frag"));
    }

    #[test]
    fn missing_file_means_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = load(Some(&tmp.path().join("nope.toml")));
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("shadebox.toml");
        fs::write(&path, "[window]\nwidth = \"wide\"\n").unwrap();
        assert_eq!(load(Some(&path)), AppConfig::default());
    }

    #[test]
    fn reads_catalog_override() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cfg.toml");
        fs::write(&path, "[shaders]\ncatalog = \"lists/mine.txt\"\n").unwrap();
        let cfg = load(Some(&path));
        assert_eq!(cfg.shaders.catalog, PathBuf::from("lists/mine.txt"));
        assert_eq!(cfg.shaders.compiler, CompilerKind::Shaderc);
    }
}
