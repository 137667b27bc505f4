// SPDX-License-Identifier: CEPL-1.0
//! CPU side of the `iChannel0` texture: finding it and decoding it.
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const GRADIENT_SIZE: u32 = 256;
const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "png", "jpeg"];
const FALLBACK_NAMES: [&str; 2] = ["galaxy.jpg", "galaxy.png"];
const DIRECTIVE: &str = "// @texture";

/// Tightly packed RGBA8 pixels, row-major, top row first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TexturePixels {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl TexturePixels {
    pub fn decode(path: &Path) -> Result<Self> {
        let image = image::open(path)
            .with_context(|| format!("failed to open texture at {}", path.display()))?;
        let rgba = image.to_rgba8();
        Ok(Self {
            width: rgba.width(),
            height: rgba.height(),
            rgba: rgba.into_raw(),
        })
    }

    /// Placeholder used when a shader has no texture.
    pub fn gradient(size: u32) -> Self {
        let size = size.max(1);
        let mut rgba = Vec::with_capacity((size * size * 4) as usize);
        for y in 0..size {
            for x in 0..size {
                let fx = x as f32 / size as f32;
                let fy = y as f32 / size as f32;
                rgba.extend_from_slice(&[
                    (fx * 255.0) as u8,
                    (fy * 255.0) as u8,
                    ((fx + fy) * 128.0) as u8,
                    255,
                ]);
            }
        }
        Self {
            width: size,
            height: size,
            rgba,
        }
    }

    /// Decodes `path` if given, falling back to the gradient on any failure.
    pub fn load_or_gradient(path: Option<&Path>) -> Self {
        match path.map(Self::decode) {
            Some(Ok(pixels)) => {
                info!(
                    "texture: {} ({}x{})",
                    path.map(|p| p.display().to_string()).unwrap_or_default(),
                    pixels.width,
                    pixels.height
                );
                pixels
            }
            Some(Err(e)) => {
                warn!("{e:#}; using gradient texture");
                Self::gradient(GRADIENT_SIZE)
            }
            None => Self::gradient(GRADIENT_SIZE),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct IsfHeader {
    #[serde(rename = "INPUTS", default)]
    inputs: Vec<IsfInput>,
}

#[derive(Debug, Deserialize)]
struct IsfInput {
    #[serde(rename = "NAME")]
    name: Option<String>,
    #[serde(rename = "TYPE")]
    kind: Option<String>,
}

/// Finds the texture a shader wants. First hit wins: ISF image inputs, a
/// `// @texture` directive, then `galaxy.{jpg,png}` beside the shader or in
/// the working directory.
pub fn discover(shader: &Path) -> Option<PathBuf> {
    let dir = shader.parent().unwrap_or_else(|| Path::new(""));
    if let Ok(source) = fs::read_to_string(shader) {
        for name in isf_image_inputs(&source) {
            if let Some(p) = with_image_extension(&dir.join(&name)) {
                return Some(p);
            }
        }
        if let Some(target) = texture_directive(&source) {
            let p = Path::new(target);
            let p = if p.is_absolute() {
                p.to_path_buf()
            } else {
                dir.join(p)
            };
            if p.is_file() {
                return Some(p);
            }
            warn!("@texture {} not found", p.display());
        }
    }
    [dir, Path::new("")]
        .iter()
        .flat_map(|d| FALLBACK_NAMES.iter().map(move |n| d.join(n)))
        .find(|p| p.is_file())
}

fn with_image_extension(stem: &Path) -> Option<PathBuf> {
    if stem.is_file() {
        return Some(stem.to_path_buf());
    }
    IMAGE_EXTENSIONS
        .iter()
        .map(|ext| {
            let mut s = stem.as_os_str().to_owned();
            s.push(".");
            s.push(ext);
            PathBuf::from(s)
        })
        .find(|p| p.is_file())
}

/// Names of `image` inputs declared in a leading `/*{ ... }*/` ISF header.
pub(crate) fn isf_image_inputs(source: &str) -> Vec<String> {
    let Some(rest) = source.strip_prefix("/*{") else {
        return Vec::new();
    };
    let Some(end) = rest.find("}*/") else {
        return Vec::new();
    };
    let json = format!("{{{}}}", &rest[..end]);
    match serde_json::from_str::<IsfHeader>(&json) {
        Ok(header) => header
            .inputs
            .into_iter()
            .filter(|i| i.kind.as_deref() == Some("image"))
            .filter_map(|i| i.name)
            .collect(),
        Err(e) => {
            warn!("ignoring unparsable ISF header: {e}");
            Vec::new()
        }
    }
}

pub(crate) fn texture_directive(source: &str) -> Option<&str> {
    source.lines().find_map(|line| {
        let rest = line.trim_start().strip_prefix(DIRECTIVE)?;
        let target = rest.trim();
        (!target.is_empty()).then_some(target)
    })
}

/// The source with a leading ISF header removed.
pub(crate) fn skip_isf_header(source: &str) -> &str {
    source
        .strip_prefix("/*{")
        .and_then(|rest| rest.find("}*/").map(|end| &rest[end + 3..]))
        .unwrap_or(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const ISF: &str = r#"/*{
  "DESCRIPTION": "demo",
  "INPUTS": [
    { "NAME": "speed", "TYPE": "float" },
    { "NAME": "photo", "TYPE": "image" }
  ]
}*/
void main() {}
"#;

    #[test]
    fn gradient_matches_formula() {
        let g = TexturePixels::gradient(256);
        assert_eq!((g.width, g.height), (256, 256));
        assert_eq!(g.rgba.len(), 256 * 256 * 4);
        assert_eq!(&g.rgba[..4], &[0, 0, 0, 255]);
        let px = |x: usize, y: usize| &g.rgba[(y * 256 + x) * 4..][..4];
        assert_eq!(px(128, 0), &[127, 0, 64, 255]);
        assert_eq!(px(0, 64), &[0, 63, 32, 255]);
    }

    #[test]
    fn parses_isf_image_inputs() {
        assert_eq!(isf_image_inputs(ISF), vec!["photo".to_string()]);
        assert!(isf_image_inputs("void main() {}").is_empty());
        assert!(isf_image_inputs("/*{ not json }*/").is_empty());
        assert!(skip_isf_header(ISF).trim_start().starts_with("void main"));
    }

    #[test]
    fn directive_is_found_anywhere() {
        let src = "#version 450\n  // @texture  img/rock.png \nvoid main() {}";
        assert_eq!(texture_directive(src), Some("img/rock.png"));
        assert_eq!(texture_directive("// @texture\n"), None);
    }

    #[test]
    fn discovery_prefers_isf_then_directive_then_fallback() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        fs::write(dir.join("photo.png"), b"png").unwrap();
        fs::write(dir.join("rock.jpg"), b"jpg").unwrap();
        fs::write(dir.join("galaxy.jpg"), b"jpg").unwrap();

        let isf = dir.join("isf.frag");
        fs::write(&isf, format!("{ISF}// @texture rock.jpg\n")).unwrap();
        assert_eq!(discover(&isf), Some(dir.join("photo.png")));

        let tagged = dir.join("tagged.frag");
        fs::write(&tagged, "// @texture rock.jpg\n").unwrap();
        assert_eq!(discover(&tagged), Some(dir.join("rock.jpg")));

        let plain = dir.join("plain.frag");
        fs::write(&plain, "void main() {}\n").unwrap();
        assert_eq!(discover(&plain), Some(dir.join("galaxy.jpg")));
    }

    #[test]
    fn undecodable_texture_falls_back_to_gradient() {
        let tmp = TempDir::new().unwrap();
        let bogus = tmp.path().join("bogus.png");
        fs::write(&bogus, b"definitely not a png").unwrap();
        let px = TexturePixels::load_or_gradient(Some(&bogus));
        assert_eq!(px, TexturePixels::gradient(GRADIENT_SIZE));
    }
}
