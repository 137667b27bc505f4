// SPDX-License-Identifier: CEPL-1.0
//! The browsable list of shaders behind Left/Right.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Extensions picked up when scanning a directory.
pub const SCAN_EXTENSIONS: [&str; 5] = ["frag", "glsl", "fsh", "gsh", "vsh"];

#[derive(Clone, Debug, Default)]
pub struct ShaderCatalog {
    entries: Vec<PathBuf>,
    current: usize,
}

impl ShaderCatalog {
    pub fn new(entries: Vec<PathBuf>) -> Self {
        Self {
            entries,
            current: 0,
        }
    }

    /// Builds the catalog from `list` when it exists and names at least one
    /// shader, otherwise from the directory holding `initial`. The cursor is
    /// placed on `initial`, which is prepended if the source did not list it.
    pub fn load(list: Option<&Path>, initial: &Path) -> Self {
        let from_list = list.and_then(|path| match fs::read_to_string(path) {
            Ok(text) => {
                let entries = parse_list(&text);
                info!("catalog: {} shaders from {}", entries.len(), path.display());
                Some(entries).filter(|e| !e.is_empty())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("catalog: cannot read {}: {e}", path.display());
                None
            }
        });

        let entries = match from_list {
            Some(entries) => entries,
            None => {
                let dir = initial
                    .parent()
                    .filter(|d| !d.as_os_str().is_empty())
                    .unwrap_or_else(|| Path::new("."));
                match scan_dir(dir) {
                    Ok(entries) => {
                        info!("catalog: {} shaders in {}", entries.len(), dir.display());
                        entries
                    }
                    Err(e) => {
                        warn!("catalog: cannot scan {}: {e}", dir.display());
                        Vec::new()
                    }
                }
            }
        };

        let mut catalog = Self::new(entries);
        catalog.focus(initial);
        catalog
    }

    /// Moves the cursor to `path`, adding it at the front if absent.
    pub fn focus(&mut self, path: &Path) {
        match self.entries.iter().position(|e| same_file(e, path)) {
            Some(i) => self.current = i,
            None => {
                self.entries.insert(0, path.to_path_buf());
                self.current = 0;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Index `delta` steps away from `from`, wrapping in both directions.
    pub fn offset(&self, from: usize, delta: isize) -> Option<usize> {
        let len = self.entries.len() as isize;
        (len > 0).then(|| (from as isize + delta).rem_euclid(len) as usize)
    }

    pub fn select(&mut self, index: usize) {
        if index < self.entries.len() {
            self.current = index;
        }
    }
}

/// One path per line; blank lines and `#` comments are skipped.
pub fn parse_list(text: &str) -> Vec<PathBuf> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(PathBuf::from)
        .collect()
}

/// Shader sources directly inside `dir`, sorted by path.
pub fn scan_dir(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| SCAN_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        if matches && path.is_file() {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn list_skips_blanks_and_comments() {
        let entries = parse_list("a.frag\n\n  # old\n  b.fsh  \n");
        assert_eq!(entries, vec![PathBuf::from("a.frag"), PathBuf::from("b.fsh")]);
    }

    #[test]
    fn offset_wraps_both_ways() {
        let c = ShaderCatalog::new(vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(c.offset(2, 1), Some(0));
        assert_eq!(c.offset(0, -1), Some(2));
        assert_eq!(c.offset(1, 4), Some(2));
        assert_eq!(ShaderCatalog::default().offset(0, 1), None);
    }

    #[test]
    fn falls_back_to_directory_scan() {
        let tmp = TempDir::new().unwrap();
        for name in ["b.frag", "a.glsl", "c.vsh", "notes.txt", "c.frag.spv"] {
            fs::write(tmp.path().join(name), "").unwrap();
        }
        let initial = tmp.path().join("b.frag");
        let c = ShaderCatalog::load(Some(&tmp.path().join("missing.txt")), &initial);
        let names: Vec<_> = c
            .entries()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.glsl", "b.frag", "c.vsh"]);
        assert_eq!(c.entries()[c.current_index()], initial);
    }

    #[test]
    fn list_file_wins_and_initial_is_prepended() {
        let tmp = TempDir::new().unwrap();
        let list = tmp.path().join("shader_list.txt");
        fs::write(&list, "x.frag\ny.frag\n").unwrap();
        let c = ShaderCatalog::load(Some(&list), Path::new("z.frag"));
        assert_eq!(c.len(), 3);
        assert_eq!(c.current_index(), 0);
        assert_eq!(c.entries()[0], Path::new("z.frag"));

        let c = ShaderCatalog::load(Some(&list), Path::new("y.frag"));
        assert_eq!(c.len(), 2);
        assert_eq!(c.current_index(), 1);
    }
}
