//! Module source resolution.
//!
//! Import paths arrive from the compiler already mapped to slash form
//! (`a.b.c` becomes `a/b/c`, a leading `.` becomes `./` and each `^`
//! becomes `../`). The loader probes the path itself and then with the
//! `.pk` extension, importer-relative for relative specs and across the
//! configured search paths otherwise.

use std::{fs, path::Path};

/// A resolved module: its short name, on-disk path, and source text.
#[derive(Debug, Clone)]
pub struct ModuleSource {
    pub name: String,
    pub path: Option<String>,
    pub text: String,
}

/// Host hook for turning an import spec into source text.
///
/// The default [`FsLoader`] reads from the filesystem; embedders can supply
/// in-memory or bundled sources instead.
pub trait ModuleLoader {
    fn load(
        &mut self,
        spec: &str,
        importer_dir: Option<&str>,
        search_paths: &[String],
    ) -> Result<ModuleSource, String>;
}

/// Filesystem loader.
#[derive(Debug, Default)]
pub struct FsLoader;

impl FsLoader {
    fn try_read(candidate: &Path) -> Option<ModuleSource> {
        if !candidate.is_file() {
            return None;
        }
        let text = fs::read_to_string(candidate).ok()?;
        let text = text.strip_prefix('\u{feff}').map_or(text.clone(), str::to_owned);
        let name = candidate
            .file_stem()
            .map_or_else(|| "module".to_owned(), |s| s.to_string_lossy().into_owned());
        Some(ModuleSource {
            name,
            path: Some(candidate.to_string_lossy().into_owned()),
            text,
        })
    }

    fn probe(dir: &Path, spec: &str) -> Option<ModuleSource> {
        let plain = dir.join(spec);
        if let Some(found) = Self::try_read(&plain) {
            return Some(found);
        }
        let with_ext = dir.join(format!("{spec}.pk"));
        Self::try_read(&with_ext)
    }
}

impl ModuleLoader for FsLoader {
    fn load(
        &mut self,
        spec: &str,
        importer_dir: Option<&str>,
        search_paths: &[String],
    ) -> Result<ModuleSource, String> {
        if spec.ends_with(".so") || spec.ends_with(".dll") {
            return Err(format!(
                "dynamic library '{spec}' cannot be loaded by the filesystem loader"
            ));
        }

        if spec.starts_with("./") || spec.starts_with("../") {
            let Some(dir) = importer_dir else {
                return Err(format!(
                    "relative import '{spec}' is only valid inside a file-based module"
                ));
            };
            return Self::probe(Path::new(dir), spec)
                .ok_or_else(|| format!("module '{spec}' not found relative to '{dir}'"));
        }

        for dir in search_paths.iter().map(String::as_str).chain(["."]) {
            if let Some(found) = Self::probe(Path::new(dir), spec) {
                return Ok(found);
            }
        }
        Err(format!("module '{spec}' not found on the search path"))
    }
}
