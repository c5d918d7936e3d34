//! Discovery Module for the Block Compiler
//!
//! Recursively scans a directory for template files and registers each one
//! in a `TemplateSet` under its relative path without extension, so
//! `views/list/item.xml` becomes `list/item` when `views` is scanned.

use std::fs;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::template_set::TemplateSet;
use crate::validate::CompilerError;

pub const ERR_TEMPLATE_DIR: &str = "DISCOVERY_ERROR";

// ═══════════════════════════════════════════════════════════════════════════════
// TEMPLATE DISCOVERY
// ═══════════════════════════════════════════════════════════════════════════════

impl TemplateSet {
    /// Register every template file under `dir`. Returns how many were added.
    ///
    /// Files that cannot be read are logged and skipped. Templates are only
    /// registered here; they compile when first rendered.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, CompilerError> {
        if !dir.is_dir() {
            return Err(CompilerError::new(
                ERR_TEMPLATE_DIR,
                &format!("Template directory not found: {}", dir.display()),
                &dir.to_string_lossy(),
                0,
                0,
            ));
        }

        let mut loaded = 0;
        for path in find_template_files(dir, self) {
            let Some(name) = template_name(dir, &path) else {
                continue;
            };
            match fs::read_to_string(&path) {
                Ok(text) => {
                    log::debug!("registering template {} from {}", name, path.display());
                    self.add(&name, &text);
                    loaded += 1;
                }
                Err(e) => {
                    log::warn!("failed to read template {}: {}", path.display(), e);
                }
            }
        }
        Ok(loaded)
    }
}

/// Template files under `dir`, sorted so registration order is stable.
fn find_template_files(dir: &Path, set: &TemplateSet) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(dir).follow_links(true) {
        match entry {
            Ok(entry) => {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                let accepted = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| set.options().accepts_extension(ext))
                    .unwrap_or(false);
                if accepted {
                    files.push(path.to_path_buf());
                }
            }
            Err(e) => log::warn!("skipping unreadable entry: {}", e),
        }
    }

    files.sort();
    files
}

/// Slash-separated path of `file` relative to `base`, minus its extension.
fn template_name(base: &Path, file: &Path) -> Option<String> {
    let relative = file.strip_prefix(base).ok()?.with_extension("");
    let parts: Vec<&str> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompileOptions;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_template_name() {
        let base = Path::new("/views");
        assert_eq!(
            template_name(base, Path::new("/views/list/item.xml")).as_deref(),
            Some("list/item")
        );
        assert_eq!(
            template_name(base, Path::new("/views/main.html")).as_deref(),
            Some("main")
        );
        assert_eq!(template_name(base, Path::new("/other/main.xml")), None);
    }

    #[test]
    fn test_load_dir_registers_nested_templates() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("parts")).unwrap();
        fs::write(dir.path().join("main.xml"), r#"<div><t t-call="parts/title"/></div>"#).unwrap();
        fs::write(dir.path().join("parts/title.xml"), r#"<h1><t t-esc="title"/></h1>"#).unwrap();
        fs::write(dir.path().join("notes.txt"), "not a template").unwrap();

        let mut set = TemplateSet::new();
        assert_eq!(set.load_dir(dir.path()).unwrap(), 2);
        assert_eq!(set.names(), vec!["main", "parts/title"]);

        let html = set.render_to_string("main", json!({"title": "Hello"})).unwrap();
        assert_eq!(html, "<div><h1>Hello</h1></div>");
    }

    #[test]
    fn test_load_dir_honours_extensions() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.xml"), "<p>a</p>").unwrap();
        fs::write(dir.path().join("b.tpl"), "<p>b</p>").unwrap();

        let options = CompileOptions {
            template_extensions: vec![".tpl".to_string()],
            ..CompileOptions::default()
        };
        let mut set = TemplateSet::with_options(options);
        assert_eq!(set.load_dir(dir.path()).unwrap(), 1);
        assert!(set.contains("b"));
        assert!(!set.contains("a"));
    }

    #[test]
    fn test_load_dir_missing_directory() {
        let dir = tempdir().unwrap();
        let mut set = TemplateSet::new();
        let err = set.load_dir(&dir.path().join("missing")).unwrap_err();
        assert_eq!(err.code, ERR_TEMPLATE_DIR);
    }
}
