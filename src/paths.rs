//! Template identifiers and the pure id↔path mapping.
//!
//! A [`TemplateId`] is a slash-separated relative path with the extension
//! stripped. It names one template/data/output triple:
//!
//! | Role   | Path                          |
//! |--------|-------------------------------|
//! | source | `<src_root>/<id>.mjml`        |
//! | data   | `<data_root>/<id>.json`       |
//! | output | `<output_root>/<id>.html`     |
//!
//! Discovery, rendering and watch-event resolution all go through the same
//! mapping, so resolving an event path for a file written at `data_path(id)`
//! yields `id` back.

use crate::{config::ProjectConfig, log};
use anyhow::{Context, Result, bail};
use std::{
    env, fmt,
    path::{Path, PathBuf},
};
use thiserror::Error;
use walkdir::WalkDir;

/// Recognized template extension under the source root.
pub const TEMPLATE_EXT: &str = "mjml";
/// Context file extension under the data root.
pub const DATA_EXT: &str = "json";
/// Rendered file extension under the output root.
pub const OUTPUT_EXT: &str = "html";

/// Extension-free relative path identifying one template/data/output triple.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TemplateId(String);

impl TemplateId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors resolving a filesystem path back to a [`TemplateId`].
#[derive(Debug, Error)]
pub enum PathError {
    #[error("path `{path}` is not under the watched root `{root}`")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("cannot derive a template identifier from `{path}`")]
    NoIdentifier { path: PathBuf },
}

// ============================================================================
// Mapping
// ============================================================================

fn mapped_path(root: &Path, id: &TemplateId, ext: &str) -> PathBuf {
    root.join(format!("{}.{ext}", id.as_str()))
}

/// `<src_root>/<id>.mjml`
pub fn source_path(config: &ProjectConfig, id: &TemplateId) -> PathBuf {
    mapped_path(&config.build.src, id, TEMPLATE_EXT)
}

/// `<data_root>/<id>.json`
pub fn data_path(config: &ProjectConfig, id: &TemplateId) -> PathBuf {
    mapped_path(&config.build.data, id, DATA_EXT)
}

/// `<output_root>/<id>.html`
pub fn output_path(config: &ProjectConfig, id: &TemplateId) -> PathBuf {
    mapped_path(&config.build.output, id, OUTPUT_EXT)
}

/// Resolve an absolute filesystem path back to a [`TemplateId`] by computing
/// it relative to the owning root and stripping the extension.
///
/// Used symmetrically by discovery and by watch-event resolution; a path
/// outside `root` is a hard error that tears down the watch loop.
pub fn resolve_event_path(root: &Path, path: &Path) -> Result<TemplateId, PathError> {
    let normalized = normalize_path(path);
    let rel = normalized
        .strip_prefix(root)
        .map_err(|_| PathError::OutsideRoot {
            path: path.to_path_buf(),
            root: root.to_path_buf(),
        })?;

    let rel = rel.with_extension("");
    let id = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");

    if id.is_empty() {
        return Err(PathError::NoIdentifier {
            path: path.to_path_buf(),
        });
    }

    Ok(TemplateId(id))
}

/// Normalize a path to absolute form for reliable comparison.
///
/// Watcher events may arrive canonicalized while config roots are not (or
/// vice versa), so both sides go through the same normalization.
pub fn normalize_path(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
        }
    })
}

// ============================================================================
// Discovery
// ============================================================================

/// Walk the source directory and return the sorted identifiers of every
/// recognized template file.
///
/// Files with other extensions are skipped with a warning; an empty result
/// is an error.
pub fn discover_templates(config: &ProjectConfig) -> Result<Vec<TemplateId>> {
    let src_root = &config.build.src;
    let mut ids = Vec::new();

    for entry in WalkDir::new(src_root) {
        let entry =
            entry.with_context(|| format!("Failed to walk {}", src_root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(TEMPLATE_EXT) {
            log!("warn"; "ignoring file with unknown extension: {}", path.display());
            continue;
        }

        ids.push(resolve_event_path(src_root, path)?);
    }

    if ids.is_empty() {
        bail!(
            "no templates to compile under {}",
            src_root.display()
        );
    }

    ids.sort();
    Ok(ids)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn test_config(root: &Path) -> ProjectConfig {
        let mut config = ProjectConfig::default();
        config.build.root = Some(root.to_path_buf());
        config.build.src = root.join("src");
        config.build.data = root.join("data");
        config.build.output = root.join("output");
        config
    }

    #[test]
    fn test_mapping_is_pure() {
        let config = test_config(Path::new("/project"));
        let id = TemplateId::new("welcome");

        assert_eq!(source_path(&config, &id), source_path(&config, &id));
        assert_eq!(
            source_path(&config, &id),
            PathBuf::from("/project/src/welcome.mjml")
        );
        assert_eq!(
            data_path(&config, &id),
            PathBuf::from("/project/data/welcome.json")
        );
        assert_eq!(
            output_path(&config, &id),
            PathBuf::from("/project/output/welcome.html")
        );
    }

    #[test]
    fn test_mapping_nested_id() {
        let config = test_config(Path::new("/project"));
        let id = TemplateId::new("billing/invoice");

        assert_eq!(
            source_path(&config, &id),
            PathBuf::from("/project/src/billing/invoice.mjml")
        );
        assert_eq!(
            output_path(&config, &id),
            PathBuf::from("/project/output/billing/invoice.html")
        );
    }

    #[test]
    fn test_data_path_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let config = test_config(&root);

        for name in ["hello-world", "billing/invoice", "a/b/c"] {
            let id = TemplateId::new(name);
            let resolved =
                resolve_event_path(&config.build.data, &data_path(&config, &id)).unwrap();
            assert_eq!(resolved, id);
        }
    }

    #[test]
    fn test_source_path_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let config = test_config(&root);

        let id = TemplateId::new("newsletter/weekly");
        let resolved =
            resolve_event_path(&config.build.src, &source_path(&config, &id)).unwrap();
        assert_eq!(resolved, id);
    }

    #[test]
    fn test_resolve_foreign_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let config = test_config(&root);

        let err = resolve_event_path(&config.build.src, Path::new("/elsewhere/x.mjml"))
            .unwrap_err();
        assert!(matches!(err, PathError::OutsideRoot { .. }));
    }

    #[test]
    fn test_resolve_root_itself_fails() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();

        let err = resolve_event_path(&root, &root).unwrap_err();
        assert!(matches!(err, PathError::NoIdentifier { .. }));
    }

    #[test]
    fn test_discover_templates() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let config = test_config(&root);

        fs::create_dir_all(config.build.src.join("billing")).unwrap();
        fs::write(config.build.src.join("welcome.mjml"), "<mjml></mjml>").unwrap();
        fs::write(
            config.build.src.join("billing/invoice.mjml"),
            "<mjml></mjml>",
        )
        .unwrap();
        // skipped with a warning, not an error
        fs::write(config.build.src.join("notes.txt"), "ignore me").unwrap();

        let ids = discover_templates(&config).unwrap();
        assert_eq!(
            ids,
            vec![
                TemplateId::new("billing/invoice"),
                TemplateId::new("welcome"),
            ]
        );
    }

    #[test]
    fn test_discover_templates_empty_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let config = test_config(&root);
        fs::create_dir_all(&config.build.src).unwrap();

        assert!(discover_templates(&config).is_err());
    }

    #[test]
    fn test_template_id_display_and_order() {
        let mut ids = vec![TemplateId::new("b"), TemplateId::new("a/x")];
        ids.sort();
        assert_eq!(ids[0].to_string(), "a/x");
        assert_eq!(ids[1].as_str(), "b");
    }
}
