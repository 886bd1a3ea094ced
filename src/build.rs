//! Batch rendering orchestration.
//!
//! Renders an ordered list of identifiers in sequence and writes each result
//! to its mirrored output path. The same code path serves the one-shot
//! `build` command, the initial build before serving, and the singleton
//! rebuilds triggered by the watcher; [`BuildMode`] selects the
//! template-fault policy and the reload script injection.

use crate::{
    config::ProjectConfig,
    log,
    paths::{self, TemplateId},
    render::{self, RenderBudget},
};
use anyhow::{Context, Result};
use std::{fs, path::Path, time::Duration};

/// Shared time budget for the MJML-render step of one whole batch.
const RENDER_BUDGET: Duration = Duration::from_secs(30);

/// Selects how a batch reacts to template faults and whether rendered pages
/// get the live-reload script tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// Template faults are fatal; no script injection.
    OneShot,
    /// Template faults degrade to an error-banner page; every rendered page
    /// gains a trailing reload script tag.
    Live,
}

impl BuildMode {
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Live)
    }
}

/// Render the given identifiers in list order.
///
/// Data-read and JSON-decode failures abort the whole batch in either mode;
/// template faults abort only in one-shot mode.
pub fn build_batch(
    config: &ProjectConfig,
    templates: &[TemplateId],
    mode: BuildMode,
) -> Result<()> {
    let budget = RenderBudget::start(RENDER_BUDGET);

    for id in templates {
        build_one(config, id, mode, &budget)?;
    }

    Ok(())
}

fn build_one(
    config: &ProjectConfig,
    id: &TemplateId,
    mode: BuildMode,
    budget: &RenderBudget,
) -> Result<()> {
    let source = paths::source_path(config, id);
    let shown = source.strip_prefix(config.get_root()).unwrap_or(&source);
    log!("build"; "rendering {}", shown.display());

    let mut html = match render::render_template(config, id, budget) {
        Ok(html) => html,
        Err(err) if mode.is_live() && err.is_template_fault() => {
            log!("warn"; "{err}");
            err.banner()
        }
        Err(err) => {
            return Err(anyhow::Error::new(err).context(format!("Failed to render {id}")));
        }
    };

    if mode.is_live() {
        html.push_str(&reload_script_tag(config));
        html.push('\n');
    }

    write_output(&paths::output_path(config, id), &html)
}

/// Script tag pointing at the live-reload endpoint, appended to every page
/// rendered in live mode.
fn reload_script_tag(config: &ProjectConfig) -> String {
    format!(
        r#"<script src="http://{}:{}/livereload.js"></script>"#,
        config.serve.interface, config.serve.reload_port
    )
}

/// Whole-file replace at the mirrored output path, creating parent
/// directories as needed.
fn write_output(path: &Path, html: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, html).with_context(|| format!("Failed to write {}", path.display()))
}

// ============================================================================
// Tests
// ============================================================================
