//! Per-template render pipeline: JSON context → Tera → MJML → HTML.
//!
//! One call to [`render_template`] performs the whole pipeline for a single
//! [`TemplateId`]:
//!
//! 1. Load the optional JSON context (absent file → empty object)
//! 2. Execute the Tera template against that context
//! 3. Render the resulting MJML document to final HTML
//!
//! Errors are typed by pipeline stage so the caller can tell the single
//! recoverable class (template faults) apart from everything else.

use crate::{
    config::ProjectConfig,
    paths::{self, TemplateId},
};
use serde_json::Value;
use std::{
    fs, io,
    path::PathBuf,
    time::{Duration, Instant},
};
use tera::{Context, Tera};
use thiserror::Error;

/// Everything that can go wrong while rendering one template.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to read data file {path}")]
    DataRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid JSON in {path}")]
    DataDecode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to build render context for {id}")]
    ContextBuild {
        id: TemplateId,
        #[source]
        source: tera::Error,
    },

    #[error("failed to read template {path}")]
    TemplateRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse template {path}")]
    TemplateParse {
        path: PathBuf,
        #[source]
        source: tera::Error,
    },

    #[error("failed to execute template {id}")]
    TemplateRender {
        id: TemplateId,
        #[source]
        source: tera::Error,
    },

    #[error("mjml rendering failed for {id}: {message}")]
    Engine { id: TemplateId, message: String },

    #[error("render budget of {limit:?} exhausted")]
    BudgetExhausted { limit: Duration },
}

impl RenderError {
    /// Template authors hit load and syntax errors constantly while editing;
    /// these are the only recoverable class in live mode.
    pub const fn is_template_fault(&self) -> bool {
        matches!(
            self,
            Self::TemplateRead { .. } | Self::TemplateParse { .. }
        )
    }

    /// Minimal HTML fragment naming the error, written in place of the
    /// rendered page when a template fault degrades in live mode.
    pub fn banner(&self) -> String {
        let mut cause: &dyn std::error::Error = self;
        while let Some(source) = cause.source() {
            cause = source;
        }
        format!(
            "<h1>Error building template</h1><h3 style=\"color: tomato\">{cause}</h3>"
        )
    }
}

/// Shared time budget for the MJML-render step of a whole batch.
///
/// One budget covers every file of the batch, so a batch with many files
/// competes for the same deadline.
pub struct RenderBudget {
    started: Instant,
    limit: Duration,
}

impl RenderBudget {
    pub fn start(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    fn check(&self) -> Result<(), RenderError> {
        if self.started.elapsed() >= self.limit {
            Err(RenderError::BudgetExhausted { limit: self.limit })
        } else {
            Ok(())
        }
    }
}

/// Render one template to final HTML.
pub fn render_template(
    config: &ProjectConfig,
    id: &TemplateId,
    budget: &RenderBudget,
) -> Result<String, RenderError> {
    let context = load_context(config, id)?;

    let source_path = paths::source_path(config, id);
    let source = fs::read_to_string(&source_path).map_err(|err| RenderError::TemplateRead {
        path: source_path.clone(),
        source: err,
    })?;

    let mut tera = Tera::default();
    tera.add_raw_template(id.as_str(), &source)
        .map_err(|err| RenderError::TemplateParse {
            path: source_path,
            source: err,
        })?;
    let mjml = tera
        .render(id.as_str(), &context)
        .map_err(|err| RenderError::TemplateRender {
            id: id.clone(),
            source: err,
        })?;

    budget.check()?;

    let document = mrml::parse(&mjml).map_err(|err| RenderError::Engine {
        id: id.clone(),
        message: err.to_string(),
    })?;
    let options = mrml::prelude::render::RenderOptions::default();
    document.render(&options).map_err(|err| RenderError::Engine {
        id: id.clone(),
        message: err.to_string(),
    })
}

/// Load the JSON context for a template.
///
/// An absent data file means an empty object; any other read error is fatal.
/// Objects bind as the context directly; arrays and scalars bind under the
/// `data` key because Tera requires an object root.
fn load_context(config: &ProjectConfig, id: &TemplateId) -> Result<Context, RenderError> {
    let path = paths::data_path(config, id);

    let raw = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => b"{}".to_vec(),
        Err(err) => {
            return Err(RenderError::DataRead {
                path,
                source: err,
            });
        }
    };

    let value: Value = serde_json::from_slice(&raw).map_err(|err| RenderError::DataDecode {
        path,
        source: err,
    })?;

    match value {
        Value::Object(_) => Context::from_value(value).map_err(|err| RenderError::ContextBuild {
            id: id.clone(),
            source: err,
        }),
        other => {
            let mut context = Context::new();
            context.insert("data", &other);
            Ok(context)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
