//! `[build]` section configuration.
//!
//! Contains the directory layout of a project: MJML sources, optional JSON
//! context files and the HTML output mirror.

use super::defaults;
use educe::Educe;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// `[build]` section in mailforge.toml - directory layout.
///
/// # Example
/// ```toml
/// [build]
/// src = "src"
/// data = "data"
/// output = "output"
/// ```
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    /// Project root directory (set from CLI, not the config file)
    #[serde(skip)]
    pub root: Option<PathBuf>,

    /// Directory holding `*.mjml` template sources.
    #[serde(default = "defaults::build::src")]
    #[educe(Default = defaults::build::src())]
    pub src: PathBuf,

    /// Directory holding optional `*.json` context files, mirrored to src.
    #[serde(default = "defaults::build::data")]
    #[educe(Default = defaults::build::data())]
    pub data: PathBuf,

    /// Directory receiving rendered `*.html` files, mirrored to src.
    #[serde(default = "defaults::build::output")]
    #[educe(Default = defaults::build::output())]
    pub output: PathBuf,
}
