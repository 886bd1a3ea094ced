//! Command-line interface definitions.
//!
//! Defines all CLI arguments and subcommands using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Mailforge MJML template compiler CLI
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Source templates directory (relative to project root)
    #[arg(short, long)]
    pub src: Option<PathBuf>,

    /// JSON context directory (relative to project root)
    #[arg(short, long)]
    pub data: Option<PathBuf>,

    /// Output directory (relative to project root)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Project root directory
    #[arg(short, long)]
    pub root: Option<PathBuf>,

    /// Config file name (default: mailforge.toml)
    #[arg(short = 'C', long, default_value = "mailforge.toml")]
    pub config: PathBuf,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Compile every template once and exit
    Build,

    /// Compile the templates, then serve them. Rebuild and reload on change
    Serve {
        /// Interface to bind on
        #[arg(short, long)]
        interface: Option<String>,

        /// Static server port
        #[arg(short, long)]
        port: Option<u16>,

        /// Live-reload server port
        #[arg(long)]
        reload_port: Option<u16>,

        /// enable watch
        #[arg(short, long, action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = false)]
        watch: Option<bool>,
    },
}

#[allow(unused)]
impl Cli {
    pub const fn is_build(&self) -> bool {
        matches!(self.command, Commands::Build)
    }
    pub const fn is_serve(&self) -> bool {
        matches!(self.command, Commands::Serve { .. })
    }
}
