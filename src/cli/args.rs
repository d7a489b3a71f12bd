//! CLI argument parsing using clap.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Live reload for local text files
#[derive(Parser, Debug)]
#[command(
    name = "mdlive",
    version = env!("CARGO_PKG_VERSION"),
    about = "Serve local files and push reloads to the browser when they change",
    next_line_help = true,
    styles = clap_cargo_style()
)]
pub struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create .mdlive/settings.toml with default values
    #[command(about = "Set up .mdlive directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration settings
    #[command(about = "Display active settings from .mdlive/settings.toml")]
    Config,

    /// Start the live-reload server
    #[command(
        about = "Serve files and push reloads on change",
        after_help = "Examples:\n  mdlive serve README.md\n  mdlive serve notes.md todo.md --port 4000\n  mdlive serve --root ./docs docs/index.md\n\nEndpoints:\n  GET /api/events?path=FILE   SSE stream\n  GET /api/file?path=FILE     File content\n  GET /api/status             Watched files"
    )]
    Serve {
        /// Files to serve; the first is the default for requests without `path`
        #[arg(value_name = "FILE")]
        files: Vec<PathBuf>,

        /// Port to listen on (keeps the configured host)
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to listen on, e.g. 0.0.0.0:3000 (overrides config)
        #[arg(long)]
        bind: Option<String>,

        /// Only allow files under this directory
        #[arg(long)]
        root: Option<PathBuf>,

        /// Quiet period after a change before reloading (overrides config)
        #[arg(long)]
        debounce_ms: Option<u64>,
    },
}
