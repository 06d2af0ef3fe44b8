use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "keeper", version, about = "Install, update, and run bot instances")]
pub struct Cli {
    /// Write debug output to the log regardless of settings.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List configured instances.
    List,

    /// Register an instance. Existing installs at the path are picked up.
    Add {
        name: String,
        /// Install folder; defaults to `<instances dir>/<name>`.
        #[arg(long)]
        path: Option<PathBuf>,
        /// Start this instance when `keeper start` runs without a name.
        #[arg(long)]
        auto_start: bool,
        #[arg(long)]
        icon: Option<String>,
    },

    /// Forget an instance. Refused while another keeper process uses it.
    Remove {
        instance: String,
        /// Also delete the install folder and its backup.
        #[arg(long)]
        delete_files: bool,
    },

    /// Fetch the latest release and show which instances can update.
    Check,

    /// Show state and available commands.
    Status { instance: Option<String> },

    /// Install the latest release into an empty instance.
    Download { instance: String },

    /// Install the latest release over an existing install.
    Update { instance: String },

    /// Run an instance (or every auto-start instance) until it exits or
    /// Ctrl-C is pressed.
    Start { instance: Option<String> },

    /// Put the previous install back.
    Rollback { instance: String },

    /// Convert instances still using the old `system/` folder layout.
    Migrate { instance: Option<String> },

    /// Move an instance folder, with its backup, to a new path.
    Move {
        instance: String,
        /// New install folder; must not exist or be empty.
        path: PathBuf,
    },

    /// Check for ffmpeg and yt-dlp.
    Deps {
        /// Download the missing ones into keeper's tools folder.
        #[arg(long)]
        install: bool,
    },

    /// Open the install folder in the file manager.
    Open { instance: String },
}
