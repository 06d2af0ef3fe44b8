use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Externally visible state of one instance. Derived on demand, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceState {
    /// Nothing installed yet.
    Downloadable,
    /// Installed, up to date, not running.
    Runnable,
    /// Installed, a newer release exists, not running.
    Updatable,
    /// A live child process exists.
    Running,
}

impl InstanceState {
    /// A live process wins over everything else; otherwise the installed
    /// version decides.
    #[must_use]
    pub fn derive(has_local_version: bool, update_available: bool, is_running: bool) -> Self {
        match (is_running, has_local_version, update_available) {
            (true, _, _) => Self::Running,
            (false, false, _) => Self::Downloadable,
            (false, true, true) => Self::Updatable,
            (false, true, false) => Self::Runnable,
        }
    }

    #[must_use]
    pub fn allows(self, command: Command) -> bool {
        matches!(
            (self, command),
            (Self::Downloadable, Command::Download | Command::Move)
                | (
                    Self::Runnable | Self::Updatable,
                    Command::Start | Command::Update | Command::Rollback | Command::Move
                )
                | (Self::Running, Command::Stop)
        )
    }

    /// Commands the presentation layer may offer in this state.
    #[must_use]
    pub fn allowed_commands(self) -> &'static [Command] {
        match self {
            Self::Downloadable => &[Command::Download, Command::Move],
            Self::Runnable | Self::Updatable => &[
                Command::Start,
                Command::Update,
                Command::Rollback,
                Command::Move,
            ],
            Self::Running => &[Command::Stop],
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Downloadable => "downloadable",
            Self::Runnable => "runnable",
            Self::Updatable => "updatable",
            Self::Running => "running",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    Download,
    Update,
    Start,
    Stop,
    Rollback,
    /// Relocate the instance directory.
    Move,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Download => "download",
            Self::Update => "update",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Rollback => "rollback",
            Self::Move => "move",
        };
        f.write_str(name)
    }
}

/// Reject a command issued outside its legal state.
///
/// # Errors
/// Returns [`EngineError::InvalidOperation`] when `state` does not allow
/// `command`.
pub fn ensure_allowed(state: InstanceState, command: Command) -> Result<(), EngineError> {
    if state.allows(command) {
        Ok(())
    } else {
        Err(EngineError::InvalidOperation { command, state })
    }
}

/// State of an auxiliary runtime dependency such as ffmpeg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DepState {
    Checking,
    NotInstalled,
    Installed,
}

impl fmt::Display for DepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Checking => "checking",
            Self::NotInstalled => "not installed",
            Self::Installed => "installed",
        };
        f.write_str(name)
    }
}
