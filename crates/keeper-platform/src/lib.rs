mod commands;
mod paths;
mod target;

pub use commands::helper_command;
pub use paths::{AppPaths, AppPathsError};
pub use target::{Platform, TargetArch, TargetOs};
