use keeper_core::EngineError;
use keeper_platform::AppPathsError;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Paths(#[from] AppPathsError),

    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("no instance matches '{0}'")]
    UnknownInstance(String),

    #[error("an instance named '{0}' already exists")]
    DuplicateName(String),

    #[error("'{0}' is in use by another keeper process")]
    InUse(String),

    #[error("no release is published for this operating system and architecture")]
    UnsupportedPlatform,

    #[error("{0}")]
    Message(String),
}

impl AppError {
    pub fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

#[cfg(test)]
mod tests {
    use keeper_core::{Command, EngineError, InstanceState};

    use super::AppError;

    #[test]
    fn engine_errors_display_unchanged() {
        let error = AppError::from(EngineError::InvalidOperation {
            command: Command::Update,
            state: InstanceState::Running,
        });
        assert_eq!(
            error.to_string(),
            "update is not allowed while the instance is running"
        );
    }

    #[test]
    fn io_errors_carry_context() {
        let error = AppError::io(
            "failed to delete instance files",
            std::io::Error::other("busy"),
        );
        assert_eq!(error.to_string(), "failed to delete instance files: busy");
    }
}
