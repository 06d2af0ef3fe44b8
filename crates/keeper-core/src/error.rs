use std::fmt;
use std::path::Path;

use thiserror::Error;

use crate::state::{Command, DepState, InstanceState};

/// Coarse classification callers use to decide how to surface a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Decode,
    Extract,
    Io,
    Safety,
    Launch,
    InvalidOperation,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Network => "network",
            Self::Decode => "decode",
            Self::Extract => "extract",
            Self::Io => "io",
            Self::Safety => "safety",
            Self::Launch => "launch",
            Self::InvalidOperation => "invalid operation",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{context}: {source}")]
    Http {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{context} failed with HTTP {status}{body_snippet}")]
    HttpStatus {
        context: &'static str,
        status: reqwest::StatusCode,
        body_snippet: String,
    },

    #[error("no release asset named {expected}")]
    AssetNotFound { expected: String },

    #[error("failed to parse release metadata: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("archive extraction failed{}: {stderr}", .exit_code.map(|code| format!(" (exit code {code})")).unwrap_or_default())]
    ExtractFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("{context}: {source}")]
    Archive {
        context: &'static str,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("unsupported archive format: {file_name}")]
    UnsupportedArchive { file_name: String },

    #[error("{context} ({path}): {source}")]
    Io {
        context: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("refusing to install into {path}: {reason}")]
    Safety { path: String, reason: &'static str },

    #[error("failed to launch {path}: {details}")]
    Launch { path: String, details: String },

    #[error("{command} is not allowed while the instance is {state}")]
    InvalidOperation {
        command: Command,
        state: InstanceState,
    },

    #[error("{context}: {source}")]
    Task {
        context: &'static str,
        /// What the failed background task was doing.
        kind: ErrorKind,
        #[source]
        source: tokio::task::JoinError,
    },

    #[error("cannot {command} {instance}: it is in use by another keeper process")]
    Busy { instance: String, command: Command },

    #[error("cannot install {name} while it is {state}")]
    DependencyState { name: String, state: DepState },

    #[error("no download is known for {name} on this platform")]
    NoInstallSource { name: String },

    #[error("{0}")]
    Invalid(String),
}

impl EngineError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Http { .. } | Self::HttpStatus { .. } | Self::AssetNotFound { .. } => {
                ErrorKind::Network
            }
            Self::Decode(_) => ErrorKind::Decode,
            Self::ExtractFailed { .. } | Self::Archive { .. } | Self::UnsupportedArchive { .. } => {
                ErrorKind::Extract
            }
            Self::Io { .. } | Self::Invalid(_) => ErrorKind::Io,
            Self::Safety { .. } => ErrorKind::Safety,
            Self::Launch { .. } => ErrorKind::Launch,
            Self::InvalidOperation { .. }
            | Self::Busy { .. }
            | Self::DependencyState { .. }
            | Self::NoInstallSource { .. } => ErrorKind::InvalidOperation,
            Self::Task { kind, .. } => *kind,
        }
    }

    pub(crate) fn http(context: &'static str, source: reqwest::Error) -> Self {
        Self::Http { context, source }
    }

    pub(crate) fn io(context: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.display().to_string(),
            source,
        }
    }

    pub(crate) fn zip(context: &'static str, source: zip::result::ZipError) -> Self {
        Self::Archive { context, source }
    }

    pub(crate) fn safety(path: &Path, reason: &'static str) -> Self {
        Self::Safety {
            path: path.display().to_string(),
            reason,
        }
    }

    pub(crate) fn task(
        context: &'static str,
        kind: ErrorKind,
        source: tokio::task::JoinError,
    ) -> Self {
        Self::Task {
            context,
            kind,
            source,
        }
    }

    pub(crate) fn launch(path: &Path, details: impl Into<String>) -> Self {
        Self::Launch {
            path: path.display().to_string(),
            details: details.into(),
        }
    }

    /// The underlying I/O error kind, when this is a filesystem failure.
    #[must_use]
    pub fn io_kind(&self) -> Option<std::io::ErrorKind> {
        match self {
            Self::Io { source, .. } => Some(source.kind()),
            _ => None,
        }
    }
}

pub(crate) fn response_snippet(body: &str, max_chars: usize) -> String {
    let snippet: String = body.chars().take(max_chars).collect();
    if snippet.is_empty() {
        String::new()
    } else {
        format!(": {snippet}")
    }
}
