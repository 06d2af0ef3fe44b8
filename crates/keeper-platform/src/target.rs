use std::fmt;

/// Operating system token used in release asset names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetOs {
    Windows,
    MacOs,
    Linux,
}

impl TargetOs {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Windows => "win",
            Self::MacOs => "osx",
            Self::Linux => "linux",
        }
    }
}

impl fmt::Display for TargetOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CPU architecture token used in release asset names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetArch {
    X64,
    Arm64,
}

impl TargetArch {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::X64 => "x64",
            Self::Arm64 => "arm64",
        }
    }
}

impl fmt::Display for TargetArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform {
    pub os: TargetOs,
    pub arch: TargetArch,
}

impl Platform {
    #[must_use]
    pub fn new(os: TargetOs, arch: TargetArch) -> Self {
        Self { os, arch }
    }

    /// The platform this binary was compiled for, or `None` when no release
    /// asset is published for it.
    #[must_use]
    pub fn current() -> Option<Self> {
        let os = if cfg!(target_os = "windows") {
            TargetOs::Windows
        } else if cfg!(target_os = "macos") {
            TargetOs::MacOs
        } else if cfg!(target_os = "linux") {
            TargetOs::Linux
        } else {
            return None;
        };

        let arch = if cfg!(target_arch = "x86_64") {
            TargetArch::X64
        } else if cfg!(target_arch = "aarch64") {
            TargetArch::Arm64
        } else {
            return None;
        };

        Some(Self { os, arch })
    }

    /// Windows builds ship as zip, everything else as gzip-compressed tar.
    #[must_use]
    pub fn archive_extension(self) -> &'static str {
        match self.os {
            TargetOs::Windows => ".zip",
            TargetOs::MacOs | TargetOs::Linux => ".tar.gz",
        }
    }

    /// `{product}-{os}-{arch}`, the name of the build directory inside a
    /// release archive.
    #[must_use]
    pub fn build_dir_name(self, product: &str) -> String {
        format!("{product}-{}-{}", self.os, self.arch)
    }

    /// `{product}-{os}-{arch}{ext}`, the expected release asset file name.
    #[must_use]
    pub fn asset_name(self, product: &str) -> String {
        format!("{}{}", self.build_dir_name(product), self.archive_extension())
    }

    /// File name of the managed program's executable on this platform.
    #[must_use]
    pub fn executable_file_name(self, base: &str) -> String {
        match self.os {
            TargetOs::Windows => format!("{base}.exe"),
            TargetOs::MacOs | TargetOs::Linux => base.to_string(),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os, self.arch)
    }
}
