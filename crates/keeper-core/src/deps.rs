use std::path::{Path, PathBuf};
use std::process::Stdio;

use keeper_platform::helper_command;
use log::{debug, info};
use tokio::sync::watch;

use crate::download::{ProgressSender, download};
use crate::error::EngineError;
use crate::extract::extract_archive;
use crate::state::DepState;

const FFMPEG_WINDOWS_URL: &str = "https://github.com/GyanD/codexffmpeg/releases/download/6.1.1/ffmpeg-6.1.1-essentials_build.zip";
const YT_DLP_RELEASE_URL: &str = "https://github.com/yt-dlp/yt-dlp/releases/latest/download/";

/// Where an installable dependency is fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencySource {
    /// The executable itself.
    Binary { url: String },
    /// An archive with the named executables somewhere inside it.
    Archive {
        url: String,
        executables: Vec<String>,
    },
}

impl DependencySource {
    fn url(&self) -> &str {
        match self {
            Self::Binary { url } | Self::Archive { url, .. } => url,
        }
    }
}

/// An external program the managed application needs at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeDependency {
    pub name: String,
    pub program: String,
    pub version_args: Vec<String>,
    pub source: Option<DependencySource>,
    /// keeper's own tools directory, searched before `PATH` and used as the
    /// install target.
    pub tools_dir: Option<PathBuf>,
}

impl RuntimeDependency {
    #[must_use]
    pub fn new(name: impl Into<String>, program: impl Into<String>, version_args: &[&str]) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            version_args: version_args.iter().map(ToString::to_string).collect(),
            source: None,
            tools_dir: None,
        }
    }

    /// Only the Windows build of ffmpeg ships as a zip; elsewhere it comes
    /// from the system package manager.
    #[must_use]
    pub fn ffmpeg() -> Self {
        let dependency = Self::new("FFMPEG", "ffmpeg", &["-version"]);
        if cfg!(windows) {
            dependency.with_source(DependencySource::Archive {
                url: FFMPEG_WINDOWS_URL.to_string(),
                executables: vec!["ffmpeg.exe".to_string(), "ffprobe.exe".to_string()],
            })
        } else {
            dependency
        }
    }

    #[must_use]
    pub fn yt_dlp() -> Self {
        let asset = if cfg!(windows) {
            "yt-dlp.exe"
        } else if cfg!(target_os = "macos") {
            "yt-dlp_macos"
        } else {
            "yt-dlp"
        };
        Self::new("yt-dlp", "yt-dlp", &["--version"]).with_source(DependencySource::Binary {
            url: format!("{YT_DLP_RELEASE_URL}{asset}"),
        })
    }

    #[must_use]
    pub fn with_source(mut self, source: DependencySource) -> Self {
        self.source = Some(source);
        self
    }

    #[must_use]
    pub fn with_tools_dir(mut self, tools_dir: impl Into<PathBuf>) -> Self {
        self.tools_dir = Some(tools_dir.into());
        self
    }

    fn tool_file_name(&self) -> String {
        format!("{}{}", self.program, std::env::consts::EXE_SUFFIX)
    }

    /// The copy in the tools directory if there is one, else whatever `PATH`
    /// resolves.
    #[must_use]
    pub fn locate(&self) -> Option<PathBuf> {
        if let Some(tools_dir) = &self.tools_dir {
            let local = tools_dir.join(self.tool_file_name());
            if local.is_file() {
                return Some(local);
            }
        }
        which::which(&self.program).ok()
    }

    /// Installed means the program can be found and started. Its exit status
    /// is not inspected.
    pub async fn check(&self) -> DepState {
        let Some(path) = self.locate() else {
            debug!("{} not found", self.program);
            return DepState::NotInstalled;
        };

        let spawned = helper_command(&path)
            .args(&self.version_args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match spawned {
            Ok(_) => DepState::Installed,
            Err(error) => {
                debug!("Failed to run {}: {error}", path.display());
                DepState::NotInstalled
            }
        }
    }

    /// Download the dependency into the tools directory and return the path
    /// of its main executable.
    ///
    /// # Errors
    /// [`EngineError::NoInstallSource`] without a source, otherwise download,
    /// extraction and file system failures.
    pub async fn install(
        &self,
        client: &reqwest::Client,
        progress: &ProgressSender,
    ) -> Result<PathBuf, EngineError> {
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| EngineError::NoInstallSource {
                name: self.name.clone(),
            })?;
        let tools_dir = self.tools_dir.as_deref().ok_or_else(|| {
            EngineError::Invalid(format!("no tools directory set for {}", self.name))
        })?;

        std::fs::create_dir_all(tools_dir).map_err(|error| {
            EngineError::io("failed to create tools directory", tools_dir, error)
        })?;
        let scratch = tempfile::Builder::new()
            .prefix(".install")
            .tempdir_in(tools_dir)
            .map_err(|error| {
                EngineError::io("failed to create scratch directory", tools_dir, error)
            })?;

        let downloaded = scratch.path().join(download_file_name(source.url()));
        download(client, source.url(), &downloaded, &self.name, progress).await?;

        match source {
            DependencySource::Binary { .. } => {
                place_executable(&downloaded, &tools_dir.join(self.tool_file_name()))?;
            }
            DependencySource::Archive { executables, .. } => {
                let extracted = scratch.path().join("extract");
                extract_archive(&downloaded, &extracted).await?;
                for executable in executables {
                    let found = find_file(&extracted, executable).ok_or_else(|| {
                        EngineError::ExtractFailed {
                            exit_code: None,
                            stderr: format!("{executable} is missing from the archive"),
                        }
                    })?;
                    place_executable(&found, &tools_dir.join(executable))?;
                }
            }
        }

        let installed = tools_dir.join(self.tool_file_name());
        info!("Installed {} to {}", self.name, installed.display());
        Ok(installed)
    }
}

fn download_file_name(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("download")
}

fn place_executable(source: &Path, destination: &Path) -> Result<(), EngineError> {
    std::fs::copy(source, destination)
        .map_err(|error| EngineError::io("failed to install executable", destination, error))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(destination, std::fs::Permissions::from_mode(0o755))
            .map_err(|error| EngineError::io("failed to mark executable", destination, error))?;
    }
    Ok(())
}

/// First regular file called `name` below `root`. Symlinks are not followed.
fn find_file(root: &Path, name: &str) -> Option<PathBuf> {
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() && entry.file_name() == name {
                return Some(entry.path());
            }
        }
    }
    None
}

/// Current state of one dependency, observable by the presentation layer.
#[derive(Debug)]
pub struct DependencyTracker {
    dependency: RuntimeDependency,
    state: watch::Sender<DepState>,
}

impl DependencyTracker {
    #[must_use]
    pub fn new(dependency: RuntimeDependency) -> Self {
        let (state, _) = watch::channel(DepState::Checking);
        Self { dependency, state }
    }

    #[must_use]
    pub fn dependency(&self) -> &RuntimeDependency {
        &self.dependency
    }

    #[must_use]
    pub fn state(&self) -> DepState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<DepState> {
        self.state.subscribe()
    }

    /// Re-run the check, reporting [`DepState::Checking`] meanwhile.
    pub async fn refresh(&self) -> DepState {
        self.state.send_replace(DepState::Checking);
        let result = self.dependency.check().await;
        self.state.send_replace(result);
        result
    }

    /// Install a dependency that was found missing. Reports
    /// [`DepState::Checking`] while working and ends in `Installed` or
    /// `NotInstalled`.
    ///
    /// # Errors
    /// [`EngineError::DependencyState`] unless the last check found it
    /// missing, otherwise the install failure.
    pub async fn install(
        &self,
        client: &reqwest::Client,
        progress: &ProgressSender,
    ) -> Result<DepState, EngineError> {
        let mut refused = None;
        self.state.send_if_modified(|state| {
            if *state == DepState::NotInstalled {
                *state = DepState::Checking;
                true
            } else {
                refused = Some(*state);
                false
            }
        });
        if let Some(state) = refused {
            return Err(EngineError::DependencyState {
                name: self.dependency.name.clone(),
                state,
            });
        }

        let result = self.dependency.install(client, progress).await;
        let state = match &result {
            Ok(_) => self.dependency.check().await,
            Err(_) => DepState::NotInstalled,
        };
        self.state.send_replace(state);
        result.map(|_| state)
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::{
        DependencySource, DependencyTracker, RuntimeDependency, download_file_name, find_file,
    };
    use crate::error::{EngineError, ErrorKind};
    use crate::state::DepState;

    #[test]
    fn presets_use_version_flags() {
        assert_eq!(RuntimeDependency::ffmpeg().program, "ffmpeg");
        assert_eq!(RuntimeDependency::ffmpeg().version_args, vec!["-version"]);
        assert_eq!(RuntimeDependency::yt_dlp().version_args, vec!["--version"]);
        assert!(matches!(
            RuntimeDependency::yt_dlp().source,
            Some(DependencySource::Binary { url }) if url.starts_with("https://github.com/yt-dlp/")
        ));
        assert_eq!(RuntimeDependency::ffmpeg().source.is_some(), cfg!(windows));
    }

    #[test]
    fn download_names_come_from_the_url_path() {
        assert_eq!(download_file_name("https://host/a/yt-dlp.exe"), "yt-dlp.exe");
        assert_eq!(download_file_name("https://host/a/tools.zip?x=1"), "tools.zip");
        assert_eq!(download_file_name("https://host/a/"), "a");
    }

    #[test]
    fn find_file_searches_nested_directories() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        std::fs::create_dir_all(temp.path().join("pack/bin")).expect("dirs created");
        std::fs::write(temp.path().join("pack/bin/tool"), "x").expect("file written");

        assert_eq!(
            find_file(temp.path(), "tool"),
            Some(temp.path().join("pack/bin/tool"))
        );
        assert_eq!(find_file(temp.path(), "other"), None);
    }

    #[tokio::test]
    async fn missing_program_is_not_installed() {
        let dependency = RuntimeDependency::new("ghost", "keeper-no-such-program-4f2a", &[]);
        assert_eq!(dependency.check().await, DepState::NotInstalled);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_exit_still_counts_as_installed() {
        let dependency = RuntimeDependency::new("shell", "sh", &["-c", "exit 4"]);
        assert_eq!(dependency.check().await, DepState::Installed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn tracker_reports_checking_until_refreshed() {
        let shell = RuntimeDependency::new("shell", "sh", &["-c", "true"]);
        let tracker = DependencyTracker::new(shell);
        let mut updates = tracker.subscribe();
        assert_eq!(tracker.state(), DepState::Checking);

        assert_eq!(tracker.refresh().await, DepState::Installed);
        assert_eq!(tracker.state(), DepState::Installed);
        assert!(updates.has_changed().expect("sender alive"));
        assert_eq!(*updates.borrow_and_update(), DepState::Installed);
    }

    #[tokio::test]
    async fn install_is_refused_unless_found_missing() {
        let tracker = DependencyTracker::new(
            RuntimeDependency::new("ghost", "keeper-no-such-program-4f2a", &[]).with_source(
                DependencySource::Binary {
                    url: "http://127.0.0.1:9/unused".to_string(),
                },
            ),
        );
        let (tx, _rx) = mpsc::unbounded_channel();

        let error = tracker
            .install(&reqwest::Client::new(), &tx)
            .await
            .expect_err("state is still checking");
        assert!(matches!(
            error,
            EngineError::DependencyState {
                state: DepState::Checking,
                ..
            }
        ));
        assert_eq!(error.kind(), ErrorKind::InvalidOperation);
        assert_eq!(tracker.state(), DepState::Checking);
    }

    #[tokio::test]
    async fn install_without_source_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let tracker = DependencyTracker::new(
            RuntimeDependency::new("ghost", "keeper-no-such-program-4f2a", &[])
                .with_tools_dir(temp.path()),
        );
        assert_eq!(tracker.refresh().await, DepState::NotInstalled);
        let (tx, _rx) = mpsc::unbounded_channel();

        let error = tracker
            .install(&reqwest::Client::new(), &tx)
            .await
            .expect_err("nothing to download");
        assert!(matches!(error, EngineError::NoInstallSource { .. }));
        assert_eq!(tracker.state(), DepState::NotInstalled);
    }

    #[cfg(unix)]
    mod unix {
        use std::io::{Cursor, Write};
        use std::os::unix::fs::PermissionsExt;

        use tokio::sync::mpsc;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};
        use zip::write::SimpleFileOptions;

        use super::super::{DependencySource, DependencyTracker, RuntimeDependency};
        use crate::error::ErrorKind;
        use crate::state::DepState;

        const SCRIPT: &[u8] = b"#!/bin/sh\necho 1.0\n";

        fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
            let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
            let options = SimpleFileOptions::default().unix_permissions(0o644);
            for (name, contents) in entries {
                writer.start_file(*name, options).expect("entry started");
                writer.write_all(contents).expect("entry written");
            }
            writer.finish().expect("zip finished").into_inner()
        }

        async fn missing_tracker(dependency: RuntimeDependency) -> DependencyTracker {
            let tracker = DependencyTracker::new(dependency);
            assert_eq!(tracker.refresh().await, DepState::NotInstalled);
            tracker
        }

        #[tokio::test]
        async fn binary_install_lands_in_tools_dir() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/download/keeper-test-tool"))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(SCRIPT))
                .mount(&server)
                .await;

            let temp = tempfile::tempdir().expect("tempdir should be created");
            let tools = temp.path().join("tools");
            let tracker = missing_tracker(
                RuntimeDependency::new("test tool", "keeper-test-tool", &["--version"])
                    .with_source(DependencySource::Binary {
                        url: format!("{}/download/keeper-test-tool", server.uri()),
                    })
                    .with_tools_dir(&tools),
            )
            .await;
            let (tx, _rx) = mpsc::unbounded_channel();

            let state = tracker
                .install(&reqwest::Client::new(), &tx)
                .await
                .expect("install should succeed");

            assert_eq!(state, DepState::Installed);
            assert_eq!(tracker.state(), DepState::Installed);
            let installed = tools.join("keeper-test-tool");
            assert_eq!(tracker.dependency().locate(), Some(installed.clone()));
            let mode = std::fs::metadata(&installed)
                .expect("installed file exists")
                .permissions()
                .mode();
            assert_eq!(mode & 0o111, 0o111);
            let leftovers: Vec<_> = std::fs::read_dir(&tools)
                .expect("tools dir readable")
                .flatten()
                .map(|entry| entry.file_name())
                .collect();
            assert_eq!(leftovers, vec!["keeper-test-tool"]);
        }

        #[tokio::test]
        async fn archive_install_copies_every_named_executable() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/tools.zip"))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(zip_bytes(&[
                    ("pack/bin/keeper-test-tool", SCRIPT),
                    ("pack/bin/keeper-test-helper", SCRIPT),
                    ("pack/README.txt", b"docs"),
                ])))
                .mount(&server)
                .await;

            let temp = tempfile::tempdir().expect("tempdir should be created");
            let tools = temp.path().join("tools");
            let tracker = missing_tracker(
                RuntimeDependency::new("test tool", "keeper-test-tool", &["--version"])
                    .with_source(DependencySource::Archive {
                        url: format!("{}/tools.zip", server.uri()),
                        executables: vec![
                            "keeper-test-tool".to_string(),
                            "keeper-test-helper".to_string(),
                        ],
                    })
                    .with_tools_dir(&tools),
            )
            .await;
            let (tx, _rx) = mpsc::unbounded_channel();

            let state = tracker
                .install(&reqwest::Client::new(), &tx)
                .await
                .expect("install should succeed");

            assert_eq!(state, DepState::Installed);
            assert!(tools.join("keeper-test-tool").is_file());
            assert!(tools.join("keeper-test-helper").is_file());
            assert!(!tools.join("README.txt").exists());
        }

        #[tokio::test]
        async fn archive_without_the_executable_fails_cleanly() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/tools.zip"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_bytes(zip_bytes(&[("pack/README.txt", b"docs")])),
                )
                .mount(&server)
                .await;

            let temp = tempfile::tempdir().expect("tempdir should be created");
            let tools = temp.path().join("tools");
            let tracker = missing_tracker(
                RuntimeDependency::new("test tool", "keeper-test-tool", &["--version"])
                    .with_source(DependencySource::Archive {
                        url: format!("{}/tools.zip", server.uri()),
                        executables: vec!["keeper-test-tool".to_string()],
                    })
                    .with_tools_dir(&tools),
            )
            .await;
            let (tx, _rx) = mpsc::unbounded_channel();

            let error = tracker
                .install(&reqwest::Client::new(), &tx)
                .await
                .expect_err("executable is missing");

            assert_eq!(error.kind(), ErrorKind::Extract);
            assert_eq!(tracker.state(), DepState::NotInstalled);
            assert_eq!(
                std::fs::read_dir(&tools).expect("tools dir readable").count(),
                0
            );
        }
    }
}
