use std::ffi::OsStr;
use std::process::Stdio;

use tokio::process::Command;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// A [`Command`] for a program keeper runs on the user's behalf: `tar`,
/// version checks, dependency checks and the managed program itself.
///
/// Stdin is closed so nothing ever waits on the terminal, and on Windows no
/// console window is allocated.
pub fn helper_command(program: impl AsRef<OsStr>) -> Command {
    let mut command = Command::new(program);
    command.stdin(Stdio::null());
    #[cfg(windows)]
    command.creation_flags(CREATE_NO_WINDOW);
    command
}
