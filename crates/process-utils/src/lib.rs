//! Child-process helpers shared across the workspace.
//!
//! Everything here spawns through [`tokio_command`], so console windows stay
//! hidden on Windows and callers never have to repeat the platform dance.

use std::ffi::OsStr;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

#[cfg(feature = "tokio")]
pub use capture::{CapturedOutput, probe_version, run_captured};

#[cfg(feature = "tokio")]
mod capture {
    use std::ffi::OsStr;
    use std::io;
    use std::process::{ExitStatus, Stdio};
    use std::time::Duration;

    use super::tokio_command;

    /// Output of a short-lived child process run to completion.
    #[derive(Debug)]
    pub struct CapturedOutput {
        pub status: ExitStatus,
        pub stdout: String,
        pub stderr: String,
    }

    impl CapturedOutput {
        pub fn success(&self) -> bool {
            self.status.success()
        }
    }

    /// Run `program args..` to completion and capture both streams.
    ///
    /// The child is killed if it outlives `timeout`, in which case an
    /// [`io::ErrorKind::TimedOut`] error is returned.
    pub async fn run_captured<I, S>(
        program: impl AsRef<OsStr>,
        args: I,
        timeout: Duration,
    ) -> io::Result<CapturedOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let child = tokio_command(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "process timed out"))??;

        Ok(CapturedOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run `program args.. --version` and return the first line it prints.
    ///
    /// Returns `Ok(None)` when the program starts but exits unsuccessfully or
    /// prints nothing; spawn failures (missing executable) are returned as
    /// errors.
    pub async fn probe_version<I, S>(
        program: impl AsRef<OsStr>,
        args: I,
        timeout: Duration,
    ) -> io::Result<Option<String>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut full_args: Vec<std::ffi::OsString> = args
            .into_iter()
            .map(|a| a.as_ref().to_os_string())
            .collect();
        full_args.push("--version".into());

        let output = run_captured(program, full_args, timeout).await?;
        if !output.success() {
            return Ok(None);
        }

        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string))
    }

}
