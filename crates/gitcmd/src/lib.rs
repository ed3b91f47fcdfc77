//! Narrow subprocess runner for the `git` executable
//!
//! Callers never link against git internals; they shell out through the
//! [`GitRunner`] trait so tests can substitute a scripted implementation.
//!
//! # Example
//!
//! ```no_run
//! use gitcmd::{Git, GitRunner};
//! use std::path::Path;
//!
//! let git = Git::new()?;
//!
//! // Query a repository
//! let head = git.run_in_dir(Path::new("."), &["rev-parse", "HEAD"])?;
//! println!("{}", String::from_utf8_lossy(&head).trim());
//! # Ok::<(), gitcmd::Error>(())
//! ```

pub mod fake;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors that can occur when running git
#[derive(Error, Debug)]
pub enum Error {
    #[error("git is not installed or not in PATH")]
    NotInstalled,

    /// Git ran but exited unsuccessfully; `output` holds stdout and stderr
    #[error("git {args}: exit status {status}: {output}", status = display_status(.status))]
    CommandFailed {
        args: String,
        status: Option<i32>,
        output: String,
    },

    #[error("git {args}: timed out after {}s", .timeout.as_secs())]
    Timeout { args: String, timeout: Duration },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn display_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

impl Error {
    /// Exit code of the failed git process, if it exited normally
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Error::CommandFailed { status, .. } => *status,
            _ => None,
        }
    }

    /// Combined output captured from the failed process
    pub fn output(&self) -> Option<&str> {
        match self {
            Error::CommandFailed { output, .. } => Some(output),
            _ => None,
        }
    }
}

/// Result type for git operations
pub type Result<T> = std::result::Result<T, Error>;

/// The capability the sync engine needs from a git execution layer.
///
/// Every method returns the combined stdout/stderr bytes on success.
pub trait GitRunner: Send + Sync {
    /// Run git in the current working directory
    fn run(&self, args: &[&str]) -> Result<Vec<u8>>;

    /// Run git inside `dir`
    fn run_in_dir(&self, dir: &Path, args: &[&str]) -> Result<Vec<u8>>;

    /// Run git, killing the process if it outlives `timeout`
    fn run_with_timeout(&self, timeout: Duration, args: &[&str]) -> Result<Vec<u8>>;
}

/// Output of a git command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Get combined stdout and stderr output
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Git CLI wrapper
#[derive(Debug, Clone)]
pub struct Git {
    /// Executable to invoke (normally `git`)
    program: PathBuf,
}

impl Default for Git {
    fn default() -> Self {
        Self {
            program: PathBuf::from("git"),
        }
    }
}

impl Git {
    /// Create a new Git instance, verifying the executable is available
    pub fn new() -> Result<Self> {
        let git = Self::default();
        if !git.is_available() {
            return Err(Error::NotInstalled);
        }
        Ok(git)
    }

    /// Check if git is available
    pub fn is_available(&self) -> bool {
        self.output(None, &["--version"]).is_ok()
    }

    /// Run a command and return the full output, failing on non-zero exit
    pub fn output(&self, dir: Option<&Path>, args: &[&str]) -> Result<CommandOutput> {
        let mut cmd = self.command(dir, args);
        let output = cmd.output().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotInstalled,
            _ => Error::Io(e),
        })?;

        let result = CommandOutput {
            success: output.status.success(),
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };
        check(args, result)
    }

    // --- Private helpers ---

    fn command(&self, dir: Option<&Path>, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);

        // Never block on a credential prompt
        cmd.env("GIT_TERMINAL_PROMPT", "0");

        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    fn output_with_timeout(&self, timeout: Duration, args: &[&str]) -> Result<CommandOutput> {
        let mut child = self
            .command(None, args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => Error::NotInstalled,
                _ => Error::Io(e),
            })?;

        // Drain pipes on their own threads so a chatty child can't fill them and stall
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let deadline = Instant::now() + timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Timeout {
                    args: args.join(" "),
                    timeout,
                });
            }
            thread::sleep(Duration::from_millis(20));
        };

        let collect = |handle: Option<thread::JoinHandle<Vec<u8>>>| {
            handle
                .and_then(|h| h.join().ok())
                .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
                .unwrap_or_default()
        };

        let result = CommandOutput {
            success: status.success(),
            status: status.code(),
            stdout: collect(stdout),
            stderr: collect(stderr),
        };
        check(args, result)
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn check(args: &[&str], output: CommandOutput) -> Result<CommandOutput> {
    if output.success {
        Ok(output)
    } else {
        Err(Error::CommandFailed {
            args: args.join(" "),
            status: output.status,
            output: output.combined().trim().to_string(),
        })
    }
}

impl GitRunner for Git {
    fn run(&self, args: &[&str]) -> Result<Vec<u8>> {
        Ok(self.output(None, args)?.combined().into_bytes())
    }

    fn run_in_dir(&self, dir: &Path, args: &[&str]) -> Result<Vec<u8>> {
        Ok(self.output(Some(dir), args)?.combined().into_bytes())
    }

    fn run_with_timeout(&self, timeout: Duration, args: &[&str]) -> Result<Vec<u8>> {
        Ok(self.output_with_timeout(timeout, args)?.combined().into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_available() {
        // This test only passes if git is installed
        if let Ok(git) = Git::new() {
            assert!(git.is_available());
        }
    }

    #[test]
    fn test_command_output_combined() {
        let output = CommandOutput {
            success: true,
            status: Some(0),
            stdout: "output".to_string(),
            stderr: "".to_string(),
        };
        assert_eq!(output.combined(), "output");

        let output_with_err = CommandOutput {
            success: false,
            status: Some(1),
            stdout: "out".to_string(),
            stderr: "err".to_string(),
        };
        assert_eq!(output_with_err.combined(), "out\nerr");
    }

    #[test]
    fn test_command_failed_mentions_exit_status() {
        let err = Error::CommandFailed {
            args: "fetch origin".to_string(),
            status: Some(128),
            output: "fatal: unable to access".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("exit status 128"));
        assert!(msg.contains("fetch origin"));
        assert_eq!(err.exit_code(), Some(128));
        assert_eq!(err.output(), Some("fatal: unable to access"));
    }

    #[test]
    fn test_missing_program_is_not_installed() {
        let git = Git {
            program: PathBuf::from("/nonexistent/definitely-not-git"),
        };
        assert!(!git.is_available());
        assert!(matches!(git.run(&["status"]), Err(Error::NotInstalled)));
    }

    // Integration tests (require git to be installed)
    #[test]
    #[ignore]
    fn test_run_in_dir_init() {
        let temp = tempfile::TempDir::new().unwrap();
        let git = Git::new().unwrap();
        git.run_in_dir(temp.path(), &["init", "-q"]).unwrap();
        assert!(temp.path().join(".git").exists());

        let err = git
            .run_in_dir(temp.path(), &["rev-parse", "--verify", "nope"])
            .unwrap_err();
        assert!(err.exit_code().is_some());
    }

    #[test]
    #[ignore]
    fn test_run_with_timeout_succeeds() {
        let git = Git::new().unwrap();
        let out = git
            .run_with_timeout(Duration::from_secs(10), &["--version"])
            .unwrap();
        assert!(String::from_utf8_lossy(&out).contains("git version"));
    }
}
