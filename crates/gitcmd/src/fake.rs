//! Scripted in-memory [`GitRunner`] for tests
//!
//! Every invocation is recorded. Replies come from rules matched against the
//! command line (working directory followed by the arguments); unmatched
//! commands succeed with empty output. `clone` and `init` create the
//! destination's `.git` directory so callers that check for a checkout on
//! disk see one.

use crate::{Error, GitRunner, Result};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// One recorded git invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub dir: Option<PathBuf>,
    pub args: Vec<String>,
    pub timeout: Option<Duration>,
}

impl Call {
    /// Directory followed by the arguments, space separated
    pub fn command_line(&self) -> String {
        match self.dir {
            Some(ref dir) => format!("{} {}", dir.display(), self.args.join(" ")),
            None => self.args.join(" "),
        }
    }

    /// The git subcommand, skipping a leading `-C <dir>`
    pub fn subcommand(&self) -> Option<&str> {
        let args = match self.args.first().map(String::as_str) {
            Some("-C") => &self.args[2.min(self.args.len())..],
            _ => &self.args[..],
        };
        args.first().map(String::as_str)
    }

    fn matches(&self, pattern: &str) -> bool {
        let line = self.command_line();
        pattern.split_whitespace().all(|token| line.contains(token))
    }
}

#[derive(Debug, Clone)]
enum Reply {
    Output(Vec<u8>),
    Fail { status: i32, output: String },
}

#[derive(Debug)]
struct Rule {
    pattern: String,
    reply: Reply,
    remaining: Option<usize>,
}

/// Test double recording calls and replaying scripted results
#[derive(Debug, Default)]
pub struct FakeGit {
    calls: Mutex<Vec<Call>>,
    rules: Mutex<Vec<Rule>>,
}

impl FakeGit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Succeed with `output` whenever every token of `pattern` appears in the command line
    pub fn respond(&self, pattern: &str, output: impl Into<Vec<u8>>) {
        self.push(pattern, Reply::Output(output.into()), None);
    }

    /// Fail with `status` and `output` on every matching command
    pub fn fail(&self, pattern: &str, status: i32, output: &str) {
        self.push(
            pattern,
            Reply::Fail {
                status,
                output: output.to_string(),
            },
            None,
        );
    }

    /// Fail only the first `times` matching commands
    pub fn fail_times(&self, pattern: &str, times: usize, status: i32, output: &str) {
        self.push(
            pattern,
            Reply::Fail {
                status,
                output: output.to_string(),
            },
            Some(times),
        );
    }

    /// Every call so far, in order
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Calls whose command line contains every token of `pattern`
    pub fn calls_matching(&self, pattern: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| call.matches(pattern))
            .collect()
    }

    fn push(&self, pattern: &str, reply: Reply, remaining: Option<usize>) {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                pattern: pattern.to_string(),
                reply,
                remaining,
            });
        }
    }

    fn invoke(&self, dir: Option<&Path>, timeout: Option<Duration>, args: &[&str]) -> Result<Vec<u8>> {
        let call = Call {
            dir: dir.map(Path::to_path_buf),
            args: args.iter().map(|a| a.to_string()).collect(),
            timeout,
        };

        let reply = self.rules.lock().ok().and_then(|mut rules| {
            let rule = rules.iter_mut().find(|rule| {
                rule.remaining != Some(0) && call.matches(&rule.pattern)
            })?;
            if let Some(ref mut n) = rule.remaining {
                *n -= 1;
            }
            Some(rule.reply.clone())
        });

        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call.clone());
        }

        match reply {
            Some(Reply::Fail { status, output }) => Err(Error::CommandFailed {
                args: args.join(" "),
                status: Some(status),
                output,
            }),
            Some(Reply::Output(bytes)) => {
                create_checkout(&call)?;
                Ok(bytes)
            }
            None => {
                create_checkout(&call)?;
                Ok(Vec::new())
            }
        }
    }
}

/// Mimic the on-disk effect of `clone` and `init`
fn create_checkout(call: &Call) -> Result<()> {
    if !matches!(call.subcommand(), Some("clone") | Some("init")) {
        return Ok(());
    }
    let Some(dest) = call.args.last() else {
        return Ok(());
    };

    let base = match call.args.first().map(String::as_str) {
        Some("-C") => call.args.get(1).map(PathBuf::from),
        _ => call.dir.clone(),
    };
    let dest = match base {
        Some(base) => base.join(dest),
        None => PathBuf::from(dest),
    };
    std::fs::create_dir_all(dest.join(".git"))?;
    Ok(())
}

impl GitRunner for FakeGit {
    fn run(&self, args: &[&str]) -> Result<Vec<u8>> {
        self.invoke(None, None, args)
    }

    fn run_in_dir(&self, dir: &Path, args: &[&str]) -> Result<Vec<u8>> {
        self.invoke(Some(dir), None, args)
    }

    fn run_with_timeout(&self, timeout: Duration, args: &[&str]) -> Result<Vec<u8>> {
        self.invoke(None, Some(timeout), args)
    }
}
