//! User-visible sync output
//!
//! The engine never prints directly. It writes through an injected
//! [`Reporter`], wrapped in [`Output`] which applies quiet/verbose policy, so
//! tests can capture exactly what a user would see.

use crate::retry::diagnose_git_error;
use std::sync::{Arc, Mutex};

/// Sink for progress, info and error lines
pub trait Reporter: Send + Sync {
    fn info(&self, message: &str);
    fn progress(&self, phase: &str, done: usize, total: usize);
    fn error(&self, message: &str);
}

/// Forwards everything to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn info(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn progress(&self, phase: &str, done: usize, total: usize) {
        tracing::debug!(phase, done, total, "progress");
    }

    fn error(&self, message: &str) {
        tracing::error!("{}", message);
    }
}

/// Writes to stderr for the CLI
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn info(&self, message: &str) {
        eprintln!("{}", message);
    }

    fn progress(&self, phase: &str, done: usize, total: usize) {
        eprintln!("{}: {}/{}", phase, done, total);
    }

    fn error(&self, message: &str) {
        eprintln!("error: {}", message);
    }
}

/// Keeps every line in memory
#[derive(Debug, Default)]
pub struct MemoryReporter {
    lines: Mutex<Vec<String>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything reported so far
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    fn push(&self, line: String) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line);
        }
    }
}

impl Reporter for MemoryReporter {
    fn info(&self, message: &str) {
        self.push(format!("info: {}", message));
    }

    fn progress(&self, phase: &str, done: usize, total: usize) {
        self.push(format!("progress: {} {}/{}", phase, done, total));
    }

    fn error(&self, message: &str) {
        self.push(format!("error: {}", message));
    }
}

/// Reporter plus the quiet/verbose policy
#[derive(Clone)]
pub struct Output {
    reporter: Arc<dyn Reporter>,
    quiet: bool,
    verbose: bool,
}

impl Output {
    pub fn new(reporter: Arc<dyn Reporter>, quiet: bool, verbose: bool) -> Self {
        Self {
            reporter,
            quiet,
            verbose,
        }
    }

    pub fn info(&self, message: &str) {
        if !self.quiet {
            self.reporter.info(message);
        }
    }

    pub fn progress(&self, phase: &str, done: usize, total: usize) {
        if !self.quiet {
            self.reporter.progress(phase, done, total);
        }
    }

    /// Errors are reported even in quiet mode; verbose mode adds a diagnosis
    pub fn error(&self, message: &str) {
        match diagnose_git_error(message) {
            Some(hint) if self.verbose => {
                self.reporter.error(&format!("{} (hint: {})", message, hint))
            }
            _ => self.reporter.error(message),
        }
    }
}

impl Default for Output {
    fn default() -> Self {
        Self::new(Arc::new(TracingReporter), false, false)
    }
}
