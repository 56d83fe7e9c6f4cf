//! Structured diagnostics and progress reporting
//!
//! The core never talks to a terminal. Everything a front end would
//! show -- warnings about odd input, info about assumed mappings,
//! progress percentages -- is emitted through a [`DiagSink`] owned by
//! the session, and mirrored to `tracing` for internal logging.

use std::fmt;

/// Severity of a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A single diagnostic message
#[derive(Debug, Clone)]
pub struct Diag {
    pub severity: Severity,
    /// Source file index the message refers to, if any
    pub source: Option<usize>,
    pub message: String,
}

/// Collects diagnostics and progress updates for the embedding layer
pub struct DiagSink {
    diags: Vec<Diag>,
    /// Last reported progress percentage per source
    progress: Vec<u8>,
    progress_cb: Option<Box<dyn FnMut(usize, u8)>>,
}

impl DiagSink {
    pub fn new() -> Self {
        DiagSink {
            diags: Vec::new(),
            progress: Vec::new(),
            progress_cb: None,
        }
    }

    /// Install a progress callback `(source index, percent)`
    pub fn set_progress_callback(&mut self, cb: Box<dyn FnMut(usize, u8)>) {
        self.progress_cb = Some(cb);
    }

    /// Emit an info diagnostic
    pub fn info(&mut self, source: Option<usize>, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(source, "{}", message);
        self.diags.push(Diag {
            severity: Severity::Info,
            source,
            message,
        });
    }

    /// Emit a warning diagnostic
    pub fn warning(&mut self, source: Option<usize>, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(source, "{}", message);
        self.diags.push(Diag {
            severity: Severity::Warning,
            source,
            message,
        });
    }

    /// Emit an error diagnostic
    pub fn error(&mut self, source: Option<usize>, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(source, "{}", message);
        self.diags.push(Diag {
            severity: Severity::Error,
            source,
            message,
        });
    }

    /// Report progress for one source as bytes consumed out of total.
    /// Only forwards whole-percent changes.
    pub fn progress(&mut self, source: usize, consumed: u64, total: u64) {
        if total == 0 {
            return;
        }
        if source >= self.progress.len() {
            self.progress.resize(source + 1, 0);
        }
        let percent = ((consumed.min(total) * 100) / total) as u8;
        if percent != self.progress[source] {
            self.progress[source] = percent;
            if let Some(cb) = self.progress_cb.as_mut() {
                cb(source, percent);
            }
        }
    }

    /// All diagnostics emitted so far
    pub fn diags(&self) -> &[Diag] {
        &self.diags
    }

    /// Last reported percentage for one source
    pub fn percent(&self, source: usize) -> u8 {
        self.progress.get(source).copied().unwrap_or(0)
    }
}

impl Default for DiagSink {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DiagSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagSink")
            .field("diags", &self.diags.len())
            .field("progress", &self.progress)
            .finish()
    }
}
