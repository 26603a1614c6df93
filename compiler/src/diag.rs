// diag.rs — Diagnostics model and warning channel
//
// Provides the diagnostic record emitted by the simulation core and the sink
// trait it is written to. Numeric anomalies (such as a function evaluated
// outside its domain) are reported here as warnings and never as errors.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: `TracingSink` forwards to the active `tracing` subscriber.

use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{error, warn};

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `W0100`).
///
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    /// NaN produced from inputs that were all valid numbers.
    pub const W0100: DiagCode = DiagCode("W0100");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub message: String,
    pub hint: Option<String>,
    /// Labelled facts locating the event (group, variable, time).
    pub context: Vec<(&'static str, String)>,
}

impl Diagnostic {
    pub fn new(level: DiagLevel, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            message: message.into(),
            hint: None,
            context: Vec::new(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, message)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_context(mut self, label: &'static str, value: impl fmt::Display) -> Self {
        self.context.push((label, value.to_string()));
        self
    }

    pub fn context_value(&self, label: &str) -> Option<&str> {
        self.context
            .iter()
            .find(|(l, _)| *l == label)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        for (label, value) in &self.context {
            write!(f, " ({label} = {value})")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

// ── Sinks ────────────────────────────────────────────────────────────────

/// Destination for diagnostics raised while a network runs.
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, diagnostic: Diagnostic);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn emit(&self, _diagnostic: Diagnostic) {}
}

/// Keeps every diagnostic in memory. Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct CollectingSink {
    inner: Arc<Mutex<Vec<Diagnostic>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl DiagnosticSink for CollectingSink {
    fn emit(&self, diagnostic: Diagnostic) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(diagnostic);
    }
}

/// Forwards to `tracing` at the matching level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, diagnostic: Diagnostic) {
        let code = diagnostic.code.map(|c| c.0).unwrap_or("-");
        match diagnostic.level {
            DiagLevel::Warning => warn!(code, "{diagnostic}"),
            DiagLevel::Error => error!(code, "{diagnostic}"),
        }
    }
}
