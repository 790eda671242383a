//! Diagnostic plumbing between the scripting engine and the host.
//!
//! Scripts report through a [`ReportAdapter`], which turns the engine's
//! positional diagnostics into single-line messages for an [`ErrorReporter`].
//! The default upstream sink forwards to the `log` facade.

use serde::Serialize;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Host-side diagnostic sink.
pub trait ErrorReporter {
    fn message_report(&self, msg: &str);

    fn warning_report(&self, msg: &str, cause: Option<&dyn std::error::Error>);

    fn error_report(&self, msg: &str, cause: Option<&dyn std::error::Error>);

    fn fatal_error_report(&self, msg: &str, cause: Option<&dyn std::error::Error>) {
        self.error_report(msg, cause);
    }
}

/// Process-wide fallback sink writing to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultErrorReporter;

impl ErrorReporter for DefaultErrorReporter {
    fn message_report(&self, msg: &str) {
        log::info!("{}", msg);
    }

    fn warning_report(&self, msg: &str, cause: Option<&dyn std::error::Error>) {
        match cause {
            Some(cause) => log::warn!("{}: {}", msg, cause),
            None => log::warn!("{}", msg),
        }
    }

    fn error_report(&self, msg: &str, cause: Option<&dyn std::error::Error>) {
        match cause {
            Some(cause) => log::error!("{}: {}", msg, cause),
            None => log::error!("{}", msg),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
    RuntimeError,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SourceLocation {
    /// 1-based line in the script source.
    pub line: u32,
    /// 1-based column, 0 when unknown.
    pub column: u32,
}

/// One diagnostic emitted by the scripting engine.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScriptDiagnostic {
    pub severity: Severity,
    pub message: String,
    /// Script URL or other source identifier.
    pub source: Option<String>,
    pub location: Option<SourceLocation>,
    /// Text of the offending source line.
    pub line_source: Option<String>,
}

impl ScriptDiagnostic {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            source: None,
            location: None,
            line_source: None,
        }
    }

    pub fn with_source(mut self, source: Option<&str>) -> Self {
        self.source = source.map(str::to_string);
        self
    }

    pub fn with_location(mut self, location: Option<SourceLocation>) -> Self {
        self.location = location;
        self
    }

    /// Attach the text of the reported line, looked up in `script`.
    pub fn with_line_from(mut self, script: &str) -> Self {
        if let Some(loc) = &self.location {
            self.line_source = script
                .lines()
                .nth(loc.line.saturating_sub(1) as usize)
                .map(|l| l.trim_end().to_string());
        }
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{{\"message\":{:?}}}", self.message))
    }
}

impl fmt::Display for ScriptDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if let Some(source) = &self.source {
            write!(f, "\n  Script source: {}", source)?;
        }
        if let Some(loc) = &self.location {
            write!(f, "\n  Line: {}", loc.line)?;
            if loc.column > 0 {
                write!(f, " Column: {}", loc.column)?;
            }
        }
        if let Some(text) = &self.line_source {
            write!(f, "\n  Source line: {}", text)?;
        }
        Ok(())
    }
}

/// Extract `line:column` of the first frame inside `file_name` from an
/// engine stack trace such as `    at set_in (script.js:3:12)`.
pub fn location_from_stack(stack: &str, file_name: &str) -> Option<SourceLocation> {
    stack.lines().find_map(|frame| {
        let start = frame.find(file_name)? + file_name.len();
        let rest = frame[start..].strip_prefix(':')?;
        let rest = rest.trim_end_matches(')');
        let mut parts = rest.split(':');
        let line = parts.next()?.parse().ok()?;
        let column = parts.next().and_then(|c| c.parse().ok()).unwrap_or(0);
        Some(SourceLocation { line, column })
    })
}

/// Adapts engine diagnostics to a host [`ErrorReporter`].
///
/// The upstream sink can be swapped at any time; with none set, reports go to
/// [`DefaultErrorReporter`].
pub struct ReportAdapter {
    upstream: RefCell<Option<Rc<dyn ErrorReporter>>>,
    history: RefCell<Vec<ScriptDiagnostic>>,
    keep_history: bool,
}

impl ReportAdapter {
    pub fn new() -> Self {
        Self {
            upstream: RefCell::new(None),
            history: RefCell::new(Vec::new()),
            keep_history: false,
        }
    }

    /// Retain every diagnostic so callers can inspect them later.
    pub fn with_history(mut self) -> Self {
        self.keep_history = true;
        self
    }

    pub fn set_error_reporter(&self, reporter: Option<Rc<dyn ErrorReporter>>) {
        *self.upstream.borrow_mut() = reporter;
    }

    fn with_upstream(&self, f: impl FnOnce(&dyn ErrorReporter)) {
        // Clone out of the cell so a reporter may reconfigure the adapter.
        let upstream = self.upstream.borrow().clone();
        match upstream {
            Some(reporter) => f(reporter.as_ref()),
            None => f(&DefaultErrorReporter),
        }
    }

    /// Forward an engine diagnostic.
    pub fn report(&self, diagnostic: ScriptDiagnostic) {
        let msg = diagnostic.to_string();
        match diagnostic.severity {
            Severity::Warning => self.with_upstream(|r| r.warning_report(&msg, None)),
            Severity::Error | Severity::RuntimeError => {
                self.with_upstream(|r| r.error_report(&msg, None))
            }
        }
        if self.keep_history {
            self.history.borrow_mut().push(diagnostic);
        }
    }

    pub fn warning(&self, msg: &str) {
        self.report(ScriptDiagnostic::new(Severity::Warning, msg));
    }

    pub fn error(&self, msg: &str) {
        self.report(ScriptDiagnostic::new(Severity::Error, msg));
    }

    /// Script output from `print`.
    pub fn message(&self, msg: &str) {
        self.with_upstream(|r| r.message_report(msg));
    }

    pub fn diagnostics(&self) -> Vec<ScriptDiagnostic> {
        self.history.borrow().clone()
    }

    pub fn clear_diagnostics(&self) {
        self.history.borrow_mut().clear();
    }
}

impl Default for ReportAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorReporter for ReportAdapter {
    fn message_report(&self, msg: &str) {
        self.message(msg);
    }

    fn warning_report(&self, msg: &str, cause: Option<&dyn std::error::Error>) {
        match cause {
            Some(cause) => self.warning(&format!("{}: {}", msg, cause)),
            None => self.warning(msg),
        }
    }

    fn error_report(&self, msg: &str, cause: Option<&dyn std::error::Error>) {
        match cause {
            Some(cause) => self.error(&format!("{}: {}", msg, cause)),
            None => self.error(msg),
        }
    }
}

/// Reporter that collects everything it receives. Used by hosts that want to
/// surface script problems in their own UI.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    pub messages: RefCell<Vec<String>>,
    pub warnings: RefCell<Vec<String>>,
    pub errors: RefCell<Vec<String>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.borrow().len()
    }

    pub fn error_count(&self) -> usize {
        self.errors.borrow().len()
    }

    pub fn clear(&self) {
        self.messages.borrow_mut().clear();
        self.warnings.borrow_mut().clear();
        self.errors.borrow_mut().clear();
    }
}

impl ErrorReporter for CollectingReporter {
    fn message_report(&self, msg: &str) {
        self.messages.borrow_mut().push(msg.to_string());
    }

    fn warning_report(&self, msg: &str, cause: Option<&dyn std::error::Error>) {
        let msg = match cause {
            Some(cause) => format!("{}: {}", msg, cause),
            None => msg.to_string(),
        };
        self.warnings.borrow_mut().push(msg);
    }

    fn error_report(&self, msg: &str, cause: Option<&dyn std::error::Error>) {
        let msg = match cause {
            Some(cause) => format!("{}: {}", msg, cause),
            None => msg.to_string(),
        };
        self.errors.borrow_mut().push(msg);
    }
}
