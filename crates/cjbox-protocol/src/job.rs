//! Job handoff between host and sandbox.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tool selected for a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Compile and execute.
    Run,
    /// Format in place.
    Format,
    /// Interactive language server session.
    Lsp,
}

impl JobKind {
    /// Wire name of the job kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Format => "format",
            Self::Lsp => "lsp",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First line written to a sandbox's stdin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobRequest {
    /// Compile `source` as `src/main.cj` and run the binary.
    Run {
        /// Program text.
        source: String,
    },
    /// Format `source`.
    Format {
        /// Program text.
        source: String,
    },
    /// Serve the language server over the remaining stdin.
    Lsp,
}

impl JobRequest {
    /// The job's kind.
    pub fn kind(&self) -> JobKind {
        match self {
            Self::Run { .. } => JobKind::Run,
            Self::Format { .. } => JobKind::Format,
            Self::Lsp => JobKind::Lsp,
        }
    }
}

/// Outcome of a `run` job.
///
/// `bin_output` and `bin_code` are only present when compilation succeeded and
/// the binary was executed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// Combined compiler (or dependency scan) output.
    pub compiler_output: String,
    /// Compiler exit code.
    pub compiler_code: i32,
    /// Combined program output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin_output: Option<String>,
    /// Program exit code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin_code: Option<i32>,
}

/// Outcome of a `format` job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatResult {
    /// File contents after the formatter ran, whatever its exit code.
    pub formatted: String,
    /// Formatter diagnostics.
    pub formatter_output: String,
    /// Formatter exit code.
    pub formatter_code: i32,
}

/// Single line a one-shot job writes to stdout before exiting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobResult {
    /// Result of [`JobRequest::Run`].
    Run(RunResult),
    /// Result of [`JobRequest::Format`].
    Format(FormatResult),
}

impl JobResult {
    /// The job's kind.
    pub fn kind(&self) -> JobKind {
        match self {
            Self::Run(_) => JobKind::Run,
            Self::Format(_) => JobKind::Format,
        }
    }
}
