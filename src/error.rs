use std::path::PathBuf;
use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

use crate::pipeline::PreflightIssue;

#[derive(Debug, Error, Diagnostic)]
pub enum DocketError {
    #[error("invalid docket number: {0}")]
    InvalidDocket(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("missing credential {0} (set it in the environment or .env)")]
    #[diagnostic(help("credentials are required before any case in this run can proceed"))]
    MissingCredential(&'static str),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("{service} request failed: {message}")]
    Http {
        service: &'static str,
        message: String,
    },

    #[error("{service} returned status {status}: {message}")]
    Status {
        service: &'static str,
        status: u16,
        message: String,
    },

    #[error("{service} still failing after {attempts} attempts: {last}")]
    RetriesExhausted {
        service: &'static str,
        attempts: u32,
        last: String,
    },

    #[error("failed to parse {what}: {message}")]
    Parse { what: &'static str, message: String },

    #[error("case not found: {0}")]
    CaseNotFound(String),

    #[error("pre-flight failed for {docket}: {}", format_issues(.issues))]
    Preflight {
        docket: String,
        issues: Vec<PreflightIssue>,
    },

    #[error("step '{step}' failed: {reason}")]
    StepFailed { step: String, reason: String },

    #[error("step '{step}' timed out after {limit:?}")]
    StepTimeout { step: String, limit: Duration },

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("text extraction failed: {0}")]
    TextExtraction(String),

    #[error("status store is locked by another process: {0}")]
    #[diagnostic(help("only one docket command may modify the status file at a time"))]
    StoreLocked(PathBuf),
}

fn format_issues(issues: &[PreflightIssue]) -> String {
    issues
        .iter()
        .map(|issue| issue.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
