use std::fmt;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::domain::{CaseRecord, DocketNumber};
use crate::error::DocketError;
use crate::status::StatusStore;
use crate::store::{briefs_dir, case_info_path, has_pdf, transcript_dir};

/// What a step needs to know about the case it runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseContext {
    pub docket: DocketNumber,
    pub name: String,
    pub case_dir: Utf8PathBuf,
}

impl CaseContext {
    pub fn new(docket: DocketNumber, name: impl Into<String>, case_dir: Utf8PathBuf) -> Self {
        Self {
            docket,
            name: name.into(),
            case_dir,
        }
    }

    pub fn from_record(record: &CaseRecord, case_dir: Utf8PathBuf) -> Self {
        Self::new(record.docket.clone(), record.name.clone(), case_dir)
    }
}

/// One unit of the per-case chain. A step either writes its declared
/// artifact into the case directory or, with no artifact, runs every time.
pub trait Step {
    fn name(&self) -> &str;
    fn label(&self) -> &str;
    fn output_artifact(&self) -> Option<&str>;
    /// Estimated spend in USD for one run.
    fn cost(&self) -> f64;
    fn run(&self, ctx: &CaseContext) -> Result<(), DocketError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PreflightIssue {
    MissingCaseInfo,
    MissingBriefsDir,
    NoBriefPdfs,
    MissingTranscriptDir,
    NoTranscriptPdfs,
}

impl fmt::Display for PreflightIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PreflightIssue::MissingCaseInfo => "Missing case_info.txt",
            PreflightIssue::MissingBriefsDir => "Missing briefs/ directory",
            PreflightIssue::NoBriefPdfs => "No PDF files in briefs/",
            PreflightIssue::MissingTranscriptDir => "Missing transcript/ directory",
            PreflightIssue::NoTranscriptPdfs => "No PDF files in transcript/",
        };
        f.write_str(text)
    }
}

/// Everything that must be on disk before the chain may start.
pub fn preflight(case_dir: &Utf8Path) -> Vec<PreflightIssue> {
    let mut issues = Vec::new();
    if !case_info_path(case_dir).is_file() {
        issues.push(PreflightIssue::MissingCaseInfo);
    }
    let briefs = briefs_dir(case_dir);
    if !briefs.is_dir() {
        issues.push(PreflightIssue::MissingBriefsDir);
    } else if !has_pdf(&briefs) {
        issues.push(PreflightIssue::NoBriefPdfs);
    }
    let transcript = transcript_dir(case_dir);
    if !transcript.is_dir() {
        issues.push(PreflightIssue::MissingTranscriptDir);
    } else if !has_pdf(&transcript) {
        issues.push(PreflightIssue::NoTranscriptPdfs);
    }
    issues
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Ran,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    pub name: String,
    pub label: String,
    pub status: StepStatus,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseRun {
    pub docket: DocketNumber,
    pub steps: Vec<StepReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseEstimate {
    pub docket: DocketNumber,
    pub steps: Vec<String>,
    pub cost: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Estimate {
    pub cases: Vec<CaseEstimate>,
    pub total: f64,
}

pub struct PipelineRunner<'a> {
    steps: Vec<Box<dyn Step + 'a>>,
}

impl<'a> PipelineRunner<'a> {
    pub fn new(steps: Vec<Box<dyn Step + 'a>>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[Box<dyn Step + 'a>] {
        &self.steps
    }

    fn artifact_present(step: &dyn Step, case_dir: &Utf8Path) -> bool {
        step.output_artifact()
            .map(|artifact| case_dir.join(artifact).exists())
            .unwrap_or(false)
    }

    /// True when every declared artifact already exists.
    pub fn artifacts_complete(&self, case_dir: &Utf8Path) -> bool {
        self.steps
            .iter()
            .filter(|step| step.output_artifact().is_some())
            .all(|step| Self::artifact_present(step.as_ref(), case_dir))
    }

    /// Runs the chain for one case. The first failing step ends the run with
    /// its error; later steps are not attempted and the case is not marked
    /// complete.
    pub fn run_case<S: StatusStore>(
        &self,
        status: &S,
        ctx: &CaseContext,
        force: bool,
    ) -> Result<CaseRun, DocketError> {
        let issues = preflight(&ctx.case_dir);
        if !issues.is_empty() {
            for issue in &issues {
                warn!(docket = %ctx.docket, %issue, "pre-flight check failed");
            }
            return Err(DocketError::Preflight {
                docket: ctx.docket.to_string(),
                issues,
            });
        }

        let mut reports = Vec::with_capacity(self.steps.len());
        for (idx, step) in self.steps.iter().enumerate() {
            let position = format!("{}/{}", idx + 1, self.steps.len());
            if !force && Self::artifact_present(step.as_ref(), &ctx.case_dir) {
                info!(docket = %ctx.docket, step = step.label(), %position, "skipped, output exists");
                reports.push(StepReport {
                    name: step.name().to_string(),
                    label: step.label().to_string(),
                    status: StepStatus::Skipped,
                    elapsed_ms: 0,
                });
                continue;
            }

            info!(docket = %ctx.docket, step = step.label(), %position, "running");
            let started = Instant::now();
            if let Err(err) = step.run(ctx) {
                error!(docket = %ctx.docket, step = step.label(), error = %err, "step failed; halting pipeline");
                return Err(err);
            }
            let elapsed_ms = started.elapsed().as_millis() as u64;
            info!(docket = %ctx.docket, step = step.label(), elapsed_ms, "completed");
            reports.push(StepReport {
                name: step.name().to_string(),
                label: step.label().to_string(),
                status: StepStatus::Ran,
                elapsed_ms,
            });
        }

        if !status.update_case(&ctx.docket, CaseRecord::mark_pipeline_complete)? {
            warn!(docket = %ctx.docket, "case is not tracked in the status file; completion not recorded");
        }
        Ok(CaseRun {
            docket: ctx.docket.clone(),
            steps: reports,
        })
    }

    /// Cost of the steps whose artifact is still missing, per case. Reads the
    /// filesystem only.
    pub fn estimate(&self, cases: &[CaseContext]) -> Estimate {
        let mut estimate = Estimate::default();
        for ctx in cases {
            let needed = self
                .steps
                .iter()
                .filter(|step| !Self::artifact_present(step.as_ref(), &ctx.case_dir))
                .collect::<Vec<_>>();
            let cost = needed.iter().map(|step| step.cost()).sum::<f64>();
            estimate.total += cost;
            estimate.cases.push(CaseEstimate {
                docket: ctx.docket.clone(),
                steps: needed.iter().map(|step| step.label().to_string()).collect(),
                cost,
            });
        }
        estimate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preflight_lists_every_issue() {
        let temp = tempfile::tempdir().unwrap();
        let case_dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        assert_eq!(
            preflight(&case_dir),
            vec![
                PreflightIssue::MissingCaseInfo,
                PreflightIssue::MissingBriefsDir,
                PreflightIssue::MissingTranscriptDir,
            ]
        );

        std::fs::create_dir_all(case_dir.join("briefs")).unwrap();
        std::fs::create_dir_all(case_dir.join("transcript")).unwrap();
        std::fs::write(case_dir.join("case_info.txt"), "A v. B").unwrap();
        std::fs::write(case_dir.join("briefs/petitioner_brief.pdf"), b"%PDF").unwrap();
        assert_eq!(preflight(&case_dir), vec![PreflightIssue::NoTranscriptPdfs]);

        std::fs::write(case_dir.join("transcript/transcript_25-1.pdf"), b"%PDF").unwrap();
        assert!(preflight(&case_dir).is_empty());
    }

    #[test]
    fn preflight_issue_text() {
        assert_eq!(PreflightIssue::NoBriefPdfs.to_string(), "No PDF files in briefs/");
    }
}
