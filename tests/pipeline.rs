use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};

use docket_pipeline::domain::{CaseRecord, CaseState, DocketNumber, Timeline};
use docket_pipeline::error::DocketError;
use docket_pipeline::pipeline::{CaseContext, PipelineRunner, PreflightIssue, Step, StepStatus};
use docket_pipeline::status::{DocketStatus, MemoryStatusStore};

type CallLog = Arc<Mutex<Vec<String>>>;

/// Appends its name to the shared log and writes its artifact, or fails.
struct FakeStep {
    name: &'static str,
    artifact: Option<&'static str>,
    cost: f64,
    fails: bool,
    log: CallLog,
}

impl FakeStep {
    fn new(name: &'static str, artifact: Option<&'static str>, log: &CallLog) -> Self {
        Self {
            name,
            artifact,
            cost: 1.0,
            fails: false,
            log: log.clone(),
        }
    }

    fn failing(mut self) -> Self {
        self.fails = true;
        self
    }

    fn costing(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }
}

impl Step for FakeStep {
    fn name(&self) -> &str {
        self.name
    }

    fn label(&self) -> &str {
        self.name
    }

    fn output_artifact(&self) -> Option<&str> {
        self.artifact
    }

    fn cost(&self) -> f64 {
        self.cost
    }

    fn run(&self, ctx: &CaseContext) -> Result<(), DocketError> {
        self.log.lock().unwrap().push(self.name.to_string());
        if self.fails {
            return Err(DocketError::StepFailed {
                step: self.name.to_string(),
                reason: "exit code 1".to_string(),
            });
        }
        if let Some(artifact) = self.artifact {
            std::fs::write(ctx.case_dir.join(artifact), self.name).unwrap();
        }
        Ok(())
    }
}

fn ready_case_dir(root: &Utf8Path) -> Utf8PathBuf {
    let dir = root.join("25-332");
    std::fs::create_dir_all(dir.join("briefs")).unwrap();
    std::fs::create_dir_all(dir.join("transcript")).unwrap();
    std::fs::write(dir.join("case_info.txt"), "Smith v. Jones (No. 25-332)").unwrap();
    std::fs::write(dir.join("briefs/petitioner_brief.pdf"), b"%PDF-1.4").unwrap();
    std::fs::write(dir.join("transcript/transcript_25-332.pdf"), b"%PDF-1.4").unwrap();
    dir
}

fn temp_root() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, root)
}

fn ready_status(docket: &DocketNumber) -> MemoryStatusStore {
    let mut record = CaseRecord::discovered(
        docket.clone(),
        "Smith v. Jones".to_string(),
        Timeline::default(),
    );
    record.record_sources(true, true);
    let mut status = DocketStatus::default();
    status.cases.insert(docket.clone(), record);
    MemoryStatusStore::new(status)
}

fn logged(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[test]
fn failing_step_halts_the_chain() {
    let (_temp, root) = temp_root();
    let ctx = CaseContext::new("25-332".parse().unwrap(), "Smith v. Jones", ready_case_dir(&root));
    let status = ready_status(&ctx.docket);
    let log = CallLog::default();
    let runner = PipelineRunner::new(vec![
        Box::new(FakeStep::new("first", Some("first.txt"), &log)),
        Box::new(FakeStep::new("second", Some("second.txt"), &log).failing()),
        Box::new(FakeStep::new("third", Some("third.txt"), &log)),
        Box::new(FakeStep::new("fourth", None, &log)),
    ]);

    let err = runner.run_case(&status, &ctx, false).unwrap_err();

    assert_matches!(err, DocketError::StepFailed { ref step, .. } if step == "second");
    assert_eq!(logged(&log), vec!["first", "second"]);
    assert!(!ctx.case_dir.join("third.txt").exists());
    let record = &status.snapshot().cases[&ctx.docket];
    assert!(!record.pipeline_complete);
    assert_eq!(record.state, CaseState::PipelineReady);
}

#[test]
fn existing_artifacts_skip_their_steps() {
    let (_temp, root) = temp_root();
    let ctx = CaseContext::new("25-332".parse().unwrap(), "Smith v. Jones", ready_case_dir(&root));
    std::fs::write(ctx.case_dir.join("first.txt"), "from an earlier run").unwrap();
    let status = ready_status(&ctx.docket);
    let log = CallLog::default();
    let runner = PipelineRunner::new(vec![
        Box::new(FakeStep::new("first", Some("first.txt"), &log)),
        Box::new(FakeStep::new("export", None, &log)),
    ]);

    let run = runner.run_case(&status, &ctx, false).unwrap();

    assert_eq!(logged(&log), vec!["export"]);
    assert_eq!(
        run.steps.iter().map(|step| step.status).collect::<Vec<_>>(),
        vec![StepStatus::Skipped, StepStatus::Ran]
    );
    assert_eq!(
        std::fs::read_to_string(ctx.case_dir.join("first.txt")).unwrap(),
        "from an earlier run"
    );
    let record = &status.snapshot().cases[&ctx.docket];
    assert!(record.pipeline_complete);
    assert_eq!(record.state, CaseState::PipelineComplete);
}

#[test]
fn force_reruns_every_step() {
    let (_temp, root) = temp_root();
    let ctx = CaseContext::new("25-332".parse().unwrap(), "Smith v. Jones", ready_case_dir(&root));
    std::fs::write(ctx.case_dir.join("first.txt"), "stale").unwrap();
    let status = ready_status(&ctx.docket);
    let log = CallLog::default();
    let runner = PipelineRunner::new(vec![
        Box::new(FakeStep::new("first", Some("first.txt"), &log)),
        Box::new(FakeStep::new("second", Some("second.txt"), &log)),
    ]);

    runner.run_case(&status, &ctx, true).unwrap();

    assert_eq!(logged(&log), vec!["first", "second"]);
    assert_eq!(
        std::fs::read_to_string(ctx.case_dir.join("first.txt")).unwrap(),
        "first"
    );
}

#[test]
fn preflight_failure_runs_nothing() {
    let (_temp, root) = temp_root();
    let case_dir = root.join("25-1");
    std::fs::create_dir_all(case_dir.join("briefs")).unwrap();
    let ctx = CaseContext::new("25-1".parse().unwrap(), "A v. B", case_dir);
    let status = ready_status(&ctx.docket);
    let log = CallLog::default();
    let runner = PipelineRunner::new(vec![Box::new(FakeStep::new("first", None, &log))]);

    let err = runner.run_case(&status, &ctx, false).unwrap_err();

    assert_matches!(
        err,
        DocketError::Preflight { ref issues, .. } if issues == &vec![
            PreflightIssue::MissingCaseInfo,
            PreflightIssue::NoBriefPdfs,
            PreflightIssue::MissingTranscriptDir,
        ]
    );
    assert!(logged(&log).is_empty());
    assert_eq!(status.snapshot().cases[&ctx.docket].state, CaseState::PipelineReady);
}

#[test]
fn untracked_case_still_runs() {
    let (_temp, root) = temp_root();
    let ctx = CaseContext::new("25-332".parse().unwrap(), "", ready_case_dir(&root));
    let status = MemoryStatusStore::default();
    let log = CallLog::default();
    let runner = PipelineRunner::new(vec![Box::new(FakeStep::new("only", None, &log))]);

    runner.run_case(&status, &ctx, false).unwrap();

    assert_eq!(logged(&log), vec!["only"]);
    assert!(status.snapshot().cases.is_empty());
}

#[test]
fn estimate_counts_missing_artifacts_only() {
    let (_temp, root) = temp_root();
    let ctx = CaseContext::new("25-332".parse().unwrap(), "Smith v. Jones", ready_case_dir(&root));
    std::fs::write(ctx.case_dir.join("analysis.txt"), "done").unwrap();
    let log = CallLog::default();
    let runner = PipelineRunner::new(vec![
        Box::new(FakeStep::new("analysis", Some("analysis.txt"), &log).costing(0.70)),
        Box::new(FakeStep::new("prediction", Some("prediction.txt"), &log).costing(4.10)),
        Box::new(FakeStep::new("export", None, &log).costing(0.80)),
    ]);

    let estimate = runner.estimate(std::slice::from_ref(&ctx));
    assert_eq!(estimate.cases[0].steps, vec!["prediction", "export"]);
    assert!((estimate.total - 4.90).abs() < 1e-9);

    std::fs::write(ctx.case_dir.join("prediction.txt"), "done").unwrap();
    let later = runner.estimate(std::slice::from_ref(&ctx));
    assert_eq!(later.cases[0].steps, vec!["export"]);
    assert!((later.total - 0.80).abs() < 1e-9);
    assert!(logged(&log).is_empty());
    assert!(!runner.artifacts_complete(&ctx.case_dir));
}

#[cfg(unix)]
mod scripts {
    use std::time::Duration;

    use super::*;
    use docket_pipeline::config::StepEntry;
    use docket_pipeline::steps::ScriptStep;

    fn script_step(scripts_dir: &Utf8Path, script: &str, body: &str, timeout: Duration) -> ScriptStep {
        std::fs::write(scripts_dir.join(script), body).unwrap();
        ScriptStep::new(
            StepEntry {
                script: script.to_string(),
                label: "Issue analysis".to_string(),
                output: Some("issue_analysis_output.txt".to_string()),
                needs_case_dir: true,
                cost: 0.70,
            },
            "sh",
            scripts_dir.to_path_buf(),
            timeout,
        )
    }

    fn setup() -> (tempfile::TempDir, Utf8PathBuf, CaseContext) {
        let (temp, root) = temp_root();
        let scripts = root.join("scripts");
        std::fs::create_dir_all(&scripts).unwrap();
        let ctx = CaseContext::new("25-332".parse().unwrap(), "Smith v. Jones", ready_case_dir(&root));
        (temp, scripts, ctx)
    }

    #[test]
    fn script_receives_case_dir() {
        let (_temp, scripts, ctx) = setup();
        let step = script_step(
            &scripts,
            "analysis.sh",
            "echo analysed > \"$1/issue_analysis_output.txt\"\necho finished\n",
            Duration::from_secs(10),
        );

        step.run(&ctx).unwrap();

        assert_eq!(
            std::fs::read_to_string(ctx.case_dir.join("issue_analysis_output.txt")).unwrap(),
            "analysed\n"
        );
    }

    #[test]
    fn non_zero_exit_is_a_step_failure() {
        let (_temp, scripts, ctx) = setup();
        let step = script_step(&scripts, "fail.sh", "echo broken >&2\nexit 3\n", Duration::from_secs(10));

        let err = step.run(&ctx).unwrap_err();

        assert_matches!(err, DocketError::StepFailed { ref reason, .. } if reason == "exit code 3");
    }

    #[test]
    fn slow_script_times_out() {
        let (_temp, scripts, ctx) = setup();
        let step = script_step(&scripts, "slow.sh", "exec sleep 5\n", Duration::from_millis(200));

        let err = step.run(&ctx).unwrap_err();

        assert_eq!(err.to_string(), "step 'Issue analysis' timed out after 200ms");
        assert_matches!(err, DocketError::StepTimeout { limit, .. } if limit == Duration::from_millis(200));
    }

    #[test]
    fn timeout_also_stops_spawned_children() {
        let (_temp, scripts, ctx) = setup();
        let step = script_step(
            &scripts,
            "spawns.sh",
            "echo started\nsleep 6\necho finished\n",
            Duration::from_millis(200),
        );

        let started = std::time::Instant::now();
        let err = step.run(&ctx).unwrap_err();

        assert_matches!(err, DocketError::StepTimeout { .. });
        assert!(
            started.elapsed() < Duration::from_secs(3),
            "step returned after {:?}",
            started.elapsed()
        );
    }

    #[test]
    fn missing_script_is_a_step_failure() {
        let (_temp, scripts, ctx) = setup();
        let step = script_step(&scripts, "present.sh", "exit 0\n", Duration::from_secs(10));
        std::fs::remove_file(scripts.join("present.sh")).unwrap();

        let err = step.run(&ctx).unwrap_err();

        assert_matches!(err, DocketError::StepFailed { ref reason, .. } if reason.starts_with("script not found"));
    }
}
