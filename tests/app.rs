use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use serde_json::json;

use docket_pipeline::app::{App, ProgressEvent, ProgressSink, RunOptions, Target};
use docket_pipeline::config::{Config, ConfigLoader};
use docket_pipeline::domain::{CaseState, DocketNumber};
use docket_pipeline::error::DocketError;
use docket_pipeline::oyez::{CaseDetail, CaseSource, CaseSummary};
use docket_pipeline::pipeline::{CaseContext, PipelineRunner, Step};
use docket_pipeline::status::{MemoryStatusStore, StatusStore};
use docket_pipeline::store::Store;

const ARGUED_2025_10_06: i64 = 1_759_708_800;

#[derive(Default)]
struct RecordingSink {
    messages: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.messages.lock().unwrap().push(event.message);
    }
}

#[derive(Default)]
struct FakeSource {
    listing: Vec<CaseSummary>,
    details: HashMap<String, serde_json::Value>,
}

impl FakeSource {
    fn with_case(mut self, name: &str, docket: Option<&str>, detail: serde_json::Value) -> Self {
        let href = format!("https://oyez.test/cases/{}", self.listing.len());
        self.listing.push(CaseSummary {
            name: Some(name.to_string()),
            docket_number: docket.map(str::to_string),
            href: Some(href.clone()),
        });
        self.details.insert(href, detail);
        self
    }
}

impl CaseSource for FakeSource {
    fn list_term(&self, _term: &str) -> Result<Vec<CaseSummary>, DocketError> {
        Ok(self.listing.clone())
    }

    fn detail(&self, href: &str) -> Result<CaseDetail, DocketError> {
        let value = self.details.get(href).cloned().unwrap_or_default();
        serde_json::from_value(value).map_err(|err| DocketError::Parse {
            what: "case detail",
            message: err.to_string(),
        })
    }
}

struct Harness {
    _temp: tempfile::TempDir,
    root: Utf8PathBuf,
    app: App<MemoryStatusStore>,
}

fn harness() -> Harness {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let config = ConfigLoader::resolve_config(Config::default()).unwrap();
    let app = App::new(
        Store::new_with_root(root.clone()),
        MemoryStatusStore::default(),
        config,
    );
    Harness {
        _temp: temp,
        root,
        app,
    }
}

fn argued_detail() -> serde_json::Value {
    json!({
        "question": "<p>Whether the statute applies.</p>",
        "timeline": [
            {"event": "Granted", "dates": [1_748_000_000]},
            {"event": "Argued", "dates": [ARGUED_2025_10_06]},
        ],
    })
}

fn term_source() -> FakeSource {
    FakeSource::default()
        .with_case("Smith v. Jones", Some("25-332"), argued_detail())
        .with_case("Doe v. Roe", Some("No. 24-154, 24-156"), json!({"timeline": []}))
        .with_case("In re Nameless", None, json!({}))
}

#[test]
fn discover_tracks_new_cases_and_writes_case_info() {
    let h = harness();
    let sink = RecordingSink::default();

    let report = h.app.discover(&term_source(), None, false, &sink).unwrap();

    assert_eq!(report.term, "OT2025");
    assert_eq!(report.listed, 3);
    assert_eq!(report.tracked, 2);
    assert_eq!(
        report.new_cases,
        vec!["25-332".parse::<DocketNumber>().unwrap(), "24-154".parse().unwrap()]
    );
    assert_eq!(report.argued, 1);

    let info = std::fs::read_to_string(h.root.join("cases/25-332/case_info.txt")).unwrap();
    assert!(info.starts_with("Smith v. Jones (No. 25-332)\n\nQUESTIONS PRESENTED:\n"));
    assert!(info.contains("Whether the statute applies."));
    assert!(info.contains("Argued: October 06, 2025"));
    assert!(info.contains("Decision expected: Pending"));
    assert!(h.root.join("cases/24-154/briefs").is_dir());
    assert!(h.root.join("cases/24-154/transcript").is_dir());

    let status = h.app.status_store().load().unwrap();
    assert_eq!(status.term.as_deref(), Some("OT2025"));
    assert!(sink.messages.lock().unwrap()[0].starts_with("phase=Resolve;"));
}

#[test]
fn rediscovery_refreshes_without_duplicating() {
    let h = harness();
    h.app
        .discover(&term_source(), Some("2025"), false, &RecordingSink::default())
        .unwrap();
    let docket: DocketNumber = "24-154".parse().unwrap();
    let info_path = h.root.join("cases/24-154/case_info.txt");
    std::fs::write(&info_path, "edited by hand").unwrap();

    let source = FakeSource::default()
        .with_case("Smith v. Jones", Some("25-332"), argued_detail())
        .with_case("Doe v. Roe", Some("24-154"), argued_detail());
    let report = h
        .app
        .discover(&source, Some("2025"), false, &RecordingSink::default())
        .unwrap();

    assert!(report.new_cases.is_empty());
    assert_eq!(report.tracked, 2);
    assert_eq!(report.argued, 2);
    let record = h.app.status_store().load().unwrap().cases[&docket].clone();
    assert!(record.argued);
    assert_eq!(record.timeline.argued.as_deref(), Some("October 06, 2025"));
    assert_eq!(std::fs::read_to_string(&info_path).unwrap(), "edited by hand");
}

#[test]
fn forced_discovery_rebuilds_case_info() {
    let h = harness();
    h.app
        .discover(&term_source(), None, false, &RecordingSink::default())
        .unwrap();
    let info_path = h.root.join("cases/25-332/case_info.txt");
    std::fs::write(&info_path, "stale").unwrap();

    h.app
        .discover(&term_source(), None, true, &RecordingSink::default())
        .unwrap();

    assert!(
        std::fs::read_to_string(&info_path)
            .unwrap()
            .starts_with("Smith v. Jones (No. 25-332)")
    );
    assert_eq!(h.app.status_store().load().unwrap().cases.len(), 2);
}

#[test]
fn status_counts_cases_by_state() {
    let h = harness();
    h.app
        .discover(&term_source(), None, false, &RecordingSink::default())
        .unwrap();
    let docket: DocketNumber = "25-332".parse().unwrap();
    h.app
        .status_store()
        .update_case(&docket, |record| record.record_sources(true, false))
        .unwrap();

    let result = h.app.status(&RecordingSink::default()).unwrap();

    assert_eq!(result.tracked, 2);
    assert_eq!(result.discovered, 1);
    assert_eq!(result.briefs_downloaded, 1);
    assert_eq!(result.pipeline_ready, 0);
    let smith = result.cases.iter().find(|case| case.docket == docket).unwrap();
    assert_eq!(smith.state, CaseState::BriefsDownloaded);
    assert_eq!(smith.argued.as_deref(), Some("October 06, 2025"));
}

#[test]
fn resolve_case_accepts_docket_or_directory() {
    let h = harness();
    h.app
        .discover(&term_source(), None, false, &RecordingSink::default())
        .unwrap();

    let by_docket = h.app.resolve_case("25-332").unwrap();
    assert_eq!(by_docket.name, "Smith v. Jones");
    assert_eq!(by_docket.case_dir, h.root.join("cases/25-332"));

    let by_dir = h
        .app
        .resolve_case(&format!("{}/", h.root.join("cases/24-154")))
        .unwrap();
    assert_eq!(by_dir.docket.as_str(), "24-154");
    assert_eq!(by_dir.name, "Doe v. Roe");

    std::fs::create_dir_all(h.root.join("cases/23-719")).unwrap();
    let untracked = h.app.resolve_case("23-719").unwrap();
    assert!(untracked.name.is_empty());

    assert_matches!(h.app.resolve_case("99-1"), Err(DocketError::CaseNotFound(_)));
    assert_matches!(h.app.resolve_case("not a docket"), Err(DocketError::CaseNotFound(_)));
}

/// Fails for one docket, writes `done.txt` for every other.
struct OutcomeStep {
    failing: &'static str,
}

impl Step for OutcomeStep {
    fn name(&self) -> &str {
        "outcome"
    }

    fn label(&self) -> &str {
        "Outcome"
    }

    fn output_artifact(&self) -> Option<&str> {
        Some("done.txt")
    }

    fn cost(&self) -> f64 {
        1.5
    }

    fn run(&self, ctx: &CaseContext) -> Result<(), DocketError> {
        if ctx.docket.as_str() == self.failing {
            return Err(DocketError::StepFailed {
                step: "Outcome".to_string(),
                reason: "exit code 2".to_string(),
            });
        }
        std::fs::write(ctx.case_dir.join("done.txt"), "ok").unwrap();
        Ok(())
    }
}

fn make_ready(h: &Harness, docket: &str) {
    let case_dir = h.root.join("cases").join(docket);
    std::fs::write(case_dir.join("briefs/petitioner_brief.pdf"), b"%PDF").unwrap();
    std::fs::write(case_dir.join(format!("transcript/transcript_{docket}.pdf")), b"%PDF").unwrap();
    h.app
        .status_store()
        .update_case(&docket.parse().unwrap(), |record| record.record_sources(true, true))
        .unwrap();
}

#[test]
fn batch_run_continues_past_a_failing_case() {
    let h = harness();
    h.app
        .discover(&term_source(), None, false, &RecordingSink::default())
        .unwrap();
    make_ready(&h, "25-332");
    make_ready(&h, "24-154");
    let runner = PipelineRunner::new(vec![Box::new(OutcomeStep { failing: "24-154" })]);

    let estimate = h
        .app
        .estimate(&runner, &Target::All, RunOptions::default())
        .unwrap();
    assert_eq!(estimate.cases.len(), 2);
    assert!((estimate.total - 3.0).abs() < 1e-9);

    let result = h
        .app
        .run_pipeline(&runner, &Target::All, RunOptions::default(), &RecordingSink::default())
        .unwrap();

    assert_eq!(result.succeeded, 1);
    assert_eq!(result.failed, 1);
    let failed = result.cases.iter().find(|case| !case.complete).unwrap();
    assert_eq!(failed.docket.as_str(), "24-154");
    assert!(failed.error.as_deref().unwrap().contains("exit code 2"));

    let status = h.app.status_store().load().unwrap();
    let state = |docket: &str| status.cases[&docket.parse::<DocketNumber>().unwrap()].state;
    assert_eq!(state("25-332"), CaseState::PipelineComplete);
    assert_eq!(state("24-154"), CaseState::PipelineReady);

    let rerun = h
        .app
        .run_pipeline(&runner, &Target::All, RunOptions::default(), &RecordingSink::default())
        .unwrap();
    assert_eq!(rerun.cases.len(), 1);
    assert_eq!(rerun.cases[0].docket.as_str(), "24-154");
}

/// Final chain step with no artifact; fails until told otherwise.
struct ExportStep {
    fails: Arc<Mutex<bool>>,
    runs: Arc<Mutex<usize>>,
}

impl Step for ExportStep {
    fn name(&self) -> &str {
        "export"
    }

    fn label(&self) -> &str {
        "Export"
    }

    fn output_artifact(&self) -> Option<&str> {
        None
    }

    fn cost(&self) -> f64 {
        0.8
    }

    fn run(&self, _ctx: &CaseContext) -> Result<(), DocketError> {
        *self.runs.lock().unwrap() += 1;
        if *self.fails.lock().unwrap() {
            return Err(DocketError::StepFailed {
                step: "Export".to_string(),
                reason: "exit code 1".to_string(),
            });
        }
        Ok(())
    }
}

#[test]
fn case_failing_in_final_step_is_picked_up_again() {
    let h = harness();
    h.app
        .discover(&term_source(), None, false, &RecordingSink::default())
        .unwrap();
    make_ready(&h, "25-332");
    let fails = Arc::new(Mutex::new(true));
    let runs = Arc::new(Mutex::new(0));
    let runner = PipelineRunner::new(vec![
        Box::new(OutcomeStep { failing: "none" }),
        Box::new(ExportStep {
            fails: fails.clone(),
            runs: runs.clone(),
        }),
    ]);
    let docket: DocketNumber = "25-332".parse().unwrap();
    let run_all = || {
        h.app
            .run_pipeline(&runner, &Target::All, RunOptions::default(), &RecordingSink::default())
            .unwrap()
    };

    let first = run_all();
    assert_eq!(first.failed, 1);
    assert!(h.root.join("cases/25-332/done.txt").exists());

    let second = run_all();
    assert_eq!(second.cases.len(), 1);
    assert_eq!(second.cases[0].docket, docket);
    assert_eq!(*runs.lock().unwrap(), 2);

    *fails.lock().unwrap() = false;
    let third = run_all();
    assert_eq!(third.succeeded, 1);
    let status = h.app.status_store().load().unwrap();
    assert_eq!(status.cases[&docket].state, CaseState::PipelineComplete);

    assert!(run_all().cases.is_empty());
    assert_eq!(*runs.lock().unwrap(), 3);
}

#[test]
fn single_case_failure_propagates() {
    let h = harness();
    h.app
        .discover(&term_source(), None, false, &RecordingSink::default())
        .unwrap();
    make_ready(&h, "24-154");
    let runner = PipelineRunner::new(vec![Box::new(OutcomeStep { failing: "24-154" })]);

    let err = h
        .app
        .run_pipeline(
            &runner,
            &Target::Case("24-154".to_string()),
            RunOptions::default(),
            &RecordingSink::default(),
        )
        .unwrap_err();

    assert_matches!(err, DocketError::StepFailed { .. });
}

#[test]
fn run_holds_the_store_lock() {
    let h = harness();
    let runner = PipelineRunner::new(Vec::new());
    let _held = h.app.store().lock_exclusive().unwrap();

    let err = h
        .app
        .run_pipeline(&runner, &Target::All, RunOptions::default(), &RecordingSink::default())
        .unwrap_err();

    assert_matches!(err, DocketError::StoreLocked(_));
}
