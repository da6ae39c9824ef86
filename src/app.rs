use std::time::{Duration, Instant};

use camino::Utf8Path;
use serde::Serialize;
use tracing::{info, warn};

use crate::citations::CitationService;
use crate::config::ResolvedConfig;
use crate::domain::{CaseRecord, CaseState, DocketNumber};
use crate::error::DocketError;
use crate::oyez::{CaseSource, DiscoveryReport, discover};
use crate::pipeline::{CaseContext, CaseRun, Estimate, PipelineRunner, Step};
use crate::scoring::AmicusScorer;
use crate::scotus::CourtSite;
use crate::sources::{AmicusMode, DocumentScraper, ScrapeOutcome};
use crate::status::{DocketStatus, JsonStatusStore, StatusStore};
use crate::steps::{CitationStep, ScriptStep};
use crate::store::{Store, briefs_dir, has_pdf, transcript_dir};
use crate::text::TextExtractor;

/// Which cases a batch command works on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A docket number or a case directory path.
    Case(String),
    All,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub force: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchSourcesResult {
    pub cases: Vec<CaseFetch>,
    pub ready: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseFetch {
    pub docket: DocketNumber,
    pub directory: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ScrapeOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CaseFetch {
    pub fn pipeline_ready(&self) -> bool {
        self.outcome
            .as_ref()
            .map(|outcome| outcome.party_brief_count > 0 && outcome.transcript_available)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub cases: Vec<CaseOutcome>,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseOutcome {
    pub docket: DocketNumber,
    pub complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<CaseRun>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResult {
    pub term: Option<String>,
    pub tracked: usize,
    pub discovered: usize,
    pub briefs_downloaded: usize,
    pub pipeline_ready: usize,
    pub pipeline_complete: usize,
    pub cases: Vec<StatusEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusEntry {
    pub docket: DocketNumber,
    pub name: String,
    pub state: CaseState,
    pub argued: Option<String>,
    pub decided: Option<String>,
    pub briefs_downloaded: bool,
    pub transcript_downloaded: bool,
}

#[derive(Debug, Clone, Copy)]
pub enum ProgressSinkKind {
    Discover,
    FetchSources,
    Run,
    Status,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

fn emit(sink: &dyn ProgressSink, phase: &str, message: impl AsRef<str>, elapsed: Option<Duration>) {
    sink.event(ProgressEvent {
        message: format!("phase={phase}; {}", message.as_ref()),
        elapsed,
    });
}

pub struct App<S: StatusStore = JsonStatusStore> {
    store: Store,
    status: S,
    config: ResolvedConfig,
}

impl App<JsonStatusStore> {
    pub fn from_config(config: ResolvedConfig) -> Result<Self, DocketError> {
        let store = Store::new(&config.data_dir)?;
        let status = JsonStatusStore::new(&store);
        Ok(Self::new(store, status, config))
    }
}

impl<S: StatusStore> App<S> {
    pub fn new(store: Store, status: S, config: ResolvedConfig) -> Self {
        Self {
            store,
            status,
            config,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn status_store(&self) -> &S {
        &self.status
    }

    pub fn discover<C: CaseSource>(
        &self,
        source: &C,
        term: Option<&str>,
        force: bool,
        sink: &dyn ProgressSink,
    ) -> Result<DiscoveryReport, DocketError> {
        let _lock = self.store.lock_exclusive()?;
        let term = term.unwrap_or(self.config.term.as_str());
        emit(sink, "Resolve", format!("listing term {term}"), None);

        let started = Instant::now();
        let report = discover(source, &self.status, &self.store, term, force)?;
        emit(
            sink,
            "Store",
            format!(
                "{} cases tracked, {} new",
                report.tracked,
                report.new_cases.len()
            ),
            Some(started.elapsed()),
        );
        Ok(report)
    }

    pub fn fetch_sources<W, A, E>(
        &self,
        site: &W,
        scorer: &A,
        extractor: &E,
        target: &Target,
        mode: AmicusMode,
        sink: &dyn ProgressSink,
    ) -> Result<FetchSourcesResult, DocketError>
    where
        W: CourtSite,
        A: AmicusScorer,
        E: TextExtractor,
    {
        let _lock = self.store.lock_exclusive()?;
        let scraper = DocumentScraper::new(site, scorer, extractor, self.config.max_amicus_briefs);

        let mut cases = Vec::new();
        match target {
            Target::Case(raw) => {
                let ctx = self.resolve_case(raw)?;
                emit(sink, "Fetch", format!("{} sources", ctx.docket), None);
                let started = Instant::now();
                let outcome = scraper.scrape_case(&self.status, &ctx.docket, &ctx.case_dir, mode)?;
                emit(sink, "Store", summarize_outcome(&ctx.docket, &outcome), Some(started.elapsed()));
                cases.push(CaseFetch {
                    docket: ctx.docket,
                    directory: ctx.case_dir.to_string(),
                    outcome: Some(outcome),
                    error: None,
                });
            }
            Target::All => {
                let status = self.status.load()?;
                if status.cases.is_empty() {
                    return Err(DocketError::CaseNotFound(
                        "no cases discovered yet; run discover first".to_string(),
                    ));
                }
                let pending = self.sources_pending(&status);
                emit(sink, "Resolve", format!("{} cases need sources", pending.len()), None);
                for (idx, ctx) in pending.into_iter().enumerate() {
                    emit(sink, "Fetch", format!("[{}] {} sources", idx + 1, ctx.docket), None);
                    let started = Instant::now();
                    let entry = match scraper.scrape_case(&self.status, &ctx.docket, &ctx.case_dir, mode) {
                        Ok(outcome) => {
                            emit(sink, "Store", summarize_outcome(&ctx.docket, &outcome), Some(started.elapsed()));
                            CaseFetch {
                                docket: ctx.docket,
                                directory: ctx.case_dir.to_string(),
                                outcome: Some(outcome),
                                error: None,
                            }
                        }
                        Err(err) => {
                            warn!(docket = %ctx.docket, error = %err, "source fetch failed; continuing");
                            emit(sink, "Fetch", format!("{} failed: {err}", ctx.docket), None);
                            CaseFetch {
                                docket: ctx.docket,
                                directory: ctx.case_dir.to_string(),
                                outcome: None,
                                error: Some(err.to_string()),
                            }
                        }
                    };
                    cases.push(entry);
                }
            }
        }

        let ready = cases.iter().filter(|case| case.pipeline_ready()).count();
        info!(cases = cases.len(), ready, "source fetch finished");
        Ok(FetchSourcesResult { cases, ready })
    }

    /// Citation resolution followed by the configured script steps.
    pub fn pipeline<'a, L, E>(&self, citations: &'a L, extractor: &'a E) -> PipelineRunner<'a>
    where
        L: CitationService,
        E: TextExtractor,
    {
        let mut steps: Vec<Box<dyn Step + 'a>> = vec![Box::new(CitationStep::new(
            citations,
            extractor,
            self.store.opinions_dir(),
        ))];
        for step in ScriptStep::from_config(&self.config) {
            steps.push(Box::new(step));
        }
        PipelineRunner::new(steps)
    }

    pub fn run_pipeline(
        &self,
        runner: &PipelineRunner<'_>,
        target: &Target,
        options: RunOptions,
        sink: &dyn ProgressSink,
    ) -> Result<PipelineResult, DocketError> {
        let _lock = self.store.lock_exclusive()?;

        let mut result = PipelineResult {
            cases: Vec::new(),
            succeeded: 0,
            failed: 0,
        };
        match target {
            Target::Case(raw) => {
                let ctx = self.resolve_case(raw)?;
                emit(sink, "Run", format!("{} pipeline", ctx.docket), None);
                let started = Instant::now();
                let run = runner.run_case(&self.status, &ctx, options.force)?;
                emit(sink, "Store", format!("{} complete", ctx.docket), Some(started.elapsed()));
                result.succeeded = 1;
                result.cases.push(CaseOutcome {
                    docket: ctx.docket,
                    complete: true,
                    run: Some(run),
                    error: None,
                });
            }
            Target::All => {
                let batch = self.pipeline_batch(runner, options.force)?;
                emit(sink, "Resolve", format!("{} cases to process", batch.len()), None);
                for (idx, ctx) in batch.into_iter().enumerate() {
                    emit(sink, "Run", format!("[{}] {} pipeline", idx + 1, ctx.docket), None);
                    let started = Instant::now();
                    match runner.run_case(&self.status, &ctx, options.force) {
                        Ok(run) => {
                            emit(sink, "Store", format!("{} complete", ctx.docket), Some(started.elapsed()));
                            result.succeeded += 1;
                            result.cases.push(CaseOutcome {
                                docket: ctx.docket,
                                complete: true,
                                run: Some(run),
                                error: None,
                            });
                        }
                        Err(err) => {
                            warn!(docket = %ctx.docket, error = %err, "pipeline failed; continuing");
                            emit(sink, "Run", format!("{} failed: {err}", ctx.docket), None);
                            result.failed += 1;
                            result.cases.push(CaseOutcome {
                                docket: ctx.docket,
                                complete: false,
                                run: None,
                                error: Some(err.to_string()),
                            });
                        }
                    }
                }
            }
        }
        info!(succeeded = result.succeeded, failed = result.failed, "pipeline finished");
        Ok(result)
    }

    /// Planning query over the same selection `run_pipeline` would use.
    pub fn estimate(
        &self,
        runner: &PipelineRunner<'_>,
        target: &Target,
        options: RunOptions,
    ) -> Result<Estimate, DocketError> {
        let cases = match target {
            Target::Case(raw) => vec![self.resolve_case(raw)?],
            Target::All => self.pipeline_batch(runner, options.force)?,
        };
        Ok(runner.estimate(&cases))
    }

    pub fn status(&self, sink: &dyn ProgressSink) -> Result<StatusResult, DocketError> {
        emit(sink, "Resolve", format!("reading {}", self.store.status_path()), None);
        let status = self.status.load()?;
        let cases = status
            .cases
            .values()
            .map(|record| StatusEntry {
                docket: record.docket.clone(),
                name: record.name.clone(),
                state: record.state,
                argued: record.timeline.argued.clone(),
                decided: record.timeline.decided.clone(),
                briefs_downloaded: record.briefs_downloaded,
                transcript_downloaded: record.transcript_downloaded,
            })
            .collect::<Vec<_>>();
        Ok(StatusResult {
            term: status.term.clone(),
            tracked: status.cases.len(),
            discovered: status.count_in(CaseState::Discovered),
            briefs_downloaded: status.count_in(CaseState::BriefsDownloaded),
            pipeline_ready: status.count_in(CaseState::PipelineReady),
            pipeline_complete: status.count_in(CaseState::PipelineComplete),
            cases,
        })
    }

    /// Accepts a docket number or a path to a case directory.
    pub fn resolve_case(&self, raw: &str) -> Result<CaseContext, DocketError> {
        let trimmed = raw.trim().trim_end_matches('/');
        let status = self.status.load()?;

        let as_path = Utf8Path::new(trimmed);
        if as_path.is_dir() {
            let directory = as_path.file_name().unwrap_or(trimmed);
            let record = status.cases.values().find(|record| record.directory == directory);
            let docket = match record {
                Some(record) => record.docket.clone(),
                None => directory.parse::<DocketNumber>()?,
            };
            let name = record.map(|record| record.name.clone()).unwrap_or_default();
            return Ok(CaseContext::new(docket, name, as_path.to_path_buf()));
        }

        let docket = trimmed
            .parse::<DocketNumber>()
            .map_err(|_| DocketError::CaseNotFound(trimmed.to_string()))?;
        if let Some(record) = status.case(&docket) {
            return Ok(self.context_for(record));
        }
        let case_dir = self.store.case_dir(&docket.dir_name());
        if case_dir.is_dir() {
            return Ok(CaseContext::new(docket, String::new(), case_dir));
        }
        Err(DocketError::CaseNotFound(format!(
            "{trimmed} (no case directory at {case_dir})"
        )))
    }

    fn context_for(&self, record: &CaseRecord) -> CaseContext {
        CaseContext::from_record(record, self.store.case_dir(&record.directory))
    }

    /// Argued cases whose briefs or transcript are not yet on disk.
    fn sources_pending(&self, status: &DocketStatus) -> Vec<CaseContext> {
        status
            .cases
            .values()
            .filter(|record| record.argued)
            .map(|record| self.context_for(record))
            .filter(|ctx| {
                !has_pdf(&briefs_dir(&ctx.case_dir)) || !has_pdf(&transcript_dir(&ctx.case_dir))
            })
            .collect()
    }

    fn pipeline_batch(
        &self,
        runner: &PipelineRunner<'_>,
        force: bool,
    ) -> Result<Vec<CaseContext>, DocketError> {
        let status = self.status.load()?;
        let batch = status
            .cases
            .values()
            .filter(|record| {
                if force {
                    record.pipeline_ready || record.briefs_downloaded
                } else {
                    record.pipeline_ready
                }
            })
            .filter_map(|record| {
                let ctx = self.context_for(record);
                if !ctx.case_dir.is_dir() {
                    return None;
                }
                // Steps without an artifact leave no trace on disk, so the
                // stored completion flag still decides for them.
                let pending = force
                    || !record.pipeline_complete
                    || !runner.artifacts_complete(&ctx.case_dir);
                pending.then_some(ctx)
            })
            .collect();
        Ok(batch)
    }
}

fn summarize_outcome(docket: &DocketNumber, outcome: &ScrapeOutcome) -> String {
    format!(
        "{docket}: {} party briefs, {} amicus, transcript {}",
        outcome.party_brief_count,
        outcome.amicus_count,
        if outcome.transcript_available {
            "yes"
        } else {
            "pending"
        }
    )
}
