use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use tracing::{error, info};

use crate::citations::{CitationResolver, CitationService};
use crate::config::{ResolvedConfig, StepEntry};
use crate::error::DocketError;
use crate::pipeline::{CaseContext, Step};
use crate::store::{CITATION_INDEX_FILE, briefs_dir, citation_index_path, files_with_ext};
use crate::text::TextExtractor;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const STDERR_TAIL: usize = 5;
const STDOUT_TAIL: usize = 3;

/// Script-backed steps that follow citation resolution by default.
pub fn default_script_entries() -> Vec<StepEntry> {
    let entry = |script: &str, label: &str, output: Option<&str>, needs_case_dir, cost| StepEntry {
        script: script.to_string(),
        label: label.to_string(),
        output: output.map(str::to_string),
        needs_case_dir,
        cost,
    };
    vec![
        entry("summarize_opinions.py", "Summarize opinions", None, false, 0.50),
        entry(
            "issue_analysis.py",
            "Issue analysis",
            Some("issue_analysis_output.txt"),
            true,
            0.70,
        ),
        entry(
            "vote_prediction.py",
            "Vote prediction",
            Some("vote_predictions_combined.txt"),
            true,
            4.10,
        ),
        entry(
            "scenario_construction.py",
            "Scenario construction",
            Some("scenario_output.txt"),
            true,
            0.70,
        ),
        entry("export_to_website.py", "Export to website", None, true, 0.80),
    ]
}

/// Runs `<interpreter> <scripts_dir>/<script> [case_dir]` from the scripts
/// directory and maps a non-zero exit or timeout to a step failure.
#[derive(Debug, Clone)]
pub struct ScriptStep {
    entry: StepEntry,
    interpreter: String,
    scripts_dir: Utf8PathBuf,
    timeout: Duration,
}

impl ScriptStep {
    pub fn new(
        entry: StepEntry,
        interpreter: impl Into<String>,
        scripts_dir: Utf8PathBuf,
        timeout: Duration,
    ) -> Self {
        Self {
            entry,
            interpreter: interpreter.into(),
            scripts_dir,
            timeout,
        }
    }

    pub fn from_config(config: &ResolvedConfig) -> Vec<Self> {
        config
            .steps
            .clone()
            .unwrap_or_else(default_script_entries)
            .into_iter()
            .map(|entry| {
                Self::new(
                    entry,
                    config.interpreter.clone(),
                    config.scripts_dir.clone(),
                    config.step_timeout,
                )
            })
            .collect()
    }

    fn failed(&self, reason: impl Into<String>) -> DocketError {
        DocketError::StepFailed {
            step: self.entry.label.clone(),
            reason: reason.into(),
        }
    }
}

impl Step for ScriptStep {
    fn name(&self) -> &str {
        &self.entry.script
    }

    fn label(&self) -> &str {
        &self.entry.label
    }

    fn output_artifact(&self) -> Option<&str> {
        self.entry.output.as_deref()
    }

    fn cost(&self) -> f64 {
        self.entry.cost
    }

    fn run(&self, ctx: &CaseContext) -> Result<(), DocketError> {
        let script = self.scripts_dir.join(&self.entry.script);
        if !script.is_file() {
            return Err(self.failed(format!("script not found: {script}")));
        }

        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(script.as_std_path());
        if self.entry.needs_case_dir {
            cmd.arg(ctx.case_dir.as_std_path());
        }
        cmd.current_dir(self.scripts_dir.as_std_path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own group, so a timeout also takes down anything the script spawned.
            cmd.process_group(0);
        }

        let mut child = cmd
            .spawn()
            .map_err(|err| self.failed(format!("failed to start {}: {err}", self.interpreter)))?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let status = wait_with_timeout(&mut child, self.timeout)
            .map_err(|err| self.failed(err.to_string()))?;

        // After a timeout the drain threads are left detached: a descendant
        // that escaped the kill may still hold the pipes open.
        let Some(status) = status else {
            return Err(DocketError::StepTimeout {
                step: self.entry.label.clone(),
                limit: self.timeout,
            });
        };
        let stdout = collect(stdout);
        let stderr = collect(stderr);
        if !status.success() {
            for line in tail(&stderr, STDERR_TAIL) {
                error!(step = %self.entry.label, "{line}");
            }
            let reason = match status.code() {
                Some(code) => format!("exit code {code}"),
                None => "terminated by signal".to_string(),
            };
            return Err(self.failed(reason));
        }
        for line in tail(&stdout, STDOUT_TAIL) {
            info!(step = %self.entry.label, "{line}");
        }
        Ok(())
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

/// `Ok(None)` when the child was killed for exceeding `timeout`.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if start.elapsed() >= timeout {
            kill_tree(child);
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(unix)]
fn kill_tree(child: &mut Child) {
    match libc::pid_t::try_from(child.id()) {
        // SAFETY: killpg only sends a signal; the group id is the child's pid
        // because it was spawned with process_group(0).
        Ok(pgid) => unsafe {
            libc::killpg(pgid, libc::SIGKILL);
        },
        Err(_) => {
            let _ = child.kill();
        }
    }
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) {
    let _ = child.kill();
}

fn tail(text: &str, count: usize) -> Vec<&str> {
    let lines = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>();
    lines[lines.len().saturating_sub(count)..].to_vec()
}

/// Citation resolution over the case's briefs, run in-process.
pub struct CitationStep<'a, C, E> {
    resolver: CitationResolver<'a, C, E>,
}

impl<'a, C, E> CitationStep<'a, C, E>
where
    C: CitationService,
    E: TextExtractor,
{
    pub fn new(service: &'a C, extractor: &'a E, opinions_dir: Utf8PathBuf) -> Self {
        Self {
            resolver: CitationResolver::new(service, extractor, opinions_dir),
        }
    }
}

impl<C, E> Step for CitationStep<'_, C, E>
where
    C: CitationService,
    E: TextExtractor,
{
    fn name(&self) -> &str {
        "fetch_opinions"
    }

    fn label(&self) -> &str {
        "Fetch cited opinions"
    }

    fn output_artifact(&self) -> Option<&str> {
        Some(CITATION_INDEX_FILE)
    }

    fn cost(&self) -> f64 {
        0.0
    }

    fn run(&self, ctx: &CaseContext) -> Result<(), DocketError> {
        let documents = files_with_ext(&briefs_dir(&ctx.case_dir), "pdf");
        let report = self
            .resolver
            .resolve(&documents, &citation_index_path(&ctx.case_dir))?;
        info!(
            docket = %ctx.docket,
            documents = report.documents,
            clusters = report.clusters,
            downloaded = report.downloaded,
            skipped = report.skipped,
            failed = report.failed,
            "cited opinions resolved"
        );
        Ok(())
    }
}
