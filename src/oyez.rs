use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::ServiceSettings;
use crate::domain::{CaseRecord, DocketNumber, Timeline};
use crate::error::DocketError;
use crate::fetch::{FetchClient, ReqwestTransport, Transport};
use crate::status::StatusStore;
use crate::store::{Store, case_info_path};
use crate::text::{strip_tags, unescape_name, wrap_text};

const WRAP_WIDTH: usize = 76;

/// One row of the term listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaseSummary {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub docket_number: Option<String>,
    #[serde(default)]
    pub href: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaseDetail {
    #[serde(default)]
    pub question: Option<Value>,
    #[serde(default)]
    pub facts_of_the_case: Option<Value>,
    #[serde(default)]
    pub timeline: Option<Vec<TimelineEvent>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimelineEvent {
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub dates: Vec<Value>,
}

/// The case-metadata service.
pub trait CaseSource {
    fn list_term(&self, term: &str) -> Result<Vec<CaseSummary>, DocketError>;
    fn detail(&self, href: &str) -> Result<CaseDetail, DocketError>;
}

pub struct OyezClient<T: Transport = ReqwestTransport> {
    fetch: FetchClient<T>,
    base_url: String,
}

impl OyezClient<ReqwestTransport> {
    pub fn new(settings: &ServiceSettings) -> Result<Self, DocketError> {
        Ok(Self::with_fetch(
            FetchClient::from_settings(settings)?,
            &settings.base_url,
        ))
    }
}

impl<T: Transport> OyezClient<T> {
    pub fn with_fetch(fetch: FetchClient<T>, base_url: &str) -> Self {
        Self {
            fetch,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl<T: Transport> CaseSource for OyezClient<T> {
    fn list_term(&self, term: &str) -> Result<Vec<CaseSummary>, DocketError> {
        let url = format!("{}/cases?per_page=0&filter=term:{term}", self.base_url);
        self.fetch.get(&url)?.json("case listing")
    }

    fn detail(&self, href: &str) -> Result<CaseDetail, DocketError> {
        self.fetch.get(href)?.json("case detail")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryReport {
    pub term: String,
    pub listed: usize,
    pub tracked: usize,
    pub new_cases: Vec<DocketNumber>,
    pub argued: usize,
    pub decided: usize,
    pub ready: usize,
    pub complete: usize,
}

/// Lists the term's cases and tracks every one not seen before. Tracked
/// cases get their name and timeline refreshed unless `force` is set, in
/// which case their directory and `case_info.txt` are rebuilt as well.
pub fn discover<C, S>(
    source: &C,
    status_store: &S,
    store: &Store,
    term: &str,
    force: bool,
) -> Result<DiscoveryReport, DocketError>
where
    C: CaseSource,
    S: StatusStore,
{
    let listing = source.list_term(term)?;
    info!(term, cases = listing.len(), "fetched term listing");

    let mut status = status_store.load()?;
    status.term = Some(format!("OT{term}"));
    let mut new_cases = Vec::new();

    for summary in &listing {
        let Some(docket) = summary
            .docket_number
            .as_deref()
            .filter(|raw| !raw.trim().is_empty())
            .and_then(|raw| raw.parse::<DocketNumber>().ok())
        else {
            warn!(name = summary.name.as_deref().unwrap_or("?"), "skipping case with no docket number");
            continue;
        };
        let name = unescape_name(summary.name.as_deref().unwrap_or("Unknown"));

        if let Some(record) = status.case_mut(&docket).filter(|_| !force) {
            if let Some(href) = &summary.href {
                match source.detail(href) {
                    Ok(detail) => {
                        record.name = name;
                        record.apply_timeline(extract_timeline(&detail));
                    }
                    Err(err) => warn!(%docket, error = %err, "could not refresh case"),
                }
            }
            continue;
        }

        let detail = match &summary.href {
            Some(href) => source.detail(href).unwrap_or_else(|err| {
                warn!(%docket, error = %err, "could not fetch case detail");
                CaseDetail::default()
            }),
            None => CaseDetail::default(),
        };
        let case_dir = store.ensure_case_dirs(&docket.dir_name())?;
        let info = render_case_info(&name, &docket, &detail);
        Store::write_bytes_atomic(&case_info_path(&case_dir), info.as_bytes())?;

        let timeline = extract_timeline(&detail);
        match status.case_mut(&docket) {
            Some(record) => {
                record.name = name;
                record.apply_timeline(timeline);
            }
            None => {
                info!(%docket, %name, argued = ?timeline.argued, decided = ?timeline.decided, "new case");
                let record = CaseRecord::discovered(docket.clone(), name, timeline);
                status.cases.insert(docket.clone(), record);
                new_cases.push(docket);
            }
        }
    }

    status_store.save(&status)?;

    let records = status.cases.values();
    let (mut argued, mut decided, mut ready, mut complete) = (0, 0, 0, 0);
    for record in records {
        argued += usize::from(record.argued);
        decided += usize::from(record.decided);
        ready += usize::from(record.pipeline_ready);
        complete += usize::from(record.pipeline_complete);
    }
    Ok(DiscoveryReport {
        term: format!("OT{term}"),
        listed: listing.len(),
        tracked: status.cases.len(),
        new_cases,
        argued,
        decided,
        ready,
        complete,
    })
}

fn text_field(value: Option<&Value>) -> String {
    let text = match value {
        Some(Value::String(text)) => text.as_str(),
        Some(Value::Object(map)) => map.get("text").and_then(Value::as_str).unwrap_or(""),
        _ => "",
    };
    strip_tags(text)
}

/// First date of each granted/argued/decided event, as "January 05, 2026".
pub fn extract_timeline(detail: &CaseDetail) -> Timeline {
    let mut timeline = Timeline::default();
    for event in detail.timeline.iter().flatten() {
        let Some(first) = event.dates.first().and_then(Value::as_f64) else {
            continue;
        };
        if first == 0.0 {
            continue;
        }
        let Some(date) = DateTime::from_timestamp(first as i64, 0) else {
            continue;
        };
        let formatted = date.format("%B %d, %Y").to_string();
        let kind = event.event.as_deref().unwrap_or("").to_lowercase();
        if kind.contains("grant") {
            timeline.granted = Some(formatted);
        } else if kind.contains("argue") {
            timeline.argued = Some(formatted);
        } else if kind.contains("decid") {
            timeline.decided = Some(formatted);
        }
    }
    timeline
}

/// The `case_info.txt` record read by the pipeline scripts.
pub fn render_case_info(name: &str, docket: &DocketNumber, detail: &CaseDetail) -> String {
    let question = text_field(detail.question.as_ref());
    let question = if question.is_empty() {
        "Not available from Oyez.".to_string()
    } else {
        question
    };
    let facts = text_field(detail.facts_of_the_case.as_ref());
    let timeline = extract_timeline(detail);

    let mut lines = vec![
        format!("{name} (No. {docket})"),
        String::new(),
        "QUESTIONS PRESENTED:".to_string(),
        wrap_text(&question, WRAP_WIDTH, "   "),
        String::new(),
    ];
    if !facts.is_empty() {
        lines.push("BACKGROUND:".to_string());
        lines.push(wrap_text(&facts, WRAP_WIDTH, ""));
        lines.push(String::new());
    }
    if let Some(argued) = &timeline.argued {
        lines.push(format!("Argued: {argued}"));
    } else if let Some(granted) = &timeline.granted {
        lines.push(format!("Certiorari granted: {granted}"));
        lines.push("Argued: Not yet argued".to_string());
    }
    match &timeline.decided {
        Some(decided) => lines.push(format!("Decided: {decided}")),
        None => lines.push("Decision expected: Pending".to_string()),
    }
    lines.push(String::new());
    lines.push("KEY LEGAL ISSUES:".to_string());
    lines.push("- To be determined by issue analysis pipeline step".to_string());
    lines.join("\n")
}
