use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DocketError;

/// Supreme Court docket number, e.g. `25-332` or `24A884`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocketNumber(String);

impl DocketNumber {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the per-case directory under `cases/`.
    pub fn dir_name(&self) -> String {
        self.0.replace('/', "-")
    }
}

impl fmt::Display for DocketNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DocketNumber {
    type Err = DocketError;

    /// Accepts raw docket strings as published ("No. 24-154, 24-156") and keeps
    /// the first number of a consolidated listing.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let without_prefix = trimmed
            .strip_prefix("No.")
            .or_else(|| trimmed.strip_prefix("no."))
            .unwrap_or(trimmed);
        let first = without_prefix.split(',').next().unwrap_or("").trim();
        let is_valid = !first.is_empty()
            && first
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '/')
            && first.chars().any(|ch| ch.is_ascii_digit());
        if !is_valid {
            return Err(DocketError::InvalidDocket(value.to_string()));
        }
        Ok(Self(first.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseState {
    Discovered,
    BriefsDownloaded,
    PipelineReady,
    PipelineComplete,
}

impl fmt::Display for CaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaseState::Discovered => write!(f, "discovered"),
            CaseState::BriefsDownloaded => write!(f, "briefs_downloaded"),
            CaseState::PipelineReady => write!(f, "pipeline_ready"),
            CaseState::PipelineComplete => write!(f, "pipeline_complete"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granted: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argued: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided: Option<String>,
}

/// Durable record of one tracked case. Records are only ever updated, never
/// removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub docket: DocketNumber,
    pub name: String,
    pub directory: String,
    pub state: CaseState,
    #[serde(default)]
    pub timeline: Timeline,
    #[serde(default)]
    pub argued: bool,
    #[serde(default)]
    pub decided: bool,
    #[serde(default)]
    pub briefs_downloaded: bool,
    #[serde(default)]
    pub transcript_downloaded: bool,
    #[serde(default)]
    pub pipeline_ready: bool,
    #[serde(default)]
    pub pipeline_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl CaseRecord {
    pub fn discovered(docket: DocketNumber, name: String, timeline: Timeline) -> Self {
        let directory = docket.dir_name();
        let mut record = Self {
            docket,
            name,
            directory,
            state: CaseState::Discovered,
            timeline: Timeline::default(),
            argued: false,
            decided: false,
            briefs_downloaded: false,
            transcript_downloaded: false,
            pipeline_ready: false,
            pipeline_complete: false,
            updated_at: None,
        };
        record.apply_timeline(timeline);
        record
    }

    pub fn apply_timeline(&mut self, timeline: Timeline) {
        self.argued = timeline.argued.is_some();
        self.decided = timeline.decided.is_some();
        self.timeline = timeline;
        self.touch();
    }

    /// Records what the source fetch found on disk and re-derives readiness.
    pub fn record_sources(&mut self, briefs: bool, transcript: bool) {
        self.briefs_downloaded = briefs;
        self.transcript_downloaded = transcript;
        self.pipeline_ready = briefs && transcript;
        if !self.pipeline_ready {
            self.pipeline_complete = false;
        }
        self.refresh_state();
    }

    /// Called only after pre-flight has verified briefs and transcript on disk.
    pub fn mark_pipeline_complete(&mut self) {
        self.briefs_downloaded = true;
        self.transcript_downloaded = true;
        self.pipeline_ready = true;
        self.pipeline_complete = true;
        self.refresh_state();
    }

    fn refresh_state(&mut self) {
        self.state = if self.pipeline_complete {
            CaseState::PipelineComplete
        } else if self.pipeline_ready {
            CaseState::PipelineReady
        } else if self.briefs_downloaded {
            CaseState::BriefsDownloaded
        } else {
            CaseState::Discovered
        };
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Some(chrono::Utc::now().to_rfc3339());
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentLink {
    pub url: String,
    pub label: String,
}

/// One docket entry as parsed from the docket page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Filing {
    pub date: String,
    pub description: String,
    pub links: Vec<DocumentLink>,
}

impl Filing {
    /// The link labelled "Main Document", else the first link.
    pub fn primary_link(&self) -> Option<&DocumentLink> {
        self.links
            .iter()
            .find(|link| link.label == "Main Document")
            .or_else(|| self.links.first())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilingCategory {
    Skip,
    PartyBrief,
    Amicus,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ClusterId(pub u64);

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A cited decision as returned by citation lookup. The identifier is the
/// key of the citation index and is not repeated inside each entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    #[serde(skip)]
    pub id: ClusterId,
    pub case_name: String,
    #[serde(default)]
    pub date_filed: String,
    #[serde(default)]
    pub citation: String,
    #[serde(default)]
    pub court: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartySupported {
    Petitioner,
    Respondent,
    Neither,
    #[serde(other)]
    Unknown,
}

/// Scoring result for one amicus filing; discarded once the top subset is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AmicusScore {
    pub score: u8,
    pub filer: String,
    pub party_supported: PartySupported,
    pub reason: String,
}

impl AmicusScore {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 10;
    pub const NEUTRAL: u8 = 5;

    pub fn neutral(reason: impl Into<String>) -> Self {
        Self {
            score: Self::NEUTRAL,
            filer: "Unknown".to_string(),
            party_supported: PartySupported::Unknown,
            reason: reason.into(),
        }
    }

    pub fn clamp_score(raw: i64) -> u8 {
        raw.clamp(Self::MIN as i64, Self::MAX as i64) as u8
    }
}
