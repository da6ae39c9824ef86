use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::classifier::{truncate_chars, unique_name};
use crate::config::ServiceSettings;
use crate::domain::{AmicusScore, PartySupported};
use crate::error::DocketError;
use crate::fetch::{FetchClient, ReqwestTransport, Transport};

pub const SCORING_MODEL: &str = "claude-3-5-haiku-latest";
const API_VERSION: &str = "2023-06-01";

static JSON_OBJECT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{[^}]+\}").unwrap());
static NON_ALNUM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9]+").unwrap());

/// Rates an amicus filing by its cover pages.
pub trait AmicusScorer {
    fn score(&self, cover_text: &str, description: &str) -> Result<AmicusScore, DocketError>;
}

/// Used when no scoring credential is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeutralScorer;

impl AmicusScorer for NeutralScorer {
    fn score(&self, _cover_text: &str, _description: &str) -> Result<AmicusScore, DocketError> {
        Ok(AmicusScore::neutral("No API key for scoring"))
    }
}

/// Model scoring when an API key is configured, neutral otherwise.
pub enum ConfiguredScorer {
    Anthropic(AnthropicScorer),
    Neutral(NeutralScorer),
}

impl ConfiguredScorer {
    pub fn new(settings: &ServiceSettings, api_key: Option<&str>) -> Result<Self, DocketError> {
        match api_key {
            Some(key) => Ok(Self::Anthropic(AnthropicScorer::new(settings, key)?)),
            None => {
                warn!("ANTHROPIC_API_KEY not set; amicus briefs get a neutral score");
                Ok(Self::Neutral(NeutralScorer))
            }
        }
    }
}

impl AmicusScorer for ConfiguredScorer {
    fn score(&self, cover_text: &str, description: &str) -> Result<AmicusScore, DocketError> {
        match self {
            Self::Anthropic(scorer) => scorer.score(cover_text, description),
            Self::Neutral(scorer) => scorer.score(cover_text, description),
        }
    }
}

pub struct AnthropicScorer<T: Transport = ReqwestTransport> {
    fetch: FetchClient<T>,
    base_url: String,
}

impl AnthropicScorer<ReqwestTransport> {
    pub fn new(settings: &ServiceSettings, api_key: &str) -> Result<Self, DocketError> {
        Ok(Self::with_fetch(
            FetchClient::from_settings(settings)?,
            &settings.base_url,
            api_key,
        ))
    }
}

impl<T: Transport> AnthropicScorer<T> {
    pub fn with_fetch(fetch: FetchClient<T>, base_url: &str, api_key: &str) -> Self {
        Self {
            fetch: fetch
                .with_header("x-api-key", api_key)
                .with_header("anthropic-version", API_VERSION),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

impl<T: Transport> AmicusScorer for AnthropicScorer<T> {
    fn score(&self, cover_text: &str, description: &str) -> Result<AmicusScore, DocketError> {
        let body = json!({
            "model": SCORING_MODEL,
            "max_tokens": 200,
            "messages": [{ "role": "user", "content": scoring_prompt(cover_text, description) }],
        });
        let response = self
            .fetch
            .post_json(&format!("{}/messages", self.base_url), body)?;
        let message: MessageResponse = response.json("scoring response")?;
        let text = message
            .content
            .into_iter()
            .find_map(|block| block.text)
            .unwrap_or_default();
        debug!(reply = %text.trim(), "amicus score reply");
        Ok(parse_score(&text).unwrap_or_else(|| AmicusScore::neutral("Could not parse score")))
    }
}

fn scoring_prompt(cover_text: &str, description: &str) -> String {
    format!(
        "Score this amicus brief 1-10 for its analytical value in predicting the outcome of \
         the case.\n\nFiling description: {description}\n\nCover page text:\n{cover_text}\n\n\
         Return ONLY valid JSON:\n\
         {{\"score\": N, \"filer\": \"name of filer\", \
         \"party_supported\": \"petitioner|respondent|neither\", \
         \"reason\": \"one sentence explaining score\"}}"
    )
}

#[derive(Debug, Deserialize)]
struct RawScore {
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    filer: Option<String>,
    #[serde(default)]
    party_supported: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

/// Reads a score object from model output, falling back to the first
/// `{...}` span when the reply is not bare JSON.
pub fn parse_score(text: &str) -> Option<AmicusScore> {
    let raw: RawScore = serde_json::from_str(text.trim()).ok().or_else(|| {
        JSON_OBJECT
            .find(text)
            .and_then(|found| serde_json::from_str(found.as_str()).ok())
    })?;
    let score = raw
        .score
        .map(|value| AmicusScore::clamp_score(value.round() as i64))
        .unwrap_or(AmicusScore::NEUTRAL);
    let party_supported = match raw
        .party_supported
        .as_deref()
        .map(|value| value.trim().to_lowercase())
        .as_deref()
    {
        Some("petitioner") => PartySupported::Petitioner,
        Some("respondent") => PartySupported::Respondent,
        Some("neither") => PartySupported::Neither,
        _ => PartySupported::Unknown,
    };
    Some(AmicusScore {
        score,
        filer: raw
            .filer
            .filter(|filer| !filer.trim().is_empty())
            .unwrap_or_else(|| "Unknown".to_string()),
        party_supported,
        reason: raw.reason.unwrap_or_default(),
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scored<T> {
    pub item: T,
    pub score: AmicusScore,
}

/// Sorts by score, highest first, and splits off everything past `cap`.
/// The sort is stable so equal scores keep filing order.
pub fn select_top<T>(mut scored: Vec<Scored<T>>, cap: usize) -> (Vec<Scored<T>>, Vec<Scored<T>>) {
    scored.sort_by(|a, b| b.score.score.cmp(&a.score.score));
    let discarded = scored.split_off(cap.min(scored.len()));
    (scored, discarded)
}

/// `amicus_<filer>.pdf`, unique within `seen`.
pub fn amicus_filename(seen: &mut HashSet<String>, filer: &str) -> String {
    let cleaned = NON_ALNUM.replace_all(filer, "_");
    let cleaned = truncate_chars(&cleaned, 30).trim_matches('_').to_string();
    let cleaned = if cleaned.is_empty() {
        "Unknown".to_string()
    } else {
        cleaned
    };
    unique_name(seen, &format!("amicus_{cleaned}.pdf"))
}
