use std::collections::BTreeMap;
use std::fmt::Write as _;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ServiceSettings;
use crate::domain::{Cluster, ClusterId};
use crate::error::DocketError;
use crate::fetch::{FetchClient, ReqwestTransport, Transport};
use crate::store::Store;
use crate::text::{TextExtractor, chunk_text, strip_html};

/// Payload ceiling per citation-lookup request.
pub const CHUNK_BYTES: usize = 20_000;

const SEPARATOR_WIDTH: usize = 80;

/// One entry of a citation-lookup response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CitationMatch {
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub citation: Option<String>,
    #[serde(default)]
    pub normalized_citations: Vec<String>,
    #[serde(default)]
    pub clusters: Vec<MatchedCluster>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MatchedCluster {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub case_name: Option<String>,
    #[serde(default)]
    pub date_filed: Option<String>,
    #[serde(default)]
    pub court: Option<serde_json::Value>,
}

/// Text of one sub-opinion (majority, concurrence, dissent, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opinion {
    pub kind: String,
    pub author: String,
    pub text: String,
}

/// The citation-lookup and opinion-text service.
pub trait CitationService {
    fn lookup(&self, text: &str) -> Result<Vec<CitationMatch>, DocketError>;
    fn sub_opinion_urls(&self, cluster: ClusterId) -> Result<Vec<String>, DocketError>;
    fn opinion(&self, url: &str) -> Result<Opinion, DocketError>;
}

pub struct CourtListenerClient<T: Transport = ReqwestTransport> {
    fetch: FetchClient<T>,
    base_url: String,
}

impl CourtListenerClient<ReqwestTransport> {
    pub fn new(settings: &ServiceSettings, token: &str) -> Result<Self, DocketError> {
        Ok(Self::with_fetch(
            FetchClient::from_settings(settings)?,
            &settings.base_url,
            token,
        ))
    }
}

impl<T: Transport> CourtListenerClient<T> {
    pub fn with_fetch(fetch: FetchClient<T>, base_url: &str, token: &str) -> Self {
        Self {
            fetch: fetch.with_header("Authorization", format!("Token {token}")),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClusterDetail {
    #[serde(default)]
    sub_opinions: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpinionDetail {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    author_str: Option<String>,
    #[serde(default)]
    plain_text: Option<String>,
    #[serde(default)]
    html_with_citations: Option<String>,
    #[serde(default)]
    html: Option<String>,
    #[serde(default)]
    html_columbia: Option<String>,
    #[serde(default)]
    html_lawbox: Option<String>,
    #[serde(default)]
    html_anon_2020: Option<String>,
}

impl OpinionDetail {
    fn into_opinion(self) -> Opinion {
        let raw = [
            self.plain_text,
            self.html_with_citations,
            self.html,
            self.html_columbia,
            self.html_lawbox,
            self.html_anon_2020,
        ]
        .into_iter()
        .flatten()
        .find(|text| !text.trim().is_empty())
        .unwrap_or_default();
        let text = if raw.contains('<') {
            strip_html(&raw)
        } else {
            raw
        };
        Opinion {
            kind: self.kind.unwrap_or_else(|| "unknown".to_string()),
            author: self.author_str.unwrap_or_default(),
            text,
        }
    }
}

impl<T: Transport> CitationService for CourtListenerClient<T> {
    fn lookup(&self, text: &str) -> Result<Vec<CitationMatch>, DocketError> {
        let url = format!("{}/citation-lookup/", self.base_url);
        self.fetch
            .post_form(&url, vec![("text".to_string(), text.to_string())])?
            .json("citation lookup response")
    }

    fn sub_opinion_urls(&self, cluster: ClusterId) -> Result<Vec<String>, DocketError> {
        let url = format!("{}/clusters/{cluster}/", self.base_url);
        let detail: ClusterDetail = self.fetch.get(&url)?.json("cluster")?;
        Ok(detail.sub_opinions)
    }

    fn opinion(&self, url: &str) -> Result<Opinion, DocketError> {
        let detail: OpinionDetail = self.fetch.get(url)?.json("opinion")?;
        Ok(detail.into_opinion())
    }
}

/// Clusters found for one case, keyed by id. The first sighting of an id
/// wins; later sightings never overwrite it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterIndex {
    clusters: BTreeMap<ClusterId, Cluster>,
}

impl ClusterIndex {
    /// Records every cluster of every successful match. Returns how many
    /// ids were new.
    pub fn absorb(&mut self, matches: &[CitationMatch]) -> usize {
        let mut added = 0;
        for found in matches.iter().filter(|found| found.status == 200) {
            let citation = found
                .normalized_citations
                .first()
                .cloned()
                .or_else(|| found.citation.clone())
                .unwrap_or_default();
            for cluster in &found.clusters {
                let Some(id) = cluster.id.filter(|id| *id != 0).map(ClusterId) else {
                    continue;
                };
                if self.clusters.contains_key(&id) {
                    continue;
                }
                self.clusters.insert(
                    id,
                    Cluster {
                        id,
                        case_name: cluster
                            .case_name
                            .clone()
                            .unwrap_or_else(|| "Unknown".to_string()),
                        date_filed: cluster.date_filed.clone().unwrap_or_default(),
                        citation: citation.clone(),
                        court: court_name(cluster.court.as_ref()),
                    },
                );
                added += 1;
            }
        }
        added
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn get(&self, id: ClusterId) -> Option<&Cluster> {
        self.clusters.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ClusterId, &Cluster)> {
        self.clusters.iter()
    }
}

fn court_name(value: Option<&serde_json::Value>) -> String {
    match value {
        Some(serde_json::Value::String(text)) => text.clone(),
        Some(serde_json::Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolveReport {
    pub documents: usize,
    pub chunks: usize,
    pub failed_chunks: usize,
    pub clusters: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct CitationResolver<'a, C, E> {
    service: &'a C,
    extractor: &'a E,
    opinions_dir: Utf8PathBuf,
}

impl<'a, C, E> CitationResolver<'a, C, E>
where
    C: CitationService,
    E: TextExtractor,
{
    pub fn new(service: &'a C, extractor: &'a E, opinions_dir: Utf8PathBuf) -> Self {
        Self {
            service,
            extractor,
            opinions_dir,
        }
    }

    /// Looks up citations in every document, writes the index to
    /// `index_path`, then downloads the opinions not yet on disk. Fails
    /// without writing the index when no lookup succeeded at all.
    pub fn resolve(
        &self,
        documents: &[Utf8PathBuf],
        index_path: &Utf8Path,
    ) -> Result<ResolveReport, DocketError> {
        let mut report = ResolveReport {
            documents: documents.len(),
            ..ResolveReport::default()
        };
        let index = self.collect(documents, &mut report);
        if report.chunks > 0 && report.failed_chunks == report.chunks {
            return Err(DocketError::Http {
                service: "courtlistener",
                message: format!("all {} citation lookups failed", report.chunks),
            });
        }
        report.clusters = index.len();
        Store::write_json_atomic(index_path, &index)?;
        info!(clusters = index.len(), path = %index_path, "citation index saved");

        std::fs::create_dir_all(self.opinions_dir.as_std_path())
            .map_err(|err| DocketError::Filesystem(err.to_string()))?;
        for (position, (id, cluster)) in index.iter().enumerate() {
            info!(
                "[{}/{}] {} ({})",
                position + 1,
                index.len(),
                cluster.case_name,
                cluster.citation
            );
            match self.download_cluster(*id, cluster)? {
                ClusterOutcome::Saved => report.downloaded += 1,
                ClusterOutcome::AlreadyPresent => report.skipped += 1,
                ClusterOutcome::Failed => report.failed += 1,
            }
        }
        info!(
            downloaded = report.downloaded,
            skipped = report.skipped,
            failed = report.failed,
            "opinion download finished"
        );
        Ok(report)
    }

    fn collect(&self, documents: &[Utf8PathBuf], report: &mut ResolveReport) -> ClusterIndex {
        let mut index = ClusterIndex::default();
        for document in documents {
            let text = match self.extractor.extract(document.as_std_path(), None) {
                Ok(text) => text,
                Err(err) => {
                    warn!(document = %document, error = %err, "skipping unreadable document");
                    continue;
                }
            };
            let chunks = chunk_text(&text, CHUNK_BYTES);
            let mut matches = Vec::new();
            for (idx, chunk) in chunks.iter().enumerate() {
                report.chunks += 1;
                match self.service.lookup(chunk) {
                    Ok(found) => matches.extend(found),
                    Err(err) => {
                        report.failed_chunks += 1;
                        warn!(document = %document, chunk = idx + 1, error = %err, "citation lookup failed");
                    }
                }
            }
            let added = index.absorb(&matches);
            info!(
                document = %document.file_name().unwrap_or_default(),
                chars = text.len(),
                citations = matches.len(),
                new_clusters = added,
                "looked up citations"
            );
        }
        index
    }

    fn download_cluster(
        &self,
        id: ClusterId,
        cluster: &Cluster,
    ) -> Result<ClusterOutcome, DocketError> {
        let path = self.opinion_path(cluster);
        if path.exists() {
            return Ok(ClusterOutcome::AlreadyPresent);
        }
        let urls = match self.service.sub_opinion_urls(id) {
            Ok(urls) => urls,
            Err(err) => {
                warn!(cluster = %id, error = %err, "failed to fetch cluster");
                return Ok(ClusterOutcome::Failed);
            }
        };
        if urls.is_empty() {
            warn!(cluster = %id, "no opinions in cluster");
            return Ok(ClusterOutcome::Failed);
        }
        let mut opinions = Vec::new();
        for url in &urls {
            match self.service.opinion(url) {
                Ok(opinion) if !opinion.text.is_empty() => opinions.push(opinion),
                Ok(_) => {}
                Err(err) => warn!(%url, error = %err, "failed to fetch opinion"),
            }
        }
        if opinions.is_empty() {
            warn!(cluster = %id, "no opinion text available");
            return Ok(ClusterOutcome::Failed);
        }
        Store::write_bytes_atomic(&path, render_opinions(cluster, &opinions).as_bytes())?;
        let chars: usize = opinions.iter().map(|opinion| opinion.text.len()).sum();
        info!(opinions = opinions.len(), chars, "saved opinions");
        Ok(ClusterOutcome::Saved)
    }

    pub fn opinion_path(&self, cluster: &Cluster) -> Utf8PathBuf {
        self.opinions_dir
            .join(format!("{}.txt", sanitize_filename(&cluster.case_name)))
    }
}

enum ClusterOutcome {
    Saved,
    AlreadyPresent,
    Failed,
}

/// Strips characters that are invalid in file names, replaces spaces and
/// truncates to 100 characters.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|ch| !matches!(ch, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .map(|ch| if ch == ' ' { '_' } else { ch })
        .take(100)
        .collect();
    if cleaned.is_empty() {
        "Unknown".to_string()
    } else {
        cleaned
    }
}

pub fn opinion_type_name(kind: &str) -> &str {
    match kind {
        "010combined" => "Combined Opinion",
        "015unamimous" => "Unanimous Opinion",
        "020lead" => "Lead Opinion",
        "025plurality" => "Plurality Opinion",
        "030concurrence" => "Concurrence",
        "035concurrenceinpart" => "Concurrence in Part",
        "040dissent" => "Dissent",
        "050addendum" => "Addendum",
        "060remittitur" => "Remittitur",
        "070rehearing" => "Rehearing",
        "080onthemerits" => "On the Merits",
        "090onmotiontostrike" => "On Motion to Strike",
        other => other,
    }
}

pub fn render_opinions(cluster: &Cluster, opinions: &[Opinion]) -> String {
    let rule = "=".repeat(SEPARATOR_WIDTH);
    let mut out = String::new();
    let _ = writeln!(out, "Case: {}", cluster.case_name);
    let _ = writeln!(out, "Citation: {}", cluster.citation);
    let _ = writeln!(out, "Court: {}", cluster.court);
    let _ = writeln!(out, "Date: {}", cluster.date_filed);
    let _ = writeln!(out, "{rule}\n");
    for opinion in opinions.iter().filter(|opinion| !opinion.text.is_empty()) {
        let _ = writeln!(out, "--- {} ---", opinion_type_name(&opinion.kind));
        if !opinion.author.is_empty() {
            let _ = writeln!(out, "Author: {}", opinion.author);
        }
        let _ = writeln!(out, "\n{}\n", opinion.text);
        let _ = writeln!(out, "{rule}\n");
    }
    out
}
