use std::collections::HashSet;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{info, warn};

use crate::classifier::{brief_filename, classify, truncate_chars, unique_name};
use crate::domain::{AmicusScore, DocketNumber, Filing, FilingCategory};
use crate::error::DocketError;
use crate::scoring::{AmicusScorer, Scored, amicus_filename, select_top};
use crate::scotus::CourtSite;
use crate::status::StatusStore;
use crate::store::{Store, briefs_dir, files_with_ext, has_pdf, transcript_dir};
use crate::text::TextExtractor;

const COVER_PAGES: u32 = 2;
const COVER_TEXT_LIMIT: usize = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AmicusMode {
    /// Keep the first N amicus filings in docket order.
    FirstN,
    /// Download every candidate, score the cover pages, keep the top N.
    Scored,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScrapeOutcome {
    pub filings: usize,
    pub party_brief_count: usize,
    pub amicus_count: usize,
    pub transcript_available: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Classification {
    party: usize,
    amicus: usize,
    skipped: usize,
}

/// Gathers a case's source documents into `briefs/` and `transcript/`.
/// Existing files are counted and never fetched again.
pub struct DocumentScraper<'a, S, A, E> {
    site: &'a S,
    scorer: &'a A,
    extractor: &'a E,
    max_amicus: usize,
}

impl<'a, S, A, E> DocumentScraper<'a, S, A, E>
where
    S: CourtSite,
    A: AmicusScorer,
    E: TextExtractor,
{
    pub fn new(site: &'a S, scorer: &'a A, extractor: &'a E, max_amicus: usize) -> Self {
        Self {
            site,
            scorer,
            extractor,
            max_amicus,
        }
    }

    /// Scrapes one case and records the result on its status entry.
    pub fn scrape_case<St: StatusStore>(
        &self,
        status: &St,
        docket: &DocketNumber,
        case_dir: &Utf8Path,
        mode: AmicusMode,
    ) -> Result<ScrapeOutcome, DocketError> {
        let outcome = self.scrape(docket, case_dir, mode)?;
        let briefs = outcome.party_brief_count > 0;
        let transcript = outcome.transcript_available;
        let tracked = status.update_case(docket, |record| record.record_sources(briefs, transcript))?;
        if !tracked {
            warn!(%docket, "case is not tracked in the status file; flags not recorded");
        }
        Ok(outcome)
    }

    pub fn scrape(
        &self,
        docket: &DocketNumber,
        case_dir: &Utf8Path,
        mode: AmicusMode,
    ) -> Result<ScrapeOutcome, DocketError> {
        let briefs = briefs_dir(case_dir);
        let transcripts = transcript_dir(case_dir);
        for dir in [&briefs, &transcripts] {
            std::fs::create_dir_all(dir.as_std_path())
                .map_err(|err| DocketError::Filesystem(err.to_string()))?;
        }

        let filings = self.site.docket_filings(docket)?;
        let counts = classify_all(&filings);
        info!(
            %docket,
            entries = filings.len(),
            party = counts.party,
            amicus = counts.amicus,
            skipped = counts.skipped,
            "classified docket entries"
        );

        let party_brief_count = self.download_party_briefs(&filings, &briefs);
        let amicus_count = match mode {
            AmicusMode::FirstN => self.download_first_amicus(&filings, &briefs),
            AmicusMode::Scored => self.download_scored_amicus(&filings, &briefs)?,
        };
        let transcript_available = self.download_transcript(docket, &transcripts);

        Ok(ScrapeOutcome {
            filings: filings.len(),
            party_brief_count,
            amicus_count,
            transcript_available,
        })
    }

    fn download_party_briefs(&self, filings: &[Filing], briefs: &Utf8Path) -> usize {
        let mut seen = HashSet::new();
        let mut downloaded = 0;
        for filing in filings {
            if classify(&filing.description) != FilingCategory::PartyBrief {
                continue;
            }
            let Some(link) = filing.primary_link() else {
                warn!(description = %truncate_chars(&filing.description, 80), "party brief has no document link");
                continue;
            };
            let filename = unique_name(&mut seen, &brief_filename(&filing.description));
            if self.fetch_once(&link.url, &briefs.join(&filename)) {
                downloaded += 1;
            }
        }
        info!(count = downloaded, "party briefs on disk");
        downloaded
    }

    fn download_first_amicus(&self, filings: &[Filing], briefs: &Utf8Path) -> usize {
        let mut count = 0;
        for (idx, url) in amicus_links(filings).into_iter().take(self.max_amicus).enumerate() {
            let dest = briefs.join(format!("amicus_{}.pdf", idx + 1));
            if self.fetch_once(&url, &dest) {
                count += 1;
            }
        }
        count
    }

    fn download_scored_amicus(
        &self,
        filings: &[Filing],
        briefs: &Utf8Path,
    ) -> Result<usize, DocketError> {
        let existing = existing_amicus(briefs);
        if !existing.is_empty() {
            info!(count = existing.len(), "amicus selection already on disk");
            return Ok(existing.len());
        }

        let candidates = amicus_candidates(filings);
        info!(count = candidates.len(), "amicus candidates");
        if candidates.is_empty() {
            return Ok(0);
        }

        let scratch = tempfile::Builder::new()
            .prefix("amicus_")
            .tempdir()
            .map_err(|err| DocketError::Filesystem(err.to_string()))?;
        let scratch_root = Utf8PathBuf::from_path_buf(scratch.path().to_path_buf())
            .map_err(|_| DocketError::Filesystem("invalid scratch path".to_string()))?;

        let mut scored = Vec::new();
        for (idx, (description, url)) in candidates.iter().enumerate() {
            let temp_path = scratch_root.join(format!("amicus_{idx}.pdf"));
            if let Err(err) = self.site.download(url, &temp_path) {
                warn!(error = %err, description = %truncate_chars(description, 60), "amicus download failed");
                continue;
            }
            let cover = match self.extractor.extract(temp_path.as_std_path(), Some(COVER_PAGES)) {
                Ok(text) => truncate_chars(&text, COVER_TEXT_LIMIT).to_string(),
                Err(err) => {
                    warn!(error = %err, "could not extract cover pages");
                    description.clone()
                }
            };
            let score = match self.scorer.score(&cover, description) {
                Ok(score) => score,
                Err(err) => {
                    warn!(error = %err, "scoring failed; using neutral score");
                    AmicusScore::neutral(err.to_string())
                }
            };
            scored.push(Scored {
                item: temp_path,
                score,
            });
        }

        let (kept, discarded) = select_top(scored, self.max_amicus);
        for candidate in kept.iter().chain(discarded.iter()) {
            info!(
                score = candidate.score.score,
                filer = %candidate.score.filer,
                reason = %truncate_chars(&candidate.score.reason, 60),
                "amicus score"
            );
        }

        let mut seen = HashSet::new();
        let mut count = 0;
        for candidate in kept {
            let filename = amicus_filename(&mut seen, &candidate.score.filer);
            let dest = briefs.join(&filename);
            if !dest.exists() {
                if let Err(err) = Store::move_file(candidate.item.as_std_path(), &dest) {
                    warn!(file = %filename, error = %err, "could not keep amicus brief");
                    continue;
                }
                info!(file = %filename, score = candidate.score.score, "kept amicus brief");
            }
            count += 1;
        }
        Ok(count)
    }

    fn download_transcript(&self, docket: &DocketNumber, transcripts: &Utf8Path) -> bool {
        if has_pdf(transcripts) {
            return true;
        }
        match self.site.transcript_url(docket) {
            Ok(Some(url)) => {
                let dest = transcripts.join(format!("transcript_{}.pdf", docket.dir_name()));
                self.fetch_once(&url, &dest)
            }
            Ok(None) => {
                info!(%docket, "transcript not yet available");
                false
            }
            Err(err) => {
                warn!(%docket, error = %err, "could not read transcript index");
                false
            }
        }
    }

    /// True when `dest` exists afterwards.
    fn fetch_once(&self, url: &str, dest: &Utf8Path) -> bool {
        if dest.exists() {
            info!(file = %dest.file_name().unwrap_or_default(), "already on disk");
            return true;
        }
        match self.site.download(url, dest) {
            Ok(_) => true,
            Err(err) => {
                warn!(%url, error = %err, "download failed");
                false
            }
        }
    }
}

fn classify_all(filings: &[Filing]) -> Classification {
    filings
        .iter()
        .fold(Classification::default(), |mut counts, filing| {
            match classify(&filing.description) {
                FilingCategory::PartyBrief => counts.party += 1,
                FilingCategory::Amicus => counts.amicus += 1,
                FilingCategory::Skip => counts.skipped += 1,
            }
            counts
        })
}

fn amicus_candidates(filings: &[Filing]) -> Vec<(String, String)> {
    filings
        .iter()
        .filter(|filing| classify(&filing.description) == FilingCategory::Amicus)
        .filter_map(|filing| {
            filing
                .primary_link()
                .map(|link| (filing.description.clone(), link.url.clone()))
        })
        .collect()
}

fn amicus_links(filings: &[Filing]) -> Vec<String> {
    amicus_candidates(filings)
        .into_iter()
        .map(|(_, url)| url)
        .collect()
}

fn existing_amicus(briefs: &Utf8Path) -> Vec<Utf8PathBuf> {
    files_with_ext(briefs, "pdf")
        .into_iter()
        .filter(|path| {
            path.file_name()
                .map(|name| name.starts_with("amicus_"))
                .unwrap_or(false)
        })
        .collect()
}
