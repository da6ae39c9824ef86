use camino::Utf8Path;
use scraper::{ElementRef, Html, Node, Selector};
use tracing::{debug, info};

use crate::config::ServiceSettings;
use crate::domain::{DocketNumber, DocumentLink, Filing};
use crate::error::DocketError;
use crate::fetch::{FetchClient, ReqwestTransport, Transport};
use crate::store::Store;

/// Bodies smaller than this are error pages, not documents.
pub const MIN_DOCUMENT_BYTES: usize = 1_000;

/// The court's public website: docket listings, the argument transcript
/// index and the documents they link to.
pub trait CourtSite {
    fn docket_filings(&self, docket: &DocketNumber) -> Result<Vec<Filing>, DocketError>;
    fn transcript_url(&self, docket: &DocketNumber) -> Result<Option<String>, DocketError>;
    /// Downloads `url` to `destination`, returning the byte count.
    fn download(&self, url: &str, destination: &Utf8Path) -> Result<usize, DocketError>;
}

pub struct ScotusClient<T: Transport = ReqwestTransport> {
    fetch: FetchClient<T>,
    base_url: String,
    term: String,
}

impl ScotusClient<ReqwestTransport> {
    pub fn new(settings: &ServiceSettings, term: &str) -> Result<Self, DocketError> {
        Ok(Self::with_fetch(
            FetchClient::from_settings(settings)?,
            &settings.base_url,
            term,
        ))
    }
}

impl<T: Transport> ScotusClient<T> {
    pub fn with_fetch(fetch: FetchClient<T>, base_url: &str, term: &str) -> Self {
        Self {
            fetch,
            base_url: base_url.trim_end_matches('/').to_string(),
            term: term.to_string(),
        }
    }

    pub fn docket_url(&self, docket: &DocketNumber) -> String {
        format!(
            "{}/docket/docketfiles/html/public/{}.html",
            self.base_url,
            docket.as_str()
        )
    }

    pub fn transcript_index_url(&self) -> String {
        format!(
            "{}/oral_arguments/argument_transcript/{}",
            self.base_url, self.term
        )
    }
}

impl<T: Transport> CourtSite for ScotusClient<T> {
    fn docket_filings(&self, docket: &DocketNumber) -> Result<Vec<Filing>, DocketError> {
        let url = self.docket_url(docket);
        debug!(%url, "fetching docket page");
        let html = self.fetch.get(&url)?.text();
        parse_docket_page(&html, &self.base_url)
    }

    fn transcript_url(&self, docket: &DocketNumber) -> Result<Option<String>, DocketError> {
        let html = self.fetch.get(&self.transcript_index_url())?.text();
        let href = find_transcript_href(&html, docket)?;
        Ok(href.map(|href| resolve_transcript_href(&self.base_url, &self.term, &href)))
    }

    fn download(&self, url: &str, destination: &Utf8Path) -> Result<usize, DocketError> {
        let response = self.fetch.get(url.trim())?;
        if response.body.len() < MIN_DOCUMENT_BYTES {
            return Err(DocketError::Http {
                service: self.fetch.service(),
                message: format!("document too small ({} bytes): {url}", response.body.len()),
            });
        }
        Store::write_bytes_atomic(destination, &response.body)?;
        info!(
            file = %destination.file_name().unwrap_or_default(),
            kb = response.body.len() / 1024,
            "downloaded"
        );
        Ok(response.body.len())
    }
}

fn selector(css: &str) -> Result<Selector, DocketError> {
    Selector::parse(css).map_err(|err| DocketError::Parse {
        what: "css selector",
        message: err.to_string(),
    })
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>()
}

fn has_class(element: ElementRef<'_>, class: &str) -> bool {
    element.value().classes().any(|value| value == class)
}

/// Parses the docket table into filings, in page order. Relative document
/// links are made absolute against `base_url`.
pub fn parse_docket_page(html: &str, base_url: &str) -> Result<Vec<Filing>, DocketError> {
    let document = Html::parse_document(html);
    let card_sel = selector("div.card")?;
    let table_sel = selector("table.ProceedingItem")?;
    let date_sel = selector("td.ProceedingDate")?;
    let td_sel = selector("td")?;
    let links_sel = selector("span.documentlinks")?;
    let anchor_sel = selector("a.documentanchor")?;

    let mut filings = Vec::new();
    for card in document.select(&card_sel) {
        let Some(table) = card.select(&table_sel).next() else {
            continue;
        };
        let date = table
            .select(&date_sel)
            .next()
            .map(|td| element_text(td).trim().to_string())
            .unwrap_or_default();
        let Some(desc_td) = table.select(&td_sel).nth(1) else {
            continue;
        };

        let mut description = String::new();
        for child in desc_td.children() {
            match child.value() {
                Node::Text(text) => description.push_str(text),
                Node::Element(_) => {
                    let Some(element) = ElementRef::wrap(child) else {
                        continue;
                    };
                    if element.value().name() == "span" && has_class(element, "documentlinks") {
                        break;
                    }
                    description.push_str(&element_text(element));
                }
                _ => {}
            }
        }
        let description = crate::text::collapse_whitespace(&description);
        let description = description.trim_end_matches('.').to_string();

        let mut links = Vec::new();
        if let Some(span) = desc_td.select(&links_sel).next() {
            for anchor in span.select(&anchor_sel) {
                let href = anchor.value().attr("href").unwrap_or("").trim();
                if href.is_empty() {
                    continue;
                }
                let url = if href.starts_with("http") {
                    href.to_string()
                } else {
                    format!("{base_url}{href}")
                };
                links.push(DocumentLink {
                    url,
                    label: element_text(anchor).trim().to_string(),
                });
            }
        }

        filings.push(Filing {
            date,
            description,
            links,
        });
    }
    Ok(filings)
}

/// First PDF anchor on the transcript index whose text mentions the docket
/// or whose href contains it.
pub fn find_transcript_href(
    html: &str,
    docket: &DocketNumber,
) -> Result<Option<String>, DocketError> {
    let document = Html::parse_document(html);
    let anchor_sel = selector("a")?;
    let needle = docket.as_str().to_lowercase();
    for anchor in document.select(&anchor_sel) {
        let href = anchor.value().attr("href").unwrap_or("");
        let href_lower = href.to_lowercase();
        let text = element_text(anchor);
        let mentions = text.trim().contains(docket.as_str()) || href_lower.contains(&needle);
        if mentions && href_lower.contains(".pdf") {
            return Ok(Some(href.to_string()));
        }
    }
    Ok(None)
}

pub fn resolve_transcript_href(base_url: &str, term: &str, href: &str) -> String {
    if href.starts_with("..") {
        let rest = href.trim_start_matches(['.', '/']);
        format!("{base_url}/oral_arguments/{rest}")
    } else if href.starts_with('/') {
        format!("{base_url}{href}")
    } else if href.starts_with("http") {
        href.to_string()
    } else {
        format!("{base_url}/oral_arguments/argument_transcripts/{term}/{href}")
    }
}
