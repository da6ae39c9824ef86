use std::path::Path;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use serde_json::Value;

use docket_pipeline::citations::{
    CitationMatch, CitationResolver, CitationService, MatchedCluster, Opinion,
};
use docket_pipeline::domain::ClusterId;
use docket_pipeline::error::DocketError;
use docket_pipeline::text::TextExtractor;

/// Each whitespace-separated number in a chunk is a cited cluster id. The
/// case name records which document cited it, so first-seen metadata is
/// observable.
#[derive(Default)]
struct FakeCourtListener {
    fail_lookups: bool,
    lookups: Mutex<usize>,
    cluster_fetches: Mutex<Vec<ClusterId>>,
}

impl CitationService for FakeCourtListener {
    fn lookup(&self, text: &str) -> Result<Vec<CitationMatch>, DocketError> {
        *self.lookups.lock().unwrap() += 1;
        if self.fail_lookups {
            return Err(DocketError::Status {
                service: "courtlistener",
                status: 500,
                message: "down".to_string(),
            });
        }
        let (source, ids) = text.split_once(':').unwrap();
        Ok(ids
            .split_whitespace()
            .map(|id| CitationMatch {
                status: 200,
                citation: Some(format!("{id} U.S. 1")),
                normalized_citations: Vec::new(),
                clusters: vec![MatchedCluster {
                    id: id.parse().ok(),
                    case_name: Some(format!("Case {id} via {source}")),
                    date_filed: Some("1990-01-01".to_string()),
                    court: Some(Value::String("scotus".to_string())),
                }],
            })
            .collect())
    }

    fn sub_opinion_urls(&self, cluster: ClusterId) -> Result<Vec<String>, DocketError> {
        self.cluster_fetches.lock().unwrap().push(cluster);
        Ok(vec![
            format!("https://cl.test/opinions/{cluster}/lead/"),
            format!("https://cl.test/opinions/{cluster}/dissent/"),
        ])
    }

    fn opinion(&self, url: &str) -> Result<Opinion, DocketError> {
        let kind = if url.ends_with("dissent/") {
            "040dissent"
        } else {
            "020lead"
        };
        Ok(Opinion {
            kind: kind.to_string(),
            author: "Justice Example".to_string(),
            text: format!("Opinion text from {url}"),
        })
    }
}

struct FileExtractor;

impl TextExtractor for FileExtractor {
    fn extract(&self, path: &Path, _max_pages: Option<u32>) -> Result<String, DocketError> {
        std::fs::read_to_string(path).map_err(|err| DocketError::TextExtraction(err.to_string()))
    }
}

struct Fixture {
    _temp: tempfile::TempDir,
    root: Utf8PathBuf,
    documents: Vec<Utf8PathBuf>,
}

fn fixture(documents: &[(&str, &str)]) -> Fixture {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    std::fs::create_dir_all(root.join("case/briefs")).unwrap();
    let documents = documents
        .iter()
        .map(|(name, text)| {
            let path = root.join("case/briefs").join(name);
            std::fs::write(&path, text).unwrap();
            path
        })
        .collect();
    Fixture {
        _temp: temp,
        root,
        documents,
    }
}

fn read_index(path: &Utf8PathBuf) -> serde_json::Map<String, Value> {
    let content = std::fs::read_to_string(path).unwrap();
    match serde_json::from_str(&content).unwrap() {
        Value::Object(map) => map,
        other => panic!("index is not an object: {other}"),
    }
}

#[test]
fn clusters_cited_twice_are_recorded_once_with_first_metadata() {
    let fixture = fixture(&[("a_brief.pdf", "a: 11 22"), ("b_brief.pdf", "b: 22 33 11")]);
    let service = FakeCourtListener::default();
    let resolver = CitationResolver::new(&service, &FileExtractor, fixture.root.join("opinions"));
    let index_path = fixture.root.join("case/_citation_index.json");

    let report = resolver.resolve(&fixture.documents, &index_path).unwrap();

    assert_eq!(report.documents, 2);
    assert_eq!(report.chunks, 2);
    assert_eq!(report.clusters, 3);
    assert_eq!(report.downloaded, 3);
    let index = read_index(&index_path);
    assert_eq!(index.keys().cloned().collect::<Vec<_>>(), vec!["11", "22", "33"]);
    assert_eq!(index["22"]["case_name"], "Case 22 via a");
    assert_eq!(index["33"]["case_name"], "Case 33 via b");
    assert_eq!(index["11"]["citation"], "11 U.S. 1");
    assert_eq!(index["11"]["court"], "scotus");
    assert_eq!(service.cluster_fetches.lock().unwrap().len(), 3);
}

#[test]
fn opinion_files_carry_header_and_sections() {
    let fixture = fixture(&[("a_brief.pdf", "a: 7")]);
    let service = FakeCourtListener::default();
    let resolver = CitationResolver::new(&service, &FileExtractor, fixture.root.join("opinions"));

    resolver
        .resolve(&fixture.documents, &fixture.root.join("case/_citation_index.json"))
        .unwrap();

    let opinion = std::fs::read_to_string(fixture.root.join("opinions/Case_7_via_a.txt")).unwrap();
    assert!(opinion.starts_with("Case: Case 7 via a\nCitation: 7 U.S. 1\nCourt: scotus\n"));
    assert!(opinion.contains("--- Lead Opinion ---\nAuthor: Justice Example"));
    assert!(opinion.contains("--- Dissent ---"));
}

#[test]
fn existing_opinions_are_not_fetched_again() {
    let fixture = fixture(&[("a_brief.pdf", "a: 1 2")]);
    let opinions = fixture.root.join("opinions");
    std::fs::create_dir_all(&opinions).unwrap();
    std::fs::write(opinions.join("Case_1_via_a.txt"), "already here").unwrap();
    let service = FakeCourtListener::default();
    let resolver = CitationResolver::new(&service, &FileExtractor, opinions.clone());

    let report = resolver
        .resolve(&fixture.documents, &fixture.root.join("case/_citation_index.json"))
        .unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(report.downloaded, 1);
    assert_eq!(*service.cluster_fetches.lock().unwrap(), vec![ClusterId(2)]);
    assert_eq!(
        std::fs::read_to_string(opinions.join("Case_1_via_a.txt")).unwrap(),
        "already here"
    );
}

#[test]
fn all_lookups_failing_leaves_no_index() {
    let fixture = fixture(&[("a_brief.pdf", "a: 1"), ("b_brief.pdf", "b: 2")]);
    let service = FakeCourtListener {
        fail_lookups: true,
        ..FakeCourtListener::default()
    };
    let resolver = CitationResolver::new(&service, &FileExtractor, fixture.root.join("opinions"));
    let index_path = fixture.root.join("case/_citation_index.json");

    let err = resolver.resolve(&fixture.documents, &index_path).unwrap_err();

    assert_matches!(err, DocketError::Http { service: "courtlistener", .. });
    assert!(!index_path.exists());
    assert_eq!(*service.lookups.lock().unwrap(), 2);
}

#[test]
fn unreadable_documents_are_skipped() {
    let mut fixture = fixture(&[("a_brief.pdf", "a: 5")]);
    fixture.documents.push(fixture.root.join("case/briefs/missing.pdf"));
    let service = FakeCourtListener::default();
    let resolver = CitationResolver::new(&service, &FileExtractor, fixture.root.join("opinions"));
    let index_path = fixture.root.join("case/_citation_index.json");

    let report = resolver.resolve(&fixture.documents, &index_path).unwrap();

    assert_eq!(report.documents, 2);
    assert_eq!(report.chunks, 1);
    assert_eq!(read_index(&index_path).len(), 1);
}
