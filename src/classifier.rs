use std::collections::HashSet;
use std::sync::LazyLock;

use regex::{Regex, RegexSet};

use crate::domain::FilingCategory;

// Procedural filings. Checked before anything else so that wrappers such as
// "motion for leave to file brief as amici curiae" never count as content.
static SKIP_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    pattern_set(&[
        r"^motion",
        r"^waiver",
        r"^order\b",
        r"^letter\b",
        r"^notice\b",
        r"^consent",
        r"extension\s+of\s+time",
        r"^application",
        r"^response\s+to\s+(request|application|motion)",
        r"proof\s+of\s+service",
        r"certificate\s+of\s+(compliance|word\s+count)",
        r"^joint\s+appendix",
        r"^supplemental\s+brief",
        r"blanket\s+consent",
        r"^record\b",
        r"^lodging\b",
    ])
});

static PARTY_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    pattern_set(&[
        r"brief\s+(for|of)\s+(the\s+)?petitioner",
        r"brief\s+(for|of)\s+(the\s+)?respondent",
        r"brief\s+(for|of)\s+the\s+united\s+states",
        r"brief\s+on\s+the\s+merits",
        r"reply\s+brief",
        r"reply\s+of\s+(the\s+)?petitioner",
        r"brief\s+in\s+opposition",
        r"opening\s+brief",
        r"response\s+brief",
        r"petitioners?\s*['\u{2019}]\s*brief",
        r"respondents?\s*['\u{2019}]\s*brief",
        r"merits\s+brief",
    ])
});

static AMICUS_PATTERNS: LazyLock<RegexSet> =
    LazyLock::new(|| pattern_set(&[r"amici?\s+curiae", r"amicus"]));

static REPLY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"reply\s+brief|reply\s+of").unwrap());
static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

fn pattern_set(patterns: &[&str]) -> RegexSet {
    RegexSet::new(patterns).unwrap()
}

/// Maps a docket entry description to its category. Skip patterns win over
/// party-brief patterns, which win over amicus patterns; anything unmatched
/// is skipped.
pub fn classify(description: &str) -> FilingCategory {
    let text = description.trim().to_lowercase();
    if SKIP_PATTERNS.is_match(&text) {
        FilingCategory::Skip
    } else if PARTY_PATTERNS.is_match(&text) {
        FilingCategory::PartyBrief
    } else if AMICUS_PATTERNS.is_match(&text) {
        FilingCategory::Amicus
    } else {
        FilingCategory::Skip
    }
}

/// Conventional file name for a party brief.
pub fn brief_filename(description: &str) -> String {
    let text = description.to_lowercase();
    if REPLY.is_match(&text) {
        return "reply_brief.pdf".to_string();
    }
    if text.contains("brief in opposition") {
        return "brief_in_opposition.pdf".to_string();
    }
    if text.contains("petitioner") || text.contains("appellant") {
        return "petitioner_brief.pdf".to_string();
    }
    if text.contains("respondent") || text.contains("appellee") {
        return "respondent_brief.pdf".to_string();
    }
    if text.contains("united states") {
        return "us_brief.pdf".to_string();
    }
    let slug = NON_WORD.replace_all(&text, "_");
    let slug = truncate_chars(&slug, 60);
    format!("{}.pdf", slug.trim_matches('_'))
}

/// Returns `name` if unused, else `stem_2.ext`, `stem_3.ext`, ... Records the
/// result in `seen`.
pub fn unique_name(seen: &mut HashSet<String>, name: &str) -> String {
    let candidate = if seen.contains(name) {
        let (stem, ext) = match name.rsplit_once('.') {
            Some((stem, ext)) => (stem, format!(".{ext}")),
            None => (name, String::new()),
        };
        let mut counter = 2;
        loop {
            let next = format!("{stem}_{counter}{ext}");
            if !seen.contains(&next) {
                break next;
            }
            counter += 1;
        }
    } else {
        name.to_string()
    };
    seen.insert(candidate.clone());
    candidate
}

pub(crate) fn truncate_chars(value: &str, max: usize) -> &str {
    match value.char_indices().nth(max) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_patterns_take_precedence() {
        assert_eq!(
            classify("Motion for leave to file brief as amici curiae"),
            FilingCategory::Skip
        );
        assert_eq!(
            classify("Motion of petitioner for leave to file reply brief"),
            FilingCategory::Skip
        );
        assert_eq!(
            classify("Proof of service of brief for respondent"),
            FilingCategory::Skip
        );
    }

    #[test]
    fn party_briefs() {
        for description in [
            "Brief of petitioner Acme Corp. filed.",
            "Brief for the United States as respondent supporting petitioners",
            "Reply of petitioner Jane Roe filed.",
            "Brief of respondent in opposition filed.",
            "Petitioners' brief on the merits",
        ] {
            assert_eq!(classify(description), FilingCategory::PartyBrief, "{description}");
        }
    }

    #[test]
    fn party_pattern_beats_amicus_pattern() {
        assert_eq!(
            classify("Brief for the United States as amicus curiae supporting petitioners"),
            FilingCategory::PartyBrief
        );
    }

    #[test]
    fn amicus_and_unmatched() {
        assert_eq!(
            classify("Brief amici curiae of Law Professors filed."),
            FilingCategory::Amicus
        );
        assert_eq!(classify("  BRIEF AMICUS CURIAE OF CATO  "), FilingCategory::Amicus);
        assert_eq!(classify("DISTRIBUTED for Conference"), FilingCategory::Skip);
        assert_eq!(classify(""), FilingCategory::Skip);
    }

    #[test]
    fn brief_names() {
        assert_eq!(brief_filename("Reply of petitioner Roe"), "reply_brief.pdf");
        assert_eq!(brief_filename("Brief in opposition"), "brief_in_opposition.pdf");
        assert_eq!(brief_filename("Brief of petitioner Roe"), "petitioner_brief.pdf");
        assert_eq!(brief_filename("Brief of appellee"), "respondent_brief.pdf");
        assert_eq!(
            brief_filename("Brief for the United States"),
            "us_brief.pdf"
        );
        assert_eq!(brief_filename("Merits brief (corrected)"), "merits_brief_corrected.pdf");
    }

    #[test]
    fn unique_name_suffixes_collisions() {
        let mut seen = HashSet::new();
        assert_eq!(unique_name(&mut seen, "petitioner_brief.pdf"), "petitioner_brief.pdf");
        assert_eq!(unique_name(&mut seen, "petitioner_brief.pdf"), "petitioner_brief_2.pdf");
        assert_eq!(unique_name(&mut seen, "petitioner_brief.pdf"), "petitioner_brief_3.pdf");
        assert_eq!(unique_name(&mut seen, "reply_brief.pdf"), "reply_brief.pdf");
    }
}
