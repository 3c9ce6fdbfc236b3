//! # Pattern Matcher
//!
//! Case-insensitive keyword scanning over raw file content.

use std::collections::BTreeMap;

use memchr::memmem;
use serde::Serialize;

/// Outcome of scanning one file against the configured pattern groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PatternScan {
    /// Group name to the keywords of that group found in the content.
    pub matches: BTreeMap<String, Vec<String>>,
    pub any_found: bool,
}

/// Scan `content` for every keyword of every group.
///
/// Matching is a literal, case-insensitive substring test against the whole
/// content. A group only appears in the result when at least one of its
/// keywords matched, and the matched keywords keep their declared order.
pub fn scan(content: &[u8], groups: &BTreeMap<String, Vec<String>>) -> PatternScan {
    if groups.is_empty() {
        return PatternScan::default();
    }

    let haystack = String::from_utf8_lossy(content).to_lowercase();
    let haystack = haystack.as_bytes();

    let mut matches = BTreeMap::new();
    for (group, keywords) in groups {
        let found: Vec<String> = keywords
            .iter()
            .filter(|keyword| contains_keyword(haystack, keyword))
            .cloned()
            .collect();
        if !found.is_empty() {
            matches.insert(group.clone(), found);
        }
    }

    let any_found = !matches.is_empty();
    PatternScan { matches, any_found }
}

fn contains_keyword(haystack: &[u8], keyword: &str) -> bool {
    let needle = keyword.to_lowercase();
    memmem::find(haystack, needle.as_bytes()).is_some()
}
