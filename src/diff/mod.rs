//! Word-level accounting over `<ins>`/`<del>` diff markup.
//!
//! Nested markers of the same kind are not double counted: an `<ins>` that
//! sits inside another `<ins>` is already covered by its ancestor's text.
//! A marker of the other kind nested inside (e.g. `<del>` within `<ins>`)
//! is counted for both kinds, since it is part of the outer element's text.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffCounts {
    pub additions: u32,
    pub deletions: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffMode {
    /// Parse the fragment and count whitespace-delimited words.
    #[default]
    Words,
    /// Approximation: count opening marker tags, one per element regardless of length.
    Tags,
}

pub fn count(html: &str, mode: DiffMode) -> DiffCounts {
    match mode {
        DiffMode::Words => count_words(html),
        DiffMode::Tags => count_tags(html),
    }
}

pub fn count_words(html: &str) -> DiffCounts {
    if html.trim().is_empty() {
        return DiffCounts::default();
    }
    let doc = Html::parse_fragment(html);
    DiffCounts {
        additions: words_in(&doc, "ins"),
        deletions: words_in(&doc, "del"),
    }
}

fn words_in(doc: &Html, tag: &str) -> u32 {
    let Ok(sel) = Selector::parse(tag) else { return 0 };
    doc.select(&sel)
        .filter(|el| !has_ancestor(el, tag))
        .map(|el| {
            let text: String = el.text().collect();
            text.split_whitespace().count() as u32
        })
        .sum()
}

fn has_ancestor(el: &ElementRef<'_>, tag: &str) -> bool {
    el.ancestors()
        .filter_map(|n| n.value().as_element().map(|e| e.name().eq_ignore_ascii_case(tag)))
        .any(|same| same)
}

/// Counts marker tags, not words. Use only where the fragment cannot be parsed.
pub fn count_tags(html: &str) -> DiffCounts {
    static INS: OnceLock<Option<Regex>> = OnceLock::new();
    static DEL: OnceLock<Option<Regex>> = OnceLock::new();
    let ins = INS.get_or_init(|| Regex::new(r"(?i)<ins(?:\s[^>]*)?>").ok());
    let del = DEL.get_or_init(|| Regex::new(r"(?i)<del(?:\s[^>]*)?>").ok());
    let hits = |re: &Option<Regex>| re.as_ref().map_or(0, |r| r.find_iter(html).count() as u32);
    DiffCounts {
        additions: hits(ins),
        deletions: hits(del),
    }
}
