//! Bibliography verification and renumbering.
//!
//! Entries that cannot be matched to a trusted reference, by DOI or by
//! normalized title, are removed. Survivors are renumbered `1..k` in their
//! original order and every in-text marker is rewritten to match; markers
//! that pointed only at removed entries disappear.

use super::reference::{Reference, normalize_doi, normalize_title};
use crate::decision::REFERENCES_HEADING;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;
use tracing::{debug, info};

static ENTRY_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)(?:\[(\d+)\]|(\d+)\.)\s+(.*)$").unwrap());

static MARKDOWN_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]{0,3}#{1,6}[ \t]").unwrap());

static CITATION_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(\d+(?:\s*[-–]\s*\d+)?(?:\s*,\s*\d+(?:\s*[-–]\s*\d+)?)*)\]").unwrap()
});

static DOI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\b10\.\d{4,9}/[^\s"'<>\]\)]+"#).unwrap());

static QUOTED_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["“]([^"”]{3,})["”]"#).unwrap());

static YEAR_PAREN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\((?:\d{4}[a-z]?|n\.d\.)\)\.?").unwrap());

/// Largest citation range (`[3-7]`) that is expanded into individual ids.
const MAX_RANGE_SPAN: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MarkerStyle {
    Bracket,
    Dotted,
}

#[derive(Debug)]
struct Entry {
    id: u32,
    style: MarkerStyle,
    indent: String,
    first_line_rest: String,
    /// Continuation and trailing blank lines, verbatim.
    following: Vec<String>,
}

impl Entry {
    fn text(&self) -> String {
        let mut text = self.first_line_rest.clone();
        for line in &self.following {
            let line = line.trim();
            if !line.is_empty() {
                text.push(' ');
                text.push_str(line);
            }
        }
        text
    }

    fn render(&self, id: u32) -> Vec<String> {
        let marker = match self.style {
            MarkerStyle::Bracket => format!("[{id}]"),
            MarkerStyle::Dotted => format!("{id}."),
        };
        let mut lines = vec![format!("{}{} {}", self.indent, marker, self.first_line_rest)];
        lines.extend(self.following.iter().cloned());
        lines
    }
}

/// Located bibliography: byte range of its body (after the heading line).
struct Bibliography {
    start: usize,
    end: usize,
    preamble: Vec<String>,
    entries: Vec<Entry>,
}

fn locate_bibliography(document: &str) -> Option<Bibliography> {
    let heading = REFERENCES_HEADING.find_iter(document).last()?;
    let start = match document[heading.end()..].find('\n') {
        Some(nl) => heading.end() + nl + 1,
        None => document.len(),
    };
    let end = MARKDOWN_HEADING
        .find(&document[start..])
        .map(|m| start + m.start())
        .unwrap_or(document.len());

    let mut preamble = Vec::new();
    let mut entries: Vec<Entry> = Vec::new();
    for line in document[start..end].lines() {
        if let Some(caps) = ENTRY_START.captures(line) {
            let id = caps
                .get(2)
                .or_else(|| caps.get(3))
                .and_then(|m| m.as_str().parse().ok());
            if let Some(id) = id {
                entries.push(Entry {
                    id,
                    style: if caps.get(2).is_some() {
                        MarkerStyle::Bracket
                    } else {
                        MarkerStyle::Dotted
                    },
                    indent: caps[1].to_string(),
                    first_line_rest: caps[4].to_string(),
                    following: Vec::new(),
                });
                continue;
            }
        }
        match entries.last_mut() {
            Some(entry) => entry.following.push(line.to_string()),
            None => preamble.push(line.to_string()),
        }
    }

    (!entries.is_empty()).then_some(Bibliography {
        start,
        end,
        preamble,
        entries,
    })
}

/// Normalized DOIs and titles of the trusted references.
#[derive(Debug, Default)]
struct TrustedIndex {
    dois: HashSet<String>,
    titles: HashSet<String>,
}

impl TrustedIndex {
    fn new(references: &[Reference]) -> Self {
        let mut index = Self::default();
        for reference in references {
            if let Some(doi) = &reference.doi {
                index.dois.insert(normalize_doi(doi));
            }
            let title = normalize_title(&reference.title);
            if !title.is_empty() {
                index.titles.insert(title);
            }
        }
        index
    }

    fn is_empty(&self) -> bool {
        self.dois.is_empty() && self.titles.is_empty()
    }

    fn verifies(&self, entry_text: &str) -> bool {
        if let Some(doi) = DOI.find(entry_text)
            && self.dois.contains(&normalize_doi(doi.as_str()))
        {
            return true;
        }
        let candidates = match QUOTED_TITLE.captures(entry_text) {
            Some(caps) => vec![caps[1].to_string()],
            None => title_candidates(entry_text),
        };
        candidates
            .iter()
            .map(|c| normalize_title(c))
            .any(|t| !t.is_empty() && self.titles.contains(&t))
    }
}

/// Likely title positions in an unquoted entry: the sentence after a
/// parenthesized year, else the second and first sentences.
fn title_candidates(entry_text: &str) -> Vec<String> {
    let clean = entry_text.replace(['*', '_'], "");
    if let Some(year) = YEAR_PAREN.find(&clean) {
        let after = clean[year.end()..].trim_start();
        let title = after.split(". ").next().unwrap_or(after);
        return vec![title.trim_end_matches('.').to_string()];
    }
    let sentences: Vec<&str> = clean.split(". ").collect();
    let mut candidates = Vec::new();
    if let Some(second) = sentences.get(1) {
        candidates.push(second.trim_end_matches('.').to_string());
    }
    if let Some(first) = sentences.first() {
        candidates.push(first.trim_end_matches('.').to_string());
    }
    candidates
}

fn parse_marker_ids(inner: &str) -> Vec<u32> {
    let mut ids = Vec::new();
    for part in inner.split(',') {
        let part = part.trim();
        let bounds: Vec<&str> = part.split(['-', '–']).map(str::trim).collect();
        match bounds.as_slice() {
            [single] => ids.extend(single.parse::<u32>().ok()),
            [from, to] => {
                if let (Ok(from), Ok(to)) = (from.parse::<u32>(), to.parse::<u32>()) {
                    if from <= to && to - from <= MAX_RANGE_SPAN {
                        ids.extend(from..=to);
                    } else {
                        ids.extend([from, to]);
                    }
                }
            }
            _ => {}
        }
    }
    ids
}

/// Rewrite one marker; `None` means delete it.
fn rewrite_marker(
    inner: &str,
    renumbered: &BTreeMap<u32, u32>,
    removed: &HashSet<u32>,
) -> Option<String> {
    let mut ids: Vec<u32> = Vec::new();
    for id in parse_marker_ids(inner) {
        let mapped = match renumbered.get(&id) {
            Some(new_id) => *new_id,
            None if removed.contains(&id) => continue,
            None => id,
        };
        if !ids.contains(&mapped) {
            ids.push(mapped);
        }
    }
    if ids.is_empty() {
        return None;
    }
    Some(format!(
        "[{}]",
        ids.iter().map(u32::to_string).collect::<Vec<_>>().join(", ")
    ))
}

/// Tidy the gap a deleted marker leaves behind. `out` holds the line up to
/// the marker and `line[cursor..]` the rest; returns the new cursor.
///
/// Only the marker's immediate surroundings change: a parenthesis pair that
/// held nothing but the marker, and the space before it when the next
/// character is whitespace or punctuation.
fn close_gap(out: &mut String, line: &str, mut cursor: usize) -> usize {
    let after_spaces = line[cursor..].trim_start_matches([' ', '\t']);
    let before = out.trim_end_matches([' ', '\t']);
    if before.ends_with('(') && after_spaces.starts_with(')') {
        let kept = before.len() - 1;
        out.truncate(kept);
        cursor = line.len() - after_spaces.len() + 1;
    }

    let rest = &line[cursor..];
    if out.trim().is_empty() {
        return line.len() - rest.trim_start_matches([' ', '\t']).len();
    }
    let joins_punctuation = rest
        .chars()
        .next()
        .is_none_or(|c| c.is_whitespace() || ".,;:!?)".contains(c));
    if joins_punctuation {
        let kept = out.trim_end_matches([' ', '\t']).len();
        out.truncate(kept);
    }
    cursor
}

fn rewrite_line(
    line: &str,
    renumbered: &BTreeMap<u32, u32>,
    removed: &HashSet<u32>,
) -> String {
    let mut out = String::with_capacity(line.len());
    let mut cursor = 0;
    for caps in CITATION_MARKER.captures_iter(line) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        out.push_str(&line[cursor..whole.start()]);
        cursor = whole.end();
        match rewrite_marker(&caps[1], renumbered, removed) {
            Some(marker) => out.push_str(&marker),
            None => cursor = close_gap(&mut out, line, cursor),
        }
    }
    out.push_str(&line[cursor..]);
    out
}

fn rewrite_body(
    body: &str,
    renumbered: &BTreeMap<u32, u32>,
    removed: &HashSet<u32>,
) -> String {
    body.split('\n')
        .map(|line| {
            if CITATION_MARKER.is_match(line) {
                rewrite_line(line, renumbered, removed)
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// What the filter did to a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitationFilterReport {
    pub document: String,
    /// Original ids of removed entries.
    pub removed: Vec<u32>,
    /// Original id to new id for every surviving entry.
    pub renumbered: BTreeMap<u32, u32>,
}

impl CitationFilterReport {
    fn unchanged(document: &str) -> Self {
        Self {
            document: document.to_string(),
            removed: Vec::new(),
            renumbered: BTreeMap::new(),
        }
    }

    pub fn changed(&self) -> bool {
        !self.removed.is_empty()
    }
}

/// Removes unverifiable bibliography entries and renumbers the rest.
#[derive(Debug)]
pub struct CitationIntegrityFilter {
    trusted: TrustedIndex,
}

impl CitationIntegrityFilter {
    pub fn new(trusted: &[Reference]) -> Self {
        Self {
            trusted: TrustedIndex::new(trusted),
        }
    }

    /// Filter `document` against `trusted`, returning the new document.
    pub fn filter(document: &str, trusted: &[Reference]) -> String {
        Self::new(trusted).apply(document).document
    }

    pub fn apply(&self, document: &str) -> CitationFilterReport {
        if self.trusted.is_empty() {
            return CitationFilterReport::unchanged(document);
        }
        let Some(bibliography) = locate_bibliography(document) else {
            debug!("No bibliography section found, skipping citation filter");
            return CitationFilterReport::unchanged(document);
        };

        let verified: Vec<bool> = bibliography
            .entries
            .iter()
            .map(|entry| self.trusted.verifies(&entry.text()))
            .collect();
        if verified.iter().all(|v| *v) {
            return CitationFilterReport::unchanged(document);
        }

        let mut renumbered = BTreeMap::new();
        let mut removed = Vec::new();
        let mut section_lines = bibliography.preamble.clone();
        let mut next_id = 1;
        for (entry, ok) in bibliography.entries.iter().zip(&verified) {
            if *ok {
                renumbered.insert(entry.id, next_id);
                section_lines.extend(entry.render(next_id));
                next_id += 1;
            } else {
                removed.push(entry.id);
            }
        }
        // An id kept by one entry is never treated as removed.
        let removed_set: HashSet<u32> = removed
            .iter()
            .copied()
            .filter(|id| !renumbered.contains_key(id))
            .collect();

        let before = rewrite_body(&document[..bibliography.start], &renumbered, &removed_set);
        let after = rewrite_body(&document[bibliography.end..], &renumbered, &removed_set);

        let mut section = section_lines.join("\n");
        if !section.is_empty() && bibliography.end > bibliography.start {
            section.push('\n');
        }

        info!(
            kept = renumbered.len(),
            removed = removed.len(),
            "Removed unverifiable bibliography entries"
        );

        CitationFilterReport {
            document: format!("{before}{section}{after}"),
            removed,
            renumbered,
        }
    }
}
