//! Release tag addressing.
//!
//! Tags for one artifact class look like `{prefix}-{n}`. Two numbering
//! schemes coexist in older histories:
//!
//! | Kind | Trailing number | Example |
//! |------|-----------------|---------|
//! | [`TagKind::Sequential`] | `0 ..= sequential_max` | `index-7` |
//! | [`TagKind::LegacyTimestamp`] | `> sequential_max` | `index-1700000000` |
//! | [`TagKind::Unrelated`] | not numeric, or another prefix | `index-latest` |
//!
//! New tags are always sequential. "Latest" prefers the highest sequential
//! tag and only falls back to the highest legacy timestamp tag when no
//! sequential tag exists.

use crate::models::Release;

pub const DEFAULT_SEQUENTIAL_MAX: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Sequential(u64),
    LegacyTimestamp(u64),
    Unrelated,
}

/// Tag scheme for one class prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagScheme {
    pub prefix: String,
    pub sequential_max: u64,
}

impl TagScheme {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            sequential_max: DEFAULT_SEQUENTIAL_MAX,
        }
    }

    pub fn with_sequential_max(mut self, max: u64) -> Self {
        self.sequential_max = max;
        self
    }

    pub fn classify(&self, tag: &str) -> TagKind {
        let Some(rest) = tag
            .strip_prefix(self.prefix.as_str())
            .and_then(|r| r.strip_prefix('-'))
        else {
            return TagKind::Unrelated;
        };
        if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
            return TagKind::Unrelated;
        }
        match rest.parse::<u64>() {
            Err(_) => TagKind::Unrelated,
            Ok(n) if n <= self.sequential_max => TagKind::Sequential(n),
            Ok(n) => TagKind::LegacyTimestamp(n),
        }
    }

    /// `max(sequential) + 1`, or `1` when no sequential tag exists.
    pub fn next_number<'a, I>(&self, tags: I) -> u64
    where
        I: IntoIterator<Item = &'a str>,
    {
        tags.into_iter()
            .filter_map(|t| match self.classify(t) {
                TagKind::Sequential(n) => Some(n),
                _ => None,
            })
            .max()
            .map(|n| n + 1)
            .unwrap_or(1)
    }

    /// Highest sequential release, else highest legacy timestamp release.
    pub fn latest<'r>(&self, releases: &'r [Release]) -> Option<&'r Release> {
        let mut best_seq: Option<(u64, &Release)> = None;
        let mut best_legacy: Option<(u64, &Release)> = None;
        for rel in releases.iter().filter(|r| !r.draft) {
            match self.classify(&rel.tag_name) {
                TagKind::Sequential(n) => {
                    if best_seq.map_or(true, |(m, _)| n > m) {
                        best_seq = Some((n, rel));
                    }
                }
                TagKind::LegacyTimestamp(n) => {
                    if best_legacy.map_or(true, |(m, _)| n > m) {
                        best_legacy = Some((n, rel));
                    }
                }
                TagKind::Unrelated => {}
            }
        }
        best_seq.or(best_legacy).map(|(_, r)| r)
    }

    pub fn tag_for(&self, n: u64) -> String {
        format!("{}-{}", self.prefix, n)
    }

    /// Fixed alias tag (`index-latest`) used by the latest-alias scheme.
    pub fn latest_alias(&self) -> String {
        format!("{}-latest", self.prefix)
    }
}
