//! Two-stage line deduplication for append-mode streams.
//!
//! Stage 1 is an exact set-membership check over normalized lines; stage 2
//! compares survivors against the recent file tail with a sequence-matcher
//! ratio. Normalization strips SGR color codes, collapses whitespace, and
//! lowercases, so recolored or re-padded repeats still count as duplicates.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use similar::TextDiff;

static SGR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b\[[0-9;]*m").expect("sgr regex"));

pub struct LineDeduplicator {
    window_size: usize,
    similarity_threshold: f64,
    exact_cache: HashSet<String>,
    cache_max: usize,
}

impl LineDeduplicator {
    pub fn new(window_size: usize, similarity_threshold: f64) -> Self {
        Self {
            window_size,
            similarity_threshold,
            exact_cache: HashSet::new(),
            // Bound cache growth; cleared and rebuilt on overflow.
            cache_max: window_size * 2,
        }
    }

    /// Lines from `new_lines` that should be appended to a file already
    /// ending in `existing_lines`.
    pub fn compute_diff(&mut self, existing_lines: &[String], new_lines: &[String]) -> Vec<String> {
        if new_lines.is_empty() {
            return Vec::new();
        }

        self.update_cache(existing_lines);

        // Stage 1: exact normalized matches.
        let novel: Vec<&String> = new_lines
            .iter()
            .filter(|line| {
                let normalized = normalize_line(line);
                !normalized.is_empty() && !self.exact_cache.contains(&normalized)
            })
            .collect();

        if existing_lines.is_empty() || novel.is_empty() {
            return novel.into_iter().cloned().collect();
        }

        // Stage 2: fuzzy matches against the recent window.
        let window_start = existing_lines.len().saturating_sub(self.window_size);
        let recent = &existing_lines[window_start..];
        novel
            .into_iter()
            .filter(|line| !recent.iter().any(|existing| self.is_similar(line, existing)))
            .cloned()
            .collect()
    }

    /// True when two lines normalize to something similar enough.
    pub fn is_similar(&self, a: &str, b: &str) -> bool {
        let norm_a = normalize_line(a);
        let norm_b = normalize_line(b);

        if norm_a.is_empty() || norm_b.is_empty() {
            return norm_a == norm_b;
        }

        // Short-circuit: lengths differing by more than 2x never match.
        let (short, long) = if norm_a.len() < norm_b.len() {
            (norm_a.len(), norm_b.len())
        } else {
            (norm_b.len(), norm_a.len())
        };
        if (short as f64) / (long as f64) < 0.5 {
            return false;
        }

        let ratio = TextDiff::from_chars(norm_a.as_str(), norm_b.as_str()).ratio() as f64;
        ratio >= self.similarity_threshold
    }

    fn update_cache(&mut self, existing_lines: &[String]) {
        if self.exact_cache.len() > self.cache_max {
            self.exact_cache.clear();
        }

        let start = existing_lines.len().saturating_sub(self.window_size);
        for line in &existing_lines[start..] {
            let normalized = normalize_line(line);
            if !normalized.is_empty() {
                self.exact_cache.insert(normalized);
            }
        }
    }

    pub fn reset_cache(&mut self) {
        self.exact_cache.clear();
    }
}

/// Normalize a line for comparison: strip SGR, collapse whitespace,
/// lowercase, trim.
pub fn normalize_line(line: &str) -> String {
    let stripped = SGR.replace_all(line, "");
    stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_normalization_strips_color_and_case() {
        assert_eq!(normalize_line("\x1b[31mERROR\x1b[0m  here"), "error here");
        assert_eq!(normalize_line("   "), "");
    }

    #[test]
    fn test_exact_duplicates_are_dropped() {
        let mut dedup = LineDeduplicator::new(100, 0.85);
        let existing = lines(&["build ok", "tests passed"]);
        let new = lines(&["build ok", "deploying"]);

        assert_eq!(dedup.compute_diff(&existing, &new), lines(&["deploying"]));
    }

    #[test]
    fn test_recolored_duplicates_are_dropped() {
        let mut dedup = LineDeduplicator::new(100, 0.85);
        let existing = lines(&["tests passed"]);
        let new = lines(&["\x1b[32mTests  Passed\x1b[0m"]);

        assert!(dedup.compute_diff(&existing, &new).is_empty());
    }

    #[test]
    fn test_near_duplicates_are_fuzzy_matched() {
        let mut dedup = LineDeduplicator::new(100, 0.85);
        let existing = lines(&["downloaded 1041 of 2000 packages"]);
        let new = lines(&["downloaded 1042 of 2000 packages"]);

        assert!(dedup.compute_diff(&existing, &new).is_empty());
    }

    #[test]
    fn test_length_ratio_short_circuit() {
        let dedup = LineDeduplicator::new(100, 0.85);
        assert!(!dedup.is_similar("ab", "a much longer unrelated line"));
    }

    #[test]
    fn test_empty_normalized_lines_are_skipped() {
        let mut dedup = LineDeduplicator::new(100, 0.85);
        let new = lines(&["", "   ", "\x1b[0m"]);
        assert!(dedup.compute_diff(&[], &new).is_empty());
    }

    #[test]
    fn test_genuinely_new_lines_survive() {
        let mut dedup = LineDeduplicator::new(100, 0.85);
        let existing = lines(&["compiling silc-core"]);
        let new = lines(&["error[E0308]: mismatched types"]);

        assert_eq!(dedup.compute_diff(&existing, &new), new);
    }

    #[test]
    fn test_cache_overflow_clears_and_rebuilds() {
        let mut dedup = LineDeduplicator::new(2, 0.85);
        for i in 0..50 {
            let existing = lines(&[&format!("unique line number {i}")]);
            let _ = dedup.compute_diff(&existing, &lines(&["probe"]));
        }
        // The bounded cache never grows past its cap plus one window.
        assert!(dedup.exact_cache.len() <= dedup.cache_max + 2);
    }
}
