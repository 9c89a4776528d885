//! Lossy output cleaning that keeps the HTTP surface agent friendly.
//!
//! The cleaner serves the "give me the last N lines" path: escape sequences
//! are stripped, carriage-return overwrites collapse to the text a terminal
//! would actually show, progress-bar frames collapse to the final one, and
//! blank runs are capped at a single line.

use once_cell::sync::Lazy;
use regex::Regex;

static ANSI_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1B(?:[@-Z\x5C-\x5F]|\[[0-?]*[ -/]*[@-~])").expect("ansi regex"));

static OSC_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1B\][^\x07\x1B]*(?:\x07|\x1B\\)").expect("osc regex"));

static PROGRESS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{1,3}%").expect("progress regex"));

/// Clean a batch of raw lines into display text.
pub fn clean_output<I, S>(raw_lines: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut cleaned: Vec<String> = Vec::new();

    for raw in raw_lines {
        let mut line = raw.as_ref().to_string();

        // Keep only the text after the last carriage return; everything
        // before it was overwritten on screen.
        if let Some(idx) = line.rfind('\r') {
            line = line[idx + 1..].to_string();
        }

        line = ANSI_ESCAPE.replace_all(&line, "").into_owned();
        cleaned.push(line);
    }

    let collapsed = collapse_progress_frames(cleaned);

    let mut result: Vec<String> = Vec::new();
    let mut blank_run = 0usize;
    for line in collapsed {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run <= 1 {
                result.push(line);
            }
        } else {
            blank_run = 0;
            result.push(line);
        }
    }

    result.join("\n")
}

/// Collapse consecutive percent-progress frames, keeping only the last one.
pub fn collapse_progress_frames(lines: Vec<String>) -> Vec<String> {
    let mut collapsed: Vec<String> = Vec::new();
    let mut last_progress: Option<String> = None;

    for line in lines {
        if PROGRESS.is_match(&line) {
            last_progress = Some(line);
            continue;
        }

        if let Some(progress) = last_progress.take() {
            collapsed.push(progress);
        }
        collapsed.push(line);
    }

    if let Some(progress) = last_progress {
        collapsed.push(progress);
    }

    collapsed
}

/// Strip CSI and other ANSI escape sequences from a single line.
pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}

/// Strip OSC escape sequences (window titles, hyperlinks) from raw text.
pub fn strip_osc(text: &str) -> String {
    OSC_ESCAPE.replace_all(text, "").into_owned()
}

/// Normalize CRLF and lone CR line endings to LF.
pub fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_ansi_sequences() {
        let out = clean_output(["\x1b[31mred\x1b[0m text"]);
        assert_eq!(out, "red text");
    }

    #[test]
    fn test_keeps_text_after_last_carriage_return() {
        let out = clean_output(["downloading 10%\rdownloading 50%\rdone"]);
        assert_eq!(out, "done");
    }

    #[test]
    fn test_collapses_progress_frames_to_last() {
        let out = clean_output(["10% [#    ]", "50% [###  ]", "100% [#####]", "finished"]);
        assert_eq!(out, "100% [#####]\nfinished");
    }

    #[test]
    fn test_trailing_progress_frame_is_kept() {
        let out = clean_output(["building", "42%"]);
        assert_eq!(out, "building\n42%");
    }

    #[test]
    fn test_caps_blank_runs_at_one() {
        let out = clean_output(["a", "", "", "", "b"]);
        assert_eq!(out, "a\n\nb");
    }

    #[test]
    fn test_strip_osc_removes_title_sequences() {
        let text = "\x1b]0;window title\x07real output";
        assert_eq!(strip_osc(text), "real output");
    }

    #[test]
    fn test_normalize_newlines_handles_cr_and_crlf() {
        assert_eq!(normalize_newlines("a\r\nb\rc"), "a\nb\nc");
    }
}
