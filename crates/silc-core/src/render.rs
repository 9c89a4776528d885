//! Stateless terminal screen rendering.
//!
//! A fresh `vt100` emulator is constructed for every render and fed the
//! entire byte buffer, so cursor motion, wrapping, scroll regions and SGR
//! state are replayed exactly and no emulator state can accumulate across
//! calls. Resizes therefore rerender consistently at the new dimensions.

use once_cell::sync::Lazy;
use regex::Regex;

/// Any line carrying a run-command sentinel must never reach clients.
static MARKER_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"__SILC_(BEGIN|END)_\w+__").expect("marker regex"));

/// Shell-helper echoes that would otherwise leak into the rendered view.
const HELPER_ECHO: &str = "__silc_exec";

/// Replay `bytes` through a fresh emulator and return the visible screen.
pub fn render_screen(bytes: &[u8], rows: u16, cols: u16) -> String {
    let mut parser = vt100::Parser::new(rows.max(1), cols.max(1), 0);
    parser.process(bytes);
    let contents = parser.screen().contents();

    let mut lines: Vec<&str> = contents
        .lines()
        .filter(|line| !MARKER_LINE.is_match(line) && !line.contains(HELPER_ECHO))
        .collect();

    while lines.last().map(|l| l.trim().is_empty()).unwrap_or(false) {
        lines.pop();
    }

    lines.join("\n")
}

/// Last `n` lines of the rendered screen.
pub fn render_tail(bytes: &[u8], rows: u16, cols: u16, n: usize) -> String {
    let screen = render_screen(bytes, rows, cols);
    let lines: Vec<&str> = screen.lines().collect();
    let skip = lines.len().saturating_sub(n);
    lines[skip..].join("\n")
}

/// True when the line carries a run-command sentinel.
pub fn is_marker_line(line: &str) -> bool {
    MARKER_LINE.is_match(line)
}
