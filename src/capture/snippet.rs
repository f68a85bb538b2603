//! Source lines around a failing line.

use std::fs;

/// Lines shown on each side of the failing line.
pub const CONTEXT_LINES: usize = 5;

/// Larger files are not read.
const MAX_SOURCE_BYTES: u64 = 1024 * 1024;

/// Lines around `line` of `file`, failing line marked `>>>`.
///
/// Empty when the file is missing, unreadable or too large. Paths are as the
/// compiler recorded them, so relative ones resolve against the working
/// directory.
pub(crate) fn source_snippet(file: &str, line: u32) -> Vec<String> {
    let readable = fs::metadata(file).is_ok_and(|m| m.is_file() && m.len() <= MAX_SOURCE_BYTES);
    if !readable {
        return Vec::new();
    }
    match fs::read_to_string(file) {
        Ok(contents) => render(&contents, line as usize),
        Err(_) => Vec::new(),
    }
}

fn render(contents: &str, line: usize) -> Vec<String> {
    if line == 0 {
        return Vec::new();
    }
    let lines: Vec<&str> = contents.lines().collect();
    let start = line.saturating_sub(CONTEXT_LINES).max(1);

    (start..=line + CONTEXT_LINES)
        .filter_map(|n| match lines.get(n - 1) {
            Some(text) => {
                let marker = if n == line { ">>>" } else { "   " };
                Some(format!("{} {:4} | {}", marker, n, text.trim_end()))
            }
            None if n == line => Some(format!(">>> {:4} | <source not available>", n)),
            None => None,
        })
        .collect()
}
