use std::path::Path;

use crate::error::Result;

/// Reads a netlist file and returns its normalized statement lines.
pub fn normalize_file(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)?;
    Ok(normalize(&text))
}

/// Normalizes raw netlist text into one lowercased statement per entry.
///
/// Continuation lines (`+ ...`) are folded into the preceding statement, full
/// line comments and blank lines are dropped, and trailing `*` comments are
/// removed. A `*` inside a quoted expression such as `'3*4'` is not treated as
/// a comment.
pub fn normalize(text: &str) -> Vec<String> {
    let mut logical: Vec<String> = Vec::new();

    for raw in text.lines() {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('*') {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix('+') {
            if let Some(prev) = logical.last_mut() {
                prev.push(' ');
                prev.push_str(rest.trim());
                continue;
            }
            logical.push(rest.trim().to_string());
            continue;
        }
        logical.push(trimmed.to_string());
    }

    logical
        .into_iter()
        .filter_map(|line| {
            let line = strip_comment(&line).trim().to_lowercase();
            if line.is_empty() {
                None
            } else {
                Some(line)
            }
        })
        .collect()
}

fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    for (i, c) in line.char_indices() {
        match (c, quote) {
            ('\'' | '"', None) => quote = Some(c),
            (c, Some(q)) if c == q => quote = None,
            ('*', None) => return &line[..i],
            _ => {}
        }
    }
    line
}
