//! Shared utility functions for the phasegate crate.

/// Find the balanced block starting at `start` (which must be `open`).
/// Quotes and escapes are honoured so brackets inside strings do not count.
fn balanced_block(text: &str, start: usize, open: char, close: char) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[start..start + i + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Extract the last non-empty JSON array of objects in `text`.
///
/// Executor output is usually log lines followed by the result. Log lines like
/// `[INFO] starting`, and arrays printed after the result such as `[]` or
/// `[1, 2]`, are not object arrays and are passed over.
pub fn extract_object_array(text: &str) -> Option<Vec<serde_json::Value>> {
    let mut found = None;
    let mut search_from = 0;

    while let Some(offset) = text[search_from..].find('[') {
        let start = search_from + offset;
        let parsed = balanced_block(text, start, '[', ']').and_then(|block| {
            serde_json::from_str::<Vec<serde_json::Value>>(block)
                .ok()
                .map(|values| (block.len(), values))
        });
        match parsed {
            Some((len, values)) => {
                if !values.is_empty() && values.iter().all(serde_json::Value::is_object) {
                    found = Some(values);
                }
                search_from = start + len;
            }
            None => search_from = start + 1,
        }
    }

    found
}

/// Last `max_lines` non-empty lines of `text`, for error summaries.
pub fn tail_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let skip = lines.len().saturating_sub(max_lines);
    lines[skip..].join("\n")
}
