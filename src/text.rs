//! Text shaping helpers shared by degraded-response paths.

/// First `max_chars` characters of `text`, with `...` appended when cut.
pub fn summarize(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", trimmed[..cut].trim_end()),
        None => trimmed.to_string(),
    }
}

/// Keep roughly `ratio` of `text` (by characters), cutting at a word boundary.
pub fn truncate_ratio(text: &str, ratio: f64) -> String {
    let trimmed = text.trim();
    let total = trimmed.chars().count();
    let keep = ((total as f64) * ratio.clamp(0.0, 1.0)).ceil() as usize;
    if keep >= total {
        return trimmed.to_string();
    }

    let cut = trimmed
        .char_indices()
        .nth(keep)
        .map_or(trimmed.len(), |(idx, _)| idx);
    let head = &trimmed[..cut];
    let head = match head.rfind(char::is_whitespace) {
        Some(space) if space > 0 => &head[..space],
        _ => head,
    };
    format!("{}...", head.trim_end())
}

/// Drop a trailing unfinished sentence from interrupted output.
///
/// Keeps everything up to the last sentence terminator. When no sentence
/// was completed, the text is kept and marked with an ellipsis instead.
pub fn complete_sentences(partial: &str) -> String {
    let trimmed = partial.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let last_terminator = trimmed
        .char_indices()
        .filter(|(_, c)| matches!(c, '.' | '!' | '?'))
        .map(|(idx, c)| idx + c.len_utf8())
        .last();

    match last_terminator {
        Some(end) if end == trimmed.len() => trimmed.to_string(),
        Some(end) => trimmed[..end].to_string(),
        None => format!("{trimmed}..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize() {
        assert_eq!(summarize("short", 10), "short");
        assert_eq!(summarize("abcdefghij", 4), "abcd...");
        // multi-byte characters are never split
        assert_eq!(summarize("héllo wörld", 5), "héllo...");
    }

    #[test]
    fn test_truncate_ratio() {
        let text = "one two three four five six seven eight";
        assert_eq!(truncate_ratio(text, 1.0), text);
        let half = truncate_ratio(text, 0.5);
        assert!(half.ends_with("..."));
        assert!(half.len() < text.len());
        assert!(text.starts_with(half.trim_end_matches("...")));
    }

    #[test]
    fn test_complete_sentences() {
        assert_eq!(
            complete_sentences("First point. Second point. Third poi"),
            "First point. Second point."
        );
        assert_eq!(complete_sentences("All done!"), "All done!");
        assert_eq!(complete_sentences("no terminator here"), "no terminator here...");
        assert_eq!(complete_sentences("   "), "");
    }
}
