/// Cap for tool stdout kept on audit records.
pub const MAX_OUTPUT_LENGTH: usize = 15_000;
const MAX_ERROR_LENGTH: usize = 2_000;

/// Keep the head and tail of long tool output.
pub fn truncate_output(output: &str) -> String {
    let total = output.chars().count();
    if total <= MAX_OUTPUT_LENGTH {
        return output.to_string();
    }
    let half = MAX_OUTPUT_LENGTH / 2;
    let start: String = output.chars().take(half).collect();
    let end: String = output.chars().skip(total - half).collect();
    format!("{}\n\n... [truncated {} chars] ...\n\n{}", start, total - MAX_OUTPUT_LENGTH, end)
}

pub fn truncate_error(error: &str) -> String {
    if error.chars().count() <= MAX_ERROR_LENGTH {
        error.to_string()
    } else {
        format!("{}...", truncate_chars(error, MAX_ERROR_LENGTH))
    }
}

/// Prefix of at most `max` characters, never splitting a code point.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_output_untouched() {
        assert_eq!(truncate_output("hello"), "hello");
    }

    #[test]
    fn test_long_output_keeps_head_and_tail() {
        let s = format!("{}{}", "a".repeat(10_000), "b".repeat(10_000));
        let t = truncate_output(&s);
        assert!(t.starts_with("aaaa"));
        assert!(t.ends_with("bbbb"));
        assert!(t.contains("[truncated 5000 chars]"));
    }

    #[test]
    fn test_truncate_chars_respects_utf8() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn test_truncate_error_appends_ellipsis() {
        let t = truncate_error(&"x".repeat(3000));
        assert_eq!(t.len(), 2003);
    }
}
