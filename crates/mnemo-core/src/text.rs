//! Text utilities: token counting, truncation, and statement normalization.
//!
//! Token counts are whitespace-word counts everywhere in mnemo. There is no
//! real tokenizer; budgets are expressed in words.

/// Ellipsis marker appended to word-truncated text.
pub const ELLIPSIS: &str = "…";

/// Count tokens as whitespace-separated words.
///
/// ```
/// use mnemo_core::text::count_tokens;
/// assert_eq!(count_tokens("  use sqlite \n for storage "), 4);
/// ```
#[inline]
pub fn count_tokens(s: &str) -> usize {
    s.split_whitespace().count()
}

/// Keep the first `max_words` words of `s`, appending [`ELLIPSIS`] as its
/// own word when anything was cut.
///
/// The result therefore measures `max_words + 1` tokens when truncated.
/// Returns `None` when `max_words` is zero and `s` has any words, since an
/// ellipsis alone carries nothing.
pub fn truncate_words(s: &str, max_words: usize) -> Option<String> {
    let words: Vec<&str> = s.split_whitespace().collect();
    if words.len() <= max_words {
        return Some(words.join(" "));
    }
    if max_words == 0 {
        return None;
    }
    let mut out = words[..max_words].join(" ");
    out.push(' ');
    out.push_str(ELLIPSIS);
    Some(out)
}

/// Truncate a string to at most `max_bytes` bytes at a char boundary.
#[inline]
pub fn truncate_str(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Truncate `s` and append `suffix` if the original exceeds `max_bytes`.
///
/// The returned string is at most `max_bytes` bytes long, suffix included.
pub fn truncate_with_suffix(s: &str, max_bytes: usize, suffix: &str) -> String {
    if s.len() <= max_bytes {
        return s.to_owned();
    }
    let body_budget = max_bytes.saturating_sub(suffix.len());
    let prefix = truncate_str(s, body_budget);
    format!("{prefix}{suffix}")
}

/// Normalize a statement for identity and dedup.
///
/// Lowercases, drops punctuation (anything that is not alphanumeric or
/// whitespace), and collapses runs of whitespace to single spaces.
///
/// ```
/// use mnemo_core::text::normalize_statement;
/// assert_eq!(normalize_statement("  Use SQLite,  for storage! "), "use sqlite for storage");
/// ```
pub fn normalize_statement(s: &str) -> String {
    let cleaned: String = s
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect::<String>()
        .to_lowercase();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Byte ranges of each line in `s`, excluding the line terminator.
///
/// `\r\n` and `\n` are both treated as terminators.
pub fn line_ranges(s: &str) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut start = 0;
    for (i, b) in s.bytes().enumerate() {
        if b == b'\n' {
            let end = if i > start && s.as_bytes()[i - 1] == b'\r' {
                i - 1
            } else {
                i
            };
            out.push((start, end));
            start = i + 1;
        }
    }
    if start < s.len() {
        out.push((start, s.len()));
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
