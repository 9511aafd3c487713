//! Wildcard pattern matching.
//!
//! Used by consent rules to match tool names. Supports `*` as a wildcard
//! that matches any sequence of characters.

/// Match a string against a wildcard pattern.
///
/// # Examples
///
/// ```
/// use sandcode_util::wildcard::matches;
///
/// assert!(matches("*_file", "write_file"));
/// assert!(matches("execute_*", "execute_sql"));
/// assert!(matches("*", "anything"));
/// assert!(!matches("read_*", "write_file"));
/// ```
pub fn matches(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0usize, 0usize);
    // Position of the last `*` seen and the text index it was tried at.
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, t));
            p += 1;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

/// Calculate the specificity of a pattern.
///
/// Literal characters count for more than wildcards, so `execute_sql`
/// outranks `execute_*`, which outranks `*`.
pub fn specificity(pattern: &str) -> u32 {
    let literal = pattern.chars().filter(|&c| c != '*').count() as u32;
    let wildcards = pattern.chars().filter(|&c| c == '*').count() as u32;
    (literal * 100).saturating_sub(wildcards * 10)
}
