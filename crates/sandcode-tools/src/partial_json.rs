//! Tolerant parsing of streamed tool-call arguments.
//!
//! Providers deliver tool arguments as a JSON text that grows one fragment
//! at a time. [`parse_partial`] turns any prefix of that text into the best
//! object it can, so previews can be rendered before the call is finished.

use crate::PartialArgs;
use serde_json::Value;

/// Upper bound on cut-back retries for a single fragment.
const MAX_ATTEMPTS: usize = 32;

/// Parse a possibly incomplete JSON object.
///
/// Never fails: empty input, non-object input and unrepairable text all yield
/// an empty map. An unfinished trailing string is kept (closed at the point it
/// was cut), while unfinished keys, literals and dangling `:` separators are
/// dropped by cutting back to the previous member.
pub fn parse_partial(fragment: &str) -> PartialArgs {
    let text = fragment.trim();
    if text.is_empty() {
        return PartialArgs::new();
    }

    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return into_object(value);
    }

    let mut candidate = text;
    for _ in 0..MAX_ATTEMPTS {
        if let Some(repaired) = repair(candidate) {
            if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
                return into_object(value);
            }
        }
        match cut_back(candidate) {
            Some(end) => candidate = &candidate[..end],
            None => break,
        }
    }

    PartialArgs::new()
}

fn into_object(value: Value) -> PartialArgs {
    match value {
        Value::Object(map) => map,
        _ => PartialArgs::new(),
    }
}

/// Close an open string, drop a dangling `,` and balance open brackets.
///
/// Returns `None` when the text ends in a way that cannot be closed in
/// place, such as a key waiting for its value.
fn repair(text: &str) -> Option<String> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    // Byte offsets of escape backslashes in the string being scanned.
    let mut escapes: Vec<usize> = Vec::new();

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
                escapes.push(i);
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                escapes.clear();
            }
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(c) {
                    return None;
                }
            }
            _ => {}
        }
    }

    let mut out = text.to_string();
    if in_string {
        out.truncate(complete_escapes_end(text, &escapes));
        out.push('"');
    } else {
        let trimmed_len = out.trim_end().len();
        out.truncate(trimmed_len);
        if out.ends_with(',') {
            out.pop();
        }
        if out.ends_with(':') {
            return None;
        }
    }

    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    Some(out)
}

/// Length of `text` without a trailing escape that cannot be closed yet.
///
/// Covers a lone `\`, a `\u` with fewer than four hex digits, and a high
/// surrogate still waiting for its low half. `escapes` holds the offsets of
/// the escape backslashes in the open string.
fn complete_escapes_end(text: &str, escapes: &[usize]) -> usize {
    let mut end = text.len();
    let mut remaining = escapes;
    while let Some((&start, rest)) = remaining.split_last() {
        let escape = &text[start..end];
        let incomplete = escape.len() == 1
            || (escape.starts_with("\\u") && escape.len() < 6)
            || (escape.len() == 6
                && escape.starts_with("\\u")
                && is_high_surrogate(&escape[2..]));
        if !incomplete {
            break;
        }
        end = start;
        remaining = rest;
    }
    end
}

fn is_high_surrogate(hex: &str) -> bool {
    u16::from_str_radix(hex, 16).is_ok_and(|unit| (0xD800..0xDC00).contains(&unit))
}

/// Byte offset to truncate to so the last member is dropped.
///
/// Cuts before the last structural `,` or just after the last `{`/`[`,
/// whichever comes later, ignoring anything inside strings.
fn cut_back(text: &str) -> Option<usize> {
    let mut in_string = false;
    let mut escaped = false;
    let mut boundaries = Vec::new();

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            ',' => boundaries.push(i),
            '{' | '[' => boundaries.push(i + 1),
            _ => {}
        }
    }

    boundaries.into_iter().rev().find(|&end| end < text.len())
}
