//! Cleans a model completion down to a bare boolean filter expression.

use super::AssistantError;

/// Filler the model tends to put in front of the expression, matched
/// case-insensitively and stripped repeatedly.
const FILLER_PREFIXES: &[&str] = &[
    "jq",
    "query:",
    "filter:",
    "answer:",
    "result:",
    "expression:",
    "condition:",
    "the jq query is",
    "the jq expression is",
    "the condition is",
    "here is the jq query:",
    "here is the condition:",
];

/// Reduce a raw completion to an expression that fits inside `select(...)`.
pub fn normalize_assistant_query(raw: &str) -> Result<String, AssistantError> {
    let cleaned = strip_code_fences(raw);
    let cleaned = strip_prefixes(cleaned.trim());
    let cleaned = cleaned.trim().trim_matches('`').trim();
    let cleaned = strip_leading_pipe(cleaned);
    let cleaned = extract_select_condition(cleaned);
    let mut cleaned = cleaned.trim();
    if let Some(rest) = cleaned.strip_suffix(';') {
        cleaned = rest.trim();
    }

    if cleaned.is_empty() {
        return Err(AssistantError::EmptyResult);
    }
    Ok(cleaned.to_string())
}

/// Keep only the body of a fenced block: the opening fence line (with any
/// language tag) and everything from the last closing fence are dropped.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(content) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let content = match content.find('\n') {
        Some(newline) => &content[newline + 1..],
        None => "",
    };
    let content = match content.rfind("```") {
        Some(close) => &content[..close],
        None => content,
    };
    content.trim()
}

fn strip_prefixes(text: &str) -> &str {
    let mut trimmed = text.trim();
    'outer: loop {
        for prefix in FILLER_PREFIXES {
            let matches = trimmed
                .get(..prefix.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(prefix));
            if matches {
                trimmed = trimmed[prefix.len()..].trim();
                continue 'outer;
            }
        }
        return trimmed;
    }
}

fn strip_leading_pipe(text: &str) -> &str {
    for token in [". |", ".|", "|"] {
        if let Some(rest) = text.strip_prefix(token) {
            return rest.trim();
        }
    }
    text
}

/// When the text contains `select(`, return what sits between that
/// parenthesis and its matching close. Without a balanced close the text is
/// returned trimmed.
fn extract_select_condition(text: &str) -> &str {
    let trimmed = text.trim();
    let lower = trimmed.to_ascii_lowercase();
    let Some(found) = lower.find("select") else {
        return trimmed;
    };

    let bytes = trimmed.as_bytes();
    let mut i = found + "select".len();
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    if i >= bytes.len() || bytes[i] != b'(' {
        return trimmed;
    }

    let start = i + 1;
    let mut depth = 1usize;
    for (offset, &byte) in bytes[start..].iter().enumerate() {
        match byte {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return trimmed[start..start + offset].trim();
                }
            }
            _ => {}
        }
    }
    trimmed
}
