//! LLM Output Parsing
//!
//! JSON extraction for LLM responses. Handles markdown code fences, trailing
//! commas, and JSON embedded in explanatory prose.

use serde_json::Value;
use tracing::{debug, warn};

use crate::types::{LoomError, Result};

/// Extract and parse JSON from an LLM response.
///
/// Primary entry point for parsing LLM JSON output.
pub fn extract_json_from_response(content: &str) -> Result<Value> {
    let cleaned = preprocess(content);

    if let Ok(value) = serde_json::from_str::<Value>(&cleaned) {
        return Ok(value);
    }

    debug!("Initial JSON parse failed, attempting repair");

    let repaired = fix_trailing_commas(&cleaned);
    if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
        warn!("JSON repaired (trailing commas)");
        return Ok(value);
    }

    if let Some(extracted) = extract_json_from_mixed(&cleaned)
        && let Ok(value) = serde_json::from_str::<Value>(&extracted)
    {
        warn!("JSON extracted from mixed content");
        return Ok(value);
    }

    Err(LoomError::LlmApi(format!(
        "Failed to parse JSON from response. Content preview: {}...",
        cleaned.chars().take(200).collect::<String>()
    )))
}

fn preprocess(raw: &str) -> String {
    let mut s = raw.trim();
    s = s.trim_start_matches('\u{feff}');
    strip_code_fences(s)
}

fn strip_code_fences(s: &str) -> String {
    let mut result = s.to_string();

    if result.starts_with("```")
        && let Some(first_newline) = result.find('\n')
    {
        result = result[first_newline + 1..].to_string();
    }

    if result.ends_with("```") {
        result = result[..result.len() - 3].trim_end().to_string();
    }

    result.trim().to_string()
}

fn fix_trailing_commas(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            result.push(c);
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
            '"' => {
                in_string = true;
                result.push(c);
            }
            ',' => {
                // Drop a comma immediately preceding a closing bracket
                let mut lookahead = chars.clone();
                let next_significant = lookahead.find(|ch| !ch.is_whitespace());
                if matches!(next_significant, Some(']') | Some('}')) {
                    continue;
                }
                result.push(c);
            }
            _ => result.push(c),
        }
    }

    result
}

/// Pull the outermost balanced JSON object or array out of surrounding prose
fn extract_json_from_mixed(s: &str) -> Option<String> {
    let start = s.find(['{', '['])?;
    let open = s.as_bytes()[start] as char;
    let close = if open == '{' { '}' } else { ']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s[start..].char_indices() {
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
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(s[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }

    None
}
