//! Text helpers for model output: code fences, indentation, embedded JSON.

use serde_json::Value;

const TAB_WIDTH: usize = 4;

/// Remove a surrounding Markdown code fence (```python ... ```), if any.
pub fn strip_code_fences(text: &str) -> &str {
    let t = text.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return text;
    };
    let body = match rest.find('\n') {
        Some(nl) => &rest[nl + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim_end()
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start_matches(' ').len()
}

fn common_indent<'a>(lines: impl Iterator<Item = &'a String>) -> usize {
    lines
        .filter(|l| !l.trim().is_empty())
        .map(|l| indent_of(l))
        .min()
        .unwrap_or(0)
}

/// Normalize indentation of a code block: tabs become spaces, the indent
/// shared by every non-blank line is removed, and a flush first line
/// followed by a uniformly indented body is flattened.
pub fn reformat_indentation(code: &str) -> String {
    let mut lines: Vec<String> = code
        .lines()
        .map(|l| l.replace('\t', &" ".repeat(TAB_WIDTH)).trim_end().to_string())
        .collect();

    let shared = common_indent(lines.iter());
    for line in lines.iter_mut() {
        if line.len() >= shared {
            line.replace_range(..shared, "");
        }
    }

    let first = lines.iter().position(|l| !l.trim().is_empty());
    if let Some(first) = first {
        let opens_block = code_part(&lines[first]).trim_end().ends_with(':');
        let rest = common_indent(lines[first + 1..].iter());
        if !opens_block && rest > 0 {
            for line in lines[first + 1..].iter_mut() {
                if line.len() >= rest {
                    line.replace_range(..rest, "");
                }
            }
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// The line up to a trailing `#` comment; a `#` inside a string literal
/// does not count.
fn code_part(line: &str) -> &str {
    let mut quote = None;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match quote {
            Some(_) if escaped => escaped = false,
            Some(_) if c == '\\' => escaped = true,
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '#' => return &line[..i],
            None if c == '\'' || c == '"' => quote = Some(c),
            None => {}
        }
    }
    line
}

/// Parse a reply that should be a JSON object, tolerating code fences and
/// prose around the object.
pub fn parse_json_object(text: &str) -> Option<Value> {
    let body = strip_code_fences(text);
    if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(body) {
        return Some(v);
    }
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&body[start..=end]) {
        Ok(v @ Value::Object(_)) => Some(v),
        _ => None,
    }
}
