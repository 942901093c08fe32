use regex::Regex;
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::LazyLock;

/// Marker the model writes in front of an inline or JSON tool call.
pub const TOOL_CALL_MARKER: &str = "[TOOL_CALL]";

/// The one tool that is valid with no parameters (it lists `.`).
const ZERO_ARG_TOOL: &str = "LIST_FILES";

/// A tool invocation recognised in model output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub tool: String,
    pub params: BTreeMap<String, String>,
    /// Byte range of the text the call was recognised from.
    pub span: Range<usize>,
}

impl ToolCall {
    fn accepted(&self) -> bool {
        !self.params.is_empty() || self.tool == ZERO_ARG_TOOL
    }

    fn same_call(&self, other: &Self) -> bool {
        self.tool == other.tool
            && self.params == other.params
            && self.span.start < other.span.end
            && other.span.start < self.span.end
    }
}

/// `[TOOL_CALL] NAME key="value" key2='value'` on one line.
static INLINE_CALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[TOOL_CALL\]\s+(\w+)\s+([^\n]*)").unwrap());

/// `[TOOL_CALL] NAME(key="value", ...)`
static PAREN_CALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[TOOL_CALL\]\s+(\w+)\s*\(([^)]+)\)").unwrap());

/// A fenced block tagged ```` ```tool:NAME ````.
static FENCED_CALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```tool:(\w+)\s*\n(.*?)\n```").unwrap());

/// `key="value"` or `key='value'`, values may contain backslash escapes.
static ATTRIBUTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(\w+)=(?:"((?:\\.|[^"\\\n])*)"|'((?:\\.|[^'\\\n])*)')"#).unwrap()
});

/// Parse `key="value"` pairs. Empty values are dropped.
pub fn parse_attributes(input: &str) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    for caps in ATTRIBUTE_RE.captures_iter(input) {
        let Some(raw) = caps.get(2).or_else(|| caps.get(3)) else {
            continue;
        };
        if raw.as_str().trim().is_empty() {
            continue;
        }
        params.insert(caps[1].to_string(), unescape_value(raw.as_str()));
    }
    params
}

fn unescape_value(raw: &str) -> String {
    raw.replace("\\n", "\n")
        .replace("\\t", "\t")
        .replace("\\\"", "\"")
        .replace("\\'", "'")
}

fn regex_calls(re: &Regex, text: &str) -> Vec<ToolCall> {
    re.captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some(ToolCall {
                tool: caps[1].to_string(),
                params: parse_attributes(&caps[2]),
                span: whole.range(),
            })
        })
        .collect()
}

/// Byte length of the balanced `{...}` object at the start of `input`.
///
/// Braces inside JSON strings are ignored.
pub(crate) fn find_json_end(input: &str) -> Option<usize> {
    if !input.starts_with('{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in input.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + ch.len_utf8());
                }
            }
            _ => {}
        }
    }

    None
}

fn json_scalar_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn json_call(object: &serde_json::Map<String, serde_json::Value>) -> Option<(String, BTreeMap<String, String>)> {
    let tool = ["command", "tool", "function"]
        .iter()
        .find_map(|key| object.get(*key).and_then(serde_json::Value::as_str))
        .filter(|name| !name.is_empty())?
        .to_string();

    let source = ["parameters", "params"]
        .iter()
        .find_map(|key| object.get(*key).and_then(serde_json::Value::as_object))
        .filter(|nested| !nested.is_empty())
        .unwrap_or(object);

    let mut params = BTreeMap::new();
    // Later aliases win.
    for key in ["file_path", "path", "directory_path"] {
        if let Some(value) = source.get(key).and_then(json_scalar_to_string) {
            params.insert("path".to_string(), value);
        }
    }
    if let Some(value) = source.get("content").and_then(json_scalar_to_string) {
        params.insert("content".to_string(), value);
    }

    Some((tool, params))
}

fn json_calls(text: &str) -> Vec<ToolCall> {
    let mut calls = Vec::new();

    for (marker_start, _) in text.match_indices(TOOL_CALL_MARKER) {
        let after_marker = marker_start + TOOL_CALL_MARKER.len();
        let rest = &text[after_marker..];
        let body = rest.trim_start_matches([' ', '\t', '\r', '\n']);
        let body_start = after_marker + (rest.len() - body.len());

        let Some(end) = find_json_end(body) else {
            continue;
        };
        let candidate = &body[..end];

        let object = match serde_json::from_str::<serde_json::Value>(candidate) {
            Ok(serde_json::Value::Object(object)) => object,
            Ok(_) => continue,
            Err(err) => {
                tracing::debug!(error = %err, "Skipping malformed JSON tool call");
                continue;
            }
        };

        if let Some((tool, params)) = json_call(&object) {
            calls.push(ToolCall {
                tool,
                params,
                span: marker_start..body_start + end,
            });
        }
    }

    calls
}

/// Find every tool call in a complete model response.
///
/// Four formats are recognised and their results concatenated in this order:
/// inline attributes, call parentheses, fenced `tool:` blocks, embedded JSON.
/// A call is kept only if it has parameters or is `LIST_FILES`. The same call
/// matched twice over overlapping text by different formats is kept once.
pub fn extract_tool_calls(text: &str) -> Vec<ToolCall> {
    let candidates = regex_calls(&INLINE_CALL_RE, text)
        .into_iter()
        .chain(regex_calls(&PAREN_CALL_RE, text))
        .chain(regex_calls(&FENCED_CALL_RE, text))
        .chain(json_calls(text))
        .filter(ToolCall::accepted);

    let mut calls: Vec<ToolCall> = Vec::new();
    for call in candidates {
        if calls.iter().any(|seen| seen.same_call(&call)) {
            tracing::debug!(tool = %call.tool, "Dropping duplicate tool call match");
            continue;
        }
        calls.push(call);
    }

    tracing::debug!(count = calls.len(), "Extracted tool calls");
    calls
}
