//! Best-effort parsing of incomplete JSON while a tool input streams in.

use serde_json::Value;

use crate::types::ToolUse;

/// Cut points tried after the direct completion fails, newest first.
const MAX_CUT_ATTEMPTS: usize = 4;

/// Parse the longest usable prefix of an incomplete JSON document.
///
/// Open strings are terminated and open containers closed. When that is not
/// enough (a dangling key, a half-written literal), the text is cut back to
/// the last complete member and closed from there.
pub fn parse_partial(text: &str) -> Option<Value> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str(text) {
        return Some(value);
    }

    let scan = scan(text);

    let mut completed = text.to_string();
    if scan.in_string {
        if scan.escape_pending {
            completed.pop();
        }
        completed.push('"');
    }
    completed.push_str(&closers(&scan.stack));
    if let Ok(value) = serde_json::from_str(&completed) {
        return Some(value);
    }

    scan.cuts
        .iter()
        .rev()
        .take(MAX_CUT_ATTEMPTS)
        .find_map(|(end, stack)| {
            let candidate = format!("{}{}", &text[..*end], closers(stack));
            serde_json::from_str(&candidate).ok()
        })
}

/// Accumulates one tool invocation's streamed input.
#[derive(Debug, Clone, Default)]
pub struct ToolInputBuffer {
    pub id: String,
    pub name: String,
    input: String,
    /// Input carried by the block-start event, used when no fragments arrive.
    initial: Option<Value>,
}

impl ToolInputBuffer {
    pub fn new(id: impl Into<String>, name: impl Into<String>, initial: Option<Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input: String::new(),
            initial,
        }
    }

    /// Append a fragment and return the best-effort snapshot so far.
    pub fn push(&mut self, fragment: &str) -> Option<Value> {
        self.input.push_str(fragment);
        parse_partial(&self.input)
    }

    /// Materialize the invocation. Unparseable input is kept as a string.
    pub fn finish(self) -> ToolUse {
        let input = if self.input.trim().is_empty() {
            self.initial
                .unwrap_or_else(|| Value::Object(Default::default()))
        } else {
            serde_json::from_str(&self.input).unwrap_or(Value::String(self.input))
        };
        ToolUse {
            id: self.id,
            name: self.name,
            input,
        }
    }
}

struct Scan {
    stack: Vec<char>,
    in_string: bool,
    escape_pending: bool,
    /// Byte offsets where the text can be cut, with the open containers at
    /// that point.
    cuts: Vec<(usize, Vec<char>)>,
}

fn scan(text: &str) -> Scan {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escape_pending = false;
    let mut cuts = Vec::new();

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escape_pending => escape_pending = false,
                '\\' => escape_pending = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => {
                stack.push(c);
                cuts.push((i + 1, stack.clone()));
            }
            '}' | ']' => {
                stack.pop();
            }
            ',' => cuts.push((i, stack.clone())),
            _ => {}
        }
    }

    Scan {
        stack,
        in_string,
        escape_pending,
        cuts,
    }
}

fn closers(stack: &[char]) -> String {
    stack
        .iter()
        .rev()
        .map(|open| if *open == '{' { '}' } else { ']' })
        .collect()
}
