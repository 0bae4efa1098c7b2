//! Dynamic state for predicate evaluation and `$var` expansion
//!
//! Commands and `when` predicates see a flattened mapping of the ambient
//! workflow state overlaid with the in-flight response (`cmd`, `output`,
//! `stdout`). Tokens that resolve to nothing are left untouched so the remote
//! shell still gets a chance at its own `$VAR` expansion.

use std::collections::HashMap;

use serde_json::Value;

/// A string-keyed mutable mapping with text expansion
#[derive(Clone, Debug, Default)]
pub struct StateMap {
    values: HashMap<String, Value>,
}

impl StateMap {
    /// Create an empty state map
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value under a key
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Direct lookup by exact key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Resolve a dotted/indexed path such as `cmd[0].stdout`.
    ///
    /// Exact keys win over path navigation so flat entries like `os.user`
    /// stay addressable.
    pub fn lookup(&self, path: &str) -> Option<Value> {
        if let Some(value) = self.values.get(path) {
            return Some(value.clone());
        }
        let mut segments = path.split('.');
        let first = segments.next()?;
        let (key, index) = split_index(first);
        let mut current = self.values.get(key)?.clone();
        if let Some(i) = index {
            current = current.get(i)?.clone();
        }
        for segment in segments {
            let (key, index) = split_index(segment);
            current = current.get(key)?.clone();
            if let Some(i) = index {
                current = current.get(i)?.clone();
            }
        }
        Some(current)
    }

    /// Expand `$name` and `${path}` tokens against this state.
    ///
    /// Unresolvable tokens are preserved verbatim.
    pub fn expand_as_text(&self, text: &str) -> String {
        let mut result = String::with_capacity(text.len());
        let mut chars = text.char_indices().peekable();
        while let Some((i, ch)) = chars.next() {
            if ch != '$' {
                result.push(ch);
                continue;
            }
            match chars.peek() {
                Some(&(_, '{')) => {
                    chars.next();
                    let mut path = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        path.push(c);
                    }
                    if !closed {
                        result.push_str(&text[i..]);
                        break;
                    }
                    match self.lookup(&path) {
                        Some(value) => result.push_str(&stringify(&value)),
                        None => {
                            result.push_str("${");
                            result.push_str(&path);
                            result.push('}');
                        }
                    }
                }
                Some(&(_, c)) if c.is_ascii_alphabetic() || c == '_' => {
                    let mut path = String::new();
                    while let Some(&(_, c)) = chars.peek() {
                        if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '[' | ']') {
                            path.push(c);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    match self.lookup(&path) {
                        Some(value) => result.push_str(&stringify(&value)),
                        None => {
                            result.push('$');
                            result.push_str(&path);
                        }
                    }
                }
                _ => result.push('$'),
            }
        }
        result
    }
}

fn split_index(segment: &str) -> (&str, Option<usize>) {
    match segment.find('[') {
        Some(open) if segment.ends_with(']') => {
            let index = segment[open + 1..segment.len() - 1].parse().ok();
            (&segment[..open], index)
        }
        _ => (segment, None),
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
