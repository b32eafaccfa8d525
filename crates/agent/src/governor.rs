//! Tool call governance: a per-turn round limit and duplicate suppression.

use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt::Write;

/// The governor's verdict on a tool request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Execute it.
    Call,
    /// Same name and args were already admitted this turn; skip it.
    Duplicate,
    /// The turn has spent its tool rounds; stop.
    LimitExceeded,
}

/// Per-turn governor. Create a fresh one for every turn.
#[derive(Debug)]
pub struct ToolGovernor {
    max_iterations: u32,
    iteration_count: u32,
    seen: HashSet<String>,
}

impl ToolGovernor {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            max_iterations,
            iteration_count: 0,
            seen: HashSet::new(),
        }
    }

    /// Judge a tool request.
    ///
    /// Every request counts against the limit, duplicates included, and the
    /// limit is checked before deduplication.
    pub fn admit(&mut self, name: &str, args: &Map<String, Value>) -> Admission {
        self.iteration_count += 1;
        if self.iteration_count > self.max_iterations {
            return Admission::LimitExceeded;
        }

        if self.seen.insert(signature(name, args)) {
            Admission::Call
        } else {
            Admission::Duplicate
        }
    }

    pub fn iteration_count(&self) -> u32 {
        self.iteration_count
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }
}

/// Canonical form of `{"args": .., "name": ..}` with every object's keys
/// sorted, so argument order never affects identity.
pub fn signature(name: &str, args: &Map<String, Value>) -> String {
    let mut root = Map::new();
    root.insert("name".into(), Value::String(name.to_string()));
    root.insert("args".into(), Value::Object(args.clone()));

    let mut out = String::new();
    write_canonical(&Value::Object(root), &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // String serialization cannot fail
                let _ = write!(out, "{}", Value::String(key.clone()));
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}
