//! Text forms of rendered documents.
//!
//! Two notations are supported:
//!
//! - **JSON** via [`to_json()`] and [`to_json_pretty()`], for handing
//!   documents to other tools.
//! - **Shell notation** via [`to_shell()`] and [`to_shell_pretty()`], the
//!   form the database shell and driver diagnostics print. Simple keys are
//!   left unquoted and tokens are separated by single spaces:
//!
//! ```
//! use serde_json::json;
//! use stagecraft::output::to_shell;
//!
//! let stage = json!({ "$match": { "E": { "$bitsAllClear": 6 } } });
//! assert_eq!(to_shell(&stage), "{ $match : { E : { $bitsAllClear : 6 } } }");
//! ```
//!
//! Keys keep their insertion order in every notation.

use serde_json::{Map, Value};

pub struct ShellPrinter {
    pretty: bool,
}

impl ShellPrinter {
    pub fn new(pretty: bool) -> Self {
        ShellPrinter { pretty }
    }

    pub fn print(&self, value: &Value) -> String {
        self.print_value(value, 0)
    }

    fn print_value(&self, value: &Value, indent: usize) -> String {
        match value {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => format!("\"{}\"", self.escape_string(s)),
            Value::Array(items) => self.print_array(items, indent),
            Value::Object(map) => self.print_object(map, indent),
        }
    }

    fn print_array(&self, items: &[Value], indent: usize) -> String {
        if items.is_empty() {
            return "[]".to_string();
        }

        if self.pretty {
            let mut result = "[\n".to_string();
            let lines: Vec<String> = items
                .iter()
                .map(|v| format!("{}{}", self.indent(indent + 1), self.print_value(v, indent + 1)))
                .collect();
            result.push_str(&lines.join(",\n"));
            result.push('\n');
            result.push_str(&self.indent(indent));
            result.push(']');
            result
        } else {
            let items: Vec<String> = items.iter().map(|v| self.print_value(v, indent)).collect();
            format!("[{}]", items.join(", "))
        }
    }

    fn print_object(&self, map: &Map<String, Value>, indent: usize) -> String {
        if map.is_empty() {
            return "{ }".to_string();
        }

        if self.pretty {
            let mut result = "{\n".to_string();
            let lines: Vec<String> = map
                .iter()
                .map(|(k, v)| {
                    format!(
                        "{}{} : {}",
                        self.indent(indent + 1),
                        self.print_key(k),
                        self.print_value(v, indent + 1)
                    )
                })
                .collect();
            result.push_str(&lines.join(",\n"));
            result.push('\n');
            result.push_str(&self.indent(indent));
            result.push('}');
            result
        } else {
            let entries: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{} : {}", self.print_key(k), self.print_value(v, indent)))
                .collect();
            format!("{{ {} }}", entries.join(", "))
        }
    }

    fn print_key(&self, key: &str) -> String {
        let bare = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '.'));
        if bare {
            key.to_string()
        } else {
            format!("\"{}\"", self.escape_string(key))
        }
    }

    fn indent(&self, level: usize) -> String {
        "  ".repeat(level)
    }

    fn escape_string(&self, s: &str) -> String {
        s.chars()
            .flat_map(|c| match c {
                '"' => vec!['\\', '"'],
                '\\' => vec!['\\', '\\'],
                '\n' => vec!['\\', 'n'],
                '\r' => vec!['\\', 'r'],
                '\t' => vec!['\\', 't'],
                c if c.is_control() => format!("\\u{:04x}", c as u32).chars().collect(),
                c => vec![c],
            })
            .collect()
    }
}

/// Compact JSON.
pub fn to_json(value: &Value) -> String {
    value.to_string()
}

/// JSON with 2-space indentation.
pub fn to_json_pretty(value: &Value) -> String {
    format!("{:#}", value)
}

/// Single-line shell notation.
pub fn to_shell(value: &Value) -> String {
    ShellPrinter::new(false).print(value)
}

/// Shell notation, one entry per line.
pub fn to_shell_pretty(value: &Value) -> String {
    ShellPrinter::new(true).print(value)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn shell_notation_quotes_only_unusual_keys() {
        let value = json!({ "a.b": "x\"y", "with space": [1, 2.5, null], "empty": {} });
        assert_eq!(
            to_shell(&value),
            "{ a.b : \"x\\\"y\", \"with space\" : [1, 2.5, null], empty : { } }"
        );
    }

    #[test]
    fn pretty_shell_notation_indents() {
        let value = json!([{ "$limit": 5 }]);
        assert_eq!(to_shell_pretty(&value), "[\n  {\n    $limit : 5\n  }\n]");
    }

    #[test]
    fn json_keeps_insertion_order() {
        let value = json!({ "z": 1, "a": 2 });
        assert_eq!(to_json(&value), "{\"z\":1,\"a\":2}");
    }
}
