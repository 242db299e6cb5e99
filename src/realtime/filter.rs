// realtime/filter.rs
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum FilterError {
    #[error("Filter must look like column=eq.value")]
    Malformed,

    #[error("Filter value must not be empty")]
    EmptyValue,
}

/// Row predicate of the form `column=eq.value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: String,
}

fn filter_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([a-z_][a-z0-9_]*)=eq\.(.*)$").expect("filter pattern is valid")
    })
}

impl Filter {
    pub fn parse(raw: &str) -> Result<Filter, FilterError> {
        let captures = filter_pattern()
            .captures(raw.trim())
            .ok_or(FilterError::Malformed)?;

        let value = captures[2].trim();
        if value.is_empty() {
            return Err(FilterError::EmptyValue);
        }

        Ok(Filter {
            column: captures[1].to_string(),
            value: value.to_string(),
        })
    }

    pub fn matches(&self, record: &Value) -> bool {
        match record.get(&self.column) {
            Some(Value::String(s)) => s == &self.value,
            Some(Value::Number(n)) => n.to_string() == self.value,
            Some(Value::Bool(b)) => b.to_string() == self.value,
            Some(Value::Null) => self.value == "null",
            _ => false,
        }
    }
}
