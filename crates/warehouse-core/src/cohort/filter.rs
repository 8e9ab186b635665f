//! Person property filters for dynamic cohorts.
//!
//! A cohort's `groups` is a list of JSON objects. Each group carries
//! `properties` in one of two shapes:
//!
//! - a dictionary, every entry an exact match: `{"$browser": "Chrome"}`
//! - a list of filter objects: `[{"key": "$browser", "value": "Chrome", "operator": "exact"}]`
//!
//! Groups are OR'd together and the filters inside a group are AND'd.

use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("malformed property filter in group {group}: {reason}")]
    MalformedPropertyFilter { group: usize, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyOperator {
    Exact,
    IsNot,
    IContains,
    NotIContains,
    Regex,
    NotRegex,
    Gt,
    Lt,
    IsSet,
    IsNotSet,
}

impl PropertyOperator {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "exact" => PropertyOperator::Exact,
            "is_not" => PropertyOperator::IsNot,
            "icontains" => PropertyOperator::IContains,
            "not_icontains" => PropertyOperator::NotIContains,
            "regex" => PropertyOperator::Regex,
            "not_regex" => PropertyOperator::NotRegex,
            "gt" => PropertyOperator::Gt,
            "lt" => PropertyOperator::Lt,
            "is_set" => PropertyOperator::IsSet,
            "is_not_set" => PropertyOperator::IsNotSet,
            _ => return None,
        })
    }
}

/// A filter operator with its value already checked and converted.
#[derive(Debug, Clone)]
pub enum Predicate {
    Exact(Vec<String>),
    IsNot(Vec<String>),
    IContains(String),
    NotIContains(String),
    Regex(Regex),
    NotRegex(Regex),
    Gt(f64),
    Lt(f64),
    IsSet,
    IsNotSet,
}

#[derive(Debug, Clone)]
pub struct PropertyFilter {
    pub key: String,
    pub predicate: Predicate,
}

#[derive(Debug, Clone, Default)]
pub struct PropertyGroup {
    pub filters: Vec<PropertyFilter>,
}

pub fn parse_groups(groups: &[Value]) -> Result<Vec<PropertyGroup>, FilterError> {
    groups
        .iter()
        .enumerate()
        .map(|(idx, group)| parse_group(idx, group))
        .collect()
}

fn parse_group(idx: usize, group: &Value) -> Result<PropertyGroup, FilterError> {
    let malformed = |reason: String| FilterError::MalformedPropertyFilter { group: idx, reason };

    let properties = group
        .as_object()
        .ok_or_else(|| malformed("group is not an object".to_string()))?
        .get("properties")
        .ok_or_else(|| malformed("group has no 'properties'".to_string()))?;

    let filters = match properties {
        Value::Object(entries) => {
            if entries.contains_key("type") && entries.get("values").is_some_and(Value::is_array) {
                return Err(malformed(
                    "nested property group is ambiguous with a property dictionary".to_string(),
                ));
            }
            entries
                .iter()
                .map(|(key, value)| {
                    let values = exact_values(value).map_err(|reason| malformed(format!("{}: {}", key, reason)))?;
                    Ok(PropertyFilter {
                        key: key.clone(),
                        predicate: Predicate::Exact(values),
                    })
                })
                .collect::<Result<Vec<_>, FilterError>>()?
        }
        Value::Array(items) => items
            .iter()
            .map(|item| parse_filter(item).map_err(&malformed))
            .collect::<Result<Vec<_>, FilterError>>()?,
        Value::Null => Vec::new(),
        other => return Err(malformed(format!("unexpected 'properties' value {}", other))),
    };

    Ok(PropertyGroup { filters })
}

fn parse_filter(item: &Value) -> Result<PropertyFilter, String> {
    let obj = item.as_object().ok_or_else(|| "filter is not an object".to_string())?;

    let key = obj
        .get("key")
        .and_then(Value::as_str)
        .ok_or_else(|| "filter has no string 'key'".to_string())?;

    let property_type = obj.get("type").and_then(Value::as_str).unwrap_or("person");
    if property_type != "person" {
        return Err(format!("unsupported property type '{}' for '{}'", property_type, key));
    }

    let operator_name = obj.get("operator").and_then(Value::as_str).unwrap_or("exact");
    let operator = PropertyOperator::parse(operator_name)
        .ok_or_else(|| format!("unknown operator '{}' for '{}'", operator_name, key))?;

    let value = obj.get("value").unwrap_or(&Value::Null);
    let predicate = build_predicate(operator, value).map_err(|reason| format!("{}: {}", key, reason))?;

    Ok(PropertyFilter {
        key: key.to_string(),
        predicate,
    })
}

fn build_predicate(op: PropertyOperator, value: &Value) -> Result<Predicate, String> {
    match op {
        PropertyOperator::Exact => exact_values(value).map(Predicate::Exact),
        PropertyOperator::IsNot => exact_values(value).map(Predicate::IsNot),
        PropertyOperator::IContains => scalar_text(value).map(Predicate::IContains),
        PropertyOperator::NotIContains => scalar_text(value).map(Predicate::NotIContains),
        PropertyOperator::Regex | PropertyOperator::NotRegex => {
            let pattern = scalar_text(value)?;
            let re = portable_regex(&pattern)?;
            if op == PropertyOperator::Regex {
                Ok(Predicate::Regex(re))
            } else {
                Ok(Predicate::NotRegex(re))
            }
        }
        PropertyOperator::Gt | PropertyOperator::Lt => {
            let n = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => parse_plain_number(s),
                _ => None,
            }
            .ok_or_else(|| "expected a number".to_string())?;
            if op == PropertyOperator::Gt {
                Ok(Predicate::Gt(n))
            } else {
                Ok(Predicate::Lt(n))
            }
        }
        PropertyOperator::IsSet => Ok(Predicate::IsSet),
        PropertyOperator::IsNotSet => Ok(Predicate::IsNotSet),
    }
}

/// Letter escapes that the `regex` crate and the database `~` operator read
/// the same way.
const SHARED_ESCAPES: &str = "dDsSwWntr";

/// Compiles a `regex`/`not_regex` pattern, accepting only syntax the database
/// `~` operator reads the same way. Letter escapes are limited to
/// [`SHARED_ESCAPES`] (no `\b`, `\p{..}` or backreferences) and `(?` groups
/// to `(?:`. `.` matches newlines in both.
fn portable_regex(pattern: &str) -> Result<Regex, String> {
    let mut chars = pattern.chars().peekable();
    let mut in_class = false;
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next().filter(char::is_ascii_alphanumeric) {
                    // The negated classes are not allowed inside brackets in the database.
                    let negated_in_class = in_class && matches!(escaped, 'D' | 'S' | 'W');
                    if !SHARED_ESCAPES.contains(escaped) || negated_in_class {
                        return Err(format!("unsupported regex escape '\\{}'", escaped));
                    }
                }
            }
            '[' if !in_class => in_class = true,
            ']' if in_class => in_class = false,
            '(' if !in_class && chars.peek() == Some(&'?') => {
                chars.next();
                if chars.peek() != Some(&':') {
                    return Err("unsupported regex group syntax '(?'".to_string());
                }
            }
            _ => {}
        }
    }

    RegexBuilder::new(pattern)
        .dot_matches_new_line(true)
        .build()
        .map_err(|e| format!("invalid regex: {}", e))
}

fn exact_values(value: &Value) -> Result<Vec<String>, String> {
    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Err("expected a non-empty list".to_string());
            }
            items.iter().map(scalar_text).collect()
        }
        other => scalar_text(other).map(|v| vec![v]),
    }
}

fn scalar_text(value: &Value) -> Result<String, String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(_) | Value::Bool(_) => Ok(value.to_string()),
        Value::Null => Err("expected a value".to_string()),
        _ => Err(format!("expected a scalar, found {}", value)),
    }
}

/// Property values compare as text; numbers and booleans use their JSON form.
pub fn property_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Accepts `-?digits(.digits)?` only, matching the row-store cast guard.
pub fn parse_plain_number(text: &str) -> Option<f64> {
    let digits = text.strip_prefix('-').unwrap_or(text);
    let (whole, frac) = match digits.split_once('.') {
        Some((whole, frac)) => (whole, Some(frac)),
        None => (digits, None),
    };
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(whole) || !frac.map_or(true, all_digits) {
        return None;
    }
    text.parse().ok()
}

impl PropertyFilter {
    pub fn matches(&self, properties: &Map<String, Value>) -> bool {
        let text = properties.get(&self.key).and_then(property_text);

        match &self.predicate {
            Predicate::Exact(values) => text.is_some_and(|t| values.contains(&t)),
            Predicate::IsNot(values) => !values.contains(&text.unwrap_or_default()),
            Predicate::IContains(needle) => {
                text.is_some_and(|t| t.to_lowercase().contains(&needle.to_lowercase()))
            }
            Predicate::NotIContains(needle) => {
                !text.unwrap_or_default().to_lowercase().contains(&needle.to_lowercase())
            }
            Predicate::Regex(re) => text.is_some_and(|t| re.is_match(&t)),
            Predicate::NotRegex(re) => !re.is_match(&text.unwrap_or_default()),
            Predicate::Gt(n) => text.and_then(|t| parse_plain_number(&t)).is_some_and(|v| v > *n),
            Predicate::Lt(n) => text.and_then(|t| parse_plain_number(&t)).is_some_and(|v| v < *n),
            Predicate::IsSet => text.is_some(),
            Predicate::IsNotSet => text.is_none(),
        }
    }
}

impl PropertyGroup {
    /// A group without filters matches nobody.
    pub fn matches(&self, properties: &Map<String, Value>) -> bool {
        !self.filters.is_empty() && self.filters.iter().all(|f| f.matches(properties))
    }
}

pub fn matches_any(groups: &[PropertyGroup], properties: &Map<String, Value>) -> bool {
    groups.iter().any(|g| g.matches(properties))
}
