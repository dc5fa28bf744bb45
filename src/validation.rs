//! Payload validation against the resource catalogue.
//!
//! Input goes through the same normalisation a Laravel request does before
//! validation: strings are trimmed (passwords excepted) and empty strings
//! become null. Output rows are keyed by storage column.

use crate::domain::{Role, Weekday};
use crate::error::{Result, TimetableError, ValidationErrors};
use crate::password::hash_password;
use crate::schema::{Field, FieldKind, Table};
use crate::storage::{ListQuery, Row};
use chrono::NaiveTime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));

/// Largest page a list request may ask for.
pub const MAX_PAGE_SIZE: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Every required field must be present.
    Create,
    /// Only supplied fields are validated.
    Update,
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Validates `payload` for `table`, returning the normalised attributes.
pub fn validate(table: Table, payload: &Value, mode: Mode) -> Result<Row> {
    let Some(input) = payload.as_object() else {
        return Err(TimetableError::validation(
            "payload",
            "The request body must be a JSON object.",
        ));
    };

    let mut errors = ValidationErrors::new();
    let mut row = Row::new();

    for field in table.fields() {
        let supplied = input
            .get(field.name)
            .or_else(|| field.alias.and_then(|alias| input.get(alias)));

        let value = match supplied.map(|v| normalise(field, v)) {
            None if mode == Mode::Update => continue,
            None | Some(Value::Null) => {
                if field.required {
                    errors.add(field.name, format!("The {} field is required.", field.name));
                    continue;
                }
                if supplied.is_none() && field.kind == FieldKind::Bool {
                    Value::Bool(false)
                } else {
                    Value::Null
                }
            }
            Some(value) => match coerce(field, &value) {
                Ok(value) => value,
                Err(message) => {
                    errors.add(field.name, message);
                    continue;
                }
            },
        };
        row.insert(field.column().to_string(), value);
    }

    errors.into_result()?;
    Ok(row)
}

/// Rules spanning several fields, checked against a complete row.
pub fn check_row(table: Table, row: &Row) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    if table == Table::Schedules {
        let start = row.get("start_time").and_then(Value::as_str);
        let end = row.get("end_time").and_then(Value::as_str);
        if let (Some(start), Some(end)) = (start, end) {
            // Both are normalised to HH:MM:SS, so string order is time order.
            if end <= start {
                errors.add(
                    "end_time",
                    "The end_time field must be a time after start_time.",
                );
            }
        }
    }
    errors
}

/// Builds a list query from URL parameters. Every key other than `limit`
/// and `offset` must name a filterable field of `table`.
pub fn parse_filters(table: Table, params: &HashMap<String, String>) -> Result<ListQuery> {
    let mut errors = ValidationErrors::new();
    let mut query = ListQuery::default();

    let mut keys: Vec<&String> = params.keys().collect();
    keys.sort();
    for key in keys {
        let raw = &params[key];
        match key.as_str() {
            "limit" => match raw.parse::<usize>() {
                Ok(n) if (1..=MAX_PAGE_SIZE).contains(&n) => query.limit = Some(n),
                _ => errors.add(
                    "limit",
                    format!("The limit must be between 1 and {MAX_PAGE_SIZE}."),
                ),
            },
            // Storage backends page with i64 offsets.
            "offset" => match raw.parse::<i64>().map(usize::try_from) {
                Ok(Ok(n)) => query.offset = Some(n),
                _ => errors.add(
                    "offset",
                    format!("The offset must be an integer between 0 and {}.", i64::MAX),
                ),
            },
            name => {
                let field = table
                    .field(name)
                    .filter(|f| !matches!(f.kind, FieldKind::Password { .. }));
                let Some(field) = field else {
                    errors.add(name, format!("Unknown filter '{name}' for {table}."));
                    continue;
                };
                let value = match normalise(field, &Value::String(raw.clone())) {
                    Value::Null => Ok(Value::Null),
                    value => coerce(field, &value),
                };
                match value {
                    Ok(value) => query.filters.push((field.column().to_string(), value)),
                    Err(message) => errors.add(name, message),
                }
            }
        }
    }

    errors.into_result()?;
    Ok(query)
}

fn normalise(field: &Field, value: &Value) -> Value {
    match value {
        Value::String(s) if matches!(field.kind, FieldKind::Password { .. }) => {
            if s.is_empty() {
                Value::Null
            } else {
                value.clone()
            }
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Value::Null
            } else {
                Value::String(trimmed.to_string())
            }
        }
        other => other.clone(),
    }
}

fn coerce(field: &Field, value: &Value) -> std::result::Result<Value, String> {
    let name = field.name;
    match field.kind {
        FieldKind::Bool => match value {
            Value::Bool(b) => Ok(Value::Bool(*b)),
            Value::Number(n) if n.as_i64() == Some(0) => Ok(Value::Bool(false)),
            Value::Number(n) if n.as_i64() == Some(1) => Ok(Value::Bool(true)),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(Value::Bool(true)),
                "false" | "0" => Ok(Value::Bool(false)),
                _ => Err(format!("The {name} field must be true or false.")),
            },
            _ => Err(format!("The {name} field must be true or false.")),
        },
        _ => {
            let Some(s) = value.as_str() else {
                return Err(format!("The {name} field must be a string."));
            };
            coerce_str(field, s)
        }
    }
}

fn coerce_str(field: &Field, s: &str) -> std::result::Result<Value, String> {
    let name = field.name;
    match field.kind {
        FieldKind::Text { min, max } => {
            let len = s.chars().count();
            if len < min {
                Err(format!("The {name} field must be at least {min} characters."))
            } else if len > max {
                Err(format!(
                    "The {name} field must not be greater than {max} characters."
                ))
            } else {
                Ok(Value::String(s.to_string()))
            }
        }
        FieldKind::Email => {
            let email = s.to_lowercase();
            if is_valid_email(&email) {
                Ok(Value::String(email))
            } else {
                Err(format!("The {name} field must be a valid email address."))
            }
        }
        FieldKind::Password { min } => {
            if s.chars().count() < min {
                Err(format!("The {name} field must be at least {min} characters."))
            } else {
                Ok(Value::String(hash_password(s)))
            }
        }
        FieldKind::Role => s
            .parse::<Role>()
            .map(|role| Value::String(role.as_str().to_string()))
            .map_err(|_| format!("The selected {name} is invalid.")),
        FieldKind::Weekday => s
            .parse::<Weekday>()
            .map(|day| Value::String(day.as_str().to_string()))
            .map_err(|_| format!("The selected {name} is invalid.")),
        FieldKind::Time => NaiveTime::parse_from_str(s, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
            .map(|t| Value::String(t.format("%H:%M:%S").to_string()))
            .map_err(|_| format!("The {name} field must match the format H:i.")),
        FieldKind::Reference { .. } => Uuid::parse_str(s)
            .map(|id| Value::String(id.to_string()))
            .map_err(|_| format!("The {name} field must be a valid UUID.")),
        FieldKind::Bool => Err(format!("The {name} field must be true or false.")),
    }
}
