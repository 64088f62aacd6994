//! Mutation commands: `$`-prefixed operators embedded in payloads.
//!
//! A payload field whose value is an object carrying `$`-prefixed
//! sub-keys is a command, not a literal value (`{"votes": {"$inc": 2}}`).
//! Commands are scanned from the raw payload before sanitization strips
//! the mismatched field, then applied to the merged document.

use depot_store::Document;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// Field name to its command object.
pub type Commands = BTreeMap<String, Map<String, Value>>;

/// Scans `body` for fields carrying mutation commands.
///
/// A field qualifies when its value is a non-array mapping with at
/// least one `$`-prefixed sub-key.
#[must_use]
pub fn build_commands(body: &Map<String, Value>) -> Commands {
    body.iter()
        .filter_map(|(field, value)| {
            let map = value.as_object()?;
            if map.keys().any(|key| key.starts_with('$')) {
                Some((field.clone(), map.clone()))
            } else {
                None
            }
        })
        .collect()
}

/// Applies mutation commands to `doc` in place.
///
/// Commands that don't fit the current value are skipped; the
/// partially-applied document survives.
pub fn exec_commands(doc: &mut Document, commands: &Commands) {
    for (field, command) in commands {
        for (operator, operand) in command {
            if !operator.starts_with('$') {
                continue;
            }
            apply_operator(doc, field, operator, operand);
        }
    }
}

fn apply_operator(doc: &mut Document, field: &str, operator: &str, operand: &Value) {
    match operator {
        "$inc" => {
            let Some(total) = add_numbers(doc.get(field), operand) else {
                debug!(field, "skipping $inc: operand or target not numeric");
                return;
            };
            doc.insert(field.to_string(), Value::Number(total));
        }
        "$push" => match doc.get_mut(field) {
            Some(Value::Array(items)) => items.push(operand.clone()),
            _ => {
                doc.insert(field.to_string(), Value::Array(vec![operand.clone()]));
            }
        },
        "$pushAll" => match doc.get_mut(field) {
            Some(Value::Array(items)) => match operand.as_array() {
                Some(additions) => items.extend(additions.iter().cloned()),
                None => debug!(field, "skipping $pushAll: operand is not an array"),
            },
            _ => {
                doc.insert(field.to_string(), operand.clone());
            }
        },
        "$pull" => {
            if let Some(Value::Array(items)) = doc.get_mut(field) {
                items.retain(|item| item != operand);
            }
        }
        "$pullAll" => {
            if let (Some(Value::Array(items)), Some(removals)) =
                (doc.get_mut(field), operand.as_array())
            {
                items.retain(|item| !removals.contains(item));
            }
        }
        other => debug!(field, operator = other, "skipping unknown command"),
    }
}

/// Adds `operand` to the current value, treating a missing or null
/// target as zero. Integer arithmetic stays integral. Returns `None`
/// when the operand isn't numeric or the target holds a non-number.
fn add_numbers(current: Option<&Value>, operand: &Value) -> Option<Number> {
    let operand = operand.as_number()?;
    let current = match current {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => Some(n),
        Some(_) => return None,
    };

    match (current, operand.as_i64()) {
        (None, Some(b)) => Some(Number::from(b)),
        (Some(a), Some(b)) if a.as_i64().is_some() => {
            let a = a.as_i64()?;
            match a.checked_add(b) {
                Some(total) => Some(Number::from(total)),
                None => Number::from_f64(a as f64 + b as f64),
            }
        }
        _ => {
            let a = current.and_then(Number::as_f64).unwrap_or(0.0);
            Number::from_f64(a + operand.as_f64()?)
        }
    }
}
