//! Writes user-entered text back into records along simple `.a.b` paths.

use std::collections::HashMap;

use log::debug;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::store::Entry;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("path must start with '.'")]
    MissingLeadingDot,
    #[error("path contains an empty key")]
    EmptyKey,
    #[error("record is not a JSON object")]
    RootNotObject,
    #[error("cannot navigate through non-object at part {index} ({part})")]
    NotAnObject { index: usize, part: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
    #[error("line {line}: failed to set value for column {field}: {source}")]
    Field {
        line: usize,
        field: String,
        #[source]
        source: PathError,
    },
}

fn looks_like_json(raw: &str) -> bool {
    let trimmed = raw.trim();
    (trimmed.starts_with('[') && trimmed.ends_with(']'))
        || (trimmed.starts_with('{') && trimmed.ends_with('}'))
}

fn parse_number(raw: &str) -> Option<Value> {
    if let Ok(i) = raw.parse::<i64>() {
        return Some(Value::from(i));
    }
    if let Ok(u) = raw.parse::<u64>() {
        return Some(Value::from(u));
    }
    let f = raw.parse::<f64>().ok().filter(|f| f.is_finite())?;
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        return Some(Value::from(f as i64));
    }
    serde_json::Number::from_f64(f).map(Value::Number)
}

/// Turn edit text into a JSON value: empty is null, `true`/`false` are
/// booleans, numbers are integers when they have no fraction, and bracketed
/// text that parses as JSON becomes that value. Everything else stays a
/// string.
pub fn coerce_value(raw: &str) -> Value {
    match raw {
        "" => Value::Null,
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => {
            if let Some(number) = parse_number(raw) {
                return number;
            }
            if looks_like_json(raw) {
                if let Ok(parsed) = serde_json::from_str::<Value>(raw) {
                    return parsed;
                }
            }
            Value::String(raw.to_string())
        }
    }
}

/// Set `value` at `path` inside `data`. Missing or null intermediate keys
/// become empty objects.
pub fn set_path(data: &mut Value, path: &str, value: Value) -> Result<(), PathError> {
    let keys = path.strip_prefix('.').ok_or(PathError::MissingLeadingDot)?;
    let parts: Vec<&str> = keys.split('.').collect();
    if parts.iter().any(|part| part.is_empty()) {
        return Err(PathError::EmptyKey);
    }

    let Value::Object(root) = data else {
        return Err(PathError::RootNotObject);
    };
    let mut current: &mut Map<String, Value> = root;
    let (last, parents) = parts.split_last().ok_or(PathError::EmptyKey)?;

    for (index, part) in parents.iter().enumerate() {
        let slot = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if slot.is_null() {
            *slot = Value::Object(Map::new());
        }
        current = match slot {
            Value::Object(map) => map,
            _ => {
                return Err(PathError::NotAnObject {
                    index,
                    part: part.to_string(),
                })
            }
        };
    }

    current.insert(last.to_string(), value);
    Ok(())
}

/// Apply edits to the entries with the given line ids. `values` pairs a
/// column path with its new text, in column order.
///
/// With exactly one target in single mode every value is written, an empty
/// one as null. Otherwise only values that are non-empty after trimming are
/// written. Every target is changed on a copy and nothing is committed
/// unless all of them succeed. Returns how many entries were updated.
pub fn apply_edits(
    entries: &mut [Entry],
    targets: &[usize],
    values: &[(String, String)],
    single_mode: bool,
) -> Result<usize, MutationError> {
    let single = single_mode && targets.len() == 1;
    let positions: HashMap<usize, usize> = entries
        .iter()
        .enumerate()
        .map(|(pos, entry)| (entry.line, pos))
        .collect();

    let mut staged = Vec::with_capacity(targets.len());
    for &line in targets {
        let Some(&pos) = positions.get(&line) else {
            continue;
        };
        let mut data = entries[pos].data.clone();
        for (field, raw) in values {
            if !single && raw.trim().is_empty() {
                continue;
            }
            set_path(&mut data, field, coerce_value(raw)).map_err(|source| {
                MutationError::Field {
                    line,
                    field: field.clone(),
                    source,
                }
            })?;
        }
        staged.push((pos, data));
    }

    let updated = staged.len();
    for (pos, data) in staged {
        entries[pos].data = data;
    }
    debug!(
        "Updated {} entries out of {} targets",
        updated,
        targets.len()
    );
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pairs(list: &[(&str, &str)]) -> Vec<(String, String)> {
        list.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_coercion_table() {
        assert_eq!(coerce_value(""), json!(null));
        assert_eq!(coerce_value("true"), json!(true));
        assert_eq!(coerce_value("false"), json!(false));
        assert_eq!(coerce_value("42"), json!(42));
        assert_eq!(coerce_value("-7"), json!(-7));
        assert_eq!(coerce_value("3.0"), json!(3));
        assert_eq!(coerce_value("1e3"), json!(1000));
        assert_eq!(coerce_value("2.5"), json!(2.5));
        assert_eq!(coerce_value("18446744073709551615"), json!(18446744073709551615u64));
        assert_eq!(coerce_value("NaN"), json!("NaN"));
        assert_eq!(coerce_value("inf"), json!("inf"));
        assert_eq!(coerce_value("[1, 2]"), json!([1, 2]));
        assert_eq!(coerce_value("{\"a\": 1}"), json!({"a": 1}));
        assert_eq!(coerce_value("[not json]"), json!("[not json]"));
        assert_eq!(coerce_value("True"), json!("True"));
        assert_eq!(coerce_value("hello"), json!("hello"));
    }

    #[test]
    fn test_set_path_creates_intermediates() {
        let mut data = json!({"a": null});
        set_path(&mut data, ".a.b.c", json!(1)).unwrap();
        set_path(&mut data, ".x.y", json!("v")).unwrap();
        assert_eq!(data, json!({"a": {"b": {"c": 1}}, "x": {"y": "v"}}));
    }

    #[test]
    fn test_set_path_errors() {
        let mut data = json!({"a": 5});
        assert_eq!(
            set_path(&mut data, ".a.b", json!(1)),
            Err(PathError::NotAnObject {
                index: 0,
                part: "a".into()
            })
        );
        assert_eq!(set_path(&mut data, "a", json!(1)), Err(PathError::MissingLeadingDot));
        assert_eq!(set_path(&mut data, ".a..b", json!(1)), Err(PathError::EmptyKey));
        assert_eq!(set_path(&mut json!([1]), ".a", json!(1)), Err(PathError::RootNotObject));
        assert_eq!(data, json!({"a": 5}));
    }

    #[test]
    fn test_single_mode_writes_empty_as_null() {
        let mut entries = vec![Entry::new(json!({"a": 1, "b": 2}), 1)];
        let updated = apply_edits(
            &mut entries,
            &[1],
            &pairs(&[(".a", ""), (".b", "3")]),
            true,
        )
        .unwrap();
        assert_eq!(updated, 1);
        assert_eq!(entries[0].data, json!({"a": null, "b": 3}));
    }

    #[test]
    fn test_bulk_mode_skips_blank_values() {
        let mut entries = vec![
            Entry::new(json!({"a": 1, "b": 2}), 1),
            Entry::new(json!({"a": 5, "b": 6}), 2),
            Entry::new(json!({"a": 9, "b": 9}), 3),
        ];
        let updated = apply_edits(
            &mut entries,
            &[1, 2],
            &pairs(&[(".a", "  "), (".b", "x")]),
            false,
        )
        .unwrap();
        assert_eq!(updated, 2);
        assert_eq!(entries[0].data, json!({"a": 1, "b": "x"}));
        assert_eq!(entries[1].data, json!({"a": 5, "b": "x"}));
        assert_eq!(entries[2].data, json!({"a": 9, "b": 9}));
    }

    #[test]
    fn test_single_mode_with_many_targets_acts_as_bulk() {
        let mut entries = vec![
            Entry::new(json!({"a": 1}), 1),
            Entry::new(json!({"a": 2}), 2),
        ];
        apply_edits(&mut entries, &[1, 2], &pairs(&[(".a", "")]), true).unwrap();
        assert_eq!(entries[0].data, json!({"a": 1}));
        assert_eq!(entries[1].data, json!({"a": 2}));
    }

    #[test]
    fn test_failed_batch_leaves_data_untouched() {
        let mut entries = vec![
            Entry::new(json!({"a": {"b": 1}}), 1),
            Entry::new(json!({"a": "flat"}), 2),
        ];
        let before = entries.clone();
        let err = apply_edits(&mut entries, &[1, 2], &pairs(&[(".a.b", "7")]), false).unwrap_err();
        assert_eq!(
            err,
            MutationError::Field {
                line: 2,
                field: ".a.b".into(),
                source: PathError::NotAnObject {
                    index: 0,
                    part: "a".into()
                }
            }
        );
        assert!(err.to_string().contains("line 2"));
        assert_eq!(entries, before);
    }

    #[test]
    fn test_unknown_targets_are_skipped() {
        let mut entries = vec![Entry::new(json!({"a": 1}), 1)];
        let updated = apply_edits(&mut entries, &[4], &pairs(&[(".a", "2")]), false).unwrap();
        assert_eq!(updated, 0);
    }
}
