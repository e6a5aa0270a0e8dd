//! Projection engine: turns raw entries into the filtered, sorted and
//! stringified rows the table shows.

use std::cmp::Ordering;

use log::{debug, error};
use serde_json::Value;

use crate::query::{line_vars, ParseError, Query};
use crate::store::Entry;

/// Cell text for a column expression that failed to compile.
pub const ERR_PARSE: &str = "ERR:PARSE";
/// Cell text for a column expression that failed on this record.
pub const ERR_EXEC: &str = "ERR:EXEC";

/// Most columns picked by [`discover_columns`].
pub const MAX_DISCOVERED_COLUMNS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub column: Option<usize>,
    pub ascending: bool,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self {
            column: None,
            ascending: true,
        }
    }
}

/// Result of one projection pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    /// Positions in the entry slice, in view order.
    pub indexes: Vec<usize>,
    /// One row of cell text per index, one cell per column query.
    pub rows: Vec<Vec<String>>,
    /// Set when the filter could not be applied and all entries were kept.
    pub filter_error: Option<String>,
}

fn column_tier(key: &str) -> u8 {
    match key {
        "id" => 0,
        "title" | "text" => 1,
        _ => 2,
    }
}

/// Pick up to five column queries from the first entry's top-level keys.
/// `id` sorts first, then `title` and `text`, then everything else
/// alphabetically. Keys starting with `_` are skipped.
pub fn discover_columns(entries: &[Entry]) -> Vec<String> {
    let Some(Value::Object(first)) = entries.first().map(|e| &e.data) else {
        return Vec::new();
    };

    let mut keys: Vec<&str> = first
        .keys()
        .map(String::as_str)
        .filter(|k| !k.is_empty() && !k.starts_with('_'))
        .collect();
    keys.sort_by(|a, b| column_tier(a).cmp(&column_tier(b)).then_with(|| a.cmp(b)));
    keys.truncate(MAX_DISCOVERED_COLUMNS);
    keys.into_iter().map(|k| format!(".{}", k)).collect()
}

/// Display text for a query result.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                format!("{:.0}", n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Sort key: numeric when the text parses as a finite real, otherwise the
/// lowercased text.
#[derive(Debug, Clone)]
struct SortKey {
    number: Option<f64>,
    text: String,
}

impl SortKey {
    fn new(raw: String) -> Self {
        let number = raw.parse::<f64>().ok().filter(|n| n.is_finite());
        Self {
            number,
            text: raw.to_lowercase(),
        }
    }

    fn compare(&self, other: &Self) -> Ordering {
        match (self.number, other.number) {
            (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            _ => self.text.cmp(&other.text),
        }
    }
}

/// Compare two cell texts the way sorted columns are ordered.
pub fn compare_sort_text(a: &str, b: &str) -> Ordering {
    SortKey::new(a.to_string()).compare(&SortKey::new(b.to_string()))
}

/// Stable merge sort. Mixed numeric and text keys do not form a total order,
/// so this never relies on one.
fn merge_sort<T>(mut items: Vec<T>, cmp: &impl Fn(&T, &T) -> Ordering) -> Vec<T> {
    if items.len() <= 1 {
        return items;
    }
    let right = items.split_off(items.len() / 2);
    let left = merge_sort(items, cmp);
    let right = merge_sort(right, cmp);

    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        let take_right = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => cmp(r, l) == Ordering::Less,
            _ => break,
        };
        if take_right {
            merged.extend(right.next());
        } else {
            merged.extend(left.next());
        }
    }
    merged.extend(left);
    merged.extend(right);
    merged
}

/// Sorting keeps full precision, unlike the rounded cell text, so 2.4 and
/// 2.6 do not tie.
fn sort_text(value: &Value) -> String {
    match value {
        Value::Number(n) => n.to_string(),
        other => format_value(other),
    }
}

fn filter_indexes(entries: &[Entry], filter: &str) -> (Vec<usize>, Option<String>) {
    let everything: Vec<usize> = (0..entries.len()).collect();
    let filter = filter.trim();
    if filter.is_empty() {
        return (everything, None);
    }

    let wrapped = format!("select({})", filter);
    let query = match Query::compile(&wrapped) {
        Ok(query) => query,
        Err(err) => {
            error!("Error parsing filter query '{}': {}", wrapped, err);
            return (everything, Some(err.to_string()));
        }
    };

    let mut kept = Vec::new();
    for (idx, entry) in entries.iter().enumerate() {
        match query.first_with(&entry.data, &line_vars(entry.line)) {
            Ok(Some(_)) => kept.push(idx),
            Ok(None) => {}
            Err(err) => {
                error!(
                    "Error executing filter query '{}' on line {}: {}",
                    wrapped, entry.line, err
                );
                return (everything, Some(err.message()));
            }
        }
    }
    (kept, None)
}

fn render_cell(query: &Result<Query, ParseError>, entry: &Entry) -> String {
    match query {
        Err(_) => ERR_PARSE.to_string(),
        Ok(query) => match query.first_with(&entry.data, &line_vars(entry.line)) {
            Ok(Some(value)) => format_value(&value),
            Ok(None) => String::new(),
            Err(err) => {
                debug!(
                    "Error executing column query '{}' on line {}: {}",
                    query.source(),
                    entry.line,
                    err
                );
                ERR_EXEC.to_string()
            }
        },
    }
}

/// Run one projection pass: filter, then sort, then evaluate every column for
/// every surviving entry.
pub fn project(entries: &[Entry], columns: &[String], filter: &str, sort: SortSpec) -> Projection {
    let (mut indexes, filter_error) = filter_indexes(entries, filter);

    let compiled: Vec<Result<Query, ParseError>> = columns
        .iter()
        .map(|source| {
            Query::compile(source).inspect_err(|err| {
                error!("Error parsing column query '{}': {}", source, err);
            })
        })
        .collect();

    if let Some(Ok(query)) = sort.column.and_then(|col| compiled.get(col)) {
        let keyed: Vec<(SortKey, usize)> = indexes
            .iter()
            .map(|&idx| {
                let entry = &entries[idx];
                let raw = match query.first_with(&entry.data, &line_vars(entry.line)) {
                    Ok(Some(value)) => sort_text(&value),
                    _ => String::new(),
                };
                (SortKey::new(raw), idx)
            })
            .collect();
        let keyed = merge_sort(keyed, &|a: &(SortKey, usize), b: &(SortKey, usize)| {
            let ord = a.0.compare(&b.0);
            if sort.ascending {
                ord
            } else {
                ord.reverse()
            }
        });
        indexes = keyed.into_iter().map(|(_, idx)| idx).collect();
    }

    let rows = indexes
        .iter()
        .map(|&idx| {
            compiled
                .iter()
                .map(|query| render_cell(query, &entries[idx]))
                .collect()
        })
        .collect();

    Projection {
        indexes,
        rows,
        filter_error,
    }
}
