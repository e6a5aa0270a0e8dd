//! Query evaluator for the jq dialect used by column and filter expressions.
//!
//! Expressions are compiled once with [`Query::compile`] and then evaluated
//! lazily against each record: [`Query::first`] stops as soon as the first
//! output exists, so generators such as `range(1e18)` cost nothing beyond the
//! value actually requested.

mod eval;
mod lexer;
mod parser;

use std::fmt;

use serde_json::Value;
use thiserror::Error;

/// A query that failed to compile. `offset` is the char position in the
/// source where the problem was found.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (at offset {offset})")]
pub struct ParseError {
    pub message: String,
    pub offset: usize,
}

impl ParseError {
    pub(crate) fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}

/// A runtime failure while evaluating a query against one record. Carries the
/// raised value, which is a plain message for built-in failures and whatever
/// was passed to `error(...)` otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecError {
    value: Value,
}

impl ExecError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            value: Value::String(message.into()),
        }
    }

    pub(crate) fn from_value(value: Value) -> Self {
        Self { value }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn message(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            other => format!("{} (not a string)", other),
        }
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ExecError {}

/// A compiled query expression.
#[derive(Debug, Clone)]
pub struct Query {
    source: String,
    ast: parser::Ast,
}

impl Query {
    pub fn compile(source: &str) -> Result<Self, ParseError> {
        let ast = parser::parse(source)?;
        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// First output for `input`, `Ok(None)` when the query produces nothing.
    /// `$line` is bound to null.
    pub fn first(&self, input: &Value) -> Result<Option<Value>, ExecError> {
        self.first_with(input, &[("line".to_string(), Value::Null)])
    }

    /// First output with the given global variables bound.
    pub fn first_with(
        &self,
        input: &Value,
        vars: &[(String, Value)],
    ) -> Result<Option<Value>, ExecError> {
        eval::first_output(&self.ast, input, &eval::Env::Root(vars))
    }

    /// Every output for `input`, stopping at the first error.
    pub fn all_with(&self, input: &Value, vars: &[(String, Value)]) -> Result<Vec<Value>, ExecError> {
        let mut values = Vec::new();
        eval::eval(&self.ast, input, &eval::Env::Root(vars), &mut |value| {
            values.push(value);
            Ok(std::ops::ControlFlow::Continue(()))
        })?;
        Ok(values)
    }
}

/// Global variables for evaluating against the entry with line id `line`.
pub fn line_vars(line: usize) -> Vec<(String, Value)> {
    vec![("line".to_string(), Value::from(line))]
}

/// Whether a value counts as true in a condition.
pub fn is_truthy(value: &Value) -> bool {
    eval::truthy(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_is_lazy() {
        let q = Query::compile(".a, error(\"never reached\")").unwrap();
        assert_eq!(q.first(&json!({"a": 1})).unwrap(), Some(json!(1)));
    }

    #[test]
    fn test_empty_is_not_an_error() {
        let q = Query::compile("select(.a > 5)").unwrap();
        assert_eq!(q.first(&json!({"a": 1})).unwrap(), None);
    }

    #[test]
    fn test_line_variable() {
        let q = Query::compile("$line").unwrap();
        assert_eq!(q.first_with(&json!({}), &line_vars(4)).unwrap(), Some(json!(4)));
        assert_eq!(q.first(&json!({})).unwrap(), Some(json!(null)));
    }

    #[test]
    fn test_all_outputs() {
        let q = Query::compile(".[] | . * 2").unwrap();
        assert_eq!(
            q.all_with(&json!([1, 2]), &line_vars(1)).unwrap(),
            vec![json!(2), json!(4)]
        );
    }

    #[test]
    fn test_parse_error_reports_offset() {
        let err = Query::compile(".a | | .b").unwrap_err();
        assert_eq!(err.offset, 5);
        assert!(err.to_string().contains("offset 5"));
    }

    #[test]
    fn test_exec_error_message() {
        let q = Query::compile("error({\"x\": 1})").unwrap();
        let err = q.first(&json!(null)).unwrap_err();
        assert_eq!(err.message(), "{\"x\":1} (not a string)");
    }
}
