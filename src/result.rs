//! Normalizes `query` replies into per-statement row sequences.
//!
//! A `query` reply carries one entry per statement in the batch. Each entry's
//! `result` may be a single object, an array or null depending on what the
//! statement did, so every entry is unwrapped into a plain sequence of rows.

use std::fmt;

use once_cell::sync::OnceCell;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value as JsonValue;

use crate::{DriverError, Result, RpcResponse};

/// Shape a statement's `result` had on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultShape {
    Object,
    Array,
    Null,
}

/// Uniform row sequence decoded from one statement's `result`.
#[derive(Clone, Debug, PartialEq)]
pub struct ResultWrapper<T> {
    shape: ResultShape,
    items: Vec<T>,
}

impl<T: DeserializeOwned> ResultWrapper<T> {
    /// Object becomes one row, array is taken verbatim, null is empty.
    /// Any other JSON type is a protocol violation.
    pub fn from_value(value: JsonValue) -> Result<Self> {
        match value {
            JsonValue::Object(_) => Ok(Self {
                shape: ResultShape::Object,
                items: vec![decode_row(value)?],
            }),
            JsonValue::Array(rows) => Ok(Self {
                shape: ResultShape::Array,
                items: rows
                    .into_iter()
                    .map(decode_row)
                    .collect::<Result<Vec<_>>>()?,
            }),
            JsonValue::Null => Ok(Self::empty(ResultShape::Null)),
            other => Err(DriverError::Protocol(format!(
                "unexpected statement result type: {}",
                json_type(&other)
            ))),
        }
    }
}

impl<T> ResultWrapper<T> {
    fn empty(shape: ResultShape) -> Self {
        Self {
            shape,
            items: Vec::new(),
        }
    }

    /// Shape the payload arrived in.
    pub fn shape(&self) -> ResultShape {
        self.shape
    }

    /// Rows, empty for a null payload.
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Consumes the wrapper, returning its rows.
    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn decode_row<T: DeserializeOwned>(value: JsonValue) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|err| DriverError::Protocol(format!("cannot decode result row: {err}")))
}

fn json_type(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

#[derive(Debug, Deserialize)]
struct StatementFrame {
    #[serde(default)]
    status: String,
    #[serde(default)]
    time: String,
    #[serde(default)]
    result: JsonValue,
    #[serde(default)]
    detail: Option<String>,
}

/// Outcome of one statement within a batch.
#[derive(Clone, Debug, PartialEq)]
pub struct StatementResult<T> {
    pub status: String,
    /// Server-reported execution time, e.g. `"52.5µs"`.
    pub time: String,
    pub result: ResultWrapper<T>,
    error: Option<String>,
}

impl<T: DeserializeOwned> StatementResult<T> {
    fn from_frame(frame: StatementFrame) -> Result<Self> {
        let failed = frame.status != "OK";
        // A failed statement reports its message as a string result (or as
        // `detail` on older servers) instead of rows.
        let (result, error) = match frame.result {
            JsonValue::String(message) if failed => {
                (ResultWrapper::empty(ResultShape::Null), Some(message))
            }
            value if failed && value.is_null() && frame.detail.is_some() => {
                (ResultWrapper::empty(ResultShape::Null), frame.detail)
            }
            value => (ResultWrapper::from_value(value)?, None),
        };

        Ok(Self {
            status: frame.status,
            time: frame.time,
            result,
            error,
        })
    }
}

impl<T> StatementResult<T> {
    /// True when the statement reported `OK`.
    pub fn is_ok(&self) -> bool {
        self.status == "OK"
    }

    /// Error message of a failed statement.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Rows the statement produced.
    pub fn items(&self) -> &[T] {
        self.result.items()
    }
}

/// Shape flags computed once when a batch is parsed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub single_query: bool,
    pub multiple_queries: bool,
    pub single_item: bool,
    pub many_item: bool,
    pub empty: bool,
}

impl BatchSummary {
    fn of<T>(statements: &[StatementResult<T>]) -> Self {
        let single_query = statements.len() == 1;
        let first_len = statements.first().map_or(0, |s| s.result.len());
        Self {
            single_query,
            multiple_queries: statements.len() > 1,
            single_item: single_query && first_len == 1,
            many_item: single_query && first_len > 1,
            empty: statements.iter().all(|s| s.result.is_empty()),
        }
    }
}

#[derive(Debug)]
struct ParsedBatch<T> {
    statements: Vec<StatementResult<T>>,
    summary: BatchSummary,
}

/// Reply to a `query` request, parsed lazily into rows of `T`.
///
/// The batch is decoded on first access and memoized; later accessors reuse
/// it. If the reply carries a server error every accessor returns
/// [`DriverError::Rpc`] without looking at the payload.
pub struct QueryResponse<T = JsonValue> {
    response: RpcResponse,
    parsed: OnceCell<ParsedBatch<T>>,
}

impl<T> fmt::Debug for QueryResponse<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryResponse")
            .field("id", self.response.id())
            .field("error", &self.response.error())
            .field("parsed", &self.parsed.get().is_some())
            .finish()
    }
}

impl<T> From<RpcResponse> for QueryResponse<T> {
    fn from(response: RpcResponse) -> Self {
        Self::new(response)
    }
}

impl<T> QueryResponse<T> {
    /// Wraps a raw reply; nothing is parsed until first access.
    pub fn new(response: RpcResponse) -> Self {
        Self {
            response,
            parsed: OnceCell::new(),
        }
    }

    /// Underlying reply envelope.
    pub fn response(&self) -> &RpcResponse {
        &self.response
    }

    /// True when the reply carries an RPC error.
    pub fn is_error(&self) -> bool {
        self.response.is_error()
    }
}

impl<T: DeserializeOwned> QueryResponse<T> {
    /// Decodes every statement of the batch, in send order.
    ///
    /// Runs at most once; later calls return the memoized statements.
    pub fn parse(&self) -> Result<&[StatementResult<T>]> {
        self.batch().map(|batch| batch.statements.as_slice())
    }

    fn batch(&self) -> Result<&ParsedBatch<T>> {
        self.response.check()?;
        self.parsed.get_or_try_init(|| {
            let statements = parse_statements(self.response.result())?;
            let summary = BatchSummary::of(&statements);

            #[cfg(feature = "tracing")]
            tracing::debug!(
                id = %self.response.id(),
                statements = statements.len(),
                empty = summary.empty,
                "query reply parsed"
            );

            Ok(ParsedBatch {
                statements,
                summary,
            })
        })
    }

    /// Statement and row counts of the batch.
    pub fn summary(&self) -> Result<BatchSummary> {
        self.batch().map(|batch| batch.summary)
    }

    /// True when the batch held exactly one statement.
    pub fn is_single_query(&self) -> Result<bool> {
        self.summary().map(|s| s.single_query)
    }

    /// True when the batch held more than one statement.
    pub fn has_multiple_queries(&self) -> Result<bool> {
        self.summary().map(|s| s.multiple_queries)
    }

    /// True for a single statement that produced exactly one row.
    pub fn is_single_item(&self) -> Result<bool> {
        self.summary().map(|s| s.single_item)
    }

    /// True for a single statement that produced more than one row.
    pub fn is_many_item(&self) -> Result<bool> {
        self.summary().map(|s| s.many_item)
    }

    /// True when no statement produced any row.
    pub fn is_empty(&self) -> Result<bool> {
        self.summary().map(|s| s.empty)
    }

    /// First row of the first statement.
    pub fn first(&self) -> Result<Option<&T>> {
        Ok(self
            .parse()?
            .first()
            .and_then(|statement| statement.items().first()))
    }

    /// Last row of the last statement.
    pub fn last(&self) -> Result<Option<&T>> {
        Ok(self
            .parse()?
            .last()
            .and_then(|statement| statement.items().last()))
    }

    /// Rows of every statement, concatenated in statement order.
    pub fn all(&self) -> Result<Vec<&T>> {
        Ok(self
            .parse()?
            .iter()
            .flat_map(|statement| statement.items())
            .collect())
    }

    /// Rows of statement `index` only; empty when out of range.
    pub fn nth_statement(&self, index: usize) -> Result<&[T]> {
        Ok(self
            .parse()?
            .get(index)
            .map_or(&[][..], |statement| statement.items()))
    }

    /// Per-statement row sequences, unflattened.
    pub fn all_responses(&self) -> Result<Vec<&ResultWrapper<T>>> {
        Ok(self.parse()?.iter().map(|statement| &statement.result).collect())
    }

    /// True when the batch has statements and every one reported `OK`.
    pub fn all_ok(&self) -> Result<bool> {
        let statements = self.parse()?;
        Ok(!statements.is_empty() && statements.iter().all(StatementResult::is_ok))
    }

    /// Owned rows of every statement, in statement order.
    pub fn into_all(self) -> Result<Vec<T>> {
        self.batch()?;
        Ok(self
            .parsed
            .into_inner()
            .map(|batch| {
                batch
                    .statements
                    .into_iter()
                    .flat_map(|statement| statement.result.into_items())
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn parse_statements<T: DeserializeOwned>(payload: &JsonValue) -> Result<Vec<StatementResult<T>>> {
    let entries = match payload {
        JsonValue::Array(entries) => entries,
        JsonValue::Null => return Ok(Vec::new()),
        other => {
            return Err(DriverError::Protocol(format!(
                "query reply must be an array of statement results, got {}",
                json_type(other)
            )))
        }
    };

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let frame: StatementFrame = serde_json::from_value(entry.clone()).map_err(|err| {
                DriverError::Protocol(format!("invalid result for statement {index}: {err}"))
            })?;
            StatementResult::from_frame(frame)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::{json, Value as JsonValue};

    use super::{QueryResponse, ResultShape, ResultWrapper};
    use crate::{DriverError, RpcResponse};

    #[derive(Debug, Deserialize, PartialEq)]
    struct User {
        name: String,
    }

    fn reply(result: JsonValue) -> QueryResponse<User> {
        let raw = json!({"id": "r1", "result": result}).to_string();
        QueryResponse::new(RpcResponse::decode(raw).expect("valid envelope"))
    }

    fn ok(result: JsonValue) -> JsonValue {
        json!({"status": "OK", "time": "10µs", "result": result})
    }

    #[test]
    fn wrapper_discriminates_shapes() {
        let single = ResultWrapper::<JsonValue>::from_value(json!({"a": 1})).expect("object");
        assert_eq!(single.shape(), ResultShape::Object);
        assert_eq!(single.len(), 1);

        let many = ResultWrapper::<JsonValue>::from_value(json!([{}, {}, {}])).expect("array");
        assert_eq!(many.shape(), ResultShape::Array);
        assert_eq!(many.len(), 3);

        let none = ResultWrapper::<JsonValue>::from_value(JsonValue::Null).expect("null");
        assert!(none.is_empty());

        let err = ResultWrapper::<JsonValue>::from_value(json!(42)).expect_err("number");
        assert!(matches!(err, DriverError::Protocol(_)));
    }

    #[test]
    fn parse_is_memoized() {
        let response = reply(json!([ok(json!([{"name": "a"}]))]));
        let first = response.parse().expect("parse");
        let second = response.parse().expect("parse");
        assert!(std::ptr::eq(first, second));
    }

    #[test]
    fn first_last_and_all_span_statements() {
        let response = reply(json!([
            ok(json!({"name": "a"})),
            ok(JsonValue::Null),
            ok(json!([{"name": "b"}, {"name": "c"}])),
        ]));

        assert_eq!(response.first().expect("first").map(|u| u.name.as_str()), Some("a"));
        assert_eq!(response.last().expect("last").map(|u| u.name.as_str()), Some("c"));
        let names: Vec<&str> = response
            .all()
            .expect("all")
            .into_iter()
            .map(|u| u.name.as_str())
            .collect();
        assert_eq!(names, ["a", "b", "c"]);

        let wrappers = response.all_responses().expect("all_responses");
        assert_eq!(wrappers.len(), 3);
        assert_eq!(wrappers[1].shape(), ResultShape::Null);
        assert!(response.has_multiple_queries().expect("summary"));
        assert!(!response.is_empty().expect("summary"));
    }

    #[test]
    fn nth_statement_returns_only_that_statement() {
        let response = reply(json!([
            ok(JsonValue::Null),
            ok(json!([{"name": "x"}, {"name": "y"}])),
        ]));

        let rows = response.nth_statement(1).expect("nth");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], User { name: "x".into() });
        assert!(response.nth_statement(0).expect("nth").is_empty());
        assert!(response.nth_statement(5).expect("nth").is_empty());
    }

    #[test]
    fn summary_flags() {
        let single = reply(json!([ok(json!({"name": "a"}))]));
        let summary = single.summary().expect("summary");
        assert!(summary.single_query && summary.single_item);
        assert!(!summary.many_item && !summary.multiple_queries && !summary.empty);

        let many = reply(json!([ok(json!([{"name": "a"}, {"name": "b"}]))]));
        assert!(many.is_many_item().expect("summary"));

        let empty = reply(json!([ok(JsonValue::Null), ok(json!([]))]));
        assert!(empty.is_empty().expect("summary"));
        assert_eq!(empty.first().expect("first"), None);
    }

    #[test]
    fn server_error_short_circuits_parse() {
        let raw = json!({
            "id": "r1",
            "error": {"code": -32000, "message": "There was a problem with the database"},
            "result": "not a batch"
        })
        .to_string();
        let response: QueryResponse<User> =
            RpcResponse::decode(raw).expect("valid envelope").into();

        assert!(response.is_error());
        let err = response.first().expect_err("must refuse to parse");
        assert!(matches!(err, DriverError::Rpc { code: -32000, .. }));
    }

    #[test]
    fn failed_statement_keeps_its_message() {
        let response = reply(json!([
            ok(json!([])),
            {"status": "ERR", "time": "1µs", "result": "Specify a namespace to use"},
        ]));

        let statements = response.parse().expect("parse");
        assert!(statements[0].is_ok());
        assert!(!statements[1].is_ok());
        assert_eq!(statements[1].error(), Some("Specify a namespace to use"));
        assert!(!response.all_ok().expect("all_ok"));
    }

    #[test]
    fn all_ok_is_false_for_empty_batch() {
        assert!(!reply(json!([])).all_ok().expect("all_ok"));
        assert!(reply(json!([ok(JsonValue::Null)])).all_ok().expect("all_ok"));
    }

    #[test]
    fn non_array_payload_is_protocol_error() {
        let err = reply(json!({"name": "a"})).parse().expect_err("must fail");
        assert!(matches!(err, DriverError::Protocol(_)));
    }

    #[test]
    fn into_all_returns_owned_rows() {
        let rows = reply(json!([ok(json!({"name": "a"})), ok(json!([{"name": "b"}]))]))
            .into_all()
            .expect("into_all");
        assert_eq!(rows, [User { name: "a".into() }, User { name: "b".into() }]);
    }
}
