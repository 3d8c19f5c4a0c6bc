//! Wire envelopes for the JSON RPC protocol.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{DriverError, Result, RpcId};

/// Outbound RPC message.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RpcRequest {
    pub id: RpcId,
    pub method: String,
    pub params: Vec<JsonValue>,
}

impl RpcRequest {
    /// Creates a request with a freshly generated correlation id.
    pub fn new(method: impl Into<String>, params: Vec<JsonValue>) -> Self {
        Self::with_id(RpcId::random(), method, params)
    }

    /// Creates a request with an explicit correlation id.
    ///
    /// The id must not be pending on the connection. The id of a request
    /// that timed out or was cancelled stays reserved until its late reply
    /// arrives or the connection closes. Prefer [`Self::new`].
    pub fn with_id(id: impl Into<RpcId>, method: impl Into<String>, params: Vec<JsonValue>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Builds a `query` request: `[text, {name: value, ...}]`.
    pub fn query(text: impl Into<String>, vars: serde_json::Map<String, JsonValue>) -> Self {
        Self::new(
            "query",
            vec![JsonValue::String(text.into()), JsonValue::Object(vars)],
        )
    }
}

/// Error object carried inside a reply.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct ResponseFrame {
    #[serde(default)]
    id: Option<RpcId>,
    #[serde(default)]
    error: Option<RpcError>,
    #[serde(default)]
    result: JsonValue,
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: RpcId,
}

/// Inbound RPC reply, with the raw frame text kept for diagnostics and
/// re-decoding.
#[derive(Clone, Debug, PartialEq)]
pub struct RpcResponse {
    id: RpcId,
    error: Option<RpcError>,
    result: JsonValue,
    raw: String,
}

impl RpcResponse {
    /// Decodes the outer envelope of a reply frame.
    ///
    /// The `result` payload is left opaque. Frames without an `id` cannot be
    /// correlated and are rejected.
    pub fn decode(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let frame: ResponseFrame = serde_json::from_str(&raw)
            .map_err(|err| DriverError::Protocol(format!("invalid rpc envelope: {err}")))?;
        let id = frame
            .id
            .ok_or_else(|| DriverError::Protocol("rpc envelope has no id".to_owned()))?;

        Ok(Self {
            id,
            error: frame.error,
            result: frame.result,
            raw,
        })
    }

    /// Best-effort id extraction from a frame that failed full decoding.
    pub(crate) fn peek_id(raw: &str) -> Option<RpcId> {
        serde_json::from_str::<IdOnly>(raw).ok().map(|frame| frame.id)
    }

    /// Correlation id of the request this reply answers.
    pub fn id(&self) -> &RpcId {
        &self.id
    }

    /// Error object, if the reply carried one (possibly with an empty message).
    pub fn error(&self) -> Option<&RpcError> {
        self.error.as_ref()
    }

    /// Opaque result payload. `Null` when the reply carried none.
    pub fn result(&self) -> &JsonValue {
        &self.result
    }

    /// Verbatim frame text as received.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// True when the reply carries an error with a non-empty message.
    ///
    /// An error object with an empty message is not treated as a failure.
    pub fn is_error(&self) -> bool {
        self.error
            .as_ref()
            .is_some_and(|error| !error.message.is_empty())
    }

    /// Returns the server error as [`DriverError::Rpc`], if any.
    pub fn check(&self) -> Result<()> {
        match &self.error {
            Some(error) if !error.message.is_empty() => Err(DriverError::Rpc {
                code: error.code,
                message: error.message.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// Converts the reply into its opaque result, failing on a server error.
    pub fn into_result(self) -> Result<JsonValue> {
        self.check()?;
        Ok(self.result)
    }

    /// Re-decodes the opaque result into `T`.
    pub fn decode_result<T: DeserializeOwned>(&self) -> Result<T> {
        self.check()?;
        serde_json::from_value(self.result.clone()).map_err(|err| {
            DriverError::Protocol(format!(
                "result of reply {} does not match the requested shape: {err}",
                self.id
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::{RpcRequest, RpcResponse};
    use crate::DriverError;

    #[test]
    fn request_serializes_to_envelope_shape() {
        let req = RpcRequest::with_id("abc", "use", vec![json!("ns"), json!("db")]);
        let value = serde_json::to_value(&req).expect("must serialize");
        assert_eq!(
            value,
            json!({"id": "abc", "method": "use", "params": ["ns", "db"]})
        );
    }

    #[test]
    fn query_request_carries_text_and_vars() {
        let mut vars = serde_json::Map::new();
        vars.insert("name_0".to_owned(), json!("kit"));
        let req = RpcRequest::query("SELECT * FROM user WHERE name = $name_0", vars);
        assert_eq!(req.method, "query");
        assert_eq!(req.params[1], json!({"name_0": "kit"}));
    }

    #[test]
    fn decode_keeps_raw_text() {
        let raw = r#"{"id":"x1","result":[1,2]}"#;
        let response = RpcResponse::decode(raw).expect("must decode");
        assert_eq!(response.id().as_str(), "x1");
        assert_eq!(response.raw(), raw);
        assert_eq!(response.result(), &json!([1, 2]));
        assert!(!response.is_error());
    }

    #[test]
    fn empty_error_message_is_not_an_error() {
        let response = RpcResponse::decode(r#"{"id":"x","error":{"code":0,"message":""},"result":1}"#)
            .expect("must decode");
        assert!(!response.is_error());
        assert_eq!(response.into_result().expect("must succeed"), json!(1));
    }

    #[test]
    fn error_message_wins_over_result() {
        let response = RpcResponse::decode(
            r#"{"id":"x","error":{"code":-32000,"message":"boom"},"result":{"ok":true}}"#,
        )
        .expect("must decode");
        assert!(response.is_error());
        let err = response.into_result().expect_err("must fail");
        assert!(matches!(err, DriverError::Rpc { code: -32000, ref message } if message == "boom"));
    }

    #[test]
    fn decode_rejects_frames_without_id() {
        let err = RpcResponse::decode(r#"{"result":1}"#).expect_err("must fail");
        assert!(matches!(err, DriverError::Protocol(_)));
    }

    #[test]
    fn peek_id_recovers_id_from_bad_envelope() {
        let raw = r#"{"id":"x9","error":"not an object"}"#;
        assert!(RpcResponse::decode(raw).is_err());
        assert_eq!(RpcResponse::peek_id(raw).map(|id| id.to_string()), Some("x9".to_owned()));
    }

    #[test]
    fn decode_result_into_typed_shape() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Version {
            version: String,
        }

        let response = RpcResponse::decode(r#"{"id":"v","result":{"version":"1.0"}}"#)
            .expect("must decode");
        let version: Version = response.decode_result().expect("must decode result");
        assert_eq!(version.version, "1.0");

        let err = response.decode_result::<Vec<u8>>().expect_err("must fail");
        assert!(matches!(err, DriverError::Protocol(_)));
    }
}
