/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// Connection-level failure. Fatal to every operation pending on the
    /// connection at the time.
    #[error("transport error: {0}")]
    Transport(String),
    /// A decoded payload does not match the expected envelope or
    /// result-wrapper shape.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The server reported a failure inside a well-formed envelope.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    /// A request was sent with an id that is still pending on the connection.
    #[error("a request with id `{0}` is already pending")]
    DuplicateCorrelationId(String),
    /// The query builder has no filter segments to put after `WHERE`.
    #[error("query has no where clause segments")]
    EmptyWhereClause,
    /// The query builder has no `FROM` target.
    #[error("query has no target table")]
    MissingTarget,
    /// A grammar token reached a position that has no emission rule for it.
    #[error("no emission rule for token kind `{0}`")]
    UnknownTokenKind(String),
    /// The operation was abandoned by the caller or by closing the connection.
    #[error("operation cancelled")]
    Cancelled,
    /// No reply arrived within the configured request timeout.
    #[error("request {id} timed out after {timeout_ms} ms")]
    Timeout { id: String, timeout_ms: u64 },
    /// Non-success HTTP status code from the health endpoint.
    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },
    /// Invalid or missing connection configuration.
    #[error("configuration error: {0}")]
    Config(String),
}
