/// Configures request timeout and RPC frame logging.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientOptions {
    /// Per-request timeout in milliseconds, measured from send to reply.
    pub timeout_ms: u64,
    /// Logs every request and reply frame at trace level.
    ///
    /// Only has an effect with the `tracing` feature enabled.
    pub log_rpc: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            log_rpc: false,
        }
    }
}
