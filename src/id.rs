use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Number of random bytes behind a generated id (8 base64 characters).
const RANDOM_ID_BYTES: usize = 6;

/// Correlation id linking one request to its reply on a shared connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RpcId(String);

impl RpcId {
    /// Generates a fresh random id.
    pub fn random() -> Self {
        let mut buf = [0u8; RANDOM_ID_BYTES];
        rand::thread_rng().fill_bytes(&mut buf);
        Self(STANDARD.encode(buf))
    }

    /// Id text as sent on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RpcId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for RpcId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for RpcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
