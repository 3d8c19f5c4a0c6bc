use std::fmt;

use url::Url;

use crate::{DriverError, Result};

/// Connection target and credentials for [`crate::Database::connect`].
#[derive(Clone, Default, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Server address such as `http://127.0.0.1:8000`.
    pub address: String,
    pub namespace: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("address", &self.address)
            .field("namespace", &self.namespace)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl DatabaseConfig {
    /// Server address, e.g. `http://127.0.0.1:8000`. Other fields start empty.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Namespace selected after connecting.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Database selected after connecting.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Credentials used for sign-in.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Creates a configuration from environment variables.
    ///
    /// Reads:
    /// - `SURREAL_ADDRESS` — server address (e.g. `http://127.0.0.1:8000`)
    /// - `SURREAL_NAMESPACE`, `SURREAL_DATABASE`
    /// - `SURREAL_USERNAME`, `SURREAL_PASSWORD`
    ///
    /// Returns an error if any variable is missing or empty.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            address: required_env("SURREAL_ADDRESS")?,
            namespace: required_env("SURREAL_NAMESPACE")?,
            database: required_env("SURREAL_DATABASE")?,
            username: required_env("SURREAL_USERNAME")?,
            password: required_env("SURREAL_PASSWORD")?,
        })
    }

    /// WebSocket RPC endpoint derived from [`Self::address`].
    ///
    /// Example: `"https://db.example.com"` → `"wss://db.example.com/rpc"`
    pub fn rpc_url(&self) -> Result<Url> {
        let base = self.parse_address()?;
        let (scheme, default_port) = if is_secure(&base) {
            ("wss", 443)
        } else {
            ("ws", 80)
        };
        let port = base.port().unwrap_or(default_port);
        let host = base
            .host_str()
            .ok_or_else(|| DriverError::Config(format!("address '{}' has no host", self.address)))?;

        Url::parse(&format!("{scheme}://{}:{port}/rpc", bracket_host(host)))
            .map_err(|err| DriverError::Config(format!("invalid rpc url for '{}': {err}", self.address)))
    }

    /// HTTP base url derived from [`Self::address`], without a path.
    pub fn http_url(&self) -> Result<Url> {
        let mut url = self.parse_address()?;
        let scheme = if is_secure(&url) { "https" } else { "http" };
        url.set_scheme(scheme)
            .map_err(|_| DriverError::Config(format!("cannot use '{}' over http", self.address)))?;
        url.set_path("");
        url.set_query(None);
        url.set_fragment(None);
        Ok(url)
    }

    fn parse_address(&self) -> Result<Url> {
        let url = Url::parse(self.address.trim())
            .map_err(|err| DriverError::Config(format!("invalid address '{}': {err}", self.address)))?;
        match url.scheme() {
            "http" | "https" | "ws" | "wss" => Ok(url),
            other => Err(DriverError::Config(format!(
                "unsupported address scheme '{other}'; expected http(s) or ws(s)"
            ))),
        }
    }
}

fn is_secure(url: &Url) -> bool {
    matches!(url.scheme(), "https" | "wss")
}

fn bracket_host(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_owned()
    }
}

fn required_env(name: &str) -> Result<String> {
    let value = std::env::var(name)
        .map_err(|_| DriverError::Config(format!("missing {name} environment variable")))?;
    if value.trim().is_empty() {
        return Err(DriverError::Config(format!("{name} is set but empty")));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::DatabaseConfig;
    use crate::DriverError;

    #[test]
    fn rpc_url_from_plain_http_address() {
        let config = DatabaseConfig::new("http://127.0.0.1:8000");
        assert_eq!(config.rpc_url().expect("must build").as_str(), "ws://127.0.0.1:8000/rpc");
    }

    #[test]
    fn rpc_url_uses_secure_scheme_and_default_port() {
        let config = DatabaseConfig::new("https://db.example.com/some/path");
        assert_eq!(
            config.rpc_url().expect("must build").as_str(),
            "wss://db.example.com/rpc"
        );
    }

    #[test]
    fn http_url_strips_path() {
        let config = DatabaseConfig::new("ws://localhost:8000/rpc");
        assert_eq!(config.http_url().expect("must build").as_str(), "http://localhost:8000/");
    }

    #[test]
    fn rejects_unknown_scheme() {
        let err = DatabaseConfig::new("ftp://host").rpc_url().expect_err("must fail");
        assert!(matches!(err, DriverError::Config(_)));
    }

    #[test]
    fn debug_redacts_password() {
        let config = DatabaseConfig::new("http://h").credentials("root", "hunter2");
        let debug = format!("{config:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("hunter2"));
    }
}
