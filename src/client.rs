use std::fmt;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value as JsonValue};

use crate::{
    ClientOptions, DatabaseConfig, DriverError, QueryBuilder, QueryResponse, Result,
    ResultWrapper, RpcConnection, RpcRequest, Thing, Vars,
};

/// Connected database session on top of one [`RpcConnection`].
pub struct Database {
    connection: RpcConnection,
    http: reqwest::Client,
    config: DatabaseConfig,
    options: ClientOptions,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.config)
            .field("connection", &self.connection)
            .finish()
    }
}

impl Database {
    /// Opens the RPC connection, signs in and selects the namespace and
    /// database from `config`.
    ///
    /// Sign-in is skipped when no username is configured, `use` when the
    /// namespace or database is empty.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use surrealdb_ws::{ClientOptions, Database, DatabaseConfig};
    ///
    /// # async fn run() -> surrealdb_ws::Result<()> {
    /// let config = DatabaseConfig::new("http://127.0.0.1:8000")
    ///     .namespace("test")
    ///     .database("test")
    ///     .credentials("root", "root");
    /// let db = Database::connect(config, ClientOptions::default()).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(config: DatabaseConfig, options: ClientOptions) -> Result<Self> {
        let url = config.rpc_url()?;
        let connection = RpcConnection::open(url.as_str(), options.clone()).await?;
        let db = Self::from_connection(connection, config, options);

        if !db.config.username.is_empty() {
            db.signin(&db.config.username, &db.config.password).await?;
        }
        if !db.config.namespace.is_empty() && !db.config.database.is_empty() {
            db.use_ns(&db.config.namespace, &db.config.database).await?;
        }

        Ok(db)
    }

    /// Wraps an open connection without sending anything.
    pub fn from_connection(
        connection: RpcConnection,
        config: DatabaseConfig,
        options: ClientOptions,
    ) -> Self {
        Self {
            connection,
            http: reqwest::Client::new(),
            config,
            options,
        }
    }

    /// Connects using [`DatabaseConfig::from_env`].
    pub async fn from_env() -> Result<Self> {
        Self::connect(DatabaseConfig::from_env()?, ClientOptions::default()).await
    }

    /// Underlying RPC connection.
    pub fn connection(&self) -> &RpcConnection {
        &self.connection
    }

    /// Configuration the session was opened with.
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Signs in with root or namespace credentials.
    pub async fn signin(&self, username: &str, password: &str) -> Result<()> {
        let request = RpcRequest::new("signin", vec![json!({"user": username, "pass": password})]);
        self.connection.send(request).await?.check()?;

        #[cfg(feature = "tracing")]
        tracing::debug!(username, "signed in");
        Ok(())
    }

    /// Selects the namespace and database for later calls.
    pub async fn use_ns(&self, namespace: &str, database: &str) -> Result<()> {
        let request = RpcRequest::new("use", vec![json!(namespace), json!(database)]);
        self.connection.send(request).await?.check()?;

        #[cfg(feature = "tracing")]
        tracing::debug!(namespace, database, "namespace and database selected");
        Ok(())
    }

    /// Runs query text with named parameters.
    ///
    /// A server-reported error is kept inside the returned response; its
    /// accessors surface it as [`DriverError::Rpc`].
    pub async fn query<T: DeserializeOwned>(
        &self,
        text: &str,
        vars: impl Into<Vars>,
    ) -> Result<QueryResponse<T>> {
        let request = RpcRequest::query(text, vars.into().into_map()?);
        let response = self.connection.send(request).await?;
        Ok(QueryResponse::new(response))
    }

    /// Sends several statements as one batch. Use
    /// [`QueryResponse::nth_statement`] to pick one statement's rows.
    pub async fn query_batch<T, I, S>(
        &self,
        statements: I,
        vars: impl Into<Vars>,
    ) -> Result<QueryResponse<T>>
    where
        T: DeserializeOwned,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.query(&join_statements(statements), vars).await
    }

    /// Compiles and runs a builder query. A server error is returned as
    /// [`DriverError::Rpc`].
    pub async fn run<T: DeserializeOwned>(&self, query: &QueryBuilder) -> Result<QueryResponse<T>> {
        let compiled = query.build()?;

        #[cfg(feature = "tracing")]
        tracing::debug!(text = %compiled.text, params = compiled.vars.len(), "running compiled query");

        let response = self.query::<T>(&compiled.text, compiled.vars).await?;
        response.response().check()?;
        Ok(response)
    }

    /// Every row matched by `query`.
    pub async fn get<T: DeserializeOwned>(&self, query: &QueryBuilder) -> Result<Vec<T>> {
        self.run(query).await?.into_all()
    }

    /// First row matched by `query`.
    pub async fn first<T: DeserializeOwned>(&self, query: &QueryBuilder) -> Result<Option<T>> {
        Ok(self.get(query).await?.into_iter().next())
    }

    /// Creates a record in a table (random id) or at a specific record id.
    ///
    /// The reply is decoded into rows of `T` on the receive loop.
    pub async fn create<T, D>(&self, target: impl Into<Thing>, data: &D) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send + 'static,
        D: Serialize + ?Sized,
    {
        let target = JsonValue::from(target.into());
        let request = RpcRequest::new("create", vec![target, to_json(data)?]);
        self.connection
            .send_decoded(request, |response| {
                ResultWrapper::from_value(response.into_result()?).map(ResultWrapper::into_items)
            })
            .await
    }

    /// `INSERT INTO <table> $data`; `data` may be one object or an array.
    pub async fn insert<T, D>(&self, table: &str, data: &D) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
        D: Serialize + ?Sized,
    {
        let text = format!("INSERT INTO {table} $data");
        let response = self
            .query::<T>(&text, Vars::named([("data", to_json(data)?)]))
            .await?;
        response.response().check()?;
        response.into_all()
    }

    /// Checks `GET /health` on the server's HTTP endpoint.
    pub async fn health(&self) -> Result<()> {
        let url = self
            .config
            .http_url()?
            .join("health")
            .map_err(|err| DriverError::Config(format!("invalid health url: {err}")))?;

        let response = self
            .http
            .get(url)
            .timeout(Duration::from_millis(self.options.timeout_ms))
            .send()
            .await
            .map_err(|err| DriverError::Transport(format!("health check failed: {err}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response
            .text()
            .await
            .map_err(|err| DriverError::Transport(format!("health check failed: {err}")))?;
        Err(DriverError::Http {
            status: status.as_u16(),
            body,
        })
    }

    /// Closes the connection, cancelling in-flight operations.
    pub async fn close(&self) {
        self.connection.close().await;
    }

    /// True while the RPC connection is open.
    pub fn is_connected(&self) -> bool {
        self.connection.is_open()
    }
}

fn to_json<D: Serialize + ?Sized>(data: &D) -> Result<JsonValue> {
    serde_json::to_value(data)
        .map_err(|err| DriverError::Protocol(format!("cannot encode record data: {err}")))
}

/// Joins statements into one batch text, terminating each with `;`.
fn join_statements<I, S>(statements: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    statements
        .into_iter()
        .map(|statement| {
            let statement = statement.as_ref().trim();
            if statement.ends_with(';') {
                statement.to_owned()
            } else {
                format!("{statement};")
            }
        })
        .filter(|statement| statement != ";")
        .collect::<Vec<_>>()
        .join(" ")
}
