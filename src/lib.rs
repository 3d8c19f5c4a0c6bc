//! `surrealdb-ws` is an async WebSocket RPC driver for SurrealDB.
//!
//! The crate has three layers that make up one round trip:
//! - [`RpcConnection`] multiplexes concurrent requests over one socket,
//!   correlating replies by id.
//! - [`QueryBuilder`] compiles fluent filters into query text plus a
//!   parameter table.
//! - [`QueryResponse`] unwraps a reply into per-statement rows.
//!
//! [`Database`] ties them together with sign-in, namespace selection and
//! convenience calls.

mod builder;
mod client;
mod config;
mod connection;
mod error;
mod geo;
pub mod grammar;
mod id;
mod options;
mod params;
mod pending;
mod result;
mod segment;
mod thing;
mod wire;

pub use builder::{CompiledQuery, QueryBuilder};
pub use client::Database;
pub use config::DatabaseConfig;
pub use connection::RpcConnection;
pub use error::DriverError;
pub use geo::{GeoDistance, GeoPoint, METERS_TO_MILES};
pub use grammar::GrammarToken;
pub use id::RpcId;
pub use options::ClientOptions;
pub use params::{QueryParameter, Vars};
pub use result::{BatchSummary, QueryResponse, ResultShape, ResultWrapper, StatementResult};
pub use segment::{
    Connector, Operator, OrderDirection, QueryOrder, QueryProjection, QuerySegment, SegmentKind,
    StatementGroup,
};
pub use thing::Thing;
pub use wire::{RpcError, RpcRequest, RpcResponse};

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DriverError>;
