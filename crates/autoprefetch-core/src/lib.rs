//! Core types and traits for autoprefetch.
//!
//! This crate provides the primitives the prefetch layer is built on:
//!
//! - `Model` trait and `ModelMeta` for struct-to-table mapping
//! - `Related<T>` per-row relation caches and relationship metadata
//! - `PeerGroup` / `PeerSlot`, the weak grouping of rows from one result set
//! - `Connection` trait for database connections
//! - `Outcome` and `Cx` re-exported from asupersync for cancel-correct operations

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod connection;
pub mod error;
pub mod model;
pub mod peers;
pub mod relationship;
pub mod row;
pub mod value;

pub use connection::{Connection, Dialect};
pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, DoesNotExistError, Error, QueryError,
    QueryErrorKind, Result, TypeError,
};
pub use model::{Model, ModelMeta};
pub use peers::{PeerGroup, PeerSlot};
pub use relationship::{Related, RelationshipInfo, RelationshipKind, find_relationship};
pub use row::{ColumnInfo, FromValue, Row};
pub use value::Value;
