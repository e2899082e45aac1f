//! Error types for data access and relation loading.

use crate::value::Value;
use std::fmt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Everything a read through the prefetch layer can fail with.
///
/// Engine failures (`Connection`, `Query`, `Type`) pass through the batch
/// and single-row paths untouched. `DoesNotExist` is produced by the layer
/// itself, and only for the row whose relation was read.
#[derive(Debug)]
pub enum Error {
    Connection(ConnectionError),
    Query(QueryError),
    /// A column value did not convert to the requested Rust type
    Type(TypeError),
    /// A model or relationship is declared in a way the layer cannot use
    Config(ConfigError),
    /// A to-one relation has no matching related row
    DoesNotExist(DoesNotExistError),
    Serde(String),
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<BoxError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    Connect,
    Refused,
    /// Lost while a statement was in flight
    Disconnected,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub sqlstate: Option<String>,
    pub message: String,
    pub source: Option<BoxError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    Syntax,
    /// Unknown table or column
    NotFound,
    Deadlock,
    /// Serialization failure; the statement may succeed when re-run
    Serialization,
    Timeout,
    Database,
}

impl QueryError {
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            sql: None,
            sqlstate: None,
            message: message.into(),
            source: None,
        }
    }

    #[must_use]
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<BoxError>,
}

/// A relation was dereferenced but no related row exists.
///
/// Raised for a forward relation whose foreign key is set but points at a
/// missing row, and for a reverse one-to-one with no row pointing back.
#[derive(Debug, Clone)]
pub struct DoesNotExistError {
    /// Table of the model the relation was read from.
    pub model: &'static str,
    /// Name the relation is accessed by.
    pub relationship: &'static str,
    /// The lookup key that found nothing, if any.
    pub key: Option<Value>,
}

impl Error {
    /// Whether re-running the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Query(q) => matches!(
                q.kind,
                QueryErrorKind::Deadlock | QueryErrorKind::Serialization | QueryErrorKind::Timeout
            ),
            Error::Connection(c) => c.kind == ConnectionErrorKind::Disconnected,
            _ => false,
        }
    }

    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Is this a missing related row?
    pub fn is_does_not_exist(&self) -> bool {
        matches!(self, Error::DoesNotExist(_))
    }

    /// The statement that failed, for query errors that carry it.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }
}

fn source_of(source: &Option<BoxError>) -> Option<&(dyn std::error::Error + 'static)> {
    source
        .as_deref()
        .map(|err| err as &(dyn std::error::Error + 'static))
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "connection failed: {e}"),
            Error::Query(e) => write!(f, "query failed: {e}"),
            Error::Type(e) => write!(f, "conversion failed: {e}"),
            Error::Config(e) => write!(f, "invalid configuration: {e}"),
            Error::DoesNotExist(e) => fmt::Display::fmt(e, f),
            Error::Serde(msg) => write!(f, "serialization failed: {msg}"),
            Error::Custom(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => source_of(&e.source),
            Error::Query(e) => source_of(&e.source),
            Error::Config(e) => source_of(&e.source),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, " [SQLSTATE {sqlstate}]")?;
        }
        Ok(())
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.column {
            Some(column) => write!(
                f,
                "column '{column}' holds {}, expected {}",
                self.actual, self.expected
            ),
            None => write!(f, "got {}, expected {}", self.actual, self.expected),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl fmt::Display for DoesNotExistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(
                f,
                "{}.{} matching key {:?} does not exist",
                self.model, self.relationship, key
            ),
            None => write!(f, "{}.{} does not exist", self.model, self.relationship),
        }
    }
}

macro_rules! impl_from {
    ($($source:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$source> for Error {
                fn from(err: $source) -> Self {
                    Error::$variant(err)
                }
            }
        )*
    };
}

impl_from! {
    ConnectionError => Connection,
    QueryError => Query,
    TypeError => Type,
    ConfigError => Config,
    DoesNotExistError => DoesNotExist,
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
