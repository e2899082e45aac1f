//! The query engine seen from the prefetch layer.
//!
//! Batches and single-row loads are plain SELECTs sent through
//! [`Connection::query`]. Every call threads an asupersync `Cx` and answers
//! with an `Outcome`, so cancellation and panics reach the caller the same
//! way errors do.

use crate::row::Row;
use crate::value::Value;
use asupersync::{Cx, Outcome};

/// Placeholder and quoting rules for generated SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// `$1`, `"ident"`
    #[default]
    Postgres,
    /// `?1`, `"ident"`
    Sqlite,
    /// `?`, `` `ident` ``
    Mysql,
}

impl Dialect {
    /// Bind marker for the `n`th parameter, counting from 1.
    pub fn placeholder(self, n: usize) -> String {
        match self {
            Dialect::Postgres => format!("${n}"),
            Dialect::Sqlite => format!("?{n}"),
            Dialect::Mysql => String::from("?"),
        }
    }

    /// `count` bind markers separated by commas, as used in an `IN` list.
    pub fn placeholder_list(self, count: usize) -> String {
        (1..=count)
            .map(|n| self.placeholder(n))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Quote a table or column name.
    pub fn quote_identifier(self, name: &str) -> String {
        let quote = match self {
            Dialect::Postgres | Dialect::Sqlite => '"',
            Dialect::Mysql => '`',
        };
        let escaped = name.replace(quote, &format!("{quote}{quote}"));
        format!("{quote}{escaped}{quote}")
    }
}

/// A live connection to the query engine.
///
/// Implementations own pooling, retries and type mapping. The prefetch
/// layer only ever reads, so a SELECT is all it asks for.
pub trait Connection: Send + Sync {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    /// Run a SELECT and collect its rows.
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, crate::Error>> + Send;
}
