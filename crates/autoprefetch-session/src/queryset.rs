//! Result-set realization and peer attachment.

use crate::Session;
use crate::manager::Manager;
use asupersync::{Cx, Outcome};
use autoprefetch_core::{Connection, Dialect, Error, Model, PeerGroup, PeerSlot, Row, Value};
use std::fmt;
use std::sync::Arc;

/// Link freshly materialized rows into one peer group.
///
/// Does nothing for fewer than two rows or for models without a peer slot.
/// Returns whether any row took the new group; a row that already
/// belongs to a group keeps it.
pub fn attach_peers<M: Model>(rows: &[Arc<M>]) -> bool {
    if rows.first().and_then(|row| row.peer_slot()).is_none() {
        return false;
    }
    let Some(group) = PeerGroup::build(rows) else {
        return false;
    };
    let attached = rows
        .iter()
        .filter(|row| {
            row.peer_slot()
                .is_some_and(|slot| slot.attach(Arc::clone(&group)))
        })
        .count();
    tracing::debug!(
        table = M::TABLE_NAME,
        peers = group.capacity(),
        attached,
        "Attached peer group"
    );
    attached > 0
}

/// A lazily realized `SELECT` over `M`.
///
/// The first [`QuerySet::fetch_all`] runs the query and caches the rows;
/// later calls return the cache. Peers are attached on that first
/// realization only, and only for entity results: [`QuerySet::values`]
/// never groups anything.
pub struct QuerySet<M: Model> {
    manager: Manager<M>,
    filters: Vec<(&'static str, Value)>,
    result_cache: Option<Vec<Arc<M>>>,
}

impl<M: Model> QuerySet<M> {
    pub fn new(manager: Manager<M>) -> Self {
        Self {
            manager,
            filters: Vec::new(),
            result_cache: None,
        }
    }

    /// Add an equality filter. Filters are AND-ed.
    #[must_use]
    pub fn filter(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.filters.push((column, value.into()));
        self
    }

    pub fn manager(&self) -> &Manager<M> {
        &self.manager
    }

    /// Build the SELECT SQL and parameters with default dialect (Postgres).
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        self.to_sql_with_dialect(Dialect::default())
    }

    pub fn to_sql_with_dialect(&self, dialect: Dialect) -> (String, Vec<Value>) {
        self.render(dialect, None)
    }

    fn render(&self, dialect: Dialect, columns: Option<&[&str]>) -> (String, Vec<Value>) {
        let projection = match columns {
            Some(cols) if !cols.is_empty() => cols
                .iter()
                .map(|c| dialect.quote_identifier(c))
                .collect::<Vec<_>>()
                .join(", "),
            _ => "*".to_string(),
        };
        let mut sql = format!(
            "SELECT {} FROM {}",
            projection,
            dialect.quote_identifier(M::TABLE_NAME)
        );
        let mut params = Vec::with_capacity(self.filters.len());
        if !self.filters.is_empty() {
            let conditions: Vec<String> = self
                .filters
                .iter()
                .enumerate()
                .map(|(i, (column, _))| {
                    format!(
                        "{} = {}",
                        dialect.quote_identifier(column),
                        dialect.placeholder(i + 1)
                    )
                })
                .collect();
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
            params.extend(self.filters.iter().map(|(_, value)| value.clone()));
        }
        (sql, params)
    }

    /// Realize the query set.
    #[tracing::instrument(level = "debug", skip(self, cx, session), fields(table = M::TABLE_NAME))]
    pub async fn fetch_all<C: Connection>(
        &mut self,
        cx: &Cx,
        session: &mut Session<C>,
    ) -> Outcome<&[Arc<M>], Error> {
        if self.result_cache.is_none() {
            let (sql, params) = self.to_sql_with_dialect(session.connection().dialect());
            let track_peers = self.manager.is_prefetch_aware();
            let rows = match session
                .execute_result_set::<M>(cx, &sql, &params, track_peers)
                .await
            {
                Outcome::Ok(rows) => rows,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            self.result_cache = Some(rows);
        } else {
            tracing::trace!("Using cached results");
        }
        Outcome::Ok(self.result_cache.as_deref().unwrap_or(&[]))
    }

    /// The realized rows, if [`QuerySet::fetch_all`] ran.
    pub fn result_cache(&self) -> Option<&[Arc<M>]> {
        self.result_cache.as_deref()
    }

    pub fn is_realized(&self) -> bool {
        self.result_cache.is_some()
    }

    /// Number of realized rows (0 before realization).
    pub fn len(&self) -> usize {
        self.result_cache.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch raw column projections instead of model instances.
    ///
    /// An empty `columns` list selects every column.
    pub async fn values<C: Connection>(
        &self,
        cx: &Cx,
        session: &mut Session<C>,
        columns: &[&str],
    ) -> Outcome<Vec<Row>, Error> {
        let (sql, params) = self.render(session.connection().dialect(), Some(columns));
        session.fetch_rows(cx, &sql, &params).await
    }
}

impl<M: Model> fmt::Debug for QuerySet<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySet")
            .field("table", &M::TABLE_NAME)
            .field("manager", &self.manager.name())
            .field("filters", &self.filters)
            .field("realized", &self.len())
            .finish()
    }
}

/// Whether `row` shares a group with at least one other live row.
pub fn has_peers<M: Model>(row: &M) -> bool {
    row.peer_slot()
        .and_then(PeerSlot::get)
        .is_some_and(|group| group.len() >= 2)
}
