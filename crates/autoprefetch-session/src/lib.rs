//! Session and opportunistic batch prefetching for autoprefetch.
//!
//! `autoprefetch-session` runs queries through a [`Connection`] and turns
//! their rows into shared model instances. Rows realized together are linked
//! in a weak peer group, and reading a to-one relation on one of them loads
//! that relation for every unresolved peer with a single `IN` query.
//!
//! # Example
//!
//! ```ignore
//! let mut session = Session::new(conn);
//!
//! // 1 query
//! let mut heroes = Hero::objects().all();
//! for hero in unwrap(heroes.fetch_all(&cx, &mut session).await).to_vec() {
//!     // 1 query on the first iteration, none afterwards
//!     let team = Hero::TEAM.get(&cx, &mut session, &hero).await;
//! }
//! ```

pub mod checks;
pub mod descriptor;
pub mod manager;
pub mod n1_detection;
pub mod queryset;

pub use checks::{CheckError, check_model, run_checks};
pub use descriptor::{DescriptorKind, RelatedDescriptor};
pub use manager::{
    AutoPrefetch, DEFAULT_BASE_MANAGER, DEFAULT_MANAGER, Manager, PREFETCH_MANAGER, PREFETCH_META,
};
pub use n1_detection::{CallSite, N1DetectionScope, N1QueryTracker, N1Stats};
pub use queryset::{QuerySet, attach_peers};

use asupersync::{Cx, Outcome};
use autoprefetch_core::{Connection, Dialect, Error, Model, Row, Value};
use std::collections::{HashMap, HashSet};
use std::hash::Hasher;
use std::panic::Location;
use std::sync::Arc;

/// Configuration for Session behavior.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Whether relation reads may batch across peers at all.
    pub prefetch_enabled: bool,
    /// Minimum number of live, unresolved peers (the reading row included)
    /// for a batch to be issued. Never below 2.
    pub min_batch_size: usize,
    /// Enable N+1 tracking with this warning threshold.
    pub n1_threshold: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            prefetch_enabled: true,
            min_batch_size: 2,
            n1_threshold: None,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn batch prefetching on or off.
    #[must_use]
    pub fn prefetch_enabled(mut self, enabled: bool) -> Self {
        self.prefetch_enabled = enabled;
        self
    }

    /// Set the minimum batch size. Values below 2 are raised to 2.
    #[must_use]
    pub fn min_batch_size(mut self, size: usize) -> Self {
        self.min_batch_size = size.max(2);
        self
    }

    #[must_use]
    pub fn n1_threshold(mut self, threshold: usize) -> Self {
        self.n1_threshold = Some(threshold);
        self
    }

    /// The batch threshold actually applied.
    pub fn effective_min_batch_size(&self) -> usize {
        self.min_batch_size.max(2)
    }
}

/// Hash a slice of values as lookup keys.
///
/// Consistent with [`Value::key_eq`], so an `Int` primary key and a `BigInt`
/// foreign key land on the same hash.
fn hash_values(values: &[Value]) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    let mut hasher = DefaultHasher::new();
    for v in values {
        v.hash_key(&mut hasher);
    }
    hasher.finish()
}

fn hash_value(value: &Value) -> u64 {
    hash_values(std::slice::from_ref(value))
}

/// `SELECT * FROM table WHERE column IN ($1, ..., $n)`
fn select_in(dialect: Dialect, table: &str, column: &str, count: usize) -> String {
    format!(
        "SELECT * FROM {} WHERE {} IN ({})",
        dialect.quote_identifier(table),
        dialect.quote_identifier(column),
        dialect.placeholder_list(count)
    )
}

/// `SELECT * FROM table WHERE column = $1`
fn select_eq(dialect: Dialect, table: &str, column: &str) -> String {
    format!(
        "SELECT * FROM {} WHERE {} = {}",
        dialect.quote_identifier(table),
        dialect.quote_identifier(column),
        dialect.placeholder(1)
    )
}

fn missing_column<M: Model, T: Model>(descriptor: &RelatedDescriptor<M, T>) -> Error {
    Error::Config(autoprefetch_core::ConfigError {
        message: format!(
            "relationship {}.{} has no column to match {} rows on",
            M::TABLE_NAME,
            descriptor.field_name(),
            T::TABLE_NAME
        ),
        source: None,
    })
}

/// Build shared instances from rows.
#[allow(clippy::result_large_err)]
fn materialize<M: Model>(rows: &[Row]) -> Result<Vec<Arc<M>>, Error> {
    rows.iter().map(|row| M::from_row(row).map(Arc::new)).collect()
}

/// The query engine the prefetch layer runs through.
///
/// Owns the connection, the prefetch configuration and the optional N+1
/// tracker. Model instances are shared (`Arc`) and never tracked by the
/// session itself; their peer groups keep only weak handles.
pub struct Session<C: Connection> {
    connection: C,
    config: SessionConfig,
    n1_tracker: Option<N1QueryTracker>,
}

impl<C: Connection> Session<C> {
    /// Create a session with the default configuration.
    pub fn new(connection: C) -> Self {
        Self::with_config(connection, SessionConfig::default())
    }

    pub fn with_config(connection: C, config: SessionConfig) -> Self {
        let n1_tracker = config
            .n1_threshold
            .map(|threshold| N1QueryTracker::new().with_threshold(threshold));
        Self {
            connection,
            config,
            n1_tracker,
        }
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Flip the prefetch kill switch at runtime.
    pub fn set_prefetch_enabled(&mut self, enabled: bool) {
        self.config.prefetch_enabled = enabled;
    }

    /// The manager `M`'s internal loads go through.
    ///
    /// Rows fetched to fill a relation are materialized through this manager,
    /// so they are peer-tracked only when it is the prefetch manager.
    pub fn base_manager<M: Model>() -> Manager<M> {
        Manager::<M>::base()
    }

    /// Run `sql` and build one shared `M` per row.
    ///
    /// With `track_peers`, the rows are handed to the materializer hook and
    /// linked in a peer group when there are at least two of them.
    #[tracing::instrument(level = "debug", skip(self, cx, sql, params))]
    pub async fn execute_result_set<M: Model>(
        &mut self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
        track_peers: bool,
    ) -> Outcome<Vec<Arc<M>>, Error> {
        tracing::trace!(sql = %sql, table = M::TABLE_NAME, "Executing result set");

        let rows = match self.connection.query(cx, sql, params).await {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let objects = match materialize::<M>(&rows) {
            Ok(objects) => objects,
            Err(e) => return Outcome::Err(e),
        };

        if track_peers {
            attach_peers(&objects);
        }

        tracing::debug!(rows = objects.len(), track_peers, "Result set realized");
        Outcome::Ok(objects)
    }

    /// Run `sql` and return the raw rows, without building models.
    pub async fn fetch_rows(
        &mut self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> Outcome<Vec<Row>, Error> {
        tracing::trace!(sql = %sql, "Fetching rows");
        self.connection.query(cx, sql, params).await
    }

    /// Build related rows the way the target's base manager would.
    #[allow(clippy::result_large_err)]
    fn materialize_related<T: Model>(rows: &[Row]) -> Result<Vec<Arc<T>>, Error> {
        let objects = materialize::<T>(rows)?;
        if Self::base_manager::<T>().is_prefetch_aware() {
            attach_peers(&objects);
        }
        Ok(objects)
    }

    /// Batch load one relation for a set of rows.
    ///
    /// Rows whose cache is already filled are skipped. The distinct non-null
    /// keys of the rest are fetched with one `IN` query; a row without a key
    /// becomes known-null without being queried. Every remaining row is then
    /// filled, with `None` when no related row matched. Nothing is written
    /// when the query or row conversion fails.
    ///
    /// Returns the number of rows that received a related object.
    #[tracing::instrument(level = "debug", skip(self, cx, rows, descriptor))]
    pub async fn load_relation_for<M: Model, T: Model>(
        &mut self,
        cx: &Cx,
        rows: &[Arc<M>],
        descriptor: &RelatedDescriptor<M, T>,
    ) -> Outcome<usize, Error> {
        let pending: Vec<&Arc<M>> = rows.iter().filter(|r| !descriptor.is_cached(r)).collect();

        let mut keys: Vec<Value> = Vec::new();
        let mut seen: HashSet<u64> = HashSet::new();
        for row in &pending {
            if let Some(key) = descriptor.lookup_key(row) {
                if seen.insert(hash_value(key)) {
                    keys.push(key.clone());
                }
            }
        }

        tracing::debug!(
            model = M::TABLE_NAME,
            relation = descriptor.field_name(),
            peers = pending.len(),
            keys = keys.len(),
            "Planning batch load"
        );

        let mut lookup: HashMap<u64, Arc<T>> = HashMap::new();
        if !keys.is_empty() {
            let Some(column) = descriptor.target_column() else {
                return Outcome::Err(missing_column(descriptor));
            };
            let sql = select_in(self.connection.dialect(), T::TABLE_NAME, column, keys.len());
            tracing::trace!(sql = %sql, "Batch load SQL");

            let fetched = match self.connection.query(cx, &sql, &keys).await {
                Outcome::Ok(rows) => rows,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            let targets = match Self::materialize_related::<T>(&fetched) {
                Ok(targets) => targets,
                Err(e) => return Outcome::Err(e),
            };

            for (row, target) in fetched.iter().zip(targets) {
                if let Some(value) = row.get_by_name(column) {
                    lookup.entry(hash_value(value)).or_insert(target);
                }
            }
            self.record_batch_load(M::TABLE_NAME, descriptor.field_name(), pending.len());
        }

        let mut loaded_count = 0;
        for row in pending {
            let related = descriptor
                .lookup_key(row)
                .and_then(|key| lookup.get(&hash_value(key)).cloned());
            if related.is_some() {
                loaded_count += 1;
            }
            let _ = descriptor.relation(row).set_loaded(related);
        }

        tracing::info!(
            model = M::TABLE_NAME,
            relation = descriptor.field_name(),
            related_model = T::TABLE_NAME,
            loaded_count = loaded_count,
            "Batch load complete"
        );

        Outcome::Ok(loaded_count)
    }

    /// Load one relation for one row.
    ///
    /// A filled cache is returned as is. A row without a key becomes
    /// known-null without a query. The N+1 tracker attributes the query to
    /// the caller of this method.
    #[track_caller]
    pub fn load_relation_single<M: Model, T: Model>(
        &mut self,
        cx: &Cx,
        row: &M,
        descriptor: &RelatedDescriptor<M, T>,
    ) -> impl Future<Output = Outcome<Option<Arc<T>>, Error>> {
        self.load_relation_single_from(cx, row, descriptor, Location::caller())
    }

    #[tracing::instrument(level = "debug", skip(self, cx, row, descriptor, caller))]
    pub(crate) async fn load_relation_single_from<M: Model, T: Model>(
        &mut self,
        cx: &Cx,
        row: &M,
        descriptor: &RelatedDescriptor<M, T>,
        caller: &'static Location<'static>,
    ) -> Outcome<Option<Arc<T>>, Error> {
        if descriptor.is_cached(row) {
            tracing::trace!("Already loaded");
            return descriptor.resolve(row);
        }

        let Some(key) = descriptor.lookup_key(row).cloned() else {
            let _ = descriptor.relation(row).set_loaded(None);
            return descriptor.resolve(row);
        };
        let Some(column) = descriptor.target_column() else {
            return Outcome::Err(missing_column(descriptor));
        };

        let sql = select_eq(self.connection.dialect(), T::TABLE_NAME, column);
        tracing::trace!(sql = %sql, "Single load SQL");
        self.record_lazy_load(M::TABLE_NAME, descriptor.field_name(), caller);

        let fetched = match self.connection.query(cx, &sql, &[key]).await {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let related = match fetched.first().map(T::from_row) {
            Some(Ok(obj)) => Some(Arc::new(obj)),
            Some(Err(e)) => return Outcome::Err(e),
            None => None,
        };

        let _ = descriptor.relation(row).set_loaded(related);
        descriptor.resolve(row)
    }

    // ========================================================================
    // N+1 Query Detection
    // ========================================================================

    /// Enable N+1 tracking with the given warning threshold.
    pub fn enable_n1_detection(&mut self, threshold: usize) {
        self.n1_tracker = Some(N1QueryTracker::new().with_threshold(threshold));
    }

    /// Disable N+1 tracking and drop its counts.
    pub fn disable_n1_detection(&mut self) {
        self.n1_tracker = None;
    }

    #[must_use]
    pub fn n1_detection_enabled(&self) -> bool {
        self.n1_tracker.is_some()
    }

    pub fn n1_tracker(&self) -> Option<&N1QueryTracker> {
        self.n1_tracker.as_ref()
    }

    #[must_use]
    pub fn n1_stats(&self) -> Option<N1Stats> {
        self.n1_tracker.as_ref().map(N1QueryTracker::stats)
    }

    /// Reset N+1 counts (call at the start of a new request).
    pub fn reset_n1_tracking(&mut self) {
        if let Some(tracker) = &mut self.n1_tracker {
            tracker.reset();
        }
    }

    fn record_lazy_load(
        &mut self,
        parent_type: &'static str,
        relationship: &'static str,
        caller: &'static Location<'static>,
    ) {
        if let Some(tracker) = &mut self.n1_tracker {
            tracker.record_load_at(parent_type, relationship, caller);
        }
    }

    fn record_batch_load(&mut self, parent_type: &'static str, relationship: &'static str, rows: usize) {
        if let Some(tracker) = &mut self.n1_tracker {
            tracker.record_batch(parent_type, relationship, rows);
        }
    }
}
