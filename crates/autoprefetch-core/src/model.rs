//! Model trait for struct-to-table mapping.
//!
//! A `Model` describes its table, its to-one relationships and, when it takes
//! part in batch prefetching, the [`PeerSlot`] that links it to the other rows
//! materialized by the same query.

use crate::Result;
use crate::peers::PeerSlot;
use crate::relationship::RelationshipInfo;
use crate::row::Row;
use crate::value::Value;

/// Model-level options that behave like inherited class metadata.
///
/// Fields left unset are filled from a parent with [`ModelMeta::inherit`];
/// the first parent to set a field wins. `abstract_model` is never
/// inherited, so concrete models built from an abstract base stay concrete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModelMeta {
    /// Abstract metadata only exists to be inherited from.
    pub abstract_model: bool,
    /// Name of the manager used for internal loads of this model.
    pub base_manager_name: Option<&'static str>,
    /// Human-readable name used in diagnostics.
    pub verbose_name: Option<&'static str>,
}

impl ModelMeta {
    /// Empty metadata: concrete, no base manager override, no verbose name.
    pub const fn new() -> Self {
        Self {
            abstract_model: false,
            base_manager_name: None,
            verbose_name: None,
        }
    }

    #[must_use]
    pub const fn abstract_model(mut self) -> Self {
        self.abstract_model = true;
        self
    }

    #[must_use]
    pub const fn base_manager_name(mut self, name: &'static str) -> Self {
        self.base_manager_name = Some(name);
        self
    }

    #[must_use]
    pub const fn verbose_name(mut self, name: &'static str) -> Self {
        self.verbose_name = Some(name);
        self
    }

    /// Fill every unset field from `parent`.
    #[must_use]
    pub const fn inherit(mut self, parent: ModelMeta) -> Self {
        if self.base_manager_name.is_none() {
            self.base_manager_name = parent.base_manager_name;
        }
        if self.verbose_name.is_none() {
            self.verbose_name = parent.verbose_name;
        }
        self
    }
}

/// Trait for types that can be mapped to database tables.
///
/// # Example
///
/// ```ignore
/// struct Hero {
///     id: i64,
///     team: Related<Team>,
///     peers: PeerSlot<Hero>,
/// }
///
/// impl Model for Hero {
///     const TABLE_NAME: &'static str = "heroes";
///     const PRIMARY_KEY: &'static [&'static str] = &["id"];
///     const META: ModelMeta = ModelMeta::new().inherit(PREFETCH_META);
///     // ...
///     fn peer_slot(&self) -> Option<&PeerSlot<Self>> {
///         Some(&self.peers)
///     }
/// }
/// ```
pub trait Model: Sized + Send + Sync + 'static {
    /// The name of the database table.
    const TABLE_NAME: &'static str;

    /// The primary key column name(s).
    const PRIMARY_KEY: &'static [&'static str];

    /// To-one relationships declared on this model.
    const RELATIONSHIPS: &'static [RelationshipInfo] = &[];

    /// Model metadata.
    const META: ModelMeta = ModelMeta::new();

    /// Convert this model instance to a row of values.
    fn to_row(&self) -> Vec<(&'static str, Value)>;

    /// Construct a model instance from a database row.
    #[allow(clippy::result_large_err)]
    fn from_row(row: &Row) -> Result<Self>;

    /// Get the value of the primary key field(s).
    fn primary_key_value(&self) -> Vec<Value>;

    /// Check if this is a new record (primary key is None/default).
    fn is_new(&self) -> bool {
        self.primary_key_value().iter().all(Value::is_null)
    }

    /// The peer back-reference of this row.
    ///
    /// Models that keep the default `None` are never grouped and every
    /// relation read on them costs its own query.
    fn peer_slot(&self) -> Option<&PeerSlot<Self>> {
        None
    }
}
