//! Relationship metadata and the per-row relation cache.
//!
//! Relationships are static metadata on each `Model`. The prefetch layer only
//! deals with to-one relationships: a forward foreign key (many-to-one), a
//! forward one-to-one, and the reverse side of a one-to-one.

use crate::{Model, Value};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// How two models are linked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RelationshipKind {
    /// `Restaurant` extends exactly one `Place`.
    OneToOne,
    /// Each `Hero` points at one `Team`.
    #[default]
    ManyToOne,
    /// The reverse of `ManyToOne`; never prefetched.
    OneToMany,
    /// Through a link table; never prefetched.
    ManyToMany,
}

impl RelationshipKind {
    /// Whether a row holds at most one related row through this kind.
    pub const fn is_to_one(self) -> bool {
        matches!(self, RelationshipKind::OneToOne | RelationshipKind::ManyToOne)
    }
}

/// Static description of one relation field, declared in `Model::RELATIONSHIPS`.
///
/// ```ignore
/// const TEAM: RelationshipInfo =
///     RelationshipInfo::new("team", "teams", RelationshipKind::ManyToOne).local_key("team_id");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationshipInfo {
    /// Accessor name on the declaring model.
    pub name: &'static str,
    pub related_table: &'static str,
    pub kind: RelationshipKind,
    /// Foreign key column on the declaring model's table, e.g. `team_id`.
    /// To-one relations need it to short-circuit null keys.
    pub local_key: Option<&'static str>,
    /// Column the foreign key references when it is not the related
    /// model's first primary key column.
    pub remote_key: Option<&'static str>,
    /// Accessor name of the reverse side on the related model.
    pub back_populates: Option<&'static str>,
}

impl RelationshipInfo {
    #[must_use]
    pub const fn new(
        name: &'static str,
        related_table: &'static str,
        kind: RelationshipKind,
    ) -> Self {
        Self {
            name,
            related_table,
            kind,
            local_key: None,
            remote_key: None,
            back_populates: None,
        }
    }

    #[must_use]
    pub const fn local_key(mut self, column: &'static str) -> Self {
        self.local_key = Some(column);
        self
    }

    #[must_use]
    pub const fn remote_key(mut self, column: &'static str) -> Self {
        self.remote_key = Some(column);
        self
    }

    #[must_use]
    pub const fn back_populates(mut self, accessor: &'static str) -> Self {
        self.back_populates = Some(accessor);
        self
    }
}

/// Look up a relationship by field name.
pub fn find_relationship<'a>(
    relationships: &'a [RelationshipInfo],
    name: &str,
) -> Option<&'a RelationshipInfo> {
    relationships.iter().find(|r| r.name == name)
}

/// A single related object, cached per row.
///
/// `Related` holds the lookup key (the foreign key value on a forward
/// relation, the owner's primary key on a reverse one) and a set-once cache.
/// The cache has three states:
///
/// - **unresolved**: nothing loaded yet
/// - **resolved**: loaded, holding the related row
/// - **known-null**: loaded, and there is no related row
///
/// A resolved or known-null cache is never overwritten; only [`Related::reset`]
/// clears it.
pub struct Related<T: Model> {
    key: Option<Value>,
    loaded: OnceLock<Option<Arc<T>>>,
}

impl<T: Model> Related<T> {
    /// An unresolved relation with no key.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            key: None,
            loaded: OnceLock::new(),
        }
    }

    /// A forward relation keyed by a foreign key value.
    ///
    /// A `Value::Null` key is treated as absent.
    #[must_use]
    pub fn from_fk(fk: impl Into<Value>) -> Self {
        let fk = fk.into();
        Self {
            key: (!fk.is_null()).then_some(fk),
            loaded: OnceLock::new(),
        }
    }

    /// A reverse relation keyed by the owning row's primary key.
    #[must_use]
    pub fn reverse(owner_pk: impl Into<Value>) -> Self {
        Self::from_fk(owner_pk)
    }

    /// The cached related row, if resolved.
    #[must_use]
    pub fn get(&self) -> Option<&Arc<T>> {
        self.loaded.get().and_then(|o| o.as_ref())
    }

    /// The raw cache state: `None` when unresolved.
    #[must_use]
    pub fn cached(&self) -> Option<&Option<Arc<T>>> {
        self.loaded.get()
    }

    /// Resolved or known-null.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.loaded.get().is_some()
    }

    /// No lookup key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.key.is_none()
    }

    #[must_use]
    pub fn key(&self) -> Option<&Value> {
        self.key.as_ref()
    }

    /// Fill the cache. Fails, handing the value back, if it was already set.
    pub fn set_loaded(&self, obj: Option<Arc<T>>) -> Result<(), Option<Arc<T>>> {
        self.loaded.set(obj)
    }

    /// Return the cache to the unresolved state.
    pub fn reset(&mut self) {
        self.loaded.take();
    }
}

impl<T: Model> Default for Related<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: Model> Clone for Related<T> {
    fn clone(&self) -> Self {
        let cloned = Self {
            key: self.key.clone(),
            loaded: OnceLock::new(),
        };
        if let Some(value) = self.loaded.get() {
            let _ = cloned.loaded.set(value.clone());
        }
        cloned
    }
}

impl<T: Model + fmt::Debug> fmt::Debug for Related<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.loaded.get() {
            Some(Some(_)) => "resolved",
            Some(None) => "known-null",
            None => "unresolved",
        };
        f.debug_struct("Related")
            .field("state", &state)
            .field("key", &self.key)
            .field("loaded", &self.get())
            .finish()
    }
}

#[derive(Serialize)]
struct RelatedRef<'a, T> {
    key: &'a Option<Value>,
    cache: CacheRef<'a, T>,
}

#[derive(Serialize)]
enum CacheRef<'a, T> {
    Unresolved,
    Null,
    Resolved(&'a T),
}

#[derive(Deserialize)]
struct RelatedOwned<T> {
    key: Option<Value>,
    cache: CacheOwned<T>,
}

#[derive(Deserialize)]
enum CacheOwned<T> {
    Unresolved,
    Null,
    Resolved(T),
}

impl<T> Serialize for Related<T>
where
    T: Model + Serialize,
{
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let cache = match self.loaded.get() {
            None => CacheRef::Unresolved,
            Some(None) => CacheRef::Null,
            Some(Some(obj)) => CacheRef::Resolved(obj.as_ref()),
        };
        RelatedRef {
            key: &self.key,
            cache,
        }
        .serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for Related<T>
where
    T: Model + Deserialize<'de>,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = RelatedOwned::<T>::deserialize(deserializer)?;
        let related = Self {
            key: repr.key,
            loaded: OnceLock::new(),
        };
        match repr.cache {
            CacheOwned::Unresolved => {}
            CacheOwned::Null => {
                let _ = related.loaded.set(None);
            }
            CacheOwned::Resolved(obj) => {
                let _ = related.loaded.set(Some(Arc::new(obj)));
            }
        }
        Ok(related)
    }
}
