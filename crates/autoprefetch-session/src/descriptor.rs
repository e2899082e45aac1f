//! Relation descriptors: the read interception point.
//!
//! A [`RelatedDescriptor`] knows how to reach one to-one relation on a model.
//! Reading through it decides between a batch load over the row's peers and
//! a plain single-row load.
//!
//! ```ignore
//! impl Hero {
//!     pub const TEAM: RelatedDescriptor<Hero, Team> =
//!         RelatedDescriptor::forward_many_to_one(TEAM_FIELD, hero_team);
//! }
//!
//! let team = Hero::TEAM.get(&cx, &mut session, &hero).await;
//! ```

use crate::Session;
use crate::queryset::has_peers;
use asupersync::{Cx, Outcome};
use autoprefetch_core::{
    Connection, DoesNotExistError, Error, Model, PeerSlot, Related, RelationshipInfo, Value,
};
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// The closed set of to-one relation shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    /// The row holds a foreign key to many-to-one target.
    ForwardManyToOne,
    /// The row holds a unique foreign key to its target.
    ForwardOneToOne,
    /// The target holds a unique foreign key back to the row.
    ReverseOneToOne,
}

impl DescriptorKind {
    pub const fn is_forward(self) -> bool {
        matches!(
            self,
            DescriptorKind::ForwardManyToOne | DescriptorKind::ForwardOneToOne
        )
    }
}

/// Access path from a row of `M` to its related `T`.
///
/// For forward kinds `field` is the relationship declared on `M`. For
/// [`DescriptorKind::ReverseOneToOne`] it is the forward field declared on
/// `T`, whose `local_key` is the column pointing back at `M`.
pub struct RelatedDescriptor<M: Model, T: Model> {
    kind: DescriptorKind,
    field: RelationshipInfo,
    cache: fn(&M) -> &Related<T>,
}

impl<M: Model, T: Model> Clone for RelatedDescriptor<M, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M: Model, T: Model> Copy for RelatedDescriptor<M, T> {}

impl<M: Model, T: Model> fmt::Debug for RelatedDescriptor<M, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelatedDescriptor")
            .field("model", &M::TABLE_NAME)
            .field("kind", &self.kind)
            .field("field", &self.field.name)
            .field("related", &T::TABLE_NAME)
            .finish()
    }
}

impl<M: Model, T: Model> RelatedDescriptor<M, T> {
    pub const fn forward_many_to_one(field: RelationshipInfo, cache: fn(&M) -> &Related<T>) -> Self {
        Self {
            kind: DescriptorKind::ForwardManyToOne,
            field,
            cache,
        }
    }

    pub const fn forward_one_to_one(field: RelationshipInfo, cache: fn(&M) -> &Related<T>) -> Self {
        Self {
            kind: DescriptorKind::ForwardOneToOne,
            field,
            cache,
        }
    }

    /// The reverse side of a one-to-one declared on `T`.
    pub const fn reverse_one_to_one(
        related_field: RelationshipInfo,
        cache: fn(&M) -> &Related<T>,
    ) -> Self {
        Self {
            kind: DescriptorKind::ReverseOneToOne,
            field: related_field,
            cache,
        }
    }

    pub fn kind(&self) -> DescriptorKind {
        self.kind
    }

    pub fn field(&self) -> &RelationshipInfo {
        &self.field
    }

    /// Name the relation is read by on `M`.
    pub fn field_name(&self) -> &'static str {
        if self.kind.is_forward() {
            self.field.name
        } else {
            self.field.back_populates.unwrap_or(T::TABLE_NAME)
        }
    }

    /// The row's cache for this relation.
    pub fn relation<'a>(&self, row: &'a M) -> &'a Related<T> {
        (self.cache)(row)
    }

    pub fn is_cached(&self, row: &M) -> bool {
        self.relation(row).is_loaded()
    }

    /// Whether the forward key is null. A reverse relation is never null.
    pub fn is_null(&self, row: &M) -> bool {
        self.kind.is_forward() && self.relation(row).is_empty()
    }

    /// Value matched against [`Self::target_column`] on `T`.
    pub fn lookup_key<'a>(&self, row: &'a M) -> Option<&'a Value> {
        self.relation(row).key()
    }

    /// Column of `T` that lookup keys are matched on.
    pub fn target_column(&self) -> Option<&'static str> {
        if self.kind.is_forward() {
            self.field
                .remote_key
                .or_else(|| T::PRIMARY_KEY.first().copied())
        } else {
            self.field.local_key
        }
    }

    /// Whether a read on `row` may batch across its peers.
    ///
    /// `None` stands for access without an instance and never batches.
    pub fn should_prefetch(&self, row: Option<&M>) -> bool {
        let Some(row) = row else {
            return false;
        };
        if self.is_cached(row) || self.is_null(row) {
            return false;
        }
        has_peers(row)
    }

    /// The live peers of `row` whose cache is still empty, `row` included.
    ///
    /// `None` unless the read is eligible and at least `min_batch_size`
    /// rows would be filled.
    pub fn prefetch_targets(&self, row: &M, min_batch_size: usize) -> Option<Vec<Arc<M>>> {
        if !self.should_prefetch(Some(row)) {
            return None;
        }
        let group = row.peer_slot().and_then(PeerSlot::get)?;
        let targets = group.living_peers_excluding(|peer| self.is_cached(peer));
        (targets.len() >= min_batch_size.max(2)).then_some(targets)
    }

    /// Read the relation on `row`.
    ///
    /// A filled cache answers without a query. Otherwise, when the row has
    /// enough unresolved peers, one batch query fills all of them; failing
    /// that, only this row is loaded.
    #[track_caller]
    pub fn get<C: Connection>(
        &self,
        cx: &Cx,
        session: &mut Session<C>,
        row: &M,
    ) -> impl Future<Output = Outcome<Option<Arc<T>>, Error>> {
        self.get_from(cx, session, row, Location::caller())
    }

    async fn get_from<C: Connection>(
        &self,
        cx: &Cx,
        session: &mut Session<C>,
        row: &M,
        caller: &'static Location<'static>,
    ) -> Outcome<Option<Arc<T>>, Error> {
        if self.is_cached(row) {
            return self.resolve(row);
        }

        if session.config().prefetch_enabled {
            let min = session.config().effective_min_batch_size();
            if let Some(targets) = self.prefetch_targets(row, min) {
                tracing::debug!(
                    model = M::TABLE_NAME,
                    relation = self.field_name(),
                    peers = targets.len(),
                    "Prefetching relation for peers"
                );
                match session.load_relation_for(cx, &targets, self).await {
                    Outcome::Ok(_) => {}
                    Outcome::Err(e) => return Outcome::Err(e),
                    Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                    Outcome::Panicked(p) => return Outcome::Panicked(p),
                }
                if self.is_cached(row) {
                    return self.resolve(row);
                }
            }
        }

        session
            .load_relation_single_from(cx, row, self, caller)
            .await
    }

    /// Answer from a filled cache.
    ///
    /// A known-null forward relation without a key reads as `None`; any
    /// other known-null state means the related row does not exist.
    pub fn resolve(&self, row: &M) -> Outcome<Option<Arc<T>>, Error> {
        let relation = self.relation(row);
        match relation.cached() {
            Some(Some(obj)) => Outcome::Ok(Some(Arc::clone(obj))),
            Some(None) if self.is_null(row) => Outcome::Ok(None),
            Some(None) => Outcome::Err(Error::DoesNotExist(DoesNotExistError {
                model: M::TABLE_NAME,
                relationship: self.field_name(),
                key: relation.key().cloned(),
            })),
            None => Outcome::Err(Error::Custom(format!(
                "{}.{} has not been loaded",
                M::TABLE_NAME,
                self.field_name()
            ))),
        }
    }
}
