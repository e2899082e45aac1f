//! Managers and the prefetch opt-in.

use crate::checks::{CheckError, check_model};
use crate::queryset::QuerySet;
use autoprefetch_core::{Model, ModelMeta, Value};
use std::fmt;
use std::marker::PhantomData;

/// Name of the peer-tracking manager opted-in models load through.
pub const PREFETCH_MANAGER: &str = "prefetch_manager";

/// Name of the default public manager.
pub const DEFAULT_MANAGER: &str = "objects";

/// Name of the plain manager used when a model names no base manager.
pub const DEFAULT_BASE_MANAGER: &str = "base_manager";

/// Metadata opted-in models inherit from.
///
/// ```ignore
/// const META: ModelMeta = ModelMeta::new().verbose_name("hero").inherit(PREFETCH_META);
/// ```
pub const PREFETCH_META: ModelMeta = ModelMeta::new()
    .abstract_model()
    .base_manager_name(PREFETCH_MANAGER);

/// Entry point for query sets over `M`.
///
/// Query sets from a peer-tracking manager link their rows into a peer group
/// on realization. Peer tracking only has an effect on models that expose a
/// [`PeerSlot`](autoprefetch_core::PeerSlot).
pub struct Manager<M: Model> {
    name: &'static str,
    track_peers: bool,
    _marker: PhantomData<fn() -> M>,
}

impl<M: Model> Manager<M> {
    const fn with(name: &'static str, track_peers: bool) -> Self {
        Self {
            name,
            track_peers,
            _marker: PhantomData,
        }
    }

    /// The public manager. Tracks peers.
    pub const fn objects() -> Self {
        Self::with(DEFAULT_MANAGER, true)
    }

    /// The manager named by [`PREFETCH_MANAGER`]. Tracks peers.
    pub const fn prefetch() -> Self {
        Self::with(PREFETCH_MANAGER, true)
    }

    /// A manager that never tracks peers.
    pub const fn plain(name: &'static str) -> Self {
        Self::with(name, false)
    }

    /// The manager internal loads of `M` go through, per `M::META`.
    pub fn base() -> Self {
        match M::META.base_manager_name {
            Some(PREFETCH_MANAGER) => Self::prefetch(),
            Some(DEFAULT_MANAGER) => Self::objects(),
            Some(name) => Self::plain(name),
            None => Self::plain(DEFAULT_BASE_MANAGER),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether query sets from this manager attach peer groups.
    pub fn is_prefetch_aware(&self) -> bool {
        self.track_peers
    }

    /// All rows.
    pub fn all(&self) -> QuerySet<M> {
        QuerySet::new(*self)
    }

    /// Rows where `column` equals `value`.
    pub fn filter(&self, column: &'static str, value: impl Into<Value>) -> QuerySet<M> {
        self.all().filter(column, value)
    }
}

impl<M: Model> Clone for Manager<M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M: Model> Copy for Manager<M> {}

impl<M: Model> fmt::Debug for Manager<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("model", &M::TABLE_NAME)
            .field("name", &self.name)
            .field("track_peers", &self.track_peers)
            .finish()
    }
}

/// Opt-in to batch prefetching.
///
/// An opted-in model exposes a [`PeerSlot`](autoprefetch_core::PeerSlot)
/// through [`Model::peer_slot`], reads its to-one relations through
/// [`RelatedDescriptor`](crate::RelatedDescriptor)s and inherits
/// [`PREFETCH_META`] so related loads of it are peer-tracked as well.
pub trait AutoPrefetch: Model {
    /// Public manager.
    fn objects() -> Manager<Self> {
        Manager::objects()
    }

    /// Peer-tracking manager used for internal loads.
    fn prefetch_manager() -> Manager<Self> {
        Manager::prefetch()
    }

    /// Configuration problems of this model.
    fn check() -> Vec<CheckError> {
        check_model::<Self>()
    }
}
