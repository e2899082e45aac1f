//! Opportunistic batch prefetching of to-one relations.
//!
//! Iterating a result set and reading a foreign key or one-to-one relation on
//! every row costs one query per row. With autoprefetch, rows realized by the
//! same query share a weak peer group, and the first relation read on any of
//! them loads that relation for all unresolved peers in one `IN` query.
//!
//! - Rows are never kept alive by their peers: the group only holds weak
//!   handles, and a dropped row simply stops being batched.
//! - Only the first realization of a query set attaches peers, and only when
//!   it produced at least two model instances. Column projections never do.
//! - Cloned and deserialized rows start outside any group.
//!
//! # Quick Start
//!
//! ```ignore
//! use autoprefetch::prelude::*;
//!
//! struct Hero {
//!     id: i64,
//!     team: Related<Team>,
//!     peers: PeerSlot<Hero>,
//! }
//!
//! fn hero_team(hero: &Hero) -> &Related<Team> {
//!     &hero.team
//! }
//!
//! impl Hero {
//!     const TEAM: RelatedDescriptor<Hero, Team> = RelatedDescriptor::forward_many_to_one(
//!         RelationshipInfo::new("team", "teams", RelationshipKind::ManyToOne).local_key("team_id"),
//!         hero_team,
//!     );
//! }
//!
//! impl Model for Hero {
//!     const TABLE_NAME: &'static str = "heroes";
//!     const PRIMARY_KEY: &'static [&'static str] = &["id"];
//!     const META: ModelMeta = ModelMeta::new().inherit(PREFETCH_META);
//!     // to_row / from_row / primary_key_value ...
//!     fn peer_slot(&self) -> Option<&PeerSlot<Self>> {
//!         Some(&self.peers)
//!     }
//! }
//!
//! impl AutoPrefetch for Hero {}
//!
//! async fn list(cx: &Cx, session: &mut Session<impl Connection>) {
//!     let mut heroes = Hero::objects().all();
//!     let heroes = heroes.fetch_all(cx, session).await; // 1 query
//!     // ... Hero::TEAM.get(cx, session, &hero) for each hero: 1 more query in total
//! }
//! ```

pub use autoprefetch_core::{
    ColumnInfo, ConfigError, Connection, ConnectionError, ConnectionErrorKind, Cx, Dialect,
    DoesNotExistError, Error, FromValue, Model, ModelMeta, Outcome, PeerGroup, PeerSlot,
    QueryError, QueryErrorKind, Related, RelationshipInfo, RelationshipKind, Result, Row,
    TypeError, Value, find_relationship,
};
pub use autoprefetch_session::checks;
pub use autoprefetch_session::{
    AutoPrefetch, CallSite, CheckError, DEFAULT_BASE_MANAGER, DEFAULT_MANAGER, DescriptorKind,
    Manager, N1DetectionScope, N1QueryTracker, N1Stats, PREFETCH_MANAGER, PREFETCH_META, QuerySet,
    RelatedDescriptor, Session, SessionConfig, attach_peers, check_model, run_checks,
};

/// Everything needed to declare opted-in models and read through them.
pub mod prelude {
    pub use crate::{
        AutoPrefetch, CheckError, Connection, Cx, Error, Manager, Model, ModelMeta, Outcome,
        PREFETCH_META, PeerSlot, QuerySet, Related, RelatedDescriptor, RelationshipInfo,
        RelationshipKind, Result, Row, Session, SessionConfig, Value,
    };
}
