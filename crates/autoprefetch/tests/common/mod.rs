//! Shared fixtures for the integration tests.
//!
//! `MockConnection` is a tiny in-memory table store that understands exactly
//! the SQL the session renders: `SELECT * | "a", "b" FROM "t"` with an
//! optional `WHERE` of `"c" = $n` / `"c" IN ($n, ...)` terms joined by `AND`.
//! Every query is counted, which is what the tests assert on.

#![allow(dead_code)]

use asupersync::runtime::RuntimeBuilder;
use asupersync::{Cx, Outcome};
use autoprefetch::prelude::*;
use autoprefetch::{QueryError, QueryErrorKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Drive one test body on a fresh current-thread runtime.
pub fn block_on(test: impl Future<Output = ()>) {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    rt.block_on(test);
}

pub fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

pub fn expect_err<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> Error {
    match outcome {
        Outcome::Err(e) => e,
        other => panic!("expected an error, got {other:?}"),
    }
}

#[derive(Debug, Default)]
struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

#[derive(Debug, Default)]
struct MockState {
    tables: HashMap<String, Table>,
    canned: HashMap<String, Vec<Row>>,
    log: Vec<String>,
    fail_next: usize,
}

/// In-memory connection. Clones share the same tables and counters.
#[derive(Debug, Clone, Default)]
pub struct MockConnection {
    state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one row. The first insert into a table fixes its columns.
    pub fn insert(&self, table: &str, values: &[(&str, Value)]) {
        let mut state = self.state.lock().expect("lock poisoned");
        let table = state.tables.entry(table.to_string()).or_default();
        if table.columns.is_empty() {
            table.columns = values.iter().map(|(c, _)| (*c).to_string()).collect();
        }
        let row = table
            .columns
            .iter()
            .map(|column| {
                values
                    .iter()
                    .find(|(c, _)| *c == column.as_str())
                    .map_or(Value::Null, |(_, v)| v.clone())
            })
            .collect();
        table.rows.push(row);
    }

    /// Answer `sql` with `rows` verbatim instead of evaluating it.
    pub fn set_canned(&self, sql: &str, rows: Vec<Row>) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.canned.insert(sql.to_string(), rows);
    }

    /// Fail the next `n` queries with a database error.
    pub fn fail_next_queries(&self, n: usize) {
        self.state.lock().expect("lock poisoned").fail_next = n;
    }

    pub fn query_count(&self) -> usize {
        self.state.lock().expect("lock poisoned").log.len()
    }

    pub fn queries(&self) -> Vec<String> {
        self.state.lock().expect("lock poisoned").log.clone()
    }

    pub fn reset_count(&self) {
        self.state.lock().expect("lock poisoned").log.clear();
    }

    fn run(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut state = self.state.lock().expect("lock poisoned");
        state.log.push(sql.to_string());
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(QueryError::new(QueryErrorKind::Database, "injected failure")
                .with_sql(sql)
                .into());
        }
        if let Some(rows) = state.canned.get(sql) {
            return Ok(rows.clone());
        }
        let statement = parse_select(sql, params)
            .map_err(|message| QueryError::new(QueryErrorKind::Syntax, message).with_sql(sql))?;
        let Some(table) = state.tables.get(&statement.table) else {
            return Ok(Vec::new());
        };
        let projection: Vec<String> = statement
            .columns
            .unwrap_or_else(|| table.columns.clone());
        let rows = table
            .rows
            .iter()
            .filter(|row| {
                statement.conditions.iter().all(|(column, candidates)| {
                    let Some(idx) = table.columns.iter().position(|c| c == column) else {
                        return false;
                    };
                    let value = &row[idx];
                    !value.is_null() && candidates.iter().any(|c| c.key_eq(value))
                })
            })
            .map(|row| {
                let values = projection
                    .iter()
                    .map(|name| {
                        table
                            .columns
                            .iter()
                            .position(|c| c == name)
                            .map_or(Value::Null, |idx| row[idx].clone())
                    })
                    .collect();
                Row::new(projection.clone(), values)
            })
            .collect();
        Ok(rows)
    }
}

struct Select {
    table: String,
    columns: Option<Vec<String>>,
    conditions: Vec<(String, Vec<Value>)>,
}

fn unquote(ident: &str) -> String {
    ident.trim().trim_matches('"').to_string()
}

fn placeholder(token: &str, params: &[Value]) -> std::result::Result<Value, String> {
    let index: usize = token
        .trim()
        .trim_start_matches('$')
        .parse()
        .map_err(|_| format!("bad placeholder {token}"))?;
    params
        .get(index - 1)
        .cloned()
        .ok_or_else(|| format!("missing parameter {index}"))
}

fn parse_select(sql: &str, params: &[Value]) -> std::result::Result<Select, String> {
    let rest = sql
        .strip_prefix("SELECT ")
        .ok_or_else(|| "not a SELECT".to_string())?;
    let (projection, rest) = rest
        .split_once(" FROM ")
        .ok_or_else(|| "missing FROM".to_string())?;
    let (table, where_clause) = match rest.split_once(" WHERE ") {
        Some((table, clause)) => (table, Some(clause)),
        None => (rest, None),
    };
    let columns = (projection.trim() != "*").then(|| projection.split(',').map(unquote).collect());

    let mut conditions = Vec::new();
    for term in where_clause.into_iter().flat_map(|w| w.split(" AND ")) {
        if let Some((column, list)) = term.split_once(" IN (") {
            let values = list
                .trim_end_matches(')')
                .split(',')
                .map(|token| placeholder(token, params))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            conditions.push((unquote(column), values));
        } else if let Some((column, token)) = term.split_once(" = ") {
            conditions.push((unquote(column), vec![placeholder(token, params)?]));
        } else {
            return Err(format!("unsupported condition {term}"));
        }
    }

    Ok(Select {
        table: unquote(table),
        columns,
        conditions,
    })
}

impl Connection for MockConnection {
    fn query(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let result = self.run(sql, params);
        async move {
            match result {
                Ok(rows) => Outcome::Ok(rows),
                Err(e) => Outcome::Err(e),
            }
        }
    }
}

// ============================================================================
// Models
// ============================================================================

/// A model with one to-one relation, read either through its descriptor or
/// through a plain single-row accessor.
pub trait HasRelation: Model + std::fmt::Debug {
    type Target: Model + std::fmt::Debug;

    const RELATION: RelatedDescriptor<Self, Self::Target>;

    /// Reads skip the descriptor and always load one row.
    const PLAIN_ACCESS: bool;
}

/// Read the relation the way the model is declared to read it.
pub async fn read_relation<M: HasRelation>(
    cx: &Cx,
    session: &mut Session<MockConnection>,
    row: &M,
) -> Outcome<Option<Arc<M::Target>>, Error> {
    if M::PLAIN_ACCESS {
        session.load_relation_single(cx, row, &M::RELATION).await
    } else {
        M::RELATION.get(cx, session, row).await
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Friend {
    pub id: i64,
}

impl Model for Friend {
    const TABLE_NAME: &'static str = "friends";
    const PRIMARY_KEY: &'static [&'static str] = &["id"];

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![("id", Value::BigInt(self.id))]
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_named("id")?,
        })
    }

    fn primary_key_value(&self) -> Vec<Value> {
        vec![Value::BigInt(self.id)]
    }
}

/// A model holding a forward relation in `$field`, stored in `$column`.
macro_rules! forward_model {
    (
        $name:ident, $table:literal, $field:ident -> $target:ty, $column:literal,
        kind: $kind:ident, ctor: $ctor:ident, tracked: $tracked:literal,
        plain: $plain:literal, meta: $meta:expr
    ) => {
        #[derive(Debug, Serialize, Deserialize)]
        pub struct $name {
            pub id: i64,
            pub $field: Related<$target>,
            #[serde(default)]
            pub peers: PeerSlot<$name>,
        }

        impl $name {
            pub const FIELD: RelationshipInfo =
                RelationshipInfo::new(stringify!($field), <$target as Model>::TABLE_NAME, RelationshipKind::$kind)
                    .local_key($column)
                    .back_populates(stringify!($field));

            fn relation_cache(row: &Self) -> &Related<$target> {
                &row.$field
            }

            pub fn new(id: i64, key: impl Into<Value>) -> Self {
                Self {
                    id,
                    $field: Related::from_fk(key),
                    peers: PeerSlot::new(),
                }
            }
        }

        impl Model for $name {
            const TABLE_NAME: &'static str = $table;
            const PRIMARY_KEY: &'static [&'static str] = &["id"];
            const RELATIONSHIPS: &'static [RelationshipInfo] = &[Self::FIELD];
            const META: ModelMeta = $meta;

            fn to_row(&self) -> Vec<(&'static str, Value)> {
                vec![
                    ("id", Value::BigInt(self.id)),
                    ($column, self.$field.key().cloned().unwrap_or(Value::Null)),
                ]
            }

            fn from_row(row: &Row) -> Result<Self> {
                Ok(Self::new(row.get_named("id")?, row.get_named::<Value>($column)?))
            }

            fn primary_key_value(&self) -> Vec<Value> {
                vec![Value::BigInt(self.id)]
            }

            fn peer_slot(&self) -> Option<&PeerSlot<Self>> {
                $tracked.then_some(&self.peers)
            }
        }

        impl HasRelation for $name {
            type Target = $target;
            const RELATION: RelatedDescriptor<Self, $target> =
                RelatedDescriptor::$ctor(Self::FIELD, Self::relation_cache);
            const PLAIN_ACCESS: bool = $plain;
        }
    };
}

/// A model reading the reverse side of `$forward`'s one-to-one field.
macro_rules! reverse_model {
    (
        $name:ident, $table:literal, $field:ident -> $forward:ty,
        tracked: $tracked:literal, plain: $plain:literal, meta: $meta:expr
    ) => {
        #[derive(Debug, Serialize, Deserialize)]
        pub struct $name {
            pub id: i64,
            pub $field: Related<$forward>,
            #[serde(default)]
            pub peers: PeerSlot<$name>,
        }

        impl $name {
            fn relation_cache(row: &Self) -> &Related<$forward> {
                &row.$field
            }

            pub fn new(id: i64) -> Self {
                Self {
                    id,
                    $field: Related::reverse(id),
                    peers: PeerSlot::new(),
                }
            }
        }

        impl Model for $name {
            const TABLE_NAME: &'static str = $table;
            const PRIMARY_KEY: &'static [&'static str] = &["id"];
            const META: ModelMeta = $meta;

            fn to_row(&self) -> Vec<(&'static str, Value)> {
                vec![("id", Value::BigInt(self.id))]
            }

            fn from_row(row: &Row) -> Result<Self> {
                Ok(Self::new(row.get_named("id")?))
            }

            fn primary_key_value(&self) -> Vec<Value> {
                vec![Value::BigInt(self.id)]
            }

            fn peer_slot(&self) -> Option<&PeerSlot<Self>> {
                $tracked.then_some(&self.peers)
            }
        }

        impl HasRelation for $name {
            type Target = $forward;
            const RELATION: RelatedDescriptor<Self, $forward> =
                RelatedDescriptor::reverse_one_to_one(<$forward>::FIELD, Self::relation_cache);
            const PLAIN_ACCESS: bool = $plain;
        }
    };
}

const PLAIN_META: ModelMeta = ModelMeta::new();
const OPTED_META: ModelMeta = ModelMeta::new().inherit(PREFETCH_META);

// Foreign keys to Friend.
forward_model!(Vanilla, "vanillas", friend -> Friend, "friend_id",
    kind: ManyToOne, ctor: forward_many_to_one, tracked: false, plain: true, meta: PLAIN_META);
forward_model!(Prefetch, "prefetches", friend -> Friend, "friend_id",
    kind: ManyToOne, ctor: forward_many_to_one, tracked: true, plain: false, meta: OPTED_META);
forward_model!(MixedModel, "mixed_models", friend -> Friend, "friend_id",
    kind: ManyToOne, ctor: forward_many_to_one, tracked: true, plain: true, meta: OPTED_META);
forward_model!(MixedField, "mixed_fields", friend -> Friend, "friend_id",
    kind: ManyToOne, ctor: forward_many_to_one, tracked: false, plain: false, meta: PLAIN_META);

// Foreign keys to rows that hold a foreign key themselves.
forward_model!(Vanilla2, "vanilla2s", other -> Vanilla, "other_id",
    kind: ManyToOne, ctor: forward_many_to_one, tracked: false, plain: true, meta: PLAIN_META);
forward_model!(Prefetch2, "prefetch2s", other -> Prefetch, "other_id",
    kind: ManyToOne, ctor: forward_many_to_one, tracked: true, plain: false, meta: OPTED_META);

// One-to-one pairs.
forward_model!(VanillaForward, "vanilla_forwards", friend -> VanillaReverse, "friend_id",
    kind: OneToOne, ctor: forward_one_to_one, tracked: false, plain: true, meta: PLAIN_META);
reverse_model!(VanillaReverse, "vanilla_reverses", friend -> VanillaForward,
    tracked: false, plain: true, meta: PLAIN_META);
forward_model!(PrefetchForward, "prefetch_forwards", friend -> PrefetchReverse, "friend_id",
    kind: OneToOne, ctor: forward_one_to_one, tracked: true, plain: false, meta: OPTED_META);
reverse_model!(PrefetchReverse, "prefetch_reverses", friend -> PrefetchForward,
    tracked: true, plain: false, meta: OPTED_META);

/// An opted-in model with two independent relations to `Friend`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Pupil {
    pub id: i64,
    pub friend: Related<Friend>,
    pub mentor: Related<Friend>,
    #[serde(default)]
    pub peers: PeerSlot<Pupil>,
}

impl Pupil {
    pub const FRIEND_FIELD: RelationshipInfo =
        RelationshipInfo::new("friend", "friends", RelationshipKind::ManyToOne).local_key("friend_id");
    pub const MENTOR_FIELD: RelationshipInfo =
        RelationshipInfo::new("mentor", "friends", RelationshipKind::ManyToOne).local_key("mentor_id");

    pub const FRIEND: RelatedDescriptor<Pupil, Friend> =
        RelatedDescriptor::forward_many_to_one(Self::FRIEND_FIELD, Self::friend_cache);
    pub const MENTOR: RelatedDescriptor<Pupil, Friend> =
        RelatedDescriptor::forward_many_to_one(Self::MENTOR_FIELD, Self::mentor_cache);

    fn friend_cache(row: &Self) -> &Related<Friend> {
        &row.friend
    }

    fn mentor_cache(row: &Self) -> &Related<Friend> {
        &row.mentor
    }
}

impl Model for Pupil {
    const TABLE_NAME: &'static str = "pupils";
    const PRIMARY_KEY: &'static [&'static str] = &["id"];
    const RELATIONSHIPS: &'static [RelationshipInfo] = &[Self::FRIEND_FIELD, Self::MENTOR_FIELD];
    const META: ModelMeta = OPTED_META;

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::BigInt(self.id)),
            ("friend_id", self.friend.key().cloned().unwrap_or(Value::Null)),
            ("mentor_id", self.mentor.key().cloned().unwrap_or(Value::Null)),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_named("id")?,
            friend: Related::from_fk(row.get_named::<Value>("friend_id")?),
            mentor: Related::from_fk(row.get_named::<Value>("mentor_id")?),
            peers: PeerSlot::new(),
        })
    }

    fn primary_key_value(&self) -> Vec<Value> {
        vec![Value::BigInt(self.id)]
    }

    fn peer_slot(&self) -> Option<&PeerSlot<Self>> {
        Some(&self.peers)
    }
}

impl AutoPrefetch for Pupil {}
impl AutoPrefetch for Prefetch {}
impl AutoPrefetch for MixedModel {}
impl AutoPrefetch for Prefetch2 {}
impl AutoPrefetch for PrefetchForward {}
impl AutoPrefetch for PrefetchReverse {}

// ============================================================================
// Seeding
// ============================================================================

pub fn seed_friends(conn: &MockConnection, ids: impl IntoIterator<Item = i64>) {
    for id in ids {
        conn.insert(Friend::TABLE_NAME, &[("id", Value::BigInt(id))]);
    }
}

/// Insert rows of a forward model, `(id, key)` each.
pub fn seed_forward<M: HasRelation>(conn: &MockConnection, rows: &[(i64, Value)]) {
    let column = M::RELATION.field().local_key.unwrap_or("friend_id");
    for (id, key) in rows {
        conn.insert(
            M::TABLE_NAME,
            &[("id", Value::BigInt(*id)), (column, key.clone())],
        );
    }
}

/// Insert plain `id` rows.
pub fn seed_ids(conn: &MockConnection, table: &str, ids: impl IntoIterator<Item = i64>) {
    for id in ids {
        conn.insert(table, &[("id", Value::BigInt(id))]);
    }
}

/// Realize every `M` through its public manager.
pub async fn fetch_all<M: Model>(cx: &Cx, session: &mut Session<MockConnection>) -> Vec<Arc<M>> {
    let mut qs = Manager::<M>::objects().all();
    unwrap_outcome(qs.fetch_all(cx, session).await).to_vec()
}
