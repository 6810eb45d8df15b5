//! Signals routed through the graph, and their wire form.
//!
//! Wire format (JSON text frames):
//! ```text
//! { "event": "bucket.shift",        "data": { "id", "add": [..], "remove": [..] } }
//! { "event": "bucket.link",         "data": { "id", "prev", "next" } }
//! { "event": "replicable.mutation", "data": { "id", "property", "value" } }
//! ```
//!
//! A signal is serialized at most once; every terminal that transmits it
//! shares the same cached `Arc<str>`.

use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize, Serializer};

use crate::identity::Snowflake;

/// A primitive property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Primitive {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Primitive {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Primitive::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Primitive::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Primitive::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Primitive::Null)
    }
}

impl From<&str> for Primitive {
    fn from(s: &str) -> Self {
        Primitive::Text(s.to_string())
    }
}

impl From<String> for Primitive {
    fn from(s: String) -> Self {
        Primitive::Text(s)
    }
}

impl From<f64> for Primitive {
    fn from(n: f64) -> Self {
        Primitive::Number(n)
    }
}

impl From<i64> for Primitive {
    fn from(n: i64) -> Self {
        Primitive::Number(n as f64)
    }
}

impl From<bool> for Primitive {
    fn from(b: bool) -> Self {
        Primitive::Bool(b)
    }
}

impl<T: Into<Primitive>> From<Option<T>> for Primitive {
    fn from(v: Option<T>) -> Self {
        v.map_or(Primitive::Null, Into::into)
    }
}

/// Property bag of a record. Keys are fixed once the record exists.
pub type Properties = BTreeMap<String, Primitive>;

/// Externally visible shape of a record: its id merged with its properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: Snowflake,
    #[serde(flatten)]
    pub data: Properties,
}

/// Hub-unique bucket identity. Rendered as lowercase hex on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketId(pub(crate) u64);

impl BucketId {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl Serialize for BucketId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Membership change of one bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Shift {
    #[serde(rename = "id")]
    pub bucket: BucketId,
    pub add: Vec<Snapshot>,
    pub remove: Vec<Snowflake>,
}

/// Rank-0 neighbours of one bucket after a split or unlink moved them.
/// `None` marks either end of the chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Relink {
    #[serde(rename = "id")]
    pub bucket: BucketId,
    pub prev: Option<BucketId>,
    pub next: Option<BucketId>,
}

/// A property write on one record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(bound = "")]
pub struct Mutation<K> {
    #[serde(skip)]
    pub kind: K,
    pub id: Snowflake,
    pub property: String,
    pub value: Primitive,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignalBody<K> {
    Shift(Shift),
    Relink(Relink),
    Mutation(Mutation<K>),
}

#[derive(Serialize)]
#[serde(tag = "event", content = "data", bound = "")]
enum Wire<'a, K> {
    #[serde(rename = "bucket.shift")]
    Shift(&'a Shift),
    #[serde(rename = "bucket.link")]
    Relink(&'a Relink),
    #[serde(rename = "replicable.mutation")]
    Mutation(&'a Mutation<K>),
}

/// An immutable event routed through the signal graph.
#[derive(Debug)]
pub struct Signal<K> {
    body: SignalBody<K>,
    payload: OnceCell<Arc<str>>,
}

impl<K> Signal<K> {
    pub fn shift(shift: Shift) -> Self {
        Self::new(SignalBody::Shift(shift))
    }

    pub fn relink(relink: Relink) -> Self {
        Self::new(SignalBody::Relink(relink))
    }

    pub fn mutation(mutation: Mutation<K>) -> Self {
        Self::new(SignalBody::Mutation(mutation))
    }

    fn new(body: SignalBody<K>) -> Self {
        Self {
            body,
            payload: OnceCell::new(),
        }
    }

    pub fn body(&self) -> &SignalBody<K> {
        &self.body
    }

    pub fn as_shift(&self) -> Option<&Shift> {
        match &self.body {
            SignalBody::Shift(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_relink(&self) -> Option<&Relink> {
        match &self.body {
            SignalBody::Relink(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_mutation(&self) -> Option<&Mutation<K>> {
        match &self.body {
            SignalBody::Mutation(m) => Some(m),
            _ => None,
        }
    }

    /// Serialized wire form, computed on first use and cached.
    pub fn payload(&self) -> Result<Arc<str>, serde_json::Error> {
        if let Some(cached) = self.payload.get() {
            return Ok(cached.clone());
        }
        let wire = match &self.body {
            SignalBody::Shift(s) => Wire::Shift(s),
            SignalBody::Relink(l) => Wire::Relink(l),
            SignalBody::Mutation(m) => Wire::Mutation(m),
        };
        let encoded: Arc<str> = serde_json::to_string(&wire)?.into();
        Ok(self.payload.get_or_init(|| encoded).clone())
    }
}
