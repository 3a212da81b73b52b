//! Resource hydration layer
//!
//! Turns a server envelope into a graph of addressable wrappers:
//!
//! - [`Resource`] - base wrapper holding the URL, a shared client handle and
//!   a shallow copy of the payload fields
//! - [`Record`] - a single item, with declared relationships compiled into
//!   callable [`Link`] accessors
//! - [`Collection`] - a paginated page of owned records
//!
//! The dispatch decision (collection vs record vs raw value) lives in
//! [`crate::client::Client`]; this module owns the wrapper semantics.

mod collection;
mod link;
mod record;

use std::fmt;

use serde_json::{Map, Value};

use crate::client::Client;

pub use collection::{Collection, CollectionMeta};
pub use link::{Link, LinkItem};
pub use record::Record;

/// A hydrated response: either a typed wrapper or the raw `$data` value.
#[derive(Debug, Clone)]
pub enum Response {
    Record(Record),
    Collection(Collection),
    /// Scalar or null `$data`, passed through untouched.
    Value(Value),
}

impl Response {
    pub fn record(&self) -> Option<&Record> {
        match self {
            Self::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn collection(&self) -> Option<&Collection> {
        match self {
            Self::Collection(collection) => Some(collection),
            _ => None,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Plain-data rendition of the response.
    pub fn to_object(&self) -> Value {
        match self {
            Self::Record(record) => Value::Object(record.to_object()),
            Self::Collection(collection) => collection.to_object(),
            Self::Value(value) => value.clone(),
        }
    }
}

/// Base wrapper shared by records and collections.
///
/// Holds a full shallow copy of the payload: mutating the envelope after
/// construction does not affect the wrapper.
#[derive(Debug, Clone)]
pub struct Resource {
    url: String,
    client: Client,
    data: Map<String, Value>,
}

impl Resource {
    pub(crate) fn new(url: &str, data: Map<String, Value>, client: Client) -> Self {
        Self {
            url: url.to_string(),
            client,
            data,
        }
    }

    /// Request URL this resource was hydrated from. Never empty.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    pub(crate) fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    /// A payload field by name.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// All payload fields, in stored order.
    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.data.iter()
    }

    /// Plain copy of the payload fields, exactly as hydrated.
    pub fn to_object(&self) -> Map<String, Value> {
        self.data.clone()
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}
