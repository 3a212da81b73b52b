//! Single-item resource wrapper

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::client::{strip_query, Client};
use crate::resource::collection::CollectionMeta;
use crate::resource::link::Link;
use crate::resource::Resource;

/// A single record, with declared relationships compiled into [`Link`]
/// accessors.
///
/// Records constructed as members of a collection carry a non-owning
/// back-reference to the collection's pagination metadata.
#[derive(Debug, Clone)]
pub struct Record {
    resource: Resource,
    links: BTreeMap<String, Link>,
    collection: Option<Arc<CollectionMeta>>,
}

impl Record {
    /// Build a record from envelope parts.
    ///
    /// `$links` are cached on the client keyed by URL; records hydrated
    /// later for the same URL without their own declarations inherit the
    /// cached ones.
    pub(crate) fn new(
        url: &str,
        data: Map<String, Value>,
        links: Option<Value>,
        client: Client,
        collection: Option<Arc<CollectionMeta>>,
    ) -> Self {
        let resource = Resource::new(url, data, client);

        let links = match links {
            Some(links) => {
                resource.client().cache_links(url, &links);
                Some(links)
            },
            None => resource.client().cached_links(url),
        };

        let compiled = match &links {
            Some(spec) => compile_links(resource.client(), url, spec, resource.data()),
            None => BTreeMap::new(),
        };

        Self {
            resource,
            links: compiled,
            collection,
        }
    }

    /// Record URL. Never empty.
    pub fn url(&self) -> &str {
        self.resource.url()
    }

    /// A payload field by name.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.resource.get(key)
    }

    /// All payload fields, in stored order.
    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.resource.fields()
    }

    /// Plain copy of the payload, containing exactly the hydrated fields.
    pub fn to_object(&self) -> Map<String, Value> {
        self.resource.to_object()
    }

    /// Payload serialized as a JSON string.
    pub fn to_json(&self) -> String {
        Value::Object(self.to_object()).to_string()
    }

    /// A compiled relationship accessor by name.
    pub fn link(&self, name: &str) -> Option<&Link> {
        self.links.get(name)
    }

    /// All compiled relationship accessors, in name order.
    pub fn links(&self) -> impl Iterator<Item = (&String, &Link)> {
        self.links.iter()
    }

    /// Pagination metadata of the owning collection, when this record was
    /// hydrated as a collection member. Navigational only.
    pub fn collection(&self) -> Option<&CollectionMeta> {
        self.collection.as_deref()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url())
    }
}

/// Compile the declared link tree against the record payload.
///
/// A key the payload has already populated with a non-link value (an
/// "expanded" relation) is skipped, unless the spec declares a wildcard over
/// that array-valued relation.
fn compile_links(
    client: &Client,
    url: &str,
    links: &Value,
    data: &Map<String, Value>,
) -> BTreeMap<String, Link> {
    let Value::Object(entries) = links else {
        return BTreeMap::new();
    };

    let base = strip_query(url).trim_end_matches('/').to_string();
    let mut compiled = BTreeMap::new();

    for (key, spec) in entries {
        if !spec.is_object() {
            continue;
        }
        let expanded = data.get(key).is_some_and(|v| !v.is_null());
        let wildcard = spec.get("*").is_some() && data.get(key).is_some_and(Value::is_array);
        if expanded && !wildcard {
            continue;
        }
        compiled.insert(key.clone(), Link::compile(client, &base, key, spec, data));
    }

    compiled
}
