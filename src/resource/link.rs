//! Link accessors
//!
//! A [`Link`] is a declared, URL-addressable relationship compiled from a
//! record's `$links` tree. It is callable ([`Link::fetch`]), iterable
//! ([`Link::each`]), verb-addressable ([`Link::get`] and friends), and
//! renders as its absolute URL so it can be passed wherever a URL string is
//! expected.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};

use crate::client::Client;
use crate::error::ApiResult;
use crate::resource::{Record, Response};
use crate::routes::fill_url;
use crate::transport::HttpMethod;

/// Keys in a link spec node that are markers, not child links.
const RESERVED_KEYS: [&str; 2] = ["url", "*"];

/// One item yielded by [`Link::each`].
#[derive(Debug)]
pub enum LinkItem<'a> {
    /// A record of a collection-shaped result, yielded once per result row.
    Record(&'a Record),
    /// Anything else, yielded once with the whole result.
    Other(&'a Response),
}

/// A compiled relationship accessor.
#[derive(Debug, Clone)]
pub struct Link {
    client: Client,
    url: String,
    children: BTreeMap<String, Link>,
}

impl Link {
    /// Compile a link node from its spec subtree.
    ///
    /// The node URL is the spec's templated `url` string (placeholders filled
    /// from the record payload) when present, otherwise `{parent_url}/{key}`.
    /// Nested spec keys compile into child links; a `"*"` spec applies the
    /// nested tree to every element of the matching array-valued relation,
    /// keyed by the element's `id` (index when absent).
    pub(crate) fn compile(
        client: &Client,
        parent_url: &str,
        key: &str,
        spec: &Value,
        record_data: &Map<String, Value>,
    ) -> Self {
        let url = match spec.get("url").and_then(Value::as_str) {
            Some(template) => fill_url(template, record_data),
            None => format!("{}/{}", parent_url.trim_end_matches('/'), key),
        };

        let mut children = BTreeMap::new();

        if let Some(wildcard) = spec.get("*") {
            // Array-valued relation: one child per element.
            if let Some(items) = record_data.get(key).and_then(Value::as_array) {
                for (index, item) in items.iter().enumerate() {
                    let segment = element_segment(item, index);
                    let element_url = format!("{url}/{segment}");
                    let mut element = Link {
                        client: client.clone(),
                        url: element_url.clone(),
                        children: BTreeMap::new(),
                    };
                    if let Value::Object(nested) = wildcard {
                        let item_fields = item.as_object().cloned().unwrap_or_default();
                        for (child_key, child_spec) in nested {
                            if RESERVED_KEYS.contains(&child_key.as_str()) {
                                continue;
                            }
                            element.children.insert(
                                child_key.clone(),
                                Link::compile(client, &element_url, child_key, child_spec, &item_fields),
                            );
                        }
                    }
                    children.insert(segment, element);
                }
            }
        }

        if let Value::Object(nested) = spec {
            for (child_key, child_spec) in nested {
                if RESERVED_KEYS.contains(&child_key.as_str()) || !child_spec.is_object() {
                    continue;
                }
                children.insert(
                    child_key.clone(),
                    Link::compile(client, &url, child_key, child_spec, record_data),
                );
            }
        }

        Self {
            client: client.clone(),
            url,
            children,
        }
    }

    /// Absolute URL of this link.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// A nested link (or wildcard element) by name.
    pub fn child(&self, name: &str) -> Option<&Link> {
        self.children.get(name)
    }

    /// All nested links, in name order.
    pub fn children(&self) -> impl Iterator<Item = (&String, &Link)> {
        self.children.iter()
    }

    /// Fetch the linked resource (the callable form of the accessor).
    pub async fn fetch(&self) -> ApiResult<Response> {
        self.client.get(&self.url, None).await
    }

    /// Fetch the link, invoking `f` once per record when the result is a
    /// paginated collection, or once with the whole result otherwise.
    /// Iteration is in result order with no parallelism. Returns the raw
    /// result for follow-up handling.
    pub async fn each<F>(&self, mut f: F) -> ApiResult<Response>
    where
        F: FnMut(LinkItem<'_>),
    {
        let response = self.fetch().await?;
        match &response {
            Response::Collection(collection) => {
                for record in collection.records() {
                    f(LinkItem::Record(record));
                }
            },
            other => f(LinkItem::Other(other)),
        }
        Ok(response)
    }

    /// GET against the link URL, optionally extended with a relative path.
    pub async fn get(&self, path: Option<&str>, data: Option<Value>) -> ApiResult<Response> {
        self.request(HttpMethod::Get, path, data).await
    }

    /// PUT against the link URL, optionally extended with a relative path.
    pub async fn put(&self, path: Option<&str>, data: Option<Value>) -> ApiResult<Response> {
        self.request(HttpMethod::Put, path, data).await
    }

    /// POST against the link URL, optionally extended with a relative path.
    pub async fn post(&self, path: Option<&str>, data: Option<Value>) -> ApiResult<Response> {
        self.request(HttpMethod::Post, path, data).await
    }

    /// DELETE against the link URL, optionally extended with a relative path.
    pub async fn delete(&self, path: Option<&str>, data: Option<Value>) -> ApiResult<Response> {
        self.request(HttpMethod::Delete, path, data).await
    }

    async fn request(
        &self,
        method: HttpMethod,
        path: Option<&str>,
        data: Option<Value>,
    ) -> ApiResult<Response> {
        let url = match path {
            Some(path) => format!("{}/{}", self.url, path.trim_start_matches('/')),
            None => self.url.clone(),
        };
        self.client.request(method, &url, data).await
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

fn element_segment(item: &Value, index: usize) -> String {
    match item.get("id") {
        Some(Value::String(id)) => id.replace('/', ""),
        Some(Value::Number(id)) => id.to_string(),
        _ => index.to_string(),
    }
}
