//! Paginated collection wrapper

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::client::{strip_query, Client};
use crate::resource::Record;

/// Pagination metadata shared with member records as a non-owning
/// back-reference.
#[derive(Debug, Clone)]
pub struct CollectionMeta {
    pub url: String,
    pub count: u64,
    pub page: u64,
}

/// One page of records.
///
/// `count` is the total matching the query, which may exceed the page size;
/// `len()` always equals the number of records on this page.
#[derive(Debug, Clone)]
pub struct Collection {
    url: String,
    /// Shared client handle; member records carry their own clone.
    #[allow(dead_code)]
    client: Client,
    count: u64,
    page: u64,
    pages: Value,
    records: Vec<Record>,
}

impl Collection {
    /// Build a collection from a `count`/`results` payload.
    ///
    /// Each result row becomes an owned [`Record`] whose URL is the parent
    /// URL (query string dropped) extended with the row's `id`; the route's
    /// `$links` declarations are shared across all children.
    pub(crate) fn new(
        url: &str,
        data: Map<String, Value>,
        links: Option<Value>,
        client: Client,
    ) -> Self {
        let count = data.get("count").and_then(Value::as_u64).unwrap_or(0);
        let page = data.get("page").and_then(Value::as_u64).unwrap_or(0);
        let pages = data
            .get("pages")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));

        let base = format!(
            "/{}",
            strip_query(url).trim_matches('/')
        );
        let meta = Arc::new(CollectionMeta {
            url: base.clone(),
            count,
            page,
        });

        let mut records = Vec::new();
        if let Some(results) = data.get("results").and_then(Value::as_array) {
            for row in results {
                // Non-object rows keep their slot as empty records, so the
                // page length always matches the results array.
                let row_fields = row.as_object().cloned().unwrap_or_default();
                let record_url = format!("{base}/{}", id_segment(&row_fields));
                records.push(Record::new(
                    &record_url,
                    row_fields,
                    links.clone(),
                    client.clone(),
                    Some(Arc::clone(&meta)),
                ));
            }
        }

        Self {
            url: url.to_string(),
            client,
            count,
            page,
            pages,
            records,
        }
    }

    /// Collection URL as requested (query string included).
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Total number of matching records across all pages.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Current page number.
    pub fn page(&self) -> u64 {
        self.page
    }

    /// Raw pagination descriptor from the server.
    pub fn pages(&self) -> &Value {
        &self.pages
    }

    /// Number of records on this page.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record at a page-local index.
    pub fn get(&self, index: usize) -> Option<&Record> {
        self.records.get(index)
    }

    /// Records on this page, in result order.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    /// Invoke `f` once per record, in result order, with no parallelism.
    pub fn each<F>(&self, mut f: F)
    where
        F: FnMut(&Record),
    {
        for record in &self.records {
            f(record);
        }
    }

    /// Plain-data rendition: pagination fields plus each record's payload.
    pub fn to_object(&self) -> Value {
        let results: Vec<Value> = self
            .records
            .iter()
            .map(|record| Value::Object(record.to_object()))
            .collect();
        let mut map = Map::new();
        map.insert("count".to_string(), Value::from(self.count));
        map.insert("results".to_string(), Value::Array(results));
        map.insert("page".to_string(), Value::from(self.page));
        map.insert("pages".to_string(), self.pages.clone());
        Value::Object(map)
    }
}

impl<'a> IntoIterator for &'a Collection {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

fn id_segment(row: &Map<String, Value>) -> String {
    match row.get("id") {
        Some(Value::String(id)) => id.replace('/', ""),
        Some(Value::Number(id)) => id.to_string(),
        _ => String::new(),
    }
}
