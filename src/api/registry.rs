//! Embedded route registry
//!
//! The v1 route tables ship as JSON compiled into the binary and are
//! compiled into [`RouteMap`]s once, on first access. Malformed embedded
//! JSON is a packaging bug and panics at startup rather than surfacing as a
//! runtime error.

use std::sync::OnceLock;

use serde_json::Value;

use crate::routes::{compile_tree, RouteEntry, RouteMap};

const V1_ROUTES: &str = include_str!("routes/v1.json");

static V1: OnceLock<RouteMap> = OnceLock::new();

/// The compiled v1 route tree (compiles the embedded JSON on first access).
pub fn v1_routes() -> &'static RouteMap {
    V1.get_or_init(|| {
        let tables: Value = serde_json::from_str(V1_ROUTES)
            .unwrap_or_else(|e| panic!("failed to parse embedded route JSON: {e}"));
        let Value::Object(entries) = tables else {
            panic!("embedded route JSON must be an object of route trees");
        };

        let mut map = RouteMap::new();
        for (key, tree) in &entries {
            let compiled = compile_tree(tree)
                .unwrap_or_else(|e| panic!("failed to compile route tree `{key}`: {e}"));
            map.insert(key.clone(), RouteEntry::Namespace(compiled));
        }
        map
    })
}
