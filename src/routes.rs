//! Route Table / Method Factory
//!
//! Compiles declarative route tables into immutable [`RouteSpec`]s. A route
//! table is JSON: each entry maps a method name to a 3- or 4-element tuple
//! `[httpMethod, urlTemplate, params?, options?]`, and object-valued entries
//! recurse as nested namespaces. [`define_model`] layers the standard CRUD
//! set on top; `{id}` routes are derived by extending the base URL's own
//! placeholder set.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::{ApiResult, Error};
use crate::params::ParamDef;
use crate::transport::HttpMethod;

/// Version path prefixed onto every compiled route URL.
pub const BASE_PATH: &str = "/v1";

/// One compiled route. Immutable after compilation; bound methods close over
/// it and never mutate it.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteSpec {
    pub method: HttpMethod,
    pub url_template: String,
    pub params: Vec<ParamDef>,
    /// Chainable routes buffer and coalesce instead of dispatching
    /// immediately. Conventionally only `get`.
    pub chainable: bool,
    /// Dotted display name (`products.list`), used in argument errors.
    pub name: String,
}

/// A compiled route tree: leaf methods and nested namespaces.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteEntry {
    Method(Arc<RouteSpec>),
    Namespace(RouteMap),
}

/// Ordered mapping of method/namespace name to entry.
pub type RouteMap = BTreeMap<String, RouteEntry>;

/// Compile a route table for a resource.
///
/// `base_url` only feeds the dotted display name; each tuple carries its own
/// URL template. Object-valued entries become nested namespaces, compiled
/// with the same rules (a nested `$model` key expands the standard set).
pub fn define_methods(base_url: &str, routes: &Value) -> ApiResult<RouteMap> {
    let mut map = RouteMap::new();
    merge_methods(&mut map, base_url, routes)?;
    Ok(map)
}

/// Compile a model: the standard CRUD route set, plus optional extra routes
/// overlaid by name (extras override the generated set).
pub fn define_model(base_url: &str, extra: Option<&Value>) -> ApiResult<RouteMap> {
    let url = format!("/{}", base_url.trim_start_matches('/'));
    let params: Vec<ParamDef> = placeholders(&url).iter().map(|k| ParamDef::new(k)).collect();

    let url_with_id = format!("{url}/{{id}}");
    let mut params_with_id = params.clone();
    params_with_id.push(ParamDef::new("id"));

    let mut map = RouteMap::new();
    let standard: [(&str, HttpMethod, &str, &[ParamDef]); 7] = [
        ("list", HttpMethod::Get, &url, &params),
        ("get", HttpMethod::Get, &url_with_id, &params_with_id),
        ("create", HttpMethod::Post, &url, &params),
        ("post", HttpMethod::Post, &url, &params),
        ("update", HttpMethod::Put, &url_with_id, &params_with_id),
        ("put", HttpMethod::Put, &url_with_id, &params_with_id),
        ("delete", HttpMethod::Delete, &url_with_id, &params_with_id),
    ];
    for (key, method, template, defs) in standard {
        map.insert(
            key.to_string(),
            RouteEntry::Method(Arc::new(RouteSpec {
                method,
                url_template: format!("{BASE_PATH}{template}"),
                params: defs.to_vec(),
                chainable: key == "get",
                name: dotted_name(&url, key),
            })),
        );
    }

    if let Some(extra) = extra {
        // Overlay: extra routes replace generated ones by name.
        merge_methods(&mut map, &url, extra)?;
    }

    Ok(map)
}

fn merge_methods(map: &mut RouteMap, base_url: &str, routes: &Value) -> ApiResult<()> {
    let Value::Object(entries) = routes else {
        return Err(Error::InvalidRoute(format!(
            "route table for `{base_url}` must be an object"
        )));
    };

    for (key, entry) in entries {
        match entry {
            Value::Array(tuple) => {
                let spec = compile_route(base_url, key, tuple)?;
                map.insert(key.clone(), RouteEntry::Method(Arc::new(spec)));
            },
            Value::Object(_) => {
                map.insert(key.clone(), RouteEntry::Namespace(compile_tree(entry)?));
            },
            other => {
                return Err(Error::InvalidRoute(format!(
                    "route `{key}` must be a tuple or namespace, got {other}"
                )));
            },
        }
    }
    Ok(())
}

/// Compile a namespace object.
///
/// Recognized control keys: `$model` (base URL, expands the standard CRUD
/// set) and `$base` (base URL for display names only). Everything else is a
/// route tuple or a nested namespace.
pub fn compile_tree(tree: &Value) -> ApiResult<RouteMap> {
    let Value::Object(entries) = tree else {
        return Err(Error::InvalidRoute("route tree must be an object".to_string()));
    };

    let model = entries.get("$model").and_then(Value::as_str);
    let base = entries
        .get("$base")
        .and_then(Value::as_str)
        .or(model)
        .unwrap_or_default();

    let mut rest = Map::new();
    for (key, value) in entries {
        if key == "$model" || key == "$base" {
            continue;
        }
        rest.insert(key.clone(), value.clone());
    }
    let rest = Value::Object(rest);

    match model {
        Some(model) => define_model(model, Some(&rest)),
        None => define_methods(base, &rest),
    }
}

fn compile_route(base_url: &str, key: &str, tuple: &[Value]) -> ApiResult<RouteSpec> {
    if tuple.len() < 2 {
        return Err(Error::InvalidRoute(format!(
            "route `{key}` needs at least [method, url]"
        )));
    }

    let method: HttpMethod = tuple[0]
        .as_str()
        .ok_or_else(|| Error::InvalidRoute(format!("route `{key}` method must be a string")))?
        .parse()?;
    let url = tuple[1]
        .as_str()
        .ok_or_else(|| Error::InvalidRoute(format!("route `{key}` url must be a string")))?;

    let params = match tuple.get(2) {
        Some(Value::Array(entries)) => entries
            .iter()
            .map(ParamDef::from_value)
            .collect::<ApiResult<Vec<_>>>()?,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            return Err(Error::InvalidRoute(format!(
                "route `{key}` params must be an array, got {other}"
            )));
        },
    };

    let chainable = tuple
        .get(3)
        .and_then(|opts| opts.get("chainable"))
        .and_then(Value::as_bool)
        .unwrap_or(key == "get");

    Ok(RouteSpec {
        method,
        url_template: format!("{BASE_PATH}{url}"),
        params,
        chainable,
        name: dotted_name(base_url, key),
    })
}

/// Derive the dotted display name for a route: base URL stripped of
/// placeholders, slashes become dots (`products/{product_id}/reviews` +
/// `get` -> `products.reviews.get`).
fn dotted_name(base_url: &str, key: &str) -> String {
    let mut cleaned = String::new();
    for segment in base_url.trim_start_matches('/').split('/') {
        if segment.is_empty() || (segment.starts_with('{') && segment.ends_with('}')) {
            continue;
        }
        if !cleaned.is_empty() {
            cleaned.push('.');
        }
        cleaned.push_str(segment);
    }
    if cleaned.is_empty() {
        key.to_string()
    } else {
        format!("{cleaned}.{key}")
    }
}

/// Collect `{param}` placeholder names from a URL template, in order.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut keys = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let Some(end) = rest[start..].find('}') else {
            break;
        };
        keys.push(rest[start + 1..start + end].to_string());
        rest = &rest[start + end + 1..];
    }
    keys
}

/// Substitute `{param}` placeholders from the payload into a URL template.
///
/// Substituted keys are removed from the payload so they never ride along in
/// the body or query string. Path separators are stripped from substituted
/// string values so a value cannot corrupt the route structure. Placeholders
/// without a value are left in place.
pub fn substitute_url(template: &str, data: &mut Map<String, Value>) -> String {
    let mut url = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        let Some(end) = rest[start..].find('}') else {
            break;
        };
        let key = &rest[start + 1..start + end];
        url.push_str(&rest[..start]);
        match data.remove(key) {
            Some(Value::String(s)) => url.push_str(&s.replace('/', "")),
            Some(Value::Null) | None => {
                // Leave the placeholder; resolution should have caught this.
                url.push('{');
                url.push_str(key);
                url.push('}');
            },
            Some(other) => url.push_str(&value_to_segment(&other)),
        }
        rest = &rest[start + end + 1..];
    }
    url.push_str(rest);
    url
}

/// Fill `{param}` placeholders from a payload without consuming it.
///
/// Used for link URL templates, where the record payload stays intact.
/// Placeholders without a value are left in place.
pub fn fill_url(template: &str, data: &Map<String, Value>) -> String {
    let mut url = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        let Some(end) = rest[start..].find('}') else {
            break;
        };
        let key = &rest[start + 1..start + end];
        url.push_str(&rest[..start]);
        match data.get(key) {
            Some(value) if !value.is_null() => url.push_str(&value_to_segment(value)),
            _ => {
                url.push('{');
                url.push_str(key);
                url.push('}');
            },
        }
        rest = &rest[start + end + 1..];
    }
    url.push_str(rest);
    url
}

fn value_to_segment(value: &Value) -> String {
    match value {
        Value::String(s) => s.replace('/', ""),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string().replace('/', ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(map: &RouteMap, key: &str) -> Arc<RouteSpec> {
        match map.get(key) {
            Some(RouteEntry::Method(spec)) => Arc::clone(spec),
            other => panic!("expected method `{key}`, got {other:?}"),
        }
    }

    #[test]
    fn define_model_generates_standard_set() {
        let map = define_model("products", None).unwrap();
        for key in ["list", "get", "create", "post", "update", "put", "delete"] {
            assert!(map.contains_key(key), "missing `{key}`");
        }

        let list = spec(&map, "list");
        assert_eq!(list.method, HttpMethod::Get);
        assert_eq!(list.url_template, "/v1/products");
        assert!(list.params.is_empty());
        assert!(!list.chainable);

        let get = spec(&map, "get");
        assert_eq!(get.url_template, "/v1/products/{id}");
        assert_eq!(get.params, vec![ParamDef::new("id")]);
        assert!(get.chainable);
        assert_eq!(get.name, "products.get");

        assert_eq!(spec(&map, "delete").method, HttpMethod::Delete);
        assert_eq!(spec(&map, "update").method, HttpMethod::Put);
        assert_eq!(spec(&map, "create").method, HttpMethod::Post);
    }

    #[test]
    fn define_model_extends_base_placeholders() {
        let map = define_model("products/{product_id}/reviews", None).unwrap();
        let get = spec(&map, "get");
        assert_eq!(get.url_template, "/v1/products/{product_id}/reviews/{id}");
        assert_eq!(
            get.params,
            vec![ParamDef::new("product_id"), ParamDef::new("id")]
        );
        assert_eq!(get.name, "products.reviews.get");
    }

    #[test]
    fn extra_routes_override_generated() {
        let extra = json!({
            "list": ["get", "/products/special", []],
            "publish": ["post", "/products/{id}/publish", ["id"]]
        });
        let map = define_model("products", Some(&extra)).unwrap();
        assert_eq!(spec(&map, "list").url_template, "/v1/products/special");
        assert_eq!(spec(&map, "publish").method, HttpMethod::Post);
        // Untouched generated routes survive.
        assert_eq!(spec(&map, "get").url_template, "/v1/products/{id}");
    }

    #[test]
    fn define_methods_marks_get_chainable_by_default() {
        let routes = json!({
            "get": ["get", "/cart"],
            "checkout": ["post", "/cart/checkout"],
            "refresh": ["get", "/cart/refresh", [], {"chainable": false}]
        });
        let map = define_methods("cart", &routes).unwrap();
        assert!(spec(&map, "get").chainable);
        assert!(!spec(&map, "checkout").chainable);
        assert!(!spec(&map, "refresh").chainable);
        assert_eq!(spec(&map, "checkout").name, "cart.checkout");
    }

    #[test]
    fn nested_namespaces_compile_recursively() {
        let routes = json!({
            "get": ["get", "/account"],
            "orders": {"$model": "account/orders"}
        });
        let map = define_methods("account", &routes).unwrap();
        let Some(RouteEntry::Namespace(orders)) = map.get("orders") else {
            panic!("expected nested namespace");
        };
        assert_eq!(spec(orders, "get").url_template, "/v1/account/orders/{id}");
        assert_eq!(spec(orders, "get").name, "account.orders.get");
    }

    #[test]
    fn substitute_url_strips_path_separators() {
        let mut data = Map::new();
        data.insert("blog_id".to_string(), json!("a/b"));
        data.insert("post_id".to_string(), json!(7));
        data.insert("body".to_string(), json!("kept"));
        let url = substitute_url("/blogs/{blog_id}/posts/{post_id}", &mut data);
        assert_eq!(url, "/blogs/ab/posts/7");
        assert!(!data.contains_key("blog_id"));
        assert!(!data.contains_key("post_id"));
        assert_eq!(data.get("body"), Some(&json!("kept")));
    }

    #[test]
    fn substitute_url_leaves_unresolved_placeholder() {
        let mut data = Map::new();
        let url = substitute_url("/products/{id}", &mut data);
        assert_eq!(url, "/products/{id}");
    }

    #[test]
    fn placeholders_in_order() {
        assert_eq!(
            placeholders("/blogs/{blog_id}/posts/{post_id}"),
            vec!["blog_id".to_string(), "post_id".to_string()]
        );
        assert!(placeholders("/cart").is_empty());
    }

    #[test]
    fn bad_tuple_is_rejected() {
        let routes = json!({"broken": ["get"]});
        assert!(matches!(
            define_methods("x", &routes),
            Err(Error::InvalidRoute(_))
        ));
        let routes = json!({"broken": ["patch", "/x"]});
        assert!(matches!(
            define_methods("x", &routes),
            Err(Error::InvalidRoute(_))
        ));
    }
}
