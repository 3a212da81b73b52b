//! Parameter Resolver
//!
//! Maps a call's positional arguments onto named route parameters, merges
//! with data carried on the root context, and detects missing required
//! arguments before anything is scheduled or sent.

use serde_json::{Map, Value};

use crate::error::{ApiResult, Error};

/// Primitive kinds a parameter definition accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Str,
    Num,
    Bool,
    Object,
}

impl ParamKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            Self::Str => value.is_string(),
            Self::Num => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::Object => value.is_object(),
        }
    }

    fn parse(name: &str) -> ApiResult<Self> {
        match name {
            "string" => Ok(Self::Str),
            "number" => Ok(Self::Num),
            "boolean" => Ok(Self::Bool),
            "object" => Ok(Self::Object),
            other => Err(Error::InvalidRoute(format!("unknown param type `{other}`"))),
        }
    }
}

/// A single named route parameter.
///
/// Declaration order in a route's param list is significant: it is the
/// positional-argument order, and the order used in missing-argument errors.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDef {
    pub key: String,
    pub kinds: Vec<ParamKind>,
    pub default: Option<Value>,
}

impl ParamDef {
    /// Plain key accepting the default kinds (string or number).
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            kinds: vec![ParamKind::Str, ParamKind::Num],
            default: None,
        }
    }

    /// Parse a route-table param entry.
    ///
    /// Accepted forms: `"key"`, `"key:string|number"`, or
    /// `{"key": .., "type": "string|number", "default": ..}`.
    pub fn from_value(value: &Value) -> ApiResult<Self> {
        match value {
            Value::String(spec) => {
                let mut parts = spec.splitn(2, ':');
                let key = parts.next().unwrap_or_default();
                if key.is_empty() {
                    return Err(Error::InvalidRoute("empty param key".to_string()));
                }
                let mut def = Self::new(key);
                if let Some(types) = parts.next() {
                    def.kinds = parse_kinds(types)?;
                }
                Ok(def)
            },
            Value::Object(map) => {
                let key = map
                    .get("key")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::InvalidRoute("param object missing `key`".to_string()))?;
                let mut def = Self::new(key);
                if let Some(types) = map.get("type").and_then(Value::as_str) {
                    def.kinds = parse_kinds(types)?;
                }
                // A declared default of JSON null is a real value, so the
                // presence of the field is what matters here.
                if map.contains_key("default") {
                    def.default = map.get("default").cloned();
                }
                Ok(def)
            },
            other => Err(Error::InvalidRoute(format!("invalid param entry: {other}"))),
        }
    }

    fn matches(&self, value: &Value) -> bool {
        self.kinds.iter().any(|kind| kind.matches(value))
    }
}

fn parse_kinds(spec: &str) -> ApiResult<Vec<ParamKind>> {
    spec.split('|').map(ParamKind::parse).collect()
}

/// Output of [`resolve`]: the named request payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolved {
    pub data: Map<String, Value>,
}

/// Resolve positional arguments against a route's parameter definitions.
///
/// Walks `params` in declaration order, consuming one argument per
/// definition whose runtime kind matches; a non-matching definition with a
/// declared default uses the default without consuming the argument. The
/// next unconsumed argument, if an object, merges in as free-form extra data.
/// Values still absent fall back to `carried` (the root context's buffered
/// data). Any key left without a value and without a declared default is a
/// missing argument, reported synchronously.
pub fn resolve(
    args: &[Value],
    params: &[ParamDef],
    method: &str,
    carried: &Map<String, Value>,
) -> ApiResult<Resolved> {
    if params.is_empty() {
        // Data as object, passed through verbatim.
        let data = match args.first() {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        return Ok(Resolved { data });
    }

    let mut intermediate: Map<String, Value> = Map::new();
    let mut cursor = 0usize;

    for param in params {
        match args.get(cursor) {
            Some(arg) if param.matches(arg) => {
                intermediate.insert(param.key.clone(), arg.clone());
                cursor += 1;
            },
            _ => {
                if let Some(default) = &param.default {
                    intermediate.insert(param.key.clone(), default.clone());
                }
            },
        }
    }

    // Free-form extra data: caller-supplied fields not in the param list
    // pass through untouched.
    let mut data = match args.get(cursor) {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };

    let mut missing: Vec<&str> = Vec::new();
    for param in params {
        let value = intermediate
            .get(&param.key)
            .or_else(|| carried.get(&param.key))
            .cloned();
        match value {
            Some(value) => {
                data.insert(param.key.clone(), value);
            },
            None => {
                let in_extra = data.get(&param.key).is_some_and(|v| !v.is_null());
                if !in_extra && param.default.is_none() {
                    missing.push(&param.key);
                }
            },
        }
    }

    if !missing.is_empty() {
        // The message lists the full declared key set, in declaration order.
        let keys = params
            .iter()
            .map(|p| p.key.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(Error::MissingArguments {
            method: method.to_string(),
            keys,
        });
    }

    Ok(Resolved { data })
}
