//! Transport layer for Storefront API calls
//!
//! The core only depends on the [`Transport`] trait: hand it a method, an
//! absolute URL and an optional payload, get back the server's envelope (or
//! `None` when the server produced no body). [`HttpTransport`] is the default
//! reqwest-based implementation; alternative wire mechanisms plug in behind
//! the same trait.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ApiResult, Error};

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// HTTP methods accepted by the route table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Put,
    Post,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        }
    }

    /// Whether the payload travels in the query string rather than the body.
    pub fn query_encoded(&self) -> bool {
        matches!(self, Self::Get | Self::Delete)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Ok(Self::Get),
            "put" => Ok(Self::Put),
            "post" => Ok(Self::Post),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidRoute(format!("unknown http method `{other}`"))),
        }
    }
}

/// The fixed response envelope returned by the Storefront backend.
///
/// Reserved `$`-prefixed keys separate protocol metadata from the payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "$data", default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(rename = "$links", default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Value>,
    #[serde(rename = "$url", default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "$error", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "$status", default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

/// Pluggable wire mechanism.
///
/// Implementations must normalize their own failure modes (timeouts, parse
/// errors) into [`Error::Transport`] or an `$error` envelope; the core never
/// catches raw network exceptions. `Ok(None)` means the server returned no
/// envelope at all.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(
        &self,
        method: HttpMethod,
        url: &str,
        data: Option<&Value>,
    ) -> ApiResult<Option<Envelope>>;
}

/// Sanitize response body for logging
/// Truncates long responses and masks potentially sensitive patterns
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        // Back off to a char boundary; a fixed byte offset can land inside
        // a multi-byte character.
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// Default HTTP transport backed by reqwest.
///
/// Carries the public key and session id as default headers; the session id
/// is generated once per transport when not supplied, so all requests from
/// one client share a server-side session.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    session: String,
}

impl HttpTransport {
    /// Create a transport with an auto-generated session id.
    pub fn new(public_key: Option<&str>) -> ApiResult<Self> {
        Self::with_session(public_key, uuid::Uuid::new_v4().to_string())
    }

    /// Create a transport resuming an existing session.
    pub fn with_session(public_key: Option<&str>, session: String) -> ApiResult<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(key) = public_key {
            let value = reqwest::header::HeaderValue::from_str(key)
                .map_err(|e| Error::Transport(format!("invalid public key header: {e}")))?;
            headers.insert("X-Public-Key", value);
        }
        let session_value = reqwest::header::HeaderValue::from_str(&session)
            .map_err(|e| Error::Transport(format!("invalid session header: {e}")))?;
        headers.insert("X-Session", session_value);

        let client = reqwest::Client::builder()
            .user_agent(concat!("storefront/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Transport(format!("failed to create http client: {e}")))?;

        Ok(Self { client, session })
    }

    /// Session id sent with every request.
    pub fn session(&self) -> &str {
        &self.session
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(
        &self,
        method: HttpMethod,
        url: &str,
        data: Option<&Value>,
    ) -> ApiResult<Option<Envelope>> {
        tracing::debug!("{} {}", method, url);

        let mut request = match method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Put => self.client.put(url),
            HttpMethod::Post => self.client.post(url),
            HttpMethod::Delete => self.client.delete(url),
        };

        if let Some(data) = data {
            if method.query_encoded() {
                let query = serialize_query(data);
                if !query.is_empty() {
                    let joined = if url.contains('?') {
                        format!("{url}&{query}")
                    } else {
                        format!("{url}?{query}")
                    };
                    request = match method {
                        HttpMethod::Get => self.client.get(&joined),
                        HttpMethod::Delete => self.client.delete(&joined),
                        _ => unreachable!(),
                    };
                }
            } else {
                request = request.json(data);
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Transport(format!("failed to send request: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("failed to read response body: {e}")))?;

        if body.is_empty() {
            return Ok(None);
        }

        match serde_json::from_str::<Envelope>(&body) {
            Ok(envelope) => Ok(Some(envelope)),
            Err(e) => {
                tracing::error!("unparseable response: {} - {}", status, sanitize_for_log(&body));
                Err(Error::Transport(format!("failed to parse response envelope: {e}")))
            },
        }
    }
}

/// Serialize a payload into a bracket-style query string.
///
/// Nested objects become `key[name]=..`, arrays `key[0]=..` (scalar items
/// collapse to `key[]=..`), mirroring what the backend expects for GET and
/// DELETE payloads.
pub fn serialize_query(data: &Value) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Value::Object(map) = data {
        for (key, value) in map {
            build_query_params(key, value, &mut parts);
        }
    }
    parts.join("&")
}

fn build_query_params(key: &str, value: &Value, parts: &mut Vec<String>) {
    match value {
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                if item.is_object() || item.is_array() {
                    build_query_params(&format!("{key}[{i}]"), item, parts);
                } else {
                    build_query_params(&format!("{key}[]"), item, parts);
                }
            }
        },
        Value::Object(map) => {
            for (name, item) in map {
                build_query_params(&format!("{key}[{name}]"), item, parts);
            }
        },
        Value::Null => {
            parts.push(format!("{}=", urlencoding::encode(key)));
        },
        Value::String(s) => {
            parts.push(format!("{}={}", urlencoding::encode(key), urlencoding::encode(s)));
        },
        other => {
            parts.push(format!(
                "{}={}",
                urlencoding::encode(key),
                urlencoding::encode(&other.to_string())
            ));
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_parses_reserved_keys() {
        let envelope: Envelope = serde_json::from_str(
            r#"{"$data":{"id":1},"$links":{"category":{"url":true}},"$url":"/products/1","$status":200}"#,
        )
        .unwrap();
        assert_eq!(envelope.data, Some(json!({"id": 1})));
        assert_eq!(envelope.url.as_deref(), Some("/products/1"));
        assert_eq!(envelope.status, Some(200));
        assert!(envelope.error.is_none());
    }

    #[test]
    fn envelope_tolerates_missing_keys() {
        let envelope: Envelope = serde_json::from_str(r#"{"$error":"denied"}"#).unwrap();
        assert_eq!(envelope.error.as_deref(), Some("denied"));
        assert!(envelope.data.is_none());
    }

    #[test]
    fn http_method_round_trips() {
        for (name, method) in [
            ("get", HttpMethod::Get),
            ("put", HttpMethod::Put),
            ("post", HttpMethod::Post),
            ("delete", HttpMethod::Delete),
        ] {
            assert_eq!(name.parse::<HttpMethod>().unwrap(), method);
        }
        assert!("patch".parse::<HttpMethod>().is_err());
    }

    #[test]
    fn serialize_query_flat_map() {
        let query = serialize_query(&json!({"limit": 10, "q": "blue shirt"}));
        assert_eq!(query, "limit=10&q=blue%20shirt");
    }

    #[test]
    fn serialize_query_nested() {
        let query = serialize_query(&json!({"where": {"active": true}, "tags": ["a", "b"]}));
        assert_eq!(query, "tags%5B%5D=a&tags%5B%5D=b&where%5Bactive%5D=true");
    }

    #[test]
    fn serialize_query_null_is_empty_value() {
        assert_eq!(serialize_query(&json!({"parent_id": null})), "parent_id=");
    }

    #[test]
    fn log_sanitizer_truncates_on_char_boundaries() {
        // A multi-byte character straddling the truncation offset must not
        // split mid-character.
        let body = format!("{}é and more non-envelope text", "a".repeat(199));
        let sanitized = sanitize_for_log(&body);
        assert!(sanitized.contains("truncated"));
        assert!(sanitized.starts_with(&"a".repeat(199)));

        let short = "short body";
        assert_eq!(sanitize_for_log(short), short);
    }
}
