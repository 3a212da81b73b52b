//! Storefront API client
//!
//! [`Client`] joins a validated base URL with a pluggable [`Transport`],
//! dispatches requests, and hands every returned envelope to the resource
//! hydration layer. It also owns the per-client `$links` cache that lets
//! collection-child records inherit the link declarations of their route.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use url::Url;

use crate::error::{ApiResult, Error};
use crate::resource::{Collection, Record, Response};
use crate::transport::{Envelope, HttpMethod, HttpTransport, Transport};

/// Shared client handle. Cheap to clone; every resource wrapper holds one.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    base_url: Arc<str>,
    links: Arc<Mutex<HashMap<String, Value>>>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a client over the default HTTP transport, without a public key.
    pub fn new(base_url: &str) -> ApiResult<Self> {
        Self::with_transport(base_url, Arc::new(HttpTransport::new(None)?))
    }

    /// Create a client authenticating with a public key.
    pub fn with_key(base_url: &str, public_key: &str) -> ApiResult<Self> {
        Self::with_transport(base_url, Arc::new(HttpTransport::new(Some(public_key))?))
    }

    /// Create a client over a custom transport.
    pub fn with_transport(base_url: &str, transport: Arc<dyn Transport>) -> ApiResult<Self> {
        let parsed = Url::parse(base_url).map_err(|e| Error::InvalidBaseUrl(e.to_string()))?;
        if !parsed.has_host() {
            return Err(Error::InvalidBaseUrl(format!("`{base_url}` has no host")));
        }
        Ok(Self {
            transport,
            base_url: Arc::from(base_url.trim_end_matches('/')),
            links: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Dispatch a request and hydrate the response envelope.
    ///
    /// `url` is a server path (`/v1/products/1`); the base URL is prepended
    /// here. Envelope `$error`s surface as [`Error::Request`]; a missing
    /// envelope surfaces as [`Error::EmptyResponse`].
    pub async fn request(
        &self,
        method: HttpMethod,
        url: &str,
        data: Option<Value>,
    ) -> ApiResult<Response> {
        let absolute = self.absolute_url(url);
        tracing::debug!("{} {}", method, url);
        let envelope = self.transport.request(method, &absolute, data.as_ref()).await?;
        self.hydrate(url, envelope)
    }

    /// GET a resource.
    pub async fn get(&self, url: &str, data: Option<Value>) -> ApiResult<Response> {
        self.request(HttpMethod::Get, url, data).await
    }

    /// PUT a resource.
    pub async fn put(&self, url: &str, data: Option<Value>) -> ApiResult<Response> {
        self.request(HttpMethod::Put, url, data).await
    }

    /// POST a resource.
    pub async fn post(&self, url: &str, data: Option<Value>) -> ApiResult<Response> {
        self.request(HttpMethod::Post, url, data).await
    }

    /// DELETE a resource.
    pub async fn delete(&self, url: &str, data: Option<Value>) -> ApiResult<Response> {
        self.request(HttpMethod::Delete, url, data).await
    }

    fn absolute_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Turn an envelope into a typed wrapper.
    ///
    /// Collection/record dispatch: `$data` objects carrying both `count` and
    /// `results` hydrate as a [`Collection`], other objects as a [`Record`],
    /// scalars pass through raw.
    fn hydrate(&self, request_url: &str, envelope: Option<Envelope>) -> ApiResult<Response> {
        let Some(envelope) = envelope else {
            return Err(Error::EmptyResponse);
        };

        if let Some(message) = envelope.error {
            let status = envelope.status.unwrap_or(500);
            tracing::error!("request error ({status}): {message}");
            return Err(Error::Request { status, message });
        }

        let url = envelope
            .url
            .unwrap_or_else(|| strip_query(request_url).to_string());

        match envelope.data {
            None | Some(Value::Null) => Ok(Response::Value(Value::Null)),
            Some(Value::Object(map)) => {
                if map.contains_key("count") && map.contains_key("results") {
                    Ok(Response::Collection(Collection::new(
                        &url,
                        map,
                        envelope.links,
                        self.clone(),
                    )))
                } else {
                    Ok(Response::Record(Record::new(
                        &url,
                        map,
                        envelope.links,
                        self.clone(),
                        None,
                    )))
                }
            },
            Some(other) => Ok(Response::Value(other)),
        }
    }

    // =========================================================================
    // $links cache
    // =========================================================================

    /// Remember link declarations for a resource URL.
    pub(crate) fn cache_links(&self, url: &str, links: &Value) {
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), links.clone());
    }

    /// Link declarations previously seen for a resource URL.
    pub(crate) fn cached_links(&self, url: &str) -> Option<Value> {
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
    }
}

/// Strip a query string from a URL path.
pub(crate) fn strip_query(url: &str) -> &str {
    match url.find('?') {
        Some(pos) => &url[..pos],
        None => url,
    }
}
