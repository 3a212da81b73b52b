//! API binder and request pipeline
//!
//! Walks a compiled route tree and produces a bound object graph of
//! [`Namespace`]s and [`BoundMethod`]s sharing one [`Client`] and one root
//! context. The root context owns the debounce buffer that lets chainable
//! calls made within the same window coalesce into a single dispatched
//! request.
//!
//! Bound calls must be made within a tokio runtime: dispatch happens on a
//! spawned task so that non-chainable requests fire immediately, whether or
//! not the caller awaits.

pub mod registry;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::client::Client;
use crate::error::{ApiResult, Error};
use crate::params::resolve;
use crate::resource::Response;
use crate::routes::{substitute_url, RouteEntry, RouteMap, RouteSpec};

/// Debounce window between a chainable call and its dispatch.
const DEBOUNCE_WINDOW: Duration = Duration::from_millis(1);

/// Bind the embedded v1 route tables to a client.
pub fn create(client: &Client) -> Namespace {
    bind(client, &[registry::v1_routes()])
}

/// Bind route trees to a client, producing the bound object graph.
///
/// Later trees never overwrite names claimed by earlier ones (first writer
/// wins), which is what lets a bound graph be extended incrementally. All
/// namespaces, however deeply nested, share the top-level root context.
pub fn bind(client: &Client, trees: &[&RouteMap]) -> Namespace {
    let root = RootContext::default();
    Namespace::build(client, &root, trees)
}

// =============================================================================
// Root context
// =============================================================================

/// Shared debounce state for one bound tree.
#[derive(Clone, Default)]
pub(crate) struct RootContext {
    state: Arc<Mutex<PendingState>>,
}

#[derive(Default)]
struct PendingState {
    /// Parameters accumulated by chainable calls in the current window.
    buffered: Map<String, Value>,
    /// Bumped on every (re)schedule; a dispatch task only fires if it still
    /// owns the latest generation.
    generation: u64,
    task: Option<JoinHandle<()>>,
    /// Everyone awaiting the coalesced dispatch, across reschedules.
    waiters: Vec<oneshot::Sender<ApiResult<Response>>>,
}

impl RootContext {
    fn lock(&self) -> MutexGuard<'_, PendingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the buffered chain data, for parameter resolution.
    fn buffered(&self) -> Map<String, Value> {
        self.lock().buffered.clone()
    }
}

// =============================================================================
// Bound methods
// =============================================================================

/// A route bound to a client and a root context. Calling it never mutates
/// the underlying [`RouteSpec`].
#[derive(Clone)]
pub struct BoundMethod {
    spec: Arc<RouteSpec>,
    client: Client,
    root: RootContext,
}

impl fmt::Debug for BoundMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundMethod")
            .field("name", &self.spec.name)
            .field("chainable", &self.spec.chainable)
            .finish_non_exhaustive()
    }
}

impl BoundMethod {
    /// Dotted display name of the bound route.
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Invoke the route with positional arguments.
    ///
    /// Missing required parameters surface as an immediate `Err`, before any
    /// timer is scheduled or the transport is touched. Non-chainable routes
    /// dispatch immediately; chainable routes buffer into the root context
    /// and coalesce with other chainable calls in the same window.
    pub fn call(&self, args: &[Value]) -> ApiResult<PendingRequest> {
        let carried = self.root.buffered();
        let resolved = resolve(args, &self.spec.params, &self.spec.name, &carried)?;

        if !self.spec.chainable {
            return Ok(self.dispatch_now(resolved.data));
        }
        Ok(self.dispatch_deferred(resolved.data))
    }

    fn dispatch_now(&self, mut data: Map<String, Value>) -> PendingRequest {
        let url = substitute_url(&self.spec.url_template, &mut data);
        let payload = (!data.is_empty()).then(|| Value::Object(data));
        let client = self.client.clone();
        let method = self.spec.method;

        let handle = tokio::spawn(async move { client.request(method, &url, payload).await });
        PendingRequest::immediate(handle)
    }

    fn dispatch_deferred(&self, data: Map<String, Value>) -> PendingRequest {
        let (tx, rx) = oneshot::channel();

        // Merge and URL substitution share one critical section, so a call
        // arriving in between can never see a half-updated buffer. The URL is
        // fixed per call from the merged buffer; placeholder keys are
        // consumed so they never ride along in the payload. The last
        // scheduled call's URL is the one that fires.
        let (generation, url) = {
            let mut state = self.root.lock();
            // Only the most recent chain survives to fire.
            if let Some(task) = state.task.take() {
                task.abort();
            }
            state.generation += 1;
            for (key, value) in data {
                state.buffered.insert(key, value);
            }
            state.waiters.push(tx);
            let url = substitute_url(&self.spec.url_template, &mut state.buffered);
            (state.generation, url)
        };

        let root = self.root.clone();
        let client = self.client.clone();
        let method = self.spec.method;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(DEBOUNCE_WINDOW).await;

            let taken = {
                let mut state = root.lock();
                if state.generation != generation {
                    None
                } else {
                    state.task = None;
                    // Detach the buffer so a new chain can start while this
                    // request is in flight.
                    Some((
                        std::mem::take(&mut state.buffered),
                        std::mem::take(&mut state.waiters),
                    ))
                }
            };
            let Some((data, waiters)) = taken else {
                return;
            };

            let payload = (!data.is_empty()).then(|| Value::Object(data));
            let result = client.request(method, &url, payload).await;
            for waiter in waiters {
                let _ = waiter.send(result.clone());
            }
        });

        self.root.lock().task = Some(handle);
        PendingRequest::deferred(rx)
    }
}

// =============================================================================
// Pending requests
// =============================================================================

/// A request in flight (or waiting out its debounce window).
///
/// Awaiting it yields the hydrated response. For chainable calls it also
/// carries the originating namespace, so a caller can keep issuing chained
/// calls against the same root without holding the namespace separately.
pub struct PendingRequest {
    future: BoxFuture<'static, ApiResult<Response>>,
    context: Option<Namespace>,
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("context", &self.context.as_ref().map(|_| ".."))
            .finish_non_exhaustive()
    }
}

impl PendingRequest {
    fn immediate(handle: JoinHandle<ApiResult<Response>>) -> Self {
        let future = async move {
            handle
                .await
                .unwrap_or_else(|e| Err(Error::Transport(format!("dispatch task failed: {e}"))))
        }
        .boxed();
        Self {
            future,
            context: None,
        }
    }

    fn deferred(rx: oneshot::Receiver<ApiResult<Response>>) -> Self {
        let future = async move {
            rx.await
                .unwrap_or_else(|_| Err(Error::Transport("dispatch was cancelled".to_string())))
        }
        .boxed();
        Self {
            future,
            context: None,
        }
    }

    fn with_context(mut self, namespace: Namespace) -> Self {
        self.context = Some(namespace);
        self
    }

    /// The namespace this request was issued from.
    pub fn context(&self) -> Option<&Namespace> {
        self.context.as_ref()
    }

    /// Issue a follow-up call on the originating namespace; a chainable
    /// follow-up extends the same pending buffer.
    pub fn call(&self, name: &str, args: &[Value]) -> ApiResult<PendingRequest> {
        match &self.context {
            Some(namespace) => namespace.call(name, args),
            None => Err(Error::UnknownMethod {
                name: name.to_string(),
            }),
        }
    }
}

impl Future for PendingRequest {
    type Output = ApiResult<Response>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().future.as_mut().poll(cx)
    }
}

// =============================================================================
// Namespaces
// =============================================================================

/// A bound node of the object graph: callable methods plus nested
/// namespaces, all sharing one client and one root context.
#[derive(Clone)]
pub struct Namespace {
    inner: Arc<NamespaceInner>,
}

struct NamespaceInner {
    methods: BTreeMap<String, BoundMethod>,
    children: BTreeMap<String, Namespace>,
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("methods", &self.inner.methods.keys().collect::<Vec<_>>())
            .field("children", &self.inner.children.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Namespace {
    fn build(client: &Client, root: &RootContext, trees: &[&RouteMap]) -> Self {
        let mut methods: BTreeMap<String, BoundMethod> = BTreeMap::new();
        let mut child_sources: BTreeMap<String, Vec<&RouteMap>> = BTreeMap::new();

        for tree in trees {
            for (key, entry) in tree.iter() {
                match entry {
                    RouteEntry::Method(spec) => {
                        if methods.contains_key(key) || child_sources.contains_key(key) {
                            continue;
                        }
                        methods.insert(
                            key.clone(),
                            BoundMethod {
                                spec: Arc::clone(spec),
                                client: client.clone(),
                                root: root.clone(),
                            },
                        );
                    },
                    RouteEntry::Namespace(map) => {
                        if methods.contains_key(key) {
                            continue;
                        }
                        child_sources.entry(key.clone()).or_default().push(map);
                    },
                }
            }
        }

        let children = child_sources
            .into_iter()
            .map(|(key, sources)| {
                // Same root all the way down: nested chainable calls share
                // the top-level buffer.
                let nested = Namespace::build(client, root, &sources);
                (key, nested)
            })
            .collect();

        Self {
            inner: Arc::new(NamespaceInner { methods, children }),
        }
    }

    /// Invoke a bound method by name.
    pub fn call(&self, name: &str, args: &[Value]) -> ApiResult<PendingRequest> {
        let method = self
            .inner
            .methods
            .get(name)
            .ok_or_else(|| Error::UnknownMethod {
                name: name.to_string(),
            })?;
        Ok(method.call(args)?.with_context(self.clone()))
    }

    /// Invoke the namespace itself: shorthand for its `get` method.
    ///
    /// A namespace with a `get` route is both a data fetcher and a method
    /// bag; this is the callable entry point.
    pub fn invoke(&self, args: &[Value]) -> ApiResult<PendingRequest> {
        self.call("get", args)
    }

    /// A nested namespace by name.
    pub fn namespace(&self, name: &str) -> ApiResult<&Namespace> {
        self.inner
            .children
            .get(name)
            .ok_or_else(|| Error::UnknownNamespace {
                name: name.to_string(),
            })
    }

    /// A bound method by name.
    pub fn method(&self, name: &str) -> Option<&BoundMethod> {
        self.inner.methods.get(name)
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.inner.methods.contains_key(name)
    }

    /// Bound method names, sorted.
    pub fn method_names(&self) -> impl Iterator<Item = &String> {
        self.inner.methods.keys()
    }

    /// Nested namespace names, sorted.
    pub fn namespace_names(&self) -> impl Iterator<Item = &String> {
        self.inner.children.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::{define_methods, define_model};
    use crate::transport::{Envelope, HttpMethod, Transport};
    use async_trait::async_trait;
    use serde_json::json;

    /// Transport that records every dispatched request.
    struct RecordingTransport {
        calls: Mutex<Vec<(HttpMethod, String, Option<Value>)>>,
    }

    impl RecordingTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(HttpMethod, String, Option<Value>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn request(
            &self,
            method: HttpMethod,
            url: &str,
            data: Option<&Value>,
        ) -> ApiResult<Option<Envelope>> {
            self.calls
                .lock()
                .unwrap()
                .push((method, url.to_string(), data.cloned()));
            Ok(Some(Envelope {
                data: Some(json!({"ok": true})),
                ..Envelope::default()
            }))
        }
    }

    fn harness(routes: &RouteMap) -> (Arc<RecordingTransport>, Namespace) {
        let transport = RecordingTransport::new();
        let client = Client::with_transport(
            "http://api.test",
            Arc::clone(&transport) as Arc<dyn Transport>,
        )
        .unwrap();
        let api = bind(&client, &[routes]);
        (transport, api)
    }

    fn products() -> RouteMap {
        let mut map = RouteMap::new();
        map.insert(
            "products".to_string(),
            RouteEntry::Namespace(define_model("products", None).unwrap()),
        );
        map
    }

    fn cart() -> RouteMap {
        let routes = json!({
            "get": ["get", "/cart"],
            "update": ["put", "/cart"],
            "checkout": ["post", "/cart/checkout"]
        });
        let mut map = RouteMap::new();
        map.insert(
            "cart".to_string(),
            RouteEntry::Namespace(define_methods("cart", &routes).unwrap()),
        );
        map
    }

    #[tokio::test]
    async fn non_chainable_dispatches_immediately() {
        let (transport, api) = harness(&products());
        let pending = api
            .namespace("products")
            .unwrap()
            .call("create", &[json!({"name": "Blue Shirt"})])
            .unwrap();
        let response = pending.await.unwrap();
        assert!(response.record().is_some());

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, HttpMethod::Post);
        assert_eq!(calls[0].1, "http://api.test/v1/products");
        assert_eq!(calls[0].2, Some(json!({"name": "Blue Shirt"})));
    }

    #[tokio::test]
    async fn chainable_calls_coalesce_into_one_request() {
        let (transport, api) = harness(&cart());
        let cart = api.namespace("cart").unwrap();

        let first = cart.call("get", &[json!({"a": 1})]).unwrap();
        let second = cart.call("get", &[json!({"a": 2, "b": 3})]).unwrap();

        let response = second.await.unwrap();
        assert!(response.record().is_some());
        // Every coalesced caller resolves with the same dispatch.
        assert!(first.await.is_ok());

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, HttpMethod::Get);
        assert_eq!(calls[0].1, "http://api.test/v1/cart");
        // Last-write-wins merge across the window.
        assert_eq!(calls[0].2, Some(json!({"a": 2, "b": 3})));
    }

    #[tokio::test]
    async fn chainable_url_params_do_not_ride_in_payload() {
        let (transport, api) = harness(&products());
        let pending = api
            .namespace("products")
            .unwrap()
            .call("get", &[json!("123"), json!({"expand": "category"})])
            .unwrap();
        pending.await.unwrap();

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, "http://api.test/v1/products/123");
        assert_eq!(calls[0].2, Some(json!({"expand": "category"})));
    }

    #[tokio::test]
    async fn superseded_chain_never_fires_its_own_request() {
        let (transport, api) = harness(&products());
        let ns = api.namespace("products").unwrap();

        let _first = ns.call("get", &[json!("1")]).unwrap();
        let second = ns.call("get", &[json!("2")]).unwrap();
        second.await.unwrap();

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, "http://api.test/v1/products/2");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_chains_never_dispatch_partial_urls() {
        let (transport, api) = harness(&products());
        let ns = api.namespace("products").unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let ns = ns.clone();
            handles.push(tokio::spawn(async move {
                let pending = ns.call("get", &[json!(format!("id-{i}"))]).unwrap();
                let _ = pending.await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Every dispatched URL is fully substituted and the id never leaks
        // into the payload, regardless of interleaving.
        let calls = transport.calls();
        assert!(!calls.is_empty());
        for (_, url, data) in calls {
            assert!(!url.contains('{'), "partial url dispatched: {url}");
            assert_eq!(data, None);
        }
    }

    #[tokio::test]
    async fn missing_arguments_fail_before_any_dispatch() {
        let (transport, api) = harness(&products());
        let err = api
            .namespace("products")
            .unwrap()
            .call("get", &[])
            .unwrap_err();
        assert_eq!(
            err,
            Error::MissingArguments {
                method: "products.get".to_string(),
                keys: "id".to_string(),
            }
        );

        // Give any stray task a chance to run, then verify silence.
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn one_shot_write_does_not_disturb_a_pending_chain() {
        let (transport, api) = harness(&cart());
        let cart = api.namespace("cart").unwrap();

        let chained = cart.call("get", &[json!({"session": "s1"})]).unwrap();
        let write = cart.call("checkout", &[]).unwrap();

        write.await.unwrap();
        chained.await.unwrap();

        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        let methods: Vec<HttpMethod> = calls.iter().map(|c| c.0).collect();
        assert!(methods.contains(&HttpMethod::Post));
        assert!(methods.contains(&HttpMethod::Get));
        // The chain kept its buffered payload.
        let get_call = calls.iter().find(|c| c.0 == HttpMethod::Get).unwrap();
        assert_eq!(get_call.2, Some(json!({"session": "s1"})));
    }

    #[tokio::test]
    async fn invoke_is_get_as_callable() {
        let (transport, api) = harness(&cart());
        let cart = api.namespace("cart").unwrap();
        cart.invoke(&[]).unwrap().await.unwrap();
        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, HttpMethod::Get);
        assert_eq!(calls[0].1, "http://api.test/v1/cart");
    }

    #[tokio::test]
    async fn pending_request_context_allows_further_chaining() {
        let (transport, api) = harness(&cart());
        let cart = api.namespace("cart").unwrap();

        let pending = cart.call("get", &[json!({"a": 1})]).unwrap();
        let chained = pending.call("get", &[json!({"b": 2})]).unwrap();

        chained.await.unwrap();
        pending.await.unwrap();

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].2, Some(json!({"a": 1, "b": 2})));
    }

    #[tokio::test]
    async fn first_writer_wins_across_trees() {
        let special = json!({"get": ["get", "/cart/special"]});
        let mut first = RouteMap::new();
        first.insert(
            "cart".to_string(),
            RouteEntry::Namespace(define_methods("cart", &special).unwrap()),
        );

        let transport = RecordingTransport::new();
        let client = Client::with_transport(
            "http://api.test",
            Arc::clone(&transport) as Arc<dyn Transport>,
        )
        .unwrap();
        let api = bind(&client, &[&first, &cart()]);

        let cart_ns = api.namespace("cart").unwrap();
        // `get` came from the first tree; `checkout` filled in from the second.
        cart_ns.call("get", &[]).unwrap().await.unwrap();
        assert!(cart_ns.has_method("checkout"));

        let calls = transport.calls();
        assert_eq!(calls[0].1, "http://api.test/v1/cart/special");
    }

    #[tokio::test]
    async fn unknown_names_are_reported() {
        let (_transport, api) = harness(&cart());
        assert!(matches!(
            api.namespace("nope"),
            Err(Error::UnknownNamespace { .. })
        ));
        assert!(matches!(
            api.namespace("cart").unwrap().call("nope", &[]),
            Err(Error::UnknownMethod { .. })
        ));
    }
}
