//! Storefront - client SDK for the Storefront e-commerce API
//!
//! The SDK compiles declarative JSON route tables into a bound object graph
//! of namespaces and callable methods, resolves positional call arguments
//! onto named parameters, coalesces chainable calls made in the same window
//! into a single request, and hydrates every server envelope into
//! link-aware [`Record`]s and [`Collection`]s.
//!
//! ```no_run
//! use serde_json::json;
//! use storefront::{api, Client};
//!
//! # async fn run() -> storefront::ApiResult<()> {
//! let client = Client::with_key("https://api.example.com", "pk_test")?;
//! let store = api::create(&client);
//!
//! let response = store
//!     .namespace("products")?
//!     .call("get", &[json!("blue-shirt"), json!({"expand": "variants"})])?
//!     .await?;
//! if let Some(product) = response.record() {
//!     println!("{}", product.url());
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod client;
pub mod error;
pub mod params;
pub mod resource;
pub mod routes;
pub mod transport;

pub use api::{bind, create, BoundMethod, Namespace, PendingRequest};
pub use client::Client;
pub use error::{ApiResult, Error};
pub use resource::{Collection, CollectionMeta, Link, LinkItem, Record, Resource, Response};
pub use routes::{define_methods, define_model, RouteEntry, RouteMap, RouteSpec, BASE_PATH};
pub use transport::{serialize_query, Envelope, HttpMethod, HttpTransport, Transport};
