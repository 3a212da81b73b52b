//! Error types for the Storefront SDK
//!
//! The taxonomy separates programming errors (missing call arguments, bad
//! route tables) from runtime conditions (server `$error` envelopes, empty
//! responses, transport failures). Missing-argument errors are returned
//! synchronously from the bound call, before any request is scheduled;
//! everything else travels through the returned future.

use thiserror::Error;

/// Result alias used across the crate.
pub type ApiResult<T> = Result<T, Error>;

/// All errors surfaced by the SDK.
///
/// `Clone` is required because a coalesced chainable dispatch resolves every
/// pending caller with the same outcome.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Error {
    /// One or more required parameters were absent after merging positional
    /// arguments, extra data and the root context's buffered data.
    ///
    /// `keys` lists every declared parameter key in declaration order.
    #[error("call to `{method}` missing one or more arguments ({keys})")]
    MissingArguments { method: String, keys: String },

    /// The server returned an `$error` envelope.
    #[error("request failed ({status}): {message}")]
    Request { status: u16, message: String },

    /// The transport produced no envelope at all.
    #[error("request failed (500): empty response from server")]
    EmptyResponse,

    /// Transport-level failure (connection, TLS, body read, JSON parse).
    #[error("transport error: {0}")]
    Transport(String),

    /// Method name not present on the bound namespace.
    #[error("unknown method `{name}`")]
    UnknownMethod { name: String },

    /// Namespace name not present on the bound object graph.
    #[error("unknown namespace `{name}`")]
    UnknownNamespace { name: String },

    /// A route table entry could not be compiled.
    #[error("invalid route definition: {0}")]
    InvalidRoute(String),

    /// The base URL handed to the client could not be parsed.
    #[error("invalid base url: {0}")]
    InvalidBaseUrl(String),
}

impl Error {
    /// Status code carried by request-shaped errors.
    ///
    /// `EmptyResponse` reports 500, matching the envelope the server would
    /// have produced for a dropped response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Request { status, .. } => Some(*status),
            Self::EmptyResponse => Some(500),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_arguments_message_names_method_and_keys() {
        let err = Error::MissingArguments {
            method: "products.get".to_string(),
            keys: "product_id, id".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "call to `products.get` missing one or more arguments (product_id, id)"
        );
    }

    #[test]
    fn empty_response_reports_500() {
        assert_eq!(Error::EmptyResponse.status(), Some(500));
        assert_eq!(
            Error::Request {
                status: 404,
                message: "not found".into()
            }
            .status(),
            Some(404)
        );
        assert_eq!(Error::Transport("boom".into()).status(), None);
    }
}
