//! A minimal HTTP model.
//!
//! The engine speaks to the server through [`HttpRequest`] and
//! [`HttpResponse`] values. A real deployment puts a network transport
//! behind them; tests and the loopback client call an [`HttpService`]
//! directly.

use crate::error::ProtocolResult;
use crate::messages::ErrorBody;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Header names, lowercase.
pub mod headers {
    /// Bearer token header.
    pub const AUTHORIZATION: &str = "authorization";
    /// Client-chosen key that makes an upload safe to replay.
    pub const IDEMPOTENCY_KEY: &str = "idempotency-key";
    /// Body media type.
    pub const CONTENT_TYPE: &str = "content-type";
}

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `DELETE`
    Delete,
}

impl Method {
    /// Method name as sent on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Method.
    pub method: Method,
    /// Path without query string.
    pub path: String,
    /// Decoded query parameters.
    pub query: BTreeMap<String, String>,
    /// Headers with lowercase names.
    pub headers: BTreeMap<String, String>,
    /// Body text.
    pub body: Option<String>,
}

impl HttpRequest {
    /// Creates a request with no query, headers or body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    /// Adds a query parameter.
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Adds a header. Names are stored lowercase.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Sets a JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be serialized.
    pub fn with_json<T: Serialize>(mut self, body: &T) -> ProtocolResult<Self> {
        self.body = Some(serde_json::to_string(body)?);
        Ok(self.with_header(headers::CONTENT_TYPE, "application/json"))
    }

    /// Looks up a header, case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// The bearer token from the `Authorization` header.
    #[must_use]
    pub fn bearer_token(&self) -> Option<&str> {
        self.header(headers::AUTHORIZATION)
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
    }

    /// Decodes the JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is absent or does not decode as `T`.
    pub fn json<T: DeserializeOwned>(&self) -> ProtocolResult<T> {
        Ok(serde_json::from_str(self.body.as_deref().unwrap_or(""))?)
    }
}

/// An HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Body text, empty for bodiless answers.
    pub body: String,
}

impl HttpResponse {
    /// A JSON response.
    #[must_use]
    pub fn json<T: Serialize>(status: u16, body: &T) -> Self {
        match serde_json::to_string(body) {
            Ok(body) => Self { status, body },
            Err(e) => Self::error(500, "internal", format!("response encoding failed: {e}")),
        }
    }

    /// A bodiless response.
    #[must_use]
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
        }
    }

    /// An error response with an [`ErrorBody`].
    pub fn error(status: u16, code: &str, message: impl Into<String>) -> Self {
        let body = ErrorBody::new(code, message);
        Self {
            status,
            body: serde_json::to_string(&body).unwrap_or_default(),
        }
    }

    /// Returns true for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decodes the JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error if the body does not decode as `T`.
    pub fn json_body<T: DeserializeOwned>(&self) -> ProtocolResult<T> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// The error body, if the body is one.
    #[must_use]
    pub fn error_body(&self) -> Option<ErrorBody> {
        serde_json::from_str(&self.body).ok()
    }
}

/// Something that answers HTTP requests.
pub trait HttpService: Send + Sync {
    /// Handles one request.
    fn handle(&self, request: &HttpRequest) -> HttpResponse;
}

impl<S: HttpService + ?Sized> HttpService for std::sync::Arc<S> {
    fn handle(&self, request: &HttpRequest) -> HttpResponse {
        (**self).handle(request)
    }
}
