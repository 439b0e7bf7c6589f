//! Request and response model shared by the engine, the store and the fetcher.
//!
//! These are deliberately small: the engine only needs the method, the URL
//! and enough of a response to replay it from the store.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// HTTP request method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Options,
    Post,
    Put,
    Patch,
    Delete,
    Other(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Other(m) => m,
        }
    }
}

impl FromStr for Method {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Ok(match upper.as_str() {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "OPTIONS" => Method::Options,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "PATCH" => Method::Patch,
            "DELETE" => Method::Delete,
            _ => Method::Other(upper),
        })
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outgoing request as seen by the cache engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self { method, url: url.into(), headers: Vec::new(), body: None }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Same URL, different method. Used to address the GET and HEAD variants of a cached URL.
    pub fn with_method(&self, method: Method) -> Self {
        Self { method, url: self.url.clone(), headers: Vec::new(), body: None }
    }
}

/// How a response was obtained, mirroring the fetch response types.
///
/// `Opaque` responses come from cross-origin requests whose status and body
/// cannot be inspected; they report status 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    #[default]
    Basic,
    Cors,
    Opaque,
}

impl ResponseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseKind::Basic => "basic",
            ResponseKind::Cors => "cors",
            ResponseKind::Opaque => "opaque",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "cors" => ResponseKind::Cors,
            "opaque" => ResponseKind::Opaque,
            _ => ResponseKind::Basic,
        }
    }
}

/// A response that can be replayed from the store.
///
/// The body is reference-counted, so `clone()` is cheap and yields an
/// independent handle that can be cached while the original is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub kind: ResponseKind,
}

impl Response {
    pub fn new(status: u16, status_text: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            status_text: status_text.into(),
            headers: Vec::new(),
            body: body.into(),
            kind: ResponseKind::Basic,
        }
    }

    /// The synthesized response used whenever the network cannot answer in time.
    pub fn gateway_timeout() -> Self {
        Self::new(504, "Gateway Timeout", Bytes::new())
    }

    pub fn opaque() -> Self {
        Self { kind: ResponseKind::Opaque, ..Self::new(0, "", Bytes::new()) }
    }

    /// Status in the 200-299 range.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
