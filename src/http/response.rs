use std::fmt;

use bytes::Bytes;
use thiserror::Error;

use crate::http::headers::Headers;
use crate::http::request::{Method, Request, Version};

/// Returned when a status code falls outside `100..=599`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("the HTTP status code \"{0}\" is not valid")]
pub struct InvalidStatusCode(pub u16);

/// A validated HTTP status code.
///
/// Holding a `StatusCode` means the value is within `100..=599`; the
/// classification helpers are pure functions of the number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StatusCode(u16);

impl StatusCode {
    pub const CONTINUE: StatusCode = StatusCode(100);
    pub const OK: StatusCode = StatusCode(200);
    pub const CREATED: StatusCode = StatusCode(201);
    pub const NO_CONTENT: StatusCode = StatusCode(204);
    pub const MOVED_PERMANENTLY: StatusCode = StatusCode(301);
    pub const FOUND: StatusCode = StatusCode(302);
    pub const NOT_MODIFIED: StatusCode = StatusCode(304);
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const FORBIDDEN: StatusCode = StatusCode(403);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const METHOD_NOT_ALLOWED: StatusCode = StatusCode(405);
    pub const INTERNAL_SERVER_ERROR: StatusCode = StatusCode(500);
    pub const SERVICE_UNAVAILABLE: StatusCode = StatusCode(503);

    /// Validates a numeric status code.
    ///
    /// ```
    /// # use hearth::http::response::StatusCode;
    /// assert!(StatusCode::new(204).is_ok());
    /// assert!(StatusCode::new(99).is_err());
    /// assert!(StatusCode::new(600).is_err());
    /// ```
    pub fn new(code: u16) -> Result<Self, InvalidStatusCode> {
        if (100..=599).contains(&code) {
            Ok(StatusCode(code))
        } else {
            Err(InvalidStatusCode(code))
        }
    }

    /// Returns the numeric HTTP status code.
    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// Returns the standard reason phrase, or `""` for unregistered codes.
    ///
    /// ```
    /// # use hearth::http::response::StatusCode;
    /// assert_eq!(StatusCode::OK.reason_phrase(), "OK");
    /// assert_eq!(StatusCode::NOT_FOUND.reason_phrase(), "Not Found");
    /// ```
    pub fn reason_phrase(&self) -> &'static str {
        match self.0 {
            100 => "Continue",
            101 => "Switching Protocols",
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            203 => "Non-Authoritative Information",
            204 => "No Content",
            205 => "Reset Content",
            206 => "Partial Content",
            300 => "Multiple Choices",
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            304 => "Not Modified",
            305 => "Use Proxy",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            400 => "Bad Request",
            401 => "Unauthorized",
            402 => "Payment Required",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            406 => "Not Acceptable",
            407 => "Proxy Authentication Required",
            408 => "Request Timeout",
            409 => "Conflict",
            410 => "Gone",
            411 => "Length Required",
            412 => "Precondition Failed",
            413 => "Request Entity Too Large",
            414 => "Request-URI Too Long",
            415 => "Unsupported Media Type",
            416 => "Requested Range Not Satisfiable",
            417 => "Expectation Failed",
            418 => "I'm a teapot",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            505 => "HTTP Version Not Supported",
            _ => "",
        }
    }

    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.0)
    }

    pub fn is_successful(&self) -> bool {
        (200..300).contains(&self.0)
    }

    pub fn is_redirection(&self) -> bool {
        (300..400).contains(&self.0)
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.0)
    }

    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.0)
    }

    pub fn is_ok(&self) -> bool {
        self.0 == 200
    }

    pub fn is_forbidden(&self) -> bool {
        self.0 == 403
    }

    pub fn is_not_found(&self) -> bool {
        self.0 == 404
    }

    /// Statuses that point the client at a `Location`.
    pub fn is_redirect(&self) -> bool {
        matches!(self.0, 201 | 301 | 302 | 303 | 307 | 308)
    }

    /// Statuses that must never carry a body.
    pub fn is_empty(&self) -> bool {
        matches!(self.0, 201 | 204 | 304)
    }
}

impl TryFrom<u16> for StatusCode {
    type Error = InvalidStatusCode;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        StatusCode::new(code)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An HTTP response.
///
/// Built by a handler, possibly transformed by filters, finalized by the
/// connection and serialized exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Protocol version of the status line
    pub version: Version,
    /// The HTTP status code
    pub status: StatusCode,
    /// Reason phrase; empty when suppressed
    pub status_text: String,
    /// HTTP headers, serialized in insertion order
    pub headers: Headers,
    /// Response body as bytes
    pub body: Option<Bytes>,
}

/// Builder for constructing HTTP responses in a fluent style.
///
/// # Example
///
/// ```
/// # use hearth::http::response::{ResponseBuilder, StatusCode};
/// let response = ResponseBuilder::new(StatusCode::OK)
///     .header("Content-Type", "application/json")
///     .body("{}")
///     .build();
/// assert_eq!(response.headers.get("Content-Length"), Some("2"));
/// ```
pub struct ResponseBuilder {
    version: Version,
    status: StatusCode,
    status_text: Option<String>,
    headers: Headers,
    body: Option<Bytes>,
}

impl ResponseBuilder {
    /// Creates a new response builder with the specified status code.
    pub fn new(status: StatusCode) -> Self {
        Self {
            version: Version::Http11,
            status,
            status_text: None,
            headers: Headers::new(),
            body: None,
        }
    }

    /// Creates a builder from a raw code, rejecting codes outside `100..=599`.
    pub fn from_code(code: u16) -> Result<Self, InvalidStatusCode> {
        Ok(Self::new(StatusCode::new(code)?))
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Overrides the reason phrase taken from the status table.
    pub fn status_text(mut self, text: impl Into<String>) -> Self {
        self.status_text = Some(text.into());
        self
    }

    /// Emits an empty reason phrase.
    pub fn suppress_status_text(mut self) -> Self {
        self.status_text = Some(String::new());
        self
    }

    /// Adds or replaces a header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(key, value);
        self
    }

    /// Sets the response body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Builds the final Response.
    ///
    /// Adds a Content-Length header matching the body if none was given.
    pub fn build(mut self) -> Response {
        if let Some(body) = &self.body
            && !self.headers.contains("Content-Length")
        {
            self.headers.set("Content-Length", body.len().to_string());
        }

        Response {
            version: self.version,
            status_text: self
                .status_text
                .unwrap_or_else(|| self.status.reason_phrase().to_string()),
            status: self.status,
            headers: self.headers,
            body: self.body,
        }
    }
}

impl Response {
    /// Creates a bodiless response with the default reason phrase.
    pub fn new(status: StatusCode) -> Self {
        ResponseBuilder::new(status).build()
    }

    /// Creates a simple 200 OK response with the given body.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        ResponseBuilder::new(StatusCode::OK).body(body).build()
    }

    /// Creates a 404 Not Found response.
    pub fn not_found() -> Self {
        ResponseBuilder::new(StatusCode::NOT_FOUND)
            .header("Content-Type", "text/html; charset=UTF-8")
            .body("<h1>Error 404 - Not Found</h1>")
            .build()
    }

    /// Changes the status, resetting the reason phrase from the table.
    pub fn set_status(&mut self, code: u16) -> Result<(), InvalidStatusCode> {
        self.status = StatusCode::new(code)?;
        self.status_text = self.status.reason_phrase().to_string();
        Ok(())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Replaces the body, keeping Content-Length in step.
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        let body = body.into();
        self.headers.set("Content-Length", body.len().to_string());
        self.body = Some(body);
    }

    pub fn body_len(&self) -> usize {
        self.body.as_ref().map_or(0, Bytes::len)
    }

    /// Whether a response to `request` may carry a body at all.
    pub fn allows_body(&self, request: &Request) -> bool {
        request.method != Method::HEAD
            && !self.status.is_empty()
            && !self.status.is_informational()
    }

    /// Drops the body and every `Content-*` header.
    pub fn strip_body(&mut self) {
        self.body = None;
        self.headers.retain(|name, _| {
            !name
                .get(..8)
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case("content-"))
        });
    }
}
