use std::fmt;

use bytes::Bytes;

use crate::http::headers::Headers;

/// HTTP protocol versions understood by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Version {
    /// HTTP/0.9 simple request: `GET <url>` with no headers or body
    Http09,
    /// HTTP/1.0
    Http10,
    /// HTTP/1.1
    Http11,
}

impl Version {
    /// Parses the numeric part of an `HTTP/<n.n>` token.
    ///
    /// ```
    /// # use hearth::http::request::Version;
    /// assert_eq!(Version::from_token("1.1"), Some(Version::Http11));
    /// assert_eq!(Version::from_token("2.0"), None);
    /// ```
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "0.9" => Some(Version::Http09),
            "1.0" => Some(Version::Http10),
            "1.1" => Some(Version::Http11),
            _ => None,
        }
    }

    /// The numeric token, e.g. `"1.1"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http09 => "0.9",
            Version::Http10 => "1.0",
            Version::Http11 => "1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP/{}", self.as_str())
    }
}

/// HTTP request methods.
///
/// Matching is case-sensitive: only the uppercase spelling is a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(clippy::upper_case_acronyms)]
pub enum Method {
    /// HEAD - Like GET but without the response body
    HEAD,
    /// GET - Retrieve a resource
    GET,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// TRACE - Loop the request back
    TRACE,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// CONNECT - Establish a tunnel
    CONNECT,
    /// PATCH - Partial modification of a resource
    PATCH,
}

impl Method {
    /// Parses an HTTP method token.
    ///
    /// ```
    /// # use hearth::http::request::Method;
    /// assert_eq!(Method::parse("GET"), Some(Method::GET));
    /// assert_eq!(Method::parse("get"), None);
    /// ```
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "HEAD" => Some(Method::HEAD),
            "GET" => Some(Method::GET),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            "TRACE" => Some(Method::TRACE),
            "OPTIONS" => Some(Method::OPTIONS),
            "CONNECT" => Some(Method::CONNECT),
            "PATCH" => Some(Method::PATCH),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::HEAD => "HEAD",
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::TRACE => "TRACE",
            Method::OPTIONS => "OPTIONS",
            Method::CONNECT => "CONNECT",
            Method::PATCH => "PATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed HTTP request.
///
/// Produced once per message by the parser and never mutated afterwards;
/// every keep-alive exchange parses a fresh one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Protocol version from the request line
    pub version: Version,
    /// The HTTP method (GET, POST, etc.)
    pub method: Method,
    /// The request target exactly as sent (e.g. "/search?q=rust")
    pub target: String,
    /// Request headers, original casing and order preserved
    pub headers: Headers,
    /// Request body, if the message carried one
    pub body: Option<Bytes>,
}

/// Builder for constructing Request objects.
pub struct RequestBuilder {
    version: Version,
    method: Method,
    target: String,
    headers: Headers,
    body: Option<Bytes>,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            version: Version::Http11,
            method: Method::GET,
            target: "/".to_string(),
            headers: Headers::new(),
            body: None,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(key, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn build(self) -> Request {
        Request {
            version: self.version,
            method: self.method,
            target: self.target,
            headers: self.headers,
            body: self.body,
        }
    }
}

impl Request {
    /// Retrieves a header value by name, ignoring case.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// The target without its query string.
    pub fn path(&self) -> &str {
        match self.target.split_once('?') {
            Some((path, _)) => path,
            None => &self.target,
        }
    }

    /// Determines whether the connection should remain open after the response.
    ///
    /// HTTP/1.1 stays open unless the client sent `Connection: close`;
    /// HTTP/1.0 stays open only with an explicit `Connection: keep-alive`.
    /// HTTP/0.9 never does.
    pub fn keep_alive(&self) -> bool {
        let connection = self.header("Connection").map(str::trim);

        match self.version {
            Version::Http11 => !connection.is_some_and(|v| v.eq_ignore_ascii_case("close")),
            Version::Http10 => connection.is_some_and(|v| v.eq_ignore_ascii_case("keep-alive")),
            Version::Http09 => false,
        }
    }
}
