use hearth::http::headers::Headers;
use hearth::http::request::{Method, Request, RequestBuilder, Version};

fn request(version: Version, connection: Option<&str>) -> Request {
    let mut builder = RequestBuilder::new().version(version).header("Host", "x");
    if let Some(value) = connection {
        builder = builder.header("Connection", value);
    }
    builder.build()
}

#[test]
fn test_request_header_retrieval() {
    let req = RequestBuilder::new()
        .header("Host", "example.com")
        .header("Content-Type", "application/json")
        .build();

    assert_eq!(req.header("Host"), Some("example.com"));
    assert_eq!(req.header("content-type"), Some("application/json"));
    assert_eq!(req.header("Missing"), None);
}

#[test]
fn test_request_keep_alive_http11_default() {
    assert!(request(Version::Http11, None).keep_alive());
}

#[test]
fn test_request_keep_alive_http11_close() {
    assert!(!request(Version::Http11, Some("close")).keep_alive());
    assert!(!request(Version::Http11, Some("Close")).keep_alive());
}

#[test]
fn test_request_keep_alive_http10_requires_header() {
    assert!(!request(Version::Http10, None).keep_alive());
    assert!(request(Version::Http10, Some("keep-alive")).keep_alive());
    assert!(request(Version::Http10, Some("Keep-Alive")).keep_alive());
}

#[test]
fn test_request_keep_alive_http09_never() {
    assert!(!request(Version::Http09, Some("keep-alive")).keep_alive());
}

#[test]
fn test_request_method_from_string() {
    assert_eq!(Method::parse("GET"), Some(Method::GET));
    assert_eq!(Method::parse("TRACE"), Some(Method::TRACE));
    assert_eq!(Method::parse("INVALID"), None);
    assert_eq!(Method::parse("get"), None);
}

#[test]
fn test_request_method_display() {
    assert_eq!(Method::OPTIONS.to_string(), "OPTIONS");
    assert_eq!(Method::CONNECT.as_str(), "CONNECT");
}

#[test]
fn test_version_display() {
    assert_eq!(Version::Http10.to_string(), "HTTP/1.0");
    assert_eq!(Version::Http11.to_string(), "HTTP/1.1");
}

#[test]
fn test_request_path_strips_query() {
    let req = RequestBuilder::new().target("/a/b?c=d").build();

    assert_eq!(req.path(), "/a/b");
    assert_eq!(req.target, "/a/b?c=d");
}

#[test]
fn test_request_builder_defaults() {
    let req = RequestBuilder::default().build();

    assert_eq!(req.version, Version::Http11);
    assert_eq!(req.method, Method::GET);
    assert_eq!(req.target, "/");
    assert!(req.body.is_none());
}

#[test]
fn test_request_with_body() {
    let req = RequestBuilder::new()
        .method(Method::POST)
        .body(&b"test body content"[..])
        .build();

    assert_eq!(req.body.as_deref(), Some(&b"test body content"[..]));
}

#[test]
fn test_headers_multimap() {
    let mut headers = Headers::new();
    headers.append("Set-Cookie", "a=1");
    headers.append("set-cookie", "b=2");
    headers.append("X-One", "1");

    assert_eq!(headers.get_all("SET-COOKIE").collect::<Vec<_>>(), ["a=1", "b=2"]);

    headers.set("Set-Cookie", "c=3");
    assert_eq!(headers.get_all("Set-Cookie").collect::<Vec<_>>(), ["c=3"]);
    assert_eq!(headers.len(), 2);

    assert_eq!(headers.remove("x-one").as_deref(), Some("1"));
    assert!(!headers.contains("X-One"));
}
