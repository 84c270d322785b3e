mod common;

use std::io::{ErrorKind, Read};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use hearth::config::ServerConfig;
use hearth::http::request::Request;
use hearth::http::response::{Response, ResponseBuilder, StatusCode};
use hearth::pipeline::Pipeline;
use hearth::server::{RunMode, Server, ServerError};

use common::{TestServer, info_pipeline, read_response, read_to_close, send, test_config};

const INFO: &str = "GET /info HTTP/1.1\r\nHost: x\r\n\r\n";

#[test]
fn test_keep_alive_exchange() {
    let server = TestServer::spawn(test_config(), info_pipeline(), RunMode::Foreground);
    let mut client = server.connect();

    send(&mut client, INFO);
    let first = read_response(&mut client);

    assert_eq!(first.status_line, "HTTP/1.1 200 OK");
    assert_eq!(first.header("Content-Length"), Some("2"));
    assert_eq!(first.header("Connection"), Some("Keep-Alive"));
    assert_eq!(first.header("Keep-Alive"), Some("timeout=15 max=90"));
    assert_eq!(first.body, b"ok");

    send(&mut client, INFO);
    let second = read_response(&mut client);
    assert_eq!(second.status_line, "HTTP/1.1 200 OK");
    assert_eq!(second.body, b"ok");

    assert_eq!(server.shutdown(), 2);
}

#[test]
fn test_response_carries_server_headers() {
    let server = TestServer::spawn(test_config(), info_pipeline(), RunMode::Foreground);
    let mut client = server.connect();

    send(&mut client, INFO);
    let response = read_response(&mut client);

    let signature = format!("hearth/{}", env!("CARGO_PKG_VERSION"));
    assert_eq!(response.header("Server"), Some(signature.as_str()));
    assert_eq!(response.header("Via"), Some(signature.as_str()));
    assert_eq!(
        response.header("Content-MD5"),
        Some("444bcb3a3fcf8389296c49467f27e1d6")
    );
    assert!(response.header("Date").unwrap().ends_with(" GMT"));
}

#[test]
fn test_http10_close_after_response() {
    let server = TestServer::spawn(test_config(), info_pipeline(), RunMode::Foreground);
    let mut client = server.connect();

    send(&mut client, "GET /info HTTP/1.0\r\nConnection: close\r\n\r\n");
    let response = read_response(&mut client);

    assert_eq!(response.status_line, "HTTP/1.1 200 OK");
    assert_eq!(response.header("Connection"), Some("close"));
    assert!(response.header("Keep-Alive").is_none());
    assert!(read_to_close(&mut client).is_empty());
}

#[test]
fn test_http10_default_closes() {
    let server = TestServer::spawn(test_config(), info_pipeline(), RunMode::Foreground);
    let mut client = server.connect();

    send(&mut client, "GET /info HTTP/1.0\r\n\r\n");
    let response = read_response(&mut client);

    assert_eq!(response.header("Connection"), Some("close"));
    assert!(read_to_close(&mut client).is_empty());
}

#[test]
fn test_http10_keep_alive_header() {
    let server = TestServer::spawn(test_config(), info_pipeline(), RunMode::Foreground);
    let mut client = server.connect();

    for _ in 0..2 {
        send(
            &mut client,
            "GET /info HTTP/1.0\r\nConnection: keep-alive\r\n\r\n",
        );
        let response = read_response(&mut client);
        assert_eq!(response.header("Connection"), Some("Keep-Alive"));
    }
}

#[test]
fn test_http09_gets_bare_body() {
    let server = TestServer::spawn(test_config(), info_pipeline(), RunMode::Foreground);
    let mut client = server.connect();

    send(&mut client, "GET /info\r\n");

    assert_eq!(read_to_close(&mut client), b"ok");
}

#[test]
fn test_missing_host_closes_without_response() {
    let server = TestServer::spawn(test_config(), info_pipeline(), RunMode::Foreground);
    let mut client = server.connect();

    send(&mut client, "GET /info HTTP/1.1\r\nAccept: */*\r\n\r\n");

    assert!(read_to_close(&mut client).is_empty());
    assert_eq!(server.shutdown(), 0);
}

#[test]
fn test_malformed_start_line_closes_without_response() {
    let server = TestServer::spawn(test_config(), info_pipeline(), RunMode::Foreground);
    let mut client = server.connect();

    send(&mut client, "BREW /pot HTCPCP/1.0\r\n\r\n");

    assert!(read_to_close(&mut client).is_empty());
}

#[test]
fn test_unhandled_request_closes_connection() {
    let server = TestServer::spawn(test_config(), info_pipeline(), RunMode::Foreground);
    let mut client = server.connect();

    send(&mut client, "GET /elsewhere HTTP/1.1\r\nHost: x\r\n\r\n");

    assert!(read_to_close(&mut client).is_empty());
}

#[test]
fn test_head_response_has_no_body() {
    let server = TestServer::spawn(test_config(), info_pipeline(), RunMode::Foreground);
    let mut client = server.connect();

    send(&mut client, "HEAD /info HTTP/1.1\r\nHost: x\r\n\r\n");
    let head = read_response(&mut client);

    assert_eq!(head.status_line, "HTTP/1.1 200 OK");
    assert!(!head.has_content_headers());
    assert!(head.body.is_empty());

    // The next response starts right where the HEAD response ended.
    send(&mut client, INFO);
    let next = read_response(&mut client);
    assert_eq!(next.status_line, "HTTP/1.1 200 OK");
    assert_eq!(next.body, b"ok");
}

#[test]
fn test_no_content_response_strips_body() {
    let pipeline = Pipeline::new().with_handler(|_req: &Request| -> Option<Response> {
        Some(
            ResponseBuilder::new(StatusCode::NO_CONTENT)
                .header("Content-Type", "text/plain")
                .body("dropped")
                .build(),
        )
    });
    let server = TestServer::spawn(test_config(), pipeline, RunMode::Foreground);
    let mut client = server.connect();

    send(&mut client, "DELETE /item HTTP/1.1\r\nHost: x\r\n\r\n");
    let response = read_response(&mut client);

    assert_eq!(response.status_line, "HTTP/1.1 204 No Content");
    assert!(!response.has_content_headers());

    send(&mut client, "DELETE /item HTTP/1.1\r\nHost: x\r\n\r\n");
    let again = read_response(&mut client);
    assert_eq!(again.status_line, "HTTP/1.1 204 No Content");
}

#[test]
fn test_filters_run_after_handlers() {
    let pipeline = info_pipeline().with_filter(|_req: &Request, mut resp: Response| -> Response {
        resp.headers.set("X-Filtered", "yes");
        resp
    });
    let server = TestServer::spawn(test_config(), pipeline, RunMode::Foreground);
    let mut client = server.connect();

    send(&mut client, INFO);
    let response = read_response(&mut client);

    assert_eq!(response.header("X-Filtered"), Some("yes"));
}

#[test]
fn test_buffered_requests_answered_in_order() {
    let server = TestServer::spawn(test_config(), info_pipeline(), RunMode::Foreground);
    let mut client = server.connect();

    send(
        &mut client,
        "GET /info HTTP/1.1\r\nHost: x\r\nContent-Length: 0\r\n\r\nGET /info HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
    );

    let first = read_response(&mut client);
    assert_eq!(first.header("Connection"), Some("Keep-Alive"));
    let second = read_response(&mut client);
    assert_eq!(second.header("Connection"), Some("close"));
    assert!(read_to_close(&mut client).is_empty());

    assert_eq!(server.shutdown(), 2);
}

#[test]
fn test_write_blocked_response_completes_and_keeps_alive() {
    const BIG: usize = 16 * 1024 * 1024;
    let big = Bytes::from(vec![b'x'; BIG]);
    let pipeline = info_pipeline().with_handler(move |req: &Request| -> Option<Response> {
        (req.path() == "/big").then(|| Response::ok(big.clone()))
    });
    let server = TestServer::spawn(test_config(), pipeline, RunMode::Foreground);

    let mut slow = server.connect();
    send(&mut slow, "GET /big HTTP/1.1\r\nHost: x\r\n\r\n");
    thread::sleep(Duration::from_millis(500));

    let mut other = server.connect();
    send(&mut other, INFO);
    let response = read_response(&mut other);
    assert_eq!(response.status_line, "HTTP/1.1 200 OK");
    assert_eq!(response.body, b"ok");

    let large = read_response(&mut slow);
    assert_eq!(large.status_line, "HTTP/1.1 200 OK");
    assert_eq!(large.header("Connection"), Some("Keep-Alive"));
    assert_eq!(large.body.len(), BIG);
    assert!(large.body.iter().all(|&b| b == b'x'));

    send(&mut slow, INFO);
    let again = read_response(&mut slow);
    assert_eq!(again.status_line, "HTTP/1.1 200 OK");
    assert_eq!(again.body, b"ok");

    slow.set_nonblocking(true).unwrap();
    let mut byte = [0u8; 1];
    let open = slow.read(&mut byte);
    assert_eq!(open.unwrap_err().kind(), ErrorKind::WouldBlock);

    assert_eq!(server.shutdown(), 3);
}

#[test]
fn test_daemon_child_stops_after_max_requests() {
    let config = ServerConfig {
        max_requests_per_child: 2,
        ..test_config()
    };
    let server = TestServer::spawn(config, info_pipeline(), RunMode::DaemonChild);
    let mut client = server.connect();

    send(&mut client, INFO);
    read_response(&mut client);
    send(&mut client, INFO);
    read_response(&mut client);

    assert!(read_to_close(&mut client).is_empty());
    assert_eq!(server.join(), 2);
}

#[test]
fn test_foreground_ignores_max_requests() {
    let config = ServerConfig {
        max_requests_per_child: 1,
        ..test_config()
    };
    let server = TestServer::spawn(config, info_pipeline(), RunMode::Foreground);
    let mut client = server.connect();

    for _ in 0..3 {
        send(&mut client, INFO);
        assert_eq!(read_response(&mut client).body, b"ok");
    }

    assert_eq!(server.shutdown(), 3);
}

#[test]
fn test_max_clients_queues_extra_connections() {
    let config = ServerConfig {
        max_clients: 1,
        ..test_config()
    };
    let server = TestServer::spawn(config, info_pipeline(), RunMode::Foreground);

    let mut first = server.connect();
    send(&mut first, INFO);
    read_response(&mut first);

    let mut second = server.connect();
    send(&mut second, INFO);
    second
        .set_read_timeout(Some(Duration::from_millis(300)))
        .unwrap();
    let mut probe = [0u8; 1];
    let err = second.read(&mut probe).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut));

    drop(first);

    second.set_read_timeout(Some(common::CLIENT_TIMEOUT)).unwrap();
    let response = read_response(&mut second);
    assert_eq!(response.body, b"ok");
}

#[test]
fn test_idle_connection_closed_by_timer() {
    let config = ServerConfig {
        keepalive_timeout: 1,
        ..test_config()
    };
    let server = TestServer::spawn(config, info_pipeline(), RunMode::Foreground);
    let mut client = server.connect();

    send(&mut client, INFO);
    read_response(&mut client);

    let started = Instant::now();
    assert!(read_to_close(&mut client).is_empty());
    assert!(started.elapsed() < common::CLIENT_TIMEOUT);
}

#[test]
fn test_shutdown_stops_loop() {
    let server = TestServer::spawn(test_config(), info_pipeline(), RunMode::Foreground);
    let _idle = server.connect();

    let started = Instant::now();
    server.shutdown();

    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn test_run_requires_bound_listener() {
    let mut server = Server::new(test_config(), Pipeline::new());

    assert!(server.local_addr().is_none());
    assert!(matches!(
        server.run(RunMode::Foreground).await,
        Err(ServerError::NotBound)
    ));
}

#[tokio::test]
async fn test_start_binds_then_honors_shutdown() {
    let mut server = Server::new(test_config(), Pipeline::new());
    server.shutdown();

    server.start(RunMode::DaemonChild).await.unwrap();

    assert!(server.local_addr().is_some());
    assert!(server.is_child());
    assert_eq!(server.requests_served(), 0);
}

#[tokio::test]
async fn test_bind_rejects_bad_address() {
    let config = ServerConfig {
        address: "not-an-ip".to_string(),
        ..test_config()
    };

    assert!(matches!(
        Server::bind(config, Pipeline::new()),
        Err(ServerError::Listener(_))
    ));
}
