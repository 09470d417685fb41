mod common;

use std::fs;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::time::{Duration, Instant};

use common::{Reply, TestServer};

fn site(dir: &Path) -> TestServer {
    let root = dir.display();
    fs::write(dir.join("index.html"), "<h1>home</h1>").unwrap();
    fs::write(dir.join("style.css"), "body {}").unwrap();
    fs::write(dir.join("missing.html"), "<p>custom missing</p>").unwrap();
    fs::create_dir_all(dir.join("files")).unwrap();
    fs::create_dir_all(dir.join("other")).unwrap();
    fs::write(dir.join("other/index.html"), "other site").unwrap();

    TestServer::start(&format!(
        r#"
timeouts: {{ request_ms: 300, linger_ms: 200 }}
servers:
  - listen: ["127.0.0.1:0"]
    server_names: [main.test]
    max_body_size: 128
    error_pages: {{ 404: {root}/missing.html }}
    locations:
      - path: /
        root: {root}
        index: index.html
      - path: /files
        root: {root}/files
        methods: [GET, POST, DELETE]
        autoindex: true
        upload: true
    redirects:
      - path: /moved
        location: /files/
  - listen: ["127.0.0.1:0"]
    server_names: [other.test]
    locations:
      - path: /
        root: {root}/other
        index: index.html
"#
    ))
}

#[test]
fn test_serves_static_files() {
    let dir = tempfile::tempdir().unwrap();
    let server = site(dir.path());

    let reply = server.get("/style.css");
    assert_eq!(reply.status, 200);
    assert_eq!(reply.reason, "OK");
    assert_eq!(reply.header("Content-Type"), Some("text/css"));
    assert_eq!(reply.header("Connection"), Some("close"));
    assert_eq!(reply.text(), "body {}");

    let index = server.get("/");
    assert_eq!(index.status, 200);
    assert_eq!(index.text(), "<h1>home</h1>");
}

#[test]
fn test_configured_error_page() {
    let dir = tempfile::tempdir().unwrap();
    let server = site(dir.path());

    let reply = server.get("/nothing-here");
    assert_eq!(reply.status, 404);
    assert_eq!(reply.text(), "<p>custom missing</p>");
}

#[test]
fn test_head_omits_body() {
    let dir = tempfile::tempdir().unwrap();
    let server = site(dir.path());

    let reply = server.exchange(b"HEAD /index.html HTTP/1.1\r\nHost: main.test\r\n\r\n");
    assert_eq!(reply.status, 200);
    assert_eq!(reply.header("Content-Length"), Some("13"));
    assert!(reply.body.is_empty());
}

#[test]
fn test_malformed_request_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let server = site(dir.path());

    let reply = server.exchange(b"GET / HTTP/1.1\r\nTransfer-Encoding: chunked\r\nContent-Length: 4\r\n\r\n");
    assert_eq!(reply.status, 400);
    assert_eq!(reply.header("Content-Type"), Some("text/html"));

    assert_eq!(server.exchange(b"NONSENSE\r\n\r\n").status, 400);
}

#[test]
fn test_oversized_body_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let server = site(dir.path());

    let reply = server.exchange(b"POST /files/ HTTP/1.1\r\nHost: main.test\r\nContent-Length: 129\r\n\r\n");
    assert_eq!(reply.status, 413);
}

#[test]
fn test_upload_list_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    let server = site(dir.path());

    let body = "--B\r\nContent-Disposition: form-data; name=\"f\"; filename=\"note.txt\"\r\n\r\nhi\r\n--B--\r\n";
    let upload = format!(
        "POST /files/ HTTP/1.1\r\nHost: main.test\r\n\
         Content-Type: multipart/form-data; boundary=B\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    let reply = server.exchange(upload.as_bytes());
    assert_eq!(reply.status, 303);
    assert_eq!(reply.header("Location"), Some("/files/"));
    assert_eq!(fs::read_to_string(dir.path().join("files/note.txt")).unwrap(), "hi");

    let listing = server.get("/files/");
    assert_eq!(listing.status, 200);
    assert!(listing.text().contains("note.txt"));

    let delete = server.exchange(b"DELETE /files/note.txt HTTP/1.1\r\nHost: main.test\r\n\r\n");
    assert_eq!(delete.status, 204);
    assert_eq!(delete.header("Content-Length"), Some("0"));

    let again = server.exchange(b"DELETE /files/note.txt HTTP/1.1\r\nHost: main.test\r\n\r\n");
    assert_eq!(again.status, 404);
}

#[test]
fn test_method_not_allowed() {
    let dir = tempfile::tempdir().unwrap();
    let server = site(dir.path());

    let reply = server.exchange(b"DELETE /index.html HTTP/1.1\r\nHost: main.test\r\n\r\n");
    assert_eq!(reply.status, 405);
    assert_eq!(reply.header("Allow"), Some("GET, HEAD"));
}

#[test]
fn test_redirect() {
    let dir = tempfile::tempdir().unwrap();
    let server = site(dir.path());

    let reply = server.get("/moved/report.txt");
    assert_eq!(reply.status, 307);
    assert_eq!(reply.header("Location"), Some("/files/report.txt"));
}

#[test]
fn test_redirect_rejects_line_breaks_in_target() {
    let dir = tempfile::tempdir().unwrap();
    let server = site(dir.path());

    let reply = server.exchange(b"GET /moved?x\nSet-Cookie:evil=1 HTTP/1.1\r\nHost: main.test\r\n\r\n");
    assert_eq!(reply.status, 400);
    assert_eq!(reply.header("Location"), None);
    assert_eq!(reply.header("Set-Cookie"), None);

    let split = server.exchange(b"GET /moved HTTP/1.1\r\nHost: main.test\r\nX-A: a\rSet-Cookie: evil=1\r\n\r\n");
    assert_eq!(split.status, 400);
}

#[test]
fn test_virtual_host_selection() {
    let dir = tempfile::tempdir().unwrap();
    let server = site(dir.path());

    let other = server.exchange(b"GET / HTTP/1.1\r\nHost: other.test:8080\r\n\r\n");
    assert_eq!(other.text(), "other site");

    let main = server.exchange(b"GET / HTTP/1.1\r\nHost: main.test\r\n\r\n");
    assert_eq!(main.text(), "<h1>home</h1>");

    let unknown = server.exchange(b"GET / HTTP/1.1\r\nHost: nobody.test\r\n\r\n");
    assert_eq!(unknown.text(), "<h1>home</h1>");
}

#[test]
fn test_idle_connection_is_closed_without_response() {
    let dir = tempfile::tempdir().unwrap();
    let server = site(dir.path());

    let started = Instant::now();
    let mut stream = TcpStream::connect(server.addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();

    let mut data = Vec::new();
    stream.read_to_end(&mut data).unwrap();
    assert!(data.is_empty());
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_millis(900), "closed after {elapsed:?}");
}

#[test]
fn test_linger_ends_when_client_stays_open() {
    let dir = tempfile::tempdir().unwrap();
    let server = site(dir.path());

    let mut stream = TcpStream::connect(server.addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    stream
        .write_all(b"GET /style.css HTTP/1.1\r\nHost: main.test\r\n\r\n")
        .unwrap();

    let started = Instant::now();
    let mut data = Vec::new();
    stream.read_to_end(&mut data).unwrap();
    let elapsed = started.elapsed();

    let reply = Reply::parse(&data);
    assert_eq!(reply.status, 200);
    assert_eq!(reply.text(), "body {}");
    assert!(elapsed >= Duration::from_millis(150));
    assert!(elapsed < Duration::from_millis(800), "closed after {elapsed:?}");
}

#[test]
fn test_many_sequential_clients() {
    let dir = tempfile::tempdir().unwrap();
    let server = site(dir.path());

    for _ in 0..20 {
        assert_eq!(server.get("/index.html").status, 200);
    }
}
