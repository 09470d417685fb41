use webserv::http::request::{encode_path, split_target, Method, RequestBuilder, Version};

#[test]
fn test_method_from_bytes() {
    assert_eq!(Method::from_bytes(b"GET"), Some(Method::GET));
    assert_eq!(Method::from_bytes(b"POST"), Some(Method::POST));
    assert_eq!(Method::from_bytes(b"PATCH"), Some(Method::PATCH));
    assert_eq!(Method::from_bytes(b"get"), None);
    assert_eq!(Method::from_bytes(b"BREW"), None);
}

#[test]
fn test_method_display() {
    assert_eq!(Method::DELETE.to_string(), "DELETE");
    assert_eq!(Method::OPTIONS.as_str(), "OPTIONS");
}

#[test]
fn test_request_builder() {
    let request = RequestBuilder::new()
        .method(Method::POST)
        .target("/upload?x=1")
        .version(Version::Http10)
        .header("Content-Type", "text/plain")
        .body(b"data".to_vec())
        .build()
        .unwrap();

    assert_eq!(request.method, Method::POST);
    assert_eq!(request.path, "/upload");
    assert_eq!(request.query, "x=1");
    assert_eq!(request.version, Version::Http10);
    assert_eq!(request.header("content-type"), Some("text/plain"));
    assert_eq!(request.body, b"data".to_vec());
}

#[test]
fn test_request_builder_requires_method_and_target() {
    assert!(RequestBuilder::new().target("/").build().is_err());
    assert!(RequestBuilder::new().method(Method::GET).build().is_err());
}

#[test]
fn test_first_header_wins() {
    let request = RequestBuilder::new()
        .method(Method::GET)
        .target("/")
        .header("X-Dup", "one")
        .header("x-dup", "two")
        .build()
        .unwrap();

    assert_eq!(request.header("X-DUP"), Some("one"));
}

#[test]
fn test_host_strips_port() {
    let host = |value: &str| {
        RequestBuilder::new()
            .method(Method::GET)
            .target("/")
            .header("Host", value)
            .build()
            .unwrap()
            .host()
            .map(str::to_string)
    };

    assert_eq!(host("example.com:8080").as_deref(), Some("example.com"));
    assert_eq!(host("example.com").as_deref(), Some("example.com"));
    assert_eq!(host("[::1]:80").as_deref(), Some("[::1]"));
    assert_eq!(host(":80"), None);
}

#[test]
fn test_split_target() {
    assert_eq!(
        split_target("/a%2Fb/c?d=%20"),
        Some(("/a/b/c".to_string(), "d=%20".to_string()))
    );
    assert_eq!(split_target("/"), Some(("/".to_string(), String::new())));
    assert_eq!(
        split_target("https://example.com/x?y"),
        Some(("/x".to_string(), "y".to_string()))
    );
    assert_eq!(split_target("*"), None);
    assert_eq!(split_target("/%FF"), None);
}

#[test]
fn test_encode_path_keeps_separators() {
    assert_eq!(encode_path("/a b/c#d?"), "/a%20b/c%23d%3F");
    assert_eq!(encode_path("/"), "/");
}
