use webserv::http::parser::{Phase, RequestParser, HEADER_MAX_LENGTH};
use webserv::http::request::{Method, Version};

fn parse_all(input: &[u8], max_body: usize) -> RequestParser {
    let mut parser = RequestParser::new(max_body);
    parser.commit(input);
    parser
}

#[test]
fn test_parse_simple_get_request() {
    let mut parser = parse_all(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n", 1024);
    assert_eq!(parser.phase(), Phase::Completed);

    let parsed = parser.take_request().unwrap();
    assert_eq!(parsed.method, Method::GET);
    assert_eq!(parsed.path, "/");
    assert_eq!(parsed.version, Version::Http11);
    assert_eq!(parsed.header("Host"), Some("example.com"));
    assert!(parsed.body.is_empty());
}

#[test]
fn test_parse_post_request_with_body() {
    let mut parser = parse_all(
        b"POST /api HTTP/1.0\r\nHost: localhost\r\nContent-Length: 5\r\n\r\nhello",
        1024,
    );
    let parsed = parser.take_request().unwrap();

    assert_eq!(parsed.method, Method::POST);
    assert_eq!(parsed.path, "/api");
    assert_eq!(parsed.version, Version::Http10);
    assert_eq!(parsed.body, b"hello".to_vec());
}

#[test]
fn test_parse_header_lookup_is_case_insensitive() {
    let mut parser = parse_all(
        b"GET /path HTTP/1.1\r\nHost: example.com\r\nUser-Agent:  test-client \r\nAccept: */*\r\n\r\n",
        1024,
    );
    let parsed = parser.take_request().unwrap();

    assert_eq!(parsed.header("host"), Some("example.com"));
    assert_eq!(parsed.header("USER-AGENT"), Some("test-client"));
    assert_eq!(parsed.header("Accept"), Some("*/*"));
    assert_eq!(parsed.header("Missing"), None);
}

#[test]
fn test_parse_request_with_path_and_query_string() {
    let mut parser = parse_all(b"GET /search%20me?q=a%20b HTTP/1.1\r\n\r\n", 1024);
    let parsed = parser.take_request().unwrap();

    assert_eq!(parsed.target, "/search%20me?q=a%20b");
    assert_eq!(parsed.path, "/search me");
    assert_eq!(parsed.query, "q=a%20b");
}

#[test]
fn test_parse_absolute_form_target() {
    let mut parser = parse_all(b"GET http://example.com/a/b?x=1 HTTP/1.1\r\n\r\n", 1024);
    let parsed = parser.take_request().unwrap();

    assert_eq!(parsed.path, "/a/b");
    assert_eq!(parsed.query, "x=1");
}

#[test]
fn test_parse_byte_at_a_time() {
    let input = b"POST /x HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc";
    let mut parser = RequestParser::new(1024);

    let mut completions = 0;
    for byte in input.iter() {
        if parser.commit(std::slice::from_ref(byte)) {
            completions += 1;
        }
    }

    assert_eq!(completions, 1);
    assert_eq!(parser.take_request().unwrap().body, b"abc".to_vec());
}

#[test]
fn test_commit_after_terminal_is_noop() {
    let mut parser = RequestParser::new(1024);
    assert!(parser.commit(b"GET / HTTP/1.1\r\n\r\n"));
    assert!(!parser.commit(b"GET /again HTTP/1.1\r\n\r\n"));
    assert_eq!(parser.take_request().unwrap().path, "/");
    assert!(parser.take_request().is_none());
}

#[test]
fn test_zero_content_length_completes_immediately() {
    let mut parser = RequestParser::new(1024);
    assert!(parser.commit(b"POST / HTTP/1.1\r\nContent-Length: 0\r\n\r\n"));
    assert_eq!(parser.phase(), Phase::Completed);
    assert!(parser.take_request().unwrap().body.is_empty());
}

#[test]
fn test_incomplete_request_stays_in_progress() {
    let parser = parse_all(b"GET / HTTP/1.1\r\nHost: example.com\r\n", 1024);
    assert_eq!(parser.phase(), Phase::Header);

    let parser = parse_all(b"POST /api HTTP/1.1\r\nContent-Length: 10\r\n\r\nhello", 1024);
    assert_eq!(parser.phase(), Phase::BodyRaw);
}

#[test]
fn test_chunked_body_matches_raw_body() {
    let mut chunked = parse_all(
        b"POST /up HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
          5\r\nhello\r\n7;name=value\r\n, world\r\n0\r\n\r\n",
        1024,
    );
    let mut raw = parse_all(b"POST /up HTTP/1.1\r\nContent-Length: 12\r\n\r\nhello, world", 1024);

    assert_eq!(chunked.phase(), Phase::Completed);
    assert_eq!(chunked.take_request().unwrap().body, raw.take_request().unwrap().body);
}

#[test]
fn test_chunked_split_across_commits() {
    let input = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\na\r\n0123456789\r\n0\r\n\r\n";
    for split in 1..input.len() {
        let mut parser = RequestParser::new(1024);
        let first = parser.commit(&input[..split]);
        let second = parser.commit(&input[split..]);
        assert!(first ^ second, "split at {split}");
        assert_eq!(parser.take_request().unwrap().body, b"0123456789".to_vec());
    }
}

#[test]
fn test_chunk_missing_crlf_is_malformed() {
    let parser = parse_all(
        b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabcX\r\n0\r\n\r\n",
        1024,
    );
    assert_eq!(parser.phase(), Phase::Malformed);
}

#[test]
fn test_transfer_encoding_with_content_length_is_malformed() {
    let parser = parse_all(
        b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\nContent-Length: 3\r\n\r\n",
        1024,
    );
    assert_eq!(parser.phase(), Phase::Malformed);
}

#[test]
fn test_unsupported_transfer_encoding_is_malformed() {
    let parser = parse_all(b"POST / HTTP/1.1\r\nTransfer-Encoding: gzip\r\n\r\n", 1024);
    assert_eq!(parser.phase(), Phase::Malformed);
}

#[test]
fn test_malformed_request_lines() {
    for input in [
        &b"get / HTTP/1.1\r\n\r\n"[..],
        b"GET / HTTP/2.0\r\n\r\n",
        b"GET /\r\n\r\n",
        b"GET  / HTTP/1.1\r\n\r\n",
        b"GET / HTTP/1.1\r\nNoColonHere\r\n\r\n",
        b"GET / HTTP/1.1\r\nContent-Length: 1x\r\n\r\n",
        b"GET ftp://host/ HTTP/1.1\r\n\r\n",
        b"GET /old?x\nSet-Cookie:evil=1 HTTP/1.1\r\n\r\n",
        b"GET /a\x00b HTTP/1.1\r\n\r\n",
        b"GET /a\x7f HTTP/1.1\r\n\r\n",
        b"GET / HTTP/1.1\r\nX-A: one\rtwo\r\n\r\n",
        b"GET / HTTP/1.1\r\nX-A: one\nSet-Cookie: evil=1\r\n\r\n",
    ] {
        let parser = parse_all(input, 1024);
        assert_eq!(parser.phase(), Phase::Malformed, "{:?}", String::from_utf8_lossy(input));
    }
}

#[test]
fn test_content_length_overflow_is_malformed() {
    let parser = parse_all(
        b"POST / HTTP/1.1\r\nContent-Length: 340282366920938463463374607431768211456\r\n\r\n",
        1024,
    );
    assert_eq!(parser.phase(), Phase::Malformed);
}

#[test]
fn test_body_over_limit_exceeds() {
    let parser = parse_all(b"POST / HTTP/1.1\r\nContent-Length: 11\r\n\r\n", 10);
    assert_eq!(parser.phase(), Phase::BodyExceed);

    let parser = parse_all(
        b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n6\r\nabcdef\r\n6\r\nabcdef\r\n",
        10,
    );
    assert_eq!(parser.phase(), Phase::BodyExceed);
}

#[test]
fn test_oversized_header_exceeds() {
    let mut input = b"GET / HTTP/1.1\r\nX-Long: ".to_vec();
    input.resize(HEADER_MAX_LENGTH + 10, b'a');

    let mut parser = RequestParser::new(1024);
    assert!(parser.commit(&input));
    assert_eq!(parser.phase(), Phase::HeaderExceed);
}

#[test]
fn test_tab_in_header_value_is_accepted() {
    let mut parser = parse_all(b"GET / HTTP/1.1\r\nX-Tabbed: a\tb\r\n\r\n", 1024);
    assert_eq!(parser.phase(), Phase::Completed);
    assert_eq!(parser.take_request().unwrap().header("X-Tabbed"), Some("a\tb"));
}
