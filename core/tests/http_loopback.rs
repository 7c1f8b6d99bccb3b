/*
 * http_loopback.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * HTTP client/server loopback tests: the two protocol endpoints are
 * attached to each other directly, so a full request/response cycle runs
 * without sockets and without an event loop. Body bytes stream after the
 * header callbacks return, so the tests collect into shared cells and
 * assert once the attach cascade has settled.
 */

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use gancio_core::buffer::Buffer;
use gancio_core::http::header::{ConnectionType, TransferEncoding, Verb};
use gancio_core::http::request::Request;
use gancio_core::http::response::Response;
use gancio_core::http::{HttpClient, HttpServer};
use gancio_core::io::memory::{BufferSink, BufferSource};
use gancio_core::io::{attach, attach_pair, StreamRef};

fn source_with(data: &[u8]) -> StreamRef {
    let mut buffer = Buffer::new();
    buffer.append(data);
    BufferSource::new(buffer)
}

/// Drains a body stream into shared cells: (bytes, completed).
fn collect_stream(stream: StreamRef) -> (Rc<RefCell<Vec<u8>>>, Rc<Cell<bool>>) {
    let bytes: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
    let done = Rc::new(Cell::new(false));
    let b = bytes.clone();
    let d = done.clone();
    let sink = BufferSink::new(move |buf: &mut Buffer| {
        *b.borrow_mut() = buf.to_vec();
        d.set(true);
    });
    attach(stream, sink).unwrap();
    (bytes, done)
}

type BodyCells = (Rc<RefCell<Vec<u8>>>, Rc<Cell<bool>>);
type BodySlot = Rc<RefCell<Option<BodyCells>>>;

fn body_slot() -> BodySlot {
    Rc::new(RefCell::new(None))
}

fn slot_bytes(slot: &BodySlot) -> Vec<u8> {
    let guard = slot.borrow();
    let (bytes, done) = guard.as_ref().expect("body delivered");
    assert!(done.get(), "body stream must have completed");
    let out = bytes.borrow().clone();
    out
}

/// "hello" handler: 200 with Content-Length when `length`, chunked
/// framing otherwise.
fn hello_server(length: bool) -> Rc<HttpServer> {
    let server = HttpServer::new();
    let server_for_requests = server.clone();
    server
        .trap_requests(move |server_request| {
            let body = b"hello";
            let declared = if length { body.len() as i64 } else { -1 };
            let mut response =
                Response::from_request(&server_request.request, 200, declared);
            response.set_content_type("text", "plain");
            server_for_requests.respond(&server_request, response, Some(source_with(body)));
        })
        .unwrap();
    server
}

fn get_request(path: &str) -> Request {
    let mut request = Request::new(Verb::Get, path);
    request.host = Some("x".to_string());
    request
}

#[test]
fn trivial_get_with_content_length() {
    let server = hello_server(true);
    let client = HttpClient::new();

    let status = Rc::new(Cell::new(0u16));
    let content_length = Rc::new(Cell::new(-2i64));
    let keepalive = Rc::new(Cell::new(false));
    let body = body_slot();
    {
        let status = status.clone();
        let content_length = content_length.clone();
        let keepalive = keepalive.clone();
        let body = body.clone();
        client
            .request(get_request("/"), None, move |result| {
                let (response, stream) = result.expect("response");
                status.set(response.status_code);
                content_length.set(response.common.content_length);
                keepalive.set(response.common.connection() == ConnectionType::KeepAlive);
                *body.borrow_mut() = Some(collect_stream(stream));
            })
            .unwrap();
    }
    attach_pair(client.clone(), server).unwrap();

    assert_eq!(status.get(), 200);
    assert_eq!(content_length.get(), 5);
    assert!(keepalive.get());
    assert_eq!(slot_bytes(&body), b"hello");
    // Connection remains usable for another request.
    assert!(client.is_requestable());
}

#[test]
fn chunked_response_wire_format() {
    // Drive the server endpoint directly to inspect the raw wire.
    use gancio_core::io::Stream;
    let server = hello_server(false);
    server
        .raw_write(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
        .unwrap();
    let mut wire = Buffer::new();
    server.raw_read_buffer(&mut wire).unwrap();
    let text = String::from_utf8(wire.to_vec()).unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "wire: {}", text);
    assert!(text.contains("Transfer-Encoding: chunked\r\n"));
    assert!(
        text.contains("5\r\nhello\r\n0\r\n\r\n"),
        "chunked framing missing: {}",
        text
    );
}

#[test]
fn chunked_response_decodes_on_client() {
    let server = hello_server(false);
    let client = HttpClient::new();
    let body = body_slot();
    let chunked = Rc::new(Cell::new(false));
    {
        let body = body.clone();
        let chunked = chunked.clone();
        client
            .request(get_request("/"), None, move |result| {
                let (response, stream) = result.expect("response");
                chunked
                    .set(response.common.transfer_encoding == TransferEncoding::Chunked);
                *body.borrow_mut() = Some(collect_stream(stream));
            })
            .unwrap();
    }
    attach_pair(client, server).unwrap();
    assert!(chunked.get());
    assert_eq!(slot_bytes(&body), b"hello");
}

#[test]
fn pipelined_requests_answered_in_order() {
    let server = HttpServer::new();
    let server_for_requests = server.clone();
    server
        .trap_requests(move |server_request| {
            // Answer with the request's own path as the body.
            let body = server_request.request.path.clone().into_bytes();
            let mut response =
                Response::from_request(&server_request.request, 200, body.len() as i64);
            response.set_content_type("text", "plain");
            server_for_requests.respond(&server_request, response, Some(source_with(&body)));
        })
        .unwrap();

    let client = HttpClient::new();
    let slots: Vec<BodySlot> = (0..3).map(|_| body_slot()).collect();
    for (i, path) in ["/first", "/second", "/third"].iter().enumerate() {
        let slot = slots[i].clone();
        client
            .request(get_request(path), None, move |result| {
                let (_, stream) = result.expect("response");
                *slot.borrow_mut() = Some(collect_stream(stream));
            })
            .unwrap();
    }
    attach_pair(client, server).unwrap();
    assert_eq!(slot_bytes(&slots[0]), b"/first");
    assert_eq!(slot_bytes(&slots[1]), b"/second");
    assert_eq!(slot_bytes(&slots[2]), b"/third");
}

#[test]
fn post_body_reaches_handler() {
    let server = HttpServer::new();
    let post_body = body_slot();
    {
        let server_for_requests = server.clone();
        let post_body = post_body.clone();
        server
            .trap_requests(move |server_request| {
                let post = server_request.post_stream.clone().expect("POST body");
                *post_body.borrow_mut() = Some(collect_stream(post));
                let response = Response::from_request(&server_request.request, 200, 0);
                server_for_requests.respond(&server_request, response, None);
            })
            .unwrap();
    }

    let client = HttpClient::new();
    let status = Rc::new(Cell::new(0u16));
    {
        let status = status.clone();
        let mut request = Request::new(Verb::Post, "/submit");
        request.host = Some("x".to_string());
        request.common.content_length = 9;
        client
            .request(request, Some(source_with(b"ping-pong")), move |result| {
                let (response, _) = result.expect("response");
                status.set(response.status_code);
            })
            .unwrap();
    }
    attach_pair(client, server).unwrap();
    assert_eq!(status.get(), 200);
    assert_eq!(slot_bytes(&post_body), b"ping-pong");
}

#[test]
fn chunked_post_decodes_on_server() {
    let server = HttpServer::new();
    let post_body = body_slot();
    {
        let server_for_requests = server.clone();
        let post_body = post_body.clone();
        server
            .trap_requests(move |server_request| {
                let post = server_request.post_stream.clone().expect("POST body");
                *post_body.borrow_mut() = Some(collect_stream(post));
                let response = Response::from_request(&server_request.request, 200, 0);
                server_for_requests.respond(&server_request, response, None);
            })
            .unwrap();
    }

    let client = HttpClient::new();
    let mut request = Request::new(Verb::Post, "/upload");
    request.host = Some("x".to_string());
    request.common.transfer_encoding = TransferEncoding::Chunked;
    client
        .request(request, Some(source_with(b"chunked payload")), |result| {
            result.expect("response");
        })
        .unwrap();
    attach_pair(client, server).unwrap();
    assert_eq!(slot_bytes(&post_body), b"chunked payload");
}

#[test]
fn large_post_flows_through_backpressure() {
    // 64 KiB exceeds both the attach window and the 8 KiB POST buffer
    // threshold, so the body must flow through repeated backpressure
    // release cycles.
    let payload: Vec<u8> = (0u8..=255).cycle().take(64 * 1024).collect();
    let server = HttpServer::new();
    let post_body = body_slot();
    {
        let server_for_requests = server.clone();
        let post_body = post_body.clone();
        server
            .trap_requests(move |server_request| {
                let post = server_request.post_stream.clone().expect("POST body");
                *post_body.borrow_mut() = Some(collect_stream(post));
                let response = Response::from_request(&server_request.request, 200, 0);
                server_for_requests.respond(&server_request, response, None);
            })
            .unwrap();
    }

    let client = HttpClient::new();
    let done = Rc::new(Cell::new(false));
    {
        let done = done.clone();
        let mut request = Request::new(Verb::Post, "/big");
        request.host = Some("x".to_string());
        request.common.content_length = payload.len() as i64;
        client
            .request(request, Some(source_with(&payload)), move |result| {
                result.expect("response");
                done.set(true);
            })
            .unwrap();
    }
    attach_pair(client, server).unwrap();
    assert!(done.get());
    assert_eq!(slot_bytes(&post_body), payload);
}

#[test]
fn second_respond_is_ignored() {
    use gancio_core::io::Stream;
    let server = HttpServer::new();
    {
        let server_for_requests = server.clone();
        server
            .trap_requests(move |server_request| {
                let first = Response::from_request(&server_request.request, 200, 0);
                server_for_requests.respond(&server_request, first, None);
                let second = Response::from_request(&server_request.request, 500, 0);
                server_for_requests.respond(&server_request, second, None);
            })
            .unwrap();
    }
    server
        .raw_write(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
        .unwrap();
    let mut wire = Buffer::new();
    server.raw_read_buffer(&mut wire).unwrap();
    let text = String::from_utf8(wire.to_vec()).unwrap();
    assert!(text.starts_with("HTTP/1.1 200"));
    assert!(!text.contains("HTTP/1.1 500"));
}

#[test]
fn malformed_request_gets_400_and_close() {
    use gancio_core::io::Stream;
    let server = HttpServer::new();
    server
        .trap_requests(|_request| panic!("no request expected"))
        .unwrap();
    server.raw_write(b"NOT-A-VERB ???\r\n\r\n").unwrap();
    let mut wire = Buffer::new();
    server.raw_read_buffer(&mut wire).unwrap();
    let text = String::from_utf8(wire.to_vec()).unwrap();
    assert!(text.starts_with("HTTP/1.1 400"), "wire: {}", text);
    assert!(text.contains("Connection: close"));
    assert!(text.to_lowercase().contains("bad request"));
}

#[test]
fn head_response_has_no_body() {
    use gancio_core::io::Stream;
    let server = hello_server(true);
    server
        .raw_write(b"HEAD / HTTP/1.1\r\nHost: x\r\n\r\n")
        .unwrap();
    let mut wire = Buffer::new();
    server.raw_read_buffer(&mut wire).unwrap();
    let text = String::from_utf8(wire.to_vec()).unwrap();
    assert!(text.starts_with("HTTP/1.1 200"));
    assert!(text.ends_with("\r\n\r\n"));
    assert!(!text.contains("hello"));
}

#[test]
fn http09_simple_request_gets_bare_body() {
    use gancio_core::io::Stream;
    let server = hello_server(true);
    server.raw_write(b"GET /\n").unwrap();
    let mut wire = Buffer::new();
    server.raw_read_buffer(&mut wire).unwrap();
    let text = String::from_utf8(wire.to_vec()).unwrap();
    // Simple form: no status line, no headers; just the entity.
    assert_eq!(text, "hello");
}

#[test]
fn connection_close_fails_queued_requests() {
    let server = HttpServer::new();
    {
        let server_for_requests = server.clone();
        server
            .trap_requests(move |server_request| {
                let mut response =
                    Response::from_request(&server_request.request, 200, 2);
                response.common.connection_type = ConnectionType::Close;
                server_for_requests.respond(
                    &server_request,
                    response,
                    Some(source_with(b"ok")),
                );
            })
            .unwrap();
    }
    let client = HttpClient::new();
    let first_ok = Rc::new(Cell::new(false));
    let second_failed = Rc::new(Cell::new(false));
    {
        let first_ok = first_ok.clone();
        client
            .request(get_request("/one"), None, move |result| {
                first_ok.set(result.is_ok());
            })
            .unwrap();
    }
    {
        let second_failed = second_failed.clone();
        client
            .request(get_request("/two"), None, move |result| {
                second_failed.set(result.is_err());
            })
            .unwrap();
    }
    attach_pair(client.clone(), server).unwrap();
    assert!(first_ok.get());
    assert!(second_failed.get());
    // Further requests fail fast.
    assert!(client
        .request(get_request("/three"), None, |_| {})
        .is_err());
}
