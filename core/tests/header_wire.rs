/*
 * header_wire.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * Wire-level header tests: the canonical Google homepage response (all
 * Cache-Control flags, three Set-Cookie entries with distinct keys,
 * paths and expiries) and parse/print round-trips for both header
 * directions.
 */

use gancio_core::buffer::Buffer;
use gancio_core::http::header::{
    Authorization, ConnectionType, ContentType, Cookie, ParseFlags, Verb,
};
use gancio_core::http::input::{request_from_buffer, response_from_buffer};
use gancio_core::http::output::{request_to_buffer, response_to_buffer};
use gancio_core::http::request::Request;
use gancio_core::http::response::Response;

const GOOGLE_RESPONSE: &str = "HTTP/1.0 200 OK\r\n\
    Cache-Control: private=private-field, no-cache=no-cache-field, \
    no-store, no-transform, must-revalidate, proxy-revalidate, \
    max-age=120, s-maxage=120\r\n\
    Content-Type: text/html\r\n\
    Set-Cookie: PREF=ID=2c9b2e3669d1d5eb:TM=1110491972:\
    LM=1110491972:S=JiXMvg60fPhnf8Ow; expires=Sun, 17-Jan-2038 \
    19:14:07 GMT; path=/; domain=.google.com\r\n\
    Set-Cookie: NID=67=abcDEFghiJKLmnoPQRstu; expires=Fri, 09-Sep-2005 \
    21:59:32 GMT; path=/search; domain=.google.com\r\n\
    Set-Cookie: SID=AaBbCcDdEeFfGg; expires=Sat, 10-Mar-2007 \
    21:59:32 GMT; path=/accounts; domain=.google.com\r\n\
    Server: GWS/2.1\r\n\
    Date: Thu, 10 Mar 2005 21:59:32 GMT\r\n\
    Connection: Close\r\n\
    \r\n";

fn parse_response(text: &str) -> Response {
    let mut wire = Buffer::new();
    wire.append_str(text);
    response_from_buffer(&mut wire, ParseFlags::default())
        .unwrap()
        .expect("complete header")
}

#[test]
fn google_homepage_response_parses() {
    let r = parse_response(GOOGLE_RESPONSE);
    assert_eq!(r.status_code, 200);
    assert_eq!(r.common.http_major_version, 1);
    assert_eq!(r.common.http_minor_version, 0);
    assert_eq!(r.common.connection(), ConnectionType::Close);
    let ct = r.common.content_type.as_ref().unwrap();
    assert_eq!(ct.type_, "text");
    assert_eq!(ct.subtype, "html");
    assert_eq!(r.server.as_deref(), Some("GWS/2.1"));
    assert!(r.common.date > 0);

    let cc = r.cache_control.as_ref().unwrap();
    assert!(cc.is_private);
    assert!(!cc.is_public);
    assert_eq!(cc.private_name.as_deref(), Some("private-field"));
    assert_eq!(cc.no_cache_name.as_deref(), Some("no-cache-field"));
    assert!(cc.no_cache);
    assert!(cc.no_store);
    assert!(cc.no_transform);
    assert!(cc.must_revalidate);
    assert!(cc.proxy_revalidate);
    assert_eq!(cc.max_age, 120);
    assert_eq!(cc.s_max_age, 120);
}

#[test]
fn google_homepage_three_set_cookies_are_distinct() {
    let r = parse_response(GOOGLE_RESPONSE);
    assert_eq!(r.set_cookies.len(), 3);

    let pref = &r.set_cookies[0];
    assert_eq!(pref.key, "PREF");
    assert_eq!(
        pref.value,
        "ID=2c9b2e3669d1d5eb:TM=1110491972:LM=1110491972:S=JiXMvg60fPhnf8Ow"
    );
    assert_eq!(pref.path.as_deref(), Some("/"));
    assert_eq!(
        pref.expire_date.as_deref(),
        Some("Sun, 17-Jan-2038 19:14:07 GMT")
    );

    let nid = &r.set_cookies[1];
    assert_eq!(nid.key, "NID");
    assert_eq!(nid.value, "67=abcDEFghiJKLmnoPQRstu");
    assert_eq!(nid.path.as_deref(), Some("/search"));
    assert_eq!(
        nid.expire_date.as_deref(),
        Some("Fri, 09-Sep-2005 21:59:32 GMT")
    );

    let sid = &r.set_cookies[2];
    assert_eq!(sid.key, "SID");
    assert_eq!(sid.value, "AaBbCcDdEeFfGg");
    assert_eq!(sid.path.as_deref(), Some("/accounts"));
    assert_eq!(
        sid.expire_date.as_deref(),
        Some("Sat, 10-Mar-2007 21:59:32 GMT")
    );

    for cookie in &r.set_cookies {
        assert_eq!(cookie.domain.as_deref(), Some(".google.com"));
        assert_eq!(cookie.comment, None);
        assert_eq!(cookie.max_age, -1);
        assert!(!cookie.secure);
    }
    // Keys, paths and expiries are pairwise distinct.
    for i in 0..3 {
        for j in i + 1..3 {
            assert_ne!(r.set_cookies[i].key, r.set_cookies[j].key);
            assert_ne!(r.set_cookies[i].path, r.set_cookies[j].path);
            assert_ne!(r.set_cookies[i].expire_date, r.set_cookies[j].expire_date);
        }
    }
}

#[test]
fn google_homepage_survives_print_parse_roundtrip() {
    let first = parse_response(GOOGLE_RESPONSE);
    let mut wire = Buffer::new();
    response_to_buffer(&first, &mut wire);
    let second = response_from_buffer(&mut wire, ParseFlags::default())
        .unwrap()
        .expect("complete header");

    assert_eq!(second.status_code, first.status_code);
    assert_eq!(second.common.connection(), first.common.connection());
    assert_eq!(second.common.content_type, first.common.content_type);
    assert_eq!(second.common.date, first.common.date);
    assert_eq!(second.server, first.server);
    assert_eq!(second.cache_control, first.cache_control);
    assert_eq!(second.set_cookies, first.set_cookies);
}

#[test]
fn request_print_parse_roundtrip() {
    let mut request = Request::new(Verb::Post, "/cgi-bin/run?a=1&b=2");
    request.host = Some("www.example.com".to_string());
    request.user_agent = Some("gancio/0.1".to_string());
    request.referrer = Some("http://www.example.com/start".to_string());
    request.common.content_length = 17;
    request.common.content_type = Some(ContentType::new("application", "x-www-form-urlencoded"));
    request.if_modified_since = 784111777;
    request.max_forwards = 5;
    request.authorization = Some(std::rc::Rc::new(Authorization::Basic {
        user: "Aladdin".to_string(),
        password: "open sesame".to_string(),
    }));
    let mut cookie = Cookie::new("session", "0x1234abcd");
    cookie.path = Some("/cgi-bin".to_string());
    request.add_cookie(cookie);

    let mut wire = Buffer::new();
    request_to_buffer(&request, &mut wire);
    let reparsed = request_from_buffer(&mut wire, ParseFlags::default())
        .unwrap()
        .expect("complete header");
    assert!(wire.is_empty());

    assert_eq!(reparsed.verb, Verb::Post);
    assert_eq!(reparsed.path, request.path);
    assert_eq!(reparsed.host, request.host);
    assert_eq!(reparsed.user_agent, request.user_agent);
    assert_eq!(reparsed.referrer, request.referrer);
    assert_eq!(reparsed.common.content_length, 17);
    assert_eq!(reparsed.common.content_type, request.common.content_type);
    assert_eq!(reparsed.if_modified_since, request.if_modified_since);
    assert_eq!(reparsed.max_forwards, 5);
    assert_eq!(reparsed.authorization, request.authorization);
    assert_eq!(reparsed.cookies, request.cookies);
}
