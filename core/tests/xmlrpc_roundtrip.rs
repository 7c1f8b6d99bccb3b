/*
 * xmlrpc_roundtrip.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * XMLRPC request round-trip: build a call with one parameter of every
 * leaf type, serialize it, parse it back, and compare.
 */

use rand::RngCore;

use gancio_core::buffer::Buffer;
use gancio_core::xmlrpc::{parse_document, write_call, Document, Value};

#[test]
fn request_roundtrip_all_leaf_types() {
    let mut random = vec![0u8; 100];
    rand::thread_rng().fill_bytes(&mut random);

    let params = vec![
        Value::Int(101),
        Value::Boolean(true),
        Value::Double(2.7182182),
        Value::String("hello world".to_string()),
        Value::Date(1_066_441_969),
        Value::Binary(random.clone()),
    ];

    let mut wire = Buffer::new();
    write_call("test.roundtrip", &params, &mut wire);
    let doc = parse_document(&wire.to_vec()).unwrap();

    let Document::Call { method, params: parsed } = doc else {
        panic!("expected a method call");
    };
    assert_eq!(method, "test.roundtrip");
    assert_eq!(parsed.len(), 6);
    assert_eq!(parsed[0], Value::Int(101));
    assert_eq!(parsed[1], Value::Boolean(true));
    let Value::Double(d) = parsed[2] else {
        panic!("expected double");
    };
    assert!((d - 2.7182182).abs() < 1e-7);
    assert_eq!(parsed[3], Value::String("hello world".to_string()));
    assert_eq!(parsed[4], Value::Date(1_066_441_969));
    assert_eq!(parsed[5], Value::Binary(random));
}

#[test]
fn nested_structures_roundtrip() {
    let params = vec![Value::Struct(vec![
        (
            "values".to_string(),
            Value::Array(vec![
                Value::Int(1),
                Value::String("two".to_string()),
                Value::Array(vec![Value::Boolean(false)]),
            ]),
        ),
        ("empty".to_string(), Value::String(String::new())),
    ])];
    let mut wire = Buffer::new();
    write_call("nested", &params, &mut wire);
    let doc = parse_document(&wire.to_vec()).unwrap();
    assert_eq!(
        doc,
        Document::Call {
            method: "nested".to_string(),
            params,
        }
    );
}
