/*
 * writer.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Gancio, an event-driven network server toolkit.
 *
 * Gancio is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Gancio is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Gancio.  If not, see <http://www.gnu.org/licenses/>.
 */

//! XMLRPC printer: canonical XML into a [`Buffer`]. Text is escaped for
//! markup, binary is base64-encoded, dates emit basic ISO 8601.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::writer::Writer;

use crate::buffer::Buffer;
use crate::codec::{base64, date};
use crate::xmlrpc::{Fault, Value};

fn leaf(w: &mut Writer<&mut Vec<u8>>, tag: &str, text: &str) {
    let _ = w.write_event(Event::Start(BytesStart::new(tag)));
    let _ = w.write_event(Event::Text(BytesText::new(text)));
    let _ = w.write_event(Event::End(BytesEnd::new(tag)));
}

fn write_value(w: &mut Writer<&mut Vec<u8>>, value: &Value) {
    let _ = w.write_event(Event::Start(BytesStart::new("value")));
    match value {
        Value::Int(v) => leaf(w, "i4", &v.to_string()),
        Value::Boolean(v) => leaf(w, "boolean", if *v { "1" } else { "0" }),
        Value::Double(v) => leaf(w, "double", &v.to_string()),
        Value::String(s) => leaf(w, "string", s),
        Value::Date(t) => leaf(w, "dateTime.iso8601", &date::format_iso8601(*t)),
        Value::Binary(data) => leaf(w, "base64", &base64::encode_padded(data)),
        Value::Struct(members) => {
            let _ = w.write_event(Event::Start(BytesStart::new("struct")));
            for (name, member) in members {
                let _ = w.write_event(Event::Start(BytesStart::new("member")));
                leaf(w, "name", name);
                write_value(w, member);
                let _ = w.write_event(Event::End(BytesEnd::new("member")));
            }
            let _ = w.write_event(Event::End(BytesEnd::new("struct")));
        }
        Value::Array(items) => {
            let _ = w.write_event(Event::Start(BytesStart::new("array")));
            let _ = w.write_event(Event::Start(BytesStart::new("data")));
            for item in items {
                write_value(w, item);
            }
            let _ = w.write_event(Event::End(BytesEnd::new("data")));
            let _ = w.write_event(Event::End(BytesEnd::new("array")));
        }
    }
    let _ = w.write_event(Event::End(BytesEnd::new("value")));
}

fn write_params(w: &mut Writer<&mut Vec<u8>>, params: &[Value]) {
    let _ = w.write_event(Event::Start(BytesStart::new("params")));
    for param in params {
        let _ = w.write_event(Event::Start(BytesStart::new("param")));
        write_value(w, param);
        let _ = w.write_event(Event::End(BytesEnd::new("param")));
    }
    let _ = w.write_event(Event::End(BytesEnd::new("params")));
}

fn with_writer(out: &mut Buffer, body: impl FnOnce(&mut Writer<&mut Vec<u8>>)) {
    let mut bytes = Vec::new();
    {
        let mut w = Writer::new(&mut bytes);
        let _ = w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)));
        body(&mut w);
    }
    out.append(&bytes);
}

/// Print a method call document.
pub fn write_call(method: &str, params: &[Value], out: &mut Buffer) {
    with_writer(out, |w| {
        let _ = w.write_event(Event::Start(BytesStart::new("methodCall")));
        leaf(w, "methodName", method);
        write_params(w, params);
        let _ = w.write_event(Event::End(BytesEnd::new("methodCall")));
    });
}

/// Print a successful method response document.
pub fn write_response(params: &[Value], out: &mut Buffer) {
    with_writer(out, |w| {
        let _ = w.write_event(Event::Start(BytesStart::new("methodResponse")));
        write_params(w, params);
        let _ = w.write_event(Event::End(BytesEnd::new("methodResponse")));
    });
}

/// Print a fault response document.
pub fn write_fault(fault: &Fault, out: &mut Buffer) {
    with_writer(out, |w| {
        let _ = w.write_event(Event::Start(BytesStart::new("methodResponse")));
        let _ = w.write_event(Event::Start(BytesStart::new("fault")));
        let value = Value::Struct(vec![
            ("faultCode".to_string(), Value::Int(fault.code)),
            (
                "faultString".to_string(),
                Value::String(fault.string.clone()),
            ),
        ]);
        write_value(w, &value);
        let _ = w.write_event(Event::End(BytesEnd::new("fault")));
        let _ = w.write_event(Event::End(BytesEnd::new("methodResponse")));
    });
}
