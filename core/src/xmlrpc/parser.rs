/*
 * parser.rs
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

//! XMLRPC parser: a pushdown machine over XML events. A value stack
//! tracks nested struct/array contexts; leaf types decode from text
//! content at tag close. An empty `<value>` is the empty string.

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::codec::{base64, date};
use crate::error::Error;
use crate::xmlrpc::{Document, Fault, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leaf {
    Int,
    Boolean,
    Double,
    Str,
    Date,
    Base64,
}

enum Frame {
    Value {
        leaf: Option<Leaf>,
        text: String,
        composite: Option<Value>,
    },
    Struct {
        members: Vec<(String, Value)>,
    },
    Member {
        name: String,
        in_name: bool,
        value: Option<Value>,
    },
    Array {
        items: Vec<Value>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocKind {
    Call,
    Response,
}

#[derive(Default)]
struct Machine {
    kind: Option<DocKind>,
    method: String,
    in_method_name: bool,
    in_fault: bool,
    params: Vec<Value>,
    fault_value: Option<Value>,
    stack: Vec<Frame>,
}

impl Machine {
    fn start(&mut self, name: &[u8]) -> Result<(), Error> {
        match name {
            b"methodCall" => self.kind = Some(DocKind::Call),
            b"methodResponse" => self.kind = Some(DocKind::Response),
            b"methodName" => self.in_method_name = true,
            b"fault" => self.in_fault = true,
            b"params" | b"param" | b"array" => {}
            b"value" => self.stack.push(Frame::Value {
                leaf: None,
                text: String::new(),
                composite: None,
            }),
            b"struct" => self.stack.push(Frame::Struct {
                members: Vec::new(),
            }),
            b"member" => self.stack.push(Frame::Member {
                name: String::new(),
                in_name: false,
                value: None,
            }),
            b"name" => {
                if let Some(Frame::Member { in_name, .. }) = self.stack.last_mut() {
                    *in_name = true;
                }
            }
            b"data" => self.stack.push(Frame::Array { items: Vec::new() }),
            other => {
                let leaf = match other {
                    b"i4" | b"int" => Some(Leaf::Int),
                    b"boolean" => Some(Leaf::Boolean),
                    b"double" => Some(Leaf::Double),
                    b"string" => Some(Leaf::Str),
                    b"dateTime.iso8601" => Some(Leaf::Date),
                    b"base64" => Some(Leaf::Base64),
                    _ => None,
                };
                match (leaf, self.stack.last_mut()) {
                    (Some(kind), Some(Frame::Value { leaf, .. })) => *leaf = Some(kind),
                    (Some(_), _) => {
                        return Err(Error::parse("type tag outside <value>"));
                    }
                    (None, _) => {
                        return Err(Error::parse(format!(
                            "unexpected tag <{}>",
                            String::from_utf8_lossy(other)
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn text(&mut self, content: &str) {
        if self.in_method_name {
            self.method.push_str(content);
            return;
        }
        match self.stack.last_mut() {
            Some(Frame::Member { name, in_name, .. }) if *in_name => name.push_str(content),
            Some(Frame::Value { text, .. }) => text.push_str(content),
            _ => {}
        }
    }

    fn end(&mut self, name: &[u8]) -> Result<(), Error> {
        match name {
            b"methodName" => self.in_method_name = false,
            b"name" => {
                if let Some(Frame::Member { in_name, .. }) = self.stack.last_mut() {
                    *in_name = false;
                }
            }
            b"value" => {
                let Some(Frame::Value {
                    leaf,
                    text,
                    composite,
                }) = self.stack.pop()
                else {
                    return Err(Error::parse("</value> without <value>"));
                };
                let value = match composite {
                    Some(v) => v,
                    None => decode_leaf(leaf, &text)?,
                };
                self.deliver(value);
            }
            b"struct" => {
                let Some(Frame::Struct { members }) = self.stack.pop() else {
                    return Err(Error::parse("</struct> without <struct>"));
                };
                self.set_composite(Value::Struct(members))?;
            }
            b"member" => {
                let Some(Frame::Member { name, value, .. }) = self.stack.pop() else {
                    return Err(Error::parse("</member> without <member>"));
                };
                let value = value.ok_or_else(|| Error::parse("struct member without value"))?;
                match self.stack.last_mut() {
                    Some(Frame::Struct { members }) => members.push((name, value)),
                    _ => return Err(Error::parse("<member> outside <struct>")),
                }
            }
            b"data" => {
                let Some(Frame::Array { items }) = self.stack.pop() else {
                    return Err(Error::parse("</data> without <data>"));
                };
                self.set_composite(Value::Array(items))?;
            }
            b"fault" => self.in_fault = false,
            _ => {}
        }
        Ok(())
    }

    fn empty(&mut self, name: &[u8]) -> Result<(), Error> {
        // Self-closing form: same as start immediately followed by end.
        self.start(name)?;
        self.end(name)
    }

    fn deliver(&mut self, value: Value) {
        match self.stack.last_mut() {
            Some(Frame::Member { value: slot, .. }) => *slot = Some(value),
            Some(Frame::Array { items }) => items.push(value),
            _ => {
                if self.in_fault {
                    self.fault_value = Some(value);
                } else {
                    self.params.push(value);
                }
            }
        }
    }

    fn set_composite(&mut self, value: Value) -> Result<(), Error> {
        match self.stack.last_mut() {
            Some(Frame::Value { composite, .. }) => {
                *composite = Some(value);
                Ok(())
            }
            _ => Err(Error::parse("composite outside <value>")),
        }
    }

    fn finish(self) -> Result<Document, Error> {
        if !self.stack.is_empty() {
            return Err(Error::parse("truncated XMLRPC document"));
        }
        match self.kind {
            Some(DocKind::Call) => Ok(Document::Call {
                method: self.method,
                params: self.params,
            }),
            Some(DocKind::Response) => match self.fault_value {
                Some(value) => {
                    let code = value
                        .member("faultCode")
                        .and_then(Value::as_int)
                        .ok_or_else(|| Error::parse("fault without faultCode"))?;
                    let string = value
                        .member("faultString")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    Ok(Document::ResponseFault(Fault { code, string }))
                }
                None => Ok(Document::Response {
                    params: self.params,
                }),
            },
            None => Err(Error::parse("not an XMLRPC document")),
        }
    }
}

fn decode_leaf(leaf: Option<Leaf>, text: &str) -> Result<Value, Error> {
    let Some(leaf) = leaf else {
        // Untyped or empty <value> is a string.
        return Ok(Value::String(text.to_string()));
    };
    match leaf {
        Leaf::Int => text
            .trim()
            .parse::<i32>()
            .map(Value::Int)
            .map_err(|_| Error::parse(format!("bad integer: {:?}", text))),
        Leaf::Boolean => match text.trim() {
            "1" | "true" => Ok(Value::Boolean(true)),
            "0" | "false" => Ok(Value::Boolean(false)),
            other => Err(Error::parse(format!("bad boolean: {:?}", other))),
        },
        Leaf::Double => text
            .trim()
            .parse::<f64>()
            .map(Value::Double)
            .map_err(|_| Error::parse(format!("bad double: {:?}", text))),
        Leaf::Str => Ok(Value::String(text.to_string())),
        Leaf::Date => date::parse_iso8601(text)
            .map(Value::Date)
            .ok_or_else(|| Error::parse(format!("bad dateTime.iso8601: {:?}", text))),
        Leaf::Base64 => Ok(Value::Binary(base64::decode(text))),
    }
}

/// Parse one complete XMLRPC document.
pub fn parse_document(input: &[u8]) -> Result<Document, Error> {
    let mut reader = Reader::from_reader(input);
    reader.config_mut().trim_text(true);
    let mut machine = Machine::default();
    let mut buf = Vec::new();
    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| Error::parse(format!("bad XML: {}", e)))?
        {
            Event::Start(e) => machine.start(e.name().as_ref())?,
            Event::End(e) => machine.end(e.name().as_ref())?,
            Event::Empty(e) => machine.empty(e.name().as_ref())?,
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| Error::parse(format!("bad XML text: {}", e)))?;
                machine.text(&text);
            }
            Event::CData(c) => {
                machine.text(&String::from_utf8_lossy(&c.into_inner()));
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    machine.finish()
}

/// Incremental front end: feed bytes as they arrive; a document is parsed
/// once its closing root tag has been received.
#[derive(Default)]
pub struct Parser {
    pending: Vec<u8>,
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a parsed document as soon as one is complete; `None` while
    /// more input is required.
    pub fn feed(&mut self, data: &[u8]) -> Result<Option<Document>, Error> {
        self.pending.extend_from_slice(data);
        for close in [&b"</methodCall>"[..], &b"</methodResponse>"[..]] {
            if let Some(end) = find_subsequence(&self.pending, close) {
                let doc_end = end + close.len();
                let doc = parse_document(&self.pending[..doc_end])?;
                self.pending.drain(..doc_end);
                return Ok(Some(doc));
            }
        }
        Ok(None)
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_call() {
        let doc = parse_document(
            b"<?xml version=\"1.0\"?>\
              <methodCall><methodName>examples.getStateName</methodName>\
              <params><param><value><i4>41</i4></value></param></params>\
              </methodCall>",
        )
        .unwrap();
        assert_eq!(
            doc,
            Document::Call {
                method: "examples.getStateName".to_string(),
                params: vec![Value::Int(41)],
            }
        );
    }

    #[test]
    fn empty_value_is_empty_string() {
        let doc = parse_document(
            b"<methodCall><methodName>m</methodName>\
              <params><param><value></value></param>\
              <param><value/></param></params></methodCall>",
        )
        .unwrap();
        assert_eq!(
            doc,
            Document::Call {
                method: "m".to_string(),
                params: vec![
                    Value::String(String::new()),
                    Value::String(String::new())
                ],
            }
        );
    }

    #[test]
    fn parses_nested_struct_and_array() {
        let doc = parse_document(
            b"<methodResponse><params><param><value><struct>\
              <member><name>list</name><value><array><data>\
              <value><int>1</int></value><value>two</value>\
              </data></array></value></member>\
              <member><name>flag</name><value><boolean>1</boolean></value></member>\
              </struct></value></param></params></methodResponse>",
        )
        .unwrap();
        let Document::Response { params } = doc else {
            panic!("expected response");
        };
        let v = &params[0];
        assert_eq!(
            v.member("list"),
            Some(&Value::Array(vec![
                Value::Int(1),
                Value::String("two".to_string())
            ]))
        );
        assert_eq!(v.member("flag"), Some(&Value::Boolean(true)));
    }

    #[test]
    fn parses_fault() {
        let doc = parse_document(
            b"<methodResponse><fault><value><struct>\
              <member><name>faultCode</name><value><int>4</int></value></member>\
              <member><name>faultString</name><value><string>Too many parameters.</string></value></member>\
              </struct></value></fault></methodResponse>",
        )
        .unwrap();
        assert_eq!(
            doc,
            Document::ResponseFault(Fault {
                code: 4,
                string: "Too many parameters.".to_string()
            })
        );
    }

    #[test]
    fn feed_waits_for_complete_document() {
        let full = b"<methodCall><methodName>a.b</methodName>\
                     <params><param><value><string>x</string></value></param></params>\
                     </methodCall>";
        let mut parser = Parser::new();
        let (head, tail) = full.split_at(40);
        assert!(parser.feed(head).unwrap().is_none());
        let doc = parser.feed(tail).unwrap().expect("complete now");
        assert_eq!(
            doc,
            Document::Call {
                method: "a.b".to_string(),
                params: vec![Value::String("x".to_string())],
            }
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_document(b"<html><body>nope</body></html>").is_err());
    }
}
