/*
 * base64.rs
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

//! Base64 codec. Encoding emits `ceil(len*4/3)` content characters and a
//! terminal `=`; [`encode_padded`] pads to a four-character multiple for
//! peers that require canonical RFC 4648 form. Decoding skips whitespace,
//! ignores unknown characters, and stops at the first `=`.

use std::sync::OnceLock;

const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

fn decode_table() -> &'static [i8; 256] {
    static TABLE: OnceLock<[i8; 256]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut t = [-1i8; 256];
        for (i, &c) in ALPHABET.iter().enumerate() {
            t[c as usize] = i as i8;
        }
        t
    })
}

/// Length of [`encode`]'s output for `len` input bytes: the content
/// characters plus the terminal `=`.
pub fn encoded_len(len: usize) -> usize {
    (len * 8 + 5) / 6 + 1
}

/// Upper bound on [`decode`]'s output for `len` encoded characters.
pub fn max_decoded_len(len: usize) -> usize {
    (len * 6 + 7) / 8
}

/// Encode to base64 with a single terminal `=`.
pub fn encode(src: &[u8]) -> String {
    let mut out = String::with_capacity(encoded_len(src.len()));
    let mut chunks = src.chunks_exact(3);
    for chunk in &mut chunks {
        let v = ((chunk[0] as u32) << 16) | ((chunk[1] as u32) << 8) | chunk[2] as u32;
        out.push(ALPHABET[(v >> 18) as usize & 63] as char);
        out.push(ALPHABET[(v >> 12) as usize & 63] as char);
        out.push(ALPHABET[(v >> 6) as usize & 63] as char);
        out.push(ALPHABET[v as usize & 63] as char);
    }
    match chunks.remainder() {
        [a] => {
            let v = (*a as u32) << 16;
            out.push(ALPHABET[(v >> 18) as usize & 63] as char);
            out.push(ALPHABET[(v >> 12) as usize & 63] as char);
        }
        [a, b] => {
            let v = ((*a as u32) << 16) | ((*b as u32) << 8);
            out.push(ALPHABET[(v >> 18) as usize & 63] as char);
            out.push(ALPHABET[(v >> 12) as usize & 63] as char);
            out.push(ALPHABET[(v >> 6) as usize & 63] as char);
        }
        _ => {}
    }
    out.push('=');
    out
}

/// Encode to canonical RFC 4648 base64 (padded to a 4-char multiple).
pub fn encode_padded(src: &[u8]) -> String {
    let mut out = encode(src);
    while out.len() % 4 != 0 {
        out.push('=');
    }
    // A full final quantum needs no padding at all.
    if src.len() % 3 == 0 {
        out.truncate(src.len() / 3 * 4);
    }
    out
}

/// Decode base64, ignoring whitespace and any character outside the
/// alphabet. Stops at the first `=`.
pub fn decode(src: &str) -> Vec<u8> {
    let table = decode_table();
    let mut out = Vec::with_capacity(max_decoded_len(src.len()));
    let mut quantum: u32 = 0;
    let mut bits = 0u32;
    for &b in src.as_bytes() {
        if b == b'=' {
            break;
        }
        let v = table[b as usize];
        if v < 0 {
            continue;
        }
        quantum = (quantum << 6) | v as u32;
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            out.push((quantum >> bits) as u8);
        }
    }
    out
}
