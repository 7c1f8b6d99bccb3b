/*
 * date.rs
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

//! Wire date formats. HTTP accepts RFC 1123, RFC 850, the Set-Cookie
//! dash variant, and asctime (RFC 2616 §3.3.1) and always emits RFC 1123.
//! XMLRPC uses basic ISO 8601 (`YYYYMMDDTHH:MM:SS`).

use chrono::{DateTime, NaiveDateTime, Utc};

/// Accepted HTTP date layouts, tried in order.
const HTTP_FORMATS: &[&str] = &[
    // rfc 1123: Sun, 06 Nov 1994 08:49:37 GMT
    "%a, %d %b %Y %H:%M:%S GMT",
    // Set-Cookie Expires variant: Sun, 17-Jan-2038 19:14:07 GMT
    "%a, %d-%b-%Y %H:%M:%S GMT",
    // rfc 850: Sunday, 06-Nov-94 08:49:37 GMT
    "%A, %d-%b-%y %H:%M:%S GMT",
    // asctime: Sun Nov  6 08:49:37 1994
    "%a %b %e %H:%M:%S %Y",
];

const ISO8601_BASIC: &str = "%Y%m%dT%H:%M:%S";

/// Parse an HTTP-format date into unix seconds.
pub fn parse_http_date(s: &str) -> Option<i64> {
    let s = s.trim();
    for format in HTTP_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt.and_utc().timestamp());
        }
    }
    None
}

/// Print unix seconds as an RFC 1123 date, the only format HTTP emits.
pub fn format_http_date(unix: i64) -> String {
    let dt: DateTime<Utc> = DateTime::from_timestamp(unix, 0).unwrap_or(DateTime::UNIX_EPOCH);
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parse a basic ISO 8601 timestamp (XMLRPC dateTime.iso8601).
pub fn parse_iso8601(s: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(s.trim(), ISO8601_BASIC)
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

/// Print unix seconds as basic ISO 8601.
pub fn format_iso8601(unix: i64) -> String {
    let dt: DateTime<Utc> = DateTime::from_timestamp(unix, 0).unwrap_or(DateTime::UNIX_EPOCH);
    dt.format(ISO8601_BASIC).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    // All four spellings of the same instant from rfc 2616 §3.3.1.
    const EPOCH_784111777: i64 = 784111777;

    #[test]
    fn parses_all_http_layouts() {
        assert_eq!(
            parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT"),
            Some(EPOCH_784111777)
        );
        assert_eq!(
            parse_http_date("Sunday, 06-Nov-94 08:49:37 GMT"),
            Some(EPOCH_784111777)
        );
        assert_eq!(
            parse_http_date("Sun Nov  6 08:49:37 1994"),
            Some(EPOCH_784111777)
        );
        assert_eq!(
            parse_http_date("Sun, 06-Nov-1994 08:49:37 GMT"),
            Some(EPOCH_784111777)
        );
        assert_eq!(parse_http_date("yesterday"), None);
    }

    #[test]
    fn prints_rfc1123() {
        assert_eq!(
            format_http_date(EPOCH_784111777),
            "Sun, 06 Nov 1994 08:49:37 GMT"
        );
    }

    #[test]
    fn http_roundtrip() {
        let t = 1_066_441_969;
        assert_eq!(parse_http_date(&format_http_date(t)), Some(t));
    }

    #[test]
    fn iso8601_roundtrip() {
        let t = 1_066_441_969;
        assert_eq!(parse_iso8601(&format_iso8601(t)), Some(t));
        assert_eq!(parse_iso8601("19980717T14:08:55"), Some(900684535));
    }
}
