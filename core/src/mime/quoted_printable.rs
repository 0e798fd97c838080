/*
 * quoted_printable.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Lettera, a mail delivery library.
 *
 * Lettera is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Lettera is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Lettera.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Quoted-Printable encoder for Content-Transfer-Encoding (RFC 2045).
//! One code path for every CRLF setting; the output decodes back to the
//! input byte-for-byte (nulls become =00, trailing whitespace is escaped).

/// ASCII bytes that can always be used literally (RFC 2049), `=` excluded
/// since it is the encoding delimiter.
fn is_safe(b: u8) -> bool {
    matches!(b,
        b'0'..=b'9'
        | b'A'..=b'Z'
        | b'a'..=b'z'
        | b'\'' | b'(' | b')' | b'+' | b',' | b'-' | b'.' | b'/' | b':' | b'?')
}

/// Encode `input` as quoted-printable. Wrapping is intentional so that mail
/// servers encode characters properly, so `{unwrap}` markers are dropped
/// first. Line endings are normalized before encoding; the output uses
/// `crlf` as its terminator, with the trailing one trimmed.
pub fn prep_quoted_printable(input: &str, crlf: &str) -> String {
    let input = input.replace("{unwrap}", "").replace("{/unwrap}", "");
    let input = if input.contains('\r') {
        input.replace("\r\n", "\n").replace('\r', "\n")
    } else {
        input
    };

    let mut output = String::with_capacity(input.len() + input.len() / 8);
    for line in input.split('\n') {
        let bytes = line.as_bytes();
        let mut temp = String::new();
        for (i, &b) in bytes.iter().enumerate() {
            let mut literal = None;
            let escaped;
            if b == b' ' || b == b'\t' {
                // Spaces and tabs are literal except at the end of the line.
                if i == bytes.len() - 1 {
                    escaped = format!("={:02X}", b);
                } else {
                    literal = Some(b as char);
                    escaped = String::new();
                }
            } else if b != b'=' && is_safe(b) {
                literal = Some(b as char);
                escaped = String::new();
            } else {
                escaped = format!("={:02X}", b);
            }
            let width = literal.map_or(escaped.len(), |_| 1);
            // Soft line break before the 76th column.
            if temp.len() + width >= 76 {
                output.push_str(&temp);
                output.push('=');
                output.push_str(crlf);
                temp.clear();
            }
            match literal {
                Some(c) => temp.push(c),
                None => temp.push_str(&escaped),
            }
        }
        output.push_str(&temp);
        output.push_str(crlf);
    }

    output.truncate(output.len() - crlf.len());
    output
}
