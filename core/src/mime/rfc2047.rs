/*
 * rfc2047.rs
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

//! RFC 2047 "Q" encoded-words for header values (e.g. =?UTF-8?Q?...?=).
//! Related but not identical to quoted-printable, so it lives apart.

/// Q-encode `input` for use in a header. Every byte is emitted as uppercase
/// `=XX` hex; the bytes of one character always stay inside one encoded-word
/// so multibyte text is never split across a line break. When a word would
/// push a line past 76 columns, the current encoded-word is closed and a
/// folded continuation word is opened on the next line.
pub fn prep_q_encoding(input: &str, charset: &str, crlf: &str) -> String {
    let input: String = input.chars().filter(|c| *c != '\r' && *c != '\n').collect();

    let mut output = format!("=?{}?Q?", charset);
    // RFC 2045 sets a 76-column limit; leave room for the closing ?=.
    let mut length = output.len();
    let mut buf = [0u8; 4];
    for ch in input.chars() {
        let encoded: String = ch
            .encode_utf8(&mut buf)
            .as_bytes()
            .iter()
            .map(|b| format!("={:02X}", b))
            .collect();
        let l = encoded.len();
        if length + l > 74 {
            output.push_str("?=");
            output.push_str(crlf);
            output.push_str(&format!(" =?{}?Q?", charset));
            length = 6 + charset.len() + l;
        } else {
            length += l;
        }
        output.push_str(&encoded);
    }

    output.push_str("?=");
    output
}
