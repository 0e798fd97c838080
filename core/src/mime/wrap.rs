/*
 * wrap.rs
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

//! RFC 822 word wrap. `{unwrap}...{/unwrap}` bounds a region exempt from
//! wrapping; the markers are stripped and line breaks inside the region are
//! removed. Offsets are counted in bytes, split points snap to the previous
//! character boundary so multibyte text is never torn mid-character.

const UNWRAP_OPEN: &str = "{unwrap}";
const UNWRAP_CLOSE: &str = "{/unwrap}";

/// Largest char boundary at or below `i`.
fn boundary_floor(s: &str, mut i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn strip_line_breaks(s: &str) -> String {
    if s.contains('\r') || s.contains('\n') {
        s.replace("\r\n", "").replace('\r', "").replace('\n', "")
    } else {
        s.to_string()
    }
}

/// Replace each `{unwrap}...{/unwrap}` region with its content, markers
/// stripped and internal line breaks removed. Unpaired markers are left as-is.
pub fn unwrap_specials(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find(UNWRAP_OPEN) {
        let after_open = start + UNWRAP_OPEN.len();
        match rest[after_open..].find(UNWRAP_CLOSE) {
            Some(end) => {
                out.push_str(&rest[..start]);
                out.push_str(&strip_line_breaks(&rest[after_open..after_open + end]));
                rest = &rest[after_open + end + UNWRAP_CLOSE.len()..];
            }
            None => break,
        }
    }
    out.push_str(rest);
    out
}

/// Pull unwrap regions out of `s`, replacing each with an opaque placeholder
/// that the wrapper treats as one unbreakable word.
fn extract_unwrap_regions(s: &str) -> (String, Vec<String>) {
    let mut regions = Vec::new();
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find(UNWRAP_OPEN) {
        let after_open = start + UNWRAP_OPEN.len();
        match rest[after_open..].find(UNWRAP_CLOSE) {
            Some(end) => {
                out.push_str(&rest[..start]);
                out.push_str(&format!("{{{{unwrapped{}}}}}", regions.len()));
                regions.push(strip_line_breaks(&rest[after_open..after_open + end]));
                rest = &rest[after_open + end + UNWRAP_CLOSE.len()..];
            }
            None => break,
        }
    }
    out.push_str(rest);
    (out, regions)
}

/// Greedily wrap one physical line at `charlim` bytes, breaking at spaces.
/// A word longer than the limit is left whole for the hard-split pass.
fn greedy_wrap(line: &str, charlim: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in line.split(' ') {
        if current.is_empty() {
            current.push_str(word);
        } else if current.len() + 1 + word.len() <= charlim {
            current.push(' ');
            current.push_str(word);
        } else {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
        }
    }
    lines.push(current);
    lines
}

/// Word-wrap `text` to `charlim` bytes per line, joining output lines with
/// `newline` (no trailing terminator). Existing line breaks are kept (CR and
/// CRLF normalized first), trailing spaces are dropped, over-length
/// unbreakable words are hard-split just below the limit, and lines carrying
/// a URL are exempt from the hard split.
pub fn word_wrap(text: &str, charlim: usize, newline: &str) -> String {
    let charlim = if charlim == 0 { 76 } else { charlim };

    let text = if text.contains('\r') {
        text.replace("\r\n", "\n").replace('\r', "\n")
    } else {
        text.to_string()
    };

    let (text, regions) = extract_unwrap_regions(&text);

    let mut output = String::with_capacity(text.len());
    for line in text.split('\n') {
        let line = line.trim_end_matches(' ');
        for segment in greedy_wrap(line, charlim) {
            // Placeholders must reach the restore pass intact, whatever the
            // width; URLs stay whole so they remain clickable.
            if segment.len() <= charlim
                || segment.contains("://")
                || segment.contains("www.")
                || segment.contains("{{unwrapped")
            {
                output.push_str(&segment);
                output.push_str(newline);
                continue;
            }
            let mut rest = segment.as_str();
            while rest.len() > charlim {
                let cut = boundary_floor(rest, charlim - 1);
                output.push_str(&rest[..cut]);
                output.push_str(newline);
                rest = &rest[cut..];
            }
            output.push_str(rest);
            output.push_str(newline);
        }
    }

    let mut output = output;
    if output.ends_with(newline) {
        output.truncate(output.len() - newline.len());
    }
    for (i, region) in regions.iter().enumerate() {
        output = output.replace(&format!("{{{{unwrapped{}}}}}", i), region);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap(text: &str, charlim: usize) -> String {
        word_wrap(text, charlim, "\r\n")
    }

    #[test]
    fn short_line_untouched() {
        assert_eq!(wrap("This is a short line.", 76), "This is a short line.");
    }

    #[test]
    fn wraps_at_spaces() {
        assert_eq!(wrap("This is a short line.", 16), "This is a short\r\nline.");
    }

    #[test]
    fn bare_cr_is_a_line_break() {
        assert_eq!(wrap("This is a\rshort line.", 76), "This is a\r\nshort line.");
    }

    #[test]
    fn unwrap_region_kept_whole() {
        assert_eq!(
            wrap("This is a {unwrap}not so short{/unwrap} line.", 76),
            "This is a not so short line."
        );
    }

    #[test]
    fn unwrap_region_on_its_own_line_when_wrapped() {
        assert_eq!(
            wrap("This is a {unwrap}not so short or something{/unwrap} line.", 16),
            "This is a\r\nnot so short or something\r\nline."
        );
    }

    #[test]
    fn unwrap_region_line_breaks_removed() {
        assert_eq!(wrap("{unwrap}a\r\nb{/unwrap}", 5), "ab");
        assert_eq!(unwrap_specials("x{unwrap}a\r\nb{/unwrap}y"), "xaby");
    }

    #[test]
    fn unwrap_region_survives_widths_below_placeholder_size() {
        for width in 1..20 {
            assert_eq!(wrap("{unwrap}a\r\nb{/unwrap}", width), "ab", "width {}", width);
        }
    }

    #[test]
    fn unwrap_region_url_kept_whole_at_small_width() {
        assert_eq!(
            wrap("see {unwrap}http://a.example/x?y=1{/unwrap} ok", 10),
            "see\r\nhttp://a.example/x?y=1\r\nok"
        );
    }

    #[test]
    fn existing_breaks_consolidated() {
        assert_eq!(
            wrap("This is\r\na not so short or something\r\nline.", 16),
            "This is\r\na not so short\r\nor something\r\nline."
        );
    }

    #[test]
    fn long_word_hard_split() {
        assert_eq!(
            wrap("This is part of interoperabilities isn't it?", 16),
            "This is part of\r\ninteroperabilit\r\nies\r\nisn't it?"
        );
    }

    #[test]
    fn url_not_split() {
        assert_eq!(
            wrap("This is part of http://interoperabilities.com isn't it?", 16),
            "This is part of\r\nhttp://interoperabilities.com\r\nisn't it?"
        );
    }

    #[test]
    fn idempotent_on_wrapped_text() {
        let once = word_wrap("one two three four five six seven eight nine ten", 20, "\r\n");
        let twice = word_wrap(&once, 20, "\r\n");
        assert_eq!(once, twice);
    }

    #[test]
    fn no_trailing_terminator() {
        assert!(!word_wrap("plain text", 76, "\r\n").ends_with("\r\n"));
        assert_eq!(word_wrap("", 76, "\r\n"), "");
    }

    #[test]
    fn multibyte_not_torn() {
        let wrapped = word_wrap(&"à".repeat(40), 16, "\r\n");
        for line in wrapped.lines() {
            assert!(line.len() <= 16);
            assert!(std::str::from_utf8(line.as_bytes()).is_ok());
        }
    }
}
