/*
 * render.rs
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

//! Assembles the wire form of a message: the header block and the body,
//! framed as one of four shapes depending on format and attachments.
//!
//! text, no attachments        flat text/plain
//! html, no attachments        multipart/alternative (plain + html)
//! text with attachments       multipart/mixed
//! html with attachments       multipart/mixed > multipart/related >
//!                             multipart/alternative, outer layers present
//!                             only when their group is non-empty

use base64::prelude::{Engine, BASE64_STANDARD};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::{Config, MailType, Protocol};
use crate::message::{Message, MultipartGroup};
use crate::mime::{prep_quoted_printable, word_wrap};

/// A message rendered for a particular backend. For [`Protocol::Mail`] the
/// MIME headers live in `header_str` and `subject` is carried separately;
/// for the socket backends the MIME headers are prepended to `final_body`
/// and the Subject stays in the header block.
#[derive(Debug, Clone)]
pub struct RenderedMessage {
    pub header_str: String,
    pub final_body: String,
    /// Encoded Subject value, for backends that take it out of band.
    pub subject: String,
}

/// Content class of the body, selected from format and attachment presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContentClass {
    Plain,
    Html,
    PlainAttach,
    HtmlAttach,
}

fn content_class(cfg: &Config, msg: &Message) -> ContentClass {
    let html = cfg.mail_type == MailType::Html;
    let attached = !msg.attachments.is_empty();
    match (html, attached) {
        (true, true) => ContentClass::HtmlAttach,
        (true, false) => ContentClass::Html,
        (false, true) => ContentClass::PlainAttach,
        (false, false) => ContentClass::Plain,
    }
}

/// MIME boundary token, unique per message part.
fn boundary(prefix: &str) -> String {
    let mut rand = [0u8; 8];
    let _ = getrandom::getrandom(&mut rand);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let tail: String = rand.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}{:x}.{}", prefix, nanos, tail)
}

fn mime_preamble(newline: &str) -> String {
    format!(
        "This is a multi-part message in MIME format.{}Your email application may not support this format.",
        newline
    )
}

/// Case-insensitive ASCII substring search.
fn find_ci(haystack: &str, needle: &str) -> Option<usize> {
    let h = haystack.as_bytes();
    let n = needle.as_bytes();
    if n.is_empty() || n.len() > h.len() {
        return None;
    }
    (0..=h.len() - n.len()).find(|&i| h[i..i + n.len()].eq_ignore_ascii_case(n))
}

/// Drop `<...>` tag sequences, keeping everything else.
fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for c in s.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

/// Plain-text part of the alternative: the explicit alternate body, or the
/// HTML body with tags stripped (the `<body>` element alone when present).
fn alt_message(cfg: &Config, msg: &Message) -> String {
    if !msg.alt_body.is_empty() {
        return if cfg.wordwrap {
            word_wrap(&msg.alt_body, 76, &cfg.newline)
        } else {
            msg.alt_body.clone()
        };
    }

    let mut body = msg.body.as_str();
    if let Some(open) = find_ci(body, "<body") {
        if let Some(gt) = body[open..].find('>') {
            let start = open + gt + 1;
            if let Some(close) = find_ci(&body[start..], "</body>") {
                body = &body[start..start + close];
            }
        }
    }
    let body = strip_tags(body);
    let mut collapsed = String::with_capacity(body.len());
    let mut prev_space = false;
    for c in body.trim().chars() {
        if c == ' ' {
            if !prev_space {
                collapsed.push(c);
            }
            prev_space = true;
        } else {
            collapsed.push(c);
            prev_space = false;
        }
    }
    if cfg.wordwrap {
        word_wrap(&collapsed, 76, &cfg.newline)
    } else {
        collapsed
    }
}

fn have_group(msg: &Message, group: MultipartGroup) -> bool {
    msg.attachments.iter().any(|a| a.multipart == group)
}

/// Base64 body split into 76-character chunks, each terminated by `newline`.
fn base64_chunked(content: &[u8], newline: &str) -> String {
    let encoded = BASE64_STANDARD.encode(content);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / 76 * newline.len() + 2);
    let bytes = encoded.as_bytes();
    for chunk in bytes.chunks(76) {
        // Base64 output is always ASCII.
        out.push_str(std::str::from_utf8(chunk).unwrap_or(""));
        out.push_str(newline);
    }
    out
}

/// Append one MIME part per attachment in `group`, then close the boundary
/// if anything was written.
fn append_attachments(body: &mut String, cfg: &Config, msg: &Message, bound: &str, group: MultipartGroup) {
    let nl = &cfg.newline;
    let mut appended = false;
    for att in msg.attachments.iter().filter(|a| a.multipart == group) {
        body.push_str(&format!(
            "--{b}{nl}Content-Type: {t}; name=\"{n}\"{nl}Content-Disposition: {d};{nl}Content-Transfer-Encoding: base64{nl}",
            b = bound,
            t = att.mime_type,
            n = att.name,
            d = att.disposition.as_str(),
        ));
        if let Some(cid) = &att.content_id {
            body.push_str(&format!("Content-ID: <{}>{}", cid, nl));
        }
        body.push_str(nl);
        body.push_str(&base64_chunked(&att.content, nl));
        body.push_str(nl);
        appended = true;
    }
    if appended {
        body.push_str(&format!("--{}--", bound));
    }
}

/// Header block in insertion order, values trimmed, empty values skipped.
/// For [`Protocol::Mail`] the Subject is pulled out for separate delivery and
/// the block loses its trailing terminator.
fn write_headers(cfg: &Config, msg: &Message) -> (String, String) {
    let mut header_str = String::new();
    let mut subject = msg.get_header("Subject").to_string();
    for (name, value) in msg.headers() {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        if cfg.protocol == Protocol::Mail && name == "Subject" {
            subject = value.to_string();
            continue;
        }
        header_str.push_str(name);
        header_str.push_str(": ");
        header_str.push_str(value);
        header_str.push_str(&cfg.newline);
    }
    if cfg.protocol == Protocol::Mail {
        header_str.truncate(header_str.trim_end().len());
    }
    (header_str, subject)
}

/// Render `msg` into its final header block and framed body.
pub fn build_message(cfg: &Config, msg: &Message) -> RenderedMessage {
    let nl = &cfg.newline;
    let (mut header_str, subject) = write_headers(cfg, msg);

    let mut text = msg.body.clone();
    if cfg.wordwrap && cfg.mail_type != MailType::Html {
        text = word_wrap(&text, cfg.wrap_chars, nl);
    }

    let mail = cfg.protocol == Protocol::Mail;
    // For the mail backend the MIME headers join the rtrimmed header block,
    // so they open with a line break of their own.
    let mut hdr = if mail { nl.clone() } else { String::new() };
    let final_body;

    match content_class(cfg, msg) {
        ContentClass::Plain => {
            hdr.push_str(&format!(
                "Content-Type: text/plain; charset={}{}Content-Transfer-Encoding: {}",
                cfg.charset,
                nl,
                cfg.encoding()
            ));
            if mail {
                header_str.push_str(&hdr);
                final_body = text;
            } else {
                final_body = format!("{}{}{}{}", hdr, nl, nl, text);
            }
        }
        ContentClass::Html => {
            let mut body = String::new();
            let mut alt_bound = None;
            if cfg.send_multipart {
                let b = boundary("B_ALT_");
                hdr.push_str(&format!("Content-Type: multipart/alternative; boundary=\"{}\"", b));
                body.push_str(&format!(
                    "{pre}{nl}{nl}--{b}{nl}Content-Type: text/plain; charset={cs}{nl}Content-Transfer-Encoding: {enc}{nl}{nl}{alt}{nl}{nl}--{b}{nl}Content-Type: text/html; charset={cs}{nl}Content-Transfer-Encoding: quoted-printable{nl}{nl}",
                    pre = mime_preamble(nl),
                    b = b,
                    cs = cfg.charset,
                    enc = cfg.encoding(),
                    alt = alt_message(cfg, msg),
                ));
                alt_bound = Some(b);
            } else {
                hdr.push_str(&format!(
                    "Content-Type: text/html; charset={}{}Content-Transfer-Encoding: quoted-printable",
                    cfg.charset, nl
                ));
            }
            body.push_str(&prep_quoted_printable(&text, &cfg.crlf));
            body.push_str(nl);
            body.push_str(nl);
            let mut body = if mail {
                header_str.push_str(&hdr);
                body
            } else {
                format!("{}{}{}{}", hdr, nl, nl, body)
            };
            if let Some(b) = alt_bound {
                body.push_str(&format!("--{}--", b));
            }
            final_body = body;
        }
        ContentClass::PlainAttach => {
            let atc = boundary("B_ATC_");
            hdr.push_str(&format!("Content-Type: multipart/mixed; boundary=\"{}\"", atc));
            if mail {
                header_str.push_str(&hdr);
            }
            let mut body = format!(
                "{pre}{nl}{nl}--{b}{nl}Content-Type: text/plain; charset={cs}{nl}Content-Transfer-Encoding: {enc}{nl}{nl}{text}{nl}{nl}",
                pre = mime_preamble(nl),
                b = atc,
                cs = cfg.charset,
                enc = cfg.encoding(),
                text = text,
            );
            append_attachments(&mut body, cfg, msg, &atc, MultipartGroup::Mixed);
            final_body = if mail { body } else { format!("{}{}{}{}", hdr, nl, nl, body) };
        }
        ContentClass::HtmlAttach => {
            let alt = boundary("B_ALT_");
            let mut body = String::new();
            let mut last = None;
            let mut atc_bound = None;
            let mut rel_bound = None;

            if have_group(msg, MultipartGroup::Mixed) {
                let b = boundary("B_ATC_");
                hdr.push_str(&format!("Content-Type: multipart/mixed; boundary=\"{}\"", b));
                last = Some(b.clone());
                atc_bound = Some(b);
            }
            if have_group(msg, MultipartGroup::Related) {
                let b = boundary("B_REL_");
                let rel_header = format!("Content-Type: multipart/related; boundary=\"{}\"", b);
                match &last {
                    Some(outer) => body.push_str(&format!("--{}{}{}", outer, nl, rel_header)),
                    None => hdr.push_str(&rel_header),
                }
                last = Some(b.clone());
                rel_bound = Some(b);
            }
            if mail {
                header_str.push_str(&hdr);
            }
            // last is always set here since this class implies attachments.
            let last = last.unwrap_or_else(|| boundary("B_ATC_"));

            if !body.is_empty() {
                body.push_str(nl);
                body.push_str(nl);
            }
            body.push_str(&format!(
                "{pre}{nl}{nl}--{last}{nl}Content-Type: multipart/alternative; boundary=\"{alt}\"{nl}{nl}--{alt}{nl}Content-Type: text/plain; charset={cs}{nl}Content-Transfer-Encoding: {enc}{nl}{nl}{altmsg}{nl}{nl}--{alt}{nl}Content-Type: text/html; charset={cs}{nl}Content-Transfer-Encoding: quoted-printable{nl}{nl}{qp}{nl}{nl}--{alt}--{nl}{nl}",
                pre = mime_preamble(nl),
                last = last,
                alt = alt,
                cs = cfg.charset,
                enc = cfg.encoding(),
                altmsg = alt_message(cfg, msg),
                qp = prep_quoted_printable(&text, &cfg.crlf),
            ));
            if let Some(rel) = rel_bound {
                body.push_str(nl);
                body.push_str(nl);
                append_attachments(&mut body, cfg, msg, &rel, MultipartGroup::Related);
            }
            if let Some(atc) = atc_bound {
                body.push_str(nl);
                body.push_str(nl);
                append_attachments(&mut body, cfg, msg, &atc, MultipartGroup::Mixed);
            }
            final_body = if mail { body } else { format!("{}{}{}{}", hdr, nl, nl, body) };
        }
    }

    RenderedMessage { header_str, final_body, subject }
}
