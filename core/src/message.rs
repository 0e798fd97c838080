/*
 * message.rs
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

//! Outgoing message model: ordered headers, recipient lists, subject, body,
//! alternate body, attachments, plus address parsing and validation.

use std::path::Path;

use crate::error::MessengerError;
use crate::mime::mime_from_extension;

/// Content-Disposition of an attachment part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Attachment,
    Inline,
}

impl Disposition {
    pub fn as_str(self) -> &'static str {
        match self {
            Disposition::Attachment => "attachment",
            Disposition::Inline => "inline",
        }
    }
}

/// Which multipart container an attachment belongs to. Parts referenced from
/// the HTML body by Content-ID go under multipart/related, the rest under
/// multipart/mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultipartGroup {
    Mixed,
    Related,
}

/// One attachment: either read from a path or supplied as bytes.
#[derive(Debug, Clone)]
pub struct Attachment {
    /// Display name, defaults to the basename of the source path.
    pub name: String,
    pub source_path: Option<String>,
    pub content: Vec<u8>,
    pub mime_type: String,
    pub disposition: Disposition,
    pub content_id: Option<String>,
    pub multipart: MultipartGroup,
}

impl Attachment {
    /// Read an attachment from the filesystem, guessing the MIME type from
    /// the extension. `new_name` overrides the display name.
    pub fn from_path(
        path: &str,
        disposition: Disposition,
        new_name: Option<&str>,
    ) -> Result<Self, MessengerError> {
        let p = Path::new(path);
        if !p.exists() {
            return Err(MessengerError::AttachmentMissing(path.to_string()));
        }
        let content = std::fs::read(p)
            .map_err(|_| MessengerError::AttachmentUnreadable(path.to_string()))?;
        let ext = p.extension().and_then(|e| e.to_str()).unwrap_or("");
        let name = new_name
            .map(|n| n.to_string())
            .unwrap_or_else(|| {
                p.file_name().and_then(|n| n.to_str()).unwrap_or(path).to_string()
            });
        Ok(Self {
            name,
            source_path: Some(path.to_string()),
            content,
            mime_type: mime_from_extension(ext),
            disposition,
            content_id: None,
            multipart: MultipartGroup::Mixed,
        })
    }

    /// Attach in-memory content with an explicit name and MIME type.
    pub fn from_content(
        content: impl Into<Vec<u8>>,
        name: &str,
        mime_type: &str,
        disposition: Disposition,
    ) -> Self {
        Self {
            name: name.to_string(),
            source_path: None,
            content: content.into(),
            mime_type: mime_type.to_string(),
            disposition,
            content_id: None,
            multipart: MultipartGroup::Mixed,
        }
    }
}

/// Message state populated by the `Messenger` setters and consumed by the
/// renderer. Headers keep insertion order; setting an existing name replaces
/// its value in place (last write wins).
#[derive(Debug, Default, Clone)]
pub struct Message {
    headers: Vec<(String, String)>,
    pub subject: String,
    pub body: String,
    pub alt_body: String,
    pub recipients: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub attachments: Vec<Attachment>,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header, replacing any existing value without reordering.
    pub fn set_header(&mut self, name: &str, value: &str) {
        for pair in self.headers.iter_mut() {
            if pair.0 == name {
                pair.1 = value.to_string();
                return;
            }
        }
        self.headers.push((name.to_string(), value.to_string()));
    }

    /// Header value, or "" when unset.
    pub fn get_header(&self, name: &str) -> &str {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
            .unwrap_or("")
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(n, _)| n == name)
    }

    pub fn unset_header(&mut self, name: &str) {
        self.headers.retain(|(n, _)| n != name);
    }

    /// Headers in insertion order.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Reset subject, bodies, headers and recipients. Attachments survive
    /// unless explicitly cleared.
    pub fn clear(&mut self, clear_attachments: bool) {
        self.headers.clear();
        self.subject.clear();
        self.body.clear();
        self.alt_body.clear();
        self.recipients.clear();
        self.cc.clear();
        self.bcc.clear();
        if clear_attachments {
            self.attachments.clear();
        }
    }
}

/// Strip a display name: "Princess Leia <leia@alderaan.org>" → the address.
pub fn clean_email(addr: &str) -> String {
    match (addr.find('<'), addr.rfind('>')) {
        (Some(open), Some(close)) if open < close => addr[open + 1..close].to_string(),
        _ => addr.trim().to_string(),
    }
}

/// Split a comma-separated address list, cleaning each entry.
pub fn clean_email_list(addrs: &str) -> Vec<String> {
    addrs
        .split(',')
        .map(|a| clean_email(a.trim()))
        .filter(|a| !a.is_empty())
        .collect()
}

fn valid_local_part(local: &str) -> bool {
    !local.is_empty()
        && !local.starts_with('.')
        && !local.ends_with('.')
        && !local.contains("..")
        && local
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"._%+'-".contains(&b))
}

fn valid_domain(domain: &str) -> bool {
    if domain.is_empty() || domain.len() > 253 || !domain.contains('.') {
        return false;
    }
    domain.split('.').all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    })
}

/// Address validity: one local part, one dotted domain. Accepts a bare
/// address or one wrapped in a display-name form.
pub fn is_valid_email(addr: &str) -> bool {
    let addr = clean_email(addr);
    match addr.split_once('@') {
        Some((local, domain)) => valid_local_part(local) && valid_domain(domain),
        None => false,
    }
}

/// Validate a batch of cleaned addresses, failing on the first bad one.
pub fn validate_emails(addrs: &[String]) -> Result<(), MessengerError> {
    for a in addrs {
        if !is_valid_email(a) {
            return Err(MessengerError::InvalidAddress(a.clone()));
        }
    }
    Ok(())
}
