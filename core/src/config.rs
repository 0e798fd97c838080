/*
 * config.rs
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

//! Explicit delivery configuration, validated once at construction.
//! Protocol and crypto mode are enums parsed from their configured names.

use crate::error::MessengerError;

/// Delivery backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Hand the built message to the OS mail facility (collaborator).
    Mail,
    /// Pipe the built message to a local sendmail-like executable.
    Sendmail,
    /// Direct SMTP client over a socket.
    Smtp,
}

impl Protocol {
    /// Backend name as used in configuration and failure reports.
    pub fn name(self) -> &'static str {
        match self {
            Protocol::Mail => "mail",
            Protocol::Sendmail => "sendmail",
            Protocol::Smtp => "smtp",
        }
    }

    pub fn parse(s: &str) -> Result<Self, MessengerError> {
        match s.to_ascii_lowercase().as_str() {
            "mail" => Ok(Protocol::Mail),
            "sendmail" => Ok(Protocol::Sendmail),
            "smtp" => Ok(Protocol::Smtp),
            other => Err(MessengerError::InvalidProtocol(other.to_string())),
        }
    }
}

/// SMTP connection crypto mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpCrypto {
    /// Plain connection.
    None,
    /// Implicit TLS: handshake immediately on connect (SMTPS, usually 465).
    Ssl,
    /// Explicit TLS: plain connect, then STARTTLS upgrade.
    Tls,
}

/// Message format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailType {
    Text,
    Html,
}

/// Charsets (without language suffix) that are sent 7bit.
const BASE_CHARSETS: [&str; 2] = ["US-ASCII", "ISO-2022-"];

/// Delivery preferences. Construct with field syntax over `Config::default()`
/// and call [`Config::validated`] before handing it to a `Messenger`.
#[derive(Debug, Clone)]
pub struct Config {
    pub user_agent: String,
    pub protocol: Protocol,
    /// Path to the sendmail-like executable for [`Protocol::Sendmail`].
    pub mailpath: String,
    /// Default sender, used when no From header is set before send.
    pub from_email: String,
    pub from_name: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_user: String,
    pub smtp_pass: String,
    pub smtp_timeout_secs: u64,
    /// Keep the SMTP connection open across sends (RSET instead of QUIT).
    pub smtp_keepalive: bool,
    pub smtp_crypto: SmtpCrypto,
    pub wordwrap: bool,
    pub wrap_chars: usize,
    pub mail_type: MailType,
    pub charset: String,
    /// Validate addresses in the setters.
    pub validate: bool,
    /// X-Priority, 1 (highest) to 5 (lowest).
    pub priority: u8,
    /// Line terminator for headers and body framing ("\r\n" or "\n").
    pub newline: String,
    /// Line terminator for quoted-printable output ("\r\n" or "\n").
    pub crlf: String,
    /// Request delivery status notification on RCPT TO.
    pub dsn: bool,
    /// Send multipart/alternative for HTML mail.
    pub send_multipart: bool,
    pub bcc_batch_mode: bool,
    pub bcc_batch_size: usize,
    /// Hostname announced in HELO/EHLO; empty falls back to `[127.0.0.1]`.
    pub local_hostname: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_agent: "Lettera".to_string(),
            protocol: Protocol::Mail,
            mailpath: "/usr/sbin/sendmail".to_string(),
            from_email: String::new(),
            from_name: String::new(),
            smtp_host: String::new(),
            smtp_port: 25,
            smtp_user: String::new(),
            smtp_pass: String::new(),
            smtp_timeout_secs: 5,
            smtp_keepalive: false,
            smtp_crypto: SmtpCrypto::None,
            wordwrap: true,
            wrap_chars: 76,
            mail_type: MailType::Text,
            charset: "UTF-8".to_string(),
            validate: true,
            priority: 3,
            newline: "\r\n".to_string(),
            crlf: "\r\n".to_string(),
            dsn: false,
            send_multipart: true,
            bcc_batch_mode: false,
            bcc_batch_size: 200,
            local_hostname: String::new(),
        }
    }
}

impl Config {
    /// Normalize and range-check the configuration. Charset is uppercased,
    /// priority clamped to 1..=5, line terminators restricted to CRLF or LF.
    pub fn validated(mut self) -> Self {
        self.charset = self.charset.to_uppercase();
        if self.charset.is_empty() {
            self.charset = "UTF-8".to_string();
        }
        self.priority = self.priority.clamp(1, 5);
        if self.newline != "\r\n" && self.newline != "\n" {
            self.newline = "\r\n".to_string();
        }
        if self.crlf != "\r\n" && self.crlf != "\n" {
            self.crlf = "\r\n".to_string();
        }
        if self.wrap_chars == 0 {
            self.wrap_chars = 76;
        }
        self
    }

    /// True when SMTP credentials are configured.
    pub fn smtp_auth(&self) -> bool {
        !self.smtp_user.is_empty() || !self.smtp_pass.is_empty()
    }

    /// Transfer encoding for the configured charset: 7bit for US-ASCII and
    /// the ISO-2022 family, 8bit otherwise.
    pub fn encoding(&self) -> &'static str {
        for base in BASE_CHARSETS {
            if self.charset.starts_with(base) {
                return "7bit";
            }
        }
        "8bit"
    }

    /// X-Priority header value.
    pub fn priority_label(&self) -> &'static str {
        match self.priority {
            1 => "1 (Highest)",
            2 => "2 (High)",
            4 => "4 (Low)",
            5 => "5 (Lowest)",
            _ => "3 (Normal)",
        }
    }

    /// HELO/EHLO hostname: the configured name, else the loopback literal.
    /// Legal forms are a fully qualified domain name or a bracketed IP
    /// literal (RFC 5321 2.3.5).
    pub fn hostname(&self) -> String {
        if self.local_hostname.is_empty() {
            "[127.0.0.1]".to_string()
        } else {
            self.local_hostname.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = Config::default();
        assert!(cfg.wordwrap);
        assert_eq!(cfg.wrap_chars, 76);
        assert_eq!(cfg.mail_type, MailType::Text);
        assert_eq!(cfg.charset, "UTF-8");
        assert_eq!(cfg.protocol, Protocol::Mail);
        assert!(!cfg.smtp_auth());
    }

    #[test]
    fn validated_normalizes() {
        let cfg = Config {
            charset: "utf-8".to_string(),
            priority: 9,
            newline: "\r".to_string(),
            ..Config::default()
        }
        .validated();
        assert_eq!(cfg.charset, "UTF-8");
        assert_eq!(cfg.priority, 5);
        assert_eq!(cfg.newline, "\r\n");
    }

    #[test]
    fn protocol_parse() {
        assert_eq!(Protocol::parse("smtp").unwrap(), Protocol::Smtp);
        assert_eq!(Protocol::parse("Mail").unwrap(), Protocol::Mail);
        assert!(matches!(
            Protocol::parse("mind-reader"),
            Err(MessengerError::InvalidProtocol(p)) if p == "mind-reader"
        ));
    }

    #[test]
    fn encoding_follows_charset() {
        let mut cfg = Config::default();
        assert_eq!(cfg.encoding(), "8bit");
        cfg.charset = "US-ASCII".to_string();
        assert_eq!(cfg.encoding(), "7bit");
        cfg.charset = "ISO-2022-JP".to_string();
        assert_eq!(cfg.encoding(), "7bit");
    }

    #[test]
    fn hostname_fallback() {
        let mut cfg = Config::default();
        assert_eq!(cfg.hostname(), "[127.0.0.1]");
        cfg.local_hostname = "mail.example.com".to_string();
        assert_eq!(cfg.hostname(), "mail.example.com");
    }
}
