/*
 * smtp.rs
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

//! SMTP client session (RFC 5321): greeting, HELO/EHLO, optional STARTTLS
//! upgrade, AUTH LOGIN, and the MAIL/RCPT/DATA transaction. Every exchange
//! is recorded in a transcript for the debug report.

use std::time::Duration;

use base64::prelude::{Engine, BASE64_STANDARD};
use log::{debug, error};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::{Config, SmtpCrypto};
use crate::error::MessengerError;
use crate::net::{self, PlainStream, TlsStream};

/// A complete server reply: status code plus the full (possibly multi-line)
/// text as received.
#[derive(Debug, Clone)]
pub struct SmtpReply {
    pub code: u16,
    pub text: String,
}

impl SmtpReply {
    fn parse(text: String) -> Self {
        let code = text
            .get(..3)
            .and_then(|d| d.parse().ok())
            .unwrap_or(0);
        Self { code, text }
    }
}

/// One protocol command with its expected success code.
#[derive(Debug, Clone, Copy)]
enum Command<'a> {
    Hello { hostname: &'a str, extended: bool },
    StartTls,
    From(&'a str),
    To { addr: &'a str, dsn: bool },
    Data,
    Reset,
    Quit,
}

impl<'a> Command<'a> {
    fn line(&self) -> String {
        match self {
            Command::Hello { hostname, extended: true } => format!("EHLO {}", hostname),
            Command::Hello { hostname, extended: false } => format!("HELO {}", hostname),
            Command::StartTls => "STARTTLS".to_string(),
            Command::From(addr) => format!("MAIL FROM:<{}>", addr),
            Command::To { addr, dsn: true } => format!(
                "RCPT TO:<{}> NOTIFY=SUCCESS,DELAY,FAILURE ORCPT=rfc822;{}",
                addr, addr
            ),
            Command::To { addr, dsn: false } => format!("RCPT TO:<{}>", addr),
            Command::Data => "DATA".to_string(),
            Command::Reset => "RSET".to_string(),
            Command::Quit => "QUIT".to_string(),
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            Command::Hello { .. } => "hello",
            Command::StartTls => "starttls",
            Command::From(_) => "from",
            Command::To { .. } => "to",
            Command::Data => "data",
            Command::Reset => "reset",
            Command::Quit => "quit",
        }
    }

    fn expect(&self) -> u16 {
        match self {
            Command::Hello { .. } => 250,
            Command::StartTls => 220,
            Command::From(_) => 250,
            Command::To { .. } => 250,
            Command::Data => 354,
            Command::Reset => 250,
            Command::Quit => 221,
        }
    }
}

enum StreamKind {
    Plain(PlainStream),
    Tls(TlsStream),
    Closed,
}

/// An open SMTP session. Dropping it closes the socket without QUIT; the
/// owner is expected to end the session explicitly.
pub struct SmtpConnection {
    stream: StreamKind,
    timeout: Duration,
    newline: String,
    authenticated: bool,
    /// Command/reply log, drained into the caller's debug report.
    pub transcript: Vec<String>,
}

impl SmtpConnection {
    /// Connect and negotiate up to the authenticated-ready state: greeting,
    /// hello, and for [`SmtpCrypto::Tls`] the STARTTLS upgrade followed by a
    /// second hello on the secured stream.
    pub async fn open(cfg: &Config) -> Result<Self, MessengerError> {
        if cfg.smtp_host.is_empty() {
            return Err(MessengerError::NoHostname);
        }
        let timeout = Duration::from_secs(cfg.smtp_timeout_secs);
        let stream = match cfg.smtp_crypto {
            SmtpCrypto::Ssl => StreamKind::Tls(
                net::connect_implicit_tls(&cfg.smtp_host, cfg.smtp_port, timeout)
                    .await
                    .map_err(|e| MessengerError::ConnectFailure(e.to_string()))?,
            ),
            _ => StreamKind::Plain(
                net::connect_plain(&cfg.smtp_host, cfg.smtp_port, timeout)
                    .await
                    .map_err(|e| MessengerError::ConnectFailure(e.to_string()))?,
            ),
        };
        let mut conn = Self {
            stream,
            timeout,
            newline: cfg.newline.clone(),
            authenticated: false,
            transcript: Vec::new(),
        };

        let greeting = conn.read_reply().await?;
        conn.transcript.push(greeting.text.trim_end().to_string());

        if cfg.smtp_crypto == SmtpCrypto::Tls {
            conn.hello(cfg).await?;
            conn.command(Command::StartTls).await?;
            let plain = match std::mem::replace(&mut conn.stream, StreamKind::Closed) {
                StreamKind::Plain(s) => s,
                _ => {
                    return Err(MessengerError::TlsUpgradeFailure(
                        "stream already secured".to_string(),
                    ))
                }
            };
            let tls = plain
                .upgrade_to_tls(&cfg.smtp_host, timeout)
                .await
                .map_err(|e| MessengerError::TlsUpgradeFailure(e.to_string()))?;
            conn.stream = StreamKind::Tls(tls);
            // The session restarts after the handshake.
            conn.hello(cfg).await?;
        } else {
            conn.hello(cfg).await?;
        }
        Ok(conn)
    }

    /// EHLO when authentication or 8bit content needs extensions, HELO
    /// otherwise.
    async fn hello(&mut self, cfg: &Config) -> Result<(), MessengerError> {
        let hostname = cfg.hostname();
        let extended = cfg.smtp_auth() || cfg.encoding() == "8bit";
        self.command(Command::Hello { hostname: &hostname, extended }).await?;
        Ok(())
    }

    /// AUTH LOGIN with the configured credentials. A 503 reply means the
    /// session is already authenticated and is not an error. No-op when no
    /// credentials are configured or this session already authenticated.
    pub async fn authenticate(&mut self, cfg: &Config) -> Result<(), MessengerError> {
        if self.authenticated || !cfg.smtp_auth() {
            return Ok(());
        }
        if cfg.smtp_user.is_empty() && cfg.smtp_pass.is_empty() {
            return Err(MessengerError::NoSmtpAuth);
        }

        self.send_line("AUTH LOGIN").await?;
        let reply = self.read_reply().await?;
        self.transcript.push(format!("auth: {}", reply.text.trim_end()));
        if reply.code == 503 {
            self.authenticated = true;
            return Ok(());
        }
        if reply.code != 334 {
            error!("AUTH LOGIN rejected: {}", reply.text.trim_end());
            return Err(MessengerError::AuthLoginRejected(reply.text));
        }

        self.send_line(&BASE64_STANDARD.encode(&cfg.smtp_user)).await?;
        let reply = self.read_reply().await?;
        self.transcript.push(format!("auth user: {}", reply.text.trim_end()));
        if reply.code != 334 {
            error!("SMTP username rejected: {}", reply.text.trim_end());
            return Err(MessengerError::AuthUsernameRejected(reply.text));
        }

        self.send_line(&BASE64_STANDARD.encode(&cfg.smtp_pass)).await?;
        let reply = self.read_reply().await?;
        self.transcript.push(format!("auth pass: {}", reply.text.trim_end()));
        if reply.code != 235 {
            error!("SMTP password rejected: {}", reply.text.trim_end());
            return Err(MessengerError::AuthPasswordRejected(reply.text));
        }
        self.authenticated = true;
        Ok(())
    }

    /// Run the envelope and payload sequence: MAIL FROM, one RCPT TO per
    /// recipient, DATA, the dot-stuffed payload, and the end-of-data marker.
    /// Any rejected command aborts the rest of the sequence.
    pub async fn deliver(
        &mut self,
        cfg: &Config,
        from: &str,
        recipients: &[String],
        payload: &str,
    ) -> Result<(), MessengerError> {
        self.command(Command::From(from)).await?;
        for addr in recipients {
            self.command(Command::To { addr: addr.as_str(), dsn: cfg.dsn }).await?;
        }
        self.command(Command::Data).await?;

        self.send_line(&dot_stuff(payload)).await?;
        self.send_line(".").await?;
        let reply = self.read_reply().await?;
        self.transcript.push(reply.text.trim_end().to_string());
        if reply.code != 250 {
            error!("SMTP data rejected: {}", reply.text.trim_end());
            return Err(MessengerError::SmtpRejected(reply.text));
        }
        Ok(())
    }

    /// RSET, keeping the session open for the next transaction.
    pub async fn reset(&mut self) -> Result<(), MessengerError> {
        self.command(Command::Reset).await?;
        Ok(())
    }

    /// QUIT and close the socket.
    pub async fn quit(&mut self) -> Result<(), MessengerError> {
        self.command(Command::Quit).await?;
        Ok(())
    }

    async fn command(&mut self, cmd: Command<'_>) -> Result<SmtpReply, MessengerError> {
        self.send_line(&cmd.line()).await?;
        let reply = self.read_reply().await?;
        self.transcript.push(format!("{}: {}", cmd.verb(), reply.text.trim_end()));
        if reply.code != cmd.expect() {
            error!("SMTP {} failed: {}", cmd.verb(), reply.text.trim_end());
            return Err(MessengerError::SmtpRejected(reply.text));
        }
        if matches!(cmd, Command::Quit) {
            self.stream = StreamKind::Closed;
        }
        Ok(reply)
    }

    /// Write `line` plus the configured terminator, bounded by the timeout.
    async fn send_line(&mut self, line: &str) -> Result<(), MessengerError> {
        debug!("> {}", line);
        let mut buf = Vec::with_capacity(line.len() + self.newline.len());
        buf.extend_from_slice(line.as_bytes());
        buf.extend_from_slice(self.newline.as_bytes());
        let timeout = self.timeout;
        match &mut self.stream {
            StreamKind::Plain(s) => write_all_timeout(s, &buf, timeout).await,
            StreamKind::Tls(s) => write_all_timeout(s, &buf, timeout).await,
            StreamKind::Closed => Err(MessengerError::DataWriteFailure(
                "connection closed".to_string(),
            )),
        }
    }

    /// Accumulate reply lines until one carries a space after the status
    /// code (a dash there marks a continuation line).
    async fn read_reply(&mut self) -> Result<SmtpReply, MessengerError> {
        let mut text = String::new();
        loop {
            let line = self.read_line().await?;
            if line.is_empty() {
                // EOF mid-reply.
                break;
            }
            text.push_str(&line);
            let bytes = line.as_bytes();
            if bytes.len() < 4 || bytes[3] == b' ' {
                break;
            }
        }
        debug!("< {}", text.trim_end());
        Ok(SmtpReply::parse(text))
    }

    async fn read_line(&mut self) -> Result<String, MessengerError> {
        let timeout = self.timeout;
        let read = async {
            let mut line = Vec::with_capacity(128);
            let mut byte = [0u8; 1];
            loop {
                let n = match &mut self.stream {
                    StreamKind::Plain(s) => s.read(&mut byte).await,
                    StreamKind::Tls(s) => s.read(&mut byte).await,
                    StreamKind::Closed => {
                        return Err(MessengerError::DataWriteFailure(
                            "connection closed".to_string(),
                        ))
                    }
                }
                .map_err(|e| MessengerError::SmtpRejected(format!("read failed: {}", e)))?;
                if n == 0 {
                    break;
                }
                line.push(byte[0]);
                if byte[0] == b'\n' || line.len() >= 512 {
                    break;
                }
            }
            Ok(String::from_utf8_lossy(&line).into_owned())
        };
        tokio::time::timeout(timeout, read)
            .await
            .map_err(|_| MessengerError::SmtpRejected("no reply before timeout".to_string()))?
    }
}

async fn write_all_timeout<S: AsyncWrite + Unpin>(
    stream: &mut S,
    buf: &[u8],
    timeout: Duration,
) -> Result<(), MessengerError> {
    let write = async {
        stream.write_all(buf).await?;
        stream.flush().await
    };
    match tokio::time::timeout(timeout, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(MessengerError::DataWriteFailure(e.to_string())),
        Err(_) => Err(MessengerError::DataWriteTimeout),
    }
}

/// Double any dot that starts a line so the payload cannot terminate the
/// DATA phase early (RFC 5321 4.5.2).
pub fn dot_stuff(body: &str) -> String {
    let mut out = String::with_capacity(body.len() + 8);
    let mut at_line_start = true;
    for c in body.chars() {
        if at_line_start && c == '.' {
            out.push('.');
        }
        out.push(c);
        at_line_start = c == '\n';
    }
    out
}
