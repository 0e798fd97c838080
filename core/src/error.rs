/*
 * error.rs
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

//! Typed failures reported by validation, rendering, and the transports.
//! Every variant carries enough context (reply text, file path, protocol
//! name) for the caller to render a diagnostic.

use std::fmt;

/// Errors from message validation and the delivery backends.
#[derive(Debug)]
pub enum MessengerError {
    /// No From header and no default sender configured.
    NoFrom,
    /// None of To, Cc, Bcc is set.
    NoRecipients,
    /// Address failed validation.
    InvalidAddress(String),
    /// Unknown protocol name given to the configuration.
    InvalidProtocol(String),
    /// Attachment path does not exist.
    AttachmentMissing(String),
    /// Attachment path exists but could not be read.
    AttachmentUnreadable(String),
    /// SMTP transport selected but no hostname configured.
    NoHostname,
    /// Socket connect to the SMTP server failed.
    ConnectFailure(String),
    /// In-place TLS handshake after STARTTLS did not succeed.
    TlsUpgradeFailure(String),
    /// The server answered a command with an unexpected reply.
    SmtpRejected(String),
    /// Authentication requested but no username/password configured.
    NoSmtpAuth,
    /// AUTH LOGIN was not accepted.
    AuthLoginRejected(String),
    /// The server rejected the base64 username.
    AuthUsernameRejected(String),
    /// The server rejected the base64 password.
    AuthPasswordRejected(String),
    /// A mid-write socket error during the command sequence.
    DataWriteFailure(String),
    /// No write progress before the configured timeout elapsed.
    DataWriteTimeout,
    /// The sendmail pipe exited with a nonzero status.
    LocalMailerPipeFailure(i32),
    /// A backend reported failure without a more specific cause.
    SendFailure(&'static str),
}

impl fmt::Display for MessengerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessengerError::NoFrom => {
                write!(f, "no From address set and no default sender configured")
            }
            MessengerError::NoRecipients => {
                write!(f, "no recipients set: at least one of To, Cc, Bcc is required")
            }
            MessengerError::InvalidAddress(a) => write!(f, "invalid email address: {}", a),
            MessengerError::InvalidProtocol(p) => write!(f, "invalid mail protocol: {}", p),
            MessengerError::AttachmentMissing(p) => write!(f, "attachment not found: {}", p),
            MessengerError::AttachmentUnreadable(p) => {
                write!(f, "attachment could not be read: {}", p)
            }
            MessengerError::NoHostname => write!(f, "no SMTP hostname configured"),
            MessengerError::ConnectFailure(e) => write!(f, "SMTP connect failed: {}", e),
            MessengerError::TlsUpgradeFailure(e) => write!(f, "STARTTLS handshake failed: {}", e),
            MessengerError::SmtpRejected(r) => write!(f, "SMTP error: {}", r.trim_end()),
            MessengerError::NoSmtpAuth => {
                write!(f, "SMTP authentication requested but no credentials configured")
            }
            MessengerError::AuthLoginRejected(r) => {
                write!(f, "AUTH LOGIN rejected: {}", r.trim_end())
            }
            MessengerError::AuthUsernameRejected(r) => {
                write!(f, "SMTP username rejected: {}", r.trim_end())
            }
            MessengerError::AuthPasswordRejected(r) => {
                write!(f, "SMTP password rejected: {}", r.trim_end())
            }
            MessengerError::DataWriteFailure(e) => write!(f, "SMTP data write failed: {}", e),
            MessengerError::DataWriteTimeout => {
                write!(f, "SMTP data write made no progress before timeout")
            }
            MessengerError::LocalMailerPipeFailure(status) => {
                write!(f, "sendmail pipe exited with status {}", status)
            }
            MessengerError::SendFailure(backend) => {
                write!(f, "unable to send using the {} backend", backend)
            }
        }
    }
}

impl std::error::Error for MessengerError {}
