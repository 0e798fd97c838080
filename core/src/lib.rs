/*
 * lib.rs
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

//! Lettera core: compose an email message (headers, body, alternate body,
//! attachments) into an RFC 2045/2046 MIME byte stream and deliver it over
//! one of several transports, the main one being a direct SMTP client
//! (STARTTLS, AUTH LOGIN, MAIL/RCPT/DATA with dot stuffing, batched BCC).

pub mod config;
pub mod error;
pub mod message;
pub mod mime;
pub mod net;
pub mod render;
pub mod smtp;
pub mod transport;

pub use config::{Config, MailType, Protocol, SmtpCrypto};
pub use error::MessengerError;
pub use message::{Attachment, Disposition, Message, MultipartGroup};
pub use render::RenderedMessage;
pub use transport::{Messenger, SendmailPipe, SystemMail};
