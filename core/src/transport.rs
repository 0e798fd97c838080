/*
 * transport.rs
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

//! The `Messenger` facade: address and content setters, standard header
//! assembly, batched Bcc delivery, and dispatch to one of three backends
//! (system mail collaborator, sendmail pipe, direct SMTP).

use std::io::Write as _;
use std::process::{Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{error, info};

use crate::config::{Config, Protocol};
use crate::error::MessengerError;
use crate::message::{
    clean_email, clean_email_list, validate_emails, Attachment, Disposition, Message,
    MultipartGroup,
};
use crate::mime::{prep_q_encoding, unwrap_specials};
use crate::render::{build_message, RenderedMessage};
use crate::smtp::SmtpConnection;

/// OS mail facility collaborator, the delivery seam for [`Protocol::Mail`].
/// `subject` arrives out of band; `headers` is the block without Subject.
pub trait SystemMail: Send {
    fn send(
        &mut self,
        to: &str,
        subject: &str,
        body: &str,
        headers: &str,
    ) -> Result<(), MessengerError>;
}

/// Local mailer pipe, the delivery seam for [`Protocol::Sendmail`].
pub trait SendmailPipe: Send {
    fn deliver(
        &mut self,
        mailpath: &str,
        args: &[String],
        payload: &str,
    ) -> Result<(), MessengerError>;
}

/// Default pipe: spawn the configured executable and write the message to
/// its stdin. A nonzero exit status is a delivery failure.
pub struct CommandPipe;

impl SendmailPipe for CommandPipe {
    fn deliver(
        &mut self,
        mailpath: &str,
        args: &[String],
        payload: &str,
    ) -> Result<(), MessengerError> {
        let mut child = Command::new(mailpath)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|_| MessengerError::SendFailure("sendmail"))?;
        if let Some(stdin) = child.stdin.as_mut() {
            stdin
                .write_all(payload.as_bytes())
                .map_err(|_| MessengerError::SendFailure("sendmail"))?;
        }
        let status = child
            .wait()
            .map_err(|_| MessengerError::SendFailure("sendmail"))?;
        match status.code() {
            Some(0) => Ok(()),
            Some(code) => Err(MessengerError::LocalMailerPipeFailure(code)),
            None => Err(MessengerError::SendFailure("sendmail")),
        }
    }
}

/// Hex token unique enough for Message-IDs and attachment Content-IDs.
fn unique_token() -> String {
    let mut rand = [0u8; 4];
    let _ = getrandom::getrandom(&mut rand);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let tail: String = rand.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{:x}{}", nanos, tail)
}

/// Display-name form for From/Reply-To: quoted when plain ASCII, Q-encoded
/// otherwise. Control characters are dropped, quotes and backslashes escaped.
fn display_name(name: &str, charset: &str, crlf: &str) -> String {
    if name.is_empty() {
        return String::new();
    }
    if name.bytes().any(|b| b >= 0x80) {
        return prep_q_encoding(name, charset, crlf);
    }
    let mut escaped = String::with_capacity(name.len() + 2);
    escaped.push('"');
    for c in name.chars() {
        match c {
            '"' | '\\' => {
                escaped.push('\\');
                escaped.push(c);
            }
            c if (c as u32) < 0x20 || c == '\u{7f}' => {}
            c => escaped.push(c),
        }
    }
    escaped.push('"');
    escaped
}

/// Mail composition and delivery front end.
pub struct Messenger {
    cfg: Config,
    msg: Message,
    reply_to_set: bool,
    smtp: Option<SmtpConnection>,
    system_mailer: Option<Box<dyn SystemMail>>,
    sendmail_pipe: Box<dyn SendmailPipe>,
    debug: Vec<String>,
    archive: Option<RenderedMessage>,
}

impl Messenger {
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg: cfg.validated(),
            msg: Message::new(),
            reply_to_set: false,
            smtp: None,
            system_mailer: None,
            sendmail_pipe: Box::new(CommandPipe),
            debug: Vec::new(),
            archive: None,
        }
    }

    /// Install the OS mail collaborator used by [`Protocol::Mail`].
    pub fn with_system_mailer(mut self, mailer: Box<dyn SystemMail>) -> Self {
        self.system_mailer = Some(mailer);
        self
    }

    /// Replace the sendmail pipe used by [`Protocol::Sendmail`].
    pub fn with_sendmail_pipe(mut self, pipe: Box<dyn SendmailPipe>) -> Self {
        self.sendmail_pipe = pipe;
        self
    }

    pub fn message(&self) -> &Message {
        &self.msg
    }

    /// Sender. `return_path` defaults to the From address.
    pub fn set_from(
        &mut self,
        from: &str,
        name: &str,
        return_path: Option<&str>,
    ) -> Result<(), MessengerError> {
        let clean = clean_email(from);
        if self.cfg.validate {
            validate_emails(std::slice::from_ref(&clean))?;
            if let Some(rp) = return_path {
                validate_emails(&[clean_email(rp)])?;
            }
        }
        let display = display_name(name, &self.cfg.charset, &self.cfg.crlf);
        self.msg.set_header("From", &format!("{} <{}>", display, clean));
        let rp = return_path.map(clean_email).unwrap_or_else(|| clean.clone());
        self.msg.set_header("Return-Path", &format!("<{}>", rp));
        Ok(())
    }

    pub fn set_reply_to(&mut self, replyto: &str, name: &str) -> Result<(), MessengerError> {
        let clean = clean_email(replyto);
        if self.cfg.validate {
            validate_emails(std::slice::from_ref(&clean))?;
        }
        let display = display_name(name, &self.cfg.charset, &self.cfg.crlf);
        self.msg.set_header("Reply-To", &format!("{} <{}>", display, clean));
        self.reply_to_set = true;
        Ok(())
    }

    /// Primary recipients, comma separated; display names are stripped.
    pub fn set_to(&mut self, to: &str) -> Result<(), MessengerError> {
        let list = clean_email_list(to);
        if self.cfg.validate {
            validate_emails(&list)?;
        }
        // The mail collaborator takes the To list out of band.
        if self.cfg.protocol != Protocol::Mail {
            self.msg.set_header("To", &list.join(", "));
        }
        self.msg.recipients = list;
        Ok(())
    }

    pub fn set_cc(&mut self, cc: &str) -> Result<(), MessengerError> {
        let list = clean_email_list(cc);
        if self.cfg.validate {
            validate_emails(&list)?;
        }
        self.msg.set_header("Cc", &list.join(", "));
        self.msg.cc = list;
        Ok(())
    }

    /// Blind recipients. `limit` switches on batch mode with that chunk
    /// size. The Bcc header is only written when the addresses will not be
    /// delivered as SMTP envelope recipients or batched.
    pub fn set_bcc(&mut self, bcc: &str, limit: Option<usize>) -> Result<(), MessengerError> {
        if let Some(limit) = limit {
            self.cfg.bcc_batch_mode = true;
            self.cfg.bcc_batch_size = limit.max(1);
        }
        let list = clean_email_list(bcc);
        if self.cfg.validate {
            validate_emails(&list)?;
        }
        let batched = self.cfg.bcc_batch_mode && list.len() > self.cfg.bcc_batch_size;
        if self.cfg.protocol != Protocol::Smtp && !batched {
            self.msg.set_header("Bcc", &list.join(", "));
        }
        self.msg.bcc = list;
        Ok(())
    }

    /// Subject, always Q-encoded so any charset survives the header.
    pub fn set_subject(&mut self, subject: &str) {
        let encoded = prep_q_encoding(subject, &self.cfg.charset, &self.cfg.crlf);
        self.msg.set_header("Subject", &encoded);
    }

    /// Body text. Line breaks are normalized to LF; rendering restores the
    /// configured terminator.
    pub fn set_message(&mut self, body: &str) {
        let body = body.replace("\r\n", "\n").replace('\r', "\n");
        self.msg.body = body.trim_end().to_string();
    }

    /// Explicit plain-text alternative for HTML mail.
    pub fn set_alt_message(&mut self, body: &str) {
        self.msg.alt_body = body.to_string();
    }

    /// Arbitrary header. CR and LF are stripped from the value so header
    /// injection through user input is not possible.
    pub fn set_header(&mut self, name: &str, value: &str) {
        let value: String = value.chars().filter(|c| *c != '\r' && *c != '\n').collect();
        self.msg.set_header(name, &value);
    }

    pub fn attach(
        &mut self,
        path: &str,
        disposition: Disposition,
        new_name: Option<&str>,
    ) -> Result<(), MessengerError> {
        let att = Attachment::from_path(path, disposition, new_name)?;
        self.msg.attachments.push(att);
        Ok(())
    }

    pub fn attach_content(
        &mut self,
        content: impl Into<Vec<u8>>,
        name: &str,
        mime_type: &str,
        disposition: Disposition,
    ) {
        self.msg
            .attachments
            .push(Attachment::from_content(content, name, mime_type, disposition));
    }

    /// Assign a Content-ID to the named attachment and move it into the
    /// related group so HTML can reference it as `cid:`. Returns the ID, or
    /// None when no attachment matches.
    pub fn set_attachment_cid(&mut self, filename: &str) -> Option<String> {
        let basename = filename.rsplit('/').next().unwrap_or(filename);
        for att in self.msg.attachments.iter_mut() {
            if att.source_path.as_deref() == Some(filename) || att.name == filename {
                let cid = format!("{}@{}", basename, unique_token());
                att.multipart = MultipartGroup::Related;
                att.content_id = Some(cid.clone());
                return Some(cid);
            }
        }
        None
    }

    /// Reset message state between sends. An open keepalive SMTP session is
    /// left in place.
    pub fn clear(&mut self, clear_attachments: bool) {
        self.msg.clear(clear_attachments);
        self.reply_to_set = false;
    }

    /// Build and deliver the message. On success with `auto_clear` the
    /// message state is reset for the next send.
    pub async fn send(&mut self, auto_clear: bool) -> Result<(), MessengerError> {
        if self.msg.get_header("From").is_empty() {
            if self.cfg.from_email.is_empty() {
                return Err(MessengerError::NoFrom);
            }
            let (email, name) = (self.cfg.from_email.clone(), self.cfg.from_name.clone());
            self.set_from(&email, &name, None)?;
        }
        if !self.reply_to_set {
            let from = self.msg.get_header("From").to_string();
            self.set_reply_to(&from, "")?;
        }

        if self.msg.recipients.is_empty()
            && self.msg.cc.is_empty()
            && self.msg.bcc.is_empty()
            && self.msg.get_header("To").is_empty()
            && self.msg.get_header("Cc").is_empty()
            && self.msg.get_header("Bcc").is_empty()
        {
            return Err(MessengerError::NoRecipients);
        }

        self.build_headers();

        let result = if self.cfg.bcc_batch_mode && self.msg.bcc.len() > self.cfg.bcc_batch_size {
            self.batch_bcc_send().await
        } else {
            let rendered = build_message(&self.cfg, &self.msg);
            self.spool(rendered).await
        };

        if result.is_ok() && auto_clear {
            self.clear(true);
        }
        result
    }

    /// Standard headers appended before rendering.
    fn build_headers(&mut self) {
        let user_agent = self.cfg.user_agent.clone();
        let sender = clean_email(self.msg.get_header("From"));
        self.msg.set_header("User-Agent", &user_agent);
        self.msg.set_header("X-Sender", &sender);
        self.msg.set_header("X-Mailer", &user_agent);
        self.msg.set_header("X-Priority", self.cfg.priority_label());
        let message_id = self.message_id();
        self.msg.set_header("Message-ID", &message_id);
        self.msg.set_header("Mime-Version", "1.0");
        self.msg.set_header("Date", &chrono::Local::now().to_rfc2822());
    }

    /// `<token@domain>`, domain taken from the Return-Path.
    fn message_id(&self) -> String {
        let rp = self.msg.get_header("Return-Path").replace(['<', '>'], "");
        let domain = rp.find('@').map(|i| rp[i..].to_string()).unwrap_or_default();
        format!("<{}{}>", unique_token(), domain)
    }

    /// Deliver the Bcc list in chunks, re-rendering the message for each
    /// chunk. The first failed chunk aborts the rest.
    async fn batch_bcc_send(&mut self) -> Result<(), MessengerError> {
        let all = std::mem::take(&mut self.msg.bcc);
        let chunk_size = self.cfg.bcc_batch_size.max(1);
        let mut result = Ok(());
        for chunk in all.chunks(chunk_size) {
            if self.cfg.protocol != Protocol::Smtp {
                self.msg.set_header("Bcc", &chunk.join(", "));
            }
            self.msg.bcc = chunk.to_vec();
            let rendered = build_message(&self.cfg, &self.msg);
            if let Err(e) = self.spool(rendered).await {
                result = Err(e);
                break;
            }
        }
        // Batched sends never carry a full-list Bcc header, so the last
        // chunk's value must not outlive the loop.
        if self.cfg.protocol != Protocol::Smtp {
            self.msg.unset_header("Bcc");
        }
        self.msg.bcc = all;
        result
    }

    /// Hand a rendered message to the configured backend.
    async fn spool(&mut self, mut rendered: RenderedMessage) -> Result<(), MessengerError> {
        rendered.final_body = unwrap_specials(&rendered.final_body);
        let result = match self.cfg.protocol {
            Protocol::Mail => self.send_with_mail(&rendered),
            Protocol::Sendmail => self.send_with_sendmail(&rendered),
            Protocol::Smtp => self.send_with_smtp(&rendered).await,
        };
        match &result {
            Ok(()) => {
                info!("message sent via {}", self.cfg.protocol.name());
                self.debug.push(format!("message sent via {}", self.cfg.protocol.name()));
            }
            Err(e) => {
                error!("unable to send via {}: {}", self.cfg.protocol.name(), e);
            }
        }
        self.archive = Some(rendered);
        result
    }

    fn send_with_mail(&mut self, rendered: &RenderedMessage) -> Result<(), MessengerError> {
        let to = self.msg.recipients.join(", ");
        match &mut self.system_mailer {
            Some(mailer) => mailer.send(
                &to,
                &rendered.subject,
                &rendered.final_body,
                &rendered.header_str,
            ),
            None => Err(MessengerError::SendFailure("mail")),
        }
    }

    fn send_with_sendmail(&mut self, rendered: &RenderedMessage) -> Result<(), MessengerError> {
        let from = clean_email(self.msg.get_header("From"));
        let mut args: Vec<String> = Vec::new();
        if !from.is_empty() {
            args.push("-oi".to_string());
            args.push("-f".to_string());
            args.push(from);
        }
        args.push("-t".to_string());
        let payload = format!("{}{}", rendered.header_str, rendered.final_body);
        self.sendmail_pipe.deliver(&self.cfg.mailpath, &args, &payload)
    }

    async fn send_with_smtp(&mut self, rendered: &RenderedMessage) -> Result<(), MessengerError> {
        let mut conn = match self.smtp.take() {
            Some(conn) => conn,
            None => SmtpConnection::open(&self.cfg).await?,
        };

        let from = clean_email(self.msg.get_header("From"));
        let mut rcpt: Vec<String> = self.msg.recipients.clone();
        rcpt.extend(self.msg.cc.iter().cloned());
        rcpt.extend(self.msg.bcc.iter().cloned());
        let payload = format!("{}{}", rendered.header_str, rendered.final_body);

        let result = async {
            conn.authenticate(&self.cfg).await?;
            conn.deliver(&self.cfg, &from, &rcpt, &payload).await
        }
        .await;

        // Clean teardown: RSET keeps a healthy keepalive session, anything
        // else ends with QUIT.
        match result {
            Ok(()) => {
                if self.cfg.smtp_keepalive {
                    let end = conn.reset().await;
                    self.debug.append(&mut conn.transcript);
                    self.smtp = Some(conn);
                    end
                } else {
                    let end = conn.quit().await;
                    self.debug.append(&mut conn.transcript);
                    end
                }
            }
            Err(e) => {
                let _ = conn.quit().await;
                self.debug.append(&mut conn.transcript);
                Err(e)
            }
        }
    }

    /// Human-readable report: the session log plus any of "headers",
    /// "subject", "body" from the last rendered message.
    pub fn print_debugger(&self, include: &[&str]) -> String {
        let mut out = self.debug.join("\n");
        if let Some(rendered) = &self.archive {
            if include.contains(&"headers") {
                out.push_str("\n\n");
                out.push_str(&rendered.header_str);
            }
            if include.contains(&"subject") {
                out.push_str("\n\n");
                out.push_str(&rendered.subject);
            }
            if include.contains(&"body") {
                out.push_str("\n\n");
                out.push_str(&rendered.final_body);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SmtpCrypto;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    fn smtp_config(port: u16) -> Config {
        Config {
            protocol: Protocol::Smtp,
            smtp_host: "127.0.0.1".to_string(),
            smtp_port: port,
            smtp_crypto: SmtpCrypto::None,
            smtp_timeout_secs: 5,
            ..Config::default()
        }
    }

    /// One scripted SMTP session: returns the command lines received and the
    /// DATA payload. `rcpt_reply` lets a test reject recipients.
    async fn serve_session(
        listener: &TcpListener,
        rcpt_reply: &str,
    ) -> (Vec<String>, String) {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        write_half.write_all(b"220 mock ESMTP\r\n").await.unwrap();

        let mut commands = Vec::new();
        let mut data = String::new();
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).await.unwrap() == 0 {
                break;
            }
            let cmd = line.trim_end().to_string();
            if cmd.starts_with("EHLO") || cmd.starts_with("HELO") {
                commands.push(cmd);
                write_half.write_all(b"250-mock\r\n250 8BITMIME\r\n").await.unwrap();
            } else if cmd == "AUTH LOGIN" {
                commands.push(cmd);
                write_half.write_all(b"334 VXNlcm5hbWU6\r\n").await.unwrap();
                line.clear();
                reader.read_line(&mut line).await.unwrap();
                commands.push(format!("USER {}", line.trim_end()));
                write_half.write_all(b"334 UGFzc3dvcmQ6\r\n").await.unwrap();
                line.clear();
                reader.read_line(&mut line).await.unwrap();
                commands.push(format!("PASS {}", line.trim_end()));
                write_half.write_all(b"235 ok\r\n").await.unwrap();
            } else if cmd.starts_with("MAIL FROM") {
                commands.push(cmd);
                write_half.write_all(b"250 OK\r\n").await.unwrap();
            } else if cmd.starts_with("RCPT TO") {
                commands.push(cmd);
                write_half.write_all(rcpt_reply.as_bytes()).await.unwrap();
            } else if cmd == "DATA" {
                commands.push(cmd);
                write_half.write_all(b"354 go ahead\r\n").await.unwrap();
                loop {
                    line.clear();
                    if reader.read_line(&mut line).await.unwrap() == 0 {
                        break;
                    }
                    if line.trim_end() == "." {
                        break;
                    }
                    data.push_str(&line);
                }
                write_half.write_all(b"250 queued\r\n").await.unwrap();
            } else if cmd == "RSET" {
                commands.push(cmd);
                write_half.write_all(b"250 flushed\r\n").await.unwrap();
            } else if cmd == "QUIT" {
                commands.push(cmd);
                write_half.write_all(b"221 bye\r\n").await.unwrap();
                break;
            } else {
                write_half.write_all(b"500 what\r\n").await.unwrap();
            }
        }
        (commands, data)
    }

    #[tokio::test]
    async fn smtp_delivery_happy_path() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move { serve_session(&listener, "250 OK\r\n").await });

        let mut messenger = Messenger::new(smtp_config(port));
        messenger.set_from("leia@alderaan.org", "Leia", None).unwrap();
        messenger.set_to("luke@tatooine.org").unwrap();
        messenger.set_subject("Family reunion");
        messenger.set_message("Meet at the homestead.\n.hidden dot line");
        messenger.send(true).await.unwrap();

        let (commands, data) = server.await.unwrap();
        assert!(commands[0].starts_with("EHLO"), "8bit content wants EHLO: {:?}", commands);
        assert!(commands.contains(&"MAIL FROM:<leia@alderaan.org>".to_string()));
        assert!(commands.contains(&"RCPT TO:<luke@tatooine.org>".to_string()));
        assert!(commands.contains(&"DATA".to_string()));
        assert!(commands.contains(&"QUIT".to_string()));
        assert!(data.contains("To: luke@tatooine.org\r\n"));
        assert!(data.contains("Subject: =?UTF-8?Q?"));
        assert!(data.contains("Message-ID: <"));
        assert!(data.contains("Mime-Version: 1.0\r\n"));
        // Leading dots in the body are stuffed on the wire.
        assert!(data.contains("\r\n..hidden dot line"));
    }

    #[tokio::test]
    async fn rcpt_rejection_aborts_before_data() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            serve_session(&listener, "550 no such user\r\n").await
        });

        let mut messenger = Messenger::new(smtp_config(port));
        messenger.set_from("leia@alderaan.org", "", None).unwrap();
        messenger.set_to("nobody@tatooine.org").unwrap();
        messenger.set_subject("hi");
        messenger.set_message("hello");
        let err = messenger.send(true).await.unwrap_err();
        assert!(matches!(err, MessengerError::SmtpRejected(_)));

        let (commands, data) = server.await.unwrap();
        assert!(!commands.contains(&"DATA".to_string()), "{:?}", commands);
        assert!(data.is_empty());
        assert!(commands.contains(&"QUIT".to_string()));
    }

    #[tokio::test]
    async fn auth_login_sends_base64_credentials() {
        use base64::prelude::{Engine, BASE64_STANDARD};
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move { serve_session(&listener, "250 OK\r\n").await });

        let mut cfg = smtp_config(port);
        cfg.smtp_user = "rebel".to_string();
        cfg.smtp_pass = "alliance".to_string();
        let mut messenger = Messenger::new(cfg);
        messenger.set_from("leia@alderaan.org", "", None).unwrap();
        messenger.set_to("luke@tatooine.org").unwrap();
        messenger.set_subject("auth");
        messenger.set_message("body");
        messenger.send(true).await.unwrap();

        let (commands, _) = server.await.unwrap();
        assert!(commands.contains(&"AUTH LOGIN".to_string()));
        assert!(commands.contains(&format!("USER {}", BASE64_STANDARD.encode("rebel"))));
        assert!(commands.contains(&format!("PASS {}", BASE64_STANDARD.encode("alliance"))));
    }

    #[tokio::test]
    async fn batched_bcc_splits_into_chunks() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let mut sessions = Vec::new();
            for _ in 0..3 {
                sessions.push(serve_session(&listener, "250 OK\r\n").await);
            }
            sessions
        });

        let mut cfg = smtp_config(port);
        cfg.bcc_batch_mode = true;
        cfg.bcc_batch_size = 2;
        let mut messenger = Messenger::new(cfg);
        messenger.set_from("leia@alderaan.org", "", None).unwrap();
        messenger
            .set_bcc(
                "a@rebels.org, b@rebels.org, c@rebels.org, d@rebels.org, e@rebels.org",
                None,
            )
            .unwrap();
        messenger.set_subject("briefing");
        messenger.set_message("meet at dawn");
        messenger.send(true).await.unwrap();

        let sessions = server.await.unwrap();
        assert_eq!(sessions.len(), 3);
        let rcpt_total: usize = sessions
            .iter()
            .map(|(cmds, _)| cmds.iter().filter(|c| c.starts_with("RCPT TO")).count())
            .sum();
        assert_eq!(rcpt_total, 5);
        for (cmds, data) in &sessions {
            assert_eq!(cmds.iter().filter(|c| c.starts_with("MAIL FROM")).count(), 1);
            // Blind recipients never show up in the rendered headers.
            assert!(!data.contains("Bcc:"));
        }
    }

    #[tokio::test]
    async fn keepalive_resets_instead_of_quitting() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move { serve_session(&listener, "250 OK\r\n").await });

        let mut cfg = smtp_config(port);
        cfg.smtp_keepalive = true;
        let mut messenger = Messenger::new(cfg);
        for i in 0..2 {
            messenger.set_from("leia@alderaan.org", "", None).unwrap();
            messenger.set_to("luke@tatooine.org").unwrap();
            messenger.set_subject(&format!("message {}", i));
            messenger.set_message("body");
            messenger.send(true).await.unwrap();
        }
        drop(messenger);

        let (commands, _) = server.await.unwrap();
        assert_eq!(commands.iter().filter(|c| *c == "RSET").count(), 2);
        assert_eq!(commands.iter().filter(|c| c.starts_with("MAIL FROM")).count(), 2);
        assert!(!commands.contains(&"QUIT".to_string()));
        // Only one hello for the whole session.
        assert_eq!(commands.iter().filter(|c| c.starts_with("EHLO")).count(), 1);
    }

    #[tokio::test]
    async fn no_from_fails_without_touching_the_network() {
        let mut messenger = Messenger::new(smtp_config(1));
        messenger.set_to("luke@tatooine.org").unwrap();
        messenger.set_message("body");
        let err = messenger.send(false).await.unwrap_err();
        assert!(matches!(err, MessengerError::NoFrom));
    }

    #[tokio::test]
    async fn no_recipients_fails() {
        let mut messenger = Messenger::new(smtp_config(1));
        messenger.set_from("leia@alderaan.org", "", None).unwrap();
        messenger.set_message("body");
        let err = messenger.send(false).await.unwrap_err();
        assert!(matches!(err, MessengerError::NoRecipients));
    }

    struct RecordingPipe {
        calls: Arc<Mutex<Vec<(String, Vec<String>, String)>>>,
    }

    impl SendmailPipe for RecordingPipe {
        fn deliver(
            &mut self,
            mailpath: &str,
            args: &[String],
            payload: &str,
        ) -> Result<(), MessengerError> {
            self.calls.lock().unwrap().push((
                mailpath.to_string(),
                args.to_vec(),
                payload.to_string(),
            ));
            Ok(())
        }
    }

    #[tokio::test]
    async fn sendmail_pipe_receives_flags_and_payload() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let cfg = Config {
            protocol: Protocol::Sendmail,
            mailpath: "/usr/sbin/sendmail".to_string(),
            ..Config::default()
        };
        let mut messenger = Messenger::new(cfg)
            .with_sendmail_pipe(Box::new(RecordingPipe { calls: Arc::clone(&calls) }));
        messenger.set_from("leia@alderaan.org", "", None).unwrap();
        messenger.set_to("luke@tatooine.org").unwrap();
        messenger.set_subject("pipe");
        messenger.set_message("pipe body");
        messenger.send(true).await.unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (path, args, payload) = &calls[0];
        assert_eq!(path, "/usr/sbin/sendmail");
        assert_eq!(args, &["-oi", "-f", "leia@alderaan.org", "-t"]);
        assert!(payload.contains("To: luke@tatooine.org\r\n"));
        assert!(payload.contains("pipe body"));
    }

    #[tokio::test]
    async fn batched_bcc_over_pipe_restores_message_state() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let cfg = Config {
            protocol: Protocol::Sendmail,
            bcc_batch_mode: true,
            bcc_batch_size: 2,
            ..Config::default()
        };
        let mut messenger = Messenger::new(cfg)
            .with_sendmail_pipe(Box::new(RecordingPipe { calls: Arc::clone(&calls) }));
        messenger.set_from("leia@alderaan.org", "", None).unwrap();
        messenger
            .set_bcc("a@rebels.org, b@rebels.org, c@rebels.org", None)
            .unwrap();
        messenger.set_subject("briefing");
        messenger.set_message("meet at dawn");
        messenger.send(false).await.unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].2.contains("Bcc: a@rebels.org, b@rebels.org\r\n"));
        assert!(calls[1].2.contains("Bcc: c@rebels.org\r\n"));
        // Without auto-clear the message keeps the full list and no stale
        // chunk header.
        assert_eq!(messenger.message().get_header("Bcc"), "");
        assert_eq!(messenger.message().bcc.len(), 3);
    }

    struct RecordingMailer {
        calls: Arc<Mutex<Vec<(String, String, String, String)>>>,
    }

    impl SystemMail for RecordingMailer {
        fn send(
            &mut self,
            to: &str,
            subject: &str,
            body: &str,
            headers: &str,
        ) -> Result<(), MessengerError> {
            self.calls.lock().unwrap().push((
                to.to_string(),
                subject.to_string(),
                body.to_string(),
                headers.to_string(),
            ));
            Ok(())
        }
    }

    #[tokio::test]
    async fn mail_collaborator_gets_subject_out_of_band() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let cfg = Config { protocol: Protocol::Mail, ..Config::default() };
        let mut messenger = Messenger::new(cfg)
            .with_system_mailer(Box::new(RecordingMailer { calls: Arc::clone(&calls) }));
        messenger.set_from("leia@alderaan.org", "", None).unwrap();
        messenger.set_to("luke@tatooine.org, han@falcon.org").unwrap();
        messenger.set_subject("out of band");
        messenger.set_message("hello there");
        messenger.send(true).await.unwrap();

        let calls = calls.lock().unwrap();
        let (to, subject, body, headers) = &calls[0];
        assert_eq!(to, "luke@tatooine.org, han@falcon.org");
        assert!(subject.starts_with("=?UTF-8?Q?"));
        // No Subject or To in the header block; both travel out of band.
        assert!(headers
            .lines()
            .all(|l| !l.starts_with("Subject:") && !l.starts_with("To:")));
        assert!(body.contains("hello there"));
    }

    #[tokio::test]
    async fn mail_protocol_without_collaborator_fails() {
        let cfg = Config { protocol: Protocol::Mail, ..Config::default() };
        let mut messenger = Messenger::new(cfg);
        messenger.set_from("leia@alderaan.org", "", None).unwrap();
        messenger.set_to("luke@tatooine.org").unwrap();
        messenger.set_message("body");
        let err = messenger.send(false).await.unwrap_err();
        assert!(matches!(err, MessengerError::SendFailure("mail")));
    }

    #[test]
    fn from_header_formats() {
        let mut messenger = Messenger::new(smtp_config(1));
        messenger.set_from("leia@alderaan.org", "", None).unwrap();
        assert_eq!(messenger.message().get_header("From"), " <leia@alderaan.org>");
        assert_eq!(messenger.message().get_header("Return-Path"), "<leia@alderaan.org>");

        messenger.set_from("<leia@alderaan.org>", "Princess Leia", None).unwrap();
        assert_eq!(
            messenger.message().get_header("From"),
            "\"Princess Leia\" <leia@alderaan.org>"
        );

        messenger.set_from("leia@alderaan.org", "Princess Leià", None).unwrap();
        let from = messenger.message().get_header("From");
        assert!(from.starts_with("=?UTF-8?Q?"), "funky names get Q-encoded: {}", from);
        assert!(from.ends_with(" <leia@alderaan.org>"));
    }

    #[test]
    fn return_path_can_differ_from_sender() {
        let mut messenger = Messenger::new(smtp_config(1));
        messenger
            .set_from("leia@alderaan.org", "Leia", Some("bounces@alderaan.org"))
            .unwrap();
        assert_eq!(messenger.message().get_header("Return-Path"), "<bounces@alderaan.org>");
    }

    #[test]
    fn invalid_addresses_rejected_by_setters() {
        let mut messenger = Messenger::new(smtp_config(1));
        assert!(matches!(
            messenger.set_from("leia@alderaan", "", None),
            Err(MessengerError::InvalidAddress(_))
        ));
        assert!(matches!(
            messenger.set_to("luke@tatooine.org, broken@@addr"),
            Err(MessengerError::InvalidAddress(_))
        ));
    }

    #[test]
    fn header_injection_stripped() {
        let mut messenger = Messenger::new(smtp_config(1));
        messenger.set_header("X-Custom", "value\r\nBcc: sneak@evil.org");
        assert_eq!(
            messenger.message().get_header("X-Custom"),
            "valueBcc: sneak@evil.org"
        );
    }

    #[test]
    fn attachment_cid_moves_to_related_group() {
        let mut messenger = Messenger::new(smtp_config(1));
        messenger.attach_content(b"PNG".to_vec(), "logo.png", "image/png", Disposition::Inline);
        let cid = messenger.set_attachment_cid("logo.png").unwrap();
        assert!(cid.starts_with("logo.png@"));
        let att = &messenger.message().attachments[0];
        assert_eq!(att.multipart, MultipartGroup::Related);
        assert_eq!(att.content_id.as_deref(), Some(cid.as_str()));
        assert!(messenger.set_attachment_cid("missing.gif").is_none());
    }
}
