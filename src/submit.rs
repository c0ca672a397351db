use crate::compose::Draft;
use crate::config::AccountConfig;
use crate::error::{MailError, Result};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::time::Duration;

/// SMTP port that expects TLS from the first byte.
pub const IMPLICIT_TLS_PORT: u16 = 465;
pub const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

/// A draft checked and ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
    pub body: String,
}

impl OutgoingMessage {
    pub fn from_draft(draft: &Draft, fallback_from: &str) -> Result<Self> {
        let to = draft.recipients();
        if to.is_empty() {
            return Err(MailError::State("draft has no recipients".to_string()));
        }
        let from = if draft.from.trim().is_empty() {
            fallback_from.to_string()
        } else {
            draft.from.clone()
        };
        Ok(OutgoingMessage {
            from,
            to,
            cc: draft.cc_list(),
            subject: draft.subject.clone(),
            in_reply_to: draft.in_reply_to.clone(),
            references: draft.references.clone(),
            body: draft.body.clone(),
        })
    }

    fn to_message(&self) -> Result<Message> {
        let mut builder = Message::builder()
            .from(mailbox(&self.from)?)
            .subject(self.subject.clone());
        for to in &self.to {
            builder = builder.to(mailbox(to)?);
        }
        for cc in &self.cc {
            builder = builder.cc(mailbox(cc)?);
        }
        if let Some(ref irt) = self.in_reply_to {
            builder = builder.in_reply_to(irt.clone());
        }
        if let Some(ref refs) = self.references {
            builder = builder.references(refs.clone());
        }
        builder
            .header(ContentType::TEXT_PLAIN)
            .body(self.body.clone())
            .map_err(|e| MailError::State(format!("cannot build message: {}", e)))
    }
}

fn mailbox(addr: &str) -> Result<Mailbox> {
    addr.parse::<Mailbox>()
        .map_err(|e| MailError::State(format!("invalid address '{}': {}", addr, e)))
}

/// Outgoing mail transport.
pub trait Submitter {
    fn send(&self, message: &OutgoingMessage) -> Result<()>;
}

pub struct SmtpSubmitter {
    account: AccountConfig,
    password: String,
}

impl SmtpSubmitter {
    pub fn new(account: AccountConfig, password: String) -> Self {
        SmtpSubmitter { account, password }
    }

    fn transport(&self) -> Result<SmtpTransport> {
        let host = &self.account.smtp_host;
        let builder = if !self.account.use_tls {
            SmtpTransport::builder_dangerous(host)
        } else if self.account.smtp_port == IMPLICIT_TLS_PORT {
            SmtpTransport::relay(host).map_err(smtp_err)?
        } else {
            SmtpTransport::starttls_relay(host).map_err(smtp_err)?
        };
        Ok(builder
            .port(self.account.smtp_port)
            .credentials(Credentials::new(
                self.account.email.clone(),
                self.password.clone(),
            ))
            .timeout(Some(SMTP_TIMEOUT))
            .build())
    }
}

impl Submitter for SmtpSubmitter {
    fn send(&self, message: &OutgoingMessage) -> Result<()> {
        let email = message.to_message()?;
        let transport = self.transport()?;
        log::info!(
            "sending '{}' to {} recipient(s) via {}:{}",
            message.subject,
            message.to.len() + message.cc.len(),
            self.account.smtp_host,
            self.account.smtp_port
        );
        transport.send(&email).map_err(smtp_err)?;
        Ok(())
    }
}

fn smtp_err(e: lettre::transport::smtp::Error) -> MailError {
    log::error!("smtp: {}", e);
    let code = e.status().map(|c| c.to_string());
    match code.as_deref() {
        Some("535") | Some("534") | Some("530") => MailError::Auth(format!("smtp: {}", e)),
        _ if e.is_permanent() => MailError::Protocol(format!("smtp: {}", e)),
        _ => MailError::Network(format!("smtp: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::build_compose_draft;

    #[test]
    fn test_outgoing_from_draft() {
        let mut draft = build_compose_draft("");
        draft.to = "a@example.com, B <b@example.com>".to_string();
        draft.subject = "Hi".to_string();
        draft.body = "hello".to_string();

        let out = OutgoingMessage::from_draft(&draft, "Me <me@example.com>").unwrap();
        assert_eq!(out.from, "Me <me@example.com>");
        assert_eq!(out.to.len(), 2);
        assert!(out.cc.is_empty());

        let message = out.to_message().unwrap();
        let formatted = String::from_utf8(message.formatted()).unwrap();
        assert!(formatted.contains("Subject: Hi"));
        assert!(formatted.contains("b@example.com"));
    }

    #[test]
    fn test_outgoing_rejects_bad_addresses() {
        let mut draft = build_compose_draft("me@example.com");
        assert!(OutgoingMessage::from_draft(&draft, "me@example.com").is_err());

        draft.to = "not an address".to_string();
        let out = OutgoingMessage::from_draft(&draft, "me@example.com").unwrap();
        assert!(matches!(out.to_message(), Err(MailError::State(_))));
    }
}
