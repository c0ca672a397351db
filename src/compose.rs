use crate::error::MailError;
use crate::store::types::{Address, OpenMessage};
use serde::Serialize;
use std::fs;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;

/// An outgoing message being edited. Rendered as a header block followed by
/// a blank line and the body, which is the form the editor sees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Draft {
    pub from: String,
    pub to: String,
    pub cc: String,
    pub subject: String,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
    pub body: String,
}

impl Draft {
    pub fn render(&self) -> String {
        let mut draft = format!("From: {}\nTo: {}\nCc: {}\n", self.from, self.to, self.cc);
        draft.push_str(&format!("Subject: {}\n", self.subject));
        if let Some(ref irt) = self.in_reply_to {
            draft.push_str(&format!("In-Reply-To: {}\n", irt));
        }
        if let Some(ref refs) = self.references {
            draft.push_str(&format!("References: {}\n", refs));
        }
        draft.push('\n');
        draft.push_str(&self.body);
        draft
    }

    /// Read back an edited draft. Header names are case-insensitive; the
    /// body starts after the first blank line.
    pub fn parse(text: &str) -> Result<Draft, MailError> {
        let mut draft = Draft {
            from: String::new(),
            to: String::new(),
            cc: String::new(),
            subject: String::new(),
            in_reply_to: None,
            references: None,
            body: String::new(),
        };

        let (headers, body) = match text.split_once("\n\n") {
            Some((h, b)) => (h, b),
            None => (text, ""),
        };
        for line in headers.lines() {
            let Some((name, value)) = line.split_once(':') else {
                return Err(MailError::State(format!("malformed draft header: {}", line)));
            };
            let value = value.trim().to_string();
            match name.trim().to_lowercase().as_str() {
                "from" => draft.from = value,
                "to" => draft.to = value,
                "cc" => draft.cc = value,
                "subject" => draft.subject = value,
                "in-reply-to" if !value.is_empty() => draft.in_reply_to = Some(value),
                "references" if !value.is_empty() => draft.references = Some(value),
                "in-reply-to" | "references" => {}
                other => {
                    return Err(MailError::State(format!(
                        "unsupported draft header: {}",
                        other
                    )))
                }
            }
        }
        draft.body = body.to_string();

        if draft.recipients().is_empty() {
            return Err(MailError::State("draft has no recipients".to_string()));
        }
        Ok(draft)
    }

    pub fn recipients(&self) -> Vec<String> {
        split_addresses(&self.to)
    }

    pub fn cc_list(&self) -> Vec<String> {
        split_addresses(&self.cc)
    }
}

fn split_addresses(list: &str) -> Vec<String> {
    list.split(',')
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .map(|a| a.to_string())
        .collect()
}

/// Build a blank compose draft.
pub fn build_compose_draft(from: &str) -> Draft {
    Draft {
        from: from.to_string(),
        to: String::new(),
        cc: String::new(),
        subject: String::new(),
        in_reply_to: None,
        references: None,
        body: String::new(),
    }
}

fn angle(id: &str) -> String {
    format!("<{}>", id.trim_matches(|c| c == '<' || c == '>'))
}

fn format_address_list(addrs: &[Address]) -> String {
    addrs
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_date(message: &OpenMessage) -> String {
    message
        .date
        .map(|d| d.format("%a, %b %d, %Y at %I:%M %p").to_string())
        .unwrap_or_else(|| "(unknown date)".to_string())
}

/// Build a reply draft to the sender (or Reply-To) of `message`.
pub fn build_reply_draft(message: &OpenMessage, from: &str) -> Draft {
    let to = if message.reply_to.is_empty() {
        message.sender.to_string()
    } else {
        format_address_list(&message.reply_to)
    };

    let subject = if message.subject.to_lowercase().starts_with("re:") {
        message.subject.clone()
    } else {
        format!("Re: {}", message.subject)
    };

    let in_reply_to = message.message_id.as_deref().map(angle);

    let references = {
        let mut refs: Vec<String> = message.references.iter().map(|r| angle(r)).collect();
        if let Some(ref id) = in_reply_to {
            if !refs.contains(id) {
                refs.push(id.clone());
            }
        }
        if refs.is_empty() {
            None
        } else {
            Some(refs.join(" "))
        }
    };

    let quoted: String = message
        .body
        .lines()
        .map(|line| format!("> {}", line))
        .collect::<Vec<_>>()
        .join("\n");

    Draft {
        from: from.to_string(),
        to,
        cc: String::new(),
        subject,
        in_reply_to,
        references,
        body: format!(
            "\nOn {}, {} wrote:\n{}\n",
            format_date(message),
            message.sender,
            quoted
        ),
    }
}

/// Build a draft forwarding `message` inline to `to`.
pub fn build_forward_draft(message: &OpenMessage, from: &str, to: &str) -> Draft {
    let subject = if message.subject.to_lowercase().starts_with("fwd:") {
        message.subject.clone()
    } else {
        format!("Fwd: {}", message.subject)
    };

    let mut body = String::from("\n\n---------- Forwarded message ----------\n");
    body.push_str(&format!("From: {}\n", message.sender));
    body.push_str(&format!("Date: {}\n", format_date(message)));
    body.push_str(&format!("Subject: {}\n", message.subject));
    body.push_str(&format!("To: {}\n\n", format_address_list(&message.to)));
    body.push_str(&message.body);

    Draft {
        from: from.to_string(),
        to: to.to_string(),
        cc: String::new(),
        subject,
        in_reply_to: None,
        references: None,
        body,
    }
}

/// Write content to a temp file with restrictive permissions (0600).
pub fn write_temp_file(content: &str) -> io::Result<PathBuf> {
    let dir = std::env::temp_dir();
    let filename = format!("tmail-draft-{}.eml", std::process::id());
    let path = dir.join(filename);

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(&path)?;

    io::Write::write_all(&mut file, content.as_bytes())?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::types::{Flags, RemoteId};
    use chrono::{TimeZone, Utc};

    fn message() -> OpenMessage {
        OpenMessage {
            remote_id: RemoteId(9),
            subject: "Hello".to_string(),
            sender: Address::new(Some("Sender"), "sender@example.com"),
            reply_to: Vec::new(),
            to: vec![Address::new(None, "me@example.com")],
            cc: Vec::new(),
            date: Some(Utc.with_ymd_and_hms(2024, 1, 1, 9, 30, 0).unwrap()),
            flags: Flags::default(),
            message_id: Some("abc@example.com".to_string()),
            references: vec!["<root@example.com>".to_string()],
            body: "Line one\nLine two".to_string(),
            attachments: Vec::new(),
        }
    }

    #[test]
    fn test_build_compose_draft() {
        let draft = build_compose_draft("me@example.com").render();
        assert!(draft.contains("From: me@example.com"));
        assert!(draft.contains("To: \n"));
        assert!(draft.contains("Subject: \n"));
    }

    #[test]
    fn test_build_reply_draft() {
        let draft = build_reply_draft(&message(), "me@example.com");
        assert_eq!(draft.to, "Sender <sender@example.com>");
        assert_eq!(draft.subject, "Re: Hello");
        assert_eq!(draft.in_reply_to.as_deref(), Some("<abc@example.com>"));
        assert_eq!(
            draft.references.as_deref(),
            Some("<root@example.com> <abc@example.com>")
        );
        assert!(draft.body.contains("> Line one\n> Line two"));
        assert!(draft.body.contains("Sender <sender@example.com> wrote:"));

        let mut again = message();
        again.subject = "RE: Hello".to_string();
        again.reply_to = vec![Address::new(None, "list@example.com")];
        let draft = build_reply_draft(&again, "me@example.com");
        assert_eq!(draft.subject, "RE: Hello");
        assert_eq!(draft.to, "list@example.com");
    }

    #[test]
    fn test_build_forward_draft() {
        let draft = build_forward_draft(&message(), "me@example.com", "bob@example.com");
        assert_eq!(draft.subject, "Fwd: Hello");
        assert_eq!(draft.to, "bob@example.com");
        assert!(draft.body.contains("---------- Forwarded message ----------"));
        assert!(draft.body.contains("Date: Mon, Jan 01, 2024 at 09:30 AM"));
        assert!(draft.body.contains("To: me@example.com"));
        assert!(draft.body.ends_with("Line one\nLine two"));
    }

    #[test]
    fn test_parse_edited_draft() {
        let mut draft = build_reply_draft(&message(), "me@example.com");
        draft.cc = "a@example.com, b@example.com".to_string();
        let parsed = Draft::parse(&draft.render()).unwrap();
        assert_eq!(parsed, draft);
        assert_eq!(parsed.cc_list().len(), 2);

        let parsed = Draft::parse("to: x@example.com\nsubject: hi\n\nbody\n\nmore").unwrap();
        assert_eq!(parsed.recipients(), vec!["x@example.com".to_string()]);
        assert_eq!(parsed.body, "body\n\nmore");
    }

    #[test]
    fn test_parse_rejects_bad_drafts() {
        assert!(Draft::parse("From: me@example.com\nTo: \n\nbody").is_err());
        assert!(Draft::parse("To: x@example.com\nnot a header\n\nbody").is_err());
        assert!(Draft::parse("To: x@example.com\nX-Bogus: 1\n\nbody").is_err());
    }

    #[test]
    fn test_write_temp_file_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let path = write_temp_file("hello").unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");
        let _ = fs::remove_file(path);
    }
}
