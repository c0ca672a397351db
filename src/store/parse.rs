//! Decoding of raw RFC 5322 messages into summaries and open messages.

use super::types::{Address, Attachment, Flags, MessageSummary, OpenMessage, RemoteId};
use chrono::{DateTime, Utc};
use mail_parser::{HeaderValue, Message, MessageParser, MimeHeaders};

const NO_SUBJECT: &str = "(no subject)";

/// Build a summary from the header block returned by `BODY.PEEK[HEADER]`.
/// The local ordinal is assigned later by the message window.
pub fn summary_from_header(remote_id: RemoteId, header: &[u8], flags: Flags) -> MessageSummary {
    match MessageParser::default().parse_headers(header) {
        Some(message) => MessageSummary {
            remote_id,
            local_ordinal: 0,
            subject: subject_of(&message),
            sender: first_address(message.from()).unwrap_or_else(|| Address::new(None, "")),
            date: date_of(&message),
            flags,
            has_attachments: looks_like_attachments(&message),
        },
        None => {
            log::warn!("unparseable header block for uid {}", remote_id);
            MessageSummary {
                remote_id,
                local_ordinal: 0,
                subject: NO_SUBJECT.to_string(),
                sender: Address::new(None, ""),
                date: None,
                flags,
                has_attachments: false,
            }
        }
    }
}

/// Decode a complete message. `None` if the bytes are not a message at all.
pub fn open_message(remote_id: RemoteId, raw: &[u8], flags: Flags) -> Option<OpenMessage> {
    let message = MessageParser::default().parse(raw)?;

    let body = render_body(
        message.body_text(0).as_deref(),
        message.body_html(0).as_deref(),
    );

    let attachments = message
        .attachments()
        .map(|part| {
            let content_type = part
                .content_type()
                .map(|ct| match ct.subtype() {
                    Some(sub) => format!("{}/{}", ct.ctype(), sub),
                    None => ct.ctype().to_string(),
                })
                .unwrap_or_else(|| "application/octet-stream".to_string());
            Attachment {
                filename: part
                    .attachment_name()
                    .filter(|n| !n.is_empty())
                    .unwrap_or("attachment")
                    .to_string(),
                content_type,
                bytes: part.contents().to_vec(),
            }
        })
        .collect();

    let mut references = text_list(message.references());
    for id in text_list(message.in_reply_to()) {
        if !references.contains(&id) {
            references.push(id);
        }
    }

    Some(OpenMessage {
        remote_id,
        subject: subject_of(&message),
        sender: first_address(message.from()).unwrap_or_else(|| Address::new(None, "")),
        reply_to: all_addresses(message.reply_to()),
        to: all_addresses(message.to()),
        cc: all_addresses(message.cc()),
        date: date_of(&message),
        flags,
        message_id: message.message_id().map(|s| s.to_string()),
        references,
        body,
        attachments,
    })
}

/// Plain text if present, otherwise the HTML part rendered as text.
pub fn render_body(text_plain: Option<&str>, text_html: Option<&str>) -> String {
    if let Some(plain) = text_plain {
        return plain.to_string();
    }
    if let Some(html) = text_html {
        return html2text::from_read(html.as_bytes(), 80).unwrap_or_default();
    }
    "(no text content)".to_string()
}

fn subject_of(message: &Message) -> String {
    match message.subject() {
        Some(s) if !s.trim().is_empty() => s.to_string(),
        _ => NO_SUBJECT.to_string(),
    }
}

fn date_of(message: &Message) -> Option<DateTime<Utc>> {
    message
        .date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
}

fn looks_like_attachments(message: &Message) -> bool {
    message
        .content_type()
        .map(|ct| {
            ct.ctype().eq_ignore_ascii_case("multipart")
                && ct
                    .subtype()
                    .is_some_and(|sub| sub.eq_ignore_ascii_case("mixed"))
        })
        .unwrap_or(false)
}

fn convert(addr: &mail_parser::Addr) -> Option<Address> {
    let email = addr.address()?;
    Some(Address::new(addr.name(), email))
}

fn all_addresses(address: Option<&mail_parser::Address>) -> Vec<Address> {
    match address {
        Some(mail_parser::Address::List(list)) => list.iter().filter_map(convert).collect(),
        Some(mail_parser::Address::Group(groups)) => groups
            .iter()
            .flat_map(|g| g.addresses.iter())
            .filter_map(convert)
            .collect(),
        None => Vec::new(),
    }
}

fn first_address(address: Option<&mail_parser::Address>) -> Option<Address> {
    all_addresses(address).into_iter().next()
}

fn text_list(value: &HeaderValue) -> Vec<String> {
    match value {
        HeaderValue::Text(t) => vec![t.to_string()],
        HeaderValue::TextList(list) => list.iter().map(|t| t.to_string()).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAIN: &str = "From: Alice Example <alice@example.com>\r\n\
To: me@example.com, Bob <bob@example.com>\r\n\
Cc: carol@example.com\r\n\
Subject: Quarterly invoice\r\n\
Date: Tue, 02 Jan 2024 10:00:00 +0000\r\n\
Message-ID: <msg-1@example.com>\r\n\
References: <root@example.com>\r\n\
In-Reply-To: <parent@example.com>\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Please find the invoice below.\r\n";

    const WITH_ATTACHMENT: &str = "From: alice@example.com\r\n\
Subject: Report\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
\r\n\
--XYZ\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<p>See <b>attached</b></p>\r\n\
--XYZ\r\n\
Content-Type: text/csv\r\n\
Content-Disposition: attachment; filename=\"report.csv\"\r\n\
\r\n\
a,b\r\n\
--XYZ--\r\n";

    #[test]
    fn test_summary_from_header() {
        let header = PLAIN.split("\r\n\r\n").next().unwrap().to_string() + "\r\n\r\n";
        let summary = summary_from_header(RemoteId(7), header.as_bytes(), Flags::default());
        assert_eq!(summary.remote_id, RemoteId(7));
        assert_eq!(summary.subject, "Quarterly invoice");
        assert_eq!(summary.sender.to_string(), "Alice Example <alice@example.com>");
        assert_eq!(summary.date.unwrap().to_rfc3339(), "2024-01-02T10:00:00+00:00");
        assert!(!summary.has_attachments);
    }

    #[test]
    fn test_summary_without_subject() {
        let summary = summary_from_header(
            RemoteId(1),
            b"From: x@example.com\r\n\r\n",
            Flags::default(),
        );
        assert_eq!(summary.subject, "(no subject)");
        assert!(summary.date.is_none());
    }

    #[test]
    fn test_open_plain_message() {
        let flags = Flags {
            seen: true,
            ..Flags::default()
        };
        let msg = open_message(RemoteId(3), PLAIN.as_bytes(), flags).unwrap();
        assert_eq!(msg.to.len(), 2);
        assert_eq!(msg.to[1].to_string(), "Bob <bob@example.com>");
        assert_eq!(msg.cc[0].email, "carol@example.com");
        assert_eq!(msg.message_id.as_deref(), Some("msg-1@example.com"));
        assert_eq!(
            msg.references,
            vec!["root@example.com".to_string(), "parent@example.com".to_string()]
        );
        assert!(msg.body.contains("Please find the invoice"));
        assert!(msg.attachments.is_empty());
        assert!(msg.flags.seen);
    }

    #[test]
    fn test_open_message_with_attachment_and_html_body() {
        let msg = open_message(RemoteId(4), WITH_ATTACHMENT.as_bytes(), Flags::default()).unwrap();
        assert!(msg.body.contains("attached"));
        assert!(!msg.body.contains("<b>"));
        assert_eq!(msg.attachments.len(), 1);
        assert_eq!(msg.attachments[0].filename, "report.csv");
        assert_eq!(msg.attachments[0].content_type, "text/csv");

        let header = WITH_ATTACHMENT.split("\r\n\r\n").next().unwrap().to_string() + "\r\n\r\n";
        let summary = summary_from_header(RemoteId(4), header.as_bytes(), Flags::default());
        assert!(summary.has_attachments);
    }

    #[test]
    fn test_render_body_fallbacks() {
        assert_eq!(render_body(Some("plain"), Some("<p>html</p>")), "plain");
        assert!(render_body(None, Some("<p>html</p>")).contains("html"));
        assert_eq!(render_body(None, None), "(no text content)");
    }
}
