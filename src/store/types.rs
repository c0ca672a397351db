use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Protocol-assigned message identifier (an IMAP UID). Only meaningful for
/// the folder and session it was obtained in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RemoteId(pub u32);

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Address {
    pub name: Option<String>,
    pub email: String,
}

impl Address {
    pub fn new(name: Option<&str>, email: &str) -> Self {
        Address {
            name: name.filter(|n| !n.is_empty()).map(|n| n.to_string()),
            email: email.to_string(),
        }
    }

    /// Display name if known, otherwise the local part of the address.
    pub fn short(&self) -> &str {
        match self.name.as_deref() {
            Some(name) => name,
            None => self.email.split('@').next().unwrap_or(&self.email),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) if name != &self.email => write!(f, "{} <{}>", name, self.email),
            _ if self.email.is_empty() => write!(f, "(unknown)"),
            _ => write!(f, "{}", self.email),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Flags {
    pub seen: bool,
    pub starred: bool,
    pub answered: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    Seen,
    Starred,
    Answered,
    Deleted,
}

impl Flag {
    pub fn imap_name(self) -> &'static str {
        match self {
            Flag::Seen => "\\Seen",
            Flag::Starred => "\\Flagged",
            Flag::Answered => "\\Answered",
            Flag::Deleted => "\\Deleted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Folder {
    pub name: String,
    pub display_path: String,
    pub delimiter: Option<String>,
    pub message_count: u32,
    pub unread_count: u32,
}

impl Folder {
    pub fn new(name: &str, delimiter: Option<&str>) -> Self {
        let display_path = match delimiter {
            Some(d) if !d.is_empty() => name.rsplit(d).next().unwrap_or(name),
            _ => name,
        };
        Folder {
            name: name.to_string(),
            display_path: display_path.to_string(),
            delimiter: delimiter.map(|d| d.to_string()),
            message_count: 0,
            unread_count: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FolderStatus {
    pub message_count: u32,
    pub unread_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageSummary {
    pub remote_id: RemoteId,
    pub local_ordinal: usize,
    pub subject: String,
    pub sender: Address,
    pub date: Option<DateTime<Utc>>,
    pub flags: Flags,
    pub has_attachments: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn size_human(&self) -> String {
        let size = self.bytes.len();
        if size < 1024 {
            format!("{} B", size)
        } else if size < 1024 * 1024 {
            format!("{:.1} KB", size as f64 / 1024.0)
        } else {
            format!("{:.1} MB", size as f64 / (1024.0 * 1024.0))
        }
    }
}

/// A fully fetched message: headers, decoded text body and attachments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenMessage {
    pub remote_id: RemoteId,
    pub subject: String,
    pub sender: Address,
    pub reply_to: Vec<Address>,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub date: Option<DateTime<Utc>>,
    pub flags: Flags,
    pub message_id: Option<String>,
    pub references: Vec<String>,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

/// Which messages a summary fetch covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchSet {
    /// Inclusive range of sequence numbers in the selected folder.
    Sequence { start: u32, end: u32 },
    Ids(Vec<RemoteId>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchScope {
    Subject,
    Sender,
    Both,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCriteria {
    pub text: String,
    pub scope: SearchScope,
}

impl SearchCriteria {
    /// IMAP SEARCH expression for this criteria, with the text quoted.
    pub fn to_imap_query(&self) -> String {
        let quoted = format!(
            "\"{}\"",
            self.text.replace('\\', "\\\\").replace('"', "\\\"")
        );
        match self.scope {
            SearchScope::Subject => format!("SUBJECT {}", quoted),
            SearchScope::Sender => format!("FROM {}", quoted),
            SearchScope::Both => format!("OR SUBJECT {} FROM {}", quoted, quoted),
        }
    }

    /// Local equivalent of the IMAP criteria: case-insensitive substring.
    pub fn matches(&self, subject: &str, sender: &Address) -> bool {
        let needle = self.text.to_lowercase();
        let in_subject = subject.to_lowercase().contains(&needle);
        let in_sender = sender.to_string().to_lowercase().contains(&needle);
        match self.scope {
            SearchScope::Subject => in_subject,
            SearchScope::Sender => in_sender,
            SearchScope::Both => in_subject || in_sender,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display() {
        let addr = Address::new(Some("Alice"), "alice@example.com");
        assert_eq!(addr.to_string(), "Alice <alice@example.com>");
        assert_eq!(addr.short(), "Alice");

        let bare = Address::new(None, "bob@example.com");
        assert_eq!(bare.to_string(), "bob@example.com");
        assert_eq!(bare.short(), "bob");

        let empty_name = Address::new(Some(""), "carol@example.com");
        assert!(empty_name.name.is_none());

        assert_eq!(Address::new(None, "").to_string(), "(unknown)");
    }

    #[test]
    fn test_folder_display_path() {
        assert_eq!(Folder::new("[Gmail]/Sent Mail", Some("/")).display_path, "Sent Mail");
        assert_eq!(Folder::new("INBOX.Work", Some(".")).display_path, "Work");
        assert_eq!(Folder::new("INBOX", None).display_path, "INBOX");
    }

    #[test]
    fn test_attachment_size_human() {
        let mut att = Attachment {
            filename: "a.bin".to_string(),
            content_type: "application/octet-stream".to_string(),
            bytes: vec![0; 512],
        };
        assert_eq!(att.size_human(), "512 B");
        att.bytes = vec![0; 2048];
        assert_eq!(att.size_human(), "2.0 KB");
        att.bytes = vec![0; 3 * 1024 * 1024];
        assert_eq!(att.size_human(), "3.0 MB");
    }

    #[test]
    fn test_search_query_quoting() {
        let criteria = SearchCriteria {
            text: "say \"hi\"".to_string(),
            scope: SearchScope::Both,
        };
        assert_eq!(
            criteria.to_imap_query(),
            "OR SUBJECT \"say \\\"hi\\\"\" FROM \"say \\\"hi\\\"\""
        );
        let criteria = SearchCriteria {
            text: "alice".to_string(),
            scope: SearchScope::Sender,
        };
        assert_eq!(criteria.to_imap_query(), "FROM \"alice\"");
    }

    #[test]
    fn test_search_matches_scope() {
        let sender = Address::new(Some("Invoice Bot"), "billing@example.com");
        let criteria = SearchCriteria {
            text: "invoice".to_string(),
            scope: SearchScope::Subject,
        };
        assert!(!criteria.matches("Meeting notes", &sender));
        assert!(criteria.matches("Re: INVOICE", &sender));

        let criteria = SearchCriteria {
            text: "invoice".to_string(),
            scope: SearchScope::Sender,
        };
        assert!(criteria.matches("Meeting notes", &sender));
    }
}
