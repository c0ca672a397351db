//! Turns [`Display`] payloads into terminal text or JSON lines.

use crate::engine::Display;
use crate::error::MailError;
use crate::store::types::{Address, Folder, MessageSummary, OpenMessage};
use crate::window::{Page, SearchResult};
use serde_json::{json, Value};

const SENDER_WIDTH: usize = 20;
const SUBJECT_WIDTH: usize = 50;

pub fn ok_response(display: &Display) -> Value {
    let data = serde_json::to_value(display).unwrap_or(Value::Null);
    let mut obj = match data {
        Value::Object(m) => m,
        other => {
            let mut m = serde_json::Map::new();
            m.insert("data".to_string(), other);
            m
        }
    };
    obj.insert("ok".to_string(), Value::Bool(true));
    Value::Object(obj)
}

pub fn err_response(err: &MailError) -> Value {
    json!({"ok": false, "kind": err.kind(), "error": err.to_string()})
}

pub fn render_error(err: &MailError) -> String {
    format!("Error: {}", err)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else if max <= 3 {
        s.chars().take(max).collect()
    } else {
        let kept: String = s.chars().take(max - 3).collect();
        format!("{}...", kept)
    }
}

fn format_summary(entry: &MessageSummary) -> String {
    let unread = if entry.flags.seen { " " } else { "N" };
    let star = if entry.flags.starred { "*" } else { " " };
    let clip = if entry.has_attachments { "+" } else { " " };
    let date = entry
        .date
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| " ".repeat(10));
    format!(
        "{:>3}. {}{}{} {} {:sender_w$} {}",
        entry.local_ordinal,
        unread,
        star,
        clip,
        date,
        truncate(entry.sender.short(), SENDER_WIDTH),
        truncate(&entry.subject, SUBJECT_WIDTH),
        sender_w = SENDER_WIDTH
    )
}

fn format_folder(f: &Folder, current: Option<&str>) -> String {
    let marker = if current == Some(f.name.as_str()) { ">" } else { " " };
    if f.unread_count > 0 {
        format!("{} {} ({}/{})", marker, f.name, f.unread_count, f.message_count)
    } else if f.message_count > 0 {
        format!("{} {} ({})", marker, f.name, f.message_count)
    } else {
        format!("{} {}", marker, f.name)
    }
}

fn join_addresses(addrs: &[Address]) -> String {
    addrs
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_page(page: &Page) -> Vec<String> {
    let mut lines = vec![format!(
        "{} - page {}/{} ({} messages)",
        page.folder,
        page.number,
        page.page_count(),
        page.total
    )];
    if page.entries.is_empty() {
        lines.push("  (no messages)".to_string());
    }
    lines.extend(page.entries.iter().map(format_summary));
    if page.has_more() {
        lines.push(format!("  /inbox {} for more", page.number + 1));
    }
    lines
}

fn render_search(result: &SearchResult) -> Vec<String> {
    let mut lines = vec![format!(
        "Search '{}' in {}: {} match{}",
        result.query,
        result.folder,
        result.total_matches,
        if result.total_matches == 1 { "" } else { "es" }
    )];
    lines.extend(result.entries.iter().map(format_summary));
    if result.truncated {
        lines.push(format!(
            "  showing the newest {} of {}",
            result.entries.len(),
            result.total_matches
        ));
    }
    lines
}

fn render_message(ordinal: usize, message: &OpenMessage) -> Vec<String> {
    let mut lines = vec![format!("#{}", ordinal)];
    lines.push(format!("From: {}", message.sender));
    if !message.to.is_empty() {
        lines.push(format!("To: {}", join_addresses(&message.to)));
    }
    if !message.cc.is_empty() {
        lines.push(format!("Cc: {}", join_addresses(&message.cc)));
    }
    if let Some(date) = message.date {
        lines.push(format!("Date: {}", date.format("%a, %d %b %Y %H:%M")));
    }
    lines.push(format!("Subject: {}", message.subject));
    if !message.attachments.is_empty() {
        let names: Vec<String> = message
            .attachments
            .iter()
            .map(|a| format!("{} ({})", a.filename, a.size_human()))
            .collect();
        lines.push(format!("Attachments: {}", names.join(", ")));
    }
    lines.push(String::new());
    lines.extend(message.body.lines().map(str::to_string));
    lines
}

/// Plain-text rendering for the interactive prompt.
pub fn render_text(display: &Display) -> String {
    let lines: Vec<String> = match display {
        Display::Page { page, notice } => {
            let mut lines = Vec::new();
            if let Some(n) = notice {
                lines.push(n.clone());
            }
            lines.extend(render_page(page));
            lines
        }
        Display::Search { result } => render_search(result),
        Display::Message {
            ordinal,
            advanced,
            message,
            ..
        } => {
            let mut lines = Vec::new();
            if *advanced {
                lines.push("(continued on the next page)".to_string());
            }
            lines.extend(render_message(*ordinal, message));
            lines
        }
        Display::Folders { folders, current } => folders
            .iter()
            .map(|f| format_folder(f, current.as_deref()))
            .collect(),
        Display::Switched {
            folder,
            status,
            page,
        } => {
            let mut lines = vec![format!(
                "{}: {} messages, {} unread",
                folder, status.message_count, status.unread_count
            )];
            if let Some(page) = page {
                lines.extend(render_page(page));
            }
            lines
        }
        Display::Compose { draft } => vec![format!("Editing draft: {}", draft.subject)],
        Display::Sent {
            subject,
            recipients,
        } => vec![format!(
            "Sent '{}' to {} recipient{}",
            subject,
            recipients,
            if *recipients == 1 { "" } else { "s" }
        )],
        Display::Saved { paths } => paths
            .iter()
            .map(|p| format!("Saved {}", p.display()))
            .collect(),
        Display::Account { account } => vec![
            format!("Account: {}", account.name),
            format!("Email:   {} <{}>", account.display_name, account.email),
            format!("IMAP:    {}:{}", account.imap_host, account.imap_port),
            format!("SMTP:    {}:{}", account.smtp_host, account.smtp_port),
            format!("TLS:     {}", if account.use_tls { "on" } else { "off" }),
        ],
        Display::Help { commands } => commands
            .iter()
            .map(|c| {
                let usage = if c.args.is_empty() {
                    format!("/{}", c.name)
                } else {
                    format!("/{} {}", c.name, c.args)
                };
                let aliases = if c.aliases.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", c.aliases.join(", "))
                };
                format!("  {:32} {}{}", usage, c.description, aliases)
            })
            .chain(std::iter::once(
                "  A bare number reads that message; other text searches.".to_string(),
            ))
            .collect(),
        Display::Notice { text } => vec![text.clone()],
        Display::Confirm { prompt, default } => {
            vec![format!("{} {}", prompt, if *default { "[Y/n]" } else { "[y/N]" })]
        }
        Display::LoggedOut { account } => {
            vec![format!("Logged out of {}. Password and settings removed.", account.email)]
        }
        Display::Quit => vec!["Bye.".to_string()],
        Display::Nothing => Vec::new(),
    };
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::types::{Flags, RemoteId};

    fn summary(n: usize, subject: &str) -> MessageSummary {
        MessageSummary {
            remote_id: RemoteId(n as u32),
            local_ordinal: n,
            subject: subject.to_string(),
            sender: Address::new(Some("Alice"), "alice@example.com"),
            date: None,
            flags: Flags::default(),
            has_attachments: false,
        }
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 8), "hello...");
        assert_eq!(truncate("héllo wörld", 8), "héllo...");
        assert_eq!(truncate("hello", 2), "he");
    }

    #[test]
    fn test_render_page() {
        let page = Page {
            folder: "INBOX".to_string(),
            number: 1,
            size: 2,
            total: 3,
            entries: vec![summary(1, "First"), summary(2, "Second")],
        };
        let text = render_text(&Display::Page { page, notice: None });
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "INBOX - page 1/2 (3 messages)");
        assert!(lines[1].starts_with("  1. N"));
        assert!(lines[1].contains("Alice"));
        assert!(lines[1].ends_with("First"));
        assert_eq!(lines[3], "  /inbox 2 for more");
    }

    #[test]
    fn test_json_payloads() {
        let ok = ok_response(&Display::Notice {
            text: "Starred: x".to_string(),
        });
        assert_eq!(ok["ok"], true);
        assert_eq!(ok["type"], "notice");
        assert_eq!(ok["text"], "Starred: x");

        let err = err_response(&MailError::State("no message open".to_string()));
        assert_eq!(err["ok"], false);
        assert_eq!(err["kind"], "state");
        assert_eq!(err["error"], "no message open");

        assert_eq!(ok_response(&Display::Quit)["type"], "quit");
    }

    #[test]
    fn test_confirm_prompt() {
        let ask = Display::Confirm {
            prompt: "Delete \"Lunch\"?".to_string(),
            default: false,
        };
        assert_eq!(render_text(&ask), "Delete \"Lunch\"? [y/N]");
        let json = ok_response(&ask);
        assert_eq!(json["type"], "confirm");
        assert_eq!(json["default"], false);

        let ask = Display::Confirm {
            prompt: "Log out of me@example.com?".to_string(),
            default: true,
        };
        assert_eq!(render_text(&ask), "Log out of me@example.com? [Y/n]");
    }
}
