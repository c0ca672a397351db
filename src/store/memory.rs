//! In-memory [`MailStore`] with failure injection, used by the unit and
//! scenario test suites.

use super::types::*;
use super::{Connector, Hangup, MailStore};
use crate::config::AccountConfig;
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub uid: RemoteId,
    pub subject: String,
    pub sender: Address,
    pub to: Vec<Address>,
    pub date: Option<DateTime<Utc>>,
    pub flags: Flags,
    pub message_id: Option<String>,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

impl StoredMessage {
    pub fn new(subject: &str, sender_email: &str) -> Self {
        StoredMessage {
            uid: RemoteId(0),
            subject: subject.to_string(),
            sender: Address::new(None, sender_email),
            to: Vec::new(),
            date: None,
            flags: Flags::default(),
            message_id: None,
            body: String::new(),
            attachments: Vec::new(),
        }
    }

    pub fn from_name(mut self, name: &str) -> Self {
        self.sender.name = Some(name.to_string());
        self
    }

    pub fn body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self
    }

    pub fn message_id(mut self, id: &str) -> Self {
        self.message_id = Some(id.to_string());
        self
    }

    pub fn attachment(mut self, filename: &str, bytes: &[u8]) -> Self {
        self.attachments.push(Attachment {
            filename: filename.to_string(),
            content_type: "application/octet-stream".to_string(),
            bytes: bytes.to_vec(),
        });
        self
    }

    fn summary(&self) -> MessageSummary {
        MessageSummary {
            remote_id: self.uid,
            local_ordinal: 0,
            subject: self.subject.clone(),
            sender: self.sender.clone(),
            date: self.date,
            flags: self.flags,
            has_attachments: !self.attachments.is_empty(),
        }
    }
}

#[derive(Debug)]
struct Mailbox {
    name: String,
    delimiter: Option<String>,
    messages: Vec<StoredMessage>,
}

#[derive(Debug, Default)]
struct Remote {
    mailboxes: Vec<Mailbox>,
    next_uid: u32,
    failures: VecDeque<(&'static str, StoreError)>,
    stalls: VecDeque<(&'static str, Duration)>,
    reject_logins: bool,
    connects: usize,
    hangups: usize,
    calls: Vec<String>,
}

impl Remote {
    fn mailbox(&mut self, name: &str) -> Result<&mut Mailbox, StoreError> {
        self.mailboxes
            .iter_mut()
            .find(|m| m.name == name)
            .ok_or_else(|| StoreError::Protocol(format!("no such mailbox: {}", name)))
    }
}

/// Handle on the shared remote state. Clones see the same mailboxes, so a
/// test can keep one to arrange and inspect while sessions use another.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    remote: Arc<Mutex<Remote>>,
}

fn lock(remote: &Mutex<Remote>) -> MutexGuard<'_, Remote> {
    remote.lock().unwrap_or_else(|e| e.into_inner())
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_folder(&self, name: &str, delimiter: Option<&str>) {
        lock(&self.remote).mailboxes.push(Mailbox {
            name: name.to_string(),
            delimiter: delimiter.map(|d| d.to_string()),
            messages: Vec::new(),
        });
    }

    /// Append a message (newest so far) and return its uid.
    pub fn add_message(&self, folder: &str, mut message: StoredMessage) -> RemoteId {
        let mut remote = lock(&self.remote);
        remote.next_uid += 1;
        message.uid = RemoteId(remote.next_uid);
        let uid = message.uid;
        if let Ok(mailbox) = remote.mailbox(folder) {
            mailbox.messages.push(message);
        }
        uid
    }

    /// Remove a message behind the session's back.
    pub fn remove_message(&self, folder: &str, uid: RemoteId) {
        if let Ok(mailbox) = lock(&self.remote).mailbox(folder) {
            mailbox.messages.retain(|m| m.uid != uid);
        }
    }

    pub fn message(&self, folder: &str, uid: RemoteId) -> Option<StoredMessage> {
        let mut remote = lock(&self.remote);
        let mailbox = remote.mailbox(folder).ok()?;
        mailbox.messages.iter().find(|m| m.uid == uid).cloned()
    }

    pub fn uids(&self, folder: &str) -> Vec<RemoteId> {
        match lock(&self.remote).mailbox(folder) {
            Ok(mailbox) => mailbox.messages.iter().map(|m| m.uid).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Make the next call of `op` (e.g. `"fetch_summaries"`) fail with `err`.
    pub fn fail_next(&self, op: &'static str, err: StoreError) {
        lock(&self.remote).failures.push_back((op, err));
    }

    /// Make the next call of `op` sleep before answering.
    pub fn stall_next(&self, op: &'static str, delay: Duration) {
        lock(&self.remote).stalls.push_back((op, delay));
    }

    pub fn reject_logins(&self, reject: bool) {
        lock(&self.remote).reject_logins = reject;
    }

    pub fn connect_count(&self) -> usize {
        lock(&self.remote).connects
    }

    /// Sessions whose transport was closed from outside.
    pub fn hangup_count(&self) -> usize {
        lock(&self.remote).hangups
    }

    /// Operations served so far, as `"op arg"` strings.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.remote).calls.clone()
    }
}

impl Connector for MemoryConnector {
    fn connect(
        &self,
        account: &AccountConfig,
        _password: &str,
    ) -> Result<Box<dyn MailStore>, StoreError> {
        let mut remote = lock(&self.remote);
        remote.connects += 1;
        if remote.reject_logins {
            return Err(StoreError::Auth(format!(
                "invalid credentials for {}",
                account.email
            )));
        }
        if let Some(pos) = remote.failures.iter().position(|(op, _)| *op == "connect") {
            if let Some((_, err)) = remote.failures.remove(pos) {
                return Err(err);
            }
        }
        Ok(Box::new(MemoryStore {
            remote: Arc::clone(&self.remote),
            selected: None,
            alive: Arc::new(AtomicBool::new(true)),
        }))
    }
}

/// One session against a [`MemoryConnector`]'s state. A session that has
/// seen a network failure or a hangup stays dead, like a dropped TCP
/// connection.
pub struct MemoryStore {
    remote: Arc<Mutex<Remote>>,
    selected: Option<String>,
    alive: Arc<AtomicBool>,
}

#[derive(Debug)]
struct MemoryHangup {
    remote: Arc<Mutex<Remote>>,
    alive: Arc<AtomicBool>,
}

impl Hangup for MemoryHangup {
    fn hang_up(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            lock(&self.remote).hangups += 1;
        }
    }
}

impl MemoryStore {
    /// Start serving `op`. A stalled request was already sent, so it still
    /// takes effect when the session is hung up while it waits.
    fn begin(&mut self, op: &'static str, arg: &str) -> Result<MutexGuard<'_, Remote>, StoreError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(StoreError::Network("connection closed".to_string()));
        }
        let delay = {
            let mut remote = lock(&self.remote);
            let pos = remote.stalls.iter().position(|(o, _)| *o == op);
            pos.and_then(|p| remote.stalls.remove(p)).map(|(_, d)| d)
        };
        if let Some(delay) = delay {
            thread::sleep(delay);
        }

        let mut remote = lock(&self.remote);
        remote.calls.push(format!("{} {}", op, arg).trim_end().to_string());
        if let Some(pos) = remote.failures.iter().position(|(o, _)| *o == op) {
            if let Some((_, err)) = remote.failures.remove(pos) {
                if err.is_transient() {
                    self.alive.store(false, Ordering::SeqCst);
                }
                return Err(err);
            }
        }
        Ok(remote)
    }

    fn selected(&self) -> Result<String, StoreError> {
        self.selected
            .clone()
            .ok_or_else(|| StoreError::Protocol("no mailbox selected".to_string()))
    }
}

fn status_of(mailbox: &Mailbox) -> FolderStatus {
    FolderStatus {
        message_count: mailbox.messages.len() as u32,
        unread_count: mailbox.messages.iter().filter(|m| !m.flags.seen).count() as u32,
    }
}

impl MailStore for MemoryStore {
    fn list_folders(&mut self) -> Result<Vec<Folder>, StoreError> {
        let remote = self.begin("list_folders", "")?;
        Ok(remote
            .mailboxes
            .iter()
            .map(|m| {
                let status = status_of(m);
                let mut folder = Folder::new(&m.name, m.delimiter.as_deref());
                folder.message_count = status.message_count;
                folder.unread_count = status.unread_count;
                folder
            })
            .collect())
    }

    fn select_folder(&mut self, name: &str) -> Result<FolderStatus, StoreError> {
        let status = {
            let mut remote = self.begin("select_folder", name)?;
            status_of(remote.mailbox(name)?)
        };
        self.selected = Some(name.to_string());
        Ok(status)
    }

    fn folder_status(&mut self, name: &str) -> Result<FolderStatus, StoreError> {
        let mut remote = self.begin("folder_status", name)?;
        Ok(status_of(remote.mailbox(name)?))
    }

    fn fetch_summaries(&mut self, set: &FetchSet) -> Result<Vec<MessageSummary>, StoreError> {
        let selected = self.selected()?;
        let arg = match set {
            FetchSet::Sequence { start, end } => format!("{}:{}", start, end),
            FetchSet::Ids(ids) => ids.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(","),
        };
        let mut remote = self.begin("fetch_summaries", &arg)?;
        let mailbox = remote.mailbox(&selected)?;
        Ok(match set {
            FetchSet::Sequence { start, end } => mailbox
                .messages
                .iter()
                .enumerate()
                .filter(|(i, _)| {
                    let seq = *i as u32 + 1;
                    seq >= *start && seq <= *end
                })
                .map(|(_, m)| m.summary())
                .collect(),
            FetchSet::Ids(ids) => ids
                .iter()
                .filter_map(|id| mailbox.messages.iter().find(|m| m.uid == *id))
                .map(StoredMessage::summary)
                .collect(),
        })
    }

    fn fetch_body(&mut self, id: RemoteId) -> Result<Option<OpenMessage>, StoreError> {
        let selected = self.selected()?;
        let mut remote = self.begin("fetch_body", &id.to_string())?;
        let mailbox = remote.mailbox(&selected)?;
        let Some(m) = mailbox.messages.iter_mut().find(|m| m.uid == id) else {
            return Ok(None);
        };
        m.flags.seen = true;
        Ok(Some(OpenMessage {
            remote_id: m.uid,
            subject: m.subject.clone(),
            sender: m.sender.clone(),
            reply_to: Vec::new(),
            to: m.to.clone(),
            cc: Vec::new(),
            date: m.date,
            flags: m.flags,
            message_id: m.message_id.clone(),
            references: Vec::new(),
            body: m.body.clone(),
            attachments: m.attachments.clone(),
        }))
    }

    fn set_flag(&mut self, id: RemoteId, flag: Flag, value: bool) -> Result<(), StoreError> {
        let selected = self.selected()?;
        let arg = format!("{} {}{}", id, if value { "+" } else { "-" }, flag.imap_name());
        let mut remote = self.begin("set_flag", &arg)?;
        let mailbox = remote.mailbox(&selected)?;
        if let Some(m) = mailbox.messages.iter_mut().find(|m| m.uid == id) {
            match flag {
                Flag::Seen => m.flags.seen = value,
                Flag::Starred => m.flags.starred = value,
                Flag::Answered => m.flags.answered = value,
                Flag::Deleted => {}
            }
        }
        Ok(())
    }

    fn move_to(&mut self, id: RemoteId, target_folder: &str) -> Result<(), StoreError> {
        let selected = self.selected()?;
        let mut remote = self.begin("move_to", &format!("{} {}", id, target_folder))?;
        remote.mailbox(target_folder)?;
        let source = remote.mailbox(&selected)?;
        let Some(pos) = source.messages.iter().position(|m| m.uid == id) else {
            return Err(StoreError::Protocol(format!("no message with uid {}", id)));
        };
        let mut message = source.messages.remove(pos);
        remote.next_uid += 1;
        message.uid = RemoteId(remote.next_uid);
        remote.mailbox(target_folder)?.messages.push(message);
        Ok(())
    }

    fn expunge(&mut self, id: RemoteId) -> Result<(), StoreError> {
        let selected = self.selected()?;
        let mut remote = self.begin("expunge", &id.to_string())?;
        remote.mailbox(&selected)?.messages.retain(|m| m.uid != id);
        Ok(())
    }

    fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<RemoteId>, StoreError> {
        let selected = self.selected()?;
        let mut remote = self.begin("search", &criteria.to_imap_query())?;
        let mailbox = remote.mailbox(&selected)?;
        Ok(mailbox
            .messages
            .iter()
            .rev()
            .filter(|m| criteria.matches(&m.subject, &m.sender))
            .map(|m| m.uid)
            .collect())
    }

    fn logout(&mut self) -> Result<(), StoreError> {
        drop(self.begin("logout", "")?);
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn hangup(&self) -> Option<Arc<dyn Hangup>> {
        Some(Arc::new(MemoryHangup {
            remote: Arc::clone(&self.remote),
            alive: Arc::clone(&self.alive),
        }))
    }
}
