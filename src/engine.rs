//! Session engine: turns [`Intent`]s into remote operations and cache
//! updates, and answers each with a [`Display`] payload for the front-end.

use crate::attachments::AttachmentWriter;
use crate::compose::{self, Draft};
use crate::config::{AccountConfig, Config};
use crate::connection::{ConnectionManager, SessionState};
use crate::error::{MailError, Result};
use crate::folders::FolderDirectory;
use crate::router::{Intent, COMMANDS};
use crate::store::types::*;
use crate::submit::{OutgoingMessage, Submitter};
use crate::window::{self, MessageWindow, Mutation, Page, SearchResult};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    NoAccount,
    Connecting,
    Browsing {
        folder: String,
        page: u32,
    },
    Reading {
        folder: String,
        page: u32,
        ordinal: usize,
    },
    Composing,
}

/// Which list numeric references address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Folder,
    Search,
}

#[derive(Debug, Clone, Serialize)]
pub struct HelpEntry {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub args: &'static str,
    pub description: &'static str,
}

/// What the front-end should show after an intent.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Display {
    Page {
        page: Page,
        notice: Option<String>,
    },
    Search {
        result: SearchResult,
    },
    Message {
        folder: String,
        ordinal: usize,
        /// Reading ran past the page and the next page was loaded.
        advanced: bool,
        message: OpenMessage,
    },
    Folders {
        folders: Vec<Folder>,
        current: Option<String>,
    },
    Switched {
        folder: String,
        status: FolderStatus,
        page: Option<Page>,
    },
    Compose {
        draft: Draft,
    },
    Sent {
        subject: String,
        recipients: usize,
    },
    Saved {
        paths: Vec<PathBuf>,
    },
    Account {
        account: AccountConfig,
    },
    Help {
        commands: Vec<HelpEntry>,
    },
    Notice {
        text: String,
    },
    /// Ask before a destructive command runs.
    Confirm {
        prompt: String,
        default: bool,
    },
    LoggedOut {
        account: AccountConfig,
    },
    Quit,
    Nothing,
}

impl Display {
    fn notice(text: impl Into<String>) -> Self {
        Display::Notice { text: text.into() }
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub page_size: u32,
    pub archive_folder: Option<String>,
    pub download_dir: PathBuf,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        EngineSettings {
            page_size: config.ui.page_size,
            archive_folder: config.mail.archive_folder.clone(),
            download_dir: config
                .ui
                .download_dir
                .clone()
                .unwrap_or_else(default_download_dir),
        }
    }
}

fn default_download_dir() -> PathBuf {
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join("Downloads"),
        Err(_) => PathBuf::from("."),
    }
}

/// The message a command without an explicit number falls back to, or the
/// entry a number names.
struct Target {
    id: RemoteId,
    subject: String,
    starred: bool,
    seen: bool,
}

impl From<&MessageSummary> for Target {
    fn from(s: &MessageSummary) -> Self {
        Target {
            id: s.remote_id,
            subject: s.subject.clone(),
            starred: s.flags.starred,
            seen: s.flags.seen,
        }
    }
}

fn session(conn: &mut Option<ConnectionManager>) -> Result<&mut ConnectionManager> {
    conn.as_mut().ok_or_else(|| {
        MailError::State("no account configured; restart tmail to run setup".to_string())
    })
}

pub struct Engine {
    conn: Option<ConnectionManager>,
    folders: FolderDirectory,
    window: MessageWindow,
    open: Option<OpenMessage>,
    mode: Mode,
    /// Mode to return to when composing ends.
    resume: Option<Mode>,
    view: View,
    page_size: u32,
    download_dir: PathBuf,
    submitter: Box<dyn Submitter>,
    writer: Box<dyn AttachmentWriter>,
}

impl Engine {
    /// `conn` is `None` when no account is configured.
    pub fn new(
        settings: EngineSettings,
        conn: Option<ConnectionManager>,
        submitter: Box<dyn Submitter>,
        writer: Box<dyn AttachmentWriter>,
    ) -> Self {
        let mode = if conn.is_some() {
            Mode::Connecting
        } else {
            Mode::NoAccount
        };
        Engine {
            conn,
            folders: FolderDirectory::new(settings.archive_folder),
            window: MessageWindow::new(),
            open: None,
            mode,
            resume: None,
            view: View::Folder,
            page_size: settings.page_size.max(1),
            download_dir: settings.download_dir,
            submitter,
            writer,
        }
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn open_message(&self) -> Option<&OpenMessage> {
        self.open.as_ref()
    }

    pub fn folders(&self) -> &FolderDirectory {
        &self.folders
    }

    pub fn window(&self) -> &MessageWindow {
        &self.window
    }

    pub fn account(&self) -> Option<&AccountConfig> {
        self.conn.as_ref().map(|c| c.account())
    }

    /// True once the remote session has ended in an unrecoverable state.
    pub fn session_failed(&self) -> bool {
        self.conn
            .as_ref()
            .is_some_and(|c| *c.state() == SessionState::Failed)
    }

    /// Log in, select the inbox and load its first page.
    pub fn start(&mut self) -> Result<Display> {
        let conn = session(&mut self.conn)?;
        self.mode = Mode::Connecting;
        conn.connect()?;
        self.folders.list_folders(conn)?;

        let start = self
            .folders
            .folders()
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case("INBOX"))
            .or_else(|| self.folders.folders().first())
            .map(|f| f.name.clone())
            .unwrap_or_else(|| "INBOX".to_string());
        let switched = self.folders.switch(conn, &start)?;
        let page = self
            .window
            .load_page(conn, &switched.folder, 1, self.page_size)?;

        self.view = View::Folder;
        self.mode = Mode::Browsing {
            folder: switched.folder,
            page: page.number,
        };
        Ok(Display::Page { page, notice: None })
    }

    /// The question to put to the user before `intent` runs, if it needs
    /// one. Fails when the message a delete names cannot be found.
    pub fn confirmation(&mut self, intent: &Intent) -> Result<Option<Display>> {
        if self.conn.is_none() || self.mode == Mode::Composing {
            return Ok(None);
        }
        match intent {
            Intent::Delete(n) => {
                self.current_folder()?;
                let target = self.target(*n)?;
                Ok(Some(Display::Confirm {
                    prompt: format!("Delete \"{}\"?", target.subject),
                    default: false,
                }))
            }
            Intent::Logout => {
                let email = self.account().map(|a| a.email.clone()).unwrap_or_default();
                Ok(Some(Display::Confirm {
                    prompt: format!("Log out of {}?", email),
                    default: true,
                }))
            }
            _ => Ok(None),
        }
    }

    pub fn handle(&mut self, intent: Intent) -> Result<Display> {
        match intent {
            Intent::Empty => return Ok(Display::Nothing),
            Intent::Invalid(e) => return Err(e),
            Intent::Help => return Ok(help()),
            Intent::Quit => return Ok(self.quit()),
            _ => {}
        }

        if self.mode == Mode::Composing {
            return Err(MailError::State(
                "a draft is being composed; finish or discard it first".to_string(),
            ));
        }
        if self.conn.is_none() {
            return match intent {
                Intent::Account => Err(MailError::NotFound("no account configured".to_string())),
                _ => Err(MailError::State(
                    "no account configured; restart tmail to run setup".to_string(),
                )),
            };
        }

        match intent {
            Intent::Inbox { page } => self.inbox(page),
            Intent::Read(n) | Intent::ReadByNumber(n) => self.read(n),
            Intent::Reply => self.reply(),
            Intent::Compose => self.compose(),
            Intent::Forward { to } => self.forward(&to),
            Intent::Search { text, scope } => self.search(text, scope),
            Intent::QuickSearch(text) => self.search(text, SearchScope::Both),
            Intent::Folders => self.list_folders(),
            Intent::Switch { folder } => self.switch(&folder),
            Intent::Star(n) => self.star(n),
            Intent::Delete(n) => self.remove(n, false),
            Intent::Archive(n) => self.remove(n, true),
            Intent::Save(n) => self.save(n),
            Intent::Account => self.show_account(),
            Intent::Logout => self.logout(),
            Intent::Refresh => self.refresh(),
            Intent::Empty | Intent::Invalid(_) | Intent::Help | Intent::Quit => {
                Ok(Display::Nothing)
            }
        }
    }

    fn current_folder(&self) -> Result<String> {
        self.folders
            .current()
            .map(str::to_string)
            .ok_or_else(|| MailError::State("no folder selected; try /folders".to_string()))
    }

    fn current_page(&self) -> u32 {
        self.window.page().map(|p| p.number).unwrap_or(1)
    }

    fn sender_address(&self) -> Result<String> {
        let account = self
            .account()
            .ok_or_else(|| MailError::State("no account configured".to_string()))?;
        Ok(Address::new(Some(account.display_name.as_str()), &account.email).to_string())
    }

    /// Leave Reading when the open message went away.
    fn close_open_message(&mut self, folder: &str) {
        self.open = None;
        if matches!(self.mode, Mode::Reading { .. }) {
            self.mode = Mode::Browsing {
                folder: folder.to_string(),
                page: self.current_page(),
            };
        }
    }

    /// Keep the Reading ordinal in line with the cached page after renumbering.
    fn sync_reading_ordinal(&mut self) {
        let Some(id) = self.open.as_ref().map(|m| m.remote_id) else {
            return;
        };
        let folder = match &self.mode {
            Mode::Reading { folder, .. } => folder.clone(),
            _ => return,
        };
        if self.view != View::Folder {
            return;
        }
        if let Some(page) = self.window.page() {
            if let Some(entry) = page.entries.iter().find(|e| e.remote_id == id) {
                self.mode = Mode::Reading {
                    folder,
                    page: page.number,
                    ordinal: entry.local_ordinal,
                };
            }
        }
    }

    fn inbox(&mut self, page: Option<u32>) -> Result<Display> {
        let conn = session(&mut self.conn)?;
        let current = self.folders.current().map(str::to_string);
        let folder = match current {
            Some(f) => f,
            None => self.folders.switch(conn, "INBOX")?.folder,
        };

        let page = self
            .window
            .load_page(conn, &folder, page.unwrap_or(1), self.page_size)?;
        self.window.clear_search();
        self.view = View::Folder;
        self.mode = Mode::Browsing {
            folder,
            page: page.number,
        };
        Ok(Display::Page { page, notice: None })
    }

    fn read(&mut self, n: usize) -> Result<Display> {
        let folder = self.current_folder()?;
        let conn = session(&mut self.conn)?;
        let (summary, advanced) = match self.view {
            View::Search => (self.window.resolve_search(n)?, false),
            View::Folder => {
                let resolved = self.window.resolve(conn, n)?;
                (resolved.summary, resolved.advanced)
            }
        };

        conn.ensure_selected(&folder)?;
        let message = conn.fetch_body(summary.remote_id)?.ok_or_else(|| {
            MailError::NotFound(format!(
                "message #{} no longer exists on the server; try /refresh",
                n
            ))
        })?;

        self.window.mark_seen(summary.remote_id);
        if !summary.flags.seen {
            self.folders.adjust_counts(&folder, 0, -1);
        }
        let ordinal = summary.local_ordinal;
        log::debug!("opened {} in {}", summary.remote_id, folder);
        self.open = Some(message.clone());
        self.mode = Mode::Reading {
            folder: folder.clone(),
            page: self.current_page(),
            ordinal,
        };
        Ok(Display::Message {
            folder,
            ordinal,
            advanced,
            message,
        })
    }

    fn begin_compose(&mut self, draft: Draft) -> Display {
        self.resume = Some(self.mode.clone());
        self.mode = Mode::Composing;
        Display::Compose { draft }
    }

    fn require_open(&self, command: &str) -> Result<&OpenMessage> {
        self.open.as_ref().ok_or_else(|| {
            MailError::State(format!(
                "no message open; use /read <n> before /{}",
                command
            ))
        })
    }

    fn reply(&mut self) -> Result<Display> {
        let from = self.sender_address()?;
        let draft = compose::build_reply_draft(self.require_open("reply")?, &from);
        Ok(self.begin_compose(draft))
    }

    fn forward(&mut self, to: &str) -> Result<Display> {
        let from = self.sender_address()?;
        let draft = compose::build_forward_draft(self.require_open("forward")?, &from, to);
        Ok(self.begin_compose(draft))
    }

    fn compose(&mut self) -> Result<Display> {
        let from = self.sender_address()?;
        Ok(self.begin_compose(compose::build_compose_draft(&from)))
    }

    /// End the composing exchange started by `/compose`, `/reply` or
    /// `/forward`. `None` discards the draft; otherwise the edited text is
    /// parsed and submitted. Either way the previous mode is restored.
    pub fn finish_compose(&mut self, edited: Option<&str>) -> Result<Display> {
        if self.mode != Mode::Composing {
            return Err(MailError::State("no draft in progress".to_string()));
        }
        let folder = self.folders.current().unwrap_or_default().to_string();
        self.mode = self.resume.take().unwrap_or(Mode::Browsing {
            folder,
            page: self.current_page(),
        });

        let Some(text) = edited else {
            return Ok(Display::notice("Draft discarded"));
        };
        let draft = Draft::parse(text)?;
        let outgoing = OutgoingMessage::from_draft(&draft, &self.sender_address()?)?;
        self.submitter.send(&outgoing)?;
        log::info!("sent '{}'", outgoing.subject);
        Ok(Display::Sent {
            subject: outgoing.subject,
            recipients: outgoing.to.len() + outgoing.cc.len(),
        })
    }

    fn search(&mut self, text: String, scope: SearchScope) -> Result<Display> {
        let folder = self.current_folder()?;
        let conn = session(&mut self.conn)?;
        let result = self
            .window
            .search(conn, &folder, SearchCriteria { text, scope })?;
        self.view = View::Search;
        self.mode = Mode::Browsing {
            folder,
            page: self.current_page(),
        };
        Ok(Display::Search { result })
    }

    fn list_folders(&mut self) -> Result<Display> {
        let conn = session(&mut self.conn)?;
        let folders = self.folders.list_folders(conn)?.to_vec();
        Ok(Display::Folders {
            folders,
            current: self.folders.current().map(str::to_string),
        })
    }

    fn switch(&mut self, query: &str) -> Result<Display> {
        let conn = session(&mut self.conn)?;
        let switched = self.folders.switch(conn, query)?;
        if !switched.changed {
            return Ok(Display::Switched {
                folder: switched.folder,
                status: switched.status,
                page: None,
            });
        }

        self.window.clear();
        self.open = None;
        self.view = View::Folder;
        self.mode = Mode::Browsing {
            folder: switched.folder.clone(),
            page: 1,
        };
        let page = self
            .window
            .load_page(conn, &switched.folder, 1, self.page_size)?;
        Ok(Display::Switched {
            folder: switched.folder,
            status: switched.status,
            page: Some(page),
        })
    }

    fn target(&mut self, n: Option<usize>) -> Result<Target> {
        match n {
            Some(n) => {
                let summary = match self.view {
                    View::Folder => self.window.entry(session(&mut self.conn)?, n)?,
                    View::Search => self.window.resolve_search(n)?,
                };
                Ok(Target::from(&summary))
            }
            None => {
                let open = self.open.as_ref().ok_or_else(|| {
                    MailError::State("no message open; give a message number".to_string())
                })?;
                Ok(Target {
                    id: open.remote_id,
                    subject: open.subject.clone(),
                    starred: open.flags.starred,
                    seen: open.flags.seen,
                })
            }
        }
    }

    fn apply(
        &mut self,
        folder: &str,
        n: Option<usize>,
        target: &Target,
        mutation: Mutation,
    ) -> Result<()> {
        let conn = session(&mut self.conn)?;
        match (n, self.view) {
            (Some(n), View::Folder) => {
                self.window.mutate(conn, n, mutation)?;
            }
            _ => {
                self.window
                    .mutate_by_id(conn, folder, target.id, mutation)?;
            }
        }
        Ok(())
    }

    fn star(&mut self, n: Option<usize>) -> Result<Display> {
        let folder = self.current_folder()?;
        let target = self.target(n)?;
        let mutation = if target.starred {
            Mutation::Unstar
        } else {
            Mutation::Star
        };
        self.apply(&folder, n, &target, mutation)?;

        if let Some(open) = self.open.as_mut().filter(|m| m.remote_id == target.id) {
            open.flags.starred = !target.starred;
        }
        let verb = if target.starred { "Unstarred" } else { "Starred" };
        Ok(Display::notice(format!("{}: {}", verb, target.subject)))
    }

    fn remove(&mut self, n: Option<usize>, archive: bool) -> Result<Display> {
        let folder = self.current_folder()?;
        let target = self.target(n)?;

        let mutation = if archive {
            if self.folders.folders().is_empty() {
                self.folders.list_folders(session(&mut self.conn)?)?;
            }
            let dest = self.folders.archive_target()?;
            if dest == folder {
                return Err(MailError::State(format!("message is already in {}", dest)));
            }
            Mutation::Archive(dest)
        } else {
            Mutation::Delete
        };
        self.apply(&folder, n, &target, mutation.clone())?;

        let unread = if target.seen { 0 } else { 1 };
        self.folders.adjust_counts(&folder, -1, -unread);
        if let Mutation::Archive(ref dest) = mutation {
            self.folders.adjust_counts(dest, 1, unread);
        }
        if self.open.as_ref().is_some_and(|m| m.remote_id == target.id) {
            self.close_open_message(&folder);
        } else {
            self.sync_reading_ordinal();
        }

        let text = match mutation {
            Mutation::Archive(dest) => format!("Archived to {}: {}", dest, target.subject),
            _ => format!("Deleted: {}", target.subject),
        };
        Ok(Display::notice(text))
    }

    fn save(&mut self, n: Option<usize>) -> Result<Display> {
        let folder = self.current_folder()?;
        let target = self.target(n)?;

        let message = match self.open.as_ref().filter(|m| m.remote_id == target.id) {
            Some(open) => open.clone(),
            None => {
                let conn = session(&mut self.conn)?;
                conn.ensure_selected(&folder)?;
                let message = conn.fetch_body(target.id)?.ok_or_else(|| {
                    MailError::NotFound(format!("'{}' no longer exists on the server", target.subject))
                })?;
                self.window.mark_seen(target.id);
                if !target.seen {
                    self.folders.adjust_counts(&folder, 0, -1);
                }
                message
            }
        };

        if message.attachments.is_empty() {
            return Err(MailError::NotFound(format!(
                "'{}' has no attachments",
                message.subject
            )));
        }
        let mut paths = Vec::with_capacity(message.attachments.len());
        for attachment in &message.attachments {
            paths.push(
                self.writer
                    .save(&attachment.bytes, &attachment.filename, &self.download_dir)?,
            );
        }
        Ok(Display::Saved { paths })
    }

    fn show_account(&self) -> Result<Display> {
        let account = self
            .account()
            .ok_or_else(|| MailError::NotFound("no account configured".to_string()))?;
        Ok(Display::Account {
            account: account.clone(),
        })
    }

    fn refresh(&mut self) -> Result<Display> {
        let folder = self.current_folder()?;
        let wanted = self.current_page();
        let conn = session(&mut self.conn)?;

        let page = match self.window.load_page(conn, &folder, wanted, self.page_size) {
            // The folder shrank below the page we were on.
            Err(MailError::NotFound(_)) if wanted > 1 => {
                let status = conn.select(&folder)?;
                let last = window::page_count(status.message_count, self.page_size);
                self.window.load_page(conn, &folder, last, self.page_size)?
            }
            other => other?,
        };
        self.window.clear_search();
        self.view = View::Folder;

        let mut notice = None;
        if let Some(id) = self.open.as_ref().map(|m| m.remote_id) {
            let current = conn.fetch_summaries(FetchSet::Ids(vec![id]))?;
            match current.first() {
                Some(summary) => {
                    if let Some(open) = self.open.as_mut() {
                        open.flags = summary.flags;
                    }
                }
                None => {
                    let subject = self
                        .open
                        .as_ref()
                        .map(|m| m.subject.clone())
                        .unwrap_or_default();
                    notice = Some(format!("'{}' was deleted on the server", subject));
                    self.close_open_message(&folder);
                }
            }
        }

        match self.mode {
            Mode::Reading { .. } => self.sync_reading_ordinal(),
            _ => {
                self.mode = Mode::Browsing {
                    folder,
                    page: page.number,
                }
            }
        }
        Ok(Display::Page { page, notice })
    }

    /// End the session for good. The front-end then forgets the returned
    /// account's stored password and config section.
    fn logout(&mut self) -> Result<Display> {
        let mut conn = self
            .conn
            .take()
            .ok_or_else(|| MailError::State("no account configured".to_string()))?;
        conn.disconnect();
        let account = conn.account().clone();

        self.window.clear();
        self.open = None;
        self.resume = None;
        self.view = View::Folder;
        self.mode = Mode::NoAccount;
        log::info!("logged out of {}", account.email);
        Ok(Display::LoggedOut { account })
    }

    fn quit(&mut self) -> Display {
        if let Some(conn) = self.conn.as_mut() {
            conn.disconnect();
        }
        Display::Quit
    }
}

fn help() -> Display {
    Display::Help {
        commands: COMMANDS
            .iter()
            .map(|c| HelpEntry {
                name: c.name,
                aliases: c.aliases,
                args: c.args,
                description: c.description,
            })
            .collect(),
    }
}
