use crate::connection::ConnectionManager;
use crate::error::{MailError, Result};
use crate::store::types::{Folder, FolderStatus};

/// Folders tried, in order, when no archive folder is configured.
pub const ARCHIVE_CANDIDATES: [&str; 3] = ["[Gmail]/All Mail", "Archive", "Archives"];

/// Outcome of a successful [`FolderDirectory::switch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Switched {
    pub folder: String,
    pub status: FolderStatus,
    /// False when the target already was the current folder.
    pub changed: bool,
}

/// Cached folder list and the folder the session is looking at.
#[derive(Debug, Default)]
pub struct FolderDirectory {
    folders: Vec<Folder>,
    current: Option<String>,
    archive_folder: Option<String>,
}

impl FolderDirectory {
    pub fn new(archive_folder: Option<String>) -> Self {
        FolderDirectory {
            folders: Vec::new(),
            current: None,
            archive_folder,
        }
    }

    pub fn folders(&self) -> &[Folder] {
        &self.folders
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn current_folder(&self) -> Option<&Folder> {
        let current = self.current.as_deref()?;
        self.folders.iter().find(|f| f.name == current)
    }

    /// Fetch the folder list with counts. The cache is only replaced on
    /// success.
    pub fn list_folders(&mut self, conn: &mut ConnectionManager) -> Result<&[Folder]> {
        let folders = conn.list_folders()?;
        log::debug!("listed {} folders", folders.len());
        self.folders = folders;
        Ok(&self.folders)
    }

    /// Make `query` the current folder. The current pointer only moves when
    /// the server accepted the selection.
    pub fn switch(&mut self, conn: &mut ConnectionManager, query: &str) -> Result<Switched> {
        if self.folders.is_empty() {
            self.list_folders(conn)?;
        }
        let name = self.resolve_name(query)?;

        if self.current.as_deref() == Some(name.as_str()) {
            let status = conn.folder_status(&name)?;
            self.update_counts(&name, status);
            return Ok(Switched {
                folder: name,
                status,
                changed: false,
            });
        }

        let status = conn.select(&name)?;
        log::info!("switched to {} ({} messages)", name, status.message_count);
        self.update_counts(&name, status);
        self.current = Some(name.clone());
        Ok(Switched {
            folder: name,
            status,
            changed: true,
        })
    }

    /// Map user input to a folder name: exact match, then case-insensitive
    /// match on name or display path, then a unique case-insensitive prefix.
    pub fn resolve_name(&self, query: &str) -> Result<String> {
        let query = query.trim();
        if query.is_empty() {
            return Err(MailError::NotFound("no folder name given".to_string()));
        }
        if self.folders.is_empty() {
            return Ok(query.to_string());
        }
        if let Some(f) = self.folders.iter().find(|f| f.name == query) {
            return Ok(f.name.clone());
        }

        let lower = query.to_lowercase();
        if let Some(f) = self
            .folders
            .iter()
            .find(|f| f.name.to_lowercase() == lower || f.display_path.to_lowercase() == lower)
        {
            return Ok(f.name.clone());
        }

        let candidates: Vec<&Folder> = self
            .folders
            .iter()
            .filter(|f| {
                f.name.to_lowercase().starts_with(&lower)
                    || f.display_path.to_lowercase().starts_with(&lower)
            })
            .collect();
        match candidates.as_slice() {
            [one] => Ok(one.name.clone()),
            [] => Err(MailError::NotFound(format!("folder '{}' not found", query))),
            many => Err(MailError::NotFound(format!(
                "folder '{}' is ambiguous: {}",
                query,
                many.iter()
                    .map(|f| f.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    /// Folder that archived messages are moved to.
    pub fn archive_target(&self) -> Result<String> {
        if let Some(ref configured) = self.archive_folder {
            let lower = configured.to_lowercase();
            return Ok(self
                .folders
                .iter()
                .find(|f| f.name.to_lowercase() == lower)
                .map(|f| f.name.clone())
                .unwrap_or_else(|| configured.clone()));
        }
        for candidate in ARCHIVE_CANDIDATES {
            let lower = candidate.to_lowercase();
            if let Some(f) = self.folders.iter().find(|f| f.name.to_lowercase() == lower) {
                return Ok(f.name.clone());
            }
        }
        Err(MailError::NotFound(
            "no archive folder found; set mail.archive_folder in the config".to_string(),
        ))
    }

    fn update_counts(&mut self, name: &str, status: FolderStatus) {
        if let Some(f) = self.folders.iter_mut().find(|f| f.name == name) {
            f.message_count = status.message_count;
            f.unread_count = status.unread_count;
        }
    }

    /// Record a count change caused by a local mutation.
    pub fn adjust_counts(&mut self, name: &str, messages: i64, unread: i64) {
        if let Some(f) = self.folders.iter_mut().find(|f| f.name == name) {
            f.message_count = (f.message_count as i64 + messages).max(0) as u32;
            f.unread_count = (f.unread_count as i64 + unread).max(0) as u32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccountConfig;
    use crate::store::memory::{MemoryConnector, StoredMessage};
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::time::Duration;

    fn setup(folders: &[&str]) -> (MemoryConnector, ConnectionManager) {
        let remote = MemoryConnector::new();
        for name in folders {
            remote.add_folder(name, Some("/"));
        }
        let mut conn = ConnectionManager::new(
            AccountConfig::new("test", "me@example.com", "imap.example.com"),
            Arc::new(remote.clone()),
            "pw".to_string(),
            Duration::from_secs(5),
            Arc::new(AtomicBool::new(false)),
        );
        conn.connect().unwrap();
        (remote, conn)
    }

    fn directory(names: &[&str]) -> FolderDirectory {
        let mut dir = FolderDirectory::new(None);
        dir.folders = names.iter().map(|n| Folder::new(n, Some("/"))).collect();
        dir
    }

    #[test]
    fn test_resolve_name_rules() {
        let dir = directory(&["INBOX", "[Gmail]/Sent Mail", "[Gmail]/Spam", "Work", "Work/Projects"]);
        assert_eq!(dir.resolve_name("INBOX").unwrap(), "INBOX");
        assert_eq!(dir.resolve_name("inbox").unwrap(), "INBOX");
        assert_eq!(dir.resolve_name("sent mail").unwrap(), "[Gmail]/Sent Mail");
        assert_eq!(dir.resolve_name("spa").unwrap(), "[Gmail]/Spam");
        assert_eq!(dir.resolve_name("work").unwrap(), "Work");

        match dir.resolve_name("[gmail]") {
            Err(MailError::NotFound(msg)) => {
                assert!(msg.contains("ambiguous"));
                assert!(msg.contains("[Gmail]/Sent Mail"));
            }
            other => panic!("expected ambiguity, got {:?}", other),
        }
        assert!(matches!(dir.resolve_name("Nowhere"), Err(MailError::NotFound(_))));
    }

    #[test]
    fn test_switch_and_failed_switch_keeps_current() {
        let (remote, mut conn) = setup(&["INBOX", "Archive"]);
        remote.add_message("INBOX", StoredMessage::new("a", "x@y.z"));
        let mut dir = FolderDirectory::new(None);

        let switched = dir.switch(&mut conn, "inbox").unwrap();
        assert!(switched.changed);
        assert_eq!(switched.status.message_count, 1);
        assert_eq!(dir.current(), Some("INBOX"));

        assert!(dir.switch(&mut conn, "Nope").is_err());
        assert_eq!(dir.current(), Some("INBOX"));
        assert_eq!(conn.selected_folder(), Some("INBOX"));
    }

    #[test]
    fn test_switch_to_current_refreshes_counts_only() {
        let (remote, mut conn) = setup(&["INBOX"]);
        let mut dir = FolderDirectory::new(None);
        dir.switch(&mut conn, "INBOX").unwrap();

        remote.add_message("INBOX", StoredMessage::new("new", "x@y.z"));
        let switched = dir.switch(&mut conn, "INBOX").unwrap();
        assert!(!switched.changed);
        assert_eq!(switched.status.message_count, 1);
        assert_eq!(dir.current_folder().unwrap().message_count, 1);
        assert!(remote.calls().contains(&"folder_status INBOX".to_string()));
    }

    #[test]
    fn test_archive_target() {
        let dir = directory(&["INBOX", "archives"]);
        assert_eq!(dir.archive_target().unwrap(), "archives");

        let dir = directory(&["INBOX", "[Gmail]/All Mail", "Archive"]);
        assert_eq!(dir.archive_target().unwrap(), "[Gmail]/All Mail");

        let dir = directory(&["INBOX"]);
        assert!(dir.archive_target().is_err());

        let mut dir = directory(&["INBOX", "Old"]);
        dir.archive_folder = Some("old".to_string());
        assert_eq!(dir.archive_target().unwrap(), "Old");
    }
}
