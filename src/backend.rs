use crate::config::AccountConfig;
use crate::error::StoreError;
use crate::store::types::*;
use crate::store::{Connector, Hangup, MailStore};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

/// Requests sent from the session thread to the backend thread.
#[derive(Debug, Clone)]
pub enum StoreRequest {
    ListFolders,
    SelectFolder { name: String },
    FolderStatus { name: String },
    FetchSummaries(FetchSet),
    FetchBody { id: RemoteId },
    SetFlag { id: RemoteId, flag: Flag, value: bool },
    MoveTo { id: RemoteId, target: String },
    Expunge { id: RemoteId },
    Search(SearchCriteria),
    Logout,
    Shutdown,
}

/// Responses sent from the backend thread to the session thread.
#[derive(Debug)]
pub enum StoreReply {
    /// Login succeeded. Carries the handle that closes this session's
    /// transport, when the store has one.
    Connected(Option<Arc<dyn Hangup>>),
    Folders(Vec<Folder>),
    Status(FolderStatus),
    Summaries(Vec<MessageSummary>),
    Body(Box<Option<OpenMessage>>),
    Matches(Vec<RemoteId>),
    Done,
}

pub type BackendReply = Result<StoreReply, StoreError>;

/// Spawn the backend thread. It logs in first and reports the outcome as
/// its first reply, then serves requests until told to shut down or until
/// the request sender is dropped.
pub fn spawn(
    connector: Arc<dyn Connector>,
    account: AccountConfig,
    password: String,
) -> (mpsc::Sender<StoreRequest>, mpsc::Receiver<BackendReply>) {
    let (cmd_tx, cmd_rx) = mpsc::channel::<StoreRequest>();
    let (resp_tx, resp_rx) = mpsc::channel::<BackendReply>();

    thread::spawn(move || {
        let store = match connector.connect(&account, &password) {
            Ok(store) => {
                let _ = resp_tx.send(Ok(StoreReply::Connected(store.hangup())));
                store
            }
            Err(e) => {
                let _ = resp_tx.send(Err(e));
                return;
            }
        };
        backend_loop(store, cmd_rx, resp_tx);
    });

    (cmd_tx, resp_rx)
}

fn backend_loop(
    mut store: Box<dyn MailStore>,
    cmd_rx: mpsc::Receiver<StoreRequest>,
    resp_tx: mpsc::Sender<BackendReply>,
) {
    while let Ok(cmd) = cmd_rx.recv() {
        let reply = match cmd {
            StoreRequest::ListFolders => store.list_folders().map(StoreReply::Folders),
            StoreRequest::SelectFolder { name } => {
                store.select_folder(&name).map(StoreReply::Status)
            }
            StoreRequest::FolderStatus { name } => {
                store.folder_status(&name).map(StoreReply::Status)
            }
            StoreRequest::FetchSummaries(set) => {
                store.fetch_summaries(&set).map(StoreReply::Summaries)
            }
            StoreRequest::FetchBody { id } => store
                .fetch_body(id)
                .map(|body| StoreReply::Body(Box::new(body))),
            StoreRequest::SetFlag { id, flag, value } => {
                store.set_flag(id, flag, value).map(|_| StoreReply::Done)
            }
            StoreRequest::MoveTo { id, target } => {
                store.move_to(id, &target).map(|_| StoreReply::Done)
            }
            StoreRequest::Expunge { id } => store.expunge(id).map(|_| StoreReply::Done),
            StoreRequest::Search(criteria) => store.search(&criteria).map(StoreReply::Matches),
            StoreRequest::Logout => store.logout().map(|_| StoreReply::Done),
            StoreRequest::Shutdown => {
                break;
            }
        };
        if let Err(ref e) = reply {
            log::debug!("backend request failed: {}", e);
        }
        if resp_tx.send(reply).is_err() {
            // Session abandoned this worker.
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{MemoryConnector, StoredMessage};

    fn account() -> AccountConfig {
        AccountConfig::new("test", "me@example.com", "imap.example.com")
    }

    #[test]
    fn test_connect_reply_comes_first() {
        let remote = MemoryConnector::new();
        remote.add_folder("INBOX", Some("/"));
        remote.add_message("INBOX", StoredMessage::new("hello", "a@example.com"));

        let (tx, rx) = spawn(Arc::new(remote.clone()), account(), "pw".to_string());
        assert!(matches!(rx.recv().unwrap(), Ok(StoreReply::Connected(Some(_)))));

        tx.send(StoreRequest::SelectFolder {
            name: "INBOX".to_string(),
        })
        .unwrap();
        match rx.recv().unwrap() {
            Ok(StoreReply::Status(status)) => assert_eq!(status.message_count, 1),
            other => panic!("unexpected reply: {:?}", other),
        }

        tx.send(StoreRequest::Shutdown).unwrap();
        assert!(rx.recv().is_err());
    }

    #[test]
    fn test_login_failure_ends_worker() {
        let remote = MemoryConnector::new();
        remote.reject_logins(true);

        let (_tx, rx) = spawn(Arc::new(remote), account(), "wrong".to_string());
        assert!(matches!(rx.recv().unwrap(), Err(StoreError::Auth(_))));
        assert!(rx.recv().is_err());
    }
}
