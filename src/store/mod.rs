pub mod imap;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod parse;
pub mod types;

use crate::config::AccountConfig;
use crate::error::StoreError;
use std::fmt;
use std::sync::Arc;
use types::*;

/// Closes a session's transport from another thread, so a worker blocked
/// on the network returns instead of waiting for the server.
pub trait Hangup: fmt::Debug + Send + Sync {
    fn hang_up(&self);
}

/// Operations the session engine needs from a mail-access protocol client.
///
/// Sequence numbers in [`FetchSet::Sequence`] refer to the currently
/// selected folder. Summaries come back in ascending sequence order for
/// ranges and in request order for id sets; ids that no longer exist are
/// silently absent.
pub trait MailStore {
    fn list_folders(&mut self) -> Result<Vec<Folder>, StoreError>;
    fn select_folder(&mut self, name: &str) -> Result<FolderStatus, StoreError>;
    fn folder_status(&mut self, name: &str) -> Result<FolderStatus, StoreError>;
    fn fetch_summaries(&mut self, set: &FetchSet) -> Result<Vec<MessageSummary>, StoreError>;
    fn fetch_body(&mut self, id: RemoteId) -> Result<Option<OpenMessage>, StoreError>;
    fn set_flag(&mut self, id: RemoteId, flag: Flag, value: bool) -> Result<(), StoreError>;
    fn move_to(&mut self, id: RemoteId, target_folder: &str) -> Result<(), StoreError>;
    fn expunge(&mut self, id: RemoteId) -> Result<(), StoreError>;
    /// Matching ids, newest first.
    fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<RemoteId>, StoreError>;
    fn logout(&mut self) -> Result<(), StoreError>;

    fn hangup(&self) -> Option<Arc<dyn Hangup>> {
        None
    }
}

/// Opens authenticated [`MailStore`] sessions.
pub trait Connector: Send + Sync {
    fn connect(
        &self,
        account: &AccountConfig,
        password: &str,
    ) -> Result<Box<dyn MailStore>, StoreError>;
}
