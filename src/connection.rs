use crate::backend::{self, BackendReply, StoreReply, StoreRequest};
use crate::config::AccountConfig;
use crate::error::{MailError, Result, StoreError};
use crate::store::types::*;
use crate::store::{Connector, Hangup};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How often a waiting request checks the interrupt flag.
const POLL_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticated,
    Selected(String),
    Disconnected,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconnect {
    AlreadyConnected,
    Reconnected,
}

struct Worker {
    tx: mpsc::Sender<StoreRequest>,
    rx: mpsc::Receiver<BackendReply>,
    hangup: Option<Arc<dyn Hangup>>,
}

enum Failure {
    Store(StoreError),
    Cancelled,
}

/// Owns the single live session with the remote store.
pub struct ConnectionManager {
    account: AccountConfig,
    connector: Arc<dyn Connector>,
    password: String,
    timeout: Duration,
    interrupt: Arc<AtomicBool>,
    worker: Option<Worker>,
    state: SessionState,
    selected: Option<String>,
    closed: bool,
    /// Requests given up on while the worker was still running them.
    abandoned: u64,
}

impl ConnectionManager {
    pub fn new(
        account: AccountConfig,
        connector: Arc<dyn Connector>,
        password: String,
        timeout: Duration,
        interrupt: Arc<AtomicBool>,
    ) -> Self {
        ConnectionManager {
            account,
            connector,
            password,
            timeout,
            interrupt,
            worker: None,
            state: SessionState::Connecting,
            selected: None,
            closed: false,
            abandoned: 0,
        }
    }

    pub fn account(&self) -> &AccountConfig {
        &self.account
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Number of requests abandoned in flight so far. A change across a
    /// call means the server may have applied a request whose outcome was
    /// never seen.
    pub fn abandoned_requests(&self) -> u64 {
        self.abandoned
    }

    /// Folder the remote session has selected, if any.
    pub fn selected_folder(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn connect(&mut self) -> Result<()> {
        self.interrupt.store(false, Ordering::SeqCst);
        self.open().map_err(|f| self.surface(f))
    }

    pub fn ensure_connected(&mut self) -> Result<Reconnect> {
        if self.state == SessionState::Failed {
            return Err(MailError::State(
                "session has failed; restart to log in again".to_string(),
            ));
        }
        if self.closed {
            return Err(MailError::State("session is closed".to_string()));
        }
        if self.worker.is_some() {
            return Ok(Reconnect::AlreadyConnected);
        }
        log::info!("reconnecting to {}", self.account.imap_host);
        self.open().map_err(|f| self.surface(f))?;
        Ok(Reconnect::Reconnected)
    }

    /// Run one request, reconnecting and retrying once if it fails
    /// transiently. Authentication failures end the session.
    pub fn execute(&mut self, req: StoreRequest) -> Result<StoreReply> {
        self.interrupt.store(false, Ordering::SeqCst);
        self.ensure_connected()?;

        match self.round_trip(&req) {
            Ok(reply) => Ok(reply),
            Err(Failure::Store(e)) if e.is_transient() => {
                log::warn!("{:?} failed ({}), reconnecting once", req, e);
                if matches!(e, StoreError::Timeout(_)) {
                    self.abandon_in_flight();
                } else {
                    self.abandon();
                }
                self.open().map_err(|f| self.surface(f))?;
                self.round_trip(&req).map_err(|f| self.surface(f))
            }
            Err(f) => Err(self.surface(f)),
        }
    }

    /// Log out and stop the worker. The session cannot be used afterwards.
    pub fn disconnect(&mut self) {
        if self.worker.is_some() {
            if let Err(Failure::Store(e)) = self.round_trip(&StoreRequest::Logout) {
                log::warn!("logout failed: {}", e);
            }
            if let Some(worker) = self.worker.take() {
                let _ = worker.tx.send(StoreRequest::Shutdown);
            }
        }
        self.selected = None;
        self.closed = true;
        self.state = SessionState::Disconnected;
    }

    fn open(&mut self) -> std::result::Result<(), Failure> {
        self.state = SessionState::Connecting;
        let (tx, rx) = backend::spawn(
            Arc::clone(&self.connector),
            self.account.clone(),
            self.password.clone(),
        );
        let hangup = match self.wait(&rx)? {
            StoreReply::Connected(hangup) => hangup,
            other => {
                return Err(Failure::Store(unexpected(other)));
            }
        };
        self.worker = Some(Worker { tx, rx, hangup });
        self.state = SessionState::Authenticated;
        log::info!("session established for {}", self.account.email);

        if let Some(folder) = self.selected.clone() {
            let req = StoreRequest::SelectFolder {
                name: folder.clone(),
            };
            self.round_trip(&req)?;
            self.state = SessionState::Selected(folder);
        }
        Ok(())
    }

    fn round_trip(&mut self, req: &StoreRequest) -> std::result::Result<StoreReply, Failure> {
        let Some(worker) = self.worker.as_ref() else {
            return Err(Failure::Store(StoreError::Network(
                "not connected".to_string(),
            )));
        };
        if worker.tx.send(req.clone()).is_err() {
            return Err(Failure::Store(StoreError::Network(
                "backend worker exited".to_string(),
            )));
        }
        let reply = self.wait(&worker.rx)?;
        if let StoreRequest::SelectFolder { name } = req {
            self.selected = Some(name.clone());
            self.state = SessionState::Selected(name.clone());
        }
        Ok(reply)
    }

    fn wait(&self, rx: &mpsc::Receiver<BackendReply>) -> std::result::Result<StoreReply, Failure> {
        let started = Instant::now();
        loop {
            if self.interrupt.swap(false, Ordering::SeqCst) {
                return Err(Failure::Cancelled);
            }
            match rx.recv_timeout(POLL_SLICE) {
                Ok(reply) => return reply.map_err(Failure::Store),
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if started.elapsed() >= self.timeout {
                        return Err(Failure::Store(StoreError::Timeout(
                            self.timeout.as_secs().max(1),
                        )));
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(Failure::Store(StoreError::Network(
                        "backend worker exited".to_string(),
                    )))
                }
            }
        }
    }

    /// Drop the current worker without waiting for it, closing its
    /// transport so it stops blocking on the network.
    fn abandon(&mut self) {
        if let Some(hangup) = self.worker.take().and_then(|w| w.hangup) {
            hangup.hang_up();
        }
        if self.state != SessionState::Failed {
            self.state = SessionState::Disconnected;
        }
    }

    fn abandon_in_flight(&mut self) {
        self.abandoned += 1;
        self.abandon();
    }

    fn surface(&mut self, failure: Failure) -> MailError {
        match failure {
            Failure::Cancelled => {
                log::info!("request cancelled by user");
                self.abandon_in_flight();
                MailError::Cancelled
            }
            Failure::Store(StoreError::Auth(msg)) => {
                log::error!("authentication failed: {}", msg);
                self.abandon();
                self.state = SessionState::Failed;
                MailError::Auth(msg)
            }
            Failure::Store(e) => {
                if matches!(e, StoreError::Timeout(_)) {
                    self.abandon_in_flight();
                } else if e.is_transient() {
                    self.abandon();
                }
                e.into()
            }
        }
    }

    pub fn list_folders(&mut self) -> Result<Vec<Folder>> {
        match self.execute(StoreRequest::ListFolders)? {
            StoreReply::Folders(folders) => Ok(folders),
            other => Err(unexpected(other).into()),
        }
    }

    /// Select `name`. When the server rejects the selection, the previous
    /// folder is selected again so the remote selection stays known.
    pub fn select(&mut self, name: &str) -> Result<FolderStatus> {
        let previous = self.selected.clone();
        match self.execute(StoreRequest::SelectFolder {
            name: name.to_string(),
        }) {
            Ok(StoreReply::Status(status)) => Ok(status),
            Ok(other) => Err(unexpected(other).into()),
            Err(MailError::Protocol(msg)) => {
                self.selected = None;
                self.state = SessionState::Authenticated;
                if let Some(prev) = previous {
                    if let Err(e) = self.execute(StoreRequest::SelectFolder { name: prev.clone() }) {
                        log::warn!("could not reselect {}: {}", prev, e);
                    }
                }
                Err(MailError::Protocol(msg))
            }
            Err(e) => Err(e),
        }
    }

    /// Select `name` unless it already is the selected folder.
    pub fn ensure_selected(&mut self, name: &str) -> Result<()> {
        self.ensure_connected()?;
        if self.selected.as_deref() != Some(name) {
            self.select(name)?;
        }
        Ok(())
    }

    pub fn folder_status(&mut self, name: &str) -> Result<FolderStatus> {
        match self.execute(StoreRequest::FolderStatus {
            name: name.to_string(),
        })? {
            StoreReply::Status(status) => Ok(status),
            other => Err(unexpected(other).into()),
        }
    }

    pub fn fetch_summaries(&mut self, set: FetchSet) -> Result<Vec<MessageSummary>> {
        match self.execute(StoreRequest::FetchSummaries(set))? {
            StoreReply::Summaries(summaries) => Ok(summaries),
            other => Err(unexpected(other).into()),
        }
    }

    pub fn fetch_body(&mut self, id: RemoteId) -> Result<Option<OpenMessage>> {
        match self.execute(StoreRequest::FetchBody { id })? {
            StoreReply::Body(body) => Ok(*body),
            other => Err(unexpected(other).into()),
        }
    }

    pub fn set_flag(&mut self, id: RemoteId, flag: Flag, value: bool) -> Result<()> {
        self.expect_done(StoreRequest::SetFlag { id, flag, value })
    }

    pub fn move_to(&mut self, id: RemoteId, target: &str) -> Result<()> {
        self.expect_done(StoreRequest::MoveTo {
            id,
            target: target.to_string(),
        })
    }

    pub fn expunge(&mut self, id: RemoteId) -> Result<()> {
        self.expect_done(StoreRequest::Expunge { id })
    }

    pub fn search(&mut self, criteria: SearchCriteria) -> Result<Vec<RemoteId>> {
        match self.execute(StoreRequest::Search(criteria))? {
            StoreReply::Matches(ids) => Ok(ids),
            other => Err(unexpected(other).into()),
        }
    }

    fn expect_done(&mut self, req: StoreRequest) -> Result<()> {
        match self.execute(req)? {
            StoreReply::Done => Ok(()),
            other => Err(unexpected(other).into()),
        }
    }
}

fn unexpected(reply: StoreReply) -> StoreError {
    StoreError::Protocol(format!("unexpected response from backend: {:?}", reply))
}
