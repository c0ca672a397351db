//! [`MailStore`] over IMAP, using `async-imap` driven to completion on the
//! calling thread.

use super::parse;
use super::types::*;
use super::{Connector, Hangup, MailStore};
use crate::config::AccountConfig;
use crate::error::StoreError;
use async_imap::types::{Fetch, Flag as ImapFlag};
use async_imap::Session;
use async_native_tls::TlsConnector;
use futures::executor::block_on;
use futures::io::{AsyncRead, AsyncWrite};
use futures::TryStreamExt;
use std::fmt;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

type AsyncTcpStream = async_io::Async<TcpStream>;

/// Capabilities that decide how messages are removed from a folder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ServerSupport {
    /// `UID EXPUNGE` (RFC 4315).
    uidplus: bool,
    /// `UID MOVE` (RFC 6851).
    can_move: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Removal {
    /// Expunge only the given uid.
    UidExpunge,
    /// Expunge every message flagged `\Deleted` in the folder.
    FolderExpunge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relocation {
    UidMove,
    CopyThenRemove(Removal),
}

impl ServerSupport {
    fn removal(self) -> Removal {
        if self.uidplus {
            Removal::UidExpunge
        } else {
            Removal::FolderExpunge
        }
    }

    fn relocation(self) -> Relocation {
        if self.can_move {
            Relocation::UidMove
        } else {
            Relocation::CopyThenRemove(self.removal())
        }
    }
}

/// A second handle on the session's socket, used to shut it down while
/// the worker is blocked in a request.
#[derive(Debug)]
struct SocketHangup(TcpStream);

impl Hangup for SocketHangup {
    fn hang_up(&self) {
        if let Err(e) = self.0.shutdown(Shutdown::Both) {
            log::debug!("socket shutdown failed: {}", e);
        }
    }
}

pub struct ImapConnector {
    connect_timeout: Duration,
}

impl ImapConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        ImapConnector { connect_timeout }
    }

    fn open_tcp(&self, host: &str, port: u16) -> Result<(AsyncTcpStream, TcpStream), StoreError> {
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|e| StoreError::Network(format!("cannot resolve {}: {}", host, e)))?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    let socket = stream.try_clone().map_err(net_err)?;
                    stream.set_nonblocking(true).map_err(net_err)?;
                    return Ok((async_io::Async::new(stream).map_err(net_err)?, socket));
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(match last_err {
            Some(e) => StoreError::Network(format!("cannot connect to {}:{}: {}", host, port, e)),
            None => StoreError::Network(format!("no addresses found for {}", host)),
        })
    }
}

impl Connector for ImapConnector {
    fn connect(
        &self,
        account: &AccountConfig,
        password: &str,
    ) -> Result<Box<dyn MailStore>, StoreError> {
        log::info!(
            "connecting to {}:{} (tls: {})",
            account.imap_host,
            account.imap_port,
            account.use_tls
        );
        let (tcp, socket) = self.open_tcp(&account.imap_host, account.imap_port)?;
        let hangup = Arc::new(SocketHangup(socket));

        if account.use_tls {
            let tls = block_on(TlsConnector::new().connect(&account.imap_host, tcp))
                .map_err(|e| StoreError::Network(format!("TLS handshake failed: {}", e)))?;
            let store = ImapStore::login(tls, &account.email, password, hangup)?;
            Ok(Box::new(store) as Box<dyn MailStore>)
        } else {
            let store = ImapStore::login(tcp, &account.email, password, hangup)?;
            Ok(Box::new(store))
        }
    }
}

/// One authenticated IMAP session.
pub struct ImapStore<T>
where
    T: AsyncRead + AsyncWrite + Unpin + fmt::Debug + Send,
{
    session: Session<T>,
    hangup: Arc<SocketHangup>,
    support: ServerSupport,
}

impl<T> ImapStore<T>
where
    T: AsyncRead + AsyncWrite + Unpin + fmt::Debug + Send,
{
    fn login(
        stream: T,
        user: &str,
        password: &str,
        hangup: Arc<SocketHangup>,
    ) -> Result<Self, StoreError> {
        let client = async_imap::Client::new(stream);
        let mut session = block_on(client.login(user, password)).map_err(|(e, _)| match e {
            async_imap::error::Error::No(msg) | async_imap::error::Error::Bad(msg) => {
                StoreError::Auth(msg)
            }
            other => imap_err(other),
        })?;
        log::info!("logged in as {}", user);

        let support = match block_on(session.capabilities()) {
            Ok(caps) => ServerSupport {
                uidplus: caps.has_str("UIDPLUS"),
                can_move: caps.has_str("MOVE"),
            },
            Err(e) => {
                log::warn!("CAPABILITY failed: {}", e);
                ServerSupport::default()
            }
        };
        log::debug!("server support: {:?}", support);
        Ok(ImapStore {
            session,
            hangup,
            support,
        })
    }

    fn fetch_stream(
        &mut self,
        set: &str,
        query: &str,
        by_uid: bool,
    ) -> Result<Vec<Fetch>, StoreError> {
        block_on(async {
            let fetched: Vec<Fetch> = if by_uid {
                self.session.uid_fetch(set, query).await?.try_collect().await?
            } else {
                self.session.fetch(set, query).await?.try_collect().await?
            };
            Ok::<_, async_imap::error::Error>(fetched)
        })
        .map_err(imap_err)
    }

    fn store_flag(&mut self, id: RemoteId, flag: Flag, value: bool) -> Result<(), StoreError> {
        let op = format!("{}FLAGS.SILENT ({})", if value { "+" } else { "-" }, flag.imap_name());
        block_on(async {
            let updates: Vec<Fetch> = self
                .session
                .uid_store(id.to_string(), &op)
                .await?
                .try_collect()
                .await?;
            Ok::<_, async_imap::error::Error>(updates)
        })
        .map_err(imap_err)?;
        Ok(())
    }
}

impl<T> MailStore for ImapStore<T>
where
    T: AsyncRead + AsyncWrite + Unpin + fmt::Debug + Send,
{
    fn list_folders(&mut self) -> Result<Vec<Folder>, StoreError> {
        let names = block_on(async {
            let names: Vec<_> = self
                .session
                .list(Some(""), Some("*"))
                .await?
                .try_collect()
                .await?;
            Ok::<_, async_imap::error::Error>(names)
        })
        .map_err(imap_err)?;

        let mut folders = Vec::with_capacity(names.len());
        for name in &names {
            let selectable = !name
                .attributes()
                .iter()
                .any(|a| matches!(a, async_imap::types::NameAttribute::NoSelect));
            if !selectable {
                continue;
            }
            let mut folder = Folder::new(name.name(), name.delimiter());
            match self.folder_status(name.name()) {
                Ok(status) => {
                    folder.message_count = status.message_count;
                    folder.unread_count = status.unread_count;
                }
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => log::warn!("STATUS {} failed: {}", name.name(), e),
            }
            folders.push(folder);
        }
        Ok(folders)
    }

    fn select_folder(&mut self, name: &str) -> Result<FolderStatus, StoreError> {
        let mailbox = block_on(self.session.select(name)).map_err(imap_err)?;
        let unseen = block_on(self.session.search("UNSEEN")).map_err(imap_err)?;
        Ok(FolderStatus {
            message_count: mailbox.exists,
            unread_count: unseen.len() as u32,
        })
    }

    fn folder_status(&mut self, name: &str) -> Result<FolderStatus, StoreError> {
        let mailbox = block_on(self.session.status(name, "(MESSAGES UNSEEN)")).map_err(imap_err)?;
        Ok(FolderStatus {
            message_count: mailbox.exists,
            unread_count: mailbox.unseen.unwrap_or(0),
        })
    }

    fn fetch_summaries(&mut self, set: &FetchSet) -> Result<Vec<MessageSummary>, StoreError> {
        const QUERY: &str = "(UID FLAGS BODY.PEEK[HEADER])";
        let mut fetched = match set {
            FetchSet::Sequence { start, end } if start > end || *start == 0 => return Ok(Vec::new()),
            FetchSet::Sequence { start, end } => {
                let mut fetched = self.fetch_stream(&format!("{}:{}", start, end), QUERY, false)?;
                fetched.sort_by_key(|f| f.message);
                fetched
            }
            FetchSet::Ids(ids) if ids.is_empty() => return Ok(Vec::new()),
            FetchSet::Ids(ids) => {
                let set = ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(",");
                let mut fetched = self.fetch_stream(&set, QUERY, true)?;
                fetched.sort_by_key(|f| {
                    f.uid
                        .and_then(|uid| ids.iter().position(|id| id.0 == uid))
                        .unwrap_or(usize::MAX)
                });
                fetched
            }
        };

        Ok(fetched
            .drain(..)
            .filter_map(|f| {
                let uid = f.uid?;
                let header = f.header().unwrap_or_default();
                Some(parse::summary_from_header(RemoteId(uid), header, flags_of(&f)))
            })
            .collect())
    }

    fn fetch_body(&mut self, id: RemoteId) -> Result<Option<OpenMessage>, StoreError> {
        let fetched = self.fetch_stream(&id.to_string(), "(UID FLAGS BODY[])", true)?;
        let Some(f) = fetched.iter().find(|f| f.uid == Some(id.0)) else {
            return Ok(None);
        };
        let Some(raw) = f.body() else {
            return Ok(None);
        };
        let mut flags = flags_of(f);
        flags.seen = true;
        parse::open_message(id, raw, flags)
            .map(Some)
            .ok_or_else(|| StoreError::Protocol(format!("message {} could not be decoded", id)))
    }

    fn set_flag(&mut self, id: RemoteId, flag: Flag, value: bool) -> Result<(), StoreError> {
        self.store_flag(id, flag, value)
    }

    fn move_to(&mut self, id: RemoteId, target_folder: &str) -> Result<(), StoreError> {
        match self.support.relocation() {
            Relocation::UidMove => {
                block_on(self.session.uid_mv(id.to_string(), target_folder)).map_err(imap_err)
            }
            Relocation::CopyThenRemove(_) => {
                log::warn!("server lacks MOVE; copying {} to {} and expunging", id, target_folder);
                block_on(self.session.uid_copy(id.to_string(), target_folder)).map_err(imap_err)?;
                self.expunge(id)
            }
        }
    }

    fn expunge(&mut self, id: RemoteId) -> Result<(), StoreError> {
        self.store_flag(id, Flag::Deleted, true)?;
        let removal = self.support.removal();
        if removal == Removal::FolderExpunge {
            log::warn!(
                "server lacks UIDPLUS; plain EXPUNGE also removes other messages marked deleted"
            );
        }
        block_on(async {
            let removed: Vec<u32> = match removal {
                Removal::UidExpunge => {
                    self.session
                        .uid_expunge(id.to_string())
                        .await?
                        .try_collect()
                        .await?
                }
                Removal::FolderExpunge => self.session.expunge().await?.try_collect().await?,
            };
            Ok::<_, async_imap::error::Error>(removed)
        })
        .map_err(imap_err)?;
        Ok(())
    }

    fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<RemoteId>, StoreError> {
        let uids = block_on(self.session.uid_search(criteria.to_imap_query())).map_err(imap_err)?;
        let mut ids: Vec<RemoteId> = uids.into_iter().map(RemoteId).collect();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        Ok(ids)
    }

    fn logout(&mut self) -> Result<(), StoreError> {
        block_on(self.session.logout()).map_err(imap_err)
    }

    fn hangup(&self) -> Option<Arc<dyn Hangup>> {
        Some(self.hangup.clone())
    }
}

fn flags_of(fetch: &Fetch) -> Flags {
    let mut flags = Flags::default();
    for flag in fetch.flags() {
        match flag {
            ImapFlag::Seen => flags.seen = true,
            ImapFlag::Flagged => flags.starred = true,
            ImapFlag::Answered => flags.answered = true,
            _ => {}
        }
    }
    flags
}

fn net_err(e: std::io::Error) -> StoreError {
    StoreError::Network(e.to_string())
}

fn imap_err(e: async_imap::error::Error) -> StoreError {
    use async_imap::error::Error;
    match e {
        Error::Io(e) => StoreError::Network(e.to_string()),
        Error::ConnectionLost => StoreError::Network("connection lost".to_string()),
        Error::No(msg) | Error::Bad(msg) => StoreError::Protocol(msg),
        other => StoreError::Protocol(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removal_targets_one_uid_when_supported() {
        let full = ServerSupport {
            uidplus: true,
            can_move: true,
        };
        assert_eq!(full.removal(), Removal::UidExpunge);
        assert_eq!(full.relocation(), Relocation::UidMove);

        let uidplus_only = ServerSupport {
            uidplus: true,
            can_move: false,
        };
        assert_eq!(
            uidplus_only.relocation(),
            Relocation::CopyThenRemove(Removal::UidExpunge)
        );
    }

    #[test]
    fn test_folder_expunge_only_without_uidplus() {
        let bare = ServerSupport::default();
        assert_eq!(bare.removal(), Removal::FolderExpunge);
        assert_eq!(
            bare.relocation(),
            Relocation::CopyThenRemove(Removal::FolderExpunge)
        );

        let move_only = ServerSupport {
            uidplus: false,
            can_move: true,
        };
        assert_eq!(move_only.relocation(), Relocation::UidMove);
    }

    #[test]
    fn test_hangup_shuts_down_socket() {
        use std::io::Read;
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (_server, _) = listener.accept().unwrap();

        let hangup = SocketHangup(client.try_clone().unwrap());
        hangup.hang_up();

        let mut reader = client;
        let mut buf = [0u8; 1];
        // A shut-down socket reads end-of-stream instead of blocking.
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }
}
