use crate::connection::ConnectionManager;
use crate::error::{MailError, Result};
use crate::store::types::*;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};

/// Most search hits kept in a [`SearchResult`].
pub const SEARCH_RESULT_CAP: usize = 50;

/// One newest-first page of a folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page {
    pub folder: String,
    pub number: u32,
    pub size: u32,
    /// Messages in the folder when the page was fetched.
    pub total: u32,
    pub entries: Vec<MessageSummary>,
}

impl Page {
    pub fn page_count(&self) -> u32 {
        page_count(self.total, self.size)
    }

    pub fn has_more(&self) -> bool {
        self.number < self.page_count()
    }
}

/// Hits of a search in one folder. Not kept in sync with the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    pub folder: String,
    pub query: String,
    pub scope: SearchScope,
    pub entries: Vec<MessageSummary>,
    pub total_matches: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Star,
    Unstar,
    Delete,
    /// Move to the named folder.
    Archive(String),
}

impl Mutation {
    fn removes(&self) -> bool {
        matches!(self, Mutation::Delete | Mutation::Archive(_))
    }
}

/// A resolved numeric reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub summary: MessageSummary,
    /// The reference ran one past a full page and the next page was loaded.
    pub advanced: bool,
}

#[derive(Debug, Default)]
struct WindowState {
    page: Option<Page>,
    search: Option<SearchResult>,
    /// A mutation was abandoned in flight, so the server may no longer
    /// match `page`.
    stale: bool,
}

/// Cached view of the current folder's messages.
#[derive(Debug, Default)]
pub struct MessageWindow {
    state: Mutex<WindowState>,
}

pub fn page_count(total: u32, size: u32) -> u32 {
    if total == 0 || size == 0 {
        1
    } else {
        total.div_ceil(size)
    }
}

/// Sequence numbers covered by page `page` (1-based) of a folder holding
/// `total` messages, newest first. `None` if the page is empty.
pub fn page_range(total: u32, page: u32, size: u32) -> Option<(u32, u32)> {
    if page == 0 || size == 0 {
        return None;
    }
    let skipped = (page - 1).checked_mul(size)?;
    if skipped >= total {
        return None;
    }
    let end = total - skipped;
    let start = end.saturating_sub(size) + 1;
    Some((start.max(1), end))
}

fn renumber(entries: &mut [MessageSummary]) {
    for (i, entry) in entries.iter_mut().enumerate() {
        entry.local_ordinal = i + 1;
    }
}

/// Re-fetch the cached page if it was marked stale, clamping to the last
/// page when the folder shrank. On failure the page stays stale.
fn reload_if_stale(conn: &mut ConnectionManager, state: &mut WindowState) -> Result<()> {
    if !state.stale {
        return Ok(());
    }
    if let Some(page) = state.page.as_ref() {
        let (folder, number, size) = (page.folder.clone(), page.number, page.size);
        let status = conn.select(&folder)?;
        let last = page_count(status.message_count, size);
        let fresh = fetch_page(conn, &folder, number.min(last), size)?;
        log::info!("reloaded {} page {} after an abandoned request", folder, fresh.number);
        state.page = Some(fresh);
    }
    state.stale = false;
    Ok(())
}

fn fetch_page(
    conn: &mut ConnectionManager,
    folder: &str,
    number: u32,
    size: u32,
) -> Result<Page> {
    if number == 0 {
        return Err(MailError::NotFound("pages start at 1".to_string()));
    }
    let status = conn.select(folder)?;
    let total = status.message_count;
    let pages = page_count(total, size);
    if number > pages {
        return Err(MailError::NotFound(format!(
            "page {} does not exist ({} has {} page{})",
            number,
            folder,
            pages,
            if pages == 1 { "" } else { "s" }
        )));
    }

    let mut entries = match page_range(total, number, size) {
        Some((start, end)) => conn.fetch_summaries(FetchSet::Sequence { start, end })?,
        None => Vec::new(),
    };
    entries.reverse();
    renumber(&mut entries);
    log::debug!(
        "loaded {} page {} ({} entries of {})",
        folder,
        number,
        entries.len(),
        total
    );

    Ok(Page {
        folder: folder.to_string(),
        number,
        size,
        total,
        entries,
    })
}

impl MessageWindow {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn page(&self) -> Option<Page> {
        self.lock().page.clone()
    }

    pub fn search_result(&self) -> Option<SearchResult> {
        self.lock().search.clone()
    }

    /// Forget everything, e.g. after leaving the folder.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.page = None;
        state.search = None;
        state.stale = false;
    }

    pub fn clear_search(&self) {
        self.lock().search = None;
    }

    /// Fetch page `number` of `folder` and make it the cached page. On any
    /// failure the previous page stays in place.
    pub fn load_page(
        &self,
        conn: &mut ConnectionManager,
        folder: &str,
        number: u32,
        size: u32,
    ) -> Result<Page> {
        let mut state = self.lock();
        let page = fetch_page(conn, folder, number, size)?;
        state.page = Some(page.clone());
        state.stale = false;
        Ok(page)
    }

    /// Resolve ordinal `n` of the cached page. One past the end of a full
    /// page with more messages remaining loads the next page and resolves
    /// its first entry.
    pub fn resolve(&self, conn: &mut ConnectionManager, n: usize) -> Result<Resolved> {
        let mut state = self.lock();
        reload_if_stale(conn, &mut state)?;
        let page = state
            .page
            .as_ref()
            .ok_or_else(|| MailError::State("no message list loaded; try /inbox".to_string()))?;

        if n >= 1 && n <= page.entries.len() {
            return Ok(Resolved {
                summary: page.entries[n - 1].clone(),
                advanced: false,
            });
        }

        let full = page.entries.len() as u32 == page.size;
        if n == page.entries.len() + 1 && full && page.has_more() {
            let (folder, next, size) = (page.folder.clone(), page.number + 1, page.size);
            let next_page = fetch_page(conn, &folder, next, size)?;
            let first = next_page.entries.first().cloned();
            state.page = Some(next_page);
            if let Some(summary) = first {
                return Ok(Resolved {
                    summary,
                    advanced: true,
                });
            }
            return Err(MailError::NotFound(format!("no message #{}", n)));
        }

        Err(out_of_range(n, page.entries.len()))
    }

    /// Entry `n` of the cached page. Nothing is loaded unless the page is
    /// stale.
    pub fn entry(&self, conn: &mut ConnectionManager, n: usize) -> Result<MessageSummary> {
        let mut state = self.lock();
        reload_if_stale(conn, &mut state)?;
        let page = state
            .page
            .as_ref()
            .ok_or_else(|| MailError::State("no message list loaded; try /inbox".to_string()))?;
        if n >= 1 && n <= page.entries.len() {
            Ok(page.entries[n - 1].clone())
        } else {
            Err(out_of_range(n, page.entries.len()))
        }
    }

    /// Resolve ordinal `n` of the last search result.
    pub fn resolve_search(&self, n: usize) -> Result<MessageSummary> {
        let state = self.lock();
        let search = state
            .search
            .as_ref()
            .ok_or_else(|| MailError::State("no search results".to_string()))?;
        if n >= 1 && n <= search.entries.len() {
            Ok(search.entries[n - 1].clone())
        } else {
            Err(out_of_range(n, search.entries.len()))
        }
    }

    /// Apply `mutation` to entry `n` of the cached page, remote first.
    pub fn mutate(
        &self,
        conn: &mut ConnectionManager,
        n: usize,
        mutation: Mutation,
    ) -> Result<MessageSummary> {
        let mut state = self.lock();
        reload_if_stale(conn, &mut state)?;
        let page = state
            .page
            .as_ref()
            .ok_or_else(|| MailError::State("no message list loaded; try /inbox".to_string()))?;
        if n == 0 || n > page.entries.len() {
            return Err(out_of_range(n, page.entries.len()));
        }
        let folder = page.folder.clone();
        let id = page.entries[n - 1].remote_id;

        apply_remote(conn, &mut state, &folder, id, &mutation)?;
        let summary = apply_local(&mut state, &folder, id, &mutation);
        settle(conn, &mut state);
        summary.ok_or_else(|| MailError::NotFound(format!("no message #{}", n)))
    }

    /// Apply `mutation` to message `id` of `folder`, remote first, then to
    /// whichever cached views contain it. `None` when no view listed it.
    pub fn mutate_by_id(
        &self,
        conn: &mut ConnectionManager,
        folder: &str,
        id: RemoteId,
        mutation: Mutation,
    ) -> Result<Option<MessageSummary>> {
        let mut state = self.lock();
        apply_remote(conn, &mut state, folder, id, &mutation)?;
        let summary = apply_local(&mut state, folder, id, &mutation);
        settle(conn, &mut state);
        Ok(summary)
    }

    /// Record that the server marked `id` as seen.
    pub fn mark_seen(&self, id: RemoteId) {
        let mut state = self.lock();
        let WindowState { page, search, .. } = &mut *state;
        let page_entries = page.iter_mut().flat_map(|p| p.entries.iter_mut());
        let search_entries = search.iter_mut().flat_map(|s| s.entries.iter_mut());
        for entry in page_entries.chain(search_entries) {
            if entry.remote_id == id {
                entry.flags.seen = true;
            }
        }
    }

    /// Search `folder` and keep the hits as the current search result. The
    /// cached page is left alone.
    pub fn search(
        &self,
        conn: &mut ConnectionManager,
        folder: &str,
        criteria: SearchCriteria,
    ) -> Result<SearchResult> {
        let mut state = self.lock();
        conn.ensure_selected(folder)?;
        let ids = conn.search(criteria.clone())?;
        let total_matches = ids.len();
        let kept: Vec<RemoteId> = ids.into_iter().take(SEARCH_RESULT_CAP).collect();

        let mut entries = if kept.is_empty() {
            Vec::new()
        } else {
            conn.fetch_summaries(FetchSet::Ids(kept.clone()))?
        };
        entries.sort_by_key(|e| kept.iter().position(|id| *id == e.remote_id));
        renumber(&mut entries);
        log::debug!(
            "search '{}' in {}: {} matches",
            criteria.text,
            folder,
            total_matches
        );

        let result = SearchResult {
            folder: folder.to_string(),
            query: criteria.text,
            scope: criteria.scope,
            entries,
            total_matches,
            truncated: total_matches > SEARCH_RESULT_CAP,
        };
        state.search = Some(result.clone());
        Ok(result)
    }
}

fn out_of_range(n: usize, len: usize) -> MailError {
    if len == 0 {
        MailError::NotFound(format!("no message #{}: the list is empty", n))
    } else {
        MailError::NotFound(format!("no message #{} (showing 1-{})", n, len))
    }
}

/// Run `mutation` on the server. When a request was abandoned on the way
/// (cancelled, or timed out and retried) the page is marked stale whatever
/// the outcome, since the server may have applied it.
fn apply_remote(
    conn: &mut ConnectionManager,
    state: &mut WindowState,
    folder: &str,
    id: RemoteId,
    mutation: &Mutation,
) -> Result<()> {
    let abandoned = conn.abandoned_requests();
    let outcome = conn.ensure_selected(folder).and_then(|()| match mutation {
        Mutation::Star => conn.set_flag(id, Flag::Starred, true),
        Mutation::Unstar => conn.set_flag(id, Flag::Starred, false),
        Mutation::Delete => conn.expunge(id),
        Mutation::Archive(target) => conn.move_to(id, target),
    });
    if conn.abandoned_requests() != abandoned {
        log::warn!("{:?} of {} was abandoned in flight; page is stale", mutation, id);
        state.stale = true;
    }
    outcome
}

/// After a successful mutation, replace a stale page with the server's view.
fn settle(conn: &mut ConnectionManager, state: &mut WindowState) {
    if let Err(e) = reload_if_stale(conn, state) {
        log::warn!("could not reload stale page: {}", e);
    }
}

/// Mirror a successful remote mutation in the cached views. Returns the
/// updated summary from whichever view held it.
fn apply_local(
    state: &mut WindowState,
    folder: &str,
    id: RemoteId,
    mutation: &Mutation,
) -> Option<MessageSummary> {
    let mut affected = None;

    if let Some(page) = state.page.as_mut().filter(|p| p.folder == folder) {
        affected = apply_to_entries(&mut page.entries, id, mutation);
        if affected.is_some() && mutation.removes() {
            page.total = page.total.saturating_sub(1);
        }
    }
    if let Some(search) = state.search.as_mut().filter(|s| s.folder == folder) {
        let hit = apply_to_entries(&mut search.entries, id, mutation);
        if affected.is_none() {
            affected = hit;
        }
    }
    affected
}

fn apply_to_entries(
    entries: &mut Vec<MessageSummary>,
    id: RemoteId,
    mutation: &Mutation,
) -> Option<MessageSummary> {
    let pos = entries.iter().position(|e| e.remote_id == id)?;
    match mutation {
        Mutation::Star | Mutation::Unstar => {
            entries[pos].flags.starred = *mutation == Mutation::Star;
            Some(entries[pos].clone())
        }
        Mutation::Delete | Mutation::Archive(_) => {
            let removed = entries.remove(pos);
            renumber(entries);
            Some(removed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccountConfig;
    use crate::error::StoreError;
    use crate::store::memory::{MemoryConnector, StoredMessage};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn setup(count: usize) -> (MemoryConnector, ConnectionManager, Vec<RemoteId>) {
        let (remote, conn, ids, _) = setup_interruptible(count);
        (remote, conn, ids)
    }

    fn setup_interruptible(
        count: usize,
    ) -> (MemoryConnector, ConnectionManager, Vec<RemoteId>, Arc<AtomicBool>) {
        let remote = MemoryConnector::new();
        remote.add_folder("INBOX", Some("/"));
        remote.add_folder("Archive", Some("/"));
        let ids = (1..=count)
            .map(|i| remote.add_message("INBOX", StoredMessage::new(&format!("m{}", i), "a@x.com")))
            .collect();
        let interrupt = Arc::new(AtomicBool::new(false));
        let mut conn = ConnectionManager::new(
            AccountConfig::new("test", "me@example.com", "imap.example.com"),
            Arc::new(remote.clone()),
            "pw".to_string(),
            Duration::from_secs(5),
            Arc::clone(&interrupt),
        );
        conn.connect().unwrap();
        (remote, conn, ids, interrupt)
    }

    fn subjects(page: &Page) -> Vec<String> {
        page.entries.iter().map(|e| e.subject.clone()).collect()
    }

    #[test]
    fn test_page_range() {
        assert_eq!(page_range(25, 1, 10), Some((16, 25)));
        assert_eq!(page_range(25, 2, 10), Some((6, 15)));
        assert_eq!(page_range(25, 3, 10), Some((1, 5)));
        assert_eq!(page_range(25, 4, 10), None);
        assert_eq!(page_range(0, 1, 10), None);
        assert_eq!(page_range(10, 1, 10), Some((1, 10)));
        assert_eq!(page_range(5, 0, 10), None);
        assert_eq!(page_count(25, 10), 3);
        assert_eq!(page_count(0, 10), 1);
    }

    #[test]
    fn test_pagination_25_messages_page_size_10() {
        let (_remote, mut conn, _) = setup(25);
        let window = MessageWindow::new();

        let page = window.load_page(&mut conn, "INBOX", 1, 10).unwrap();
        assert_eq!(page.entries.len(), 10);
        assert_eq!(subjects(&page)[0], "m25");
        assert_eq!(subjects(&page)[9], "m16");
        assert_eq!(page.page_count(), 3);

        let page = window.load_page(&mut conn, "INBOX", 3, 10).unwrap();
        assert_eq!(subjects(&page), vec!["m5", "m4", "m3", "m2", "m1"]);
        let ordinals: Vec<usize> = page.entries.iter().map(|e| e.local_ordinal).collect();
        assert_eq!(ordinals, vec![1, 2, 3, 4, 5]);

        let err = window.load_page(&mut conn, "INBOX", 4, 10).unwrap_err();
        assert!(matches!(err, MailError::NotFound(_)));
        // The failed load left page 3 in place.
        assert_eq!(window.page().unwrap().number, 3);
    }

    #[test]
    fn test_empty_folder() {
        let (_remote, mut conn, _) = setup(0);
        let window = MessageWindow::new();
        let page = window.load_page(&mut conn, "INBOX", 1, 10).unwrap();
        assert!(page.entries.is_empty());
        assert!(matches!(window.resolve(&mut conn, 1), Err(MailError::NotFound(_))));
    }

    #[test]
    fn test_delete_renumbers_and_past_end_is_not_found() {
        let (remote, mut conn, ids) = setup(5);
        let window = MessageWindow::new();
        window.load_page(&mut conn, "INBOX", 1, 10).unwrap();

        // #2 is m4.
        let removed = window.mutate(&mut conn, 2, Mutation::Delete).unwrap();
        assert_eq!(removed.subject, "m4");
        assert!(!remote.uids("INBOX").contains(&ids[3]));

        let page = window.page().unwrap();
        assert_eq!(subjects(&page), vec!["m5", "m3", "m2", "m1"]);
        assert_eq!(page.entries[1].local_ordinal, 2);
        assert_eq!(page.total, 4);
        assert_eq!(window.resolve(&mut conn, 2).unwrap().summary.subject, "m3");
        assert!(matches!(window.resolve(&mut conn, 5), Err(MailError::NotFound(_))));
    }

    #[test]
    fn test_archive_moves_remote_and_removes_locally() {
        let (remote, mut conn, _) = setup(3);
        let window = MessageWindow::new();
        window.load_page(&mut conn, "INBOX", 1, 10).unwrap();

        window
            .mutate(&mut conn, 1, Mutation::Archive("Archive".to_string()))
            .unwrap();
        assert_eq!(remote.uids("INBOX").len(), 2);
        assert_eq!(remote.uids("Archive").len(), 1);
        assert_eq!(subjects(&window.page().unwrap()), vec!["m2", "m1"]);
    }

    #[test]
    fn test_star_unstar_round_trip() {
        let (remote, mut conn, ids) = setup(2);
        let window = MessageWindow::new();
        window.load_page(&mut conn, "INBOX", 1, 10).unwrap();
        let before = window.page().unwrap();

        let starred = window.mutate(&mut conn, 1, Mutation::Star).unwrap();
        assert!(starred.flags.starred);
        assert!(remote.message("INBOX", ids[1]).unwrap().flags.starred);

        window.mutate(&mut conn, 1, Mutation::Unstar).unwrap();
        assert!(!remote.message("INBOX", ids[1]).unwrap().flags.starred);
        assert_eq!(window.page().unwrap(), before);
    }

    #[test]
    fn test_failed_mutation_leaves_cache_unchanged() {
        let (remote, mut conn, _) = setup(3);
        let window = MessageWindow::new();
        window.load_page(&mut conn, "INBOX", 1, 10).unwrap();
        let before = window.page().unwrap();

        remote.fail_next("expunge", StoreError::Protocol("NO permission".into()));
        assert!(window.mutate(&mut conn, 1, Mutation::Delete).is_err());
        assert_eq!(window.page().unwrap(), before);

        remote.fail_next("set_flag", StoreError::Protocol("NO".into()));
        assert!(window.mutate(&mut conn, 1, Mutation::Star).is_err());
        assert_eq!(window.page().unwrap(), before);

        assert!(matches!(
            window.mutate(&mut conn, 9, Mutation::Delete),
            Err(MailError::NotFound(_))
        ));
        assert_eq!(window.page().unwrap(), before);
    }

    #[test]
    fn test_cancelled_delete_reloads_page_before_next_use() {
        let (remote, mut conn, _, interrupt) = setup_interruptible(3);
        let window = MessageWindow::new();
        window.load_page(&mut conn, "INBOX", 1, 10).unwrap();

        remote.stall_next("expunge", Duration::from_millis(400));
        let flag = Arc::clone(&interrupt);
        let setter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            flag.store(true, Ordering::SeqCst);
        });
        let err = window.mutate(&mut conn, 1, Mutation::Delete).unwrap_err();
        setter.join().unwrap();
        assert!(matches!(err, MailError::Cancelled));

        // The request was already on its way and the server applied it.
        thread::sleep(Duration::from_millis(700));
        assert_eq!(remote.uids("INBOX").len(), 2);

        let resolved = window.resolve(&mut conn, 1).unwrap();
        assert_eq!(resolved.summary.subject, "m2");
        let page = window.page().unwrap();
        assert_eq!(subjects(&page), vec!["m2", "m1"]);
        assert_eq!(page.total, 2);
    }

    #[test]
    fn test_timed_out_star_is_retried_and_page_reloaded() {
        let (remote, _, ids) = setup(2);
        let mut conn = ConnectionManager::new(
            AccountConfig::new("test", "me@example.com", "imap.example.com"),
            Arc::new(remote.clone()),
            "pw".to_string(),
            Duration::from_millis(200),
            Arc::new(AtomicBool::new(false)),
        );
        conn.connect().unwrap();
        let window = MessageWindow::new();
        window.load_page(&mut conn, "INBOX", 1, 10).unwrap();

        remote.stall_next("set_flag", Duration::from_millis(600));
        let starred = window.mutate(&mut conn, 1, Mutation::Star).unwrap();
        assert!(starred.flags.starred);
        assert_eq!(conn.abandoned_requests(), 1);
        assert!(remote.message("INBOX", ids[1]).unwrap().flags.starred);

        let page = window.page().unwrap();
        assert_eq!(subjects(&page), vec!["m2", "m1"]);
        assert!(page.entries[0].flags.starred);
    }

    #[test]
    fn test_failed_fetch_keeps_previous_page() {
        let (remote, mut conn, _) = setup(3);
        let window = MessageWindow::new();
        window.load_page(&mut conn, "INBOX", 1, 10).unwrap();
        let before = window.page().unwrap();

        remote.fail_next("fetch_summaries", StoreError::Protocol("BAD".into()));
        assert!(window.load_page(&mut conn, "INBOX", 1, 10).is_err());
        assert_eq!(window.page().unwrap(), before);
    }

    #[test]
    fn test_sequential_read_continues_to_next_page() {
        let (_remote, mut conn, _) = setup(25);
        let window = MessageWindow::new();
        window.load_page(&mut conn, "INBOX", 1, 10).unwrap();

        let resolved = window.resolve(&mut conn, 11).unwrap();
        assert!(resolved.advanced);
        assert_eq!(resolved.summary.subject, "m15");
        assert_eq!(resolved.summary.local_ordinal, 1);
        assert_eq!(window.page().unwrap().number, 2);

        assert!(matches!(window.resolve(&mut conn, 12), Err(MailError::NotFound(_))));

        // The last page is not full, so there is nothing to continue to.
        window.load_page(&mut conn, "INBOX", 3, 10).unwrap();
        assert!(matches!(window.resolve(&mut conn, 6), Err(MailError::NotFound(_))));
    }

    #[test]
    fn test_search_caps_results_and_leaves_page_alone() {
        let (remote, mut conn, _) = setup(5);
        for i in 0..60 {
            remote.add_message("INBOX", StoredMessage::new(&format!("invoice {}", i), "b@x.com"));
        }
        let window = MessageWindow::new();
        window.load_page(&mut conn, "INBOX", 1, 10).unwrap();
        let before = window.page().unwrap();

        let result = window
            .search(
                &mut conn,
                "INBOX",
                SearchCriteria {
                    text: "invoice".to_string(),
                    scope: SearchScope::Both,
                },
            )
            .unwrap();
        assert_eq!(result.total_matches, 60);
        assert_eq!(result.entries.len(), SEARCH_RESULT_CAP);
        assert!(result.truncated);
        assert_eq!(result.entries[0].subject, "invoice 59");
        assert_eq!(result.entries[49].local_ordinal, 50);
        assert_eq!(window.page().unwrap(), before);
        assert_eq!(window.resolve_search(2).unwrap().subject, "invoice 58");
    }

    #[test]
    fn test_mutate_by_id_updates_search_and_page() {
        let (_remote, mut conn, ids) = setup(3);
        let window = MessageWindow::new();
        window.load_page(&mut conn, "INBOX", 1, 10).unwrap();
        window
            .search(
                &mut conn,
                "INBOX",
                SearchCriteria {
                    text: "m2".to_string(),
                    scope: SearchScope::Subject,
                },
            )
            .unwrap();

        let removed = window
            .mutate_by_id(&mut conn, "INBOX", ids[1], Mutation::Delete)
            .unwrap();
        assert_eq!(removed.unwrap().subject, "m2");
        assert!(window.search_result().unwrap().entries.is_empty());
        assert_eq!(subjects(&window.page().unwrap()), vec!["m3", "m1"]);
    }

    #[test]
    fn test_mark_seen() {
        let (_remote, mut conn, ids) = setup(2);
        let window = MessageWindow::new();
        window.load_page(&mut conn, "INBOX", 1, 10).unwrap();
        window.mark_seen(ids[0]);
        let page = window.page().unwrap();
        assert!(page.entries[1].flags.seen);
        assert!(!page.entries[0].flags.seen);
    }
}
