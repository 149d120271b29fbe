use bytes::Bytes;
use dashmap::DashMap;
use livecast_core::StreamId;

use crate::session::{Session, SessionSummary};

/// The single map from stream id to live session.
///
/// Every operation is keyed by id. A missing id is reported as `None`; lookups
/// never create entries. Per-id mutual exclusion comes from the map's entry
/// guards, so closures passed to [`SessionStore::with_session`] must not block.
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<StreamId, Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session, returning the one it replaced.
    pub fn insert_or_replace(&self, session: Session) -> Option<Session> {
        self.sessions.insert(session.id().clone(), session)
    }

    pub fn contains(&self, id: &StreamId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn get(&self, id: &StreamId) -> Option<SessionSummary> {
        self.sessions.get(id).map(|s| s.summary())
    }

    /// Append to an existing session. Returns the chunk's index, or `None`
    /// when no session exists at `id`.
    pub fn append(&self, id: &StreamId, chunk: Bytes) -> Option<usize> {
        self.sessions.get_mut(id).map(|mut s| s.append(chunk))
    }

    /// Remove a session, handing it back in the `Stopped` state.
    pub fn remove(&self, id: &StreamId) -> Option<Session> {
        self.sessions.remove(id).map(|(_, s)| s.into_stopped())
    }

    /// Run `f` against the session at `id` while holding its entry lock.
    ///
    /// Concurrent callers for the same id are serialized; callers for
    /// different ids may proceed in parallel.
    pub fn with_session<R>(&self, id: &StreamId, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        self.sessions.get_mut(id).map(|mut s| f(s.value_mut()))
    }

    /// Sorted snapshot of active stream ids.
    pub fn ids(&self) -> Vec<StreamId> {
        let mut ids: Vec<StreamId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn summaries(&self) -> Vec<SessionSummary> {
        let mut out: Vec<SessionSummary> = self.sessions.iter().map(|e| e.summary()).collect();
        out.sort_by(|a, b| a.stream_id.cmp(&b.stream_id));
        out
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;

    fn id(s: &str) -> StreamId {
        StreamId::from(s)
    }

    #[test]
    fn lookup_missing_does_not_create() {
        let store = SessionStore::new();
        assert!(store.get(&id("a")).is_none());
        assert!(store.append(&id("a"), Bytes::from_static(b"x")).is_none());
        assert!(store.with_session(&id("a"), |_| ()).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn insert_or_replace_resets_buffer() {
        let store = SessionStore::new();
        assert!(store.insert_or_replace(Session::new(id("a"))).is_none());
        store.append(&id("a"), Bytes::from_static(b"old")).unwrap();

        let replaced = store.insert_or_replace(Session::new(id("a"))).unwrap();
        assert_eq!(replaced.len(), 1);
        assert_eq!(store.get(&id("a")).unwrap().chunks, 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn append_returns_index() {
        let store = SessionStore::new();
        store.insert_or_replace(Session::new(id("a")));
        assert_eq!(store.append(&id("a"), Bytes::from_static(b"1")), Some(0));
        assert_eq!(store.append(&id("a"), Bytes::from_static(b"2")), Some(1));
    }

    #[test]
    fn remove_returns_stopped_session() {
        let store = SessionStore::new();
        store.insert_or_replace(Session::new(id("a")));
        store.append(&id("a"), Bytes::from_static(b"1"));

        let removed = store.remove(&id("a")).unwrap();
        assert_eq!(removed.state(), SessionState::Stopped);
        assert_eq!(removed.len(), 1);
        assert!(!store.contains(&id("a")));
        assert!(store.remove(&id("a")).is_none());
    }

    #[test]
    fn ids_are_sorted() {
        let store = SessionStore::new();
        for s in ["c", "a", "b"] {
            store.insert_or_replace(Session::new(id(s)));
        }
        assert_eq!(store.ids(), vec![id("a"), id("b"), id("c")]);
        let summaries: Vec<StreamId> = store.summaries().into_iter().map(|s| s.stream_id).collect();
        assert_eq!(summaries, vec![id("a"), id("b"), id("c")]);
    }
}
