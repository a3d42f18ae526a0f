//! Request Table: the session-local registry of in-flight requests, their
//! stream-tag allocator, and their cancellation tokens.
//!
//! The table is the one hot shared structure in the engine, so every
//! mutation goes through a single `tokio::sync::Mutex`, the same
//! single-serialization-point discipline `transport::session`'s accept
//! state uses for its own stateful accept logic (behind `Arc<Mutex<_>>`).

use std::collections::{HashMap, HashSet};

use tokio_util::sync::CancellationToken;

use crate::message::RequestId;

/// Which side opened an Execution Stream, kept only for bookkeeping/logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    /// The server opened this stream.
    Opened,
    /// The peer opened this stream and the server accepted it.
    Accepted,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RequestTableError {
    #[error("duplicate request id")]
    DuplicateId,
    #[error("no such in-flight request")]
    NotFound,
}

struct Entry {
    method: String,
    cancel: CancellationToken,
    next_tag: u32,
    /// Stream tags the response has declared via `ref/stream` content.
    declared_tags: HashSet<u32>,
    /// Stream tags currently open, bound to this request.
    open_tags: HashMap<u32, StreamDirection>,
    response_sent: bool,
}

/// The session-local table of in-flight requests
#[derive(Default)]
pub struct RequestTable {
    entries: tokio::sync::Mutex<HashMap<RequestId, Entry>>,
}

impl RequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a newly-dispatched request, returning its cancellation
    /// token. Fails with [`RequestTableError::DuplicateId`] if `id` is
    /// already in flight
    pub async fn register(
        &self,
        id: RequestId,
        method: impl Into<String>,
    ) -> Result<CancellationToken, RequestTableError> {
        let mut table = self.entries.lock().await;
        if table.contains_key(&id) {
            return Err(RequestTableError::DuplicateId);
        }
        let cancel = CancellationToken::new();
        table.insert(
            id,
            Entry {
                method: method.into(),
                cancel: cancel.clone(),
                next_tag: 1,
                declared_tags: HashSet::new(),
                open_tags: HashMap::new(),
                response_sent: false,
            },
        );
        Ok(cancel)
    }

    pub async fn contains(&self, id: &RequestId) -> bool {
        self.entries.lock().await.contains_key(id)
    }

    pub async fn method_of(&self, id: &RequestId) -> Option<String> {
        self.entries.lock().await.get(id).map(|e| e.method.clone())
    }

    /// Allocates the next stream tag for `id`, monotonic starting at 1
    ///
    pub async fn allocate_stream_tag(&self, id: &RequestId) -> Result<u32, RequestTableError> {
        let mut table = self.entries.lock().await;
        let entry = table.get_mut(id).ok_or(RequestTableError::NotFound)?;
        let tag = entry.next_tag;
        entry.next_tag += 1;
        Ok(tag)
    }

    /// Records that the response for `id` declared these stream tags in its
    /// `content` array, so the Execution Stream Mux can validate peer-opened
    /// streams against them
    pub async fn declare_stream_tags(
        &self,
        id: &RequestId,
        tags: impl IntoIterator<Item = u32>,
    ) -> Result<(), RequestTableError> {
        let mut table = self.entries.lock().await;
        let entry = table.get_mut(id).ok_or(RequestTableError::NotFound)?;
        entry.declared_tags.extend(tags);
        Ok(())
    }

    /// Whether `tag` was declared (possibly retroactively) for `id`.
    pub async fn is_declared(&self, id: &RequestId, tag: u32) -> bool {
        self.entries
            .lock()
            .await
            .get(id)
            .is_some_and(|e| e.declared_tags.contains(&tag))
    }

    pub async fn bind_stream(
        &self,
        id: &RequestId,
        tag: u32,
        direction: StreamDirection,
    ) -> Result<(), RequestTableError> {
        let mut table = self.entries.lock().await;
        let entry = table.get_mut(id).ok_or(RequestTableError::NotFound)?;
        entry.open_tags.insert(tag, direction);
        Ok(())
    }

    /// Unbinds a stream once it reaches EOF/close, then checks whether the
    /// request can now be completed.
    pub async fn unbind_stream(&self, id: &RequestId, tag: u32) {
        {
            let mut table = self.entries.lock().await;
            if let Some(entry) = table.get_mut(id) {
                entry.open_tags.remove(&tag);
            }
        }
        self.complete(id).await;
    }

    /// Marks the response frame for `id` as written, then checks whether the
    /// request can now be completed.
    pub async fn mark_response_sent(&self, id: &RequestId) {
        {
            let mut table = self.entries.lock().await;
            if let Some(entry) = table.get_mut(id) {
                entry.response_sent = true;
            }
        }
        self.complete(id).await;
    }

    /// Signals cancellation for `id`. Idempotent; a request that has already
    /// completed (or never existed) is silently ignored
    pub async fn cancel(&self, id: &RequestId) {
        if let Some(entry) = self.entries.lock().await.get(id) {
            entry.cancel.cancel();
        }
    }

    /// Removes `id`'s entry once its response has been sent and every
    /// stream it bound has closed, whichever happens later
    /// A no-op if either condition isn't met yet, or `id` is unknown.
    pub async fn complete(&self, id: &RequestId) {
        let mut table = self.entries.lock().await;
        let done = table
            .get(id)
            .is_some_and(|e| e.response_sent && e.open_tags.is_empty());
        if done {
            table.remove(id);
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// All stream tags currently open across every in-flight request, used
    /// by the Lifecycle Orchestrator to emit best-effort `$/streamError`
    /// notifications on transport teardown
    pub async fn all_open_streams(&self) -> Vec<(RequestId, u32)> {
        self.entries
            .lock()
            .await
            .iter()
            .flat_map(|(id, entry)| entry.open_tags.keys().map(move |tag| (id.clone(), *tag)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: i64) -> RequestId {
        RequestId::Number(n)
    }

    #[tokio::test]
    async fn register_then_duplicate_fails() {
        let table = RequestTable::new();
        table.register(id(1), "ping").await.unwrap();
        assert_eq!(
            table.register(id(1), "ping").await.unwrap_err(),
            RequestTableError::DuplicateId
        );
    }

    #[tokio::test]
    async fn stream_tags_allocate_monotonically_from_one() {
        let table = RequestTable::new();
        table.register(id(1), "tools/call").await.unwrap();
        assert_eq!(table.allocate_stream_tag(&id(1)).await.unwrap(), 1);
        assert_eq!(table.allocate_stream_tag(&id(1)).await.unwrap(), 2);
        assert_eq!(table.allocate_stream_tag(&id(1)).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn completion_waits_for_both_response_and_streams() {
        let table = RequestTable::new();
        table.register(id(1), "tools/call").await.unwrap();
        table
            .bind_stream(&id(1), 1, StreamDirection::Opened)
            .await
            .unwrap();

        table.mark_response_sent(&id(1)).await;
        assert!(table.contains(&id(1)).await, "stream still open");

        table.unbind_stream(&id(1), 1).await;
        assert!(!table.contains(&id(1)).await, "response sent and stream closed");
    }

    #[tokio::test]
    async fn completion_order_can_be_streams_then_response() {
        let table = RequestTable::new();
        table.register(id(1), "tools/call").await.unwrap();
        table
            .bind_stream(&id(1), 1, StreamDirection::Opened)
            .await
            .unwrap();

        table.unbind_stream(&id(1), 1).await;
        assert!(table.contains(&id(1)).await, "response not sent yet");

        table.mark_response_sent(&id(1)).await;
        assert!(!table.contains(&id(1)).await);
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_tolerates_unknown_ids() {
        let table = RequestTable::new();
        table.register(id(1), "tools/call").await.unwrap();
        table.cancel(&id(1)).await;
        table.cancel(&id(1)).await;
        table.cancel(&id(404)).await; // never registered: silently ignored
    }

    #[tokio::test]
    async fn declared_tags_are_retroactive() {
        let table = RequestTable::new();
        table.register(id(1), "tools/call").await.unwrap();
        assert!(!table.is_declared(&id(1), 7).await);
        table.declare_stream_tags(&id(1), [7]).await.unwrap();
        assert!(table.is_declared(&id(1), 7).await);
    }

    #[tokio::test]
    async fn operations_on_unknown_id_fail_not_found() {
        let table = RequestTable::new();
        assert_eq!(
            table.allocate_stream_tag(&id(99)).await.unwrap_err(),
            RequestTableError::NotFound
        );
    }
}
