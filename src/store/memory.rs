//! In-process queue store.
//!
//! Same protocol as the Redis store, with a single mutex standing in for
//! script atomicity. Useful for tests and for single-process deployments.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{EnqueueRequest, EnqueueStatus, QueueKeys, QueueStats, QueueStore};
use crate::error::Result;
use crate::model::wire::peek_unique_id;

#[derive(Debug, Default)]
struct QueueState {
    /// Front is the left (push) end, back is the right (pop) end.
    ready: VecDeque<String>,
    processing: VecDeque<String>,
    delayed: HashMap<String, i64>,
    unique: HashSet<String>,
}

impl QueueState {
    fn enqueue(&mut self, request: EnqueueRequest<'_>) -> EnqueueStatus {
        let unique_id = request.unique_id.filter(|id| !id.is_empty());

        if let Some(id) = unique_id {
            if self.unique.contains(id) {
                let Some(ready_at) = request.ready_at_ms.filter(|_| request.debounce) else {
                    return EnqueueStatus::Duplicate;
                };
                let before = self.delayed.len();
                self.delayed.retain(|pending, _| {
                    pending != request.message && peek_unique_id(pending).as_deref() != Some(id)
                });
                if self.delayed.len() == before {
                    // The pending copy is already in the ready list.
                    return EnqueueStatus::Duplicate;
                }
                self.delayed.insert(request.message.to_string(), ready_at);
                return EnqueueStatus::Debounced;
            }
            self.unique.insert(id.to_string());
        }
        match request.ready_at_ms {
            Some(ready_at) => {
                self.delayed.insert(request.message.to_string(), ready_at);
            }
            None => self.ready.push_front(request.message.to_string()),
        }
        EnqueueStatus::Accepted
    }

    fn dequeue(&mut self, now_ms: i64) -> Option<String> {
        let mut due: Vec<(i64, String)> = self
            .delayed
            .iter()
            .filter(|(_, score)| **score <= now_ms)
            .map(|(message, score)| (*score, message.clone()))
            .collect();
        due.sort();
        for (_, message) in due {
            self.delayed.remove(&message);
            self.ready.push_front(message);
        }

        let message = self.ready.pop_back()?;
        self.processing.push_front(message.clone());
        if let Some(id) = peek_unique_id(&message) {
            self.unique.remove(&id);
        }
        Some(message)
    }

    fn remove_processing(&mut self, raw: &str) -> bool {
        match self.processing.iter().position(|m| m == raw) {
            Some(index) => self.processing.remove(index).is_some(),
            None => false,
        }
    }
}

/// Queue store held in process memory. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    queues: Arc<Mutex<HashMap<QueueKeys, QueueState>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_queue<T>(&self, keys: &QueueKeys, f: impl FnOnce(&mut QueueState) -> T) -> T {
        let mut queues = self.queues.lock();
        f(queues.entry(keys.clone()).or_default())
    }

    /// Snapshot of the delayed set.
    pub fn delayed_entries(&self, keys: &QueueKeys) -> Vec<(String, i64)> {
        self.with_queue(keys, |q| q.delayed.iter().map(|(m, s)| (m.clone(), *s)).collect())
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn enqueue(
        &self,
        keys: &QueueKeys,
        request: EnqueueRequest<'_>,
    ) -> Result<EnqueueStatus> {
        Ok(self.with_queue(keys, |q| q.enqueue(request)))
    }

    async fn dequeue(&self, keys: &QueueKeys, now_ms: i64) -> Result<Option<String>> {
        Ok(self.with_queue(keys, |q| q.dequeue(now_ms)))
    }

    async fn remove_processing(&self, keys: &QueueKeys, raw: &str) -> Result<bool> {
        Ok(self.with_queue(keys, |q| q.remove_processing(raw)))
    }

    async fn requeue(
        &self,
        keys: &QueueKeys,
        request: EnqueueRequest<'_>,
    ) -> Result<Option<EnqueueStatus>> {
        Ok(self.with_queue(keys, |q| {
            q.remove_processing(request.message)
                .then(|| q.enqueue(request))
        }))
    }

    async fn push_raw(&self, keys: &QueueKeys, raw: &str) -> Result<()> {
        self.with_queue(keys, |q| q.ready.push_front(raw.to_string()));
        Ok(())
    }

    async fn ready_len(&self, keys: &QueueKeys) -> Result<u64> {
        Ok(self.with_queue(keys, |q| q.ready.len() as u64))
    }

    async fn stats(&self, keys: &QueueKeys) -> Result<QueueStats> {
        Ok(self.with_queue(keys, |q| QueueStats {
            ready: q.ready.len() as u64,
            processing: q.processing.len() as u64,
            delayed: q.delayed.len() as u64,
            unique: q.unique.len() as u64,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(body: &str, id: Option<&str>) -> String {
        crate::model::wire::WireMessage {
            body: body.to_string(),
            headers: Default::default(),
            unique_id: id.map(str::to_string),
        }
        .encode()
        .unwrap()
    }

    fn request<'a>(
        message: &'a str,
        id: Option<&'a str>,
        ready_at_ms: Option<i64>,
        debounce: bool,
    ) -> EnqueueRequest<'a> {
        EnqueueRequest {
            message,
            unique_id: id,
            ready_at_ms,
            debounce,
        }
    }

    #[test]
    fn ready_list_is_fifo() {
        let mut q = QueueState::default();
        q.enqueue(request("a", None, None, false));
        q.enqueue(request("b", None, None, false));
        assert_eq!(q.dequeue(0).as_deref(), Some("a"));
        assert_eq!(q.dequeue(0).as_deref(), Some("b"));
        assert_eq!(q.dequeue(0), None);
        assert_eq!(q.processing.len(), 2);
    }

    #[test]
    fn debounce_replaces_a_delayed_copy_with_a_different_body() {
        let mut q = QueueState::default();
        let first = wire("v1", Some("k"));
        let second = wire("v2", Some("k"));

        assert_eq!(
            q.enqueue(request(&first, Some("k"), Some(100), true)),
            EnqueueStatus::Accepted
        );
        assert_eq!(
            q.enqueue(request(&second, Some("k"), Some(200), true)),
            EnqueueStatus::Debounced
        );

        assert_eq!(q.delayed.len(), 1);
        assert_eq!(q.delayed.get(&second), Some(&200));
    }

    #[test]
    fn debounce_against_a_ready_copy_is_a_duplicate() {
        let mut q = QueueState::default();
        let first = wire("v1", Some("k"));
        let second = wire("v1", Some("k"));
        q.enqueue(request(&first, Some("k"), Some(0), true));
        // Promote without popping it: another message sits in front.
        q.ready.push_front("other".to_string());
        q.enqueue(request("filler", None, None, false));
        assert_eq!(q.dequeue(10).as_deref(), Some("other"));

        assert_eq!(
            q.enqueue(request(&second, Some("k"), Some(500), true)),
            EnqueueStatus::Duplicate
        );
        assert!(q.delayed.is_empty());
        assert!(q.unique.contains("k"));
    }

    #[test]
    fn requeue_of_unknown_message_changes_nothing() {
        let mut q = QueueState::default();
        assert!(!q.remove_processing("missing"));
        assert!(q.ready.is_empty());
    }
}
