//! Request/response correlation for simulation round trips
//!
//! A request id is registered with a one-shot sender right before the query
//! frame goes out. Whichever of {reply, timeout, caller cancellation} happens
//! first removes the entry; everything after that is a no-op.

use std::future::Future;
use std::hash::Hash;
use std::time::Duration;

use hashbrown::hash_map::Entry;
use hashbrown::HashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use uuid::Uuid;

/// How a correlated request finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Correlated<T> {
    Reply(T),
    TimedOut,
    /// The entry was removed without a reply (shutdown, explicit remove)
    Dropped,
    /// The id was already pending; nothing was sent
    Duplicate,
}

/// Registry of pending requests keyed by id
pub struct RequestCorrelator<T, K = Uuid> {
    pending: Mutex<HashMap<K, oneshot::Sender<T>>>,
}

impl<T, K> RequestCorrelator<T, K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Register a reply channel
    ///
    /// An id that is already pending keeps its first waiter and `reply` is
    /// handed back.
    pub fn register(&self, id: K, reply: oneshot::Sender<T>) -> Result<(), oneshot::Sender<T>> {
        match self.pending.lock().entry(id) {
            Entry::Occupied(_) => Err(reply),
            Entry::Vacant(slot) => {
                slot.insert(reply);
                Ok(())
            }
        }
    }

    /// Remove a pending entry. Returns false if it was already gone.
    pub fn remove(&self, id: &K) -> bool {
        self.pending.lock().remove(id).is_some()
    }

    /// Deliver a reply. Unknown ids are ignored.
    pub fn resolve(&self, id: &K, value: T) -> bool {
        let sender = self.pending.lock().remove(id);
        match sender {
            // Receiver may have been dropped by a cancelled caller
            Some(sender) => sender.send(value).is_ok(),
            None => false,
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_pending(&self, id: &K) -> bool {
        self.pending.lock().contains_key(id)
    }

    /// Register `id`, run `send`, then wait up to `timeout` for the reply.
    ///
    /// The entry is removed exactly once on every path, including when the
    /// returned future is dropped mid-wait.
    pub async fn request<F, Fut, E>(
        &self,
        id: K,
        timeout: Duration,
        send: F,
    ) -> Result<Correlated<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        let (tx, rx) = oneshot::channel();
        if self.register(id.clone(), tx).is_err() {
            return Ok(Correlated::Duplicate);
        }
        let guard = PendingGuard {
            correlator: self,
            id: Some(id),
        };

        send().await?;

        let outcome = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => Correlated::Reply(value),
            Ok(Err(_)) => Correlated::Dropped,
            Err(_) => Correlated::TimedOut,
        };

        drop(guard);
        Ok(outcome)
    }
}

impl<T, K> Default for RequestCorrelator<T, K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

struct PendingGuard<'a, T, K>
where
    K: Eq + Hash + Clone,
{
    correlator: &'a RequestCorrelator<T, K>,
    id: Option<K>,
}

impl<T, K> Drop for PendingGuard<'_, T, K>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.correlator.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::Arc;

    #[test]
    fn test_resolve_unknown_is_noop() {
        let correlator: RequestCorrelator<bool> = RequestCorrelator::new();
        assert!(!correlator.resolve(&Uuid::new_v4(), true));
        assert_eq!(correlator.pending(), 0);
    }

    #[test]
    fn test_single_resolution() {
        let correlator: RequestCorrelator<bool> = RequestCorrelator::new();
        let id = Uuid::new_v4();
        let (tx, mut rx) = oneshot::channel();
        assert!(correlator.register(id, tx).is_ok());

        assert!(correlator.resolve(&id, true));
        assert!(!correlator.resolve(&id, false));
        assert!(!correlator.remove(&id));
        assert_eq!(rx.try_recv().unwrap(), true);
    }

    #[test]
    fn test_resolve_after_remove() {
        let correlator: RequestCorrelator<bool> = RequestCorrelator::new();
        let id = Uuid::new_v4();
        let (tx, _rx) = oneshot::channel();
        assert!(correlator.register(id, tx).is_ok());

        assert!(correlator.remove(&id));
        assert!(!correlator.resolve(&id, true));
    }

    #[tokio::test]
    async fn test_duplicate_id_keeps_first_waiter() {
        let correlator: RequestCorrelator<u32> = RequestCorrelator::new();
        let id = Uuid::new_v4();
        let (first, mut first_rx) = oneshot::channel();
        assert!(correlator.register(id, first).is_ok());

        let (second, _second_rx) = oneshot::channel();
        assert!(correlator.register(id, second).is_err());

        let mut sent = false;
        let outcome = correlator
            .request(id, Duration::from_secs(1), || {
                sent = true;
                async { Ok::<_, Infallible>(()) }
            })
            .await
            .unwrap();
        assert_eq!(outcome, Correlated::Duplicate);
        assert!(!sent);

        assert!(correlator.is_pending(&id));
        assert!(correlator.resolve(&id, 3));
        assert_eq!(first_rx.try_recv().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_request_reply() {
        let correlator: Arc<RequestCorrelator<bool>> = Arc::new(RequestCorrelator::new());
        let id = Uuid::new_v4();

        let replier = correlator.clone();
        let outcome = correlator
            .request(id, Duration::from_millis(500), || async move {
                tokio::spawn(async move {
                    replier.resolve(&id, true);
                });
                Ok::<_, Infallible>(())
            })
            .await
            .unwrap();

        assert_eq!(outcome, Correlated::Reply(true));
        assert_eq!(correlator.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_removes_entry() {
        let correlator: RequestCorrelator<bool> = RequestCorrelator::new();
        let id = Uuid::new_v4();

        let outcome = correlator
            .request(id, Duration::from_millis(1500), || async { Ok::<_, Infallible>(()) })
            .await
            .unwrap();

        assert_eq!(outcome, Correlated::TimedOut);
        assert!(!correlator.is_pending(&id));
        // Late reply from the simulation
        assert!(!correlator.resolve(&id, true));
    }

    #[tokio::test]
    async fn test_send_failure_removes_entry() {
        let correlator: RequestCorrelator<bool> = RequestCorrelator::new();
        let id = Uuid::new_v4();

        let result = correlator
            .request(id, Duration::from_secs(1), || async { Err::<(), _>("socket gone") })
            .await;

        assert_eq!(result.unwrap_err(), "socket gone");
        assert_eq!(correlator.pending(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_request_removes_entry() {
        let correlator: Arc<RequestCorrelator<bool>> = Arc::new(RequestCorrelator::new());
        let id = Uuid::new_v4();

        let task = {
            let correlator = correlator.clone();
            tokio::spawn(async move {
                correlator
                    .request(id, Duration::from_secs(60), || async { Ok::<_, Infallible>(()) })
                    .await
            })
        };

        while !correlator.is_pending(&id) {
            tokio::task::yield_now().await;
        }
        task.abort();
        let _ = task.await;

        assert_eq!(correlator.pending(), 0);
        assert!(!correlator.resolve(&id, true));
    }

    #[tokio::test]
    async fn test_request_pending_until_reply() {
        let correlator: RequestCorrelator<u32> = RequestCorrelator::new();
        let id = Uuid::new_v4();

        let mut request = tokio_test::task::spawn(
            correlator.request(id, Duration::from_secs(5), || async { Ok::<_, Infallible>(()) }),
        );
        tokio_test::assert_pending!(request.poll());
        assert!(correlator.is_pending(&id));

        assert!(correlator.resolve(&id, 7));
        assert!(request.is_woken());
        let outcome = tokio_test::assert_ready!(request.poll()).unwrap();
        assert_eq!(outcome, Correlated::Reply(7));
        assert_eq!(correlator.pending(), 0);
    }
}
