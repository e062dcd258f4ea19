//! Per-key serialization of asynchronous jobs.
//!
//! Jobs submitted under the same key run strictly in submission order; jobs
//! under different keys run concurrently. This is the ordering backbone for
//! mutations and splices that target the same entity.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::oneshot;

/// Tail of one key's job chain.
///
/// `generation` counts submissions for the key; the cleanup step at the end
/// of each job only removes the entry when its generation is still the
/// latest, so a chain that grew in the meantime is left alone.
struct ChainTail {
    generation: u64,
    tail: Shared<BoxFuture<'static, ()>>,
}

type ChainMap<K> = Arc<Mutex<HashMap<K, ChainTail>>>;

/// Runs submitted futures with per-key FIFO ordering.
///
/// Each submission is chained onto the previous tail for its key at submit
/// time, while a single lock is held, so two submissions can never observe
/// each other in a racy order. Completed chains remove their map entry.
pub struct KeyedQueue<K> {
    chains: ChainMap<K>,
}

impl<K> Default for KeyedQueue<K> {
    fn default() -> Self {
        Self {
            chains: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K> Clone for KeyedQueue<K> {
    fn clone(&self) -> Self {
        Self {
            chains: Arc::clone(&self.chains),
        }
    }
}

impl<K> KeyedQueue<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// An empty queue with no chains.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with an unfinished chain.
    #[must_use]
    pub fn active_keys(&self) -> usize {
        self.lock().len()
    }

    /// Submit a job for `key`.
    ///
    /// The job starts once every job previously submitted under the same key
    /// has finished. The returned receiver resolves with the job's output;
    /// dropping the receiver does not cancel the job.
    pub fn submit<T, F>(&self, key: K, job: F) -> oneshot::Receiver<T>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();

        let mut chains = self.lock();
        let previous = chains.get(&key).map(|entry| entry.tail.clone());
        let generation = chains.get(&key).map_or(0, |entry| entry.generation) + 1;

        let cleanup_chains = Arc::clone(&self.chains);
        let cleanup_key = key.clone();
        let task: BoxFuture<'static, ()> = async move {
            if let Some(previous) = previous {
                previous.await;
            }
            let output = job.await;
            // The submitter may have stopped listening; the job still ran.
            let _ = result_tx.send(output);

            let mut chains = cleanup_chains
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if chains
                .get(&cleanup_key)
                .is_some_and(|entry| entry.generation == generation)
            {
                chains.remove(&cleanup_key);
            }
        }
        .boxed();

        let tail = task.shared();
        chains.insert(
            key,
            ChainTail {
                generation,
                tail: tail.clone(),
            },
        );
        drop(chains);

        tokio::spawn(tail);
        result_rx
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<K, ChainTail>> {
        self.chains.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn wait_for_idle(queue: &KeyedQueue<&'static str>) {
        for _ in 0..200 {
            if queue.active_keys() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("queue never drained");
    }

    #[tokio::test]
    async fn test_same_key_runs_in_submission_order() {
        let queue = KeyedQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let slow_order = order.clone();
        let first = queue.submit("brew", async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            slow_order.lock().unwrap().push(1);
        });
        let fast_order = order.clone();
        let second = queue.submit("brew", async move {
            fast_order.lock().unwrap().push(2);
        });

        first.await.unwrap();
        second.await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_distinct_keys_run_concurrently() {
        let queue = KeyedQueue::new();
        let (gate_tx, gate_rx) = oneshot::channel::<()>();

        // The "latte" job blocks until the "espresso" job releases the gate.
        // If keys were serialized against each other this would deadlock.
        let blocked = queue.submit("latte", async move {
            gate_rx.await.unwrap();
            "latte done"
        });
        let releaser = queue.submit("espresso", async move {
            gate_tx.send(()).unwrap();
            "espresso done"
        });

        let result = tokio::time::timeout(Duration::from_secs(1), async {
            (releaser.await.unwrap(), blocked.await.unwrap())
        })
        .await
        .unwrap();
        assert_eq!(result, ("espresso done", "latte done"));
    }

    #[tokio::test]
    async fn test_completed_chains_are_removed() {
        let queue = KeyedQueue::new();

        let done = queue.submit("brew", async { 7 });
        assert_eq!(done.await.unwrap(), 7);

        wait_for_idle(&queue).await;
        assert_eq!(queue.active_keys(), 0);
    }

    #[tokio::test]
    async fn test_result_delivered_per_job() {
        let queue = KeyedQueue::new();

        let first = queue.submit("brew", async { "first" });
        let second = queue.submit("brew", async { "second" });
        let third = queue.submit("brew", async { "third" });

        assert_eq!(first.await.unwrap(), "first");
        assert_eq!(second.await.unwrap(), "second");
        assert_eq!(third.await.unwrap(), "third");
    }

    #[tokio::test]
    async fn test_dropped_receiver_does_not_cancel_job() {
        let queue = KeyedQueue::new();
        let ran = Arc::new(Mutex::new(false));

        let flag = ran.clone();
        drop(queue.submit("brew", async move {
            *flag.lock().unwrap() = true;
        }));

        wait_for_idle(&queue).await;
        assert!(*ran.lock().unwrap());
    }
}
