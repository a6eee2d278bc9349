//! Deploy worker: runs deploy jobs on detached tasks with a concurrency cap.
//!
//! Each job is tracked by its record key so callers can wait for it or see
//! what is still running. The outcome itself is written to the record by the
//! job; the worker only owns scheduling.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use fleet_state::RecordKey;

pub struct DeployWorker {
    permits: Arc<Semaphore>,
    tasks: Mutex<HashMap<RecordKey, JoinHandle<()>>>,
}

impl DeployWorker {
    pub fn new(max_parallel: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_parallel.max(1))),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Queue `job` for `key`. The job starts once a permit is free.
    pub async fn spawn<F>(&self, key: RecordKey, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = self.permits.clone();
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                error!(key = %task_key, "deploy worker closed");
                return;
            };
            debug!(key = %task_key, "deploy job started");
            job.await;
        });

        let mut tasks = self.tasks.lock().await;
        tasks.retain(|_, h| !h.is_finished());
        tasks.insert(key, handle);
    }

    /// Wait for the job of `key`, if any. Returns whether one was awaited.
    pub async fn wait(&self, key: &RecordKey) -> bool {
        let handle = self.tasks.lock().await.remove(key);
        match handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    error!(%key, error = %e, "deploy job panicked");
                }
                true
            }
            None => false,
        }
    }

    /// Keys whose jobs have not finished yet.
    pub async fn in_flight(&self) -> Vec<RecordKey> {
        let mut keys: Vec<_> = self
            .tasks
            .lock()
            .await
            .iter()
            .filter(|(_, h)| !h.is_finished())
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    pub async fn is_in_flight(&self, key: &RecordKey) -> bool {
        self.tasks
            .lock()
            .await
            .get(key)
            .is_some_and(|h| !h.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn caps_parallel_jobs() {
        let worker = DeployWorker::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for i in 0..6 {
            let (running, peak) = (running.clone(), peak.clone());
            worker
                .spawn(RecordKey::new("ex", format!("a{i}"), "img"), async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .await;
        }
        for i in 0..6 {
            assert!(worker.wait(&RecordKey::new("ex", format!("a{i}"), "img")).await);
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(worker.in_flight().await.is_empty());
    }

    #[tokio::test]
    async fn reports_in_flight_keys() {
        let worker = DeployWorker::new(1);
        let key = RecordKey::new("ex", "a", "img");
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        worker
            .spawn(key.clone(), async move {
                let _ = rx.await;
            })
            .await;

        assert_eq!(worker.in_flight().await, vec![key.clone()]);
        assert!(worker.is_in_flight(&key).await);
        tx.send(()).unwrap();
        assert!(worker.wait(&key).await);
        assert!(!worker.wait(&key).await);
    }
}
