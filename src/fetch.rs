//! Background creative fetching.
//!
//! Requests are queued to a small pool of named worker threads. A worker
//! asks the [`FetchSink`] whether the instance still wants its creative,
//! runs the (possibly blocking) [`AdSource`] outside every lock, and hands
//! the result back. Workers hold the sink weakly, so they exit on their own
//! once the SDK is gone.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread;

use crossbeam_channel::{Receiver, Sender};

use crate::error::{AdError, FetchError};
use crate::handle::AdHandle;
use crate::types::DecodedAsset;

/// Supplies creatives for placements. The ad network lives behind this.
///
/// `fetch` runs on a fetch worker, never on the GL thread, so blocking I/O
/// is fine here.
pub trait AdSource: Send + Sync + 'static {
    /// Fetches and decodes the creative for `placement_id`.
    ///
    /// # Errors
    ///
    /// Any [`FetchError`]; the instance moves to `Failed` (or keeps its
    /// previous creative when refreshing).
    fn fetch(&self, placement_id: &str) -> Result<DecodedAsset, FetchError>;
}

impl<F> AdSource for F
where
    F: Fn(&str) -> Result<DecodedAsset, FetchError> + Send + Sync + 'static,
{
    fn fetch(&self, placement_id: &str) -> Result<DecodedAsset, FetchError> {
        self(placement_id)
    }
}

/// Receives fetch lifecycle callbacks from workers.
pub(crate) trait FetchSink: Send + Sync + 'static {
    /// Called when a worker picks up `handle`. Returns the placement to
    /// fetch, or `None` if the instance was released in the meantime.
    fn begin_fetch(&self, handle: AdHandle) -> Option<String>;

    /// Called exactly once per `begin_fetch` that returned `Some`.
    fn finish_fetch(&self, handle: AdHandle, result: Result<DecodedAsset, FetchError>);
}

enum FetchTask {
    Fetch(AdHandle),
    Shutdown,
}

/// Producer side of the fetch pool.
pub(crate) struct FetchCoordinator {
    tx: Sender<FetchTask>,
    workers: usize,
}

/// Consumer side, turned into threads by [`FetchWorkers::spawn`].
pub(crate) struct FetchWorkers {
    rx: Receiver<FetchTask>,
}

impl FetchCoordinator {
    pub(crate) fn new(workers: usize) -> (Self, FetchWorkers) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx, workers }, FetchWorkers { rx })
    }

    /// Queues a fetch for `handle`. Never blocks.
    pub(crate) fn schedule(&self, handle: AdHandle) -> bool {
        self.tx.send(FetchTask::Fetch(handle)).is_ok()
    }

    /// Asks every worker to exit after its current fetch. Does not wait.
    pub(crate) fn shutdown(&self) {
        for _ in 0..self.workers {
            if self.tx.send(FetchTask::Shutdown).is_err() {
                break;
            }
        }
    }
}

impl FetchWorkers {
    /// Starts `count` worker threads feeding `sink`.
    ///
    /// # Errors
    ///
    /// [`AdError::WorkerSpawn`] if no worker thread could be started.
    pub(crate) fn spawn<S: FetchSink>(
        self,
        count: usize,
        source: Arc<dyn AdSource>,
        sink: Weak<S>,
    ) -> Result<usize, AdError> {
        let mut spawned = 0;
        let mut last_error = None;
        for i in 0..count {
            let rx = self.rx.clone();
            let source = Arc::clone(&source);
            let sink = Weak::clone(&sink);
            match thread::Builder::new()
                .name(format!("ad-fetch-{i}"))
                .spawn(move || run_worker(&rx, source.as_ref(), &sink))
            {
                Ok(_) => spawned += 1,
                Err(e) => {
                    log::error!("failed to spawn fetch worker {i}: {e}");
                    last_error = Some(e);
                }
            }
        }
        match (spawned, last_error) {
            (0, Some(e)) => Err(AdError::WorkerSpawn(e.to_string())),
            _ => Ok(spawned),
        }
    }
}

fn run_worker<S: FetchSink>(rx: &Receiver<FetchTask>, source: &dyn AdSource, sink: &Weak<S>) {
    log::debug!("fetch worker started");
    while let Ok(FetchTask::Fetch(handle)) = rx.recv() {
        let Some(placement_id) = sink.upgrade().and_then(|s| s.begin_fetch(handle)) else {
            continue;
        };

        // A panicking source must not take the worker (or the host) down.
        let result = panic::catch_unwind(AssertUnwindSafe(|| source.fetch(&placement_id)))
            .unwrap_or_else(|_| {
                Err(FetchError::Network(format!(
                    "ad source panicked while fetching '{placement_id}'"
                )))
            });

        match sink.upgrade() {
            Some(sink) => sink.finish_fetch(handle, result),
            None => break,
        }
    }
    log::debug!("fetch worker exiting");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crossbeam_channel::RecvTimeoutError;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Sink {
        released: Mutex<Vec<AdHandle>>,
        done: Mutex<Vec<(AdHandle, bool)>>,
        notify: Mutex<Option<Sender<()>>>,
    }

    impl FetchSink for Sink {
        fn begin_fetch(&self, handle: AdHandle) -> Option<String> {
            if self.released.lock().contains(&handle) {
                if let Some(tx) = &*self.notify.lock() {
                    let _ = tx.send(());
                }
                return None;
            }
            Some(format!("unit{}", handle.to_raw()))
        }

        fn finish_fetch(&self, handle: AdHandle, result: Result<DecodedAsset, FetchError>) {
            self.done.lock().push((handle, result.is_ok()));
            if let Some(tx) = &*self.notify.lock() {
                let _ = tx.send(());
            }
        }
    }

    fn pixel() -> DecodedAsset {
        DecodedAsset::from_rgba8(vec![0; 4], 1, 1).unwrap()
    }

    fn wait(rx: &Receiver<()>, n: usize) {
        for _ in 0..n {
            assert_ne!(
                rx.recv_timeout(Duration::from_secs(5)),
                Err(RecvTimeoutError::Timeout)
            );
        }
    }

    #[test]
    fn results_reach_the_sink() {
        let sink = Arc::new(Sink::default());
        let (tx, rx) = crossbeam_channel::unbounded();
        *sink.notify.lock() = Some(tx);

        let (coordinator, workers) = FetchCoordinator::new(2);
        let source = |id: &str| {
            if id == "unit2" {
                Err(FetchError::Network("no fill".into()))
            } else {
                Ok(pixel())
            }
        };
        assert_eq!(workers.spawn(2, Arc::new(source), Arc::downgrade(&sink)).unwrap(), 2);

        coordinator.schedule(AdHandle::from_raw(1));
        coordinator.schedule(AdHandle::from_raw(2));
        wait(&rx, 2);

        let mut done = sink.done.lock().clone();
        done.sort_by_key(|(h, _)| h.to_raw());
        assert_eq!(
            done,
            vec![(AdHandle::from_raw(1), true), (AdHandle::from_raw(2), false)]
        );
        coordinator.shutdown();
    }

    #[test]
    fn released_instances_are_skipped() {
        let sink = Arc::new(Sink::default());
        let (tx, rx) = crossbeam_channel::unbounded();
        *sink.notify.lock() = Some(tx);
        sink.released.lock().push(AdHandle::from_raw(9));

        let (coordinator, workers) = FetchCoordinator::new(1);
        let source = |_: &str| -> Result<DecodedAsset, FetchError> {
            panic!("must not fetch for a released instance")
        };
        workers.spawn(1, Arc::new(source), Arc::downgrade(&sink)).unwrap();

        coordinator.schedule(AdHandle::from_raw(9));
        wait(&rx, 1);
        assert!(sink.done.lock().is_empty());
    }

    #[test]
    fn panicking_source_reports_failure() {
        let sink = Arc::new(Sink::default());
        let (tx, rx) = crossbeam_channel::unbounded();
        *sink.notify.lock() = Some(tx);

        let (coordinator, workers) = FetchCoordinator::new(1);
        let source = |_: &str| -> Result<DecodedAsset, FetchError> { panic!("boom") };
        workers.spawn(1, Arc::new(source), Arc::downgrade(&sink)).unwrap();

        coordinator.schedule(AdHandle::from_raw(1));
        coordinator.schedule(AdHandle::from_raw(3));
        wait(&rx, 2);
        assert!(sink.done.lock().iter().all(|(_, ok)| !ok));
    }

    #[test]
    fn shutdown_closes_the_pool() {
        let sink = Arc::new(Sink::default());
        let (coordinator, workers) = FetchCoordinator::new(1);
        workers
            .spawn(1, Arc::new(|_: &str| Ok(pixel())), Arc::downgrade(&sink))
            .unwrap();
        coordinator.shutdown();
        // Give the worker time to exit; the channel then has no receivers.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while coordinator.schedule(AdHandle::from_raw(1)) && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!coordinator.schedule(AdHandle::from_raw(1)));
    }
}
