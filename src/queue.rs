//! Work handed to the GL thread from other threads.
//!
//! Producers on any thread push [`GlJob`]s; the GL thread drains the queue
//! once per frame. A single FIFO channel keeps jobs for the same instance in
//! submission order, so a release can never overtake a pending build.

use crossbeam_channel::{Receiver, Sender};

use crate::handle::AdHandle;
use crate::types::{DecodedAsset, Geometry};

/// A unit of GPU work executed on the GL thread.
#[derive(Debug)]
pub(crate) enum GlJob {
    /// Turn a fetched creative into GPU resources, or refresh them in place.
    BuildResources {
        handle: AdHandle,
        asset: DecodedAsset,
    },
    /// Destroy the instance's resources and vacate its slot.
    ReleaseResources { handle: AdHandle },
    /// Replace the instance's mesh.
    RebindGeometry {
        handle: AdHandle,
        geometry: Geometry,
    },
}

impl GlJob {
    pub(crate) fn handle(&self) -> AdHandle {
        match self {
            GlJob::BuildResources { handle, .. }
            | GlJob::ReleaseResources { handle }
            | GlJob::RebindGeometry { handle, .. } => *handle,
        }
    }
}

/// Producer side, cloned into every thread that submits GPU work.
#[derive(Clone)]
pub(crate) struct JobSender {
    tx: Sender<GlJob>,
}

impl JobSender {
    /// Queues a job. Returns `false` once the consumer is gone (after
    /// `finalize`), in which case the job is dropped.
    pub(crate) fn push(&self, job: GlJob) -> bool {
        match self.tx.send(job) {
            Ok(()) => true,
            Err(err) => {
                log::debug!("GL job queue closed; dropping job for {:?}", err.0.handle());
                false
            }
        }
    }
}

/// Consumer side, owned by the GL thread.
pub(crate) struct JobQueue {
    rx: Receiver<GlJob>,
}

impl JobQueue {
    pub(crate) fn new() -> (JobSender, Self) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (JobSender { tx }, Self { rx })
    }

    /// Takes every job queued at the time of the call, oldest first.
    ///
    /// Jobs pushed while the batch is being executed wait for the next
    /// drain, so a frame never spins on a busy producer.
    pub(crate) fn drain(&self) -> Vec<GlJob> {
        let pending = self.rx.len();
        self.rx.try_iter().take(pending).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.rx.len()
    }
}
