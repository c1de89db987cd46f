//! Process-scoped SDK flags and GL thread affinity.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use crate::error::AdError;

/// Column-major 4x4 identity.
pub const IDENTITY: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Flags shared by every thread. Written from anywhere, read mostly by the
/// GL thread once per frame.
pub(crate) struct SessionState {
    initialized: AtomicBool,
    enabled: AtomicBool,
    paused: AtomicBool,
    camera: Mutex<[f32; 16]>,
}

impl SessionState {
    pub(crate) fn new() -> Self {
        Self {
            initialized: AtomicBool::new(true),
            enabled: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            camera: Mutex::new(IDENTITY),
        }
    }

    pub(crate) fn ensure_initialized(&self) -> Result<(), AdError> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(AdError::NotInitialized)
        }
    }

    /// Marks the session finished. Returns `false` if it already was.
    pub(crate) fn shut_down(&self) -> bool {
        self.initialized.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        let was = self.enabled.swap(enabled, Ordering::AcqRel);
        if was != enabled {
            log::info!("ads {}", if enabled { "enabled" } else { "disabled" });
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Returns `false` if the flag was already in the requested state.
    pub(crate) fn set_paused(&self, paused: bool) -> bool {
        self.paused.swap(paused, Ordering::AcqRel) != paused
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub(crate) fn set_camera(&self, mvp: [f32; 16]) {
        *self.camera.lock() = mvp;
    }

    pub(crate) fn camera(&self) -> [f32; 16] {
        *self.camera.lock()
    }
}

/// Records which thread owns the GL context.
#[derive(Clone, Copy, Debug)]
pub(crate) struct GlThread {
    owner: ThreadId,
}

impl GlThread {
    /// Binds affinity to the calling thread.
    pub(crate) fn current() -> Self {
        Self {
            owner: thread::current().id(),
        }
    }

    pub(crate) fn is_current(self) -> bool {
        thread::current().id() == self.owner
    }

    /// Fails with [`AdError::WrongThread`] off the GL thread. Host misuse,
    /// so it is logged loudly.
    pub(crate) fn check(self, operation: &'static str) -> Result<(), AdError> {
        if self.is_current() {
            return Ok(());
        }
        let current = thread::current();
        log::error!(
            "`{operation}` called from thread {:?} ({:?}); GL thread is {:?}",
            current.name().unwrap_or("<unnamed>"),
            current.id(),
            self.owner
        );
        Err(AdError::WrongThread(operation))
    }
}
