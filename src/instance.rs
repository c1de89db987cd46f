//! Per-placement ad instances and their state machine.

use std::time::{Duration, Instant};

use crate::store::ResourceId;
use crate::types::{CullFace, DrawMode, Geometry};

/// Lifecycle state of an ad instance.
///
/// ```text
/// Requested ─► Loading ─► Ready ─► Released
///    │            │  ▲       │
///    │            ▼  └───────┘ refresh
///    │         Failed ─► Released
///    └──────────────────► Released
/// ```
///
/// `Failed → Loading` is a retry through `refresh_ad`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AdState {
    /// Created, fetch not yet picked up by a worker.
    Requested,
    /// A fetch is in flight.
    Loading,
    /// GPU resources are built and drawable.
    Ready,
    /// The initial fetch failed; no GPU resources.
    Failed,
    /// Released by the host; waiting for the GL thread to vacate the slot.
    Released,
}

impl AdState {
    /// Whether `self → next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: AdState) -> bool {
        use AdState::{Failed, Loading, Ready, Released, Requested};
        matches!(
            (self, next),
            (Requested, Loading)
                | (Loading, Ready | Failed)
                | (Ready | Failed, Loading)
                | (Requested | Loading | Ready | Failed, Released)
        )
    }
}

/// Read-only view of an ad instance.
#[derive(Clone, Debug, PartialEq)]
pub struct AdSnapshot {
    /// Placement the instance was requested for.
    pub placement_id: String,
    /// Current lifecycle state.
    pub state: AdState,
    /// Host-controlled visibility.
    pub visible: bool,
    /// Auto-refresh period, zero when disabled.
    pub refresh_interval: Duration,
    /// Vertices in the current geometry.
    pub vertex_count: usize,
    /// Width of each position tuple.
    pub components_per_vertex: usize,
    /// Face culling applied at draw time.
    pub cull_face: CullFace,
    /// Primitive mode applied at draw time.
    pub draw_mode: DrawMode,
    /// Whether the instance currently owns GPU resources.
    pub has_gpu_resources: bool,
    /// Frames the ad was drawn while the session was not paused.
    pub frames_shown: u64,
}

pub(crate) struct AdInstance {
    pub(crate) placement_id: String,
    pub(crate) state: AdState,
    pub(crate) visible: bool,
    pub(crate) refresh_interval: Duration,
    pub(crate) geometry: Geometry,
    pub(crate) cull_face: CullFace,
    pub(crate) draw_mode: DrawMode,
    pub(crate) resource: Option<ResourceId>,
    /// A fetch for this instance is queued or running.
    pub(crate) fetch_in_flight: bool,
    /// When the last fetch attempt settled, successful or not. Auto-refresh
    /// counts from here.
    pub(crate) last_refresh_attempt: Option<Instant>,
    pub(crate) frames_shown: u64,
}

impl AdInstance {
    pub(crate) fn new(placement_id: String, visible: bool, refresh_interval: Duration) -> Self {
        Self {
            placement_id,
            state: AdState::Requested,
            visible,
            refresh_interval,
            geometry: Geometry::unit_quad(),
            cull_face: CullFace::default(),
            draw_mode: DrawMode::default(),
            resource: None,
            fetch_in_flight: true,
            last_refresh_attempt: None,
            frames_shown: 0,
        }
    }

    /// Applies a transition, logging and refusing illegal ones.
    pub(crate) fn transition(&mut self, next: AdState) -> bool {
        if !self.state.can_transition_to(next) {
            log::debug!(
                "ad '{}': ignoring transition {:?} -> {next:?}",
                self.placement_id,
                self.state
            );
            return false;
        }
        log::trace!("ad '{}': {:?} -> {next:?}", self.placement_id, self.state);
        self.state = next;
        true
    }

    pub(crate) fn is_released(&self) -> bool {
        self.state == AdState::Released
    }

    /// Starts a refresh fetch. Returns `false` when one is already running
    /// or the state does not allow it.
    pub(crate) fn begin_refresh(&mut self) -> bool {
        if self.fetch_in_flight || !matches!(self.state, AdState::Ready | AdState::Failed) {
            return false;
        }
        self.fetch_in_flight = true;
        self.transition(AdState::Loading)
    }

    /// Settles a fetch that produced no new creative. An instance that
    /// already shows one goes back to `Ready` and keeps it; otherwise it is
    /// `Failed`. Restarts the refresh clock either way.
    pub(crate) fn abandon_fetch(&mut self, now: Instant) {
        self.fetch_in_flight = false;
        self.last_refresh_attempt = Some(now);
        if self.state == AdState::Requested {
            self.transition(AdState::Loading);
        }
        if self.resource.is_some() {
            self.transition(AdState::Ready);
        } else {
            self.transition(AdState::Failed);
        }
    }

    /// Whether the auto-refresh period has elapsed.
    pub(crate) fn refresh_due(&self, now: Instant) -> bool {
        if self.refresh_interval.is_zero() || self.state != AdState::Ready || self.fetch_in_flight {
            return false;
        }
        self.last_refresh_attempt
            .is_some_and(|at| now.saturating_duration_since(at) >= self.refresh_interval)
    }

    /// Whether `on_draw` should draw this instance.
    pub(crate) fn drawable(&self) -> bool {
        self.visible && self.resource.is_some() && !self.is_released()
    }

    pub(crate) fn snapshot(&self) -> AdSnapshot {
        AdSnapshot {
            placement_id: self.placement_id.clone(),
            state: self.state,
            visible: self.visible,
            refresh_interval: self.refresh_interval,
            vertex_count: self.geometry.vertex_count(),
            components_per_vertex: self.geometry.components_per_vertex(),
            cull_face: self.cull_face,
            draw_mode: self.draw_mode,
            has_gpu_resources: self.resource.is_some(),
            frames_shown: self.frames_shown,
        }
    }
}
