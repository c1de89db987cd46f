//! State shared between the GL thread and every other thread, and the
//! [`AdClient`] handle that exposes the any-thread entry points.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::AdsConfig;
use crate::error::{AdError, FetchError};
use crate::events::{AdEvent, EventSink};
use crate::fetch::{FetchCoordinator, FetchSink};
use crate::handle::{AdHandle, Arena};
use crate::instance::{AdInstance, AdSnapshot, AdState};
use crate::queue::{GlJob, JobSender};
use crate::session::SessionState;
use crate::types::{DecodedAsset, Geometry};

#[derive(Default)]
pub(crate) struct Counters {
    pub(crate) fetches_started: AtomicU64,
    pub(crate) fetches_succeeded: AtomicU64,
    pub(crate) fetches_failed: AtomicU64,
    pub(crate) stale_jobs: AtomicU64,
}

impl Counters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Everything reachable from both contexts.
pub(crate) struct Shared {
    pub(crate) config: AdsConfig,
    pub(crate) session: SessionState,
    pub(crate) instances: Mutex<Arena<AdInstance>>,
    pub(crate) jobs: JobSender,
    pub(crate) fetcher: FetchCoordinator,
    pub(crate) events: EventSink,
    pub(crate) counters: Counters,
}

/// Resolves a handle to an instance that has not been released.
pub(crate) fn live_mut(
    arena: &mut Arena<AdInstance>,
    handle: AdHandle,
) -> Result<&mut AdInstance, AdError> {
    match arena.get_mut(handle) {
        Some(ad) if !ad.is_released() => Ok(ad),
        _ => Err(AdError::InvalidHandle),
    }
}

impl Shared {
    /// Creates an instance in `Requested` and schedules its fetch. Both
    /// public request entry points end up here.
    pub(crate) fn request(&self, placement_id: String) -> Result<AdHandle, AdError> {
        self.session.ensure_initialized()?;

        let handle = {
            let mut instances = self.instances.lock();
            if instances.len() >= self.config.max_instances {
                log::warn!(
                    "refusing ad request for '{placement_id}': {} ads alive",
                    instances.len()
                );
                return Err(AdError::CapacityExceeded(self.config.max_instances));
            }
            let ad = AdInstance::new(
                placement_id,
                self.config.ads_visible_by_default,
                self.config.default_refresh_interval(),
            );
            log::debug!("requesting ad for placement '{}'", ad.placement_id);
            instances.insert(ad)
        };

        self.schedule_or_abandon(handle);
        Ok(handle)
    }

    /// Schedules a fetch whose instance is already marked in flight. If the
    /// pool is gone (finalize raced the call) the instance is settled as a
    /// failed fetch instead of staying `Loading` forever.
    pub(crate) fn schedule_or_abandon(&self, handle: AdHandle) {
        if self.fetcher.schedule(handle) {
            return;
        }
        log::warn!("fetch pool closed; fetch for {handle:?} abandoned");
        if let Ok(ad) = live_mut(&mut self.instances.lock(), handle) {
            ad.abandon_fetch(Instant::now());
        }
    }

    pub(crate) fn refresh(&self, handle: AdHandle) -> Result<(), AdError> {
        self.session.ensure_initialized()?;
        let scheduled = {
            let mut instances = self.instances.lock();
            let ad = live_mut(&mut instances, handle)?;
            if !self.session.is_enabled() {
                log::debug!("ads disabled; ignoring refresh of '{}'", ad.placement_id);
                false
            } else if ad.begin_refresh() {
                log::debug!("refreshing ad '{}'", ad.placement_id);
                true
            } else {
                log::debug!(
                    "refresh of '{}' ignored in state {:?} (fetch in flight: {})",
                    ad.placement_id,
                    ad.state,
                    ad.fetch_in_flight
                );
                false
            }
        };
        if scheduled {
            self.schedule_or_abandon(handle);
        }
        Ok(())
    }

    pub(crate) fn set_visible(&self, handle: AdHandle, visible: bool) -> Result<(), AdError> {
        self.session.ensure_initialized()?;
        live_mut(&mut self.instances.lock(), handle)?.visible = visible;
        Ok(())
    }

    pub(crate) fn set_refresh_interval(
        &self,
        handle: AdHandle,
        interval: Duration,
    ) -> Result<(), AdError> {
        self.session.ensure_initialized()?;
        live_mut(&mut self.instances.lock(), handle)?.refresh_interval = interval;
        Ok(())
    }

    /// Marks the instance `Released` now and leaves GPU teardown to the GL
    /// thread. Any fetch still in flight finds a released instance and
    /// does nothing.
    pub(crate) fn release_deferred(&self, handle: AdHandle) -> Result<(), AdError> {
        self.session.ensure_initialized()?;
        let mut instances = self.instances.lock();
        let ad = live_mut(&mut instances, handle)?;
        ad.transition(AdState::Released);
        log::debug!("ad '{}' released; teardown queued", ad.placement_id);
        self.jobs.push(GlJob::ReleaseResources { handle });
        Ok(())
    }

    pub(crate) fn queue_geometry(&self, handle: AdHandle, geometry: Geometry) -> Result<(), AdError> {
        self.session.ensure_initialized()?;
        if live_mut(&mut self.instances.lock(), handle)?.resource.is_none() {
            return Err(AdError::NotReady);
        }
        self.jobs.push(GlJob::RebindGeometry { handle, geometry });
        Ok(())
    }

    /// State of an instance, including the `Released` tombstone that lives
    /// until the GL thread vacates the slot.
    pub(crate) fn state(&self, handle: AdHandle) -> Result<AdState, AdError> {
        self.session.ensure_initialized()?;
        self.instances
            .lock()
            .get(handle)
            .map(|ad| ad.state)
            .ok_or(AdError::InvalidHandle)
    }

    pub(crate) fn snapshot(&self, handle: AdHandle) -> Result<AdSnapshot, AdError> {
        self.session.ensure_initialized()?;
        self.instances
            .lock()
            .get(handle)
            .map(AdInstance::snapshot)
            .ok_or(AdError::InvalidHandle)
    }
}

impl FetchSink for Shared {
    fn begin_fetch(&self, handle: AdHandle) -> Option<String> {
        if !self.session.is_initialized() {
            return None;
        }
        let mut instances = self.instances.lock();
        let ad = live_mut(&mut instances, handle).ok()?;
        if ad.state == AdState::Requested {
            ad.transition(AdState::Loading);
        }
        Counters::bump(&self.counters.fetches_started);
        Some(ad.placement_id.clone())
    }

    fn finish_fetch(&self, handle: AdHandle, result: Result<DecodedAsset, FetchError>) {
        let mut instances = self.instances.lock();
        let Ok(ad) = live_mut(&mut instances, handle) else {
            log::debug!("fetch for {handle:?} finished after release; ignored");
            return;
        };

        match result {
            Ok(asset) => {
                Counters::bump(&self.counters.fetches_succeeded);
                log::debug!(
                    "fetched {}x{} creative for '{}'",
                    asset.width(),
                    asset.height(),
                    ad.placement_id
                );
                // `fetch_in_flight` stays set until the build job runs, so a
                // refresh cannot overlap with the pending build.
                if !self.jobs.push(GlJob::BuildResources { handle, asset }) {
                    ad.abandon_fetch(Instant::now());
                }
            }
            Err(err) => {
                Counters::bump(&self.counters.fetches_failed);
                if ad.resource.is_some() {
                    log::warn!(
                        "refresh of '{}' failed, keeping previous creative: {err}",
                        ad.placement_id
                    );
                } else {
                    log::warn!("ad '{}' failed: {err}", ad.placement_id);
                }
                ad.abandon_fetch(Instant::now());
                self.events.publish(AdEvent::Failed {
                    handle,
                    reason: AdError::from(err).to_string(),
                });
            }
        }
    }
}

/// Any-thread view of an initialized SDK.
///
/// Cheap to clone and `Send + Sync`. Nothing reachable from here touches the
/// GPU: work that needs the GL thread is queued and runs on its next
/// [`AdSdk::on_draw`](crate::AdSdk::on_draw) or
/// [`AdSdk::process_jobs`](crate::AdSdk::process_jobs).
#[derive(Clone)]
pub struct AdClient {
    pub(crate) shared: Arc<Shared>,
}

impl AdClient {
    /// Stores the camera model-view-projection matrix (column-major).
    ///
    /// # Errors
    ///
    /// [`AdError::NotInitialized`].
    pub fn update_camera(&self, mvp: [f32; 16]) -> Result<(), AdError> {
        self.shared.session.ensure_initialized()?;
        self.shared.session.set_camera(mvp);
        Ok(())
    }

    /// Latest camera matrix.
    #[must_use]
    pub fn camera(&self) -> [f32; 16] {
        self.shared.session.camera()
    }

    /// Requests an ad for `placement_id` and returns its handle before the
    /// fetch completes.
    ///
    /// # Errors
    ///
    /// [`AdError::NotInitialized`] or [`AdError::CapacityExceeded`].
    pub fn request_ad_async(&self, placement_id: impl Into<String>) -> Result<AdHandle, AdError> {
        self.shared.request(placement_id.into())
    }

    /// Fetches a new creative for a `Ready` or `Failed` ad. Ignored while a
    /// fetch for the same ad is in flight or ads are disabled.
    ///
    /// # Errors
    ///
    /// [`AdError::NotInitialized`] or [`AdError::InvalidHandle`].
    pub fn refresh_ad(&self, handle: AdHandle) -> Result<(), AdError> {
        self.shared.refresh(handle)
    }

    /// Turns the whole SDK on or off. Disabled ads keep their GPU resources
    /// but are not drawn or refreshed.
    pub fn enable(&self, enabled: bool) {
        self.shared.session.set_enabled(enabled);
    }

    /// Whether ads are enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.shared.session.is_enabled()
    }

    /// Whether the session is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.shared.session.is_paused()
    }

    /// Shows or hides one ad.
    ///
    /// # Errors
    ///
    /// [`AdError::NotInitialized`] or [`AdError::InvalidHandle`].
    pub fn show_ad(&self, handle: AdHandle, visible: bool) -> Result<(), AdError> {
        self.shared.set_visible(handle, visible)
    }

    /// Releases an ad from any thread. The handle is invalid immediately;
    /// GPU resources are freed on the GL thread's next frame.
    ///
    /// # Errors
    ///
    /// [`AdError::NotInitialized`] or [`AdError::InvalidHandle`].
    pub fn release_ad(&self, handle: AdHandle) -> Result<(), AdError> {
        self.shared.release_deferred(handle)
    }

    /// Queues a mesh replacement for the GL thread's next frame. The
    /// geometry is validated now.
    ///
    /// # Errors
    ///
    /// [`AdError::InvalidGeometry`], [`AdError::NotReady`] before the first
    /// build, [`AdError::NotInitialized`] or [`AdError::InvalidHandle`].
    pub fn bind_ad_vertices(
        &self,
        handle: AdHandle,
        vertices: Vec<f32>,
        components_per_vertex: usize,
    ) -> Result<(), AdError> {
        let geometry = Geometry::new(vertices, components_per_vertex)?;
        self.shared.queue_geometry(handle, geometry)
    }

    /// Like [`bind_ad_vertices`](Self::bind_ad_vertices) with explicit
    /// texcoords.
    ///
    /// # Errors
    ///
    /// See [`bind_ad_vertices`](Self::bind_ad_vertices).
    pub fn bind_ad_vertices_with_texcoords(
        &self,
        handle: AdHandle,
        vertices: Vec<f32>,
        components_per_vertex: usize,
        texcoords: Vec<f32>,
    ) -> Result<(), AdError> {
        let geometry = Geometry::with_texcoords(vertices, components_per_vertex, texcoords)?;
        self.shared.queue_geometry(handle, geometry)
    }

    /// Current lifecycle state.
    ///
    /// # Errors
    ///
    /// [`AdError::NotInitialized`], or [`AdError::InvalidHandle`] once the
    /// slot is vacated.
    pub fn ad_state(&self, handle: AdHandle) -> Result<AdState, AdError> {
        self.shared.state(handle)
    }

    /// Read-only view of one ad.
    ///
    /// # Errors
    ///
    /// See [`ad_state`](Self::ad_state).
    pub fn ad_info(&self, handle: AdHandle) -> Result<AdSnapshot, AdError> {
        self.shared.snapshot(handle)
    }
}
