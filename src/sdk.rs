//! The GL-thread side of the SDK.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use parking_lot::Mutex;

use crate::backend::{DrawBindings, GpuBackend};
use crate::client::{live_mut, AdClient, Counters, Shared};
use crate::config::AdsConfig;
use crate::error::AdError;
use crate::events::{AdEvent, EventSink};
use crate::fetch::{AdSource, FetchCoordinator};
use crate::handle::{AdHandle, Arena};
use crate::instance::{AdSnapshot, AdState};
use crate::queue::{GlJob, JobQueue};
use crate::session::{GlThread, SessionState};
use crate::store::{GpuResourceStore, StoreStats};
use crate::types::{CullFace, DecodedAsset, DrawMode, Geometry};

/// Counters describing the SDK as a whole.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SdkStats {
    /// GPU resource store counters.
    pub store: StoreStats,
    /// Ads occupying a slot, including released ones awaiting teardown.
    pub live_ads: usize,
    /// Jobs waiting for the next drain.
    pub pending_jobs: usize,
    /// Fetches a worker started.
    pub fetches_started: u64,
    /// Fetches that produced a creative.
    pub fetches_succeeded: u64,
    /// Fetches that failed.
    pub fetches_failed: u64,
    /// Jobs dropped because their ad was released first.
    pub stale_jobs: u64,
}

/// An initialized SDK, owned by the thread holding the GL context.
///
/// Created by [`init`](Self::init) on the GL thread; every GPU-touching
/// method verifies it is still called from that thread and returns
/// [`AdError::WrongThread`] otherwise. Other threads use the [`AdClient`]
/// from [`client`](Self::client).
///
/// # Example
///
/// ```no_run
/// # use glow_ad_surfaces::{AdSdk, AdsConfig, DecodedAsset, DrawBindings, FetchError, RecordingBackend};
/// let mut sdk = AdSdk::init(AdsConfig::default(), RecordingBackend::new(), |_placement: &str| {
///     // Talk to the ad network here; this runs on a fetch worker.
///     DecodedAsset::from_rgba8(vec![255; 4], 1, 1)
/// })?;
/// let banner = sdk.request_ad("main-menu")?;
/// let bindings = DrawBindings::from_gl_locations(0, 1, 0).expect("position attribute");
///
/// // Each frame, after binding the shader program:
/// sdk.on_draw(&bindings)?;
///
/// sdk.release_ad(banner)?;
/// sdk.finalize()?;
/// # Ok::<(), glow_ad_surfaces::AdError>(())
/// ```
pub struct AdSdk<B: GpuBackend> {
    shared: Arc<Shared>,
    store: GpuResourceStore<B>,
    jobs: JobQueue,
    gl_thread: GlThread,
}

impl<B: GpuBackend> AdSdk<B> {
    /// Starts the SDK. The calling thread becomes the GL thread.
    ///
    /// # Errors
    ///
    /// [`AdError::Config`] for out-of-range settings,
    /// [`AdError::WorkerSpawn`] if no fetch worker can be started.
    pub fn init(config: AdsConfig, backend: B, source: impl AdSource) -> Result<Self, AdError> {
        config.validate()?;

        let gl_thread = GlThread::current();
        let (job_tx, jobs) = JobQueue::new();
        let (fetcher, workers) = FetchCoordinator::new(config.fetch_workers);
        let worker_count = config.fetch_workers;

        let shared = Arc::new(Shared {
            events: EventSink::new(config.event_capacity),
            config,
            session: SessionState::new(),
            instances: Mutex::new(Arena::new()),
            jobs: job_tx,
            fetcher,
            counters: Counters::default(),
        });
        let spawned = workers.spawn(worker_count, Arc::new(source), Arc::downgrade(&shared))?;
        log::info!("ad SDK initialized ({spawned} fetch workers)");

        Ok(Self {
            shared,
            store: GpuResourceStore::new(backend),
            jobs,
            gl_thread,
        })
    }

    /// Precondition shared by every GL-thread entry point.
    fn gl_entry(&self, operation: &'static str) -> Result<(), AdError> {
        self.shared.session.ensure_initialized()?;
        self.gl_thread.check(operation)
    }

    /// Any-thread handle onto this SDK.
    #[must_use]
    pub fn client(&self) -> AdClient {
        AdClient {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Lifecycle notifications, including fetch failures.
    #[must_use]
    pub fn events(&self) -> Receiver<AdEvent> {
        self.shared.events.receiver()
    }

    /// The GPU resource store.
    #[must_use]
    pub fn store(&self) -> &GpuResourceStore<B> {
        &self.store
    }

    /// The backend behind the store.
    #[must_use]
    pub fn backend(&self) -> &B {
        self.store.backend()
    }

    /// Mutable backend access, e.g. to clear a recording between frames.
    pub fn backend_mut(&mut self) -> &mut B {
        self.store.backend_mut()
    }

    /// Snapshot of the SDK's counters.
    #[must_use]
    pub fn stats(&self) -> SdkStats {
        let counters = &self.shared.counters;
        SdkStats {
            store: self.store.stats(),
            live_ads: self.shared.instances.lock().len(),
            pending_jobs: self.jobs.len(),
            fetches_started: counters.fetches_started.load(Ordering::Relaxed),
            fetches_succeeded: counters.fetches_succeeded.load(Ordering::Relaxed),
            fetches_failed: counters.fetches_failed.load(Ordering::Relaxed),
            stale_jobs: counters.stale_jobs.load(Ordering::Relaxed),
        }
    }

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

    /// Latest camera matrix, identity until [`update_camera`](Self::update_camera).
    #[must_use]
    pub fn camera(&self) -> [f32; 16] {
        self.shared.session.camera()
    }

    /// Requests an ad from the GL thread. Returns immediately; the creative
    /// is fetched in the background and uploaded during a later frame.
    ///
    /// # Errors
    ///
    /// [`AdError::NotInitialized`], [`AdError::WrongThread`] or
    /// [`AdError::CapacityExceeded`].
    pub fn request_ad(&self, placement_id: impl Into<String>) -> Result<AdHandle, AdError> {
        self.gl_entry("request_ad")?;
        self.shared.request(placement_id.into())
    }

    /// Same as [`request_ad`](Self::request_ad) without the thread check;
    /// see [`AdClient::request_ad_async`].
    ///
    /// # Errors
    ///
    /// [`AdError::NotInitialized`] or [`AdError::CapacityExceeded`].
    pub fn request_ad_async(&self, placement_id: impl Into<String>) -> Result<AdHandle, AdError> {
        self.shared.request(placement_id.into())
    }

    /// Replaces the ad's mesh with `components_per_vertex`-wide positions.
    ///
    /// # Errors
    ///
    /// [`AdError::InvalidGeometry`] (previous mesh kept), [`AdError::NotReady`]
    /// before the first build, plus the usual handle/thread/init errors.
    pub fn bind_ad_vertices(
        &mut self,
        handle: AdHandle,
        vertices: Vec<f32>,
        components_per_vertex: usize,
    ) -> Result<(), AdError> {
        self.gl_entry("bind_ad_vertices")?;
        let mut instances = self.shared.instances.lock();
        let ad = live_mut(&mut instances, handle)?;
        let resource = ad.resource.ok_or(AdError::NotReady)?;
        ad.geometry = self
            .store
            .rebind_vertices(resource, vertices, components_per_vertex)?;
        Ok(())
    }

    /// Replaces the ad's mesh and texcoords.
    ///
    /// # Errors
    ///
    /// See [`bind_ad_vertices`](Self::bind_ad_vertices).
    pub fn bind_ad_vertices_with_texcoords(
        &mut self,
        handle: AdHandle,
        vertices: Vec<f32>,
        components_per_vertex: usize,
        texcoords: Vec<f32>,
    ) -> Result<(), AdError> {
        self.gl_entry("bind_ad_vertices_with_texcoords")?;
        let mut instances = self.shared.instances.lock();
        let ad = live_mut(&mut instances, handle)?;
        let resource = ad.resource.ok_or(AdError::NotReady)?;
        ad.geometry = self.store.rebind_vertices_with_texcoords(
            resource,
            vertices,
            components_per_vertex,
            texcoords,
        )?;
        Ok(())
    }

    /// Sets face culling for one ad (`Back` by default).
    ///
    /// # Errors
    ///
    /// [`AdError::NotReady`] before the first build, plus the usual
    /// handle/thread/init errors.
    pub fn set_ad_cull_face(&mut self, handle: AdHandle, mode: CullFace) -> Result<(), AdError> {
        self.gl_entry("set_ad_cull_face")?;
        let mut instances = self.shared.instances.lock();
        let ad = live_mut(&mut instances, handle)?;
        let resource = ad.resource.ok_or(AdError::NotReady)?;
        self.store.set_cull_face(resource, mode)?;
        ad.cull_face = mode;
        Ok(())
    }

    /// Sets the `glDrawArrays` mode for one ad (`TriangleFan` by default).
    ///
    /// # Errors
    ///
    /// See [`set_ad_cull_face`](Self::set_ad_cull_face).
    pub fn set_ad_draw_mode(&mut self, handle: AdHandle, mode: DrawMode) -> Result<(), AdError> {
        self.gl_entry("set_ad_draw_mode")?;
        let mut instances = self.shared.instances.lock();
        let ad = live_mut(&mut instances, handle)?;
        let resource = ad.resource.ok_or(AdError::NotReady)?;
        self.store.set_draw_mode(resource, mode)?;
        ad.draw_mode = mode;
        Ok(())
    }

    /// Fetches a new creative; see [`AdClient::refresh_ad`].
    ///
    /// # Errors
    ///
    /// [`AdError::NotInitialized`] or [`AdError::InvalidHandle`].
    pub fn refresh_ad(&self, handle: AdHandle) -> Result<(), AdError> {
        self.shared.refresh(handle)
    }

    /// Sets the auto-refresh period of one ad; zero disables it. Measured
    /// from the last successful build.
    ///
    /// # Errors
    ///
    /// The usual handle/thread/init errors.
    pub fn set_ad_refresh_interval(
        &self,
        handle: AdHandle,
        interval: Duration,
    ) -> Result<(), AdError> {
        self.gl_entry("set_ad_refresh_interval")?;
        self.shared.set_refresh_interval(handle, interval)
    }

    /// Turns the whole SDK on or off; see [`AdClient::enable`].
    pub fn enable(&self, enabled: bool) {
        self.shared.session.set_enabled(enabled);
    }

    /// Shows or hides one ad.
    ///
    /// # Errors
    ///
    /// [`AdError::NotInitialized`] or [`AdError::InvalidHandle`].
    pub fn show_ad(&self, handle: AdHandle, visible: bool) -> Result<(), AdError> {
        self.shared.set_visible(handle, visible)
    }

    /// Suspends per-ad frame accounting, e.g. while the app is minimized.
    pub fn pause(&self) {
        if self.shared.session.set_paused(true) {
            log::info!("ad session paused");
        }
    }

    /// Resumes frame accounting.
    pub fn resume(&self) {
        if self.shared.session.set_paused(false) {
            log::info!("ad session resumed");
        }
    }

    /// Per-frame entry point. Call once per frame after binding the shader
    /// program, before swapping buffers.
    ///
    /// Drains queued GPU work, fires due auto-refreshes and draws every
    /// visible ad that has resources. Returns the number of ads drawn.
    ///
    /// # Errors
    ///
    /// [`AdError::NotInitialized`] or [`AdError::WrongThread`].
    pub fn on_draw(&mut self, bindings: &DrawBindings) -> Result<usize, AdError> {
        self.gl_entry("on_draw")?;
        self.process_jobs()?;

        if !self.shared.session.is_enabled() {
            return Ok(0);
        }
        let count_frame = !self.shared.session.is_paused();

        let mut refreshes = Vec::new();
        let mut draws = Vec::new();
        {
            let now = Instant::now();
            let mut instances = self.shared.instances.lock();
            for (handle, ad) in instances.iter_mut() {
                if ad.refresh_due(now) && ad.begin_refresh() {
                    log::debug!("auto-refreshing ad '{}'", ad.placement_id);
                    refreshes.push(handle);
                }
                if let (true, Some(resource)) = (ad.drawable(), ad.resource) {
                    if count_frame {
                        ad.frames_shown += 1;
                    }
                    draws.push(resource);
                }
            }
        }

        for handle in refreshes {
            self.shared.schedule_or_abandon(handle);
        }
        for resource in &draws {
            self.store.draw(*resource, bindings)?;
        }
        Ok(draws.len())
    }

    /// Runs every queued GL job. Called by [`on_draw`](Self::on_draw); call
    /// it directly to make progress on frames where ads are not drawn.
    /// Returns the number of jobs run.
    ///
    /// # Errors
    ///
    /// [`AdError::NotInitialized`] or [`AdError::WrongThread`].
    pub fn process_jobs(&mut self) -> Result<usize, AdError> {
        self.gl_entry("process_jobs")?;
        let jobs = self.jobs.drain();
        let count = jobs.len();
        for job in jobs {
            match job {
                GlJob::BuildResources { handle, asset } => self.build_resources(handle, &asset),
                GlJob::ReleaseResources { handle } => self.release_resources(handle),
                GlJob::RebindGeometry { handle, geometry } => {
                    self.rebind_geometry(handle, geometry);
                }
            }
        }
        Ok(count)
    }

    fn stale_job(&self, handle: AdHandle, job: &str) {
        Counters::bump(&self.shared.counters.stale_jobs);
        log::debug!("{job} for {handle:?} skipped: ad released");
    }

    fn build_resources(&mut self, handle: AdHandle, asset: &DecodedAsset) {
        let mut instances = self.shared.instances.lock();
        let Ok(ad) = live_mut(&mut instances, handle) else {
            drop(instances);
            self.stale_job(handle, "build");
            return;
        };

        let existing = ad.resource;
        let built = match existing {
            Some(resource) => self.store.update_texture(resource, asset),
            None => self
                .store
                .create(asset, Some(&ad.geometry))
                .and_then(|resource| {
                    ad.resource = Some(resource);
                    self.store.set_cull_face(resource, ad.cull_face)?;
                    self.store.set_draw_mode(resource, ad.draw_mode)
                }),
        };

        match built {
            Ok(()) => {
                ad.fetch_in_flight = false;
                ad.transition(AdState::Ready);
                ad.last_refresh_attempt = Some(Instant::now());
                log::debug!("ad '{}' ready", ad.placement_id);
                self.shared.events.publish(AdEvent::Ready(handle));
            }
            Err(err) => {
                log::error!("building resources for '{}' failed: {err}", ad.placement_id);
                ad.abandon_fetch(Instant::now());
                self.shared.events.publish(AdEvent::Failed {
                    handle,
                    reason: err.to_string(),
                });
            }
        }
    }

    fn release_resources(&mut self, handle: AdHandle) {
        let mut instances = self.shared.instances.lock();
        let Some(ad) = instances.get_mut(handle) else {
            log::debug!("release for {handle:?} skipped: slot already vacated");
            return;
        };
        if let Some(resource) = ad.resource.take() {
            if let Err(err) = self.store.destroy(resource) {
                log::error!("destroying resources of '{}' failed: {err}", ad.placement_id);
            }
        }
        instances.remove(handle);
        self.shared.events.publish(AdEvent::Released(handle));
    }

    fn rebind_geometry(&mut self, handle: AdHandle, geometry: Geometry) {
        let mut instances = self.shared.instances.lock();
        let Ok(ad) = live_mut(&mut instances, handle) else {
            drop(instances);
            self.stale_job(handle, "rebind");
            return;
        };
        let Some(resource) = ad.resource else {
            return;
        };
        match self.store.rebind(resource, &geometry) {
            Ok(()) => ad.geometry = geometry,
            Err(err) => log::error!("rebinding '{}' failed: {err}", ad.placement_id),
        }
    }

    /// Releases one ad on the GL thread: its GPU resources are destroyed
    /// before this returns and the handle is invalid afterwards. A fetch
    /// still in flight completes into nothing.
    ///
    /// # Errors
    ///
    /// [`AdError::InvalidHandle`] for null, stale or already released
    /// handles, plus thread/init errors.
    pub fn release_ad(&mut self, handle: AdHandle) -> Result<(), AdError> {
        self.gl_entry("release_ad")?;
        let mut instances = self.shared.instances.lock();
        let ad = live_mut(&mut instances, handle)?;
        if let Some(resource) = ad.resource {
            self.store.destroy(resource)?;
            ad.resource = None;
        }
        ad.transition(AdState::Released);
        log::debug!("ad '{}' released", ad.placement_id);
        instances.remove(handle);
        self.shared.events.publish(AdEvent::Released(handle));
        Ok(())
    }

    /// Current lifecycle state; see [`AdClient::ad_state`].
    ///
    /// # Errors
    ///
    /// [`AdError::NotInitialized`] or [`AdError::InvalidHandle`].
    pub fn ad_state(&self, handle: AdHandle) -> Result<AdState, AdError> {
        self.shared.state(handle)
    }

    /// Read-only view of one ad.
    ///
    /// # Errors
    ///
    /// [`AdError::NotInitialized`] or [`AdError::InvalidHandle`].
    pub fn ad_info(&self, handle: AdHandle) -> Result<AdSnapshot, AdError> {
        self.shared.snapshot(handle)
    }

    /// Shuts the SDK down: releases every ad, destroys all GPU resources and
    /// stops the fetch workers without waiting for in-flight fetches.
    /// Every later call on this SDK or its clients fails with
    /// [`AdError::NotInitialized`].
    ///
    /// # Errors
    ///
    /// [`AdError::NotInitialized`] if already finalized,
    /// [`AdError::WrongThread`].
    pub fn finalize(&mut self) -> Result<(), AdError> {
        self.gl_entry("finalize")?;
        if !self.shared.session.shut_down() {
            return Err(AdError::NotInitialized);
        }
        self.shared.fetcher.shutdown();

        let released = {
            let mut instances = self.shared.instances.lock();
            let handles = instances.handles();
            for handle in &handles {
                instances.remove(*handle);
            }
            handles.len()
        };
        let destroyed = self.store.destroy_all()?;
        let dropped = self.jobs.drain().len();
        log::info!(
            "ad SDK finalized ({released} ads released, {destroyed} resources destroyed, {dropped} jobs dropped)"
        );
        Ok(())
    }
}

impl<B: GpuBackend> Drop for AdSdk<B> {
    fn drop(&mut self) {
        if !self.shared.session.is_initialized() {
            return;
        }
        if self.gl_thread.is_current() {
            if let Err(err) = self.finalize() {
                log::error!("finalize on drop failed: {err}");
            }
        } else {
            log::error!("ad SDK dropped off the GL thread; GPU resources leaked");
            self.shared.session.shut_down();
            self.shared.fetcher.shutdown();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    use crossbeam_channel::Sender;

    use super::*;
    use crate::backend::RecordingBackend;
    use crate::error::FetchError;

    type Sdk = AdSdk<RecordingBackend>;

    fn creative() -> DecodedAsset {
        DecodedAsset::from_rgba8(vec![200; 2 * 2 * 4], 2, 2).unwrap()
    }

    fn config() -> AdsConfig {
        AdsConfig {
            fetch_workers: 1,
            ..AdsConfig::default()
        }
    }

    fn bindings() -> DrawBindings {
        DrawBindings::from_gl_locations(0, 1, 0).unwrap()
    }

    fn instant_sdk() -> Sdk {
        AdSdk::init(config(), RecordingBackend::new(), |_: &str| Ok(creative())).unwrap()
    }

    /// Source that blocks every fetch until the returned sender sends or is
    /// dropped.
    fn gated_sdk() -> (Sdk, Sender<()>) {
        let (open, gate) = crossbeam_channel::unbounded::<()>();
        let sdk = AdSdk::init(config(), RecordingBackend::new(), move |_: &str| {
            let _ = gate.recv();
            Ok(creative())
        })
        .unwrap();
        (sdk, open)
    }

    /// Drains jobs until `done` holds, failing after a generous timeout.
    fn pump_until(sdk: &mut Sdk, mut done: impl FnMut(&mut Sdk) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            sdk.process_jobs().unwrap();
            if done(sdk) {
                return;
            }
            assert!(Instant::now() < deadline, "timed out waiting for the SDK");
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn wait_for_state(sdk: &mut Sdk, handle: AdHandle, state: AdState) {
        pump_until(sdk, |sdk| sdk.ad_state(handle) == Ok(state));
    }

    fn ready_ad(sdk: &mut Sdk) -> AdHandle {
        let handle = sdk.request_ad("banner").unwrap();
        wait_for_state(sdk, handle, AdState::Ready);
        handle
    }

    #[test]
    fn request_builds_on_the_next_frame_and_draws() {
        let mut sdk = instant_sdk();
        let events = sdk.events();
        let handle = sdk.request_ad("main-menu").unwrap();
        assert!(matches!(
            sdk.ad_state(handle).unwrap(),
            AdState::Requested | AdState::Loading
        ));

        wait_for_state(&mut sdk, handle, AdState::Ready);
        assert_eq!(sdk.on_draw(&bindings()).unwrap(), 1);

        let draw = &sdk.backend().draws()[0];
        assert_eq!(draw.vertex_count, 4);
        assert_eq!(draw.draw_mode, DrawMode::TriangleFan);
        assert_eq!(draw.cull_face, CullFace::Back);
        assert_eq!(sdk.stats().store.created, 1);
        assert_eq!(events.try_recv(), Ok(AdEvent::Ready(handle)));

        let info = sdk.ad_info(handle).unwrap();
        assert_eq!(info.placement_id, "main-menu");
        assert!(info.has_gpu_resources);
        assert_eq!(info.frames_shown, 1);
    }

    #[test]
    fn bind_vertices_replaces_mesh_and_rejects_ragged_arrays() {
        let mut sdk = instant_sdk();
        let handle = ready_ad(&mut sdk);

        sdk.bind_ad_vertices(handle, vec![0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0], 2)
            .unwrap();
        let info = sdk.ad_info(handle).unwrap();
        assert_eq!((info.vertex_count, info.components_per_vertex), (4, 2));

        let err = sdk.bind_ad_vertices(handle, vec![1.0, 2.0, 3.0], 2).unwrap_err();
        assert!(matches!(err, AdError::InvalidGeometry(_)));
        let info = sdk.ad_info(handle).unwrap();
        assert_eq!((info.vertex_count, info.components_per_vertex), (4, 2));

        sdk.on_draw(&bindings()).unwrap();
        assert_eq!(sdk.backend().draws()[0].vertex_count, 4);
    }

    #[test]
    fn render_state_is_applied_per_ad() {
        let mut sdk = instant_sdk();
        let handle = ready_ad(&mut sdk);
        sdk.set_ad_cull_face(handle, CullFace::Disabled).unwrap();
        sdk.set_ad_draw_mode(handle, DrawMode::Triangles).unwrap();
        sdk.on_draw(&bindings()).unwrap();

        let draw = &sdk.backend().draws()[0];
        assert_eq!(draw.cull_face, CullFace::Disabled);
        assert_eq!(draw.draw_mode, DrawMode::Triangles);
    }

    #[test]
    fn gl_side_mutation_before_build_is_not_ready() {
        let (mut sdk, open) = gated_sdk();
        let handle = sdk.request_ad("banner").unwrap();
        assert_eq!(
            sdk.bind_ad_vertices(handle, vec![0.0; 6], 3),
            Err(AdError::NotReady)
        );
        assert_eq!(
            sdk.set_ad_cull_face(handle, CullFace::Front),
            Err(AdError::NotReady)
        );

        let client = sdk.client();
        assert_eq!(
            client.bind_ad_vertices(handle, vec![0.0; 6], 3),
            Err(AdError::NotReady)
        );
        assert_eq!(sdk.stats().pending_jobs, 0);

        open.send(()).unwrap();
        wait_for_state(&mut sdk, handle, AdState::Ready);
        client.bind_ad_vertices(handle, vec![0.0; 6], 3).unwrap();
        sdk.on_draw(&bindings()).unwrap();
        assert_eq!(sdk.backend().draws()[0].vertex_count, 2);
        assert_eq!(sdk.ad_info(handle).unwrap().components_per_vertex, 3);
    }

    #[test]
    fn release_frees_resources_once() {
        let mut sdk = instant_sdk();
        let events = sdk.events();
        let handle = ready_ad(&mut sdk);

        sdk.release_ad(handle).unwrap();
        let stats = sdk.stats().store;
        assert_eq!((stats.created, stats.destroyed, stats.live), (1, 1, 0));
        assert_eq!(sdk.backend().live_objects(), 0);

        assert_eq!(sdk.release_ad(handle), Err(AdError::InvalidHandle));
        assert_eq!(sdk.ad_state(handle), Err(AdError::InvalidHandle));
        assert_eq!(sdk.backend().double_deletes(), 0);
        assert_eq!(sdk.on_draw(&bindings()).unwrap(), 0);
        assert!(events.try_iter().any(|e| e == AdEvent::Released(handle)));
    }

    #[test]
    fn release_during_fetch_does_no_gpu_work() {
        let (mut sdk, open) = gated_sdk();
        let handle = sdk.request_ad("banner").unwrap();
        sdk.release_ad(handle).unwrap();
        drop(open);

        let deadline = Instant::now() + Duration::from_millis(50);
        while Instant::now() < deadline {
            sdk.process_jobs().unwrap();
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(sdk.stats().store.created, 0);
        assert_eq!(sdk.backend().live_objects(), 0);
        assert_eq!(sdk.stats().live_ads, 0);
    }

    #[test]
    fn release_from_another_thread_is_deferred_to_the_frame() {
        let (mut sdk, open) = gated_sdk();
        let events = sdk.events();
        let client = sdk.client();
        let handle = sdk.request_ad("banner").unwrap();

        thread::spawn(move || client.release_ad(handle))
            .join()
            .unwrap()
            .unwrap();
        assert_eq!(sdk.ad_state(handle), Ok(AdState::Released));
        assert_eq!(sdk.show_ad(handle, false), Err(AdError::InvalidHandle));

        sdk.process_jobs().unwrap();
        assert_eq!(sdk.ad_state(handle), Err(AdError::InvalidHandle));
        assert_eq!(events.try_recv(), Ok(AdEvent::Released(handle)));

        drop(open);
        thread::sleep(Duration::from_millis(20));
        sdk.process_jobs().unwrap();
        assert_eq!(sdk.stats().store.created, 0);
    }

    #[test]
    fn disable_hides_without_freeing() {
        let mut sdk = instant_sdk();
        let _handle = ready_ad(&mut sdk);

        assert_eq!(sdk.on_draw(&bindings()).unwrap(), 1);
        let texture = sdk.backend().draws()[0].texture;

        sdk.enable(false);
        assert_eq!(sdk.on_draw(&bindings()).unwrap(), 0);
        assert_eq!(sdk.backend().live_objects(), 2);

        sdk.enable(true);
        sdk.backend_mut().clear_draws();
        assert_eq!(sdk.on_draw(&bindings()).unwrap(), 1);
        assert_eq!(sdk.backend().draws()[0].texture, texture);
        assert_eq!(sdk.stats().store.created, 1);
    }

    #[test]
    fn hidden_ads_are_not_drawn() {
        let mut sdk = instant_sdk();
        let handle = ready_ad(&mut sdk);
        sdk.show_ad(handle, false).unwrap();
        assert_eq!(sdk.on_draw(&bindings()).unwrap(), 0);
        sdk.show_ad(handle, true).unwrap();
        assert_eq!(sdk.on_draw(&bindings()).unwrap(), 1);
    }

    #[test]
    fn pause_stops_frame_accounting_only() {
        let mut sdk = instant_sdk();
        let handle = ready_ad(&mut sdk);
        sdk.on_draw(&bindings()).unwrap();

        sdk.pause();
        assert!(sdk.client().is_paused());
        assert_eq!(sdk.on_draw(&bindings()).unwrap(), 1);
        assert_eq!(sdk.on_draw(&bindings()).unwrap(), 1);
        assert_eq!(sdk.ad_info(handle).unwrap().frames_shown, 1);

        sdk.resume();
        sdk.on_draw(&bindings()).unwrap();
        assert_eq!(sdk.ad_info(handle).unwrap().frames_shown, 2);
        assert_eq!(sdk.backend().draws().len(), 4);
    }

    #[test]
    fn gl_entry_points_refuse_other_threads() {
        let mut sdk = instant_sdk();
        let handle = ready_ad(&mut sdk);

        thread::scope(|s| {
            let sdk = &mut sdk;
            s.spawn(move || {
                assert!(matches!(sdk.on_draw(&bindings()), Err(AdError::WrongThread(_))));
                assert!(matches!(sdk.request_ad("x"), Err(AdError::WrongThread(_))));
                assert!(matches!(sdk.release_ad(handle), Err(AdError::WrongThread(_))));
                assert!(matches!(sdk.finalize(), Err(AdError::WrongThread(_))));
                assert!(sdk.request_ad_async("y").is_ok());
            });
        });

        assert_eq!(sdk.ad_state(handle), Ok(AdState::Ready));
        assert_eq!(sdk.stats().store.live, 1);
    }

    #[test]
    fn finalize_tears_everything_down() {
        let mut sdk = instant_sdk();
        let client = sdk.client();
        let handle = ready_ad(&mut sdk);
        let _pending = sdk.request_ad("second").unwrap();

        sdk.finalize().unwrap();
        assert_eq!(sdk.backend().live_objects(), 0);
        assert_eq!(sdk.stats().live_ads, 0);

        assert_eq!(sdk.request_ad("late"), Err(AdError::NotInitialized));
        assert_eq!(sdk.on_draw(&bindings()), Err(AdError::NotInitialized));
        assert_eq!(sdk.finalize(), Err(AdError::NotInitialized));
        assert_eq!(client.ad_state(handle), Err(AdError::NotInitialized));
        assert_eq!(client.request_ad_async("late"), Err(AdError::NotInitialized));
    }

    #[test]
    fn drop_on_the_gl_thread_finalizes() {
        let sdk = instant_sdk();
        let client = sdk.client();
        drop(sdk);
        assert_eq!(client.request_ad_async("late"), Err(AdError::NotInitialized));
    }

    #[test]
    fn fetch_failure_marks_failed_and_reports() {
        let mut sdk = AdSdk::init(config(), RecordingBackend::new(), |_: &str| {
            Err(FetchError::Network("no fill".into()))
        })
        .unwrap();
        let events = sdk.events();
        let handle = sdk.request_ad("banner").unwrap();
        wait_for_state(&mut sdk, handle, AdState::Failed);

        assert_eq!(sdk.on_draw(&bindings()).unwrap(), 0);
        assert_eq!(sdk.stats().store.created, 0);
        match events.try_recv().unwrap() {
            AdEvent::Failed { handle: h, reason } => {
                assert_eq!(h, handle);
                assert!(reason.contains("no fill"), "{reason}");
            }
            other => panic!("unexpected event {other:?}"),
        }

        // A failed ad can be retried.
        sdk.refresh_ad(handle).unwrap();
        pump_until(&mut sdk, |sdk| sdk.stats().fetches_failed == 2);
        assert_eq!(sdk.ad_state(handle), Ok(AdState::Failed));
    }

    #[test]
    fn panicking_source_fails_the_ad() {
        let source = |_: &str| -> Result<DecodedAsset, FetchError> {
            panic!("network stack exploded")
        };
        let mut sdk = AdSdk::init(config(), RecordingBackend::new(), source).unwrap();
        let handle = sdk.request_ad("banner").unwrap();
        wait_for_state(&mut sdk, handle, AdState::Failed);
        assert_eq!(sdk.stats().fetches_failed, 1);
    }

    #[test]
    fn overlapping_refreshes_collapse_into_one() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let mut sdk = AdSdk::init(config(), RecordingBackend::new(), move |_: &str| {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(creative())
        })
        .unwrap();
        let handle = ready_ad(&mut sdk);

        sdk.refresh_ad(handle).unwrap();
        sdk.refresh_ad(handle).unwrap();
        sdk.client().refresh_ad(handle).unwrap();
        wait_for_state(&mut sdk, handle, AdState::Ready);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(sdk.stats().store.created, 1);
        assert_eq!(sdk.backend().textures_created(), 1);
        assert_eq!(sdk.backend().texture_uploads(), 2);
    }

    #[test]
    fn failed_refresh_keeps_previous_creative() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let mut sdk = AdSdk::init(config(), RecordingBackend::new(), move |_: &str| {
            if counted.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(creative())
            } else {
                Err(FetchError::Network("timeout".into()))
            }
        })
        .unwrap();
        let events = sdk.events();
        let handle = ready_ad(&mut sdk);

        sdk.refresh_ad(handle).unwrap();
        pump_until(&mut sdk, |sdk| sdk.stats().fetches_failed == 1);
        assert_eq!(sdk.ad_state(handle), Ok(AdState::Ready));
        assert_eq!(sdk.on_draw(&bindings()).unwrap(), 1);
        assert!(events
            .try_iter()
            .any(|e| matches!(e, AdEvent::Failed { handle: h, .. } if h == handle)));
    }

    #[test]
    fn refresh_is_ignored_while_disabled() {
        let mut sdk = instant_sdk();
        let handle = ready_ad(&mut sdk);
        sdk.enable(false);
        sdk.refresh_ad(handle).unwrap();
        assert_eq!(sdk.ad_state(handle), Ok(AdState::Ready));
        assert_eq!(sdk.stats().fetches_started, 1);
    }

    #[test]
    fn auto_refresh_fires_from_the_frame_loop() {
        let mut sdk = instant_sdk();
        let handle = ready_ad(&mut sdk);
        sdk.set_ad_refresh_interval(handle, Duration::from_millis(1))
            .unwrap();
        thread::sleep(Duration::from_millis(5));

        sdk.on_draw(&bindings()).unwrap();
        pump_until(&mut sdk, |sdk| sdk.stats().fetches_succeeded >= 2);
        assert_eq!(sdk.stats().store.created, 1);
    }

    #[test]
    fn requests_beyond_capacity_fail() {
        let mut sdk = AdSdk::init(
            AdsConfig {
                max_instances: 1,
                ..config()
            },
            RecordingBackend::new(),
            |_: &str| Ok(creative()),
        )
        .unwrap();
        let first = ready_ad(&mut sdk);
        assert_eq!(sdk.request_ad("second"), Err(AdError::CapacityExceeded(1)));

        sdk.release_ad(first).unwrap();
        assert!(sdk.request_ad("second").is_ok());
    }

    #[test]
    fn camera_is_visible_everywhere() {
        let sdk = instant_sdk();
        assert_eq!(sdk.camera(), crate::session::IDENTITY);
        let mut mvp = crate::session::IDENTITY;
        mvp[12] = 3.0;
        let client = sdk.client();
        thread::spawn(move || client.update_camera(mvp))
            .join()
            .unwrap()
            .unwrap();
        assert_eq!(sdk.camera(), mvp);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let result = AdSdk::init(
            AdsConfig {
                fetch_workers: 0,
                ..AdsConfig::default()
            },
            RecordingBackend::new(),
            |_: &str| Ok(creative()),
        );
        assert!(matches!(result, Err(AdError::Config(_))));
    }

    /// Source whose first fetch succeeds and every later one fails.
    fn flaky_sdk() -> Sdk {
        let calls = AtomicUsize::new(0);
        AdSdk::init(config(), RecordingBackend::new(), move |_: &str| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(creative())
            } else {
                Err(FetchError::Network("no fill".into()))
            }
        })
        .unwrap()
    }

    #[test]
    fn failed_auto_refresh_waits_a_full_interval() {
        let mut sdk = flaky_sdk();
        let handle = ready_ad(&mut sdk);
        let interval = Duration::from_millis(200);
        sdk.set_ad_refresh_interval(handle, interval).unwrap();

        thread::sleep(interval + Duration::from_millis(10));
        sdk.on_draw(&bindings()).unwrap();
        pump_until(&mut sdk, |sdk| sdk.stats().fetches_failed == 1);
        assert_eq!(sdk.ad_state(handle), Ok(AdState::Ready));

        let until = Instant::now() + interval / 2;
        while Instant::now() < until {
            assert_eq!(sdk.on_draw(&bindings()).unwrap(), 1);
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(sdk.stats().fetches_started, 2);
    }

    /// Stops the only fetch worker and waits until the pool refuses work.
    fn close_fetch_pool(sdk: &Sdk) {
        sdk.shared.fetcher.shutdown();
        let deadline = Instant::now() + Duration::from_secs(5);
        while sdk.shared.fetcher.schedule(AdHandle::NULL) {
            assert!(Instant::now() < deadline, "fetch worker did not exit");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn unschedulable_refresh_does_not_strand_the_ad() {
        let mut sdk = instant_sdk();
        let handle = ready_ad(&mut sdk);
        close_fetch_pool(&sdk);

        sdk.set_ad_refresh_interval(handle, Duration::from_millis(1))
            .unwrap();
        thread::sleep(Duration::from_millis(5));
        assert_eq!(sdk.on_draw(&bindings()).unwrap(), 1);
        assert_eq!(sdk.ad_state(handle), Ok(AdState::Ready));

        sdk.set_ad_refresh_interval(handle, Duration::ZERO).unwrap();
        sdk.refresh_ad(handle).unwrap();
        assert_eq!(sdk.ad_state(handle), Ok(AdState::Ready));
        assert_eq!(sdk.on_draw(&bindings()).unwrap(), 1);

        let orphan = sdk.request_ad("late").unwrap();
        assert_eq!(sdk.ad_state(orphan), Ok(AdState::Failed));
    }

    #[test]
    fn null_and_released_handles_are_rejected() {
        let mut sdk = instant_sdk();
        let released = ready_ad(&mut sdk);
        sdk.release_ad(released).unwrap();
        let client = sdk.client();

        for handle in [AdHandle::NULL, released] {
            let invalid = Err(AdError::InvalidHandle);
            assert_eq!(sdk.show_ad(handle, true), invalid);
            assert_eq!(sdk.refresh_ad(handle), invalid);
            assert_eq!(sdk.bind_ad_vertices(handle, vec![0.0; 8], 2), invalid);
            assert_eq!(
                sdk.bind_ad_vertices_with_texcoords(handle, vec![0.0; 8], 2, vec![0.0; 8]),
                invalid
            );
            assert_eq!(sdk.set_ad_cull_face(handle, CullFace::Front), invalid);
            assert_eq!(sdk.set_ad_draw_mode(handle, DrawMode::Triangles), invalid);
            assert_eq!(sdk.set_ad_refresh_interval(handle, Duration::ZERO), invalid);
            assert_eq!(sdk.release_ad(handle), invalid);
            assert_eq!(sdk.ad_state(handle), Err(AdError::InvalidHandle));
            assert!(sdk.ad_info(handle).is_err());

            assert_eq!(client.show_ad(handle, false), invalid);
            assert_eq!(client.refresh_ad(handle), invalid);
            assert_eq!(client.bind_ad_vertices(handle, vec![0.0; 8], 2), invalid);
            assert_eq!(client.release_ad(handle), invalid);
        }
        assert_eq!(sdk.stats().pending_jobs, 0);
        assert_eq!(sdk.backend().double_deletes(), 0);
    }

    #[test]
    fn failed_release_keeps_the_ad_intact() {
        let mut sdk = instant_sdk();
        let handle = ready_ad(&mut sdk);
        let resource = sdk.shared.instances.lock().get(handle).unwrap().resource.unwrap();
        sdk.store.destroy(resource).unwrap();

        assert_eq!(sdk.release_ad(handle), Err(AdError::InvalidHandle));
        let info = sdk.ad_info(handle).unwrap();
        assert_eq!(info.state, AdState::Ready);
        assert!(info.has_gpu_resources);
    }
}
