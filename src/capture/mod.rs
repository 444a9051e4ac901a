//! Capture pipeline orchestration
//!
//! [`StitchPipeline`] drives one capture request end to end: plan the
//! tile grid, take the per-tab lock, capture tiles sequentially with
//! scroll compensation, decode and stitch them in parallel, encode under
//! the shared encode-worker lock, and deliver. Page state restoration,
//! the busy badge, and both locks are cleaned up on every exit path.

pub mod compensate;
pub mod compose;

use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;

pub use compensate::Compensator;
pub use compose::{CompositeBuffer, MAX_BUFFER_BYTES, decode_capture};

use crate::{
    deliver::{self, DeliveryReport, DeliverySinks},
    error::{StitchError, StitchResult},
    model::{CaptureRequest, Preferences, Region, Strategy},
    plan::{TileLimits, TilePlan},
    platform::{
        CaptureBackend, CaptureOpts, ClipboardSink, DownloadSink, Notifier, ObjectStore, PageHost,
        PreferencesStore,
    },
    queue::JobQueue,
    sync::{ENCODE_WORKER_KEY, ENCODE_WORKER_LEASE, LockTable, TAB_CAPTURE_LEASE, tab_capture_key},
};

/// Stage a request is in, for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Locked,
    Capturing,
    Compositing,
    Encoding,
    Delivered,
    Aborted,
}

/// Per-request bookkeeping the cleanup path runs on.
///
/// Flags record what was actually taken so cleanup never releases
/// something a later request might hold.
struct RequestState {
    phase:        Phase,
    tab_key:      String,
    compensator:  Arc<AsyncMutex<Compensator>>,
    busy_set:     bool,
    tab_released: bool,
    encode_held:  bool,
}

impl RequestState {
    fn advance(&mut self, phase: Phase) {
        tracing::debug!(from = ?self.phase, to = ?phase, "pipeline phase");
        self.phase = phase;
    }
}

/// The capture-and-stitch pipeline.
///
/// Holds every platform collaborator as a trait object plus the shared
/// lock table, so concurrent requests against the same pipeline contend
/// on the same per-tab and encode-worker locks.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use pagestitch::{
///     capture::StitchPipeline,
///     model::{CaptureRequest, OutputFormat, Region, Size, TabId},
///     platform::MockPlatform,
/// };
///
/// #[tokio::main]
/// async fn main() {
///     let pipeline = StitchPipeline::from_platform(Arc::new(MockPlatform::new()));
///     let request = CaptureRequest::builder(TabId(1))
///         .region(Region::new(0, 0, 640, 480))
///         .viewport(Size::new(1280, 720))
///         .page(Size::new(1280, 4000))
///         .format(OutputFormat::ClipboardPng)
///         .build();
///
///     let report = pipeline.capture(request).await.unwrap();
///     assert!(report.bytes > 0);
/// }
/// ```
pub struct StitchPipeline {
    locks:     Arc<LockTable>,
    backend:   Arc<dyn CaptureBackend>,
    page:      Arc<dyn PageHost>,
    downloads: Arc<dyn DownloadSink>,
    clipboard: Arc<dyn ClipboardSink>,
    objects:   Arc<dyn ObjectStore>,
    notifier:  Arc<dyn Notifier>,
    prefs:     Arc<dyn PreferencesStore>,
}

impl StitchPipeline {
    /// Creates a pipeline from individual collaborators
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        locks: Arc<LockTable>,
        backend: Arc<dyn CaptureBackend>,
        page: Arc<dyn PageHost>,
        downloads: Arc<dyn DownloadSink>,
        clipboard: Arc<dyn ClipboardSink>,
        objects: Arc<dyn ObjectStore>,
        notifier: Arc<dyn Notifier>,
        prefs: Arc<dyn PreferencesStore>,
    ) -> Self {
        Self {
            locks,
            backend,
            page,
            downloads,
            clipboard,
            objects,
            notifier,
            prefs,
        }
    }

    /// Builds a pipeline whose collaborators all come from one platform
    /// object, with a fresh lock table.
    ///
    /// Tests use this with [`MockPlatform`](crate::platform::MockPlatform).
    pub fn from_platform<P>(platform: Arc<P>) -> Self
    where
        P: CaptureBackend
            + PageHost
            + DownloadSink
            + ClipboardSink
            + ObjectStore
            + Notifier
            + PreferencesStore
            + 'static,
    {
        Self::new(
            Arc::new(LockTable::new()),
            platform.clone(),
            platform.clone(),
            platform.clone(),
            platform.clone(),
            platform.clone(),
            platform.clone(),
            platform,
        )
    }

    /// Shared lock table
    pub fn locks(&self) -> &Arc<LockTable> {
        &self.locks
    }

    /// Runs one capture request end to end.
    ///
    /// Overlapping requests against a tab whose capture lock is held are
    /// rejected with [`StitchError::CaptureInProgress`], not queued. On
    /// any failure the user is notified once, after cleanup has restored
    /// page state and released every held lock.
    ///
    /// # Errors
    ///
    /// Any [`StitchError`] raised by validation, planning, capture,
    /// stitching, encoding, or delivery.
    pub async fn capture(&self, request: CaptureRequest) -> StitchResult<DeliveryReport> {
        let outcome = self.run(&request).await;
        if let Err(err) = &outcome {
            tracing::warn!(tab = %request.tab, "capture aborted: {err}");
            self.notifier.notify(&err.user_message(&request.filename));
        }
        outcome
    }

    async fn run(&self, request: &CaptureRequest) -> StitchResult<DeliveryReport> {
        request.validate()?;
        let prefs = self.prefs.get().await?;

        let caps = self.backend.capabilities();
        let strategy = Strategy::select(&caps);
        tracing::info!(
            tab = %request.tab,
            region = ?request.region,
            ?strategy,
            format = ?request.format,
            "capture request"
        );

        let tab_key = tab_capture_key(request.tab);
        if !self.locks.try_acquire(&tab_key, TAB_CAPTURE_LEASE).await {
            // Dropped, not queued: a duplicate of an in-flight capture is
            // stale by the time it could run.
            return Err(StitchError::CaptureInProgress { tab: request.tab });
        }

        let mut state = RequestState {
            phase:        Phase::Locked,
            tab_key,
            compensator:  Arc::new(AsyncMutex::new(Compensator::new(strategy, request.tab))),
            busy_set:     false,
            tab_released: false,
            encode_held:  false,
        };

        let outcome = self
            .run_locked(request, &prefs, strategy, &mut state)
            .await;
        self.cleanup(request, &mut state).await;

        match outcome {
            Ok(report) => {
                state.advance(Phase::Delivered);
                Ok(report)
            }
            Err(err) => {
                state.advance(Phase::Aborted);
                Err(err)
            }
        }
    }

    async fn run_locked(
        &self,
        request: &CaptureRequest,
        prefs: &Preferences,
        strategy: Strategy,
        state: &mut RequestState,
    ) -> StitchResult<DeliveryReport> {
        // Compensated captures can never see more than one viewport at a
        // time, so the viewport bounds the tile size too.
        let viewport_bound = strategy.needs_compensation().then_some(request.viewport);
        let limits = TileLimits::derive(request.scale, viewport_bound);
        let plan = TilePlan::compute(request.region.width, request.region.height, &limits);

        // Allocation ceiling is enforced before any capture or page
        // mutation happens.
        let buffer = CompositeBuffer::allocate(
            plan.composite,
            request.region.width,
            request.region.height,
        )?;
        let buffer = Arc::new(Mutex::new(buffer));

        self.notifier.set_busy(request.tab, true);
        state.busy_set = true;
        state.advance(Phase::Capturing);

        let opts = CaptureOpts {
            quality: prefs.jpeg_quality,
            scale:   self
                .backend
                .capabilities()
                .supports_scale_param
                .then_some(request.scale),
        };
        let shared_request = Arc::new(request.clone());
        let decode_queue: Arc<Mutex<JobQueue<()>>> = Arc::new(Mutex::new(JobQueue::new()));
        let mut captures: JobQueue<()> = JobQueue::new();

        for tile in plan.tiles.iter().copied() {
            let backend = self.backend.clone();
            let page = self.page.clone();
            let compensator = state.compensator.clone();
            let request = shared_request.clone();
            let decode_queue = decode_queue.clone();
            let buffer = buffer.clone();

            captures.push(move |_| async move {
                let offset = compensator
                    .lock()
                    .await
                    .expose(page.as_ref(), &request, &tile)
                    .await?;
                let rect = if strategy.needs_compensation() {
                    // Viewport coordinates of the compensated view
                    Region::new(offset.x, offset.y, tile.width, tile.height)
                } else {
                    // Absolute page coordinates
                    Region::new(
                        request.region.left + i64::from(tile.x),
                        request.region.top + i64::from(tile.y),
                        tile.width,
                        tile.height,
                    )
                };
                let bytes = backend.capture_region(request.tab, rect, &opts).await?;

                decode_queue.lock().unwrap().push(move |_| async move {
                    let img = decode_capture(&bytes)?;
                    buffer.lock().unwrap().write_tile(&tile, &img, (0, 0))?;
                    Ok(())
                });
                Ok(())
            });
        }

        tracing::debug!(tiles = captures.len(), "starting sequential tile captures");
        captures.run_sequential().await?;

        // The page goes back to normal and the tab frees up before the
        // heavy decode and encode work starts.
        state.compensator.lock().await.restore(self.page.as_ref()).await;
        self.locks.release(&state.tab_key).await;
        state.tab_released = true;
        self.notifier.set_busy(request.tab, false);
        state.busy_set = false;

        state.advance(Phase::Compositing);
        let decodes = std::mem::take(&mut *decode_queue.lock().unwrap());
        tracing::debug!(jobs = decodes.len(), "running decode/composite jobs");
        decodes.run_parallel().await?;

        state.advance(Phase::Encoding);
        let buffer = Arc::into_inner(buffer)
            .ok_or_else(|| StitchError::EncodingFailed {
                format: request.format.extension().to_string(),
                reason: "composite buffer still shared after stitching".to_string(),
            })?
            .into_inner()
            .unwrap();

        // Tiled composites share one encode worker across all requests;
        // single-tile surfaces encode directly.
        if !plan.is_single() {
            if !self
                .locks
                .try_acquire(ENCODE_WORKER_KEY, ENCODE_WORKER_LEASE)
                .await
            {
                tracing::info!("encode worker busy, queueing");
                self.notifier
                    .notify(&format!("'{}' is queued behind another capture", request.filename));
                self.locks
                    .acquire(ENCODE_WORKER_KEY, ENCODE_WORKER_LEASE, ENCODE_WORKER_LEASE)
                    .await?;
            }
            state.encode_held = true;
        }

        let encoded = deliver::encode_composite(buffer, request, prefs);
        // The worker frees up as soon as encoding is done; a slow download
        // must not hold back other requests' encodes.
        if state.encode_held {
            self.locks.release(ENCODE_WORKER_KEY).await;
            state.encode_held = false;
        }
        let bytes = encoded?;
        tracing::info!(bytes = bytes.len(), format = ?request.format, "image encoded");

        let sinks = DeliverySinks {
            downloads: self.downloads.as_ref(),
            clipboard: self.clipboard.as_ref(),
            objects:   self.objects.as_ref(),
            page:      self.page.as_ref(),
            notifier:  self.notifier.as_ref(),
        };
        deliver::deliver(&sinks, request, prefs, bytes).await
    }

    /// Runs on every exit path. Restore is idempotent and the lock flags
    /// track actual ownership, so running after a clean finish is a no-op.
    async fn cleanup(&self, request: &CaptureRequest, state: &mut RequestState) {
        state.compensator.lock().await.restore(self.page.as_ref()).await;
        if state.busy_set {
            self.notifier.set_busy(request.tab, false);
            state.busy_set = false;
        }
        if !state.tab_released {
            self.locks.release(&state.tab_key).await;
            state.tab_released = true;
        }
        if state.encode_held {
            self.locks.release(ENCODE_WORKER_KEY).await;
            state.encode_held = false;
        }
    }
}
