//! Mock platform for testing
//!
//! [`MockPlatform`] implements every collaborator trait against an
//! in-memory model of a scrollable page, so the whole pipeline can run
//! in tests without a browser:
//!
//! - **Coordinate-encoded captures:** each synthesized pixel encodes the
//!   absolute page coordinate it was captured from (see
//!   [`coordinate_pixel`]), so stitched output can be checked for correct
//!   tile placement across seams
//! - **Virtual scrolling:** `scroll_to` clamps against page and viewport
//!   size exactly like a real scroll container
//! - **Overlay model:** applied [`OverlaySpec`]s translate the virtual
//!   view the way a transform compensation rule would
//! - **Error injection:** builders for capture failure, failure at a
//!   specific tile index, clipboard failure, and interrupted downloads
//! - **Call recording:** captures, scrolls, overlays, downloads, object
//!   URL revocations, notifications, and busy-badge toggles
//!
//! # Examples
//!
//! ```
//! use pagestitch::{
//!     model::{Region, Size, TabId},
//!     platform::{CaptureBackend, CaptureOpts, MockPlatform},
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let platform = MockPlatform::new()
//!         .with_page(Size::new(1280, 8000))
//!         .with_viewport(Size::new(1280, 720));
//!
//!     let opts = CaptureOpts {
//!         quality: 90,
//!         scale:   None,
//!     };
//!     let bytes = platform
//!         .capture_region(TabId(1), Region::new(0, 0, 64, 64), &opts)
//!         .await
//!         .unwrap();
//!     assert!(!bytes.is_empty());
//!     assert_eq!(platform.capture_count(), 1);
//! }
//! ```

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use image::RgbaImage;

use super::{
    CaptureBackend, CaptureOpts, ClipboardSink, DownloadId, DownloadRequest, DownloadSink,
    DownloadState, Notifier, ObjectStore, ObjectUrl, OverlayId, OverlaySpec, PageHost,
    PreferencesStore, StyleBaseline,
};
use crate::{
    error::{StitchError, StitchResult},
    model::{Capabilities, Point, Preferences, Region, Size, TabId},
};

/// Pixel value the mock renders for absolute page coordinate `(x, y)`.
///
/// The low and high bytes of each axis land in separate channels, so any
/// page coordinate up to 65535 round-trips through capture, decode, and
/// blit losslessly.
pub fn coordinate_pixel(x: i64, y: i64) -> [u8; 4] {
    let x = x.rem_euclid(65_536) as u32;
    let y = y.rem_euclid(65_536) as u32;
    [(x & 0xFF) as u8, ((x >> 8) & 0xFF) as u8, (y & 0xFF) as u8, ((y >> 8) & 0xFF) as u8]
}

#[derive(Debug, Default)]
struct MockState {
    page:             Size,
    viewport:         Size,
    scroll:           Point,
    baseline:         StyleBaseline,
    overlays:         Vec<(OverlayId, OverlaySpec)>,
    captures:         usize,
    scroll_history:   Vec<Point>,
    downloads:        Vec<DownloadRequest>,
    clipboard_writes: Vec<(usize, String)>,
    clipboard_images: Vec<Vec<u8>>,
    objects:          HashMap<String, Vec<u8>>,
    last_object_url:  Option<String>,
    revokes:          HashMap<String, u32>,
    notifications:    Vec<String>,
    busy_log:         Vec<(TabId, bool)>,
    opened_links:     Vec<String>,
}

/// In-memory platform implementing every collaborator trait
pub struct MockPlatform {
    caps:              Capabilities,
    prefs:             Preferences,
    delay:             Option<Duration>,
    capture_failure:   Option<String>,
    fail_capture_at:   Option<usize>,
    clipboard_failure: Option<String>,
    interrupt_reason:  Option<String>,
    state:             Mutex<MockState>,
    next_id:           AtomicU64,
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPlatform {
    /// Creates a mock with a 1280x720 viewport over a 1280x4000 page and
    /// viewport-with-overlays capabilities
    pub fn new() -> Self {
        Self {
            caps:              Capabilities::viewport_with_overlays(),
            prefs:             Preferences::default(),
            delay:             None,
            capture_failure:   None,
            fail_capture_at:   None,
            clipboard_failure: None,
            interrupt_reason:  None,
            state:             Mutex::new(MockState {
                page: Size::new(1280, 4000),
                viewport: Size::new(1280, 720),
                ..MockState::default()
            }),
            next_id:           AtomicU64::new(1),
        }
    }

    /// Sets the page size
    pub fn with_page(self, page: Size) -> Self {
        self.state.lock().unwrap().page = page;
        self
    }

    /// Sets the viewport size
    pub fn with_viewport(self, viewport: Size) -> Self {
        self.state.lock().unwrap().viewport = viewport;
        self
    }

    /// Sets the initial scroll offset
    pub fn with_scroll(self, scroll: Point) -> Self {
        self.state.lock().unwrap().scroll = scroll;
        self
    }

    /// Sets the reported capability descriptor
    pub fn with_capabilities(mut self, caps: Capabilities) -> Self {
        self.caps = caps;
        self
    }

    /// Sets the preferences returned by the store
    pub fn with_prefs(mut self, prefs: Preferences) -> Self {
        self.prefs = prefs;
        self
    }

    /// Sets the page's own baseline translation / background offsets
    pub fn with_baseline(self, baseline: StyleBaseline) -> Self {
        self.state.lock().unwrap().baseline = baseline;
        self
    }

    /// Adds a delay to every async operation
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Makes every capture call fail with the given reason
    pub fn with_capture_failure(mut self, reason: impl Into<String>) -> Self {
        self.capture_failure = Some(reason.into());
        self
    }

    /// Makes the `index`-th capture call (0-based) fail
    pub fn fail_capture_at(mut self, index: usize) -> Self {
        self.fail_capture_at = Some(index);
        self
    }

    /// Makes every started download end interrupted
    pub fn with_interrupted_download(mut self) -> Self {
        self.interrupt_reason = Some("NETWORK_FAILED".to_string());
        self
    }

    /// Makes clipboard writes fail with the given reason
    pub fn with_clipboard_failure(mut self, reason: impl Into<String>) -> Self {
        self.clipboard_failure = Some(reason.into());
        self
    }

    async fn simulate_delay(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// Grows or shrinks the page mid-capture (async page mutation)
    pub fn set_page_size(&self, page: Size) {
        self.state.lock().unwrap().page = page;
    }

    /// Number of capture calls issued so far
    pub fn capture_count(&self) -> usize {
        self.state.lock().unwrap().captures
    }

    /// Every scroll target passed to `scroll_to`, in order
    pub fn scroll_history(&self) -> Vec<Point> {
        self.state.lock().unwrap().scroll_history.clone()
    }

    /// Current scroll offset
    pub fn current_scroll(&self) -> Point {
        self.state.lock().unwrap().scroll
    }

    /// Overlays currently applied
    pub fn active_overlays(&self) -> usize {
        self.state.lock().unwrap().overlays.len()
    }

    /// Downloads started so far
    pub fn downloads(&self) -> Vec<DownloadRequest> {
        self.state.lock().unwrap().downloads.clone()
    }

    /// Number of clipboard writes
    pub fn clipboard_writes(&self) -> usize {
        self.state.lock().unwrap().clipboard_writes.len()
    }

    /// Full byte payloads written to the clipboard, in order
    pub fn clipboard_images(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().clipboard_images.clone()
    }

    /// Bytes published under the given object URL, if it exists
    pub fn object_bytes(&self, url: &ObjectUrl) -> Option<Vec<u8>> {
        self.state.lock().unwrap().objects.get(&url.0).cloned()
    }

    /// The most recently created object URL and its bytes
    pub fn last_object(&self) -> Option<(ObjectUrl, Vec<u8>)> {
        let state = self.state.lock().unwrap();
        let url = state.last_object_url.clone()?;
        state.objects.get(&url).map(|bytes| (ObjectUrl(url.clone()), bytes.clone()))
    }

    /// How many times the given object URL was revoked
    pub fn revoke_count(&self, url: &ObjectUrl) -> u32 {
        self.state.lock().unwrap().revokes.get(&url.0).copied().unwrap_or(0)
    }

    /// Revocation counts of every object URL ever created
    pub fn all_revoke_counts(&self) -> Vec<u32> {
        self.state.lock().unwrap().revokes.values().copied().collect()
    }

    /// Notifications shown so far
    pub fn notifications(&self) -> Vec<String> {
        self.state.lock().unwrap().notifications.clone()
    }

    /// Busy-badge toggle history
    pub fn busy_log(&self) -> Vec<(TabId, bool)> {
        self.state.lock().unwrap().busy_log.clone()
    }

    /// Object URLs opened as links in the page context
    pub fn opened_links(&self) -> Vec<String> {
        self.state.lock().unwrap().opened_links.clone()
    }

    /// Page coordinate currently rendered at viewport origin.
    ///
    /// Scroll moves the view forward; an applied overlay translation
    /// moves content the other way, exactly like a transform rule.
    fn view_origin(state: &MockState) -> Point {
        let translate = state
            .overlays
            .last()
            .map(|(_, spec)| spec.translate)
            .unwrap_or(state.baseline.translate);
        Point::new(state.scroll.x - translate.x, state.scroll.y - translate.y)
    }
}

#[async_trait]
impl CaptureBackend for MockPlatform {
    async fn capture_region(
        &self,
        _tab: TabId,
        rect: Region,
        _opts: &CaptureOpts,
    ) -> StitchResult<Vec<u8>> {
        self.simulate_delay().await;

        let index = {
            let mut state = self.state.lock().unwrap();
            let index = state.captures;
            state.captures += 1;
            index
        };

        if let Some(reason) = &self.capture_failure {
            return Err(StitchError::CaptureFailed {
                reason: reason.clone(),
            });
        }
        if self.fail_capture_at == Some(index) {
            return Err(StitchError::CaptureFailed {
                reason: format!("injected failure at capture {index}"),
            });
        }

        let origin = {
            let state = self.state.lock().unwrap();
            if self.caps.supports_direct_region_capture {
                Point::new(rect.left, rect.top)
            } else {
                let view = Self::view_origin(&state);
                Point::new(view.x + rect.left, view.y + rect.top)
            }
        };

        let mut img = RgbaImage::new(rect.width, rect.height);
        for y in 0..rect.height {
            for x in 0..rect.width {
                let px = coordinate_pixel(origin.x + i64::from(x), origin.y + i64::from(y));
                img.put_pixel(x, y, image::Rgba(px));
            }
        }

        let mut bytes = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .map_err(|e| StitchError::CaptureFailed {
                reason: e.to_string(),
            })?;
        Ok(bytes)
    }

    fn capabilities(&self) -> Capabilities {
        self.caps
    }
}

#[async_trait]
impl PageHost for MockPlatform {
    async fn scroll_position(&self, _tab: TabId) -> StitchResult<Point> {
        self.simulate_delay().await;
        Ok(self.state.lock().unwrap().scroll)
    }

    async fn scroll_to(&self, _tab: TabId, target: Point) -> StitchResult<Point> {
        self.simulate_delay().await;
        let mut state = self.state.lock().unwrap();
        let max_x = i64::from(state.page.width.saturating_sub(state.viewport.width));
        let max_y = i64::from(state.page.height.saturating_sub(state.viewport.height));
        let actual = Point::new(target.x.clamp(0, max_x), target.y.clamp(0, max_y));
        state.scroll = actual;
        state.scroll_history.push(actual);
        Ok(actual)
    }

    async fn page_size(&self, _tab: TabId) -> StitchResult<Size> {
        self.simulate_delay().await;
        Ok(self.state.lock().unwrap().page)
    }

    async fn style_baseline(&self, _tab: TabId) -> StitchResult<StyleBaseline> {
        Ok(self.state.lock().unwrap().baseline)
    }

    async fn apply_overlay(&self, _tab: TabId, spec: &OverlaySpec) -> StitchResult<OverlayId> {
        let id = OverlayId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.state.lock().unwrap().overlays.push((id, *spec));
        Ok(id)
    }

    async fn remove_overlay(&self, _tab: TabId, id: OverlayId) -> StitchResult<()> {
        self.state.lock().unwrap().overlays.retain(|(oid, _)| *oid != id);
        Ok(())
    }

    async fn open_as_link(&self, _tab: TabId, url: &str) -> StitchResult<()> {
        self.state.lock().unwrap().opened_links.push(url.to_string());
        Ok(())
    }
}

#[async_trait]
impl DownloadSink for MockPlatform {
    async fn start(&self, request: DownloadRequest) -> StitchResult<DownloadId> {
        self.simulate_delay().await;
        let id = DownloadId(self.next_id.fetch_add(1, Ordering::Relaxed) as u32);
        self.state.lock().unwrap().downloads.push(request);
        Ok(id)
    }

    async fn wait(&self, _id: DownloadId) -> StitchResult<DownloadState> {
        self.simulate_delay().await;
        match &self.interrupt_reason {
            Some(reason) => Ok(DownloadState::Interrupted {
                reason: reason.clone(),
            }),
            None => Ok(DownloadState::Complete),
        }
    }
}

#[async_trait]
impl ClipboardSink for MockPlatform {
    async fn set_image(&self, bytes: &[u8], mime: &str) -> StitchResult<()> {
        self.simulate_delay().await;
        if let Some(reason) = &self.clipboard_failure {
            return Err(StitchError::ClipboardFailed {
                reason: reason.clone(),
            });
        }
        let mut state = self.state.lock().unwrap();
        state.clipboard_writes.push((bytes.len(), mime.to_string()));
        state.clipboard_images.push(bytes.to_vec());
        Ok(())
    }
}

impl ObjectStore for MockPlatform {
    fn create(&self, bytes: Vec<u8>, _mime: &str) -> ObjectUrl {
        let url = format!("blob:mock/{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut state = self.state.lock().unwrap();
        state.revokes.insert(url.clone(), 0);
        state.objects.insert(url.clone(), bytes);
        state.last_object_url = Some(url.clone());
        ObjectUrl(url)
    }

    fn revoke(&self, url: &ObjectUrl) {
        let mut state = self.state.lock().unwrap();
        *state.revokes.entry(url.0.clone()).or_insert(0) += 1;
    }
}

impl Notifier for MockPlatform {
    fn notify(&self, message: &str) {
        self.state.lock().unwrap().notifications.push(message.to_string());
    }

    fn set_busy(&self, tab: TabId, busy: bool) {
        self.state.lock().unwrap().busy_log.push((tab, busy));
    }
}

#[async_trait]
impl PreferencesStore for MockPlatform {
    async fn get(&self) -> StitchResult<Preferences> {
        Ok(self.prefs.clone())
    }
}
