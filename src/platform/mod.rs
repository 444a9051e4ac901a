//! Platform collaborator traits
//!
//! Everything the pipeline needs from the outside world is consumed
//! through the narrow trait interfaces in this module: the capture
//! primitive, page-script execution, downloads, clipboard, temporary
//! object URLs, notifications, and the preference store. All traits are
//! `Send + Sync` trait objects so the pipeline can hold them as `Arc`s
//! and tests can substitute [`MockPlatform`](mock::MockPlatform).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    error::StitchResult,
    model::{Capabilities, Point, Preferences, Region, Size, TabId},
};

pub mod mock;

pub use mock::MockPlatform;

/// Options passed to each platform capture call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CaptureOpts {
    /// Encoder quality hint for platforms that capture lossy
    pub quality: u8,
    /// Device scale factor, when the platform accepts one
    pub scale:   Option<f64>,
}

/// Platform capture primitive.
///
/// A backend supports at most one in-flight capture per tab; the pipeline
/// serializes calls accordingly.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Captures one rectangle and returns encoded image bytes.
    ///
    /// The rectangle is in page coordinates when the backend reports
    /// `supports_direct_region_capture`, otherwise in viewport
    /// coordinates of the current (compensated) view.
    async fn capture_region(
        &self,
        tab: TabId,
        rect: Region,
        opts: &CaptureOpts,
    ) -> StitchResult<Vec<u8>>;

    /// Capability descriptor, resolved once at request start
    fn capabilities(&self) -> Capabilities;
}

/// Identifier of one applied style overlay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OverlayId(pub u64);

/// Snapshot of the page's own offsets before any compensation.
///
/// New offsets are composed algebraically on top of these, never written
/// over them, so restoration can return the page to exactly this state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleBaseline {
    /// The scroll element's existing translation
    pub translate:           Point,
    /// Existing background-position of any fixed background
    pub background_position: Point,
}

/// One scoped style overlay, described structurally.
///
/// The deployment host renders this to a CSS rule; the mock applies it to
/// its virtual viewport directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlaySpec {
    /// Visual translation applied to page content
    pub translate:           Point,
    /// Compensating background-position so fixed backgrounds stay static
    pub background_position: Point,
    /// Neutralize position:fixed stickiness while compensating
    pub clear_fixed:         bool,
}

/// Page-script execution surface: scroll, style, and overlay access
#[async_trait]
pub trait PageHost: Send + Sync {
    /// Current scroll offset
    async fn scroll_position(&self, tab: TabId) -> StitchResult<Point>;

    /// Scrolls to the given offset; returns the actual position after any
    /// host-side clamping
    async fn scroll_to(&self, tab: TabId, target: Point) -> StitchResult<Point>;

    /// Re-reads the total page size (the page may grow or shrink while a
    /// capture is in flight)
    async fn page_size(&self, tab: TabId) -> StitchResult<Size>;

    /// Snapshots the scroll element's transform and background offsets
    async fn style_baseline(&self, tab: TabId) -> StitchResult<StyleBaseline>;

    /// Inserts a scoped style overlay; later overlays win
    async fn apply_overlay(&self, tab: TabId, spec: &OverlaySpec) -> StitchResult<OverlayId>;

    /// Removes a previously applied overlay
    async fn remove_overlay(&self, tab: TabId, id: OverlayId) -> StitchResult<()>;

    /// Opens an object URL as a link in the page context
    async fn open_as_link(&self, tab: TabId, url: &str) -> StitchResult<()>;
}

/// Identifier of one managed download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DownloadId(pub u32);

/// Terminal state of a managed download
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadState {
    /// Download finished on disk
    Complete,
    /// Download stopped before completion
    Interrupted {
        /// Interruption reason reported by the download manager
        reason: String,
    },
}

/// Options for starting a managed download
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// Source URL (typically a temporary object URL)
    pub url:        String,
    /// Target filename
    pub filename:   String,
    /// Relative target directory
    pub target_dir: String,
}

/// Managed download collaborator.
///
/// The change-notification stream of the underlying manager is modeled as
/// an awaitable one-shot: `wait` resolves exactly once per download, on
/// whichever of completion or interruption occurs first.
#[async_trait]
pub trait DownloadSink: Send + Sync {
    /// Starts a download
    async fn start(&self, request: DownloadRequest) -> StitchResult<DownloadId>;

    /// Waits for the download's terminal state
    async fn wait(&self, id: DownloadId) -> StitchResult<DownloadState>;
}

/// Clipboard collaborator
#[async_trait]
pub trait ClipboardSink: Send + Sync {
    /// Transfers encoded image bytes to the platform clipboard
    async fn set_image(&self, bytes: &[u8], mime: &str) -> StitchResult<()>;
}

/// Temporary object URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectUrl(pub String);

/// Temporary object-reference store (object URL create/revoke)
pub trait ObjectStore: Send + Sync {
    /// Publishes bytes under a temporary URL
    fn create(&self, bytes: Vec<u8>, mime: &str) -> ObjectUrl;

    /// Releases a temporary URL; the pipeline guarantees exactly one call
    /// per created URL
    fn revoke(&self, url: &ObjectUrl);
}

/// Fire-and-forget notification and badge sinks
pub trait Notifier: Send + Sync {
    /// Shows a user-facing message
    fn notify(&self, message: &str);

    /// Toggles the capturing-busy indication for a tab
    fn set_busy(&self, tab: TabId, busy: bool);
}

/// External preference store
#[async_trait]
pub trait PreferencesStore: Send + Sync {
    /// Reads the current preferences
    async fn get(&self) -> StitchResult<Preferences>;
}
