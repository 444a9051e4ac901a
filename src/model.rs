//! Data models for capture requests and platform capabilities
//!
//! This module defines the core types flowing through the pipeline:
//! - Geometry primitives (`Region`, `Size`, `Point`) in page pixels
//! - [`CaptureRequest`], the immutable record describing one user action
//! - [`Capabilities`] and [`Strategy`], the once-per-request capability
//!   descriptor and the compensation strategy it selects
//! - [`Preferences`], the record read from the external preference store
//!
//! All request-side types are serializable; they cross a messaging boundary
//! between the page context and the background context in deployment.

use serde::{Deserialize, Serialize};

/// Identifier of the tab a capture targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TabId(pub u32);

impl std::fmt::Display for TabId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Axis-aligned rectangle in page pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// Left edge in page coordinates
    pub left:   i64,
    /// Top edge in page coordinates
    pub top:    i64,
    /// Width in pixels
    pub width:  u32,
    /// Height in pixels
    pub height: u32,
}

impl Region {
    /// Creates a new region
    pub fn new(left: i64, top: i64, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Right edge (exclusive)
    pub fn right(&self) -> i64 {
        self.left + i64::from(self.width)
    }

    /// Bottom edge (exclusive)
    pub fn bottom(&self) -> i64 {
        self.top + i64::from(self.height)
    }

    /// Area in pixels
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// True if `other` lies entirely inside this region
    pub fn contains(&self, other: &Region) -> bool {
        other.left >= self.left
            && other.top >= self.top
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }
}

/// Width/height pair in pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width:  u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Signed coordinate pair in page pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i64,
    pub y: i64,
}

impl Point {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

/// Which page edge a region axis is anchored to.
///
/// A `Backward` axis addresses coordinates from the far edge of the page,
/// so bottom/right-anchored regions stay attached to that edge even when
/// the page grows or shrinks between planning and capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Anchor {
    /// Region extends from the near (top/left) edge
    Forward,
    /// Region extends from the far (bottom/right) edge
    Backward,
}

impl Anchor {
    /// Sign convention used by the original coordinate math (+1 / -1)
    pub fn sign(&self) -> i64 {
        match self {
            Anchor::Forward => 1,
            Anchor::Backward => -1,
        }
    }
}

/// Per-axis overflow direction of the requested region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverflowDirection {
    pub x: Anchor,
    pub y: Anchor,
}

impl Default for OverflowDirection {
    fn default() -> Self {
        Self {
            x: Anchor::Forward,
            y: Anchor::Forward,
        }
    }
}

/// Requested output format of a capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// PNG file delivery
    Png,
    /// JPEG file delivery
    Jpeg,
    /// PNG bytes handed to the clipboard sink
    #[serde(rename = "copy")]
    ClipboardPng,
}

impl OutputFormat {
    /// MIME type of the encoded bytes
    pub fn mime(&self) -> &'static str {
        match self {
            OutputFormat::Png | OutputFormat::ClipboardPng => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
        }
    }

    /// File extension without the dot
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png | OutputFormat::ClipboardPng => "png",
            OutputFormat::Jpeg => "jpg",
        }
    }

    /// True when the result goes to the clipboard rather than a file
    pub fn is_clipboard(&self) -> bool {
        matches!(self, OutputFormat::ClipboardPng)
    }
}

/// Platform capability descriptor, resolved once at request start.
///
/// Strategy selection dispatches on this instead of scattering
/// platform/version conditionals through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Capture primitive accepts an arbitrary page-coordinate rect
    pub supports_direct_region_capture: bool,
    /// Capture primitive accepts a device-scale parameter
    pub supports_scale_param:           bool,
    /// Page host can insert scoped style overlays (transform compensation)
    pub supports_style_overlays:        bool,
}

impl Capabilities {
    /// Everything supported; compensation never needed
    pub fn full() -> Self {
        Self {
            supports_direct_region_capture: true,
            supports_scale_param:           true,
            supports_style_overlays:        true,
        }
    }

    /// Viewport-only capture with style overlay support
    pub fn viewport_with_overlays() -> Self {
        Self {
            supports_direct_region_capture: false,
            supports_scale_param:           true,
            supports_style_overlays:        true,
        }
    }

    /// Viewport-only capture, real scrolling only
    pub fn viewport_scroll_only() -> Self {
        Self {
            supports_direct_region_capture: false,
            supports_scale_param:           false,
            supports_style_overlays:        false,
        }
    }
}

/// How tiles are exposed to the capture primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Capture by page coordinate directly; no page mutation
    NativeCapture,
    /// Translate page content with a style overlay, no real scroll
    TransformScroll,
    /// Real `scrollTo` per tile
    RealScroll,
}

impl Strategy {
    /// Selects the strategy for a request from the capability descriptor
    pub fn select(caps: &Capabilities) -> Self {
        if caps.supports_direct_region_capture {
            Strategy::NativeCapture
        } else if caps.supports_style_overlays {
            Strategy::TransformScroll
        } else {
            Strategy::RealScroll
        }
    }

    /// True when the page must be repositioned before each tile capture
    pub fn needs_compensation(&self) -> bool {
        !matches!(self, Strategy::NativeCapture)
    }
}

/// How an encoded file leaves the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveMethod {
    /// Managed download via the download collaborator
    Download,
    /// Hand the object URL to the page context to open as a link
    OpenAsLink,
}

/// Record read from the external preference store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    /// JPEG encoder quality, 1-100
    #[serde(rename = "jpegquality")]
    pub jpeg_quality:      u8,
    /// Filename template (expanded by the external templating collaborator)
    #[serde(rename = "filenameformat")]
    pub filename_format:   String,
    /// Delivery method for file outputs
    #[serde(rename = "savemethod")]
    pub save_method:       SaveMethod,
    /// Relative target directory for downloads
    #[serde(rename = "targetdir")]
    pub target_dir:        String,
    /// Stamp page title/URL into the encoded image
    pub image_comment:     bool,
    /// Notify after a successful clipboard copy
    #[serde(rename = "copynotification")]
    pub copy_notification: bool,
    /// Notify after a successful save
    #[serde(rename = "savenotification")]
    pub save_notification: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            jpeg_quality:      90,
            filename_format:   "%t".to_string(),
            save_method:       SaveMethod::Download,
            target_dir:        String::new(),
            image_comment:     true,
            copy_notification: true,
            save_notification: true,
        }
    }
}

/// One capture request, immutable once issued.
///
/// Geometry is in page pixels at scale 1; `scale` is the device scale
/// factor applied by the capture primitive. Built with
/// [`CaptureRequest::builder`].
///
/// # Examples
///
/// ```
/// use pagestitch::model::{CaptureRequest, OutputFormat, Region, Size, TabId};
///
/// let req = CaptureRequest::builder(TabId(1))
///     .region(Region::new(0, 0, 800, 600))
///     .viewport(Size::new(1280, 720))
///     .page(Size::new(1280, 4000))
///     .format(OutputFormat::Png)
///     .filename("page.png")
///     .build();
/// assert_eq!(req.region.width, 800);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRequest {
    /// Target tab
    pub tab:            TabId,
    /// Requested region in page coordinates
    pub region:         Region,
    /// Visible viewport size
    pub viewport:       Size,
    /// Total page size at request time
    pub page:           Size,
    /// Scroll offset at request time
    pub scroll:         Point,
    /// Padding offset applied by sticky chrome (toolbars, scrollbars)
    pub scroll_padding: Point,
    /// Which edge each region axis extends from
    pub direction:      OverflowDirection,
    /// Device scale factor
    pub scale:          f64,
    /// Desired output format
    pub format:         OutputFormat,
    /// Output filename (already templated and sanitized by the caller)
    pub filename:       String,
    /// Page title, stamped into metadata when enabled
    pub page_title:     Option<String>,
    /// Page URL, stamped into metadata when enabled
    pub page_url:       Option<String>,
}

impl CaptureRequest {
    /// Starts a builder for the given tab
    pub fn builder(tab: TabId) -> CaptureRequestBuilder {
        CaptureRequestBuilder::new(tab)
    }

    /// Validates request geometry before the pipeline runs.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` for empty regions, non-positive scale, or an empty
    /// viewport.
    pub fn validate(&self) -> crate::error::StitchResult<()> {
        if self.region.width == 0 || self.region.height == 0 {
            return Err(crate::error::StitchError::InvalidRequest {
                reason: "region is empty".to_string(),
            });
        }
        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(crate::error::StitchError::InvalidRequest {
                reason: "viewport is empty".to_string(),
            });
        }
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(crate::error::StitchError::InvalidRequest {
                reason: format!("scale {} is not positive", self.scale),
            });
        }
        Ok(())
    }
}

/// Builder for [`CaptureRequest`]
#[derive(Debug, Clone)]
pub struct CaptureRequestBuilder {
    request: CaptureRequest,
}

impl CaptureRequestBuilder {
    fn new(tab: TabId) -> Self {
        Self {
            request: CaptureRequest {
                tab,
                region: Region::new(0, 0, 0, 0),
                viewport: Size::new(0, 0),
                page: Size::new(0, 0),
                scroll: Point::default(),
                scroll_padding: Point::default(),
                direction: OverflowDirection::default(),
                scale: 1.0,
                format: OutputFormat::Png,
                filename: "capture.png".to_string(),
                page_title: None,
                page_url: None,
            },
        }
    }

    /// Sets the requested region
    pub fn region(mut self, region: Region) -> Self {
        self.request.region = region;
        self
    }

    /// Sets the viewport size
    pub fn viewport(mut self, viewport: Size) -> Self {
        self.request.viewport = viewport;
        self
    }

    /// Sets the total page size
    pub fn page(mut self, page: Size) -> Self {
        self.request.page = page;
        self
    }

    /// Sets the current scroll offset
    pub fn scroll(mut self, scroll: Point) -> Self {
        self.request.scroll = scroll;
        self
    }

    /// Sets the sticky-chrome padding offset
    pub fn scroll_padding(mut self, padding: Point) -> Self {
        self.request.scroll_padding = padding;
        self
    }

    /// Sets the per-axis overflow direction
    pub fn direction(mut self, direction: OverflowDirection) -> Self {
        self.request.direction = direction;
        self
    }

    /// Sets the device scale factor
    pub fn scale(mut self, scale: f64) -> Self {
        self.request.scale = scale;
        self
    }

    /// Sets the output format
    pub fn format(mut self, format: OutputFormat) -> Self {
        self.request.format = format;
        self
    }

    /// Sets the output filename
    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.request.filename = filename.into();
        self
    }

    /// Sets page title metadata
    pub fn page_title(mut self, title: impl Into<String>) -> Self {
        self.request.page_title = Some(title.into());
        self
    }

    /// Sets page URL metadata
    pub fn page_url(mut self, url: impl Into<String>) -> Self {
        self.request.page_url = Some(url.into());
        self
    }

    /// Finishes the builder
    pub fn build(self) -> CaptureRequest {
        self.request
    }
}
