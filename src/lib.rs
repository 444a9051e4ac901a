//! Capture and stitch oversized web-page regions into a single image.
//!
//! Platform capture primitives can only see one viewport (or one
//! bounded rectangle) at a time, and drawable surfaces have hard pixel
//! ceilings. This crate plans an oversized capture as a row-major tile
//! grid, repositions page content per tile when the platform cannot
//! address arbitrary offsets (scroll compensation), stitches decoded
//! tiles into a single composite, and delivers the encoded result to
//! the clipboard or a managed download.
//!
//! # Architecture
//!
//! - [`model`]: request, preference, and geometry types
//! - [`plan`]: canvas limits and the tile planner
//! - [`sync`]: named lease locks (per-tab capture, shared encode worker)
//! - [`queue`]: sequential capture / parallel decode job queues
//! - [`platform`]: collaborator traits plus an in-memory mock
//! - [`capture`]: the pipeline orchestrator, scroll compensation, and
//!   the composite buffer
//! - [`deliver`]: encoding and clipboard/download/link delivery
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//!
//! use pagestitch::{
//!     capture::StitchPipeline,
//!     model::{CaptureRequest, OutputFormat, Region, Size, TabId},
//!     platform::MockPlatform,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let platform = Arc::new(MockPlatform::new().with_page(Size::new(1280, 8000)));
//!     let pipeline = StitchPipeline::from_platform(platform);
//!
//!     let request = CaptureRequest::builder(TabId(1))
//!         .region(Region::new(0, 0, 1280, 6000))
//!         .viewport(Size::new(1280, 720))
//!         .page(Size::new(1280, 8000))
//!         .format(OutputFormat::Png)
//!         .filename("page.png")
//!         .build();
//!
//!     let report = pipeline.capture(request).await.unwrap();
//!     assert_eq!(report.filename, "page.png");
//! }
//! ```

pub mod capture;
pub mod deliver;
pub mod error;
pub mod model;
pub mod plan;
pub mod platform;
pub mod queue;
pub mod sync;

pub use capture::StitchPipeline;
pub use deliver::{DeliveryMethod, DeliveryReport};
pub use error::{StitchError, StitchResult};
pub use model::CaptureRequest;
