//! Encoding and delivery of the composited image
//!
//! The composite buffer is encoded into the requested file format and
//! handed to the clipboard sink, a content-context "open as link" helper,
//! or the managed download collaborator. PNG output can carry embedded
//! `tEXt` metadata (page title and source URL); the `image` crate's PNG
//! encoder has no text-chunk API, so that path encodes through the `png`
//! crate directly. Temporary object URLs created for downloads are
//! revoked exactly once, on whichever of completion or interruption
//! occurs first.

use std::io::Cursor;

use image::{
    ExtendedColorType, ImageEncoder,
    codecs::{
        jpeg::JpegEncoder,
        png::{CompressionType, FilterType, PngEncoder},
    },
};
use serde::{Deserialize, Serialize};

use crate::{
    capture::compose::CompositeBuffer,
    error::{StitchError, StitchResult},
    model::{CaptureRequest, OutputFormat, Preferences, SaveMethod},
    platform::{
        ClipboardSink, DownloadId, DownloadRequest, DownloadSink, DownloadState, Notifier,
        ObjectStore, ObjectUrl, PageHost,
    },
};

/// How the encoded bytes left the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryMethod {
    /// Bytes were written to the clipboard
    Clipboard,
    /// A managed download completed
    Download(DownloadId),
    /// The object URL was opened as a link in the page context
    OpenedAsLink,
}

/// Successful outcome of one capture request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    /// Output filename
    pub filename: String,
    /// Encoded size in bytes
    pub bytes:    usize,
    /// Delivery method taken
    pub method:   DeliveryMethod,
}

/// Sinks the delivery stage writes to
pub struct DeliverySinks<'a> {
    pub downloads: &'a dyn DownloadSink,
    pub clipboard: &'a dyn ClipboardSink,
    pub objects:   &'a dyn ObjectStore,
    pub page:      &'a dyn PageHost,
    pub notifier:  &'a dyn Notifier,
}

/// Revokes a temporary object URL exactly once.
///
/// `release()` is idempotent, and `Drop` covers early-error paths, so
/// the URL is revoked on whichever exit happens first and never twice.
struct ObjectGuard<'a> {
    store: &'a dyn ObjectStore,
    url:   Option<ObjectUrl>,
}

impl<'a> ObjectGuard<'a> {
    fn new(store: &'a dyn ObjectStore, url: ObjectUrl) -> Self {
        Self {
            store,
            url: Some(url),
        }
    }

    fn url(&self) -> &ObjectUrl {
        self.url.as_ref().expect("guard already released")
    }

    fn release(&mut self) {
        if let Some(url) = self.url.take() {
            self.store.revoke(&url);
        }
    }
}

impl Drop for ObjectGuard<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Encodes the composite into the requested output format.
///
/// PNG with the image-comment preference set (and metadata present)
/// carries `tEXt` Title/Source chunks. JPEG drops the alpha channel and
/// uses the quality preference.
pub fn encode_composite(
    buffer: CompositeBuffer,
    request: &CaptureRequest,
    prefs: &Preferences,
) -> StitchResult<Vec<u8>> {
    let (width, height, data) = buffer.into_raw();
    match request.format {
        OutputFormat::Png | OutputFormat::ClipboardPng => {
            let stamp = request.format == OutputFormat::Png
                && prefs.image_comment
                && (request.page_title.is_some() || request.page_url.is_some());
            if stamp {
                encode_png_with_text(
                    width,
                    height,
                    &data,
                    request.page_title.as_deref(),
                    request.page_url.as_deref(),
                )
            } else {
                encode_png_plain(width, height, &data)
            }
        }
        OutputFormat::Jpeg => encode_jpeg(width, height, &data, prefs.jpeg_quality),
    }
}

fn encode_png_plain(width: u32, height: u32, data: &[u8]) -> StitchResult<Vec<u8>> {
    let mut out = Vec::new();
    let encoder = PngEncoder::new_with_quality(
        Cursor::new(&mut out),
        CompressionType::Default,
        FilterType::Adaptive,
    );
    encoder
        .write_image(data, width, height, ExtendedColorType::Rgba8)
        .map_err(|e| StitchError::EncodingFailed {
            format: "png".to_string(),
            reason: e.to_string(),
        })?;
    Ok(out)
}

fn encode_png_with_text(
    width: u32,
    height: u32,
    data: &[u8],
    title: Option<&str>,
    url: Option<&str>,
) -> StitchResult<Vec<u8>> {
    let failed = |e: png::EncodingError| StitchError::EncodingFailed {
        format: "png".to_string(),
        reason: e.to_string(),
    };

    let mut out = Vec::new();
    let mut encoder = png::Encoder::new(&mut out, width, height);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    if let Some(title) = title {
        encoder
            .add_text_chunk("Title".to_string(), title.to_string())
            .map_err(failed)?;
    }
    if let Some(url) = url {
        encoder
            .add_text_chunk("Source".to_string(), url.to_string())
            .map_err(failed)?;
    }

    let mut writer = encoder.write_header().map_err(failed)?;
    writer.write_image_data(data).map_err(failed)?;
    writer.finish().map_err(failed)?;
    Ok(out)
}

fn encode_jpeg(width: u32, height: u32, data: &[u8], quality: u8) -> StitchResult<Vec<u8>> {
    // JPEG has no alpha channel
    let mut rgb = Vec::with_capacity(data.len() / 4 * 3);
    for px in data.chunks_exact(4) {
        rgb.extend_from_slice(&px[..3]);
    }

    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut out), quality.clamp(1, 100));
    encoder
        .write_image(&rgb, width, height, ExtendedColorType::Rgb8)
        .map_err(|e| StitchError::EncodingFailed {
            format: "jpeg".to_string(),
            reason: e.to_string(),
        })?;
    Ok(out)
}

/// Hands encoded bytes to their destination.
///
/// Clipboard requests call the clipboard sink exactly once and never
/// touch the download manager. File requests go through the preferred
/// save method; an interrupted download fails the request after the
/// temporary object URL has been revoked.
pub async fn deliver(
    sinks: &DeliverySinks<'_>,
    request: &CaptureRequest,
    prefs: &Preferences,
    bytes: Vec<u8>,
) -> StitchResult<DeliveryReport> {
    let encoded_len = bytes.len();

    if request.format.is_clipboard() {
        sinks.clipboard.set_image(&bytes, request.format.mime()).await?;
        if prefs.copy_notification {
            sinks.notifier.notify("Capture copied to clipboard");
        }
        return Ok(DeliveryReport {
            filename: request.filename.clone(),
            bytes:    encoded_len,
            method:   DeliveryMethod::Clipboard,
        });
    }

    match prefs.save_method {
        SaveMethod::OpenAsLink => {
            // The page context takes ownership of the URL
            let url = sinks.objects.create(bytes, request.format.mime());
            sinks.page.open_as_link(request.tab, &url.0).await?;
            Ok(DeliveryReport {
                filename: request.filename.clone(),
                bytes:    encoded_len,
                method:   DeliveryMethod::OpenedAsLink,
            })
        }
        SaveMethod::Download => {
            let url = sinks.objects.create(bytes, request.format.mime());
            let mut guard = ObjectGuard::new(sinks.objects, url);

            let id = sinks
                .downloads
                .start(DownloadRequest {
                    url:        guard.url().0.clone(),
                    filename:   request.filename.clone(),
                    target_dir: prefs.target_dir.clone(),
                })
                .await?;
            let state = sinks.downloads.wait(id).await?;
            guard.release();

            match state {
                DownloadState::Complete => {
                    tracing::info!(filename = %request.filename, bytes = encoded_len, "download complete");
                    if prefs.save_notification {
                        sinks.notifier.notify(&format!("Saved '{}'", request.filename));
                    }
                    Ok(DeliveryReport {
                        filename: request.filename.clone(),
                        bytes:    encoded_len,
                        method:   DeliveryMethod::Download(id),
                    })
                }
                DownloadState::Interrupted { reason } => {
                    tracing::warn!(filename = %request.filename, reason, "download interrupted");
                    Err(StitchError::DownloadInterrupted {
                        filename: request.filename.clone(),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        model::{CaptureRequest, Region, Size, TabId},
        plan::CompositeKind,
        platform::MockPlatform,
    };

    fn filled_buffer(width: u32, height: u32) -> CompositeBuffer {
        let mut buf = CompositeBuffer::allocate(CompositeKind::Surface, width, height).unwrap();
        let tile = crate::plan::Tile {
            x: 0,
            y: 0,
            width,
            height,
        };
        let src = image::RgbaImage::from_pixel(width, height, image::Rgba([10, 20, 30, 255]));
        buf.write_tile(&tile, &src, (0, 0)).unwrap();
        buf
    }

    fn request(format: crate::model::OutputFormat) -> CaptureRequest {
        CaptureRequest::builder(TabId(1))
            .region(Region::new(0, 0, 16, 16))
            .viewport(Size::new(1280, 720))
            .page(Size::new(1280, 4000))
            .format(format)
            .filename("page.png")
            .build()
    }

    fn sinks(platform: &MockPlatform) -> DeliverySinks<'_> {
        DeliverySinks {
            downloads: platform,
            clipboard: platform,
            objects:   platform,
            page:      platform,
            notifier:  platform,
        }
    }

    #[test]
    fn test_encode_png_is_decodable() {
        let req = request(crate::model::OutputFormat::Png);
        let bytes = encode_composite(filled_buffer(16, 16), &req, &Preferences {
            image_comment: false,
            ..Preferences::default()
        })
        .unwrap();

        let img = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (16, 16));
        assert_eq!(img.get_pixel(8, 8).0, [10, 20, 30, 255]);
    }

    #[test]
    fn test_encode_png_with_metadata_chunks() {
        let req = request(crate::model::OutputFormat::Png);
        let req = CaptureRequest {
            page_title: Some("Example Page".to_string()),
            page_url: Some("https://example.com/a".to_string()),
            ..req
        };
        let bytes = encode_composite(filled_buffer(8, 8), &req, &Preferences::default()).unwrap();

        let decoder = png::Decoder::new(Cursor::new(&bytes));
        let reader = decoder.read_info().unwrap();
        let texts = &reader.info().uncompressed_latin1_text;
        assert!(texts.iter().any(|t| t.keyword == "Title" && t.text == "Example Page"));
        assert!(texts.iter().any(|t| t.keyword == "Source"));

        // Still a valid image
        let img = image::load_from_memory(&bytes).unwrap();
        assert_eq!(img.width(), 8);
    }

    #[test]
    fn test_clipboard_png_never_stamped() {
        let req = CaptureRequest {
            page_title: Some("T".to_string()),
            ..request(crate::model::OutputFormat::ClipboardPng)
        };
        let bytes = encode_composite(filled_buffer(8, 8), &req, &Preferences::default()).unwrap();

        let decoder = png::Decoder::new(Cursor::new(&bytes));
        let reader = decoder.read_info().unwrap();
        assert!(reader.info().uncompressed_latin1_text.is_empty());
    }

    #[test]
    fn test_encode_jpeg() {
        let req = request(crate::model::OutputFormat::Jpeg);
        let bytes = encode_composite(filled_buffer(16, 16), &req, &Preferences::default()).unwrap();

        let img = image::load_from_memory(&bytes).unwrap();
        assert_eq!((img.width(), img.height()), (16, 16));
        // JPEG magic
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn test_clipboard_delivery_calls_sink_once() {
        let platform = Arc::new(MockPlatform::new());
        let req = request(crate::model::OutputFormat::ClipboardPng);

        let report = deliver(&sinks(&platform), &req, &Preferences::default(), vec![1, 2, 3])
            .await
            .unwrap();

        assert_eq!(report.method, DeliveryMethod::Clipboard);
        assert_eq!(platform.clipboard_writes(), 1);
        assert!(platform.downloads().is_empty());
        assert!(platform.notifications().iter().any(|n| n.contains("clipboard")));
    }

    #[tokio::test]
    async fn test_clipboard_notification_respects_preference() {
        let platform = Arc::new(MockPlatform::new());
        let req = request(crate::model::OutputFormat::ClipboardPng);
        let prefs = Preferences {
            copy_notification: false,
            ..Preferences::default()
        };

        deliver(&sinks(&platform), &req, &prefs, vec![0]).await.unwrap();
        assert!(platform.notifications().is_empty());
    }

    #[tokio::test]
    async fn test_download_delivery_revokes_url_once() {
        let platform = Arc::new(MockPlatform::new());
        let req = request(crate::model::OutputFormat::Png);

        let report = deliver(&sinks(&platform), &req, &Preferences::default(), vec![9; 64])
            .await
            .unwrap();

        assert!(matches!(report.method, DeliveryMethod::Download(_)));
        assert_eq!(platform.downloads().len(), 1);
        assert_eq!(platform.downloads()[0].filename, "page.png");
        assert_eq!(platform.all_revoke_counts(), vec![1]);
    }

    #[tokio::test]
    async fn test_interrupted_download_fails_after_single_revoke() {
        let platform = Arc::new(MockPlatform::new().with_interrupted_download());
        let req = request(crate::model::OutputFormat::Png);

        let err = deliver(&sinks(&platform), &req, &Preferences::default(), vec![9; 64])
            .await
            .unwrap_err();

        assert!(matches!(err, StitchError::DownloadInterrupted { .. }));
        assert_eq!(platform.all_revoke_counts(), vec![1]);
        // No success notification on interruption
        assert!(!platform.notifications().iter().any(|n| n.contains("Saved")));
    }

    #[tokio::test]
    async fn test_open_as_link_hands_url_to_page() {
        let platform = Arc::new(MockPlatform::new());
        let req = request(crate::model::OutputFormat::Png);
        let prefs = Preferences {
            save_method: SaveMethod::OpenAsLink,
            ..Preferences::default()
        };

        let report = deliver(&sinks(&platform), &req, &prefs, vec![1]).await.unwrap();

        assert_eq!(report.method, DeliveryMethod::OpenedAsLink);
        assert_eq!(platform.opened_links().len(), 1);
        assert!(platform.downloads().is_empty());
        // Page context owns the URL; nothing revoked
        assert_eq!(platform.all_revoke_counts(), vec![0]);
    }
}
