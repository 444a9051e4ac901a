//! Composite buffers and tile blitting
//!
//! Decoded tile pixels are assembled into exactly one of two targets,
//! chosen by the planner and fixed for the whole request: a drawable
//! surface for single-tile captures, or a raw width×height×4 byte buffer
//! for tiled captures. Each tile writes a disjoint area, so blits are
//! safe to run in any order.

use image::RgbaImage;

use crate::{
    error::{StitchError, StitchResult},
    plan::{CompositeKind, Tile},
};

/// Allocation ceiling for a composite buffer.
///
/// Anything above this cannot be assembled safely; the request aborts
/// before any capture is issued.
pub const MAX_BUFFER_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Decodes one captured tile image into RGBA pixels
pub fn decode_capture(bytes: &[u8]) -> StitchResult<RgbaImage> {
    let img = image::load_from_memory(bytes).map_err(|e| StitchError::DecodeFailed {
        reason: e.to_string(),
    })?;
    Ok(img.to_rgba8())
}

/// In-memory target tile pixels are assembled into
#[derive(Debug, Clone)]
pub enum CompositeBuffer {
    /// Drawable surface sized to the full region
    Surface(RgbaImage),
    /// Raw RGBA bytes in row-major order
    Raw {
        width:  u32,
        height: u32,
        data:   Vec<u8>,
    },
}

impl CompositeBuffer {
    /// Allocates the composite target for a request.
    ///
    /// # Errors
    ///
    /// [`StitchError::ImageTooLarge`] if the RGBA buffer would exceed
    /// [`MAX_BUFFER_BYTES`]. Raised before any capture runs.
    pub fn allocate(kind: CompositeKind, width: u32, height: u32) -> StitchResult<Self> {
        let bytes = u64::from(width) * u64::from(height) * 4;
        if bytes > MAX_BUFFER_BYTES {
            return Err(StitchError::ImageTooLarge {
                width,
                height,
                bytes,
            });
        }

        Ok(match kind {
            CompositeKind::Surface => CompositeBuffer::Surface(RgbaImage::new(width, height)),
            CompositeKind::RawBuffer => CompositeBuffer::Raw {
                width,
                height,
                data: vec![0; bytes as usize],
            },
        })
    }

    /// Buffer dimensions
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            CompositeBuffer::Surface(img) => img.dimensions(),
            CompositeBuffer::Raw { width, height, .. } => (*width, *height),
        }
    }

    /// Which composite variant this is
    pub fn kind(&self) -> CompositeKind {
        match self {
            CompositeBuffer::Surface(_) => CompositeKind::Surface,
            CompositeBuffer::Raw { .. } => CompositeKind::RawBuffer,
        }
    }

    /// Copies a tile's pixels into the buffer at the tile's region-relative
    /// offset.
    ///
    /// `src_offset` is where the tile content begins within the captured
    /// image (compensated captures may include extra margin). Full-width
    /// tiles copy their whole row range in one bulk copy; partial-width
    /// tiles copy row by row.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` if the tile lies outside the buffer, or
    /// `DecodeFailed` if the captured image is smaller than the tile.
    pub fn write_tile(
        &mut self,
        tile: &Tile,
        source: &RgbaImage,
        src_offset: (u32, u32),
    ) -> StitchResult<()> {
        let (buf_width, buf_height) = self.dimensions();
        if tile.x + tile.width > buf_width || tile.y + tile.height > buf_height {
            return Err(StitchError::InvalidRequest {
                reason: format!("tile {tile:?} outside {buf_width}x{buf_height} buffer"),
            });
        }
        let (src_x, src_y) = src_offset;
        if src_x + tile.width > source.width() || src_y + tile.height > source.height() {
            return Err(StitchError::DecodeFailed {
                reason: format!(
                    "captured image {}x{} smaller than tile {}x{} at offset ({src_x},{src_y})",
                    source.width(),
                    source.height(),
                    tile.width,
                    tile.height
                ),
            });
        }

        let dst: &mut [u8] = match self {
            CompositeBuffer::Surface(img) => &mut *img,
            CompositeBuffer::Raw { data, .. } => data,
        };
        blit(dst, buf_width, tile, source, src_offset);
        Ok(())
    }

    /// Reads one pixel (test and verification helper)
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        match self {
            CompositeBuffer::Surface(img) => img.get_pixel(x, y).0,
            CompositeBuffer::Raw { width, data, .. } => {
                let idx = ((y as usize) * (*width as usize) + x as usize) * 4;
                [data[idx], data[idx + 1], data[idx + 2], data[idx + 3]]
            }
        }
    }

    /// Consumes the buffer into width, height, and raw RGBA bytes
    pub fn into_raw(self) -> (u32, u32, Vec<u8>) {
        match self {
            CompositeBuffer::Surface(img) => {
                let (w, h) = img.dimensions();
                (w, h, img.into_raw())
            }
            CompositeBuffer::Raw {
                width,
                height,
                data,
            } => (width, height, data),
        }
    }
}

/// Row-major copy of a tile into the destination byte buffer.
///
/// Bounds are validated by the caller.
fn blit(dst: &mut [u8], dst_width: u32, tile: &Tile, src: &RgbaImage, (src_x, src_y): (u32, u32)) {
    let dst_stride = dst_width as usize * 4;
    let src_stride = src.width() as usize * 4;
    let src_bytes: &[u8] = src.as_raw();
    let row_len = tile.width as usize * 4;

    let full_width = tile.x == 0 && tile.width == dst_width && src_x == 0 && src.width() == dst_width;
    if full_width {
        // Contiguous row range in both buffers
        let dst_start = tile.y as usize * dst_stride;
        let src_start = src_y as usize * src_stride;
        let len = tile.height as usize * dst_stride;
        dst[dst_start..dst_start + len].copy_from_slice(&src_bytes[src_start..src_start + len]);
        return;
    }

    for row in 0..tile.height as usize {
        let dst_start = (tile.y as usize + row) * dst_stride + tile.x as usize * 4;
        let src_start = (src_y as usize + row) * src_stride + src_x as usize * 4;
        dst[dst_start..dst_start + row_len]
            .copy_from_slice(&src_bytes[src_start..src_start + row_len]);
    }
}
