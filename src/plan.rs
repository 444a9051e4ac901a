//! Tile planning for oversized captures
//!
//! A capture region larger than the platform's canvas limits is split into
//! a row-major grid of tiles. The planner also decides, once per request,
//! which composite target the stitcher will use: a drawable surface when
//! the whole region fits in one tile, or a raw RGBA byte buffer otherwise.

use serde::{Deserialize, Serialize};

use crate::model::Size;

/// Per-axis pixel ceiling of a drawable canvas surface
pub const MAX_SURFACE_DIMENSION: u32 = 32_767;

/// Total pixel-area ceiling of a drawable canvas surface
pub const MAX_SURFACE_AREA: u64 = 472_907_776;

/// Hard per-tile width ceiling, regardless of computed limits
pub const HARD_TILE_WIDTH: u32 = 4_095;

/// Hard per-tile height ceiling, regardless of computed limits
pub const HARD_TILE_HEIGHT: u32 = 16_383;

/// One rectangular sub-capture of the requested region.
///
/// Coordinates are region-local; tiles tile the region exactly with no
/// gaps or overlaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    /// Left edge within the region
    pub x:      u32,
    /// Top edge within the region
    pub y:      u32,
    /// Tile width; the last tile in a row may be narrower
    pub width:  u32,
    /// Tile height; the last row may be shorter
    pub height: u32,
}

impl Tile {
    /// Area in pixels
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Effective per-tile maxima for one capture request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileLimits {
    /// Maximum tile width
    pub max_width:  u32,
    /// Maximum tile height
    pub max_height: u32,
    /// Maximum tile area in pixels
    pub max_area:   u64,
}

impl TileLimits {
    /// Creates explicit limits (used directly by tests and callers that
    /// already know their ceilings)
    pub fn new(max_width: u32, max_height: u32, max_area: u64) -> Self {
        Self {
            max_width:  max_width.max(1),
            max_height: max_height.max(1),
            max_area:   max_area.max(1),
        }
    }

    /// Derives limits from the platform surface ceilings.
    ///
    /// Captured pixel counts scale with device pixels, so both the
    /// dimension and area ceilings shrink by the scale factor. The hard
    /// per-axis tile ceilings apply regardless. When capture goes through
    /// viewport compensation rather than native region capture, a tile can
    /// never exceed what the viewport shows, so the viewport bounds the
    /// limits too.
    pub fn derive(scale: f64, viewport_bound: Option<Size>) -> Self {
        let scale = scale.max(f64::MIN_POSITIVE);
        let dim = (f64::from(MAX_SURFACE_DIMENSION) / scale).floor() as u32;
        let area = ((MAX_SURFACE_AREA as f64) / (scale * scale)).floor() as u64;

        let mut max_width = dim.min(HARD_TILE_WIDTH);
        let mut max_height = dim.min(HARD_TILE_HEIGHT);
        if let Some(viewport) = viewport_bound {
            max_width = max_width.min(viewport.width);
            max_height = max_height.min(viewport.height);
        }
        Self::new(max_width, max_height, area)
    }

    /// True if a `width`×`height` region fits in a single tile
    pub fn fits_single(&self, width: u32, height: u32) -> bool {
        width <= self.max_width
            && height <= self.max_height
            && u64::from(width) * u64::from(height) <= self.max_area
    }
}

/// Which composite target the stitcher assembles into.
///
/// Fixed once at plan time and never changes for the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompositeKind {
    /// Single drawable surface sized to the region
    Surface,
    /// Raw width×height×4 byte buffer, tiles copied in at offsets
    RawBuffer,
}

/// Tile grid plus the composite target choice for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilePlan {
    /// Tiles in row-major capture order
    pub tiles:     Vec<Tile>,
    /// Composite target for the stitcher
    pub composite: CompositeKind,
}

impl TilePlan {
    /// Partitions `[0,width) × [0,height)` into a row-major tile grid.
    ///
    /// Each tile's width is the lesser of the remaining width and the
    /// maximum, and likewise for height; the nominal tile height is
    /// additionally capped so no tile's area exceeds the area limit. A
    /// region that fits entirely within the limits becomes a single tile
    /// backed by a drawable surface.
    pub fn compute(width: u32, height: u32, limits: &TileLimits) -> Self {
        if width == 0 || height == 0 {
            return Self {
                tiles:     Vec::new(),
                composite: CompositeKind::Surface,
            };
        }

        if limits.fits_single(width, height) {
            return Self {
                tiles:     vec![Tile {
                    x: 0,
                    y: 0,
                    width,
                    height,
                }],
                composite: CompositeKind::Surface,
            };
        }

        // Widest tile in any row; the area cap on the nominal height must
        // hold for it.
        let step_x = limits.max_width.min(width);
        let area_capped_height = (limits.max_area / u64::from(step_x)).min(u64::from(u32::MAX));
        let step_y = limits
            .max_height
            .min(area_capped_height as u32)
            .min(height)
            .max(1);

        let mut tiles = Vec::new();
        let mut y = 0;
        while y < height {
            let tile_height = step_y.min(height - y);
            let mut x = 0;
            while x < width {
                let tile_width = step_x.min(width - x);
                tiles.push(Tile {
                    x,
                    y,
                    width: tile_width,
                    height: tile_height,
                });
                x += tile_width;
            }
            y += tile_height;
        }

        tracing::debug!(
            width,
            height,
            tile_count = tiles.len(),
            step_x,
            step_y,
            "planned tile grid"
        );

        Self {
            tiles,
            composite: CompositeKind::RawBuffer,
        }
    }

    /// True for the single-tile / drawable-surface case
    pub fn is_single(&self) -> bool {
        self.tiles.len() == 1 && self.composite == CompositeKind::Surface
    }
}
