//! Scroll compensation
//!
//! When the platform cannot capture an arbitrary page offset directly,
//! the page content has to be repositioned so the desired tile is visible
//! inside the viewport. Two strategies exist: a transform overlay that
//! visually translates content without touching the document scroll state
//! (no scroll events, no lazy-load observers retriggered), and a real
//! `scrollTo`. Both report where the tile's content lands inside the
//! captured viewport, and both are undone by a single idempotent
//! [`Compensator::restore`] that runs on success and failure paths alike.

use crate::{
    error::StitchResult,
    model::{Anchor, CaptureRequest, Point, Region, Strategy, TabId},
    plan::Tile,
    platform::{OverlayId, OverlaySpec, PageHost, StyleBaseline},
};

/// Mutable compensation state for one request.
///
/// An explicit state object rather than captured closure state: restore
/// is a function of exactly these fields.
#[derive(Debug, Default)]
struct CompensationState {
    initialized:      bool,
    /// First-tile shortcut: the requested rect was already fully visible
    skip:             bool,
    original_scroll:  Point,
    baseline:         StyleBaseline,
    applied_overlays: Vec<OverlayId>,
    restored:         bool,
}

/// Repositions page content per tile and undoes everything afterwards
#[derive(Debug)]
pub struct Compensator {
    strategy: Strategy,
    tab:      TabId,
    state:    CompensationState,
}

/// Target coordinate along one axis.
///
/// A forward axis addresses the tile where it was planned. A backward
/// axis mirrors the coordinate from the far page edge, then resolves it
/// against the page size re-read at expose time, so bottom/right-anchored
/// regions stay attached to their edge while the page grows or shrinks.
fn axis_target(anchor: Anchor, page_at_request: u32, page_now: u32, origin: i64, size: u32) -> i64 {
    match anchor {
        Anchor::Forward => origin,
        Anchor::Backward => {
            let mirrored = -(i64::from(page_at_request) - origin) + i64::from(size);
            i64::from(page_now) + mirrored - i64::from(size)
        }
    }
}

impl Compensator {
    /// Creates a compensator for one request
    pub fn new(strategy: Strategy, tab: TabId) -> Self {
        Self {
            strategy,
            tab,
            state: CompensationState::default(),
        }
    }

    /// Strategy this compensator dispatches on
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Makes the given tile visible and returns the offset within the
    /// captured viewport where its content begins.
    ///
    /// On the first call only, if the requested rect is already fully
    /// visible at the current scroll, compensation is skipped entirely
    /// and the offset inside the current viewport is returned.
    pub async fn expose(
        &mut self,
        host: &dyn PageHost,
        request: &CaptureRequest,
        tile: &Tile,
    ) -> StitchResult<Point> {
        if !self.strategy.needs_compensation() {
            return Ok(Point::default());
        }

        let tile_page = Point::new(
            request.region.left + i64::from(tile.x),
            request.region.top + i64::from(tile.y),
        );

        if !self.state.initialized {
            self.init(host, request).await?;
        }

        if self.state.skip {
            return Ok(Point::new(
                tile_page.x - self.state.original_scroll.x,
                tile_page.y - self.state.original_scroll.y,
            ));
        }

        let page_now = host.page_size(self.tab).await?;
        let abs = Point::new(
            axis_target(
                request.direction.x,
                request.page.width,
                page_now.width,
                tile_page.x,
                tile.width,
            ),
            axis_target(
                request.direction.y,
                request.page.height,
                page_now.height,
                tile_page.y,
                tile.height,
            ),
        );
        // Leave padding room so sticky chrome does not cover the tile
        let desired = Point::new(abs.x - request.scroll_padding.x, abs.y - request.scroll_padding.y);

        match self.strategy {
            Strategy::TransformScroll => {
                let spec = OverlaySpec {
                    translate:           Point::new(
                        self.state.baseline.translate.x - desired.x,
                        self.state.baseline.translate.y - desired.y,
                    ),
                    background_position: Point::new(
                        self.state.baseline.background_position.x + desired.x,
                        self.state.baseline.background_position.y + desired.y,
                    ),
                    clear_fixed:         true,
                };
                let id = host.apply_overlay(self.tab, &spec).await?;
                self.state.applied_overlays.push(id);
                Ok(Point::new(abs.x - desired.x, abs.y - desired.y))
            }
            Strategy::RealScroll => {
                let actual = host.scroll_to(self.tab, desired).await?;
                Ok(Point::new(abs.x - actual.x, abs.y - actual.y))
            }
            Strategy::NativeCapture => unreachable!("native capture never compensates"),
        }
    }

    /// First-use setup: visibility shortcut or baseline reset
    async fn init(&mut self, host: &dyn PageHost, request: &CaptureRequest) -> StitchResult<()> {
        let scroll = host.scroll_position(self.tab).await?;
        self.state.original_scroll = scroll;
        self.state.initialized = true;

        let visible = Region::new(
            scroll.x,
            scroll.y,
            request.viewport.width,
            request.viewport.height,
        );
        if visible.contains(&request.region) {
            tracing::debug!(region = ?request.region, "region already visible, skipping compensation");
            self.state.skip = true;
            return Ok(());
        }

        if self.strategy == Strategy::TransformScroll {
            // Snapshot the page's own offsets before the first overlay so
            // per-tile offsets compose on top of them, then reset to a
            // known baseline: fixed stickiness cleared, real scroll zeroed.
            self.state.baseline = host.style_baseline(self.tab).await?;
            host.scroll_to(self.tab, Point::default()).await?;
            let spec = OverlaySpec {
                translate:           self.state.baseline.translate,
                background_position: self.state.baseline.background_position,
                clear_fixed:         true,
            };
            let id = host.apply_overlay(self.tab, &spec).await?;
            self.state.applied_overlays.push(id);
        }
        Ok(())
    }

    /// Undoes every applied overlay in reverse order and restores the
    /// original scroll position.
    ///
    /// Idempotent: the first call does the work, subsequent calls are
    /// no-ops. Invoked from both the success path and the abort path, so
    /// individual undo failures are logged and skipped rather than
    /// propagated.
    pub async fn restore(&mut self, host: &dyn PageHost) {
        if !self.state.initialized || self.state.restored {
            return;
        }
        self.state.restored = true;
        if self.state.skip {
            return;
        }

        while let Some(id) = self.state.applied_overlays.pop() {
            if let Err(e) = host.remove_overlay(self.tab, id).await {
                tracing::warn!(overlay = id.0, "failed to remove overlay during restore: {e}");
            }
        }
        if let Err(e) = host.scroll_to(self.tab, self.state.original_scroll).await {
            tracing::warn!("failed to restore scroll position: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::{CaptureRequest, OverflowDirection, Size},
        platform::MockPlatform,
    };

    const TAB: TabId = TabId(1);

    fn request(region: Region) -> CaptureRequest {
        CaptureRequest::builder(TAB)
            .region(region)
            .viewport(Size::new(1280, 720))
            .page(Size::new(1280, 4000))
            .build()
    }

    fn tile(x: u32, y: u32, width: u32, height: u32) -> Tile {
        Tile {
            x,
            y,
            width,
            height,
        }
    }

    #[test]
    fn test_axis_target_forward() {
        assert_eq!(axis_target(Anchor::Forward, 4000, 4000, 1000, 500), 1000);
        assert_eq!(axis_target(Anchor::Forward, 4000, 9000, 1000, 500), 1000);
    }

    #[test]
    fn test_axis_target_backward_tracks_page_growth() {
        // Stable page: same as forward
        assert_eq!(axis_target(Anchor::Backward, 4000, 4000, 3000, 500), 3000);
        // Page grew by 1000: tile stays attached to the bottom edge
        assert_eq!(axis_target(Anchor::Backward, 4000, 5000, 3000, 500), 4000);
        // Page shrank by 500
        assert_eq!(axis_target(Anchor::Backward, 4000, 3500, 3000, 500), 2500);
    }

    #[tokio::test]
    async fn test_native_strategy_returns_zero_offset() {
        let platform = MockPlatform::new();
        let mut comp = Compensator::new(Strategy::NativeCapture, TAB);
        let req = request(Region::new(0, 0, 800, 600));

        let offset = comp.expose(&platform, &req, &tile(0, 0, 800, 600)).await.unwrap();
        assert_eq!(offset, Point::default());
        assert_eq!(platform.scroll_history(), Vec::<Point>::new());
    }

    #[tokio::test]
    async fn test_visible_region_skips_compensation() {
        let platform = MockPlatform::new().with_scroll(Point::new(0, 0));
        // Scroll the mock, then ask for a rect inside the visible viewport
        platform.scroll_to(TAB, Point::new(0, 1000)).await.unwrap();

        let mut comp = Compensator::new(Strategy::RealScroll, TAB);
        let req = request(Region::new(100, 1200, 400, 300));

        let offset = comp.expose(&platform, &req, &tile(0, 0, 400, 300)).await.unwrap();
        assert_eq!(offset, Point::new(100, 200));

        // Only the setup scroll above happened; no compensation scroll
        assert_eq!(platform.scroll_history().len(), 1);

        // Restore has nothing to undo
        comp.restore(&platform).await;
        assert_eq!(platform.scroll_history().len(), 1);
        assert_eq!(platform.current_scroll(), Point::new(0, 1000));
    }

    #[tokio::test]
    async fn test_transform_strategy_translates_content() {
        let platform = MockPlatform::new();
        let mut comp = Compensator::new(Strategy::TransformScroll, TAB);
        let req = request(Region::new(0, 1000, 1280, 2000));

        let offset = comp.expose(&platform, &req, &tile(0, 0, 1280, 720)).await.unwrap();
        assert_eq!(offset, Point::default());

        // Baseline reset zeroed the real scroll, then two overlays were
        // applied: the clear-fixed baseline and the per-tile translation
        assert_eq!(platform.scroll_history(), vec![Point::default()]);
        assert_eq!(platform.active_overlays(), 2);

        // The virtual view now starts at the tile's page position
        use crate::platform::{CaptureBackend, CaptureOpts, mock::coordinate_pixel};
        let bytes = platform
            .capture_region(TAB, Region::new(0, 0, 1, 1), &CaptureOpts {
                quality: 90,
                scale:   None,
            })
            .await
            .unwrap();
        let img = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(img.get_pixel(0, 0).0, coordinate_pixel(0, 1000));
    }

    #[tokio::test]
    async fn test_scroll_strategy_reports_clamped_offset() {
        let platform = MockPlatform::new();
        let mut comp = Compensator::new(Strategy::RealScroll, TAB);
        // Bottom tile: page 4000, viewport 720, so scroll clamps at 3280
        let req = request(Region::new(0, 3500, 1280, 500));

        let offset = comp.expose(&platform, &req, &tile(0, 0, 1280, 500)).await.unwrap();
        assert_eq!(offset, Point::new(0, 220));
        assert_eq!(platform.current_scroll(), Point::new(0, 3280));
    }

    #[tokio::test]
    async fn test_backward_region_follows_page_growth() {
        let platform = MockPlatform::new();
        let mut comp = Compensator::new(Strategy::RealScroll, TAB);

        let mut req = request(Region::new(0, 3000, 1280, 500));
        req.direction = OverflowDirection {
            x: Anchor::Forward,
            y: Anchor::Backward,
        };

        // The page grows after the request was issued
        platform.set_page_size(Size::new(1280, 5000));

        let offset = comp.expose(&platform, &req, &tile(0, 0, 1280, 500)).await.unwrap();
        // Target resolves to 4000 (3000 shifted by 1000 of growth)
        assert_eq!(platform.current_scroll(), Point::new(0, 4000));
        assert_eq!(offset, Point::default());
    }

    #[tokio::test]
    async fn test_scroll_padding_leaves_margin() {
        let platform = MockPlatform::new();
        let mut comp = Compensator::new(Strategy::RealScroll, TAB);

        let mut req = request(Region::new(0, 1000, 1280, 2000));
        req.scroll_padding = Point::new(0, 50);

        let offset = comp.expose(&platform, &req, &tile(0, 0, 1280, 600)).await.unwrap();
        // Scrolled 50px short of the tile, so content starts 50px down
        assert_eq!(platform.current_scroll(), Point::new(0, 950));
        assert_eq!(offset, Point::new(0, 50));
    }

    #[tokio::test]
    async fn test_restore_is_idempotent() {
        let platform = MockPlatform::new().with_scroll(Point::new(0, 300));
        let mut comp = Compensator::new(Strategy::TransformScroll, TAB);
        let req = request(Region::new(0, 1000, 1280, 2000));

        comp.expose(&platform, &req, &tile(0, 0, 1280, 720)).await.unwrap();
        assert_eq!(platform.active_overlays(), 2);

        comp.restore(&platform).await;
        let after_first = platform.scroll_history();
        assert_eq!(platform.active_overlays(), 0);
        assert_eq!(platform.current_scroll(), Point::new(0, 300));

        // N-th call changes nothing
        comp.restore(&platform).await;
        comp.restore(&platform).await;
        assert_eq!(platform.scroll_history(), after_first);
        assert_eq!(platform.active_overlays(), 0);
    }

    #[tokio::test]
    async fn test_second_tile_reuses_baseline() {
        let platform = MockPlatform::new();
        let mut comp = Compensator::new(Strategy::TransformScroll, TAB);
        let req = request(Region::new(0, 1000, 1280, 2000));

        comp.expose(&platform, &req, &tile(0, 0, 1280, 720)).await.unwrap();
        comp.expose(&platform, &req, &tile(0, 720, 1280, 720)).await.unwrap();

        // Baseline scroll reset happened once; one more overlay per tile
        assert_eq!(platform.scroll_history(), vec![Point::default()]);
        assert_eq!(platform.active_overlays(), 3);
    }
}
