use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, instrument};

use crate::config::SelectionConfig;
use crate::geometry::{BoundingBox, SurfacePoint};
use crate::raster::{crop, encode_png, EncodedImage, RenderImage};
use crate::{DocumentBackend, RenderRequest};

/// A committed region of a page, captured at release time.
#[derive(Debug, Clone)]
pub struct SelectionData {
    pub page_index: usize,
    pub rect: BoundingBox,
    /// Zoom the page was rendered at when the region was captured.
    pub scale_percent: u32,
    pub image: Arc<EncodedImage>,
}

#[derive(Debug, Clone)]
pub enum SelectionOutcome {
    /// Release without a drag in progress.
    Idle,
    /// Box below the minimum size; nothing is reported.
    Discarded,
    Committed(SelectionData),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceUpdate {
    Unchanged,
    /// Same dimensions, pixels rewritten into the existing buffer.
    Redrawn,
    Resized,
}

/// Pointer-drag state and rendered surface for a single page.
#[derive(Debug)]
pub struct PageSelection {
    page_index: usize,
    config: SelectionConfig,
    surface: Option<RenderImage>,
    rendered_percent: Option<u32>,
    stale: bool,
    anchor: Option<SurfacePoint>,
    visible: Option<BoundingBox>,
}

impl PageSelection {
    pub fn new(page_index: usize, config: SelectionConfig) -> Self {
        Self {
            page_index,
            config,
            surface: None,
            rendered_percent: None,
            stale: true,
            anchor: None,
            visible: None,
        }
    }

    pub fn page_index(&self) -> usize {
        self.page_index
    }

    pub fn surface(&self) -> Option<&RenderImage> {
        self.surface.as_ref()
    }

    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    pub fn visible_box(&self) -> Option<BoundingBox> {
        self.visible
    }

    pub fn is_dragging(&self) -> bool {
        self.anchor.is_some()
    }

    #[instrument(skip(self, backend), fields(page = self.page_index))]
    pub fn render(
        &mut self,
        backend: &dyn DocumentBackend,
        scale_percent: u32,
    ) -> Result<SurfaceUpdate> {
        if !self.stale && self.surface.is_some() && self.rendered_percent == Some(scale_percent) {
            return Ok(SurfaceUpdate::Unchanged);
        }

        let image = backend.render_page(RenderRequest {
            page_index: self.page_index,
            scale: scale_percent as f32 / 100.0,
        })?;
        self.stale = false;
        self.rendered_percent = Some(scale_percent);
        let previous = self.surface.as_ref().map(|s| (s.width, s.height));

        match self.surface.as_mut() {
            Some(surface) if surface.same_size(&image) => {
                surface.pixels.copy_from_slice(&image.pixels);
                Ok(SurfaceUpdate::Redrawn)
            }
            _ => {
                debug!(width = image.width, height = image.height, "surface resized");
                if let Some((old_width, old_height)) = previous.filter(|_| self.is_dragging()) {
                    let sx = image.width as f32 / old_width.max(1) as f32;
                    let sy = image.height as f32 / old_height.max(1) as f32;
                    self.rescale_drag(sx, sy);
                }
                self.surface = Some(image);
                Ok(SurfaceUpdate::Resized)
            }
        }
    }

    /// Keeps an in-progress drag on the same page content after the surface
    /// was reallocated at another scale. A committed box is left untouched.
    fn rescale_drag(&mut self, sx: f32, sy: f32) {
        let scale = |p: SurfacePoint| SurfacePoint::new(p.x * sx, p.y * sy);
        self.anchor = self.anchor.map(scale);
        self.visible = self.visible.map(|rect| {
            BoundingBox::from_corners(
                scale(SurfacePoint::new(rect.x, rect.y)),
                scale(SurfacePoint::new(rect.right(), rect.bottom())),
            )
        });
    }

    /// Starts a drag. Ignored until the page has been rendered.
    pub fn pointer_down(&mut self, point: SurfacePoint) -> bool {
        let Some(surface) = self.surface.as_ref() else {
            return false;
        };
        let point = point.clamp_to(surface.width, surface.height);
        self.anchor = Some(point);
        self.visible = Some(BoundingBox::at(point));
        true
    }

    pub fn pointer_move(&mut self, point: SurfacePoint) {
        let (Some(anchor), Some(surface)) = (self.anchor, self.surface.as_ref()) else {
            return;
        };
        let point = point.clamp_to(surface.width, surface.height);
        self.visible = Some(BoundingBox::from_corners(anchor, point));
    }

    /// Finishes the drag. The crop and its `scale_percent` both come from the
    /// surface as last rendered, whatever the session zoom is now.
    pub fn pointer_up(&mut self) -> Result<SelectionOutcome> {
        if self.anchor.take().is_none() {
            return Ok(SelectionOutcome::Idle);
        }
        let (Some(rect), Some(surface), Some(scale_percent)) =
            (self.visible, self.surface.as_ref(), self.rendered_percent)
        else {
            self.visible = None;
            return Ok(SelectionOutcome::Discarded);
        };

        if !rect.is_at_least(self.config.min_width, self.config.min_height) {
            debug!(page = self.page_index, ?rect, "selection below minimum size");
            self.visible = None;
            return Ok(SelectionOutcome::Discarded);
        }

        let Some(pixels) = rect.to_pixel_rect(surface.width, surface.height) else {
            self.visible = None;
            return Ok(SelectionOutcome::Discarded);
        };

        let region = crop(surface, pixels);
        let image = match encode_png(&region) {
            Ok(image) => image,
            Err(err) => {
                self.visible = None;
                return Err(err);
            }
        };

        Ok(SelectionOutcome::Committed(SelectionData {
            page_index: self.page_index,
            rect,
            scale_percent,
            image: Arc::new(image),
        }))
    }

    /// Pointer leaving the surface ends the drag exactly like a release.
    pub fn pointer_leave(&mut self) -> Result<SelectionOutcome> {
        self.pointer_up()
    }

    pub fn clear(&mut self) {
        self.anchor = None;
        self.visible = None;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{DocumentInfo, DocumentMetadata};
    use parking_lot::Mutex;

    /// Renders a page whose size follows the scale and whose red channel holds the page index.
    pub(crate) struct FakeBackend {
        pub info: DocumentInfo,
        pub base_width: u32,
        pub base_height: u32,
        pub renders: Mutex<Vec<RenderRequest>>,
    }

    impl FakeBackend {
        pub(crate) fn new(page_count: usize) -> Self {
            Self {
                info: DocumentInfo {
                    page_count,
                    metadata: DocumentMetadata::default(),
                },
                base_width: 100,
                base_height: 120,
                renders: Mutex::new(Vec::new()),
            }
        }
    }

    impl DocumentBackend for FakeBackend {
        fn info(&self) -> &DocumentInfo {
            &self.info
        }

        fn render_page(&self, request: RenderRequest) -> Result<RenderImage> {
            self.renders.lock().push(request);
            let width = (self.base_width as f32 * request.scale).round() as u32;
            let height = (self.base_height as f32 * request.scale).round() as u32;
            let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
            for y in 0..height {
                for x in 0..width {
                    pixels.extend_from_slice(&[
                        request.page_index as u8,
                        (x % 256) as u8,
                        (y % 256) as u8,
                        255,
                    ]);
                }
            }
            Ok(RenderImage {
                width,
                height,
                pixels,
            })
        }
    }

    fn rendered_page(backend: &FakeBackend) -> PageSelection {
        let mut page = PageSelection::new(2, SelectionConfig::default());
        page.render(backend, 100).unwrap();
        page
    }

    fn committed(outcome: SelectionOutcome) -> SelectionData {
        match outcome {
            SelectionOutcome::Committed(data) => data,
            other => panic!("expected a committed selection, got {:?}", other),
        }
    }

    #[test]
    fn drag_commits_normalized_box_and_cropped_png() {
        let backend = FakeBackend::new(3);
        let mut page = rendered_page(&backend);

        assert!(page.pointer_down(SurfacePoint::new(60.0, 70.0)));
        page.pointer_move(SurfacePoint::new(30.0, 40.0));
        page.pointer_move(SurfacePoint::new(20.0, 10.0));
        let data = committed(page.pointer_up().unwrap());

        assert_eq!(data.page_index, 2);
        assert_eq!(
            data.rect,
            BoundingBox {
                x: 20.0,
                y: 10.0,
                width: 40.0,
                height: 60.0
            }
        );
        assert_eq!(data.image.mime_type, "image/png");
        assert_eq!(&data.image.bytes[1..4], b"PNG");
        // Overlay stays visible after commit.
        assert_eq!(page.visible_box(), Some(data.rect));
        assert!(!page.is_dragging());
    }

    #[test]
    fn opposite_drag_directions_commit_same_box() {
        let backend = FakeBackend::new(3);
        let mut down_right = rendered_page(&backend);
        down_right.pointer_down(SurfacePoint::new(10.0, 10.0));
        down_right.pointer_move(SurfacePoint::new(50.0, 80.0));
        let a = committed(down_right.pointer_up().unwrap());

        let mut up_left = rendered_page(&backend);
        up_left.pointer_down(SurfacePoint::new(50.0, 80.0));
        up_left.pointer_move(SurfacePoint::new(10.0, 10.0));
        let b = committed(up_left.pointer_up().unwrap());

        assert_eq!(a.rect, b.rect);
        assert_eq!(a.image, b.image);
    }

    #[test]
    fn small_boxes_are_discarded_and_hidden() {
        let backend = FakeBackend::new(3);
        let cases = [(9.0, 40.0), (40.0, 9.0), (0.0, 0.0)];
        for (dx, dy) in cases {
            let mut page = rendered_page(&backend);
            page.pointer_down(SurfacePoint::new(5.0, 5.0));
            page.pointer_move(SurfacePoint::new(5.0 + dx, 5.0 + dy));
            assert!(matches!(
                page.pointer_up().unwrap(),
                SelectionOutcome::Discarded
            ));
            assert!(page.visible_box().is_none());
        }
    }

    #[test]
    fn leaving_surface_finalizes_like_release() {
        let backend = FakeBackend::new(3);
        let mut page = rendered_page(&backend);
        page.pointer_down(SurfacePoint::new(10.0, 10.0));
        page.pointer_move(SurfacePoint::new(500.0, 500.0));
        let data = committed(page.pointer_leave().unwrap());
        // Clamped to the 100x120 surface.
        assert_eq!(data.rect.right(), 100.0);
        assert_eq!(data.rect.bottom(), 120.0);
    }

    #[test]
    fn move_without_drag_and_release_without_drag_do_nothing() {
        let backend = FakeBackend::new(3);
        let mut page = rendered_page(&backend);
        page.pointer_move(SurfacePoint::new(10.0, 10.0));
        assert!(page.visible_box().is_none());
        assert!(matches!(page.pointer_up().unwrap(), SelectionOutcome::Idle));
    }

    #[test]
    fn unrendered_page_ignores_pointer() {
        let mut page = PageSelection::new(0, SelectionConfig::default());
        assert!(!page.pointer_down(SurfacePoint::new(1.0, 1.0)));
        assert!(!page.is_dragging());
    }

    #[test]
    fn render_skips_when_scale_matches_and_reuses_buffer_when_size_matches() {
        let backend = FakeBackend::new(3);
        let mut page = PageSelection::new(1, SelectionConfig::default());

        assert_eq!(page.render(&backend, 100).unwrap(), SurfaceUpdate::Resized);
        assert_eq!(page.render(&backend, 100).unwrap(), SurfaceUpdate::Unchanged);
        assert_eq!(backend.renders.lock().len(), 1);

        page.mark_stale();
        assert_eq!(page.render(&backend, 100).unwrap(), SurfaceUpdate::Redrawn);

        assert_eq!(page.render(&backend, 150).unwrap(), SurfaceUpdate::Resized);
        let surface = page.surface().unwrap();
        assert_eq!((surface.width, surface.height), (150, 180));
    }

    #[test]
    fn committed_scale_follows_rendered_surface() {
        let backend = FakeBackend::new(3);
        let mut page = PageSelection::new(0, SelectionConfig::default());
        page.render(&backend, 150).unwrap();
        page.pointer_down(SurfacePoint::new(10.0, 10.0));
        page.pointer_move(SurfacePoint::new(60.0, 70.0));
        let data = committed(page.pointer_up().unwrap());
        assert_eq!(data.scale_percent, 150);
    }

    #[test]
    fn resize_mid_drag_rescales_anchor_and_box() {
        let backend = FakeBackend::new(3);
        let mut page = rendered_page(&backend);
        page.pointer_down(SurfacePoint::new(10.0, 20.0));
        page.pointer_move(SurfacePoint::new(50.0, 60.0));

        assert_eq!(page.render(&backend, 200).unwrap(), SurfaceUpdate::Resized);
        assert_eq!(
            page.visible_box(),
            Some(BoundingBox {
                x: 20.0,
                y: 40.0,
                width: 80.0,
                height: 80.0
            })
        );

        page.pointer_move(SurfacePoint::new(100.0, 120.0));
        let data = committed(page.pointer_up().unwrap());
        assert_eq!(data.rect.x, 20.0);
        assert_eq!(data.rect.y, 40.0);
        assert_eq!(data.scale_percent, 200);
    }

    #[test]
    fn resize_keeps_committed_box_as_captured() {
        let backend = FakeBackend::new(3);
        let mut page = rendered_page(&backend);
        page.pointer_down(SurfacePoint::new(10.0, 10.0));
        page.pointer_move(SurfacePoint::new(60.0, 70.0));
        let data = committed(page.pointer_up().unwrap());

        page.render(&backend, 200).unwrap();
        assert_eq!(page.visible_box(), Some(data.rect));
    }
}
