use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::{debug, info, instrument, warn};

use crate::config::{SelectionConfig, ZoomConfig};
use crate::geometry::{BoundingBox, SurfacePoint};
use crate::selection::{PageSelection, SelectionData, SelectionOutcome, SurfaceUpdate};
use crate::{DocumentBackend, DocumentInfo, DocumentProvider};

/// Render scale in whole percent, clamped to a fixed range and moved in fixed steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zoom {
    percent: u32,
    config: ZoomConfig,
}

impl Zoom {
    pub fn new(config: ZoomConfig) -> Self {
        Self {
            percent: bounded(config.initial_percent, &config),
            config,
        }
    }

    pub fn percent(&self) -> u32 {
        self.percent
    }

    pub fn scale(&self) -> f32 {
        self.percent as f32 / 100.0
    }

    /// Returns whether the value changed.
    pub fn set_percent(&mut self, percent: u32) -> bool {
        let next = bounded(percent, &self.config);
        let changed = next != self.percent;
        self.percent = next;
        changed
    }

    pub fn step_in(&mut self) -> bool {
        self.set_percent(self.percent.saturating_add(self.config.step_percent))
    }

    pub fn step_out(&mut self) -> bool {
        self.set_percent(self.percent.saturating_sub(self.config.step_percent))
    }

    pub fn reset(&mut self) -> bool {
        self.set_percent(self.config.initial_percent)
    }
}

/// Unlike `u32::clamp` this never panics; an inverted range pins to `max_percent`.
fn bounded(percent: u32, config: &ZoomConfig) -> u32 {
    percent.max(config.min_percent).min(config.max_percent)
}

struct LoadedDocument {
    backend: Arc<dyn DocumentBackend>,
    info: DocumentInfo,
}

/// One loaded document, its zoom, and the page that owns the selection overlay.
pub struct DocumentSession {
    document: Option<LoadedDocument>,
    pages: Vec<PageSelection>,
    zoom: Zoom,
    active_page: Option<usize>,
    committed: Option<SelectionData>,
    selection_config: SelectionConfig,
}

impl DocumentSession {
    pub fn new(zoom: ZoomConfig, selection_config: SelectionConfig) -> Self {
        Self {
            document: None,
            pages: Vec::new(),
            zoom: Zoom::new(zoom),
            active_page: None,
            committed: None,
            selection_config,
        }
    }

    pub fn info(&self) -> Option<&DocumentInfo> {
        self.document.as_ref().map(|doc| &doc.info)
    }

    pub fn is_loaded(&self) -> bool {
        self.document.is_some()
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page(&self, page_index: usize) -> Option<&PageSelection> {
        self.pages.get(page_index)
    }

    pub fn zoom(&self) -> Zoom {
        self.zoom
    }

    pub fn active_page(&self) -> Option<usize> {
        self.active_page
    }

    pub fn committed(&self) -> Option<&SelectionData> {
        self.committed.as_ref()
    }

    /// The single page currently showing a selection box, if any.
    pub fn overlay(&self) -> Option<(usize, BoundingBox)> {
        self.pages
            .iter()
            .find_map(|page| page.visible_box().map(|rect| (page.page_index(), rect)))
    }

    /// Drops the document, every page, the committed selection and the active marker.
    pub fn reset(&mut self) {
        if self.document.take().is_some() {
            debug!("document dropped");
        }
        self.pages.clear();
        self.active_page = None;
        self.committed = None;
    }

    /// Replaces the session with a freshly parsed document. On failure the
    /// session is left empty.
    #[instrument(skip(self, provider, bytes), fields(len = bytes.len()))]
    pub async fn load(&mut self, provider: &dyn DocumentProvider, bytes: Vec<u8>) -> Result<()> {
        self.reset();

        let backend = match provider.open_bytes(bytes).await {
            Ok(backend) => backend,
            Err(err) => {
                warn!(?err, "failed to parse document");
                return Err(err);
            }
        };
        let info = backend.info().clone();
        info!(pages = info.page_count, "document loaded");

        self.pages = (0..info.page_count)
            .map(|index| PageSelection::new(index, self.selection_config))
            .collect();
        self.document = Some(LoadedDocument { backend, info });
        Ok(())
    }

    pub fn zoom_in(&mut self) -> bool {
        let changed = self.zoom.step_in();
        self.after_zoom(changed)
    }

    pub fn zoom_out(&mut self) -> bool {
        let changed = self.zoom.step_out();
        self.after_zoom(changed)
    }

    pub fn reset_zoom(&mut self) -> bool {
        let changed = self.zoom.reset();
        self.after_zoom(changed)
    }

    pub fn set_zoom_percent(&mut self, percent: u32) -> bool {
        let changed = self.zoom.set_percent(percent);
        self.after_zoom(changed)
    }

    fn after_zoom(&mut self, changed: bool) -> bool {
        if changed {
            for page in &mut self.pages {
                page.mark_stale();
            }
            debug!(percent = self.zoom.percent(), "zoom changed");
        }
        changed
    }

    /// Brings the page surface up to date with the current zoom.
    pub fn render_page(&mut self, page_index: usize) -> Result<SurfaceUpdate> {
        let doc = self
            .document
            .as_ref()
            .ok_or_else(|| anyhow!("no document loaded"))?;
        let page = self
            .pages
            .get_mut(page_index)
            .ok_or_else(|| anyhow!("page {} out of range", page_index))?;
        page.render(doc.backend.as_ref(), self.zoom.percent())
    }

    /// Makes `page_index` the only page allowed to show a selection box and
    /// starts a drag there.
    pub fn pointer_down(&mut self, page_index: usize, point: SurfacePoint) -> bool {
        if page_index >= self.pages.len() {
            return false;
        }
        for page in &mut self.pages {
            if page.page_index() != page_index {
                page.clear();
            }
        }
        self.active_page = Some(page_index);
        self.pages[page_index].pointer_down(point)
    }

    pub fn pointer_move(&mut self, page_index: usize, point: SurfacePoint) {
        if self.active_page != Some(page_index) {
            return;
        }
        if let Some(page) = self.pages.get_mut(page_index) {
            page.pointer_move(point);
        }
    }

    pub fn pointer_up(&mut self, page_index: usize) -> Result<Option<SelectionData>> {
        self.finish_drag(page_index, false)
    }

    pub fn pointer_leave(&mut self, page_index: usize) -> Result<Option<SelectionData>> {
        self.finish_drag(page_index, true)
    }

    fn finish_drag(&mut self, page_index: usize, left: bool) -> Result<Option<SelectionData>> {
        if self.active_page != Some(page_index) {
            return Ok(None);
        }
        let Some(page) = self.pages.get_mut(page_index) else {
            return Ok(None);
        };
        let outcome = if left {
            page.pointer_leave()?
        } else {
            page.pointer_up()?
        };

        match outcome {
            SelectionOutcome::Committed(data) => {
                debug!(page = page_index, rect = ?data.rect, bytes = data.image.bytes.len(), "selection committed");
                self.committed = Some(data.clone());
                Ok(Some(data))
            }
            SelectionOutcome::Discarded | SelectionOutcome::Idle => Ok(None),
        }
    }

    /// User cancel: hides every box and forgets the committed selection.
    pub fn cancel_selection(&mut self) {
        for page in &mut self.pages {
            page.clear();
        }
        self.active_page = None;
        self.committed = None;
    }
}
