use std::sync::Arc;

use anyhow::Result;

pub mod config;
pub mod export;
pub mod geometry;
pub mod insight;
pub mod presentation;
pub mod raster;
pub mod selection;
pub mod session;
pub mod workbench;

pub use config::{AppConfig, ConfigError, ExportConfig, GenerationConfig, SelectionConfig, ZoomConfig};
pub use export::{export_artifact, write_export, ExportedArtifact};
pub use geometry::{BoundingBox, PixelRect, SurfacePoint};
pub use insight::{
    ArtifactKind, CompletionStatus, GenerationError, InsightContent, InsightId, InsightOrchestrator,
    InsightResult, InsightState,
};
pub use presentation::{newest_first, ResultRow, ResultStatus};
pub use raster::{crop, encode_png, EncodedImage, RenderImage};
pub use selection::{PageSelection, SelectionData, SelectionOutcome, SurfaceUpdate};
pub use session::{DocumentSession, Zoom};
pub use workbench::{Workbench, WorkbenchError};

#[derive(Debug, Clone, Default)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
}

impl DocumentMetadata {
    /// `Title (Author)`, or whichever of the two is present.
    pub fn label(&self) -> Option<String> {
        match (&self.title, &self.author) {
            (Some(title), Some(author)) => Some(format!("{title} ({author})")),
            (Some(title), None) => Some(title.clone()),
            (None, Some(author)) => Some(author.clone()),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub page_count: usize,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone, Copy)]
pub struct RenderRequest {
    pub page_index: usize,
    pub scale: f32,
}

/// A parsed document able to rasterize any of its pages.
pub trait DocumentBackend: Send + Sync {
    fn info(&self) -> &DocumentInfo;
    fn render_page(&self, request: RenderRequest) -> Result<RenderImage>;
}

/// Parses raw document bytes into a [`DocumentBackend`].
#[async_trait::async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn open_bytes(&self, bytes: Vec<u8>) -> Result<Arc<dyn DocumentBackend>>;
}

/// Remote capability turning a cropped page image into a derived artifact.
#[async_trait::async_trait]
pub trait InsightGenerator: Send + Sync {
    async fn generate(
        &self,
        image: &EncodedImage,
        kind: ArtifactKind,
    ) -> std::result::Result<InsightContent, GenerationError>;
}

/// Precondition guarding every core operation: a usable credential must be selected.
#[async_trait::async_trait]
pub trait CredentialGate: Send + Sync {
    async fn has_credential(&self) -> bool;

    /// One-time selection action. Resolves once the user has picked (or declined to pick) a key.
    async fn select_credential(&self) -> Result<()>;
}
