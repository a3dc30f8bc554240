use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::raster::EncodedImage;
use crate::selection::SelectionData;
use crate::InsightGenerator;

pub type InsightId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Explanation,
    Slide,
    Code,
    Infographic,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 4] = [
        ArtifactKind::Explanation,
        ArtifactKind::Slide,
        ArtifactKind::Code,
        ArtifactKind::Infographic,
    ];

    pub fn slug(&self) -> &'static str {
        match self {
            ArtifactKind::Explanation => "explanation",
            ArtifactKind::Slide => "slide",
            ArtifactKind::Code => "code",
            ArtifactKind::Infographic => "infographic",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            ArtifactKind::Explanation => "Explanation",
            ArtifactKind::Slide => "Slide",
            ArtifactKind::Code => "Code",
            ArtifactKind::Infographic => "Infographic",
        }
    }

    /// Only infographics come back as image data.
    pub fn is_image(&self) -> bool {
        matches!(self, ArtifactKind::Infographic)
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsightContent {
    Text(String),
    Image(EncodedImage),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("no API key selected")]
    MissingCredential,
    #[error("network error: {0}")]
    Network(String),
    #[error("service returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("generation task aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsightState {
    Pending,
    Succeeded(InsightContent),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct InsightResult {
    pub id: InsightId,
    pub kind: ArtifactKind,
    pub page_index: usize,
    pub state: InsightState,
    pub created_at: DateTime<Utc>,
}

impl InsightResult {
    pub fn is_loading(&self) -> bool {
        matches!(self.state, InsightState::Pending)
    }

    /// Text body as shown to the user: generated text, error text, or empty.
    pub fn content_text(&self) -> &str {
        match &self.state {
            InsightState::Pending => "",
            InsightState::Succeeded(InsightContent::Text(text)) => text,
            InsightState::Succeeded(InsightContent::Image(_)) => "",
            InsightState::Failed(message) => message,
        }
    }

    pub fn image(&self) -> Option<&EncodedImage> {
        match &self.state {
            InsightState::Succeeded(InsightContent::Image(image)) => Some(image),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Applied(InsightId),
    /// The entry was removed (or already terminal) before the response arrived.
    Dropped(InsightId),
}

struct Completion {
    id: InsightId,
    outcome: Result<InsightContent, GenerationError>,
}

/// Tracks every requested artifact from creation to its single terminal state.
///
/// Requests run as independent tokio tasks. Their outcomes are queued and
/// applied only when the owner drains them, so every mutation of the result
/// map happens on the owner's side.
pub struct InsightOrchestrator {
    generator: Arc<dyn InsightGenerator>,
    results: HashMap<InsightId, InsightResult>,
    order: Vec<InsightId>,
    in_flight: usize,
    tx: mpsc::UnboundedSender<Completion>,
    rx: mpsc::UnboundedReceiver<Completion>,
}

impl InsightOrchestrator {
    pub fn new(generator: Arc<dyn InsightGenerator>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            generator,
            results: HashMap::new(),
            order: Vec::new(),
            in_flight: 0,
            tx,
            rx,
        }
    }

    /// Appends a pending result and issues exactly one generation request.
    /// Must be called from within a tokio runtime.
    #[instrument(skip(self, selection), fields(page = selection.page_index))]
    pub fn invoke(&mut self, selection: &SelectionData, kind: ArtifactKind) -> InsightId {
        let id = Uuid::now_v7();
        self.results.insert(
            id,
            InsightResult {
                id,
                kind,
                page_index: selection.page_index,
                state: InsightState::Pending,
                created_at: Utc::now(),
            },
        );
        self.order.push(id);
        self.in_flight += 1;

        let generator = Arc::clone(&self.generator);
        let image = Arc::clone(&selection.image);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            // The inner task turns a panicking generator into a failed result.
            let call = tokio::spawn(async move { generator.generate(&image, kind).await });
            let outcome = match call.await {
                Ok(outcome) => outcome,
                Err(err) => Err(GenerationError::Aborted(err.to_string())),
            };
            if tx.send(Completion { id, outcome }).is_err() {
                debug!(%id, "orchestrator gone before completion");
            }
        });

        info!(%id, %kind, "insight requested");
        id
    }

    /// Applies every completion that has already arrived without waiting.
    pub fn poll_completions(&mut self) -> Vec<CompletionStatus> {
        let mut applied = Vec::new();
        while let Ok(completion) = self.rx.try_recv() {
            applied.push(self.apply(completion));
        }
        applied
    }

    /// Waits for the next in-flight request to finish and applies it.
    /// Returns `None` when nothing is in flight.
    pub async fn next_completion(&mut self) -> Option<CompletionStatus> {
        if self.in_flight == 0 {
            return None;
        }
        let completion = self.rx.recv().await?;
        Some(self.apply(completion))
    }

    fn apply(&mut self, completion: Completion) -> CompletionStatus {
        self.in_flight = self.in_flight.saturating_sub(1);
        let Completion { id, outcome } = completion;

        let Some(result) = self.results.get_mut(&id) else {
            debug!(%id, "dropping completion for removed insight");
            return CompletionStatus::Dropped(id);
        };
        if !result.is_loading() {
            warn!(%id, "ignoring second completion for finished insight");
            return CompletionStatus::Dropped(id);
        }

        result.state = match outcome {
            Ok(content) => InsightState::Succeeded(content),
            Err(err) => {
                warn!(%id, kind = %result.kind, error = %err, "generation failed");
                InsightState::Failed(format!("Error: {err}"))
            }
        };
        CompletionStatus::Applied(id)
    }

    pub fn get(&self, id: &InsightId) -> Option<&InsightResult> {
        self.results.get(id)
    }

    /// Removal does not cancel the request; its completion is dropped later.
    pub fn remove(&mut self, id: &InsightId) -> Option<InsightResult> {
        let removed = self.results.remove(id)?;
        self.order.retain(|entry| entry != id);
        Some(removed)
    }

    pub fn clear(&mut self) {
        self.results.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn pending_count(&self) -> usize {
        self.results.values().filter(|r| r.is_loading()).count()
    }

    /// Results in creation order.
    pub fn ordered(&self) -> impl DoubleEndedIterator<Item = &InsightResult> + '_ {
        self.order.iter().filter_map(|id| self.results.get(id))
    }

    pub fn newest_first(&self) -> impl Iterator<Item = &InsightResult> + '_ {
        self.ordered().rev()
    }
}
