use chrono::{DateTime, Utc};

use crate::insight::{ArtifactKind, InsightId, InsightOrchestrator, InsightResult, InsightState};
use crate::raster::EncodedImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultStatus {
    Generating,
    Ready,
    Failed,
}

impl ResultStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ResultStatus::Generating => "generating…",
            ResultStatus::Ready => "ready",
            ResultStatus::Failed => "failed",
        }
    }
}

/// One entry of the result panel.
#[derive(Debug, Clone)]
pub struct ResultRow<'a> {
    pub id: InsightId,
    pub kind: ArtifactKind,
    pub page_index: usize,
    pub status: ResultStatus,
    pub created_at: DateTime<Utc>,
    /// Generated text or error text. Empty while generating and for images.
    pub body: &'a str,
    pub image: Option<&'a EncodedImage>,
}

impl<'a> ResultRow<'a> {
    fn from_result(result: &'a InsightResult) -> Self {
        let status = match result.state {
            InsightState::Pending => ResultStatus::Generating,
            InsightState::Succeeded(_) => ResultStatus::Ready,
            InsightState::Failed(_) => ResultStatus::Failed,
        };
        Self {
            id: result.id,
            kind: result.kind,
            page_index: result.page_index,
            status,
            created_at: result.created_at,
            body: result.content_text(),
            image: result.image(),
        }
    }

    pub fn heading(&self) -> String {
        format!(
            "{} · p.{} · {}",
            self.kind.title(),
            self.page_index + 1,
            self.status.label()
        )
    }
}

/// Most recent result first.
pub fn newest_first(insights: &InsightOrchestrator) -> Vec<ResultRow<'_>> {
    insights.newest_first().map(ResultRow::from_result).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insight::tests::{selection, EchoGenerator, GatedGenerator};
    use crate::insight::GenerationError;
    use std::sync::Arc;

    #[tokio::test]
    async fn rows_are_reverse_chronological_with_status() {
        let generator = GatedGenerator::new();
        let mut insights = InsightOrchestrator::new(generator.clone());
        let sel = selection();
        let first = insights.invoke(&sel, ArtifactKind::Explanation);
        let second = insights.invoke(&sel, ArtifactKind::Code);
        while generator.waiting() < 2 {
            tokio::task::yield_now().await;
        }
        generator.release(0, Err(GenerationError::Network("offline".into())));
        insights.next_completion().await;

        let rows = newest_first(&insights);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, second);
        assert_eq!(rows[1].id, first);

        let failed = rows.iter().find(|r| r.status == ResultStatus::Failed).unwrap();
        assert!(failed.body.contains("offline"));
        let pending = rows
            .iter()
            .find(|r| r.status == ResultStatus::Generating)
            .unwrap();
        assert!(pending.body.is_empty());
        assert_eq!(pending.heading(), format!("{} · p.1 · generating…", pending.kind.title()));
    }

    #[tokio::test]
    async fn image_rows_expose_image() {
        let mut insights = InsightOrchestrator::new(Arc::new(EchoGenerator));
        insights.invoke(&selection(), ArtifactKind::Infographic);
        insights.next_completion().await;
        let rows = newest_first(&insights);
        assert_eq!(rows[0].status, ResultStatus::Ready);
        assert!(rows[0].image.is_some());
        assert!(rows[0].kind.is_image());
    }
}
