use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::config::AppConfig;
use crate::geometry::SurfacePoint;
use crate::insight::{ArtifactKind, CompletionStatus, InsightId, InsightOrchestrator, InsightResult};
use crate::selection::{SelectionData, SurfaceUpdate};
use crate::session::DocumentSession;
use crate::{CredentialGate, DocumentProvider, InsightGenerator};

#[derive(Debug, Error)]
pub enum WorkbenchError {
    #[error("select an API key before using the workbench")]
    Locked,
    #[error("no document loaded")]
    NoDocument,
    #[error("draw a selection on a page first")]
    NoSelection,
    #[error("failed to load document: {0:#}")]
    Load(anyhow::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Top-level controller: the credential gate in front of one document session
/// and its insight results.
pub struct Workbench {
    gate: Arc<dyn CredentialGate>,
    provider: Arc<dyn DocumentProvider>,
    session: DocumentSession,
    insights: InsightOrchestrator,
    unlocked: bool,
}

impl Workbench {
    pub fn new(
        config: &AppConfig,
        gate: Arc<dyn CredentialGate>,
        provider: Arc<dyn DocumentProvider>,
        generator: Arc<dyn InsightGenerator>,
    ) -> Self {
        Self {
            gate,
            provider,
            session: DocumentSession::new(config.zoom, config.selection),
            insights: InsightOrchestrator::new(generator),
            unlocked: false,
        }
    }

    /// Re-reads the gate's precondition.
    pub async fn refresh_gate(&mut self) -> bool {
        self.unlocked = self.gate.has_credential().await;
        self.unlocked
    }

    /// Runs the one-time selection action, then re-checks the gate.
    #[instrument(skip(self))]
    pub async fn unlock(&mut self) -> Result<bool, WorkbenchError> {
        if self.refresh_gate().await {
            return Ok(true);
        }
        self.gate.select_credential().await?;
        let unlocked = self.refresh_gate().await;
        if !unlocked {
            warn!("credential selection finished without a usable key");
        }
        Ok(unlocked)
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked
    }

    fn ensure_unlocked(&self) -> Result<(), WorkbenchError> {
        if self.unlocked {
            Ok(())
        } else {
            Err(WorkbenchError::Locked)
        }
    }

    pub fn session(&self) -> &DocumentSession {
        &self.session
    }

    pub fn insights(&self) -> &InsightOrchestrator {
        &self.insights
    }

    /// Full reset: results, selection and active page are dropped before parsing.
    #[instrument(skip(self, bytes), fields(len = bytes.len()))]
    pub async fn open_document(&mut self, bytes: Vec<u8>) -> Result<usize, WorkbenchError> {
        self.ensure_unlocked()?;
        self.insights.clear();
        self.session
            .load(self.provider.as_ref(), bytes)
            .await
            .map_err(WorkbenchError::Load)?;
        Ok(self.session.page_count())
    }

    pub fn render_page(&mut self, page_index: usize) -> Result<SurfaceUpdate, WorkbenchError> {
        self.ensure_unlocked()?;
        if !self.session.is_loaded() {
            return Err(WorkbenchError::NoDocument);
        }
        Ok(self.session.render_page(page_index)?)
    }

    pub fn zoom_in(&mut self) -> Result<bool, WorkbenchError> {
        self.ensure_unlocked()?;
        Ok(self.session.zoom_in())
    }

    pub fn zoom_out(&mut self) -> Result<bool, WorkbenchError> {
        self.ensure_unlocked()?;
        Ok(self.session.zoom_out())
    }

    pub fn reset_zoom(&mut self) -> Result<bool, WorkbenchError> {
        self.ensure_unlocked()?;
        Ok(self.session.reset_zoom())
    }

    pub fn pointer_down(&mut self, page_index: usize, point: SurfacePoint) -> Result<bool, WorkbenchError> {
        self.ensure_unlocked()?;
        Ok(self.session.pointer_down(page_index, point))
    }

    pub fn pointer_move(&mut self, page_index: usize, point: SurfacePoint) -> Result<(), WorkbenchError> {
        self.ensure_unlocked()?;
        self.session.pointer_move(page_index, point);
        Ok(())
    }

    pub fn pointer_up(&mut self, page_index: usize) -> Result<Option<SelectionData>, WorkbenchError> {
        self.ensure_unlocked()?;
        Ok(self.session.pointer_up(page_index)?)
    }

    pub fn pointer_leave(&mut self, page_index: usize) -> Result<Option<SelectionData>, WorkbenchError> {
        self.ensure_unlocked()?;
        Ok(self.session.pointer_leave(page_index)?)
    }

    pub fn cancel_selection(&mut self) -> Result<(), WorkbenchError> {
        self.ensure_unlocked()?;
        self.session.cancel_selection();
        Ok(())
    }

    /// Requests an artifact for the committed selection. The selection stays
    /// committed so further kinds can be requested for it.
    pub fn request(&mut self, kind: ArtifactKind) -> Result<InsightId, WorkbenchError> {
        self.ensure_unlocked()?;
        let selection = self
            .session
            .committed()
            .ok_or(WorkbenchError::NoSelection)?;
        let id = self.insights.invoke(selection, kind);
        info!(%id, %kind, page = selection.page_index, "artifact requested");
        Ok(id)
    }

    pub fn remove_result(&mut self, id: &InsightId) -> Option<InsightResult> {
        self.insights.remove(id)
    }

    pub fn poll_completions(&mut self) -> Vec<CompletionStatus> {
        self.insights.poll_completions()
    }

    pub async fn next_completion(&mut self) -> Option<CompletionStatus> {
        self.insights.next_completion().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insight::tests::{EchoGenerator, GatedGenerator};
    use crate::session::tests::FakeProvider;
    use parking_lot::Mutex;

    struct FakeGate {
        has_key: Mutex<bool>,
        grant_on_select: bool,
        selections: Mutex<usize>,
    }

    impl FakeGate {
        fn new(has_key: bool, grant_on_select: bool) -> Arc<Self> {
            Arc::new(Self {
                has_key: Mutex::new(has_key),
                grant_on_select,
                selections: Mutex::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl CredentialGate for FakeGate {
        async fn has_credential(&self) -> bool {
            *self.has_key.lock()
        }

        async fn select_credential(&self) -> anyhow::Result<()> {
            *self.selections.lock() += 1;
            if self.grant_on_select {
                *self.has_key.lock() = true;
            }
            Ok(())
        }
    }

    fn workbench(gate: Arc<FakeGate>, generator: Arc<dyn InsightGenerator>) -> Workbench {
        Workbench::new(
            &AppConfig::default(),
            gate,
            Arc::new(FakeProvider { page_count: 3 }),
            generator,
        )
    }

    async fn ready(generator: Arc<dyn InsightGenerator>) -> Workbench {
        let mut wb = workbench(FakeGate::new(true, false), generator);
        assert!(wb.unlock().await.unwrap());
        wb.open_document(b"%PDF-1.4".to_vec()).await.unwrap();
        for page in 0..3 {
            wb.render_page(page).unwrap();
        }
        wb
    }

    fn select(wb: &mut Workbench, page: usize) -> SelectionData {
        wb.pointer_down(page, SurfacePoint::new(10.0, 10.0)).unwrap();
        wb.pointer_move(page, SurfacePoint::new(70.0, 80.0)).unwrap();
        wb.pointer_up(page).unwrap().unwrap()
    }

    #[tokio::test]
    async fn locked_workbench_rejects_everything() {
        let mut wb = workbench(FakeGate::new(false, false), Arc::new(EchoGenerator));
        assert!(!wb.refresh_gate().await);
        assert!(matches!(
            wb.open_document(b"%PDF".to_vec()).await,
            Err(WorkbenchError::Locked)
        ));
        assert!(matches!(
            wb.pointer_down(0, SurfacePoint::new(1.0, 1.0)),
            Err(WorkbenchError::Locked)
        ));
        assert!(matches!(
            wb.request(ArtifactKind::Code),
            Err(WorkbenchError::Locked)
        ));
    }

    #[tokio::test]
    async fn unlock_runs_selection_once() {
        let gate = FakeGate::new(false, true);
        let mut wb = workbench(gate.clone(), Arc::new(EchoGenerator));
        assert!(wb.unlock().await.unwrap());
        assert!(wb.unlock().await.unwrap());
        assert_eq!(*gate.selections.lock(), 1);
        assert!(wb.is_unlocked());
    }

    #[tokio::test]
    async fn declined_selection_stays_locked() {
        let mut wb = workbench(FakeGate::new(false, false), Arc::new(EchoGenerator));
        assert!(!wb.unlock().await.unwrap());
        assert!(!wb.is_unlocked());
    }

    #[tokio::test]
    async fn request_requires_committed_selection() {
        let mut wb = ready(Arc::new(EchoGenerator)).await;
        assert!(matches!(
            wb.request(ArtifactKind::Slide),
            Err(WorkbenchError::NoSelection)
        ));
    }

    #[tokio::test]
    async fn several_kinds_for_one_selection() {
        let mut wb = ready(Arc::new(EchoGenerator)).await;
        select(&mut wb, 1);

        let ids: Vec<_> = ArtifactKind::ALL
            .iter()
            .map(|kind| wb.request(*kind).unwrap())
            .collect();
        while wb.next_completion().await.is_some() {}

        assert_eq!(wb.insights().len(), 4);
        for (id, kind) in ids.iter().zip(ArtifactKind::ALL) {
            let result = wb.insights().get(id).unwrap();
            assert_eq!(result.kind, kind);
            assert_eq!(result.page_index, 1);
            assert!(!result.is_loading());
        }
        assert!(wb.session().committed().is_some());
    }

    #[tokio::test]
    async fn swapping_document_clears_results_and_selection() {
        let generator = GatedGenerator::new();
        let mut wb = ready(generator.clone()).await;
        select(&mut wb, 0);
        wb.request(ArtifactKind::Explanation).unwrap();
        while generator.waiting() < 1 {
            tokio::task::yield_now().await;
        }

        wb.open_document(b"%PDF-1.5".to_vec()).await.unwrap();
        assert!(wb.insights().is_empty());
        assert!(wb.session().committed().is_none());
        assert!(wb.session().overlay().is_none());

        // The old request finishing later must not resurrect anything.
        generator.release(0, Ok(crate::InsightContent::Text("stale".into())));
        assert!(matches!(
            wb.next_completion().await,
            Some(CompletionStatus::Dropped(_))
        ));
        assert!(wb.insights().is_empty());
    }

    #[tokio::test]
    async fn failed_load_reports_error_and_leaves_empty_session() {
        let mut wb = ready(Arc::new(EchoGenerator)).await;
        let err = wb.open_document(b"not a pdf".to_vec()).await.unwrap_err();
        assert!(matches!(err, WorkbenchError::Load(_)));
        assert!(!wb.session().is_loaded());
        assert!(matches!(wb.render_page(0), Err(WorkbenchError::NoDocument)));
    }

    #[tokio::test]
    async fn removed_in_flight_result_stays_removed() {
        let generator = GatedGenerator::new();
        let mut wb = ready(generator.clone()).await;
        select(&mut wb, 2);
        let id = wb.request(ArtifactKind::Code).unwrap();
        assert!(wb.remove_result(&id).is_some());

        while generator.waiting() < 1 {
            tokio::task::yield_now().await;
        }
        generator.release(0, Ok(crate::InsightContent::Text("late".into())));
        assert_eq!(
            wb.next_completion().await,
            Some(CompletionStatus::Dropped(id))
        );
        assert!(wb.insights().get(&id).is_none());
    }
}
