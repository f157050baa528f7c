use std::sync::Arc;

use shared::{
    domain::{GeneratedDesign, UserId},
    style::StyleKey,
};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, info};

use crate::{
    pipeline::{DesignPipeline, PipelineError},
    session::SessionCell,
};

/// Page-scoped state a front end renders from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DashboardState {
    pub identity: Option<UserId>,
    pub loading: bool,
    pub history_loading: bool,
    pub error: Option<String>,
    pub current: Option<GeneratedDesign>,
    pub history: Vec<GeneratedDesign>,
    pub draft: String,
}

#[derive(Clone)]
pub struct Dashboard {
    pipeline: Arc<DesignPipeline>,
    state: Arc<Mutex<DashboardState>>,
}

impl Dashboard {
    pub fn new(pipeline: Arc<DesignPipeline>) -> Self {
        Self {
            pipeline,
            state: Arc::new(Mutex::new(DashboardState::default())),
        }
    }

    pub async fn snapshot(&self) -> DashboardState {
        self.state.lock().await.clone()
    }

    pub async fn set_draft(&self, draft: impl Into<String>) {
        self.state.lock().await.draft = draft.into();
    }

    /// Reloads history when a new identity appears and forgets everything
    /// user-specific when it goes away.
    pub async fn on_identity(&self, identity: Option<UserId>) {
        let user_id = {
            let mut state = self.state.lock().await;
            if state.identity == identity {
                return;
            }
            state.identity = identity.clone();
            state.current = None;
            state.history.clear();
            // Any load still in flight belongs to the previous identity.
            state.history_loading = identity.is_some();
            let Some(user_id) = identity else {
                debug!("identity cleared");
                return;
            };
            user_id
        };

        let history = self.pipeline.load_history(&user_id).await;

        let mut state = self.state.lock().await;
        // The identity may have changed while the query was in flight.
        if state.identity.as_ref() == Some(&user_id) {
            state.history = history;
            state.history_loading = false;
        }
    }

    pub async fn submit(
        &self,
        prompt: &str,
        style: StyleKey,
    ) -> Result<GeneratedDesign, PipelineError> {
        let user_id = {
            let mut state = self.state.lock().await;
            if state.loading {
                return Err(PipelineError::SubmissionInFlight);
            }
            if prompt.trim().is_empty() {
                state.error = Some(PipelineError::EmptyPrompt.to_string());
                return Err(PipelineError::EmptyPrompt);
            }
            let Some(user_id) = state.identity.clone() else {
                state.error = Some(PipelineError::AuthRequired.to_string());
                return Err(PipelineError::AuthRequired);
            };
            state.loading = true;
            state.error = None;
            state.current = None;
            user_id
        };

        let result = self.pipeline.submit(prompt, style, Some(&user_id)).await;

        let mut state = self.state.lock().await;
        state.loading = false;
        match result {
            Ok(design) => {
                if state.identity.as_ref() == Some(&user_id) {
                    state.current = Some(design.clone());
                    state.history.insert(0, design.clone());
                }
                state.draft.clear();
                Ok(design)
            }
            Err(err) => {
                state.error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Keeps `on_identity` in step with the session cell until every clone of
    /// the cell is dropped.
    pub fn follow(&self, session: &SessionCell) -> JoinHandle<()> {
        let dashboard = self.clone();
        let mut rx = session.subscribe();
        tokio::spawn(async move {
            loop {
                let identity = rx.borrow_and_update().as_ref().map(|user| user.id.clone());
                dashboard.on_identity(identity).await;
                if rx.changed().await.is_err() {
                    info!("session closed; dashboard stops following");
                    break;
                }
            }
        })
    }
}

#[cfg(test)]
#[path = "tests/dashboard_tests.rs"]
mod tests;
