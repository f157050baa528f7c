use std::sync::Arc;

use design_api::{DesignPipeline, Services};
use storage::Storage;
use supabase_integration::SupabaseAuth;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) pipeline: Arc<DesignPipeline>,
    pub(crate) auth: SupabaseAuth,
    /// Checked by `/healthz` when records live in SQLite.
    pub(crate) local_store: Option<Storage>,
}

impl From<Services> for AppState {
    fn from(services: Services) -> Self {
        Self {
            pipeline: services.pipeline,
            auth: services.auth,
            local_store: services.local_store,
        }
    }
}
