pub mod config;
mod dashboard;
mod pipeline;
mod services;
mod session;

pub use dashboard::{Dashboard, DashboardState};
pub use pipeline::{object_key, DesignPipeline, HttpImageSource, ImageSource, PipelineError};
pub use services::{build_services, Services};
pub use session::SessionCell;

/// Upper bound on rows shown in a user's history.
pub const HISTORY_LIMIT: u32 = 10;

pub const IMAGE_CONTENT_TYPE: &str = "image/png";

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
