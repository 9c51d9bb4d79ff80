use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    /// Cancelled on SIGINT/SIGTERM
    pub cancel: CancellationToken,
}

impl AppContext {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(config),
            cancel: CancellationToken::new(),
        }
    }
}
