use std::sync::Arc;

use {parlor_config::ParlorConfig, parlor_router::Router};

/// Shared app state handed to every HTTP handler and websocket task.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<Router>,
    pub config: Arc<ParlorConfig>,
}
