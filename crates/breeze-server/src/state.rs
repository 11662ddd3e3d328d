use breeze::chat::ChatApp;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub app: Arc<ChatApp>,
}

impl AppState {
    pub fn new(app: ChatApp) -> Self {
        Self { app: Arc::new(app) }
    }
}
