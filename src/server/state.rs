use std::sync::Arc;

use crate::config::Settings;
use crate::hub::HubHandle;
use crate::websocket::{LoggingHandler, MessageHandler};

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub hub: HubHandle,
    pub handler: Arc<dyn MessageHandler>,
}

impl AppState {
    pub fn new(settings: Settings, hub: HubHandle) -> Self {
        Self::with_handler(settings, hub, Arc::new(LoggingHandler))
    }

    pub fn with_handler(
        settings: Settings,
        hub: HubHandle,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            hub,
            handler,
        }
    }
}
