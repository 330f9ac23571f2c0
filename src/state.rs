use crate::automation::AutomationClient;
use crate::config::RelayConfig;
use crate::session::SessionController;
use std::sync::Arc;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: RelayConfig,
    pub session: Arc<SessionController>,
    pub automation: Arc<dyn AutomationClient>,
}

impl AppState {
    pub fn new(
        config: RelayConfig,
        session: Arc<SessionController>,
        automation: Arc<dyn AutomationClient>,
    ) -> SharedState {
        Arc::new(Self {
            config,
            session,
            automation,
        })
    }
}
