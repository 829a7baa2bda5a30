// connects a client session to the in-process engine
use std::sync::Arc;

use ground_control::{CommandHandler, Connector, LinkConfig, LinkError};
use tracing::info;

use crate::engine::SimEngine;

pub struct SimConnector {
    engine: SimEngine,
}

impl SimConnector {
    pub fn new(engine: SimEngine) -> Self {
        Self { engine }
    }
}

impl Connector for SimConnector {
    fn connect(&mut self, link: &LinkConfig) -> Result<Arc<dyn CommandHandler>, LinkError> {
        info!(%link, configuration = ?link.configuration(), "simulated link up");
        self.engine.set_online(true);
        Ok(Arc::new(self.engine.clone()))
    }

    fn disconnect(&mut self) {
        self.engine.set_online(false);
    }
}
