use bus_engine::BusEngine;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<BusEngine>,
    pub env_name: String,
}

impl AppState {
    pub fn new(engine: BusEngine, env_name: impl Into<String>) -> Self {
        Self {
            engine: Arc::new(engine),
            env_name: env_name.into(),
        }
    }
}
