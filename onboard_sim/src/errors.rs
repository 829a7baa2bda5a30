//thiserror-based error types for the simulator
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("IO: {0}")] Io(#[from] std::io::Error),
    #[error("JSON: {0}")] Json(#[from] serde_json::Error),
    #[error("Config: {0}")] Config(#[from] config::ConfigError),
    #[error("Client config: {0}")] Client(#[from] ground_control::ConfigError),
    #[error("Model: {0}")] Model(#[from] tmtc_protocol::ModelError),
    #[error("Housekeeping: {0}")] Housekeeping(String),
}
