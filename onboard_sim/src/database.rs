// JSON spacecraft database reader
use std::fs;
use std::path::Path;

use ground_control::{EntityDatabase, LinkError};
use tmtc_protocol::Deployment;
use tracing::info;

use crate::errors::SimError;

pub fn parse_deployment(json: &str) -> Result<Deployment, SimError> {
    Ok(serde_json::from_str(json)?)
}

pub fn read_deployment(path: &Path) -> Result<Deployment, SimError> {
    let text = fs::read_to_string(path)?;
    let deployment = parse_deployment(&text)?;
    info!(?path, deployment = %deployment.name, "database read");
    Ok(deployment)
}

/// Deployment stored as a single JSON document.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonDatabase;

impl EntityDatabase for JsonDatabase {
    fn load(&self, location: &Path) -> Result<Deployment, LinkError> {
        read_deployment(location).map_err(|e| LinkError::Command {
            message: e.to_string(),
        })
    }
}
