// lib.rs: Simulated onboard engine for exercising the ground client end to end

pub mod config;
pub mod connector;
pub mod database;
pub mod engine;
pub mod errors;
pub mod housekeeping;
pub mod operator;
pub mod recorder;

pub use config::{Cli, ExceptionIds, HousekeepingConfig, Settings, SimConfig};
pub use connector::SimConnector;
pub use database::{JsonDatabase, parse_deployment, read_deployment};
pub use engine::{SimEngine, SimTransfer};
pub use errors::SimError;
pub use housekeeping::{HousekeepingPlan, spawn_housekeeping};
pub use recorder::TelemetryRecorder;
