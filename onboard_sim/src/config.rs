//Command line interface
// simulator behaviour (packet size, loss, NACK codes, beacon) + client overlay
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use ground_control::ClientConfig;
use serde::{Deserialize, Serialize};

use crate::errors::SimError;

pub const DEFAULT_DATABASE: &str = "demos/deployment.json";

/// Exception ids the simulator answers NACKs with. They must exist in the
/// deployment for the client to name them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExceptionIds {
    pub read_only: u32,
    pub invalid_row: u32,
    pub invalid_length: u32,
    pub unknown_entity: u32,
    pub transfer_failed: u32,
}

impl Default for ExceptionIds {
    fn default() -> Self {
        Self {
            read_only: 1,
            invalid_row: 2,
            invalid_length: 3,
            unknown_entity: 4,
            transfer_failed: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HousekeepingConfig {
    pub period_ms: u64,
    pub structure_id: u32,
    /// Parameters whose first row goes into every packet, in order.
    pub parameters: Vec<String>,
    /// Unsigned parameter bumped once per packet.
    pub counter: Option<String>,
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            period_ms: 1000,
            structure_id: 1,
            parameters: vec![
                "platform.obc.mode".into(),
                "platform.obc.uptime".into(),
                "platform.eps.voltage".into(),
            ],
            counter: Some("platform.obc.uptime".into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Bytes carried per transfer packet.
    pub packet_bytes: usize,
    pub packet_interval_ms: u64,
    /// Probability that a transfer packet is lost and must be retried.
    pub loss: f64,
    pub response_delay_ms: u64,
    pub seed: Option<u64>,
    pub exceptions: ExceptionIds,
    pub housekeeping: HousekeepingConfig,
    pub telemetry_csv: Option<PathBuf>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            packet_bytes: 64,
            packet_interval_ms: 1,
            loss: 0.0,
            response_delay_ms: 0,
            seed: None,
            exceptions: ExceptionIds::default(),
            housekeeping: HousekeepingConfig::default(),
            telemetry_csv: None,
        }
    }
}

impl SimConfig {
    /// The `[sim]` table of the configuration file, or defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, SimError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let cfg = config::Config::builder()
            .add_source(config::File::from(path).required(true))
            .build()?;
        match cfg.get::<SimConfig>("sim") {
            Ok(sim) => Ok(sim),
            Err(config::ConfigError::NotFound(_)) => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn packet_interval(&self) -> Duration {
        Duration::from_millis(self.packet_interval_ms)
    }

    pub fn response_delay(&self) -> Duration {
        Duration::from_millis(self.response_delay_ms)
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub client: ClientConfig,
    pub sim: SimConfig,
    pub database: PathBuf,
    pub log_dir: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "onboard_sim", about = "Run an operator session against a simulated onboard engine")]
pub struct Cli {
    #[arg(long)]                  pub config: Option<PathBuf>,
    #[arg(long)]                  pub database: Option<PathBuf>,
    #[arg(long)]                  pub log_dir: Option<PathBuf>,
    #[arg(long)]                  pub loss: Option<f64>,
    #[arg(long)]                  pub timeout_ms: Option<u64>,
    #[arg(long)]                  pub beacon_ms: Option<u64>,
    #[arg(long)]                  pub telemetry_csv: Option<PathBuf>,
    #[arg(long)]                  pub seed: Option<u64>,
}

impl Cli {
    pub fn parse_and_build_config() -> anyhow::Result<Settings> {
        let c = <Cli as Parser>::parse();
        Ok(c.build_config()?)
    }

    /// File and environment first, then command-line flags on top.
    pub fn build_config(self) -> Result<Settings, SimError> {
        let mut client = ClientConfig::load(self.config.as_deref())?;
        let mut sim = SimConfig::load(self.config.as_deref())?;

        if let Some(ms) = self.timeout_ms {
            client.default_timeout_ms = ms;
        }
        if let Some(loss) = self.loss {
            sim.loss = loss.clamp(0.0, 1.0);
        }
        if let Some(ms) = self.beacon_ms {
            sim.housekeeping.period_ms = ms;
        }
        if self.telemetry_csv.is_some() {
            sim.telemetry_csv = self.telemetry_csv;
        }
        if self.seed.is_some() {
            sim.seed = self.seed;
        }

        let database = self
            .database
            .or_else(|| client.database.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE));
        client.database = Some(database.clone());

        Ok(Settings {
            client,
            sim,
            database,
            log_dir: self.log_dir,
        })
    }
}
