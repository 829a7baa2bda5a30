//! Traits at the boundary with the command/telemetry engine that owns the
//! space link, and with the entity database.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tmtc_protocol::{Deployment, ParameterSize};

use crate::error::LinkError;

// =============================== Link setup =================================

/// Space link the engine opens towards the onboard software.
///
/// `configuration` describes the protocol stack, e.g. `"AUTH SCID1 CCSDS_TM_DATALINK"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinkConfig {
    TcpServer {
        #[serde(default = "default_port")]
        port: u16,
        #[serde(default)]
        configuration: Option<String>,
    },
    TcpClient {
        #[serde(default = "default_host")]
        host: String,
        #[serde(default = "default_port")]
        port: u16,
        #[serde(default)]
        configuration: Option<String>,
    },
    Udp {
        #[serde(default = "default_host")]
        host: String,
        #[serde(default = "default_udp_destination")]
        destination_port: u16,
        #[serde(default = "default_port")]
        source_port: u16,
        #[serde(default)]
        configuration: Option<String>,
    },
    Serial {
        device: String,
        #[serde(default = "default_baud")]
        baud_rate: u32,
        #[serde(default)]
        configuration: Option<String>,
    },
}

fn default_port() -> u16 {
    51423
}
fn default_udp_destination() -> u16 {
    51424
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_baud() -> u32 {
    115_200
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig::TcpServer {
            port: default_port(),
            configuration: None,
        }
    }
}

impl LinkConfig {
    pub fn configuration(&self) -> Option<&str> {
        match self {
            LinkConfig::TcpServer { configuration, .. }
            | LinkConfig::TcpClient { configuration, .. }
            | LinkConfig::Udp { configuration, .. }
            | LinkConfig::Serial { configuration, .. } => configuration.as_deref(),
        }
    }
}

impl fmt::Display for LinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkConfig::TcpServer { port, .. } => write!(f, "TCP server on port {port}"),
            LinkConfig::TcpClient { host, port, .. } => write!(f, "TCP client to {host}:{port}"),
            LinkConfig::Udp {
                host,
                destination_port,
                source_port,
                ..
            } => write!(f, "UDP {source_port} -> {host}:{destination_port}"),
            LinkConfig::Serial {
                device, baud_rate, ..
            } => write!(f, "serial {device} @ {baud_rate} baud"),
        }
    }
}

// =============================== Transfers ==================================

/// Row range and policy for one uplink or downlink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRequest {
    pub id: u32,
    pub first_row: u32,
    pub last_row: u32,
    pub bytes_per_row: u32,
    pub resize: bool,
    /// Retransmissions of a lost packet before the engine fails the transfer.
    pub max_retries: u32,
    pub timeout: Duration,
}

/// Snapshot of a transfer passed with every state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferStatus {
    pub in_progress: bool,
    /// Onboard exception id when the transfer failed.
    pub exception: Option<u32>,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        !self.in_progress || self.exception.is_some()
    }
}

/// Receives notifications for a single transfer, on the engine's thread.
pub trait TransferListener: Send + Sync {
    fn on_state_changed(&self, status: TransferStatus, description: &str);
    fn on_progress(&self, count: u64, total: u64);
}

#[cfg_attr(test, mockall::automock)]
pub trait TransferHandle: Send + Sync {
    fn abort(&self);
    fn is_in_progress(&self) -> bool;
    fn error(&self) -> Option<u32>;
}

// =============================== Telemetry ==================================

/// Unsolicited telemetry pushed by the engine.
pub trait TelemetryListener: Send + Sync {
    /// `event_id` still carries the severity in its top two bits.
    fn on_event(&self, event_id: u16, source: u32, info: &[u8]);
    fn on_housekeeping(&self, structure_id: u32, data: &[u8]);
    fn on_debug(&self, message: &str);
}

// =============================== Commands ===================================

/// Synchronous command surface of the engine. Every call blocks until the
/// onboard software answers or `timeout` elapses.
#[cfg_attr(test, mockall::automock)]
pub trait CommandHandler: Send + Sync {
    fn query_parameter(&self, id: u32, timeout: Duration) -> Result<ParameterSize, LinkError>;

    fn get_parameter(&self, id: u32, row: u32, timeout: Duration) -> Result<Vec<u8>, LinkError>;

    fn get_parameter_rows(
        &self,
        id: u32,
        first_row: u32,
        last_row: u32,
        resize: bool,
        timeout: Duration,
    ) -> Result<Vec<Vec<u8>>, LinkError>;

    fn set_parameter(
        &self,
        id: u32,
        first_row: u32,
        rows: Vec<Vec<u8>>,
        resize: bool,
        timeout: Duration,
    ) -> Result<(), LinkError>;

    fn invoke_action(
        &self,
        id: u32,
        argument: Option<Vec<u8>>,
        timeout: Duration,
    ) -> Result<(), LinkError>;

    /// Start sending the contents of `staging` to the parameter.
    fn uplink_parameter(
        &self,
        staging: &Path,
        request: TransferRequest,
        listener: Arc<dyn TransferListener>,
    ) -> Result<Box<dyn TransferHandle>, LinkError>;

    /// Start receiving the parameter's rows into `destination`.
    fn downlink_parameter(
        &self,
        destination: &Path,
        request: TransferRequest,
        listener: Arc<dyn TransferListener>,
    ) -> Result<Box<dyn TransferHandle>, LinkError>;

    /// Returns a token for [`CommandHandler::remove_telemetry_listener`].
    fn add_telemetry_listener(&self, listener: Arc<dyn TelemetryListener>) -> u64;

    fn remove_telemetry_listener(&self, token: u64);
}

/// Opens and closes the space link, yielding the engine's command surface.
pub trait Connector: Send {
    fn connect(&mut self, link: &LinkConfig) -> Result<Arc<dyn CommandHandler>, LinkError>;
    fn disconnect(&mut self);
}

/// Reads a spacecraft database.
pub trait EntityDatabase: Send + Sync {
    fn load(&self, location: &Path) -> Result<Deployment, LinkError>;
}
