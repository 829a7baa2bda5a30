// lib.rs: Ground-side TM/TC client: session, transfers, telemetry fan-out

pub mod config;
pub mod error;
pub mod link;
pub mod session;
pub mod telemetry;
pub mod transfer;

pub use config::{ClientConfig, ConfigError};
pub use error::{LinkError, OnboardException, Result, TmtcError};
pub use link::{
    CommandHandler, Connector, EntityDatabase, LinkConfig, TelemetryListener, TransferHandle,
    TransferListener, TransferRequest, TransferStatus,
};
pub use session::{LinkState, ModelState, ParameterTarget, Rows, TmtcClient};
pub use telemetry::{
    DebugNotification, EventNotification, HousekeepingNotification, ListenerRegistry,
    NotRegistered, Sink, SubscriberId, Telemetry,
};
pub use transfer::{TransferOptions, TransferState};

pub use tmtc_protocol::{EntityKind, EntityRef, Value};
