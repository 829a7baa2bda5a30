//! The operator-facing client: resolves names, encodes values, issues
//! commands through the engine and waits for their outcome.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use parking_lot::{Mutex, RwLock};
use tempfile::TempDir;
use tmtc_protocol::{
    Deployment, EntityKind, EntityModel, EntityRef, MAX_TRANSFER_BYTES, ParameterDefinition,
    ParameterInstance, ParameterSize, Value, decode, decode_rows, encode, encode_rows,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::{LinkError, OnboardException, Result, TmtcError};
use crate::link::{CommandHandler, Connector, EntityDatabase, TransferRequest};
use crate::telemetry::{
    DebugNotification, EventNotification, HousekeepingNotification, NotRegistered, Sink,
    SubscriberId, Telemetry,
};
use crate::transfer::{Outcome, StagingFile, Transfer, TransferOptions};

// =============================== State ======================================

pub enum LinkState {
    Disconnected,
    Connected {
        handler: Arc<dyn CommandHandler>,
        telemetry_token: u64,
    },
}

pub enum ModelState {
    Unloaded,
    Loaded(Arc<EntityModel>),
}

/// A parameter, or one element of a parameter block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterTarget {
    Parameter(EntityRef),
    BlockElement { block: EntityRef, index: u32 },
}

impl ParameterTarget {
    pub fn block_element(block: impl Into<EntityRef>, index: u32) -> Self {
        ParameterTarget::BlockElement {
            block: block.into(),
            index,
        }
    }
}

impl From<EntityRef> for ParameterTarget {
    fn from(r: EntityRef) -> Self {
        ParameterTarget::Parameter(r)
    }
}

impl From<u32> for ParameterTarget {
    fn from(id: u32) -> Self {
        ParameterTarget::Parameter(EntityRef::Id(id))
    }
}

impl From<&str> for ParameterTarget {
    fn from(name: &str) -> Self {
        ParameterTarget::Parameter(name.into())
    }
}

impl From<String> for ParameterTarget {
    fn from(name: String) -> Self {
        ParameterTarget::Parameter(EntityRef::Name(name))
    }
}

/// Row range of a read. An open end means up to `max_rows - 1`, resizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rows {
    pub first: u32,
    pub last: Option<u32>,
}

impl Rows {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn single(row: u32) -> Self {
        Self {
            first: row,
            last: Some(row),
        }
    }

    pub fn range(first: u32, last: u32) -> Self {
        Self {
            first,
            last: Some(last),
        }
    }

    pub fn starting_at(first: u32) -> Self {
        Self { first, last: None }
    }

    /// Concrete `(last_row, resize)` for a definition.
    fn resolve(self, def: &ParameterDefinition, resize: bool) -> Result<(u32, bool)> {
        let (last, resize) = match self.last {
            Some(last) => (last, resize),
            None => (def.max_rows.saturating_sub(1), true),
        };
        if self.first > last {
            return Err(TmtcError::InvalidRows {
                first_row: self.first,
                last_row: last,
                reason: "first_row cannot be greater than last_row",
            });
        }
        if (last - self.first).checked_add(1).is_none() {
            return Err(TmtcError::InvalidRows {
                first_row: self.first,
                last_row: last,
                reason: "row count does not fit in 32 bits",
            });
        }
        Ok((last, resize))
    }
}

// =============================== Client =====================================

pub struct TmtcClient {
    config: ClientConfig,
    connector: Mutex<Box<dyn Connector>>,
    link: RwLock<LinkState>,
    model: RwLock<ModelState>,
    telemetry: Arc<Telemetry>,
    staging: TempDir,
}

impl TmtcClient {
    pub fn new(config: ClientConfig, connector: Box<dyn Connector>) -> Result<Self> {
        let staging = tempfile::Builder::new().prefix("tmtc-transfer-").tempdir()?;
        Ok(Self {
            config,
            connector: Mutex::new(connector),
            link: RwLock::new(LinkState::Disconnected),
            model: RwLock::new(ModelState::Unloaded),
            telemetry: Arc::new(Telemetry::new()),
            staging,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // ---------------------------- Session ----------------------------------

    pub fn is_connected(&self) -> bool {
        matches!(*self.link.read(), LinkState::Connected { .. })
    }

    pub fn connect(&self) -> Result<()> {
        let mut link = self.link.write();
        if let LinkState::Connected { .. } = *link {
            debug!("already connected");
            return Ok(());
        }

        let handler = self
            .connector
            .lock()
            .connect(&self.config.link)
            .map_err(|e| TmtcError::Command {
                context: "connect failed",
                message: e.to_string(),
            })?;
        let telemetry_token = handler.add_telemetry_listener(self.telemetry.clone());
        *link = LinkState::Connected {
            handler,
            telemetry_token,
        };
        info!(link = %self.config.link, "connected to onboard software");
        Ok(())
    }

    pub fn disconnect(&self) {
        let previous = std::mem::replace(&mut *self.link.write(), LinkState::Disconnected);
        if let LinkState::Connected {
            handler,
            telemetry_token,
        } = previous
        {
            handler.remove_telemetry_listener(telemetry_token);
            self.connector.lock().disconnect();
            info!(link = %self.config.link, "disconnected from onboard software");
        }
    }

    /// Read a spacecraft database and replace the current model with it.
    pub fn load_model(
        &self,
        database: &dyn EntityDatabase,
        location: &Path,
    ) -> Result<Arc<EntityModel>> {
        let deployment = database.load(location).map_err(|e| TmtcError::Command {
            context: "database load failed",
            message: e.to_string(),
        })?;
        self.load_deployment(deployment)
    }

    pub fn load_deployment(&self, deployment: Deployment) -> Result<Arc<EntityModel>> {
        let model = Arc::new(EntityModel::load(deployment)?);
        *self.model.write() = ModelState::Loaded(Arc::clone(&model));
        Ok(model)
    }

    pub fn model(&self) -> Result<Arc<EntityModel>> {
        match &*self.model.read() {
            ModelState::Loaded(model) => Ok(Arc::clone(model)),
            ModelState::Unloaded => Err(tmtc_protocol::ModelError::NotLoaded.into()),
        }
    }

    fn handler(&self) -> Result<Arc<dyn CommandHandler>> {
        match &*self.link.read() {
            LinkState::Connected { handler, .. } => Ok(Arc::clone(handler)),
            LinkState::Disconnected => Err(TmtcError::NotConnected),
        }
    }

    pub fn resolve(&self, kind: EntityKind, entity: impl Into<EntityRef>) -> Result<u32> {
        Ok(self.model()?.resolve(kind, &entity.into())?)
    }

    pub fn identify(&self, kind: EntityKind, id: u32) -> Result<String> {
        Ok(self.model()?.identify(kind, id)?.to_string())
    }

    fn timeout(&self, timeout: Option<Duration>) -> Duration {
        timeout.unwrap_or_else(|| self.config.default_timeout())
    }

    // ---------------------------- Commands ---------------------------------

    pub fn query(
        &self,
        target: impl Into<ParameterTarget>,
        timeout: Option<Duration>,
    ) -> Result<ParameterSize> {
        let handler = self.handler()?;
        let model = self.model()?;
        let timeout = self.timeout(timeout);
        let (instance, _) = parameter(&model, &target.into())?;

        debug!(param_id = instance.element.id, "query parameter");
        handler
            .query_parameter(instance.element.id, timeout)
            .map_err(|e| command_failure(&model, "parameter query failed", timeout, e))
    }

    /// A single `Value` when one row is read, `Value::Rows` otherwise.
    pub fn get(
        &self,
        target: impl Into<ParameterTarget>,
        rows: Rows,
        resize: bool,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let handler = self.handler()?;
        let model = self.model()?;
        let timeout = self.timeout(timeout);
        let (instance, _) = parameter(&model, &target.into())?;
        let (id, def) = (instance.element.id, &instance.definition);
        let (last_row, resize) = rows.resolve(def, resize)?;

        debug!(param_id = id, first_row = rows.first, last_row, resize, "get parameter");
        if rows.first == last_row {
            let row = handler
                .get_parameter(id, rows.first, timeout)
                .map_err(|e| command_failure(&model, "parameter get failed", timeout, e))?;
            Ok(decode(&row, def, model.as_ref())?)
        } else {
            let data = handler
                .get_parameter_rows(id, rows.first, last_row, resize, timeout)
                .map_err(|e| command_failure(&model, "parameter get failed", timeout, e))?;
            Ok(Value::Rows(decode_rows(&data, def, model.as_ref())?))
        }
    }

    /// Vector parameters take a single row or `Value::Rows`; other classes
    /// take exactly one value.
    pub fn set(
        &self,
        target: impl Into<ParameterTarget>,
        value: impl Into<Value>,
        first_row: u32,
        resize: bool,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let handler = self.handler()?;
        let model = self.model()?;
        let timeout = self.timeout(timeout);
        let (instance, validate_len) = parameter(&model, &target.into())?;
        let (id, def) = (instance.element.id, &instance.definition);

        if def.is_read_only {
            return Err(TmtcError::ReadOnly(instance.element.full_name.clone()));
        }
        let value = value.into();
        if !def.type_class.is_vector() && matches!(value, Value::Rows(_)) {
            return Err(TmtcError::Shape(format!(
                "cannot accept a row sequence for {} type class",
                def.type_class
            )));
        }
        let rows = encode_rows(&value, def, validate_len, model.as_ref())?;

        debug!(
            param_id = id,
            first_row,
            resize,
            data = %rows.iter().map(hex::encode).collect::<Vec<_>>().join(" "),
            "set parameter"
        );
        handler
            .set_parameter(id, first_row, rows, resize, timeout)
            .map_err(|e| command_failure(&model, "parameter set failed", timeout, e))
    }

    pub fn invoke(
        &self,
        action: impl Into<EntityRef>,
        argument: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let handler = self.handler()?;
        let model = self.model()?;
        let timeout = self.timeout(timeout);
        let instance = model.action_instance(&action.into())?;
        let id = instance.element.id;

        let expected = instance.definition.arguments.len();
        let given = usize::from(argument.is_some());
        if expected != given {
            return Err(TmtcError::ArgumentCount {
                action: instance.element.full_name.clone(),
                expected,
                given,
            });
        }

        let argument = match (argument, instance.definition.arguments.first()) {
            (Some(value), Some(arg)) => {
                let def = ParameterDefinition::for_argument(arg);
                Some(encode(&value, &def, true, model.as_ref())?)
            }
            _ => None,
        };

        debug!(action_id = id, argument = ?argument.as_ref().map(hex::encode), "invoke action");
        handler
            .invoke_action(id, argument, timeout)
            .map_err(|e| command_failure(&model, "action invoke failed", timeout, e))
    }

    // ---------------------------- Transfers --------------------------------

    /// Write up to 16 KiB to a parameter over multiple packets.
    pub fn uplink(
        &self,
        target: impl Into<ParameterTarget>,
        data: &[u8],
        options: TransferOptions,
    ) -> Result<()> {
        let handler = self.handler()?;
        let model = self.model()?;
        let timeout = self.timeout(options.timeout);
        let (instance, _) = parameter(&model, &target.into())?;
        let (id, def) = (instance.element.id, &instance.definition);

        if def.is_read_only {
            return Err(TmtcError::ReadOnly(instance.element.full_name.clone()));
        }
        let bytes_per_row = def.bytes_per_row as usize;
        if data.is_empty() || data.len() > MAX_TRANSFER_BYTES {
            return Err(TmtcError::Shape(format!(
                "uplink carries 1..={MAX_TRANSFER_BYTES} bytes, got {}",
                data.len()
            )));
        }
        if bytes_per_row == 0 || data.len() % bytes_per_row != 0 {
            return Err(TmtcError::Shape(format!(
                "{} bytes is not a whole number of {bytes_per_row}-byte rows",
                data.len()
            )));
        }
        let rows = (data.len() / bytes_per_row) as u32;
        let last_row = options
            .first_row
            .checked_add(rows - 1)
            .ok_or(TmtcError::InvalidRows {
                first_row: options.first_row,
                last_row: u32::MAX,
                reason: "rows run past the last addressable row",
            })?;

        let mut staging = tempfile::Builder::new()
            .prefix("uplink-")
            .tempfile_in(self.staging.path())?;
        staging.write_all(data)?;
        staging.flush()?;

        let request = TransferRequest {
            id,
            first_row: options.first_row,
            last_row,
            bytes_per_row: def.bytes_per_row,
            resize: options.resize,
            max_retries: options.max_retries.unwrap_or(self.config.uplink_max_retries),
            timeout,
        };
        info!(param_id = id, bytes = data.len(), ?request, "uplink started");

        let transfer = Transfer::new(id, options.on_state_change, options.on_progress);
        let handle = handler
            .uplink_parameter(staging.path(), request, transfer.listener())
            .map_err(|e| command_failure(&model, "uplink failed", timeout, e))?;
        let outcome = transfer.wait(handle.as_ref(), timeout);
        finish("uplink", &model, id, outcome, timeout)
    }

    /// Read a parameter over multiple packets.
    pub fn downlink(
        &self,
        target: impl Into<ParameterTarget>,
        options: TransferOptions,
    ) -> Result<Vec<u8>> {
        let handler = self.handler()?;
        let model = self.model()?;
        let timeout = self.timeout(options.timeout);
        let (instance, _) = parameter(&model, &target.into())?;
        let (id, def) = (instance.element.id, &instance.definition);

        let rows = Rows {
            first: options.first_row,
            last: options.last_row,
        };
        let (last_row, resize) = rows.resolve(def, options.resize)?;
        let request = TransferRequest {
            id,
            first_row: rows.first,
            last_row,
            bytes_per_row: def.bytes_per_row,
            resize,
            max_retries: options
                .max_retries
                .unwrap_or(self.config.downlink_max_retries),
            timeout,
        };

        let staged = StagingFile::new(
            self.staging
                .path()
                .join(format!("downlink-{}.bin", Uuid::new_v4())),
        );
        info!(param_id = id, ?request, "downlink started");

        let transfer = Transfer::new(id, options.on_state_change, options.on_progress);
        let handle = handler
            .downlink_parameter(staged.path(), request, transfer.listener())
            .map_err(|e| command_failure(&model, "downlink failed", timeout, e))?;
        let outcome = transfer.wait(handle.as_ref(), timeout);
        finish("downlink", &model, id, outcome, timeout)?;
        Ok(staged.read()?)
    }

    // ---------------------------- Telemetry --------------------------------

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn register_event_listener(&self, sink: Sink<EventNotification>) -> SubscriberId {
        self.telemetry.events.add(sink)
    }

    pub fn unregister_event_listener(
        &self,
        id: SubscriberId,
    ) -> std::result::Result<(), NotRegistered> {
        self.telemetry.events.remove(id)
    }

    pub fn register_housekeeping_listener(
        &self,
        sink: Sink<HousekeepingNotification>,
    ) -> SubscriberId {
        self.telemetry.housekeeping.add(sink)
    }

    pub fn unregister_housekeeping_listener(
        &self,
        id: SubscriberId,
    ) -> std::result::Result<(), NotRegistered> {
        self.telemetry.housekeeping.remove(id)
    }

    pub fn register_debug_listener(&self, sink: Sink<DebugNotification>) -> SubscriberId {
        self.telemetry.debug.add(sink)
    }

    pub fn unregister_debug_listener(
        &self,
        id: SubscriberId,
    ) -> std::result::Result<(), NotRegistered> {
        self.telemetry.debug.remove(id)
    }

    /// Subscribe a queue sized from `telemetry_queue_capacity`.
    pub fn event_queue(&self) -> (SubscriberId, Receiver<EventNotification>) {
        let (sink, rx) = Sink::queue(self.config.telemetry_queue_capacity);
        (self.register_event_listener(sink), rx)
    }

    pub fn housekeeping_queue(&self) -> (SubscriberId, Receiver<HousekeepingNotification>) {
        let (sink, rx) = Sink::queue(self.config.telemetry_queue_capacity);
        (self.register_housekeeping_listener(sink), rx)
    }

    pub fn debug_queue(&self) -> (SubscriberId, Receiver<DebugNotification>) {
        let (sink, rx) = Sink::queue(self.config.telemetry_queue_capacity);
        (self.register_debug_listener(sink), rx)
    }
}

impl Drop for TmtcClient {
    fn drop(&mut self) {
        self.disconnect();
        self.telemetry.clear();
    }
}

// =============================== Helpers ====================================

/// The instance to address, and whether byte rows must match `bytes_per_row`.
fn parameter(model: &EntityModel, target: &ParameterTarget) -> Result<(ParameterInstance, bool)> {
    match target {
        ParameterTarget::Parameter(r) => Ok((model.parameter_instance(r)?.clone(), true)),
        ParameterTarget::BlockElement { block, index } => Ok((
            model.parameter_instance_for_parameter_block(block, *index)?,
            false,
        )),
    }
}

fn onboard_exception(model: &EntityModel, id: u32) -> OnboardException {
    let known = model.exceptions.get(id).map(|e| &e.element);
    OnboardException {
        id,
        name: known.map(|e| e.full_name.clone()),
        description: known.map(|e| e.description.clone()),
    }
}

fn command_failure(
    model: &EntityModel,
    context: &'static str,
    timeout: Duration,
    err: LinkError,
) -> TmtcError {
    match err {
        LinkError::Rejected { exception_id } => {
            let exception = onboard_exception(model, exception_id);
            info!(%exception, context, "NACK");
            TmtcError::Onboard { context, exception }
        }
        LinkError::Timeout => {
            warn!(?timeout, context, "command timed out");
            TmtcError::CommandTimeout { context, timeout }
        }
        LinkError::Transfer(message) => {
            warn!(%message, context, "transfer refused");
            TmtcError::Transfer {
                message,
                exception: None,
            }
        }
        other => {
            warn!(error = %other, context, "command failed, onboard software may not be reachable");
            TmtcError::Command {
                context,
                message: other.to_string(),
            }
        }
    }
}

fn finish(
    kind: &'static str,
    model: &EntityModel,
    id: u32,
    outcome: Outcome,
    timeout: Duration,
) -> Result<()> {
    match outcome {
        Outcome::Completed => {
            info!(param_id = id, kind, "transfer complete");
            Ok(())
        }
        Outcome::Failed(exception_id) => {
            let exception = onboard_exception(model, exception_id);
            warn!(param_id = id, kind, %exception, "transfer failed onboard");
            Err(TmtcError::Transfer {
                message: "exception occurred during transfer".into(),
                exception: Some(exception),
            })
        }
        Outcome::TimedOut => Err(TmtcError::Transfer {
            message: format!("{kind} timed out after {timeout:?} (transfer aborted)"),
            exception: None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{
        LinkConfig, MockCommandHandler, MockTransferHandle, TelemetryListener, TransferListener,
        TransferStatus,
    };
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tmtc_protocol::{
        ActionDefinition, ActionInstance, Argument, ArgumentTypeClass, Documentation, Element,
        ExceptionInstance, ModelError, ParameterBlockInstance, TypeClass, TypeStr,
    };

    struct StaticConnector(Arc<dyn CommandHandler>);

    impl Connector for StaticConnector {
        fn connect(&mut self, _link: &LinkConfig) -> std::result::Result<Arc<dyn CommandHandler>, LinkError> {
            Ok(Arc::clone(&self.0))
        }

        fn disconnect(&mut self) {}
    }

    fn element(id: u32, full_name: &str) -> Element {
        Element {
            id,
            name: full_name.rsplit('.').next().unwrap_or(full_name).to_string(),
            full_name: full_name.to_string(),
            description: format!("{full_name} description"),
            documentation: Documentation::default(),
            index: 0,
        }
    }

    fn param(id: u32, full_name: &str, type_class: TypeClass, bits: u32) -> ParameterInstance {
        ParameterInstance {
            element: element(id, full_name),
            definition: ParameterDefinition {
                signature: String::new(),
                type_str: TypeStr::Unsigned,
                type_class,
                min_rows: 1,
                max_rows: if type_class.is_vector() { 4 } else { 1 },
                bits_per_row: bits,
                bytes_per_row: bits.div_ceil(8),
                storage_bytes_per_row: bits.div_ceil(8),
                unused_bits_per_row: 0,
                is_raw: false,
                is_fixed_size: true,
                is_read_only: false,
                is_config: false,
            },
        }
    }

    fn deployment() -> Deployment {
        let mut status = param(3, "platform.obc.status", TypeClass::Value, 8);
        status.definition.is_read_only = true;
        Deployment {
            name: "test".into(),
            parameters: vec![
                param(1, "platform.obc.mode", TypeClass::Value, 8),
                param(2, "platform.obc.table", TypeClass::VarVector, 16),
                status,
            ],
            parameter_blocks: vec![ParameterBlockInstance {
                element: element(0x200, "payload.store.channel"),
            }],
            actions: vec![
                ActionInstance {
                    element: element(10, "platform.obc.reset"),
                    definition: ActionDefinition {
                        signature: String::new(),
                        arguments: vec![],
                    },
                },
                ActionInstance {
                    element: element(11, "platform.obc.setClock"),
                    definition: ActionDefinition {
                        signature: String::new(),
                        arguments: vec![Argument {
                            element: element(12, "platform.obc.setClock.time"),
                            signature: String::new(),
                            min_bytes: 4,
                            max_bytes: 4,
                            type_class: ArgumentTypeClass::Fixed,
                            is_fixed_size: true,
                        }],
                    },
                },
            ],
            exceptions: vec![ExceptionInstance {
                element: element(30, "platform.obc.busy"),
            }],
            ..Deployment::default()
        }
    }

    fn connected(mut mock: MockCommandHandler) -> TmtcClient {
        mock.expect_add_telemetry_listener().return_const(1u64);
        mock.expect_remove_telemetry_listener().return_const(());
        let client = TmtcClient::new(
            ClientConfig::default(),
            Box::new(StaticConnector(Arc::new(mock))),
        )
        .unwrap();
        client.load_deployment(deployment()).unwrap();
        client.connect().unwrap();
        client
    }

    fn finished(exception: Option<u32>) -> TransferStatus {
        TransferStatus {
            in_progress: false,
            exception,
        }
    }

    #[test]
    fn operations_require_connection_and_model() {
        let client = TmtcClient::new(
            ClientConfig::default(),
            Box::new(StaticConnector(Arc::new(MockCommandHandler::new()))),
        )
        .unwrap();
        assert!(matches!(client.query("mode", None), Err(TmtcError::NotConnected)));

        let mut mock = MockCommandHandler::new();
        mock.expect_add_telemetry_listener().return_const(1u64);
        mock.expect_remove_telemetry_listener().return_const(());
        let client = TmtcClient::new(
            ClientConfig::default(),
            Box::new(StaticConnector(Arc::new(mock))),
        )
        .unwrap();
        client.connect().unwrap();
        assert!(matches!(
            client.query("mode", None),
            Err(TmtcError::ModelQuery(ModelError::NotLoaded))
        ));
    }

    #[test]
    fn read_only_set_sends_nothing() {
        let mut mock = MockCommandHandler::new();
        mock.expect_set_parameter().times(0);
        mock.expect_uplink_parameter().times(0);
        let client = connected(mock);

        assert!(matches!(
            client.set("status", 1u8, 0, false, None),
            Err(TmtcError::ReadOnly(name)) if name == "platform.obc.status"
        ));
        assert!(matches!(
            client.uplink("status", &[1], TransferOptions::new()),
            Err(TmtcError::ReadOnly(_))
        ));
    }

    #[test]
    fn get_single_row_and_open_range() {
        let mut mock = MockCommandHandler::new();
        mock.expect_get_parameter()
            .withf(|id, row, _| *id == 1 && *row == 0)
            .returning(|_, _, _| Ok(vec![7]));
        mock.expect_get_parameter_rows()
            .withf(|id, first, last, resize, _| *id == 2 && *first == 1 && *last == 3 && *resize)
            .returning(|_, _, _, _, _| Ok(vec![vec![0, 1], vec![0, 2]]));
        let client = connected(mock);

        assert_eq!(
            client.get("obc.mode", Rows::all(), false, None).unwrap(),
            Value::Unsigned(7)
        );
        assert_eq!(
            client.get("table", Rows::starting_at(1), false, None).unwrap(),
            Value::Rows(vec![Value::Unsigned(1), Value::Unsigned(2)])
        );
        assert!(matches!(
            client.get("table", Rows::range(3, 1), false, None),
            Err(TmtcError::InvalidRows { .. })
        ));
    }

    #[test]
    fn set_checks_shape_and_encodes_rows() {
        let mut mock = MockCommandHandler::new();
        mock.expect_set_parameter()
            .withf(|id, first, rows, _, _| *id == 2 && *first == 0 && rows == &vec![vec![0, 1], vec![0, 2]])
            .times(1)
            .returning(|_, _, _, _, _| Ok(()));
        mock.expect_set_parameter()
            .withf(|id, _, rows, _, _| *id == 0x203 && rows == &vec![vec![1, 2, 3]])
            .times(1)
            .returning(|_, _, _, _, _| Ok(()));
        let client = connected(mock);

        assert!(matches!(
            client.set("mode", Value::Rows(vec![1u8.into()]), 0, false, None),
            Err(TmtcError::Shape(_))
        ));
        assert!(matches!(
            client.set("mode", 300u32, 0, false, None),
            Err(TmtcError::Codec(_))
        ));
        client
            .set("table", Value::Rows(vec![1u8.into(), 2u8.into()]), 0, false, None)
            .unwrap();
        // block elements skip the row length check
        client
            .set(ParameterTarget::block_element("channel", 3), vec![1u8, 2, 3], 0, false, None)
            .unwrap();
    }

    #[test]
    fn invoke_checks_arity_before_sending() {
        let mut mock = MockCommandHandler::new();
        mock.expect_invoke_action()
            .withf(|id, arg, _| *id == 11 && arg == &Some(vec![0, 0, 0, 5]))
            .times(1)
            .returning(|_, _, _| Ok(()));
        let client = connected(mock);

        assert!(matches!(
            client.invoke("setClock", None, None),
            Err(TmtcError::ArgumentCount { expected: 1, given: 0, .. })
        ));
        assert!(matches!(
            client.invoke("reset", Some(Value::Unsigned(1)), None),
            Err(TmtcError::ArgumentCount { expected: 0, given: 1, .. })
        ));
        client.invoke("setClock", Some(Value::Unsigned(5)), None).unwrap();
    }

    #[test]
    fn nack_carries_exception_from_model() {
        let mut mock = MockCommandHandler::new();
        mock.expect_query_parameter()
            .returning(|_, _| Err(LinkError::Rejected { exception_id: 30 }));
        mock.expect_invoke_action()
            .returning(|_, _, _| Err(LinkError::Timeout));
        let client = connected(mock);

        let err = client.query("mode", None).unwrap_err();
        let exception = err.onboard_exception().unwrap();
        assert_eq!(exception.name.as_deref(), Some("platform.obc.busy"));
        assert!(!err.is_command_error());

        let err = client.invoke("reset", None, None).unwrap_err();
        assert!(matches!(err, TmtcError::CommandTimeout { .. }));
        assert!(err.is_command_error());
    }

    #[test]
    fn uplink_stages_data_and_cleans_up() {
        let staged_at = Arc::new(Mutex::new(None::<PathBuf>));
        let seen = Arc::clone(&staged_at);
        let mut mock = MockCommandHandler::new();
        mock.expect_uplink_parameter().times(1).returning(
            move |path: &Path, request: TransferRequest, listener: Arc<dyn TransferListener>| {
                assert_eq!(std::fs::read(path).unwrap(), vec![0, 1, 0, 2, 0, 3]);
                assert_eq!((request.first_row, request.last_row), (1, 3));
                assert_eq!(request.max_retries, 5);
                *seen.lock() = Some(path.to_path_buf());
                listener.on_state_changed(
                    TransferStatus {
                        in_progress: true,
                        exception: None,
                    },
                    "Started",
                );
                listener.on_progress(6, 6);
                listener.on_state_changed(finished(None), "Complete");
                let mut handle = MockTransferHandle::new();
                handle.expect_abort().times(0);
                Ok(Box::new(handle))
            },
        );
        let client = connected(mock);

        let progress = Arc::new(AtomicUsize::new(0));
        let p = Arc::clone(&progress);
        client
            .uplink(
                "table",
                &[0, 1, 0, 2, 0, 3],
                TransferOptions::new()
                    .first_row(1)
                    .on_progress(move |_, _| {
                        p.fetch_add(1, Ordering::SeqCst);
                    }),
            )
            .unwrap();
        assert_eq!(progress.load(Ordering::SeqCst), 1);
        let path = staged_at.lock().clone().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn uplink_rejects_partial_rows_and_oversize_data() {
        let mut mock = MockCommandHandler::new();
        mock.expect_uplink_parameter().times(0);
        let client = connected(mock);

        assert!(matches!(
            client.uplink("table", &[0, 1, 2], TransferOptions::new()),
            Err(TmtcError::Shape(_))
        ));
        assert!(matches!(
            client.uplink("table", &vec![0; MAX_TRANSFER_BYTES + 2], TransferOptions::new()),
            Err(TmtcError::Shape(_))
        ));
        assert!(matches!(
            client.uplink("table", &[], TransferOptions::new()),
            Err(TmtcError::Shape(_))
        ));
    }

    #[test]
    fn transfers_past_the_row_space_are_refused() {
        let mut mock = MockCommandHandler::new();
        mock.expect_uplink_parameter().times(0);
        mock.expect_downlink_parameter().times(0);
        let client = connected(mock);

        let err = client
            .uplink(
                "table",
                &[0, 1, 0, 2],
                TransferOptions::new().first_row(u32::MAX),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            TmtcError::InvalidRows {
                first_row: u32::MAX,
                ..
            }
        ));
        assert_eq!(std::fs::read_dir(client.staging.path()).unwrap().count(), 0);

        // a single row at the very end still fits
        let mut mock = MockCommandHandler::new();
        mock.expect_uplink_parameter().times(1).returning(
            |_, request: TransferRequest, listener: Arc<dyn TransferListener>| {
                assert_eq!((request.first_row, request.last_row), (u32::MAX, u32::MAX));
                listener.on_state_changed(finished(None), "Complete");
                Ok(Box::new(MockTransferHandle::new()))
            },
        );
        let client = connected(mock);
        client
            .uplink("table", &[0, 1], TransferOptions::new().first_row(u32::MAX))
            .unwrap();

        let mut mock = MockCommandHandler::new();
        mock.expect_downlink_parameter().times(0);
        let client = connected(mock);
        assert!(matches!(
            client.downlink("table", TransferOptions::new().last_row(u32::MAX)),
            Err(TmtcError::InvalidRows { .. })
        ));
    }

    #[test]
    fn failed_transfer_wraps_onboard_exception() {
        let mut mock = MockCommandHandler::new();
        mock.expect_downlink_parameter().returning(|_, _, listener| {
            listener.on_state_changed(finished(Some(30)), "Failed");
            Ok(Box::new(MockTransferHandle::new()))
        });
        let client = connected(mock);

        match client.downlink("table", TransferOptions::new()) {
            Err(TmtcError::Transfer {
                exception: Some(e), ..
            }) => assert_eq!(e.name.as_deref(), Some("platform.obc.busy")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn downlink_timeout_aborts_once_and_removes_staging() {
        let staged_at = Arc::new(Mutex::new(None::<PathBuf>));
        let aborts = Arc::new(AtomicUsize::new(0));
        let (seen, count) = (Arc::clone(&staged_at), Arc::clone(&aborts));
        let mut mock = MockCommandHandler::new();
        mock.expect_downlink_parameter().times(1).returning(
            move |path: &Path, request: TransferRequest, _listener: Arc<dyn TransferListener>| {
                assert!(request.resize);
                assert_eq!(request.last_row, 3);
                assert_eq!(request.max_retries, 10);
                // a partially received file that never completes
                std::fs::write(path, b"part").unwrap();
                *seen.lock() = Some(path.to_path_buf());
                let count = Arc::clone(&count);
                let mut handle = MockTransferHandle::new();
                handle.expect_abort().times(1).returning(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                });
                Ok(Box::new(handle))
            },
        );
        let client = connected(mock);

        let err = client
            .downlink(
                "table",
                TransferOptions::new().timeout(Duration::from_millis(50)),
            )
            .unwrap_err();
        assert!(matches!(err, TmtcError::Transfer { exception: None, .. }));
        assert_eq!(aborts.load(Ordering::SeqCst), 1);
        let path = staged_at.lock().clone().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn downlink_returns_staged_bytes() {
        let mut mock = MockCommandHandler::new();
        mock.expect_downlink_parameter()
            .returning(|path: &Path, _, listener: Arc<dyn TransferListener>| {
                std::fs::write(path, [0u8, 9, 0, 8]).unwrap();
                listener.on_state_changed(finished(None), "Complete");
                Ok(Box::new(MockTransferHandle::new()))
            });
        let client = connected(mock);

        let data = client
            .downlink("table", TransferOptions::new().last_row(1))
            .unwrap();
        assert_eq!(data, vec![0, 9, 0, 8]);
    }

    #[test]
    fn telemetry_reaches_session_subscribers() {
        let client = connected(MockCommandHandler::new());
        let (_, events) = client.event_queue();
        let (id, debug) = client.debug_queue();

        client.telemetry().on_event(0x4003, 5, &[]);
        client.telemetry().on_debug("hello");
        assert_eq!(events.try_recv().unwrap().event_id, 3);
        assert_eq!(debug.try_recv().unwrap().message, "hello");

        client.unregister_debug_listener(id).unwrap();
        assert!(client.unregister_debug_listener(id).is_err());
    }
}
