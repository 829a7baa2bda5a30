//! In-process stand-in for the onboard command/telemetry engine.
//!
//! Parameters live in a row store seeded from the entity model. Commands are
//! answered synchronously; uplinks and downlinks run on a worker thread that
//! moves `packet_bytes` per packet and may lose packets at the configured rate.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use ground_control::{
    CommandHandler, LinkError, TelemetryListener, TransferHandle, TransferListener,
    TransferRequest, TransferStatus,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tmtc_protocol::{EntityModel, ParameterDefinition, ParameterSize, Severity, TypeClass};
use tracing::{debug, info, warn};

use crate::config::SimConfig;

/// Parameter ids claimed by each parameter block, starting at its own id.
pub const BLOCK_SPAN: u32 = 256;

struct Stored {
    def: ParameterDefinition,
    rows: Vec<Vec<u8>>,
}

impl Stored {
    /// Zeroed to the minimum length. A var_raw value is one row of
    /// `min_rows` bytes.
    fn new(def: ParameterDefinition) -> Self {
        let rows = if def.type_class == TypeClass::VarRaw {
            vec![vec![0; def.min_rows as usize]]
        } else {
            vec![vec![0; def.bytes_per_row as usize]; def.min_rows as usize]
        };
        Self { def, rows }
    }

    fn size(&self) -> ParameterSize {
        ParameterSize {
            size: self.rows.iter().map(Vec::len).sum::<usize>() as u32,
            length: self.rows.len() as u32,
        }
    }
}

struct SimState {
    model: Arc<EntityModel>,
    config: SimConfig,
    loss: f64,
    store: Mutex<HashMap<u32, Stored>>,
    listeners: Mutex<Vec<(u64, Arc<dyn TelemetryListener>)>>,
    next_token: AtomicU64,
    online: AtomicBool,
    rng: Mutex<StdRng>,
}

#[derive(Clone)]
pub struct SimEngine {
    state: Arc<SimState>,
}

fn nack(exception_id: u32) -> LinkError {
    LinkError::Rejected { exception_id }
}

impl SimEngine {
    pub fn new(model: Arc<EntityModel>, config: SimConfig) -> Self {
        let store = model
            .parameters
            .iter()
            .map(|p| (p.element.id, Stored::new(p.definition.clone())))
            .collect::<HashMap<_, _>>();
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let loss = if config.loss.is_finite() {
            config.loss.clamp(0.0, 1.0)
        } else {
            0.0
        };
        info!(parameters = store.len(), loss, packet_bytes = config.packet_bytes, "onboard engine ready");

        Self {
            state: Arc::new(SimState {
                model,
                config,
                loss,
                store: Mutex::new(store),
                listeners: Mutex::new(Vec::new()),
                next_token: AtomicU64::new(1),
                online: AtomicBool::new(false),
                rng: Mutex::new(rng),
            }),
        }
    }

    pub fn model(&self) -> &Arc<EntityModel> {
        &self.state.model
    }

    pub fn config(&self) -> &SimConfig {
        &self.state.config
    }

    pub fn set_online(&self, online: bool) {
        self.state.online.store(online, Ordering::SeqCst);
        info!(online, "link state changed");
    }

    pub fn is_online(&self) -> bool {
        self.state.online.load(Ordering::SeqCst)
    }

    /// Current rows of a parameter, if it has been stored.
    pub fn rows(&self, id: u32) -> Option<Vec<Vec<u8>>> {
        self.state.store.lock().get(&id).map(|s| s.rows.clone())
    }

    /// First rows of `ids`, concatenated. Unknown ids contribute nothing.
    pub fn sample(&self, ids: &[u32]) -> Vec<u8> {
        let store = self.state.store.lock();
        ids.iter()
            .filter_map(|id| store.get(id).and_then(|s| s.rows.first()))
            .flatten()
            .copied()
            .collect()
    }

    /// Add one to the first row of an unsigned parameter, wrapping at its width.
    pub fn increment(&self, id: u32) {
        let mut store = self.state.store.lock();
        let Some(row) = store.get_mut(&id).and_then(|s| s.rows.first_mut()) else {
            return;
        };
        for byte in row.iter_mut().rev() {
            let (next, carry) = byte.overflowing_add(1);
            *byte = next;
            if !carry {
                break;
            }
        }
    }

    // ---------------------------- Telemetry --------------------------------

    fn listeners(&self) -> Vec<Arc<dyn TelemetryListener>> {
        if !self.is_online() {
            return Vec::new();
        }
        self.state
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect()
    }

    /// `event_id` is the bare id; the severity bits are added here.
    pub fn publish_event(&self, event_id: u16, severity: Severity, source: u32, info: &[u8]) {
        let raw = (event_id & !Severity::MASK) | severity.mask();
        debug!(event_id, %severity, source, "event");
        for l in self.listeners() {
            l.on_event(raw, source, info);
        }
    }

    pub fn publish_housekeeping(&self, structure_id: u32, data: &[u8]) {
        for l in self.listeners() {
            l.on_housekeeping(structure_id, data);
        }
    }

    pub fn publish_debug(&self, message: &str) {
        for l in self.listeners() {
            l.on_debug(message);
        }
    }

    // ---------------------------- Commands ---------------------------------

    /// Wait out the configured response delay, or the whole timeout when the
    /// delay exceeds it.
    fn respond(&self, timeout: Duration) -> Result<(), LinkError> {
        if !self.is_online() {
            return Err(LinkError::Disconnected);
        }
        let delay = self.state.config.response_delay();
        if delay > timeout {
            thread::sleep(timeout);
            return Err(LinkError::Timeout);
        }
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        Ok(())
    }

    /// Runs `f` on the stored parameter. Parameter block elements are created
    /// on first use.
    fn with_stored<R>(
        &self,
        id: u32,
        f: impl FnOnce(&mut Stored) -> Result<R, LinkError>,
    ) -> Result<R, LinkError> {
        let mut store = self.state.store.lock();
        if !store.contains_key(&id) {
            let in_block = self
                .state
                .model
                .parameter_blocks
                .iter()
                .any(|b| (b.element.id..b.element.id.saturating_add(BLOCK_SPAN)).contains(&id));
            if !in_block {
                return Err(nack(self.state.config.exceptions.unknown_entity));
            }
            debug!(param_id = id, "parameter block element created");
            store.insert(id, Stored::new(ParameterDefinition::block_element()));
        }
        match store.get_mut(&id) {
            Some(stored) => f(stored),
            None => Err(nack(self.state.config.exceptions.unknown_entity)),
        }
    }

    fn read_rows(
        &self,
        id: u32,
        first_row: u32,
        last_row: u32,
        resize: bool,
    ) -> Result<Vec<Vec<u8>>, LinkError> {
        let invalid_row = self.state.config.exceptions.invalid_row;
        self.with_stored(id, |stored| {
            let len = stored.rows.len() as u32;
            // a resizing read at or past the end has nothing to return
            if resize && first_row >= len {
                return Ok(Vec::new());
            }
            let last = if resize { last_row.min(len - 1) } else { last_row };
            if first_row > last || last >= len {
                return Err(nack(invalid_row));
            }
            Ok(stored.rows[first_row as usize..=last as usize].to_vec())
        })
    }

    fn write_rows(
        &self,
        id: u32,
        first_row: u32,
        rows: Vec<Vec<u8>>,
        resize: bool,
    ) -> Result<(), LinkError> {
        let ex = self.state.config.exceptions.clone();
        self.with_stored(id, |stored| {
            let def = &stored.def;
            if def.is_read_only {
                return Err(nack(ex.read_only));
            }

            if def.type_class == TypeClass::VarRaw {
                let [blob] = rows.as_slice() else {
                    return Err(nack(ex.invalid_length));
                };
                if first_row != 0 {
                    return Err(nack(ex.invalid_row));
                }
                if !(def.min_rows..=def.max_rows).contains(&(blob.len() as u32)) {
                    return Err(nack(ex.invalid_length));
                }
                stored.rows = vec![blob.clone()];
                return Ok(());
            }

            if rows.is_empty() || rows.iter().any(|r| r.len() != def.bytes_per_row as usize) {
                return Err(nack(ex.invalid_length));
            }
            let first = first_row as usize;
            let end = first + rows.len();
            if first > stored.rows.len() || end > def.max_rows as usize {
                return Err(nack(ex.invalid_row));
            }
            if resize && end < def.min_rows as usize {
                return Err(nack(ex.invalid_row));
            }

            if resize {
                stored.rows.truncate(first);
                stored.rows.extend(rows);
            } else {
                for (i, row) in rows.into_iter().enumerate() {
                    match stored.rows.get_mut(first + i) {
                        Some(slot) => *slot = row,
                        None => stored.rows.push(row),
                    }
                }
            }
            Ok(())
        })
    }

    fn name_of(&self, id: u32) -> String {
        self.state
            .model
            .parameters
            .identify(id)
            .map(str::to_string)
            .unwrap_or_else(|_| format!("#{id}"))
    }

    // ---------------------------- Transfers --------------------------------

    fn start_transfer(
        &self,
        job: Job,
        request: TransferRequest,
        listener: Arc<dyn TransferListener>,
    ) -> Box<dyn TransferHandle> {
        let (abort_tx, abort_rx) = crossbeam_channel::bounded(1);
        let handle = SimTransfer {
            abort: abort_tx,
            progress: Arc::new(TransferProgress {
                in_progress: AtomicBool::new(true),
                error: Mutex::new(None),
            }),
        };

        let worker = Worker {
            engine: self.clone(),
            request,
            listener,
            abort: abort_rx,
            progress: Arc::clone(&handle.progress),
        };
        thread::spawn(move || worker.run(job));
        Box::new(handle)
    }
}

impl CommandHandler for SimEngine {
    fn query_parameter(&self, id: u32, timeout: Duration) -> Result<ParameterSize, LinkError> {
        self.respond(timeout)?;
        self.with_stored(id, |stored| Ok(stored.size()))
    }

    fn get_parameter(&self, id: u32, row: u32, timeout: Duration) -> Result<Vec<u8>, LinkError> {
        self.respond(timeout)?;
        let invalid_row = self.state.config.exceptions.invalid_row;
        self.with_stored(id, |stored| {
            stored
                .rows
                .get(row as usize)
                .cloned()
                .ok_or(nack(invalid_row))
        })
    }

    fn get_parameter_rows(
        &self,
        id: u32,
        first_row: u32,
        last_row: u32,
        resize: bool,
        timeout: Duration,
    ) -> Result<Vec<Vec<u8>>, LinkError> {
        self.respond(timeout)?;
        self.read_rows(id, first_row, last_row, resize)
    }

    fn set_parameter(
        &self,
        id: u32,
        first_row: u32,
        rows: Vec<Vec<u8>>,
        resize: bool,
        timeout: Duration,
    ) -> Result<(), LinkError> {
        self.respond(timeout)?;
        let count = rows.len();
        self.write_rows(id, first_row, rows, resize)?;
        self.publish_debug(&format!(
            "{} set: {count} row(s) from row {first_row}",
            self.name_of(id)
        ));
        Ok(())
    }

    fn invoke_action(
        &self,
        id: u32,
        argument: Option<Vec<u8>>,
        timeout: Duration,
    ) -> Result<(), LinkError> {
        self.respond(timeout)?;
        let ex = &self.state.config.exceptions;
        let model = &self.state.model;
        let Some(action) = model.actions.get(id) else {
            return Err(nack(ex.unknown_entity));
        };

        match (&argument, action.definition.arguments.first()) {
            (None, None) => {}
            (Some(bytes), Some(arg)) if (arg.min_bytes..=arg.max_bytes).contains(&(bytes.len() as u32)) => {}
            _ => return Err(nack(ex.invalid_length)),
        }

        if let Some(component) = model.components.iter().find(|c| c.actions.contains(&id)) {
            let event = component
                .events
                .iter()
                .filter_map(|&e| model.events.get(e))
                .find(|e| e.definition.severity == Severity::Info);
            if let Some(event) = event {
                let source = component
                    .event_sources
                    .first()
                    .copied()
                    .unwrap_or(component.element.id);
                self.publish_event(
                    event.element.id as u16,
                    Severity::Info,
                    source,
                    argument.as_deref().unwrap_or_default(),
                );
            }
        }
        self.publish_debug(&format!("{} invoked", action.element.full_name));
        Ok(())
    }

    fn uplink_parameter(
        &self,
        staging: &Path,
        request: TransferRequest,
        listener: Arc<dyn TransferListener>,
    ) -> Result<Box<dyn TransferHandle>, LinkError> {
        if !self.is_online() {
            return Err(LinkError::Disconnected);
        }
        let ex = &self.state.config.exceptions;
        let read_only = self.with_stored(request.id, |stored| Ok(stored.def.is_read_only))?;
        if read_only {
            return Err(nack(ex.read_only));
        }
        // the staging file may be gone once the caller returns, so read it now
        let data = fs::read(staging).map_err(|e| LinkError::Transfer(e.to_string()))?;
        if data.is_empty() || request.bytes_per_row == 0 {
            return Err(nack(ex.invalid_length));
        }
        info!(param_id = request.id, bytes = data.len(), "uplink accepted");
        Ok(self.start_transfer(Job::Uplink { data }, request, listener))
    }

    fn downlink_parameter(
        &self,
        destination: &Path,
        request: TransferRequest,
        listener: Arc<dyn TransferListener>,
    ) -> Result<Box<dyn TransferHandle>, LinkError> {
        if !self.is_online() {
            return Err(LinkError::Disconnected);
        }
        let rows = self.read_rows(request.id, request.first_row, request.last_row, request.resize)?;
        let data = rows.concat();
        info!(param_id = request.id, bytes = data.len(), "downlink accepted");
        Ok(self.start_transfer(
            Job::Downlink {
                data,
                destination: destination.to_path_buf(),
            },
            request,
            listener,
        ))
    }

    fn add_telemetry_listener(&self, listener: Arc<dyn TelemetryListener>) -> u64 {
        let token = self.state.next_token.fetch_add(1, Ordering::Relaxed);
        self.state.listeners.lock().push((token, listener));
        token
    }

    fn remove_telemetry_listener(&self, token: u64) {
        self.state.listeners.lock().retain(|(t, _)| *t != token);
    }
}

// =============================== Transfer worker ===========================

enum Job {
    Uplink { data: Vec<u8> },
    Downlink { data: Vec<u8>, destination: PathBuf },
}

struct TransferProgress {
    in_progress: AtomicBool,
    error: Mutex<Option<u32>>,
}

/// Handle returned to the client. Dropping it aborts a running transfer.
pub struct SimTransfer {
    abort: Sender<()>,
    progress: Arc<TransferProgress>,
}

impl TransferHandle for SimTransfer {
    fn abort(&self) {
        let _ = self.abort.try_send(());
    }

    fn is_in_progress(&self) -> bool {
        self.progress.in_progress.load(Ordering::SeqCst)
    }

    fn error(&self) -> Option<u32> {
        *self.progress.error.lock()
    }
}

struct Worker {
    engine: SimEngine,
    request: TransferRequest,
    listener: Arc<dyn TransferListener>,
    abort: Receiver<()>,
    progress: Arc<TransferProgress>,
}

enum Stop {
    Aborted,
    Failed(u32),
}

impl Worker {
    fn run(self, job: Job) {
        let id = self.request.id;
        self.listener.on_state_changed(
            TransferStatus {
                in_progress: true,
                exception: None,
            },
            "Started",
        );

        let result = match job {
            Job::Uplink { data } => self.send(&data, None).and_then(|()| self.apply(data)),
            Job::Downlink { data, destination } => self.send(&data, Some(&destination)),
        };

        match result {
            Ok(()) => {
                info!(param_id = id, "transfer complete");
                self.finish(None, "Complete");
            }
            Err(Stop::Failed(exception)) => {
                warn!(param_id = id, exception, "transfer failed");
                self.finish(Some(exception), "Failed");
            }
            Err(Stop::Aborted) => {
                warn!(param_id = id, "transfer aborted");
                let exception = self.engine.state.config.exceptions.transfer_failed;
                self.finish(Some(exception), "Aborted");
            }
        }
    }

    fn finish(&self, exception: Option<u32>, description: &str) {
        *self.progress.error.lock() = exception;
        self.progress.in_progress.store(false, Ordering::SeqCst);
        self.listener.on_state_changed(
            TransferStatus {
                in_progress: false,
                exception,
            },
            description,
        );
    }

    /// Move `data` packet by packet, appending each delivered packet to
    /// `destination` when given.
    fn send(&self, data: &[u8], destination: Option<&Path>) -> Result<(), Stop> {
        let state = &self.engine.state;
        let failed = state.config.exceptions.transfer_failed;
        let interval = state.config.packet_interval();
        let mut out = match destination {
            Some(path) => Some(File::create(path).map_err(|e| {
                warn!(?path, %e, "cannot create downlink destination");
                Stop::Failed(failed)
            })?),
            None => None,
        };

        let total = data.len() as u64;
        let mut done = 0u64;
        for (seq, packet) in data.chunks(state.config.packet_bytes.max(1)).enumerate() {
            let mut retries = 0u32;
            loop {
                match self.abort.recv_timeout(interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return Err(Stop::Aborted),
                    Err(RecvTimeoutError::Timeout) => {}
                }
                if !state.rng.lock().random_bool(state.loss) {
                    break;
                }
                retries += 1;
                debug!(param_id = self.request.id, seq, retries, "packet lost");
                if retries > self.request.max_retries {
                    return Err(Stop::Failed(failed));
                }
            }

            if let Some(file) = out.as_mut() {
                file.write_all(packet).map_err(|_| Stop::Failed(failed))?;
            }
            done += packet.len() as u64;
            self.listener.on_progress(done, total);
            if seq == 0 {
                self.listener.on_state_changed(
                    TransferStatus {
                        in_progress: true,
                        exception: None,
                    },
                    "In progress",
                );
            }
        }

        if let Some(mut file) = out {
            file.flush().map_err(|_| Stop::Failed(failed))?;
        }
        Ok(())
    }

    fn apply(&self, data: Vec<u8>) -> Result<(), Stop> {
        let r = &self.request;
        let rows = data
            .chunks(r.bytes_per_row as usize)
            .map(<[u8]>::to_vec)
            .collect();
        self.engine
            .write_rows(r.id, r.first_row, rows, r.resize)
            .map_err(|e| match e {
                LinkError::Rejected { exception_id } => Stop::Failed(exception_id),
                _ => Stop::Failed(self.engine.state.config.exceptions.transfer_failed),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::database::parse_deployment;

    const DEMO: &str = include_str!("../../demos/deployment.json");
    const T: Duration = Duration::from_millis(200);

    fn engine(config: SimConfig) -> SimEngine {
        let model = EntityModel::load(parse_deployment(DEMO).unwrap()).unwrap();
        let engine = SimEngine::new(Arc::new(model), config);
        engine.set_online(true);
        engine
    }

    fn id(engine: &SimEngine, name: &str) -> u32 {
        engine.model().parameters.resolve(&name.into()).unwrap()
    }

    #[derive(Default)]
    struct Recording {
        events: Mutex<Vec<(u16, u32, Vec<u8>)>>,
        debug: Mutex<Vec<String>>,
    }

    impl TelemetryListener for Recording {
        fn on_event(&self, event_id: u16, source: u32, info: &[u8]) {
            self.events.lock().push((event_id, source, info.to_vec()));
        }
        fn on_housekeeping(&self, _: u32, _: &[u8]) {}
        fn on_debug(&self, message: &str) {
            self.debug.lock().push(message.to_string());
        }
    }

    struct Collector {
        states: Mutex<Vec<(TransferStatus, String)>>,
        progress: AtomicUsize,
        done: Sender<Option<u32>>,
    }

    impl TransferListener for Collector {
        fn on_state_changed(&self, status: TransferStatus, description: &str) {
            self.states.lock().push((status, description.to_string()));
            if status.is_terminal() {
                let _ = self.done.try_send(status.exception);
            }
        }
        fn on_progress(&self, _: u64, _: u64) {
            self.progress.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn collector() -> (Arc<Collector>, Receiver<Option<u32>>) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let c = Arc::new(Collector {
            states: Mutex::new(Vec::new()),
            progress: AtomicUsize::new(0),
            done: tx,
        });
        (c, rx)
    }

    fn request(id: u32, first_row: u32, last_row: u32) -> TransferRequest {
        TransferRequest {
            id,
            first_row,
            last_row,
            bytes_per_row: 16,
            resize: true,
            max_retries: 3,
            timeout: Duration::from_secs(2),
        }
    }

    #[test]
    fn store_starts_at_minimum_length() {
        let e = engine(SimConfig::default());
        let gains = id(&e, "camera.gains");
        assert_eq!(
            e.query_parameter(gains, T).unwrap(),
            ParameterSize { size: 4, length: 4 }
        );
        let image = id(&e, "camera.image");
        assert_eq!(e.query_parameter(image, T).unwrap().length, 0);
    }

    #[test]
    fn offline_engine_reports_disconnected() {
        let e = engine(SimConfig::default());
        e.set_online(false);
        assert!(matches!(
            e.query_parameter(257, T),
            Err(LinkError::Disconnected)
        ));
    }

    #[test]
    fn slow_response_times_out() {
        let e = engine(SimConfig {
            response_delay_ms: 50,
            ..SimConfig::default()
        });
        assert!(matches!(
            e.get_parameter(257, 0, Duration::from_millis(5)),
            Err(LinkError::Timeout)
        ));
        assert!(e.get_parameter(257, 0, T).is_ok());
    }

    #[test]
    fn writes_follow_row_rules() {
        let e = engine(SimConfig::default());
        let ex = e.config().exceptions.clone();
        let uptime = id(&e, "obc.uptime");
        assert!(matches!(
            e.set_parameter(uptime, 0, vec![vec![0; 4]], false, T),
            Err(LinkError::Rejected { exception_id }) if exception_id == ex.read_only
        ));

        let thresholds = id(&e, "eps.thresholds");
        assert!(matches!(
            e.set_parameter(thresholds, 0, vec![vec![0; 3]], false, T),
            Err(LinkError::Rejected { exception_id }) if exception_id == ex.invalid_length
        ));
        assert!(matches!(
            e.set_parameter(thresholds, 2, vec![vec![0; 2]], false, T),
            Err(LinkError::Rejected { exception_id }) if exception_id == ex.invalid_row
        ));

        let rows = vec![vec![0, 1], vec![0, 2], vec![0, 3]];
        e.set_parameter(thresholds, 0, rows, false, T).unwrap();
        e.set_parameter(thresholds, 1, vec![vec![0, 9]], true, T).unwrap();
        assert_eq!(e.rows(thresholds).unwrap(), vec![vec![0, 1], vec![0, 9]]);

        assert_eq!(
            e.get_parameter_rows(thresholds, 0, 7, true, T).unwrap().len(),
            2
        );
        assert!(matches!(
            e.get_parameter_rows(thresholds, 0, 7, false, T),
            Err(LinkError::Rejected { exception_id }) if exception_id == ex.invalid_row
        ));
    }

    #[test]
    fn unknown_ids_and_block_elements() {
        let e = engine(SimConfig::default());
        let ex = e.config().exceptions.clone();
        assert!(matches!(
            e.query_parameter(9999, T),
            Err(LinkError::Rejected { exception_id }) if exception_id == ex.unknown_entity
        ));

        let block = e
            .model()
            .parameter_blocks
            .resolve(&"camera.scratch".into())
            .unwrap();
        e.set_parameter(block + 3, 0, vec![vec![7], vec![8]], true, T).unwrap();
        assert_eq!(e.rows(block + 3).unwrap(), vec![vec![7], vec![8]]);
    }

    #[test]
    fn invoke_publishes_event_and_debug() {
        let e = engine(SimConfig::default());
        let rec = Arc::new(Recording::default());
        let token = e.add_telemetry_listener(rec.clone());

        let capture = e.model().actions.resolve(&"camera.capture".into()).unwrap();
        assert!(e.invoke_action(capture, None, T).is_err());
        e.invoke_action(capture, Some(vec![0x01, 0xF4]), T).unwrap();

        let events = rec.events.lock().clone();
        assert_eq!(events.len(), 1);
        let (raw, source, info) = &events[0];
        let (event_id, severity) = Severity::split_event_id(*raw);
        assert_eq!(severity, Severity::Info);
        assert_eq!(e.model().events.identify(event_id as u32).unwrap(), "payload.camera.captured");
        assert_eq!(
            e.model().event_sources.identify(*source).unwrap(),
            "payload.camera.sensor"
        );
        assert_eq!(info, &vec![0x01, 0xF4]);
        assert_eq!(rec.debug.lock().as_slice(), ["payload.camera.capture invoked"]);

        e.remove_telemetry_listener(token);
        e.invoke_action(capture, Some(vec![0, 1]), T).unwrap();
        assert_eq!(rec.events.lock().len(), 1);
    }

    #[test]
    fn counter_wraps_big_endian() {
        let e = engine(SimConfig::default());
        let uptime = id(&e, "obc.uptime");
        e.state.store.lock().get_mut(&uptime).unwrap().rows[0] = vec![0, 0, 0, 0xFF];
        e.increment(uptime);
        assert_eq!(e.sample(&[uptime]), vec![0, 0, 1, 0]);
    }

    #[test]
    fn downlink_writes_destination_then_completes() {
        let e = engine(SimConfig {
            packet_bytes: 10,
            ..SimConfig::default()
        });
        let image = id(&e, "camera.image");
        let data: Vec<Vec<u8>> = (0..3u8).map(|i| vec![i; 16]).collect();
        e.set_parameter(image, 0, data.clone(), true, T).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        let (listener, done) = collector();
        let handle = e
            .downlink_parameter(&dest, request(image, 0, 1023), listener.clone())
            .unwrap();

        assert_eq!(done.recv_timeout(Duration::from_secs(2)).unwrap(), None);
        assert!(!handle.is_in_progress());
        assert_eq!(handle.error(), None);
        assert_eq!(fs::read(&dest).unwrap(), data.concat());
        assert_eq!(listener.progress.load(Ordering::SeqCst), 5);

        let states: Vec<String> = listener.states.lock().iter().map(|(_, d)| d.clone()).collect();
        assert_eq!(states, ["Started", "In progress", "Complete"]);
    }

    #[test]
    fn total_loss_fails_after_retries() {
        let e = engine(SimConfig {
            loss: 1.0,
            seed: Some(7),
            ..SimConfig::default()
        });
        let image = id(&e, "camera.image");
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("up.bin");
        fs::write(&staging, [1u8; 32]).unwrap();

        let (listener, done) = collector();
        let handle = e
            .uplink_parameter(&staging, request(image, 0, 1), listener)
            .unwrap();
        let exception = done.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(exception, Some(e.config().exceptions.transfer_failed));
        assert_eq!(handle.error(), exception);
        assert_eq!(e.rows(image).unwrap().len(), 0);
    }

    #[test]
    fn abort_stops_transfer() {
        let e = engine(SimConfig {
            packet_bytes: 1,
            packet_interval_ms: 20,
            ..SimConfig::default()
        });
        let image = id(&e, "camera.image");
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("up.bin");
        fs::write(&staging, [1u8; 64]).unwrap();

        let (listener, done) = collector();
        let handle = e
            .uplink_parameter(&staging, request(image, 0, 3), listener.clone())
            .unwrap();
        handle.abort();
        assert!(done.recv_timeout(Duration::from_secs(2)).unwrap().is_some());
        let last = listener.states.lock().last().cloned().unwrap();
        assert_eq!(last.1, "Aborted");
        assert_eq!(e.rows(image).unwrap().len(), 0);
    }
}
