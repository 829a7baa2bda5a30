// recorder.rs: telemetry queues to CSV
// telemetry.csv: ts,kind,id,severity,source,data
use std::path::{Path, PathBuf};

use crossbeam_channel::{Receiver, TryRecvError};
use ground_control::{DebugNotification, EventNotification, HousekeepingNotification};
use tokio::{
    fs::{self, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    time::{self, Duration, MissedTickBehavior},
};
use tracing::{debug, info};

use crate::errors::SimError;

pub const HEADER: &str = "ts,kind,id,severity,source,data\n";

pub struct TelemetryRecorder {
    pub events: Receiver<EventNotification>,
    pub housekeeping: Receiver<HousekeepingNotification>,
    pub debug: Receiver<DebugNotification>,
}

fn quote(s: &str) -> String {
    if s.contains([',', '"', '\n']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

pub fn event_line(e: &EventNotification) -> String {
    format!(
        "{},event,{},{},{},{}\n",
        e.received_at.to_rfc3339(),
        e.event_id,
        e.severity,
        e.source,
        hex::encode(&e.info)
    )
}

pub fn housekeeping_line(h: &HousekeepingNotification) -> String {
    format!(
        "{},housekeeping,{},,,{}\n",
        h.received_at.to_rfc3339(),
        h.structure_id,
        hex::encode(&h.data)
    )
}

pub fn debug_line(d: &DebugNotification) -> String {
    format!("{},debug,,,,{}\n", d.received_at.to_rfc3339(), quote(&d.message))
}

/// Pulls whatever is queued. `false` once the queue is empty and its sender gone.
fn drain<T>(rx: &Receiver<T>, lines: &mut Vec<String>, render: fn(&T) -> String) -> bool {
    loop {
        match rx.try_recv() {
            Ok(item) => lines.push(render(&item)),
            Err(TryRecvError::Empty) => return true,
            Err(TryRecvError::Disconnected) => return false,
        }
    }
}

impl TelemetryRecorder {
    /// Append to `path` every `period` until every queue has disconnected.
    /// Returns the number of rows written.
    pub async fn run(self, path: PathBuf, period: Duration) -> Result<u64, SimError> {
        let mut out = open(&path).await?;
        let mut tick = time::interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut written = 0u64;

        loop {
            tick.tick().await;
            let mut lines = Vec::new();
            let open_events = drain(&self.events, &mut lines, event_line);
            let open_hk = drain(&self.housekeeping, &mut lines, housekeeping_line);
            let open_debug = drain(&self.debug, &mut lines, debug_line);

            for line in &lines {
                out.write_all(line.as_bytes()).await?;
            }
            if !lines.is_empty() {
                out.flush().await?;
                written += lines.len() as u64;
                debug!(rows = lines.len(), "telemetry recorded");
            }

            if !(open_events || open_hk || open_debug) {
                break;
            }
        }
        out.flush().await?;
        info!(?path, rows = written, "telemetry recorder stopped");
        Ok(written)
    }
}

async fn open(path: &Path) -> Result<BufWriter<fs::File>, SimError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).await?;
    }
    let fresh = !fs::try_exists(path).await.unwrap_or(false);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    let mut writer = BufWriter::new(file);
    if fresh {
        writer.write_all(HEADER.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(writer)
}
