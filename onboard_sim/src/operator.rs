// scripted operator session run against the demo deployment
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ground_control::{EntityKind, Rows, TmtcClient, TransferOptions, Value};
use tracing::{info, warn};

/// Bytes written by the uplink step; a whole number of image rows.
pub const UPLINK_BYTES: usize = 1024;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn step<T: std::fmt::Debug>(
    failures: &mut usize,
    name: &str,
    result: ground_control::Result<T>,
) -> Option<T> {
    match result {
        Ok(value) => {
            info!(step = name, ?value, "ok");
            Some(value)
        }
        Err(e) => {
            *failures += 1;
            warn!(step = name, %e, onboard = ?e.onboard_exception(), "failed");
            None
        }
    }
}

/// Exercise every command once. Returns the number of failed steps.
pub fn run(client: &TmtcClient) -> usize {
    let mut failures = 0;

    step(&mut failures, "identify", client.identify(EntityKind::Parameter, 257));
    step(&mut failures, "query gains", client.query("camera.gains", None));
    step(
        &mut failures,
        "get mode",
        client.get("obc.mode", Rows::single(0), false, None),
    );
    step(
        &mut failures,
        "set exposure",
        client.set("camera.exposure", 500u16, 0, false, None),
    );
    step(
        &mut failures,
        "set gains",
        client.set(
            "camera.gains",
            vec![Value::from(1u8), 2u8.into(), 3u8.into(), 4u8.into()],
            0,
            false,
            None,
        ),
    );
    step(
        &mut failures,
        "set target",
        client.set("camera.target", "platform.eps.voltage", 0, false, None),
    );
    step(
        &mut failures,
        "get target",
        client.get("camera.target", Rows::single(0), false, None),
    );
    step(
        &mut failures,
        "invoke capture",
        client.invoke("camera.capture", Some(Value::Bytes(vec![0x01, 0xF4])), None),
    );
    step(&mut failures, "invoke reset", client.invoke("obc.reset", None, None));

    let data = pattern(UPLINK_BYTES);
    let progress = Arc::new(AtomicU64::new(0));
    let seen = Arc::clone(&progress);
    let options = TransferOptions::new()
        .resize(true)
        .on_state_change(|state| info!(state, "uplink"))
        .on_progress(move |count, _| seen.store(count, Ordering::Relaxed));
    step(&mut failures, "uplink image", client.uplink("camera.image", &data, options));
    info!(bytes = progress.load(Ordering::Relaxed), "uplink progress");

    let back = step(
        &mut failures,
        "downlink image",
        client
            .downlink("camera.image", TransferOptions::new())
            .map(|bytes| bytes == data),
    );
    if back == Some(false) {
        warn!(bytes = data.len(), "downlink does not match uplink");
        failures += 1;
    }

    step(
        &mut failures,
        "get thresholds",
        client.get("eps.thresholds", Rows::all(), true, None),
    );
    failures
}
