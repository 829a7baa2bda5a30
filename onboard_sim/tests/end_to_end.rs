// Ground client driven against the simulated onboard engine.
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use ground_control::{
    ClientConfig, EntityKind, ParameterTarget, Rows, TmtcClient, TmtcError, TransferOptions,
    Value,
};
use onboard_sim::{SimConfig, SimConnector, SimEngine, operator, parse_deployment};
use proptest::prelude::*;
use tmtc_protocol::{EntityModel, Severity};

const DEMO: &str = include_str!("../../demos/deployment.json");
const RECV: Duration = Duration::from_secs(1);

fn setup(sim: SimConfig) -> (TmtcClient, SimEngine) {
    let deployment = parse_deployment(DEMO).unwrap();
    let model = Arc::new(EntityModel::load(deployment.clone()).unwrap());
    let engine = SimEngine::new(model, sim);
    let client = TmtcClient::new(
        ClientConfig::default(),
        Box::new(SimConnector::new(engine.clone())),
    )
    .unwrap();
    client.load_deployment(deployment).unwrap();
    client.connect().unwrap();
    (client, engine)
}

fn exception_name(err: &TmtcError) -> Option<String> {
    err.onboard_exception().and_then(|e| e.name.clone())
}

#[test]
fn values_survive_set_and_get() {
    let (client, _) = setup(SimConfig::default());

    client.set("camera.exposure", 500u16, 0, false, None).unwrap();
    assert_eq!(
        client.get("camera.exposure", Rows::single(0), false, None).unwrap(),
        Value::Unsigned(500)
    );

    let gains: Vec<Value> = (1u8..=4).map(Value::from).collect();
    client.set("camera.gains", gains, 0, false, None).unwrap();
    assert_eq!(
        client.get("camera.gains", Rows::all(), false, None).unwrap(),
        Value::Rows((1..=4).map(Value::Unsigned).collect())
    );

    let thresholds = vec![Value::Signed(-3300), Value::Signed(3100)];
    client.set("eps.thresholds", thresholds.clone(), 0, true, None).unwrap();
    assert_eq!(
        client.get("eps.thresholds", Rows::all(), true, None).unwrap(),
        Value::Rows(thresholds)
    );
    assert_eq!(client.query("eps.thresholds", None).unwrap().length, 2);
}

#[test]
fn parameter_references_come_back_as_names() {
    let (client, _) = setup(SimConfig::default());
    client.set("camera.target", "eps.voltage", 0, false, None).unwrap();
    assert_eq!(
        client.get("camera.target", Rows::single(0), false, None).unwrap(),
        Value::Name("platform.eps.voltage".into())
    );
}

#[test]
fn block_elements_are_raw_rows() {
    let (client, engine) = setup(SimConfig::default());
    let target = ParameterTarget::block_element("camera.scratch", 2);
    client
        .set(
            target.clone(),
            vec![Value::from(7u8), Value::from(8u8)],
            0,
            true,
            None,
        )
        .unwrap();
    assert_eq!(
        client.get(target, Rows::range(0, 1), false, None).unwrap(),
        Value::Rows(vec![Value::Bytes(vec![7]), Value::Bytes(vec![8])])
    );
    assert_eq!(engine.rows(4098).unwrap(), vec![vec![7], vec![8]]);
}

#[test]
fn onboard_rejections_name_the_exception() {
    let (client, _) = setup(SimConfig::default());
    let err = client
        .set("eps.thresholds", Value::Signed(1), 5, false, None)
        .unwrap_err();
    assert_eq!(
        exception_name(&err).as_deref(),
        Some("platform.core.invalid_row")
    );

    let err = client
        .get("camera.gains", Rows::range(2, 9), false, None)
        .unwrap_err();
    assert!(matches!(err, TmtcError::Onboard { .. }));
}

#[test]
fn read_only_is_refused_before_sending() {
    let (client, engine) = setup(SimConfig::default());
    let err = client.set("obc.uptime", 9u32, 0, false, None).unwrap_err();
    assert!(matches!(err, TmtcError::ReadOnly(ref name) if name == "platform.obc.uptime"));
    assert_eq!(engine.rows(258).unwrap(), vec![vec![0; 4]]);
}

#[test]
fn slow_engine_times_out() {
    let (client, _) = setup(SimConfig {
        response_delay_ms: 200,
        ..SimConfig::default()
    });
    let err = client
        .query("obc.mode", Some(Duration::from_millis(10)))
        .unwrap_err();
    assert!(err.is_command_error());
    assert!(matches!(err, TmtcError::CommandTimeout { .. }));
}

#[test]
fn disconnect_stops_commands() {
    let (client, engine) = setup(SimConfig::default());
    client.disconnect();
    assert!(!engine.is_online());
    assert!(matches!(
        client.get("obc.mode", Rows::single(0), false, None),
        Err(TmtcError::NotConnected)
    ));
    client.connect().unwrap();
    assert!(client.get("obc.mode", Rows::single(0), false, None).is_ok());
}

#[test]
fn invoke_reports_event_and_debug() {
    let (client, _) = setup(SimConfig::default());
    let (_, events) = client.event_queue();
    let (_, debug) = client.debug_queue();

    let err = client.invoke("camera.capture", None, None).unwrap_err();
    assert!(matches!(
        err,
        TmtcError::ArgumentCount {
            expected: 1,
            given: 0,
            ..
        }
    ));

    client
        .invoke("camera.capture", Some(Value::Bytes(vec![0x01, 0xF4])), None)
        .unwrap();
    let event = events.recv_timeout(RECV).unwrap();
    assert_eq!(
        client.identify(EntityKind::Event, u32::from(event.event_id)).unwrap(),
        "payload.camera.captured"
    );
    assert_eq!(event.severity, Severity::Info);
    assert_eq!(
        client.identify(EntityKind::EventSource, event.source).unwrap(),
        "payload.camera.sensor"
    );
    assert_eq!(event.info, vec![0x01, 0xF4]);
    assert_eq!(
        debug.recv_timeout(RECV).unwrap().message,
        "payload.camera.capture invoked"
    );
}

#[test]
fn housekeeping_reaches_subscribers() {
    let (client, engine) = setup(SimConfig::default());
    let (_, hk) = client.housekeeping_queue();
    engine.publish_housekeeping(1, &[1, 2, 3]);
    let packet = hk.recv_timeout(RECV).unwrap();
    assert_eq!(packet.structure_id, 1);
    assert_eq!(packet.data, vec![1, 2, 3]);
}

#[test]
fn uplink_then_downlink_round_trip() {
    let (client, _) = setup(SimConfig {
        packet_bytes: 100,
        ..SimConfig::default()
    });
    let data: Vec<u8> = (0..1024u32).map(|i| (i * 7) as u8).collect();

    let progress = Arc::new(AtomicU64::new(0));
    let seen = Arc::clone(&progress);
    let options = TransferOptions::new()
        .resize(true)
        .on_progress(move |count, _| seen.store(count, Ordering::SeqCst));
    client.uplink("camera.image", &data, options).unwrap();
    assert_eq!(progress.load(Ordering::SeqCst), 1024);

    let back = client
        .downlink("camera.image", TransferOptions::new())
        .unwrap();
    assert_eq!(back, data);

    let tail = client
        .downlink("camera.image", TransferOptions::new().first_row(60).last_row(63))
        .unwrap();
    assert_eq!(tail, data[960..]);
}

#[test]
fn lost_packets_fail_the_transfer() {
    let (client, engine) = setup(SimConfig {
        loss: 1.0,
        seed: Some(42),
        ..SimConfig::default()
    });
    let err = client
        .uplink("camera.image", &[0u8; 64], TransferOptions::new().max_retries(2))
        .unwrap_err();
    assert!(matches!(err, TmtcError::Transfer { .. }));
    assert_eq!(
        exception_name(&err).as_deref(),
        Some("platform.core.transfer_failed")
    );
    assert!(engine.rows(771).unwrap().is_empty());
}

#[test]
fn scripted_session_runs_clean() {
    let (client, _) = setup(SimConfig::default());
    assert_eq!(operator::run(&client), 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn exposure_round_trips(exposure in any::<u16>()) {
        let (client, _) = setup(SimConfig::default());
        client.set("camera.exposure", exposure, 0, false, None).unwrap();
        prop_assert_eq!(
            client.get("camera.exposure", Rows::single(0), false, None).unwrap(),
            Value::Unsigned(u64::from(exposure))
        );
    }
}
