// src/main.rs
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use ground_control::TmtcClient;
use onboard_sim::{
    Cli, HousekeepingPlan, JsonDatabase, SimConnector, SimEngine, TelemetryRecorder, operator,
    read_deployment, spawn_housekeeping,
};
use tmtc_protocol::EntityModel;
use tokio::time::Duration;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const RECORDER_PERIOD: Duration = Duration::from_millis(100);

fn init_tracing(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::from_default_env()
        .add_directive("onboard_sim=info".parse()?)
        .add_directive("ground_control=info".parse()?)
        .add_directive("tmtc_protocol=info".parse()?)
        .add_directive("tokio=warn".parse()?);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "onboard_sim.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .with(file_layer)
        .init();
    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Cli::parse_and_build_config()?;
    let _guard = init_tracing(settings.log_dir.as_deref())?;
    info!(?settings, "onboard simulator starting");

    // -------- onboard side ----------
    let model = Arc::new(EntityModel::load(read_deployment(&settings.database)?)?);
    let engine = SimEngine::new(model, settings.sim.clone());
    let plan = HousekeepingPlan::resolve(&engine, &settings.sim.housekeeping)?;
    let housekeeping = spawn_housekeeping(engine.clone(), plan);

    // -------- ground side ----------
    let client = TmtcClient::new(
        settings.client.clone(),
        Box::new(SimConnector::new(engine.clone())),
    )?;
    client.load_model(&JsonDatabase, &settings.database)?;

    let recorder = settings.sim.telemetry_csv.clone().map(|path| {
        let recorder = TelemetryRecorder {
            events: client.event_queue().1,
            housekeeping: client.housekeeping_queue().1,
            debug: client.debug_queue().1,
        };
        tokio::spawn(recorder.run(path, RECORDER_PERIOD))
    });
    client.connect()?;

    let client = Arc::new(client);
    let failures = tokio::task::spawn_blocking({
        let client = Arc::clone(&client);
        move || operator::run(&client)
    })
    .await?;
    if failures > 0 {
        warn!(failures, "operator session finished with failures");
    } else {
        info!("operator session finished");
    }

    info!("simulator running. Press Ctrl+C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(?e, "failed to install Ctrl+C handler");
    }
    info!("shutdown signal received; exiting.");

    housekeeping.abort();
    // dropping the client closes its telemetry queues and ends the recorder
    drop(client);
    if let Some(task) = recorder {
        match task.await? {
            Ok(rows) => info!(rows, "telemetry recorded"),
            Err(e) => warn!(%e, "telemetry recorder failed"),
        }
    }
    Ok(())
}
