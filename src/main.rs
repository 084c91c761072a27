use anyhow::Context;
use clap::Parser;
use printsentry::{
    acoustic::{ClassifierGate, HitCorrelator, HitLog, LogisticClassifier},
    cli::{Cli, Commands},
    config::MonitorConfig,
    create_remote,
    pipeline::{
        run_motion_worker, run_snapshot_saver, run_status_reporter, AcousticWorker,
        SNAPSHOT_INTERVAL, STATUS_INTERVAL,
    },
    telemetry::{self, TelemetryBroadcaster},
    DetectorChannel, OctoPrintController, PrintJobController, RemoteTail, TailTarget,
    TelemetryState,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const LINE_CHANNEL_CAPACITY: usize = 1024;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "printsentry=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Watch { addr }) => watch(&addr).await,
        Some(Commands::Serve { bind }) => serve(bind).await,
        None => serve(None).await,
    }
}

async fn watch(addr: &str) -> anyhow::Result<()> {
    let cancel = shutdown_on_ctrl_c();
    let frames = telemetry::watch(addr, cancel).await?;
    info!("Received {} frames", frames);
    Ok(())
}

async fn serve(bind: Option<String>) -> anyhow::Result<()> {
    let config = MonitorConfig::from_env().context("failed to load configuration")?;
    let bind_addr = bind.unwrap_or_else(|| config.telemetry_bind_addr.clone());

    info!("Starting PrintSentry v{}", env!("CARGO_PKG_VERSION"));

    let model = LogisticClassifier::load(&config.model_path).context("failed to load classifier")?;
    let gate = ClassifierGate::new(Box::new(model));

    let controller: Arc<dyn PrintJobController> = Arc::new(OctoPrintController::new(
        config.octoprint_url.clone(),
        config.octoprint_api_key.clone(),
    )?);
    match controller.current_state().await {
        Ok(state) => info!("Printer state: {}", state),
        Err(e) => warn!("Printer state unavailable: {}", e),
    }

    let state = Arc::new(
        TelemetryState::new(config.trajectory_retention)
            .with_threshold(
                DetectorChannel::Acoustic,
                config.threshold_for(DetectorChannel::Acoustic),
            )
            .with_threshold(
                DetectorChannel::Visual,
                config.threshold_for(DetectorChannel::Visual),
            ),
    );

    let remote = create_remote(&config);
    info!("Remote: {}", remote.describe());

    let listener = TelemetryBroadcaster::bind(&bind_addr).await?;
    let cancel = shutdown_on_ctrl_c();
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    // Motion: tail -> parser -> trajectory
    let (motion_tx, motion_rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
    let motion_tail = RemoteTail::new(
        "motion",
        remote.clone(),
        TailTarget::File(config.motion_log_path.clone()),
    );
    tasks.push(tokio::spawn(motion_tail.run(motion_tx, cancel.clone())));
    {
        let state = state.clone();
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            run_motion_worker(motion_rx, state, cancel).await;
        }));
    }

    // Acoustic: device stream -> correlator -> classifier -> streak/pause
    let (device_tx, device_rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
    let device_tail = RemoteTail::new(
        "acoustic",
        remote.clone(),
        TailTarget::Process(config.acquisition_command.clone()),
    );
    tasks.push(tokio::spawn(device_tail.run(device_tx, cancel.clone())));
    {
        let worker = AcousticWorker::new(state.clone(), gate, controller.clone())
            .with_correlator(HitCorrelator::new().with_capacity_limit(config.pending_retention))
            .with_hit_log(HitLog::new(config.hit_log_path.clone()));
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            worker.run(device_rx, cancel).await;
        }));
    }

    // Telemetry fan-out
    {
        let broadcaster = TelemetryBroadcaster::new(state.clone());
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            broadcaster.serve(listener, cancel).await;
        }));
    }

    // Maintenance
    if let Some(path) = config.snapshot_path.clone() {
        tasks.push(tokio::spawn(run_snapshot_saver(
            state.clone(),
            path,
            SNAPSHOT_INTERVAL,
            cancel.clone(),
        )));
    }
    tasks.push(tokio::spawn(run_status_reporter(
        state.clone(),
        STATUS_INTERVAL,
        cancel.clone(),
    )));

    info!("✅ Monitor running, telemetry on {}", bind_addr);

    cancel.cancelled().await;
    info!("Shutting down...");

    let joined = tokio::time::timeout(SHUTDOWN_GRACE, futures::future::join_all(tasks)).await;
    match joined {
        Ok(results) => {
            for result in results {
                if let Err(e) = result {
                    error!("Worker panicked: {}", e);
                }
            }
        }
        Err(_) => warn!("Workers did not stop within {}s", SHUTDOWN_GRACE.as_secs()),
    }

    let stats = state.stats();
    info!(
        "Stopped: {} samples, {} defect markers",
        stats.samples, stats.markers
    );
    Ok(())
}

fn shutdown_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C");
                token.cancel();
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });
    cancel
}
