use std::sync::Arc;

use stream_daemon::controller::{self, PlaybackController};
use stream_daemon::interruption;
use stream_daemon::lease::LeaseManager;
use stream_daemon::mpv::MpvFactory;
use stream_daemon::socket::{self, Services};
use stream_proto::config::Config;
use stream_proto::offline::OfflineStore;
use stream_proto::schedule::ScheduleClient;
use tokio::sync::Notify;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let data_dir = stream_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,stream_daemon=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let playback = PlaybackController::new(
        Box::new(MpvFactory::new(config.mpv.clone())),
        LeaseManager::from_kind(config.leases.backend),
        config.catalog.live_url.clone(),
    );
    let (controller, interruptions, controller_task) = controller::spawn(playback);

    if let Some(fifo) = config.daemon.call_state_fifo.clone() {
        let _fifo_task = interruption::spawn_fifo_watcher(fifo, interruptions.clone());
    }

    let shutdown = Arc::new(Notify::new());
    let services = Services {
        controller: controller.clone(),
        interruptions,
        schedule: ScheduleClient::from_config(&config.catalog)?,
        offline: Arc::new(OfflineStore::new(config.catalog.offline_dir.clone())),
        shutdown: shutdown.clone(),
    };

    let listener = socket::bind(&config.daemon_address()).await?;
    let _socket_task = socket::serve(listener, services);

    info!("Daemon initialised");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
        _ = shutdown.notified() => info!("Shutdown requested"),
    }

    if let Err(e) = controller.shutdown().await {
        warn!("Controller shutdown: {}", e);
    }
    if let Err(e) = controller_task.await {
        warn!("Controller task ended abnormally: {}", e);
    }
    info!("Daemon stopped");
    Ok(())
}
