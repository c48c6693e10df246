use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use gstreamer::glib;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vigil::bus::{MessageBus, MqttBus};
use vigil::config::AppConfig;
use vigil::event::EventOrchestrator;
use vigil::service::CameraService;
use vigil::store::EventStore;

const SIGINT: i32 = 2;
const SIGTERM: i32 = 15;

#[derive(Parser)]
#[command(name = "vigil", version = vigil::VERSION)]
#[command(about = "Security camera detection service: capture, detect, record, publish")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "vigil.toml")]
    config: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vigil=info,warn")),
        )
        .compact()
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_toml_file(&cli.config).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    info!("Starting vigil v{}", vigil::VERSION);
    info!("Config: {}", cli.config.display());

    vigil::capture::ensure_gst()?;

    let mut service = CameraService::new(&config);
    service.load_detection_model(&config);
    let service = Arc::new(service);

    let store = match EventStore::open(&config.database.path) {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            error!(
                "Failed to open store at '{}': {} (events will not be persisted)",
                config.database.path.display(),
                e
            );
            None
        }
    };

    let bus = Arc::new(MqttBus::connect(&config.mqtt)?);
    if !bus.wait_connected(Duration::from_secs(10)) {
        warn!("MQTT broker not reachable yet, continuing with auto-reconnect");
    }

    service.start_all();

    let status_topic = format!("{}/status", bus.prefix());
    bus.publish(&status_topic, "online", 1, true);

    let orchestrator = Arc::new(EventOrchestrator::new(
        Arc::clone(&service),
        Arc::clone(&bus) as Arc<dyn MessageBus>,
        store,
        config.clone(),
    ));
    EventOrchestrator::start(&orchestrator);

    info!("Cameras: {}", service.camera_ids().len());

    // Periodic health line; the HTTP surface reads the same snapshot.
    let health_service = Arc::clone(&service);
    let health_bus = Arc::clone(&bus);
    glib::timeout_add_seconds(60, move || {
        let snapshot = vigil::health::snapshot(&health_service, health_bus.as_ref());
        let connected = snapshot.cameras.iter().filter(|c| c.connected).count();
        info!(
            "Health: {} ({}/{} cameras connected, bus {})",
            snapshot.status,
            connected,
            snapshot.cameras.len(),
            if snapshot.bus_connected { "up" } else { "down" }
        );
        glib::ControlFlow::Continue
    });

    // Block until SIGINT/SIGTERM.
    let main_loop = glib::MainLoop::new(None, false);
    for signal in [SIGINT, SIGTERM] {
        let quit_loop = main_loop.clone();
        glib::unix_signal_add(signal, move || {
            info!("Received signal {}, shutting down...", signal);
            quit_loop.quit();
            glib::ControlFlow::Break
        });
    }
    main_loop.run();

    info!("Shutting down...");
    orchestrator.stop();
    service.stop_all();
    bus.shutdown();
    info!("Shutdown complete");

    Ok(())
}
