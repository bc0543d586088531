//! ==============================================================================
//! main.rs - e4 transmitter host entry point
//! ==============================================================================
//!
//! purpose:
//!     a host daemon that samples the device's position and battery state on
//!     a fixed period and ships one record per cycle to a remote record
//!     store. the live loop snapshot is served over a small read-only
//!     status surface.
//!
//! responsibilities:
//!     - load configuration (config/e4.toml, defaults otherwise)
//!     - generate the process-scoped device identity
//!     - resolve the position permission once, before the loop may start
//!     - run the sample-and-transmit loop (transmitter.rs)
//!     - serve the status surface (snapshot as html and json)
//!
//! architecture:
//!
//!     ┌──────────────────────────────────────────────────────────┐
//!     │                   host (this binary)                     │
//!     │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐  │
//!     │  │ transmit loop│   │ status server│   │ sensors      │  │
//!     │  │ (300s cycle) │──>│ (snapshot)   │   │ (gps+battery)│  │
//!     │  └──────┬───────┘   └──────────────┘   └──────┬───────┘  │
//!     │         │          shared LoopState           │          │
//!     │         └───────────────────┬─────────────────┘          │
//!     └─────────────────────────────┼────────────────────────────┘
//!                                   │ one json record per cycle
//!                                   ▼
//!                          remote record store
//!
//! ==============================================================================

mod config;
mod domain;
mod identity;
#[cfg_attr(not(feature = "hardware"), allow(dead_code))]
mod nmea;
mod sensors;
mod store;
mod transmitter;

use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::State,
    response::{Html, Json},
    routing::get,
    Router,
};
use tower_http::cors::CorsLayer;

use crate::identity::DeviceIdentity;
use crate::sensors::SensorSource;
use crate::store::RecordSink;
use crate::transmitter::Transmitter;

// ==============================================================================
// main entry point
// ==============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    println!("===========================================================");
    println!("  E4 Transmitter Host");
    println!("===========================================================");

    // step 1: load configuration
    let config = config::HostConfig::load_or_default();

    // log filter comes from the config file; RUST_LOG overrides it
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    config.print_summary();

    // step 2: device identity, generated once and cached for the process
    let identity = DeviceIdentity::generate();
    println!("[STARTUP] Device id: {}", identity.device_id);
    println!("[STARTUP] Device type: {}", identity.device_type);

    // step 3: sensors and the one-shot position permission
    let sensors = sensors::Sensors::new(&config.sensors);
    let position_granted = sensors.request_position_permission().await;
    if position_granted {
        println!("[STARTUP] ✓ Position permission granted");
    } else {
        eprintln!("[ERROR] Position permission denied - no records will be transmitted");
    }

    // step 4: record store client and the loop itself
    let store = store::TelemetryStore::new(&config.store)?;
    let transmitter = Transmitter::new(
        sensors,
        store,
        identity,
        Duration::from_secs(config.polling.interval_seconds),
        position_granted,
    );

    // step 5: status surface in the background
    let bind = format!("{}:{}", config.server.host, config.server.port);
    let web_transmitter = transmitter.clone();
    let web_bind = bind.clone();
    tokio::spawn(async move {
        println!("[STARTUP] ✓ Status surface live at http://{}", web_bind);
        if let Err(e) = run_server(web_transmitter, &web_bind).await {
            eprintln!("[ERROR] Status server error: {}", e);
        }
    });

    // step 6: start the loop (immediate first cycle, then one per period)
    if transmitter.start().await {
        println!(
            "[RUNTIME] Transmitting every {}s",
            config.polling.interval_seconds
        );
    }

    tokio::signal::ctrl_c().await?;
    transmitter.stop().await;
    println!("\n[RUNTIME] Shutting down");
    Ok(())
}

// ==============================================================================
// status surface
// ==============================================================================
// read-only consumer of the loop snapshot. nothing here writes LoopState.

async fn run_server<S, K>(transmitter: Transmitter<S, K>, bind: &str) -> Result<()>
where
    S: SensorSource,
    K: RecordSink,
{
    let app = Router::new()
        .route("/", get(index_handler::<S, K>))
        .route("/api/status", get(status_handler::<S, K>))
        .layer(CorsLayer::permissive())
        .with_state(transmitter);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// json status endpoint: identity, loop snapshot, host stats
async fn status_handler<S, K>(
    State(transmitter): State<Transmitter<S, K>>,
) -> Json<serde_json::Value>
where
    S: SensorSource,
    K: RecordSink,
{
    let snapshot = transmitter.snapshot().await;

    let mut sys = sysinfo::System::new();
    sys.refresh_memory();

    Json(serde_json::json!({
        "device_id": transmitter.identity().device_id,
        "device_type": transmitter.identity().device_type,
        "interval_seconds": transmitter.period().as_secs(),
        "position_granted": transmitter.position_granted(),
        "active": transmitter.is_running().await,
        "loop": snapshot,
        "host": {
            "uptime_s": sysinfo::System::uptime(),
            "memory_used_bytes": sys.used_memory(),
            "memory_total_bytes": sys.total_memory(),
        },
    }))
}

/// minimal html view of the same snapshot
async fn index_handler<S, K>(State(transmitter): State<Transmitter<S, K>>) -> Html<String>
where
    S: SensorSource,
    K: RecordSink,
{
    let s = transmitter.snapshot().await;

    let position = match &s.last_reading {
        Some(r) => format!("{:.6}, {:.6}", r.latitude, r.longitude),
        None => "no position data".to_string(),
    };
    let battery = match &s.last_power {
        Some(p) => format!("{}%", (p.level_fraction * 100.0).round() as u8),
        None => "-".to_string(),
    };
    let last_error = s.last_transmission_error.as_deref().unwrap_or("none");

    Html(format!(
        r#"<!doctype html>
<html>
<head><title>e4 transmitter</title></head>
<body style="font-family: system-ui; padding: 2rem; background: #1a1a2e; color: #eee;">
    <h1 style="color: #00ff88;">E4 TRANSMITTER</h1>
    <p>phase: <b>{:?}</b> | cycles: {} | records sent: {}</p>
    <p>position: {} | battery: {}</p>
    <p style="color: #888;">last error: {}</p>
    <p style="color: #888;"><a href="/api/status" style="color: #00ff88;">/api/status</a> for json</p>
</body>
</html>"#,
        s.phase, s.poll_count, s.transmission_success_count, position, battery, last_error
    ))
}
