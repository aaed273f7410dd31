use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use location_sense_rs::config::{PipelineConfig, ProvidersConfig};
use location_sense_rs::geocode::{
    CoordinateFallback, GeocodeEngine, GeocodeEvent, NominatimProvider, PoiMatchProvider,
    ProviderChain, ResultSource,
};
use location_sense_rs::live_status::{current_timestamp, LiveStatus};
use location_sense_rs::power::{PowerEvent, PowerModeController, SysfsBattery};
use location_sense_rs::sensors;
use location_sense_rs::types::{AddressData, GpsFix};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "location_sense")]
#[command(
    about = "Replay a GPS track through the adaptive power / reverse-geocoding pipeline",
    long_about = None
)]
struct Args {
    /// Recorded track (JSON array of fixes)
    #[arg(long, value_name = "FILE")]
    track: PathBuf,

    /// Pipeline config (JSON); defaults apply when omitted
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Replay speed multiplier applied to the sampling interval
    #[arg(long, default_value = "10")]
    speedup: f64,

    /// Write a live status snapshot here every 2 seconds
    #[arg(long, value_name = "FILE")]
    status_file: Option<PathBuf>,

    /// Skip network providers, resolve to coordinates only
    #[arg(long)]
    offline: bool,

    /// Battery under /sys/class/power_supply
    #[arg(long, default_value = "BAT0")]
    battery: String,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

/// Last values seen on the geocode event stream
#[derive(Default)]
struct GeocodeView {
    address: Option<AddressData>,
    error: Option<String>,
}

fn build_chain(providers: &ProvidersConfig, offline: bool) -> ProviderChain {
    let mut chain = ProviderChain::new();
    if !offline {
        if let Some(url) = providers.poi_proxy_url.as_deref() {
            chain.push(Arc::new(PoiMatchProvider::new(url, providers)));
        }
        chain.push(Arc::new(NominatimProvider::new(providers)));
    }
    chain.push(Arc::new(CoordinateFallback));
    chain
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    let track = sensors::load_track(&args.track)
        .with_context(|| format!("loading track {}", args.track.display()))?;

    println!("[{}] Location Sense Starting", ts_now());
    println!("  Track: {} ({} fixes)", args.track.display(), track.len());
    println!("  Speedup: {}x", args.speedup);
    println!("  Offline: {}", args.offline);

    let controller = PowerModeController::new(
        config.power.clone(),
        Arc::new(SysfsBattery::new(&args.battery)),
    );
    let _mode_sub = controller.add_listener(|event| {
        let PowerEvent::ModeChanged {
            old_mode,
            new_mode,
            config,
        } = event;
        println!(
            "[{}] Mode {} -> {} (interval {} ms, high accuracy {})",
            ts_now(),
            old_mode,
            new_mode,
            config.interval_ms,
            config.high_accuracy
        );
    });

    let engine = GeocodeEngine::new(
        config.geocode.clone(),
        build_chain(&config.providers, args.offline),
    );
    println!("  Providers: {}", engine.provider_names().join(" -> "));

    let view = Arc::new(Mutex::new(GeocodeView::default()));
    let view_sink = view.clone();
    let _geocode_sub = engine.subscribe(move |event| match event {
        GeocodeEvent::Result {
            position,
            data,
            source,
        } => {
            let tag = match source {
                ResultSource::Cache => "cache",
                ResultSource::Api => "api",
                ResultSource::Fallback => "fallback",
            };
            println!(
                "[{}] {} -> {}, {} ({})",
                ts_now(),
                position,
                data.address,
                data.city,
                tag
            );
            if let Ok(mut view) = view_sink.lock() {
                view.address = Some(data.clone());
                view.error = None;
            }
        }
        GeocodeEvent::Error { position, error } => {
            println!("[{}] {} -> {}", ts_now(), position, error);
            if let Ok(mut view) = view_sink.lock() {
                view.error = Some(error.clone());
            }
        }
        GeocodeEvent::Started { .. } | GeocodeEvent::Finished { .. } => {}
    });

    let (gps_tx, mut gps_rx) = mpsc::channel::<GpsFix>(100);
    let _gps_handle = tokio::spawn(sensors::gps_replay_loop(
        track,
        gps_tx,
        controller.clone(),
        args.speedup,
    ));

    let start = Utc::now();
    let mut last_status_update = Utc::now();
    let mut status = LiveStatus::new(controller.current_mode(), controller.current_config());

    while let Some(fix) = gps_rx.recv().await {
        status.gps_fixes += 1;

        let position = match fix.position() {
            Ok(position) => position,
            Err(e) => {
                log::warn!("[gps] skipping fix at t={}: {}", fix.timestamp, e);
                status.invalid_fixes += 1;
                continue;
            }
        };
        status.last_position = Some(position);

        engine.reverse_geocode(position, fix.speed, false).await;

        let now = Utc::now();
        if now.signed_duration_since(last_status_update).num_seconds() >= 2 {
            write_status(
                args.status_file.as_deref(),
                &mut status,
                &controller,
                &engine,
                &view,
                start,
            )
            .await;
            last_status_update = now;
        }
    }

    // A trailing lookup may still be armed or running
    if !engine.wait_idle(Duration::from_secs(20)).await {
        log::warn!("[geocode] lookups still running at exit");
    }

    write_status(
        args.status_file.as_deref(),
        &mut status,
        &controller,
        &engine,
        &view,
        start,
    )
    .await;
    controller.shutdown();

    let stats = engine.stats();
    println!("\n=== Final Stats ===");
    println!("GPS fixes: {} ({} invalid)", status.gps_fixes, status.invalid_fixes);
    println!("Lookups: {}", stats.lookups);
    println!("Cache hits: {}", stats.cache_hits);
    println!("Dropped (distance): {}", stats.dropped_distance);
    println!("Deferred: {}", stats.scheduled);
    println!(
        "Results: {} api, {} fallback, {} errors",
        stats.api_results, stats.fallback_results, stats.errors
    );
    if let Some(position) = engine.last_position() {
        println!("Last resolved position: {}", position);
    }

    Ok(())
}

async fn write_status(
    path: Option<&Path>,
    status: &mut LiveStatus,
    controller: &PowerModeController,
    engine: &GeocodeEngine,
    view: &Arc<Mutex<GeocodeView>>,
    start: chrono::DateTime<Utc>,
) {
    status.timestamp = current_timestamp();
    status.uptime_seconds = Utc::now().signed_duration_since(start).num_seconds().max(0) as u64;
    let inputs = controller.inputs();
    status.mode = controller.current_mode();
    status.visible = inputs.visible;
    status.idle_seconds = inputs.last_activity_age.as_secs();
    status.sampling = controller.adaptive_config().await;
    status.geocode = engine.stats();
    status.cache_entries = engine.cache_len();
    status.pending_lookup = engine.has_pending();
    if let Ok(view) = view.lock() {
        status.last_address = view.address.clone();
        status.last_error = view.error.clone();
    }

    if let Some(path) = path {
        save_status(status, path);
    }
}

fn save_status(status: &LiveStatus, path: &Path) {
    if let Err(e) = status.save(path) {
        log::warn!("[status] failed to write {}: {}", path.display(), e);
    }
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
