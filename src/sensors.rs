use crate::error::{LocationSenseError, Result};
use crate::power::PowerModeController;
use crate::types::GpsFix;
use std::fs;
use std::path::Path;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tokio::time::{sleep, Duration};

/// Load a recorded track: a JSON array of
/// `{ "timestamp", "latitude", "longitude", "speed"?, "accuracy"? }`.
pub fn load_track(path: &Path) -> Result<Vec<GpsFix>> {
    let json = fs::read_to_string(path)?;
    parse_track(&json)
}

pub fn parse_track(json: &str) -> Result<Vec<GpsFix>> {
    let track: Vec<GpsFix> =
        serde_json::from_str(json).map_err(|e| LocationSenseError::Track(e.to_string()))?;
    if track.is_empty() {
        return Err(LocationSenseError::Track("no fixes".to_string()));
    }
    Ok(track)
}

/// Feed a recorded track into `tx`, one fix per sampling interval.
///
/// The pause between fixes follows the controller's battery-adjusted
/// sampling interval, divided by `speedup`. Fixes are passed through
/// unvalidated; the consumer decides what to do with bad coordinates.
pub async fn gps_replay_loop(
    track: Vec<GpsFix>,
    tx: Sender<GpsFix>,
    controller: PowerModeController,
    speedup: f64,
) {
    let speedup = if speedup.is_finite() && speedup > 0.0 {
        speedup
    } else {
        1.0
    };
    let total = track.len();
    let mut sent = 0u64;

    for (i, fix) in track.into_iter().enumerate() {
        if i > 0 {
            let config = controller.adaptive_config().await;
            sleep(Duration::from_secs_f64(config.interval().as_secs_f64() / speedup)).await;
        }

        match tx.try_send(fix) {
            Ok(_) => {
                sent += 1;
                log::debug!("[gps] fix {}/{}", sent, total);
            }
            Err(TrySendError::Closed(_)) => {
                log::info!("[gps] Channel closed after {} fixes", sent);
                return;
            }
            Err(TrySendError::Full(_)) => {
                // Consumer is behind, drop this fix
                log::debug!("[gps] channel full, dropping fix {}", i);
            }
        }
    }

    log::info!("[gps] Replay complete: {} of {} fixes", sent, total);
}
