//! Facility purge
//!
//! Scheduled fresh-air flushes: inside a configured weekday purge window
//! the supply fan is forced on for zones that are idle, and released once
//! the window passes. Zones whose fan already follows occupied hours are
//! left alone.

use chrono::{DateTime, Datelike, Duration, Local};
use tracing::info;

use crate::model::{FanMode, UnitSnapshot, ZoneConfig};
use crate::relay::Stage;
use crate::state::ZoneRuntime;

/// Whether `now` falls inside today's purge window for this zone
fn in_purge_window(zone: &ZoneConfig, now: DateTime<Local>) -> bool {
    let Some(start) = zone.purge.start_for_weekday(now.weekday()) else {
        return false;
    };
    let time = now.time();
    let end = start + Duration::minutes(zone.purge.run_time_minutes);
    start <= time && time < end
}

/// Returns the stage to command, if the purge wants a change
pub fn evaluate(
    zone: &ZoneConfig,
    snapshot: &UnitSnapshot,
    runtime: &mut ZoneRuntime,
    now: DateTime<Local>,
) -> Option<Stage> {
    let Some(stage) = snapshot.stage(zone.relay_variant()) else {
        return None;
    };
    // never interrupt active heating or cooling, and zones whose fan
    // already follows occupancy handle their own fresh air
    if stage.is_running() || zone.fan.mode == FanMode::OccupiedHours {
        return None;
    }

    if in_purge_window(zone, now) {
        if stage == Stage::Off && !runtime.purge_selected {
            info!("unit {}: purge window open, forcing fan on", zone.unit_id);
            runtime.purge_selected = true;
            return Some(Stage::FanOn);
        }
        runtime.purge_selected = true;
        None
    } else if runtime.purge_selected {
        runtime.purge_selected = false;
        if stage == Stage::FanOn {
            info!("unit {}: purge window closed, releasing fan", zone.unit_id);
            return Some(Stage::Off);
        }
        None
    } else {
        None
    }
}
