//! Standalone fan scheduling
//!
//! Decides whether the supply fan should run when the zone has no heat or
//! cool call: always-on, follow occupied hours, or a recirculation duty
//! cycle driven by the last on/off timestamps in history.

use chrono::{DateTime, Datelike, Duration, Local};

use crate::backend::Backend;
use crate::error::Result;
use crate::model::{FanMode, ZoneConfig};

/// Whether the zone is inside its occupied window right now
pub fn is_occupied(zone: &ZoneConfig, now: DateTime<Local>) -> bool {
    zone.occupied_hours
        .for_weekday(now.weekday())
        .is_some_and(|window| window.contains(now.time()))
}

/// Desired fan state for a zone with no active heat/cool staging
pub async fn evaluate(
    zone: &ZoneConfig,
    fan_running: bool,
    backend: &dyn Backend,
    now: DateTime<Local>,
) -> Result<bool> {
    match zone.fan.mode {
        FanMode::On => Ok(true),
        FanMode::OccupiedHours => Ok(is_occupied(zone, now)),
        FanMode::Recirculation => {
            if fan_running {
                // run for minutes_on, then rest
                let last_on = backend.fan_last_on(zone.unit_id).await?;
                match last_on {
                    Some(on) if now - on < Duration::minutes(zone.fan.minutes_on) => Ok(true),
                    _ => Ok(false),
                }
            } else {
                // rest for the remainder of the refresh period
                let rest = zone.fan.refresh_period - zone.fan.minutes_on;
                let last_off = backend.fan_last_off(zone.unit_id).await?;
                match last_off {
                    Some(off) if now - off >= Duration::minutes(rest) => Ok(true),
                    // no history yet, start a cycle
                    None => Ok(true),
                    _ => Ok(false),
                }
            }
        }
        FanMode::Off => Ok(false),
    }
}
