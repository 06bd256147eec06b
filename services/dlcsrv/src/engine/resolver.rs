//! Zone setpoint resolution
//!
//! An ordered rule table decides where each zone's setpoint comes from,
//! first match wins: manual override, keypad hold, calendar event,
//! holiday, schedule block, pre-peak precool, peak window, occupied
//! preheat/precool, occupied hours, unoccupied. Temperature alarms
//! short-circuit the resolved setpoint without disturbing the tag.

use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, NaiveTime};
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::error::Result;
use crate::model::{
    Alert, Mode, OverrideType, PeakSchedule, Resolution, SystemData, UnitSnapshot, ZoneConfig,
};
use crate::state::ZoneRuntime;

pub const WARNING_SPACE_COLD: u16 = 9;
pub const WARNING_SPACE_WARM: u16 = 10;

fn local_dt(date: NaiveDate, time: NaiveTime) -> Option<DateTime<Local>> {
    date.and_time(time).and_local_timezone(Local).earliest()
}

/// Whether the zone's call is for cooling. Auto zones follow the last
/// arbitrated direction and default to cooling.
fn cooling_call(zone: &ZoneConfig, runtime: &ZoneRuntime) -> bool {
    match zone.mode {
        Mode::Cool => true,
        Mode::Heat => false,
        Mode::Auto => runtime.last_resolved_mode != Some(Mode::Heat),
        Mode::Off | Mode::Vent => true,
    }
}

/// Earliest occupied or scheduled start at or after `now`, scanning a week out
fn next_occupied_start(zone: &ZoneConfig, now: DateTime<Local>) -> Option<DateTime<Local>> {
    for offset in 0..=7i64 {
        let date = now.date_naive() + Duration::days(offset);
        let weekday = date.weekday();
        let mut starts: Vec<NaiveTime> = Vec::new();
        if let Some(window) = zone.occupied_hours.for_weekday(weekday) {
            starts.push(window.start);
        }
        for block in &zone.schedule_blocks {
            if block.matches_weekday(weekday) {
                starts.push(block.window.start);
            }
        }
        starts.sort();
        for start in starts {
            if let Some(candidate) = local_dt(date, start) {
                if candidate >= now {
                    return Some(candidate);
                }
            }
        }
    }
    None
}

/// Keypad change detection: a device setpoint that moved since the last
/// cycle without the engine commanding it starts a keypad hold.
fn track_keypad(
    zone: &ZoneConfig,
    snapshot: &UnitSnapshot,
    runtime: &mut ZoneRuntime,
    system: &SystemData,
    now: DateTime<Local>,
) {
    if !zone.keypad_adjust.enabled {
        runtime.keypad.clear();
        return;
    }
    if let Some(previous) = runtime.last_device_setpoint {
        if (snapshot.set_temp - previous).abs() >= 0.5 {
            let mut adjusted = snapshot.set_temp;
            if let Some(min) = zone.keypad_adjust.min_setpoint {
                adjusted = adjusted.max(min);
            }
            if let Some(max) = zone.keypad_adjust.max_setpoint {
                adjusted = adjusted.min(max);
            }
            info!(
                "unit {}: keypad adjust to {:.1}, holding {} hours",
                zone.unit_id, adjusted, system.keypad_override_hours
            );
            runtime.keypad.set_temp = Some(adjusted);
            runtime.keypad.end_time =
                Some(now + Duration::hours(system.keypad_override_hours));
        }
    }
    if !runtime.keypad.active(now) {
        runtime.keypad.clear();
    }
}

fn resolve_rules(
    zone: &ZoneConfig,
    runtime: &mut ZoneRuntime,
    peak: &PeakSchedule,
    now: DateTime<Local>,
) -> Resolution {
    let today = now.date_naive();
    let time = now.time();
    let cooling = cooling_call(zone, runtime);

    // M: manual override from the backend
    if let Some(manual) = &zone.manual_override {
        if now < manual.end_time {
            return Resolution {
                set_temp: manual.set_temp,
                override_type: OverrideType::M,
                expire_time: Some(manual.end_time),
            };
        }
    }

    // K: keypad hold
    if runtime.keypad.active(now) {
        if let Some(set_temp) = runtime.keypad.set_temp {
            return Resolution {
                set_temp,
                override_type: OverrideType::K,
                expire_time: runtime.keypad.end_time,
            };
        }
    }

    // E: calendar event in its window today
    for event in &zone.calendar_events {
        if event.date == today && event.window.contains(time) {
            return Resolution {
                set_temp: event.set_temp,
                override_type: OverrideType::E,
                expire_time: local_dt(today, event.window.end),
            };
        }
    }

    // H: holiday, treat as unoccupied all day
    if zone.holidays.contains(&today) {
        let set_temp = if cooling {
            zone.setpoints.unocc_cool_ideal
        } else {
            zone.setpoints.unocc_heat_ideal
        };
        return Resolution {
            set_temp,
            override_type: OverrideType::H,
            expire_time: None,
        };
    }

    // S: recurring schedule block
    for block in &zone.schedule_blocks {
        if block.matches_weekday(now.weekday()) && block.window.contains(time) {
            return Resolution {
                set_temp: block.set_temp,
                override_type: OverrideType::S,
                expire_time: local_dt(today, block.window.end),
            };
        }
    }

    // PPC: precool lead-up to a peak window
    if peak.in_precool(now, zone.peak_precool_minutes) {
        return Resolution {
            set_temp: zone.setpoints.occ_cool_ideal,
            override_type: OverrideType::Ppc,
            expire_time: None,
        };
    }

    // P: inside a peak window, coast at the high setpoint
    if peak.in_peak(now) {
        return Resolution {
            set_temp: zone.setpoints.occ_cool_high,
            override_type: OverrideType::P,
            expire_time: None,
        };
    }

    let occ_window = zone.occupied_hours.for_weekday(now.weekday());

    // OPH / OPC: lead-up to today's occupied start
    if let Some(window) = occ_window {
        if time < window.start {
            let occ_start = local_dt(today, window.start);
            if !cooling && time >= window.start - Duration::minutes(zone.preheat_time_minutes)
            {
                return Resolution {
                    set_temp: zone.setpoints.occ_heat_ideal,
                    override_type: OverrideType::Oph,
                    expire_time: occ_start,
                };
            }
            if cooling && time >= window.start - Duration::minutes(zone.precool_time_minutes) {
                return Resolution {
                    set_temp: zone.setpoints.occ_cool_ideal,
                    override_type: OverrideType::Opc,
                    expire_time: occ_start,
                };
            }
        }

        // OCC: inside occupied hours
        if window.contains(time) {
            let set_temp = if cooling {
                if runtime.demand.check(now) {
                    zone.setpoints.occ_cool_high
                } else {
                    zone.setpoints.occ_cool_ideal
                }
            } else {
                zone.setpoints.occ_heat_ideal
            };
            return Resolution {
                set_temp,
                override_type: OverrideType::Occ,
                expire_time: local_dt(today, window.end),
            };
        }
    }

    // UNO: unoccupied until the next occupied or scheduled start
    let set_temp = if cooling {
        zone.setpoints.unocc_cool_ideal
    } else {
        zone.setpoints.unocc_heat_ideal
    };
    Resolution {
        set_temp,
        override_type: OverrideType::Uno,
        expire_time: next_occupied_start(zone, now),
    }
}

pub async fn resolve(
    zone: &ZoneConfig,
    snapshot: &UnitSnapshot,
    runtime: &mut ZoneRuntime,
    system: &SystemData,
    peak: &PeakSchedule,
    backend: &dyn Backend,
    now: DateTime<Local>,
) -> Result<Resolution> {
    track_keypad(zone, snapshot, runtime, system, now);

    let mut resolution = resolve_rules(zone, runtime, peak, now);

    // temperature alarms force the setpoint regardless of the tag
    if snapshot.current_temp < zone.alarms.cold_alarm
        && matches!(zone.mode, Mode::Auto | Mode::Heat)
    {
        warn!(
            "unit {}: {:.1} below cold alarm {:.1}, forcing heat setpoint",
            zone.unit_id, snapshot.current_temp, zone.alarms.cold_alarm
        );
        backend
            .post_alert(&Alert {
                unit_id: zone.unit_id,
                warning_code: WARNING_SPACE_COLD,
                message: format!(
                    "Unit {} space temperature {:.1} below cold alarm {:.1}",
                    zone.unit_id, snapshot.current_temp, zone.alarms.cold_alarm
                ),
            })
            .await?;
        resolution.set_temp = zone.setpoints.occ_heat_ideal;
    } else if snapshot.current_temp > zone.alarms.warm_alarm
        && matches!(zone.mode, Mode::Auto | Mode::Cool)
    {
        warn!(
            "unit {}: {:.1} above warm alarm {:.1}, forcing cool setpoint",
            zone.unit_id, snapshot.current_temp, zone.alarms.warm_alarm
        );
        backend
            .post_alert(&Alert {
                unit_id: zone.unit_id,
                warning_code: WARNING_SPACE_WARM,
                message: format!(
                    "Unit {} space temperature {:.1} above warm alarm {:.1}",
                    zone.unit_id, snapshot.current_temp, zone.alarms.warm_alarm
                ),
            })
            .await?;
        resolution.set_temp = zone.setpoints.occ_cool_high;
    }

    // push to the backend only when the outcome changed
    let tag = resolution.override_type.as_str();
    if runtime.last_persisted != Some((resolution.set_temp, tag)) {
        debug!(
            "unit {}: resolved {} at {:.1}",
            zone.unit_id, tag, resolution.set_temp
        );
        backend
            .persist_override(zone.unit_id, resolution.set_temp, tag)
            .await?;
        runtime.last_persisted = Some((resolution.set_temp, tag));
    }

    runtime.last_device_setpoint = Some(snapshot.set_temp);
    Ok(resolution)
}
