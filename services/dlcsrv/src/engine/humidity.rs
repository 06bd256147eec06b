//! Dehumidification control
//!
//! Zones with a humidity sensor can swap cooling stages for their reheat
//! variants when humidity climbs past the target, and swap back once it
//! recovers with the room temperature satisfied. Overlong dehumidify runs
//! and a reheat coil that fails to warm the supply raise alerts.

use chrono::{DateTime, Duration, Local};
use tracing::{info, warn};

use crate::backend::Backend;
use crate::error::Result;
use crate::model::{Alert, SystemData, UnitSnapshot, ZoneConfig};
use crate::relay::Stage;
use crate::state::ZoneRuntime;

pub const WARNING_HUMIDITY_RUN: u16 = 15;
pub const WARNING_REHEAT_FAILURE: u16 = 16;

/// Supply this cold during reheat means the reheat coil is not working
const REHEAT_SUPPLY_LIMIT: f64 = 65.0;

pub async fn evaluate(
    zone: &ZoneConfig,
    snapshot: &UnitSnapshot,
    runtime: &mut ZoneRuntime,
    system: &SystemData,
    backend: &dyn Backend,
    now: DateTime<Local>,
) -> Result<Option<Stage>> {
    if !zone.humidity.enabled {
        return Ok(None);
    }
    let Some(humidity) = snapshot.humidity else {
        return Ok(None);
    };
    let Some(stage) = snapshot.stage(zone.relay_variant()) else {
        return Ok(None);
    };

    let policy = &zone.humidity;
    let satisfied = snapshot.current_temp < snapshot.set_temp - system.hysteresis;

    if humidity > policy.target {
        match stage {
            Stage::CoolH | Stage::Cool2H => {
                let mut alerted = false;
                if let Some(run_start) =
                    backend.status_run_start(zone.unit_id, stage.label()).await?
                {
                    if now - run_start > Duration::minutes(policy.run_time_minutes) {
                        warn!(
                            "unit {}: dehumidify running {} min without reaching target",
                            zone.unit_id,
                            (now - run_start).num_minutes()
                        );
                        backend
                            .post_alert(&Alert {
                                unit_id: zone.unit_id,
                                warning_code: WARNING_HUMIDITY_RUN,
                                message: format!(
                                    "Unit {} dehumidify run exceeded {} minutes at {:.1}% humidity",
                                    zone.unit_id, policy.run_time_minutes, humidity
                                ),
                            })
                            .await?;
                        alerted = true;
                    }
                }
                if snapshot.supply_temp < REHEAT_SUPPLY_LIMIT {
                    warn!(
                        "unit {}: supply {:.1} during reheat, coil failure suspected",
                        zone.unit_id, snapshot.supply_temp
                    );
                    backend
                        .post_alert(&Alert {
                            unit_id: zone.unit_id,
                            warning_code: WARNING_REHEAT_FAILURE,
                            message: format!(
                                "Unit {} reheat failure: supply {:.1} while dehumidifying",
                                zone.unit_id, snapshot.supply_temp
                            ),
                        })
                        .await?;
                    alerted = true;
                }
                if alerted && satisfied {
                    runtime.humidity_selected = false;
                    return Ok(Some(Stage::FanOn));
                }
                Ok(None)
            }
            Stage::Cool1 if humidity > policy.target + policy.tolerance => {
                info!(
                    "unit {}: humidity {:.1}% over target, selecting dehumidify stage 1",
                    zone.unit_id, humidity
                );
                runtime.humidity_selected = true;
                Ok(Some(Stage::CoolH))
            }
            Stage::Cool2 if humidity > policy.target + policy.tolerance => {
                info!(
                    "unit {}: humidity {:.1}% over target, selecting dehumidify stage 2",
                    zone.unit_id, humidity
                );
                runtime.humidity_selected = true;
                Ok(Some(Stage::Cool2H))
            }
            _ => Ok(None),
        }
    } else if humidity < policy.target - policy.tolerance && satisfied {
        match stage {
            Stage::CoolH => {
                runtime.humidity_selected = false;
                Ok(Some(Stage::Cool1))
            }
            Stage::Cool2H => {
                runtime.humidity_selected = false;
                Ok(Some(Stage::Cool2))
            }
            _ => Ok(None),
        }
    } else {
        Ok(None)
    }
}
