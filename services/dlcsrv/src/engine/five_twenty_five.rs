//! 5/25 compressor economizer rule
//!
//! A zone that has been cooling for 25 minutes with cold supply air and a
//! mild outside temperature rests its compressor for 5 minutes on fan
//! only, then resumes. Applies only to zones with the rule enabled and a
//! room temperature still at or above setpoint.

use chrono::{DateTime, Duration, Local};
use tracing::info;

use crate::backend::Backend;
use crate::error::Result;
use crate::model::{Mode, OutsideConditions, SystemData, UnitSnapshot, ZoneConfig};
use crate::relay::Stage;
use crate::state::ZoneRuntime;

/// Supply air must be below this for the rest to engage
const SUPPLY_LIMIT: f64 = 60.0;
const RUN_MINUTES: i64 = 25;
const REST_MINUTES: i64 = 5;

/// Returns the stage to switch to, if the rule wants a change
pub async fn evaluate(
    zone: &ZoneConfig,
    snapshot: &UnitSnapshot,
    runtime: &mut ZoneRuntime,
    outside: &OutsideConditions,
    system: &SystemData,
    backend: &dyn Backend,
    now: DateTime<Local>,
) -> Result<Option<Stage>> {
    if !zone.five_twenty_five_enabled {
        return Ok(None);
    }
    if snapshot.current_temp < snapshot.set_temp {
        return Ok(None);
    }
    let Some(stage) = snapshot.stage(zone.relay_variant()) else {
        return Ok(None);
    };
    let cooling_mode = matches!(zone.mode, Mode::Cool)
        || (zone.mode == Mode::Auto && runtime.last_resolved_mode == Some(Mode::Cool));

    match stage {
        Stage::FanOn => {
            // resume once the rest has elapsed and cooling still makes sense
            if cooling_mode
                && !runtime.five_twenty_five.resting(now)
                && runtime.five_twenty_five.engaged
                && snapshot.current_temp > snapshot.supply_temp
            {
                info!("unit {}: 5/25 rest over, resuming cool1", zone.unit_id);
                runtime.five_twenty_five.engaged = false;
                return Ok(Some(Stage::Cool1));
            }
            Ok(None)
        }
        Stage::Cool1 => {
            if snapshot.supply_temp >= SUPPLY_LIMIT {
                return Ok(None);
            }
            if outside.temperature >= system.temp_limit_525 {
                return Ok(None);
            }
            let Some(run_start) = backend
                .status_run_start(zone.unit_id, Stage::Cool1.label())
                .await?
            else {
                return Ok(None);
            };
            if now - run_start < Duration::minutes(RUN_MINUTES) {
                return Ok(None);
            }
            info!(
                "unit {}: 5/25 engaging, cool1 ran {} minutes with supply {:.1}",
                zone.unit_id,
                (now - run_start).num_minutes(),
                snapshot.supply_temp
            );
            runtime.five_twenty_five.engaged = true;
            runtime.five_twenty_five.rest_end = Some(now + Duration::minutes(REST_MINUTES));
            Ok(Some(Stage::FanOn))
        }
        _ => Ok(None),
    }
}
