//! Supply-temperature effectiveness alarm
//!
//! After a stage has run long enough, the supply air should be at least
//! `alarm_delta` degrees away from the room temperature. A cooling run
//! that fails to get that cold, or a heating run that fails to get that
//! warm, raises an alert.

use chrono::{DateTime, Duration, Local};
use tracing::warn;

use crate::backend::Backend;
use crate::error::Result;
use crate::model::{Alert, UnitSnapshot, ZoneConfig};

pub const WARNING_NOT_COOLING: u16 = 11;
pub const WARNING_NOT_HEATING: u16 = 12;

pub async fn evaluate(
    zone: &ZoneConfig,
    snapshot: &UnitSnapshot,
    backend: &dyn Backend,
    now: DateTime<Local>,
) -> Result<()> {
    if !zone.supply_alarm.enabled {
        return Ok(());
    }
    let Some(stage) = snapshot.stage(zone.relay_variant()) else {
        return Ok(());
    };
    if !stage.is_running() {
        return Ok(());
    }

    let Some(run_start) = backend.status_run_start(zone.unit_id, stage.label()).await? else {
        return Ok(());
    };
    if now - run_start <= Duration::minutes(zone.supply_alarm.test_time_minutes) {
        return Ok(());
    }

    let delta = zone.supply_alarm.alarm_delta;
    if stage.is_cooling() && snapshot.supply_temp > snapshot.current_temp - delta {
        warn!(
            "unit {}: supply {:.1} after {} min of {}, not cooling",
            zone.unit_id,
            snapshot.supply_temp,
            (now - run_start).num_minutes(),
            stage.label()
        );
        backend
            .post_alert(&Alert {
                unit_id: zone.unit_id,
                warning_code: WARNING_NOT_COOLING,
                message: format!(
                    "Unit {} is not cooling: supply {:.1} with room at {:.1}",
                    zone.unit_id, snapshot.supply_temp, snapshot.current_temp
                ),
            })
            .await?;
    } else if stage.is_heating() && snapshot.supply_temp < snapshot.current_temp + delta {
        warn!(
            "unit {}: supply {:.1} after {} min of {}, not heating",
            zone.unit_id,
            snapshot.supply_temp,
            (now - run_start).num_minutes(),
            stage.label()
        );
        backend
            .post_alert(&Alert {
                unit_id: zone.unit_id,
                warning_code: WARNING_NOT_HEATING,
                message: format!(
                    "Unit {} is not heating: supply {:.1} with room at {:.1}",
                    zone.unit_id, snapshot.supply_temp, snapshot.current_temp
                ),
            })
            .await?;
    }
    Ok(())
}
