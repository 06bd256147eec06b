//! Auto-mode arbitration
//!
//! Zones in auto pick heat or cool from the room temperature relative to
//! the working setpoint, with a minimum spacing since the last run in the
//! opposite mode so the equipment does not see rapid changeovers. During
//! unoccupied hours a room sitting between the unoccupied ideals sticks
//! with whatever it last ran.

use chrono::{DateTime, Duration, Local};
use tracing::debug;

use crate::backend::Backend;
use crate::error::Result;
use crate::model::{Mode, OverrideType, SystemData, UnitSnapshot, ZoneConfig};
use crate::state::ZoneRuntime;

/// Resolve the working mode for this cycle. Non-auto zones pass through.
pub async fn arbitrate(
    zone: &ZoneConfig,
    snapshot: &UnitSnapshot,
    runtime: &mut ZoneRuntime,
    override_type: OverrideType,
    set_temp: f64,
    system: &SystemData,
    backend: &dyn Backend,
    now: DateTime<Local>,
) -> Result<Mode> {
    if zone.mode != Mode::Auto {
        runtime.last_resolved_mode = Some(zone.mode);
        return Ok(zone.mode);
    }

    let current = snapshot.current_temp;
    let last = runtime
        .last_resolved_mode
        .filter(|m| matches!(*m, Mode::Cool | Mode::Heat));

    // comfortable unoccupied rooms keep their last direction
    if override_type == OverrideType::Uno {
        if let Some(last) = last {
            if zone.setpoints.unocc_heat_ideal < current
                && current < zone.setpoints.unocc_cool_ideal
            {
                return Ok(last);
            }
        }
    }

    let last = last.unwrap_or(if current > set_temp { Mode::Cool } else { Mode::Heat });
    let min_switch = Duration::minutes(system.min_switch_minutes);

    let resolved = match last {
        Mode::Cool if set_temp - system.hysteresis > current => {
            let last_cool_end = backend.last_mode_run_end(zone.unit_id, Mode::Cool).await?;
            match last_cool_end {
                Some(end) if now - end < min_switch => Mode::Cool,
                _ => {
                    debug!("unit {}: auto switching to heat at {current:.1}", zone.unit_id);
                    Mode::Heat
                }
            }
        }
        Mode::Heat if set_temp + system.hysteresis < current => {
            let last_heat_end = backend.last_mode_run_end(zone.unit_id, Mode::Heat).await?;
            match last_heat_end {
                Some(end) if now - end < min_switch => Mode::Heat,
                _ => {
                    debug!("unit {}: auto switching to cool at {current:.1}", zone.unit_id);
                    Mode::Cool
                }
            }
        }
        other => other,
    };

    runtime.last_resolved_mode = Some(resolved);
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_backend::TestBackend;
    use crate::test_support::{snapshot, zone_config};
    use chrono::TimeZone;

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 7, 1, 14, 0, 0).unwrap()
    }

    fn auto_zone() -> ZoneConfig {
        let mut zone = zone_config(1);
        zone.mode = Mode::Auto;
        zone
    }

    #[tokio::test]
    async fn test_non_auto_mode_passes_through() {
        let zone = zone_config(1); // cool
        let unit = snapshot(74.0, 72.0, 0);
        let mut runtime = ZoneRuntime::default();
        let backend = TestBackend::default();
        let mode = arbitrate(
            &zone,
            &unit,
            &mut runtime,
            OverrideType::Occ,
            72.0,
            &SystemData::default(),
            &backend,
            now(),
        )
        .await
        .unwrap();
        assert_eq!(mode, Mode::Cool);
    }

    #[tokio::test]
    async fn test_cold_room_switches_to_heat_when_spacing_allows() {
        let zone = auto_zone();
        let unit = snapshot(68.0, 72.0, 0);
        let mut runtime = ZoneRuntime::default();
        runtime.last_resolved_mode = Some(Mode::Cool);
        let backend = TestBackend::default();

        let mode = arbitrate(
            &zone,
            &unit,
            &mut runtime,
            OverrideType::Occ,
            72.0,
            &SystemData::default(),
            &backend,
            now(),
        )
        .await
        .unwrap();
        assert_eq!(mode, Mode::Heat);
        assert_eq!(runtime.last_resolved_mode, Some(Mode::Heat));
    }

    #[tokio::test]
    async fn test_recent_cool_run_blocks_changeover() {
        let zone = auto_zone();
        let unit = snapshot(68.0, 72.0, 0);
        let mut runtime = ZoneRuntime::default();
        runtime.last_resolved_mode = Some(Mode::Cool);
        let backend = TestBackend::default();
        backend.set_mode_run_end(1, Mode::Cool, now() - Duration::minutes(10));

        let mode = arbitrate(
            &zone,
            &unit,
            &mut runtime,
            OverrideType::Occ,
            72.0,
            &SystemData::default(),
            &backend,
            now(),
        )
        .await
        .unwrap();
        assert_eq!(mode, Mode::Cool);
    }

    #[tokio::test]
    async fn test_unoccupied_comfortable_room_keeps_last_mode() {
        let zone = auto_zone();
        // between unocc ideals 62 and 80
        let unit = snapshot(70.0, 80.0, 0);
        let mut runtime = ZoneRuntime::default();
        runtime.last_resolved_mode = Some(Mode::Heat);
        let backend = TestBackend::default();

        let mode = arbitrate(
            &zone,
            &unit,
            &mut runtime,
            OverrideType::Uno,
            80.0,
            &SystemData::default(),
            &backend,
            now(),
        )
        .await
        .unwrap();
        assert_eq!(mode, Mode::Heat);
    }

    #[tokio::test]
    async fn test_no_history_derives_from_temperature() {
        let zone = auto_zone();
        let unit = snapshot(75.0, 72.0, 0);
        let mut runtime = ZoneRuntime::default();
        let backend = TestBackend::default();

        let mode = arbitrate(
            &zone,
            &unit,
            &mut runtime,
            OverrideType::Occ,
            72.0,
            &SystemData::default(),
            &backend,
            now(),
        )
        .await
        .unwrap();
        assert_eq!(mode, Mode::Cool);
    }
}
