//! Per-zone staging state machine
//!
//! Compares the room temperature to the resolved setpoint and drives the
//! relay through four bands: call-above, within hysteresis, call-below,
//! satisfied. Every transition that adds compressor load passes the same
//! guard funnel first: supply-temperature cutoff, anti-short-cycle
//! spacing, outside-temperature lockout, power budget, demand shed.

use chrono::{DateTime, Duration, Local};
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::engine::demand::{check_demand, ShedAction};
use crate::engine::fan;
use crate::engine::power::power_delta;
use crate::error::Result;
use crate::model::{
    Alert, Mode, OutsideConditions, PowerBudget, SystemData, UnitSnapshot, UnitTable,
    ZoneConfig,
};
use crate::relay::Stage;
use crate::state::Fleet;

pub const WARNING_COOL_LOCKOUT: u16 = 13;
pub const WARNING_HEAT_LOCKOUT: u16 = 14;
pub const WARNING_SUPPLY_UNDER: u16 = 18;
pub const WARNING_SUPPLY_OVER: u16 = 19;

/// What the controller decided for one zone this cycle
#[derive(Debug, Default)]
pub struct StageOutcome {
    /// Relay change for this zone, if any
    pub change: Option<Stage>,
    /// Downgrades for other zones decided by the demand manager
    pub sheds: Vec<ShedAction>,
    /// Decision label for telemetry and logs
    pub operation: String,
}

impl StageOutcome {
    fn hold(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            ..Default::default()
        }
    }

    fn switch(stage: Stage, operation: &str) -> Self {
        Self {
            change: Some(stage),
            operation: operation.to_string(),
            ..Default::default()
        }
    }
}

/// Compressor anti-short-cycle spacing since the last stop
async fn compressor_ready(
    zone: &ZoneConfig,
    system: &SystemData,
    backend: &dyn Backend,
    now: DateTime<Local>,
) -> Result<bool> {
    match backend.last_compressor_stop(zone.unit_id).await? {
        Some(stop) => Ok(now - stop >= Duration::minutes(system.decompression_minutes)),
        None => Ok(true),
    }
}

/// Budget check for moving this zone to `target`, shedding others if the
/// site is over. Returns the verdict plus any sheds to apply.
#[allow(clippy::too_many_arguments)]
fn budget_allows(
    zone: &ZoneConfig,
    current: Option<Stage>,
    target: Stage,
    zones: &[ZoneConfig],
    units: &UnitTable,
    system: &SystemData,
    budget: &PowerBudget,
    fleet: &mut Fleet,
    now: DateTime<Local>,
) -> (bool, Vec<ShedAction>) {
    let delta = power_delta(zone, current, target);
    let predicted = budget.current_power + delta.max(0.0);
    if predicted < budget.allowed_power {
        return (true, Vec::new());
    }
    let outcome = check_demand(zones, units, system, fleet, predicted, budget.allowed_power, now);
    (outcome.allowed, outcome.sheds)
}

/// Update the per-zone supply-temperature cut latches. A running stage with
/// its latch engaged is forced straight to fan-only; a latch released this
/// cycle hands back the stage to resume once the band arms agree.
async fn supply_guard(
    zone: &ZoneConfig,
    snapshot: &UnitSnapshot,
    stage: Stage,
    fleet: &mut Fleet,
    backend: &dyn Backend,
) -> Result<(Option<Stage>, Option<Stage>)> {
    let cutoff = &zone.supply_cutoff;
    let supply = snapshot.supply_temp;
    let mut resume = None;
    let mut cool_engaged = false;
    let mut heat_engaged = false;

    {
        let runtime = fleet.zone(zone.unit_id);
        if runtime.cool_cut {
            if supply > cutoff.cool_cutin {
                runtime.cool_cut = false;
                resume = Some(Stage::Cool1);
            }
        } else if stage.is_cooling() && supply < cutoff.cool_cutoff {
            runtime.cool_cut = true;
            cool_engaged = true;
        }

        if runtime.heat_cut {
            if supply < cutoff.heat_cutin {
                runtime.heat_cut = false;
                resume = Some(Stage::Heat1);
            }
        } else if stage.is_heating() && supply > cutoff.heat_cutoff {
            runtime.heat_cut = true;
            heat_engaged = true;
        }
    }

    if cool_engaged {
        warn!(
            "unit {}: supply {:.1} below cool cutoff {:.1}",
            zone.unit_id, supply, cutoff.cool_cutoff
        );
        backend
            .post_alert(&Alert {
                unit_id: zone.unit_id,
                warning_code: WARNING_SUPPLY_UNDER,
                message: format!(
                    "Unit {} under supply limit, supply temperature {supply:.1}",
                    zone.unit_id
                ),
            })
            .await?;
    }
    if heat_engaged {
        warn!(
            "unit {}: supply {:.1} above heat cutoff {:.1}",
            zone.unit_id, supply, cutoff.heat_cutoff
        );
        backend
            .post_alert(&Alert {
                unit_id: zone.unit_id,
                warning_code: WARNING_SUPPLY_OVER,
                message: format!(
                    "Unit {} over supply limit, supply temperature {supply:.1}",
                    zone.unit_id
                ),
            })
            .await?;
    }

    let runtime = fleet.zone(zone.unit_id);
    let drop_to_fan =
        (runtime.cool_cut && stage.is_cooling()) || (runtime.heat_cut && stage.is_heating());
    Ok((drop_to_fan.then_some(Stage::FanOn), resume))
}

/// Fan decision for a zone with no heat or cool call
async fn idle_stage(
    zone: &ZoneConfig,
    stage: Stage,
    fleet: &mut Fleet,
    backend: &dyn Backend,
    now: DateTime<Local>,
) -> Result<Stage> {
    let fan_wanted = fan::evaluate(zone, stage == Stage::FanOn, backend, now).await?;
    fleet.zone(zone.unit_id).ventilation = fan_wanted;
    Ok(if fan_wanted { Stage::FanOn } else { Stage::Off })
}

#[allow(clippy::too_many_arguments)]
pub async fn run(
    zone: &ZoneConfig,
    snapshot: &UnitSnapshot,
    mode: Mode,
    set_temp: f64,
    zones: &[ZoneConfig],
    units: &UnitTable,
    system: &SystemData,
    budget: &PowerBudget,
    outside: &OutsideConditions,
    fleet: &mut Fleet,
    backend: &dyn Backend,
    now: DateTime<Local>,
) -> Result<StageOutcome> {
    let Some(stage) = snapshot.stage(zone.relay_variant()) else {
        return Ok(StageOutcome::hold("relay offline"));
    };

    // off and vent short-circuit the bands entirely
    match mode {
        Mode::Off => {
            return Ok(if stage != Stage::Off {
                StageOutcome::switch(Stage::Off, "mode off")
            } else {
                StageOutcome::hold("mode off")
            });
        }
        Mode::Vent => {
            return Ok(if stage != Stage::FanOn {
                StageOutcome::switch(Stage::FanOn, "ventilation")
            } else {
                StageOutcome::hold("ventilation")
            });
        }
        _ => {}
    }

    let (downgrade, resumed) = supply_guard(zone, snapshot, stage, fleet, backend).await?;
    if let Some(downgrade) = downgrade {
        return Ok(StageOutcome::switch(downgrade, "supply cutoff"));
    }

    let t = snapshot.current_temp;
    let hysteresis = system.hysteresis;

    match mode {
        Mode::Cool => {
            // a heat stage under a cool call is a wiring or mode mismatch
            if stage.is_heating() {
                warn!("unit {}: heat stage during cool call, forcing fan", zone.unit_id);
                fleet.zone(zone.unit_id).last_resolved_mode = None;
                return Ok(StageOutcome::switch(Stage::FanOn, "mode mismatch"));
            }

            if t > set_temp + hysteresis {
                if !stage.is_cooling() {
                    // starting the first compressor
                    if outside.temperature < system.cool_low_limit {
                        debug!(
                            "unit {}: outside {:.1} below cooling lockout",
                            zone.unit_id, outside.temperature
                        );
                        backend
                            .post_alert(&Alert {
                                unit_id: zone.unit_id,
                                warning_code: WARNING_COOL_LOCKOUT,
                                message: format!(
                                    "Unit {} cooling locked out, outside temperature {:.1}",
                                    zone.unit_id, outside.temperature
                                ),
                            })
                            .await?;
                        return Ok(StageOutcome::hold("cool lockout"));
                    }
                    if fleet.zone(zone.unit_id).cool_cut {
                        return Ok(StageOutcome::hold("supply cutoff"));
                    }
                    if !compressor_ready(zone, system, backend, now).await? {
                        return Ok(StageOutcome::hold("decompression wait"));
                    }
                    let (allowed, sheds) = budget_allows(
                        zone, Some(stage), Stage::Cool1, zones, units, system, budget, fleet,
                        now,
                    );
                    if !allowed {
                        return Ok(StageOutcome::hold("demand denied"));
                    }
                    info!("unit {}: {:.1} over {:.1}, cool stage 1", zone.unit_id, t, set_temp);
                    let mut outcome = StageOutcome::switch(Stage::Cool1, "cool stage 1");
                    outcome.sheds = sheds;
                    return Ok(outcome);
                }

                // escalate to stage 2 once well past the band
                if matches!(stage, Stage::Cool1 | Stage::CoolH)
                    && zone.multi_stage_cool
                    && t > set_temp + hysteresis + system.stage2_trigger_delta
                {
                    if !compressor_ready(zone, system, backend, now).await? {
                        return Ok(StageOutcome::hold("decompression wait"));
                    }
                    let target = if stage == Stage::CoolH {
                        Stage::Cool2H
                    } else {
                        Stage::Cool2
                    };
                    let (allowed, sheds) = budget_allows(
                        zone, Some(stage), target, zones, units, system, budget, fleet, now,
                    );
                    if !allowed {
                        return Ok(StageOutcome::hold("demand denied"));
                    }
                    info!("unit {}: {:.1} far over {:.1}, cool stage 2", zone.unit_id, t, set_temp);
                    let mut outcome = StageOutcome::switch(target, "cool stage 2");
                    outcome.sheds = sheds;
                    return Ok(outcome);
                }
                return Ok(StageOutcome::hold("cooling"));
            }

            if t < set_temp - hysteresis {
                // satisfied
                let idle = idle_stage(zone, stage, fleet, backend, now).await?;
                if stage.is_cooling() || (stage != idle && matches!(stage, Stage::Off | Stage::FanOn))
                {
                    return Ok(StageOutcome::switch(idle, "cool satisfied"));
                }
                return Ok(StageOutcome::hold("cool satisfied"));
            }

            // within hysteresis: a released cut latch puts stage 1 back
            if stage == Stage::FanOn && resumed == Some(Stage::Cool1) {
                return Ok(StageOutcome::switch(Stage::Cool1, "supply recovered"));
            }
            // hold, but keep the fan schedule honest
            if matches!(stage, Stage::Off | Stage::FanOn) {
                let idle = idle_stage(zone, stage, fleet, backend, now).await?;
                if idle != stage {
                    return Ok(StageOutcome::switch(idle, "fan schedule"));
                }
            }
            Ok(StageOutcome::hold("within band"))
        }
        Mode::Heat => {
            if stage.is_cooling() {
                warn!("unit {}: cool stage during heat call, forcing fan", zone.unit_id);
                fleet.zone(zone.unit_id).last_resolved_mode = None;
                return Ok(StageOutcome::switch(Stage::FanOn, "mode mismatch"));
            }

            // gas and electric heat add no compressor load
            let gated = zone.is_heat_pump();

            if t < set_temp - hysteresis {
                if !stage.is_heating() {
                    if outside.temperature > system.heat_hi_limit {
                        debug!(
                            "unit {}: outside {:.1} above heating lockout",
                            zone.unit_id, outside.temperature
                        );
                        backend
                            .post_alert(&Alert {
                                unit_id: zone.unit_id,
                                warning_code: WARNING_HEAT_LOCKOUT,
                                message: format!(
                                    "Unit {} heating locked out, outside temperature {:.1}",
                                    zone.unit_id, outside.temperature
                                ),
                            })
                            .await?;
                        return Ok(StageOutcome::hold("heat lockout"));
                    }
                    if fleet.zone(zone.unit_id).heat_cut {
                        return Ok(StageOutcome::hold("supply cutoff"));
                    }
                    if gated {
                        if !compressor_ready(zone, system, backend, now).await? {
                            return Ok(StageOutcome::hold("decompression wait"));
                        }
                        let (allowed, sheds) = budget_allows(
                            zone, Some(stage), Stage::Heat1, zones, units, system, budget,
                            fleet, now,
                        );
                        if !allowed {
                            return Ok(StageOutcome::hold("demand denied"));
                        }
                        info!("unit {}: {:.1} under {:.1}, heat stage 1", zone.unit_id, t, set_temp);
                        let mut outcome = StageOutcome::switch(Stage::Heat1, "heat stage 1");
                        outcome.sheds = sheds;
                        return Ok(outcome);
                    }
                    info!("unit {}: {:.1} under {:.1}, heat stage 1", zone.unit_id, t, set_temp);
                    return Ok(StageOutcome::switch(Stage::Heat1, "heat stage 1"));
                }

                if stage == Stage::Heat1
                    && zone.multi_stage_heat
                    && t < set_temp - hysteresis - system.stage2_trigger_delta
                {
                    if gated {
                        if !compressor_ready(zone, system, backend, now).await? {
                            return Ok(StageOutcome::hold("decompression wait"));
                        }
                        let (allowed, sheds) = budget_allows(
                            zone, Some(stage), Stage::Heat2, zones, units, system, budget,
                            fleet, now,
                        );
                        if !allowed {
                            return Ok(StageOutcome::hold("demand denied"));
                        }
                        let mut outcome = StageOutcome::switch(Stage::Heat2, "heat stage 2");
                        outcome.sheds = sheds;
                        return Ok(outcome);
                    }
                    return Ok(StageOutcome::switch(Stage::Heat2, "heat stage 2"));
                }
                return Ok(StageOutcome::hold("heating"));
            }

            if t > set_temp + hysteresis {
                let idle = idle_stage(zone, stage, fleet, backend, now).await?;
                if stage.is_heating() || (stage != idle && matches!(stage, Stage::Off | Stage::FanOn))
                {
                    return Ok(StageOutcome::switch(idle, "heat satisfied"));
                }
                return Ok(StageOutcome::hold("heat satisfied"));
            }

            if stage == Stage::FanOn && resumed == Some(Stage::Heat1) {
                return Ok(StageOutcome::switch(Stage::Heat1, "supply recovered"));
            }
            if matches!(stage, Stage::Off | Stage::FanOn) {
                let idle = idle_stage(zone, stage, fleet, backend, now).await?;
                if idle != stage {
                    return Ok(StageOutcome::switch(idle, "fan schedule"));
                }
            }
            Ok(StageOutcome::hold("within band"))
        }
        // auto arbitration already resolved to heat or cool upstream
        Mode::Auto | Mode::Off | Mode::Vent => Ok(StageOutcome::hold("no call")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_backend::TestBackend;
    use crate::model::UnitState;
    use crate::test_support::{snapshot, zone_config};
    use chrono::TimeZone;

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 7, 1, 14, 0, 0).unwrap()
    }

    fn mild() -> OutsideConditions {
        OutsideConditions {
            temperature: 75.0,
            humidity: 40.0,
        }
    }

    fn wide_budget() -> PowerBudget {
        PowerBudget {
            current_power: 10.0,
            allowed_power: 100.0,
        }
    }

    async fn decide(
        zone: &ZoneConfig,
        unit: &UnitSnapshot,
        mode: Mode,
        set_temp: f64,
        budget: &PowerBudget,
        outside: &OutsideConditions,
        fleet: &mut Fleet,
        backend: &TestBackend,
    ) -> StageOutcome {
        let zones = vec![zone.clone()];
        let mut units = UnitTable::new();
        units.insert(zone.unit_id, UnitState::Online(unit.clone()));
        run(
            zone,
            unit,
            mode,
            set_temp,
            &zones,
            &units,
            &SystemData::default(),
            budget,
            outside,
            fleet,
            backend,
            now(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_warm_room_starts_cool1() {
        let zone = zone_config(1);
        let unit = snapshot(74.0, 72.0, 0);
        let mut fleet = Fleet::new();
        let backend = TestBackend::default();

        let outcome = decide(
            &zone, &unit, Mode::Cool, 72.0, &wide_budget(), &mild(), &mut fleet, &backend,
        )
        .await;
        assert_eq!(outcome.change, Some(Stage::Cool1));
    }

    #[tokio::test]
    async fn test_recent_compressor_stop_blocks_start() {
        let zone = zone_config(1);
        let unit = snapshot(74.0, 72.0, 0);
        let mut fleet = Fleet::new();
        let backend = TestBackend::default();
        backend.set_compressor_stop(1, now() - Duration::minutes(2));

        let outcome = decide(
            &zone, &unit, Mode::Cool, 72.0, &wide_budget(), &mild(), &mut fleet, &backend,
        )
        .await;
        assert_eq!(outcome.change, None);
        assert_eq!(outcome.operation, "decompression wait");
    }

    #[tokio::test]
    async fn test_cold_outside_locks_out_cooling() {
        let zone = zone_config(1);
        let unit = snapshot(74.0, 72.0, 0);
        let mut fleet = Fleet::new();
        let backend = TestBackend::default();
        let cold = OutsideConditions {
            temperature: 50.0,
            humidity: 40.0,
        };

        let outcome = decide(
            &zone, &unit, Mode::Cool, 72.0, &wide_budget(), &cold, &mut fleet, &backend,
        )
        .await;
        assert_eq!(outcome.change, None);
        assert!(backend.alert_messages()[0].contains("locked out"));
    }

    #[tokio::test]
    async fn test_escalates_to_cool2_past_trigger_delta() {
        let zone = zone_config(1);
        // hysteresis 1.0 + delta 2.0, so 75.5 is past the trigger
        let unit = snapshot(75.5, 72.0, 9);
        let mut fleet = Fleet::new();
        let backend = TestBackend::default();

        let outcome = decide(
            &zone, &unit, Mode::Cool, 72.0, &wide_budget(), &mild(), &mut fleet, &backend,
        )
        .await;
        assert_eq!(outcome.change, Some(Stage::Cool2));
    }

    #[tokio::test]
    async fn test_satisfied_zone_shuts_down() {
        let zone = zone_config(1); // fan mode off
        let unit = snapshot(70.5, 72.0, 9);
        let mut fleet = Fleet::new();
        let backend = TestBackend::default();

        let outcome = decide(
            &zone, &unit, Mode::Cool, 72.0, &wide_budget(), &mild(), &mut fleet, &backend,
        )
        .await;
        assert_eq!(outcome.change, Some(Stage::Off));
        assert_eq!(outcome.operation, "cool satisfied");
    }

    #[tokio::test]
    async fn test_heat_stage_under_cool_call_forces_fan() {
        let zone = zone_config(1);
        let unit = snapshot(74.0, 72.0, 17);
        let mut fleet = Fleet::new();
        fleet.zone(1).last_resolved_mode = Some(Mode::Cool);
        let backend = TestBackend::default();

        let outcome = decide(
            &zone, &unit, Mode::Cool, 72.0, &wide_budget(), &mild(), &mut fleet, &backend,
        )
        .await;
        assert_eq!(outcome.change, Some(Stage::FanOn));
        assert_eq!(outcome.operation, "mode mismatch");
        assert_eq!(fleet.zone(1).last_resolved_mode, None);
    }

    #[tokio::test]
    async fn test_supply_cutoff_drops_stage2_to_fan_and_alerts() {
        let zone = zone_config(1); // cool cutoff 45
        let mut unit = snapshot(75.5, 72.0, 11);
        unit.supply_temp = 40.0;
        let mut fleet = Fleet::new();
        let backend = TestBackend::default();

        let outcome = decide(
            &zone, &unit, Mode::Cool, 72.0, &wide_budget(), &mild(), &mut fleet, &backend,
        )
        .await;
        assert_eq!(outcome.change, Some(Stage::FanOn));
        assert_eq!(outcome.operation, "supply cutoff");
        assert!(fleet.get(1).unwrap().cool_cut);
        assert!(backend.alert_messages()[0].contains("under supply limit"));
    }

    #[tokio::test]
    async fn test_supply_recovery_resumes_stage1() {
        let zone = zone_config(1); // cool cut-in 50
        let mut unit = snapshot(72.5, 72.0, 1);
        unit.supply_temp = 55.0;
        let mut fleet = Fleet::new();
        fleet.zone(1).cool_cut = true;
        let backend = TestBackend::default();

        let outcome = decide(
            &zone, &unit, Mode::Cool, 72.0, &wide_budget(), &mild(), &mut fleet, &backend,
        )
        .await;
        assert_eq!(outcome.change, Some(Stage::Cool1));
        assert_eq!(outcome.operation, "supply recovered");
        assert!(!fleet.get(1).unwrap().cool_cut);
    }

    #[tokio::test]
    async fn test_band_edges_hold() {
        let zone = zone_config(1);
        let mut fleet = Fleet::new();
        let backend = TestBackend::default();

        // exactly set + hysteresis is still inside the band, no call
        let unit = snapshot(73.0, 72.0, 0);
        let outcome = decide(
            &zone, &unit, Mode::Cool, 72.0, &wide_budget(), &mild(), &mut fleet, &backend,
        )
        .await;
        assert_eq!(outcome.change, None);
        assert_eq!(outcome.operation, "within band");

        // exactly set - hysteresis keeps a running stage 1
        let unit = snapshot(71.0, 72.0, 9);
        let outcome = decide(
            &zone, &unit, Mode::Cool, 72.0, &wide_budget(), &mild(), &mut fleet, &backend,
        )
        .await;
        assert_eq!(outcome.change, None);
        assert_eq!(outcome.operation, "within band");
    }

    #[tokio::test]
    async fn test_over_budget_with_demand_disabled_is_denied() {
        let zone = zone_config(1);
        let unit = snapshot(74.0, 72.0, 0);
        let mut fleet = Fleet::new();
        let backend = TestBackend::default();
        let tight = PowerBudget {
            current_power: 49.0,
            allowed_power: 50.0,
        };
        let system = SystemData {
            is_demand_allowed: false,
            ..SystemData::default()
        };

        let mut zones = Vec::new();
        let mut units = UnitTable::new();
        for id in 1..=4u8 {
            zones.push(zone_config(id));
            units.insert(id, UnitState::Online(snapshot(70.0, 72.0, 0)));
        }
        let outcome = run(
            &zone,
            &unit,
            Mode::Cool,
            72.0,
            &zones,
            &units,
            &system,
            &tight,
            &mild(),
            &mut fleet,
            &backend,
            now(),
        )
        .await
        .unwrap();
        assert_eq!(outcome.change, None);
        assert_eq!(outcome.operation, "demand denied");
    }

    #[tokio::test]
    async fn test_gas_heat_ignores_decompression() {
        let mut zone = zone_config(1);
        zone.mode = Mode::Heat;
        zone.power_information.heating.source = crate::model::HeatSource::Gas;
        let unit = snapshot(68.0, 72.0, 0);
        let mut fleet = Fleet::new();
        let backend = TestBackend::default();
        backend.set_compressor_stop(1, now() - Duration::minutes(1));

        let outcome = decide(
            &zone, &unit, Mode::Heat, 72.0, &wide_budget(), &mild(), &mut fleet, &backend,
        )
        .await;
        assert_eq!(outcome.change, Some(Stage::Heat1));
    }

    #[tokio::test]
    async fn test_vent_mode_forces_fan() {
        let zone = zone_config(1);
        let unit = snapshot(72.0, 72.0, 0);
        let mut fleet = Fleet::new();
        let backend = TestBackend::default();

        let outcome = decide(
            &zone, &unit, Mode::Vent, 72.0, &wide_budget(), &mild(), &mut fleet, &backend,
        )
        .await;
        assert_eq!(outcome.change, Some(Stage::FanOn));
    }
}
