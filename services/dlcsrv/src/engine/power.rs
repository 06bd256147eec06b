//! Electrical load model per relay stage
//!
//! Cooling always draws the compressors plus the supply fan. Heating
//! depends on the heat source: heat pumps run the compressors, gas only
//! the fan, electric the strip-heat stages plus the fan.

use crate::model::{HeatSource, ZoneConfig};
use crate::relay::Stage;

/// Steady-state draw of a zone in the given stage, kW
pub fn stage_power(zone: &ZoneConfig, stage: Stage) -> f64 {
    let cooling = &zone.power_information.cooling;
    let heating = &zone.power_information.heating;
    match stage {
        Stage::Off => 0.0,
        Stage::FanOn => cooling.comp3_kw,
        Stage::Cool1 | Stage::CoolH => cooling.comp1_kw + cooling.comp3_kw,
        Stage::Cool2 | Stage::Cool2H => {
            cooling.comp1_kw + cooling.comp2_kw + cooling.comp3_kw
        }
        Stage::Heat1 => match heating.source {
            HeatSource::HeatPump => cooling.comp1_kw + cooling.comp3_kw,
            HeatSource::Gas => cooling.comp3_kw,
            HeatSource::Electric => heating.stage1_kw + cooling.comp3_kw,
        },
        Stage::Heat2 => match heating.source {
            HeatSource::HeatPump => cooling.comp1_kw + cooling.comp2_kw + cooling.comp3_kw,
            HeatSource::Gas => cooling.comp3_kw,
            HeatSource::Electric => {
                heating.stage1_kw + heating.stage2_kw + cooling.comp3_kw
            }
        },
    }
}

/// Load change from moving the zone to `new_stage`, kW (negative = shed)
pub fn power_delta(zone: &ZoneConfig, current: Option<Stage>, new_stage: Stage) -> f64 {
    let current_power = current.map_or(0.0, |stage| stage_power(zone, stage));
    stage_power(zone, new_stage) - current_power
}
