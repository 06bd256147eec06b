//! Relay stage tables for the supported thermostat wiring families
//!
//! The digital-output register encodes which relays are closed. The same
//! semantic stage maps to different raw values depending on how the heat
//! pump reversing valve is wired (none, O-type, B-type).

use serde::{Deserialize, Serialize};

/// Semantic relay stage of a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Off,
    FanOn,
    Cool1,
    Cool2,
    /// Stage-1 cooling with humidity reheat
    CoolH,
    /// Stage-2 cooling with humidity reheat
    Cool2H,
    Heat1,
    Heat2,
}

impl Stage {
    /// Status label as recorded in history rows and logs
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Off => "OFF",
            Stage::FanOn => "FAN_ON",
            Stage::Cool1 => "COOL1/FAN",
            Stage::Cool2 => "COOL2/FAN",
            Stage::CoolH => "COOL1/FAN/HUM",
            Stage::Cool2H => "COOL2/FAN/HUM",
            Stage::Heat1 => "HEAT1/FAN",
            Stage::Heat2 => "HEAT2/FAN",
        }
    }

    pub fn is_cooling(&self) -> bool {
        matches!(self, Stage::Cool1 | Stage::Cool2 | Stage::CoolH | Stage::Cool2H)
    }

    pub fn is_heating(&self) -> bool {
        matches!(self, Stage::Heat1 | Stage::Heat2)
    }

    pub fn is_running(&self) -> bool {
        self.is_cooling() || self.is_heating()
    }
}

/// Wiring family of a unit, selects the raw relay values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RelayVariant {
    #[default]
    Standard,
    HeatPumpO,
    HeatPumpB,
}

impl RelayVariant {
    /// Variant selection from the configured heat-pump relay code
    /// (0 = O-type, 1 = B-type, anything else = standard wiring).
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => RelayVariant::HeatPumpO,
            1 => RelayVariant::HeatPumpB,
            _ => RelayVariant::Standard,
        }
    }
}

/// Raw register values for every stage of one wiring family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayTable {
    pub off: u16,
    pub fan_on: u16,
    pub cool1: u16,
    pub cool2: u16,
    pub coolh: u16,
    pub cool2h: u16,
    pub heat1: u16,
    pub heat2: u16,
}

const STANDARD_TABLE: RelayTable = RelayTable {
    off: 0,
    fan_on: 1,
    cool1: 9,
    cool2: 11,
    coolh: 13,
    cool2h: 15,
    heat1: 17,
    heat2: 21,
};

const HEAT_PUMP_O_TABLE: RelayTable = RelayTable {
    off: 0,
    fan_on: 1,
    cool1: 25,
    cool2: 27,
    coolh: 29,
    cool2h: 31,
    heat1: 9,
    heat2: 11,
};

const HEAT_PUMP_B_TABLE: RelayTable = RelayTable {
    off: 0,
    fan_on: 1,
    cool1: 9,
    cool2: 11,
    coolh: 13,
    cool2h: 15,
    heat1: 25,
    heat2: 27,
};

/// Stage table for a wiring family
pub fn stage_table(variant: RelayVariant) -> &'static RelayTable {
    match variant {
        RelayVariant::Standard => &STANDARD_TABLE,
        RelayVariant::HeatPumpO => &HEAT_PUMP_O_TABLE,
        RelayVariant::HeatPumpB => &HEAT_PUMP_B_TABLE,
    }
}

impl RelayTable {
    /// Raw register value for a semantic stage
    pub fn to_raw(&self, stage: Stage) -> u16 {
        match stage {
            Stage::Off => self.off,
            Stage::FanOn => self.fan_on,
            Stage::Cool1 => self.cool1,
            Stage::Cool2 => self.cool2,
            Stage::CoolH => self.coolh,
            Stage::Cool2H => self.cool2h,
            Stage::Heat1 => self.heat1,
            Stage::Heat2 => self.heat2,
        }
    }

    /// Semantic stage for a raw register value. A raw value outside the
    /// family's table means the unit is not answering sensibly and is
    /// classified offline by the caller.
    pub fn from_raw(&self, raw: u16) -> Option<Stage> {
        let stage = if raw == self.off {
            Stage::Off
        } else if raw == self.fan_on {
            Stage::FanOn
        } else if raw == self.cool1 {
            Stage::Cool1
        } else if raw == self.cool2 {
            Stage::Cool2
        } else if raw == self.coolh {
            Stage::CoolH
        } else if raw == self.cool2h {
            Stage::Cool2H
        } else if raw == self.heat1 {
            Stage::Heat1
        } else if raw == self.heat2 {
            Stage::Heat2
        } else {
            return None;
        };
        Some(stage)
    }

    /// Status label for a raw value, `OFFLINE` when it maps to no stage
    pub fn label_for_raw(&self, raw: u16) -> &'static str {
        match self.from_raw(raw) {
            Some(stage) => stage.label(),
            None => "OFFLINE",
        }
    }
}
