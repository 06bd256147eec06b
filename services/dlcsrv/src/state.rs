//! Per-zone transient state
//!
//! Everything here is in-memory only and lost on restart: hold timers,
//! the last relay decision, evaluator latches. Each zone owns its own
//! [`ZoneRuntime`]; the [`Fleet`] aggregate hands them out by unit id.

use std::collections::HashMap;

use chrono::{DateTime, Local};

use crate::model::Mode;
use crate::relay::Stage;

/// Keypad-adjust hold
#[derive(Debug, Clone, Default)]
pub struct KeypadHold {
    pub set_temp: Option<f64>,
    pub end_time: Option<DateTime<Local>>,
}

impl KeypadHold {
    pub fn active(&self, now: DateTime<Local>) -> bool {
        matches!(self.end_time, Some(end) if now < end)
    }

    pub fn clear(&mut self) {
        self.set_temp = None;
        self.end_time = None;
    }
}

/// Demand-fallback setpoint raise
#[derive(Debug, Clone, Default)]
pub struct DemandHold {
    pub is_set_high: bool,
    pub expire_time: Option<DateTime<Local>>,
}

impl DemandHold {
    /// Active only while unexpired; clears itself once the window passes
    pub fn check(&mut self, now: DateTime<Local>) -> bool {
        if !self.is_set_high {
            return false;
        }
        match self.expire_time {
            Some(expiry) if now < expiry => true,
            _ => {
                self.is_set_high = false;
                self.expire_time = None;
                false
            }
        }
    }
}

/// 5/25 compressor-rest timer
#[derive(Debug, Clone, Default)]
pub struct FiveTwentyFive {
    pub engaged: bool,
    pub rest_end: Option<DateTime<Local>>,
}

impl FiveTwentyFive {
    pub fn resting(&mut self, now: DateTime<Local>) -> bool {
        match self.rest_end {
            Some(end) if now < end => true,
            Some(_) => {
                self.rest_end = None;
                false
            }
            None => false,
        }
    }
}

/// Mutable per-zone state carried between cycles
#[derive(Debug, Clone, Default)]
pub struct ZoneRuntime {
    /// Human-readable label of the last DLC decision, for logs and telemetry
    pub dlc_operation: String,
    /// Last relay stage this engine commanded
    pub last_relay: Option<Stage>,
    /// Fan forced on outside heat/cool staging
    pub ventilation: bool,
    pub keypad: KeypadHold,
    pub demand: DemandHold,
    pub five_twenty_five: FiveTwentyFive,
    /// Dehumidify stage currently selected
    pub humidity_selected: bool,
    /// Purge fan currently latched on
    pub purge_selected: bool,
    /// Mode the auto arbiter last resolved to
    pub last_resolved_mode: Option<Mode>,
    /// Supply-temp protection latches, per zone
    pub cool_cut: bool,
    pub heat_cut: bool,
    /// When the unit was first seen offline, cleared on contact
    pub offline_since: Option<DateTime<Local>>,
    /// Offline alert already raised for the current outage
    pub offline_alerted: bool,
    /// Last resolution pushed to the backend, to persist only on change
    pub last_persisted: Option<(f64, &'static str)>,
    /// Device setpoint seen last cycle, for keypad change detection
    pub last_device_setpoint: Option<f64>,
}

/// All zone runtimes, keyed by unit id
#[derive(Debug, Default)]
pub struct Fleet {
    zones: HashMap<u8, ZoneRuntime>,
}

impl Fleet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn zone(&mut self, unit_id: u8) -> &mut ZoneRuntime {
        self.zones.entry(unit_id).or_default()
    }

    pub fn get(&self, unit_id: u8) -> Option<&ZoneRuntime> {
        self.zones.get(&unit_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u8, &ZoneRuntime)> {
        self.zones.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 7, 1, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_demand_hold_expires() {
        let mut hold = DemandHold {
            is_set_high: true,
            expire_time: Some(at(12, 30)),
        };
        assert!(hold.check(at(12, 0)));
        assert!(!hold.check(at(12, 30)));
        // expiry clears the latch entirely
        assert!(!hold.is_set_high);
        assert!(hold.expire_time.is_none());
    }

    #[test]
    fn test_demand_hold_without_expiry_is_inactive() {
        let mut hold = DemandHold {
            is_set_high: true,
            expire_time: None,
        };
        assert!(!hold.check(at(9, 0)));
        assert!(!hold.is_set_high);
    }

    #[test]
    fn test_keypad_hold_window() {
        let hold = KeypadHold {
            set_temp: Some(71.0),
            end_time: Some(at(15, 0)),
        };
        assert!(hold.active(at(14, 59)));
        assert!(!hold.active(at(15, 0)));
    }

    #[test]
    fn test_five_twenty_five_rest_clears() {
        let mut timer = FiveTwentyFive {
            engaged: true,
            rest_end: Some(at(10, 5)),
        };
        assert!(timer.resting(at(10, 2)));
        assert!(!timer.resting(at(10, 6)));
        assert!(timer.rest_end.is_none());
    }

    #[test]
    fn test_fleet_creates_zone_on_demand() {
        let mut fleet = Fleet::new();
        fleet.zone(4).ventilation = true;
        assert!(fleet.get(4).unwrap().ventilation);
        assert!(fleet.get(5).is_none());
    }
}
