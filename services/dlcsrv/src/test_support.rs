//! Builders shared by the unit tests

use chrono::NaiveTime;

use crate::model::{
    AlarmLimits, Calibration, CoolingPower, FanPolicy, HeatingPower, HumidityPolicy,
    KeypadAdjust, Mode, PowerInformation, PurgePolicy, SupplyAlarmPolicy, SupplyCutoff,
    TimeWindow, UnitSnapshot, WeeklyWindows, ZoneConfig, ZoneSetpoints,
};

pub fn business_hours() -> TimeWindow {
    TimeWindow {
        start: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
        end: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
    }
}

/// Zone occupied 08:00-17:00 Monday through Friday with ordinary setpoints
pub fn zone_config(unit_id: u8) -> ZoneConfig {
    let window = Some(business_hours());
    ZoneConfig {
        unit_id,
        name: format!("zone-{unit_id}"),
        device_manager_id: "/dev/ttyUSB0".to_string(),
        dlc_managed: true,
        mode: Mode::Cool,
        heat_pump_relay_code: -1,
        zone_priority: 5,
        multi_stage_cool: true,
        multi_stage_heat: true,
        occupied_hours: WeeklyWindows {
            monday: window,
            tuesday: window,
            wednesday: window,
            thursday: window,
            friday: window,
            saturday: None,
            sunday: None,
        },
        setpoints: ZoneSetpoints {
            occ_cool_ideal: 72.0,
            occ_cool_high: 76.0,
            occ_heat_ideal: 70.0,
            unocc_cool_ideal: 80.0,
            unocc_heat_ideal: 62.0,
        },
        alarms: AlarmLimits {
            cold_alarm: 60.0,
            warm_alarm: 85.0,
        },
        manual_override: None,
        keypad_adjust: KeypadAdjust::default(),
        calendar_events: Vec::new(),
        holidays: Vec::new(),
        schedule_blocks: Vec::new(),
        precool_time_minutes: 30,
        preheat_time_minutes: 30,
        peak_precool_minutes: 60,
        power_information: PowerInformation {
            cooling: CoolingPower {
                comp1_kw: 3.0,
                comp2_kw: 2.0,
                comp3_kw: 0.5,
            },
            heating: HeatingPower::default(),
        },
        supply_cutoff: SupplyCutoff {
            cool_cutoff: 45.0,
            cool_cutin: 50.0,
            heat_cutoff: 125.0,
            heat_cutin: 115.0,
        },
        humidity: HumidityPolicy::default(),
        fan: FanPolicy::default(),
        purge: PurgePolicy::default(),
        supply_alarm: SupplyAlarmPolicy::default(),
        five_twenty_five_enabled: false,
        calibration: Calibration::default(),
    }
}

/// Snapshot of a healthy unit idling at 72F
pub fn snapshot(current_temp: f64, set_temp: f64, relay_raw: u16) -> UnitSnapshot {
    UnitSnapshot {
        sensor_type: 2,
        deg_or_cel: 1,
        current_temp,
        set_temp,
        supply_temp: 58.0,
        humidity: None,
        relay_raw,
        mode_num: 1,
        min_setpoint: None,
        max_setpoint: None,
        device_info: Default::default(),
    }
}
