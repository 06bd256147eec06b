//! Tstat 7 holding-register map
//!
//! Addresses for the registers the poller reads and writes, the power-up
//! initialization list, and the audit table used to verify configuration
//! registers against their desired values.

/// Device identity block
pub const ADDRESS: u16 = 6;
pub const PRODUCT_MODEL: u16 = 7;
pub const HARDWARE_REV: u16 = 8;
pub const PIC_VERSION: u16 = 9;

/// Sensor source select (1 = remote sensor, 2 = internal thermistor)
pub const TEMP_SELECT: u16 = 118;
pub const INTERNAL_THERMISTOR: u16 = 119;
/// Averaged room temperature, value is tenths of a degree
pub const TEMPERATURE_CHIP: u16 = 121;

/// Remote sensor input, tenths of a degree
pub const ANALOG_INPUT1: u16 = 135;
/// Supply-air sensor input, tenths of a degree
pub const ANALOG_INPUT2: u16 = 136;

pub const SEQUENCE: u16 = 103;
/// Display unit flag (0 = Celsius, 1 = Fahrenheit)
pub const DEGC_OR_F: u16 = 104;
pub const FAN_MODE: u16 = 105;
pub const POWERUP_MODE: u16 = 106;
pub const AUTO_ONLY: u16 = 107;
pub const BAUDRATE: u16 = 110;
pub const DEAD_MASTER: u16 = 117;
pub const ANALOG1_RANGE: u16 = 122;
pub const ANALOG2_RANGE: u16 = 123;
pub const ANALOG3_RANGE: u16 = 124;
pub const ANALOG4_RANGE: u16 = 125;
pub const FILTER: u16 = 142;
pub const INPUT1_FILTER: u16 = 143;
pub const INPUT2_FILTER: u16 = 144;
pub const INPUT3_FILTER: u16 = 145;
pub const INPUT4_FILTER: u16 = 146;

/// Relay output state, values per [`crate::relay::RelayTable`]
pub const DIGITAL_OUTPUT_STATUS: u16 = 209;
pub const CYCLING_DELAY: u16 = 241;
pub const CHANGEOVER_DELAY: u16 = 242;
/// 31 puts all five outputs under manual (bus) control
pub const OUTPUT_MANU_ENABLE: u16 = 254;
pub const DEADMASTER_AUTO_MANUAL: u16 = 262;

/// Operating mode (0 = auto, 1 = cool, 2 = heat)
pub const COOL_HEAT_MODE: u16 = 184;

/// Active setpoint, tenths of a degree
pub const DAY_SETPOINT: u16 = 345;
pub const DAY_COOLING_DEADBAND: u16 = 346;
pub const DAY_HEATING_DEADBAND: u16 = 347;
pub const DAY_COOLING_SETPOINT: u16 = 348;
pub const DAY_HEATING_SETPOINT: u16 = 349;
pub const NIGHT_SETPOINT: u16 = 350;
pub const NIGHT_HEATING_DEADBAND: u16 = 352;
pub const NIGHT_COOLING_DEADBAND: u16 = 353;
pub const NIGHT_HEATING_SETPOINT: u16 = 354;
pub const NIGHT_COOLING_SETPOINT: u16 = 355;
pub const POWERUP_SETPOINT: u16 = 364;
pub const MAX_SETPOINT: u16 = 365;
pub const MIN_SETPOINT: u16 = 366;
pub const SETPOINT_INCREASE: u16 = 373;
pub const SPECIAL_MENU_LOCK: u16 = 396;

pub const WORK_DAY_WAKE_TIME_HOUR: u16 = 418;
pub const WORK_DAY_WAKE_TIME_MINUTES: u16 = 419;
pub const WORK_DAY_SLEEP_TIME_HOUR: u16 = 424;
pub const WORK_DAY_SLEEP_TIME_MINUTES: u16 = 425;
pub const WEEKEND_DAY_WAKE_TIME_HOUR: u16 = 426;
pub const WEEKEND_DAY_WAKE_TIME_MINUTES: u16 = 427;
pub const WEEKEND_SLEEP_TIME_HOUR: u16 = 432;
pub const WEEKEND_SLEEP_TIME_MINUTES: u16 = 433;

/// Real-time clock block
pub const CLOCK_YEAR: u16 = 410;
pub const CLOCK_MONTH: u16 = 411;
pub const CLOCK_DAY: u16 = 413;
pub const CLOCK_HOUR: u16 = 414;
pub const CLOCK_MINUTE: u16 = 415;

pub const SCHEDULE_ON_OFF: u16 = 565;
/// 0 disables the keypad setpoint limit enforcement
pub const SETPOINT_UNLIMIT: u16 = 730;
/// Display icon value register
pub const ICON_MANUAL_VALUE: u16 = 727;
pub const ICON_MANUAL_MODE: u16 = 728;

/// Humidity reading on the standalone humidity transmitter, tenths of a percent
pub const HUMIDITY: u16 = 100;

/// Registers written on every power-up initialization pass, in write order.
pub const INIT_WRITE_LIST: &[(u16, u16)] = &[
    (SEQUENCE, 1),
    (DEGC_OR_F, 1),
    (FAN_MODE, 1),
    (POWERUP_MODE, 3),
    (AUTO_ONLY, 1),
    (BAUDRATE, 1),
    (DEAD_MASTER, 5),
    (ANALOG1_RANGE, 1),
    (ANALOG2_RANGE, 1),
    (ANALOG3_RANGE, 0),
    (ANALOG4_RANGE, 0),
    (FILTER, 20),
    (INPUT1_FILTER, 20),
    (INPUT2_FILTER, 20),
    (INPUT3_FILTER, 20),
    (INPUT4_FILTER, 20),
    (DIGITAL_OUTPUT_STATUS, 0),
    (CYCLING_DELAY, 3),
    (CHANGEOVER_DELAY, 30),
    (DEADMASTER_AUTO_MANUAL, 1),
    (DAY_SETPOINT, 700), // stored as tenths, displays as 70
    (DAY_COOLING_SETPOINT, 700),
    (DAY_HEATING_SETPOINT, 68),
    (NIGHT_SETPOINT, 67),
    (NIGHT_HEATING_SETPOINT, 67),
    (NIGHT_COOLING_SETPOINT, 720),
    (POWERUP_SETPOINT, 70),
    (MAX_SETPOINT, 74),
    (MIN_SETPOINT, 64),
    (SETPOINT_INCREASE, 1),
    (SPECIAL_MENU_LOCK, 0),
    (WORK_DAY_WAKE_TIME_HOUR, 5),
    (WORK_DAY_WAKE_TIME_MINUTES, 0),
    (WORK_DAY_SLEEP_TIME_HOUR, 22),
    (WORK_DAY_SLEEP_TIME_MINUTES, 0),
    (WEEKEND_DAY_WAKE_TIME_HOUR, 6),
    (WEEKEND_DAY_WAKE_TIME_MINUTES, 0),
    (WEEKEND_SLEEP_TIME_HOUR, 21),
    (WEEKEND_SLEEP_TIME_MINUTES, 0),
    (OUTPUT_MANU_ENABLE, 31),
    (SCHEDULE_ON_OFF, 1),
    (SETPOINT_UNLIMIT, 0),
    (DEADMASTER_AUTO_MANUAL, 1),
    (ICON_MANUAL_MODE, 1),
];

/// Audit table of configuration registers: address, desired value, name.
/// The fix-registers pass compares each against the live value and rewrites
/// mismatches.
pub const FIX_REGISTER_TABLE: &[(u16, u16, &str)] = &[
    (SEQUENCE, 1, "MODBUS_SEQUENCE"),
    (DEGC_OR_F, 1, "MODBUS_DEGC_OR_F"),
    (FAN_MODE, 1, "MODBUS_FAN_MODE"),
    (POWERUP_MODE, 3, "MODBUS_POWERUP_MODE"),
    (AUTO_ONLY, 1, "MODBUS_AUTO_ONLY"),
    (BAUDRATE, 1, "MODBUS_BAUDRATE"),
    (DEAD_MASTER, 5, "MODBUS_DEAD_MASTER"),
    (ANALOG1_RANGE, 1, "MODBUS_ANALOG1_RANGE"),
    (ANALOG2_RANGE, 1, "MODBUS_ANALOG2_RANGE"),
    (ANALOG3_RANGE, 0, "MODBUS_ANALOG3_RANGE"),
    (ANALOG4_RANGE, 0, "MODBUS_ANALOG4_RANGE"),
    (FILTER, 20, "MODBUS_FILTER"),
    (INPUT1_FILTER, 20, "MODBUS_INPUT1_FILTER"),
    (INPUT2_FILTER, 20, "MODBUS_INPUT2_FILTER"),
    (INPUT3_FILTER, 20, "MODBUS_INPUT3_FILTER"),
    (INPUT4_FILTER, 20, "MODBUS_INPUT4_FILTER"),
    (DIGITAL_OUTPUT_STATUS, 0, "MODBUS_DIGITAL_OUTPUT_STATUS"),
    (CYCLING_DELAY, 3, "MODBUS_CYCLING_DELAY"),
    (CHANGEOVER_DELAY, 30, "MODBUS_CHANGOVER_DELAY"),
    (DEADMASTER_AUTO_MANUAL, 1, "MODBUS_DEADMASTER_AUTO_MANUAL"),
    (DAY_SETPOINT, 700, "MODBUS_DAY_SETPOINT"),
    (DAY_COOLING_SETPOINT, 700, "MODBUS_DAY_COOLING_SETPOINT"),
    (DAY_HEATING_SETPOINT, 68, "MODBUS_DAY_HEATING_SETPOINT"),
    (NIGHT_SETPOINT, 67, "MODBUS_NIGHT_SETPOINT"),
    (NIGHT_HEATING_SETPOINT, 67, "MODBUS_NIGHT_HEATING_SETPOINT"),
    (NIGHT_COOLING_SETPOINT, 720, "MODBUS_NIGHT_COOLING_SETPOINT"),
    (POWERUP_SETPOINT, 70, "MODBUS_POWERUP_SETPOINT"),
    (MAX_SETPOINT, 74, "MODBUS_MAX_SETPOINT"),
    (MIN_SETPOINT, 64, "MODBUS_MIN_SETPOINT"),
    (SETPOINT_INCREASE, 1, "MODBUS_SETPOINT_INCREASE"),
    (SPECIAL_MENU_LOCK, 0, "MODBUS_SPECIAL_MENU_LOCK"),
    (WORK_DAY_WAKE_TIME_HOUR, 5, "WORK_DAY_WAKE_TIME_HOUR"),
    (WORK_DAY_WAKE_TIME_MINUTES, 0, "WORK_DAY_WAKE_TIME_MINUTES"),
    (WORK_DAY_SLEEP_TIME_HOUR, 22, "WORK_DAY_SLEEP_TIME_HOUR"),
    (WORK_DAY_SLEEP_TIME_MINUTES, 0, "WORK_DAY_SLEEP_TIME_MINUTES"),
    (WEEKEND_DAY_WAKE_TIME_HOUR, 6, "WEEKEND_DAY_WAKE_TIME_HOUR"),
    (WEEKEND_DAY_WAKE_TIME_MINUTES, 0, "WEEKEND_DAY_WAKE_TIME_MINUTES"),
    (WEEKEND_SLEEP_TIME_HOUR, 21, "WEEKEND_SLEEP_TIME_HOUR"),
    (WEEKEND_SLEEP_TIME_MINUTES, 0, "WEEKEND_SLEEP_TIME_MINUTES"),
    (OUTPUT_MANU_ENABLE, 31, "MODBUS_OUTPUT_MANU_ENABLE"),
    (SCHEDULE_ON_OFF, 1, "MODBUS_SCHEDULE_ON_OFF"),
    (SETPOINT_UNLIMIT, 0, "SETPOINT_UNLIMIT"),
    (ICON_MANUAL_MODE, 1, "MODBUS_ICON_MANUAL_MODE"),
];

/// Tenths-of-a-degree register value to a temperature in the display unit
pub fn scale_tenths(raw: u16) -> f64 {
    f64::from(raw) / 10.0
}

/// Celsius to Fahrenheit, rounded to two decimals like the readings we store
pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    let f = celsius * 1.8 + 32.0;
    (f * 100.0).round() / 100.0
}

/// Reading conversion for a tenths-scaled temperature register.
/// `deg_or_cel` is the unit flag the device reports (0 = Celsius).
pub fn temperature_from_raw(raw: u16, deg_or_cel: u16) -> f64 {
    let value = scale_tenths(raw);
    if deg_or_cel == 0 {
        celsius_to_fahrenheit(value)
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temperature_scaling() {
        assert!((scale_tenths(725) - 72.5).abs() < f64::EPSILON);
        // 21.5C -> 70.7F
        assert!((temperature_from_raw(215, 0) - 70.7).abs() < 1e-9);
        assert!((temperature_from_raw(725, 1) - 72.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_fix_table_has_unique_names() {
        let mut names: Vec<&str> = FIX_REGISTER_TABLE.iter().map(|(_, _, n)| *n).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), FIX_REGISTER_TABLE.len());
    }

    #[test]
    fn test_init_list_ends_in_manual_relay_control() {
        // the power-up pass must leave the outputs bus-controlled
        assert!(INIT_WRITE_LIST
            .iter()
            .any(|&(addr, value)| addr == OUTPUT_MANU_ENABLE && value == 31));
    }
}
