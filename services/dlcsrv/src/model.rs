//! Domain types shared by the poller, resolver, stage controller and
//! evaluators. Zone configuration mirrors what the backend serves; live unit
//! readings are refreshed every poll cycle.

use std::collections::HashMap;

use chrono::{DateTime, Local, NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use crate::relay::{RelayVariant, Stage};

/// Operating mode of a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Auto,
    Cool,
    Heat,
    Off,
    Vent,
}

impl Mode {
    pub fn as_num(&self) -> u16 {
        match self {
            Mode::Auto => 0,
            Mode::Cool => 1,
            Mode::Heat => 2,
            Mode::Off => 3,
            Mode::Vent => 4,
        }
    }

    pub fn from_num(num: u16) -> Self {
        match num {
            1 => Mode::Cool,
            2 => Mode::Heat,
            3 => Mode::Off,
            4 => Mode::Vent,
            _ => Mode::Auto,
        }
    }
}

/// Setpoint override source, ordered by resolution priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverrideType {
    /// Manual override
    M,
    /// Keypad adjustment hold
    K,
    /// Calendar event
    E,
    /// Holiday
    H,
    /// Schedule block
    S,
    /// Pre-peak precool
    Ppc,
    /// Peak window
    P,
    /// Occupied preheat
    Oph,
    /// Occupied precool
    Opc,
    /// Occupied hours
    Occ,
    /// Unoccupied
    Uno,
}

impl OverrideType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideType::M => "M",
            OverrideType::K => "K",
            OverrideType::E => "E",
            OverrideType::H => "H",
            OverrideType::S => "S",
            OverrideType::Ppc => "PPC",
            OverrideType::P => "P",
            OverrideType::Oph => "OPH",
            OverrideType::Opc => "OPC",
            OverrideType::Occ => "OCC",
            OverrideType::Uno => "UNO",
        }
    }
}

/// Outcome of a setpoint resolution for one zone
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub set_temp: f64,
    pub override_type: OverrideType,
    pub expire_time: Option<DateTime<Local>>,
}

/// A daily time window, end exclusive
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start <= time && time < self.end
    }
}

/// Occupancy window per weekday, `None` = unoccupied all day
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeeklyWindows {
    pub monday: Option<TimeWindow>,
    pub tuesday: Option<TimeWindow>,
    pub wednesday: Option<TimeWindow>,
    pub thursday: Option<TimeWindow>,
    pub friday: Option<TimeWindow>,
    pub saturday: Option<TimeWindow>,
    pub sunday: Option<TimeWindow>,
}

impl WeeklyWindows {
    pub fn for_weekday(&self, weekday: Weekday) -> Option<TimeWindow> {
        match weekday {
            Weekday::Mon => self.monday,
            Weekday::Tue => self.tuesday,
            Weekday::Wed => self.wednesday,
            Weekday::Thu => self.thursday,
            Weekday::Fri => self.friday,
            Weekday::Sat => self.saturday,
            Weekday::Sun => self.sunday,
        }
    }
}

/// One-off calendar event with its own setpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub date: NaiveDate,
    pub window: TimeWindow,
    pub set_temp: f64,
}

/// Recurring weekly schedule block with its own setpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleBlock {
    pub weekday: String,
    pub window: TimeWindow,
    pub set_temp: f64,
}

impl ScheduleBlock {
    pub fn matches_weekday(&self, weekday: Weekday) -> bool {
        self.weekday.eq_ignore_ascii_case(weekday_name(weekday))
    }
}

pub fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

/// Active manual override pushed from the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualOverride {
    pub set_temp: f64,
    pub end_time: DateTime<Local>,
}

/// Keypad adjustment policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeypadAdjust {
    pub enabled: bool,
    pub min_setpoint: Option<f64>,
    pub max_setpoint: Option<f64>,
}

/// Target setpoints per occupancy state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneSetpoints {
    pub occ_cool_ideal: f64,
    pub occ_cool_high: f64,
    pub occ_heat_ideal: f64,
    pub unocc_cool_ideal: f64,
    pub unocc_heat_ideal: f64,
}

/// Temperature alarm thresholds, strict comparisons
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmLimits {
    pub cold_alarm: f64,
    pub warm_alarm: f64,
}

/// Connected compressor/fan loads in kW
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoolingPower {
    pub comp1_kw: f64,
    pub comp2_kw: f64,
    /// Supply fan
    pub comp3_kw: f64,
}

/// Heat source family, decides which loads a heat call draws
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HeatSource {
    #[default]
    HeatPump,
    Gas,
    Electric,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeatingPower {
    pub source: HeatSource,
    pub stage1_kw: f64,
    pub stage2_kw: f64,
    pub use_remote_sensor: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PowerInformation {
    pub cooling: CoolingPower,
    pub heating: HeatingPower,
}

/// Supply-air protection limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplyCutoff {
    /// Cooling cut when supply drops below this
    pub cool_cutoff: f64,
    /// Cooling resumes once supply rises above this
    pub cool_cutin: f64,
    /// Heating cut when supply rises above this
    pub heat_cutoff: f64,
    /// Heating resumes once supply falls below this
    pub heat_cutin: f64,
}

/// Humidity control policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HumidityPolicy {
    pub enabled: bool,
    pub target: f64,
    pub tolerance: f64,
    /// Max continuous dehumidify run before alerting, minutes
    pub run_time_minutes: i64,
}

/// Fan operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FanMode {
    On,
    OccupiedHours,
    Recirculation,
    #[default]
    Off,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FanPolicy {
    pub mode: FanMode,
    /// Recirculation on-time, minutes
    pub minutes_on: i64,
    /// Recirculation total period, minutes
    pub refresh_period: i64,
}

/// Facility purge windows: a start time per weekday plus a shared run time
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PurgePolicy {
    pub monday: Option<NaiveTime>,
    pub tuesday: Option<NaiveTime>,
    pub wednesday: Option<NaiveTime>,
    pub thursday: Option<NaiveTime>,
    pub friday: Option<NaiveTime>,
    pub saturday: Option<NaiveTime>,
    pub sunday: Option<NaiveTime>,
    pub run_time_minutes: i64,
}

impl PurgePolicy {
    pub fn start_for_weekday(&self, weekday: Weekday) -> Option<NaiveTime> {
        match weekday {
            Weekday::Mon => self.monday,
            Weekday::Tue => self.tuesday,
            Weekday::Wed => self.wednesday,
            Weekday::Thu => self.thursday,
            Weekday::Fri => self.friday,
            Weekday::Sat => self.saturday,
            Weekday::Sun => self.sunday,
        }
    }
}

/// Supply-temperature effectiveness alarm policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupplyAlarmPolicy {
    pub enabled: bool,
    /// Expected spread between room and supply temperature
    pub alarm_delta: f64,
    /// Minimum run time before the check applies, minutes
    pub test_time_minutes: i64,
}

/// Sensor calibration offsets, written when present
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub internal: Option<f64>,
    pub remote: Option<f64>,
    pub supply: Option<f64>,
    pub humidity: Option<f64>,
}

/// Full zone configuration as served by the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub unit_id: u8,
    pub name: String,
    /// Serial port path of the bus this unit hangs on
    pub device_manager_id: String,
    pub dlc_managed: bool,
    pub mode: Mode,
    /// Heat-pump relay wiring code, see [`RelayVariant::from_code`]
    pub heat_pump_relay_code: i64,
    /// Lower number = more important, priority 1 is never demand-shed
    pub zone_priority: u32,
    /// Stage-2 cooling available
    pub multi_stage_cool: bool,
    /// Stage-2 heating available
    pub multi_stage_heat: bool,
    pub occupied_hours: WeeklyWindows,
    pub setpoints: ZoneSetpoints,
    pub alarms: AlarmLimits,
    pub manual_override: Option<ManualOverride>,
    pub keypad_adjust: KeypadAdjust,
    pub calendar_events: Vec<CalendarEvent>,
    pub holidays: Vec<NaiveDate>,
    pub schedule_blocks: Vec<ScheduleBlock>,
    /// Occupied precool lead time, minutes
    pub precool_time_minutes: i64,
    /// Occupied preheat lead time, minutes
    pub preheat_time_minutes: i64,
    /// Pre-peak precool lead time, minutes
    pub peak_precool_minutes: i64,
    pub power_information: PowerInformation,
    pub supply_cutoff: SupplyCutoff,
    pub humidity: HumidityPolicy,
    pub fan: FanPolicy,
    pub purge: PurgePolicy,
    pub supply_alarm: SupplyAlarmPolicy,
    pub five_twenty_five_enabled: bool,
    pub calibration: Calibration,
}

impl ZoneConfig {
    pub fn relay_variant(&self) -> RelayVariant {
        RelayVariant::from_code(self.heat_pump_relay_code)
    }

    pub fn is_heat_pump(&self) -> bool {
        self.power_information.heating.source == HeatSource::HeatPump
    }
}

/// Site-wide tuning values fetched from system configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemData {
    /// Setpoint deadband, degrees
    pub hysteresis: f64,
    /// Extra margin beyond hysteresis that triggers stage 2
    pub stage2_trigger_delta: f64,
    /// Compressor anti-short-cycle time, minutes
    pub decompression_minutes: i64,
    /// Minimum time between heat/cool changeover in auto, minutes
    pub min_switch_minutes: i64,
    /// Demand-fallback setpoint-raise duration, minutes
    pub override_limit_minutes: i64,
    /// Keypad adjustment hold, hours
    pub keypad_override_hours: i64,
    pub is_demand_allowed: bool,
    /// Outside temperature above which the 5/25 rule is skipped
    pub temp_limit_525: f64,
    /// Outside temperature below which cooling is locked out
    pub cool_low_limit: f64,
    /// Outside temperature above which heating is locked out
    pub heat_hi_limit: f64,
    /// Offline duration before an alert is raised, minutes
    pub offline_alert_minutes: i64,
    pub baud_rate: u32,
}

impl Default for SystemData {
    fn default() -> Self {
        Self {
            hysteresis: 1.0,
            stage2_trigger_delta: 2.0,
            decompression_minutes: 5,
            min_switch_minutes: 30,
            override_limit_minutes: 30,
            keypad_override_hours: 2,
            is_demand_allowed: true,
            temp_limit_525: 90.0,
            cool_low_limit: 55.0,
            heat_hi_limit: 80.0,
            offline_alert_minutes: 15,
            baud_rate: 19200,
        }
    }
}

/// Site electrical budget for the current cycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PowerBudget {
    pub current_power: f64,
    pub allowed_power: f64,
}

/// Utility peak period: a date range with a daily time window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeakWindow {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub window: TimeWindow,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeakSchedule {
    pub windows: Vec<PeakWindow>,
}

impl PeakSchedule {
    /// Whether `now` falls inside any peak window
    pub fn in_peak(&self, now: DateTime<Local>) -> bool {
        let date = now.date_naive();
        let time = now.time();
        self.windows
            .iter()
            .any(|w| w.start_date <= date && date <= w.end_date && w.window.contains(time))
    }

    /// Whether `now` falls in the precool lead-up to a peak window today
    pub fn in_precool(&self, now: DateTime<Local>, lead_minutes: i64) -> bool {
        let date = now.date_naive();
        let time = now.time();
        self.windows.iter().any(|w| {
            if w.start_date > date || date > w.end_date {
                return false;
            }
            let lead = chrono::Duration::minutes(lead_minutes);
            let precool_start = w.window.start - lead;
            precool_start <= time && time < w.window.start
        })
    }
}

/// Outdoor conditions for lockouts and the 5/25 rule
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OutsideConditions {
    pub temperature: f64,
    pub humidity: f64,
}

/// Alert raised toward the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub unit_id: u8,
    pub warning_code: u16,
    pub message: String,
}

/// One telemetry row persisted after a poll
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRow {
    pub unit_id: u8,
    pub status: String,
    pub mode: Mode,
    pub set_temp: f64,
    pub current_temp: f64,
    pub supply_temp: f64,
    pub timestamp: DateTime<Local>,
}

/// Device-information registers captured for diagnostics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub modbus_address: u16,
    pub product_model: f64,
    pub hardware_rev: u16,
    pub pic_version: u16,
    pub internal_thermistor: f64,
    pub analog_input1: f64,
    pub day_heat_setpoint: f64,
    pub day_cool_setpoint: f64,
    pub night_heat_setpoint: f64,
    pub night_cool_setpoint: f64,
    pub day_heat_deadband: f64,
    pub day_cool_deadband: f64,
    pub night_heat_deadband: f64,
    pub night_cool_deadband: f64,
    pub control_relay: u16,
}

/// Live readings from one unit, refreshed every poll cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitSnapshot {
    pub sensor_type: u16,
    /// 0 = Celsius display, 1 = Fahrenheit
    pub deg_or_cel: u16,
    pub current_temp: f64,
    pub set_temp: f64,
    pub supply_temp: f64,
    pub humidity: Option<f64>,
    pub relay_raw: u16,
    pub mode_num: u16,
    pub min_setpoint: Option<f64>,
    pub max_setpoint: Option<f64>,
    pub device_info: DeviceInfo,
}

impl UnitSnapshot {
    /// Stage decoded with this family's relay table, `None` = OFFLINE raw
    pub fn stage(&self, variant: RelayVariant) -> Option<Stage> {
        crate::relay::stage_table(variant).from_raw(self.relay_raw)
    }

    pub fn status_label(&self, variant: RelayVariant) -> &'static str {
        crate::relay::stage_table(variant).label_for_raw(self.relay_raw)
    }
}

/// Poll outcome for a unit
#[derive(Debug, Clone)]
pub enum UnitState {
    Offline,
    Online(UnitSnapshot),
}

impl UnitState {
    pub fn snapshot(&self) -> Option<&UnitSnapshot> {
        match self {
            UnitState::Online(snapshot) => Some(snapshot),
            UnitState::Offline => None,
        }
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, UnitState::Offline)
    }
}

/// Latest poll results keyed by unit id
pub type UnitTable = HashMap<u8, UnitState>;
