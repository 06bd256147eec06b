//! Unit poller
//!
//! Walks the configured fleet once per cycle. For each DLC-managed unit it
//! opens a locked bus session, drains any queued writes, reads the fixed
//! register set and applies device-side corrections (sensor select,
//! setpoint limits, icon, off-mode enforcement, mode/stage mismatches).
//! Any failure marks the unit offline for the cycle and moves on.

pub mod commands;
pub mod fix_registers;

use std::collections::HashMap;

use chrono::Datelike;
use chrono::Timelike;
use tracing::{debug, info, warn};

use crate::backend::Notifier;
use crate::clock::Clock;
use crate::config::SerialConfig;
use crate::error::Result;
use crate::model::{DeviceInfo, Mode, OverrideType, UnitSnapshot, UnitState, UnitTable, ZoneConfig};
use crate::registers;
use crate::transport::{available_ports, BusSession};
use commands::{CommandStore, PendingCommands};

/// Icon register value for the thermostat display, derived from the raw
/// relay status (standard-table encoding) and the active override source
pub fn icon_for(status_raw: u16, override_type: OverrideType) -> u16 {
    if override_type == OverrideType::Uno {
        match status_raw {
            9 | 11 => 19,
            17 | 21 => 21,
            1 => 17,
            _ => 1,
        }
    } else {
        match status_raw {
            9 | 11 => 146,
            17 | 21 => 148,
            1 => 144,
            _ => 128,
        }
    }
}

pub struct Poller<'a> {
    serial: &'a SerialConfig,
    clock: &'a dyn Clock,
}

impl<'a> Poller<'a> {
    pub fn new(serial: &'a SerialConfig, clock: &'a dyn Clock) -> Self {
        Self { serial, clock }
    }

    /// Poll every zone sequentially, returning the merged unit table
    pub async fn poll_all(
        &self,
        zones: &[ZoneConfig],
        store: &mut CommandStore,
        notifier: &dyn Notifier,
        override_types: &HashMap<u8, OverrideType>,
    ) -> UnitTable {
        let ports = match available_ports() {
            Ok(ports) => ports,
            Err(err) => {
                warn!("serial port enumeration failed: {err}");
                Vec::new()
            }
        };

        let mut table = UnitTable::new();
        for zone in zones {
            if !zone.dlc_managed {
                debug!("unit {} not DLC managed, skipping", zone.unit_id);
                continue;
            }
            if !ports.contains(&zone.device_manager_id) {
                warn!(
                    "unit {}: port {} not available",
                    zone.unit_id, zone.device_manager_id
                );
                table.insert(zone.unit_id, UnitState::Offline);
                continue;
            }

            let override_type = override_types
                .get(&zone.unit_id)
                .copied()
                .unwrap_or(OverrideType::Uno);
            match self.poll_unit(zone, store, notifier, override_type).await {
                Ok(snapshot) => {
                    table.insert(zone.unit_id, UnitState::Online(snapshot));
                }
                Err(err) => {
                    warn!("unit {}: poll failed: {err}", zone.unit_id);
                    table.insert(zone.unit_id, UnitState::Offline);
                }
            }
        }
        table
    }

    async fn poll_unit(
        &self,
        zone: &ZoneConfig,
        store: &mut CommandStore,
        notifier: &dyn Notifier,
        override_type: OverrideType,
    ) -> Result<UnitSnapshot> {
        let mut session = BusSession::open(&zone.device_manager_id, self.serial).await?;
        session.set_target(zone.unit_id);

        // liveness probe before anything else
        session.read_register(registers::DIGITAL_OUTPUT_STATUS).await?;

        let pending = store.take_pending(zone.unit_id)?;
        if !pending.is_empty() {
            if let Err(err) = self
                .apply_commands(&mut session, zone, &pending, notifier)
                .await
            {
                warn!("unit {}: command delivery failed: {err}", zone.unit_id);
                store.requeue(zone.unit_id, pending)?;
            }
        }

        let mut snapshot = self.read_snapshot(&mut session, zone).await?;
        self.apply_corrections(&mut session, zone, &mut snapshot, override_type)
            .await?;
        Ok(snapshot)
    }

    async fn apply_commands(
        &self,
        session: &mut BusSession,
        zone: &ZoneConfig,
        pending: &PendingCommands,
        notifier: &dyn Notifier,
    ) -> Result<()> {
        if let Some(cmd) = &pending.mode {
            info!("unit {}: applying mode change to {:?}", zone.unit_id, cmd.mode);
            match cmd.mode {
                Mode::Auto | Mode::Cool | Mode::Heat => {
                    session
                        .write_register(registers::COOL_HEAT_MODE, cmd.mode.as_num())
                        .await?;
                    session
                        .write_register(registers::OUTPUT_MANU_ENABLE, 31)
                        .await?;
                    session
                        .write_register(registers::DIGITAL_OUTPUT_STATUS, 0)
                        .await?;
                }
                Mode::Off => {
                    session
                        .write_register(registers::OUTPUT_MANU_ENABLE, 31)
                        .await?;
                    session
                        .write_register(registers::DIGITAL_OUTPUT_STATUS, 0)
                        .await?;
                }
                Mode::Vent => {
                    session
                        .write_register(registers::OUTPUT_MANU_ENABLE, 31)
                        .await?;
                    session
                        .write_register(registers::DIGITAL_OUTPUT_STATUS, 1)
                        .await?;
                }
            }
        }

        if let Some(cmd) = &pending.fan {
            session
                .write_register(registers::OUTPUT_MANU_ENABLE, 31)
                .await?;
            session
                .write_register(
                    registers::DIGITAL_OUTPUT_STATUS,
                    if cmd.on { 1 } else { 0 },
                )
                .await?;
        }

        if let Some(cmd) = &pending.set_temp {
            let target = cmd.temp.round() as u16;
            // widen the device limits before writing rather than clamping
            let max = session.read_register(registers::MAX_SETPOINT).await?;
            if target > max {
                session.write_register(registers::MAX_SETPOINT, target).await?;
            }
            let min = session.read_register(registers::MIN_SETPOINT).await?;
            if target < min {
                session.write_register(registers::MIN_SETPOINT, target).await?;
            }
            let tenths = (cmd.temp * 10.0).round() as u16;
            session.write_register(registers::DAY_SETPOINT, tenths).await?;
            session
                .write_register(registers::NIGHT_SETPOINT, tenths)
                .await?;
        }

        if let Some(cmd) = &pending.relay {
            session
                .write_register(registers::OUTPUT_MANU_ENABLE, 31)
                .await?;
            session
                .write_confirmed(registers::DIGITAL_OUTPUT_STATUS, cmd.raw)
                .await?;
        }

        if let Some(cmd) = &pending.calibration {
            if let Some(internal) = cmd.calibration.internal {
                session
                    .write_register(
                        registers::INTERNAL_THERMISTOR,
                        (internal * 10.0).round() as u16,
                    )
                    .await?;
            }
            if let Some(remote) = cmd.calibration.remote {
                session
                    .write_register(registers::ANALOG_INPUT1, (remote * 10.0).round() as u16)
                    .await?;
            }
            if let Some(supply) = cmd.calibration.supply {
                session
                    .write_register(registers::ANALOG_INPUT2, (supply * 10.0).round() as u16)
                    .await?;
            }
        }

        if let Some(cmd) = &pending.humidity_calibration {
            session
                .write_register(registers::HUMIDITY, (cmd.offset * 10.0).round() as u16)
                .await?;
        }

        if pending.clock_sync {
            let now = self.clock.now();
            session
                .write_register(registers::CLOCK_YEAR, (now.year() % 100) as u16)
                .await?;
            session
                .write_register(registers::CLOCK_MONTH, now.month() as u16)
                .await?;
            session
                .write_register(registers::CLOCK_DAY, now.day() as u16)
                .await?;
            session
                .write_register(registers::CLOCK_HOUR, now.hour() as u16)
                .await?;
            session
                .write_register(registers::CLOCK_MINUTE, now.minute() as u16)
                .await?;
        }

        if pending.fix_registers {
            let audits =
                fix_registers::audit_unit(session, self.serial.write_retries).await?;
            let report = fix_registers::build_report(zone.unit_id, &audits);
            if let Err(err) = notifier
                .notify(&format!("Register audit, unit {}", zone.unit_id), &report)
                .await
            {
                warn!("unit {}: audit report delivery failed: {err}", zone.unit_id);
            }
        }

        Ok(())
    }

    async fn read_snapshot(
        &self,
        session: &mut BusSession,
        zone: &ZoneConfig,
    ) -> Result<UnitSnapshot> {
        let sensor_type = session.read_register(registers::TEMP_SELECT).await?;

        // keep the sensor source aligned with the configuration
        let desired_sensor = if zone.power_information.heating.use_remote_sensor {
            1
        } else {
            2
        };
        let sensor_type = if sensor_type != desired_sensor {
            info!(
                "unit {}: switching temperature source to {}",
                zone.unit_id,
                if desired_sensor == 1 { "remote sensor" } else { "internal thermistor" }
            );
            session
                .write_register(registers::TEMP_SELECT, desired_sensor)
                .await?;
            desired_sensor
        } else {
            sensor_type
        };

        let deg_or_cel = session.read_register(registers::DEGC_OR_F).await?;

        let mut min_setpoint = None;
        let mut max_setpoint = None;
        if zone.keypad_adjust.enabled {
            let device_min = session.read_register(registers::MIN_SETPOINT).await?;
            let device_max = session.read_register(registers::MAX_SETPOINT).await?;
            min_setpoint = Some(
                self.sync_limit(
                    session,
                    zone,
                    registers::MIN_SETPOINT,
                    zone.keypad_adjust.min_setpoint,
                    device_min,
                    deg_or_cel,
                )
                .await?,
            );
            max_setpoint = Some(
                self.sync_limit(
                    session,
                    zone,
                    registers::MAX_SETPOINT,
                    zone.keypad_adjust.max_setpoint,
                    device_max,
                    deg_or_cel,
                )
                .await?,
            );
        }

        let current_temp = registers::temperature_from_raw(
            session.read_register(registers::TEMPERATURE_CHIP).await?,
            deg_or_cel,
        );
        let set_temp = registers::temperature_from_raw(
            session.read_register(registers::DAY_SETPOINT).await?,
            deg_or_cel,
        );
        let supply_temp = registers::temperature_from_raw(
            session.read_register(registers::ANALOG_INPUT2).await?,
            deg_or_cel,
        );

        let relay_raw = session
            .read_register(registers::DIGITAL_OUTPUT_STATUS)
            .await?;
        let mode_num = session.read_register(registers::COOL_HEAT_MODE).await?;

        let humidity = if zone.humidity.enabled {
            match session.read_register(registers::HUMIDITY).await {
                Ok(raw) => Some(f64::from(raw) / 10.0),
                Err(err) => {
                    debug!("unit {}: humidity read failed: {err}", zone.unit_id);
                    None
                }
            }
        } else {
            None
        };

        let device_info = self.read_device_info(session).await?;

        Ok(UnitSnapshot {
            sensor_type,
            deg_or_cel,
            current_temp,
            set_temp,
            supply_temp,
            humidity,
            relay_raw,
            mode_num,
            min_setpoint: min_setpoint.map(f64::from),
            max_setpoint: max_setpoint.map(f64::from),
            device_info,
        })
    }

    /// Write a keypad limit when the configured value differs from the
    /// device; limits are whole degrees in the device's display unit
    async fn sync_limit(
        &self,
        session: &mut BusSession,
        zone: &ZoneConfig,
        address: u16,
        configured: Option<f64>,
        device_value: u16,
        deg_or_cel: u16,
    ) -> Result<u16> {
        let Some(configured) = configured else {
            return Ok(device_value);
        };
        let mut target = configured;
        if deg_or_cel == 0 {
            target = (target - 32.0) * 5.0 / 9.0;
        }
        let target = target.round() as u16;
        if target != device_value {
            info!(
                "unit {}: setting register {address} limit to {target}",
                zone.unit_id
            );
            session.write_register(address, target).await?;
            return Ok(target);
        }
        Ok(device_value)
    }

    async fn read_device_info(&self, session: &mut BusSession) -> Result<DeviceInfo> {
        Ok(DeviceInfo {
            modbus_address: session.read_register(registers::ADDRESS).await?,
            product_model: registers::scale_tenths(
                session.read_register(registers::PRODUCT_MODEL).await?,
            ),
            hardware_rev: session.read_register(registers::HARDWARE_REV).await?,
            pic_version: session.read_register(registers::PIC_VERSION).await?,
            internal_thermistor: registers::scale_tenths(
                session.read_register(registers::INTERNAL_THERMISTOR).await?,
            ),
            analog_input1: registers::scale_tenths(
                session.read_register(registers::ANALOG_INPUT1).await?,
            ),
            day_heat_setpoint: registers::scale_tenths(
                session
                    .read_register(registers::DAY_HEATING_SETPOINT)
                    .await?,
            ),
            day_cool_setpoint: registers::scale_tenths(
                session
                    .read_register(registers::DAY_COOLING_SETPOINT)
                    .await?,
            ),
            night_heat_setpoint: registers::scale_tenths(
                session
                    .read_register(registers::NIGHT_HEATING_SETPOINT)
                    .await?,
            ),
            night_cool_setpoint: registers::scale_tenths(
                session
                    .read_register(registers::NIGHT_COOLING_SETPOINT)
                    .await?,
            ),
            day_heat_deadband: registers::scale_tenths(
                session
                    .read_register(registers::DAY_HEATING_DEADBAND)
                    .await?,
            ),
            day_cool_deadband: registers::scale_tenths(
                session
                    .read_register(registers::DAY_COOLING_DEADBAND)
                    .await?,
            ),
            night_heat_deadband: registers::scale_tenths(
                session
                    .read_register(registers::NIGHT_HEATING_DEADBAND)
                    .await?,
            ),
            night_cool_deadband: registers::scale_tenths(
                session
                    .read_register(registers::NIGHT_COOLING_DEADBAND)
                    .await?,
            ),
            control_relay: session.read_register(registers::OUTPUT_MANU_ENABLE).await?,
        })
    }

    /// Device-side consistency fixes after the reads
    async fn apply_corrections(
        &self,
        session: &mut BusSession,
        zone: &ZoneConfig,
        snapshot: &mut UnitSnapshot,
        override_type: OverrideType,
    ) -> Result<()> {
        // display icon follows relay state and override source
        let icon = icon_for(snapshot.relay_raw, override_type);
        let current_icon = session.read_register(registers::ICON_MANUAL_VALUE).await?;
        if current_icon != icon {
            session
                .write_register(registers::ICON_MANUAL_VALUE, icon)
                .await?;
        }

        let stage = snapshot.stage(zone.relay_variant());

        let force_off = match zone.mode {
            Mode::Off => snapshot.relay_raw != 0,
            Mode::Cool => matches!(stage, Some(s) if s.is_heating()) || stage.is_none(),
            Mode::Heat => {
                matches!(stage, Some(s) if s.is_cooling()) || stage.is_none()
            }
            Mode::Auto => stage.is_none(),
            Mode::Vent => false,
        };

        if force_off {
            info!(
                "unit {}: relay {} inconsistent with mode {:?}, forcing outputs off",
                zone.unit_id, snapshot.relay_raw, zone.mode
            );
            session
                .write_register(registers::OUTPUT_MANU_ENABLE, 31)
                .await?;
            session
                .write_register(registers::DIGITAL_OUTPUT_STATUS, 0)
                .await?;
            snapshot.relay_raw = 0;
        }

        Ok(())
    }

    /// Power-up initialization: write the fixed register list to every
    /// reachable DLC-managed unit
    pub async fn initialize_registers(&self, zones: &[ZoneConfig]) {
        info!("initializing registers across the fleet");
        let ports = match available_ports() {
            Ok(ports) => ports,
            Err(err) => {
                warn!("serial port enumeration failed: {err}");
                return;
            }
        };

        for zone in zones {
            if !zone.dlc_managed {
                continue;
            }
            if !ports.contains(&zone.device_manager_id) {
                warn!(
                    "unit {}: port {} not available, skipping init",
                    zone.unit_id, zone.device_manager_id
                );
                continue;
            }
            if let Err(err) = self.initialize_unit(zone).await {
                warn!("unit {}: register init failed: {err}", zone.unit_id);
            }
        }
    }

    async fn initialize_unit(&self, zone: &ZoneConfig) -> Result<()> {
        let mut session = BusSession::open(&zone.device_manager_id, self.serial).await?;
        session.set_target(zone.unit_id);
        session.read_register(registers::DIGITAL_OUTPUT_STATUS).await?;

        for &(address, value) in registers::INIT_WRITE_LIST {
            if let Err(err) = session.write_register(address, value).await {
                warn!(
                    "unit {}: init write {address}={value} failed: {err}",
                    zone.unit_id
                );
            }
        }
        info!("unit {} initialized", zone.unit_id);
        Ok(())
    }
}
