//! Pending write commands toward the units
//!
//! Each command kind keeps at most one pending entry per unit (last write
//! wins) plus a dirty flag. The whole store is persisted as JSON with an
//! atomic rewrite so queued writes survive a service restart.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::model::{Calibration, Mode};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeCommand {
    pub device_manager_id: String,
    pub mode: Mode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanCommand {
    pub device_manager_id: String,
    pub on: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetTempCommand {
    pub device_manager_id: String,
    pub temp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayCommand {
    pub device_manager_id: String,
    /// Raw digital-output value from the unit's relay table
    pub raw: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationCommand {
    pub device_manager_id: String,
    pub calibration: Calibration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumidityCalibrationCommand {
    pub device_manager_id: String,
    pub offset: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortCommand {
    pub device_manager_id: String,
}

/// Everything pending for one unit, removed from the store on take
#[derive(Debug, Default, Clone)]
pub struct PendingCommands {
    pub mode: Option<ModeCommand>,
    pub fan: Option<FanCommand>,
    pub set_temp: Option<SetTempCommand>,
    pub relay: Option<RelayCommand>,
    pub calibration: Option<CalibrationCommand>,
    pub humidity_calibration: Option<HumidityCalibrationCommand>,
    pub fix_registers: bool,
    pub clock_sync: bool,
}

impl PendingCommands {
    pub fn is_empty(&self) -> bool {
        self.mode.is_none()
            && self.fan.is_none()
            && self.set_temp.is_none()
            && self.relay.is_none()
            && self.calibration.is_none()
            && self.humidity_calibration.is_none()
            && !self.fix_registers
            && !self.clock_sync
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    mode: HashMap<u8, ModeCommand>,
    fan: HashMap<u8, FanCommand>,
    set_temp: HashMap<u8, SetTempCommand>,
    relay: HashMap<u8, RelayCommand>,
    calibration: HashMap<u8, CalibrationCommand>,
    humidity_calibration: HashMap<u8, HumidityCalibrationCommand>,
    fix_registers: HashMap<u8, PortCommand>,
    clock_sync: HashMap<u8, PortCommand>,
    #[serde(default)]
    dirty: HashMap<String, bool>,
}

/// Persistent command store
pub struct CommandStore {
    path: PathBuf,
    data: StoreData,
}

impl CommandStore {
    /// Load from disk; a missing or unreadable file starts empty
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let data = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(data) => data,
                Err(err) => {
                    warn!("command store at {} unreadable, starting empty: {err}", path.display());
                    StoreData::default()
                }
            },
            Err(_) => StoreData::default(),
        };
        Self { path, data }
    }

    /// Atomic rewrite: write to a sibling temp file, then rename over
    pub fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let raw = serde_json::to_string_pretty(&self.data)?;
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn mark_dirty(&mut self, kind: &str) {
        self.data.dirty.insert(kind.to_string(), true);
    }

    fn sync_dirty(&mut self) {
        self.data.dirty.insert("mode".into(), !self.data.mode.is_empty());
        self.data.dirty.insert("fan".into(), !self.data.fan.is_empty());
        self.data
            .dirty
            .insert("set_temp".into(), !self.data.set_temp.is_empty());
        self.data.dirty.insert("relay".into(), !self.data.relay.is_empty());
        self.data
            .dirty
            .insert("calibration".into(), !self.data.calibration.is_empty());
        self.data.dirty.insert(
            "humidity_calibration".into(),
            !self.data.humidity_calibration.is_empty(),
        );
        self.data
            .dirty
            .insert("fix_registers".into(), !self.data.fix_registers.is_empty());
        self.data
            .dirty
            .insert("clock_sync".into(), !self.data.clock_sync.is_empty());
    }

    pub fn queue_mode(&mut self, unit_id: u8, command: ModeCommand) -> Result<()> {
        self.data.mode.insert(unit_id, command);
        self.mark_dirty("mode");
        self.persist()
    }

    pub fn queue_fan(&mut self, unit_id: u8, command: FanCommand) -> Result<()> {
        self.data.fan.insert(unit_id, command);
        self.mark_dirty("fan");
        self.persist()
    }

    pub fn queue_set_temp(&mut self, unit_id: u8, command: SetTempCommand) -> Result<()> {
        self.data.set_temp.insert(unit_id, command);
        self.mark_dirty("set_temp");
        self.persist()
    }

    pub fn queue_relay(&mut self, unit_id: u8, command: RelayCommand) -> Result<()> {
        self.data.relay.insert(unit_id, command);
        self.mark_dirty("relay");
        self.persist()
    }

    pub fn queue_calibration(&mut self, unit_id: u8, command: CalibrationCommand) -> Result<()> {
        self.data.calibration.insert(unit_id, command);
        self.mark_dirty("calibration");
        self.persist()
    }

    pub fn queue_humidity_calibration(
        &mut self,
        unit_id: u8,
        command: HumidityCalibrationCommand,
    ) -> Result<()> {
        self.data.humidity_calibration.insert(unit_id, command);
        self.mark_dirty("humidity_calibration");
        self.persist()
    }

    pub fn queue_fix_registers(&mut self, unit_id: u8, command: PortCommand) -> Result<()> {
        self.data.fix_registers.insert(unit_id, command);
        self.mark_dirty("fix_registers");
        self.persist()
    }

    pub fn queue_clock_sync(&mut self, unit_id: u8, command: PortCommand) -> Result<()> {
        self.data.clock_sync.insert(unit_id, command);
        self.mark_dirty("clock_sync");
        self.persist()
    }

    /// Whether anything at all is queued for this unit
    pub fn has_pending(&self, unit_id: u8) -> bool {
        self.data.mode.contains_key(&unit_id)
            || self.data.fan.contains_key(&unit_id)
            || self.data.set_temp.contains_key(&unit_id)
            || self.data.relay.contains_key(&unit_id)
            || self.data.calibration.contains_key(&unit_id)
            || self.data.humidity_calibration.contains_key(&unit_id)
            || self.data.fix_registers.contains_key(&unit_id)
            || self.data.clock_sync.contains_key(&unit_id)
    }

    /// Remove and return everything pending for one unit
    pub fn take_pending(&mut self, unit_id: u8) -> Result<PendingCommands> {
        let pending = PendingCommands {
            mode: self.data.mode.remove(&unit_id),
            fan: self.data.fan.remove(&unit_id),
            set_temp: self.data.set_temp.remove(&unit_id),
            relay: self.data.relay.remove(&unit_id),
            calibration: self.data.calibration.remove(&unit_id),
            humidity_calibration: self.data.humidity_calibration.remove(&unit_id),
            fix_registers: self.data.fix_registers.remove(&unit_id).is_some(),
            clock_sync: self.data.clock_sync.remove(&unit_id).is_some(),
        };
        if !pending.is_empty() {
            self.sync_dirty();
            self.persist()?;
        }
        Ok(pending)
    }

    /// Re-queue commands that could not be delivered, preserving any newer
    /// entry queued meanwhile
    pub fn requeue(&mut self, unit_id: u8, pending: PendingCommands) -> Result<()> {
        if let Some(cmd) = pending.mode {
            self.data.mode.entry(unit_id).or_insert(cmd);
        }
        if let Some(cmd) = pending.fan {
            self.data.fan.entry(unit_id).or_insert(cmd);
        }
        if let Some(cmd) = pending.set_temp {
            self.data.set_temp.entry(unit_id).or_insert(cmd);
        }
        if let Some(cmd) = pending.relay {
            self.data.relay.entry(unit_id).or_insert(cmd);
        }
        if let Some(cmd) = pending.calibration {
            self.data.calibration.entry(unit_id).or_insert(cmd);
        }
        if let Some(cmd) = pending.humidity_calibration {
            self.data.humidity_calibration.entry(unit_id).or_insert(cmd);
        }
        self.sync_dirty();
        self.persist()
    }
}
