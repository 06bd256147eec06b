//! In-memory backend double for engine tests

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Local};

use crate::backend::{Backend, Notifier};
use crate::error::Result;
use crate::model::{
    Alert, Mode, OutsideConditions, PeakSchedule, PowerBudget, SystemData, TelemetryRow,
    ZoneConfig,
};

#[derive(Default)]
pub struct TestBackend {
    pub zone_configs: Mutex<Vec<ZoneConfig>>,
    pub system: Mutex<SystemData>,
    pub budget: Mutex<Option<PowerBudget>>,
    pub peak: Mutex<PeakSchedule>,
    pub outside: Mutex<Option<OutsideConditions>>,
    run_starts: Mutex<HashMap<(u8, String), DateTime<Local>>>,
    last_stops: Mutex<HashMap<(u8, String), DateTime<Local>>>,
    compressor_stops: Mutex<HashMap<u8, DateTime<Local>>>,
    mode_run_ends: Mutex<HashMap<(u8, u16), DateTime<Local>>>,
    fan_on: Mutex<HashMap<u8, DateTime<Local>>>,
    fan_off: Mutex<HashMap<u8, DateTime<Local>>>,
    pub alerts: Mutex<Vec<Alert>>,
    pub overrides: Mutex<Vec<(u8, f64, String)>>,
    pub telemetry: Mutex<Vec<TelemetryRow>>,
}

impl TestBackend {
    pub fn set_run_start(&self, unit_id: u8, status: &str, at: DateTime<Local>) {
        if let Ok(mut map) = self.run_starts.lock() {
            map.insert((unit_id, status.to_string()), at);
        }
    }

    pub fn set_last_stop(&self, unit_id: u8, status: &str, at: DateTime<Local>) {
        if let Ok(mut map) = self.last_stops.lock() {
            map.insert((unit_id, status.to_string()), at);
        }
    }

    pub fn set_compressor_stop(&self, unit_id: u8, at: DateTime<Local>) {
        if let Ok(mut map) = self.compressor_stops.lock() {
            map.insert(unit_id, at);
        }
    }

    pub fn set_mode_run_end(&self, unit_id: u8, mode: Mode, at: DateTime<Local>) {
        if let Ok(mut map) = self.mode_run_ends.lock() {
            map.insert((unit_id, mode.as_num()), at);
        }
    }

    pub fn set_fan_times(
        &self,
        unit_id: u8,
        last_on: Option<DateTime<Local>>,
        last_off: Option<DateTime<Local>>,
    ) {
        if let Some(at) = last_on {
            if let Ok(mut map) = self.fan_on.lock() {
                map.insert(unit_id, at);
            }
        }
        if let Some(at) = last_off {
            if let Ok(mut map) = self.fan_off.lock() {
                map.insert(unit_id, at);
            }
        }
    }

    pub fn override_records(&self) -> Vec<(u8, f64, String)> {
        self.overrides
            .lock()
            .map(|o| o.clone())
            .unwrap_or_default()
    }

    pub fn alert_messages(&self) -> Vec<String> {
        self.alerts
            .lock()
            .map(|alerts| alerts.iter().map(|a| a.message.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Backend for TestBackend {
    async fn fetch_zone_configs(&self) -> Result<Vec<ZoneConfig>> {
        Ok(self.zone_configs.lock().map(|z| z.clone()).unwrap_or_default())
    }

    async fn fetch_system_data(&self) -> Result<SystemData> {
        Ok(self
            .system
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default())
    }

    async fn fetch_power_budget(&self) -> Result<PowerBudget> {
        Ok(self
            .budget
            .lock()
            .ok()
            .and_then(|b| *b)
            .unwrap_or(PowerBudget {
                current_power: 0.0,
                allowed_power: 100.0,
            }))
    }

    async fn fetch_peak_schedule(&self) -> Result<PeakSchedule> {
        Ok(self.peak.lock().map(|p| p.clone()).unwrap_or_default())
    }

    async fn fetch_outside_conditions(&self) -> Result<OutsideConditions> {
        Ok(self
            .outside
            .lock()
            .ok()
            .and_then(|o| *o)
            .unwrap_or(OutsideConditions {
                temperature: 75.0,
                humidity: 40.0,
            }))
    }

    async fn persist_override(
        &self,
        unit_id: u8,
        set_temp: f64,
        override_type: &str,
    ) -> Result<()> {
        if let Ok(mut overrides) = self.overrides.lock() {
            overrides.push((unit_id, set_temp, override_type.to_string()));
        }
        Ok(())
    }

    async fn persist_telemetry(&self, row: &TelemetryRow) -> Result<()> {
        if let Ok(mut telemetry) = self.telemetry.lock() {
            telemetry.push(row.clone());
        }
        Ok(())
    }

    async fn post_alert(&self, alert: &Alert) -> Result<()> {
        if let Ok(mut alerts) = self.alerts.lock() {
            alerts.push(alert.clone());
        }
        Ok(())
    }

    async fn status_run_start(
        &self,
        unit_id: u8,
        status: &str,
    ) -> Result<Option<DateTime<Local>>> {
        Ok(self
            .run_starts
            .lock()
            .ok()
            .and_then(|m| m.get(&(unit_id, status.to_string())).copied()))
    }

    async fn status_last_stop(
        &self,
        unit_id: u8,
        status: &str,
    ) -> Result<Option<DateTime<Local>>> {
        Ok(self
            .last_stops
            .lock()
            .ok()
            .and_then(|m| m.get(&(unit_id, status.to_string())).copied()))
    }

    async fn last_compressor_stop(&self, unit_id: u8) -> Result<Option<DateTime<Local>>> {
        Ok(self
            .compressor_stops
            .lock()
            .ok()
            .and_then(|m| m.get(&unit_id).copied()))
    }

    async fn last_mode_run_end(
        &self,
        unit_id: u8,
        mode: Mode,
    ) -> Result<Option<DateTime<Local>>> {
        Ok(self
            .mode_run_ends
            .lock()
            .ok()
            .and_then(|m| m.get(&(unit_id, mode.as_num())).copied()))
    }

    async fn fan_last_on(&self, unit_id: u8) -> Result<Option<DateTime<Local>>> {
        Ok(self.fan_on.lock().ok().and_then(|m| m.get(&unit_id).copied()))
    }

    async fn fan_last_off(&self, unit_id: u8) -> Result<Option<DateTime<Local>>> {
        Ok(self.fan_off.lock().ok().and_then(|m| m.get(&unit_id).copied()))
    }
}

#[derive(Default)]
pub struct TestNotifier {
    pub messages: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Notifier for TestNotifier {
    async fn notify(&self, title: &str, body: &str) -> Result<()> {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push((title.to_string(), body.to_string()));
        }
        Ok(())
    }
}
