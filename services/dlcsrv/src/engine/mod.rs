//! Demand-limiting control engine
//!
//! One cycle fetches the fleet configuration and site conditions, polls
//! every unit over the bus, then walks the zones: resolve the setpoint,
//! arbitrate auto mode, run the staging state machine, apply the
//! protective evaluators and persist telemetry.

pub mod auto_mode;
pub mod demand;
pub mod fan;
pub mod five_twenty_five;
pub mod humidity;
pub mod power;
pub mod purge;
pub mod resolver;
pub mod stage;
pub mod supply_alarm;

#[cfg(test)]
pub(crate) mod test_backend;

use std::collections::HashMap;

use chrono::{DateTime, Duration, Local};
use tracing::{info, warn};

use crate::backend::{Backend, Notifier};
use crate::clock::Clock;
use crate::config::SerialConfig;
use crate::error::Result;
use crate::model::{
    Alert, OutsideConditions, OverrideType, PeakSchedule, PowerBudget, SystemData,
    TelemetryRow, UnitSnapshot, UnitTable, ZoneConfig,
};
use crate::poller::commands::{CommandStore, RelayCommand, SetTempCommand};
use crate::poller::Poller;
use crate::relay::{stage_table, Stage};
use crate::state::Fleet;

pub const WARNING_UNIT_OFFLINE: u16 = 17;

/// Cross-cycle engine state
#[derive(Default)]
pub struct Engine {
    fleet: Fleet,
    /// Override tag each zone resolved to last cycle, drives the unit icon
    override_types: HashMap<u8, OverrideType>,
    /// Last persisted telemetry per unit, to write rows only on change
    last_telemetry: HashMap<u8, (String, f64)>,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch, poll, process. One full control cycle.
    pub async fn run_cycle(
        &mut self,
        serial: &SerialConfig,
        clock: &dyn Clock,
        store: &mut CommandStore,
        backend: &dyn Backend,
        notifier: &dyn Notifier,
    ) -> Result<()> {
        let zones = backend.fetch_zone_configs().await?;
        let system = backend.fetch_system_data().await?;
        let budget = backend.fetch_power_budget().await?;
        let peak = backend.fetch_peak_schedule().await?;
        let outside = backend.fetch_outside_conditions().await?;

        let poller = Poller::new(serial, clock);
        let units = poller
            .poll_all(&zones, store, notifier, &self.override_types)
            .await;

        self.process(
            &zones,
            &units,
            &system,
            &budget,
            &peak,
            &outside,
            store,
            backend,
            clock.now(),
        )
        .await
    }

    /// Run the control pass over an already polled unit table
    #[allow(clippy::too_many_arguments)]
    pub async fn process(
        &mut self,
        zones: &[ZoneConfig],
        units: &UnitTable,
        system: &SystemData,
        budget: &PowerBudget,
        peak: &PeakSchedule,
        outside: &OutsideConditions,
        store: &mut CommandStore,
        backend: &dyn Backend,
        now: DateTime<Local>,
    ) -> Result<()> {
        for zone in zones {
            if !zone.dlc_managed {
                continue;
            }
            let Some(state) = units.get(&zone.unit_id) else {
                continue;
            };
            let Some(snapshot) = state.snapshot() else {
                self.handle_offline(zone, system, backend, now).await?;
                continue;
            };

            {
                let runtime = self.fleet.zone(zone.unit_id);
                runtime.offline_since = None;
                runtime.offline_alerted = false;
            }

            if let Err(err) = self
                .process_zone(
                    zone, snapshot, zones, units, system, budget, peak, outside, store,
                    backend, now,
                )
                .await
            {
                warn!("unit {}: control pass failed: {err}", zone.unit_id);
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_zone(
        &mut self,
        zone: &ZoneConfig,
        snapshot: &UnitSnapshot,
        zones: &[ZoneConfig],
        units: &UnitTable,
        system: &SystemData,
        budget: &PowerBudget,
        peak: &PeakSchedule,
        outside: &OutsideConditions,
        store: &mut CommandStore,
        backend: &dyn Backend,
        now: DateTime<Local>,
    ) -> Result<()> {
        let resolution = resolver::resolve(
            zone,
            snapshot,
            self.fleet.zone(zone.unit_id),
            system,
            peak,
            backend,
            now,
        )
        .await?;
        self.override_types
            .insert(zone.unit_id, resolution.override_type);

        // push the resolved setpoint to the device when it drifted, unless
        // the device value is the keypad hold itself
        if resolution.override_type != OverrideType::K
            && (resolution.set_temp - snapshot.set_temp).abs() >= 0.5
        {
            store.queue_set_temp(
                zone.unit_id,
                SetTempCommand {
                    device_manager_id: zone.device_manager_id.clone(),
                    temp: resolution.set_temp,
                },
            )?;
            // the write is ours, not a keypad touch
            self.fleet.zone(zone.unit_id).last_device_setpoint = Some(resolution.set_temp);
        }

        let mode = auto_mode::arbitrate(
            zone,
            snapshot,
            self.fleet.zone(zone.unit_id),
            resolution.override_type,
            resolution.set_temp,
            system,
            backend,
            now,
        )
        .await?;

        // a zone resting its compressor is left alone until the rest ends
        let resting = self.fleet.zone(zone.unit_id).five_twenty_five.resting(now);
        let outcome = if resting {
            stage::StageOutcome {
                operation: "5/25 rest".to_string(),
                ..Default::default()
            }
        } else {
            stage::run(
                zone,
                snapshot,
                mode,
                resolution.set_temp,
                zones,
                units,
                system,
                budget,
                outside,
                &mut self.fleet,
                backend,
                now,
            )
            .await?
        };

        for shed in &outcome.sheds {
            let Some(shed_zone) = zones.iter().find(|z| z.unit_id == shed.unit_id) else {
                continue;
            };
            self.queue_stage(store, shed_zone, shed.new_stage)?;
            self.fleet.zone(shed.unit_id).dlc_operation = "demand shed".to_string();
        }

        let mut change = outcome.change;
        let mut operation = outcome.operation;

        if change.is_none() {
            // protective evaluators only act on a stage the controller left alone
            if let Some(stage) = five_twenty_five::evaluate(
                zone,
                snapshot,
                self.fleet.zone(zone.unit_id),
                outside,
                system,
                backend,
                now,
            )
            .await?
            {
                change = Some(stage);
                operation = "5/25 rest".to_string();
            } else if let Some(stage) = humidity::evaluate(
                zone,
                snapshot,
                self.fleet.zone(zone.unit_id),
                system,
                backend,
                now,
            )
            .await?
            {
                change = Some(stage);
                operation = "dehumidify".to_string();
            } else if let Some(stage) =
                purge::evaluate(zone, snapshot, self.fleet.zone(zone.unit_id), now)
            {
                change = Some(stage);
                operation = "purge".to_string();
            }
        }

        supply_alarm::evaluate(zone, snapshot, backend, now).await?;

        if let Some(stage) = change {
            self.queue_stage(store, zone, stage)?;
            let runtime = self.fleet.zone(zone.unit_id);
            runtime.last_relay = Some(stage);
            runtime.dlc_operation = operation;
        } else {
            self.fleet.zone(zone.unit_id).dlc_operation = operation;
        }

        let status = snapshot.status_label(zone.relay_variant()).to_string();
        let observed = (status.clone(), resolution.set_temp);
        if self.last_telemetry.get(&zone.unit_id) != Some(&observed) {
            backend
                .persist_telemetry(&TelemetryRow {
                    unit_id: zone.unit_id,
                    status,
                    mode,
                    set_temp: resolution.set_temp,
                    current_temp: snapshot.current_temp,
                    supply_temp: snapshot.supply_temp,
                    timestamp: now,
                })
                .await?;
            self.last_telemetry.insert(zone.unit_id, observed);
        }

        Ok(())
    }

    fn queue_stage(
        &mut self,
        store: &mut CommandStore,
        zone: &ZoneConfig,
        stage: Stage,
    ) -> Result<()> {
        let raw = stage_table(zone.relay_variant()).to_raw(stage);
        info!("unit {}: queueing relay {:?} (raw {raw})", zone.unit_id, stage);
        store.queue_relay(
            zone.unit_id,
            RelayCommand {
                device_manager_id: zone.device_manager_id.clone(),
                raw,
            },
        )
    }

    async fn handle_offline(
        &mut self,
        zone: &ZoneConfig,
        system: &SystemData,
        backend: &dyn Backend,
        now: DateTime<Local>,
    ) -> Result<()> {
        let (since, alerted) = {
            let runtime = self.fleet.zone(zone.unit_id);
            let since = *runtime.offline_since.get_or_insert(now);
            (since, runtime.offline_alerted)
        };
        if !alerted && now - since >= Duration::minutes(system.offline_alert_minutes) {
            warn!(
                "unit {} offline for {} minutes",
                zone.unit_id,
                (now - since).num_minutes()
            );
            backend
                .post_alert(&Alert {
                    unit_id: zone.unit_id,
                    warning_code: WARNING_UNIT_OFFLINE,
                    message: format!(
                        "Unit {} has been offline for {} minutes",
                        zone.unit_id,
                        (now - since).num_minutes()
                    ),
                })
                .await?;
            self.fleet.zone(zone.unit_id).offline_alerted = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UnitState;
    use crate::test_support::{snapshot, zone_config};
    use chrono::TimeZone;
    use test_backend::TestBackend;

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 7, 1, 14, 0, 0).unwrap()
    }

    fn defaults() -> (SystemData, PowerBudget, PeakSchedule, OutsideConditions) {
        (
            SystemData::default(),
            PowerBudget {
                current_power: 10.0,
                allowed_power: 100.0,
            },
            PeakSchedule::default(),
            OutsideConditions {
                temperature: 75.0,
                humidity: 40.0,
            },
        )
    }

    #[tokio::test]
    async fn test_warm_zone_gets_relay_command_and_telemetry() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CommandStore::load(dir.path().join("queues.json"));
        let mut engine = Engine::new();
        let backend = TestBackend::default();
        let (system, budget, peak, outside) = defaults();

        let zones = vec![zone_config(1)];
        let mut units = UnitTable::new();
        units.insert(1, UnitState::Online(snapshot(74.0, 72.0, 0)));

        engine
            .process(
                &zones, &units, &system, &budget, &peak, &outside, &mut store, &backend,
                now(),
            )
            .await
            .unwrap();

        let pending = store.take_pending(1).unwrap();
        assert_eq!(pending.relay.unwrap().raw, 9);
        assert_eq!(backend.telemetry.lock().unwrap().len(), 1);
        assert_eq!(engine.override_types.get(&1), Some(&OverrideType::Occ));
    }

    #[tokio::test]
    async fn test_unchanged_zone_persists_telemetry_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CommandStore::load(dir.path().join("queues.json"));
        let mut engine = Engine::new();
        let backend = TestBackend::default();
        let (system, budget, peak, outside) = defaults();

        let zones = vec![zone_config(1)];
        let mut units = UnitTable::new();
        // already cooling and between the bands, nothing to do
        units.insert(1, UnitState::Online(snapshot(72.5, 72.0, 9)));

        for _ in 0..3 {
            engine
                .process(
                    &zones, &units, &system, &budget, &peak, &outside, &mut store, &backend,
                    now(),
                )
                .await
                .unwrap();
        }
        assert_eq!(backend.telemetry.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_offline_zone_alerts_after_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CommandStore::load(dir.path().join("queues.json"));
        let mut engine = Engine::new();
        let backend = TestBackend::default();
        let (system, budget, peak, outside) = defaults();

        let zones = vec![zone_config(1)];
        let mut units = UnitTable::new();
        units.insert(1, UnitState::Offline);

        engine
            .process(
                &zones, &units, &system, &budget, &peak, &outside, &mut store, &backend,
                now(),
            )
            .await
            .unwrap();
        assert!(backend.alert_messages().is_empty());

        // a later cycle past the threshold raises the alert exactly once
        for minutes in [20, 25] {
            engine
                .process(
                    &zones,
                    &units,
                    &system,
                    &budget,
                    &peak,
                    &outside,
                    &mut store,
                    &backend,
                    now() + Duration::minutes(minutes),
                )
                .await
                .unwrap();
        }
        assert_eq!(backend.alert_messages().len(), 1);
        assert!(backend.alert_messages()[0].contains("offline"));
    }

    #[tokio::test]
    async fn test_resting_zone_is_not_restarted() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CommandStore::load(dir.path().join("queues.json"));
        let mut engine = Engine::new();
        let backend = TestBackend::default();
        let (system, budget, peak, outside) = defaults();

        let mut zone = zone_config(1);
        zone.five_twenty_five_enabled = true;
        let zones = vec![zone];
        let mut units = UnitTable::new();
        // warm room on fan only, mid-rest
        units.insert(1, UnitState::Online(snapshot(74.0, 72.0, 1)));
        {
            let runtime = engine.fleet.zone(1);
            runtime.five_twenty_five.engaged = true;
            runtime.five_twenty_five.rest_end = Some(now() + Duration::minutes(3));
        }

        engine
            .process(
                &zones, &units, &system, &budget, &peak, &outside, &mut store, &backend,
                now(),
            )
            .await
            .unwrap();
        assert!(!store.has_pending(1));
        assert_eq!(engine.fleet.get(1).unwrap().dlc_operation, "5/25 rest");
    }

    #[tokio::test]
    async fn test_setpoint_drift_queues_device_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CommandStore::load(dir.path().join("queues.json"));
        let mut engine = Engine::new();
        let backend = TestBackend::default();
        let (system, budget, peak, outside) = defaults();

        let zones = vec![zone_config(1)];
        let mut units = UnitTable::new();
        // device still shows 75 but the occupied setpoint is 72
        units.insert(1, UnitState::Online(snapshot(72.5, 75.0, 9)));

        engine
            .process(
                &zones, &units, &system, &budget, &peak, &outside, &mut store, &backend,
                now(),
            )
            .await
            .unwrap();

        let pending = store.take_pending(1).unwrap();
        assert_eq!(pending.set_temp.unwrap().temp, 72.0);
    }
}
