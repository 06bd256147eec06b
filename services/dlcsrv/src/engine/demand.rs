//! Demand manager
//!
//! Called when a zone wants to add compressor load while the site is at or
//! over its power budget. Sheds running cooling stages elsewhere, coldest
//! zones first (largest setpoint slack), stage-2 zones before stage-1. If
//! shedding cannot free enough power the zone closest to comfort gets its
//! setpoint raised for a bounded window instead, and the request is denied.

use chrono::{DateTime, Duration, Local};
use tracing::{debug, info};

use crate::model::{SystemData, UnitTable, ZoneConfig};
use crate::relay::Stage;
use crate::state::Fleet;

/// One stage downgrade decided by the shed loop
#[derive(Debug, Clone, PartialEq)]
pub struct ShedAction {
    pub unit_id: u8,
    pub new_stage: Stage,
    /// Load freed, kW
    pub freed_kw: f64,
}

/// Setpoint raise decided by the fallback path
#[derive(Debug, Clone, PartialEq)]
pub struct RaiseAction {
    pub unit_id: u8,
    pub set_temp: f64,
    pub expire_time: DateTime<Local>,
}

#[derive(Debug, Clone, Default)]
pub struct DemandOutcome {
    /// Whether the requesting zone may add its load
    pub allowed: bool,
    pub sheds: Vec<ShedAction>,
    pub raise: Option<RaiseAction>,
}

impl DemandOutcome {
    fn allow() -> Self {
        Self {
            allowed: true,
            ..Default::default()
        }
    }

    fn deny() -> Self {
        Self::default()
    }
}

struct Candidate {
    unit_id: u8,
    stage: Stage,
    /// `set_temp - current_temp`; larger = colder zone, shed first
    slack: f64,
    freed_kw: f64,
    current_minus_set: f64,
    zone_priority: u32,
}

/// Decide whether `predicted_power` fits under `allowed_power`, shedding
/// other zones as needed. Mutates the fleet's demand holds.
pub fn check_demand(
    zones: &[ZoneConfig],
    units: &UnitTable,
    system: &SystemData,
    fleet: &mut Fleet,
    predicted_power: f64,
    allowed_power: f64,
    now: DateTime<Local>,
) -> DemandOutcome {
    if predicted_power < allowed_power {
        return DemandOutcome::allow();
    }
    // tiny sites have nothing meaningful to juggle
    if zones.len() <= 3 {
        return DemandOutcome::allow();
    }
    if !system.is_demand_allowed {
        debug!("demand management disabled, denying load increase");
        return DemandOutcome::deny();
    }

    // four buckets, highest shed priority first:
    // stage-2 below setpoint, stage-2 within hysteresis,
    // stage-1 below setpoint, stage-1 within hysteresis
    let mut buckets: [Vec<Candidate>; 4] = Default::default();
    let mut leftovers: Vec<Candidate> = Vec::new();

    for zone in zones {
        let Some(snapshot) = units.get(&zone.unit_id).and_then(|u| u.snapshot()) else {
            continue;
        };
        let Some(stage) = snapshot.stage(zone.relay_variant()) else {
            continue;
        };
        if stage == Stage::Off {
            continue;
        }

        let set = snapshot.set_temp;
        let current = snapshot.current_temp;
        let cooling = &zone.power_information.cooling;
        let candidate = Candidate {
            unit_id: zone.unit_id,
            stage,
            slack: set - current,
            freed_kw: if stage == Stage::Cool2 {
                cooling.comp2_kw
            } else {
                cooling.comp1_kw
            },
            current_minus_set: current - set,
            zone_priority: zone.zone_priority,
        };

        let in_hysteresis = set < current && current < set + system.hysteresis;
        let bucket = match (stage, current < set, in_hysteresis) {
            (Stage::Cool2, true, _) => Some(0),
            (Stage::Cool2, false, true) => Some(1),
            (Stage::Cool1, true, _) => Some(2),
            (Stage::Cool1, false, true) => Some(3),
            _ => None,
        };
        match bucket {
            Some(index) => buckets[index].push(candidate),
            None => leftovers.push(candidate),
        }
    }

    let mut outcome = DemandOutcome::allow();
    let mut remaining = predicted_power;

    'shed: while remaining > allowed_power {
        let Some(bucket) = buckets.iter_mut().find(|b| !b.is_empty()) else {
            break 'shed;
        };
        let best = bucket
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                a.slack
                    .partial_cmp(&b.slack)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(index, _)| index);
        let Some(index) = best else { break 'shed };
        let picked = bucket.swap_remove(index);

        let new_stage = if picked.stage == Stage::Cool2 {
            Stage::Cool1
        } else {
            Stage::FanOn
        };
        info!(
            "demand: shedding unit {} from {:?} to {:?}, freeing {:.1} kW",
            picked.unit_id, picked.stage, new_stage, picked.freed_kw
        );
        remaining -= picked.freed_kw;
        fleet.zone(picked.unit_id).demand.is_set_high = false;
        outcome.sheds.push(ShedAction {
            unit_id: picked.unit_id,
            new_stage,
            freed_kw: picked.freed_kw,
        });
    }

    if remaining <= allowed_power {
        return outcome;
    }

    // shedding was not enough: raise the setpoint of the running zone
    // closest to comfort instead, and deny the requesting zone
    let fallback = leftovers
        .iter()
        .filter(|c| c.zone_priority != 1)
        .min_by(|a, b| {
            a.current_minus_set
                .partial_cmp(&b.current_minus_set)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.zone_priority.cmp(&a.zone_priority))
        });

    let Some(fallback) = fallback else {
        debug!("demand: no shed or fallback candidate, denying");
        outcome.allowed = false;
        return outcome;
    };

    let Some(zone) = zones.iter().find(|z| z.unit_id == fallback.unit_id) else {
        outcome.allowed = false;
        return outcome;
    };

    let expire_time = now + Duration::minutes(system.override_limit_minutes);
    info!(
        "demand: raising unit {} setpoint to {} until {}",
        zone.unit_id, zone.setpoints.occ_cool_high, expire_time
    );
    let hold = &mut fleet.zone(zone.unit_id).demand;
    hold.is_set_high = true;
    hold.expire_time = Some(expire_time);
    outcome.raise = Some(RaiseAction {
        unit_id: zone.unit_id,
        set_temp: zone.setpoints.occ_cool_high,
        expire_time,
    });
    outcome.allowed = false;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UnitState;
    use crate::test_support::{snapshot, zone_config};
    use chrono::TimeZone;

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 7, 1, 14, 0, 0).unwrap()
    }

    fn site(
        specs: &[(u8, f64, f64, u16)],
    ) -> (Vec<ZoneConfig>, UnitTable) {
        let mut zones = Vec::new();
        let mut units = UnitTable::new();
        for &(unit_id, current, set, relay) in specs {
            zones.push(zone_config(unit_id));
            units.insert(unit_id, UnitState::Online(snapshot(current, set, relay)));
        }
        (zones, units)
    }

    #[test]
    fn test_under_budget_is_allowed_without_shedding() {
        let (zones, units) = site(&[
            (1, 70.0, 72.0, 9),
            (2, 70.0, 72.0, 9),
            (3, 70.0, 72.0, 9),
            (4, 70.0, 72.0, 9),
        ]);
        let mut fleet = Fleet::new();
        let outcome = check_demand(
            &zones,
            &units,
            &SystemData::default(),
            &mut fleet,
            40.0,
            50.0,
            now(),
        );
        assert!(outcome.allowed);
        assert!(outcome.sheds.is_empty());
    }

    #[test]
    fn test_small_fleet_always_allowed() {
        let (zones, units) = site(&[(1, 70.0, 72.0, 9), (2, 70.0, 72.0, 9)]);
        let mut fleet = Fleet::new();
        let outcome = check_demand(
            &zones,
            &units,
            &SystemData::default(),
            &mut fleet,
            99.0,
            50.0,
            now(),
        );
        assert!(outcome.allowed);
    }

    #[test]
    fn test_demand_disabled_denies() {
        let (zones, units) = site(&[
            (1, 70.0, 72.0, 9),
            (2, 70.0, 72.0, 9),
            (3, 70.0, 72.0, 9),
            (4, 70.0, 72.0, 9),
        ]);
        let mut fleet = Fleet::new();
        let system = SystemData {
            is_demand_allowed: false,
            ..SystemData::default()
        };
        let outcome = check_demand(&zones, &units, &system, &mut fleet, 99.0, 50.0, now());
        assert!(!outcome.allowed);
        assert!(outcome.sheds.is_empty());
    }

    #[tracing_test::traced_test]
    #[test]
    fn test_sheds_largest_slack_first() {
        // three stage-1 zones below setpoint with slacks 1.5, 3.0, 0.5
        let (zones, units) = site(&[
            (1, 70.5, 72.0, 9),
            (2, 69.0, 72.0, 9),
            (3, 71.5, 72.0, 9),
            (4, 75.0, 72.0, 0),
        ]);
        let mut fleet = Fleet::new();
        // comp1 is 3.0 kW per zone; freeing one stage is enough
        let outcome = check_demand(
            &zones,
            &units,
            &SystemData::default(),
            &mut fleet,
            52.0,
            50.0,
            now(),
        );
        assert!(outcome.allowed);
        assert_eq!(outcome.sheds.len(), 1);
        assert_eq!(outcome.sheds[0].unit_id, 2);
        assert_eq!(outcome.sheds[0].new_stage, Stage::FanOn);
        assert!(logs_contain("shedding unit 2"));
    }

    #[test]
    fn test_stage2_zones_shed_before_stage1() {
        let (zones, units) = site(&[
            (1, 69.0, 72.0, 9),  // stage 1, big slack
            (2, 71.5, 72.0, 11), // stage 2, smaller slack, sheds first
            (3, 75.0, 72.0, 0),
            (4, 75.0, 72.0, 0),
        ]);
        let mut fleet = Fleet::new();
        let outcome = check_demand(
            &zones,
            &units,
            &SystemData::default(),
            &mut fleet,
            51.0,
            50.0,
            now(),
        );
        assert!(outcome.allowed);
        assert_eq!(outcome.sheds[0].unit_id, 2);
        assert_eq!(outcome.sheds[0].new_stage, Stage::Cool1);
        // stage-2 downgrade frees comp2 only
        assert_eq!(outcome.sheds[0].freed_kw, 2.0);
    }

    #[test]
    fn test_fallback_raises_closest_to_comfort_and_denies() {
        // all cooling zones are already past hysteresis, nothing to shed
        let (zones, units) = site(&[
            (1, 75.0, 72.0, 9),
            (2, 73.5, 72.0, 9),
            (3, 76.0, 72.0, 9),
            (4, 70.0, 72.0, 0),
        ]);
        let mut fleet = Fleet::new();
        let outcome = check_demand(
            &zones,
            &units,
            &SystemData::default(),
            &mut fleet,
            60.0,
            50.0,
            now(),
        );
        assert!(!outcome.allowed);
        let raise = outcome.raise.unwrap();
        assert_eq!(raise.unit_id, 2);
        assert_eq!(raise.set_temp, 76.0);
        assert!(fleet.zone(2).demand.check(now()));
        assert!(!fleet.zone(2).demand.check(now() + Duration::minutes(31)));
    }

    #[test]
    fn test_fallback_considers_fan_only_zones() {
        // nothing sheddable; the fan-only zone 2 sits closest to comfort
        let (zones, units) = site(&[
            (1, 75.0, 72.0, 9),
            (2, 72.5, 72.0, 1),
            (3, 76.0, 72.0, 9),
            (4, 70.0, 72.0, 0),
        ]);
        let mut fleet = Fleet::new();
        let outcome = check_demand(
            &zones,
            &units,
            &SystemData::default(),
            &mut fleet,
            60.0,
            50.0,
            now(),
        );
        assert!(!outcome.allowed);
        assert_eq!(outcome.raise.unwrap().unit_id, 2);
    }

    #[test]
    fn test_priority_one_zone_never_raised() {
        let (mut zones, units) = site(&[
            (1, 73.5, 72.0, 9),
            (2, 75.0, 72.0, 9),
            (3, 76.0, 72.0, 9),
            (4, 70.0, 72.0, 0),
        ]);
        zones[0].zone_priority = 1;
        let mut fleet = Fleet::new();
        let outcome = check_demand(
            &zones,
            &units,
            &SystemData::default(),
            &mut fleet,
            60.0,
            50.0,
            now(),
        );
        assert!(!outcome.allowed);
        assert_eq!(outcome.raise.unwrap().unit_id, 2);
    }
}
