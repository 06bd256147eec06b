//! Configuration-register audit
//!
//! Walks the fix table, compares each live value against the desired one,
//! rewrites mismatches with bounded retries and builds a per-register
//! report for the push notifier.

use tracing::{info, warn};

use crate::error::Result;
use crate::registers::FIX_REGISTER_TABLE;
use crate::transport::BusSession;

/// Outcome for one audited register
#[derive(Debug, Clone)]
pub struct RegisterAudit {
    pub address: u16,
    pub name: &'static str,
    pub desired: u16,
    /// Value after any fix attempts
    pub actual: u16,
    pub fixed: bool,
}

impl RegisterAudit {
    pub fn report_line(&self) -> String {
        format!(
            "Register {}({}), act/des ({}/{})",
            self.address, self.name, self.actual, self.desired
        )
    }
}

/// Audit every register in the fix table on the session's current target.
/// Returns audits for registers that did not match their desired value,
/// whether or not the rewrite succeeded.
pub async fn audit_unit(session: &mut BusSession, retries: u32) -> Result<Vec<RegisterAudit>> {
    let mut mismatches = Vec::new();

    for &(address, desired, name) in FIX_REGISTER_TABLE {
        let actual = session.read_register(address).await?;
        if actual == desired {
            continue;
        }

        let mut current = actual;
        let mut fixed = false;
        for attempt in 0..=retries {
            if session.write_register(address, desired).await.is_err() {
                warn!("register {address}({name}) write attempt {} failed", attempt + 1);
                continue;
            }
            match session.read_register(address).await {
                Ok(read_back) => {
                    current = read_back;
                    if read_back == desired {
                        fixed = true;
                        break;
                    }
                }
                Err(err) => warn!("register {address}({name}) read-back failed: {err}"),
            }
        }

        if fixed {
            info!("register {address}({name}) corrected from {actual} to {desired}");
        } else {
            warn!("register {address}({name}) stuck at {current}, wanted {desired}");
        }

        mismatches.push(RegisterAudit {
            address,
            name,
            desired,
            actual: current,
            fixed,
        });
    }

    Ok(mismatches)
}

/// Assemble the notifier message from the audit results
pub fn build_report(unit_id: u8, audits: &[RegisterAudit]) -> String {
    if audits.is_empty() {
        return format!("Unit {unit_id}: all registers match their desired values");
    }
    let mut lines = Vec::with_capacity(audits.len() + 1);
    lines.push(format!("Unit {unit_id}: {} register(s) adjusted", audits.len()));
    for audit in audits {
        lines.push(audit.report_line());
    }
    lines.join("\n")
}
