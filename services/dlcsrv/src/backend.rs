//! Backend REST contract
//!
//! Everything the engine needs from the central service sits behind the
//! [`Backend`] trait so the control logic can run against an in-memory
//! double in tests. [`HttpBackend`] is the production implementation.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Deserialize;
use tracing::warn;

use crate::config::BackendConfig;
use crate::error::{DlcSrvError, Result};
use crate::model::{
    Alert, Mode, OutsideConditions, PeakSchedule, PowerBudget, SystemData, TelemetryRow,
    ZoneConfig,
};

#[async_trait]
pub trait Backend: Send + Sync {
    /// All configured zones, managed or not
    async fn fetch_zone_configs(&self) -> Result<Vec<ZoneConfig>>;

    /// Site-wide tuning values
    async fn fetch_system_data(&self) -> Result<SystemData>;

    /// Live site power and the allowed budget
    async fn fetch_power_budget(&self) -> Result<PowerBudget>;

    /// Utility peak calendar
    async fn fetch_peak_schedule(&self) -> Result<PeakSchedule>;

    /// Outdoor temperature and humidity
    async fn fetch_outside_conditions(&self) -> Result<OutsideConditions>;

    /// Persist a resolved setpoint and its override source for a zone
    async fn persist_override(
        &self,
        unit_id: u8,
        set_temp: f64,
        override_type: &str,
    ) -> Result<()>;

    /// Store one telemetry row
    async fn persist_telemetry(&self, row: &TelemetryRow) -> Result<()>;

    /// Raise an alert
    async fn post_alert(&self, alert: &Alert) -> Result<()>;

    /// Start of the unit's current continuous run in `status`, `None` when
    /// it is not in that status
    async fn status_run_start(
        &self,
        unit_id: u8,
        status: &str,
    ) -> Result<Option<DateTime<Local>>>;

    /// Most recent moment the unit left `status`
    async fn status_last_stop(
        &self,
        unit_id: u8,
        status: &str,
    ) -> Result<Option<DateTime<Local>>>;

    /// Most recent moment a compressor stage (any cool stage, or heat-pump
    /// heat stage) stopped on this unit
    async fn last_compressor_stop(&self, unit_id: u8) -> Result<Option<DateTime<Local>>>;

    /// End of the last run in the given mode, used for changeover spacing
    async fn last_mode_run_end(
        &self,
        unit_id: u8,
        mode: Mode,
    ) -> Result<Option<DateTime<Local>>>;

    /// Last time the supply fan switched on / off, for recirculation cycling
    async fn fan_last_on(&self, unit_id: u8) -> Result<Option<DateTime<Local>>>;
    async fn fan_last_off(&self, unit_id: u8) -> Result<Option<DateTime<Local>>>;
}

/// Push-notification seam for diagnostic reports
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, body: &str) -> Result<()>;
}

/// REST client against the central backend
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct TimestampRow {
    timestamp: Option<DateTime<Local>>,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.client.get(self.url(path)).send().await?;
        if !response.status().is_success() {
            return Err(DlcSrvError::backend(format!(
                "GET {} returned {}",
                path,
                response.status()
            )));
        }
        let envelope: DataEnvelope<T> = response.json().await?;
        Ok(envelope.data)
    }

    async fn post_json<T: serde::Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<()> {
        let response = self.client.post(self.url(path)).json(body).send().await?;
        if !response.status().is_success() {
            return Err(DlcSrvError::backend(format!(
                "POST {} returned {}",
                path,
                response.status()
            )));
        }
        Ok(())
    }

    async fn get_timestamp(&self, path: &str) -> Result<Option<DateTime<Local>>> {
        let row: TimestampRow = self.get_json(path).await?;
        Ok(row.timestamp)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn fetch_zone_configs(&self) -> Result<Vec<ZoneConfig>> {
        self.get_json("/units/configs").await
    }

    async fn fetch_system_data(&self) -> Result<SystemData> {
        self.get_json("/system/config").await
    }

    async fn fetch_power_budget(&self) -> Result<PowerBudget> {
        self.get_json("/power/info").await
    }

    async fn fetch_peak_schedule(&self) -> Result<PeakSchedule> {
        self.get_json("/peak/schedule").await
    }

    async fn fetch_outside_conditions(&self) -> Result<OutsideConditions> {
        self.get_json("/weather/outside").await
    }

    async fn persist_override(
        &self,
        unit_id: u8,
        set_temp: f64,
        override_type: &str,
    ) -> Result<()> {
        self.post_json(
            "/units/override",
            &serde_json::json!({
                "unit_number": unit_id,
                "set_temp": set_temp,
                "override_type": override_type,
            }),
        )
        .await
    }

    async fn persist_telemetry(&self, row: &TelemetryRow) -> Result<()> {
        self.post_json("/units/readings", row).await
    }

    async fn post_alert(&self, alert: &Alert) -> Result<()> {
        self.post_json("/alerts", alert).await
    }

    async fn status_run_start(
        &self,
        unit_id: u8,
        status: &str,
    ) -> Result<Option<DateTime<Local>>> {
        self.get_timestamp(&format!(
            "/history/run-start?unit_number={unit_id}&status={}",
            urlencode(status)
        ))
        .await
    }

    async fn status_last_stop(
        &self,
        unit_id: u8,
        status: &str,
    ) -> Result<Option<DateTime<Local>>> {
        self.get_timestamp(&format!(
            "/history/last-stop?unit_number={unit_id}&status={}",
            urlencode(status)
        ))
        .await
    }

    async fn last_compressor_stop(&self, unit_id: u8) -> Result<Option<DateTime<Local>>> {
        self.get_timestamp(&format!(
            "/history/compressor-stop?unit_number={unit_id}"
        ))
        .await
    }

    async fn last_mode_run_end(
        &self,
        unit_id: u8,
        mode: Mode,
    ) -> Result<Option<DateTime<Local>>> {
        self.get_timestamp(&format!(
            "/history/mode-run-end?unit_number={unit_id}&mode={}",
            mode.as_num()
        ))
        .await
    }

    async fn fan_last_on(&self, unit_id: u8) -> Result<Option<DateTime<Local>>> {
        self.get_timestamp(&format!("/history/fan-last-on?unit_number={unit_id}"))
            .await
    }

    async fn fan_last_off(&self, unit_id: u8) -> Result<Option<DateTime<Local>>> {
        self.get_timestamp(&format!("/history/fan-last-off?unit_number={unit_id}"))
            .await
    }
}

/// Push notifier delivering through the backend
pub struct HttpNotifier {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNotifier {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, title: &str, body: &str) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/notifications", self.base_url))
            .json(&serde_json::json!({ "title": title, "body": body }))
            .send()
            .await?;
        if !response.status().is_success() {
            warn!(
                "notification delivery failed with status {}",
                response.status()
            );
        }
        Ok(())
    }
}

/// Minimal percent-encoding for status labels used in query strings
fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
