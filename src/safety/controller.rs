// Print-job control: state queries and pause requests against OctoPrint

use super::DetectorChannel;
use crate::error::{MonitorError, MonitorResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::time::Duration;
use tracing::{error, info, warn};

const REQUEST_TIMEOUT_SECS: u64 = 10;
const API_KEY_HEADER: &str = "X-Api-Key";

/// Job state as reported by the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrinterState {
    Idle,
    Printing,
    Paused,
    Pausing,
    Cancelling,
    Error,
    Offline,
    Unknown(String),
}

impl PrinterState {
    /// Map the controller's free-text state (e.g. "Printing from SD")
    pub fn from_state_text(text: &str) -> Self {
        let lower = text.trim().to_lowercase();
        if lower.starts_with("printing") {
            PrinterState::Printing
        } else if lower.starts_with("pausing") {
            PrinterState::Pausing
        } else if lower.starts_with("paused") {
            PrinterState::Paused
        } else if lower.starts_with("cancelling") {
            PrinterState::Cancelling
        } else if lower.starts_with("operational") || lower.starts_with("ready") {
            PrinterState::Idle
        } else if lower.starts_with("offline") || lower.starts_with("closed") {
            PrinterState::Offline
        } else if lower.starts_with("error") {
            PrinterState::Error
        } else {
            PrinterState::Unknown(text.trim().to_string())
        }
    }
}

impl fmt::Display for PrinterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrinterState::Idle => write!(f, "idle"),
            PrinterState::Printing => write!(f, "printing"),
            PrinterState::Paused => write!(f, "paused"),
            PrinterState::Pausing => write!(f, "pausing"),
            PrinterState::Cancelling => write!(f, "cancelling"),
            PrinterState::Error => write!(f, "error"),
            PrinterState::Offline => write!(f, "offline"),
            PrinterState::Unknown(text) => write!(f, "unknown ({})", text),
        }
    }
}

/// Job controller consumed by the safety logic
#[async_trait]
pub trait PrintJobController: Send + Sync {
    async fn current_state(&self) -> MonitorResult<PrinterState>;

    /// Request that the running job pause
    async fn pause(&self) -> MonitorResult<()>;
}

#[derive(Debug, Deserialize)]
struct JobResponse {
    state: String,
}

/// OctoPrint REST client (`/api/job`)
pub struct OctoPrintController {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OctoPrintController {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> MonitorResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn job_url(&self) -> String {
        format!("{}/api/job", self.base_url)
    }
}

#[async_trait]
impl PrintJobController for OctoPrintController {
    async fn current_state(&self) -> MonitorResult<PrinterState> {
        let response = self
            .client
            .get(self.job_url())
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MonitorError::Control(format!(
                "job state query returned {}",
                response.status()
            )));
        }

        let job: JobResponse = response.json().await?;
        Ok(PrinterState::from_state_text(&job.state))
    }

    async fn pause(&self) -> MonitorResult<()> {
        let response = self
            .client
            .post(self.job_url())
            .header(API_KEY_HEADER, &self.api_key)
            .json(&json!({ "command": "pause", "action": "pause" }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MonitorError::Control(format!(
                "pause request returned {}: {}",
                status, body
            )));
        }

        Ok(())
    }
}

/// Issue one pause for `channel`. Failures are logged together with the job
/// state and not retried; the next full streak will try again.
pub async fn issue_pause(controller: &dyn PrintJobController, channel: DetectorChannel) -> bool {
    warn!("{} defect streak reached, pausing print", channel.as_str());

    match controller.pause().await {
        Ok(()) => {
            info!("Pause issued ({} channel)", channel.as_str());
            true
        }
        Err(e) => {
            error!("Pause request failed ({} channel): {}", channel.as_str(), e);
            match controller.current_state().await {
                Ok(state) => warn!("Printer state after failed pause: {}", state),
                Err(e) => warn!("Printer state unavailable: {}", e),
            }
            false
        }
    }
}
