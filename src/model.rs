//! Wire shapes of the Nightscout live socket
//!
//! The server pushes delta updates: any field of a `dataUpdate` payload may
//! be repeated or omitted, and nested records carry optional sub-records.
//! Every "field present?" question is an `Option` here; unknown fields are
//! ignored so upstream schema drift does not break decoding.

use serde::Deserialize;
use serde_json::Value;

/// A single glucose entry from the `sgvs` array
#[derive(Debug, Clone, Deserialize)]
pub struct Sgv {
    pub mgdl: i64,
    pub mills: i64,
    pub direction: Option<String>,
    /// Number in mg/dL mode, string in mmol/L mode; passed through as-is
    pub scaled: Option<Value>,
}

/// One entry of the `devicestatus` array
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceStatus {
    pub device: Option<String>,
    pub pump: Option<PumpStatus>,
    pub uploader: Option<UploaderStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PumpStatus {
    pub clock: Option<String>,
    pub reservoir: Option<Value>,
    pub iob: Option<Iob>,
    pub battery: Option<PumpBattery>,
    pub status: Option<PumpRunStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Iob {
    pub bolusiob: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PumpBattery {
    pub percent: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PumpRunStatus {
    pub bolusing: Option<bool>,
    pub status: Option<String>,
    pub suspended: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploaderStatus {
    pub battery: Option<f64>,
}

/// One entry of the `treatments` array
#[derive(Debug, Clone, Deserialize)]
pub struct Treatment {
    #[serde(rename = "eventType")]
    pub event_type: Option<String>,
    #[serde(default)]
    pub mills: i64,
}

/// Payload of a standalone `notification` event
#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    pub title: Option<String>,
    pub message: Option<String>,
    pub timestamp: Option<i64>,
}

impl Notification {
    /// Display text published as the notification fact
    pub fn text(&self) -> String {
        format!(
            "{} {}",
            self.title.as_deref().unwrap_or(""),
            self.message.as_deref().unwrap_or("")
        )
        .trim()
        .to_string()
    }
}
