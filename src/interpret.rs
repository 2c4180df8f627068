//! Per-batch interpretation of live socket payloads
//!
//! One `dataUpdate` batch is handled in a single pass: raw payload first,
//! then the last-update timestamp, the newest device status, the newest
//! glucose entry, and finally the per-category treatment ages. Each step
//! decodes only its own field of the raw batch, so a malformed field aborts
//! the remaining steps without disturbing facts already published.

use log::debug;
use serde_json::{json, Value};

use crate::ages::{elapsed, latest_treatment_info, Category};
use crate::error::NsLinkError;
use crate::model::{DeviceStatus, Notification, Sgv, Treatment};
use crate::store::{Fact, FactStore};

pub struct Interpreter<'a, S: FactStore> {
    store: &'a S,
}

impl<'a, S: FactStore> Interpreter<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Interpreter { store }
    }

    /// Handle one `dataUpdate` batch at evaluation time `now`.
    ///
    /// An error means a field of the batch failed to decode; facts published
    /// before the failing step stay published and the next batch is
    /// unaffected. The caller logs and moves on.
    pub fn handle_data_update(&self, update: &Value, now: i64) -> Result<(), NsLinkError> {
        self.store
            .write("data.rawUpdate", Fact::new(now, Value::String(update.to_string())))?;

        let last_updated = update.get("lastUpdated").and_then(Value::as_i64);
        if let Some(last_updated) = last_updated {
            self.store
                .write("data.lastUpdate", Fact::new(now, json!(last_updated)))?;
        }
        // Device facts are stamped with the batch's own clock when it has one
        let ts = last_updated.unwrap_or(now);

        if let Some(raw_statuses) = update.get("devicestatus") {
            let statuses: Vec<DeviceStatus> = serde_json::from_value(raw_statuses.clone())?;
            // Delta stream: the last entry supersedes earlier ones in the batch
            if let Some(status) = statuses.last() {
                self.publish_device_status(status, ts, now)?;
            }
        }

        if let Some(raw_sgvs) = update.get("sgvs") {
            let sgvs: Vec<Sgv> = serde_json::from_value(raw_sgvs.clone())?;
            if let Some(sgv) = sgvs.last() {
                self.publish_sgv(sgv)?;
            }
        }

        let treatments: Vec<Treatment> = match update.get("treatments") {
            Some(raw) => serde_json::from_value(raw.clone())?,
            None => Vec::new(),
        };
        for category in Category::ALL {
            self.publish_age(category, &treatments, now)?;
        }

        Ok(())
    }

    fn publish_device_status(
        &self,
        status: &DeviceStatus,
        ts: i64,
        now: i64,
    ) -> Result<(), NsLinkError> {
        if let Some(device) = &status.device {
            self.store.write("data.device", Fact::new(now, json!(device)))?;
        }

        if let Some(pump) = &status.pump {
            if let Some(clock) = &pump.clock {
                match chrono::DateTime::parse_from_rfc3339(clock) {
                    Ok(clock) => self.store.write(
                        "data.clock",
                        Fact::new(ts, json!(clock.timestamp_millis())),
                    )?,
                    Err(err) => debug!("unreadable pump clock {:?}: {}", clock, err),
                }
            }
            if let Some(reservoir) = &pump.reservoir {
                self.store.write("data.reservoir", Fact::new(ts, reservoir.clone()))?;
            }
            if let Some(iob) = &pump.iob {
                if let Some(bolusiob) = iob.bolusiob {
                    self.store.write("data.bolusiob", Fact::new(ts, json!(bolusiob)))?;
                }
            }
            if let Some(battery) = &pump.battery {
                if let Some(percent) = battery.percent {
                    self.store.write("data.pumpBattery", Fact::new(ts, json!(percent)))?;
                }
            }
            if let Some(run) = &pump.status {
                if let Some(bolusing) = run.bolusing {
                    self.store.write("data.bolusing", Fact::new(ts, json!(bolusing)))?;
                }
                if let Some(label) = &run.status {
                    self.store.write("data.status", Fact::new(ts, json!(label)))?;
                }
                if let Some(suspended) = run.suspended {
                    self.store.write("data.suspended", Fact::new(ts, json!(suspended)))?;
                }
            }
        }

        if let Some(uploader) = &status.uploader {
            if let Some(battery) = uploader.battery {
                self.store
                    .write("data.uploaderBattery", Fact::new(now, json!(battery)))?;
            }
        }

        Ok(())
    }

    fn publish_sgv(&self, sgv: &Sgv) -> Result<(), NsLinkError> {
        // Glucose facts carry the reading's own timestamp, not receipt time
        self.store.write("data.mgdl", Fact::new(sgv.mills, json!(sgv.mgdl)))?;
        if let Some(scaled) = &sgv.scaled {
            self.store.write("data.mgdlScaled", Fact::new(sgv.mills, scaled.clone()))?;
        }
        if let Some(direction) = &sgv.direction {
            self.store
                .write("data.mgdlDirection", Fact::new(sgv.mills, json!(direction)))?;
        }
        Ok(())
    }

    fn publish_age(
        &self,
        category: Category,
        treatments: &[Treatment],
        now: i64,
    ) -> Result<(), NsLinkError> {
        let matched = category.filter(treatments);
        let info = latest_treatment_info(&matched, now);
        let base = category.fact_base();

        if !info.found {
            debug!("no qualifying {} treatments, recalculating age", base);
            return self.recalc_age(category, now);
        }

        self.store.write(&format!("{base}.age"), Fact::new(now, json!(info.age)))?;
        self.store.write(&format!("{base}.days"), Fact::new(now, json!(info.days)))?;
        self.store.write(&format!("{base}.hours"), Fact::new(now, json!(info.hours)))?;
        self.store.write(
            &format!("{base}.changed"),
            Fact::new(info.millis, json!(info.millis)),
        )?;
        Ok(())
    }

    /// Recompute a category's age facts from the persisted change watermark.
    ///
    /// A missing watermark means the category was never observed; that is
    /// expected and publishes nothing.
    fn recalc_age(&self, category: Category, now: i64) -> Result<(), NsLinkError> {
        let base = category.fact_base();
        let Some(fact) = self.store.read(&format!("{base}.changed"))? else {
            debug!("no {}.changed watermark, nothing to recalculate", base);
            return Ok(());
        };

        let changed = match &fact.val {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        };
        let Some(changed) = changed else {
            debug!("unreadable {}.changed watermark: {}", base, fact.val);
            return Ok(());
        };
        if changed > now {
            debug!("{}.changed watermark is in the future, skipping", base);
            return Ok(());
        }

        let e = elapsed(now, changed);
        self.store.write(&format!("{base}.age"), Fact::new(now, json!(e.total_hours)))?;
        self.store.write(&format!("{base}.days"), Fact::new(now, json!(e.days)))?;
        self.store.write(&format!("{base}.hours"), Fact::new(now, json!(e.hours)))?;
        Ok(())
    }

    /// Standalone `notification` event: published 1:1 as a text fact
    pub fn handle_notification(&self, payload: &Value, now: i64) -> Result<(), NsLinkError> {
        let notification: Notification = serde_json::from_value(payload.clone())?;
        let ts = notification.timestamp.unwrap_or(now);
        self.store
            .write("data.notification", Fact::new(ts, json!(notification.text())))?;
        Ok(())
    }

    /// Standalone `alarm` event: payload published verbatim
    pub fn handle_alarm(&self, payload: &Value, now: i64) -> Result<(), NsLinkError> {
        self.store.write("data.alarm", Fact::new(now, payload.clone()))
    }

    /// Standalone `urgent_alarm` event: payload published verbatim
    pub fn handle_urgent_alarm(&self, payload: &Value, now: i64) -> Result<(), NsLinkError> {
        self.store.write("data.urgentAlarm", Fact::new(now, payload.clone()))
    }
}
