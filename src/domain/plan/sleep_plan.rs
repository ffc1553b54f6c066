use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use crate::domain::decision::decision::SlotDecision;
use crate::domain::utils::id::RunId;
use crate::error::{Error, Result};
use crate::loader::parser::parse_json_file;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedSlot {
    pub decision: SlotDecision,
    /// Set once the slot's dispatch reached a terminal state. A confirmed slot is never modified again.
    pub confirmed: bool,
}

/// Per-slot decisions over a fixed horizon, produced one slot at a time and persisted as JSON for audit and
/// replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SleepPlan {
    pub run_id: RunId,
    pub created_at: String,
    pub horizon: usize,
    slots: Vec<PlannedSlot>,
}

impl SleepPlan {
    pub fn new(horizon: usize) -> Self {
        SleepPlan { run_id: RunId::generate(), created_at: Utc::now().to_rfc3339(), horizon, slots: Vec::new() }
    }

    pub fn is_complete(&self) -> bool {
        self.slots.len() >= self.horizon
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Appends the decision for the next slot. Slots must arrive in increasing order and the plan must not
    /// already cover its horizon.
    pub fn push_slot(&mut self, decision: SlotDecision) -> Result<()> {
        if self.is_complete() {
            return Err(Error::ConfigError(format!("sleep plan {} already covers its horizon of {} slots", self.run_id, self.horizon)));
        }

        if let Some(last) = self.slots.last() {
            if decision.slot <= last.decision.slot {
                return Err(Error::ConfigError(format!("slot {} does not follow slot {} in sleep plan {}", decision.slot, last.decision.slot, self.run_id)));
            }
        }

        self.slots.push(PlannedSlot { decision, confirmed: false });
        Ok(())
    }

    pub fn mark_confirmed(&mut self, slot: u64) -> bool {
        match self.slots.iter_mut().find(|s| s.decision.slot == slot) {
            Some(planned) => {
                planned.confirmed = true;
                true
            }
            None => {
                log::warn!("Cannot confirm slot {}: not part of sleep plan {}", slot, self.run_id);
                false
            }
        }
    }

    pub fn slots(&self) -> &[PlannedSlot] {
        &self.slots
    }

    pub fn slot(&self, slot: u64) -> Option<&PlannedSlot> {
        self.slots.iter().find(|s| s.decision.slot == slot)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        log::info!("Sleep plan {} ({} slots) written to {}", self.run_id, self.slots.len(), path.display());
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        parse_json_file::<SleepPlan, _>(path)
    }
}
