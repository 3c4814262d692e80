//! Funnel sequencer — ordered CRUD over drip-funnel steps.
//!
//! The sequencer only maintains structure: `order` values stay dense and
//! unique (0..N-1) through every mutation. Executing a step (sending the
//! email, waiting, branching) is the scheduler's job.

use leadflow_core::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// One automated step in a campaign funnel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelStep {
    pub id: Uuid,
    pub name: String,
    pub step_type: StepType,
    /// Message content for Email/Sms/Notification/Task steps.
    #[serde(default)]
    pub content: Option<String>,
    /// Branch expression for Condition steps.
    #[serde(default)]
    pub condition: Option<String>,
    /// Meaningful only for Wait steps.
    #[serde(default)]
    pub delay_hours: u32,
    /// Position within the funnel, dense 0..N-1.
    pub order: usize,
    #[serde(default)]
    pub metrics: StepMetrics,
}

impl FunnelStep {
    pub fn new(name: &str, step_type: StepType) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            step_type,
            content: None,
            condition: None,
            delay_hours: 0,
            order: 0,
            metrics: StepMetrics::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Email,
    Sms,
    Notification,
    Task,
    Wait,
    Condition,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepMetrics {
    pub sent: u64,
    pub delivered: u64,
    pub failed: u64,
}

/// An ordered sequence of automated steps attached to a campaign.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Funnel {
    #[serde(default)]
    pub steps: Vec<FunnelStep>,
}

impl Funnel {
    /// Append a step at the end of the funnel.
    pub fn add_step(&mut self, mut step: FunnelStep) {
        step.order = self.steps.len();
        self.steps.push(step);
    }

    /// Delete a step and renumber the remainder to stay dense.
    pub fn remove_step(&mut self, id: Uuid) -> bool {
        let len = self.steps.len();
        self.steps.retain(|s| s.id != id);
        if self.steps.len() == len {
            return false;
        }
        self.renumber();
        true
    }

    /// Renumber every step to match the given id sequence. The sequence must
    /// name every step exactly once; a partial reorder is rejected and the
    /// funnel is left untouched.
    pub fn reorder(&mut self, ordered_ids: &[Uuid]) -> Result<()> {
        let current: HashSet<Uuid> = self.steps.iter().map(|s| s.id).collect();
        let requested: HashSet<Uuid> = ordered_ids.iter().copied().collect();
        if ordered_ids.len() != self.steps.len()
            || requested.len() != ordered_ids.len()
            || current != requested
        {
            return Err(EngineError::Validation(
                "Reorder must name every funnel step exactly once".into(),
            ));
        }

        self.steps
            .sort_by_key(|s| ordered_ids.iter().position(|id| *id == s.id).unwrap_or(0));
        self.renumber();
        Ok(())
    }

    /// The step after `order`, if any. Used when the scheduler advances a
    /// funnel.
    pub fn next_step(&self, order: usize) -> Option<&FunnelStep> {
        self.steps.iter().find(|s| s.order == order + 1)
    }

    fn renumber(&mut self) {
        for (i, s) in self.steps.iter_mut().enumerate() {
            s.order = i;
        }
    }
}
