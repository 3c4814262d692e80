//! Campaign aggregate — the root entity the scheduler drives.
//!
//! Sub-entities (A/B block, funnel, inline criteria) live inside the
//! aggregate and are persisted atomically with it; nothing outside the
//! scheduler's documented operations mutates them.

use chrono::{DateTime, NaiveDate, Utc};
use leadflow_core::{EngineError, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::allocation::{MIN_ALLOCATION, Variant};
use crate::funnel::Funnel;
use crate::segment::SegmentCriterion;

/// A marketing campaign.
///
/// Authored definition files may omit `id`, `status`, and `created_at`;
/// deserialization fills them the way `new` does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    pub channel: ChannelType,
    #[serde(default)]
    pub status: CampaignStatus,
    #[serde(default)]
    pub schedule: Option<Schedule>,
    /// Target audience; `None` means every lead in the CRM.
    #[serde(default)]
    pub audience: Option<Audience>,
    #[serde(default)]
    pub content: CampaignContent,
    #[serde(default)]
    pub ab_test: Option<AbTest>,
    #[serde(default)]
    pub funnel: Option<Funnel>,
    /// Order of the last funnel step executed; `None` before the first fire.
    #[serde(default)]
    pub funnel_cursor: Option<usize>,
    #[serde(default)]
    pub last_sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Campaign {
    /// Create a new campaign in Draft.
    pub fn new(name: &str, channel: ChannelType, content: CampaignContent) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            channel,
            status: CampaignStatus::Draft,
            schedule: None,
            audience: None,
            content,
            ab_test: None,
            funnel: None,
            funnel_cursor: None,
            last_sent_at: None,
            last_error: None,
            created_at: Utc::now(),
        }
    }

    /// Attach a schedule and move Draft → Scheduled. The schedule is
    /// validated synchronously; a malformed one never reaches the tick.
    pub fn set_schedule(&mut self, schedule: Schedule) -> Result<()> {
        schedule.validate()?;
        self.schedule = Some(schedule);
        if self.status == CampaignStatus::Draft {
            self.transition(CampaignStatus::Scheduled)?;
        }
        Ok(())
    }

    /// Apply a status transition, enforcing the state machine.
    pub fn transition(&mut self, to: CampaignStatus) -> Result<()> {
        if !self.status.can_transition(to) {
            return Err(EngineError::Validation(format!(
                "Invalid status transition {:?} -> {:?}",
                self.status, to
            )));
        }
        tracing::debug!("Campaign '{}': {:?} -> {:?}", self.name, self.status, to);
        self.status = to;
        Ok(())
    }

    /// Aggregate-level invariants, checked before every persist.
    pub fn validate(&self) -> Result<()> {
        if let Some(schedule) = &self.schedule {
            schedule.validate()?;
        }
        if let Some(ab) = &self.ab_test {
            ab.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Email,
    Sms,
    Social,
}

/// Campaign lifecycle: Draft → Scheduled → Active ⇄ Paused → Completed, with
/// Cancelled reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    #[default]
    Draft,
    Scheduled,
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl CampaignStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CampaignStatus::Completed | CampaignStatus::Cancelled)
    }

    /// Whether the state machine permits moving to `to`.
    pub fn can_transition(&self, to: CampaignStatus) -> bool {
        use CampaignStatus::*;
        if *self == to {
            return false;
        }
        if to == Cancelled {
            return !self.is_terminal();
        }
        matches!(
            (*self, to),
            (Draft, Scheduled)
                | (Scheduled, Active)
                | (Active, Paused)
                | (Active, Completed)
                | (Active, Scheduled)
                | (Paused, Active)
                | (Paused, Scheduled)
        )
    }
}

/// When and how often a campaign fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    pub frequency: Frequency,
    /// Clock time "HH:MM" (UTC).
    pub send_time: String,
}

impl Schedule {
    /// Reject malformed schedules at set time: bad "HH:MM", end before start.
    pub fn validate(&self) -> Result<()> {
        self.parse_send_time()?;
        if let Some(end) = self.end_date
            && end < self.start_date
        {
            return Err(EngineError::Validation(format!(
                "End date {} is before start date {}",
                end, self.start_date
            )));
        }
        Ok(())
    }

    /// Parse `send_time` into (hour, minute).
    pub fn parse_send_time(&self) -> Result<(u32, u32)> {
        let invalid =
            || EngineError::Validation(format!("Invalid send time '{}'", self.send_time));
        let (h, m) = self.send_time.split_once(':').ok_or_else(invalid)?;
        let hour: u32 = h.parse().map_err(|_| invalid())?;
        let minute: u32 = m.parse().map_err(|_| invalid())?;
        if hour > 23 || minute > 59 {
            return Err(invalid());
        }
        Ok((hour, minute))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Once,
    Daily,
    Weekly,
    Monthly,
}

/// How a campaign selects recipients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    /// Reference to a saved segment.
    Segment(Uuid),
    /// Inline criteria evaluated directly.
    Criteria(Vec<SegmentCriterion>),
}

/// Authored content, optionally deferring to a template by id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignContent {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub template_id: Option<String>,
}

/// A/B test block attached to a campaign.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AbTest {
    pub enabled: bool,
    #[serde(default)]
    pub variants: Vec<Variant>,
    #[serde(default)]
    pub winner: Option<Uuid>,
}

impl AbTest {
    /// Enabled tests must hold at least two variants, each at or above the
    /// floor, summing to exactly 100.
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.variants.len() < 2 {
            return Err(EngineError::Validation(
                "An enabled A/B test needs at least 2 variants".into(),
            ));
        }
        let sum: u32 = self.variants.iter().map(|v| v.allocation).sum();
        if sum != 100 {
            return Err(EngineError::Validation(format!(
                "Variant allocations sum to {sum}, expected 100"
            )));
        }
        if let Some(v) = self.variants.iter().find(|v| v.allocation < MIN_ALLOCATION) {
            return Err(EngineError::Validation(format!(
                "Variant '{}' is below the {MIN_ALLOCATION}% floor",
                v.name
            )));
        }
        Ok(())
    }
}
