//! CRM record types consumed by the engine.
//!
//! Leads are owned by the CRM: the engine reads them for audience matching
//! and performs exactly one write shape (the Closed Won conversion). Students
//! and companies only exist here as conversion targets.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A sales lead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub status: LeadStatus,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(rename = "type")]
    pub lead_type: LeadType,
    pub pipeline: PipelineStage,
    /// Date the lead entered the CRM.
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub last_interaction_date: Option<NaiveDate>,
    #[serde(default)]
    pub next_contact_date: Option<NaiveDate>,
    #[serde(default)]
    pub course_of_interest: Option<String>,
    /// Courses assigned during the sales process.
    #[serde(default)]
    pub courses: Vec<String>,
    #[serde(default)]
    pub company_id: Option<Uuid>,
    #[serde(default)]
    pub converted: bool,
}

impl Lead {
    /// The course a conversion enrolls: the explicit interest if set,
    /// otherwise the first assigned course.
    pub fn resolved_course(&self) -> Option<&str> {
        self.course_of_interest
            .as_deref()
            .or_else(|| self.courses.first().map(|s| s.as_str()))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Active,
    Converted,
    Lost,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LeadType {
    Inbound,
    Outbound,
}

/// The seven pipeline stages. `ClosedWon` triggers conversion side effects.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    New,
    Contacted,
    Qualified,
    Proposal,
    Negotiation,
    ClosedWon,
    ClosedLost,
}

impl PipelineStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStage::ClosedWon | PipelineStage::ClosedLost)
    }
}

/// A student record created when an inbound lead converts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub course: String,
    pub enrolled_at: DateTime<Utc>,
    /// The lead this student was converted from.
    pub source_lead_id: Uuid,
}

/// A company attached to outbound leads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub id: Uuid,
    pub name: String,
    pub status: CompanyStatus,
    #[serde(default)]
    pub contracted_courses: Vec<String>,
    #[serde(default)]
    pub contract_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompanyStatus {
    Prospect,
    Active,
    Inactive,
}

/// A reusable email template campaigns may reference by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailTemplate {
    pub id: String,
    pub name: String,
    pub subject: String,
    pub body: String,
}
