//! # LeadFlow Core
//!
//! Shared building blocks for the LeadFlow campaign automation engine:
//! the error taxonomy, engine configuration, an injectable clock, and the
//! CRM-owned record types (leads, students, companies, templates) the
//! engine reads and writes.

pub mod clock;
pub mod config;
pub mod error;
pub mod types;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use types::{
    Company, CompanyStatus, EmailTemplate, Lead, LeadStatus, LeadType, PipelineStage, Student,
};
