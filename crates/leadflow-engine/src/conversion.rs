//! Lead pipeline conversion — the Closed Won side effect.
//!
//! An outbound lead with a company becomes a course contract on that
//! company; anything else becomes a student record. Preconditions are
//! checked before any write so a failed conversion leaves the CRM untouched.

use chrono::Utc;
use leadflow_core::{CompanyStatus, EngineError, Lead, LeadStatus, LeadType, PipelineStage, Result, Student};
use uuid::Uuid;

use crate::persistence::CampaignStore;

/// What a conversion produced.
#[derive(Debug, Clone)]
pub enum ConversionOutcome {
    Student(Student),
    Contract {
        company_id: Uuid,
        contract_name: String,
    },
}

/// Precondition check, run before any write. The form layer calls this too,
/// so a rejection here is a caller bug surfaced late, not a retry case.
pub fn validate_conversion(lead: &Lead, contract_name: Option<&str>) -> Result<()> {
    if lead.resolved_course().is_none() {
        return Err(EngineError::Conversion(format!(
            "Lead '{}' reached Closed Won with no course selected",
            lead.name
        )));
    }
    if lead.lead_type == LeadType::Outbound
        && lead.company_id.is_some()
        && contract_name.map_or(true, |n| n.trim().is_empty())
    {
        return Err(EngineError::Conversion(format!(
            "Company conversion for '{}' needs a contract name",
            lead.name
        )));
    }
    Ok(())
}

/// Convert a lead that reached the end of the pipeline.
///
/// Outbound + company: the company gains the resolved course, turns Active,
/// and records the contract name. Otherwise a student is created from the
/// lead. In both cases the lead is marked Converted / Closed Won.
pub fn convert(
    store: &CampaignStore,
    lead_id: Uuid,
    contract_name: Option<&str>,
) -> Result<ConversionOutcome> {
    let Some(mut lead) = store.load_lead(lead_id)? else {
        return Err(EngineError::Conversion(format!("Unknown lead {lead_id}")));
    };
    validate_conversion(&lead, contract_name)?;

    let course = lead
        .resolved_course()
        .map(String::from)
        .unwrap_or_default();

    let outcome = match (lead.lead_type, lead.company_id) {
        (LeadType::Outbound, Some(company_id)) => {
            let Some(mut company) = store.load_company(company_id)? else {
                return Err(EngineError::Conversion(format!(
                    "Lead '{}' references unknown company {company_id}",
                    lead.name
                )));
            };
            if !company.contracted_courses.contains(&course) {
                company.contracted_courses.push(course);
            }
            company.status = CompanyStatus::Active;
            let name = contract_name.unwrap_or_default().to_string();
            company.contract_name = Some(name.clone());
            store.save_company(&company)?;
            tracing::info!("🤝 Contract '{}' recorded for company '{}'", name, company.name);
            ConversionOutcome::Contract {
                company_id,
                contract_name: name,
            }
        }
        _ => {
            let student = Student {
                id: Uuid::new_v4(),
                name: lead.name.clone(),
                email: lead.email.clone(),
                course,
                enrolled_at: Utc::now(),
                source_lead_id: lead.id,
            };
            store.save_student(&student)?;
            tracing::info!("🎓 Student '{}' enrolled from lead", student.name);
            ConversionOutcome::Student(student)
        }
    };

    lead.status = LeadStatus::Converted;
    lead.pipeline = PipelineStage::ClosedWon;
    lead.converted = true;
    store.save_lead(&lead)?;

    Ok(outcome)
}
