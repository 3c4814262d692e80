//! Segment matcher — evaluates a lead against an ordered list of criteria.
//!
//! Criteria combine with AND; there is no OR or grouping. Unknown fields
//! degrade to "absent" instead of erroring so a bad segment never aborts a
//! scheduler run.

use leadflow_core::{EngineError, Lead, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

/// The field vocabulary criteria may reference.
pub const KNOWN_FIELDS: &[&str] = &[
    "name",
    "email",
    "status",
    "source",
    "type",
    "pipeline",
    "date",
    "lastInteractionDate",
    "nextContactDate",
    "courseOfInterest",
];

/// Date-valued fields. `contains`/`not_contains` are string-only and never
/// match these.
const DATE_FIELDS: &[&str] = &["date", "lastInteractionDate", "nextContactDate"];

/// One predicate over a lead field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentCriterion {
    pub field: String,
    pub op: CriterionOp,
    /// Ignored for `exists`/`not_exists`.
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CriterionOp {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    GreaterThan,
    LessThan,
    In,
    NotIn,
    Exists,
    NotExists,
}

/// A named audience-selection rule (dynamic) or frozen member list (static).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub segment_type: SegmentType,
    #[serde(default)]
    pub criteria: Vec<SegmentCriterion>,
    /// Frozen membership snapshot, meaningful only for static segments.
    #[serde(default)]
    pub members: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SegmentType {
    Dynamic,
    Static,
}

/// Validate a segment at save time. Dynamic segments must only reference
/// known fields; the matcher itself never rejects, it degrades.
pub fn validate(segment: &Segment) -> Result<()> {
    if segment.segment_type == SegmentType::Dynamic {
        for c in &segment.criteria {
            if !KNOWN_FIELDS.contains(&c.field.as_str()) {
                return Err(EngineError::Validation(format!(
                    "Unknown segment field '{}'",
                    c.field
                )));
            }
        }
    }
    Ok(())
}

/// Evaluate every criterion against the lead. True only if ALL are satisfied;
/// an empty list matches every lead (vacuous AND).
pub fn matches(lead: &Lead, criteria: &[SegmentCriterion]) -> bool {
    criteria.iter().all(|c| matches_one(lead, c))
}

fn matches_one(lead: &Lead, criterion: &SegmentCriterion) -> bool {
    let field_value = lead_field(lead, &criterion.field);

    match criterion.op {
        CriterionOp::Exists => return field_value.is_some(),
        CriterionOp::NotExists => return field_value.is_none(),
        _ => {}
    }

    let Some(expected) = criterion.value.as_deref() else {
        // Value-requiring operator with no value: malformed, never matches.
        tracing::debug!(
            "Criterion on '{}' has no value for {:?}",
            criterion.field,
            criterion.op
        );
        return false;
    };

    let Some(actual) = field_value else {
        // Absent field: negative operators hold vacuously.
        return matches!(
            criterion.op,
            CriterionOp::NotEquals | CriterionOp::NotContains | CriterionOp::NotIn
        );
    };

    match criterion.op {
        CriterionOp::Equals => actual == expected,
        CriterionOp::NotEquals => actual != expected,
        CriterionOp::Contains => is_string_field(&criterion.field) && contains_ci(&actual, expected),
        CriterionOp::NotContains => {
            !is_string_field(&criterion.field) || !contains_ci(&actual, expected)
        }
        CriterionOp::GreaterThan => natural_cmp(&actual, expected) == Ordering::Greater,
        CriterionOp::LessThan => natural_cmp(&actual, expected) == Ordering::Less,
        CriterionOp::In => split_set(expected).any(|v| v == actual),
        CriterionOp::NotIn => !split_set(expected).any(|v| v == actual),
        CriterionOp::Exists | CriterionOp::NotExists => unreachable!("handled above"),
    }
}

/// Look up a lead field by vocabulary name, rendered to its comparable string
/// form (enums as snake_case, dates as ISO `YYYY-MM-DD`). Unknown fields are
/// treated as absent.
fn lead_field(lead: &Lead, field: &str) -> Option<String> {
    match field {
        "name" => Some(lead.name.clone()),
        "email" => Some(lead.email.clone()),
        "status" => enum_str(&lead.status),
        "source" => lead.source.clone(),
        "type" => enum_str(&lead.lead_type),
        "pipeline" => enum_str(&lead.pipeline),
        "date" => lead.date.map(|d| d.to_string()),
        "lastInteractionDate" => lead.last_interaction_date.map(|d| d.to_string()),
        "nextContactDate" => lead.next_contact_date.map(|d| d.to_string()),
        "courseOfInterest" => lead.course_of_interest.clone(),
        _ => None,
    }
}

fn is_string_field(field: &str) -> bool {
    !DATE_FIELDS.contains(&field)
}

/// Serde's snake_case rendering of an enum value.
fn enum_str<T: Serialize>(value: &T) -> Option<String> {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(String::from))
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Numeric ordering when both sides parse as numbers, lexical otherwise
/// (ISO dates order correctly lexically).
fn natural_cmp(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a.cmp(b),
    }
}

/// Split a comma-separated value string into trimmed members.
fn split_set(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use leadflow_core::{LeadStatus, LeadType, PipelineStage};

    fn lead() -> Lead {
        Lead {
            id: Uuid::new_v4(),
            name: "Mai Tran".into(),
            email: "mai@example.com".into(),
            status: LeadStatus::Active,
            source: Some("facebook".into()),
            lead_type: LeadType::Inbound,
            pipeline: PipelineStage::Qualified,
            date: NaiveDate::from_ymd_opt(2026, 1, 10),
            last_interaction_date: NaiveDate::from_ymd_opt(2026, 2, 1),
            next_contact_date: None,
            course_of_interest: Some("IELTS Advanced".into()),
            courses: vec![],
            company_id: None,
            converted: false,
        }
    }

    fn crit(field: &str, op: CriterionOp, value: &str) -> SegmentCriterion {
        SegmentCriterion {
            field: field.into(),
            op,
            value: Some(value.into()),
        }
    }

    #[test]
    fn empty_criteria_match_everything() {
        assert!(matches(&lead(), &[]));
    }

    #[test]
    fn and_semantics() {
        let criteria = vec![
            crit("status", CriterionOp::Equals, "active"),
            crit("source", CriterionOp::Equals, "facebook"),
        ];
        assert!(matches(&lead(), &criteria));

        let criteria = vec![
            crit("status", CriterionOp::Equals, "active"),
            crit("source", CriterionOp::Equals, "google"),
        ];
        assert!(!matches(&lead(), &criteria));
    }

    #[test]
    fn contains_is_case_insensitive() {
        assert!(matches(
            &lead(),
            &[crit("courseOfInterest", CriterionOp::Contains, "ielts")]
        ));
        assert!(matches(
            &lead(),
            &[crit("name", CriterionOp::NotContains, "nguyen")]
        ));
    }

    #[test]
    fn contains_never_matches_date_fields() {
        assert!(!matches(
            &lead(),
            &[crit("date", CriterionOp::Contains, "2026")]
        ));
    }

    #[test]
    fn date_ordering_is_lexical() {
        assert!(matches(
            &lead(),
            &[crit("lastInteractionDate", CriterionOp::GreaterThan, "2026-01-15")]
        ));
        assert!(matches(
            &lead(),
            &[crit("date", CriterionOp::LessThan, "2026-02-01")]
        ));
    }

    #[test]
    fn in_splits_and_trims() {
        assert!(matches(
            &lead(),
            &[crit("source", CriterionOp::In, "google, facebook , zalo")]
        ));
        assert!(matches(
            &lead(),
            &[crit("source", CriterionOp::NotIn, "google,zalo")]
        ));
    }

    #[test]
    fn exists_on_absent_field_is_false() {
        let c = SegmentCriterion {
            field: "nextContactDate".into(),
            op: CriterionOp::Exists,
            value: None,
        };
        assert!(!matches(&lead(), &[c]));
    }

    #[test]
    fn unknown_field_degrades_to_absent() {
        let exists = SegmentCriterion {
            field: "budget".into(),
            op: CriterionOp::Exists,
            value: None,
        };
        let not_exists = SegmentCriterion {
            field: "budget".into(),
            op: CriterionOp::NotExists,
            value: None,
        };
        assert!(!matches(&lead(), &[exists]));
        assert!(matches(&lead(), &[not_exists]));
    }

    #[test]
    fn dynamic_segment_rejects_unknown_field() {
        let seg = Segment {
            id: Uuid::new_v4(),
            name: "bad".into(),
            description: String::new(),
            segment_type: SegmentType::Dynamic,
            criteria: vec![crit("budget", CriterionOp::Equals, "100")],
            members: vec![],
        };
        assert!(validate(&seg).is_err());

        let frozen = Segment {
            segment_type: SegmentType::Static,
            ..seg
        };
        assert!(validate(&frozen).is_ok());
    }
}
