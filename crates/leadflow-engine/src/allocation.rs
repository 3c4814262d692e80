//! Allocation balancer — keeps A/B variant percentages summing to exactly
//! 100 with a per-variant floor, after every mutation.
//!
//! Out-of-range requests clamp rather than error: these feed interactive
//! forms and a batch scheduler, neither of which should halt on one bad
//! number.

use leadflow_core::{EngineError, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Minimum allocation percentage a variant may hold.
pub const MIN_ALLOCATION: u32 = 5;
/// Maximum allocation percentage a variant may hold.
pub const MAX_ALLOCATION: u32 = 95;

/// One content/allocation alternative within an A/B test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub id: Uuid,
    pub name: String,
    /// Content override applied when this variant is picked.
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    /// Traffic share, 5–95. The set always sums to 100.
    pub allocation: u32,
    #[serde(default)]
    pub metrics: VariantMetrics,
}

impl Variant {
    pub fn new(name: &str, allocation: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            subject: None,
            body: None,
            allocation,
            metrics: VariantMetrics::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariantMetrics {
    pub impressions: u64,
    pub clicks: u64,
    pub conversions: u64,
}

/// Set one variant's allocation and rebalance the rest so the set sums to
/// 100. `new_value` is clamped to `[MIN_ALLOCATION, MAX_ALLOCATION]`, and
/// the ceiling tightens further so every other variant can still hold its
/// floor.
///
/// A degenerate set whose other variants sum to zero is left untouched; the
/// floor guards against ever reaching that state.
pub fn rebalance(variants: &mut [Variant], changed_id: Uuid, new_value: u32) {
    let Some(changed_idx) = variants.iter().position(|v| v.id == changed_id) else {
        tracing::warn!("Rebalance: unknown variant {changed_id}");
        return;
    };

    let ceiling = MAX_ALLOCATION
        .min(100u32.saturating_sub(MIN_ALLOCATION * (variants.len() as u32 - 1)))
        .max(MIN_ALLOCATION);
    let new_value = new_value.clamp(MIN_ALLOCATION, ceiling);

    let delta = new_value as i64 - variants[changed_idx].allocation as i64;
    let others_total: i64 = variants
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != changed_idx)
        .map(|(_, v)| v.allocation as i64)
        .sum();
    if others_total <= 0 {
        tracing::warn!("Rebalance: other variants hold no allocation, skipping");
        return;
    }

    let factor = 1.0 - delta as f64 / others_total as f64;
    for (i, v) in variants.iter_mut().enumerate() {
        if i != changed_idx {
            v.allocation = MIN_ALLOCATION.max((v.allocation as f64 * factor).floor() as u32);
        }
    }
    variants[changed_idx].allocation = new_value;

    apply_residual(variants, Some(changed_idx));
}

/// Insert a new variant with an even split across the whole set, then correct
/// the rounding residual on the first variant.
pub fn add_variant(variants: &mut Vec<Variant>, variant: Variant) {
    variants.push(variant);
    let even = 100 / variants.len() as u32;
    for v in variants.iter_mut() {
        v.allocation = even;
    }
    let sum: i64 = variants.iter().map(|v| v.allocation as i64).sum();
    variants[0].allocation = (variants[0].allocation as i64 + (100 - sum)) as u32;
}

/// Remove a variant and redistribute its share proportionally. Refuses if
/// fewer than two variants would remain. Clears `winner` if it pointed at the
/// removed variant.
pub fn remove_variant(
    variants: &mut Vec<Variant>,
    id: Uuid,
    winner: &mut Option<Uuid>,
) -> Result<()> {
    if variants.len() <= 2 {
        return Err(EngineError::Validation(
            "An A/B test needs at least 2 variants".into(),
        ));
    }
    let Some(idx) = variants.iter().position(|v| v.id == id) else {
        return Err(EngineError::Validation(format!("Unknown variant {id}")));
    };
    variants.remove(idx);
    if *winner == Some(id) {
        *winner = None;
    }

    let remaining_total: i64 = variants.iter().map(|v| v.allocation as i64).sum();
    if remaining_total > 0 {
        let factor = 100.0 / remaining_total as f64;
        for v in variants.iter_mut() {
            v.allocation = MIN_ALLOCATION.max((v.allocation as f64 * factor).floor() as u32);
        }
        apply_residual(variants, None);
    }
    Ok(())
}

/// Step 5 of the balancing algorithm: if the set does not sum to 100, add the
/// signed residual to whichever eligible variant holds the largest allocation.
/// `exclude` skips the variant whose value was just pinned by the caller.
fn apply_residual(variants: &mut [Variant], exclude: Option<usize>) {
    let sum: i64 = variants.iter().map(|v| v.allocation as i64).sum();
    let residual = 100 - sum;
    if residual == 0 {
        return;
    }
    let largest = variants
        .iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != exclude)
        .max_by_key(|(_, v)| v.allocation)
        .map(|(i, _)| i);
    if let Some(i) = largest {
        variants[i].allocation = (variants[i].allocation as i64 + residual).max(0) as u32;
    }
}
