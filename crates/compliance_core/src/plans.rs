//! crates/compliance_core/src/plans.rs
//!
//! Purchasable plans and the upgrade/downgrade rule for plan changes.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    Monthly,
    Yearly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub key: String,
    pub name: String,
    /// Price per interval. Always compared numerically, never as display text.
    pub amount: Decimal,
    pub currency: String,
    pub interval: BillingInterval,
    #[serde(default)]
    pub external_plan_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanCatalogError {
    #[error("plan catalog is empty")]
    Empty,
    #[error("duplicate plan key '{0}'")]
    DuplicateKey(String),
    #[error("plan '{0}' has a negative price")]
    NegativeAmount(String),
}

/// The validated set of plans offered to companies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanCatalog {
    plans: Vec<Plan>,
}

impl PlanCatalog {
    pub fn new(plans: Vec<Plan>) -> Result<Self, PlanCatalogError> {
        if plans.is_empty() {
            return Err(PlanCatalogError::Empty);
        }
        for (i, plan) in plans.iter().enumerate() {
            if plan.amount.is_sign_negative() {
                return Err(PlanCatalogError::NegativeAmount(plan.key.clone()));
            }
            if plans[..i].iter().any(|p| p.key == plan.key) {
                return Err(PlanCatalogError::DuplicateKey(plan.key.clone()));
            }
        }
        Ok(Self { plans })
    }

    pub fn get(&self, key: &str) -> Option<&Plan> {
        self.plans.iter().find(|p| p.key == key)
    }

    pub fn plans(&self) -> &[Plan] {
        &self.plans
    }
}

/// Direction of a plan change relative to what the company pays today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanChange {
    Upgrade,
    Downgrade,
    Lateral,
}

pub fn classify_plan_change(current_amount: Decimal, new_amount: Decimal) -> PlanChange {
    match new_amount.cmp(&current_amount) {
        Ordering::Greater => PlanChange::Upgrade,
        Ordering::Less => PlanChange::Downgrade,
        Ordering::Equal => PlanChange::Lateral,
    }
}
